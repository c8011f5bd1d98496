//! 资源记账文件解析
//!
//! 容器内的测量包装（GNU time）按 `%M %S %U %e %x` 格式
//! 追加写入一行：`峰值内存(KiB) 内核态秒 用户态秒 墙钟秒 退出状态`。
//! 解析按固定列位置进行，但被隔离在这里，
//! 使"格式不对就全零回退"的策略可以独立测试。

use std::time::Duration;

use scriptbatch_core::ComputeResource;

/// 记账文件最后一行恢复出的测量值
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAccounting {
    pub max_rss_bytes: u64,
    pub system_cpu_time: Duration,
    pub user_cpu_time: Duration,
    pub wall_time: Duration,
    pub exit_code: i32,
}

impl ResourceAccounting {
    /// 解析记账文件内容
    ///
    /// 只看最后一个非空行；任何畸形输入都返回 `None`，
    /// 由调用方执行零回退并发出诊断警告。
    pub fn parse(text: &str) -> Option<Self> {
        let line = text.lines().rev().find(|line| !line.trim().is_empty())?;
        let mut fields = line.split_whitespace();

        let max_rss_kib: u64 = fields.next()?.parse().ok()?;
        let system_secs: f64 = fields.next()?.parse().ok()?;
        let user_secs: f64 = fields.next()?.parse().ok()?;
        let wall_secs: f64 = fields.next()?.parse().ok()?;
        let exit_code: i32 = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        if system_secs < 0.0 || user_secs < 0.0 || wall_secs < 0.0 {
            return None;
        }

        Some(Self {
            max_rss_bytes: max_rss_kib * 1024,
            system_cpu_time: Duration::from_secs_f64(system_secs),
            user_cpu_time: Duration::from_secs_f64(user_secs),
            wall_time: Duration::from_secs_f64(wall_secs),
            exit_code,
        })
    }

    /// 记账缺失时的回退值：数值全零，退出状态视为0
    pub fn zeroed() -> Self {
        Self {
            max_rss_bytes: 0,
            system_cpu_time: Duration::ZERO,
            user_cpu_time: Duration::ZERO,
            wall_time: Duration::ZERO,
            exit_code: 0,
        }
    }

    /// 转换为资源记录
    ///
    /// cgroup侧的测量不含虚拟内存、IO与上下文切换，相应字段为 `None`。
    pub fn into_resource(self) -> ComputeResource {
        ComputeResource {
            user_cpu_time: self.user_cpu_time,
            system_cpu_time: self.system_cpu_time,
            wall_time: self.wall_time,
            max_resident_set_size: self.max_rss_bytes,
            max_virtual_memory_size: None,
            io_bytes_read: None,
            io_bytes_written: None,
            context_switches: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed_line() {
        let parsed = ResourceAccounting::parse("10240 0.12 1.50 2.01 0\n").unwrap();
        assert_eq!(parsed.max_rss_bytes, 10240 * 1024);
        assert_eq!(parsed.system_cpu_time, Duration::from_secs_f64(0.12));
        assert_eq!(parsed.user_cpu_time, Duration::from_secs_f64(1.5));
        assert_eq!(parsed.wall_time, Duration::from_secs_f64(2.01));
        assert_eq!(parsed.exit_code, 0);
    }

    #[test]
    fn test_parse_takes_last_nonempty_line() {
        let text = "Command exited with non-zero status 124\n2048 0.01 0.02 30.00 124\n\n";
        let parsed = ResourceAccounting::parse(text).unwrap();
        assert_eq!(parsed.exit_code, 124);
        assert_eq!(parsed.wall_time, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert_eq!(ResourceAccounting::parse(""), None);
        assert_eq!(ResourceAccounting::parse("   \n  \n"), None);
        assert_eq!(ResourceAccounting::parse("not numbers at all"), None);
        assert_eq!(ResourceAccounting::parse("1 2 3 4"), None);
        assert_eq!(ResourceAccounting::parse("1 2 3 4 5 6"), None);
        assert_eq!(ResourceAccounting::parse("-1 0.1 0.1 0.1 0"), None);
        assert_eq!(ResourceAccounting::parse("1024 -0.1 0.1 0.1 0"), None);
    }

    #[test]
    fn test_zeroed_fallback() {
        let fallback = ResourceAccounting::zeroed();
        assert_eq!(fallback.exit_code, 0);
        let resource = fallback.into_resource();
        assert_eq!(resource.max_resident_set_size, 0);
        assert_eq!(resource.wall_time, Duration::ZERO);
        assert!(resource.io_bytes_read.is_none());
    }

    #[test]
    fn test_signal_exit_status_parses() {
        let parsed = ResourceAccounting::parse("512 0.00 0.00 0.40 137").unwrap();
        assert_eq!(parsed.exit_code, 137);
    }
}
