//! 退出后资源探测
//!
//! 在收割子进程的同一次系统调用里读取其资源消耗，
//! 绝不在运行期间轮询，避免与进程销毁竞争。

use std::time::Duration;

use scriptbatch_core::ComputeResource;

/// 从OS读到的原始用量
#[derive(Debug, Clone, Copy)]
pub struct RawUsage {
    pub user_cpu_time: Duration,
    pub system_cpu_time: Duration,
    pub max_resident_set_size: u64,
    pub io_bytes_read: u64,
    pub io_bytes_written: u64,
    pub context_switches: u64,
}

impl RawUsage {
    /// 结合墙钟时间构造完整的资源记录
    ///
    /// rusage无法提供峰值虚拟内存，该字段恒为 `None`。
    pub fn into_resource(self, wall_time: Duration) -> ComputeResource {
        ComputeResource {
            user_cpu_time: self.user_cpu_time,
            system_cpu_time: self.system_cpu_time,
            wall_time,
            max_resident_set_size: self.max_resident_set_size,
            max_virtual_memory_size: None,
            io_bytes_read: Some(self.io_bytes_read),
            io_bytes_written: Some(self.io_bytes_written),
            context_switches: Some(self.context_switches),
        }
    }
}

/// 测量来源缺失时的资源记录
pub fn unavailable_resource(wall_time: Duration) -> ComputeResource {
    ComputeResource {
        wall_time,
        ..ComputeResource::zeroed()
    }
}

/// 等待指定子进程结束并原子地读取其资源消耗
///
/// 返回解码后的退出码（被信号终止时为 128+信号编号）。
/// 平台不支持时用量为 `None`，调用方降级为可选字段缺失。
#[cfg(unix)]
pub fn wait_with_usage(pid: u32) -> std::io::Result<(i32, Option<RawUsage>)> {
    let mut status: libc::c_int = 0;
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };

    loop {
        let ret = unsafe {
            libc::wait4(
                pid as libc::pid_t,
                &mut status as *mut libc::c_int,
                0,
                &mut usage as *mut libc::rusage,
            )
        };
        if ret == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }
        break;
    }

    let exit_code = if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        -1
    };

    Ok((exit_code, Some(decode_rusage(&usage))))
}

#[cfg(unix)]
fn decode_rusage(usage: &libc::rusage) -> RawUsage {
    // Linux上 ru_maxrss 以KiB计；块计数按512字节换算
    RawUsage {
        user_cpu_time: timeval_to_duration(usage.ru_utime),
        system_cpu_time: timeval_to_duration(usage.ru_stime),
        max_resident_set_size: (usage.ru_maxrss as u64) * 1024,
        io_bytes_read: (usage.ru_inblock as u64) * 512,
        io_bytes_written: (usage.ru_oublock as u64) * 512,
        context_switches: (usage.ru_nvcsw as u64) + (usage.ru_nivcsw as u64),
    }
}

#[cfg(unix)]
fn timeval_to_duration(tv: libc::timeval) -> Duration {
    Duration::new(tv.tv_sec.max(0) as u64, (tv.tv_usec.max(0) as u32) * 1000)
}

#[cfg(not(unix))]
pub fn wait_with_usage(_pid: u32) -> std::io::Result<(i32, Option<RawUsage>)> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "该平台不支持带资源读取的进程等待",
    ))
}
