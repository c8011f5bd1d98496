//! 需要本机Docker与含 `time`/`timeout` 工具镜像的集成测试
//!
//! 运行方式: `cargo test -p scriptbatch-runner -- --ignored`

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use scriptbatch_core::{Bind, ContainerExecutor, ContainerSpec, EngineConfig};
use scriptbatch_runner::ContainerRunner;

const IMAGE: &str = "scriptbatch-test-runner";

/// 构建带GNU time与coreutils的测试镜像（docker层缓存使重复构建近乎免费）
fn ensure_test_image() {
    let mut child = Command::new("docker")
        .args(["build", "--tag", IMAGE, "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("docker build 启动失败");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"FROM ubuntu:22.04\nRUN apt-get update && apt-get install -y time coreutils\n")
        .unwrap();
    assert!(child.wait().unwrap().success(), "docker build 失败");
}

fn runner() -> ContainerRunner {
    ContainerRunner::new(&EngineConfig {
        binary: "docker".to_string(),
        keep_scratch: false,
    })
}

fn base_spec(command: Vec<String>) -> ContainerSpec {
    ContainerSpec {
        image: IMAGE.to_string(),
        command,
        wall_time_limit: Duration::from_secs(10),
        kill_after: Duration::from_secs(2),
        memory_limit: 1024 * 1024 * 1024,
        cpus: 1.0,
        readonly_binds: vec![],
        readwrite_binds: vec![],
    }
}

#[tokio::test]
#[ignore = "需要Docker"]
async fn test_exit_code_stdio_and_memory_measurement() {
    ensure_test_image();
    // 分配8MiB、睡2秒、以111退出的命令
    let script = "head -c 8388608 /dev/zero | tail -c 8388608 > /dev/null; \
                  printf stdout; printf stderr >&2; sleep 2; exit 111";
    let spec = base_spec(vec!["sh".to_string(), "-c".to_string(), script.to_string()]);

    let result = runner().run(&spec).await.unwrap();
    assert_eq!(result.exit_code(), 111);
    assert_eq!(result.proc.stdout, b"stdout");
    assert_eq!(result.proc.stderr, b"stderr");
    assert!(!result.docker_command.is_empty());

    let wall = result.proc.resource.wall_time;
    assert!(wall >= Duration::from_secs(2), "墙钟时间 {wall:?} 低于睡眠时长");
    assert!(wall <= Duration::from_secs(3), "墙钟时间 {wall:?} 超出预期上界");
    // tail缓冲了完整的8MiB，峰值常驻内存不低于它
    assert!(result.proc.resource.max_resident_set_size >= 8 * 1024 * 1024);
}

#[tokio::test]
#[ignore = "需要Docker"]
async fn test_timeout_then_kill_escalation() {
    ensure_test_image();
    let limit = Duration::from_secs(2);
    let kill_after = Duration::from_secs(2);
    let mut spec = base_spec(vec![
        "sh".to_string(),
        "-c".to_string(),
        // 忽略TERM信号，迫使包装走到强杀阶段
        "trap '' TERM; while true; do sleep 1; done".to_string(),
    ]);
    spec.wall_time_limit = limit;
    spec.kill_after = kill_after;

    let result = runner().run(&spec).await.unwrap();
    // 124=超时终止, 137=宽限期后强杀; 两者都是独立的结局类别
    assert!(
        result.exit_code() == 124 || result.exit_code() == 137,
        "预期超时/强杀退出码，实际 {}",
        result.exit_code()
    );
    let wall = result.proc.resource.wall_time;
    assert!(wall >= limit);
    assert!(wall <= limit + kill_after + Duration::from_secs(1));
}

#[tokio::test]
#[ignore = "需要Docker"]
async fn test_missing_measurement_tool_degrades_cleanly() {
    // busybox镜像没有GNU time，记账文件不会生成：数值回退为零，不报错
    let mut spec = base_spec(vec!["echo".to_string(), "hello".to_string()]);
    spec.image = "busybox:latest".to_string();

    let result = runner().run(&spec).await.unwrap();
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.proc.resource.max_resident_set_size, 0);
    assert_eq!(result.proc.resource.wall_time, Duration::ZERO);
}

#[tokio::test]
#[ignore = "需要Docker"]
async fn test_readwrite_bind_is_writable() {
    ensure_test_image();
    let dir = tempfile::tempdir().unwrap();
    let host_dir = std::fs::canonicalize(dir.path()).unwrap();
    let marker = host_dir.join("written-by-container");
    let mut spec = base_spec(vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("echo ok > {}", marker.display()),
    ]);
    spec.readwrite_binds = vec![Bind::same(&host_dir)];

    let result = runner().run(&spec).await.unwrap();
    assert_eq!(result.exit_code(), 0);
    assert!(marker.exists());
}

#[tokio::test]
#[ignore = "需要Docker"]
async fn test_failed_image_pull_is_infrastructure_error() {
    let mut spec = base_spec(vec!["true".to_string()]);
    spec.image = "scriptbatch-no-such-image:does-not-exist".to_string();

    let result = runner().run(&spec).await;
    assert!(matches!(
        result,
        Err(scriptbatch_core::BatchError::ContainerEngine(_))
    ));
}
