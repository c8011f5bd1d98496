use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tracing::info;

use scriptbatch_core::{init_logging, AppConfig, Machine, ScriptEngine};

mod app;
mod checkout;

use app::{Application, CodebaseEntry, RunPlan};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("scriptbatch")
        .version("0.3.0")
        .about("资源受限容器中批量执行分析脚本的测量工具")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（TOML）"),
        )
        .arg(
            Arg::new("registry")
                .short('r')
                .long("registry")
                .value_name("FILE")
                .help("代码库登记表路径（TOML）"),
        )
        .arg(
            Arg::new("codebase")
                .long("codebase")
                .value_name("DIR")
                .action(ArgAction::Append)
                .help("直接指定本地代码库目录（可重复）"),
        )
        .arg(
            Arg::new("image")
                .short('i')
                .long("image")
                .value_name("IMAGE")
                .required(true)
                .help("默认容器镜像"),
        )
        .arg(
            Arg::new("engine")
                .short('e')
                .long("engine")
                .value_name("ENGINE")
                .value_parser(["rscript", "python", "shell"])
                .default_value("rscript")
                .help("默认脚本引擎"),
        )
        .arg(
            Arg::new("setup")
                .long("setup")
                .value_name("COMMAND")
                .help("每个批次前的共享环境初始化命令（shell引用语法）"),
        )
        .arg(
            Arg::new("results-dir")
                .short('o')
                .long("results-dir")
                .value_name("DIR")
                .default_value("results")
                .help("结果输出根目录"),
        )
        .arg(
            Arg::new("single-pass")
                .long("single-pass")
                .action(ArgAction::SetTrue)
                .help("禁用不动点重试，每个脚本只尝试一次"),
        )
        .arg(
            Arg::new("keep-scratch")
                .long("keep-scratch")
                .action(ArgAction::SetTrue)
                .help("保留每次容器执行的临时目录供检查"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info")
                .help("日志级别"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["json", "pretty"])
                .default_value("pretty")
                .help("日志格式"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let log_level = matches.get_one::<String>("log-level").unwrap();
    let log_format = matches.get_one::<String>("log-format").unwrap();

    // 初始化日志系统
    init_logging(log_level, log_format)?;

    // 加载配置
    let mut config = AppConfig::load(config_path.map(String::as_str))
        .context("加载配置失败")?;
    if matches.get_flag("single-pass") {
        config.retry.fixpoint_enabled = false;
    }
    if matches.get_flag("keep-scratch") {
        config.engine.keep_scratch = true;
    }

    // 汇集代码库：登记表与命令行目录可以并用
    let mut codebases: Vec<CodebaseEntry> = Vec::new();
    if let Some(registry_path) = matches.get_one::<String>("registry") {
        codebases.extend(app::load_registry(std::path::Path::new(registry_path))?);
    }
    if let Some(dirs) = matches.get_many::<String>("codebase") {
        for dir in dirs {
            let path = PathBuf::from(dir);
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "codebase".to_string());
            codebases.push(CodebaseEntry {
                name,
                path: Some(path),
                git: None,
                rev: None,
                engine: None,
                image: None,
            });
        }
    }
    if codebases.is_empty() {
        anyhow::bail!("没有任何代码库：请提供 --registry 或 --codebase");
    }

    let env_setup_command = match matches.get_one::<String>("setup") {
        Some(raw) => Some(
            shlex::split(raw).with_context(|| format!("初始化命令无法解析: {raw}"))?,
        ),
        None => None,
    };

    let default_engine: ScriptEngine = matches
        .get_one::<String>("engine")
        .unwrap()
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let results_root = PathBuf::from(matches.get_one::<String>("results-dir").unwrap());
    std::fs::create_dir_all(&results_root)
        .with_context(|| format!("创建结果目录失败: {}", results_root.display()))?;

    let plan = RunPlan {
        codebases,
        default_engine,
        default_image: matches.get_one::<String>("image").unwrap().clone(),
        results_root,
        env_setup_command,
    };

    // 机器描述在进程启动时探测一次，按值传入
    let machine = Machine::detect();
    info!("scriptbatch 启动");

    let app = Application::new(config, machine);
    let summary = app.run(&plan).await?;

    // 运行完成即为成功退出；个别脚本的失败只体现在报告中
    info!(codebases = summary.codebases.len(), "运行完成");
    Ok(())
}
