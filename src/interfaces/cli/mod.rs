/// CLI Interface Module
///
/// Entry point when the engine runs as a standalone process.
///
/// ## Responsibilities
/// - Parse command-line arguments into `EngineConfig`
/// - Open the event log (file backed with `--event-log-dir`, otherwise in memory)
/// - Recover every market from the log
/// - Serve `/metrics` and `/health*`
/// - Read JSON-line `ClientMessage`s from stdin, write `ServerMessage`s to stdout
///
/// ## Example
/// ```text
/// $ outcome-engine --event-log-dir ./data --multi-instance-markets 7:1,7:2
/// {"type":"create_order","market":{"milestone_id":1,"option_id":1},"account_id":7,"side":"buy","price":"0.60","quantity":10}
/// ```

use crate::application::engine::{Engine, EngineConfig, EngineDeps};
use crate::application::outbound::{EventSubscriber, TracingSubscriber};
use crate::application::services::PartitionConfig;
use crate::application::ServerMessage;
use crate::domain::entities::MarketKey;
use crate::infrastructure::event_log::FileEventLog;
use crate::infrastructure::observability::{HealthChecker, HealthSource, HealthStatus, ObservabilityServer};
use crate::shared::protocol::ClientMessage;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// 撮合引擎命令行配置
#[derive(Parser, Debug, Clone)]
#[command(name = "outcome-engine")]
#[command(version)]
#[command(about = "预测市场撮合引擎", long_about = None)]
pub struct CliConfig {
    /// 实例ID，写入事件并作为租约持有者
    #[arg(short = 'i', long, default_value = "engine-1")]
    pub instance_id: String,

    /// 撮合worker数量（0表示自动检测CPU核心数）
    #[arg(short = 'n', long, default_value_t = 0)]
    pub workers: usize,

    /// 每个worker的队列容量
    #[arg(short = 'q', long, default_value_t = 1024)]
    pub queue_capacity: usize,

    /// 下单默认超时（毫秒）
    #[arg(long, default_value_t = 30_000)]
    pub submit_timeout_ms: u64,

    /// 单次事件日志写入超时（毫秒）
    #[arg(long, default_value_t = 5_000)]
    pub append_timeout_ms: u64,

    /// 市场租约TTL（毫秒）
    #[arg(long, default_value_t = 5_000)]
    pub lease_ttl_ms: u64,

    /// 获取租约的重试次数
    #[arg(long, default_value_t = 3)]
    pub lease_retries: u32,

    /// 事件日志目录；不指定则使用内存日志
    #[arg(short = 'd', long)]
    pub event_log_dir: Option<PathBuf>,

    /// 指标与健康检查端口
    #[arg(short = 'm', long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// 多实例共享的市场，例如 7:1,7:2
    #[arg(long, value_delimiter = ',')]
    pub multi_instance_markets: Vec<MarketKey>,

    /// 日志级别
    #[arg(short = 'l', long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: String,

    /// 仅显示配置不启动引擎（用于调试）
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

impl CliConfig {
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let partitions = PartitionConfig {
            partition_count: if self.workers == 0 { num_cpus::get() } else { self.workers },
            queue_capacity: self.queue_capacity,
        };
        EngineConfig {
            instance_id: self.instance_id.clone(),
            partitions,
            submit_timeout: Duration::from_millis(self.submit_timeout_ms),
            append_timeout: Duration::from_millis(self.append_timeout_ms),
            lease_ttl: Duration::from_millis(self.lease_ttl_ms),
            lease_retries: self.lease_retries,
            multi_instance_markets: self.multi_instance_markets.iter().copied().collect(),
            ..defaults
        }
    }
}

/// Runs the CLI application until stdin closes or Ctrl-C.
pub async fn run() -> CliResult<()> {
    let config = CliConfig::parse();
    init_logging(&config.log_level);

    let engine_config = config.engine_config();
    tracing::info!(?config, "outcome engine starting");

    if config.dry_run {
        println!("{engine_config:#?}");
        println!("Dry-run 模式 - 不启动引擎");
        return Ok(());
    }

    let mut deps = EngineDeps::in_memory();
    if let Some(dir) = &config.event_log_dir {
        deps.log = Arc::new(FileEventLog::open(dir).await?);
        tracing::info!(dir = %dir.display(), "using file event log");
    }
    let trace: Arc<dyn EventSubscriber> = Arc::new(TracingSubscriber);
    deps.subscribers.push(trace);

    let engine = Engine::start(engine_config, deps);
    let report = engine.recover().await?;
    for (market, reason) in &report.suspended {
        tracing::error!(market = %market, reason = %reason, "market suspended after recovery");
    }

    let registry: Arc<dyn HealthSource> = engine.registry().clone();
    let health = Arc::new(HealthChecker::new(env!("CARGO_PKG_VERSION")).with_source(registry));
    let server = ObservabilityServer::new(config.metrics_port, health.clone());
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "observability server stopped");
        }
    });

    let result = serve_stdin(&engine).await;

    health.set_status(HealthStatus::Unhealthy);
    engine.shutdown().await;
    result
}

async fn serve_stdin(engine: &Engine) -> CliResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<ClientMessage>(&line) {
            Ok(message) => engine.handle(message).await,
            Err(e) => ServerMessage::Rejected {
                reason: format!("malformed message: {e}"),
                retryable: false,
            },
        };
        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// 初始化日志系统，`RUST_LOG` 优先于 `--log-level`
fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // 日志写到stderr，stdout只输出应答
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
