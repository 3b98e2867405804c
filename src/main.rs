use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use forge_engine::tools::{create_default_registry, TestCommand};
use forge_engine::{PublishWorkflow, RetryPolicy, RunnerConfig, StepLoop, ToolExecutor};
use forge_llm::{OpenAiCompatProvider, OpenAiConfig, ReliableConfig, ReliableProvider};
use forge_server::{ServerConfig, SupervisorConfig};
use forge_store::{ArtifactLayout, ArtifactNaming, AuditLog, SessionStore};
use forge_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// Forge - streaming code-generation server
#[derive(Parser, Debug)]
#[command(name = "forge")]
#[command(version, about, long_about = None)]
struct Cli {
    // === Server ===
    #[arg(long, env = "FORGE_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "FORGE_PORT", default_value_t = 8787)]
    port: u16,

    // === Model service ===
    /// Base URL of an OpenAI-compatible API, including the version segment
    #[arg(long, env = "FORGE_MODEL_URL", default_value = "https://api.openai.com/v1")]
    model_url: String,

    #[arg(long, env = "FORGE_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    #[arg(long, env = "FORGE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Retries when opening a model stream fails transiently
    #[arg(long, env = "FORGE_NETWORK_RETRIES", default_value_t = 3)]
    network_retries: u32,

    // === Step loop ===
    #[arg(long, env = "FORGE_MAX_STEPS", default_value_t = 10)]
    max_steps: u32,

    /// Automatic "CONTINUE" turns allowed per connection
    #[arg(long, env = "FORGE_INCOMPLETE_RETRY_LIMIT", default_value_t = 1)]
    incomplete_retry_limit: u32,

    #[arg(long, env = "FORGE_MAX_TURN_CHARS", default_value_t = 60_000)]
    max_turn_chars: usize,

    /// Don't stream `delta` events; send only the final text
    #[arg(long, env = "FORGE_NO_DELTAS")]
    no_deltas: bool,

    #[arg(long, env = "FORGE_TOOL_RETRIES", default_value_t = 2)]
    tool_retries: u32,

    // === Connection timers (seconds) ===
    #[arg(long, env = "FORGE_IDLE_TIMEOUT", default_value_t = 120)]
    idle_timeout: u64,

    #[arg(long, env = "FORGE_KEEPALIVE", default_value_t = 15)]
    keepalive: u64,

    #[arg(long, env = "FORGE_HEARTBEAT", default_value_t = 5)]
    heartbeat: u64,

    // === Artifacts ===
    /// Directory holding per-session staging, final and audit files
    #[arg(long, env = "FORGE_DATA_DIR", default_value = ".forge")]
    data_dir: PathBuf,

    /// Root that `read_file` resolves relative paths against
    #[arg(long, env = "FORGE_PROJECT_ROOT", default_value = ".")]
    project_root: PathBuf,

    #[arg(long, env = "FORGE_SOURCE_EXT", default_value = "js")]
    source_ext: String,

    #[arg(long, env = "FORGE_TEST_EXT", default_value = "test.js")]
    test_ext: String,

    /// Test runner; the staged test file path is appended
    #[arg(long, env = "FORGE_TEST_COMMAND", default_value = "node --test")]
    test_command: String,

    #[arg(long, env = "FORGE_TEST_TIMEOUT", default_value_t = 120)]
    test_timeout: u64,

    // === Logging ===
    #[arg(long, env = "FORGE_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    #[arg(long, env = "FORGE_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        module_levels: Vec::new(),
        format: cli.log_format,
    })?;

    let runner = Arc::new(build_runner(&cli)?);
    let config = ServerConfig {
        host: cli.host.clone(),
        port: cli.port,
        supervisor: SupervisorConfig {
            idle_timeout: Duration::from_secs(cli.idle_timeout),
            keepalive_interval: Duration::from_secs(cli.keepalive),
            heartbeat_interval: Duration::from_secs(cli.heartbeat),
        },
    };

    let handle = forge_server::start(config, runner)
        .await
        .with_context(|| format!("failed to bind {}:{}", cli.host, cli.port))?;
    tracing::info!(port = handle.port(), model = %cli.model, "forge ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn build_runner(cli: &Cli) -> anyhow::Result<StepLoop> {
    let mut model = OpenAiConfig::new(&cli.model_url, &cli.model);
    if let Some(key) = &cli.api_key {
        model = model.with_api_key(key);
    }
    let provider = ReliableProvider::new(
        OpenAiCompatProvider::new(model)?,
        ReliableConfig {
            max_retries: cli.network_retries,
            ..ReliableConfig::default()
        },
    );

    let data_dir = resolve_data_dir(&cli.data_dir)?;
    let layout = ArtifactLayout::new(
        data_dir,
        ArtifactNaming {
            source_ext: cli.source_ext.clone(),
            test_ext: cli.test_ext.clone(),
        },
    );
    let test_command = TestCommand::parse(&cli.test_command, Duration::from_secs(cli.test_timeout))
        .context("test command must not be empty")?;

    let audit = AuditLog::new(layout.clone());
    let workflow = Arc::new(PublishWorkflow::new(layout.clone(), audit.clone()));
    let registry = create_default_registry(layout, test_command, workflow);
    tracing::info!(tools = ?registry.names(), "tool registry ready");

    let sessions = Arc::new(SessionStore::new());
    let executor = Arc::new(ToolExecutor::new(
        Arc::new(registry),
        Arc::clone(&sessions),
        audit,
        RetryPolicy {
            max_retries: cli.tool_retries,
            ..RetryPolicy::default()
        },
    ));

    let project_root = std::fs::canonicalize(&cli.project_root)
        .with_context(|| format!("project root {} is not accessible", cli.project_root.display()))?;

    Ok(StepLoop::new(
        Arc::new(provider),
        executor,
        sessions,
        RunnerConfig {
            max_steps: cli.max_steps,
            incomplete_retry_limit: cli.incomplete_retry_limit,
            max_turn_chars: cli.max_turn_chars,
            emit_deltas: !cli.no_deltas,
            project_root,
            ..RunnerConfig::default()
        },
    ))
}

/// Create the data directory and return its absolute form, so session-area
/// paths compare equal to the absolute paths tools are given.
fn resolve_data_dir(dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;
    std::fs::canonicalize(dir)
        .with_context(|| format!("data dir {} is not accessible", dir.display()))
}
