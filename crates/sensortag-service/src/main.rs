//! SensorTag Report - streams SensorTag readings into InfluxDB.
//!
//! Run with: `DB_USER=... DB_PASS=... cargo run -p sensortag-service`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use sensortag_core::{BleDiscoverer, ConnectionConfig, Discoverer, ReconnectPolicy, get_adapter};
use sensortag_service::{
    Config, EXIT_CONFIG, Environment, Reporter, StartupError, shutdown_signal,
};
use sensortag_store::InfluxSink;

/// SensorTag Report - discovers SensorTags and records their readings.
#[derive(Parser, Debug)]
#[command(name = "sensortag-report")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// What to do when a streaming device disconnects: rediscover or same-handle (overrides config).
    #[arg(short, long)]
    reconnect: Option<ReconnectPolicy>,

    /// Bluetooth adapter index.
    #[arg(short, long, default_value_t = 0)]
    adapter: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing() {
        eprintln!("ERROR : cannot initialise logging: {}", e);
        return ExitCode::from(EXIT_CONFIG);
    }

    let env = match Environment::from_env() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("ERROR : {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(args, env).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR : {:#}", e);
            let code = e
                .downcast_ref::<StartupError>()
                .map(StartupError::exit_code)
                .unwrap_or(EXIT_CONFIG);
            ExitCode::from(code)
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sensortag_core=info".parse()?)
                .add_directive("sensortag_service=info".parse()?),
        )
        .init();
    Ok(())
}

async fn run(args: Args, env: Environment) -> anyhow::Result<()> {
    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    if let Some(policy) = args.reconnect {
        config.session.reconnect = policy;
    }
    config.validate()?;

    let sink = InfluxSink::new(config.influx_config(&env))?;
    info!(url = %sink.base_url(), database = %env.database, "Using InfluxDB");

    let filter = config.discovery.name_filter();
    let connection = ConnectionConfig::default()
        .connection_timeout(Duration::from_millis(config.session.connect_timeout_ms));
    let adapter_index = args.adapter;

    let reporter = Reporter::new(config, &env.database, Arc::new(sink));
    let stats = reporter
        .run(
            || async move {
                let adapter = get_adapter(adapter_index).await?;
                let discoverer = BleDiscoverer::with_options(adapter, filter, connection).await?;
                Ok::<_, sensortag_core::Error>(Arc::new(discoverer) as Arc<dyn Discoverer>)
            },
            shutdown_signal(),
        )
        .await?;

    info!(
        admitted = stats.admitted,
        timed_out = stats.timed_out,
        disconnects = stats.disconnects,
        "Shutdown complete"
    );
    Ok(())
}
