use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use wslog::config::normalize_brokers;
use wslog::{Config, LogServer, Result};

#[derive(Parser, Debug)]
#[command(name = "wslog")]
#[command(about = "Streams Kafka log topics to browsers over WebSocket", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", help = "Optional TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Address to listen on, e.g. :9000 or 0.0.0.0:9000")]
    server_address: Option<String>,

    #[arg(long, value_name = "LIST", help = "Comma separated Kafka brokers")]
    kafka_brokers: Option<String>,

    #[arg(long, value_name = "ID", help = "Kafka client identifier")]
    kafka_client_id: Option<String>,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting wslog");

    let config = match load_config(&args) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    info!(
        server_address = %config.server.address,
        topic_prefix = %config.server.topic_prefix,
        kafka_brokers = ?config.kafka.brokers,
        kafka_client_id = %config.kafka.client_id,
        queue_capacity = config.session.queue_capacity,
        max_lifetime_secs = config.session.max_lifetime_secs,
        "Configuration summary"
    );

    let server = LogServer::new(config);
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    server.run().await
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(address) = &args.server_address {
        // Accept the short ":port" form.
        config.server.address = if address.starts_with(':') {
            format!("0.0.0.0{}", address)
        } else {
            address.clone()
        };
    }
    if let Some(brokers) = &args.kafka_brokers {
        config.kafka.brokers = normalize_brokers([brokers.as_str()]);
    }
    if let Some(client_id) = &args.kafka_client_id {
        config.kafka.client_id = client_id.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("wslog=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wslog=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
