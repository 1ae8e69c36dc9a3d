use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use map_bench::bench::config::BenchmarkConfig;
use map_bench::bench::{BenchmarkReport, BenchmarkRunner};
use map_bench::client::{Connector, HttpConnector};
use map_bench::config::{BenchArgs, Cli, Command, LogFormat, ServerArgs, DEFAULT_SERVE_PORT};
use map_bench::discovery::{Discovery, KubernetesDiscovery, StaticDiscovery};
use map_bench::provision::{HelmProvisioner, NoopProvisioner, Provisioner};
use map_bench::server::MapServer;
use map_bench::suite::MapBenchmarkSuite;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    match cli.command {
        Command::Run {
            bench,
            provision,
            address,
            namespace,
        } => {
            let config = bench.to_config((&provision).into());
            config.validate()?;

            let provisioner: Arc<dyn Provisioner> = if provision.provision {
                Arc::new(HelmProvisioner::new(namespace.clone()))
            } else {
                Arc::new(NoopProvisioner)
            };
            let discovery: Arc<dyn Discovery> = match address {
                Some(address) => Arc::new(
                    StaticDiscovery::new().with(config.controller_release.clone(), address),
                ),
                None => Arc::new(KubernetesDiscovery::new(namespace)),
            };

            run_suite(&bench, config, provisioner, discovery).await
        }
        Command::Standalone { bench, server } => {
            let config = bench.to_config(Default::default());
            config.validate()?;

            let mut server_config = server.to_config(0);
            if !server_config.databases.contains(&config.database) {
                server_config.databases.push(config.database.clone());
            }
            let mut map_server = MapServer::new(server_config);
            map_server.start().await?;

            let discovery = Arc::new(
                StaticDiscovery::new()
                    .with(config.controller_release.clone(), map_server.address()),
            );
            let result = run_suite(&bench, config, Arc::new(NoopProvisioner), discovery).await;

            tracing::info!(
                opened = map_server.service().maps_opened(),
                closed = map_server.service().maps_closed(),
                "Map handles"
            );
            map_server.stop();
            result
        }
        Command::Serve { server } => serve(&server).await,
    }
}

/// Initialize logging with the configured level and format
fn init_logging(log_level: &str, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run_suite(
    bench: &BenchArgs,
    config: BenchmarkConfig,
    provisioner: Arc<dyn Provisioner>,
    discovery: Arc<dyn Discovery>,
) -> Result<()> {
    let connector: Arc<dyn Connector> = Arc::new(HttpConnector::new(
        bench.connect_timeout(),
        bench.request_timeout(),
    )?);

    tracing::info!(
        workers = config.workers,
        benchmarks = ?config.benchmarks,
        key_count = config.workload.key_count,
        key_length = config.workload.key_length,
        "Starting benchmark run"
    );

    let runner = BenchmarkRunner::new(MapBenchmarkSuite::new(
        config,
        provisioner,
        discovery,
        connector,
    ));

    let report = tokio::select! {
        report = runner.run() => report?,
        _ = shutdown_signal() => {
            anyhow::bail!("Benchmark interrupted");
        }
    };

    print_report(&report, bench.json);
    Ok(())
}

fn print_report(report: &BenchmarkReport, json: bool) {
    if json {
        println!("{}", report.to_json());
    } else {
        report.print_table();
        report.print_summary();
    }
}

async fn serve(args: &ServerArgs) -> Result<()> {
    let mut server = MapServer::new(args.to_config(DEFAULT_SERVE_PORT));
    server.start().await?;

    println!("Map service listening on {}", server.address());
    shutdown_signal().await;

    server.stop();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
