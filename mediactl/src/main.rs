use clap::Parser;
use mediactl::{Application, Config, config::Args, telemetry};

/// Resolves on the first of Ctrl+C or, on unix, SIGTERM
async fn wait_for_shutdown() {
    let interrupt = async {
        tokio::signal::ctrl_c().await.expect("Ctrl+C handler could not be installed");
        "SIGINT"
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())
            .expect("SIGTERM handler could not be installed")
            .recv()
            .await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    let received = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };
    tracing::info!(signal = received, "Draining in-flight requests before exit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export)?;
    tracing::debug!(config_path = %args.config, "Loaded configuration");

    Application::new(config).await?.serve(wait_for_shutdown()).await
}
