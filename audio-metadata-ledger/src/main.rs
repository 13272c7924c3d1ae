use std::sync::Arc;

use anyhow::{Context, Error};
use audio_metadata_ledger::{
    config::Config,
    processor::BatchProcessor,
    server::{router, serve, setup_metrics_recorder, with_metrics},
    storage::create_s3_client,
};
use envconfig::Envconfig;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing(json: bool) {
    let log_layer = if json {
        fmt::layer()
            .json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown() {
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await
            }
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {},
        _ = terminate => {},
    };

    info!("Shutting down gracefully...");
}

#[tokio::main]
pub async fn main() -> Result<(), Error> {
    let config = Config::init_from_env().context("failed to load configuration from env")?;
    setup_tracing(config.log_json);
    info!("Starting up...");

    let settings = config
        .ledger_settings()
        .context("invalid ledger configuration")?;
    info!(
        bucket = %settings.bucket,
        prefix = settings.interpreter.inbound_prefix(),
        ledger = settings.locator.template(),
        write_mode = ?settings.write_mode,
        "ledger settings loaded"
    );

    let client = create_s3_client(&config).await;
    let processor = Arc::new(BatchProcessor::new(settings, client));

    let recorder_handle = setup_metrics_recorder().context("failed to install metrics recorder")?;
    let app = with_metrics(router(processor), recorder_handle);

    let bind = config.bind();
    info!("listening on {bind}");
    serve(app, &bind, shutdown()).await.context("server exited")?;

    Ok(())
}
