//! regbot-controller: hands out MSISDNs to SIP registration workers.

use regbot_controller::config::Config;
use regbot_controller::db::Db;
use regbot_controller::engine::{Controller, ControllerConfig};
use regbot_controller::store::RedisStore;
use regbot_controller::telemetry::{TelemetryConfig, init_telemetry};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "regbot-controller".to_string(),
        log_level: config.log_level.clone(),
        log_format: config.log_format,
    })?;

    tokio::time::sleep(config.startup_delay).await;

    let mut controller = match boot(&config).await {
        Ok(controller) => controller,
        Err(e) => {
            // No retry: stay up, never ready, until stopped.
            error!("error initializing reg-bot-controller: {e:#}");
            tokio::signal::ctrl_c().await.ok();
            return Ok(());
        }
    };

    let shutdown = controller.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.notify_one();
    });

    controller.run().await?;
    Ok(())
}

async fn boot(config: &Config) -> anyhow::Result<Controller> {
    let db = Db::connect(config).await?;
    let store = RedisStore::connect(&config.redis_url()).await?;

    let mut controller = Controller::new(
        Arc::new(db),
        Arc::new(store),
        ControllerConfig::from(config),
    );
    let users = controller.initialize().await?;
    controller.ensure_ready()?;
    info!(users, "reg-bot-controller ready");
    Ok(controller)
}
