use haflip::application::Application;
use haflip::config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return Err(e);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.pretty().init();
    }

    info!("configuration loaded");
    info!("building engine");
    let app = match Application::build(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "failed to build engine");
            return Err(e.into());
        }
    };

    info!("engine running");
    if let Err(e) = app.run().await {
        error!(error = %e, "engine exited with error");
        return Err(e.into());
    }

    Ok(())
}
