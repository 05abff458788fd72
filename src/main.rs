use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use bookings::app::App;
use bookings::config::Config;
use bookings::mail::LogTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    bookings::observability::init(config.metrics_port);

    info!("bookings starting");
    info!("  store: {:?}", config.store);
    info!("  data_dir: {}", config.data_dir.display());
    info!("  store_timeout: {:?}", config.store_timeout);
    info!("  template_dir: {}", config.template_dir.display());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let app = App::start(config, Arc::new(LogTransport)).await?;

    // Graceful shutdown: wait for SIGTERM/ctrl-c, then drain queued mail
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received, draining mail queue...");
    app.shutdown(Duration::from_secs(10)).await;
    info!("bookings stopped");
    Ok(())
}
