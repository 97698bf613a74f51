use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use profile_monitor::api::WebApiClient;
use profile_monitor::config::MonitorConfig;
use profile_monitor::credentials::{TokenBroker, create_backend};
use profile_monitor::monitor::{PollSettings, ProfileMonitor};
use profile_monitor::notification::{CompositeSink, TracingSink};
use profile_monitor::panic_hook::PanicContext;
use profile_monitor::store::FileBaselineStore;
use profile_monitor::utils::fs::ensure_dir_all_with_op;
use profile_monitor::utils::http_client::{build_client, install_rustls_provider};
use profile_monitor::{logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut config = MonitorConfig::from_env().context("loading configuration")?;
    config
        .binary_login
        .apply_captured_requests()
        .context("reading captured login requests")?;
    config.validate().context("invalid configuration")?;

    let _guard = logging::init_logging(&config.log_dir)?;

    install_rustls_provider();
    let client = build_client(config.request_timeout());

    let backend = create_backend(&config, client.clone());
    let broker = TokenBroker::new(backend).with_refresh_margin(config.refresh_margin());
    panic_hook::install(
        &config.log_dir,
        PanicContext {
            user_id: config.user_id.clone(),
            backend: broker.kind(),
        },
    );
    // Static credential problems stop the process before the loop starts.
    broker
        .check_config()
        .with_context(|| format!("backend {} is misconfigured", broker.kind()))?;

    ensure_dir_all_with_op("creating data directory", &config.data_dir).await?;
    let store = Arc::new(FileBaselineStore::new(&config.data_dir, &config.user_id));
    let api = Arc::new(WebApiClient::new(client, config.api.clone()));
    let sink = Arc::new(CompositeSink::new().with(Arc::new(TracingSink)));

    let monitor = ProfileMonitor::new(PollSettings::from_config(&config), broker, api, store, sink);
    let mut session = monitor.load_session().await?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping after the current step");
                ctrl_c_cancel.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for interrupt"),
        }
    });

    monitor.run(&mut session, cancel).await;
    Ok(())
}
