pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;
pub mod view;

use clap::Parser;
use config::{CallConfig, Cli};
use peer::{CallStatus, SyntheticMediaSource, WebrtcSessionFactory};
use session::{CallSession, Collaborators};
use signaling::ws::WsConnector;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use view::ConsoleView;

pub use error::{CallError, MediaSessionError, SignalingError};
pub use session::{CallHandle, EventSink};

/// Точка входа бинарника: звонок до Ctrl-C или до потери сигнального канала
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init();
    let config = CallConfig::from_cli(cli)?;
    info!(
        session = %config.session_id,
        relay = %config.relay,
        ice_servers = config.ice_servers.len(),
        video = config.video,
        "Starting peercall"
    );

    let (view, mut status) = ConsoleView::new();
    let call = CallSession::spawn(
        config.session_id.clone(),
        config.relay.clone(),
        Collaborators {
            source: Arc::new(SyntheticMediaSource::new(config.video)),
            factory: Arc::new(WebrtcSessionFactory::new(config.ice_servers.clone())),
            connector: Arc::new(WsConnector::new(config.ping_period)),
            view: Arc::new(view),
        },
    );

    call.start_call().await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, hanging up");
        }
        _ = signaling_lost(&mut status) => {
            warn!("Signaling relay gone, hanging up");
        }
    }

    call.hangup_call().await?;
    Ok(())
}

async fn signaling_lost(status: &mut watch::Receiver<Option<CallStatus>>) {
    while status.changed().await.is_ok() {
        if *status.borrow_and_update() == Some(CallStatus::SignalingLost) {
            return;
        }
    }
}
