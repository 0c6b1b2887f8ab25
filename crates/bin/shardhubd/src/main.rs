use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use shardhub_adapter_peer_tcp::{TcpConnector, TcpPeerListener};
use shardhubd::config::Config;
use shardhubd::daemon::Daemon;
use shardhubd::script::Script;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    let script = Script::parse(&config.script.steps)?;
    let connector = Arc::new(TcpConnector::new(config.transport.clone()));
    let daemon = Daemon::start(&config, connector).await?;

    let cancel = CancellationToken::new();
    let listener = match &config.listen.addr {
        Some(addr) => {
            let listener = TcpPeerListener::bind(addr, config.transport.clone()).await?;
            Some(tokio::spawn(
                listener.run(daemon.space().clone(), cancel.child_token()),
            ))
        }
        None => None,
    };

    if !script.steps().is_empty() {
        let hub = daemon.hub().clone();
        tokio::spawn(async move {
            if let Err(err) = script.run(&hub).await {
                tracing::error!(error = %err, "script aborted");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cancel.cancel();
    if let Some(listener) = listener {
        listener.await?;
    }
    daemon.shutdown().await;
    Ok(())
}
