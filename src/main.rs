//! Softphone demo runner
//!
//! Registers an identity against the voice backend using the in-process
//! loopback device, optionally places a call that the simulated remote side
//! answers, then hangs up and shuts down.
//!
//! Usage: `softphone [identity] [destination]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use voip_softphone::device::LoopbackFactory;
use voip_softphone::{CallStatus, ClientConfig, SessionEvent, Softphone};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("voip_softphone=info".parse()?))
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ClientConfig::from_env();
    config.validate().map_err(|e| anyhow!("invalid configuration: {}", e))?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let identity = args
        .first()
        .cloned()
        .or_else(|| config.identity.clone())
        .context("no identity given (pass one as the first argument or set VOICE_IDENTITY)")?;
    let destination = args.get(1).cloned();

    tracing::info!("Using voice backend at {}", config.api_url);

    let devices = Arc::new(LoopbackFactory::new());
    let phone = Softphone::from_config(config, devices.clone())?;

    let mut events = phone.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::StatusChanged(status) => tracing::info!("[{}]", status.display_name()),
                SessionEvent::IncomingCall { from } => tracing::info!("Incoming call from {}", from),
                SessionEvent::InviteReceived(invite) => {
                    tracing::info!("{} invited you to join a call", invite.from)
                }
                SessionEvent::Error(message) => tracing::warn!("{}", message),
            }
        }
    });

    phone.initialize(&identity).await?;

    if let Some(destination) = destination {
        phone.make_call(&destination).await?;

        let call_id = phone.active_call_id().await.context("call was not created")?;
        if let Some(device) = devices.last_device() {
            device.remote_ringing(&call_id);
            tokio::time::sleep(Duration::from_millis(500)).await;
            device.remote_answer(&call_id);
        }

        let mut status = phone.watch_status();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| matches!(s, CallStatus::Open | CallStatus::Conference)),
        )
        .await
        .context("call did not connect")??;

        tokio::time::sleep(Duration::from_secs(2)).await;
        if let Some(duration) = phone.call_duration().await {
            tracing::info!("Hanging up after {:?}", duration);
        }
        phone.end_call().await?;
    }

    phone.destroy().await;
    Ok(())
}
