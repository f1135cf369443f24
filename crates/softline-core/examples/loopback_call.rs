//! Loopback Call Example
//!
//! Drives one outbound or inbound call against the in-process loopback engine and
//! prints every softphone event. The loopback session plays the remote party.
//!
//! ```text
//! cargo run -p softline-core --example loopback_call -- --destination 3009 --digits 12#
//! cargo run -p softline-core --example loopback_call -- --inbound
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use softline_core::loopback::{LoopbackCapture, LoopbackEngine};
use softline_core::prelude::*;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "loopback_call")]
#[command(about = "Place or receive one call on the loopback engine")]
struct Args {
    /// Local extension
    #[arg(short, long, default_value = "3005")]
    username: String,

    /// SIP domain(s), comma-separated
    #[arg(long, default_value = "pbx.example.com")]
    domains: String,

    /// Extension to call
    #[arg(short, long, default_value = "3009")]
    destination: String,

    /// Simulate an incoming call instead of placing one
    #[arg(short, long)]
    inbound: bool,

    /// Digits to send once connected
    #[arg(long, default_value = "")]
    digits: String,

    /// Seconds to stay connected
    #[arg(long, default_value = "1")]
    hold: u64,

    /// Tracing filter
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).context("invalid log level")?)
        .init();

    let identity = EndpointIdentity::new(&args.username, "wss://pbx.example.com:7443/ws")
        .with_display_name("Loopback Demo")
        .with_domain_list(&args.domains)
        .with_ice_server(IceServer::stun("stun:stun.l.google.com:19302"));
    let config = SoftphoneConfig::new(identity).with_reset_delay_ms(250);

    let engine = LoopbackEngine::new();
    let capture = Arc::new(LoopbackCapture::new());
    let phone = Softphone::spawn(config, &engine, capture, CuePlayers::headless()).await?;
    let endpoint = engine.endpoint().context("loopback endpoint missing")?;

    let mut events = phone.event_stream();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => info!(?event, "Softphone event"),
                Err(e) => warn!("event stream lagged: {e}"),
            }
        }
    });

    phone.connect().await?;

    let session = if args.inbound {
        let remote = format!("sip:{}@pbx.example.com", args.destination);
        let session = endpoint.deliver_invite(&remote, Some("Loopback Peer"));
        wait_for(&phone, SessionState::Establishing).await?;
        phone.answer().await?;
        session
    } else {
        phone.place_call(args.destination.as_str()).await?;
        let session = endpoint.last_session().context("no outbound session")?;
        session.establish();
        session
    };
    wait_for(&phone, SessionState::Established).await?;
    info!(direction = ?phone.session_direction(), "Connected");

    phone.stop_remote_media(SinkKind::RemoteVideo).await?;
    phone.start_remote_media(SinkKind::RemoteVideo).await?;
    phone.start_local_video().await?;
    phone.set_outbound_video_enabled(true).await?;
    for digit in args.digits.chars() {
        let disposition = phone.send_digit(digit).await?;
        info!(%digit, ?disposition, "Digit sent");
    }

    tokio::time::sleep(Duration::from_secs(args.hold)).await;
    phone.hang_up().await?;
    wait_for(&phone, SessionState::Idle).await?;

    if let Some(transport) = session.loopback_transport() {
        info!(digits = ?transport.sent_digits(), "Remote party received");
    }
    phone.shutdown().await?;
    Ok(())
}

async fn wait_for(phone: &Softphone, state: SessionState) -> Result<()> {
    let mut states = phone.watch_session_state();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|current| *current == state))
        .await
        .with_context(|| format!("timed out waiting for {state}"))?
        .context("softphone stopped")?;
    Ok(())
}
