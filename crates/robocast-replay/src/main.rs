//! Headless shell: replays a recorded channel session through the
//! compositor and prints every layout it produces.

mod script;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use robocast_core::events::SessionEvent;
use robocast_core::{
    ControlPad, HttpTokenService, LoggingRenderer, LoopbackChannel, OAuthClient, Room,
    SessionController, SessionEventListener, SettingsStore,
};

use crate::script::{Script, Step};

#[derive(Parser, Debug)]
#[command(name = "robocast-replay")]
#[command(version, about = "Replay a recorded channel session through the PiP compositor")]
struct CliArgs {
    /// JSON script of channel events and user actions
    script: PathBuf,

    /// Room to join (overrides the script and saved settings)
    #[arg(short, long)]
    room: Option<String>,

    /// Settings directory (defaults to the platform data dir)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Time given to the session to settle after each step
    #[arg(long, default_value_t = 25)]
    settle_ms: u64,

    /// Google authorization code to exchange before joining
    #[arg(long, value_name = "CODE")]
    oauth_code: Option<String>,

    /// Redirect URI the authorization code was issued for
    #[arg(long, default_value = "http://localhost:5173/auth/callback")]
    redirect_uri: String,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("robocast_core=debug,robocast_replay=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Prints each new layout as one JSON line on stdout.
struct LayoutPrinter;

impl SessionEventListener for LayoutPrinter {
    fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::LayoutChanged(layout) => match serde_json::to_string(&layout) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::warn!("failed to encode layout: {e}"),
            },
            SessionEvent::HostChanged(host) => tracing::info!(?host, "host changed"),
            SessionEvent::CredentialUnavailable(reason) => {
                tracing::warn!("joining without credential: {reason}")
            }
            other => tracing::debug!(?other, "session event"),
        }
    }
}

/// Exchange an authorization code and remember the user's name.
/// Failures leave the session anonymous.
async fn sign_in(store: &SettingsStore, code: &str, redirect_uri: &str) {
    let client = OAuthClient::new(&store.get().oauth_exchange_url);
    match client.exchange(code, redirect_uri).await {
        Ok(session) => {
            tracing::info!(email = ?session.user.email, "signed in");
            store.set_display_name(session.display_name());
        }
        Err(e) => tracing::warn!("sign-in failed, continuing as guest: {e}"),
    }
}

fn data_dir(args: &CliArgs) -> PathBuf {
    args.data_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .map(|dir| dir.join("robocast"))
            .unwrap_or_else(|| PathBuf::from(".robocast"))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging();

    let script = Script::load(&args.script).await?;
    let store = SettingsStore::new(data_dir(&args));
    if let Some(code) = &args.oauth_code {
        sign_in(&store, code, &args.redirect_uri).await;
    }
    let settings = store.get();

    let room_id = args
        .room
        .clone()
        .or_else(|| script.room.clone())
        .or_else(|| settings.last_room.clone())
        .unwrap_or_else(|| "room-a".to_string());
    let room = Room::from_id(&room_id)?;
    store.set_last_room(Some(room.id.clone()));

    let config = settings.session_config();
    let tokens = HttpTokenService::new(&settings.token_server_url, config.token_timeout)?;
    let channel = Arc::new(LoopbackChannel::new());
    let session = SessionController::new(
        channel.clone(),
        Arc::new(tokens),
        Arc::new(LoggingRenderer),
        config,
    );
    session.add_listener(Arc::new(LayoutPrinter));

    let name = settings.display_name.as_deref().unwrap_or("guest");
    tracing::info!(room = %room.title, uid = %session.local_id(), name, "joining");
    session
        .connect(room.channel_name(), room.token_role())
        .await
        .context("failed to join room")?;

    let mut pad = ControlPad::new(&room);
    let settle = Duration::from_millis(args.settle_ms);

    for step in &script.steps {
        match step {
            Step::Event { event } => {
                if !channel.inject(event.clone()) {
                    tracing::warn!("channel closed, stopping replay");
                    break;
                }
            }
            Step::Swap => {
                if !session.swap_primary().await {
                    tracing::warn!("swap ignored, no running session");
                }
            }
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
            Step::Command { .. } => {
                let Some(command) = step.command()? else {
                    continue;
                };
                match pad.send(command) {
                    Ok(id) => pad.acknowledge(&id, "replay")?,
                    Err(e) => tracing::warn!(%command, "command rejected: {e}"),
                }
            }
        }
        tokio::time::sleep(settle).await;
    }

    let snapshot = session.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    session.teardown().await;

    for entry in pad.log().entries() {
        tracing::info!(status = ?entry.status, source = ?entry.source, "{}", entry.text);
    }
    Ok(())
}
