//! CLI for roomlink
//!
//! Subcommands:
//! - `server`: run the token endpoint
//! - `demo`: two users chat in one room over the in-process backbone. With
//!   `--remote` the credentials come from the token endpoint at
//!   `auth.backend_url` (e.g. a `roomlink server` sharing this config)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use roomlink::auth::{CredentialProvider, HttpTokenClient, LocalIssuer, TokenIssuer, server};
use roomlink::config::{Settings, load_config};
use roomlink::connection::{ConnectionManager, ConnectionOptions};
use roomlink::messages::LatencyAnnotation;
use roomlink::session::ActiveRoom;
use roomlink::transport::local::LocalBackbone;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "roomlink")]
enum Command {
    /// Serve the token endpoint
    Server,
    /// Run a two-user chat in one room and print what each side saw
    Demo {
        /// Room both users join
        #[arg(long, default_value = "lobby")]
        room: String,
        /// Message the first user sends
        #[arg(long, default_value = "hi")]
        text: String,
        /// Request credentials from the token endpoint at `auth.backend_url`
        #[arg(long)]
        remote: bool,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            roomlink::utils::logging::init("info");
            error!("Failed to load configuration: {e}");
            return;
        }
    };
    roomlink::utils::logging::init(&settings.log.level);

    match cmd {
        Command::Server => {
            if let Err(e) = run_server(&settings).await {
                error!("Server failed: {e}");
            }
        }
        Command::Demo { room, text, remote } => {
            if let Err(e) = run_demo(&settings, &room, &text, remote).await {
                error!("Demo failed: {e}");
            }
        }
    }
}

async fn run_server(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    tokio::select! {
        res = server::serve(settings) => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
    Ok(())
}

async fn run_demo(
    settings: &Settings,
    room: &str,
    text: &str,
    remote: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let issuer = TokenIssuer::from_settings(&settings.auth);
    let backbone = LocalBackbone::new(issuer.clone());
    let provider: Arc<dyn CredentialProvider> = if remote {
        let client = HttpTokenClient::from_settings(&settings.auth);
        info!("requesting credentials from {}", client.endpoint());
        Arc::new(client)
    } else {
        Arc::new(LocalIssuer::new(issuer))
    };
    let manager = ConnectionManager::new(
        provider,
        Arc::new(backbone),
        ConnectionOptions::from(&settings.session),
    );

    let alice = manager.authenticate("alice").await?;
    let bob = manager.authenticate("bob").await?;

    let mut alice_room = ActiveRoom::new();
    let mut bob_room = ActiveRoom::new();
    let alice_session = alice_room.switch(&alice, room).await?;
    let bob_session = bob_room.switch(&bob, room).await?;

    let mut bob_view = bob_session.subscribe();
    tokio::time::timeout(
        Duration::from_secs(2),
        bob_view.wait_for(|s| s.members.len() == 2),
    )
    .await??;

    alice_session.send(text).await?;
    tokio::time::timeout(
        Duration::from_secs(2),
        bob_view.wait_for(|s| !s.messages.is_empty()),
    )
    .await??;

    for (name, session) in [("alice", alice_session), ("bob", bob_session)] {
        let snapshot = session.snapshot();
        let members: Vec<_> = snapshot.members.iter().map(|m| m.username.as_str()).collect();
        println!(
            "[{name}] {} members={members:?} latency={}",
            snapshot.channel,
            session.latency_tier().label()
        );
        for msg in snapshot.messages.iter() {
            match msg.latency.map(LatencyAnnotation::millis) {
                Some(ms) => println!("[{name}]   {}: {} ({ms} ms)", msg.username, msg.text),
                None => println!("[{name}]   {}: {}", msg.username, msg.text),
            }
        }
    }

    bob_room.leave().await;
    alice_room.leave().await;
    alice.close();
    bob.close();
    Ok(())
}
