//! # Ready Check Demo
//!
//! Drives a live quiz ready screen against a real backend:
//!
//! 1. Read the API and push channel endpoints from the environment
//! 2. Start a controller for the given session
//! 3. Flag the local user ready and print every view change
//! 4. Stop on navigation, leave on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! LIVE_QUIZ_API_URL=https://quiz.example.com/api \
//! LIVE_QUIZ_WS_URL=wss://quiz.example.com/ws \
//! LIVE_QUIZ_TOKEN=... \
//! cargo run --example ready_check -- <session-id> <user-id>
//! ```

use std::sync::Arc;

use live_quiz_sync::api::HttpSessionApi;
use live_quiz_sync::transports::WebSocketConnector;
use live_quiz_sync::{EndpointConfig, ReadySessionController, SessionEvent, SyncConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=live_quiz_sync=debug` for the synchronizer's decisions.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let mut args = std::env::args().skip(1);
    let session_id: i64 = args.next().ok_or("usage: ready_check <session-id> <user-id>")?.parse()?;
    let user_id: i64 = args.next().ok_or("usage: ready_check <session-id> <user-id>")?.parse()?;

    let endpoints = EndpointConfig::from_env()?;
    tracing::info!(api = %endpoints.api_url, ws = %endpoints.ws_url, "endpoints loaded");

    let connector = Arc::new(WebSocketConnector::from_config(&endpoints));
    let api = Arc::new(HttpSessionApi::new(&endpoints)?);
    let config = SyncConfig::new().with_self_user_id(user_id);

    // ── Start ───────────────────────────────────────────────────────
    let (mut controller, mut events) =
        ReadySessionController::start(session_id, connector, api, config)?;
    controller.request_ready()?;

    let mut view_rx = controller.subscribe();
    let mut leaving = false;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };
                match event {
                    SessionEvent::NavigateToMatch => {
                        tracing::info!("Match starting");
                        break;
                    }
                    SessionEvent::NavigateToDisconnected => {
                        tracing::warn!("Opponent disconnected; session cancelled");
                        break;
                    }
                    SessionEvent::Left | SessionEvent::AttemptCancelled => {
                        tracing::info!("Left the session");
                        break;
                    }
                    SessionEvent::CommandFailed { command, message } => {
                        tracing::error!("{command} failed: {message}");
                        if leaving {
                            break;
                        }
                    }
                }
            }

            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                let ready = view.participants.iter().filter(|p| p.is_ready).count();
                tracing::info!(
                    connection = ?view.connection,
                    status = ?view.status,
                    all_ready = view.all_ready,
                    "{ready}/{} participant(s) ready",
                    view.participants.len()
                );
            }

            _ = tokio::signal::ctrl_c(), if !leaving => {
                tracing::info!("Ctrl+C received, leaving session…");
                leaving = true;
                controller.request_leave()?;
            }
        }
    }

    controller.stop().await;
    tracing::info!("Done");
    Ok(())
}
