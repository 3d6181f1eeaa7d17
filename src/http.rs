//! Manual override surface. Everything is a POST with an empty body; the
//! decision loop keeps running and may override a manual switch on a later
//! tick if policy says otherwise.

use crate::controller::{Controller, HeavyLoadMode, HeavyLoadState};
use crate::prelude::*;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;

pub fn router(controller: Controller) -> Router {
    Router::new()
        .route("/switch/inverter", post(switch_inverter))
        .route("/switch/grid", post(switch_grid))
        .route("/switch/off", post(switch_off))
        .route("/heavy/solar", post(heavy_solar))
        .route("/heavy/always", post(heavy_always))
        .route("/storm/activate", post(storm_activate))
        .route("/storm/cancel", post(storm_cancel))
        .with_state(controller)
}

pub async fn serve(controller: Controller, channels: Channels, port: u16) -> Result<()> {
    let app = router(controller);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("HTTP listening on port {}", port);
    let mut shutdown_rx = channels.shutdown.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("HTTP listener received shutdown signal");
        })
        .await?;
    Ok(())
}

async fn set_state(
    controller: &Controller,
    state: HeavyLoadState,
) -> Result<&'static str, StatusCode> {
    match controller.set_heavy_load_state(state).await {
        Ok(()) => Ok("OK"),
        Err(e) => {
            error!("Failed to switch heavy loads to {}: {}", state.describe(), e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn switch_inverter(State(c): State<Controller>) -> Result<&'static str, StatusCode> {
    set_state(&c, HeavyLoadState::Inverter).await
}

async fn switch_grid(State(c): State<Controller>) -> Result<&'static str, StatusCode> {
    set_state(&c, HeavyLoadState::Grid).await
}

async fn switch_off(State(c): State<Controller>) -> Result<&'static str, StatusCode> {
    set_state(&c, HeavyLoadState::Off).await
}

async fn heavy_solar(State(c): State<Controller>) -> &'static str {
    c.set_heavy_load_mode(HeavyLoadMode::OnWithSolar).await;
    "OK"
}

async fn heavy_always(State(c): State<Controller>) -> &'static str {
    c.set_heavy_load_mode(HeavyLoadMode::AlwaysOn).await;
    "OK"
}

async fn storm_activate(State(c): State<Controller>) -> &'static str {
    c.set_storm_mode(24);
    "OK"
}

async fn storm_cancel(State(c): State<Controller>) -> &'static str {
    c.set_storm_mode(0);
    "OK"
}
