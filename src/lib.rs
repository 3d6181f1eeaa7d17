pub mod axpert;
pub mod channels;
pub mod config;
pub mod controller;
pub mod cooloff;
pub mod database;
pub mod gpio;
pub mod heavyload;
pub mod history;
pub mod http;
pub mod monitor;
pub mod options;
pub mod prelude;
pub mod ringbuffer;
pub mod timepoint;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::controller::Controller;
use crate::database::Database;
use crate::monitor::Monitor;
use crate::prelude::*;

pub async fn app(config: Config) -> Result<()> {
    info!("axpert-bridge {} starting", CARGO_PKG_VERSION);

    info!("Initializing channels...");
    let channels = Channels::new();

    info!("  Creating Monitor...");
    let monitor = Monitor::new(config.clone(), channels.clone());

    let controller = if config.controller() {
        info!("  Creating Controller...");
        Some(Controller::new(
            config.clone(),
            channels.clone(),
            monitor.clone(),
        )?)
    } else {
        None
    };

    let database = if config.database_url().is_some() {
        info!("  Creating Database...");
        Some(Database::new(config.clone(), channels.clone()))
    } else {
        None
    };

    // Ctrl+C fans out through the shutdown channel; every loop finishes its
    // current iteration and returns.
    {
        let channels = channels.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, initiating graceful shutdown");
                let _ = channels.shutdown.send(());
                let _ = channels.to_database.send(database::ChannelData::Shutdown);
            }
        });
    }

    let mut handles = Vec::new();

    if let Some(database) = database {
        info!("Starting database...");
        handles.push(tokio::spawn(async move {
            if let Err(e) = database.start().await {
                error!("database error: {}", e);
            }
        }));
    }

    info!("Starting monitor...");
    {
        let monitor = monitor.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = monitor.start().await {
                error!("monitor error: {}", e);
            }
        }));
    }

    if let Some(controller) = controller {
        info!("Starting controller...");
        {
            let controller = controller.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = controller.start().await {
                    error!("controller error: {}", e);
                }
            }));
        }

        info!("Starting HTTP listener...");
        let http_channels = channels.clone();
        let http_port = config.http_port();
        handles.push(tokio::spawn(async move {
            if let Err(e) = http::serve(controller, http_channels, http_port).await {
                error!("http error: {}", e);
            }
        }));
    }

    futures::future::join_all(handles).await;
    info!("Shutdown complete");

    Ok(())
}
