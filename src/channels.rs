use crate::prelude::*;

/// Broadcast channels connecting the long-lived components.
#[derive(Debug, Clone)]
pub struct Channels {
    pub to_database: broadcast::Sender<crate::database::ChannelData>,
    pub shutdown: broadcast::Sender<()>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            to_database: Self::channel(),
            shutdown: broadcast::channel(1).0,
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
