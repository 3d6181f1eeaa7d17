pub use std::str::FromStr;
pub use std::sync::Arc;

pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::config::Config;
pub use crate::{axpert, config, controller, database, gpio, heavyload, monitor};
