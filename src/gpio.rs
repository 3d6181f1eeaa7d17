//! The two heavy-load contactor pins.
//!
//! There is no way to read back the state of the output lines at startup, so
//! we create them driven low. That is the conservative thing to do anyway;
//! the server is intended to come on and stay on for months.

use crate::prelude::*;
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

pub struct Contactors {
    grid: Option<LineHandle>,
    inverter: Option<LineHandle>,
}

impl Contactors {
    /// Request both output lines, driven low.
    pub fn new(config: &Config) -> Result<Self> {
        let mut chip = Chip::new(config.gpio_chip())
            .map_err(|e| anyhow!("failed to open {}: {}", config.gpio_chip(), e))?;
        let grid = chip
            .get_line(config.gpio_pin_grid())?
            .request(LineRequestFlags::OUTPUT, 0, "heavy-grid")?;
        let inverter = chip
            .get_line(config.gpio_pin_inverter())?
            .request(LineRequestFlags::OUTPUT, 0, "heavy-inverter")?;
        Ok(Self {
            grid: Some(grid),
            inverter: Some(inverter),
        })
    }

    /// A contactor set whose operations do nothing. Used in debug mode and
    /// in tests.
    pub fn disabled() -> Self {
        Self {
            grid: None,
            inverter: None,
        }
    }

    pub fn grid_high(&self) -> Result<()> {
        Self::set(&self.grid, 1)
    }

    pub fn grid_low(&self) -> Result<()> {
        Self::set(&self.grid, 0)
    }

    pub fn inverter_high(&self) -> Result<()> {
        Self::set(&self.inverter, 1)
    }

    pub fn inverter_low(&self) -> Result<()> {
        Self::set(&self.inverter, 0)
    }

    fn set(line: &Option<LineHandle>, value: u8) -> Result<()> {
        if let Some(handle) = line {
            handle.set_value(value)?;
        }
        Ok(())
    }
}
