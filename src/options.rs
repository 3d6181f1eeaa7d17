use clap::Parser;

/// Axpert Bridge - supervisory controller for Axpert/Voltronic hybrid inverters
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Optional YAML config file; command-line flags override its values
    #[clap(short = 'c', long = "config")]
    pub config_file: Option<String>,

    /// Run the contactor/charge controller loop (not just monitoring)
    #[clap(long = "controller")]
    pub controller: bool,

    /// Enable automatic output-source and charger-priority switching
    #[clap(long = "auto-charge")]
    pub auto_charge: bool,

    /// Suppress side effects (GPIO writes, inverter state changes)
    #[clap(long = "debug")]
    pub debug: bool,

    /// Inverter device path(s), comma separated, tried round-robin
    #[clap(long = "device", value_delimiter = ',')]
    pub devices: Vec<String>,

    /// Sustained output capability of the inverter, watts
    #[clap(long = "inverter-watts")]
    pub inverter_sustained_w: Option<f32>,

    /// Battery bank capacity, watt-hours
    #[clap(long = "battery-wh")]
    pub battery_wh: Option<f32>,

    /// Commit telemetry to the database once every N samples
    #[clap(long = "sample-write-interval")]
    pub sample_write_interval: Option<usize>,

    /// Morning minimum battery SOC percentage
    #[clap(long = "min-battery-soc")]
    pub min_battery_soc: Option<f32>,

    /// Late-afternoon maximum battery SOC percentage
    #[clap(long = "max-battery-soc")]
    pub max_battery_soc: Option<f32>,

    /// Database URL (sqlite:... for a local file, postgres://... for a server)
    #[clap(long = "database")]
    pub database_url: Option<String>,

    /// Shell command to re-enumerate the USB bus when the device disappears
    #[clap(long = "usb-restart-script")]
    pub usb_restart_script: Option<String>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
