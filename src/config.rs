use crate::options::Options;
use crate::prelude::*;
use crate::timepoint::TimePoint;
use serde::Deserialize;

pub const MAX_CHARGE_CURVE_POINTS: usize = 30;

/// One point of the battery SOC goal curve. If battery charge is below
/// `soft`, loads run off grid instead of battery; below `hard`, the battery
/// is charged from grid.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct CurvePoint {
    pub hour: i32,
    #[serde(default)]
    pub minute: i32,
    pub soft: f32,
    pub hard: f32,
}

impl CurvePoint {
    pub fn time(&self) -> TimePoint {
        TimePoint::new(self.hour, self.minute)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_devices")]
    devices: Vec<String>,

    #[serde(default)]
    controller: bool,

    #[serde(default)]
    auto_charge: bool,

    #[serde(default)]
    debug: bool,

    #[serde(default = "Config::default_inverter_sustained_w")]
    inverter_sustained_w: f32,

    #[serde(default = "Config::default_battery_wh")]
    battery_wh: f32,

    #[serde(default = "Config::default_sample_write_interval")]
    sample_write_interval: usize,

    #[serde(default = "Config::default_min_battery_soc")]
    min_battery_soc: f32,

    #[serde(default = "Config::default_max_battery_soc")]
    max_battery_soc: f32,

    #[serde(default)]
    database_url: Option<String>,

    #[serde(default)]
    usb_restart_script: Option<String>,

    #[serde(default = "Config::default_grid_voltage_threshold")]
    grid_voltage_threshold: f32,

    #[serde(default = "Config::default_gpio_chip")]
    gpio_chip: String,

    #[serde(default = "Config::default_gpio_pin_grid")]
    gpio_pin_grid: u32,

    #[serde(default = "Config::default_gpio_pin_inverter")]
    gpio_pin_inverter: u32,

    #[serde(default = "Config::default_switch_sleep_ms")]
    switch_sleep_ms: u64,

    #[serde(default = "Config::default_hours_between_equalize")]
    hours_between_equalize: i64,

    #[serde(default = "Config::default_http_port")]
    http_port: u16,

    #[serde(default = "Config::default_loglevel")]
    loglevel: String,

    /// Battery SOC goal curve. When absent, a two-point curve is derived
    /// from min/max battery SOC.
    #[serde(default)]
    charge_curve: Option<Vec<CurvePoint>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: Self::default_devices(),
            controller: false,
            auto_charge: false,
            debug: false,
            inverter_sustained_w: Self::default_inverter_sustained_w(),
            battery_wh: Self::default_battery_wh(),
            sample_write_interval: Self::default_sample_write_interval(),
            min_battery_soc: Self::default_min_battery_soc(),
            max_battery_soc: Self::default_max_battery_soc(),
            database_url: None,
            usb_restart_script: None,
            grid_voltage_threshold: Self::default_grid_voltage_threshold(),
            gpio_chip: Self::default_gpio_chip(),
            gpio_pin_grid: Self::default_gpio_pin_grid(),
            gpio_pin_inverter: Self::default_gpio_pin_inverter(),
            switch_sleep_ms: Self::default_switch_sleep_ms(),
            hours_between_equalize: Self::default_hours_between_equalize(),
            http_port: Self::default_http_port(),
            loglevel: Self::default_loglevel(),
            charge_curve: None,
        }
    }
}

impl Config {
    /// Build the configuration: YAML file if given, defaults otherwise,
    /// command-line flags override either.
    pub fn new(options: &Options) -> Result<Self> {
        let mut config = match &options.config_file {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| anyhow!("error reading config file {}: {}", path, e))?;
                serde_yaml::from_str(&content)
                    .map_err(|e| anyhow!("error parsing config file {}: {}", path, e))?
            }
            None => Self::default(),
        };

        if !options.devices.is_empty() {
            config.devices = options.devices.clone();
        }
        if options.controller {
            config.controller = true;
        }
        if options.auto_charge {
            config.auto_charge = true;
        }
        if options.debug {
            config.debug = true;
        }
        if let Some(v) = options.inverter_sustained_w {
            config.inverter_sustained_w = v;
        }
        if let Some(v) = options.battery_wh {
            config.battery_wh = v;
        }
        if let Some(v) = options.sample_write_interval {
            config.sample_write_interval = v;
        }
        if let Some(v) = options.min_battery_soc {
            config.min_battery_soc = v;
        }
        if let Some(v) = options.max_battery_soc {
            config.max_battery_soc = v;
        }
        if let Some(v) = &options.database_url {
            config.database_url = Some(v.clone());
        }
        if let Some(v) = &options.usb_restart_script {
            config.usb_restart_script = Some(v.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Startup validation. An invalid charge curve or device list is the one
    /// thing we refuse to run with.
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            bail!("at least one inverter device must be configured");
        }
        let curve = self.charge_curve();
        if curve.len() < 2 {
            bail!("too few charge curve points ({} < 2)", curve.len());
        }
        if curve.len() > MAX_CHARGE_CURVE_POINTS {
            bail!(
                "too many charge curve points ({} > {})",
                curve.len(),
                MAX_CHARGE_CURVE_POINTS
            );
        }
        for (i, p) in curve.iter().enumerate() {
            if i != 0 && p.time() <= curve[i - 1].time() {
                bail!("charge curve points must be in increasing time order");
            }
            // The controller assumes that hitting the hard limit implies
            // having hit the soft limit.
            if p.soft < p.hard {
                bail!("charge curve soft limit must be >= hard limit");
            }
        }
        Ok(())
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    pub fn controller(&self) -> bool {
        self.controller
    }

    pub fn auto_charge(&self) -> bool {
        self.auto_charge
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn inverter_sustained_w(&self) -> f32 {
        self.inverter_sustained_w
    }

    pub fn battery_wh(&self) -> f32 {
        self.battery_wh
    }

    pub fn sample_write_interval(&self) -> usize {
        self.sample_write_interval
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    pub fn usb_restart_script(&self) -> Option<&str> {
        self.usb_restart_script.as_deref()
    }

    pub fn grid_voltage_threshold(&self) -> f32 {
        self.grid_voltage_threshold
    }

    pub fn gpio_chip(&self) -> &str {
        &self.gpio_chip
    }

    pub fn gpio_pin_grid(&self) -> u32 {
        self.gpio_pin_grid
    }

    pub fn gpio_pin_inverter(&self) -> u32 {
        self.gpio_pin_inverter
    }

    pub fn switch_sleep_ms(&self) -> u64 {
        self.switch_sleep_ms
    }

    pub fn hours_between_equalize(&self) -> i64 {
        self.hours_between_equalize
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn loglevel(&self) -> String {
        self.loglevel.clone()
    }

    /// The effective charge curve. The default two-point curve keeps the
    /// late-afternoon goal at max SOC; keeping that at 90 or less matters,
    /// because the +10 charging bias must not leave the goal permanently
    /// above what a full battery reports (see the controller's goal
    /// handling).
    pub fn charge_curve(&self) -> Vec<CurvePoint> {
        match &self.charge_curve {
            Some(curve) => curve.clone(),
            None => vec![
                CurvePoint {
                    hour: 8,
                    minute: 0,
                    soft: self.min_battery_soc + 10.0,
                    hard: self.min_battery_soc,
                },
                CurvePoint {
                    hour: 16,
                    minute: 30,
                    soft: self.max_battery_soc,
                    hard: self.max_battery_soc,
                },
            ],
        }
    }

    pub fn charge_curve_soft(&self) -> Vec<(TimePoint, f32)> {
        self.charge_curve()
            .iter()
            .map(|p| (p.time(), p.soft))
            .collect()
    }

    pub fn charge_curve_hard(&self) -> Vec<(TimePoint, f32)> {
        self.charge_curve()
            .iter()
            .map(|p| (p.time(), p.hard))
            .collect()
    }

    fn default_devices() -> Vec<String> {
        vec!["/dev/hidraw0".to_string()]
    }

    fn default_inverter_sustained_w() -> f32 {
        2500.0
    }

    fn default_battery_wh() -> f32 {
        4800.0
    }

    fn default_sample_write_interval() -> usize {
        20
    }

    fn default_min_battery_soc() -> f32 {
        35.0
    }

    fn default_max_battery_soc() -> f32 {
        90.0
    }

    fn default_grid_voltage_threshold() -> f32 {
        200.0
    }

    fn default_gpio_chip() -> String {
        "/dev/gpiochip0".to_string()
    }

    fn default_gpio_pin_grid() -> u32 {
        17
    }

    fn default_gpio_pin_inverter() -> u32 {
        18
    }

    fn default_switch_sleep_ms() -> u64 {
        // 50Hz is a 20ms cycle. Hager ESC225 contactors have a 25ms closing
        // delay and a 15ms opening delay, so a short dwell is enough.
        10
    }

    fn default_hours_between_equalize() -> i64 {
        // Less than 24, otherwise the equalization moment drifts forward
        // each day when equalizing from the grid.
        22
    }

    fn default_http_port() -> u16 {
        8080
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        let curve = config.charge_curve();
        assert_eq!(curve.len(), 2);
        assert_eq!(curve[0].soft, 45.0);
        assert_eq!(curve[0].hard, 35.0);
        assert_eq!(curve[1].soft, 90.0);
    }

    #[test]
    fn rejects_decreasing_curve() {
        let mut config = Config::default();
        config.charge_curve = Some(vec![
            CurvePoint { hour: 16, minute: 0, soft: 90.0, hard: 90.0 },
            CurvePoint { hour: 8, minute: 0, soft: 45.0, hard: 35.0 },
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_soft_below_hard() {
        let mut config = Config::default();
        config.charge_curve = Some(vec![
            CurvePoint { hour: 8, minute: 0, soft: 30.0, hard: 35.0 },
            CurvePoint { hour: 16, minute: 0, soft: 90.0, hard: 90.0 },
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_single_point_curve() {
        let mut config = Config::default();
        config.charge_curve = Some(vec![CurvePoint {
            hour: 8,
            minute: 0,
            soft: 45.0,
            hard: 35.0,
        }]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_yaml() {
        let yaml = r#"
devices: ["/dev/ttyUSB0", "/dev/hidraw1"]
controller: true
auto_charge: true
inverter_sustained_w: 5600
battery_wh: 9600
charge_curve:
  - { hour: 7, soft: 50, hard: 40 }
  - { hour: 17, minute: 30, soft: 90, hard: 85 }
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.devices().len(), 2);
        assert!(config.controller());
        assert_eq!(config.inverter_sustained_w(), 5600.0);
        assert_eq!(config.charge_curve()[1].minute, 30);
        // untouched fields keep their defaults
        assert_eq!(config.http_port(), 8080);
    }
}
