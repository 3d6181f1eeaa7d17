//! Polls the inverter, maintains bounded metric histories, and publishes
//! filtered readings as lock-free atomics for the controller and the HTTP
//! handlers.

use crate::axpert::link::Link;
use crate::axpert::parser::{self, InverterModel, QpigsRecord};
use crate::heavyload::{self, LoadSample};
use crate::history::{self, History, HistoryPoint};
use crate::prelude::*;
use crate::ringbuffer::RingBuffer;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
const READ_BURST_ATTEMPTS: u32 = 3;
const HISTORY_CAPACITY: usize = 512;

/// An f32 published with store/load only. Readers tolerate cross-field skew,
/// so relaxed ordering is enough.
#[derive(Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// One telemetry sample, as persisted and as fed to the histories.
#[derive(Clone, Debug, Serialize)]
pub struct Sample {
    pub time: i64,
    /// True if the heavy-loads contactor was on the inverter side when this
    /// sample was taken. Set by the controller.
    pub heavy: bool,
    #[serde(flatten)]
    pub qpigs: QpigsRecord,
}

/// Filtered metrics, written by the sampler and read lock-free everywhere
/// else. No cross-metric snapshot consistency is promised.
pub struct Snapshot {
    pub is_initialized: AtomicBool,
    pub is_output_overloaded: AtomicBool,
    pub is_battery_overloaded: AtomicBool,
    pub has_grid_power: AtomicBool,
    pub solar_v: AtomicF32,
    pub avg_solar_v: AtomicF32,
    pub avg_solar_w: AtomicF32,
    pub avg_load_w: AtomicF32,
    pub battery_v: AtomicF32,
    pub battery_p: AtomicF32,
    pub avg_battery_p: AtomicF32,
    pub min_battery_p: AtomicF32,
    pub heavy_load_watts: AtomicF32,
    pub is_heavy_on_inverter: AtomicBool,
    model: AtomicU8,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            is_initialized: AtomicBool::new(false),
            is_output_overloaded: AtomicBool::new(false),
            is_battery_overloaded: AtomicBool::new(false),
            // Assume the grid is up until the first sample says otherwise,
            // so a booting controller doesn't jump to the blackout posture.
            has_grid_power: AtomicBool::new(true),
            solar_v: AtomicF32::default(),
            avg_solar_v: AtomicF32::default(),
            avg_solar_w: AtomicF32::default(),
            avg_load_w: AtomicF32::default(),
            battery_v: AtomicF32::default(),
            battery_p: AtomicF32::default(),
            avg_battery_p: AtomicF32::default(),
            min_battery_p: AtomicF32::default(),
            heavy_load_watts: AtomicF32::default(),
            is_heavy_on_inverter: AtomicBool::new(false),
            model: AtomicU8::new(0),
        }
    }
}

impl Snapshot {
    pub fn model(&self) -> InverterModel {
        match self.model.load(Ordering::Relaxed) {
            1 => InverterModel::King6200,
            2 => InverterModel::Mks2_5600,
            _ => InverterModel::Unknown,
        }
    }

    fn set_model(&self, model: InverterModel) {
        let v = match model {
            InverterModel::Unknown => 0,
            InverterModel::King6200 => 1,
            InverterModel::Mks2_5600 => 2,
        };
        self.model.store(v, Ordering::Relaxed);
    }
}

struct Histories {
    solar_v: History,
    load_w: History,
    /// max(0, loadW - pvW): how much of the load the panels are not covering.
    deficit_w: History,
    solar_w: History,
    grid_v: History,
    battery_p: History,
    battery_v: History,
    recent: RingBuffer<LoadSample>,
    heavy_deltas: History,
}

impl Histories {
    fn new() -> Self {
        Self {
            solar_v: History::new(HISTORY_CAPACITY),
            load_w: History::new(HISTORY_CAPACITY),
            deficit_w: History::new(HISTORY_CAPACITY),
            solar_w: History::new(HISTORY_CAPACITY),
            grid_v: History::new(HISTORY_CAPACITY),
            battery_p: History::new(HISTORY_CAPACITY),
            battery_v: History::new(HISTORY_CAPACITY),
            recent: RingBuffer::new(8),
            heavy_deltas: History::new(32),
        }
    }
}

#[derive(Clone)]
pub struct Monitor {
    config: Config,
    channels: Channels,
    link: Arc<tokio::sync::Mutex<Link>>,
    snapshot: Arc<Snapshot>,
    histories: Arc<Mutex<Histories>>,
}

impl Monitor {
    pub fn new(config: Config, channels: Channels) -> Self {
        let link = Link::new(
            config.devices().to_vec(),
            config.usb_restart_script().map(|s| s.to_string()),
        );
        Self {
            config,
            channels,
            link: Arc::new(tokio::sync::Mutex::new(link)),
            snapshot: Arc::new(Snapshot::default()),
            histories: Arc::new(Mutex::new(Histories::new())),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub async fn start(&self) -> Result<()> {
        info!("Monitor starting, device {}", self.link.lock().await.device());

        self.detect_model().await;

        let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
        let mut shutdown_rx = self.channels.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sample_once().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Monitor received shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    /// The charger-priority command encoding depends on the model family,
    /// so ask the inverter who it is before the first actuation.
    async fn detect_model(&self) {
        for _ in 0..5 {
            let result = {
                let mut link = self.link.lock().await;
                link.execute_typed("QMN", parser::parse_qmn, 1).await
            };
            match result {
                Ok(model) => {
                    info!("Inverter model: {}", model.describe());
                    self.snapshot.set_model(model);
                    return;
                }
                Err(kind) => {
                    warn!("QMN failed: {}", kind);
                }
            }
        }
        warn!("Could not detect inverter model, using default command encoding");
    }

    /// One poll: a tight burst of up to three attempts, stopping at the
    /// first success. A fully failed poll is a missed sample; the histories
    /// are left untouched and the loop keeps going.
    async fn sample_once(&self) {
        for attempt in 0..READ_BURST_ATTEMPTS {
            let result = {
                let mut link = self.link.lock().await;
                link.execute_typed("QPIGS", parser::parse_qpigs, 0).await
            };
            match result {
                Ok(qpigs) => {
                    let sample = Sample {
                        time: chrono::Utc::now().timestamp(),
                        heavy: self.snapshot.is_heavy_on_inverter.load(Ordering::Relaxed),
                        qpigs,
                    };
                    if log::log_enabled!(log::Level::Debug) {
                        if let Ok(json) = serde_json::to_string(&sample) {
                            debug!("sample: {}", json);
                        }
                    }
                    self.update_stats(&sample);
                    // Fire and forget; the sink side owns retries.
                    let _ = self
                        .channels
                        .to_database
                        .send(database::ChannelData::Sample(Box::new(sample)));
                    return;
                }
                Err(kind) => {
                    warn!("QPIGS attempt {} failed: {}", attempt + 1, kind);
                }
            }
        }
    }

    fn update_stats(&self, sample: &Sample) {
        let now = sample.time;
        let q = &sample.qpigs;
        let mut guard = self.histories.lock().unwrap();
        let h = &mut *guard;

        h.solar_v.push(HistoryPoint { time: now, value: q.pv_v });
        h.load_w.push(HistoryPoint { time: now, value: q.load_w });
        h.deficit_w.push(HistoryPoint {
            time: now,
            value: (q.load_w - q.pv_w).max(0.0),
        });
        h.solar_w.push(HistoryPoint { time: now, value: q.pv_w });
        h.grid_v.push(HistoryPoint { time: now, value: q.ac_in_v });
        h.battery_p.push(HistoryPoint { time: now, value: q.bat_p });
        h.battery_v.push(HistoryPoint { time: now, value: q.bat_v });

        let s = &self.snapshot;
        s.avg_solar_v.store(history::average_since(now - 60, &h.solar_v) as f32);
        s.avg_solar_w.store(history::average_since(now - 300, &h.solar_w) as f32);
        s.avg_load_w.store(history::average_since(now - 300, &h.load_w) as f32);
        s.avg_battery_p.store(history::average_since(now - 600, &h.battery_p) as f32);
        s.min_battery_p.store(history::minimum_since(now - 600, &h.battery_p));

        // The inverter sporadically reports a single zero sample for solar
        // and battery numbers; a short-window maximum masks those.
        s.solar_v.store(history::maximum_since(now - 15, &h.solar_v));
        s.battery_v.store(history::maximum_since(now - 30, &h.battery_v));
        s.battery_p.store(history::maximum_since(now - 30, &h.battery_p));

        let grid_v = history::maximum_since(now - 5, &h.grid_v);
        s.has_grid_power
            .store(grid_v > self.config.grid_voltage_threshold(), Ordering::Relaxed);

        s.is_output_overloaded
            .store(self.output_overloaded(now, h, q), Ordering::Relaxed);
        s.is_battery_overloaded
            .store(self.battery_overloaded(now, h), Ordering::Relaxed);

        h.recent.push(LoadSample {
            time: now,
            load_w: q.load_w,
            heavy: sample.heavy,
        });
        heavyload::analyze_recent(&h.recent, &mut h.heavy_deltas);
        s.heavy_load_watts
            .store(heavyload::estimate_heavy_load_watts(now, &h.heavy_deltas));

        s.is_initialized.store(true, Ordering::Relaxed);
    }

    /// Shorter windows tolerate larger transient excursions.
    fn output_overloaded(&self, now: i64, h: &Histories, q: &QpigsRecord) -> bool {
        let sustained = self.config.inverter_sustained_w();
        history::average_since(now - 6, &h.load_w) > 0.97 * sustained as f64
            || history::average_since(now - 3, &h.load_w) > 1.10 * sustained as f64
            || q.load_w > 1.50 * sustained
    }

    fn battery_overloaded(&self, now: i64, h: &Histories) -> bool {
        let wh = self.config.battery_wh() as f64;
        history::average_since(now - 120, &h.deficit_w) > 0.5 * wh
            || history::average_since(now - 60, &h.deficit_w) > 0.9 * wh
            || history::average_since(now - 15, &h.deficit_w) > 1.2 * wh
            || history::average_since(now - 5, &h.deficit_w) > 1.5 * wh
    }

    /// Run a state-change command against the inverter. All exchanges,
    /// queries and commands alike, serialize on the link lock.
    pub async fn run_inverter_command(&self, cmd: &str) -> Result<()> {
        let mut link = self.link.lock().await;
        match link.execute_raw(cmd, 2).await {
            Ok(_) => Ok(()),
            Err(kind) => bail!("inverter command '{}' failed: {}", cmd, kind),
        }
    }
}
