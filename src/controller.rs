//! The decision loop: reads the monitor's snapshot, interpolates time-of-day
//! battery SOC goals, and drives the heavy-load contactors and the
//! inverter's output-source and charger priorities.

use crate::axpert::parser::{ChargerPriority, PowerSource};
use crate::cooloff::Cooloff;
use crate::gpio::Contactors;
use crate::monitor::Monitor;
use crate::prelude::*;
use crate::timepoint::TimePoint;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

const TICK: Duration = Duration::from_millis(100);

/// Don't switch the same inverter axis more than once every 5 minutes.
/// This is a safeguard against bugs that could flip state too frequently;
/// such a bug happened in practice, and the inverter kept restarting itself.
const MIN_SECONDS_BETWEEN_AXIS_SWITCHES: i64 = 5 * 60;

/// Throttle retries of a failing inverter command.
const MIN_SECONDS_BETWEEN_ATTEMPTS: i64 = 10;

/// How long the +10 goal bias lingers after a charging decision.
const GOAL_BIAS_SECONDS: i64 = 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeavyLoadMode {
    /// Always keep heavy loads powered, from grid if there is no solar.
    AlwaysOn,
    /// Power heavy loads from the inverter only when solar covers them.
    OnWithSolar,
    /// Always power heavy loads from the grid.
    Grid,
}

impl HeavyLoadMode {
    pub fn describe(&self) -> &'static str {
        match self {
            HeavyLoadMode::AlwaysOn => "AlwaysOn",
            HeavyLoadMode::OnWithSolar => "OnWithSolar",
            HeavyLoadMode::Grid => "Grid",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeavyLoadState {
    Off,
    Grid,
    Inverter,
}

impl HeavyLoadState {
    pub fn describe(&self) -> &'static str {
        match self {
            HeavyLoadState::Off => "Off",
            HeavyLoadState::Grid => "Grid",
            HeavyLoadState::Inverter => "Inverter",
        }
    }
}

/// Inputs to the battery SOC goal computation.
pub struct GoalInputs {
    pub now: i64,
    pub time_of_day: TimePoint,
    pub storm_mode_until: i64,
    pub last_soft_switch: i64,
    pub last_hard_switch: i64,
    pub last_equalize_at: i64,
    pub hours_between_equalize: i64,
    pub min_battery_p: f32,
}

pub struct Goals {
    pub soft: f32,
    pub hard: f32,
    pub raw_soft: f32,
    pub raw_hard: f32,
    /// Possibly refreshed; the caller carries it forward.
    pub last_equalize_at: i64,
}

/// Compute the soft and hard battery SOC goals for this tick.
///
/// The goals may exceed 100 on purpose. Clamping at 100 causes oscillation
/// near full charge: a 105 goal means we hang out at 100% for a while, and
/// by the time we switch back to battery the goal has headroom again.
pub fn compute_goals(
    soft_curve: &[(TimePoint, f32)],
    hard_curve: &[(TimePoint, f32)],
    inp: &GoalInputs,
) -> Goals {
    let raw_soft = TimePoint::interpolate(inp.time_of_day, soft_curve);
    let raw_hard = TimePoint::interpolate(inp.time_of_day, hard_curve);
    let mut soft = raw_soft.clamp(0.0, 100.0);
    let mut hard = raw_hard.clamp(0.0, 100.0);

    if inp.now < inp.storm_mode_until {
        soft = soft.max(90.0);
        hard = hard.max(80.0);
    }

    // If we hit either threshold within the last hour, raise the target so
    // that we overshoot it by some margin. Otherwise we ping-pong along the
    // bottom.
    if inp.now - inp.last_soft_switch < GOAL_BIAS_SECONDS {
        soft += 10.0;
    }
    if inp.now - inp.last_hard_switch < GOAL_BIAS_SECONDS {
        hard += 10.0;
    }

    // Why 98 and not 100? Some packs (Pylontech UP5000) fail to report 100
    // and get stuck at 98-99.
    let mut last_equalize_at = inp.last_equalize_at;
    if inp.min_battery_p >= 98.0 {
        last_equalize_at = inp.now;
    }

    // Give the battery a chance to balance its cells, regardless of the
    // hourly goal. This must happen before any other decision is taken,
    // otherwise the "let's charge" and "we have enough" branches can both be
    // true at once and we flip straight back. Equalization runs after 5pm,
    // which coincides with the SOC being close to 100%. The SOC can never be
    // 200, so these goals force charging until the 98% stamp above fires.
    if inp.time_of_day.hour >= 17
        && inp.now - last_equalize_at >= inp.hours_between_equalize * 3600
    {
        soft = soft.max(200.0);
        hard = hard.max(200.0);
    }

    Goals {
        soft,
        hard,
        raw_soft,
        raw_hard,
        last_equalize_at,
    }
}

/// Inputs to the heavy-load target state decision.
pub struct HeavyPlanInputs {
    pub monitor_is_alive: bool,
    pub mode: HeavyLoadMode,
    pub state: HeavyLoadState,
    pub hour: i32,
    pub has_grid_power: bool,
    pub battery_p: f32,
    pub avg_solar_w: f32,
    pub avg_load_w: f32,
    pub heavy_load_watts: f32,
    pub is_output_overloaded: bool,
    pub is_battery_overloaded: bool,
}

/// Decide where the heavy-loads sub-panel should be fed from.
pub fn plan_heavy_state(inp: &HeavyPlanInputs) -> HeavyLoadState {
    let mut desired = HeavyLoadState::Grid;

    if inp.monitor_is_alive {
        // When we're already on the inverter, make it easy to stay there;
        // when we're on the grid, raise the bar to get out. A fully charged
        // battery often leaves observed solar only ~15% above the loads, so
        // the escape factor cannot be large. The asymmetry also biases the
        // system toward using the battery, which works well in the absence
        // of an irradiation predictor.
        let load_factor = if inp.state == HeavyLoadState::Inverter {
            0.7
        } else {
            1.1
        };

        // If the heavy loads are on the inverter the observed load watts are
        // already the total. Otherwise add our estimate of the heavy circuit
        // to predict what the total would be.
        let mut estimated_total_load_w = inp.avg_load_w;
        if inp.state != HeavyLoadState::Inverter {
            estimated_total_load_w += inp.heavy_load_watts;
        }

        let solar_exceeds_loads = inp.avg_solar_w > estimated_total_load_w * load_factor;

        // A grace window so that a washing machine can run in the morning
        // even if the load exceeds solar for a while. Late in the day we'd
        // just be draining the battery only to recharge it in the evening,
        // at round-trip losses, so we'd rather use grid then.
        let early_in_day_and_battery_ok =
            inp.hour >= 7 && inp.hour <= 15 && inp.battery_p >= 45.0;

        if inp.mode == HeavyLoadMode::Grid {
            desired = HeavyLoadState::Grid;
        } else if solar_exceeds_loads {
            desired = HeavyLoadState::Inverter;
        } else if inp.has_grid_power {
            // Avoid transfer losses.
            desired = HeavyLoadState::Grid;
        } else if early_in_day_and_battery_ok || inp.mode == HeavyLoadMode::AlwaysOn {
            desired = HeavyLoadState::Inverter;
        }

        if inp.is_battery_overloaded || inp.is_output_overloaded || inp.battery_p < 40.0 {
            desired = HeavyLoadState::Grid;
        }
    }

    if desired == HeavyLoadState::Grid && !inp.has_grid_power {
        // With no grid and not enough solar, switch the non-essential
        // circuits off entirely. That keeps them away from the spike when
        // the grid returns; by the time we've polled the grid state again,
        // the spike has subsided.
        desired = HeavyLoadState::Off;
    }

    desired
}

/// Choose output source and charger priority from the battery SOC goals.
pub fn plan_power_modes(battery_p: f32, soft: f32, hard: f32) -> (PowerSource, ChargerPriority) {
    if battery_p < hard {
        // Hard limit hit: charge at all costs.
        (PowerSource::Sub, ChargerPriority::UtilitySolar)
    } else if battery_p < soft {
        // Soft limit hit: run loads from grid to avoid battery cycling, but
        // don't spend grid power on charging. Powering loads straight from
        // the grid beats a grid->battery->loads round trip.
        (PowerSource::Sub, ChargerPriority::SolarOnly)
    } else {
        (PowerSource::Sbu, ChargerPriority::SolarOnly)
    }
}

struct HeavyShared {
    mode: HeavyLoadMode,
    state: HeavyLoadState,
    contactors: Contactors,
}

#[derive(Clone)]
pub struct Controller {
    config: Config,
    channels: Channels,
    monitor: Monitor,
    heavy: Arc<Mutex<HeavyShared>>,
    storm_mode_until: Arc<AtomicI64>,
}

impl Controller {
    pub fn new(config: Config, channels: Channels, monitor: Monitor) -> Result<Self> {
        let contactors = if config.debug() {
            info!("Debug mode: contactor GPIO disabled");
            Contactors::disabled()
        } else {
            Contactors::new(&config)?
        };
        Ok(Self {
            config,
            channels,
            monitor,
            heavy: Arc::new(Mutex::new(HeavyShared {
                mode: HeavyLoadMode::OnWithSolar,
                state: HeavyLoadState::Off,
                contactors,
            })),
            storm_mode_until: Arc::new(AtomicI64::new(0)),
        })
    }

    pub async fn heavy_load_mode(&self) -> HeavyLoadMode {
        self.heavy.lock().await.mode
    }

    pub async fn heavy_load_state(&self) -> HeavyLoadState {
        self.heavy.lock().await.state
    }

    pub async fn set_heavy_load_mode(&self, mode: HeavyLoadMode) {
        let mut heavy = self.heavy.lock().await;
        info!("Set heavy load mode to {}", mode.describe());
        heavy.mode = mode;
    }

    /// Switch the heavy-loads sub-panel. Break-before-make: the active side
    /// is released, we dwell, and only then is the other side energized.
    /// A switchover device with zero-crossing detection would be better;
    /// since we can't have that, the dwell plus the contactors' own
    /// mechanical delays guarantees the two sides never overlap.
    pub async fn set_heavy_load_state(&self, state: HeavyLoadState) -> Result<()> {
        let mut heavy = self.heavy.lock().await;
        if heavy.state == state {
            return Ok(());
        }
        info!("Set heavy load state to {}", state.describe());

        let pause = Duration::from_millis(self.config.switch_sleep_ms());
        match state {
            HeavyLoadState::Inverter => {
                heavy.contactors.grid_low()?;
                tokio::time::sleep(pause).await;
                heavy.contactors.inverter_high()?;
                self.monitor
                    .snapshot()
                    .is_heavy_on_inverter
                    .store(true, Ordering::Relaxed);
            }
            HeavyLoadState::Grid => {
                heavy.contactors.inverter_low()?;
                tokio::time::sleep(pause).await;
                heavy.contactors.grid_high()?;
                self.monitor
                    .snapshot()
                    .is_heavy_on_inverter
                    .store(false, Ordering::Relaxed);
            }
            HeavyLoadState::Off => {
                heavy.contactors.inverter_low()?;
                heavy.contactors.grid_low()?;
                self.monitor
                    .snapshot()
                    .is_heavy_on_inverter
                    .store(false, Ordering::Relaxed);
            }
        }

        heavy.state = state;
        Ok(())
    }

    pub fn set_storm_mode(&self, hours: i64) {
        if hours <= 0 {
            info!("Storm mode cancelled");
            self.storm_mode_until.store(0, Ordering::Relaxed);
            return;
        }
        let until = chrono::Utc::now().timestamp() + hours * 3600;
        info!("Storm mode active for the next {} hours", hours);
        self.storm_mode_until.store(until, Ordering::Relaxed);
    }

    pub fn storm_mode_until(&self) -> i64 {
        self.storm_mode_until.load(Ordering::Relaxed)
    }

    pub async fn start(&self) -> Result<()> {
        info!("Controller starting");
        info!("Auto charge: {}", if self.config.auto_charge() { "yes" } else { "no" });
        if self.config.auto_charge() {
            self.print_charge_limits();
        }

        let soft_curve = self.config.charge_curve_soft();
        let hard_curve = self.config.charge_curve_hard();

        let mut cooloff = Cooloff::default();
        let mut current_power_source = PowerSource::Unknown;
        let mut current_charge_priority = ChargerPriority::Unknown;
        // Stamped at startup so a freshly booted controller waits a full
        // interval before forcing an equalize charge.
        let mut last_equalize_at = chrono::Utc::now().timestamp();
        let mut switch_power_source_at: i64 = 0;
        let mut switch_charger_priority_at: i64 = 0;
        let mut last_attempted_source_switch: i64 = 0;
        let mut last_attempted_charger_switch: i64 = 0;
        let mut last_soft_switch: i64 = 0;
        let mut last_hard_switch: i64 = 0;
        let mut last_status_log: i64 = 0;
        let mut last_mode_log: i64 = 0;

        let mut interval = tokio::time::interval(TICK);
        let mut shutdown_rx = self.channels.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.recv() => {
                    info!("Controller received shutdown signal");
                    return Ok(());
                }
            }

            let now = chrono::Utc::now().timestamp();
            let time_of_day = TimePoint::now();
            let s = self.monitor.snapshot();

            let monitor_is_alive = s.is_initialized.load(Ordering::Relaxed);
            let battery_p = s.battery_p.load();
            let min_battery_p = s.min_battery_p.load();
            let has_grid_power = s.has_grid_power.load(Ordering::Relaxed);
            let avg_solar_w = s.avg_solar_w.load();
            let avg_load_w = s.avg_load_w.load();
            // Only updated when heavy loads switch on or off; an estimate.
            let heavy_load_watts = s.heavy_load_watts.load();
            let is_output_overloaded = s.is_output_overloaded.load(Ordering::Relaxed);
            let is_battery_overloaded = s.is_battery_overloaded.load(Ordering::Relaxed);

            let (heavy_mode, heavy_state) = {
                let heavy = self.heavy.lock().await;
                (heavy.mode, heavy.state)
            };

            let goals = compute_goals(
                &soft_curve,
                &hard_curve,
                &GoalInputs {
                    now,
                    time_of_day,
                    storm_mode_until: self.storm_mode_until(),
                    last_soft_switch,
                    last_hard_switch,
                    last_equalize_at,
                    hours_between_equalize: self.config.hours_between_equalize(),
                    min_battery_p,
                },
            );
            last_equalize_at = goals.last_equalize_at;

            let desired_heavy = plan_heavy_state(&HeavyPlanInputs {
                monitor_is_alive,
                mode: heavy_mode,
                state: heavy_state,
                hour: time_of_day.hour,
                has_grid_power,
                battery_p,
                avg_solar_w,
                avg_load_w,
                heavy_load_watts,
                is_output_overloaded,
                is_battery_overloaded,
            });

            if monitor_is_alive && now - last_status_log > 10 * 60 {
                last_status_log = now;
                info!(
                    "hasGridPower: {}, avgSolarW: {:.0}, avgLoadW: {:.0}, outputOverloaded: {}, batteryOverloaded: {}, time: {}:{:02}",
                    has_grid_power, avg_solar_w, avg_load_w,
                    is_output_overloaded, is_battery_overloaded,
                    time_of_day.hour, time_of_day.minute
                );
            }

            if monitor_is_alive && self.config.auto_charge() {
                if now - last_mode_log > 3 * 60 {
                    last_mode_log = now;
                    info!(
                        "Mode: {}, softGoal: {:.1} ({:.1}), hardGoal: {:.1} ({:.1}), batteryP: {:.1}, heavyLoadW: {:.0}, sinceEqualize: {}",
                        current_power_source.describe(),
                        goals.soft, goals.raw_soft, goals.hard, goals.raw_hard,
                        battery_p, heavy_load_watts, now - last_equalize_at
                    );
                }

                let (desired_source, desired_charge) =
                    plan_power_modes(battery_p, goals.soft, goals.hard);

                if desired_charge != current_charge_priority
                    && now - switch_charger_priority_at > MIN_SECONDS_BETWEEN_AXIS_SWITCHES
                    && now - last_attempted_charger_switch > MIN_SECONDS_BETWEEN_ATTEMPTS
                {
                    info!(
                        "Switching charger priority from {} to {} (battery {:.1}, soft {:.1}, hard {:.1})",
                        current_charge_priority.describe(),
                        desired_charge.describe(),
                        battery_p, goals.soft, goals.hard
                    );
                    last_attempted_charger_switch = now;
                    let cmd = desired_charge.command(s.model());
                    if self.run_command(cmd).await {
                        current_charge_priority = desired_charge;
                        switch_charger_priority_at = now;
                        // Drop the +10 bias the moment we leave the charging
                        // state, otherwise the bias becomes the new
                        // permanent target and we ping-pong.
                        last_hard_switch = if desired_charge == ChargerPriority::UtilitySolar {
                            now
                        } else {
                            0
                        };
                    } else {
                        error!("Switching charger priority failed");
                    }
                }

                if desired_source != current_power_source
                    && now - switch_power_source_at > MIN_SECONDS_BETWEEN_AXIS_SWITCHES
                    && now - last_attempted_source_switch > MIN_SECONDS_BETWEEN_ATTEMPTS
                {
                    info!(
                        "Switching power source from {} to {} (battery {:.1}, soft {:.1}, hard {:.1})",
                        current_power_source.describe(),
                        desired_source.describe(),
                        battery_p, goals.soft, goals.hard
                    );
                    last_attempted_source_switch = now;
                    if self.run_command(desired_source.command()).await {
                        current_power_source = desired_source;
                        switch_power_source_at = now;
                        last_soft_switch = if desired_source == PowerSource::Sub {
                            now
                        } else {
                            0
                        };
                    } else {
                        error!("Switching power source failed");
                    }
                }
            }

            if desired_heavy != heavy_state {
                // Grid and Off are the safe direction and always allowed;
                // going back to the inverter waits out the cooloff.
                if desired_heavy != HeavyLoadState::Inverter || cooloff.is_good(now) {
                    if desired_heavy != HeavyLoadState::Inverter {
                        cooloff.signal_alarm(now);
                    }
                    if let Err(e) = self.set_heavy_load_state(desired_heavy).await {
                        error!("Failed to switch heavy loads: {}", e);
                    }
                }
            }

            if desired_heavy == HeavyLoadState::Inverter {
                cooloff.signal_fine(now);
            }
        }
    }

    async fn run_command(&self, cmd: &str) -> bool {
        if self.config.debug() {
            info!("Debug mode: not actually running inverter command {}", cmd);
            return true;
        }
        match self.monitor.run_inverter_command(cmd).await {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    fn print_charge_limits(&self) {
        let soft_curve = self.config.charge_curve_soft();
        let hard_curve = self.config.charge_curve_hard();
        info!("Minimum battery charge percentage per hour (soft/hard):");
        for hour in 0..24 {
            let t = TimePoint::new(hour, 0);
            info!(
                "  {:02}h: {:3.0}% {:3.0}%",
                hour,
                TimePoint::interpolate(t, &soft_curve),
                TimePoint::interpolate(t, &hard_curve)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goal_inputs(now: i64) -> GoalInputs {
        GoalInputs {
            now,
            time_of_day: TimePoint::new(12, 0),
            storm_mode_until: 0,
            last_soft_switch: 0,
            last_hard_switch: 0,
            last_equalize_at: now,
            hours_between_equalize: 22,
            min_battery_p: 50.0,
        }
    }

    fn flat_curve(v: f32) -> Vec<(TimePoint, f32)> {
        vec![(TimePoint::new(8, 0), v), (TimePoint::new(16, 0), v)]
    }

    #[test]
    fn anti_hysteresis_bias_expires() {
        let soft = flat_curve(50.0);
        let hard = flat_curve(40.0);
        let mut inp = goal_inputs(100_000);
        inp.last_soft_switch = 100_000 - 1000;
        let g = compute_goals(&soft, &hard, &inp);
        assert_eq!(g.soft, 60.0);
        assert_eq!(g.hard, 40.0);

        inp.last_soft_switch = 100_000 - 3601;
        let g = compute_goals(&soft, &hard, &inp);
        assert_eq!(g.soft, 50.0);
    }

    #[test]
    fn storm_mode_raises_the_floor() {
        let soft = flat_curve(50.0);
        let hard = flat_curve(40.0);
        let mut inp = goal_inputs(100_000);
        inp.storm_mode_until = 100_001;
        let g = compute_goals(&soft, &hard, &inp);
        assert_eq!(g.soft, 90.0);
        assert_eq!(g.hard, 80.0);
    }

    #[test]
    fn raw_goals_are_clamped_before_bias() {
        let soft = flat_curve(150.0);
        let hard = flat_curve(-20.0);
        let mut inp = goal_inputs(100_000);
        inp.last_soft_switch = 100_000 - 10;
        inp.last_hard_switch = 100_000 - 10;
        let g = compute_goals(&soft, &hard, &inp);
        // clamp to [0,100] first, then +10
        assert_eq!(g.soft, 110.0);
        assert_eq!(g.hard, 10.0);
        assert_eq!(g.raw_soft, 150.0);
        assert_eq!(g.raw_hard, -20.0);
    }

    #[test]
    fn equalize_forces_sentinel_goals_after_17h() {
        let soft = flat_curve(50.0);
        let hard = flat_curve(40.0);
        let mut inp = goal_inputs(1_000_000);
        inp.time_of_day = TimePoint::new(18, 0);
        inp.last_equalize_at = 1_000_000 - 23 * 3600;
        let g = compute_goals(&soft, &hard, &inp);
        assert_eq!(g.soft, 200.0);
        assert_eq!(g.hard, 200.0);

        // Not yet due: goals stay nominal.
        inp.last_equalize_at = 1_000_000 - 10 * 3600;
        let g = compute_goals(&soft, &hard, &inp);
        assert_eq!(g.soft, 50.0);

        // Before 17h the sentinel never fires.
        inp.time_of_day = TimePoint::new(12, 0);
        inp.last_equalize_at = 1_000_000 - 23 * 3600;
        let g = compute_goals(&soft, &hard, &inp);
        assert_eq!(g.soft, 50.0);
    }

    #[test]
    fn full_battery_refreshes_equalize_stamp() {
        let soft = flat_curve(50.0);
        let hard = flat_curve(40.0);
        let mut inp = goal_inputs(1_000_000);
        inp.time_of_day = TimePoint::new(18, 0);
        inp.last_equalize_at = 1_000_000 - 23 * 3600;
        inp.min_battery_p = 98.5;
        let g = compute_goals(&soft, &hard, &inp);
        assert_eq!(g.last_equalize_at, 1_000_000);
        // The refreshed stamp also suppresses the sentinel this tick.
        assert_eq!(g.soft, 50.0);
    }

    fn heavy_inputs() -> HeavyPlanInputs {
        HeavyPlanInputs {
            monitor_is_alive: true,
            mode: HeavyLoadMode::OnWithSolar,
            state: HeavyLoadState::Grid,
            hour: 12,
            has_grid_power: true,
            battery_p: 80.0,
            avg_solar_w: 0.0,
            avg_load_w: 500.0,
            heavy_load_watts: 0.0,
            is_output_overloaded: false,
            is_battery_overloaded: false,
        }
    }

    #[test]
    fn solar_surplus_moves_heavy_to_inverter() {
        let mut inp = heavy_inputs();
        // From grid, the bar is estimated total load * 1.1.
        inp.avg_solar_w = 540.0;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Grid);
        inp.avg_solar_w = 560.0;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Inverter);
    }

    #[test]
    fn staying_on_inverter_is_easier_than_getting_there() {
        let mut inp = heavy_inputs();
        inp.state = HeavyLoadState::Inverter;
        // On the inverter the bar drops to 0.7x.
        inp.avg_solar_w = 400.0;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Inverter);
        inp.avg_solar_w = 300.0;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Grid);
    }

    #[test]
    fn heavy_estimate_counts_when_not_on_inverter() {
        let mut inp = heavy_inputs();
        inp.heavy_load_watts = 1000.0;
        // bar = (500 + 1000) * 1.1
        inp.avg_solar_w = 1600.0;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Grid);
        inp.avg_solar_w = 1700.0;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Inverter);
    }

    #[test]
    fn grid_mode_pins_heavy_to_grid() {
        let mut inp = heavy_inputs();
        inp.mode = HeavyLoadMode::Grid;
        inp.avg_solar_w = 10_000.0;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Grid);
    }

    #[test]
    fn morning_grace_runs_heavy_from_battery() {
        let mut inp = heavy_inputs();
        inp.has_grid_power = false;
        inp.hour = 9;
        inp.battery_p = 50.0;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Inverter);
        // Too late in the day: the same situation turns the panel off.
        inp.hour = 16;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Off);
    }

    #[test]
    fn overload_forces_grid() {
        let mut inp = heavy_inputs();
        inp.avg_solar_w = 10_000.0;
        inp.is_output_overloaded = true;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Grid);
        inp.is_output_overloaded = false;
        inp.is_battery_overloaded = true;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Grid);
        inp.is_battery_overloaded = false;
        inp.battery_p = 39.0;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Grid);
    }

    #[test]
    fn blackout_turns_heavy_off_instead_of_grid() {
        let mut inp = heavy_inputs();
        inp.has_grid_power = false;
        inp.hour = 20;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Off);
        // And a dead monitor defaults to grid, or off without grid power.
        inp.monitor_is_alive = false;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Off);
        inp.has_grid_power = true;
        assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Grid);
    }

    #[test]
    fn power_mode_selection() {
        use crate::axpert::parser::{ChargerPriority, PowerSource};
        assert_eq!(
            plan_power_modes(30.0, 50.0, 40.0),
            (PowerSource::Sub, ChargerPriority::UtilitySolar)
        );
        assert_eq!(
            plan_power_modes(45.0, 50.0, 40.0),
            (PowerSource::Sub, ChargerPriority::SolarOnly)
        );
        assert_eq!(
            plan_power_modes(80.0, 50.0, 40.0),
            (PowerSource::Sbu, ChargerPriority::SolarOnly)
        );
    }
}
