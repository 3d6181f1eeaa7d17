use axpert_bridge::controller::{
    compute_goals, plan_heavy_state, plan_power_modes, GoalInputs, HeavyLoadMode, HeavyLoadState,
    HeavyPlanInputs,
};
use axpert_bridge::axpert::parser::{ChargerPriority, PowerSource};
use axpert_bridge::cooloff::Cooloff;
use axpert_bridge::timepoint::TimePoint;

fn curves() -> (Vec<(TimePoint, f32)>, Vec<(TimePoint, f32)>) {
    let soft = vec![(TimePoint::new(8, 0), 45.0), (TimePoint::new(16, 30), 90.0)];
    let hard = vec![(TimePoint::new(8, 0), 35.0), (TimePoint::new(16, 30), 90.0)];
    (soft, hard)
}

fn inputs(now: i64, tod: TimePoint) -> GoalInputs {
    GoalInputs {
        now,
        time_of_day: tod,
        storm_mode_until: 0,
        last_soft_switch: 0,
        last_hard_switch: 0,
        last_equalize_at: now,
        hours_between_equalize: 22,
        min_battery_p: 60.0,
    }
}

#[test]
fn a_day_without_events_tracks_the_curve() {
    let (soft, hard) = curves();
    let g = compute_goals(&soft, &hard, &inputs(1_000_000, TimePoint::new(8, 0)));
    assert_eq!(g.soft, 45.0);
    assert_eq!(g.hard, 35.0);
    let g = compute_goals(&soft, &hard, &inputs(1_000_000, TimePoint::new(16, 30)));
    assert_eq!(g.soft, 90.0);
    assert_eq!(g.hard, 90.0);
}

#[test]
fn charging_decision_overshoots_then_settles() {
    let (soft, hard) = curves();
    let noon = TimePoint::new(12, 0);
    let base = compute_goals(&soft, &hard, &inputs(1_000_000, noon));

    // Just after switching into SUB, the target is 10 points higher...
    let mut inp = inputs(1_000_000, noon);
    inp.last_soft_switch = 1_000_000 - 1000;
    let biased = compute_goals(&soft, &hard, &inp);
    assert_eq!(biased.soft, base.soft + 10.0);

    // ...and one hour later the bias is gone.
    inp.last_soft_switch = 1_000_000 - 3601;
    let settled = compute_goals(&soft, &hard, &inp);
    assert_eq!(settled.soft, base.soft);
}

#[test]
fn leaving_charging_drops_the_bias_immediately() {
    // Zeroing the switch stamp is how the controller reports "left SUB";
    // the goal must return to nominal on the very next tick.
    let (soft, hard) = curves();
    let mut inp = inputs(1_000_000, TimePoint::new(12, 0));
    inp.last_soft_switch = 0;
    inp.last_hard_switch = 0;
    let g = compute_goals(&soft, &hard, &inp);
    let base = compute_goals(&soft, &hard, &inputs(1_000_000, TimePoint::new(12, 0)));
    assert_eq!(g.soft, base.soft);
    assert_eq!(g.hard, base.hard);
}

#[test]
fn storm_mode_floor_combines_with_bias() {
    let (soft, hard) = curves();
    let mut inp = inputs(1_000_000, TimePoint::new(12, 0));
    inp.storm_mode_until = 1_000_500;
    inp.last_soft_switch = 1_000_000 - 100;
    let g = compute_goals(&soft, &hard, &inp);
    // floor to 90, then +10 bias: goals above 100 are intentional
    assert_eq!(g.soft, 100.0);
    assert_eq!(g.hard, 80.0);
}

#[test]
fn equalization_cycle_end_to_end() {
    let (soft, hard) = curves();
    let evening = TimePoint::new(18, 0);

    // Overdue: the sentinel forces charging no matter the curve.
    let mut inp = inputs(2_000_000, evening);
    inp.last_equalize_at = 2_000_000 - 23 * 3600;
    let g = compute_goals(&soft, &hard, &inp);
    assert_eq!((g.soft, g.hard), (200.0, 200.0));
    let (source, charge) = plan_power_modes(99.0, g.soft, g.hard);
    assert_eq!(source, PowerSource::Sub);
    assert_eq!(charge, ChargerPriority::UtilitySolar);

    // The pack reaches 98%: the stamp refreshes and the goals fall back,
    // releasing the system on a later tick.
    inp.min_battery_p = 98.0;
    let g = compute_goals(&soft, &hard, &inp);
    assert_eq!(g.last_equalize_at, 2_000_000);
    assert!(g.soft < 200.0);
    let (source, charge) = plan_power_modes(99.0, g.soft, g.hard);
    assert_eq!(source, PowerSource::Sbu);
    assert_eq!(charge, ChargerPriority::SolarOnly);
}

#[test]
fn goal_interpolation_handles_midnight_wrap() {
    let (soft, _) = curves();
    let v = TimePoint::interpolate(TimePoint::new(23, 59), &soft);
    // blending from 90 at 16:30 toward 45 at 08:00 the next day
    assert!(v < 90.0 && v > 45.0);
    let v_later = TimePoint::interpolate(TimePoint::new(2, 0), &soft);
    assert!(v_later < v);
}

fn heavy(state: HeavyLoadState, solar: f32, grid: bool) -> HeavyPlanInputs {
    HeavyPlanInputs {
        monitor_is_alive: true,
        mode: HeavyLoadMode::OnWithSolar,
        state,
        hour: 12,
        has_grid_power: grid,
        battery_p: 80.0,
        avg_solar_w: solar,
        avg_load_w: 1000.0,
        heavy_load_watts: 0.0,
        is_output_overloaded: false,
        is_battery_overloaded: false,
    }
}

#[test]
fn heavy_switch_hysteresis_band() {
    // Between 0.7x and 1.1x of the load, the decision depends on which side
    // we are already on: no flapping when solar is close to the load.
    let solar = 1000.0;
    assert_eq!(
        plan_heavy_state(&heavy(HeavyLoadState::Grid, solar, true)),
        HeavyLoadState::Grid
    );
    assert_eq!(
        plan_heavy_state(&heavy(HeavyLoadState::Inverter, solar, true)),
        HeavyLoadState::Inverter
    );
}

#[test]
fn cooloff_gates_reentry_to_inverter() {
    let mut cooloff = Cooloff::default();
    let mut now = 10_000;

    // A forced fallback to grid alarms the cooloff.
    cooloff.signal_alarm(now);
    assert!(!cooloff.is_good(now + 1));

    // Until it expires, a desired Inverter state would be held back.
    now += cooloff.current_period - 1;
    assert!(!cooloff.is_good(now));
    now += 2;
    assert!(cooloff.is_good(now));

    // Repeated failures stretch the wait, up to the cap.
    let mut prev = cooloff.current_period;
    for _ in 0..8 {
        cooloff.signal_alarm(now);
        assert!(cooloff.current_period >= prev);
        prev = cooloff.current_period;
    }
    assert_eq!(cooloff.current_period, cooloff.max_period);
}

#[test]
fn dead_monitor_keeps_heavy_in_the_safe_posture() {
    let mut inp = heavy(HeavyLoadState::Off, 50_000.0, true);
    inp.monitor_is_alive = false;
    assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Grid);
    inp.has_grid_power = false;
    assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Off);
}

#[test]
fn battery_floor_beats_always_on_mode() {
    let mut inp = heavy(HeavyLoadState::Inverter, 50_000.0, true);
    inp.mode = HeavyLoadMode::AlwaysOn;
    inp.battery_p = 39.0;
    assert_eq!(plan_heavy_state(&inp), HeavyLoadState::Grid);
}
