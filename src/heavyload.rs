//! Estimating the wattage of the switched heavy-loads sub-panel.
//!
//! We cannot measure the heavy circuits directly. What we can see is the
//! jump in the inverter's reported load watts when the contactors flip, so
//! we record those deltas and project the latest one forward with a
//! staleness decay.

use crate::history::{History, HistoryPoint};
use crate::ringbuffer::RingBuffer;

/// One recent telemetry reading, reduced to what transition detection needs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoadSample {
    pub time: i64,
    pub load_w: f32,
    pub heavy: bool,
}

/// Threshold below which a load delta around a contactor flip is not
/// considered a genuine heavy-load signature. If the load differs by less
/// than this, it does not matter if we get it wrong.
const DELTA_THRESHOLD_W: f32 = 200.0;

const MAX_HISTORY_SECONDS: i64 = 60 * 60;

/// If we have recently switched heavy loads on or off, take a sample of the
/// load-watt delta to improve our estimate of the heavy circuit's wattage.
///
/// The switching of the contactors is not coordinated with the reading of
/// inverter data, and the reported load watts can trail the contactor state
/// by up to one sample:
///
/// ```text
///  time | loadW | heavy
///   t-1 |   515 | f
///   t0  |   567 | f
///   t1  |   567 | t      <- contactor flipped here
///   t2  |  1841 | t      <- wattage shows up one sample later
/// ```
///
/// We also must not miss the no-lag case, where an overloaded inverter gets
/// the heavy loads switched straight back off one sample after t1. So we
/// test the immediate delta first, and the one-sample-lag delta second.
pub fn analyze_recent(samples: &RingBuffer<LoadSample>, deltas: &mut History) {
    if samples.len() < 3 {
        return;
    }
    let n = samples.len();
    let t0 = *samples.peek(n - 3);
    let t1 = *samples.peek(n - 2);
    let t2 = *samples.peek(n - 1);
    let delta1 = t1.load_w - t0.load_w;
    let delta2 = t2.load_w - t0.load_w;

    let switched_on = !t0.heavy && t1.heavy;
    let switched_off = t0.heavy && !t1.heavy;

    if (switched_on && delta1 > DELTA_THRESHOLD_W) || (switched_off && delta1 < -DELTA_THRESHOLD_W)
    {
        // transition without lag
        deltas.push(HistoryPoint {
            time: t1.time,
            value: delta1.abs(),
        });
    } else if (switched_on && delta2 > DELTA_THRESHOLD_W)
        || (switched_off && delta2 < -DELTA_THRESHOLD_W)
    {
        // transition with lag
        deltas.push(HistoryPoint {
            time: t1.time,
            value: delta2.abs(),
        });
    }
}

/// Given the recorded delta observations, estimate the heavy-load wattage at
/// time `now`. The buffer may hold any number of samples, and the most
/// recent may be far in the past.
///
/// The most recent observation is held for as long as we saw consistent
/// readings before it, then decays linearly to zero over the same span:
///
/// ```text
/// |         ,-----------.
/// | ---_,--'             \   <- watts
/// |                       \
/// | --------+----+----+----+
///      t0     t1    t2   t3
/// t0: readings well below the latest observation (ignored)
/// t1: consistent observations (span = secondsOfSame)
/// t2: predicted hold, same duration
/// t3: linear decay to zero, same duration
/// ```
pub fn estimate_heavy_load_watts(now: i64, deltas: &History) -> f32 {
    if deltas.is_empty() {
        return 0.0;
    }
    let n = deltas.len();
    let last = *deltas.peek(n - 1);

    if now - last.time > MAX_HISTORY_SECONDS {
        return 0.0;
    }

    // Walk backwards over observations that are at least 75% of the latest
    // one; the span of that run tells us how persistent the load has been.
    let mut earliest = last;
    for i in (0..n - 1).rev() {
        let sample = *deltas.peek(i);
        if sample.value < last.value * 0.75 || last.time - sample.time > MAX_HISTORY_SECONDS {
            break;
        }
        earliest = sample;
    }

    // With no history to look back on, assume the present observation will
    // hold for the next 2 minutes.
    let seconds_of_same = (last.time - earliest.time).clamp(2 * 60, MAX_HISTORY_SECONDS);

    let decay_seconds = (now - (last.time + seconds_of_same)).clamp(0, seconds_of_same);
    let decay = 1.0 - decay_seconds as f32 / seconds_of_same as f32;
    last.value * decay
}
