use crate::ringbuffer::RingBuffer;

/// One sample of a tracked metric.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HistoryPoint {
    pub time: i64,
    pub value: f32,
}

pub type History = RingBuffer<HistoryPoint>;

/// Average over samples with time >= after_time. Returns 0 if the window is empty.
pub fn average_since(after_time: i64, history: &History) -> f64 {
    let mut sum = 0.0;
    let mut nsamples = 0u32;
    for i in (0..history.len()).rev() {
        let sample = history.peek(i);
        if sample.time < after_time {
            break;
        }
        sum += sample.value as f64;
        nsamples += 1;
    }
    if nsamples == 0 {
        0.0
    } else {
        sum / nsamples as f64
    }
}

/// Maximum over samples with time >= after_time. Returns -f32::MAX if the window is empty.
pub fn maximum_since(after_time: i64, history: &History) -> f32 {
    let mut maxv = -f32::MAX;
    for i in (0..history.len()).rev() {
        let sample = history.peek(i);
        if sample.time < after_time {
            break;
        }
        maxv = maxv.max(sample.value);
    }
    maxv
}

/// Minimum over samples with time >= after_time. Returns f32::MAX if the window is empty.
pub fn minimum_since(after_time: i64, history: &History) -> f32 {
    let mut minv = f32::MAX;
    for i in (0..history.len()).rev() {
        let sample = history.peek(i);
        if sample.time < after_time {
            break;
        }
        minv = minv.min(sample.value);
    }
    minv
}

/// Time of the oldest sample, or 0 if empty.
pub fn oldest_time(history: &History) -> i64 {
    if history.is_empty() {
        0
    } else {
        history.peek(0).time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(points: &[(i64, f32)]) -> History {
        let mut h = History::new(512);
        for &(time, value) in points {
            h.push(HistoryPoint { time, value });
        }
        h
    }

    #[test]
    fn average_respects_window() {
        let h = fill(&[(100, 10.0), (110, 20.0), (120, 30.0), (130, 40.0)]);
        assert_eq!(average_since(115, &h), 35.0);
        assert_eq!(average_since(0, &h), 25.0);
        // window in the future: empty
        assert_eq!(average_since(200, &h), 0.0);
    }

    #[test]
    fn maximum_and_minimum_respect_window() {
        let h = fill(&[(100, 10.0), (110, 50.0), (120, 30.0)]);
        assert_eq!(maximum_since(105, &h), 50.0);
        assert_eq!(maximum_since(115, &h), 30.0);
        assert_eq!(minimum_since(105, &h), 30.0);
        assert_eq!(minimum_since(0, &h), 10.0);
    }

    #[test]
    fn empty_history() {
        let h = History::new(512);
        assert_eq!(average_since(0, &h), 0.0);
        assert_eq!(maximum_since(0, &h), -f32::MAX);
        assert_eq!(minimum_since(0, &h), f32::MAX);
        assert_eq!(oldest_time(&h), 0);
    }

    #[test]
    fn oldest_time_tracks_eviction() {
        let mut h = History::new(4);
        for i in 0..10 {
            h.push(HistoryPoint { time: i, value: 0.0 });
        }
        assert_eq!(oldest_time(&h), 7);
    }
}
