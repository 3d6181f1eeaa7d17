use chrono::Timelike;

/// A time of day, minute resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimePoint {
    pub hour: i32,
    pub minute: i32,
}

impl TimePoint {
    pub fn new(hour: i32, minute: i32) -> Self {
        Self { hour, minute }
    }

    pub fn absolute_minute(&self) -> i32 {
        self.hour * 60 + self.minute
    }

    /// The current local time of day.
    pub fn now() -> Self {
        let now = chrono::Local::now();
        Self {
            hour: now.hour() as i32,
            minute: now.minute() as i32,
        }
    }

    /// Interpolate between the curve points to find the value at time `t`,
    /// respecting the wrap-around at midnight. Points must be sorted by time.
    pub fn interpolate(t: TimePoint, points: &[(TimePoint, f32)]) -> f32 {
        match points.len() {
            0 => return 0.0,
            1 => return points[0].1,
            _ => {}
        }
        let n = points.len();
        let i = points.iter().position(|(pt, _)| t < *pt).unwrap_or(n);
        if i >= 1 && i < n {
            let t1 = points[i - 1].0.absolute_minute() as f32;
            let t2 = points[i].0.absolute_minute() as f32;
            let alpha = (t.absolute_minute() as f32 - t1) / (t2 - t1);
            points[i - 1].1 * (1.0 - alpha) + points[i].1 * alpha
        } else {
            // 24-hour wraparound between the last and first points
            let t1 = points[n - 1].0.absolute_minute() as f32;
            let t2 = (points[0].0.absolute_minute() + 24 * 60) as f32;
            let mut abs_t = t.absolute_minute() as f32;
            if i == 0 {
                // t is before the first point; normalize it to after the last
                abs_t += 24.0 * 60.0;
            }
            let alpha = (abs_t - t1) / (t2 - t1);
            points[n - 1].1 * (1.0 - alpha) + points[0].1 * alpha
        }
    }
}

impl PartialOrd for TimePoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimePoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.absolute_minute().cmp(&other.absolute_minute())
    }
}
