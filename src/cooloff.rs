/// A backoff period that doubles every time an optimistic decision turns out
/// to be wrong, and resets once the system has been stable for long enough.
///
/// We switch to the optimistic state on imperfect knowledge (we cannot know
/// how much the switched circuits draw until we flip them on). Every time we
/// are forced back to the conservative state, the cooloff period doubles.
#[derive(Clone, Copy, Debug)]
pub struct Cooloff {
    pub default_period: i64,
    pub current_period: i64,
    pub max_period: i64,
    pub last_alarm: i64,
}

impl Default for Cooloff {
    fn default() -> Self {
        Self {
            default_period: 12,
            current_period: 2 * 60,
            max_period: 15 * 60,
            last_alarm: 0,
        }
    }
}

impl Cooloff {
    /// Inform the system that everything appears to be fine.
    pub fn signal_fine(&mut self, now: i64) {
        if now - self.last_alarm > self.current_period * 2 {
            // No alarm for more than twice the current period, so we have
            // been in the desired state long enough to reset the backoff.
            self.current_period = self.default_period;
        }
    }

    /// Inform the system that we had to fall back to the conservative state.
    pub fn signal_alarm(&mut self, now: i64) {
        self.last_alarm = now;
        self.current_period = (self.current_period * 2).min(self.max_period);
    }

    /// True once we are out of the alarm period.
    pub fn is_good(&self, now: i64) -> bool {
        now - self.last_alarm > self.current_period
    }
}
