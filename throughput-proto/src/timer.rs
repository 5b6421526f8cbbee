use std::time::Instant;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub(crate) enum Timer {
    /// When to poll the stack for a fresh RSSI reading
    RssiRefresh = 0,
    /// When to give up waiting for an indication confirmation
    IndicationTimeout = 1,
    /// When to give up waiting for the peer's result indication
    ResultTimeout = 2,
}

impl Timer {
    pub(crate) const VALUES: [Self; 3] = [
        Self::RssiRefresh,
        Self::IndicationTimeout,
        Self::ResultTimeout,
    ];
}

/// Keeps track of the nearest timeout for each `Timer`
///
/// The [`TimerTable`] is advanced with [`TimerTable::expire_before`].
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct TimerTable {
    data: [Option<Instant>; Timer::VALUES.len()],
}

impl TimerTable {
    /// Sets the timer unconditionally
    pub(crate) fn set(&mut self, timer: Timer, time: Instant) {
        self.data[timer as usize] = Some(time);
    }

    pub(crate) fn stop(&mut self, timer: Timer) {
        self.data[timer as usize] = None;
    }

    /// Get the next queued timeout
    pub(crate) fn peek(&self) -> Option<Instant> {
        self.data.iter().filter_map(|&x| x).min()
    }

    /// Remove the next timer up until `now`, including it
    pub(crate) fn expire_before(&mut self, now: Instant) -> Option<(Timer, Instant)> {
        for timer in Timer::VALUES {
            match self.data[timer as usize] {
                Some(time) if time <= now => {
                    self.data[timer as usize] = None;
                    return Some((timer, time));
                }
                _ => {}
            }
        }
        None
    }

    pub(crate) fn reset(&mut self) {
        self.data = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timer_table() {
        let mut timers = TimerTable::default();
        let sec = Duration::from_secs(1);
        let now = Instant::now() + Duration::from_secs(10);
        timers.set(Timer::RssiRefresh, now - 3 * sec);
        timers.set(Timer::ResultTimeout, now - 2 * sec);
        timers.set(Timer::IndicationTimeout, now + sec);

        assert_eq!(timers.peek(), Some(now - 3 * sec));
        assert_eq!(
            timers.expire_before(now),
            Some((Timer::RssiRefresh, now - 3 * sec))
        );
        assert_eq!(
            timers.expire_before(now),
            Some((Timer::ResultTimeout, now - 2 * sec))
        );
        assert_eq!(timers.expire_before(now), None);
        assert_eq!(timers.peek(), Some(now + sec));
    }

    #[test]
    fn stop_and_reset() {
        let mut timers = TimerTable::default();
        let now = Instant::now();
        timers.set(Timer::RssiRefresh, now);
        timers.set(Timer::IndicationTimeout, now);
        timers.stop(Timer::RssiRefresh);
        assert_eq!(timers.peek(), Some(now));
        assert_eq!(
            timers.expire_before(now),
            Some((Timer::IndicationTimeout, now))
        );
        timers.set(Timer::RssiRefresh, now);
        timers.reset();
        assert_eq!(timers.peek(), None);
    }
}
