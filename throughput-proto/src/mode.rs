use std::{fmt, time::Duration, time::Instant};

/// How a test run decides when to stop
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum TestMode {
    /// Run until stopped explicitly
    #[default]
    Continuous = 0,
    /// Stop once a configured number of bytes has been transferred
    FixedLength = 1,
    /// Stop once a configured time has elapsed
    FixedTime = 2,
}

impl TestMode {
    /// Decode the console/wire value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TestMode::Continuous),
            1 => Some(TestMode::FixedLength),
            2 => Some(TestMode::FixedTime),
            _ => None,
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match *self {
            TestMode::Continuous => "continuous",
            TestMode::FixedLength => "fixed length",
            TestMode::FixedTime => "fixed time",
        })
    }
}

/// Stop condition of a test run
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct ModeConfig {
    /// Selected mode
    pub mode: TestMode,
    /// Byte limit for [`TestMode::FixedLength`]
    pub fixed_data_size: u32,
    /// Time limit for [`TestMode::FixedTime`]
    pub fixed_time: Duration,
}

impl ModeConfig {
    /// A configuration that runs until stopped
    pub fn continuous() -> Self {
        Self::default()
    }

    /// A configuration that stops after `bytes`
    pub fn fixed_length(bytes: u32) -> Self {
        Self {
            mode: TestMode::FixedLength,
            fixed_data_size: bytes,
            ..Self::default()
        }
    }

    /// A configuration that stops after `time`
    pub fn fixed_time(time: Duration) -> Self {
        Self {
            mode: TestMode::FixedTime,
            fixed_time: time,
            ..Self::default()
        }
    }
}

/// Result of a finished or running measurement
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Measurement {
    /// Payload bytes transferred
    pub bytes: u32,
    /// Notifications or indications transferred
    pub operations: u32,
    /// Time since the test started
    pub elapsed: Duration,
    /// Throughput in bits per second
    pub throughput: u32,
}

/// Counts transferred data against the configured stop condition
#[derive(Debug, Clone, Default)]
pub struct ModeController {
    config: ModeConfig,
    bytes: u32,
    operations: u32,
    started: Option<Instant>,
}

impl ModeController {
    /// Create an idle controller
    pub fn new(config: ModeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Current configuration
    pub fn config(&self) -> ModeConfig {
        self.config
    }

    /// Change the stop condition for subsequent runs
    pub fn set_config(&mut self, config: ModeConfig) {
        self.config = config;
    }

    /// Begin a run at `now`, clearing previous counts
    pub fn start(&mut self, now: Instant) {
        self.bytes = 0;
        self.operations = 0;
        self.started = Some(now);
    }

    /// Clear counts and forget the start time
    pub fn reset(&mut self) {
        self.bytes = 0;
        self.operations = 0;
        self.started = None;
    }

    /// Whether a run has been started since the last reset
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Count one successful operation of `bytes`
    ///
    /// Returns `true` when a fixed-length run has reached its limit.
    pub fn record(&mut self, bytes: u32) -> bool {
        self.bytes = self.bytes.saturating_add(bytes);
        self.operations = self.operations.saturating_add(1);
        self.length_reached()
    }

    /// Whether a fixed-length run has reached its limit
    pub fn length_reached(&self) -> bool {
        self.config.mode == TestMode::FixedLength && self.bytes >= self.config.fixed_data_size
    }

    /// Whether a fixed-time run has run out of time at `now`
    pub fn time_expired(&self, now: Instant) -> bool {
        self.config.mode == TestMode::FixedTime && self.elapsed(now) >= self.config.fixed_time
    }

    /// Time since [`start`](Self::start), zero when not running
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started
            .map_or(Duration::ZERO, |start| now.saturating_duration_since(start))
    }

    /// Bytes counted in the current run
    pub fn bytes(&self) -> u32 {
        self.bytes
    }

    /// Operations counted in the current run
    pub fn operations(&self) -> u32 {
        self.operations
    }

    /// Snapshot of the current run
    pub fn measure(&self, now: Instant) -> Measurement {
        let elapsed = self.elapsed(now);
        Measurement {
            bytes: self.bytes,
            operations: self.operations,
            elapsed,
            throughput: throughput(self.bytes, elapsed),
        }
    }
}

/// Bits per second for `bytes` over `elapsed`, 0 when no time has passed
pub(crate) fn throughput(bytes: u32, elapsed: Duration) -> u32 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (f64::from(bytes) * 8.0 / secs).min(f64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_length_fiftieth_send() {
        let mut ctl = ModeController::new(ModeConfig::fixed_length(1000));
        ctl.start(Instant::now());
        for _ in 0..49 {
            assert!(!ctl.record(20));
        }
        assert!(ctl.record(20));
        assert_eq!(ctl.operations(), 50);
    }

    #[test]
    fn continuous_never_stops() {
        let mut ctl = ModeController::new(ModeConfig::continuous());
        let now = Instant::now();
        ctl.start(now);
        assert!(!ctl.record(u32::MAX));
        assert!(!ctl.time_expired(now + Duration::from_secs(3600)));
    }

    #[test]
    fn fixed_time() {
        let mut ctl = ModeController::new(ModeConfig::fixed_time(Duration::from_secs(5)));
        let now = Instant::now();
        ctl.start(now);
        assert!(!ctl.time_expired(now + Duration::from_millis(4999)));
        assert!(ctl.time_expired(now + Duration::from_secs(5)));
    }

    #[test]
    fn measurement() {
        let mut ctl = ModeController::new(ModeConfig::continuous());
        let now = Instant::now();
        assert_eq!(ctl.measure(now).throughput, 0);
        ctl.start(now);
        ctl.record(500);
        ctl.record(500);
        assert_eq!(ctl.measure(now).throughput, 0);
        let m = ctl.measure(now + Duration::from_secs(2));
        assert_eq!(m.bytes, 1000);
        assert_eq!(m.operations, 2);
        assert_eq!(m.throughput, 4000);
    }

    #[test]
    fn start_clears_counts() {
        let mut ctl = ModeController::new(ModeConfig::fixed_length(10));
        let now = Instant::now();
        ctl.start(now);
        assert!(ctl.record(10));
        ctl.start(now);
        assert_eq!(ctl.bytes(), 0);
        assert!(!ctl.length_reached());
    }
}
