use std::{
    io::{self, Write},
    ops::{Deref, DerefMut},
    str,
    time::{Duration, Instant},
};

use crate::{
    loopback::Loopback, CentralConfig, DiscoveryState, Observer, PeripheralConfig, State,
    TestReport,
};

/// Observer that keeps everything it is told
#[derive(Debug, Default)]
pub(super) struct Recorder {
    pub(super) states: Vec<State>,
    pub(super) discovery: Vec<DiscoveryState>,
    pub(super) started: usize,
    pub(super) reports: Vec<TestReport>,
}

impl Observer for Recorder {
    fn on_state_change(&mut self, state: State) {
        self.states.push(state);
    }

    fn on_discovery_state_change(&mut self, state: DiscoveryState) {
        self.discovery.push(state);
    }

    fn on_start(&mut self) {
        self.started += 1;
    }

    fn on_finish(&mut self, report: &TestReport) {
        self.reports.push(*report);
    }
}

pub(super) struct Pair {
    link: Loopback<Recorder, Recorder>,
}

impl Pair {
    pub(super) fn new(central: CentralConfig, peripheral: PeripheralConfig) -> Self {
        let mut link =
            Loopback::with_observers(central, Recorder::default(), peripheral, Recorder::default());
        link.pdu_size = 27;
        Self { link }
    }

    /// Enable both sides and run until they are subscribed to each other
    pub(super) fn connect(&mut self) {
        self.enable().unwrap();
        let deadline = self.after(Duration::from_secs(5));
        let subscribed = self
            .drive_until(deadline, |link| {
                link.central.state() == State::Subscribed
                    && link.peripheral.state() == State::Subscribed
            })
            .unwrap();
        assert!(subscribed, "roles never subscribed");
    }

    /// Run until both sides reported another finished test
    pub(super) fn finish(&mut self, limit: Duration) -> (TestReport, TestReport) {
        let central = self.central.observer().reports.len();
        let peripheral = self.peripheral.observer().reports.len();
        let deadline = self.after(limit);
        let done = self
            .drive_until(deadline, |link| {
                link.central.observer().reports.len() > central
                    && link.peripheral.observer().reports.len() > peripheral
            })
            .unwrap();
        assert!(done, "test did not finish on both sides");
        (
            *self.central.observer().reports.last().unwrap(),
            *self.peripheral.observer().reports.last().unwrap(),
        )
    }

    pub(super) fn after(&self, duration: Duration) -> Instant {
        self.time + duration
    }
}

impl Default for Pair {
    fn default() -> Self {
        let mut central = CentralConfig::default();
        central.mtu(247);
        let mut peripheral = PeripheralConfig::default();
        peripheral.mtu(247);
        Self::new(central, peripheral)
    }
}

impl Deref for Pair {
    type Target = Loopback<Recorder, Recorder>;
    fn deref(&self) -> &Self::Target {
        &self.link
    }
}

impl DerefMut for Pair {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.link
    }
}

pub(super) fn subscribe() -> tracing::subscriber::DefaultGuard {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(|| TestWriter)
        .finish();
    tracing::subscriber::set_default(sub)
}

struct TestWriter;

impl Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        print!(
            "{}",
            str::from_utf8(buf).expect("tried to log invalid UTF-8")
        );
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}
