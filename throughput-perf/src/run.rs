#[cfg(feature = "json-output")]
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use throughput_proto::{
    loopback::{Loopback, SimStack},
    CentralConfig, GattDb, ModeConfig, Observer, PeripheralConfig, Phy, State, TestReport,
    TestType,
};
use tracing::{debug, info};

use crate::{parse_byte_size, parse_phy, parse_test_type, stats::Stats};

/// Runs throughput tests between a simulated central and peripheral and reports what each side
/// measured
#[derive(Parser)]
#[clap(name = "run")]
pub struct Opt {
    /// Data mechanism: notification or indication
    #[clap(long, default_value = "notification", value_parser = parse_test_type)]
    test_type: TestType,
    /// Stop each test after this many bytes
    ///
    /// This can use SI suffixes for sizes. For example, 10k will transfer
    /// 10KiB, 1M will transfer 1MiB.
    #[clap(long, value_parser = parse_byte_size, conflicts_with = "time")]
    length: Option<u32>,
    /// Stop each test after this many seconds of simulated time
    #[clap(long, default_value = "1")]
    time: u64,
    /// Number of tests to run
    #[clap(long, default_value = "1")]
    rounds: u32,
    /// Largest ATT MTU either side negotiates
    #[clap(long, default_value = "247")]
    mtu: u16,
    /// Link-layer PDU payload size of the simulated link
    #[clap(long, default_value = "251")]
    pdu_size: u16,
    /// Notification payload size, 0 to derive it from the link
    #[clap(long, default_value = "0")]
    notification_size: u16,
    /// Indication payload size, 0 to derive it from the link
    #[clap(long, default_value = "0")]
    indication_size: u16,
    /// Connection PHY the central requests
    #[clap(long, default_value = "1M", value_parser = parse_phy)]
    phy: Phy,
    /// Lose every nth data notification on the link
    #[clap(long)]
    drop_every: Option<u32>,
    /// Start tests from the central instead of the peripheral
    #[clap(long)]
    from_central: bool,
    /// Give up on a test after this many seconds of simulated time
    #[clap(long, default_value = "600")]
    timeout: u64,
    /// File path to output JSON statistics to. If the file is '-', stdout will be used
    #[cfg(feature = "json-output")]
    #[clap(long)]
    json: Option<PathBuf>,
}

impl Opt {
    fn mode(&self) -> ModeConfig {
        match self.length {
            Some(bytes) => ModeConfig::fixed_length(bytes),
            None => ModeConfig::fixed_time(Duration::from_secs(self.time)),
        }
    }

    fn link(&self) -> Loopback<Collector, Collector> {
        let mode = self.mode();
        let mut central = CentralConfig::default();
        central
            .mode(mode)
            .test_type(self.test_type)
            .mtu(self.mtu)
            .phy(self.phy);
        let mut peripheral = PeripheralConfig::default();
        peripheral
            .mode(mode)
            .mtu(self.mtu)
            .notification_size(self.notification_size)
            .indication_size(self.indication_size);

        let mut peripheral_stack = SimStack::new().without_history();
        if let Some(n) = self.drop_every {
            peripheral_stack.drop_every(GattDb::default().notifications, n);
        }
        let mut link = Loopback::with_observers(
            central,
            Collector::default(),
            peripheral,
            Collector::default(),
        )
        .with_stacks(SimStack::new().without_history(), peripheral_stack);
        link.pdu_size = self.pdu_size;
        link
    }
}

/// Observer that keeps the reports of finished tests
#[derive(Debug, Default)]
pub struct Collector {
    finished: Vec<TestReport>,
}

impl Collector {
    pub fn finished(&self) -> &[TestReport] {
        &self.finished
    }
}

impl Observer for Collector {
    fn on_finish(&mut self, report: &TestReport) {
        info!(%report, "test finished");
        self.finished.push(*report);
    }
}

pub async fn run(opt: Opt) -> Result<()> {
    let mut link = opt.link();
    link.enable().context("enabling roles")?;
    connect(&mut link)?;
    info!(
        mtu = link.central.status().connection.mtu_size,
        phy = %link.central.status().phy,
        "roles subscribed"
    );

    let mut stats = Stats::default();
    tokio::select! {
        res = rounds(&mut link, &opt, &mut stats) => res?,
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    stats.print();

    #[cfg(feature = "json-output")]
    if let Some(path) = &opt.json {
        stats.print_json(path).context("writing JSON report")?;
    }

    Ok(())
}

/// Run until both roles are subscribed to each other
pub fn connect<CO: Observer, PO: Observer>(link: &mut Loopback<CO, PO>) -> Result<()> {
    let deadline = link.time + Duration::from_secs(10);
    let subscribed = link
        .drive_until(deadline, |link| {
            link.central.state() == State::Subscribed
                && link.peripheral.state() == State::Subscribed
        })
        .context("connecting")?;
    if !subscribed {
        bail!(
            "roles did not subscribe: central {}, peripheral {}",
            link.central.state(),
            link.peripheral.state()
        );
    }
    Ok(())
}

async fn rounds(
    link: &mut Loopback<Collector, Collector>,
    opt: &Opt,
    stats: &mut Stats,
) -> Result<()> {
    for round in 0..opt.rounds {
        let (central, peripheral) = run_one(link, opt).with_context(|| format!("round {round}"))?;
        debug!(round, %central, %peripheral, "round finished");
        stats.record(central, peripheral);
        tokio::task::yield_now().await;
    }
    Ok(())
}

/// Start one test and run it to completion on both sides
fn run_one(
    link: &mut Loopback<Collector, Collector>,
    opt: &Opt,
) -> Result<(TestReport, TestReport)> {
    let central = link.central.observer().finished().len();
    let peripheral = link.peripheral.observer().finished().len();

    let now = link.time;
    match opt.from_central {
        true => {
            link.central.set_type(opt.test_type.flag())?;
            link.central.start(now)?;
        }
        false => link.peripheral.start(now, opt.test_type.flag())?,
    }

    let deadline = link.time + Duration::from_secs(opt.timeout);
    let done = link.drive_until(deadline, |link| {
        link.central.observer().finished().len() > central
            && link.peripheral.observer().finished().len() > peripheral
    })?;
    if !done {
        bail!("test did not finish within {}s", opt.timeout);
    }

    // Let the link settle so the next start sees both sides subscribed
    link.drive()?;
    match (
        link.central.observer().finished().last(),
        link.peripheral.observer().finished().last(),
    ) {
        (Some(c), Some(p)) => Ok((*c, *p)),
        _ => bail!("missing test report"),
    }
}
