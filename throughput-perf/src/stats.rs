use std::time::{Duration, Instant, SystemTime};

use throughput_proto::TestReport;
#[cfg(feature = "json-output")]
use {std::fs::File, std::io, std::path::Path};

/// Reports of both sides for every finished test
pub struct Stats {
    /// Run start time
    start_instant: Instant,
    /// Run start system time
    start: SystemTime,
    rounds: Vec<Round>,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            start_instant: Instant::now(),
            start: SystemTime::now(),
            rounds: Vec::new(),
        }
    }
}

/// One finished test
#[derive(Debug, Copy, Clone)]
pub struct Round {
    /// What the receiving side counted
    pub central: TestReport,
    /// What the transmitting side counted
    pub peripheral: TestReport,
}

impl Stats {
    pub fn record(&mut self, central: TestReport, peripheral: TestReport) {
        self.rounds.push(Round {
            central,
            peripheral,
        });
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    /// Mean of the received throughput over all rounds, in bit/s
    pub fn mean_throughput(&self) -> u32 {
        if self.rounds.is_empty() {
            return 0;
        }
        let sum = self
            .rounds
            .iter()
            .map(|r| u64::from(r.central.throughput))
            .sum::<u64>();
        (sum / self.rounds.len() as u64) as u32
    }

    pub fn print(&self) {
        let dt = self.start_instant.elapsed();
        let simulated = self
            .rounds
            .iter()
            .map(|r| r.central.elapsed)
            .sum::<Duration>();

        println!("Overall stats:");
        println!(
            "Rounds: {} ({:4.2?} simulated in {:4.2?})",
            self.rounds.len(),
            simulated,
            dt,
        );
        println!();

        println!("Round metrics:\n");

        println!("      │ Sent       │ Received   │ Ops    │ Lost │ Errors │ TX Throughput  │ RX Throughput");
        println!("──────┼────────────┼────────────┼────────┼──────┼────────┼────────────────┼───────────────");

        for (i, round) in self.rounds.iter().enumerate() {
            println!(
                " {:>4} │ {:>10} │ {:>10} │ {:>6} │ {:>4} │ {:>6} │ {:>8.2} kbit/s │ {:>8.2} kbit/s",
                i + 1,
                round.peripheral.bytes,
                round.central.bytes,
                round.central.operations,
                round.central.lost,
                round.central.errors,
                kbits(round.peripheral.throughput),
                kbits(round.central.throughput),
            );
        }
        println!();

        let rx = self.rounds.iter().map(|r| r.central.throughput);
        if let (Some(min), Some(max)) = (rx.clone().min(), rx.max()) {
            println!(
                "RX throughput: AVG {:.2} kbit/s, MIN {:.2} kbit/s, MAX {:.2} kbit/s",
                kbits(self.mean_throughput()),
                kbits(min),
                kbits(max),
            );
            println!();
        }
    }

    #[cfg(feature = "json-output")]
    pub fn print_json(&self, path: &Path) -> io::Result<()> {
        match path {
            path if path == Path::new("-") => json::print(self, std::io::stdout())?,
            _ => {
                let file = File::create(path)?;
                json::print(self, file)?
            }
        }
        Ok(())
    }
}

fn kbits(bps: u32) -> f64 {
    f64::from(bps) / 1000.0
}

#[cfg(feature = "json-output")]
mod json {
    use std::io::{self, Write};
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde::Serialize;

    use crate::stats::Stats;

    pub(crate) fn print<W: Write>(stats: &Stats, out: W) -> io::Result<()> {
        let report = Report {
            start: Start {
                timestamp: stats.start,
            },
            rounds: stats.rounds.iter().map(Round::from_stats_round).collect(),
            mean_throughput: stats.mean_throughput(),
        };

        serde_json::to_writer(out, &report).map_err(io::Error::from)
    }

    #[derive(Serialize)]
    struct Report {
        start: Start,
        rounds: Vec<Round>,
        mean_throughput: u32,
    }

    #[derive(Serialize)]
    struct Start {
        #[serde(serialize_with = "serialize_timestamp")]
        timestamp: SystemTime,
    }

    fn serialize_timestamp<S>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let secs = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let mut state = s.serialize_map(Some(1))?;
        state.serialize_entry("timesecs", &secs)?;
        state.end()
    }

    #[derive(Serialize)]
    struct Round {
        test_type: Option<&'static str>,
        seconds: f64,
        bytes_sent: u32,
        bytes_received: u32,
        operations: u32,
        lost: u32,
        errors: u32,
        tx_bits_per_second: u32,
        rx_bits_per_second: u32,
        peer_bits_per_second: Option<u32>,
    }

    impl Round {
        fn from_stats_round(round: &super::Round) -> Self {
            let (central, peripheral) = (&round.central, &round.peripheral);
            Self {
                test_type: peripheral.test_type.map(|ty| match ty {
                    throughput_proto::TestType::Notification => "notification",
                    throughput_proto::TestType::Indication => "indication",
                }),
                seconds: central.elapsed.as_secs_f64(),
                bytes_sent: peripheral.bytes,
                bytes_received: central.bytes,
                operations: central.operations,
                lost: central.lost,
                errors: central.errors,
                tx_bits_per_second: peripheral.throughput,
                rx_bits_per_second: central.throughput,
                peer_bits_per_second: central.peer_throughput,
            }
        }
    }
}
