//! Line-oriented command console over a loopback link
//!
//! Each line names one command and its arguments. The response is whatever the command prints
//! followed by `OK`, or `ERROR` when the command is unknown, malformed or refused by the role.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use throughput_proto::{
    loopback::{Loopback, SimStack},
    Address, CentralConfig, ConnectionParameters, ModeConfig, PeripheralConfig, Phy, Role, State,
    TestMode, TestType,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::{parse_phy, parse_test_type, run::connect};

/// Serves the console on stdin and stdout
#[derive(Parser)]
#[clap(name = "console")]
pub struct Opt {
    /// Role the commands act on: central or peripheral
    #[clap(long, default_value = "peripheral", value_parser = parse_role)]
    role: Role,
    /// Simulated time to run the link after each command, in milliseconds
    #[clap(long, default_value = "100")]
    settle: u64,
}

fn parse_role(s: &str) -> Result<Role> {
    match s {
        "central" | "c" => Ok(Role::Central),
        "peripheral" | "p" => Ok(Role::Peripheral),
        _ => bail!("unknown role {s:?}"),
    }
}

pub async fn run(opt: Opt) -> Result<()> {
    let mut console = Console::new(opt.role, Duration::from_millis(opt.settle))?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = console.execute(&line);
        stdout.write_all(response.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    disable_help_flag = true,
    disable_help_subcommand = true
)]
struct Line {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "snake_case")]
enum Command {
    /// Start a test of the given type
    Start {
        #[arg(value_parser = parse_test_type)]
        test_type: Option<TestType>,
    },
    /// Stop the running test
    Stop,
    /// Print state and role
    Status,
    /// Set the stop condition: 0 continuous, 1 fixed length in bytes, 2 fixed time in seconds
    ModeSet { mode: u8, amount: u32 },
    ModeGet,
    /// Set TX power in dBm, power control and deep sleep
    TxPowerSet {
        #[arg(allow_negative_numbers = true)]
        power: i16,
        control: u8,
        sleep: u8,
    },
    TxPowerGet,
    /// Set the MTU, and on the peripheral the indication and notification sizes
    DataSet {
        mtu: u16,
        indication_size: Option<u16>,
        notification_size: Option<u16>,
    },
    DataGet,
    PhyScanSet {
        #[arg(value_parser = parse_phy)]
        phy: Phy,
    },
    PhyConnSet {
        #[arg(value_parser = parse_phy)]
        phy: Phy,
    },
    PhyGet,
    ConnectionSet {
        min_interval: u16,
        max_interval: u16,
        latency: u16,
        timeout: u16,
    },
    ConnectionGet,
    AllowlistAdd { address: Address },
    AllowlistClear,
}

/// Runs console commands against one role of a loopback link
pub struct Console {
    link: Loopback,
    role: Role,
    settle: Duration,
}

impl Console {
    /// Link a central and a peripheral, connect them, and act on `role`
    pub fn new(role: Role, settle: Duration) -> Result<Self> {
        let mut link = Loopback::new(CentralConfig::default(), PeripheralConfig::default())
            .with_stacks(
                SimStack::new().without_history(),
                SimStack::new().without_history(),
            );
        link.enable()?;
        connect(&mut link)?;
        Ok(Self { link, role, settle })
    }

    /// The link the console drives
    pub fn link(&self) -> &Loopback {
        &self.link
    }

    /// Run one command line and return the full response
    pub fn execute(&mut self, line: &str) -> String {
        let result = Line::try_parse_from(line.split_whitespace())
            .map_err(anyhow::Error::from)
            .and_then(|parsed| self.dispatch(parsed.command));
        let mut out = match result {
            Ok(out) => out,
            Err(e) => {
                debug!(line, error = %e, "command failed");
                return "ERROR\n".into();
            }
        };
        if let Err(e) = self.link.drive_for(self.settle) {
            warn!(error = %e, "link failed after command");
            return "ERROR\n".into();
        }
        out.push_str("OK\n");
        out
    }

    fn dispatch(&mut self, command: Command) -> Result<String> {
        match self.role {
            Role::Central => self.central(command),
            Role::Peripheral => self.peripheral(command),
        }
    }

    fn peripheral(&mut self, command: Command) -> Result<String> {
        let now = self.link.time;
        let p = &mut self.link.peripheral;
        let mut out = String::new();
        match command {
            Command::Start { test_type } => {
                p.start(now, test_type.unwrap_or(TestType::Notification).flag())?
            }
            Command::Stop => p.stop()?,
            Command::Status => status(&mut out, p.state(), Role::Peripheral),
            Command::ModeSet { mode, amount } => p.set_mode(mode_config(mode, amount)?)?,
            Command::ModeGet => mode_get(&mut out, p.status().mode),
            Command::TxPowerSet {
                power,
                control,
                sleep,
            } => p.set_tx_power(power, control != 0, sleep != 0)?,
            Command::TxPowerGet => {
                let s = p.status();
                tx_power_get(&mut out, s.tx_power_requested, s.power_control, s.deep_sleep)
            }
            Command::DataSet {
                mtu,
                indication_size,
                notification_size,
            } => p.set_data_size(
                mtu,
                indication_size.unwrap_or_default(),
                notification_size.unwrap_or_default(),
            )?,
            Command::DataGet => {
                let sizes = p.payload_sizes();
                out.push_str("MTU, indication size, notification size\n");
                out.push_str(&format!(
                    "{} {} {}\n",
                    p.mtu(),
                    sizes.requested_indication(),
                    sizes.requested_notification()
                ));
            }
            _ => bail!("not a peripheral command"),
        }
        Ok(out)
    }

    fn central(&mut self, command: Command) -> Result<String> {
        let now = self.link.time;
        let c = &mut self.link.central;
        let mut out = String::new();
        match command {
            Command::Start { test_type } => {
                if let Some(ty) = test_type {
                    c.set_type(ty.flag())?;
                }
                c.start(now)?
            }
            Command::Stop => c.stop()?,
            Command::Status => status(&mut out, c.state(), Role::Central),
            Command::ModeSet { mode, amount } => c.set_mode(mode_config(mode, amount)?)?,
            Command::ModeGet => mode_get(&mut out, c.status().mode),
            Command::TxPowerSet {
                power,
                control,
                sleep,
            } => c.set_tx_power(power, control != 0, sleep != 0)?,
            Command::TxPowerGet => {
                let s = c.status();
                tx_power_get(&mut out, s.tx_power_requested, s.power_control, s.deep_sleep)
            }
            Command::DataSet {
                mtu,
                indication_size: None,
                notification_size: None,
            } => c.set_mtu_size(mtu)?,
            Command::DataSet { .. } => bail!("the central only sets the MTU"),
            Command::DataGet => {
                out.push_str("MTU\n");
                out.push_str(&format!("{}\n", c.status().connection.mtu_size));
            }
            Command::PhyScanSet { phy } => c.set_scan_phy(phy)?,
            Command::PhyConnSet { phy } => match c.state() {
                State::Disconnected => c.set_default_phy(phy)?,
                _ => c.set_connection_phy(phy)?,
            },
            Command::PhyGet => {
                let s = c.status();
                out.push_str("Scan PHY, connection PHY\n");
                out.push_str(&format!("{} {}\n", s.scan_phy, s.phy));
            }
            Command::ConnectionSet {
                min_interval,
                max_interval,
                latency,
                timeout,
            } => {
                let params = ConnectionParameters {
                    min_interval,
                    max_interval,
                    latency,
                    timeout,
                };
                match c.state() {
                    State::Connected | State::Subscribed => c.set_connection_parameters(params)?,
                    _ => c.set_default_connection_parameters(params)?,
                }
            }
            Command::ConnectionGet => {
                let p = c.status().requested_parameters;
                out.push_str("Min interval, max interval, latency, timeout\n");
                out.push_str(&format!(
                    "{} {} {} {}\n",
                    p.min_interval, p.max_interval, p.latency, p.timeout
                ));
            }
            Command::AllowlistAdd { address } => {
                c.allowlist_add(address)?;
            }
            Command::AllowlistClear => c.allowlist_clear()?,
        }
        Ok(out)
    }
}

fn mode_config(mode: u8, amount: u32) -> Result<ModeConfig> {
    Ok(match TestMode::from_u8(mode) {
        Some(TestMode::Continuous) => ModeConfig::continuous(),
        Some(TestMode::FixedLength) => ModeConfig::fixed_length(amount),
        Some(TestMode::FixedTime) => {
            ModeConfig::fixed_time(Duration::from_secs(u64::from(amount)))
        }
        None => bail!("unknown mode {mode}"),
    })
}

fn status(out: &mut String, state: State, role: Role) {
    out.push_str(&format!("State: {state}\n"));
    out.push_str(&format!("Role: {role}\n"));
}

fn mode_get(out: &mut String, mode: ModeConfig) {
    let amount = match mode.mode {
        TestMode::Continuous => 0,
        TestMode::FixedLength => u64::from(mode.fixed_data_size),
        TestMode::FixedTime => mode.fixed_time.as_secs(),
    };
    out.push_str("Mode, amount\n");
    out.push_str(&format!("{} {}\n", mode.mode as u8, amount));
}

fn tx_power_get(out: &mut String, power: i16, control: bool, sleep: bool) {
    out.push_str("TX power, power control, deep sleep\n");
    out.push_str(&format!("{} {} {}\n", power, u8::from(control), u8::from(sleep)));
}
