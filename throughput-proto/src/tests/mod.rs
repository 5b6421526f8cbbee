use std::time::Duration;

use assert_matches::assert_matches;

use crate::{
    gatt, loopback::Command, CentralConfig, DiscoveryState, Error, GattDb, ModeConfig,
    PeripheralConfig, Phy, StackError, State, TestType,
};

mod proptest;
mod util;
use util::*;

fn data_notifications(pair: &Pair) -> usize {
    let handle = GattDb::default().notifications;
    pair.peripheral
        .stack()
        .calls("send_notification")
        .filter(|c| {
            matches!(c, Command::Notification { characteristic, .. } if *characteristic == handle)
        })
        .count()
}

fn fixed_length_pair(bytes: u32) -> Pair {
    let mut central = CentralConfig::default();
    central.mtu(247);
    let mut peripheral = PeripheralConfig::default();
    peripheral
        .mtu(247)
        .notification_size(20)
        .mode(ModeConfig::fixed_length(bytes));
    Pair::new(central, peripheral)
}

#[test]
fn connect_and_subscribe() {
    let _guard = subscribe();
    let mut pair = Pair::default();
    pair.connect();

    use DiscoveryState::*;
    assert_eq!(
        pair.central.observer().discovery,
        [
            Scanning,
            Connecting,
            DiscoveringService,
            DiscoveringCharacteristics,
            EnablingNotification,
            EnablingIndication,
            EnablingTransmissionControl,
            SubscribingResult,
            Subscribed,
        ]
    );
    assert_eq!(
        pair.peripheral.observer().discovery,
        [
            DiscoveringService,
            DiscoveringCharacteristics,
            EnablingNotification,
            EnablingIndication,
            EnablingTransmissionControl,
            Subscribed,
        ]
    );

    let status = pair.central.status();
    assert!(status.notifications);
    assert!(status.indications);
    assert_eq!(status.connection.mtu_size, 247);
    assert_eq!(status.connection.pdu_size, 27);

    let sizes = pair.peripheral.payload_sizes();
    assert_eq!(sizes.notification(), 236);
    assert_eq!(sizes.indication(), 244);
}

#[test]
fn fixed_length_stops_on_fiftieth_send() {
    let _guard = subscribe();
    let mut pair = fixed_length_pair(1000);
    pair.connect();

    let now = pair.time;
    pair.peripheral.start(now, TestType::Notification.flag()).unwrap();
    let (central, peripheral) = pair.finish(Duration::from_secs(5));

    assert_eq!(data_notifications(&pair), 50);
    assert_eq!(peripheral.bytes, 1000);
    assert_eq!(peripheral.operations, 50);
    assert!(peripheral.throughput > 0);

    assert_eq!(central.bytes, 1000);
    assert_eq!(central.operations, 50);
    assert_eq!(central.lost, 0);
    assert_eq!(central.errors, 0);
    assert_eq!(central.peer_throughput, Some(peripheral.throughput));
    assert_eq!(pair.central.state(), State::Subscribed);
    assert_eq!(pair.peripheral.state(), State::Subscribed);
}

#[test]
fn central_started_indication_test() {
    let _guard = subscribe();
    let mut central = CentralConfig::default();
    central.mtu(247).test_type(TestType::Indication);
    let mut peripheral = PeripheralConfig::default();
    peripheral
        .mtu(247)
        .mode(ModeConfig::fixed_time(Duration::from_millis(200)));
    let mut pair = Pair::new(central, peripheral);
    pair.connect();

    let now = pair.time;
    pair.central.start(now).unwrap();
    assert_eq!(pair.central.state(), State::Test);
    let (central, peripheral) = pair.finish(Duration::from_secs(5));

    assert_eq!(central.test_type, Some(TestType::Indication));
    assert_eq!(peripheral.test_type, Some(TestType::Indication));
    assert!(peripheral.operations > 0);
    assert_eq!(central.operations, peripheral.operations);
    assert_eq!(central.lost, 0);
    assert!(peripheral.elapsed >= Duration::from_millis(200));
    assert_eq!(central.peer_throughput, Some(peripheral.throughput));
}

#[test]
fn lost_notifications_are_counted() {
    let _guard = subscribe();
    let mut pair = fixed_length_pair(2100);
    pair.peripheral
        .stack_mut()
        .drop_every(GattDb::default().notifications, 10);
    pair.connect();

    let now = pair.time;
    pair.central.start(now).unwrap();
    let (central, peripheral) = pair.finish(Duration::from_secs(5));

    assert_eq!(peripheral.operations, 105);
    assert_eq!(pair.peripheral.stack().dropped(), 10);
    assert_eq!(central.operations, 95);
    assert_eq!(central.bytes, 1900);
    assert_eq!(central.lost, 10);
    assert_eq!(central.errors, 0);
}

#[test]
fn refused_sends_are_retried() {
    let _guard = subscribe();
    let mut pair = fixed_length_pair(1000);
    pair.connect();
    for _ in 0..3 {
        pair.peripheral
            .stack_mut()
            .fail_next("send_notification", StackError::NO_MORE_RESOURCES);
    }

    let now = pair.time;
    pair.central.start(now).unwrap();
    let (central, peripheral) = pair.finish(Duration::from_secs(5));

    assert_eq!(data_notifications(&pair), 50);
    assert_eq!(peripheral.operations, 50);
    assert_eq!(central.bytes, 1000);
    assert_eq!(central.lost, 0);
}

#[test]
fn local_stop() {
    let _guard = subscribe();
    let mut pair = Pair::default();
    pair.connect();

    let now = pair.time;
    pair.central.start(now).unwrap();
    assert!(!pair.central.is_ok_to_sleep());
    pair.drive_for(Duration::from_millis(100)).unwrap();
    assert_eq!(pair.peripheral.state(), State::Test);
    pair.central.stop().unwrap();
    let (central, peripheral) = pair.finish(Duration::from_secs(5));

    assert!(central.bytes > 0);
    assert!(peripheral.bytes >= central.bytes);
    assert_eq!(central.lost, 0);
    assert_eq!(central.peer_throughput, Some(peripheral.throughput));
    assert!(pair.central.is_ok_to_sleep());
}

#[test]
fn central_stop_is_not_echoed_back() {
    let _guard = subscribe();
    let mut pair = Pair::default();
    pair.connect();

    let now = pair.time;
    pair.central.start(now).unwrap();
    pair.drive_for(Duration::from_millis(50)).unwrap();
    pair.central.stop().unwrap();
    let (central, peripheral) = pair.finish(Duration::from_secs(5));

    let control = GattDb::default().transmission_on;
    let echoed = pair
        .peripheral
        .stack()
        .calls("send_notification")
        .filter(|c| {
            matches!(c, Command::Notification { characteristic, value }
                if *characteristic == control && value[..] == [gatt::TRANSMISSION_OFF])
        })
        .count();
    assert_eq!(echoed, 0);
    assert_eq!(central.peer_throughput, Some(peripheral.throughput));
}

#[test]
fn disconnect_resets_and_rescans() {
    let _guard = subscribe();
    let mut pair = Pair::default();
    pair.connect();

    pair.peripheral.set_tx_power(5, false, false).unwrap();
    pair.drive().unwrap();

    let discovery = &pair.central.observer().discovery;
    let idle = discovery
        .iter()
        .position(|s| *s == DiscoveryState::Idle)
        .unwrap();
    assert_eq!(discovery[idle - 1], DiscoveryState::Subscribed);
    assert_eq!(discovery[idle + 1], DiscoveryState::Scanning);
    assert!(pair.central.observer().states.contains(&State::Disconnected));
    assert_eq!(pair.central.state(), State::Subscribed);
    assert_eq!(pair.peripheral.state(), State::Subscribed);
}

#[test]
fn discovery_failure_does_not_advance() {
    let _guard = subscribe();
    let mut pair = Pair::default();
    pair.central
        .stack_mut()
        .fail_next("discover_characteristics", StackError::FAILED);
    pair.enable().unwrap();

    let deadline = pair.after(Duration::from_secs(1));
    assert_matches!(
        pair.drive_until(deadline, |_| false),
        Err(Error::Stack(StackError::FAILED))
    );
    assert_eq!(
        pair.central.discovery_state(),
        DiscoveryState::DiscoveringService
    );
    assert_eq!(pair.central.state(), State::Connected);
}

#[test]
fn change_phy_falls_back_to_1m() {
    let _guard = subscribe();
    let mut pair = Pair::default();
    pair.connect();
    pair.central
        .stack_mut()
        .supported_phys(&[Phy::Le1M, Phy::Le2M]);

    pair.central.change_phy().unwrap();
    pair.drive().unwrap();
    assert_eq!(pair.central.status().phy, Phy::Le2M);
    assert_eq!(pair.peripheral.status().phy, Phy::Le2M);

    pair.central.change_phy().unwrap();
    pair.drive().unwrap();
    assert_eq!(pair.central.status().phy, Phy::Le1M);
}

#[test]
fn data_size_reconnects() {
    let _guard = subscribe();
    let mut pair = Pair::default();
    pair.connect();

    pair.peripheral.set_data_size(247, 0, 100).unwrap();
    pair.drive().unwrap();

    assert_eq!(pair.peripheral.state(), State::Subscribed);
    assert_eq!(pair.peripheral.payload_sizes().notification(), 100);
    assert!(pair
        .peripheral
        .observer()
        .states
        .contains(&State::Disconnected));
}

#[test]
fn settings_rejected_while_testing() {
    let _guard = subscribe();
    let mut pair = Pair::default();
    pair.connect();

    let now = pair.time;
    pair.central.start(now).unwrap();
    pair.drive_for(Duration::from_millis(10)).unwrap();
    assert_matches!(pair.central.set_type(2), Err(Error::InvalidState));
    assert_matches!(pair.central.start(now), Err(Error::InvalidState));
    assert_matches!(
        pair.peripheral.set_data_size(247, 0, 0),
        Err(Error::InvalidState)
    );
    assert_matches!(
        pair.peripheral.set_mode(ModeConfig::continuous()),
        Err(Error::InvalidState)
    );
}
