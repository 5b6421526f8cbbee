use proptest::prop_assert_eq;
use test_strategy::proptest;

use crate::{
    payload::{self, PayloadSizer, GATT_HEADER, L2CAP_HEADER},
    sequence::COUNTER_MODULUS,
    tests::{subscribe, Pair},
    CentralConfig, GattDb, ModeConfig, PayloadGenerator, PeripheralConfig, SequenceTracker,
};

fn packet(counter: u8, len: usize) -> Vec<u8> {
    let mut generator = PayloadGenerator::new();
    for _ in 0..counter {
        generator.generate(0);
    }
    generator.generate(len).to_vec()
}

#[proptest]
fn in_order_stream_has_no_loss(
    #[strategy(0u8..100)] skip: u8,
    #[strategy(1usize..400)] packets: usize,
    #[strategy(1usize..=255)] len: usize,
) {
    let mut generator = PayloadGenerator::new();
    for _ in 0..skip {
        generator.generate(0);
    }
    let mut tracker = SequenceTracker::new();
    for _ in 0..packets {
        tracker.check(generator.generate(len));
    }
    prop_assert_eq!(tracker.lost(), 0);
    prop_assert_eq!(tracker.errors(), 0);
}

#[proptest]
fn counter_jump_is_charged_as_loss(
    #[strategy(0u8..100)] first: u8,
    #[strategy(1u8..100)] jump: u8,
) {
    let mut tracker = SequenceTracker::new();
    tracker.check(&packet(first, 10));
    let next = (first + 1 + jump) % COUNTER_MODULUS;
    tracker.check(&packet(next, 10));
    prop_assert_eq!(tracker.lost(), u32::from(jump));
    prop_assert_eq!(tracker.errors(), 0);
}

#[proptest]
fn empty_payload_is_an_error_not_a_loss(#[strategy(0u8..100)] first: u8) {
    let mut tracker = SequenceTracker::new();
    tracker.check(&packet(first, 10));
    tracker.check(&[]);
    prop_assert_eq!(tracker.errors(), 1);
    prop_assert_eq!(tracker.lost(), 0);
}

#[proptest]
fn sizer_is_idempotent(
    #[strategy(0u16..300)] pdu: u16,
    #[strategy(0u16..300)] mtu: u16,
    #[strategy(0u16..300)] notification: u16,
    #[strategy(0u16..300)] indication: u16,
) {
    let mut sizer = PayloadSizer::new(notification, indication);
    sizer.update(pdu, mtu);
    let once = sizer;
    sizer.update(pdu, mtu);
    prop_assert_eq!(sizer, once);
}

#[proptest]
fn notifications_fit_the_mtu(
    #[strategy(27u16..=251)] pdu: u16,
    #[strategy(23u16..=250)] mtu: u16,
) {
    let size = payload::notification_size(pdu, mtu, 0).unwrap();
    prop_assert_eq!(size.min(mtu - GATT_HEADER), size);
    if pdu <= mtu {
        // Whole PDUs once the L2CAP and ATT headers are added back
        prop_assert_eq!((size + GATT_HEADER + L2CAP_HEADER) % pdu, 0);
    }
}

#[proptest(cases = 16)]
fn loss_matches_dropped_notifications(#[strategy(2u32..20)] every: u32) {
    let _guard = subscribe();
    let mut central = CentralConfig::default();
    central.mtu(247);
    let mut peripheral = PeripheralConfig::default();
    peripheral
        .mtu(247)
        .notification_size(20)
        .mode(ModeConfig::fixed_length(20 * (every * 8 + 1)));
    let mut pair = Pair::new(central, peripheral);
    pair.peripheral
        .stack_mut()
        .drop_every(GattDb::default().notifications, every);
    pair.connect();

    let now = pair.time;
    pair.central.start(now).unwrap();
    let (central, peripheral) = pair.finish(std::time::Duration::from_secs(10));

    prop_assert_eq!(pair.peripheral.stack().dropped(), 8);
    prop_assert_eq!(central.lost, 8);
    prop_assert_eq!(central.operations + 8, peripheral.operations);
}
