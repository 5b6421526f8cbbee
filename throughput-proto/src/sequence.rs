use crate::payload::MAX_PAYLOAD;

/// Modulus of the leading packet counter
pub const COUNTER_MODULUS: u8 = 100;

const ALPHABET_LEN: u8 = 26;

/// The expected body byte at `index` (the counter sits at index 0)
fn pattern_byte(index: usize) -> u8 {
    b'a' + ((index - 1) % ALPHABET_LEN as usize) as u8
}

/// Validates received test payloads and accounts for lost and corrupt packets
///
/// Every payload starts with a counter in `0..100` that the sender increments per packet,
/// followed by the repeating lowercase alphabet. A counter jump is charged as loss, a broken
/// body as one error.
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    expected: u8,
    first_packet: bool,
    lost: u32,
    errors: u32,
}

impl SequenceTracker {
    /// Create a tracker waiting for its first packet
    pub fn new() -> Self {
        Self {
            expected: 0,
            first_packet: true,
            lost: 0,
            errors: 0,
        }
    }

    /// Forget all history and counts; the next packet is accepted as the first
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Account for one received payload
    pub fn check(&mut self, data: &[u8]) {
        let Some((&counter, body)) = data.split_first() else {
            self.errors += 1;
            return;
        };

        if self.first_packet {
            self.first_packet = false;
            self.expected = counter % COUNTER_MODULUS;
        } else {
            self.expected = (self.expected + 1) % COUNTER_MODULUS;
            if counter != self.expected {
                let gap = if counter > self.expected {
                    counter - self.expected
                } else {
                    COUNTER_MODULUS - self.expected + counter
                };
                tracing::trace!(expected = self.expected, counter, gap, "sequence gap");
                self.lost += u32::from(gap);
                self.expected = counter % COUNTER_MODULUS;
            }
        }

        if body
            .iter()
            .enumerate()
            .any(|(i, &b)| b != pattern_byte(i + 1))
        {
            self.errors += 1;
        }
    }

    /// Packets inferred as lost since the last reset
    pub fn lost(&self) -> u32 {
        self.lost
    }

    /// Empty or corrupt payloads since the last reset
    pub fn errors(&self) -> u32 {
        self.errors
    }

    /// Counter value the last accepted packet carried, if any
    pub fn last_counter(&self) -> Option<u8> {
        (!self.first_packet).then_some(self.expected)
    }
}

/// Produces outgoing test payloads
#[derive(Debug, Clone)]
pub struct PayloadGenerator {
    counter: u8,
    buf: [u8; MAX_PAYLOAD],
    len: usize,
}

impl PayloadGenerator {
    /// Create a generator whose first payload carries counter 0
    pub fn new() -> Self {
        Self {
            counter: 0,
            buf: [0; MAX_PAYLOAD],
            len: 0,
        }
    }

    /// Restart the counter at 0 and discard the current payload
    pub fn reset(&mut self) {
        self.counter = 0;
        self.len = 0;
    }

    /// Build the next payload of `len` bytes, capped at the buffer size
    ///
    /// The payload stays available through [`payload`](Self::payload) until the next call, so a
    /// send the stack rejected can be retried with the same bytes.
    pub fn generate(&mut self, len: usize) -> &[u8] {
        let len = len.min(MAX_PAYLOAD);
        if len > 0 {
            self.buf[0] = self.counter;
            for (i, b) in self.buf[..len].iter_mut().enumerate().skip(1) {
                *b = pattern_byte(i);
            }
        }
        self.len = len;
        self.counter = (self.counter + 1) % COUNTER_MODULUS;
        &self.buf[..len]
    }

    /// The most recently generated payload
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Default for PayloadGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(counter: u8, len: usize) -> Vec<u8> {
        let mut v = vec![counter];
        v.extend((1..len).map(pattern_byte));
        v
    }

    #[test]
    fn in_order_counts_nothing() {
        let mut t = SequenceTracker::new();
        for i in 0..250u32 {
            t.check(&packet((i % 100) as u8, 20));
        }
        assert_eq!(t.lost(), 0);
        assert_eq!(t.errors(), 0);
    }

    #[test]
    fn first_packet_sets_counter() {
        let mut t = SequenceTracker::new();
        t.check(&packet(42, 5));
        t.check(&packet(43, 5));
        assert_eq!(t.lost(), 0);
        assert_eq!(t.last_counter(), Some(43));
    }

    #[test]
    fn forward_gap() {
        let mut t = SequenceTracker::new();
        t.check(&packet(10, 5));
        t.check(&packet(14, 5));
        assert_eq!(t.lost(), 3);
        t.check(&packet(15, 5));
        assert_eq!(t.lost(), 3);
    }

    #[test]
    fn wrapping_gap() {
        let mut t = SequenceTracker::new();
        t.check(&packet(98, 5));
        t.check(&packet(2, 5));
        assert_eq!(t.lost(), 3);
    }

    #[test]
    fn empty_payload_is_an_error() {
        let mut t = SequenceTracker::new();
        t.check(&packet(1, 5));
        t.check(&[]);
        assert_eq!(t.errors(), 1);
        assert_eq!(t.lost(), 0);
        t.check(&packet(2, 5));
        assert_eq!(t.lost(), 0);
    }

    #[test]
    fn corrupt_body_counts_once() {
        let mut t = SequenceTracker::new();
        let mut p = packet(0, 40);
        p[3] = b'z';
        p[30] = b'!';
        t.check(&p);
        assert_eq!(t.errors(), 1);
        assert_eq!(t.lost(), 0);
    }

    #[test]
    fn reset_accepts_any_counter() {
        let mut t = SequenceTracker::new();
        t.check(&packet(5, 5));
        t.reset();
        t.check(&packet(80, 5));
        assert_eq!(t.lost(), 0);
    }

    #[test]
    fn generator_pattern() {
        let mut g = PayloadGenerator::new();
        let p = g.generate(30).to_vec();
        assert_eq!(p[0], 0);
        assert_eq!(&p[1..4], b"abc");
        assert_eq!(p[26], b'z');
        assert_eq!(p[27], b'a');
        assert_eq!(g.generate(4), &[1, b'a', b'b', b'c']);
        assert_eq!(g.payload(), &[1, b'a', b'b', b'c']);
    }

    #[test]
    fn generator_wraps_and_caps() {
        let mut g = PayloadGenerator::new();
        for _ in 0..100 {
            g.generate(1);
        }
        assert_eq!(g.generate(1000).len(), MAX_PAYLOAD);
        assert_eq!(g.payload()[0], 0);
    }

    #[test]
    fn generator_feeds_tracker() {
        let mut g = PayloadGenerator::new();
        let mut t = SequenceTracker::new();
        for i in 0..300 {
            let p = g.generate(20 + i % 200);
            if i % 7 != 3 {
                t.check(p);
            }
        }
        // indices 3, 10, .., 297 skipped; the last packet is delivered so every gap is observed
        assert_eq!(t.lost(), 43);
        assert_eq!(t.errors(), 0);
    }
}
