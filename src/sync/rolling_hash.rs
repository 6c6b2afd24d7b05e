//! Rolling weak checksum for block matching
//!
//! Adler-32 style: two 16-bit sums over the window, `a` the plain byte sum
//! and `b` the position-weighted sum, combined as `a | b << 16`. Unlike
//! zlib's Adler-32 there is no `+1` seed and the modulus is 2^16, so both
//! sums can be kept with wrapping arithmetic and masked.

const MASK: u32 = 0xffff;

/// Weak checksum over a sliding window of fixed length
///
/// Collisions are expected; a match is only accepted after the strong hash
/// of the window agrees as well.
#[derive(Debug, Clone, Default)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    window_len: usize,
}

impl RollingChecksum {
    /// Start a checksum over `window`
    pub fn new(window: &[u8]) -> Self {
        let mut rolling = Self::default();
        rolling.update_block(window);
        rolling
    }

    /// Recompute from scratch over a full window
    pub fn update_block(&mut self, window: &[u8]) {
        let n = window.len() as u32;
        let mut a: u32 = 0;
        let mut b: u32 = 0;

        for (i, &byte) in window.iter().enumerate() {
            a = a.wrapping_add(byte as u32);
            b = b.wrapping_add((n - i as u32).wrapping_mul(byte as u32));
        }

        self.a = a & MASK;
        self.b = b & MASK;
        self.window_len = window.len();
    }

    /// Slide the window one byte forward: `old_byte` leaves, `new_byte` enters
    ///
    /// a' = a - out + in
    /// b' = b - n * out + a'
    pub fn roll_byte(&mut self, old_byte: u8, new_byte: u8) {
        let out = old_byte as u32;
        let n = self.window_len as u32;

        self.a = self.a.wrapping_sub(out).wrapping_add(new_byte as u32) & MASK;
        self.b = self
            .b
            .wrapping_sub(n.wrapping_mul(out))
            .wrapping_add(self.a)
            & MASK;
    }

    /// Combined 32-bit checksum of the current window
    pub fn digest(&self) -> u32 {
        self.a | (self.b << 16)
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// One-shot checksum of `data`
    pub fn checksum(data: &[u8]) -> u32 {
        Self::new(data).digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        // a = 1 + 2 + 3 = 6, b = 3*1 + 2*2 + 1*3 = 10
        assert_eq!(RollingChecksum::checksum(&[1, 2, 3]), 6 | (10 << 16));
        assert_eq!(RollingChecksum::checksum(&[]), 0);
    }

    #[test]
    fn test_sums_wrap_at_16_bits() {
        let data = vec![0xffu8; 1024];
        let a = (0xffu32 * 1024) & MASK;
        let b = (0xffu32 * (1024 * 1025 / 2)) & MASK;
        assert_eq!(RollingChecksum::checksum(&data), a | (b << 16));
    }

    #[test]
    fn test_rolling_matches_full_computation() {
        let data = b"The quick brown fox jumps over the lazy dog";

        for block_size in [1, 4, 6, 16] {
            let mut rolling = RollingChecksum::new(&data[..block_size]);

            for i in 1..=data.len() - block_size {
                rolling.roll_byte(data[i - 1], data[i + block_size - 1]);

                let expected = RollingChecksum::checksum(&data[i..i + block_size]);
                assert_eq!(
                    rolling.digest(),
                    expected,
                    "Block size {}, position {}",
                    block_size,
                    i
                );
            }
        }
    }

    #[test]
    fn test_rolling_high_bytes() {
        // Bytes above 0x7f must be treated as unsigned
        let data: Vec<u8> = (0..64u32).map(|i| (200 + i * 7) as u8).collect();
        let block_size = 5;
        let mut rolling = RollingChecksum::new(&data[..block_size]);

        for i in 1..=data.len() - block_size {
            rolling.roll_byte(data[i - 1], data[i + block_size - 1]);
            assert_eq!(
                rolling.digest(),
                RollingChecksum::checksum(&data[i..i + block_size])
            );
        }
    }

    #[test]
    fn test_engineered_collision() {
        // Same byte sum, same weighted sum, different content
        assert_eq!(
            RollingChecksum::checksum(b"bcbbcb"),
            RollingChecksum::checksum(b"cbbbbc")
        );
    }
}
