//! # Bit packing
//!
//! Layout 2 genotype blocks store probabilities as unsigned fixed-point integers of
//! 1 to 32 bits, packed back to back with no alignment. Fields are read little-endian:
//! the first value occupies the lowest bits of the first byte.
//!
//! A stored `k`-bit code `v` represents the probability `v / (2^k - 1)`.

/// Returns the largest code representable with `bits` bits, which is also the
/// fixed-point divisor.
///
/// # Panics
///
/// Panics if `bits` is not in `1..=32`.
#[inline]
#[must_use]
pub fn max_code(bits: u8) -> u64 {
    assert!(
        (1..=32).contains(&bits),
        "bits per probability must be in 1..=32, got {bits}"
    );
    (1u64 << bits) - 1
}

/// Reads a `bits`-wide unsigned field starting at `bit_offset`
///
/// Bytes past the end of `buffer` read as zero; callers validate that the
/// buffer covers every field they extract.
///
/// # Panics
///
/// Panics if `bits` is not in `1..=32`.
#[inline]
#[must_use]
pub fn extract(buffer: &[u8], bit_offset: usize, bits: u8) -> u32 {
    let mask = max_code(bits);
    let start = bit_offset / 8;
    let shift = bit_offset % 8;
    // shift (<= 7) + bits (<= 32) always fits in five bytes
    let mut word = 0u64;
    for (i, &byte) in buffer.iter().skip(start).take(5).enumerate() {
        word |= u64::from(byte) << (8 * i);
    }
    ((word >> shift) & mask) as u32
}

/// Reads the `arity` consecutive fields belonging to sample `index` as one code
///
/// The field starts at bit `index * bits * arity`. With `arity = 2` this yields
/// `x | (y << bits)` for the two stored values of a diploid biallelic sample.
///
/// # Panics
///
/// Panics if `bits * arity` is not in `1..=32`.
#[inline]
#[must_use]
pub fn extract_sample(buffer: &[u8], index: usize, bits: u8, arity: u8) -> u32 {
    let width = bits * arity;
    extract(buffer, index * usize::from(width), width)
}

/// Maps a probability in `[0, 1]` to the nearest `bits`-bit code
#[must_use]
pub fn quantize(prob: f64, bits: u8) -> u32 {
    let max = max_code(bits) as f64;
    (prob * max).round().clamp(0.0, max) as u32
}

/// Maps a `bits`-bit code back to a probability
#[must_use]
pub fn dequantize(code: u32, bits: u8) -> f64 {
    f64::from(code) / max_code(bits) as f64
}

/// Quantizes a whole distribution so that the codes sum to exactly `2^bits - 1`
///
/// The distribution is rescaled to sum to one and every value rounded down. The
/// remaining units go to the entries with the largest fractional parts (earlier
/// entries win ties); any excess from rounding error is taken back from the
/// smallest.
///
/// Returns `None` if the probabilities do not sum to one within `1e-6`.
#[must_use]
pub fn quantize_distribution(probs: &[f64], bits: u8) -> Option<Vec<u32>> {
    let max = max_code(bits);
    let total: f64 = probs.iter().sum();
    if (total - 1.0).abs() > 1e-6 || probs.iter().any(|p| !(0.0..=1.0 + 1e-9).contains(p)) {
        return None;
    }
    let scaled: Vec<f64> = probs.iter().map(|p| p / total * max as f64).collect();
    let mut codes: Vec<u64> = scaled
        .iter()
        .map(|s| (s.floor() as u64).min(max))
        .collect();
    let assigned: u64 = codes.iter().sum();

    let mut order: Vec<usize> = (0..codes.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = scaled[a] - scaled[a].floor();
        let fb = scaled[b] - scaled[b].floor();
        fb.total_cmp(&fa)
    });
    if assigned <= max {
        let mut remainder = max - assigned;
        while remainder > 0 {
            for &i in &order {
                if remainder == 0 {
                    break;
                }
                if codes[i] < max {
                    codes[i] += 1;
                    remainder -= 1;
                }
            }
        }
    } else {
        let mut excess = assigned - max;
        while excess > 0 {
            for &i in order.iter().rev() {
                if excess == 0 {
                    break;
                }
                if codes[i] > 0 {
                    codes[i] -= 1;
                    excess -= 1;
                }
            }
        }
    }
    Some(codes.into_iter().map(|c| c as u32).collect())
}

/// Accumulates `bits`-wide fields into a little-endian packed byte buffer
#[derive(Debug, Default)]
pub struct BitWriter {
    buffer: Vec<u8>,
    acc: u64,
    filled: u32,
}
impl BitWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the low `bits` bits of `value`
    pub fn push(&mut self, value: u32, bits: u8) {
        let mask = max_code(bits);
        self.acc |= (u64::from(value) & mask) << self.filled;
        self.filled += u32::from(bits);
        while self.filled >= 8 {
            self.buffer.push(self.acc as u8);
            self.acc >>= 8;
            self.filled -= 8;
        }
    }

    /// Flushes any partial byte and returns the packed buffer
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.buffer.push(self.acc as u8);
        }
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_unaligned_fields() {
        let mut writer = BitWriter::new();
        for value in [1u32, 0, 5, 7, 2] {
            writer.push(value, 3);
        }
        let buffer = writer.finish();
        assert_eq!(buffer.len(), 2);
        let read: Vec<u32> = (0..5).map(|i| extract(&buffer, i * 3, 3)).collect();
        assert_eq!(read, vec![1, 0, 5, 7, 2]);
    }

    #[test]
    fn test_extract_full_width() {
        let mut writer = BitWriter::new();
        writer.push(1, 1);
        writer.push(u32::MAX, 32);
        writer.push(0x1234_5678, 32);
        let buffer = writer.finish();
        assert_eq!(extract(&buffer, 0, 1), 1);
        assert_eq!(extract(&buffer, 1, 32), u32::MAX);
        assert_eq!(extract(&buffer, 33, 32), 0x1234_5678);
    }

    #[test]
    fn test_extract_sample_packs_pairs() {
        // two 4-bit values per sample: (3, 9), (15, 0)
        let buffer = [0x93, 0x0F];
        assert_eq!(extract_sample(&buffer, 0, 4, 2), 3 | (9 << 4));
        assert_eq!(extract_sample(&buffer, 1, 4, 2), 15);
    }

    #[test]
    fn test_divisor_is_max_code() {
        assert!((dequantize(255, 8) - 1.0).abs() < f64::EPSILON);
        assert!((dequantize(1, 1) - 1.0).abs() < f64::EPSILON);
        assert_eq!(quantize(0.5, 8), 128);
        assert_eq!(quantize(1.0, 16), 65535);
    }

    #[test]
    #[should_panic(expected = "bits per probability")]
    fn test_zero_bits_is_a_contract_violation() {
        let _ = max_code(0);
    }

    #[test]
    fn test_quantize_distribution_sums_to_max() {
        let codes = quantize_distribution(&[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0], 8).unwrap();
        assert_eq!(codes.iter().map(|&c| u64::from(c)).sum::<u64>(), 255);
        assert_eq!(codes, vec![85, 85, 85]);

        let codes = quantize_distribution(&[0.5, 0.5], 1).unwrap();
        assert_eq!(codes.iter().sum::<u32>(), 1);

        // sums just inside the tolerance at wide bit depths
        for bits in [16u8, 20, 24, 32] {
            for probs in [[0.5, 0.4999995], [0.5000005, 0.5]] {
                let codes = quantize_distribution(&probs, bits).unwrap();
                assert_eq!(codes.iter().map(|&c| u64::from(c)).sum::<u64>(), max_code(bits));
            }
        }
    }

    #[test]
    fn test_quantize_distribution_rejects_bad_sums() {
        assert!(quantize_distribution(&[0.5, 0.2], 8).is_none());
        assert!(quantize_distribution(&[0.9, 0.9, -0.8], 8).is_none());
    }

    proptest! {
        #[test]
        fn test_quantize_inverts_dequantize(bits in 1u8..=32, seed in any::<u32>()) {
            let code = (u64::from(seed) % (max_code(bits) + 1)) as u32;
            prop_assert_eq!(quantize(dequantize(code, bits), bits), code);
        }

        #[test]
        fn test_bitwriter_roundtrip(bits in 1u8..=32, values in proptest::collection::vec(any::<u32>(), 1..40)) {
            let mask = max_code(bits) as u32;
            let mut writer = BitWriter::new();
            for &v in &values {
                writer.push(v & mask, bits);
            }
            let buffer = writer.finish();
            for (i, &v) in values.iter().enumerate() {
                prop_assert_eq!(extract(&buffer, i * usize::from(bits), bits), v & mask);
            }
        }
    }
}
