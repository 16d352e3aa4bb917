//! # Genotype blocks
//!
//! Every variant is followed by one genotype block. Both layouts wrap their payload in
//! a length-prefixed envelope so a block can be skipped without decoding it:
//!
//! ```text
//! layout 1, compressed:    | C u32 | zlib payload (C bytes, inflates to 6N) |
//! layout 1, uncompressed:  | 6N bytes                                       |
//! layout 2, compressed:    | C u32 | D u32 | payload (C - 4 bytes, inflates to D) |
//! layout 2, uncompressed:  | C u32 | payload (C bytes)                      |
//! ```
//!
//! The layout 2 payload is:
//!
//! ```text
//! | N u32 | K u16 | min ploidy u8 | max ploidy u8 | N ploidy bytes | phased u8 | bits u8 | packed codes |
//! ```
//!
//! For each distribution (a whole sample when unphased, each haplotype when phased)
//! the last value is omitted and reconstructed so that the distribution sums to one.

use std::io::{Read, Write};

use super::{
    compression::{compress, decompress},
    consumer::{GenotypeBlockBuilder, GenotypeConsumer, OrderType, ValueType},
    header::{Context, Layout},
    stream::{write_u16, write_u32, TrackedReader},
};
use crate::{
    bits::{self, BitWriter},
    error::{FormatError, FormatErrorKind, Result, TranscodeError, WriteError},
};

/// Bit 7 of a ploidy byte marks the sample as missing
pub const MISSING_BIT: u8 = 0x80;

/// Ploidy occupies the low 6 bits of a ploidy byte
pub const PLOIDY_MASK: u8 = 0x3F;

/// Fixed-point scale of layout 1 probabilities
pub const LAYOUT1_SCALE: f64 = 32768.0;

/// Size of the fixed fields preceding the ploidy bytes in a layout 2 payload
const LAYOUT2_PREFIX: usize = 8;

/// Number of unordered genotypes for `ploidy` copies of `alleles` alleles
///
/// This is `C(ploidy + alleles - 1, alleles - 1)`. Returns `None` on overflow.
#[must_use]
pub fn number_of_genotypes(ploidy: u8, alleles: u16) -> Option<u64> {
    if alleles == 0 {
        return Some(0);
    }
    let n = u64::from(ploidy) + u64::from(alleles) - 1;
    let k = u64::from(ploidy).min(u64::from(alleles) - 1);
    let mut result = 1u64;
    for i in 1..=k {
        result = result.checked_mul(n - k + i)? / i;
    }
    Some(result)
}

/// Number of probabilities delivered per sample (including reconstructed values)
#[must_use]
pub fn number_of_entries(ploidy: u8, alleles: u16, phased: bool) -> Option<u64> {
    if phased {
        Some(u64::from(ploidy) * u64::from(alleles))
    } else {
        number_of_genotypes(ploidy, alleles)
    }
}

/// Number of codes physically stored per sample
#[must_use]
pub fn number_of_stored_values(ploidy: u8, alleles: u16, phased: bool) -> Option<u64> {
    if phased {
        Some(u64::from(ploidy) * (u64::from(alleles).saturating_sub(1)))
    } else {
        number_of_genotypes(ploidy, alleles).map(|g| g.saturating_sub(1))
    }
}

/// The probabilities of one sample
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleGenotype {
    pub ploidy: u8,
    pub missing: bool,
    /// Every entry, including those that are reconstructed rather than stored.
    /// Empty for missing samples.
    pub probabilities: Vec<f64>,
}
impl SampleGenotype {
    #[must_use]
    pub fn new(ploidy: u8, probabilities: Vec<f64>) -> Self {
        Self {
            ploidy,
            missing: false,
            probabilities,
        }
    }

    #[must_use]
    pub fn missing(ploidy: u8) -> Self {
        Self {
            ploidy,
            missing: true,
            probabilities: Vec::new(),
        }
    }
}

/// A fully decoded genotype block
#[derive(Clone, Debug, PartialEq)]
pub struct GenotypeBlock {
    pub number_of_alleles: u16,
    pub phased: bool,
    /// Bits per stored probability (16 for layout 1)
    pub bits: u8,
    pub samples: Vec<SampleGenotype>,
}

/// A layout 2 payload with its header fields validated but its probabilities
/// still bit-packed
///
/// This is the input to the fast transcoding paths, which read codes directly
/// from [`UnpackedBlock::probability_data`].
#[derive(Clone, Debug, Default)]
pub struct UnpackedBlock {
    /// Absolute offset of the block in the file
    pub offset: u64,
    pub number_of_samples: u32,
    pub number_of_alleles: u16,
    pub min_ploidy: u8,
    pub max_ploidy: u8,
    pub phased: bool,
    pub bits: u8,
    payload: Vec<u8>,
}
impl UnpackedBlock {
    /// The raw ploidy bytes, one per sample (bit 7 = missing)
    #[must_use]
    pub fn ploidy_bytes(&self) -> &[u8] {
        &self.payload[LAYOUT2_PREFIX..LAYOUT2_PREFIX + self.number_of_samples as usize]
    }

    #[must_use]
    pub fn ploidy(&self, sample: usize) -> u8 {
        self.ploidy_bytes()[sample] & PLOIDY_MASK
    }

    #[must_use]
    pub fn is_missing(&self, sample: usize) -> bool {
        self.ploidy_bytes()[sample] & MISSING_BIT != 0
    }

    /// The packed probability codes
    #[must_use]
    pub fn probability_data(&self) -> &[u8] {
        &self.payload[LAYOUT2_PREFIX + self.number_of_samples as usize + 2..]
    }

    /// Validates a decompressed layout 2 payload
    ///
    /// # Parameters
    ///
    /// * `payload` - The decompressed payload
    /// * `context` - The file header, used to check the sample count
    /// * `offset` - Absolute offset of the block, for error reporting
    pub fn from_payload(payload: Vec<u8>, context: &Context, offset: u64) -> Result<Self> {
        let fail = |kind| -> crate::Error { FormatError::new(offset, kind).into() };
        if payload.len() < LAYOUT2_PREFIX {
            return Err(fail(FormatErrorKind::Truncated));
        }
        let number_of_samples =
            u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if number_of_samples != context.number_of_samples {
            return Err(fail(FormatErrorKind::SampleCountMismatch {
                expected: context.number_of_samples,
                found: number_of_samples,
            }));
        }
        let number_of_alleles = u16::from_le_bytes([payload[4], payload[5]]);
        if number_of_alleles < 2 {
            return Err(fail(FormatErrorKind::TooFewAlleles(number_of_alleles)));
        }
        let (min_ploidy, max_ploidy) = (payload[6], payload[7]);
        let n = number_of_samples as usize;
        if payload.len() < LAYOUT2_PREFIX + n + 2 {
            return Err(fail(FormatErrorKind::Truncated));
        }
        let phased = match payload[LAYOUT2_PREFIX + n] {
            0 => false,
            1 => true,
            other => return Err(fail(FormatErrorKind::InvalidPhasedFlag(other))),
        };
        let bits = payload[LAYOUT2_PREFIX + n + 1];
        if !(1..=32).contains(&bits) {
            return Err(fail(FormatErrorKind::InvalidBitDepth(bits)));
        }

        let mut stored = 0u64;
        for &byte in &payload[LAYOUT2_PREFIX..LAYOUT2_PREFIX + n] {
            if byte & !(MISSING_BIT | PLOIDY_MASK) != 0 {
                return Err(fail(FormatErrorKind::InvalidPloidy(byte)));
            }
            let ploidy = byte & PLOIDY_MASK;
            let count = number_of_stored_values(ploidy, number_of_alleles, phased).ok_or(
                fail(FormatErrorKind::GenotypeCountOverflow {
                    ploidy,
                    alleles: number_of_alleles,
                }),
            )?;
            stored = stored.saturating_add(count);
        }
        let required = stored.saturating_mul(u64::from(bits)).div_ceil(8);
        let actual = (payload.len() - LAYOUT2_PREFIX - n - 2) as u64;
        if actual < required {
            return Err(fail(FormatErrorKind::ProbabilityDataTooShort { required, actual }));
        }

        Ok(Self {
            offset,
            number_of_samples,
            number_of_alleles,
            min_ploidy,
            max_ploidy,
            phased,
            bits,
            payload,
        })
    }

    /// Decodes every probability into `consumer`
    ///
    /// The omitted value of each distribution is reconstructed from the integer
    /// codes, so a distribution always sums to exactly one before division.
    pub fn parse<C: GenotypeConsumer>(&self, consumer: &mut C) -> Result<()> {
        let k = self.number_of_alleles;
        let bits = self.bits;
        let max = bits::max_code(bits);
        let divisor = max as f64;
        let data = self.probability_data();
        let order = if self.phased {
            OrderType::PerPhasedHaplotypePerAllele
        } else {
            OrderType::PerUnorderedGenotype
        };

        consumer.initialise(self.number_of_samples as usize, usize::from(k));
        consumer.set_min_max_ploidy(self.min_ploidy, self.max_ploidy);

        let mut bit_offset = 0usize;
        for i in 0..self.number_of_samples as usize {
            let ploidy = self.ploidy(i);
            let missing = self.is_missing(i);
            // counts were validated in from_payload
            let stored = number_of_stored_values(ploidy, k, self.phased).unwrap_or(0) as usize;
            let sample_end = bit_offset + stored * usize::from(bits);

            if consumer.set_sample(i) {
                let (groups, group_size) = if self.phased {
                    (usize::from(ploidy), usize::from(k))
                } else {
                    (1, stored + 1)
                };
                let entries = groups * group_size;
                consumer.set_number_of_entries(ploidy, entries, order, ValueType::Probability);
                if missing {
                    for entry in 0..entries {
                        consumer.set_missing(entry)?;
                    }
                } else {
                    let mut entry = 0;
                    for _ in 0..groups {
                        let mut sum = 0u64;
                        for _ in 1..group_size {
                            let code = bits::extract(data, bit_offset, bits);
                            bit_offset += usize::from(bits);
                            sum += u64::from(code);
                            consumer.set_value(entry, f64::from(code) / divisor)?;
                            entry += 1;
                        }
                        if sum > max {
                            return Err(FormatError::new(
                                self.offset,
                                FormatErrorKind::ProbabilitySumOverflow { sum, max },
                            )
                            .into());
                        }
                        consumer.set_value(entry, (max - sum) as f64 / divisor)?;
                        entry += 1;
                    }
                }
            }
            bit_offset = sample_end;
        }
        consumer.finalise()
    }
}

/// Reads the block envelope and returns the (decompressed) payload
fn read_payload<R: Read>(
    reader: &mut TrackedReader<R>,
    context: &Context,
) -> Result<(u64, Vec<u8>)> {
    let offset = reader.position();
    let payload = match context.layout {
        Layout::One => {
            let expected = 6 * context.number_of_samples as usize;
            if context.compression.is_compressed() {
                let length = reader.read_u32()?;
                let compressed = reader.read_bytes(u64::from(length))?;
                decompress(&compressed, context.compression, expected, offset)?
            } else {
                reader.read_bytes(expected as u64)?
            }
        }
        Layout::Two => {
            let length = reader.read_u32()?;
            if context.compression.is_compressed() {
                if length < 4 {
                    return Err(reader.error(FormatErrorKind::InvalidBlockLength(length)).into());
                }
                let decompressed_length = reader.read_u32()?;
                let compressed = reader.read_bytes(u64::from(length - 4))?;
                decompress(
                    &compressed,
                    context.compression,
                    decompressed_length as usize,
                    offset,
                )?
            } else {
                reader.read_bytes(u64::from(length))?
            }
        }
    };
    Ok((offset, payload))
}

/// Advances past one genotype block, returning the number of bytes consumed
///
/// Consumes exactly the span that [`read_genotype_block`] would consume.
pub fn skip_genotype_block<R: Read>(
    reader: &mut TrackedReader<R>,
    context: &Context,
) -> Result<u64> {
    let start = reader.position();
    match (context.layout, context.compression.is_compressed()) {
        (Layout::One, false) => reader.skip(6 * u64::from(context.number_of_samples))?,
        _ => {
            let length = reader.read_u32()?;
            reader.skip(u64::from(length))?;
        }
    }
    Ok(reader.position() - start)
}

/// Reads a layout 2 block and validates its header without decoding probabilities
pub fn read_and_unpack_layout2_block<R: Read>(
    reader: &mut TrackedReader<R>,
    context: &Context,
) -> Result<UnpackedBlock> {
    if context.layout != Layout::Two {
        return Err(TranscodeError::UnsupportedLayout {
            expected: 2,
            found: context.layout.as_u8(),
        }
        .into());
    }
    let (offset, payload) = read_payload(reader, context)?;
    UnpackedBlock::from_payload(payload, context, offset)
}

/// Reads one genotype block and pushes its values into `consumer`
pub fn read_genotype_block_into<R: Read, C: GenotypeConsumer>(
    reader: &mut TrackedReader<R>,
    context: &Context,
    consumer: &mut C,
) -> Result<BlockShape> {
    let (offset, payload) = read_payload(reader, context)?;
    match context.layout {
        Layout::One => {
            parse_layout1(&payload, consumer)?;
            Ok(BlockShape {
                number_of_alleles: 2,
                phased: false,
                bits: 16,
            })
        }
        Layout::Two => {
            let block = UnpackedBlock::from_payload(payload, context, offset)?;
            block.parse(consumer)?;
            Ok(BlockShape {
                number_of_alleles: block.number_of_alleles,
                phased: block.phased,
                bits: block.bits,
            })
        }
    }
}

/// Block-level fields reported alongside a consumer-driven decode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockShape {
    pub number_of_alleles: u16,
    pub phased: bool,
    pub bits: u8,
}

/// Reads and fully decodes one genotype block
pub fn read_genotype_block<R: Read>(
    reader: &mut TrackedReader<R>,
    context: &Context,
) -> Result<GenotypeBlock> {
    let mut builder = GenotypeBlockBuilder::new();
    let shape = read_genotype_block_into(reader, context, &mut builder)?;
    Ok(builder.build(shape.phased, shape.bits))
}

fn parse_layout1<C: GenotypeConsumer>(payload: &[u8], consumer: &mut C) -> Result<()> {
    let number_of_samples = payload.len() / 6;
    consumer.initialise(number_of_samples, 2);
    consumer.set_min_max_ploidy(2, 2);
    for (i, chunk) in payload.chunks_exact(6).enumerate() {
        if !consumer.set_sample(i) {
            continue;
        }
        consumer.set_number_of_entries(
            2,
            3,
            OrderType::PerUnorderedGenotype,
            ValueType::Probability,
        );
        let values = [
            u16::from_le_bytes([chunk[0], chunk[1]]),
            u16::from_le_bytes([chunk[2], chunk[3]]),
            u16::from_le_bytes([chunk[4], chunk[5]]),
        ];
        if values == [0, 0, 0] {
            for entry in 0..3 {
                consumer.set_missing(entry)?;
            }
        } else {
            for (entry, value) in values.into_iter().enumerate() {
                consumer.set_value(entry, f64::from(value) / LAYOUT1_SCALE)?;
            }
        }
    }
    consumer.finalise()
}

/// Serialises a block payload for layout 2
fn layout2_payload(block: &GenotypeBlock, context: &Context) -> Result<Vec<u8>> {
    let k = block.number_of_alleles;
    if k < 2 {
        return Err(WriteError::InvalidAlleleCount {
            found: usize::from(k),
            layout: 2,
        }
        .into());
    }
    if !(1..=32).contains(&block.bits) {
        return Err(WriteError::InvalidBitDepth(block.bits).into());
    }
    let min_ploidy = block.samples.iter().map(|s| s.ploidy).min().unwrap_or(0);
    let max_ploidy = block.samples.iter().map(|s| s.ploidy).max().unwrap_or(0);

    let mut payload = Vec::with_capacity(LAYOUT2_PREFIX + block.samples.len() * 3);
    write_u32(&mut payload, context.number_of_samples)?;
    write_u16(&mut payload, k)?;
    payload.push(min_ploidy);
    payload.push(max_ploidy);
    for (i, sample) in block.samples.iter().enumerate() {
        if sample.ploidy > PLOIDY_MASK {
            return Err(WriteError::InvalidPloidy {
                sample: i,
                ploidy: sample.ploidy,
            }
            .into());
        }
        payload.push(sample.ploidy | if sample.missing { MISSING_BIT } else { 0 });
    }
    payload.push(u8::from(block.phased));
    payload.push(block.bits);

    let mut packed = BitWriter::new();
    for (i, sample) in block.samples.iter().enumerate() {
        let overflow = || WriteError::GenotypeCountOverflow {
            sample: i,
            ploidy: sample.ploidy,
            alleles: k,
        };
        if sample.missing {
            let stored =
                number_of_stored_values(sample.ploidy, k, block.phased).ok_or_else(overflow)?;
            for _ in 0..stored {
                packed.push(0, block.bits);
            }
            continue;
        }
        let expected =
            number_of_entries(sample.ploidy, k, block.phased).ok_or_else(overflow)? as usize;
        if sample.probabilities.len() != expected {
            return Err(WriteError::EntryCountMismatch {
                sample: i,
                expected,
                found: sample.probabilities.len(),
            }
            .into());
        }
        let group_size = if block.phased { usize::from(k) } else { expected };
        for group in sample.probabilities.chunks(group_size.max(1)) {
            let codes = bits::quantize_distribution(group, block.bits).ok_or(
                WriteError::ProbabilitiesDoNotSumToOne {
                    sample: i,
                    sum: group.iter().sum(),
                },
            )?;
            for &code in &codes[..codes.len() - 1] {
                packed.push(code, block.bits);
            }
        }
    }
    payload.extend_from_slice(&packed.finish());
    Ok(payload)
}

/// Serialises a block payload for layout 1
fn layout1_payload(block: &GenotypeBlock) -> Result<Vec<u8>> {
    if block.number_of_alleles != 2 || block.phased {
        return Err(WriteError::UnsupportedLayoutOneBlock.into());
    }
    let mut payload = Vec::with_capacity(6 * block.samples.len());
    for sample in &block.samples {
        if sample.ploidy != 2 {
            return Err(WriteError::UnsupportedLayoutOneBlock.into());
        }
        if sample.missing {
            payload.extend_from_slice(&[0u8; 6]);
            continue;
        }
        if sample.probabilities.len() != 3 {
            return Err(WriteError::UnsupportedLayoutOneBlock.into());
        }
        for &prob in &sample.probabilities {
            let value = (prob * LAYOUT1_SCALE).round().clamp(0.0, f64::from(u16::MAX)) as u16;
            write_u16(&mut payload, value)?;
        }
    }
    Ok(payload)
}

/// Writes one genotype block for the context's layout and compression
///
/// # Parameters
///
/// * `writer` - Destination stream
/// * `context` - The file header
/// * `block` - Probabilities, one entry per sample
/// * `level` - Compression level passed to the block codec
pub fn write_genotype_block<W: Write>(
    writer: &mut W,
    context: &Context,
    block: &GenotypeBlock,
    level: u32,
) -> Result<()> {
    if block.samples.len() != context.number_of_samples as usize {
        return Err(WriteError::SampleCountMismatch {
            expected: context.number_of_samples,
            found: block.samples.len(),
        }
        .into());
    }
    match context.layout {
        Layout::One => {
            let payload = layout1_payload(block)?;
            if context.compression.is_compressed() {
                let compressed = compress(&payload, context.compression, level)?;
                write_u32(writer, compressed.len() as u32)?;
                writer.write_all(&compressed)?;
            } else {
                writer.write_all(&payload)?;
            }
        }
        Layout::Two => {
            let payload = layout2_payload(block, context)?;
            if context.compression.is_compressed() {
                let compressed = compress(&payload, context.compression, level)?;
                write_u32(writer, compressed.len() as u32 + 4)?;
                write_u32(writer, payload.len() as u32)?;
                writer.write_all(&compressed)?;
            } else {
                write_u32(writer, payload.len() as u32)?;
                writer.write_all(&payload)?;
            }
        }
    }
    Ok(())
}
