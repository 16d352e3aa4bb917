//! # Layout 2 to layout 1 conversion
//!
//! Only 8-bit, unphased, diploid, biallelic layout 2 data can be expressed in layout 1.
//! Each sample's two stored bytes `(x, y)` map through a 65536-entry table to three
//! 16-bit values `round(p * 32768)`, with `p` in `{x, y, 255 - x - y} / 255`.

use std::io::Write;

use tracing::{debug, info};

use crate::{
    bgen::{
        compress, write_header, write_u32, Compression, Context, Layout, UnpackedBlock,
        VariantRecord, View, LAYOUT1_SCALE, PLOIDY_MASK,
    },
    error::{ConstraintKind, FormatError, FormatErrorKind, Result, TranscodeError},
};

/// Bytes per sample in a layout 1 block
const LAYOUT1_SAMPLE_SIZE: usize = 6;

/// Layout 1 encodings of every pair of 8-bit codes, keyed by `x | y << 8`
pub struct DowngradeTable {
    entries: Vec<Option<[u8; LAYOUT1_SAMPLE_SIZE]>>,
}
impl DowngradeTable {
    #[must_use]
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(1 << 16);
        for key in 0..=u16::MAX {
            let x = u32::from(key & 0xFF);
            let y = u32::from(key >> 8);
            if x + y > 255 {
                entries.push(None);
                continue;
            }
            let z = 255 - x - y;
            let mut encoded = [0u8; LAYOUT1_SAMPLE_SIZE];
            for (chunk, value) in encoded.chunks_exact_mut(2).zip([x, y, z]) {
                let scaled = (f64::from(value) / 255.0 * LAYOUT1_SCALE).round() as u16;
                chunk.copy_from_slice(&scaled.to_le_bytes());
            }
            entries.push(Some(encoded));
        }
        debug!("built layout 1 conversion table");
        Self { entries }
    }

    /// The six layout 1 bytes for `key`, or `None` if `x + y > 255`
    #[must_use]
    pub fn entry(&self, key: u16) -> Option<&[u8; LAYOUT1_SAMPLE_SIZE]> {
        self.entries[usize::from(key)].as_ref()
    }

    /// The packed value `a | b << 16 | c << 32` for `key`
    #[must_use]
    pub fn packed(&self, key: u16) -> Option<u64> {
        self.entry(key).map(|bytes| {
            let mut word = [0u8; 8];
            word[..LAYOUT1_SAMPLE_SIZE].copy_from_slice(bytes);
            u64::from_le_bytes(word)
        })
    }
}
impl Default for DowngradeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn check_constraints(variant: &VariantRecord, block: &UnpackedBlock) -> Result<()> {
    let violation = |reason| -> crate::Error {
        TranscodeError::ConstraintViolation {
            variant: variant.to_string(),
            reason,
        }
        .into()
    };
    if block.bits != 8 {
        return Err(violation(ConstraintKind::BitDepth(block.bits)));
    }
    if block.phased {
        return Err(violation(ConstraintKind::Phased));
    }
    if let Some(&byte) = block.ploidy_bytes().iter().find(|&&b| b & PLOIDY_MASK != 2) {
        return Err(violation(ConstraintKind::Ploidy(byte & PLOIDY_MASK)));
    }
    Ok(())
}

/// Converts one validated block to an uncompressed layout 1 payload
fn downgrade_block(block: &UnpackedBlock, table: &DowngradeTable) -> Result<Vec<u8>> {
    let data = block.probability_data();
    let n = block.number_of_samples as usize;
    let mut payload = Vec::with_capacity(LAYOUT1_SAMPLE_SIZE * n);
    for i in 0..n {
        if block.is_missing(i) {
            payload.extend_from_slice(&[0u8; LAYOUT1_SAMPLE_SIZE]);
            continue;
        }
        let key = u16::from_le_bytes([data[2 * i], data[2 * i + 1]]);
        let Some(encoded) = table.entry(key) else {
            let sum = u64::from(key & 0xFF) + u64::from(key >> 8);
            return Err(FormatError::new(
                block.offset,
                FormatErrorKind::ProbabilitySumOverflow { sum, max: 255 },
            )
            .into());
        };
        payload.extend_from_slice(encoded);
    }
    Ok(payload)
}

/// Rewrites the variants of a layout 2 `view` as a zlib-compressed layout 1 file
///
/// The output has no sample identifier block. Each variant is checked before any of
/// its bytes are written, so a violation leaves the output ending at the previous
/// variant.
///
/// # Returns
///
/// The number of variants written
pub fn transcode_to_v11<W: Write>(view: &mut View, out: &mut W, level: u32) -> Result<u64> {
    let input = view.context();
    if input.layout != Layout::Two {
        return Err(TranscodeError::UnsupportedLayout {
            expected: 2,
            found: input.layout.as_u8(),
        }
        .into());
    }
    let context = Context {
        number_of_variants: view.number_of_variants() as u32,
        layout: Layout::One,
        compression: Compression::Zlib,
        has_sample_identifiers: false,
        ..input.clone()
    };
    write_header(out, context.header_size(), &context)?;

    let table = DowngradeTable::new();
    let mut buffer = Vec::new();
    let mut count = 0u64;
    while let Some(variant) = view.read_variant()? {
        if variant.number_of_alleles() != 2 {
            return Err(TranscodeError::ConstraintViolation {
                variant: variant.to_string(),
                reason: ConstraintKind::AlleleCount(variant.number_of_alleles()),
            }
            .into());
        }
        let block = view.read_and_unpack_layout2_block()?;
        check_constraints(&variant, &block)?;
        let payload = downgrade_block(&block, &table)?;
        let compressed = compress(&payload, Compression::Zlib, level)?;

        buffer.clear();
        variant.write(&mut buffer, &context)?;
        write_u32(&mut buffer, compressed.len() as u32)?;
        buffer.extend_from_slice(&compressed);
        out.write_all(&buffer)?;
        count += 1;
    }
    info!(variants = count, "wrote layout 1 data");
    Ok(count)
}
