//! # File header
//!
//! A BGEN file begins with a 4-byte offset followed by the header block:
//!
//! ```text
//! | offset u32 | header_length u32 | variants u32 | samples u32 | magic [4] | free data | flags u32 |
//! ```
//!
//! The offset counts the bytes between the end of the offset field and the first
//! variant, so it covers the header block and the optional sample identifier block.
//! The header length covers the fixed fields and the free data, so the length of the
//! free data is always `header_length - 20`.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};

use super::stream::{write_string_u16, write_u32, TrackedReader};
use crate::error::{FormatErrorKind, Result, WriteError};

/// Size of the fixed header fields (everything except the free data)
pub const FIXED_HEADER_SIZE: u32 = 20;

/// Magic bytes written by current producers
pub const MAGIC: [u8; 4] = *b"bgen";

/// Bits 0-1 of the flags hold the block compression
pub const FLAG_COMPRESSION_MASK: u32 = 0x3;

/// Bits 2-5 of the flags hold the layout
pub const FLAG_LAYOUT_MASK: u32 = 0xF << 2;

/// Bit 31 marks the presence of a sample identifier block
pub const FLAG_SAMPLE_IDENTIFIERS: u32 = 1 << 31;

/// Number of leading file bytes recorded as the index fingerprint
pub const FINGERPRINT_SIZE: usize = 1000;

/// Layout of the variant data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Diploid, unphased, biallelic, 16-bit probabilities
    One,
    /// Arbitrary ploidy, phasing, allele count and bit depth
    Two,
}
impl Layout {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

/// Compression applied to each genotype block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Zlib,
    Zstd,
}
impl Compression {
    #[must_use]
    pub fn is_compressed(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// The decoded header block of a BGEN file
///
/// The header size is never stored: it is always recomputed from the free data so the
/// two cannot drift apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Context {
    pub number_of_samples: u32,
    pub number_of_variants: u32,
    /// Either `b"bgen"` or four zero bytes in older files
    pub magic: [u8; 4],
    /// Producer-defined bytes, copied verbatim
    pub free_data: Vec<u8>,
    pub layout: Layout,
    pub compression: Compression,
    pub has_sample_identifiers: bool,
}
impl Context {
    /// Creates a context with no free data and no sample identifier block
    #[must_use]
    pub fn new(
        number_of_samples: u32,
        number_of_variants: u32,
        layout: Layout,
        compression: Compression,
    ) -> Self {
        Self {
            number_of_samples,
            number_of_variants,
            magic: MAGIC,
            free_data: Vec::new(),
            layout,
            compression,
            has_sample_identifiers: false,
        }
    }

    /// Size of the header block in bytes, `20 + free_data.len()`
    #[must_use]
    pub fn header_size(&self) -> u32 {
        FIXED_HEADER_SIZE + self.free_data.len() as u32
    }

    /// Packs layout, compression and the sample identifier bit into the flags word
    #[must_use]
    pub fn flags(&self) -> u32 {
        let compression = match self.compression {
            Compression::None => 0,
            Compression::Zlib => 1,
            Compression::Zstd => 2,
        };
        let layout = u32::from(self.layout.as_u8()) << 2;
        let ids = if self.has_sample_identifiers {
            FLAG_SAMPLE_IDENTIFIERS
        } else {
            0
        };
        compression | layout | ids
    }

    /// Decodes a flags word
    ///
    /// # Returns
    ///
    /// * `Some((layout, compression, has_sample_identifiers))` for a supported combination
    /// * `None` if a reserved bit is set, the layout or compression is unknown, or
    ///   layout 1 is combined with zstd
    #[must_use]
    pub fn parse_flags(flags: u32) -> Option<(Layout, Compression, bool)> {
        let known = FLAG_COMPRESSION_MASK | FLAG_LAYOUT_MASK | FLAG_SAMPLE_IDENTIFIERS;
        if flags & !known != 0 {
            return None;
        }
        let compression = match flags & FLAG_COMPRESSION_MASK {
            0 => Compression::None,
            1 => Compression::Zlib,
            2 => Compression::Zstd,
            _ => return None,
        };
        let layout = match (flags & FLAG_LAYOUT_MASK) >> 2 {
            1 => Layout::One,
            2 => Layout::Two,
            _ => return None,
        };
        if layout == Layout::One && compression == Compression::Zstd {
            return None;
        }
        Some((layout, compression, flags & FLAG_SAMPLE_IDENTIFIERS != 0))
    }

    /// Reads the header block (everything after the leading offset)
    pub fn read<R: Read>(reader: &mut TrackedReader<R>) -> Result<Self> {
        let start = reader.position();
        let mut fixed = [0u8; 16];
        reader.read_exact(&mut fixed)?;
        let header_length = LittleEndian::read_u32(&fixed[0..4]);
        if header_length < FIXED_HEADER_SIZE {
            return Err(crate::error::FormatError::new(
                start,
                FormatErrorKind::InvalidHeaderLength(header_length),
            )
            .into());
        }
        let number_of_variants = LittleEndian::read_u32(&fixed[4..8]);
        let number_of_samples = LittleEndian::read_u32(&fixed[8..12]);
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&fixed[12..16]);
        if magic != MAGIC && magic != [0u8; 4] {
            return Err(
                crate::error::FormatError::new(start + 12, FormatErrorKind::InvalidMagic(magic))
                    .into(),
            );
        }
        let free_data = reader.read_bytes(u64::from(header_length - FIXED_HEADER_SIZE))?;
        let flags_offset = reader.position();
        let flags = reader.read_u32()?;
        let (layout, compression, has_sample_identifiers) = Self::parse_flags(flags).ok_or(
            crate::error::FormatError::new(flags_offset, FormatErrorKind::InvalidFlags(flags)),
        )?;
        Ok(Self {
            number_of_samples,
            number_of_variants,
            magic,
            free_data,
            layout,
            compression,
            has_sample_identifiers,
        })
    }

    /// Writes the header block (everything after the leading offset)
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        if u32::try_from(self.free_data.len())
            .ok()
            .and_then(|len| len.checked_add(FIXED_HEADER_SIZE))
            .is_none()
        {
            return Err(WriteError::FieldTooLong {
                field: "free data",
                length: self.free_data.len(),
                max: (u32::MAX - FIXED_HEADER_SIZE) as usize,
            }
            .into());
        }
        let mut fixed = [0u8; 16];
        LittleEndian::write_u32(&mut fixed[0..4], self.header_size());
        LittleEndian::write_u32(&mut fixed[4..8], self.number_of_variants);
        LittleEndian::write_u32(&mut fixed[8..12], self.number_of_samples);
        fixed[12..16].copy_from_slice(&self.magic);
        writer.write_all(&fixed)?;
        writer.write_all(&self.free_data)?;
        write_u32(writer, self.flags())?;
        Ok(())
    }
}

/// Reads the leading offset and the header block
///
/// # Returns
///
/// The data offset and the decoded context. The first variant starts at byte
/// `offset + 4`.
pub fn read_header<R: Read>(reader: &mut TrackedReader<R>) -> Result<(u32, Context)> {
    let offset = reader.read_u32()?;
    let context = Context::read(reader)?;
    if offset < context.header_size() {
        return Err(crate::error::FormatError::new(
            0,
            FormatErrorKind::InvalidOffset {
                offset,
                header_length: context.header_size(),
            },
        )
        .into());
    }
    Ok((offset, context))
}

/// Writes the leading offset and the header block
pub fn write_header<W: Write>(writer: &mut W, offset: u32, context: &Context) -> Result<()> {
    write_u32(writer, offset)?;
    context.write(writer)
}

/// Size in bytes of a sample identifier block holding `identifiers`
#[must_use]
pub fn sample_identifier_block_size<S: AsRef<str>>(identifiers: &[S]) -> u64 {
    8 + identifiers
        .iter()
        .map(|id| 2 + id.as_ref().len() as u64)
        .sum::<u64>()
}

/// Reads the sample identifier block that follows the header
pub fn read_sample_identifiers<R: Read>(
    reader: &mut TrackedReader<R>,
    context: &Context,
) -> Result<Vec<String>> {
    let start = reader.position();
    let declared = reader.read_u32()?;
    let count = reader.read_u32()?;
    if count != context.number_of_samples {
        return Err(reader
            .error(FormatErrorKind::SampleCountMismatch {
                expected: context.number_of_samples,
                found: count,
            })
            .into());
    }
    let mut identifiers = Vec::with_capacity(count.min(1 << 20) as usize);
    for _ in 0..count {
        identifiers.push(reader.read_string_u16()?);
    }
    let actual = reader.position() - start;
    if actual != u64::from(declared) {
        return Err(crate::error::FormatError::new(
            start,
            FormatErrorKind::SampleBlockLength { declared, actual },
        )
        .into());
    }
    Ok(identifiers)
}

/// Writes a sample identifier block, returning its size in bytes
pub fn write_sample_identifiers<W: Write, S: AsRef<str>>(
    writer: &mut W,
    context: &Context,
    identifiers: &[S],
) -> Result<u32> {
    if identifiers.len() != context.number_of_samples as usize {
        return Err(WriteError::SampleIdentifierCountMismatch {
            expected: context.number_of_samples,
            found: identifiers.len(),
        }
        .into());
    }
    let size = sample_identifier_block_size(identifiers);
    let size = u32::try_from(size).map_err(|_| WriteError::FieldTooLong {
        field: "sample identifier block",
        length: size as usize,
        max: u32::MAX as usize,
    })?;
    write_u32(writer, size)?;
    write_u32(writer, context.number_of_samples)?;
    for id in identifiers {
        write_string_u16(writer, "sample identifier", id.as_ref())?;
    }
    Ok(size)
}
