use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder};
use zstd::Decoder;

use super::header::Compression;
use crate::error::{FormatError, FormatErrorKind, Result};

/// Default zlib level used when writing layout 1 blocks
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;

/// Compresses a whole genotype block
///
/// # Parameters
///
/// * `data` - The uncompressed block payload
/// * `compression` - The codec named by the file flags
/// * `level` - Codec level; clamped to 9 for zlib and passed through for zstd
pub fn compress(data: &[u8], compression: Compression, level: u32) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Zlib => {
            let mut encoder = ZlibEncoder::new(
                Vec::with_capacity(data.len() / 2),
                flate2::Compression::new(level.min(9)),
            );
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Zstd => Ok(zstd::bulk::compress(data, level as i32)?),
    }
}

/// Decompresses a genotype block that must expand to exactly `expected_size` bytes
///
/// `offset` locates the block in the file for error reporting.
pub fn decompress(
    data: &[u8],
    compression: Compression,
    expected_size: usize,
    offset: u64,
) -> Result<Vec<u8>> {
    // one extra byte is enough to detect an oversized payload
    let out = match compression {
        Compression::None => data.to_vec(),
        Compression::Zlib => {
            let mut out = Vec::with_capacity(expected_size);
            ZlibDecoder::new(data)
                .take(expected_size as u64 + 1)
                .read_to_end(&mut out)?;
            out
        }
        Compression::Zstd => {
            let mut out = Vec::with_capacity(expected_size);
            Decoder::new(data)?
                .take(expected_size as u64 + 1)
                .read_to_end(&mut out)?;
            out
        }
    };
    if out.len() != expected_size {
        return Err(FormatError::new(
            offset,
            FormatErrorKind::DecompressedSizeMismatch {
                expected: expected_size as u64,
                actual: out.len() as u64,
            },
        )
        .into());
    }
    Ok(out)
}
