use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FormatError, FormatErrorKind, Result, WriteError};

/// A reader that keeps track of the absolute byte offset it has reached
///
/// Every BGEN structure is parsed through a `TrackedReader` so that format errors can
/// report the byte at which they were detected, and so that the index builder can
/// record variant start and end positions without asking the underlying stream.
#[derive(Debug)]
pub struct TrackedReader<R> {
    inner: R,
    position: u64,
}
impl<R: Read> TrackedReader<R> {
    /// Wraps a reader positioned at the start of the file
    pub fn new(inner: R) -> Self {
        Self::with_position(inner, 0)
    }

    /// Wraps a reader that is already positioned at `position`
    pub fn with_position(inner: R, position: u64) -> Self {
        Self { inner, position }
    }

    /// The absolute offset of the next byte to be read
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Builds a format error located at the current position
    pub fn error(&self, kind: FormatErrorKind) -> FormatError {
        FormatError::new(self.position, kind)
    }

    fn map_eof(&self, err: io::Error) -> crate::Error {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            self.error(FormatErrorKind::Truncated).into()
        } else {
            err.into()
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if let Err(err) = self.inner.read_exact(buf) {
            return Err(self.map_eof(err));
        }
        self.position += buf.len() as u64;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.inner.read_u8().map_err(|e| self.map_eof(e))?;
        self.position += 1;
        Ok(value)
    }

    /// Reads one byte, returning `None` if the stream is already exhausted
    pub fn read_u8_or_eof(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.position += 1;
                    return Ok(Some(byte[0]));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let value = self
            .inner
            .read_u16::<LittleEndian>()
            .map_err(|e| self.map_eof(e))?;
        self.position += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self
            .inner
            .read_u32::<LittleEndian>()
            .map_err(|e| self.map_eof(e))?;
        self.position += 4;
        Ok(value)
    }

    /// Reads exactly `len` bytes into `buf`, replacing its contents
    ///
    /// The buffer only grows as data actually arrives, so a corrupt length field
    /// fails with a truncation error rather than a huge allocation.
    pub fn read_into(&mut self, len: u64, buf: &mut Vec<u8>) -> Result<()> {
        buf.clear();
        let got = (&mut self.inner).take(len).read_to_end(buf)? as u64;
        if got < len {
            self.position += got;
            return Err(self.error(FormatErrorKind::Truncated).into());
        }
        self.position += len;
        Ok(())
    }

    pub fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_into(len, &mut buf)?;
        Ok(buf)
    }

    /// Reads a string prefixed by a u16 length
    pub fn read_string_u16(&mut self) -> Result<String> {
        let len = self.read_u16()?;
        self.read_string(u64::from(len))
    }

    /// Reads a string prefixed by a u32 length
    pub fn read_string_u32(&mut self) -> Result<String> {
        let len = self.read_u32()?;
        self.read_string(u64::from(len))
    }

    /// Reads a UTF-8 string of `len` bytes
    pub fn read_string(&mut self, len: u64) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        Ok(std::str::from_utf8(&bytes)?.to_owned())
    }

    /// Advances past `len` bytes without keeping them
    pub fn skip(&mut self, len: u64) -> Result<()> {
        let skipped = io::copy(&mut (&mut self.inner).take(len), &mut io::sink())?;
        self.position += skipped;
        if skipped < len {
            return Err(self.error(FormatErrorKind::Truncated).into());
        }
        Ok(())
    }
}
impl<R: Read + Seek> TrackedReader<R> {
    /// Moves to an absolute byte offset
    pub fn seek_to(&mut self, position: u64) -> Result<()> {
        self.position = self.inner.seek(SeekFrom::Start(position))?;
        Ok(())
    }
}

pub(crate) fn write_u16<W: Write>(writer: &mut W, value: u16) -> Result<()> {
    writer.write_u16::<LittleEndian>(value)?;
    Ok(())
}

pub(crate) fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_u32::<LittleEndian>(value)?;
    Ok(())
}

/// Writes `value` prefixed by its length as a u16
pub(crate) fn write_string_u16<W: Write>(
    writer: &mut W,
    field: &'static str,
    value: &str,
) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| WriteError::FieldTooLong {
        field,
        length: value.len(),
        max: u16::MAX as usize,
    })?;
    write_u16(writer, len)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

/// Writes `value` prefixed by its length as a u32
pub(crate) fn write_string_u32<W: Write>(
    writer: &mut W,
    field: &'static str,
    value: &str,
) -> Result<()> {
    let len = u32::try_from(value.len()).map_err(|_| WriteError::FieldTooLong {
        field,
        length: value.len(),
        max: u32::MAX as usize,
    })?;
    write_u32(writer, len)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}
