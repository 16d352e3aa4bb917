use std::{
    fmt,
    io::{Read, Write},
};

use super::{
    header::{Context, Layout},
    stream::{write_string_u16, write_string_u32, write_u16, write_u32, TrackedReader},
};
use crate::error::{FormatError, FormatErrorKind, Result, WriteError};

/// The identifying data that precedes every genotype block
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariantRecord {
    pub snpid: String,
    pub rsid: String,
    pub chromosome: String,
    pub position: u32,
    /// Ordered alleles, at least two (exactly two in layout 1)
    pub alleles: Vec<String>,
}
impl VariantRecord {
    pub fn new<S: Into<String>>(
        snpid: S,
        rsid: S,
        chromosome: S,
        position: u32,
        alleles: Vec<String>,
    ) -> Self {
        Self {
            snpid: snpid.into(),
            rsid: rsid.into(),
            chromosome: chromosome.into(),
            position,
            alleles,
        }
    }

    #[must_use]
    pub fn number_of_alleles(&self) -> usize {
        self.alleles.len()
    }

    /// The first allele, or an empty string if there is none
    #[must_use]
    pub fn allele1(&self) -> &str {
        self.alleles.first().map_or("", String::as_str)
    }

    /// The second allele, or an empty string if there is none
    #[must_use]
    pub fn allele2(&self) -> &str {
        self.alleles.get(1).map_or("", String::as_str)
    }

    /// Reads identifying data, returning `None` at a clean end of file
    ///
    /// End of file is only clean if it falls exactly on a variant boundary. Layout 1
    /// records begin with a copy of the sample count which must match the header.
    pub fn read<R: Read>(reader: &mut TrackedReader<R>, context: &Context) -> Result<Option<Self>> {
        let Some(first) = reader.read_u8_or_eof()? else {
            return Ok(None);
        };
        let snpid_length = match context.layout {
            Layout::One => {
                let mut rest = [0u8; 3];
                reader.read_exact(&mut rest)?;
                let samples = u32::from_le_bytes([first, rest[0], rest[1], rest[2]]);
                if samples != context.number_of_samples {
                    return Err(reader
                        .error(FormatErrorKind::SampleCountMismatch {
                            expected: context.number_of_samples,
                            found: samples,
                        })
                        .into());
                }
                reader.read_u16()?
            }
            Layout::Two => u16::from_le_bytes([first, reader.read_u8()?]),
        };
        let snpid = reader.read_string(u64::from(snpid_length))?;
        let rsid = reader.read_string_u16()?;
        let chromosome = reader.read_string_u16()?;
        let position = reader.read_u32()?;
        let number_of_alleles = match context.layout {
            Layout::One => 2,
            Layout::Two => {
                let count_offset = reader.position();
                let count = reader.read_u16()?;
                if count < 2 {
                    return Err(FormatError::new(
                        count_offset,
                        FormatErrorKind::TooFewAlleles(count),
                    )
                    .into());
                }
                count
            }
        };
        let mut alleles = Vec::with_capacity(usize::from(number_of_alleles));
        for _ in 0..number_of_alleles {
            alleles.push(reader.read_string_u32()?);
        }
        Ok(Some(Self {
            snpid,
            rsid,
            chromosome,
            position,
            alleles,
        }))
    }

    /// Writes identifying data for the context's layout
    pub fn write<W: Write>(&self, writer: &mut W, context: &Context) -> Result<()> {
        match context.layout {
            Layout::One if self.alleles.len() != 2 => {
                return Err(WriteError::InvalidAlleleCount {
                    found: self.alleles.len(),
                    layout: 1,
                }
                .into())
            }
            Layout::Two if self.alleles.len() < 2 || self.alleles.len() > u16::MAX as usize => {
                return Err(WriteError::InvalidAlleleCount {
                    found: self.alleles.len(),
                    layout: 2,
                }
                .into())
            }
            _ => {}
        }
        if context.layout == Layout::One {
            write_u32(writer, context.number_of_samples)?;
        }
        write_string_u16(writer, "SNPID", &self.snpid)?;
        write_string_u16(writer, "rsid", &self.rsid)?;
        write_string_u16(writer, "chromosome", &self.chromosome)?;
        write_u32(writer, self.position)?;
        if context.layout == Layout::Two {
            write_u16(writer, self.alleles.len() as u16)?;
        }
        for allele in &self.alleles {
            write_string_u32(writer, "allele", allele)?;
        }
        Ok(())
    }
}
impl fmt::Display for VariantRecord {
    /// Formats the variant as `SNPID,rsid,chromosome,position,alleles...`, as used in
    /// error messages
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.snpid, self.rsid, self.chromosome, self.position
        )?;
        for allele in &self.alleles {
            write!(f, ",{allele}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::bgen::header::Compression;
    use crate::error::Error;

    fn alleles(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_layout2_roundtrip() -> Result<()> {
        let context = Context::new(4, 1, Layout::Two, Compression::Zlib);
        let variant = VariantRecord::new("SNP1", "rs1", "01", 1234, alleles(&["A", "G", "GT"]));
        let mut buffer = Vec::new();
        variant.write(&mut buffer, &context)?;

        let mut reader = TrackedReader::new(Cursor::new(buffer.clone()));
        let read = VariantRecord::read(&mut reader, &context)?;
        assert_eq!(read.as_ref(), Some(&variant));
        assert_eq!(reader.position(), buffer.len() as u64);
        assert!(VariantRecord::read(&mut reader, &context)?.is_none());
        Ok(())
    }

    #[test]
    fn test_layout1_checks_sample_count() -> Result<()> {
        let context = Context::new(4, 1, Layout::One, Compression::Zlib);
        let variant = VariantRecord::new("SNP1", "rs1", "1", 10, alleles(&["A", "C"]));
        let mut buffer = Vec::new();
        variant.write(&mut buffer, &context)?;
        assert_eq!(&buffer[0..4], &4u32.to_le_bytes());

        let mut reader = TrackedReader::new(Cursor::new(buffer.clone()));
        assert_eq!(VariantRecord::read(&mut reader, &context)?, Some(variant));

        let other = Context::new(5, 1, Layout::One, Compression::Zlib);
        let mut reader = TrackedReader::new(Cursor::new(buffer));
        assert!(matches!(
            VariantRecord::read(&mut reader, &other),
            Err(Error::FormatError(FormatError {
                kind: FormatErrorKind::SampleCountMismatch { expected: 5, found: 4 },
                ..
            }))
        ));
        Ok(())
    }

    #[test]
    fn test_too_few_alleles() -> Result<()> {
        let context = Context::new(1, 1, Layout::Two, Compression::None);
        let variant = VariantRecord::new("", "rs9", "X", 5, alleles(&["A", "T"]));
        let mut buffer = Vec::new();
        variant.write(&mut buffer, &context)?;
        // allele count sits after the three strings and the position
        let count_at = 2 + 2 + 3 + 2 + 1 + 4;
        buffer[count_at] = 1;
        let mut reader = TrackedReader::new(Cursor::new(buffer));
        match VariantRecord::read(&mut reader, &context) {
            Err(Error::FormatError(FormatError { offset, kind })) => {
                assert_eq!(offset, count_at as u64);
                assert_eq!(kind, FormatErrorKind::TooFewAlleles(1));
            }
            other => panic!("expected allele count error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_truncated_variant_is_not_clean_eof() {
        let context = Context::new(1, 1, Layout::Two, Compression::None);
        let mut reader = TrackedReader::new(Cursor::new(vec![3u8]));
        assert!(VariantRecord::read(&mut reader, &context).is_err());
    }

    #[test]
    fn test_write_rejects_bad_allele_counts() {
        let layout1 = Context::new(1, 1, Layout::One, Compression::Zlib);
        let variant = VariantRecord::new("a", "b", "1", 1, alleles(&["A", "C", "G"]));
        assert!(matches!(
            variant.write(&mut Vec::new(), &layout1),
            Err(Error::WriteError(WriteError::InvalidAlleleCount { found: 3, layout: 1 }))
        ));
        let layout2 = Context::new(1, 1, Layout::Two, Compression::Zlib);
        let variant = VariantRecord::new("a", "b", "1", 1, alleles(&["A"]));
        assert!(variant.write(&mut Vec::new(), &layout2).is_err());
    }

    #[test]
    fn test_display() {
        let variant = VariantRecord::new("SNP1", "rs1", "1", 10, alleles(&["A", "C"]));
        assert_eq!(variant.to_string(), "SNP1,rs1,1,10,A,C");
    }
}
