//! Writer implementation for BGEN files
//!
//! The writer emits the leading offset, the header block and the optional sample
//! identifier block up front, then one variant (identifying data followed by its
//! genotype block) per call to [`BgenWriter::write_variant`]. Blocks are compressed
//! individually according to the context flags.

use std::io::Write;

use super::{
    compression::DEFAULT_COMPRESSION_LEVEL,
    genotype::{write_genotype_block, GenotypeBlock},
    header::{
        sample_identifier_block_size, write_header, write_sample_identifiers, Compression,
        Context, Layout,
    },
    variant::VariantRecord,
};
use crate::error::{Result, WriteError};

/// A builder for creating configured `BgenWriter` instances
///
/// # Examples
///
/// ```rust,no_run
/// use bgenix::bgen::{BgenWriterBuilder, Compression, Context, Layout};
/// use std::fs::File;
///
/// let file = File::create("example.bgen").unwrap();
/// let writer = BgenWriterBuilder::default()
///     .context(Context::new(2, 10, Layout::Two, Compression::Zstd))
///     .sample_identifiers(vec!["a".to_string(), "b".to_string()])
///     .build(file)
///     .unwrap();
/// ```
#[derive(Default)]
pub struct BgenWriterBuilder {
    /// Header of the file
    context: Option<Context>,
    /// Optional sample identifier block
    sample_identifiers: Option<Vec<String>>,
    /// Block compression level
    level: Option<u32>,
}
impl BgenWriterBuilder {
    /// Sets the header for the file
    ///
    /// Defaults to an empty layout 2, zlib-compressed context.
    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    /// Writes a sample identifier block holding `identifiers`
    ///
    /// The number of identifiers must equal the context's sample count.
    pub fn sample_identifiers(mut self, identifiers: Vec<String>) -> Self {
        self.sample_identifiers = Some(identifiers);
        self
    }

    /// Sets the compression level passed to the block codec
    pub fn compression_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    /// Builds the writer and writes the file preamble to `inner`
    ///
    /// # Returns
    ///
    /// * `Ok(BgenWriter)` - A writer positioned at the first variant
    /// * `Err(_)` - If the preamble could not be written or the identifiers
    ///   disagree with the header
    pub fn build<W: Write>(self, inner: W) -> Result<BgenWriter<W>> {
        let context = self
            .context
            .unwrap_or_else(|| Context::new(0, 0, Layout::Two, Compression::Zlib));
        BgenWriter::new(
            inner,
            context,
            self.sample_identifiers,
            self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL),
        )
    }
}

/// Writer for BGEN files
///
/// The number of variants written must match the count declared in the header;
/// [`BgenWriter::finish`] checks this.
pub struct BgenWriter<W: Write> {
    inner: W,
    context: Context,
    level: u32,
    written: u32,
}
impl<W: Write> BgenWriter<W> {
    pub fn new(
        mut inner: W,
        mut context: Context,
        sample_identifiers: Option<Vec<String>>,
        level: u32,
    ) -> Result<Self> {
        context.has_sample_identifiers = sample_identifiers.is_some();
        let ids_size = sample_identifiers
            .as_deref()
            .map_or(0, sample_identifier_block_size);
        let offset = u64::from(context.header_size()) + ids_size;
        let offset = u32::try_from(offset).map_err(|_| WriteError::FieldTooLong {
            field: "header",
            length: offset as usize,
            max: u32::MAX as usize,
        })?;
        write_header(&mut inner, offset, &context)?;
        if let Some(ids) = &sample_identifiers {
            write_sample_identifiers(&mut inner, &context, ids)?;
        }
        Ok(Self {
            inner,
            context,
            level,
            written: 0,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Writes one variant: identifying data followed by its genotype block
    pub fn write_variant(&mut self, variant: &VariantRecord, block: &GenotypeBlock) -> Result<()> {
        if usize::from(block.number_of_alleles) != variant.number_of_alleles() {
            return Err(WriteError::InvalidAlleleCount {
                found: variant.number_of_alleles(),
                layout: self.context.layout.as_u8(),
            }
            .into());
        }
        variant.write(&mut self.inner, &self.context)?;
        write_genotype_block(&mut self.inner, &self.context, block, self.level)?;
        self.written += 1;
        Ok(())
    }

    /// Flushes the stream and returns it
    ///
    /// Fails if the number of variants written differs from the header.
    pub fn finish(mut self) -> Result<W> {
        if self.written != self.context.number_of_variants {
            return Err(WriteError::VariantCountMismatch {
                expected: self.context.number_of_variants,
                written: self.written,
            }
            .into());
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::bgen::{
        genotype::{read_genotype_block, SampleGenotype},
        header::{read_header, read_sample_identifiers},
        stream::TrackedReader,
    };
    use crate::error::Error;

    fn biallelic_block(p: f64) -> GenotypeBlock {
        GenotypeBlock {
            number_of_alleles: 2,
            phased: false,
            bits: 16,
            samples: vec![SampleGenotype::new(2, vec![p, 1.0 - p, 0.0])],
        }
    }

    #[test]
    fn test_complete_file() -> Result<()> {
        let context = Context::new(1, 2, Layout::Two, Compression::Zstd);
        let mut writer = BgenWriterBuilder::default()
            .context(context)
            .sample_identifiers(vec!["NA12878".to_string()])
            .compression_level(3)
            .build(Vec::new())?;
        let first = VariantRecord::new("s1", "rs1", "1", 100, vec!["A".into(), "G".into()]);
        let second = VariantRecord::new("s2", "rs2", "1", 200, vec!["C".into(), "T".into()]);
        writer.write_variant(&first, &biallelic_block(0.5))?;
        writer.write_variant(&second, &biallelic_block(0.25))?;
        let buffer = writer.finish()?;

        let mut reader = TrackedReader::new(Cursor::new(buffer));
        let (offset, context) = read_header(&mut reader)?;
        assert!(context.has_sample_identifiers);
        assert_eq!(context.compression, Compression::Zstd);
        assert_eq!(read_sample_identifiers(&mut reader, &context)?, vec!["NA12878"]);
        assert_eq!(reader.position(), u64::from(offset) + 4);

        assert_eq!(VariantRecord::read(&mut reader, &context)?, Some(first));
        let block = read_genotype_block(&mut reader, &context)?;
        assert!((block.samples[0].probabilities[1] - 0.5).abs() < 1e-4);
        assert_eq!(VariantRecord::read(&mut reader, &context)?, Some(second));
        read_genotype_block(&mut reader, &context)?;
        assert_eq!(VariantRecord::read(&mut reader, &context)?, None);
        Ok(())
    }

    #[test]
    fn test_finish_checks_variant_count() -> Result<()> {
        let writer = BgenWriterBuilder::default()
            .context(Context::new(1, 3, Layout::Two, Compression::Zlib))
            .build(Vec::new())?;
        assert!(matches!(
            writer.finish(),
            Err(Error::WriteError(WriteError::VariantCountMismatch { expected: 3, written: 0 }))
        ));
        Ok(())
    }

    #[test]
    fn test_identifier_count_must_match() {
        let result = BgenWriterBuilder::default()
            .context(Context::new(2, 0, Layout::Two, Compression::Zlib))
            .sample_identifiers(vec!["only-one".to_string()])
            .build(Vec::new());
        assert!(matches!(
            result,
            Err(Error::WriteError(
                WriteError::SampleIdentifierCountMismatch {
                    expected: 2,
                    found: 1
                }
            ))
        ));
    }
}
