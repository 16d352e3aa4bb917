use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::anyhow;
use tracing::debug;

use super::{
    consumer::GenotypeConsumer,
    genotype::{
        read_and_unpack_layout2_block, read_genotype_block, read_genotype_block_into,
        skip_genotype_block, BlockShape, GenotypeBlock, UnpackedBlock,
    },
    header::{read_header, read_sample_identifiers, Context},
    stream::TrackedReader,
    variant::VariantRecord,
};
use crate::{
    error::{FormatError, FormatErrorKind, Result},
    index::{FileMetadata, IndexQuery},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expecting {
    IdentifyingData,
    GenotypeBlock,
}

/// Sequential or index-driven access to the variants of a BGEN file
///
/// Reads alternate strictly: every [`View::read_variant`] must be followed by exactly
/// one call that reads or ignores the genotype block. Calling `read_variant` with a
/// block still pending skips that block.
///
/// ```rust,no_run
/// use bgenix::bgen::View;
///
/// let mut view = View::open("example.bgen").unwrap();
/// while let Some(variant) = view.read_variant().unwrap() {
///     let block = view.read_genotype_block().unwrap();
///     println!("{} {}", variant.rsid, block.samples.len());
/// }
/// ```
pub struct View {
    path: PathBuf,
    reader: TrackedReader<BufReader<File>>,
    offset: u32,
    context: Context,
    sample_identifiers: Option<Vec<String>>,
    metadata: FileMetadata,
    query: Option<IndexQuery>,
    selected: Option<usize>,
    next_variant: usize,
    expecting: Expecting,
    last_variant: Option<VariantRecord>,
}
impl View {
    /// Opens `path` and reads its header and sample identifiers
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let metadata = FileMetadata::from_path(path)?;
        let mut reader = TrackedReader::new(BufReader::new(File::open(path)?));
        let (offset, context) = read_header(&mut reader)?;
        let sample_identifiers = if context.has_sample_identifiers {
            Some(read_sample_identifiers(&mut reader, &context)?)
        } else {
            None
        };
        reader.seek_to(u64::from(offset) + 4)?;
        debug!(
            path = %path.display(),
            samples = context.number_of_samples,
            variants = context.number_of_variants,
            layout = context.layout.as_u8(),
            "opened bgen file"
        );
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            offset,
            context,
            sample_identifiers,
            metadata,
            query: None,
            selected: None,
            next_variant: 0,
            expecting: Expecting::IdentifyingData,
            last_variant: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The leading offset field; variant data starts at `offset + 4`
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    #[must_use]
    pub fn file_metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn number_of_samples(&self) -> u32 {
        self.context.number_of_samples
    }

    /// Number of variants this view will yield: the query result if one is set,
    /// otherwise the header count
    #[must_use]
    pub fn number_of_variants(&self) -> usize {
        self.selected.unwrap_or(self.context.number_of_variants as usize)
    }

    /// Sample names from the identifier block, or generated placeholders
    #[must_use]
    pub fn sample_identifiers(&self) -> Vec<String> {
        match &self.sample_identifiers {
            Some(ids) => ids.clone(),
            None => (0..self.context.number_of_samples)
                .map(|i| format!("(anonymous_sample_{})", i + 1))
                .collect(),
        }
    }

    /// The most recently read identifying data, for error context
    #[must_use]
    pub fn last_variant(&self) -> Option<&VariantRecord> {
        self.last_variant.as_ref()
    }

    /// Absolute position of the underlying reader
    #[must_use]
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// The index query restricting this view, if any
    #[must_use]
    pub fn query(&self) -> Option<&IndexQuery> {
        self.query.as_ref()
    }

    /// Restricts the view to the variants selected by an initialised index query
    ///
    /// The index metadata is checked against the file first; a stale index is an error.
    pub fn set_query(&mut self, query: IndexQuery) -> Result<()> {
        if let Some(recorded) = query.file_metadata() {
            recorded.verify(&self.metadata)?;
        }
        self.selected = Some(query.number_of_variants()?);
        self.query = Some(query);
        self.next_variant = 0;
        self.expecting = Expecting::IdentifyingData;
        Ok(())
    }

    /// Reads the identifying data of the next variant
    ///
    /// # Returns
    ///
    /// * `Ok(Some(variant))` - The next variant; its genotype block is pending
    /// * `Ok(None)` - All variants have been read
    pub fn read_variant(&mut self) -> Result<Option<VariantRecord>> {
        if self.expecting == Expecting::GenotypeBlock {
            self.ignore_genotype_block()?;
        }
        if self.next_variant >= self.number_of_variants() {
            return Ok(None);
        }
        if let Some(query) = &self.query {
            let (offset, _) = query.locate(self.next_variant)?;
            self.reader.seek_to(offset)?;
        }
        let Some(variant) = VariantRecord::read(&mut self.reader, &self.context)? else {
            return Ok(None);
        };
        self.next_variant += 1;
        self.expecting = Expecting::GenotypeBlock;
        self.last_variant = Some(variant.clone());
        Ok(Some(variant))
    }

    /// Marks the pending block as consumed and returns its offset
    fn take_block(&mut self) -> Result<u64> {
        if self.expecting != Expecting::GenotypeBlock {
            return Err(anyhow!("genotype block requested before identifying data").into());
        }
        self.expecting = Expecting::IdentifyingData;
        Ok(self.reader.position())
    }

    /// A block must carry as many alleles as its identifying data declares
    fn check_allele_count(&self, offset: u64, found: u16) -> Result<()> {
        match &self.last_variant {
            Some(variant) if variant.number_of_alleles() != usize::from(found) => {
                Err(FormatError::new(
                    offset,
                    FormatErrorKind::AlleleCountMismatch {
                        expected: variant.number_of_alleles(),
                        found,
                    },
                )
                .into())
            }
            _ => Ok(()),
        }
    }

    /// Skips the pending genotype block
    pub fn ignore_genotype_block(&mut self) -> Result<()> {
        self.take_block()?;
        skip_genotype_block(&mut self.reader, &self.context)?;
        Ok(())
    }

    /// Reads and decodes the pending genotype block
    pub fn read_genotype_block(&mut self) -> Result<GenotypeBlock> {
        let offset = self.take_block()?;
        let block = read_genotype_block(&mut self.reader, &self.context)?;
        self.check_allele_count(offset, block.number_of_alleles)?;
        Ok(block)
    }

    /// Decodes the pending genotype block into `consumer`
    pub fn read_genotype_block_into<C: GenotypeConsumer>(
        &mut self,
        consumer: &mut C,
    ) -> Result<BlockShape> {
        let offset = self.take_block()?;
        let shape = read_genotype_block_into(&mut self.reader, &self.context, consumer)?;
        self.check_allele_count(offset, shape.number_of_alleles)?;
        Ok(shape)
    }

    /// Reads the pending layout 2 block without decoding its probabilities
    pub fn read_and_unpack_layout2_block(&mut self) -> Result<UnpackedBlock> {
        let offset = self.take_block()?;
        let block = read_and_unpack_layout2_block(&mut self.reader, &self.context)?;
        self.check_allele_count(offset, block.number_of_alleles)?;
        Ok(block)
    }
}
