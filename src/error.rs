use std::path::PathBuf;

/// Custom Result type for bgenix operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the bgenix library, encompassing all possible error cases
/// that can occur while decoding, indexing, transcoding or editing BGEN files.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed or truncated BGEN data
    #[error(transparent)]
    FormatError(#[from] FormatError),
    /// Errors related to building, opening or querying an index
    #[error(transparent)]
    IndexError(#[from] IndexError),
    /// A transcode precondition was not met
    #[error(transparent)]
    TranscodeError(#[from] TranscodeError),
    /// Errors that occur while serialising BGEN data
    #[error(transparent)]
    WriteError(#[from] WriteError),
    /// Errors that occur while editing or concatenating files in place
    #[error(transparent)]
    EditError(#[from] EditError),
    /// Failures from the sqlite store backing the index
    #[error(transparent)]
    StoreError(#[from] rusqlite::Error),
    /// Standard I/O errors from the Rust standard library
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// UTF-8 encoding/decoding errors in identifiers
    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),
    /// Generic errors that can occur in any part of the system
    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
}
impl Error {
    /// Checks if the error means the index no longer describes its BGEN file
    ///
    /// This is useful for determining if the index needs to be rebuilt.
    ///
    /// # Returns
    ///
    /// * `true` if the error is an `IndexError::SizeMismatch` or `IndexError::FingerprintMismatch`
    /// * `false` for all other error types
    #[must_use]
    pub fn is_index_mismatch(&self) -> bool {
        match self {
            Self::IndexError(err) => err.is_mismatch(),
            _ => false,
        }
    }
}

/// Malformed binary input, located by the absolute byte offset where it was detected
#[derive(thiserror::Error, Debug)]
#[error("Malformed BGEN data at byte {offset}: {kind}")]
pub struct FormatError {
    /// Absolute byte offset in the input stream
    pub offset: u64,
    /// What was wrong with the data
    pub kind: FormatErrorKind,
}
impl FormatError {
    #[must_use]
    pub fn new(offset: u64, kind: FormatErrorKind) -> Self {
        Self { offset, kind }
    }
}

/// The specific reasons a BGEN stream can fail to parse
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FormatErrorKind {
    /// The stream ended in the middle of a structure
    #[error("unexpected end of data")]
    Truncated,

    /// The header flags use an unknown layout, compression or reserved bit
    #[error("unrecognised flags 0x{0:08x}")]
    InvalidFlags(u32),

    /// The header length field is too small to hold the fixed header fields
    #[error("header length {0} is smaller than the fixed header size (20)")]
    InvalidHeaderLength(u32),

    /// The leading offset points inside the header block
    #[error("data offset {offset} is smaller than the header length {header_length}")]
    InvalidOffset { offset: u32, header_length: u32 },

    /// The magic bytes are neither "bgen" nor zero
    #[error("invalid magic bytes {0:?}")]
    InvalidMagic([u8; 4]),

    /// A sample count inside the file disagrees with the header
    #[error("sample count {found} does not match header sample count {expected}")]
    SampleCountMismatch { expected: u32, found: u32 },

    /// The sample identifier block length disagrees with its content
    #[error("sample identifier block declares {declared} bytes but contains {actual}")]
    SampleBlockLength { declared: u32, actual: u64 },

    /// A variant declares fewer than two alleles
    #[error("variant has {0} alleles, at least 2 are required")]
    TooFewAlleles(u16),

    /// A genotype block declares an unusable bit depth
    #[error("invalid number of bits per probability: {0}")]
    InvalidBitDepth(u8),

    /// A sample declares a ploidy above the format maximum of 63
    #[error("invalid ploidy {0}")]
    InvalidPloidy(u8),

    /// The phased flag is neither 0 nor 1
    #[error("invalid phased flag {0}")]
    InvalidPhasedFlag(u8),

    /// The genotype block envelope lengths are inconsistent
    #[error("genotype block length {0} is too small")]
    InvalidBlockLength(u32),

    /// Decompression did not produce the declared number of bytes
    #[error("decompressed {actual} bytes, expected {expected}")]
    DecompressedSizeMismatch { expected: u64, actual: u64 },

    /// The packed probability array is shorter than the stored values require
    #[error("probability data holds {actual} bytes, {required} required")]
    ProbabilityDataTooShort { required: u64, actual: u64 },

    /// Stored probability codes exceed the representable total for a distribution
    #[error("stored probabilities sum to {sum}, exceeding the maximum {max}")]
    ProbabilitySumOverflow { sum: u64, max: u64 },

    /// The number of genotypes for a ploidy/allele count does not fit in memory
    #[error("too many genotypes for ploidy {ploidy} and {alleles} alleles")]
    GenotypeCountOverflow { ploidy: u8, alleles: u16 },

    /// The genotype block's allele count disagrees with its identifying data
    #[error("genotype block has {found} alleles, the variant declares {expected}")]
    AlleleCountMismatch { expected: usize, found: u16 },
}

/// Errors that can occur while serialising BGEN data
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// A string field does not fit its length prefix
    #[error("Field {field} has length {length}, which exceeds the maximum of {max}")]
    FieldTooLong {
        field: &'static str,
        length: usize,
        max: usize,
    },

    /// A variant must carry at least two alleles (exactly two for layout 1)
    #[error("Cannot write variant with {found} alleles under layout {layout}")]
    InvalidAlleleCount { found: usize, layout: u8 },

    /// The genotype block does not have one entry per sample
    #[error("Genotype block has {found} samples, the header declares {expected}")]
    SampleCountMismatch { expected: u32, found: usize },

    /// A sample's probability vector has the wrong length for its ploidy
    #[error("Sample {sample} has {found} probabilities, expected {expected}")]
    EntryCountMismatch {
        sample: usize,
        expected: usize,
        found: usize,
    },

    /// The genotype count for a sample's ploidy and allele count does not fit in memory
    #[error("Sample {sample} has too many genotypes for ploidy {ploidy} and {alleles} alleles")]
    GenotypeCountOverflow { sample: usize, ploidy: u8, alleles: u16 },

    /// A probability distribution does not sum to one
    #[error("Probabilities for sample {sample} sum to {sum}, expected 1")]
    ProbabilitiesDoNotSumToOne { sample: usize, sum: f64 },

    /// The block shape cannot be represented in layout 1
    #[error("Layout 1 only supports diploid, unphased, biallelic data")]
    UnsupportedLayoutOneBlock,

    /// The number of bits per probability is outside 1..=32
    #[error("Invalid number of bits per probability: {0}")]
    InvalidBitDepth(u8),

    /// Ploidy is stored in 6 bits
    #[error("Sample {sample} has ploidy {ploidy}, the maximum is 63")]
    InvalidPloidy { sample: usize, ploidy: u8 },

    /// The number of variants written disagrees with the header
    #[error("Header declares {expected} variants but {written} were written")]
    VariantCountMismatch { expected: u32, written: u32 },

    /// The supplied sample identifiers disagree with the header
    #[error("Header declares {expected} samples but {found} identifiers were supplied")]
    SampleIdentifierCountMismatch { expected: u32, found: usize },
}

/// Errors related to index files
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The BGEN file size differs from the one recorded at index creation
    #[error(
        "Size of file \"{filename}\" ({actual} bytes) differs from that recorded in the index file ({expected} bytes). Do you need to recreate the index?"
    )]
    SizeMismatch {
        filename: String,
        expected: u64,
        actual: u64,
    },

    /// The leading bytes of the BGEN file differ from the recorded fingerprint
    #[error(
        "File \"{filename}\" has different initial bytes than recorded in the index file. Do you need to recreate the index?"
    )]
    FingerprintMismatch { filename: String },

    /// The index already exists and overwriting was not requested
    #[error("The index file {0:?} already exists, use clobber to overwrite it")]
    AlreadyExists(PathBuf),

    /// A partial index from an interrupted build is present
    #[error(
        "An incomplete index file {0:?} already exists. This probably reflects a previous run that was terminated; delete it or use clobber"
    )]
    IncompleteBuildPresent(PathBuf),

    /// The index file could not be found
    #[error("Index file {0:?} does not exist")]
    Missing(PathBuf),

    /// The index file holds no metadata row
    #[error("Index file {0:?} has no metadata")]
    MissingMetadata(PathBuf),

    /// The requested table name is not a plain identifier
    #[error("Invalid index table name: {0}")]
    InvalidTableName(String),

    /// A genomic range string could not be parsed
    #[error("Invalid range specification \"{0}\", expected <chr>:<pos1>-<pos2>")]
    InvalidRange(String),

    /// A genomic range has its bounds reversed
    #[error("Invalid range: lower bound ({lower}) is greater than upper bound ({upper})")]
    EmptyRange { lower: u32, upper: u32 },

    /// Attempted to locate a variant beyond the query result
    #[error("Requested variant index ({requested}) is out of range ({available} variants)")]
    OutOfRange { requested: usize, available: usize },

    /// The query must be initialised before its results are used
    #[error("Index query has not been initialised")]
    Uninitialised,

    /// Index construction failed after reading part of the BGEN file
    #[error(
        "Index build failed; last observed variant was {last_variant}, reached byte {offset} of {file_size}: {source}"
    )]
    BuildFailed {
        last_variant: String,
        offset: u64,
        file_size: u64,
        source: Box<crate::Error>,
    },
}
impl IndexError {
    /// Checks if this error indicates a mismatch between the index and file
    ///
    /// This is useful to determine if the index needs to be rebuilt.
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            Self::SizeMismatch { .. } | Self::FingerprintMismatch { .. }
        )
    }
}

/// Constraint violations raised while transcoding
#[derive(thiserror::Error, Debug)]
pub enum TranscodeError {
    /// The input layout cannot be transcoded to the requested output
    #[error("Transcoding requires layout {expected} input, found layout {found}")]
    UnsupportedLayout { expected: u8, found: u8 },

    /// A variant does not meet the requirements of the output format
    #[error("Variant {variant} cannot be transcoded: {reason}")]
    ConstraintViolation {
        variant: String,
        reason: ConstraintKind,
    },
}

/// The individual preconditions of the layout 2 to layout 1 conversion
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    #[error("found {0} alleles, only 2 are supported")]
    AlleleCount(usize),
    #[error("expected 8 bits per probability, found {0}")]
    BitDepth(u8),
    #[error("expected unphased data")]
    Phased,
    #[error("expected all samples diploid, found ploidy {0}")]
    Ploidy(u8),
}

/// Errors raised when editing or concatenating files
#[derive(thiserror::Error, Debug)]
pub enum EditError {
    /// No input files were given
    #[error("No input files supplied")]
    NoInputs,

    /// The output path exists and overwriting was not requested
    #[error("Output file {0:?} exists, use clobber to overwrite it")]
    OutputExists(PathBuf),

    /// Replacement free data must keep the existing length
    #[error(
        "In file {path:?}: size of new free data ({new} bytes) does not match that of free data in file ({existing} bytes)"
    )]
    FreeDataLengthMismatch {
        path: PathBuf,
        existing: usize,
        new: usize,
    },

    /// Concatenated inputs must share their sample count
    #[error("Input file {path:?} has {found} samples, expected {expected}")]
    SampleCountMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    /// Concatenated inputs must share their flags
    #[error("Input file {path:?} has flags 0x{found:x}, expected 0x{expected:x}")]
    FlagsMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
}
