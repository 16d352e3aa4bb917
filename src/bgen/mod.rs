//! # BGEN codec
//!
//! BGEN stores genotype probabilities for many samples across many variants. A file
//! consists of:
//!
//! ```text
//! | offset u32 | header block | sample identifier block (optional) | variant 1 | variant 2 | ...
//! ```
//!
//! and each variant consists of its identifying data (ids, chromosome, position,
//! alleles) followed by one genotype block.
//!
//! Two layouts exist. Layout 1 fixes every sample to diploid, unphased and biallelic
//! with three 16-bit probabilities. Layout 2 allows any ploidy up to 63, phased data,
//! any number of alleles, and stores probabilities at 1 to 32 bits each.
//!
//! All integers are little-endian.

mod compression;
mod consumer;
mod genotype;
mod header;
mod stream;
mod variant;
mod view;
mod writer;

pub use compression::{compress, decompress, DEFAULT_COMPRESSION_LEVEL};
pub use consumer::{GenotypeBlockBuilder, GenotypeConsumer, OrderType, ValueType};
pub use genotype::{
    number_of_entries, number_of_genotypes, number_of_stored_values, read_and_unpack_layout2_block,
    read_genotype_block, read_genotype_block_into, skip_genotype_block, write_genotype_block,
    BlockShape, GenotypeBlock, SampleGenotype, UnpackedBlock, LAYOUT1_SCALE, MISSING_BIT,
    PLOIDY_MASK,
};
pub use header::{
    read_header, read_sample_identifiers, sample_identifier_block_size, write_header,
    write_sample_identifiers, Compression, Context, Layout, FINGERPRINT_SIZE, FIXED_HEADER_SIZE,
    FLAG_SAMPLE_IDENTIFIERS, MAGIC,
};
pub use stream::TrackedReader;
pub(crate) use stream::write_u32;
pub use variant::VariantRecord;
pub use view::View;
pub use writer::{BgenWriter, BgenWriterBuilder};
