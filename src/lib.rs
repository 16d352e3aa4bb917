//! # bgenix
//!
//! Reading, writing, indexing and transcoding of BGEN genotype probability files.
//!
//! - [`bgen`]: the binary codec and the [`View`](bgen::View) over a file
//! - [`index`]: building and querying the sqlite variant index
//! - [`transcode`]: variant lists, VCF, layout 1 output and raw selection copies
//! - [`edit`]: concatenation and in-place header edits
//!
//! ```rust,no_run
//! use bgenix::{bgen::View, index::{IndexBuilder, IndexQuery, Query}};
//!
//! IndexBuilder::default().build("chr1.bgen", "chr1.bgen.bgi").unwrap();
//! let mut query = IndexQuery::open("chr1.bgen.bgi", "Variant").unwrap();
//! query.initialise(&Query::new().include_range("1:1000-2000".parse().unwrap())).unwrap();
//! let mut view = View::open("chr1.bgen").unwrap();
//! view.set_query(query).unwrap();
//! while let Some(variant) = view.read_variant().unwrap() {
//!     println!("{variant}");
//! }
//! ```

pub mod bgen;
pub mod bits;
pub mod edit;
mod error;
pub mod index;
pub mod program;
pub mod transcode;

pub use error::{
    ConstraintKind, EditError, Error, FormatError, FormatErrorKind, IndexError, Result,
    TranscodeError, WriteError,
};
pub use program::ProgramInfo;

#[cfg(test)]
pub(crate) mod testing {

    use std::{
        io::{BufWriter, Write},
        path::Path,
    };

    use proptest::prelude::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;
    use crate::bgen::{
        write_genotype_block, write_header, BgenWriterBuilder, Compression, Context,
        GenotypeBlock, Layout, SampleGenotype, UnpackedBlock, VariantRecord, View,
    };
    use crate::bits::BitWriter;
    use crate::index::{
        default_index_path, GenomicRange, IndexBuilder, IndexEntry, IndexQuery, Query,
    };
    use crate::transcode::{transcode_to_v11, write_fast_samples, write_general_samples, VcfTable};

    /// Number of samples in files written by [`write_test_file`]
    pub const TEST_SAMPLES: u32 = 3;

    /// A variant and its genotype block, ready to be written
    #[derive(Clone, Debug)]
    pub struct TestVariant {
        pub variant: VariantRecord,
        pub block: GenotypeBlock,
    }
    impl TestVariant {
        /// An `A`/`G` variant with SNPID `SNP_<rsid>` and three diploid samples at
        /// 8 bits, the second of which is missing
        pub fn biallelic(rsid: &str, chromosome: &str, position: u32) -> Self {
            Self {
                variant: VariantRecord::new(
                    format!("SNP_{rsid}"),
                    rsid.to_string(),
                    chromosome.to_string(),
                    position,
                    vec!["A".to_string(), "G".to_string()],
                ),
                block: GenotypeBlock {
                    number_of_alleles: 2,
                    phased: false,
                    bits: 8,
                    samples: vec![
                        SampleGenotype::new(2, vec![0.95, 0.03, 0.02]),
                        SampleGenotype::missing(2),
                        SampleGenotype::new(2, vec![0.1, 0.3, 0.6]),
                    ],
                },
            }
        }
    }

    fn write_file(
        path: &Path,
        variants: &[TestVariant],
        number_of_samples: u32,
        sample_identifiers: Option<Vec<String>>,
        free_data: &[u8],
    ) -> Result<()> {
        let mut context = Context::new(
            number_of_samples,
            variants.len() as u32,
            Layout::Two,
            Compression::Zlib,
        );
        context.free_data = free_data.to_vec();
        let mut builder = BgenWriterBuilder::default().context(context);
        if let Some(ids) = sample_identifiers {
            builder = builder.sample_identifiers(ids);
        }
        let mut writer = builder.build(std::fs::File::create(path)?)?;
        for test in variants {
            writer.write_variant(&test.variant, &test.block)?;
        }
        writer.finish()?;
        Ok(())
    }

    /// Writes a zlib-compressed layout 2 file with [`TEST_SAMPLES`] samples and no
    /// sample identifiers
    pub fn write_test_file(path: &Path, variants: &[TestVariant]) -> Result<()> {
        write_file(path, variants, TEST_SAMPLES, None, b"")
    }

    pub fn write_test_file_with(
        path: &Path,
        variants: &[TestVariant],
        sample_identifiers: Option<Vec<String>>,
        free_data: &[u8],
    ) -> Result<()> {
        write_file(path, variants, TEST_SAMPLES, sample_identifiers, free_data)
    }

    pub fn write_test_file_samples(
        path: &Path,
        variants: &[TestVariant],
        number_of_samples: u32,
    ) -> Result<()> {
        write_file(path, variants, number_of_samples, None, b"")
    }

    /// Writes a single variant declaring `A`/`G` whose genotype block carries three
    /// alleles, bypassing the writer's consistency check
    pub fn write_allele_mismatch_file(path: &Path) -> Result<()> {
        let context = Context::new(TEST_SAMPLES, 1, Layout::Two, Compression::Zlib);
        let mut out = BufWriter::new(std::fs::File::create(path)?);
        write_header(&mut out, context.header_size(), &context)?;
        TestVariant::biallelic("rsM", "1", 5)
            .variant
            .write(&mut out, &context)?;
        let block = GenotypeBlock {
            number_of_alleles: 3,
            phased: false,
            bits: 8,
            samples: vec![SampleGenotype::new(2, vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0]); 3],
        };
        write_genotype_block(&mut out, &context, &block, 6)?;
        out.flush()?;
        Ok(())
    }

    fn indexed_fixture(dir: &Path, variants: &[TestVariant]) -> Result<IndexQuery> {
        let bgen = dir.join("fixture.bgen");
        write_test_file(&bgen, variants)?;
        let index = default_index_path(&bgen);
        IndexBuilder::default().clobber(true).build(&bgen, &index)?;
        IndexQuery::open(&index, "Variant")
    }

    fn rsids(entries: &[IndexEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.rsid.as_str()).collect()
    }

    #[test]
    fn test_range_query_selects_middle_variant() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let handle = indexed_fixture(
            dir.path(),
            &[
                TestVariant::biallelic("rs1", "1", 50),
                TestVariant::biallelic("rs2", "1", 120),
                TestVariant::biallelic("rs3", "1", 300),
            ],
        )?;
        let entries = handle.entries(&Query::new().include_range("1:100-150".parse()?))?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].position, 120);
        Ok(())
    }

    #[test]
    fn test_exclusion_overrides_inclusion() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let handle = indexed_fixture(
            dir.path(),
            &[
                TestVariant::biallelic("rsX", "1", 10),
                TestVariant::biallelic("rsY", "1", 20),
                TestVariant::biallelic("rsZ", "1", 30),
            ],
        )?;
        let query = Query::new()
            .include_rsids(["rsX", "rsY"])
            .exclude_rsids(["rsY"]);
        assert_eq!(rsids(&handle.entries(&query)?), ["rsX"]);
        Ok(())
    }

    #[test]
    fn test_rebuilt_index_is_identical() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bgen = dir.path().join("fixture.bgen");
        write_test_file(
            &bgen,
            &[
                TestVariant::biallelic("rs1", "2", 5),
                TestVariant::biallelic("rs2", "1", 7),
                TestVariant::biallelic("rs3", "1", 7),
            ],
        )?;
        let index = default_index_path(&bgen);
        let mut builds = Vec::new();
        for _ in 0..2 {
            IndexBuilder::default().clobber(true).build(&bgen, &index)?;
            let handle = IndexQuery::open(&index, "Variant")?;
            let metadata = handle.file_metadata().cloned();
            builds.push((handle.entries(&Query::new())?, metadata));
        }
        let (first_entries, first_metadata) = &builds[0];
        let (second_entries, second_metadata) = &builds[1];
        assert_eq!(first_entries, second_entries);
        assert_eq!(rsids(first_entries), ["rs2", "rs3", "rs1"]);
        assert!(first_metadata.is_some());
        assert_eq!(first_metadata, second_metadata);
        Ok(())
    }

    /// Builds a diploid biallelic unphased block directly from stored codes
    fn unpacked_block(bits: u8, codes: &[Option<(u32, u32)>]) -> Result<UnpackedBlock> {
        let n = codes.len() as u32;
        let mut payload = Vec::new();
        payload.extend_from_slice(&n.to_le_bytes());
        payload.extend_from_slice(&2u16.to_le_bytes());
        payload.extend_from_slice(&[2, 2]);
        for code in codes {
            payload.push(if code.is_some() { 2 } else { 2 | crate::bgen::MISSING_BIT });
        }
        payload.extend_from_slice(&[0, bits]);
        let mut packed = BitWriter::new();
        for &(x, y) in codes.iter().map(|c| c.as_ref().unwrap_or(&(0, 0))) {
            packed.push(x, bits);
            packed.push(y, bits);
        }
        payload.extend_from_slice(&packed.finish());
        let context = Context::new(n, 1, Layout::Two, Compression::None);
        UnpackedBlock::from_payload(payload, &context, 0)
    }

    #[test]
    fn test_fast_and_general_vcf_paths_agree() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(42);
        for bits in [1u8, 2, 4, 8] {
            let max = crate::bits::max_code(bits) as u32;
            let codes: Vec<_> = (0..1000)
                .map(|_| {
                    if rng.random_bool(0.1) {
                        return None;
                    }
                    let x = rng.random_range(0..=max);
                    let y = rng.random_range(0..=max - x);
                    Some((x, y))
                })
                .collect();
            let block = unpacked_block(bits, &codes)?;
            let mut fast = Vec::new();
            write_fast_samples(&mut fast, &block, &VcfTable::new(bits))?;
            let mut general = Vec::new();
            write_general_samples(&mut general, &block)?;
            assert_eq!(
                String::from_utf8(fast).unwrap(),
                String::from_utf8(general).unwrap(),
                "paths disagree at {bits} bits"
            );
        }
        Ok(())
    }

    #[test]
    fn test_v11_output_is_deterministic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("v2.bgen");
        write_test_file(
            &path,
            &[
                TestVariant::biallelic("rs1", "1", 10),
                TestVariant::biallelic("rs2", "3", 10),
            ],
        )?;
        let mut first = Vec::new();
        transcode_to_v11(&mut View::open(&path)?, &mut first, 9)?;
        let mut second = Vec::new();
        transcode_to_v11(&mut View::open(&path)?, &mut second, 9)?;
        assert_eq!(first, second);
        Ok(())
    }

    fn range_strategy() -> impl Strategy<Value = GenomicRange> {
        (
            prop::sample::select(vec!["1", "2"]),
            prop::option::of(0u32..100),
            prop::option::of(0u32..100),
        )
            .prop_map(|(chromosome, a, b)| {
                let (start, end) = match (a, b) {
                    (Some(a), Some(b)) => (Some(a.min(b)), Some(a.max(b))),
                    other => other,
                };
                GenomicRange {
                    chromosome: chromosome.to_string(),
                    start,
                    end,
                }
            })
    }

    fn rsid_strategy() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec((0u32..8).prop_map(|i| format!("rs{i}")), 0..3)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_sql_query_agrees_with_matches(
            included_ranges in prop::collection::vec(range_strategy(), 0..3),
            excluded_ranges in prop::collection::vec(range_strategy(), 0..2),
            included_rsids in rsid_strategy(),
            excluded_rsids in rsid_strategy(),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let variants: Vec<_> = (0..8)
                .map(|i| {
                    let chromosome = if i % 3 == 0 { "2" } else { "1" };
                    TestVariant::biallelic(&format!("rs{i}"), chromosome, i * 13)
                })
                .collect();
            let handle = indexed_fixture(dir.path(), &variants).unwrap();
            let query = Query {
                included_ranges,
                excluded_ranges,
                included_rsids,
                excluded_rsids,
            };
            let expected: Vec<_> = handle
                .entries(&Query::new())
                .unwrap()
                .into_iter()
                .filter(|e| query.matches(e))
                .collect();
            prop_assert_eq!(handle.entries(&query).unwrap(), expected);
        }
    }
}
