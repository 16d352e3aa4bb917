//! # VCF export
//!
//! Every variant becomes one VCF line with a `GT:GP` (or `GT:HP` when phased) field
//! per sample. Two code paths produce identical text:
//!
//! - a fast path for diploid, unphased, biallelic blocks at 1, 2, 4 or 8 bits, which
//!   looks up the pre-rendered field for each sample's packed code in a [`VcfTable`]
//! - a general path that decodes through a [`GenotypeConsumer`] and infers the call
//!   from the full probability vector

use std::{collections::HashMap, io::Write};

use tracing::{debug, info};

use crate::{
    bgen::{
        GenotypeConsumer, Layout, OrderType, UnpackedBlock, ValueType, VariantRecord, View,
        PLOIDY_MASK,
    },
    bits,
    error::{FormatError, FormatErrorKind, Result},
    program::{file_date, ProgramInfo},
};

/// Probability above which a genotype or haplotype is called
pub const CALL_THRESHOLD: f64 = 0.9;

/// Bit depths served by [`VcfTable`]
pub const FAST_PATH_BITS: [u8; 4] = [1, 2, 4, 8];

/// Number of decimal places used to print probabilities stored at `bits` bits
///
/// Enough places to distinguish neighbouring codes without printing noise.
#[must_use]
pub fn decimal_places(bits: u8) -> usize {
    match bits {
        1 => 0,
        2 => 2,
        3..=4 => 3,
        5..=8 => 4,
        9..=16 => 6,
        _ => 8,
    }
}

/// Writes the VCF meta lines and the column header
pub fn write_vcf_header<W: Write>(
    out: &mut W,
    program: &ProgramInfo,
    sample_identifiers: &[String],
) -> Result<()> {
    writeln!(out, "##fileformat=VCFv4.2")?;
    writeln!(out, "##fileDate={}", file_date())?;
    writeln!(out, "##source={}", program.source())?;
    writeln!(
        out,
        "##FORMAT=<ID=GT,Type=String,Number=1,Description=\"Threshholded genotype call\">"
    )?;
    writeln!(
        out,
        "##FORMAT=<ID=GP,Type=Float,Number=G,Description=\"Genotype call probabilities\">"
    )?;
    writeln!(
        out,
        "##FORMAT=<ID=HP,Type=Float,Number=.,Description=\"Haplotype call probabilities\">"
    )?;
    write!(out, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT")?;
    for sample in sample_identifiers {
        write!(out, "\t{sample}")?;
    }
    writeln!(out)?;
    Ok(())
}

/// The fixed columns of a data line, up to and including FORMAT
fn write_variant_columns(line: &mut Vec<u8>, variant: &VariantRecord, format: &str) -> Result<()> {
    let mut position = itoa::Buffer::new();
    line.extend_from_slice(variant.chromosome.as_bytes());
    line.push(b'\t');
    line.extend_from_slice(position.format(variant.position).as_bytes());
    line.push(b'\t');
    line.extend_from_slice(variant.rsid.as_bytes());
    if variant.snpid != variant.rsid {
        line.push(b';');
        line.extend_from_slice(variant.snpid.as_bytes());
    }
    write!(line, "\t{}\t", variant.allele1())?;
    line.extend_from_slice(variant.alleles[1..].join(",").as_bytes());
    write!(line, "\t.\t.\t.\t{format}")?;
    Ok(())
}

/// Pre-rendered `GT:GP` fields for every packed code of a diploid biallelic sample
///
/// The code of a sample is `x | y << bits`, where `x` and `y` are the two stored
/// values. Codes with `x + y > 2^bits - 1` are not valid probabilities and have
/// no entry.
#[derive(Debug)]
pub struct VcfTable {
    bits: u8,
    entries: Vec<Option<Box<str>>>,
}
impl VcfTable {
    /// Field rendered for missing samples
    pub const MISSING: &'static str = "./.:.,.,.";

    /// Builds the table for `bits`, which must be one of [`FAST_PATH_BITS`]
    #[must_use]
    pub fn new(bits: u8) -> Self {
        let max = bits::max_code(bits) as u32;
        let divisor = f64::from(max);
        let places = decimal_places(bits);
        let size = 1usize << (2 * bits);
        let mut entries = Vec::with_capacity(size);
        for key in 0..size as u32 {
            let x = key & max;
            let y = key >> bits;
            if x + y > max {
                entries.push(None);
                continue;
            }
            let z = max - x - y;
            let probs = [f64::from(x) / divisor, f64::from(y) / divisor, f64::from(z) / divisor];
            let call = if probs[0] > CALL_THRESHOLD {
                "0/0"
            } else if probs[1] > CALL_THRESHOLD {
                "0/1"
            } else if probs[2] > CALL_THRESHOLD {
                "1/1"
            } else {
                "./."
            };
            let field = format!(
                "{call}:{:.places$},{:.places$},{:.places$}",
                probs[0], probs[1], probs[2]
            );
            entries.push(Some(field.into_boxed_str()));
        }
        debug!(bits, entries = size, "built VCF lookup table");
        Self { bits, entries }
    }

    #[must_use]
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// The rendered field for `key`, or `None` if the code overflows
    #[must_use]
    pub fn entry(&self, key: u32) -> Option<&str> {
        self.entries.get(key as usize).and_then(|e| e.as_deref())
    }
}

/// Lazily built [`VcfTable`]s, one per bit depth
#[derive(Debug, Default)]
pub struct VcfTables {
    tables: HashMap<u8, VcfTable>,
}
impl VcfTables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, bits: u8) -> &VcfTable {
        self.tables.entry(bits).or_insert_with(|| VcfTable::new(bits))
    }
}

/// Whether `block` can be rendered with a [`VcfTable`]
#[must_use]
pub fn supports_fast_path(block: &UnpackedBlock) -> bool {
    FAST_PATH_BITS.contains(&block.bits)
        && !block.phased
        && block.number_of_alleles == 2
        && block.min_ploidy == 2
        && block.max_ploidy == 2
        && block.ploidy_bytes().iter().all(|b| b & PLOIDY_MASK == 2)
}

/// Appends one tab-prefixed field per sample of a fast-path block
pub fn write_fast_samples(
    line: &mut Vec<u8>,
    block: &UnpackedBlock,
    table: &VcfTable,
) -> Result<()> {
    let data = block.probability_data();
    let max = bits::max_code(table.bits());
    for i in 0..block.number_of_samples as usize {
        line.push(b'\t');
        if block.is_missing(i) {
            line.extend_from_slice(VcfTable::MISSING.as_bytes());
            continue;
        }
        let key = bits::extract_sample(data, i, table.bits(), 2);
        let Some(field) = table.entry(key) else {
            let x = u64::from(key) & max;
            let y = u64::from(key) >> table.bits();
            return Err(FormatError::new(
                block.offset,
                FormatErrorKind::ProbabilitySumOverflow { sum: x + y, max },
            )
            .into());
        };
        line.extend_from_slice(field.as_bytes());
    }
    Ok(())
}

/// The threshold call for an unphased sample
///
/// Genotypes are visited in colex order of their per-allele counts, the order in
/// which probabilities are stored. The first with probability above
/// [`CALL_THRESHOLD`] is rendered as its allele indices joined by `/`.
#[must_use]
pub fn unphased_call(ploidy: u8, number_of_alleles: usize, probabilities: &[f64]) -> String {
    if ploidy == 0 || number_of_alleles == 0 {
        return ".".to_string();
    }
    let mut counts = vec![0u32; number_of_alleles];
    counts[0] = u32::from(ploidy);
    for &prob in probabilities {
        if prob > CALL_THRESHOLD {
            let mut alleles = Vec::with_capacity(usize::from(ploidy));
            for (allele, &count) in counts.iter().enumerate() {
                for _ in 0..count {
                    alleles.push(allele.to_string());
                }
            }
            return alleles.join("/");
        }
        if !next_genotype(&mut counts) {
            break;
        }
    }
    missing_call(ploidy, '/')
}

/// Steps `counts` to the next genotype in colex order; `false` after the last one
fn next_genotype(counts: &mut [u32]) -> bool {
    let Some(j) = (0..counts.len().saturating_sub(1)).find(|&j| counts[j] > 0) else {
        return false;
    };
    let rest = counts[j] - 1;
    counts[j] = 0;
    counts[j + 1] += 1;
    counts[0] = rest;
    true
}

/// The threshold call for a phased sample, one allele (or `.`) per haplotype
#[must_use]
pub fn phased_call(ploidy: u8, number_of_alleles: usize, probabilities: &[f64]) -> String {
    if ploidy == 0 {
        return ".".to_string();
    }
    probabilities
        .chunks(number_of_alleles.max(1))
        .take(usize::from(ploidy))
        .map(|haplotype| {
            haplotype
                .iter()
                .position(|&p| p > CALL_THRESHOLD)
                .map_or_else(|| ".".to_string(), |allele| allele.to_string())
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn missing_call(ploidy: u8, separator: char) -> String {
    if ploidy == 0 {
        return ".".to_string();
    }
    vec!["."; usize::from(ploidy)].join(&separator.to_string())
}

/// Renders the samples of a block as tab-prefixed VCF fields
pub struct VcfSampleWriter<'a> {
    line: &'a mut Vec<u8>,
    decimal_places: usize,
    number_of_alleles: usize,
    ploidy: u8,
    phased: bool,
    missing: bool,
    values: Vec<f64>,
    pending: bool,
}
impl<'a> VcfSampleWriter<'a> {
    pub fn new(line: &'a mut Vec<u8>, decimal_places: usize) -> Self {
        Self {
            line,
            decimal_places,
            number_of_alleles: 0,
            ploidy: 0,
            phased: false,
            missing: false,
            values: Vec::new(),
            pending: false,
        }
    }

    fn flush(&mut self) {
        if !self.pending {
            return;
        }
        self.pending = false;
        let separator = if self.phased { '|' } else { '/' };
        let call = if self.missing {
            missing_call(self.ploidy, separator)
        } else if self.phased {
            phased_call(self.ploidy, self.number_of_alleles, &self.values)
        } else {
            unphased_call(self.ploidy, self.number_of_alleles, &self.values)
        };
        self.line.push(b'\t');
        self.line.extend_from_slice(call.as_bytes());
        self.line.push(b':');
        if self.values.is_empty() {
            self.line.push(b'.');
            return;
        }
        let places = self.decimal_places;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                self.line.push(b',');
            }
            if self.missing {
                self.line.push(b'.');
            } else {
                self.line
                    .extend_from_slice(format!("{value:.places$}").as_bytes());
            }
        }
    }
}
impl GenotypeConsumer for VcfSampleWriter<'_> {
    fn initialise(&mut self, _number_of_samples: usize, number_of_alleles: usize) {
        self.number_of_alleles = number_of_alleles;
        self.pending = false;
    }

    fn set_sample(&mut self, _i: usize) -> bool {
        self.flush();
        self.pending = true;
        true
    }

    fn set_number_of_entries(
        &mut self,
        ploidy: u8,
        number_of_entries: usize,
        order: OrderType,
        _value_type: ValueType,
    ) {
        self.ploidy = ploidy;
        self.phased = order == OrderType::PerPhasedHaplotypePerAllele;
        self.missing = false;
        self.values.clear();
        self.values.reserve(number_of_entries);
    }

    fn set_value(&mut self, _entry: usize, value: f64) -> Result<()> {
        self.values.push(value);
        Ok(())
    }

    fn set_missing(&mut self, _entry: usize) -> Result<()> {
        self.missing = true;
        self.values.push(0.0);
        Ok(())
    }

    fn finalise(&mut self) -> Result<()> {
        self.flush();
        Ok(())
    }
}

/// Appends the sample fields of `block` using the general decoding path
pub fn write_general_samples(line: &mut Vec<u8>, block: &UnpackedBlock) -> Result<()> {
    let mut writer = VcfSampleWriter::new(line, decimal_places(block.bits));
    block.parse(&mut writer)
}

/// Writes every variant of `view` as VCF, returning the number of variants written
pub fn write_vcf<W: Write>(view: &mut View, out: &mut W, program: &ProgramInfo) -> Result<u64> {
    write_vcf_header(out, program, &view.sample_identifiers())?;
    let layout = view.context().layout;
    let mut tables = VcfTables::new();
    let mut line = Vec::new();
    let mut count = 0u64;
    while let Some(variant) = view.read_variant()? {
        line.clear();
        match layout {
            Layout::One => {
                write_variant_columns(&mut line, &variant, "GT:GP")?;
                let mut writer = VcfSampleWriter::new(&mut line, decimal_places(16));
                view.read_genotype_block_into(&mut writer)?;
            }
            Layout::Two => {
                let block = view.read_and_unpack_layout2_block()?;
                let format = if block.phased { "GT:HP" } else { "GT:GP" };
                write_variant_columns(&mut line, &variant, format)?;
                if supports_fast_path(&block) {
                    write_fast_samples(&mut line, &block, tables.get(block.bits))?;
                } else {
                    write_general_samples(&mut line, &block)?;
                }
            }
        }
        line.push(b'\n');
        out.write_all(&line)?;
        count += 1;
    }
    info!(variants = count, "wrote VCF");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::bgen::{
        read_and_unpack_layout2_block, write_genotype_block, Compression, Context, GenotypeBlock,
        SampleGenotype, TrackedReader,
    };
    use crate::error::Error;

    fn unpack(block: &GenotypeBlock) -> Result<UnpackedBlock> {
        let context = Context::new(block.samples.len() as u32, 1, Layout::Two, Compression::Zlib);
        let mut buffer = Vec::new();
        write_genotype_block(&mut buffer, &context, block, 6)?;
        read_and_unpack_layout2_block(&mut TrackedReader::new(Cursor::new(buffer)), &context)
    }

    #[test]
    fn test_decimal_places() {
        assert_eq!(decimal_places(1), 0);
        assert_eq!(decimal_places(2), 2);
        assert_eq!(decimal_places(4), 3);
        assert_eq!(decimal_places(8), 4);
        assert_eq!(decimal_places(16), 6);
        assert_eq!(decimal_places(32), 8);
    }

    #[test]
    fn test_table_entries() {
        let table = VcfTable::new(8);
        // x = 242, y = 8, z = 5
        assert_eq!(table.entry(242 | (8 << 8)), Some("0/0:0.9490,0.0314,0.0196"));
        assert_eq!(table.entry(0), Some("1/1:0.0000,0.0000,1.0000"));
        assert_eq!(table.entry(100 | (100 << 8)), Some("./.:0.3922,0.3922,0.2157"));
        assert_eq!(table.entry(200 | (100 << 8)), None);

        let table = VcfTable::new(1);
        assert_eq!(table.entry(1), Some("0/0:1,0,0"));
        assert_eq!(table.entry(2), Some("0/1:0,1,0"));
        assert_eq!(table.entry(3), None);
    }

    #[test]
    fn test_fast_path_call_and_missing() -> Result<()> {
        let block = GenotypeBlock {
            number_of_alleles: 2,
            phased: false,
            bits: 8,
            samples: vec![
                SampleGenotype::new(2, vec![0.95, 0.03, 0.02]),
                SampleGenotype::missing(2),
            ],
        };
        let unpacked = unpack(&block)?;
        assert!(supports_fast_path(&unpacked));
        let mut line = Vec::new();
        write_fast_samples(&mut line, &unpacked, &VcfTable::new(8))?;
        let text = String::from_utf8(line).unwrap();
        let fields: Vec<_> = text.split('\t').skip(1).collect();
        assert!(fields[0].starts_with("0/0:"));
        assert_eq!(fields[1], "./.:.,.,.");
        Ok(())
    }

    #[test]
    fn test_fast_path_overflow_is_format_error() {
        // one diploid sample with stored codes 200 and 100
        let payload = vec![1, 0, 0, 0, 2, 0, 2, 2, 2, 0, 8, 200, 100];
        let context = Context::new(1, 1, Layout::Two, Compression::None);
        let mut buffer = (payload.len() as u32).to_le_bytes().to_vec();
        buffer.extend_from_slice(&payload);
        let block =
            read_and_unpack_layout2_block(&mut TrackedReader::new(Cursor::new(buffer)), &context)
                .unwrap();
        let result = write_fast_samples(&mut Vec::new(), &block, &VcfTable::new(8));
        assert!(matches!(
            result,
            Err(Error::FormatError(FormatError {
                kind: FormatErrorKind::ProbabilitySumOverflow { sum: 300, max: 255 },
                ..
            }))
        ));
    }

    #[test]
    fn test_unphased_call_colex_order() {
        // ploidy 3, three alleles: 000, 001, 011, 111, 002, 012, 112, 022, 122, 222
        let mut probs = vec![0.0; 10];
        probs[5] = 1.0;
        assert_eq!(unphased_call(3, 3, &probs), "0/1/2");
        probs.fill(0.0);
        probs[4] = 1.0;
        assert_eq!(unphased_call(3, 3, &probs), "0/0/2");
        probs.fill(0.0);
        probs[9] = 1.0;
        assert_eq!(unphased_call(3, 3, &probs), "2/2/2");
        probs.fill(0.1);
        assert_eq!(unphased_call(3, 3, &probs), "././.");
        assert_eq!(unphased_call(2, 2, &[0.05, 0.92, 0.03]), "0/1");
        assert_eq!(unphased_call(0, 2, &[1.0]), ".");
    }

    #[test]
    fn test_phased_call() {
        assert_eq!(phased_call(2, 2, &[0.95, 0.05, 0.2, 0.8]), "0|.");
        assert_eq!(phased_call(2, 3, &[0.0, 0.0, 1.0, 0.0, 1.0, 0.0]), "2|1");
    }

    #[test]
    fn test_general_path_phased_and_missing() -> Result<()> {
        let block = GenotypeBlock {
            number_of_alleles: 2,
            phased: true,
            bits: 8,
            samples: vec![
                SampleGenotype::new(2, vec![1.0, 0.0, 0.0, 1.0]),
                SampleGenotype::missing(2),
            ],
        };
        let unpacked = unpack(&block)?;
        assert!(!supports_fast_path(&unpacked));
        let mut line = Vec::new();
        write_general_samples(&mut line, &unpacked)?;
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "\t0|1:1.0000,0.0000,0.0000,1.0000\t.|.:.,.,.,."
        );
        Ok(())
    }

    #[test]
    fn test_write_vcf_file() -> Result<()> {
        use crate::testing::{write_test_file, TestVariant};

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("v.bgen");
        let mut same_ids = TestVariant::biallelic("rs2", "2", 200);
        same_ids.variant.snpid = "rs2".into();
        write_test_file(&path, &[TestVariant::biallelic("rs1", "1", 100), same_ids])?;

        let mut view = View::open(&path)?;
        let mut out = Vec::new();
        let count = write_vcf(&mut view, &mut out, &ProgramInfo::new("bgenix", "1.0"))?;
        assert_eq!(count, 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "##fileformat=VCFv4.2");
        assert_eq!(lines[2], "##source=bgenix v1.0");
        assert_eq!(
            lines[6],
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t(anonymous_sample_1)\t(anonymous_sample_2)\t(anonymous_sample_3)"
        );
        assert!(lines[7].starts_with("1\t100\trs1;SNP_rs1\tA\tG\t.\t.\t.\tGT:GP\t"));
        assert!(lines[8].starts_with("2\t200\trs2\tA\tG\t.\t.\t.\tGT:GP\t"));
        assert_eq!(lines[8].split('\t').count(), 12);
        Ok(())
    }

    #[test]
    fn test_write_vcf_rejects_block_with_extra_alleles() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("m.bgen");
        crate::testing::write_allele_mismatch_file(&path)?;

        let mut view = View::open(&path)?;
        let mut out = Vec::new();
        let result = write_vcf(&mut view, &mut out, &ProgramInfo::new("bgenix", "1.0"));
        assert!(matches!(
            result,
            Err(Error::FormatError(FormatError {
                kind: FormatErrorKind::AlleleCountMismatch {
                    expected: 2,
                    found: 3
                },
                ..
            }))
        ));
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("rsM"));
        Ok(())
    }
}
