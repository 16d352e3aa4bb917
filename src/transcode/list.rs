use std::io::Write;

use crate::{
    bgen::View,
    error::Result,
    program::{timestamp, ProgramInfo},
};

/// Column header of the variant list
pub const LIST_COLUMNS: &str =
    "alternate_ids\trsid\tchromosome\tposition\tnumber_of_alleles\tfirst_allele\talternative_alleles";

/// Writes one tab-separated line per variant of `view`, skipping genotype data
///
/// Empty SNPIDs and rsids are written as `.`. The list is framed by comment lines
/// naming the program, the start time and the final count.
pub fn write_variant_list<W: Write>(
    view: &mut View,
    out: &mut W,
    program: &ProgramInfo,
) -> Result<u64> {
    writeln!(out, "# {}: started {}", program.name, timestamp())?;
    writeln!(out, "{LIST_COLUMNS}")?;
    let mut count = 0u64;
    let mut position = itoa::Buffer::new();
    let mut alleles = itoa::Buffer::new();
    while let Some(variant) = view.read_variant()? {
        let snpid = if variant.snpid.is_empty() { "." } else { &variant.snpid };
        let rsid = if variant.rsid.is_empty() { "." } else { &variant.rsid };
        write!(
            out,
            "{snpid}\t{rsid}\t{}\t{}\t{}\t{}\t",
            variant.chromosome,
            position.format(variant.position),
            alleles.format(variant.number_of_alleles()),
            variant.allele1(),
        )?;
        out.write_all(variant.alleles[1..].join(",").as_bytes())?;
        out.write_all(b"\n")?;
        view.ignore_genotype_block()?;
        count += 1;
    }
    writeln!(out, "# {}: success, total {count} variants.", program.name)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_test_file, TestVariant};

    #[test]
    fn test_variant_list() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("list.bgen");
        let mut multi = TestVariant::biallelic("rs2", "1", 20);
        multi.variant.snpid = String::new();
        multi.variant.alleles = vec!["A".into(), "C".into(), "G".into()];
        multi.block.number_of_alleles = 3;
        for sample in &mut multi.block.samples {
            sample.probabilities = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        }
        write_test_file(&path, &[TestVariant::biallelic("rs1", "1", 10), multi])?;

        let mut view = View::open(&path)?;
        let mut out = Vec::new();
        let count = write_variant_list(&mut view, &mut out, &ProgramInfo::new("bgenix", "0.0.0"))?;
        assert_eq!(count, 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].starts_with("# bgenix: started "));
        assert_eq!(lines[1], LIST_COLUMNS);
        assert_eq!(lines[2], "SNP_rs1\trs1\t1\t10\t2\tA\tG");
        assert_eq!(lines[3], ".\trs2\t1\t20\t3\tA\tC,G");
        assert_eq!(lines[4], "# bgenix: success, total 2 variants.");
        Ok(())
    }
}
