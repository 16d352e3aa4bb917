//! # In-place editing and concatenation
//!
//! These operations rewrite headers without decoding any variant data.

use std::{
    fs::{File, OpenOptions},
    io::{self, BufReader, BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use anyhow::anyhow;
use tracing::info;

use crate::{
    bgen::{read_header, Context, TrackedReader, FLAG_SAMPLE_IDENTIFIERS},
    error::{EditError, Result},
};

/// Options for [`concatenate`]
#[derive(Clone, Debug, Default)]
pub struct ConcatOptions {
    clobber: bool,
    omit_sample_identifiers: bool,
    free_data: Option<Vec<u8>>,
}
impl ConcatOptions {
    /// Overwrite the output if it exists
    #[must_use]
    pub fn clobber(mut self, clobber: bool) -> Self {
        self.clobber = clobber;
        self
    }

    /// Drop the first file's sample identifier block from the output
    #[must_use]
    pub fn omit_sample_identifiers(mut self, omit: bool) -> Self {
        self.omit_sample_identifiers = omit;
        self
    }

    /// Replace the free data of the output header
    #[must_use]
    pub fn free_data(mut self, free_data: Vec<u8>) -> Self {
        self.free_data = Some(free_data);
        self
    }
}

/// Compares the flags of two headers, ignoring the sample identifier bit
fn compatible_flags(a: &Context, b: &Context) -> bool {
    a.flags() & !FLAG_SAMPLE_IDENTIFIERS == b.flags() & !FLAG_SAMPLE_IDENTIFIERS
}

/// Joins the variants of `inputs`, in order, into one file at `output`
///
/// The output takes the first input's header and sample identifier block. Every
/// input must have the same number of samples and the same layout and compression.
///
/// # Returns
///
/// The header of the written file
pub fn concatenate<P: AsRef<Path>, Q: AsRef<Path>>(
    inputs: &[P],
    output: Q,
    options: &ConcatOptions,
) -> Result<Context> {
    let output = output.as_ref();
    if inputs.is_empty() {
        return Err(EditError::NoInputs.into());
    }
    if !options.clobber && output.exists() {
        return Err(EditError::OutputExists(output.to_path_buf()).into());
    }
    let mut files = inputs
        .iter()
        .map(|path| File::open(path).map(BufReader::new))
        .collect::<io::Result<Vec<_>>>()?;
    let mut out = BufWriter::new(File::create(output)?);

    let mut result: Option<Context> = None;
    for (i, (path, file)) in inputs.iter().zip(files.iter_mut()).enumerate() {
        let path = path.as_ref();
        let mut reader = TrackedReader::new(file);
        let (mut offset, mut context) = read_header(&mut reader)?;
        info!(
            file = %path.display(),
            number = i + 1,
            of = inputs.len(),
            variants = context.number_of_variants,
            "adding file"
        );

        match result.as_mut() {
            None => {
                if options.omit_sample_identifiers {
                    context.has_sample_identifiers = false;
                    reader.seek_to(u64::from(offset) + 4)?;
                    offset = context.header_size();
                }
                if let Some(free_data) = &options.free_data {
                    let delta = free_data.len() as i64 - context.free_data.len() as i64;
                    offset = u32::try_from(i64::from(offset) + delta).map_err(|_| {
                        anyhow!("free data of {} bytes is too long", free_data.len())
                    })?;
                    context.free_data.clone_from(free_data);
                }
                crate::bgen::write_header(&mut out, offset, &context)?;
                result = Some(context);
            }
            Some(first) => {
                if context.number_of_samples != first.number_of_samples {
                    return Err(EditError::SampleCountMismatch {
                        path: path.to_path_buf(),
                        expected: first.number_of_samples,
                        found: context.number_of_samples,
                    }
                    .into());
                }
                if !compatible_flags(&context, first) {
                    return Err(EditError::FlagsMismatch {
                        path: path.to_path_buf(),
                        expected: first.flags(),
                        found: context.flags(),
                    }
                    .into());
                }
                reader.seek_to(u64::from(offset) + 4)?;
                first.number_of_variants = first
                    .number_of_variants
                    .checked_add(context.number_of_variants)
                    .ok_or_else(|| anyhow!("total number of variants exceeds {}", u32::MAX))?;
            }
        }
        io::copy(reader.get_mut(), &mut out)?;
    }

    let Some(result) = result else {
        return Err(EditError::NoInputs.into());
    };
    let mut file = out.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.seek(SeekFrom::Start(4))?;
    result.write(&mut file)?;
    file.flush()?;
    info!(
        file = %output.display(),
        samples = result.number_of_samples,
        variants = result.number_of_variants,
        "finished writing"
    );
    Ok(result)
}

fn open_for_edit(path: &Path) -> Result<(File, u32, Context)> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let (offset, context) = read_header(&mut TrackedReader::new(&mut file))?;
    Ok((file, offset, context))
}

/// Overwrites the free data of the file at `path`
///
/// The replacement must have exactly the length of the existing free data, so no
/// other bytes move. Nothing is written unless `really` is set.
pub fn set_free_data<P: AsRef<Path>>(path: P, free_data: &[u8], really: bool) -> Result<()> {
    let path = path.as_ref();
    let (mut file, _, mut context) = open_for_edit(path)?;
    if context.free_data.len() != free_data.len() {
        return Err(EditError::FreeDataLengthMismatch {
            path: PathBuf::from(path),
            existing: context.free_data.len(),
            new: free_data.len(),
        }
        .into());
    }
    if really {
        context.free_data = free_data.to_vec();
        file.seek(SeekFrom::Start(4))?;
        context.write(&mut file)?;
        file.flush()?;
        info!(file = %path.display(), "set free data");
    } else {
        info!(file = %path.display(), "free data can be set (dry run, nothing written)");
    }
    Ok(())
}

/// Clears the sample identifier flag of the file at `path` and zeroes its block
///
/// The block keeps its size so variant offsets are unchanged. Nothing is written
/// unless `really` is set.
///
/// # Returns
///
/// Whether the file had a sample identifier block
pub fn remove_sample_identifiers<P: AsRef<Path>>(path: P, really: bool) -> Result<bool> {
    let path = path.as_ref();
    let (mut file, offset, mut context) = open_for_edit(path)?;
    if !context.has_sample_identifiers {
        info!(file = %path.display(), "no sample identifiers present, skipping");
        return Ok(false);
    }
    if really {
        let zeros = vec![0u8; (offset - context.header_size()) as usize];
        context.has_sample_identifiers = false;
        file.seek(SeekFrom::Start(4))?;
        context.write(&mut file)?;
        file.write_all(&zeros)?;
        file.flush()?;
        info!(file = %path.display(), "removed sample identifiers");
    } else {
        info!(
            file = %path.display(),
            "sample identifiers can be removed (dry run, nothing written)"
        );
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bgen::View;
    use crate::error::Error;
    use crate::testing::{write_test_file, write_test_file_with, TestVariant};

    fn read_rsids(path: &Path) -> Result<Vec<String>> {
        let mut view = View::open(path)?;
        let mut rsids = Vec::new();
        while let Some(variant) = view.read_variant()? {
            view.read_genotype_block()?;
            rsids.push(variant.rsid);
        }
        Ok(rsids)
    }

    #[test]
    fn test_concatenate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.bgen");
        let b = dir.path().join("b.bgen");
        let output = dir.path().join("ab.bgen");
        let ids = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];
        write_test_file_with(
            &a,
            &[TestVariant::biallelic("rs1", "1", 10)],
            Some(ids.clone()),
            b"abc",
        )?;
        write_test_file(
            &b,
            &[
                TestVariant::biallelic("rs2", "1", 20),
                TestVariant::biallelic("rs3", "1", 30),
            ],
        )?;

        let context = concatenate(&[&a, &b], &output, &ConcatOptions::default())?;
        assert_eq!(context.number_of_variants, 3);
        assert_eq!(read_rsids(&output)?, ["rs1", "rs2", "rs3"]);
        assert_eq!(View::open(&output)?.sample_identifiers(), ids);

        assert!(matches!(
            concatenate(&[&a, &b], &output, &ConcatOptions::default()),
            Err(Error::EditError(EditError::OutputExists(_)))
        ));

        let options = ConcatOptions::default()
            .clobber(true)
            .omit_sample_identifiers(true)
            .free_data(b"longer free data".to_vec());
        let context = concatenate(&[&b, &a], &output, &options)?;
        assert_eq!(context.free_data, b"longer free data");
        let view = View::open(&output)?;
        assert!(!view.context().has_sample_identifiers);
        assert_eq!(view.offset(), view.context().header_size());
        assert_eq!(read_rsids(&output)?, ["rs2", "rs3", "rs1"]);
        Ok(())
    }

    #[test]
    fn test_concatenate_rejects_mismatched_inputs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.bgen");
        let b = dir.path().join("b.bgen");
        write_test_file(&a, &[TestVariant::biallelic("rs1", "1", 10)])?;
        let mut other = TestVariant::biallelic("rs2", "1", 20);
        other.block.samples.pop();
        crate::testing::write_test_file_samples(&b, &[other], 2)?;
        let result = concatenate(&[&a, &b], dir.path().join("out.bgen"), &ConcatOptions::default());
        assert!(matches!(
            result,
            Err(Error::EditError(EditError::SampleCountMismatch {
                expected: 3,
                found: 2,
                ..
            }))
        ));
        assert!(matches!(
            concatenate::<&Path, _>(&[], dir.path().join("none.bgen"), &ConcatOptions::default()),
            Err(Error::EditError(EditError::NoInputs))
        ));
        Ok(())
    }

    #[test]
    fn test_set_free_data() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("f.bgen");
        write_test_file_with(&path, &[TestVariant::biallelic("rs1", "1", 10)], None, b"abcd")?;

        set_free_data(&path, b"wxyz", false)?;
        assert_eq!(View::open(&path)?.context().free_data, b"abcd");
        set_free_data(&path, b"wxyz", true)?;
        assert_eq!(View::open(&path)?.context().free_data, b"wxyz");
        assert_eq!(read_rsids(&path)?, ["rs1"]);

        assert!(matches!(
            set_free_data(&path, b"toolong", true),
            Err(Error::EditError(EditError::FreeDataLengthMismatch {
                existing: 4,
                new: 7,
                ..
            }))
        ));
        Ok(())
    }

    #[test]
    fn test_remove_sample_identifiers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.bgen");
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        write_test_file_with(&path, &[TestVariant::biallelic("rs1", "1", 10)], Some(ids), b"")?;
        let size = std::fs::metadata(&path)?.len();

        assert!(remove_sample_identifiers(&path, false)?);
        assert!(View::open(&path)?.context().has_sample_identifiers);

        assert!(remove_sample_identifiers(&path, true)?);
        let view = View::open(&path)?;
        assert!(!view.context().has_sample_identifiers);
        assert_eq!(view.sample_identifiers()[0], "(anonymous_sample_1)");
        assert_eq!(std::fs::metadata(&path)?.len(), size);
        assert_eq!(read_rsids(&path)?, ["rs1"]);

        assert!(!remove_sample_identifiers(&path, true)?);
        Ok(())
    }
}
