use std::{fs::File, io::Write, ops::Range};

use memmap2::Mmap;
use tracing::info;

use crate::{
    bgen::{write_header, Context, View},
    error::{FormatError, FormatErrorKind, Result},
    index::FileMetadata,
};

/// Copies the variants selected by `view` byte-for-byte into `out`
///
/// The header is rewritten with the selected variant count and the sample
/// identifier block is kept. Without a query the whole data section is copied.
///
/// # Returns
///
/// The number of variants written
pub fn copy_selected_variants<W: Write>(view: &View, out: &mut W) -> Result<u64> {
    let file = File::open(view.path())?;
    if let Some(recorded) = view.query().and_then(|q| q.file_metadata()) {
        recorded.verify(&FileMetadata::from_path(view.path())?)?;
    }
    // Safety: the file is open and won't be modified while mapped
    let mmap = unsafe { Mmap::map(&file)? };

    let count = view.number_of_variants();
    let context = Context {
        number_of_variants: count as u32,
        ..view.context().clone()
    };
    write_header(out, view.offset(), &context)?;
    let data_start = u64::from(view.offset()) + 4;
    out.write_all(slice(&mmap, u64::from(context.header_size()) + 4..data_start)?)?;

    match view.query() {
        Some(query) => {
            for i in 0..count {
                let (start, length) = query.locate(i)?;
                out.write_all(slice(&mmap, start..start + length)?)?;
            }
        }
        None => out.write_all(slice(&mmap, data_start..mmap.len() as u64)?)?,
    }
    info!(variants = count, "wrote data for {count} variants");
    Ok(count as u64)
}

fn slice(mmap: &Mmap, range: Range<u64>) -> Result<&[u8]> {
    mmap.get(range.start as usize..range.end as usize)
        .ok_or_else(|| FormatError::new(range.start, FormatErrorKind::Truncated).into())
}
