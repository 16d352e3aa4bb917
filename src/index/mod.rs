//! # Variant index
//!
//! An index is a sqlite database describing one BGEN file. It holds two tables:
//!
//! - `Metadata`: a single row with the indexed file's name, size, modification time,
//!   first 1000 bytes and the index creation time. Size and leading bytes are checked
//!   before an index is used.
//! - `Variant`: one row per variant with its identity and byte range, keyed by
//!   `(chromosome, position, rsid, allele1, allele2, file_start_position)`.
//!
//! Building is done by [`IndexBuilder`]; querying by [`IndexQuery`] with a [`Query`].

mod builder;
mod entry;
mod metadata;
mod query;

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

pub use builder::{
    temporary_path, IndexBuilder, IndexSummary, DEFAULT_BATCH_SIZE, DEFAULT_BUSY_TIMEOUT,
};
pub use entry::{IndexEntry, METADATA_TABLE, VARIANT_TABLE};
pub use metadata::FileMetadata;
pub use query::{collect_unique_ids, validate_table_name, GenomicRange, IndexQuery, Query};

/// File extension appended to a BGEN path to name its index
pub const INDEX_EXTENSION: &str = ".bgi";

/// The conventional index location for `bgen_path`: the same path with `.bgi` appended
#[must_use]
pub fn default_index_path<P: AsRef<Path>>(bgen_path: P) -> PathBuf {
    let mut name = OsString::from(bgen_path.as_ref().as_os_str());
    name.push(INDEX_EXTENSION);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_index_path() {
        assert_eq!(
            default_index_path("data/chr1.bgen"),
            PathBuf::from("data/chr1.bgen.bgi")
        );
        assert_eq!(
            temporary_path(&default_index_path("x.bgen")),
            PathBuf::from("x.bgen.bgi.tmp")
        );
    }
}
