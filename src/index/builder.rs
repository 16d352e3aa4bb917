//! Index construction
//!
//! The builder scans a BGEN file once, recording the byte range of every variant in a
//! sqlite database. The database is written to `<index>.tmp` and only renamed into
//! place once the whole scan has succeeded, so readers never observe a partial index.

use std::{
    ffi::OsString,
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use super::{
    entry::{IndexEntry, CREATE_METADATA_TABLE, CREATE_VARIANT_TABLE, INSERT_VARIANT},
    metadata::FileMetadata,
};
use crate::{
    bgen::{read_header, skip_genotype_block, TrackedReader, VariantRecord},
    error::{IndexError, Result},
    program::timestamp,
};

/// Number of variants committed per transaction
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// How long a transaction may wait on a locked database
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(240);

/// Returns the path of the in-progress marker for `index_path`
#[must_use]
pub fn temporary_path(index_path: &Path) -> PathBuf {
    let mut name = OsString::from(index_path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Summary of a completed build
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSummary {
    pub path: PathBuf,
    pub number_of_variants: u64,
}

/// Configures and runs index builds
///
/// # Examples
///
/// ```rust,no_run
/// use bgenix::index::IndexBuilder;
///
/// let summary = IndexBuilder::default()
///     .clobber(true)
///     .build("example.bgen", "example.bgen.bgi")
///     .unwrap();
/// println!("indexed {} variants", summary.number_of_variants);
/// ```
#[derive(Clone, Debug)]
pub struct IndexBuilder {
    clobber: bool,
    with_rowid: bool,
    batch_size: usize,
    busy_timeout: Duration,
}
impl Default for IndexBuilder {
    fn default() -> Self {
        Self {
            clobber: false,
            with_rowid: false,
            batch_size: DEFAULT_BATCH_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}
impl IndexBuilder {
    /// Overwrite an existing index (and discard a stale in-progress marker)
    pub fn clobber(mut self, clobber: bool) -> Self {
        self.clobber = clobber;
        self
    }

    /// Store the variant table with a rowid instead of `WITHOUT ROWID`
    pub fn with_rowid(mut self, with_rowid: bool) -> Self {
        self.with_rowid = with_rowid;
        self
    }

    /// Sets the number of rows inserted per transaction (at least 1)
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Indexes `bgen_path`, publishing the result at `index_path`
    ///
    /// # Returns
    ///
    /// * `Ok(IndexSummary)` - The index is complete and visible
    /// * `Err(_)` - Nothing was published and the in-progress file was removed
    pub fn build<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        bgen_path: P,
        index_path: Q,
    ) -> Result<IndexSummary> {
        let bgen_path = bgen_path.as_ref();
        let index_path = index_path.as_ref();
        let tmp_path = temporary_path(index_path);

        if index_path.exists() && !self.clobber {
            return Err(IndexError::AlreadyExists(index_path.to_path_buf()).into());
        }
        if tmp_path.exists() {
            if !self.clobber {
                return Err(IndexError::IncompleteBuildPresent(tmp_path).into());
            }
            warn!(path = %tmp_path.display(), "removing incomplete index");
            fs::remove_file(&tmp_path)?;
        }

        info!(
            bgen = %bgen_path.display(),
            index = %index_path.display(),
            "building index"
        );
        match self.write_index(bgen_path, &tmp_path) {
            Ok(number_of_variants) => {
                fs::rename(&tmp_path, index_path)?;
                info!(number_of_variants, index = %index_path.display(), "index complete");
                Ok(IndexSummary {
                    path: index_path.to_path_buf(),
                    number_of_variants,
                })
            }
            Err(err) => {
                warn!(path = %tmp_path.display(), "index build failed, removing partial output");
                if let Err(cleanup) = fs::remove_file(&tmp_path) {
                    warn!(%cleanup, "could not remove partial index");
                }
                Err(err)
            }
        }
    }

    fn open_store(&self, path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update_and_check(None, "locking_mode", "EXCLUSIVE", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update_and_check(None, "journal_mode", "MEMORY", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.execute(CREATE_METADATA_TABLE, [])?;
        let layout = if self.with_rowid { "" } else { " WITHOUT ROWID" };
        conn.execute(&format!("{CREATE_VARIANT_TABLE}{layout}"), [])?;
        Ok(conn)
    }

    fn write_index(&self, bgen_path: &Path, tmp_path: &Path) -> Result<u64> {
        let metadata = FileMetadata::from_path(bgen_path)?;
        let mut conn = self.open_store(tmp_path)?;
        conn.execute(
            "INSERT INTO Metadata (filename, file_size, last_write_time, first_1000_bytes, index_creation_time) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                metadata.filename,
                metadata.size as i64,
                metadata.last_write_time,
                metadata.first_bytes,
                timestamp(),
            ],
        )?;

        let mut scan = Scan::default();
        scan.run(&mut conn, bgen_path, self.batch_size)
            .map_err(|source| IndexError::BuildFailed {
                last_variant: scan
                    .last_variant
                    .as_ref()
                    .map_or_else(|| "(none)".to_string(), ToString::to_string),
                offset: scan.offset,
                file_size: metadata.size,
                source: Box::new(source),
            })?;
        Ok(scan.count)
    }
}

/// Progress of a scan, kept outside the fallible loop for error reporting
#[derive(Default)]
struct Scan {
    last_variant: Option<VariantRecord>,
    offset: u64,
    count: u64,
}
impl Scan {
    fn run(&mut self, conn: &mut Connection, bgen_path: &Path, batch_size: usize) -> Result<()> {
        let mut reader = TrackedReader::new(BufReader::new(File::open(bgen_path)?));
        let (offset, context) = read_header(&mut reader)?;
        reader.skip(u64::from(offset) + 4 - reader.position())?;

        let mut batch = Vec::with_capacity(batch_size);
        loop {
            let start = reader.position();
            self.offset = start;
            let Some(variant) = VariantRecord::read(&mut reader, &context)? else {
                break;
            };
            let variant = self.last_variant.insert(variant);
            skip_genotype_block(&mut reader, &context)?;
            batch.push(IndexEntry::new(variant, start, reader.position()));
            self.offset = reader.position();
            self.count += 1;
            if batch.len() == batch_size {
                commit(conn, &batch)?;
                batch.clear();
            }
        }
        commit(conn, &batch)?;

        if self.count != u64::from(context.number_of_variants) {
            warn!(
                header = context.number_of_variants,
                found = self.count,
                "variant count differs from the header"
            );
        }
        Ok(())
    }
}

fn commit(conn: &mut Connection, batch: &[IndexEntry]) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(INSERT_VARIANT)?;
        for entry in batch {
            stmt.execute(params![
                entry.chromosome,
                entry.position,
                entry.rsid,
                entry.number_of_alleles,
                entry.allele1,
                entry.allele2,
                entry.file_start_position,
                entry.size_in_bytes,
            ])?;
        }
    }
    tx.commit()?;
    debug!(rows = batch.len(), "committed batch");
    Ok(())
}
