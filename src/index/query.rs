//! # Index queries
//!
//! A [`Query`] combines inclusion and exclusion filters over genomic ranges and rsids.
//! A variant is selected if no inclusion filter is given or it matches any inclusion
//! filter, and it matches no exclusion filter. Exclusion always wins.
//!
//! [`IndexQuery`] runs a query against an index database and resolves the selected
//! variants to byte ranges of the BGEN file, in index key order.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use rusqlite::{types::Value, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, warn};

use super::{
    entry::{IndexEntry, METADATA_TABLE},
    metadata::FileMetadata,
};
use crate::error::{IndexError, Result};

/// A closed interval of positions on one chromosome
///
/// A missing bound extends the range to the start or end of the chromosome.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct GenomicRange {
    pub chromosome: String,
    pub start: Option<u32>,
    pub end: Option<u32>,
}
impl GenomicRange {
    /// Creates a range, rejecting reversed bounds
    pub fn new<S: Into<String>>(
        chromosome: S,
        start: Option<u32>,
        end: Option<u32>,
    ) -> Result<Self> {
        if let (Some(lower), Some(upper)) = (start, end) {
            if lower > upper {
                return Err(IndexError::EmptyRange { lower, upper }.into());
            }
        }
        Ok(Self {
            chromosome: chromosome.into(),
            start,
            end,
        })
    }

    /// Lower bound, with an open start mapped to 0
    #[must_use]
    pub fn lower(&self) -> u32 {
        self.start.unwrap_or(0)
    }

    /// Upper bound, with an open end mapped to `u32::MAX`
    #[must_use]
    pub fn upper(&self) -> u32 {
        self.end.unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn contains(&self, chromosome: &str, position: u32) -> bool {
        self.chromosome == chromosome && (self.lower()..=self.upper()).contains(&position)
    }
}
impl FromStr for GenomicRange {
    type Err = crate::Error;

    /// Parses `<chr>:<pos1>-<pos2>`, where either position may be omitted
    fn from_str(spec: &str) -> Result<Self> {
        let invalid = || IndexError::InvalidRange(spec.to_string());
        let (chromosome, positions) = spec.split_once(':').ok_or_else(invalid)?;
        let (start, end) = positions.split_once('-').ok_or_else(invalid)?;
        let parse = |value: &str| -> Result<Option<u32>> {
            let value = value.trim();
            if value.is_empty() {
                Ok(None)
            } else {
                Ok(Some(value.parse::<u32>().map_err(|_| invalid())?))
            }
        };
        Self::new(chromosome, parse(start)?, parse(end)?)
    }
}

/// Inclusion and exclusion filters over an index
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pub included_ranges: Vec<GenomicRange>,
    pub excluded_ranges: Vec<GenomicRange>,
    pub included_rsids: Vec<String>,
    pub excluded_rsids: Vec<String>,
}
impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_range(mut self, range: GenomicRange) -> Self {
        self.included_ranges.push(range);
        self
    }

    pub fn exclude_range(mut self, range: GenomicRange) -> Self {
        self.excluded_ranges.push(range);
        self
    }

    pub fn include_rsids<I, S>(mut self, rsids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.included_rsids.extend(rsids.into_iter().map(Into::into));
        self
    }

    pub fn exclude_rsids<I, S>(mut self, rsids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_rsids.extend(rsids.into_iter().map(Into::into));
        self
    }

    /// True if the query selects every variant
    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        self.included_ranges.is_empty()
            && self.excluded_ranges.is_empty()
            && self.included_rsids.is_empty()
            && self.excluded_rsids.is_empty()
    }

    /// Applies the filters to a single entry, with the same semantics as the SQL
    #[must_use]
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        let included = (self.included_ranges.is_empty() && self.included_rsids.is_empty())
            || self
                .included_ranges
                .iter()
                .any(|r| r.contains(&entry.chromosome, entry.position))
            || self.included_rsids.contains(&entry.rsid);
        let excluded = self
            .excluded_ranges
            .iter()
            .any(|r| r.contains(&entry.chromosome, entry.position))
            || self.excluded_rsids.contains(&entry.rsid);
        included && !excluded
    }

    /// Builds the SELECT statement and its positional parameters
    fn to_sql(&self, table: &str) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut clauses = |ranges: &[GenomicRange], ids: &[String], id_table: &str| {
            let mut terms = Vec::new();
            for range in ranges {
                terms.push("(chromosome = ? AND position BETWEEN ? AND ?)".to_string());
                params.push(Value::Text(range.chromosome.clone()));
                params.push(Value::Integer(i64::from(range.lower())));
                params.push(Value::Integer(i64::from(range.upper())));
            }
            if !ids.is_empty() {
                terms.push(format!("rsid IN (SELECT identifier FROM temp.{id_table})"));
            }
            terms
        };
        let inclusion = clauses(&self.included_ranges, &self.included_rsids, "included_ids");
        let exclusion = clauses(&self.excluded_ranges, &self.excluded_rsids, "excluded_ids");
        let inclusion = if inclusion.is_empty() {
            "1".to_string()
        } else {
            inclusion.join(" OR ")
        };
        let exclusion = if exclusion.is_empty() {
            "0".to_string()
        } else {
            exclusion.join(" OR ")
        };
        let sql = format!(
            "SELECT chromosome, position, rsid, number_of_alleles, allele1, allele2, file_start_position, size_in_bytes \
             FROM \"{table}\" WHERE ({inclusion}) AND NOT ({exclusion}) \
             ORDER BY chromosome, position, rsid, allele1, allele2, file_start_position"
        );
        (sql, params)
    }
}

/// Checks that `name` is a plain SQL identifier
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(IndexError::InvalidTableName(name.to_string()).into())
    }
}

/// A read-only handle on an index file
pub struct IndexQuery {
    path: PathBuf,
    connection: Connection,
    table: String,
    metadata: Option<FileMetadata>,
    positions: Option<Vec<(u64, u64)>>,
}
impl IndexQuery {
    /// Opens the index at `path`, reading from `table`
    ///
    /// An index written before metadata was recorded has no `Metadata` table; such
    /// an index opens with no metadata and cannot be verified.
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        let path = path.as_ref();
        validate_table_name(table)?;
        if !path.exists() {
            return Err(IndexError::Missing(path.to_path_buf()).into());
        }
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let metadata = load_metadata(&connection, path)?;
        if metadata.is_none() {
            warn!(index = %path.display(), "index has no metadata, it cannot be verified");
        }
        Ok(Self {
            path: path.to_path_buf(),
            connection,
            table: table.to_string(),
            metadata,
            positions: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata of the file the index was built from
    #[must_use]
    pub fn file_metadata(&self) -> Option<&FileMetadata> {
        self.metadata.as_ref()
    }

    /// Runs `query` and returns the selected entries in key order
    pub fn entries(&self, query: &Query) -> Result<Vec<IndexEntry>> {
        self.load_identifiers("included_ids", &query.included_rsids)?;
        self.load_identifiers("excluded_ids", &query.excluded_rsids)?;
        let (sql, params) = query.to_sql(&self.table);
        debug!(%sql, "running index query");
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), IndexEntry::from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Resolves `query` and keeps the byte ranges for [`IndexQuery::locate`]
    pub fn initialise(&mut self, query: &Query) -> Result<()> {
        let positions = self
            .entries(query)?
            .into_iter()
            .map(|e| (e.file_start_position as u64, e.size_in_bytes as u64))
            .collect();
        self.positions = Some(positions);
        Ok(())
    }

    pub fn number_of_variants(&self) -> Result<usize> {
        self.positions
            .as_ref()
            .map(Vec::len)
            .ok_or_else(|| IndexError::Uninitialised.into())
    }

    /// Returns `(offset, length)` of the `i`th selected variant
    pub fn locate(&self, i: usize) -> Result<(u64, u64)> {
        let positions = self.positions.as_ref().ok_or(IndexError::Uninitialised)?;
        positions.get(i).copied().ok_or_else(|| {
            IndexError::OutOfRange {
                requested: i,
                available: positions.len(),
            }
            .into()
        })
    }

    fn load_identifiers(&self, name: &str, ids: &[String]) -> Result<()> {
        self.connection.execute_batch(&format!(
            "DROP TABLE IF EXISTS temp.{name}; CREATE TEMP TABLE {name} (identifier TEXT NOT NULL PRIMARY KEY);"
        ))?;
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self.connection.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO temp.{name} (identifier) VALUES (?1)"
            ))?;
            for id in ids {
                stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn load_metadata(connection: &Connection, path: &Path) -> Result<Option<FileMetadata>> {
    let exists: bool = connection.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [METADATA_TABLE],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(None);
    }
    let metadata = connection
        .query_row(
            "SELECT filename, file_size, last_write_time, first_1000_bytes FROM Metadata",
            [],
            |row| {
                Ok(FileMetadata {
                    filename: row.get(0)?,
                    size: row.get::<_, i64>(1)? as u64,
                    last_write_time: row.get(2)?,
                    first_bytes: row.get(3)?,
                })
            },
        )
        .optional()?;
    metadata
        .map(Some)
        .ok_or_else(|| IndexError::MissingMetadata(path.to_path_buf()).into())
}

/// Expands command-line selection arguments
///
/// An argument naming a readable file is replaced by the whitespace-separated tokens
/// in that file. The result is sorted and de-duplicated.
pub fn collect_unique_ids<S: AsRef<str>>(arguments: &[S]) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for argument in arguments {
        let argument = argument.as_ref();
        let path = Path::new(argument);
        if path.is_file() {
            let contents = fs::read_to_string(path)?;
            ids.extend(contents.split_whitespace().map(str::to_string));
        } else {
            ids.push(argument.to_string());
        }
    }
    ids.sort();
    ids.dedup();
    Ok(ids)
}
