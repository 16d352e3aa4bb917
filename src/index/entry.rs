use crate::bgen::VariantRecord;

/// Name of the table holding one row per variant
pub const VARIANT_TABLE: &str = "Variant";

/// Name of the single-row table describing the indexed file
pub const METADATA_TABLE: &str = "Metadata";

pub(crate) const CREATE_METADATA_TABLE: &str = "CREATE TABLE Metadata (
    filename TEXT NOT NULL,
    file_size INT NOT NULL,
    last_write_time INT NOT NULL,
    first_1000_bytes BLOB NOT NULL,
    index_creation_time TEXT NOT NULL
)";

/// Variant table schema; the physical layout suffix is appended at build time
pub(crate) const CREATE_VARIANT_TABLE: &str = "CREATE TABLE Variant (
    chromosome TEXT NOT NULL,
    position INT NOT NULL,
    rsid TEXT NOT NULL,
    number_of_alleles INT NOT NULL,
    allele1 TEXT NOT NULL,
    allele2 TEXT NULL,
    file_start_position INT NOT NULL,
    size_in_bytes INT NOT NULL,
    PRIMARY KEY (chromosome, position, rsid, allele1, allele2, file_start_position)
)";

pub(crate) const INSERT_VARIANT: &str = "INSERT INTO Variant (
    chromosome, position, rsid, number_of_alleles, allele1, allele2, file_start_position, size_in_bytes
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

/// One indexed variant: its identity and the byte range it occupies
///
/// The byte range covers the identifying data and the genotype block, so copying
/// `size_in_bytes` bytes from `file_start_position` reproduces the variant exactly.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    pub chromosome: String,
    pub position: u32,
    pub rsid: String,
    pub number_of_alleles: u32,
    pub allele1: String,
    pub allele2: String,
    pub file_start_position: i64,
    pub size_in_bytes: i64,
}
impl IndexEntry {
    /// Creates the entry for a variant spanning `start..end`
    #[must_use]
    pub fn new(variant: &VariantRecord, start: u64, end: u64) -> Self {
        Self {
            chromosome: variant.chromosome.clone(),
            position: variant.position,
            rsid: variant.rsid.clone(),
            number_of_alleles: variant.number_of_alleles() as u32,
            allele1: variant.allele1().to_string(),
            allele2: variant.allele2().to_string(),
            file_start_position: start as i64,
            size_in_bytes: (end - start) as i64,
        }
    }

    /// The primary key, in the order rows are returned by queries
    #[must_use]
    pub fn key(&self) -> (&str, u32, &str, &str, &str, i64) {
        (
            &self.chromosome,
            self.position,
            &self.rsid,
            &self.allele1,
            &self.allele2,
            self.file_start_position,
        )
    }

    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chromosome: row.get(0)?,
            position: row.get(1)?,
            rsid: row.get(2)?,
            number_of_alleles: row.get(3)?,
            allele1: row.get(4)?,
            allele2: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            file_start_position: row.get(6)?,
            size_in_bytes: row.get(7)?,
        })
    }
}
