use chrono::Local;

/// Name and version of the running program, stamped into text output
///
/// Built once by the driver and passed by reference to everything that writes
/// provenance lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramInfo {
    pub name: String,
    pub version: String,
}
impl Default for ProgramInfo {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}
impl ProgramInfo {
    pub fn new<S: Into<String>>(name: S, version: S) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// `name vversion`, as used in `##source` lines
    #[must_use]
    pub fn source(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

/// The current local time as `YYYY-MM-DD HH:MM:SS`
#[must_use]
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// The current local date as `YYYYMMDD`, as used in `##fileDate` lines
#[must_use]
pub fn file_date() -> String {
    Local::now().format("%Y%m%d").to_string()
}
