//! Plain-text summaries for the reporting binary

use std::fmt;

use tabled::{settings::Style, Table, Tabled};

use crate::reader::Reader;
use crate::Result;

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Relation")]
    relation: &'static str,
    #[tabled(rename = "Rows")]
    rows: u64,
}

/// Row counts of both relations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub observations: u64,
    pub errors: u64,
}

impl StoreStats {
    pub fn collect(reader: &Reader) -> Result<Self> {
        Ok(Self {
            observations: reader.count_observations()?,
            errors: reader.count_errors()?,
        })
    }

    /// Rounded table with one line per relation
    pub fn table(&self) -> String {
        let rows = [
            CountRow { relation: "observations", rows: self.observations },
            CountRow { relation: "errors", rows: self.errors },
        ];
        Table::new(rows).with(Style::rounded()).to_string()
    }
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Store Statistics:")?;
        writeln!(f, "  Observations: {}", self.observations)?;
        writeln!(f, "  Errors: {}", self.errors)
    }
}
