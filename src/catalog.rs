//! System catalog.
//!
//! The catalog is an ordinary heap rooted at page 1 whose records are
//! bincode-encoded [`TableInfo`]s. It is read through the same transaction as
//! the statement using it, so table definitions obey the same visibility
//! rules as rows.

pub mod column_info;
pub mod table_info;

pub use column_info::ColumnInfo;
pub use table_info::{TableId, TableInfo};

use crate::access::TableHeap;
use crate::error::{Error, Result};
use crate::storage::page::CATALOG_PAGE_ID;
use crate::transaction::{PageRead, PageWrite};
use std::collections::HashSet;

pub struct Catalog;

impl Catalog {
    fn heap() -> TableHeap {
        TableHeap::new(CATALOG_PAGE_ID)
    }

    /// Stages the empty catalog root. Page 1 must already be allocated.
    pub fn initialize(tx: &mut impl PageWrite) -> Result<()> {
        TableHeap::format_page(tx, CATALOG_PAGE_ID)
    }

    pub fn list(tx: &mut impl PageRead) -> Result<Vec<TableInfo>> {
        let mut tables = Vec::new();
        Self::heap().scan(tx, |page_id, record| {
            let info = TableInfo::deserialize(record)
                .map_err(|e| Error::corrupt(page_id, format!("bad catalog record: {e}")))?;
            tables.push(info);
            Ok(())
        })?;
        Ok(tables)
    }

    pub fn get(tx: &mut impl PageRead, name: &str) -> Result<TableInfo> {
        Self::list(tx)?
            .into_iter()
            .find(|t| t.matches(name))
            .ok_or_else(|| Error::NotFound(format!("table {name}")))
    }

    /// Registers a new table and stages its first heap page.
    pub fn create(
        tx: &mut impl PageWrite,
        name: &str,
        columns: Vec<ColumnInfo>,
    ) -> Result<TableInfo> {
        if columns.is_empty() {
            return Err(Error::Syntax(format!("table {name} needs at least one column")));
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(Error::Constraint(format!(
                    "duplicate column {} in table {}",
                    column.name, name
                )));
            }
        }

        let existing = Self::list(tx)?;
        if existing.iter().any(|t| t.matches(name)) {
            return Err(Error::Constraint(format!("table {name} already exists")));
        }
        let table_id = TableId(existing.iter().map(|t| t.table_id.0).max().unwrap_or(0) + 1);

        let heap = TableHeap::create(tx)?;
        let info = TableInfo {
            table_id,
            name: name.to_string(),
            first_page: heap.first_page(),
            columns,
        };
        Self::heap().insert(tx, &info.serialize()?)?;
        log::debug!("created {} ({}) at page {}", info.name, info.table_id, info.first_page);
        Ok(info)
    }
}
