//! Statement execution.
//!
//! Each statement runs inside one transaction handed in by the connection:
//! `SELECT` needs only [`PageRead`], `INSERT` and `CREATE TABLE` need
//! [`PageWrite`]. Catalog lookups go through the same transaction, so a
//! statement never mixes two versions of the file.

use crate::access::{deserialize_values, serialize_values, TableHeap, Value};
use crate::catalog::{Catalog, ColumnInfo, TableInfo};
use crate::error::{Error, Result};
use crate::sql::{CreateTableStatement, Expression, InsertStatement, SelectItem, SelectStatement};
use crate::transaction::{PageRead, PageWrite};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// One result row. Values are positional; names resolve case-insensitively.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|i| &self.values[i])
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

/// Rows produced by a `SELECT`. Zero rows is a successful, empty result.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl fmt::Display for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.columns.join(" | "))?;
        for row in &self.rows {
            let values: Vec<String> = row.values.iter().map(Value::to_string).collect();
            writeln!(f, "{}", values.join(" | "))?;
        }
        write!(f, "({} row{})", self.rows.len(), if self.rows.len() == 1 { "" } else { "s" })
    }
}

/// Named parameter bindings, e.g. `[("@id", Value::Integer(1))]`. The sigil
/// is optional and names are matched case-insensitively.
pub type Params<'a> = [(&'a str, Value)];

pub fn select(tx: &mut impl PageRead, statement: &SelectStatement) -> Result<RowSet> {
    let table = Catalog::get(tx, &statement.table_name)?;

    let projection: Vec<usize> = match statement.projections.as_slice() {
        [SelectItem::AllColumns] => (0..table.columns.len()).collect(),
        items => items
            .iter()
            .map(|item| match item {
                SelectItem::AllColumns => Ok((0..table.columns.len()).collect::<Vec<_>>()),
                SelectItem::Column(name) => Ok(vec![table.column_index(name)?]),
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect(),
    };
    let columns: Vec<String> = projection
        .iter()
        .map(|&i| table.columns[i].name.clone())
        .collect();
    let shared_columns: Arc<[String]> = columns.clone().into();

    let schema = table.schema();
    let mut rows = Vec::new();
    TableHeap::new(table.first_page).scan(tx, |page_id, record| {
        let values = deserialize_values(record, &schema)
            .map_err(|reason| Error::corrupt(page_id, format!("bad row in {}: {}", table.name, reason)))?;
        let values = projection.iter().map(|&i| values[i].clone()).collect();
        rows.push(Row {
            columns: Arc::clone(&shared_columns),
            values,
        });
        Ok(())
    })?;

    log::trace!("selected {} row(s) from {}", rows.len(), table.name);
    Ok(RowSet { columns, rows })
}

pub fn insert(tx: &mut impl PageWrite, statement: &InsertStatement, params: &Params<'_>) -> Result<u64> {
    let table = Catalog::get(tx, &statement.table_name)?;
    let targets = insert_targets(&table, statement.columns.as_deref())?;
    let schema = table.schema();
    let heap = TableHeap::new(table.first_page);

    let mut inserted = 0;
    for exprs in &statement.values {
        if exprs.len() != targets.len() {
            return Err(Error::Syntax(format!(
                "{} value(s) given for {} column(s)",
                exprs.len(),
                targets.len()
            )));
        }

        let mut row = vec![Value::Null; table.columns.len()];
        for (&column, expr) in targets.iter().zip(exprs) {
            row[column] = evaluate(expr, params)?;
        }
        check_not_null(&table, &row)?;

        heap.insert(tx, &serialize_values(&row, &schema)?)?;
        inserted += 1;
    }
    log::trace!("inserted {} row(s) into {}", inserted, table.name);
    Ok(inserted)
}

pub fn create_table(tx: &mut impl PageWrite, statement: &CreateTableStatement) -> Result<TableInfo> {
    let columns = statement
        .columns
        .iter()
        .map(|def| ColumnInfo {
            name: def.name.clone(),
            data_type: def.data_type,
            not_null: def.not_null,
        })
        .collect();
    Catalog::create(tx, &statement.table_name, columns)
}

/// Resolves the INSERT column list to column positions.
fn insert_targets(table: &TableInfo, columns: Option<&[String]>) -> Result<Vec<usize>> {
    let Some(columns) = columns else {
        return Ok((0..table.columns.len()).collect());
    };
    let mut seen = HashSet::new();
    columns
        .iter()
        .map(|name| {
            let index = table.column_index(name)?;
            if !seen.insert(index) {
                return Err(Error::Syntax(format!("column {name} listed twice")));
            }
            Ok(index)
        })
        .collect()
}

fn evaluate(expr: &Expression, params: &Params<'_>) -> Result<Value> {
    match expr {
        Expression::Literal(value) => Ok(value.clone()),
        Expression::Parameter(name) => params
            .iter()
            .find(|(bound, _)| {
                bound
                    .trim_start_matches(['@', ':', '$'])
                    .eq_ignore_ascii_case(name)
            })
            .map(|(_, value)| value.clone())
            .ok_or_else(|| Error::NotFound(format!("parameter @{name}"))),
    }
}

fn check_not_null(table: &TableInfo, row: &[Value]) -> Result<()> {
    for (column, value) in table.columns.iter().zip(row) {
        if column.not_null && value.is_null() {
            return Err(Error::Constraint(format!(
                "{}.{} may not be NULL",
                table.name, column.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{parse_sql, Statement};
    use crate::transaction::testing::MemPages;

    fn database() -> Result<MemPages> {
        let mut pages = MemPages::new();
        Catalog::initialize(&mut pages)?;
        Ok(pages)
    }

    fn run(pages: &mut MemPages, sql: &str, params: &Params<'_>) -> Result<Option<RowSet>> {
        let mut result = None;
        for statement in parse_sql(sql)? {
            result = match statement {
                Statement::Select(s) => Some(select(pages, &s)?),
                Statement::Insert(s) => {
                    insert(pages, &s, params)?;
                    None
                }
                Statement::CreateTable(s) => {
                    create_table(pages, &s)?;
                    None
                }
            };
        }
        Ok(result)
    }

    fn query(pages: &mut MemPages, sql: &str) -> Result<RowSet> {
        run(pages, sql, &[])?.ok_or_else(|| Error::Misuse("not a query".into()))
    }

    #[test]
    fn test_insert_and_select() -> Result<()> {
        let mut db = database()?;
        run(&mut db, "CREATE TABLE users (id INTEGER NOT NULL, name TEXT, active BOOLEAN)", &[])?;
        run(
            &mut db,
            "INSERT INTO users VALUES (1, 'ann', TRUE); INSERT INTO users (name, id) VALUES ('bob', @id)",
            &[("@id", Value::Integer(2))],
        )?;

        let rows = query(&mut db, "SELECT name, ID FROM USERS")?;
        assert_eq!(rows.columns, vec!["name".to_string(), "id".to_string()]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows[0].get("name"), Some(&Value::Text("ann".into())));
        assert_eq!(rows.rows[1][1], Value::Integer(2));

        let all = query(&mut db, "SELECT * FROM users")?;
        assert_eq!(all.rows[1].get("active"), Some(&Value::Null));
        Ok(())
    }

    #[test]
    fn test_empty_table_is_not_an_error() -> Result<()> {
        let mut db = database()?;
        run(&mut db, "CREATE TABLE t (id int)", &[])?;
        let rows = query(&mut db, "SELECT id FROM t")?;
        assert!(rows.is_empty());
        assert_eq!(rows.columns, vec!["id".to_string()]);
        Ok(())
    }

    #[test]
    fn test_not_null_and_types() -> Result<()> {
        let mut db = database()?;
        run(&mut db, "CREATE TABLE t (id int NOT NULL, name text)", &[])?;
        assert!(matches!(
            run(&mut db, "INSERT INTO t (name) VALUES ('x')", &[]),
            Err(Error::Constraint(_))
        ));
        assert!(matches!(
            run(&mut db, "INSERT INTO t VALUES ('x', 'y')", &[]),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            run(&mut db, "INSERT INTO t VALUES (1)", &[]),
            Err(Error::Syntax(_))
        ));
        assert!(matches!(
            run(&mut db, "INSERT INTO t (id, ID) VALUES (1, 2)", &[]),
            Err(Error::Syntax(_))
        ));
        Ok(())
    }

    #[test]
    fn test_not_found() -> Result<()> {
        let mut db = database()?;
        run(&mut db, "CREATE TABLE t (id int)", &[])?;
        for sql in [
            "SELECT id FROM missing",
            "SELECT nope FROM t",
            "INSERT INTO t (nope) VALUES (1)",
            "INSERT INTO t VALUES (@unbound)",
        ] {
            assert!(matches!(run(&mut db, sql, &[]), Err(Error::NotFound(_))), "{sql}");
        }
        Ok(())
    }

    #[test]
    fn test_parameter_names() -> Result<()> {
        let mut db = database()?;
        run(&mut db, "CREATE TABLE t (id int)", &[])?;
        run(
            &mut db,
            "INSERT INTO t VALUES (:a), ($b), (@C)",
            &[("a", Value::Integer(1)), ("$b", Value::Integer(2)), ("@c", Value::Integer(3))],
        )?;
        let ids: Vec<_> = query(&mut db, "SELECT id FROM t")?
            .iter()
            .map(|row| row[0].as_i64())
            .collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
        Ok(())
    }

    #[test]
    fn test_select_returns_rows_in_insertion_order() -> Result<()> {
        let mut db = database()?;
        run(&mut db, "CREATE TABLE t (n int, pad text)", &[])?;
        let wide = Value::Text("x".repeat(5000));
        for (n, pad) in [(1, wide.clone()), (2, wide), (3, Value::Text("y".into()))] {
            run(
                &mut db,
                "INSERT INTO t VALUES (@n, @pad)",
                &[("n", Value::Integer(n)), ("pad", pad)],
            )?;
        }
        let order: Vec<_> = query(&mut db, "SELECT n FROM t")?
            .iter()
            .map(|row| row[0].clone())
            .collect();
        assert_eq!(order, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        Ok(())
    }

    #[test]
    fn test_rowset_display() -> Result<()> {
        let mut db = database()?;
        run(&mut db, "CREATE TABLE t (id int); INSERT INTO t VALUES (1)", &[])?;
        assert_eq!(query(&mut db, "SELECT * FROM t")?.to_string(), "id\n1\n(1 row)");
        Ok(())
    }
}
