//! In-Memory SQL Store
//!
//! Wraps a rusqlite `:memory:` database holding the sales table. The table
//! is materialized from the dataset at most once (`ensure_table` is
//! idempotent) and only read afterwards. The connection sits behind a mutex
//! because rusqlite connections are not `Sync`.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, types::ValueRef, Connection};

use crate::dataset::Dataset;
use crate::error::{AdvisorError, Result};

/// Name of the materialized sales table
pub const SALES_TABLE: &str = "sales";

/// SQL store preloaded with the sales dataset
pub struct SalesStore {
    conn: Mutex<Connection>,
    dataset: Dataset,
}

impl SalesStore {
    /// Open an in-memory store for the given dataset. The table is not
    /// materialized until `ensure_table` is called.
    pub fn open(dataset: Dataset) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            dataset,
        })
    }

    /// Create the sales table and load the dataset if it is not already
    /// there. Safe to call on every lookup: a populated table is left
    /// untouched.
    pub fn ensure_table(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sales (
                store_number     INTEGER NOT NULL,
                sku              INTEGER NOT NULL,
                product_class    INTEGER NOT NULL,
                sold_date        TEXT    NOT NULL,
                qty_sold         INTEGER NOT NULL,
                total_sale_value REAL    NOT NULL,
                on_promo         INTEGER NOT NULL
            );",
        )?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }

        let mut stmt = conn.prepare(
            "INSERT INTO sales
                (store_number, sku, product_class, sold_date, qty_sold, total_sale_value, on_promo)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for record in self.dataset.records() {
            stmt.execute(params![
                record.store_number,
                record.sku,
                record.product_class,
                record.sold_date,
                record.qty_sold,
                record.total_sale_value,
                record.on_promo as i64,
            ])?;
        }

        tracing::info!(rows = self.dataset.len(), table = SALES_TABLE, "sales table materialized");
        Ok(())
    }

    /// Number of rows currently in the sales table
    pub fn row_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))?)
    }

    /// Execute a SQL statement and render the result set as an aligned
    /// text table.
    pub fn execute_query(&self, sql: &str) -> Result<String> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();

        let mut table: Vec<Vec<String>> = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut rendered = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                rendered.push(render_value(row.get_ref(i)?));
            }
            table.push(rendered);
        }

        Ok(render_table(&columns, &table))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AdvisorError::LockPoisoned)
    }
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(_) => "<blob>".into(),
    }
}

/// Render header + rows with space-padded columns
fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return format!("{}\n(no rows)", columns.join("  "));
    }

    let mut widths: Vec<usize> = columns.iter().map(String::len).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let render_row = |cells: &[String]| {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = render_row(columns);
    for row in rows {
        out.push('\n');
        out.push_str(&render_row(row));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SalesStore {
        let store = SalesStore::open(Dataset::embedded().unwrap()).unwrap();
        store.ensure_table().unwrap();
        store
    }

    #[test]
    fn test_ensure_table_is_idempotent() {
        let store = store();
        let count = store.row_count().unwrap();
        assert!(count > 0);

        store.ensure_table().unwrap();
        store.ensure_table().unwrap();
        assert_eq!(store.row_count().unwrap(), count);
    }

    #[test]
    fn test_sum_query_returns_one_row_table() {
        let store = store();
        let out = store
            .execute_query("SELECT SUM(total_sale_value) AS total_revenue FROM sales")
            .unwrap();

        let mut lines = out.lines();
        assert_eq!(lines.next().unwrap().trim(), "total_revenue");
        let total: f64 = lines.next().unwrap().trim().parse().unwrap();
        assert!(total > 0.0);
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_group_by_renders_aligned_columns() {
        let store = store();
        let out = store
            .execute_query(
                "SELECT store_number, SUM(qty_sold) AS volume FROM sales \
                 GROUP BY store_number ORDER BY store_number",
            )
            .unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("store_number"));
        // one row per distinct store
        assert_eq!(lines.len(), 5);
        assert!(lines[1].starts_with("1320"));
    }

    #[test]
    fn test_malformed_sql_is_an_error_not_a_panic() {
        let store = store();
        let err = store
            .execute_query("SELECT no_such_column FROM sales")
            .unwrap_err();
        assert!(matches!(err, AdvisorError::Store(_)));
    }

    #[test]
    fn test_empty_result_set() {
        let store = store();
        let out = store
            .execute_query("SELECT sku FROM sales WHERE store_number = -1")
            .unwrap();
        assert!(out.contains("(no rows)"));
    }
}
