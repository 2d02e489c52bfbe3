//! Paged range scans over secondary tables.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};

use crate::capabilities::{Page, RangeQuery};
use crate::error::StoreResult;

pub(crate) fn blob(bytes: &[u8]) -> Value {
    Value::Blob(bytes.to_vec())
}

pub(crate) fn int(value: u64) -> Value {
    Value::Integer(value as i64)
}

/// A `SELECT` over one table with conjunctive filters.
pub(crate) struct Scan {
    table: &'static str,
    columns: &'static str,
    conditions: Vec<String>,
    values: Vec<Value>,
}

impl Scan {
    pub(crate) fn new(table: &'static str, columns: &'static str) -> Self {
        Self {
            table,
            columns,
            conditions: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Add a condition with its positional parameters.
    pub(crate) fn filter(
        mut self,
        condition: impl Into<String>,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.conditions.push(condition.into());
        self.values.extend(values);
        self
    }

    pub(crate) fn filter_if(
        self,
        value: Option<Value>,
        condition: &str,
        repeat: usize,
    ) -> Self {
        match value {
            Some(value) => self.filter(condition, std::iter::repeat(value).take(repeat)),
            None => self,
        }
    }

    /// Restrict `column` to the range's block bounds.
    pub(crate) fn blocks(self, column: &str, range: &RangeQuery) -> Self {
        let scan = self.filter_if(range.from_block.map(int), &format!("{column} >= ?"), 1);
        scan.filter_if(range.to_block.map(int), &format!("{column} <= ?"), 1)
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn order_clause(order: &[&str], descending: bool) -> String {
        let direction = if descending { "DESC" } else { "ASC" };
        order
            .iter()
            .map(|column| format!("{column} {direction}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn count(&self, conn: &Connection) -> StoreResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.table, self.where_clause());
        let count: i64 = conn.query_row(&sql, params_from_iter(self.values.iter()), |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }

    /// One page ordered by `order`, with the count of all matching rows.
    pub(crate) fn page<T>(
        &self,
        conn: &Connection,
        order: &[&str],
        range: &RangeQuery,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<Page<T>> {
        let total = self.count(conn)?;
        if total == 0 || range.limit == 0 || range.offset >= total {
            return Ok(Page {
                items: Vec::new(),
                total,
            });
        }

        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {} LIMIT ? OFFSET ?",
            self.columns,
            self.table,
            self.where_clause(),
            Self::order_clause(order, range.descending),
        );
        let values = self
            .values
            .iter()
            .cloned()
            .chain([int(range.limit.min(i64::MAX as u64)), int(range.offset)]);

        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(values), map)?
            .collect::<rusqlite::Result<Vec<T>>>()?;
        Ok(Page { items, total })
    }

    /// Every matching row in ascending `order`.
    pub(crate) fn all<T>(
        &self,
        conn: &Connection,
        order: &[&str],
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<Vec<T>> {
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            self.columns,
            self.table,
            self.where_clause(),
            Self::order_clause(order, false),
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(self.values.iter()), map)?
            .collect::<rusqlite::Result<Vec<T>>>()?;
        Ok(items)
    }
}
