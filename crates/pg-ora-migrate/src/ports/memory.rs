//! In-memory database adapter.
//!
//! Implements both connection ports over a table map guarded by a mutex.
//! Understands exactly the statement shapes the engine generates for the
//! "memory" dialect; anything else is an error so that a changed query
//! surfaces in tests instead of silently doing nothing.
//!
//! Failure injection hooks let tests drive the retry and
//! continue-on-error paths without a real flaky database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::core::{ColumnInfo, Record, SourceConnection, SqlValue, TargetConnection};
use crate::error::{MigrateError, Result};

struct InjectedFailure {
    sql_fragment: String,
    message: String,
    /// How many more matching calls fail. `u32::MAX` means every call.
    remaining: u32,
}

struct RowFailure {
    value: SqlValue,
    message: String,
}

/// In-memory source/target used by tests and dry runs.
pub struct MemoryDb {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    failures: Mutex<Vec<InjectedFailure>>,
    row_failures: Mutex<Vec<RowFailure>>,
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDb {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            row_failures: Mutex::new(Vec::new()),
        }
    }

    /// Create an empty table, replacing any existing one.
    pub fn create_table(&self, name: &str) {
        self.tables
            .lock()
            .unwrap()
            .insert(name.to_ascii_uppercase(), Vec::new());
    }

    /// Seed rows into a table, creating it when needed.
    pub fn insert_rows(&self, name: &str, rows: Vec<Record>) {
        self.tables
            .lock()
            .unwrap()
            .entry(name.to_ascii_uppercase())
            .or_default()
            .extend(rows);
    }

    /// Snapshot of a table's rows.
    #[must_use]
    pub fn rows(&self, name: &str) -> Vec<Record> {
        self.tables
            .lock()
            .unwrap()
            .get(&name.to_ascii_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next `times` statements whose SQL contains `sql_fragment`.
    pub fn inject_failure(&self, sql_fragment: &str, message: &str, times: u32) {
        self.failures.lock().unwrap().push(InjectedFailure {
            sql_fragment: sql_fragment.to_string(),
            message: message.to_string(),
            remaining: times,
        });
    }

    /// Fail any insert whose bound values contain `value`.
    pub fn inject_row_failure(&self, value: SqlValue, message: &str) {
        self.row_failures.lock().unwrap().push(RowFailure {
            value,
            message: message.to_string(),
        });
    }

    fn check_failure(&self, sql: &str) -> Result<()> {
        let mut failures = self.failures.lock().unwrap();
        for failure in failures.iter_mut() {
            if failure.remaining > 0 && sql.contains(&failure.sql_fragment) {
                if failure.remaining != u32::MAX {
                    failure.remaining -= 1;
                }
                return Err(MigrateError::Target(failure.message.clone()));
            }
        }
        Ok(())
    }

    fn check_row_failure(&self, row: &[SqlValue]) -> Result<()> {
        let row_failures = self.row_failures.lock().unwrap();
        for failure in row_failures.iter() {
            if row.contains(&failure.value) {
                return Err(MigrateError::Target(failure.message.clone()));
            }
        }
        Ok(())
    }

    fn run_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        self.check_failure(sql)?;
        let statement = Statement::parse(sql)?;
        let tables = self.tables.lock().unwrap();

        match statement {
            Statement::Count { table } => {
                let rows = tables
                    .get(&table)
                    .ok_or_else(|| no_such_table(&table))?;
                Ok(vec![Record::new().with("CNT", rows.len() as i64)])
            }
            Statement::Select {
                table,
                column,
                filter,
                order_by,
                limit,
                offset,
            } => {
                let rows = tables
                    .get(&table)
                    .ok_or_else(|| no_such_table(&table))?;
                let mut selected: Vec<Record> = rows
                    .iter()
                    .filter(|row| match &filter {
                        Some(filter_column) => {
                            let bound = params.first().cloned().unwrap_or(SqlValue::Null);
                            row.get(filter_column)
                                .map(|v| values_equal(v, &bound))
                                .unwrap_or(false)
                        }
                        None => true,
                    })
                    .cloned()
                    .collect();
                if let Some(order_column) = order_by {
                    selected.sort_by(|a, b| {
                        let left = order_key(a, &order_column);
                        let right = order_key(b, &order_column);
                        cmp_values(&left, &right)
                    });
                }
                let selected: Vec<Record> = selected
                    .into_iter()
                    .skip(offset.unwrap_or(0))
                    .take(limit.unwrap_or(usize::MAX))
                    .collect();
                match column {
                    Some(column) => Ok(selected
                        .iter()
                        .map(|row| {
                            Record::new().with(
                                column.as_str(),
                                row.get(&column).cloned().unwrap_or(SqlValue::Null),
                            )
                        })
                        .collect()),
                    None => Ok(selected),
                }
            }
            other => Err(MigrateError::Target(format!(
                "statement is not a query: {other:?}"
            ))),
        }
    }

    fn run_execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.check_failure(sql)?;
        let statement = Statement::parse(sql)?;
        let mut tables = self.tables.lock().unwrap();

        match statement {
            Statement::Insert { table, columns, literals } => {
                let values: Vec<SqlValue> = if literals.is_empty() {
                    params.to_vec()
                } else {
                    literals
                };
                if values.len() != columns.len() {
                    return Err(MigrateError::Target(format!(
                        "insert into {table}: {} values for {} columns",
                        values.len(),
                        columns.len()
                    )));
                }
                self.check_row_failure(&values)?;
                let mut record = Record::new();
                for (column, value) in columns.iter().zip(values) {
                    record.set(column, value);
                }
                tables
                    .get_mut(&table)
                    .ok_or_else(|| no_such_table(&table))?
                    .push(record);
                Ok(1)
            }
            Statement::Delete { table } => {
                let rows = tables
                    .get_mut(&table)
                    .ok_or_else(|| no_such_table(&table))?;
                let deleted = rows.len() as u64;
                rows.clear();
                Ok(deleted)
            }
            Statement::CreateTable { table } => {
                tables.entry(table).or_default();
                Ok(0)
            }
            other => Err(MigrateError::Target(format!(
                "statement is not executable: {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl SourceConnection for MemoryDb {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        self.run_query(sql, params)
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl TargetConnection for MemoryDb {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        self.run_query(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.run_execute(sql, params)
    }

    /// All-or-nothing, like a real array bind: a failing row leaves the
    /// table as it was before the call.
    async fn execute_batch(&self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<u64> {
        let table = match Statement::parse(sql)? {
            Statement::Insert { table, .. } => table,
            other => {
                return Err(MigrateError::Target(format!(
                    "statement is not batchable: {other:?}"
                )))
            }
        };
        let snapshot_len = self
            .tables
            .lock()
            .unwrap()
            .get(&table)
            .map(Vec::len)
            .unwrap_or(0);

        let mut affected = 0;
        for row in rows {
            match self.run_execute(sql, row) {
                Ok(n) => affected += n,
                Err(e) => {
                    if let Some(stored) = self.tables.lock().unwrap().get_mut(&table) {
                        stored.truncate(snapshot_len);
                    }
                    return Err(e);
                }
            }
        }
        Ok(affected)
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let tables = self.tables.lock().unwrap();
        let rows = tables
            .get(&table.to_ascii_uppercase())
            .ok_or_else(|| no_such_table(table))?;
        Ok(rows
            .first()
            .map(|row| {
                row.column_names()
                    .into_iter()
                    .map(|name| ColumnInfo {
                        name,
                        data_type: "ANY".to_string(),
                        is_nullable: true,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

fn no_such_table(table: &str) -> MigrateError {
    MigrateError::Target(format!("table {table} does not exist"))
}

/// First-column value used for `ORDER BY 1`.
fn order_key(row: &Record, order_column: &str) -> SqlValue {
    if order_column == "1" {
        row.iter()
            .next()
            .map(|(_, v)| v.clone())
            .unwrap_or(SqlValue::Null)
    } else {
        row.get(order_column).cloned().unwrap_or(SqlValue::Null)
    }
}

fn values_equal(a: &SqlValue, b: &SqlValue) -> bool {
    cmp_values(a, b) == std::cmp::Ordering::Equal
}

fn cmp_values(a: &SqlValue, b: &SqlValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (SqlValue::Int(x), SqlValue::Int(y)) => x.cmp(y),
        (SqlValue::Float(x), SqlValue::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (SqlValue::Int(x), SqlValue::Float(y)) => {
            (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (SqlValue::Float(x), SqlValue::Int(y)) => {
            x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
        }
        (SqlValue::Text(x), SqlValue::Text(y)) => x.cmp(y),
        (SqlValue::Bool(x), SqlValue::Bool(y)) => x.cmp(y),
        (SqlValue::Timestamp(x), SqlValue::Timestamp(y)) => x.cmp(y),
        (SqlValue::Uuid(x), SqlValue::Uuid(y)) => x.cmp(y),
        _ => a.to_sql_literal().cmp(&b.to_sql_literal()),
    }
}

/// The statement shapes the engine generates for the "memory" dialect.
#[derive(Debug)]
enum Statement {
    Count {
        table: String,
    },
    Select {
        table: String,
        /// Single projected column, `None` for `*`.
        column: Option<String>,
        /// Equality filter column from `WHERE col = :1`.
        filter: Option<String>,
        order_by: Option<String>,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        /// Literal values when the statement carries them inline.
        literals: Vec<SqlValue>,
    },
    Delete {
        table: String,
    },
    CreateTable {
        table: String,
    },
}

impl Statement {
    fn parse(sql: &str) -> Result<Self> {
        let trimmed = sql.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper.starts_with("SELECT COUNT(*) AS CNT FROM ") {
            let table = word_after(trimmed, "FROM")?;
            return Ok(Statement::Count {
                table: table.to_ascii_uppercase(),
            });
        }
        if upper.starts_with("SELECT") {
            return Self::parse_select(trimmed, &upper);
        }
        if upper.starts_with("INSERT INTO ") {
            return Self::parse_insert(trimmed);
        }
        if upper.starts_with("DELETE FROM ") {
            let table = word_after(trimmed, "FROM")?;
            return Ok(Statement::Delete {
                table: table.to_ascii_uppercase(),
            });
        }
        if upper.starts_with("CREATE TABLE ") {
            let rest = trimmed["CREATE TABLE ".len()..].trim();
            let table = rest
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or_default();
            return Ok(Statement::CreateTable {
                table: table.to_ascii_uppercase(),
            });
        }
        Err(MigrateError::Target(format!(
            "unsupported statement: {trimmed}"
        )))
    }

    fn parse_select(sql: &str, upper: &str) -> Result<Self> {
        let projection = sql["SELECT ".len()..]
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        let column = if projection == "*" {
            None
        } else {
            Some(projection)
        };
        let table = word_after(sql, "FROM")?.to_ascii_uppercase();

        let filter = if upper.contains(" WHERE ") {
            Some(word_after(sql, "WHERE")?.to_string())
        } else {
            None
        };
        let order_by = if upper.contains(" ORDER BY ") {
            Some(word_after(sql, "BY")?.to_string())
        } else {
            None
        };
        let limit = number_after(upper, " LIMIT ");
        let offset = number_after(upper, " OFFSET ");

        Ok(Statement::Select {
            table,
            column,
            filter,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_insert(sql: &str) -> Result<Self> {
        let open = sql
            .find('(')
            .ok_or_else(|| MigrateError::Target(format!("malformed insert: {sql}")))?;
        let close = sql[open..]
            .find(')')
            .map(|i| open + i)
            .ok_or_else(|| MigrateError::Target(format!("malformed insert: {sql}")))?;
        let table = sql["INSERT INTO ".len()..open].trim().to_ascii_uppercase();
        let columns: Vec<String> = sql[open + 1..close]
            .split(',')
            .map(|c| c.trim().to_string())
            .collect();

        let values_start = sql[close..]
            .find('(')
            .map(|i| close + i)
            .ok_or_else(|| MigrateError::Target(format!("malformed insert: {sql}")))?;
        let values_text = sql[values_start + 1..sql.rfind(')').unwrap_or(sql.len())].trim();

        let literals = if values_text.starts_with(':') || values_text.starts_with('$') {
            Vec::new()
        } else {
            split_literals(values_text)
                .iter()
                .map(|piece| parse_literal(piece))
                .collect()
        };

        Ok(Statement::Insert {
            table,
            columns,
            literals,
        })
    }
}

/// The identifier following a keyword, stripped of trailing punctuation.
fn word_after<'a>(sql: &'a str, keyword: &str) -> Result<&'a str> {
    let mut parts = sql.split_whitespace();
    while let Some(part) = parts.next() {
        if part.eq_ignore_ascii_case(keyword) {
            return parts
                .next()
                .ok_or_else(|| MigrateError::Target(format!("malformed statement: {sql}")));
        }
    }
    Err(MigrateError::Target(format!("malformed statement: {sql}")))
}

fn number_after(upper: &str, keyword: &str) -> Option<usize> {
    let at = upper.find(keyword)?;
    upper[at + keyword.len()..]
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Split a literal VALUES list on commas outside quotes.
fn split_literals(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in text.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            ',' if !in_quote => {
                pieces.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }
    pieces
}

fn parse_literal(piece: &str) -> SqlValue {
    if piece.eq_ignore_ascii_case("NULL") {
        return SqlValue::Null;
    }
    if let Some(inner) = piece.strip_prefix('\'').and_then(|p| p.strip_suffix('\'')) {
        let text = inner.replace("''", "'");
        if let Ok(u) = Uuid::parse_str(&text) {
            return SqlValue::Uuid(u);
        }
        if let Ok(t) = text.parse::<NaiveDateTime>() {
            return SqlValue::Timestamp(t);
        }
        return SqlValue::Text(text);
    }
    if let Ok(n) = piece.parse::<i64>() {
        return SqlValue::Int(n);
    }
    if let Ok(f) = piece.parse::<f64>() {
        return SqlValue::Float(f);
    }
    SqlValue::Text(piece.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryDb {
        let db = MemoryDb::new();
        db.insert_rows(
            "users",
            vec![
                Record::new().with("id", 2i64).with("name", "bea"),
                Record::new().with("id", 1i64).with("name", "ada"),
            ],
        );
        db
    }

    #[tokio::test]
    async fn test_count_query() {
        let db = seeded();
        let rows = SourceConnection::query(&db, "SELECT COUNT(*) AS CNT FROM users", &[])
            .await
            .unwrap();
        assert_eq!(rows[0].get("CNT"), Some(&SqlValue::Int(2)));
    }

    #[tokio::test]
    async fn test_page_query_orders_by_first_column() {
        let db = seeded();
        let rows = SourceConnection::query(
            &db,
            "SELECT * FROM users ORDER BY 1 LIMIT 10 OFFSET 0",
            &[],
        )
        .await
        .unwrap();
        assert_eq!(rows[0].get("id"), Some(&SqlValue::Int(1)));
        assert_eq!(rows[1].get("id"), Some(&SqlValue::Int(2)));
    }

    #[tokio::test]
    async fn test_insert_with_params() {
        let db = seeded();
        let affected = TargetConnection::execute(
            &db,
            "INSERT INTO users (id, name) VALUES (:1, :2)",
            &[SqlValue::Int(3), SqlValue::Text("cyd".into())],
        )
        .await
        .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(db.rows("users").len(), 3);
    }

    #[tokio::test]
    async fn test_insert_with_literals() {
        let db = seeded();
        TargetConnection::execute(
            &db,
            "INSERT INTO users (id, name) VALUES (3, 'it''s cyd')",
            &[],
        )
        .await
        .unwrap();
        let rows = db.rows("users");
        assert_eq!(rows[2].get("name"), Some(&SqlValue::Text("it's cyd".into())));
    }

    #[tokio::test]
    async fn test_where_filter() {
        let db = seeded();
        let rows = TargetConnection::query(
            &db,
            "SELECT * FROM users WHERE id = :1",
            &[SqlValue::Int(1)],
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&SqlValue::Text("ada".into())));
    }

    #[tokio::test]
    async fn test_delete_clears_table() {
        let db = seeded();
        let affected = TargetConnection::execute(&db, "DELETE FROM users", &[])
            .await
            .unwrap();
        assert_eq!(affected, 2);
        assert!(db.rows("users").is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_counts_down() {
        let db = seeded();
        db.inject_failure("COUNT(*)", "connection reset by peer", 1);
        assert!(SourceConnection::query(&db, "SELECT COUNT(*) AS CNT FROM users", &[])
            .await
            .is_err());
        assert!(SourceConnection::query(&db, "SELECT COUNT(*) AS CNT FROM users", &[])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_row_failure_matches_value() {
        let db = seeded();
        db.inject_row_failure(
            SqlValue::Text("bad".into()),
            "ORA-00001: unique constraint violated",
        );
        let err = TargetConnection::execute(
            &db,
            "INSERT INTO users (id, name) VALUES (:1, :2)",
            &[SqlValue::Int(9), SqlValue::Text("bad".into())],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("ORA-00001"));
    }

    #[tokio::test]
    async fn test_unsupported_statement_is_rejected() {
        let db = seeded();
        assert!(TargetConnection::execute(&db, "TRUNCATE users", &[])
            .await
            .is_err());
    }
}
