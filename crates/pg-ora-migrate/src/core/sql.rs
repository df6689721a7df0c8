//! Dialect-aware SQL fragment builders.
//!
//! Identifiers cannot be bound as statement parameters, so table and column
//! names are quoted/escaped here and interpolated. Values always travel as
//! bind parameters except in backup statement streams, which are literal by
//! design.

/// Quote an identifier for the given dialect.
///
/// - postgres: `"name"` with embedded quotes doubled
/// - oracle: uppercased bare identifier (Oracle folds unquoted names up)
/// - anything else (memory adapter): the name as given
pub fn quote_ident(db_type: &str, name: &str) -> String {
    match db_type {
        "postgres" => format!("\"{}\"", name.replace('"', "\"\"")),
        "oracle" => name.to_ascii_uppercase(),
        _ => name.to_string(),
    }
}

/// Bind-parameter placeholder for the given dialect, 1-based.
///
/// - postgres: `$1`, `$2`, ...
/// - oracle: `:1`, `:2`, ...
pub fn placeholder(db_type: &str, index: usize) -> String {
    match db_type {
        "postgres" => format!("${}", index),
        _ => format!(":{}", index),
    }
}

/// Count query for a table.
pub fn count_query(db_type: &str, table: &str) -> String {
    format!("SELECT COUNT(*) AS CNT FROM {}", quote_ident(db_type, table))
}

/// Paged export query: deterministic order, bounded page.
pub fn page_query(db_type: &str, table: &str, batch_size: usize, offset: u64) -> String {
    let table = quote_ident(db_type, table);
    match db_type {
        "oracle" => format!(
            "SELECT * FROM {} ORDER BY 1 OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            table, offset, batch_size
        ),
        _ => format!(
            "SELECT * FROM {} ORDER BY 1 LIMIT {} OFFSET {}",
            table, batch_size, offset
        ),
    }
}

/// Bounded sample query ordered by a key column.
pub fn sample_query(db_type: &str, table: &str, key_column: &str, limit: usize) -> String {
    let table = quote_ident(db_type, table);
    let key = quote_ident(db_type, key_column);
    match db_type {
        "oracle" => format!(
            "SELECT * FROM {} ORDER BY {} FETCH FIRST {} ROWS ONLY",
            table, key, limit
        ),
        _ => format!("SELECT * FROM {} ORDER BY {} LIMIT {}", table, key, limit),
    }
}

/// Full key-set query for missing-record analysis.
pub fn keys_query(db_type: &str, table: &str, key_column: &str) -> String {
    format!(
        "SELECT {} FROM {}",
        quote_ident(db_type, key_column),
        quote_ident(db_type, table)
    )
}

/// Multi-column INSERT with bind placeholders.
pub fn insert_query(db_type: &str, table: &str, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(db_type, c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| placeholder(db_type, i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(db_type, table),
        column_list,
        placeholders
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_per_dialect() {
        assert_eq!(quote_ident("postgres", "users"), "\"users\"");
        assert_eq!(quote_ident("postgres", "we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_ident("oracle", "users"), "USERS");
        assert_eq!(quote_ident("memory", "users"), "users");
    }

    #[test]
    fn test_page_query_dialects() {
        assert_eq!(
            page_query("postgres", "t", 10, 20),
            "SELECT * FROM \"t\" ORDER BY 1 LIMIT 10 OFFSET 20"
        );
        assert!(page_query("oracle", "t", 10, 20).contains("FETCH NEXT 10 ROWS ONLY"));
    }

    #[test]
    fn test_insert_query_placeholders() {
        let cols = vec!["id".to_string(), "name".to_string()];
        assert_eq!(
            insert_query("oracle", "users", &cols),
            "INSERT INTO USERS (ID, NAME) VALUES (:1, :2)"
        );
        assert_eq!(
            insert_query("postgres", "users", &cols),
            "INSERT INTO \"users\" (\"id\", \"name\") VALUES ($1, $2)"
        );
    }
}
