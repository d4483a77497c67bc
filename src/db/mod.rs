pub mod pool;

use crate::error::Error;
use r2d2::Pool;
use rusqlite::types::ValueRef;
use tracing::{debug, info};

use pool::SqliteConnectionManager;

/// One result row. Cells are stringified with no column typing; NULL is `None`.
pub type Row = Vec<Option<String>>;

/// Read access to the restaurant database: schema introspection for the
/// prompts plus raw query execution. All calls run on the blocking pool
/// because rusqlite connections are synchronous.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }

    /// The canonical schema text used by every prompt that needs it.
    /// One line per base table, identifiers backticked to match the
    /// convention the SQL-generation prompt demands:
    ///
    /// `restaurants`: `name` TEXT, `rating` REAL, `price_range` TEXT
    pub async fn schema_text(&self) -> Result<String, Error> {
        let pool = self.pool.clone();

        let schema = tokio::task::spawn_blocking(move || -> Result<String, Error> {
            let conn = pool
                .get()
                .map_err(|e| Error::SchemaUnavailable(e.to_string()))?;

            let tables = base_tables(&conn).map_err(|e| Error::SchemaUnavailable(e.to_string()))?;

            let mut lines = Vec::new();
            for table in &tables {
                let columns =
                    table_columns(&conn, table).map_err(|e| Error::SchemaUnavailable(e.to_string()))?;

                let rendered = columns
                    .iter()
                    .map(|(name, data_type)| {
                        if data_type.is_empty() {
                            format!("`{}`", name)
                        } else {
                            format!("`{}` {}", name, data_type)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");

                lines.push(format!("`{}`: {}", table, rendered));
            }

            Ok(lines.join("\n"))
        })
        .await
        .map_err(|e| Error::SchemaUnavailable(e.to_string()))??;

        debug!("Schema text:\n{}", schema);
        Ok(schema)
    }

    /// Names of all base tables, for the status endpoint.
    pub async fn table_names(&self) -> Result<Vec<String>, Error> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<String>, Error> {
            let conn = pool
                .get()
                .map_err(|e| Error::SchemaUnavailable(e.to_string()))?;
            base_tables(&conn).map_err(|e| Error::SchemaUnavailable(e.to_string()))
        })
        .await
        .map_err(|e| Error::SchemaUnavailable(e.to_string()))?
    }

    /// Executes an arbitrary SQL string and returns every row. The text is
    /// model-generated and model-revalidated upstream; there is no static
    /// allow-list here, no timeout, and no row cap.
    pub async fn run_query(&self, sql: String) -> Result<Vec<Row>, Error> {
        info!("Executing SQL: {}", sql);
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<Row>, Error> {
            let conn = pool
                .get()
                .map_err(|e| Error::QueryExecutionFailed(e.to_string()))?;

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::QueryExecutionFailed(e.to_string()))?;
            let column_count = stmt.column_count();

            let mapped = stmt
                .query_map([], |row| {
                    let mut cells: Row = Vec::with_capacity(column_count);
                    for i in 0..column_count {
                        cells.push(cell_text(row.get_ref(i)?));
                    }
                    Ok(cells)
                })
                .map_err(|e| Error::QueryExecutionFailed(e.to_string()))?;

            let mut rows = Vec::new();
            for row in mapped {
                rows.push(row.map_err(|e| Error::QueryExecutionFailed(e.to_string()))?);
            }
            Ok(rows)
        })
        .await
        .map_err(|e| Error::QueryExecutionFailed(e.to_string()))?
    }
}

fn base_tables(conn: &rusqlite::Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut tables = Vec::new();
    for row in rows {
        tables.push(row?);
    }
    Ok(tables)
}

fn table_columns(
    conn: &rusqlite::Connection,
    table: &str,
) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

fn cell_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r2d2::Pool;

    fn seeded_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");

        let conn = rusqlite::Connection::open(&path).expect("open");
        conn.execute_batch(
            "CREATE TABLE restaurants (name TEXT, rating REAL, price_range TEXT);
             INSERT INTO restaurants VALUES ('Casa Mono', 4.7, '$$');
             INSERT INTO restaurants VALUES ('El Rincon', 4.2, '$');
             INSERT INTO restaurants VALUES (NULL, 3.0, '');",
        )
        .expect("seed");
        drop(conn);

        let manager = SqliteConnectionManager::new(path.to_string_lossy().to_string());
        let pool = Pool::builder().max_size(2).build(manager).expect("pool");
        (dir, Database::new(pool))
    }

    #[tokio::test]
    async fn schema_text_is_one_backticked_line_per_table() {
        let (_dir, db) = seeded_db();
        let schema = db.schema_text().await.expect("schema");
        assert_eq!(
            schema,
            "`restaurants`: `name` TEXT, `rating` REAL, `price_range` TEXT"
        );
    }

    #[tokio::test]
    async fn run_query_returns_stringified_rows_with_null_as_none() {
        let (_dir, db) = seeded_db();
        let rows = db
            .run_query("SELECT name, rating FROM restaurants ORDER BY rating DESC".to_string())
            .await
            .expect("rows");

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0].as_deref(), Some("Casa Mono"));
        assert_eq!(rows[0][1].as_deref(), Some("4.7"));
        assert_eq!(rows[2][0], None);
    }

    #[tokio::test]
    async fn run_query_surfaces_sql_errors_as_execution_failures() {
        let (_dir, db) = seeded_db();
        let err = db
            .run_query("SELECT nope FROM missing".to_string())
            .await
            .expect_err("must fail");
        assert!(matches!(err, Error::QueryExecutionFailed(_)));
    }

    #[tokio::test]
    async fn table_names_lists_base_tables() {
        let (_dir, db) = seeded_db();
        let tables = db.table_names().await.expect("tables");
        assert_eq!(tables, vec!["restaurants".to_string()]);
    }
}
