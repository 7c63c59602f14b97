use rusqlite::types::Value;
use rusqlite::{Batch, Connection, OpenFlags};
use std::path::Path;
use tracing::debug;

use crate::database::schema::SCHEMA;
use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// Column names plus rows of dynamically typed SQLite values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by a statement that returns no columns.
    pub affected: usize,
}

/// A stored query the user can pick by slug.
#[derive(Debug, Clone, Copy)]
pub struct CannedQuery {
    pub slug: &'static str,
    pub title: &'static str,
    pub sql: &'static str,
    /// First column is a label and second a number.
    pub chartable: bool,
}

pub const CATALOG: &[CannedQuery] = &[
    CannedQuery {
        slug: "byzantine-11th-century",
        title: "Artifacts from 11th century Byzantine culture",
        sql: "SELECT id, title, culture, century FROM artifact_metadata
              WHERE century = '11th century' AND culture = 'Byzantine'",
        chartable: false,
    },
    CannedQuery {
        slug: "unique-cultures",
        title: "Unique cultures",
        sql: "SELECT DISTINCT culture FROM artifact_metadata WHERE culture IS NOT NULL ORDER BY culture",
        chartable: false,
    },
    CannedQuery {
        slug: "artifacts-per-department",
        title: "Artifacts per department",
        sql: "SELECT department, COUNT(*) AS total FROM artifact_metadata GROUP BY department ORDER BY total DESC",
        chartable: true,
    },
    CannedQuery {
        slug: "top-colors",
        title: "Top 5 most used colors",
        sql: "SELECT color, SUM(percent) AS coverage FROM artifact_colors
              WHERE color IS NOT NULL AND percent IS NOT NULL
              GROUP BY color ORDER BY coverage DESC LIMIT 5",
        chartable: true,
    },
    CannedQuery {
        slug: "top-departments",
        title: "Top departments by artifact count",
        sql: "SELECT department, COUNT(*) AS total FROM artifact_metadata
              GROUP BY department ORDER BY total DESC LIMIT 10",
        chartable: true,
    },
    CannedQuery {
        slug: "hue-coverage",
        title: "Average color coverage by hue",
        sql: "SELECT hue, AVG(percent) AS avg_coverage FROM artifact_colors
              WHERE hue IS NOT NULL AND percent IS NOT NULL
              GROUP BY hue ORDER BY avg_coverage DESC LIMIT 10",
        chartable: true,
    },
];

pub fn find_canned(slug: &str) -> Result<&'static CannedQuery, QueryError> {
    CATALOG
        .iter()
        .find(|q| q.slug == slug)
        .ok_or_else(|| QueryError::UnknownQuery(slug.to_string()))
}

/// Runs one SQL statement against the database at `path`.
///
/// Blank input and input holding more than one statement are rejected
/// before anything executes.
///
/// The connection lives only for this call. In read-only mode the file is
/// opened with SQLite's read-only flag, so any write fails with an error
/// instead of touching stored data.
pub fn run_query(path: &Path, sql: &str, mode: AccessMode) -> Result<QueryResult, QueryError> {
    let conn = open(path, mode)?;
    debug!("Running query ({:?}): {}", mode, sql);

    let mut statements = Batch::new(&conn, sql);
    let Some(mut stmt) = statements.next()? else {
        return Err(QueryError::Empty);
    };
    if statements.next()?.is_some() {
        return Err(QueryError::MultipleStatements);
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    if columns.is_empty() {
        let affected = stmt.execute([])?;
        return Ok(QueryResult {
            columns,
            rows: Vec::new(),
            affected,
        });
    }

    let width = columns.len();
    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, Value>(i)?);
        }
        rows.push(values);
    }

    Ok(QueryResult {
        columns,
        rows,
        affected: 0,
    })
}

fn open(path: &Path, mode: AccessMode) -> Result<Connection, QueryError> {
    let open_error = |e: rusqlite::Error| QueryError::Open {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    match mode {
        AccessMode::ReadOnly => {
            let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(path, flags).map_err(open_error)
        }
        AccessMode::ReadWrite => {
            let conn = Connection::open(path).map_err(open_error)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repo::store_records;
    use serde_json::json;
    use tempfile::tempdir;

    fn seed(path: &Path) {
        let records: Vec<_> = vec![
            json!({ "id": 1, "culture": "Byzantine", "century": "11th century", "department": "Coins",
                    "colors": [{ "color": "red", "hue": "Red", "percent": 10.0 }] }),
            json!({ "id": 2, "culture": "Roman", "department": "Coins",
                    "colors": [{ "color": "red", "hue": "Red", "percent": 5.0 }] }),
            json!({ "id": 3, "department": "Prints",
                    "colors": [{ "color": "blue", "hue": "Blue", "percent": 3.0 }] }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();
        store_records(path, &records).unwrap();
    }

    #[test]
    fn test_top_colors_ranks_by_total_coverage() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("artifacts.db");
        seed(&path);

        let result = run_query(&path, find_canned("top-colors")?.sql, AccessMode::ReadOnly)?;

        assert_eq!(result.columns, vec!["color", "coverage"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::Text("red".into()), Value::Real(15.0)],
                vec![Value::Text("blue".into()), Value::Real(3.0)],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_every_canned_query_runs() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("artifacts.db");
        seed(&path);

        for canned in CATALOG {
            let result = run_query(&path, canned.sql, AccessMode::ReadOnly)?;
            assert!(!result.columns.is_empty(), "{} returned no columns", canned.slug);
            if canned.chartable {
                assert_eq!(result.columns.len(), 2, "{} is not label/value", canned.slug);
            }
        }

        let byzantine = run_query(&path, find_canned("byzantine-11th-century")?.sql, AccessMode::ReadOnly)?;
        assert_eq!(byzantine.rows.len(), 1);
        assert_eq!(byzantine.rows[0][0], Value::Integer(1));
        Ok(())
    }

    #[test]
    fn test_malformed_sql_surfaces_error_and_keeps_data() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("artifacts.db");
        seed(&path);

        let err = run_query(&path, "SELEC * FROM artifact_metadata", AccessMode::ReadWrite).unwrap_err();
        assert!(matches!(err, QueryError::Sql(_)));
        assert!(err.to_string().contains("syntax error"));

        let count = run_query(&path, "SELECT COUNT(*) FROM artifact_metadata", AccessMode::ReadOnly)?;
        assert_eq!(count.rows[0][0], Value::Integer(3));
        Ok(())
    }

    #[test]
    fn test_multiple_statements_rejected_before_running() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("artifacts.db");
        seed(&path);

        let err = run_query(&path, "SELECT 1; SELECT 2", AccessMode::ReadOnly).unwrap_err();
        assert!(matches!(err, QueryError::MultipleStatements));

        let err = run_query(
            &path,
            "DELETE FROM artifact_metadata WHERE id = 3; DROP TABLE artifact_colors",
            AccessMode::ReadWrite,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::MultipleStatements));

        let count = run_query(&path, "SELECT COUNT(*) FROM artifact_metadata", AccessMode::ReadOnly)?;
        assert_eq!(count.rows[0][0], Value::Integer(3));
        let colors = run_query(&path, "SELECT COUNT(*) FROM artifact_colors", AccessMode::ReadOnly)?;
        assert_eq!(colors.rows[0][0], Value::Integer(3));

        let single = run_query(&path, "SELECT 1;  -- trailing note\n", AccessMode::ReadOnly)?;
        assert_eq!(single.rows, vec![vec![Value::Integer(1)]]);
        Ok(())
    }

    #[test]
    fn test_blank_sql_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifacts.db");
        seed(&path);

        for sql in ["", "   \n\t", "-- just a comment", ";"] {
            let err = run_query(&path, sql, AccessMode::ReadOnly).unwrap_err();
            assert!(matches!(err, QueryError::Empty), "{:?} gave {:?}", sql, err);
        }
    }

    #[test]
    fn test_color_queries_ignore_missing_percent() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("artifacts.db");
        let record = json!({ "id": 1, "colors": [
            { "color": "red", "hue": "Red", "percent": 10.0 },
            { "color": "grey", "hue": "Grey" }
        ] });
        store_records(&path, &[record.as_object().cloned().unwrap()])?;

        let top = run_query(&path, find_canned("top-colors")?.sql, AccessMode::ReadOnly)?;
        assert_eq!(top.rows, vec![vec![Value::Text("red".into()), Value::Real(10.0)]]);

        let hues = run_query(&path, find_canned("hue-coverage")?.sql, AccessMode::ReadOnly)?;
        assert_eq!(hues.rows, vec![vec![Value::Text("Red".into()), Value::Real(10.0)]]);
        Ok(())
    }

    #[test]
    fn test_read_only_mode_rejects_writes() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("artifacts.db");
        seed(&path);

        let err = run_query(&path, "DELETE FROM artifact_metadata", AccessMode::ReadOnly);
        assert!(err.is_err());

        let deleted = run_query(&path, "DELETE FROM artifact_metadata WHERE id = 3", AccessMode::ReadWrite)?;
        assert!(deleted.columns.is_empty());
        assert_eq!(deleted.affected, 1);

        let count = run_query(&path, "SELECT COUNT(*) FROM artifact_metadata", AccessMode::ReadOnly)?;
        assert_eq!(count.rows[0][0], Value::Integer(2));
        Ok(())
    }

    #[test]
    fn test_missing_database_in_read_only_mode() {
        let dir = tempdir().unwrap();
        let err = run_query(&dir.path().join("absent.db"), "SELECT 1", AccessMode::ReadOnly).unwrap_err();
        assert!(matches!(err, QueryError::Open { .. }));
    }

    #[test]
    fn test_unknown_canned_query() {
        assert!(matches!(find_canned("nope"), Err(QueryError::UnknownQuery(_))));
    }
}
