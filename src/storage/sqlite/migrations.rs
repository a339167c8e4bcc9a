//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`; each migration runs at
//! most once, in order, inside its own transaction.

use rusqlite::{params, Connection};

use crate::errors::{JobmonError, Result};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_job_table",
        sql: include_str!("sql/001_create_job.sql"),
    },
    Migration {
        version: 2,
        description: "create_tag_tables",
        sql: include_str!("sql/002_create_tag.sql"),
    },
];

/// Latest schema version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = current_version(conn)?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }

        tracing::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| migration_error(migration.version, e))?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )
        .map_err(|e| migration_error(migration.version, e))?;
        tx.commit()?;
    }

    Ok(())
}

fn migration_error(version: u32, err: rusqlite::Error) -> JobmonError {
    JobmonError::Storage(format!("migration v{} failed: {}", version, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_all_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        for table in ["job", "tag", "jobtag"] {
            let count: u32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "table {} should exist", table);
        }
        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn test_run_all_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let applied: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as u32);
    }
}
