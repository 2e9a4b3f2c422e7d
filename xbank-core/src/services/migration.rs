//! Schema migrations over the embedded SQL files in `crate::migrations`

use std::collections::HashSet;

use duckdb::Connection;
use tracing::info;

use crate::domain::result::{Error, Result};
use crate::migrations::MIGRATIONS;

const TABLE_EXISTS: &str =
    "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'sys_migrations'";
const SELECT_APPLIED: &str = "SELECT migration_name FROM sys_migrations";
const RECORD_APPLIED: &str = "INSERT INTO sys_migrations (migration_name) VALUES (?)";

#[derive(Debug, Default)]
pub struct MigrationResult {
    /// Names applied by this run, in order
    pub applied: Vec<String>,
    pub already_applied: usize,
}

pub struct MigrationService<'a> {
    conn: &'a Connection,
}

impl<'a> MigrationService<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Apply every migration not yet recorded in `sys_migrations`.
    ///
    /// Files run in name order, so `000_*` creates the bookkeeping table
    /// before anything is recorded in it. Each file commits on its own.
    pub fn run_pending(&self) -> Result<MigrationResult> {
        let done = self.applied_names()?;
        let mut result = MigrationResult::default();

        let mut ordered: Vec<&(&str, &str)> = MIGRATIONS.iter().collect();
        ordered.sort_by_key(|(name, _)| *name);

        for (name, sql) in ordered {
            if done.contains(*name) {
                result.already_applied += 1;
                continue;
            }
            self.apply(name, sql)?;
            info!(migration = name, "migration applied");
            result.applied.push(name.to_string());
        }
        Ok(result)
    }

    /// Names recorded as applied; empty before the bootstrap migration ran
    pub fn applied_names(&self) -> Result<HashSet<String>> {
        let tables: i64 = self
            .conn
            .query_row(TABLE_EXISTS, [], |row| row.get(0))
            .map_err(Error::query)?;
        if tables == 0 {
            return Ok(HashSet::new());
        }

        let mut stmt = self.conn.prepare(SELECT_APPLIED).map_err(Error::query)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(Error::query)?
            .collect::<duckdb::Result<HashSet<String>>>()
            .map_err(Error::scan);
        names
    }

    fn apply(&self, name: &str, sql: &str) -> Result<()> {
        self.conn
            .execute_batch("BEGIN TRANSACTION")
            .map_err(Error::query)?;
        let outcome = self
            .conn
            .execute_batch(sql)
            .and_then(|_| self.conn.execute(RECORD_APPLIED, [name]));

        match outcome {
            Ok(_) => self.conn.execute_batch("COMMIT").map_err(Error::query),
            Err(e) => {
                // The batch error is the one worth reporting
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(Error::query(format!("migration {} failed: {}", name, e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            [table],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_database_gets_every_migration_once() {
        let conn = Connection::open_in_memory().unwrap();
        let migrations = MigrationService::new(&conn);

        let first = migrations.run_pending().unwrap();
        assert_eq!(first.applied.len(), MIGRATIONS.len());
        assert_eq!(first.already_applied, 0);

        let second = migrations.run_pending().unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.already_applied, MIGRATIONS.len());
    }

    #[test]
    fn test_partially_migrated_database_resumes() {
        let conn = Connection::open_in_memory().unwrap();
        let (bootstrap_name, bootstrap_sql) = MIGRATIONS[0];
        conn.execute_batch(bootstrap_sql).unwrap();
        conn.execute(RECORD_APPLIED, [bootstrap_name]).unwrap();

        let result = MigrationService::new(&conn).run_pending().unwrap();

        assert_eq!(result.already_applied, 1);
        assert_eq!(result.applied.len(), MIGRATIONS.len() - 1);
        assert!(!result.applied.iter().any(|n| n == bootstrap_name));
    }

    #[test]
    fn test_bank_tables_exist_after_migration() {
        let conn = Connection::open_in_memory().unwrap();
        MigrationService::new(&conn).run_pending().unwrap();

        for table in ["accounts", "accountOwners", "transactions", "atms", "cashOperations"] {
            assert_eq!(table_count(&conn, table), 1, "missing table {}", table);
        }
    }
}
