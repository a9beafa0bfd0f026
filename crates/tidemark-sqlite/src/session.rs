use std::panic::AssertUnwindSafe;

use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tidemark_driver::{
    AtomicFailure, AtomicStage, Capabilities, Context, ErrorClass, LockSupport, SqlSession,
    TransactionSupport, VendorDetail,
};

use crate::dialect::SqliteDialect;

/// Virtual machine instructions between two cancellation checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// The dedicated SQLite connection of one driver.
pub struct SqliteSession {
    conn: Connection,
    dialect: SqliteDialect,
    in_memory: bool,
}

impl SqliteSession {
    pub fn new(conn: Connection) -> Self {
        let in_memory = conn.path().is_none_or(str::is_empty);
        Self {
            conn,
            dialect: SqliteDialect,
            in_memory,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }
}

impl SqlSession for SqliteSession {
    type Error = rusqlite::Error;
    type Dialect = SqliteDialect;

    fn dialect(&self) -> &SqliteDialect {
        &self.dialect
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            transactions: TransactionSupport::Always,
            drop_if_exists: true,
            // An in-memory database is private to its connection.
            lock: if self.in_memory {
                LockSupport::Instance
            } else {
                LockSupport::Process
            },
        }
    }

    fn ping(&mut self) -> rusqlite::Result<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn query_string(&mut self, sql: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(sql, [], |row| row.get::<_, String>(0))
            .optional()
    }

    fn query_strings(&mut self, sql: &str) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect()
    }

    fn query_version(&mut self, sql: &str) -> rusqlite::Result<Option<(i64, bool)>> {
        self.conn
            .query_row(sql, [], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()
    }

    fn execute(&mut self, sql: &str) -> rusqlite::Result<()> {
        self.conn.execute_batch(sql)
    }

    fn execute_atomic(
        &mut self,
        statements: &[String],
    ) -> Result<(), AtomicFailure<rusqlite::Error>> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| AtomicFailure::new(AtomicStage::Begin, e))?;

        for (index, sql) in statements.iter().enumerate() {
            if let Err(e) = tx.execute_batch(sql) {
                // The rollback on drop must not be interrupted as well.
                tx.progress_handler(0, None::<fn() -> bool>);
                return Err(AtomicFailure::new(AtomicStage::Statement(index), e));
            }
        }

        tx.commit()
            .map_err(|e| AtomicFailure::new(AtomicStage::Commit, e))
    }

    fn without_foreign_keys<T>(&mut self, op: impl FnOnce(&mut Self) -> T) -> rusqlite::Result<T> {
        let enforced: bool = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if !enforced {
            return Ok(op(self));
        }

        self.conn.execute_batch("PRAGMA foreign_keys = OFF")?;
        let result = op(self);
        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(result)
    }

    fn arm(&mut self, ctx: &Context) -> rusqlite::Result<()> {
        let guard = AssertUnwindSafe(ctx.clone());
        self.conn.progress_handler(
            PROGRESS_INTERVAL,
            Some(move || {
                let ctx = &guard;
                ctx.0.is_done()
            }),
        );
        Ok(())
    }

    fn disarm(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }

    fn classify(&self, err: &rusqlite::Error) -> ErrorClass {
        match err {
            rusqlite::Error::SqliteFailure(native, message) => {
                let message = message.clone().unwrap_or_else(|| native.to_string());
                ErrorClass {
                    missing_object: message.starts_with("no such table"),
                    interrupted: native.code == ErrorCode::OperationInterrupted,
                    vendor: Some(VendorDetail::new(native.extended_code.to_string(), message)),
                }
            }
            _ => ErrorClass::default(),
        }
    }

    fn close(self) -> rusqlite::Result<()> {
        self.conn.close().map_err(|(_, e)| e)
    }
}
