use std::time::Duration;

use postgres::error::SqlState;
use postgres::{CancelToken, Client};
use tidemark_driver::{
    AtomicFailure, AtomicStage, Capabilities, Context, ErrorClass, LockSupport, SqlSession,
    TransactionSupport, VendorDetail,
};
use tracing::warn;

use crate::dialect::PostgresDialect;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// The dedicated PostgreSQL session of one driver.
///
/// Advisory locks are session scoped, so the lock lives and dies with this
/// client.
pub struct PostgresSession {
    client: Client,
    dialect: PostgresDialect,
    timeout_armed: bool,
}

impl PostgresSession {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            dialect: PostgresDialect,
            timeout_armed: false,
        }
    }

    /// Token for cancelling the running statement from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.client.cancel_token()
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl SqlSession for PostgresSession {
    type Error = postgres::Error;
    type Dialect = PostgresDialect;

    fn dialect(&self) -> &PostgresDialect {
        &self.dialect
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            transactions: TransactionSupport::Always,
            drop_if_exists: true,
            lock: LockSupport::Native,
        }
    }

    fn ping(&mut self) -> Result<(), postgres::Error> {
        self.client.is_valid(PING_TIMEOUT)
    }

    fn query_string(&mut self, sql: &str) -> Result<Option<String>, postgres::Error> {
        match self.client.query_opt(sql, &[])? {
            Some(row) => row.try_get::<_, Option<String>>(0),
            None => Ok(None),
        }
    }

    fn query_strings(&mut self, sql: &str) -> Result<Vec<String>, postgres::Error> {
        self.client
            .query(sql, &[])?
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect()
    }

    fn query_version(&mut self, sql: &str) -> Result<Option<(i64, bool)>, postgres::Error> {
        match self.client.query_opt(sql, &[])? {
            Some(row) => Ok(Some((row.try_get(0)?, row.try_get(1)?))),
            None => Ok(None),
        }
    }

    fn execute(&mut self, sql: &str) -> Result<(), postgres::Error> {
        self.client.batch_execute(sql)
    }

    fn execute_atomic(
        &mut self,
        statements: &[String],
    ) -> Result<(), AtomicFailure<postgres::Error>> {
        let mut tx = self
            .client
            .transaction()
            .map_err(|e| AtomicFailure::new(AtomicStage::Begin, e))?;

        for (index, sql) in statements.iter().enumerate() {
            tx.batch_execute(sql)
                .map_err(|e| AtomicFailure::new(AtomicStage::Statement(index), e))?;
        }

        tx.commit()
            .map_err(|e| AtomicFailure::new(AtomicStage::Commit, e))
    }

    fn try_advisory_lock(&mut self, id: i64) -> Result<bool, postgres::Error> {
        self.client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&id])?
            .try_get(0)
    }

    fn advisory_unlock(&mut self, id: i64) -> Result<(), postgres::Error> {
        let released: bool = self
            .client
            .query_one("SELECT pg_advisory_unlock($1)", &[&id])?
            .try_get(0)?;
        if !released {
            warn!(lock_id = id, "advisory lock was not held by this session");
        }
        Ok(())
    }

    fn arm(&mut self, ctx: &Context) -> Result<(), postgres::Error> {
        let Some(remaining) = ctx.remaining() else {
            return Ok(());
        };
        let millis = remaining.as_millis().max(1);
        self.client
            .batch_execute(&format!("SET statement_timeout = {millis}"))?;
        self.timeout_armed = true;
        Ok(())
    }

    fn disarm(&mut self) {
        if !self.timeout_armed {
            return;
        }
        self.timeout_armed = false;
        if let Err(e) = self.client.batch_execute("RESET statement_timeout") {
            warn!(error = %e, "failed to reset statement timeout");
        }
    }

    fn classify(&self, err: &postgres::Error) -> ErrorClass {
        let Some(db) = err.as_db_error() else {
            return ErrorClass::default();
        };
        ErrorClass {
            vendor: Some(VendorDetail::new(db.code().code(), db.message())),
            missing_object: *db.code() == SqlState::UNDEFINED_TABLE,
            interrupted: *db.code() == SqlState::QUERY_CANCELED,
        }
    }

    fn close(self) -> Result<(), postgres::Error> {
        self.client.close()
    }
}
