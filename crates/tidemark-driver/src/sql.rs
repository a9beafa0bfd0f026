//! Driver state machine shared by every relational backend.
//!
//! A backend supplies a [`SqlSession`] wrapping its dedicated connection and a
//! [`Dialect`] producing the SQL text; [`SqlDriver`] composes them with the
//! version store protocol, the advisory lock and the operation context.

use std::io::Read;

use tidemark_common::{Error, Result};
use tidemark_config::Config;
use tracing::{debug, info, warn};

use crate::capability::Capabilities;
use crate::context::Context;
use crate::driver::{Driver, NIL_VERSION, read_payload};
use crate::lock::{LockState, advisory_lock_id};
use crate::vendor::{VendorDetail, migration_error};

/// SQL text for one relational backend.
pub trait Dialect {
    /// Query returning the name of the connected database.
    fn database_name_query(&self) -> &'static str;

    /// Query returning the schema statements resolve against.
    fn schema_name_query(&self) -> &'static str;

    /// Idempotent creation of the control table.
    fn create_version_table(&self, config: &Config) -> String;

    fn select_version(&self, config: &Config) -> String;

    fn clear_versions(&self, config: &Config) -> String;

    fn insert_version(&self, config: &Config, version: i64, dirty: bool) -> String;

    /// Query listing every table owned by the configured schema.
    fn list_tables(&self, config: &Config) -> String;

    fn drop_table(&self, config: &Config, table: &str) -> String;

    /// Server-side routine installed before dropping tables when the backend
    /// has no `DROP TABLE IF EXISTS`. `drop_table` then calls it.
    fn drop_helper(&self) -> Option<String> {
        None
    }
}

/// Which step of an atomic execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicStage {
    Begin,
    Statement(usize),
    Commit,
}

/// Native failure of [`SqlSession::execute_atomic`].
#[derive(Debug)]
pub struct AtomicFailure<E> {
    pub stage: AtomicStage,
    pub error: E,
}

impl<E> AtomicFailure<E> {
    pub fn new(stage: AtomicStage, error: E) -> Self {
        Self { stage, error }
    }
}

/// What the driver needs to know about a native error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorClass {
    /// Vendor code and message, when the error carries them.
    pub vendor: Option<VendorDetail>,
    /// The referenced table does not exist.
    pub missing_object: bool,
    /// The backend aborted the statement because the context was done.
    pub interrupted: bool,
}

/// I/O on the dedicated connection of one relational driver.
pub trait SqlSession: Send {
    type Error: std::error::Error + Send + Sync + 'static;
    type Dialect: Dialect;

    fn dialect(&self) -> &Self::Dialect;

    fn capabilities(&self) -> Capabilities;

    fn ping(&mut self) -> std::result::Result<(), Self::Error>;

    /// First column of the first row, if any.
    fn query_string(&mut self, sql: &str) -> std::result::Result<Option<String>, Self::Error>;

    /// First column of every row.
    fn query_strings(&mut self, sql: &str) -> std::result::Result<Vec<String>, Self::Error>;

    /// `(version, dirty)` from the first row, if any.
    fn query_version(&mut self, sql: &str) -> std::result::Result<Option<(i64, bool)>, Self::Error>;

    /// Run one or more statements outside an explicit transaction.
    fn execute(&mut self, sql: &str) -> std::result::Result<(), Self::Error>;

    /// Run statements in order inside one transaction; nothing is kept on failure.
    fn execute_atomic(
        &mut self,
        statements: &[String],
    ) -> std::result::Result<(), AtomicFailure<Self::Error>>;

    /// Try to take a server-side advisory lock without blocking.
    fn try_advisory_lock(&mut self, _id: i64) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }

    fn advisory_unlock(&mut self, _id: i64) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    /// Run `op` with foreign key enforcement suspended, so tables can be
    /// dropped in any order. Backends that drop with `CASCADE` keep the default.
    fn without_foreign_keys<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> T,
    ) -> std::result::Result<T, Self::Error> {
        Ok(op(self))
    }

    /// Propagate the context to the backend before an operation.
    fn arm(&mut self, ctx: &Context) -> std::result::Result<(), Self::Error>;

    /// Undo [`arm`](SqlSession::arm) after the operation.
    fn disarm(&mut self);

    fn classify(&self, err: &Self::Error) -> ErrorClass;

    fn close(self) -> std::result::Result<(), Self::Error>;
}

/// The uniform driver over any [`SqlSession`].
pub struct SqlDriver<S: SqlSession> {
    session: S,
    config: Config,
    lock: LockState,
    context: Context,
}

impl<S: SqlSession> SqlDriver<S> {
    /// Bind a session: resolve the identity, apply defaults and make sure the
    /// control table exists (under the lock).
    pub fn with_session(mut session: S, mut config: Config) -> Result<Self> {
        session
            .ping()
            .map_err(|e| Error::connection("ping failed", e))?;

        let query = session.dialect().database_name_query();
        let database = session
            .query_string(query)
            .map_err(|e| Error::query(query, e))?
            .unwrap_or_default();
        if database.is_empty() {
            return Err(Error::NoDatabaseName);
        }
        config.database_name = database;

        let query = session.dialect().schema_name_query();
        let schema = session
            .query_string(query)
            .map_err(|e| Error::query(query, e))?
            .unwrap_or_default();
        if schema.is_empty() {
            return Err(Error::NoSchema);
        }
        config.schema_name = schema;

        let config = config.with_defaults();
        let lock = LockState::new(
            advisory_lock_id(&config.database_name, &[&config.schema_name]),
            session.capabilities().lock,
        );

        let mut driver = Self {
            session,
            config,
            lock,
            context: Context::default(),
        };
        driver.ensure_version_table()?;

        info!(
            database = %driver.config.database_name,
            schema = %driver.config.schema_name,
            table = %driver.config.migrations_table,
            "migration driver ready"
        );
        Ok(driver)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Create the control table if missing.
    ///
    /// Takes the lock itself, unlike the other operations, which expect the
    /// caller to hold it.
    fn ensure_version_table(&mut self) -> Result<()> {
        self.lock()?;

        let query = self.session.dialect().create_version_table(&self.config);
        let created = self.armed(|driver| {
            driver
                .session
                .execute(&query)
                .map_err(|e| driver.native_error(&query, e))
        });

        let unlocked = self.unlock();
        Error::aggregate(created.err().into_iter().chain(unlocked.err()).collect())
    }

    /// Run `op` with the context propagated to the backend.
    fn armed<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.context.check()?;
        self.session
            .arm(&self.context)
            .map_err(|e| Error::connection("failed to apply operation context", e))?;
        let result = op(self);
        self.session.disarm();
        result
    }

    fn native_error(&self, query: &str, err: S::Error) -> Error {
        native_error(&self.session, &self.context, query, err)
    }

    fn atomic_error(
        &self,
        failure: AtomicFailure<S::Error>,
        statements: &[String],
        payload: Option<Vec<u8>>,
    ) -> Error {
        let class = self.session.classify(&failure.error);
        if class.interrupted {
            return self.context.interruption();
        }

        // A migration failure keeps its payload whichever step failed.
        if let Some(payload) = payload {
            return migration_error(class.vendor, payload, failure.error);
        }
        match failure.stage {
            AtomicStage::Begin => Error::Transaction {
                stage: "start",
                source: failure.error.into(),
            },
            AtomicStage::Commit => Error::Transaction {
                stage: "commit",
                source: failure.error.into(),
            },
            AtomicStage::Statement(index) => Error::query(
                statements.get(index).cloned().unwrap_or_default(),
                failure.error,
            ),
        }
    }
}

fn native_error<S: SqlSession>(
    session: &S,
    context: &Context,
    query: &str,
    err: S::Error,
) -> Error {
    if session.classify(&err).interrupted {
        return context.interruption();
    }
    Error::query(query, err)
}

impl<S: SqlSession> Driver for SqlDriver<S> {
    fn capabilities(&self) -> Capabilities {
        self.session.capabilities()
    }

    fn set_context(&mut self, ctx: Context) {
        self.context = ctx;
    }

    fn lock(&mut self) -> Result<()> {
        if self.lock.is_held() {
            return Err(Error::Locked);
        }

        self.armed(|driver| {
            let Self {
                session,
                lock,
                context,
                ..
            } = driver;
            lock.acquire(|id| {
                session.try_advisory_lock(id).map_err(|e| {
                    if session.classify(&e).interrupted {
                        context.interruption()
                    } else {
                        Error::query("try advisory lock", e)
                    }
                })
            })
        })
    }

    fn unlock(&mut self) -> Result<()> {
        if !self.lock.is_held() {
            return Ok(());
        }

        let Self { session, lock, .. } = self;
        lock.release(|id| {
            session
                .advisory_unlock(id)
                .map_err(|e| Error::query("advisory unlock", e))
        })
    }

    fn run(&mut self, migration: &mut dyn Read) -> Result<()> {
        let payload = read_payload(migration)?;
        let sql = match std::str::from_utf8(&payload) {
            Ok(sql) => sql.to_string(),
            Err(e) => {
                return Err(Error::Migration {
                    message: format!("migration is not valid UTF-8: {e}"),
                    payload,
                    source: None,
                });
            }
        };

        let atomic = self
            .capabilities()
            .transactions
            .wraps(self.config.transaction_mode);

        self.armed(|driver| {
            let statements = [sql];
            let result = if atomic {
                driver.session.execute_atomic(&statements)
            } else {
                driver
                    .session
                    .execute(&statements[0])
                    .map_err(|e| AtomicFailure::new(AtomicStage::Statement(0), e))
            };
            result.map_err(|failure| driver.atomic_error(failure, &statements, Some(payload)))
        })?;

        debug!(atomic, "migration applied");
        Ok(())
    }

    fn set_version(&mut self, version: i64, dirty: bool) -> Result<()> {
        let dialect = self.session.dialect();
        let mut statements = vec![dialect.clear_versions(&self.config)];
        if version >= 0 {
            statements.push(dialect.insert_version(&self.config, version, dirty));
        }

        self.armed(|driver| {
            driver
                .session
                .execute_atomic(&statements)
                .map_err(|failure| driver.atomic_error(failure, &statements, None))
        })?;

        debug!(version, dirty, "version set");
        Ok(())
    }

    fn version(&mut self) -> Result<(i64, bool)> {
        let query = self.session.dialect().select_version(&self.config);

        self.armed(|driver| match driver.session.query_version(&query) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Ok((NIL_VERSION, false)),
            Err(e) => {
                let class = driver.session.classify(&e);
                if class.missing_object {
                    warn!(
                        table = %driver.config.migrations_table,
                        "control table missing, reporting no version"
                    );
                    Ok((NIL_VERSION, false))
                } else {
                    Err(driver.native_error(&query, e))
                }
            }
        })
    }

    fn drop_all(&mut self) -> Result<()> {
        let capabilities = self.capabilities();
        let list = self.session.dialect().list_tables(&self.config);

        let dropped = self.armed(|driver| {
            let tables = driver
                .session
                .query_strings(&list)
                .map_err(|e| driver.native_error(&list, e))?;

            if !capabilities.drop_if_exists {
                if let Some(helper) = driver.session.dialect().drop_helper() {
                    driver
                        .session
                        .execute(&helper)
                        .map_err(|e| driver.native_error(&helper, e))?;
                }
            }

            let Self {
                session,
                config,
                context,
                ..
            } = driver;
            let (config, context): (&Config, &Context) = (config, context);
            let dropped = session.without_foreign_keys(|session| {
                let mut dropped = 0;
                for table in tables.iter().filter(|t| !t.is_empty()) {
                    context.check()?;
                    let query = session.dialect().drop_table(config, table);
                    session
                        .execute(&query)
                        .map_err(|e| native_error(&*session, context, &query, e))?;
                    dropped += 1;
                }
                Ok::<_, Error>(dropped)
            });
            match dropped {
                Ok(dropped) => dropped,
                Err(e) => Err(native_error(&*session, context, "toggle foreign keys", e)),
            }
        })?;

        info!(dropped, database = %self.config.database_name, "dropped all tables");
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self {
            mut session,
            mut lock,
            config,
            ..
        } = *self;

        let mut errors = Vec::new();
        if let Err(e) = lock.release(|id| {
            session
                .advisory_unlock(id)
                .map_err(|e| Error::query("advisory unlock", e))
        }) {
            errors.push(e);
        }
        if let Err(e) = session.close() {
            errors.push(Error::connection("failed to close connection", e));
        }

        info!(database = %config.database_name, "migration driver closed");
        Error::aggregate(errors)
    }
}
