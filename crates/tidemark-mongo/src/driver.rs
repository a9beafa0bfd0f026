use std::io::Read;

use mongodb::bson::{Document, doc};
use mongodb::options::{FindOneOptions, TransactionOptions};
use mongodb::sync::{Client, ClientSession, Collection, Database};
use tidemark_common::{Error, Result};
use tidemark_config::Config;
use tidemark_driver::{
    Capabilities, Context, Driver, LockState, LockSupport, NIL_VERSION, TransactionSupport,
    advisory_lock_id, migration_error, read_payload,
};
use tracing::{debug, info, warn};

use crate::command::{
    CommandFailure, NAMESPACE_EXISTS, NAMESPACE_NOT_FOUND, command_failure, parse_commands,
    server_code, with_max_time,
};

/// Server-owned namespaces such as `system.views`; never dropped.
const SYSTEM_PREFIX: &str = "system.";

/// Migration driver for one MongoDB database.
///
/// A payload is a JSON array of commands run against the configured database.
/// With `transaction_mode` every command of a payload, and every version
/// write, runs in one multi-document transaction (replica sets only).
pub struct MongoDriver {
    client: Client,
    db: Database,
    config: Config,
    lock: LockState,
    context: Context,
}

impl MongoDriver {
    /// Bind to a client the caller already built.
    ///
    /// MongoDB has no notion of a current database, so the config must name one.
    pub fn with_instance(client: Client, config: Config) -> Result<Self> {
        if config.database_name.is_empty() {
            return Err(Error::NoDatabaseName);
        }
        let config = config.with_defaults();
        let db = client.database(&config.database_name);

        db.run_command(doc! { "ping": 1 }, None)
            .map_err(|e| Error::connection("ping failed", e))?;

        let lock = LockState::new(
            advisory_lock_id(&config.database_name, &[&config.migrations_table]),
            LockSupport::Process,
        );
        let mut driver = Self {
            client,
            db,
            config,
            lock,
            context: Context::default(),
        };
        driver.ensure_version_collection()?;

        info!(
            database = %driver.config.database_name,
            collection = %driver.config.migrations_table,
            transaction_mode = driver.config.transaction_mode,
            "migration driver ready"
        );
        Ok(driver)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn versions(&self) -> Collection<Document> {
        self.db.collection(&self.config.migrations_table)
    }

    /// Collections cannot be created inside a transaction, so the version
    /// collection is created up front, under the lock.
    fn ensure_version_collection(&mut self) -> Result<()> {
        self.lock()?;

        let created = self
            .db
            .run_command(doc! { "create": self.config.migrations_table.as_str() }, None)
            .map(|_| ())
            .or_else(|e| match server_code(&e) {
                Some(NAMESPACE_EXISTS) => Ok(()),
                _ => Err(Error::query(
                    format!("create {}", self.config.migrations_table),
                    e,
                )),
            });

        let unlocked = self.unlock();
        Error::aggregate(created.err().into_iter().chain(unlocked.err()).collect())
    }

    /// Start a session with an open transaction. The deadline bounds the commit.
    fn begin(&self) -> mongodb::error::Result<ClientSession> {
        let mut session = self.client.start_session(None)?;
        let mut options = TransactionOptions::default();
        options.max_commit_time = self.context.remaining();
        session.start_transaction(options)?;
        Ok(session)
    }

    fn abort(session: &mut ClientSession) {
        if let Err(e) = session.abort_transaction() {
            warn!(error = %e, "failed to abort transaction");
        }
    }

    /// Run one command under the deadline, inside `session` when given.
    fn send(
        &self,
        command: Document,
        session: Option<&mut ClientSession>,
    ) -> Option<CommandFailure> {
        let command = with_max_time(command, self.context.remaining());
        command_failure(match session {
            Some(session) => self.db.run_command_with_session(command, None, session),
            None => self.db.run_command(command, None),
        })
    }

    fn run_error(&self, failure: CommandFailure, payload: Vec<u8>) -> Error {
        if failure.timed_out() {
            return self.context.interruption();
        }
        migration_error(failure.detail, payload, failure.source)
    }

    fn query_error(&self, query: impl Into<String>, failure: CommandFailure) -> Error {
        if failure.timed_out() {
            return self.context.interruption();
        }
        Error::query(query, failure.source)
    }

    fn run_in_transaction(&mut self, commands: Vec<Document>, payload: Vec<u8>) -> Result<()> {
        let mut session = match self.begin() {
            Ok(session) => session,
            Err(e) => return Err(self.run_error(e.into(), payload)),
        };

        for command in commands {
            if let Err(e) = self.context.check() {
                Self::abort(&mut session);
                return Err(e);
            }
            if let Some(failure) = self.send(command, Some(&mut session)) {
                Self::abort(&mut session);
                return Err(self.run_error(failure, payload));
            }
        }

        session
            .commit_transaction()
            .map_err(|e| self.run_error(e.into(), payload))
    }

    /// Attempt every command; report the first failure and log the rest.
    fn run_each(&mut self, commands: Vec<Document>, payload: Vec<u8>) -> Result<()> {
        let mut first = None;

        for (index, command) in commands.into_iter().enumerate() {
            if let Err(e) = self.context.check() {
                return Err(match first {
                    Some(failure) => self.run_error(failure, payload),
                    None => e,
                });
            }
            if let Some(failure) = self.send(command, None) {
                if failure.timed_out() {
                    return Err(match first {
                        Some(failure) => self.run_error(failure, payload),
                        None => self.context.interruption(),
                    });
                }
                if first.is_none() {
                    first = Some(failure);
                } else {
                    warn!(
                        command = index,
                        error = %failure.source,
                        "later migration command failed"
                    );
                }
            }
        }

        match first {
            Some(failure) => Err(self.run_error(failure, payload)),
            None => Ok(()),
        }
    }

    /// Commands replacing the version record; a negative version only clears it.
    fn version_commands(&self, version: i64, dirty: bool) -> Vec<Document> {
        let table = self.config.migrations_table.as_str();
        let mut commands = vec![doc! { "delete": table, "deletes": [{ "q": {}, "limit": 0 }] }];
        if version >= 0 {
            commands.push(doc! {
                "insert": table,
                "documents": [{ "version": version, "dirty": dirty }],
            });
        }
        commands
    }

    fn write_version(&self, version: i64, dirty: bool) -> Result<()> {
        let commands = self.version_commands(version, dirty);

        if !self.config.transaction_mode {
            for command in commands {
                let name = command_name(&command);
                if let Some(failure) = self.send(command, None) {
                    return Err(self.query_error(name, failure));
                }
            }
            return Ok(());
        }

        let mut session = self.begin().map_err(|e| Error::Transaction {
            stage: "start",
            source: e.into(),
        })?;
        for command in commands {
            let name = command_name(&command);
            if let Some(failure) = self.send(command, Some(&mut session)) {
                Self::abort(&mut session);
                return Err(self.query_error(name, failure));
            }
        }
        session.commit_transaction().map_err(|e| {
            let failure = CommandFailure::from(e);
            if failure.timed_out() {
                self.context.interruption()
            } else {
                Error::Transaction {
                    stage: "commit",
                    source: failure.source,
                }
            }
        })
    }
}

fn is_user_collection(name: &str) -> bool {
    !name.starts_with(SYSTEM_PREFIX)
}

fn command_name(command: &Document) -> String {
    command.keys().next().cloned().unwrap_or_default()
}

fn read_version(record: &Document) -> Result<(i64, bool)> {
    let version = record
        .get_i64("version")
        .or_else(|_| record.get_i32("version").map(i64::from))
        .map_err(|e| Error::query("decode version", e))?;
    let dirty = record
        .get_bool("dirty")
        .map_err(|e| Error::query("decode dirty flag", e))?;
    Ok((version, dirty))
}

impl Driver for MongoDriver {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            transactions: TransactionSupport::OptIn,
            drop_if_exists: true,
            lock: LockSupport::Process,
        }
    }

    fn set_context(&mut self, ctx: Context) {
        self.context = ctx;
    }

    fn lock(&mut self) -> Result<()> {
        self.context.check()?;
        self.lock.acquire(|_| Ok(true))
    }

    fn unlock(&mut self) -> Result<()> {
        self.lock.release(|_| Ok(()))
    }

    fn run(&mut self, migration: &mut dyn Read) -> Result<()> {
        let payload = read_payload(migration)?;
        let commands = match parse_commands(&payload) {
            Ok(commands) => commands,
            Err(message) => {
                return Err(Error::Migration {
                    message,
                    payload,
                    source: None,
                });
            }
        };
        self.context.check()?;

        let count = commands.len();
        if self.config.transaction_mode {
            self.run_in_transaction(commands, payload)?;
        } else {
            self.run_each(commands, payload)?;
        }
        debug!(commands = count, "migration applied");
        Ok(())
    }

    fn set_version(&mut self, version: i64, dirty: bool) -> Result<()> {
        self.context.check()?;
        self.write_version(version, dirty)?;
        debug!(version, dirty, "version set");
        Ok(())
    }

    fn version(&mut self) -> Result<(i64, bool)> {
        self.context.check()?;
        let mut options = FindOneOptions::default();
        options.max_time = self.context.remaining();
        let record = self
            .versions()
            .find_one(doc! {}, options)
            .map_err(|e| self.query_error("find version", e.into()))?;
        match record {
            Some(record) => read_version(&record),
            None => Ok((NIL_VERSION, false)),
        }
    }

    fn drop_all(&mut self) -> Result<()> {
        self.context.check()?;
        let names = self
            .db
            .list_collection_names(None)
            .map_err(|e| self.query_error("list collections", e.into()))?;

        let mut dropped = 0;
        for name in names.iter().filter(|name| is_user_collection(name)) {
            self.context.check()?;
            match self.send(doc! { "drop": name.as_str() }, None) {
                None => dropped += 1,
                Some(failure) if failure.code == Some(NAMESPACE_NOT_FOUND) => {}
                Some(failure) => return Err(self.query_error(format!("drop {name}"), failure)),
            }
        }

        info!(dropped, database = %self.config.database_name, "dropped all collections");
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self {
            client,
            mut lock,
            config,
            ..
        } = *self;

        let released = lock.release(|_| Ok(()));
        drop(client);

        info!(database = %config.database_name, "migration driver closed");
        released
    }
}
