//! Connections: the public entry point of the engine.
//!
//! A [`Connection`] is one sequential actor on a database file. It owns its
//! page store handle, its page cache and its state; several connections on
//! the same file (in one process) coordinate only through the file's lock
//! table and the change counter in the header page.
//!
//! ```no_run
//! use coherdb::{Connection, ConnectionConfig, Value};
//!
//! # fn main() -> coherdb::Result<()> {
//! let mut conn = Connection::open(ConnectionConfig::new("Simple.db"))?;
//! conn.execute("CREATE TABLE [MainTable] ([id] int NOT NULL)")?;
//! conn.execute_with("INSERT INTO MainTable (id) VALUES (@id)", &[("@id", Value::Integer(1))])?;
//! let rows = conn.query("SELECT id FROM [MainTable]")?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::catalog::Catalog;
use crate::concurrency::LockLevel;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::executor::{self, Params, RowSet};
use crate::sql::{parse_sql, Statement};
use crate::storage::page::{CATALOG_PAGE_ID, HEADER_PAGE_ID};
use crate::storage::{CacheStats, PageCache, PageStore};
use crate::transaction::{ConnectionState, Transaction};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Rows(RowSet),
    RowsAffected(u64),
}

impl StatementResult {
    pub fn rows(self) -> Option<RowSet> {
        match self {
            StatementResult::Rows(rows) => Some(rows),
            StatementResult::RowsAffected(_) => None,
        }
    }

    pub fn rows_affected(&self) -> u64 {
        match self {
            StatementResult::Rows(_) => 0,
            StatementResult::RowsAffected(n) => *n,
        }
    }
}

pub struct Connection {
    config: ConnectionConfig,
    store: PageStore,
    cache: PageCache,
    state: ConnectionState,
    last_change_counter: Option<u64>,
}

impl Connection {
    /// Opens (and, for a new file, initializes) the database.
    pub fn open(config: ConnectionConfig) -> Result<Self> {
        let store = PageStore::open(&config)?;
        let cache = PageCache::new(config.cache_size);
        let mut conn = Self {
            config,
            store,
            cache,
            state: ConnectionState::Idle,
            last_change_counter: None,
        };
        conn.initialize()?;

        // Validates the header (and the key) before handing the connection out.
        let tx = conn.begin_read()?;
        let counter = tx.commit()?;
        conn.last_change_counter = Some(counter);

        log::debug!(
            "{} opened {:?} at change counter {}",
            conn.store.holder(),
            conn.config,
            counter
        );
        Ok(conn)
    }

    /// Opens a database described by a connection string such as
    /// `data source=Simple.db;password=...`.
    pub fn open_str(connection_string: &str) -> Result<Self> {
        Self::open(connection_string.parse()?)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Change counter seen by the most recent transaction of this connection.
    pub fn last_change_counter(&self) -> Option<u64> {
        self.last_change_counter
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Runs a `;`-separated batch; each statement commits on its own. Returns
    /// the result of the last statement.
    pub fn execute(&mut self, sql: &str) -> Result<StatementResult> {
        self.execute_with(sql, &[])
    }

    pub fn execute_with(&mut self, sql: &str, params: &Params<'_>) -> Result<StatementResult> {
        let statements = parse_sql(sql)?;
        let mut result = StatementResult::RowsAffected(0);
        for statement in &statements {
            result = self.run(statement, params)?;
        }
        Ok(result)
    }

    /// Runs a batch whose last statement is a `SELECT`.
    pub fn query(&mut self, sql: &str) -> Result<RowSet> {
        self.query_with(sql, &[])
    }

    pub fn query_with(&mut self, sql: &str, params: &Params<'_>) -> Result<RowSet> {
        self.execute_with(sql, params)?
            .rows()
            .ok_or_else(|| Error::Misuse("statement does not return rows".into()))
    }

    /// Closes the connection, surfacing any failure to release its locks.
    pub fn close(mut self) -> Result<()> {
        self.store.release_lock()
    }

    fn run(&mut self, statement: &Statement, params: &Params<'_>) -> Result<StatementResult> {
        let result = match statement {
            Statement::Select(select) => {
                let mut tx = self.begin_read()?;
                let rows = executor::select(&mut tx, select)?;
                self.last_change_counter = Some(tx.commit()?);
                StatementResult::Rows(rows)
            }
            Statement::Insert(insert) => {
                let mut tx = self.begin_write()?;
                let inserted = executor::insert(&mut tx, insert, params)?;
                self.last_change_counter = Some(tx.commit()?);
                StatementResult::RowsAffected(inserted)
            }
            Statement::CreateTable(create) => {
                let mut tx = self.begin_write()?;
                executor::create_table(&mut tx, create)?;
                self.last_change_counter = Some(tx.commit()?);
                StatementResult::RowsAffected(0)
            }
        };
        debug_assert!(self.state.is_idle());
        Ok(result)
    }

    fn begin_read(&mut self) -> Result<Transaction<'_>> {
        Transaction::begin_read(&mut self.store, &mut self.cache, &mut self.state)
    }

    fn begin_write(&mut self) -> Result<Transaction<'_>> {
        Transaction::begin_write(&mut self.store, &mut self.cache, &mut self.state)
    }

    /// Writes the header and the empty catalog into a new file. A connection
    /// that finds the file initialized once it holds the write lock does
    /// nothing; one that finds another connection initializing waits for it.
    fn initialize(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.busy_timeout;
        loop {
            if !self.store.is_empty()? {
                return Ok(());
            }
            self.store.acquire_lock(LockLevel::Shared)?;
            let initialized = self.initialize_locked();
            let released = self.store.release_lock();
            match initialized.and(released) {
                Err(e) if e.is_busy() && Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(1));
                }
                other => return other,
            }
        }
    }

    fn initialize_locked(&mut self) -> Result<()> {
        // Never wait for the write lock while holding Shared: the holder
        // would need this connection's Shared lock gone to commit.
        self.store.begin_write_within(Duration::ZERO)?;
        if !self.store.is_empty()? {
            return self.store.rollback();
        }
        let header = self.store.allocate_page()?;
        let catalog = self.store.allocate_page()?;
        debug_assert_eq!((header, catalog), (HEADER_PAGE_ID, CATALOG_PAGE_ID));
        Catalog::initialize(&mut self.store)?;
        let counter = self.store.commit()?;
        log::info!("initialized {} (change counter {})", self.path().display(), counter);
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("holder", &self.store.holder())
            .field("path", &self.config.path)
            .field("state", &self.state)
            .field("last_change_counter", &self.last_change_counter)
            .finish()
    }
}
