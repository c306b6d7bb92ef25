//! Pooled SQLite connections
//!
//! The catalogue never keeps a connection beyond one operation. A
//! [`PooledConn`] goes back to its [`ConnPool`] when dropped, unless a
//! statement run through it failed because the database became unreachable,
//! in which case the connection is thrown away and the next caller opens a
//! fresh one.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{format_err, Error};
use rusqlite::{Connection, ErrorCode, OpenFlags};

use crate::catalogue::CatalogueError;

/// How long a statement waits for a database lock held by another process
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Map a SQLite error to the catalogue error taxonomy.
///
/// Errors which mean the database file cannot be reached any more become
/// [`CatalogueError::ConnectionLost`], everything else is passed on unchanged.
pub fn classify_error(err: rusqlite::Error) -> Error {
    if is_connectivity_error(&err) {
        return CatalogueError::ConnectionLost(err.to_string()).into();
    }
    err.into()
}

fn is_connectivity_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => matches!(
            code.code,
            ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
        ),
        _ => false,
    }
}

/// A bounded pool of connections to one database file
pub struct ConnPool {
    path: PathBuf,
    size: usize,
    idle: Mutex<Vec<Connection>>,
}

impl ConnPool {
    /// Create a pool keeping at most `size` idle connections.
    ///
    /// No connection is opened until one is requested.
    pub fn new<P: AsRef<Path>>(path: P, size: usize) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            size: size.max(1),
            idle: Mutex::new(Vec::new()),
        }
    }

    fn open(&self) -> Result<Connection, Error> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags).map_err(|err| {
            CatalogueError::ConnectionLost(format!(
                "unable to open catalogue {:?} - {}",
                self.path, err
            ))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(classify_error)?;
        Ok(conn)
    }

    /// Take an idle connection, or open a new one.
    pub fn get_conn(&self) -> Result<PooledConn<'_>, Error> {
        let conn = match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(_) => None,
        };
        let conn = match conn {
            Some(conn) => conn,
            None => self.open()?,
        };
        Ok(PooledConn {
            pool: self,
            conn: Some(conn),
            broken: false,
        })
    }

    /// Number of connections waiting in the pool.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn put_back(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.size {
                idle.push(conn);
            }
        }
    }
}

/// A connection borrowed from a [`ConnPool`]
pub struct PooledConn<'a> {
    pool: &'a ConnPool,
    conn: Option<Connection>,
    broken: bool,
}

impl<'a> PooledConn<'a> {
    /// Run statements on the connection.
    ///
    /// SQLite errors are classified with [`classify_error`]; a connectivity
    /// failure marks the connection as broken so it is not reused.
    pub fn run<T, F>(&mut self, func: F) -> Result<T, Error>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| format_err!("pooled connection already released"))?;
        match func(conn) {
            Ok(value) => Ok(value),
            Err(err) => {
                if is_connectivity_error(&err) {
                    self.broken = true;
                }
                Err(classify_error(err))
            }
        }
    }

    /// Run statements inside one transaction, committed when `func` succeeds.
    pub fn transaction<T, F>(&mut self, func: F) -> Result<T, Error>
    where
        F: FnOnce(&rusqlite::Transaction) -> rusqlite::Result<T>,
    {
        self.run(|conn| {
            let tx = conn.unchecked_transaction()?;
            let value = func(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

impl<'a> Drop for PooledConn<'a> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.broken {
                log::warn!(
                    "dropping catalogue connection to {:?} after connectivity failure",
                    self.pool.path
                );
            } else {
                self.pool.put_back(conn);
            }
        }
    }
}
