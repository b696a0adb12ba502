use std::cell::Cell;

use rusqlite::Connection;
use rusqlite::blob::Blob;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SqlSessionError;
use crate::interrupt::{Interrupt, install_busy_handler};
use crate::savepoint::Savepoint;
use crate::statement::PreparedStatement;
use crate::transaction::{Transaction, TxOptions};
use crate::types::ExecResult;

use super::config::{BeginMode, SessionOptions};

const DEFAULT_BOOTSTRAP: &str = "PRAGMA locking_mode=normal;";
const SESSION_STATE_QUERY: &str = "SELECT * FROM pragma_locking_mode, pragma_query_only";

/// Exclusive owner of one engine handle.
///
/// A session runs one call at a time: it is `Send` so it can move between threads (or live in
/// a pool), but not `Sync`. Every call that may block inside the engine is armed with the
/// session's installed [`CancellationToken`]; see [`Session::set_interrupt`].
///
/// ```rust
/// use sqlite_session::prelude::*;
///
/// let session = Session::open_in_memory()?;
/// session.exec("CREATE TABLE t (v TEXT)")?;
/// session.transaction(|s| -> Result<(), SqlSessionError> {
///     s.exec("INSERT INTO t VALUES ('hello')")?;
///     Ok(())
/// })?;
/// # Ok::<(), SqlSessionError>(())
/// ```
pub struct Session {
    conn: Connection,
    interrupt: Interrupt,
    begin_mode: BeginMode,
    reusable: bool,
    query_only: bool,
    savepoint_depth: Cell<usize>,
    savepoint_seq: Cell<u64>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("begin_mode", &self.begin_mode)
            .field("reusable", &self.reusable)
            .field("query_only", &self.query_only)
            .field("savepoint_depth", &self.savepoint_depth.get())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a session and run its bootstrap pragmas.
    ///
    /// Every session waits up to one minute on a locked database, giving up early once its
    /// armed token is cancelled. With no pragmas configured the session runs
    /// `PRAGMA locking_mode=normal;` and is reusable. With custom pragmas, each runs as
    /// `PRAGMA <text>;` and the resulting locking mode and query-only flag are read back:
    /// only a `normal` locking mode leaves the session reusable. A `busy_timeout` pragma
    /// replaces the cancellable wait with the engine's own.
    ///
    /// # Errors
    /// Returns `SqlSessionError::SqliteError` if the database cannot be opened or a
    /// bootstrap statement fails; the handle is closed in that case.
    pub fn open(opts: SessionOptions) -> Result<Self, SqlSessionError> {
        let conn = Connection::open(&opts.path)?;
        Self::bootstrap(conn, &opts)
    }

    /// Open a private in-memory database with default options.
    ///
    /// # Errors
    /// Returns `SqlSessionError::SqliteError` if the engine cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, SqlSessionError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn, &SessionOptions::new(":memory:"))
    }

    /// Open from a data source name; see [`SessionOptions::from_dsn`].
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConfigError` for bad connection parameters, otherwise as
    /// [`Session::open`].
    pub fn open_dsn(dsn: &str) -> Result<Self, SqlSessionError> {
        Self::open(SessionOptions::from_dsn(dsn)?)
    }

    fn bootstrap(conn: Connection, opts: &SessionOptions) -> Result<Self, SqlSessionError> {
        install_busy_handler(&conn)?;
        let (reusable, query_only) = if opts.pragmas.is_empty() {
            conn.execute_batch(DEFAULT_BOOTSTRAP)?;
            (true, false)
        } else {
            for pragma in &opts.pragmas {
                conn.execute_batch(&format!("PRAGMA {pragma};"))?;
            }
            let (locking_mode, query_only): (String, i64) =
                conn.query_row(SESSION_STATE_QUERY, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
            (locking_mode.eq_ignore_ascii_case("normal"), query_only != 0)
        };

        debug!(
            path = %opts.path,
            begin_mode = ?opts.begin_mode,
            reusable,
            query_only,
            "sqlite session opened"
        );

        Ok(Self {
            conn,
            interrupt: Interrupt::new(),
            begin_mode: opts.begin_mode,
            reusable,
            query_only,
            savepoint_depth: Cell::new(0),
            savepoint_seq: Cell::new(0),
        })
    }

    /// Run one or more statements with the installed token armed.
    ///
    /// # Errors
    /// Returns the engine error of the first failing statement, or Interrupted if the
    /// installed token is cancelled.
    pub fn exec(&self, sql: &str) -> Result<ExecResult, SqlSessionError> {
        self.run(sql)?;
        Ok(self.exec_result())
    }

    /// [`Session::exec`] with `token` installed for this call only.
    ///
    /// # Errors
    /// As [`Session::exec`], judged against `token`.
    pub fn exec_scoped(
        &self,
        token: CancellationToken,
        sql: &str,
    ) -> Result<ExecResult, SqlSessionError> {
        self.interrupt.scoped(token, || self.exec(sql))
    }

    /// Install `token` as the session's cancellation source and return the one it replaces.
    ///
    /// Cancellation is level-triggered: once the installed token is cancelled every blocking
    /// call fails with Interrupted until a fresh token is installed here.
    pub fn set_interrupt(&self, token: CancellationToken) -> CancellationToken {
        self.interrupt.set(token)
    }

    /// A handle to the installed token; cancelling it interrupts this session.
    #[must_use]
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.current()
    }

    /// Compile the single statement in `sql`.
    ///
    /// # Errors
    /// Returns `SqlSessionError::MultipleStatements` if a second executable statement
    /// follows, otherwise the engine's compile error.
    pub fn prepare(&self, sql: &str) -> Result<PreparedStatement<'_>, SqlSessionError> {
        PreparedStatement::prepare(self, sql)
    }

    /// Begin a transaction with the session's configured [`BeginMode`].
    ///
    /// # Errors
    /// Returns the engine error from `BEGIN`, commonly Interrupted.
    pub fn begin(&self) -> Result<Transaction<'_>, SqlSessionError> {
        self.begin_with(self.begin_mode)
    }

    /// Begin a transaction with an explicit mode.
    ///
    /// # Errors
    /// Returns the engine error from `BEGIN`.
    pub fn begin_with(&self, mode: BeginMode) -> Result<Transaction<'_>, SqlSessionError> {
        Transaction::start(self, mode, TxOptions::default())
    }

    /// Begin a transaction from a generic isolation/read-only request.
    ///
    /// # Errors
    /// Returns `SqlSessionError::IsolationUnsupported` without touching the engine for any
    /// level other than `Default` or `Serializable`; otherwise the engine error from `BEGIN`.
    pub fn begin_tx(&self, opts: TxOptions) -> Result<Transaction<'_>, SqlSessionError> {
        Transaction::start(self, self.begin_mode, opts)
    }

    /// Run `func` inside a transaction: commit on `Ok`, roll back on `Err` or panic.
    ///
    /// # Errors
    /// Returns `func`'s error unchanged, or the `BEGIN`/`COMMIT` error converted into `E`.
    pub fn transaction<T, E, F>(&self, func: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
        E: From<SqlSessionError>,
    {
        let tx = self.begin().map_err(E::from)?;
        let result = func(self);
        tx.end(result)
    }

    /// Push a savepoint.
    ///
    /// # Errors
    /// Returns the engine error from `SAVEPOINT`; nothing is pushed in that case.
    pub fn savepoint(&self) -> Result<Savepoint<'_>, SqlSessionError> {
        Savepoint::open(self)
    }

    /// Run `func` inside a savepoint: release on `Ok`, roll back to it on `Err` or panic.
    ///
    /// # Errors
    /// Returns `func`'s error unchanged, or the `SAVEPOINT`/`RELEASE` error converted into `E`.
    pub fn savepoint_scope<T, E, F>(&self, func: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
        E: From<SqlSessionError>,
    {
        let sp = self.savepoint().map_err(E::from)?;
        let result = func(self);
        sp.release(result)
    }

    /// Open the blob stored in `column` of row `row` of `table` for incremental I/O.
    ///
    /// `db` names the schema (`"main"`, `"temp"` or an attached database). The handle reads
    /// and writes in place through [`std::io::Read`], [`std::io::Write`] and
    /// [`std::io::Seek`], and cannot change the blob's size: reserve space first by binding
    /// a [`crate::types::ParamValue::ZeroBlob`].
    ///
    /// # Errors
    /// Returns the engine error if the row or column does not exist, or if the column does
    /// not hold a blob or text value.
    pub fn open_blob(
        &self,
        db: &str,
        table: &str,
        column: &str,
        row: i64,
        read_only: bool,
    ) -> Result<Blob<'_>, SqlSessionError> {
        Ok(self.conn.blob_open(db, table, column, row, read_only)?)
    }

    /// True when no transaction is open.
    #[must_use]
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    /// Whether the session may be handed out again by a pool.
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    #[must_use]
    pub fn begin_mode(&self) -> BeginMode {
        self.begin_mode
    }

    #[must_use]
    pub fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    #[must_use]
    pub fn changes(&self) -> i64 {
        i64::try_from(self.conn.changes()).unwrap_or(i64::MAX)
    }

    #[must_use]
    pub fn exec_result(&self) -> ExecResult {
        ExecResult {
            last_insert_id: self.last_insert_id(),
            rows_affected: self.changes(),
        }
    }

    /// Close the engine handle.
    ///
    /// # Errors
    /// Returns the engine error if the handle cannot be closed (for example while a
    /// statement is still open elsewhere).
    pub fn close(self) -> Result<(), SqlSessionError> {
        let Session { conn, .. } = self;
        conn.close().map_err(|(_, err)| SqlSessionError::SqliteError(err))
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Query-only flag captured at open, restored after read-only transactions.
    pub(crate) fn saved_query_only(&self) -> bool {
        self.query_only
    }

    /// Armed batch execution.
    pub(crate) fn run(&self, sql: &str) -> Result<(), SqlSessionError> {
        let armed = self.interrupt.arm(&self.conn)?;
        armed.check(self.conn.execute_batch(sql))
    }

    /// Batch execution under a fresh token, for cleanup that must outlive a cancellation.
    pub(crate) fn run_suspended(&self, sql: &str) -> Result<(), SqlSessionError> {
        self.interrupt.suspended(|| self.run(sql))
    }

    pub(crate) fn next_savepoint_seq(&self) -> u64 {
        let seq = self.savepoint_seq.get() + 1;
        self.savepoint_seq.set(seq);
        seq
    }

    /// Record a new innermost savepoint and return its depth.
    pub(crate) fn push_savepoint(&self) -> usize {
        let depth = self.savepoint_depth.get() + 1;
        self.savepoint_depth.set(depth);
        depth
    }

    pub(crate) fn savepoint_depth(&self) -> usize {
        self.savepoint_depth.get()
    }

    pub(crate) fn truncate_savepoints(&self, depth: usize) {
        if depth < self.savepoint_depth.get() {
            self.savepoint_depth.set(depth);
        }
    }

    /// Forget every savepoint once the engine is back in autocommit mode.
    pub(crate) fn sync_savepoints(&self) {
        if self.conn.is_autocommit() {
            self.savepoint_depth.set(0);
        }
    }
}
