use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::{Batch, Statement, ffi};
use tokio_util::sync::CancellationToken;

use crate::error::SqlSessionError;
use crate::interrupt::Installed;
use crate::session::Session;
use crate::types::ExecResult;

use super::params::{NamedValue, bind_args, num_input};
use super::rows::Rows;

/// A compiled single statement.
///
/// Bound and executed as often as needed; finalized by [`PreparedStatement::close`] or on drop.
/// ```rust
/// use sqlite_session::prelude::*;
///
/// let session = Session::open_in_memory()?;
/// session.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")?;
///
/// let mut insert = session.prepare("INSERT INTO t (name) VALUES (:name)")?;
/// let res = insert.exec(&[NamedValue::named("name", "alice")])?;
/// assert_eq!(res.rows_affected, 1);
/// insert.close()?;
/// # Ok::<(), SqlSessionError>(())
/// ```
pub struct PreparedStatement<'s> {
    stmt: Statement<'s>,
    session: &'s Session,
}

impl std::fmt::Debug for PreparedStatement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("sql", &self.stmt.expanded_sql())
            .finish_non_exhaustive()
    }
}

fn empty_statement() -> SqlSessionError {
    SqlSessionError::SqliteError(rusqlite::Error::SqliteFailure(
        ffi::Error::new(ffi::SQLITE_MISUSE),
        Some("empty statement".to_string()),
    ))
}

impl<'s> PreparedStatement<'s> {
    pub(crate) fn prepare(session: &'s Session, sql: &str) -> Result<Self, SqlSessionError> {
        // The engine's own tail decides where a statement ends; empty segments are skipped.
        let mut batch = Batch::new(session.conn(), sql);
        let Some(stmt) = batch.next()? else {
            return Err(empty_statement());
        };
        if let Some(next) = batch.next()? {
            // Only a tail that compiles counts as a second statement.
            next.finalize()?;
            return Err(SqlSessionError::MultipleStatements);
        }
        Ok(Self { stmt, session })
    }

    /// Number of bind slots, or `None` when any slot is named and ordinal arguments cannot
    /// be matched against them one-to-one.
    #[must_use]
    pub fn num_input(&self) -> Option<usize> {
        num_input(&self.stmt)
    }

    /// Result column names.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.stmt
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    /// Bind `args` and start stepping. Each step is armed with the session's token.
    ///
    /// # Errors
    /// Returns the engine error for a slot it cannot bind.
    pub fn query(&mut self, args: &[NamedValue]) -> Result<Rows<'_>, SqlSessionError> {
        self.start(None, args)
    }

    /// [`PreparedStatement::query`] with `token` installed until the returned rows drop.
    ///
    /// # Errors
    /// As [`PreparedStatement::query`].
    pub fn query_scoped(
        &mut self,
        token: CancellationToken,
        args: &[NamedValue],
    ) -> Result<Rows<'_>, SqlSessionError> {
        self.start(Some(token), args)
    }

    /// Bind `args` and step the statement to completion.
    ///
    /// # Errors
    /// Returns the engine error from binding or from any step, including Interrupted.
    pub fn exec(&mut self, args: &[NamedValue]) -> Result<ExecResult, SqlSessionError> {
        let session = self.session;
        let mut rows = self.query(args)?;
        rows.drain()?;
        drop(rows);
        Ok(session.exec_result())
    }

    /// Finalize the statement.
    ///
    /// # Errors
    /// Returns the engine error reported by finalization.
    pub fn close(self) -> Result<(), SqlSessionError> {
        self.stmt.finalize()?;
        Ok(())
    }

    fn start(
        &mut self,
        token: Option<CancellationToken>,
        args: &[NamedValue],
    ) -> Result<Rows<'_>, SqlSessionError> {
        let session = self.session;
        bind_args(&mut self.stmt, args)?;
        let columns = self.column_names();
        let scope = token.map(|token| Installed::new(session.interrupt(), token));
        Ok(Rows::new(self.stmt.raw_query(), session, columns, scope))
    }
}
