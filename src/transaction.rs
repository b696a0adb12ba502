//! Transaction lifecycle.
//!
//! A [`Transaction`] is finalized exactly once: by [`Transaction::end`] (which reconciles the
//! unit of work's result with COMMIT or ROLLBACK), by an explicit [`Transaction::commit`] or
//! [`Transaction::rollback`], or by `Drop` when the guard goes out of scope unfinished,
//! including while a panic unwinds. All three consume or outlive the guard, so a finalizer
//! cannot run twice.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SqlSessionError;
use crate::session::{BeginMode, Session};

/// Isolation levels a caller may request.
///
/// The engine serializes writers, so only `Default` and `Serializable` can be honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    WriteCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
    Linearizable,
}

impl IsolationLevel {
    #[must_use]
    pub fn is_supported(self) -> bool {
        matches!(self, IsolationLevel::Default | IsolationLevel::Serializable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxOptions {
    #[serde(default)]
    pub isolation: IsolationLevel,
    #[serde(default)]
    pub read_only: bool,
}

impl TxOptions {
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            isolation: IsolationLevel::Default,
            read_only: true,
        }
    }
}

const READ_ONLY_BEGIN: &str = "BEGIN deferred; PRAGMA query_only=on;";
const READ_ONLY_END: &str = "ROLLBACK; PRAGMA query_only=0;";
const READ_ONLY_END_QUERY_ONLY: &str = "ROLLBACK; PRAGMA query_only=1;";
const RESTORE_QUERY_ONLY_OFF: &str = "PRAGMA query_only=0;";
const RESTORE_QUERY_ONLY_ON: &str = "PRAGMA query_only=1;";

/// An open `BEGIN ... COMMIT/ROLLBACK` span.
///
/// ```rust
/// use sqlite_session::prelude::*;
///
/// let session = Session::open_in_memory()?;
/// session.exec("CREATE TABLE t (v TEXT)")?;
///
/// let tx = session.begin()?;
/// let work = session.exec("INSERT INTO t VALUES ('hello')").map(|_| ());
/// tx.end(work)?;
/// # Ok::<(), SqlSessionError>(())
/// ```
#[must_use = "dropping an unfinished transaction rolls it back"]
pub struct Transaction<'s> {
    session: &'s Session,
    commit_sql: &'static str,
    rollback_sql: &'static str,
    /// Query-only restore for read-only transactions the caller already ended by hand.
    restore_sql: Option<&'static str>,
    finished: bool,
}

impl<'s> Transaction<'s> {
    pub(crate) fn start(
        session: &'s Session,
        mode: BeginMode,
        opts: TxOptions,
    ) -> Result<Self, SqlSessionError> {
        if !opts.isolation.is_supported() {
            return Err(SqlSessionError::IsolationUnsupported(opts.isolation));
        }

        let (begin_sql, commit_sql, rollback_sql, restore_sql) = if opts.read_only {
            let (end_sql, restore) = if session.saved_query_only() {
                (READ_ONLY_END_QUERY_ONLY, RESTORE_QUERY_ONLY_ON)
            } else {
                (READ_ONLY_END, RESTORE_QUERY_ONLY_OFF)
            };
            (READ_ONLY_BEGIN, end_sql, end_sql, Some(restore))
        } else {
            (mode.begin_sql(), "COMMIT", "ROLLBACK", None)
        };

        debug!(sql = begin_sql, "sqlite begin");
        session.run(begin_sql)?;
        Ok(Self {
            session,
            commit_sql,
            rollback_sql,
            restore_sql,
            finished: false,
        })
    }

    /// Finalize the unit of work: `Ok` commits, `Err` rolls back.
    ///
    /// The caller's error is returned unchanged; a rollback failure behind it is only
    /// logged. On the `Ok` path a COMMIT failure is returned (converted into `E`) after a
    /// compensating rollback. If the transaction was already ended inside the scope (a
    /// manual `COMMIT`, or an engine-side auto-rollback) nothing is sent.
    ///
    /// # Errors
    /// Returns `result`'s error, or the COMMIT error.
    pub fn end<T, E>(mut self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<SqlSessionError>,
    {
        self.finished = true;
        match result {
            Ok(value) => {
                if self.already_ended() {
                    return Ok(value);
                }
                self.commit_inner().map_err(E::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback_inner() {
                    warn!(error = %rollback_err, "rollback after failed unit of work also failed");
                }
                Err(err)
            }
        }
    }

    /// Commit, rolling back if the COMMIT fails while the transaction is still open.
    ///
    /// # Errors
    /// Returns the COMMIT error, never the compensating rollback's.
    pub fn commit(mut self) -> Result<(), SqlSessionError> {
        self.finished = true;
        self.commit_inner()
    }

    /// # Errors
    /// Returns the ROLLBACK error.
    pub fn rollback(mut self) -> Result<(), SqlSessionError> {
        self.finished = true;
        self.rollback_inner()
    }

    /// Nothing left to finalize: the engine is back in autocommit mode.
    fn already_ended(&self) -> bool {
        if !self.session.is_autocommit() {
            return false;
        }
        if let Some(restore) = self.restore_sql
            && let Err(err) = self.session.run_suspended(restore)
        {
            warn!(error = %err, "restoring query_only failed");
        }
        self.session.sync_savepoints();
        true
    }

    fn commit_inner(&self) -> Result<(), SqlSessionError> {
        debug!(sql = self.commit_sql, "sqlite commit");
        let outcome = self.session.run(self.commit_sql);
        if let Err(err) = &outcome
            && !self.session.is_autocommit()
        {
            debug!(error = %err, "commit failed with transaction still open; rolling back");
            if let Err(rollback_err) = self.session.run_suspended(self.rollback_sql) {
                warn!(error = %rollback_err, "compensating rollback failed");
            }
        }
        self.session.sync_savepoints();
        outcome
    }

    fn rollback_inner(&self) -> Result<(), SqlSessionError> {
        if self.already_ended() {
            return Ok(());
        }
        debug!(sql = self.rollback_sql, "sqlite rollback");
        let outcome = self.session.run_suspended(self.rollback_sql);
        self.session.sync_savepoints();
        outcome
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if std::thread::panicking() {
            debug!("unwinding through open transaction; rolling back");
        }
        if let Err(err) = self.rollback_inner() {
            warn!(error = %err, "rollback on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_isolation_sends_nothing() {
        let session = Session::open_in_memory().unwrap();
        let opts = TxOptions {
            isolation: IsolationLevel::ReadCommitted,
            read_only: false,
        };
        let err = session.begin_tx(opts).err().unwrap();
        assert!(matches!(
            err,
            SqlSessionError::IsolationUnsupported(IsolationLevel::ReadCommitted)
        ));
        assert!(session.is_autocommit());
    }

    #[test]
    fn serializable_is_accepted() {
        let session = Session::open_in_memory().unwrap();
        let tx = session
            .begin_tx(TxOptions {
                isolation: IsolationLevel::Serializable,
                read_only: false,
            })
            .unwrap();
        assert!(!session.is_autocommit());
        tx.commit().unwrap();
        assert!(session.is_autocommit());
    }

    #[test]
    fn drop_rolls_back() {
        let session = Session::open_in_memory().unwrap();
        session.exec("CREATE TABLE t (v INTEGER)").unwrap();
        {
            let _tx = session.begin().unwrap();
            session.exec("INSERT INTO t VALUES (1)").unwrap();
        }
        assert!(session.is_autocommit());
        let count: i64 = session
            .conn()
            .query_row("SELECT count(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn end_after_manual_commit_sends_nothing() {
        let session = Session::open_in_memory().unwrap();
        session.exec("CREATE TABLE t (v INTEGER)").unwrap();
        let tx = session.begin().unwrap();
        session.exec("INSERT INTO t VALUES (1); COMMIT;").unwrap();
        tx.end::<(), SqlSessionError>(Ok(())).unwrap();
        let count: i64 = session
            .conn()
            .query_row("SELECT count(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
