use tracing::{debug, warn};

use crate::error::SqlSessionError;
use crate::session::Session;

const NAME_PREFIX: &str = "sqlite_session_sp_";

/// One entry in the session's savepoint stack.
///
/// Releasing an entry discharges every entry opened after it; finalizing a discharged entry
/// sends nothing. Release innermost-first:
/// ```rust
/// use sqlite_session::prelude::*;
///
/// let session = Session::open_in_memory()?;
/// session.exec("CREATE TABLE t (v INTEGER)")?;
///
/// let outer = session.savepoint()?;
/// session.exec("INSERT INTO t VALUES (1)")?;
/// let inner = session.savepoint()?;
/// let failed: Result<(), SqlSessionError> = Err(SqlSessionError::MultipleStatements);
/// assert!(inner.release(failed).is_err()); // rolled back to `inner`
/// outer.release::<(), SqlSessionError>(Ok(()))?;
/// # Ok::<(), SqlSessionError>(())
/// ```
#[must_use = "dropping an unreleased savepoint rolls it back"]
pub struct Savepoint<'s> {
    session: &'s Session,
    name: String,
    depth: usize,
    finished: bool,
}

impl<'s> Savepoint<'s> {
    pub(crate) fn open(session: &'s Session) -> Result<Self, SqlSessionError> {
        session.sync_savepoints();
        let name = format!("{NAME_PREFIX}{}", session.next_savepoint_seq());
        debug!(savepoint = %name, "sqlite savepoint");
        session.run(&format!("SAVEPOINT \"{name}\";"))?;
        let depth = session.push_savepoint();
        Ok(Self {
            session,
            name,
            depth,
            finished: false,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1 for the outermost open savepoint.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Finalize the savepoint: `Ok` releases it, `Err` rolls back to it and releases it.
    ///
    /// A caller's `Err` is returned exactly as given, whatever the rollback statements do.
    /// On the `Ok` path a failed `RELEASE` takes the rollback path and its error is returned.
    ///
    /// # Errors
    /// Returns `result`'s error, or the `RELEASE` error.
    pub fn release<T, E>(mut self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<SqlSessionError>,
    {
        self.finished = true;
        if self.is_discharged() {
            return result;
        }

        let outcome = match result {
            Ok(value) => {
                debug!(savepoint = %self.name, "sqlite release");
                match self.session.run(&format!("RELEASE \"{}\";", self.name)) {
                    Ok(()) => Ok(value),
                    Err(err) => {
                        self.roll_back_logged();
                        Err(E::from(err))
                    }
                }
            }
            Err(err) => {
                self.roll_back_logged();
                Err(err)
            }
        };
        self.discharge();
        outcome
    }

    /// Roll back to this savepoint and release it.
    ///
    /// # Errors
    /// Returns the engine error from `ROLLBACK TO` or `RELEASE`.
    pub fn rollback(mut self) -> Result<(), SqlSessionError> {
        self.finished = true;
        if self.is_discharged() {
            return Ok(());
        }
        let outcome = self.roll_back();
        self.discharge();
        outcome
    }

    /// Already released or rolled back by an enclosing savepoint or transaction.
    fn is_discharged(&self) -> bool {
        self.session.sync_savepoints();
        self.depth > self.session.savepoint_depth()
    }

    fn discharge(&self) {
        self.session.truncate_savepoints(self.depth - 1);
        self.session.sync_savepoints();
    }

    fn roll_back(&self) -> Result<(), SqlSessionError> {
        debug!(savepoint = %self.name, "sqlite rollback to savepoint");
        let name = &self.name;
        self.session
            .run_suspended(&format!("ROLLBACK TO \"{name}\"; RELEASE \"{name}\";"))
    }

    fn roll_back_logged(&self) {
        if let Err(err) = self.roll_back() {
            warn!(savepoint = %self.name, error = %err, "rollback to savepoint failed");
        }
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.is_discharged() {
            return;
        }
        if std::thread::panicking() {
            debug!(savepoint = %self.name, "unwinding through open savepoint; rolling back");
        }
        self.roll_back_logged();
        self.discharge();
    }
}
