//! Cooperative cancellation for blocking engine calls.
//!
//! A session owns exactly one installed [`CancellationToken`]. Around every call that may
//! block inside the engine the token is *armed*: a progress handler is registered that the
//! engine polls while executing, and which aborts the statement with `SQLITE_INTERRUPT` once
//! the token is cancelled. Disarming restores whatever was armed before, so nested calls
//! (a statement step inside an open transaction, a per-call token inside a session-level
//! token) unwind cleanly.
//!
//! The progress handler is never polled while the engine sleeps on another connection's
//! lock, so sessions also install [`busy_wait`] as their busy handler. It reads the token
//! armed on the calling thread and stops retrying once that token is cancelled; the
//! resulting busy error is then reported as Interrupted.
//!
//! Cancellation is level-triggered: a cancelled token stays cancelled, and every armed call
//! fails immediately until a fresh token is installed with [`Interrupt::set`].

use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode};
use tokio_util::sync::CancellationToken;

use crate::error::SqlSessionError;

/// Virtual machine instructions between two polls of the armed token.
const PROGRESS_OPS: i32 = 100;

/// Sleep between two lock retries.
const BUSY_STEP: Duration = Duration::from_millis(5);
/// Give up on a lock after this long, as `PRAGMA busy_timeout=60000` would.
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

thread_local! {
    // Engine calls are synchronous, so the busy handler runs on the arming thread.
    static BUSY_TOKEN: RefCell<Option<CancellationToken>> = const { RefCell::new(None) };
}

pub(crate) struct Interrupt {
    installed: RefCell<CancellationToken>,
    armed: RefCell<Option<CancellationToken>>,
}

impl Interrupt {
    pub(crate) fn new() -> Self {
        Self {
            installed: RefCell::new(CancellationToken::new()),
            armed: RefCell::new(None),
        }
    }

    /// Install `token` and hand back the one it replaces.
    pub(crate) fn set(&self, token: CancellationToken) -> CancellationToken {
        self.installed.replace(token)
    }

    pub(crate) fn current(&self) -> CancellationToken {
        self.installed.borrow().clone()
    }

    /// Arm the installed token on `conn` until the returned guard drops.
    ///
    /// # Errors
    /// Returns the engine's Interrupted error, without touching the engine, if the installed
    /// token is already cancelled.
    pub(crate) fn arm<'a>(&'a self, conn: &'a Connection) -> Result<Armed<'a>, SqlSessionError> {
        let token = self.current();
        if token.is_cancelled() {
            return Err(SqlSessionError::interrupted());
        }
        install_handler(conn, Some(token.clone()));
        let busy_previous = BUSY_TOKEN.with(|slot| slot.replace(Some(token.clone())));
        let previous = self.armed.replace(Some(token.clone()));
        Ok(Armed {
            interrupt: self,
            conn,
            token,
            previous,
            busy_previous,
        })
    }

    /// Run `func` with a fresh, never-cancelled token installed, then restore the old one.
    ///
    /// Cleanup statements (ROLLBACK, ROLLBACK TO) go through here so an earlier
    /// cancellation cannot leave a transaction open.
    pub(crate) fn suspended<R>(&self, func: impl FnOnce() -> R) -> R {
        self.scoped(CancellationToken::new(), func)
    }

    /// Run `func` with `token` installed, then restore the old one.
    pub(crate) fn scoped<R>(&self, token: CancellationToken, func: impl FnOnce() -> R) -> R {
        let _restore = Installed::new(self, token);
        func()
    }
}

/// Disarms on drop, on every exit path including unwinds.
pub(crate) struct Armed<'a> {
    interrupt: &'a Interrupt,
    conn: &'a Connection,
    token: CancellationToken,
    previous: Option<CancellationToken>,
    busy_previous: Option<CancellationToken>,
}

impl Armed<'_> {
    /// Convert an engine result, reporting a lock wait abandoned on cancellation as
    /// Interrupted.
    pub(crate) fn check<T>(&self, result: rusqlite::Result<T>) -> Result<T, SqlSessionError> {
        result.map_err(|err| self.convert(err))
    }

    pub(crate) fn convert(&self, err: rusqlite::Error) -> SqlSessionError {
        let err = SqlSessionError::from(err);
        let busy = matches!(
            err.code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        );
        if busy && self.token.is_cancelled() {
            SqlSessionError::interrupted()
        } else {
            err
        }
    }
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        let previous = self.previous.take();
        install_handler(self.conn, previous.clone());
        self.interrupt.armed.replace(previous);
        let busy_previous = self.busy_previous.take();
        BUSY_TOKEN.with(|slot| *slot.borrow_mut() = busy_previous);
    }
}

/// Restores a previously installed token on drop.
pub(crate) struct Installed<'a> {
    interrupt: &'a Interrupt,
    previous: Option<CancellationToken>,
}

impl<'a> Installed<'a> {
    pub(crate) fn new(interrupt: &'a Interrupt, token: CancellationToken) -> Self {
        Self {
            interrupt,
            previous: Some(interrupt.set(token)),
        }
    }
}

impl Drop for Installed<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.interrupt.set(previous);
        }
    }
}

/// Register [`busy_wait`] as the engine's busy handler on `conn`.
pub(crate) fn install_busy_handler(conn: &Connection) -> Result<(), SqlSessionError> {
    conn.busy_handler(Some(busy_wait))?;
    Ok(())
}

/// Retry a locked database every [`BUSY_STEP`] until [`BUSY_TIMEOUT`], or until the token
/// armed on this thread is cancelled.
fn busy_wait(retries: i32) -> bool {
    let cancelled = BUSY_TOKEN.with(|slot| {
        slot.borrow()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    });
    if cancelled {
        return false;
    }
    let waited = BUSY_STEP.saturating_mul(u32::try_from(retries).unwrap_or(0));
    if waited >= BUSY_TIMEOUT {
        return false;
    }
    std::thread::sleep(BUSY_STEP);
    true
}

fn install_handler(conn: &Connection, token: Option<CancellationToken>) {
    match token {
        Some(token) => {
            let token = AssertUnwindSafe(token);
            let _ = conn.progress_handler(PROGRESS_OPS, Some(move || token.is_cancelled()));
        }
        None => {
            let _ = conn.progress_handler(0, None::<fn() -> bool>);
        }
    }
}
