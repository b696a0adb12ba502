//! Transaction, savepoint and interrupt lifecycle management for `rusqlite` sessions.
//!
//! A [`Session`] owns one engine handle. Units of work run inside a [`Transaction`] or a
//! nested [`Savepoint`], whose finalizers commit or roll back exactly once: on a normal
//! return, on an error return, or while a panic unwinds. Every call that can block inside
//! the engine is armed with the session's [`CancellationToken`], and cancelling it aborts
//! the call with the engine's Interrupted error.
//!
//! ```rust
//! use sqlite_session::prelude::*;
//!
//! let session = Session::open_in_memory()?;
//! session.exec("CREATE TABLE t (v TEXT)")?;
//!
//! let mut insert = session.prepare("INSERT INTO t (v) VALUES (?)")?;
//! session.transaction(|_| insert.exec(&bind_positional(&["hello".into()])))?;
//!
//! let mut select = session.prepare("SELECT v FROM t")?;
//! let mut rows = select.query(&[])?;
//! let row = rows.next_row()?.unwrap_or_default();
//! assert_eq!(row[0].as_text(), Some("hello"));
//! # Ok::<(), SqlSessionError>(())
//! ```

pub mod error;
mod interrupt;
pub mod prelude;
pub mod savepoint;
pub mod session;
pub mod statement;
pub mod transaction;
pub mod types;

pub use error::SqlSessionError;
pub use savepoint::Savepoint;
pub use session::{BeginMode, Session, SessionManager, SessionOptions, SessionOptionsBuilder};
pub use statement::{NamedValue, PreparedStatement, Rows, bind_positional};
pub use tokio_util::sync::CancellationToken;
pub use transaction::{IsolationLevel, Transaction, TxOptions};
pub use types::{ExecResult, ParamValue, RowValue};
