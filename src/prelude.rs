//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::error::SqlSessionError;
pub use crate::savepoint::Savepoint;
pub use crate::session::{
    BeginMode, Session, SessionManager, SessionOptions, SessionOptionsBuilder,
};
pub use crate::statement::{NamedValue, PreparedStatement, Rows, bind_positional};
pub use crate::transaction::{IsolationLevel, Transaction, TxOptions};
pub use crate::types::{ExecResult, ParamValue, RowValue};

pub use tokio_util::sync::CancellationToken;
