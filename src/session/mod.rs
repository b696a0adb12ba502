// Session module - one exclusively owned engine handle
//
// - config: open options, begin mode, DSN parameters
// - connection: Session itself
// - pool: bb8 manager for pooled sessions

pub mod config;
pub mod connection;
pub mod pool;

pub use config::{BeginMode, SessionOptions, SessionOptionsBuilder};
pub use connection::Session;
pub use pool::SessionManager;
