use bb8::{ManageConnection, Pool};

use crate::error::SqlSessionError;

use super::Session;
use super::config::SessionOptions;

/// bb8 manager for sessions.
///
/// Sessions whose bootstrap left them non-reusable (any locking mode other than `normal`)
/// are reported broken and never handed out again.
#[derive(Debug, Clone)]
pub struct SessionManager {
    opts: SessionOptions,
}

impl SessionManager {
    #[must_use]
    pub fn new(opts: SessionOptions) -> Self {
        Self { opts }
    }

    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.opts
    }

    /// Build a pool from this manager.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConnectionError` if creating the pool fails.
    pub async fn build_pool(self) -> Result<Pool<SessionManager>, SqlSessionError> {
        Pool::builder()
            .build(self)
            .await
            .map_err(|e| SqlSessionError::ConnectionError(format!("sqlite pool error: {e}")))
    }
}

impl ManageConnection for SessionManager {
    type Connection = Session;
    type Error = SqlSessionError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let opts = self.opts.clone();
        async move { Session::open(opts) }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            conn.conn().query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        !conn.is_reusable()
    }
}
