use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SqlSessionError;

use super::Session;

/// Locking vocabulary used for transactions that are not read-only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BeginMode {
    /// Plain `BEGIN`
    #[default]
    Plain,
    /// `BEGIN deferred`
    Deferred,
    /// `BEGIN immediate`
    Immediate,
    /// `BEGIN exclusive`
    Exclusive,
}

impl BeginMode {
    #[must_use]
    pub fn begin_sql(self) -> &'static str {
        match self {
            BeginMode::Plain => "BEGIN",
            BeginMode::Deferred => "BEGIN deferred",
            BeginMode::Immediate => "BEGIN immediate",
            BeginMode::Exclusive => "BEGIN exclusive",
        }
    }

    /// Parse the `_txlock` connection parameter; empty selects plain `BEGIN`.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConfigError` for anything but
    /// `deferred`, `immediate`, or `exclusive`.
    pub fn from_txlock(value: &str) -> Result<Self, SqlSessionError> {
        match value {
            "" => Ok(BeginMode::Plain),
            "deferred" => Ok(BeginMode::Deferred),
            "immediate" => Ok(BeginMode::Immediate),
            "exclusive" => Ok(BeginMode::Exclusive),
            other => Err(SqlSessionError::ConfigError(format!(
                "invalid _txlock: {other}"
            ))),
        }
    }
}

/// Options for opening a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub path: String,
    #[serde(default)]
    pub begin_mode: BeginMode,
    /// Run as `PRAGMA <text>;` at open, in order.
    #[serde(default)]
    pub pragmas: Vec<String>,
}

impl SessionOptions {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            begin_mode: BeginMode::default(),
            pragmas: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_begin_mode(mut self, begin_mode: BeginMode) -> Self {
        self.begin_mode = begin_mode;
        self
    }

    #[must_use]
    pub fn with_pragma(mut self, pragma: impl Into<String>) -> Self {
        self.pragmas.push(pragma.into());
        self
    }

    /// Read options from a data source name.
    ///
    /// A `file:` URI may carry `_txlock=deferred|immediate|exclusive` and any number of
    /// `_pragma=<text>` parameters:
    /// ```rust
    /// use sqlite_session::prelude::*;
    ///
    /// let opts = SessionOptions::from_dsn(
    ///     "file:demo.db?_txlock=immediate&_pragma=busy_timeout(10000)",
    /// )?;
    /// assert_eq!(opts.begin_mode, BeginMode::Immediate);
    /// assert_eq!(opts.pragmas, vec!["busy_timeout(10000)".to_string()]);
    /// # Ok::<(), SqlSessionError>(())
    /// ```
    /// The whole name is handed to the engine unchanged; it ignores parameters it does not
    /// know.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConfigError` for an invalid `_txlock` or a malformed
    /// percent-encoding.
    pub fn from_dsn(dsn: &str) -> Result<Self, SqlSessionError> {
        let mut opts = SessionOptions::new(dsn);
        if !dsn.starts_with("file:") {
            return Ok(opts);
        }
        let Some((_, query)) = dsn.split_once('?') else {
            return Ok(opts);
        };

        let mut txlock: Option<String> = None;
        for (key, value) in parse_query(query)? {
            match key.as_str() {
                // first value wins
                "_txlock" if txlock.is_none() => txlock = Some(value),
                "_pragma" => opts.pragmas.push(value),
                _ => {}
            }
        }
        if let Some(txlock) = txlock {
            opts.begin_mode = BeginMode::from_txlock(&txlock)?;
        }
        Ok(opts)
    }
}

fn decode_component(raw: &str) -> Result<String, SqlSessionError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| SqlSessionError::ConfigError(format!("invalid DSN encoding: {e}")))
}

fn parse_query(query: &str) -> Result<Vec<(String, String)>, SqlSessionError> {
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| -> Result<(String, String), SqlSessionError> {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((decode_component(key)?, decode_component(value)?))
        })
        .collect()
}

/// Fluent builder for [`SessionOptions`].
#[derive(Debug, Clone)]
pub struct SessionOptionsBuilder {
    opts: SessionOptions,
}

impl SessionOptionsBuilder {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            opts: SessionOptions::new(path),
        }
    }

    #[must_use]
    pub fn begin_mode(mut self, begin_mode: BeginMode) -> Self {
        self.opts.begin_mode = begin_mode;
        self
    }

    #[must_use]
    pub fn pragma(mut self, pragma: impl Into<String>) -> Self {
        self.opts.pragmas.push(pragma.into());
        self
    }

    #[must_use]
    pub fn finish(self) -> SessionOptions {
        self.opts
    }

    /// Open a [`Session`] with these options.
    ///
    /// # Errors
    ///
    /// Returns `SqlSessionError` if the database cannot be opened or bootstrapped.
    pub fn open(self) -> Result<Session, SqlSessionError> {
        Session::open(self.finish())
    }
}
