use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};

/// Values that can be bound to a prepared statement parameter.
///
/// The set is closed on purpose: anything the engine cannot store natively has no
/// variant, so an unsupported value type cannot reach the binder.
/// ```rust
/// use sqlite_session::prelude::*;
///
/// let params = vec![
///     ParamValue::Int(1),
///     ParamValue::Text("alice".into()),
///     ParamValue::Bool(true),
///     ParamValue::ZeroBlob(16),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Bound as integer 0 or 1
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
    /// Reserve this many zero bytes (for incremental blob I/O)
    ZeroBlob(i32),
    /// Bound as RFC 3339 text
    Timestamp(DateTime<FixedOffset>),
    /// NULL value
    Null,
}

impl ParamValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Format a timestamp the way the engine's date functions read it back: RFC 3339 with the
/// fraction trimmed of trailing zeros and `Z` for UTC.
#[must_use]
pub fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    let mut out = ts.to_rfc3339_opts(SecondsFormat::Nanos, true);
    if let Some(dot) = out.find('.') {
        let zone = out[dot..]
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .map_or(out.len(), |offset| dot + offset);
        let digits_end = out[dot + 1..zone].trim_end_matches('0').len() + dot + 1;
        if digits_end == dot + 1 {
            out.replace_range(dot..zone, "");
        } else {
            out.replace_range(digits_end..zone, "");
        }
    }
    out
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(value: Vec<u8>) -> Self {
        ParamValue::Blob(value)
    }
}

impl From<&[u8]> for ParamValue {
    fn from(value: &[u8]) -> Self {
        ParamValue::Blob(value.to_vec())
    }
}

impl From<DateTime<FixedOffset>> for ParamValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        ParamValue::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(value: DateTime<Utc>) -> Self {
        ParamValue::Timestamp(value.fixed_offset())
    }
}

/// Naive timestamps are taken to be UTC.
impl From<NaiveDateTime> for ParamValue {
    fn from(value: NaiveDateTime) -> Self {
        ParamValue::Timestamp(value.and_utc().fixed_offset())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ParamValue::Null, Into::into)
    }
}

/// A decoded result cell, tagged with the engine's dynamic type for that cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RowValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    #[default]
    Null,
}

impl RowValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let RowValue::Integer(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValue::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Reinterpret a text cell as a timestamp.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        let s = self.as_text()?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt);
        }
        // Try "YYYY-MM-DD HH:MM:SS" with an optional fraction
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|dt| dt.and_utc().fixed_offset())
    }
}

/// Outcome of driving a statement to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub last_insert_id: i64,
    pub rows_affected: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_trim_fraction_and_use_z() {
        let ts = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 30, 5)
            .unwrap()
            .fixed_offset();
        assert_eq!(format_timestamp(&ts), "2024-03-01T12:30:05Z");

        let ts = ts + chrono::Duration::milliseconds(250);
        assert_eq!(format_timestamp(&ts), "2024-03-01T12:30:05.25Z");
    }

    #[test]
    fn timestamps_keep_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let ts = offset.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(1);
        assert_eq!(format_timestamp(&ts), "2024-03-01T08:00:00.000000001+02:00");
    }

    #[test]
    fn option_maps_to_null() {
        assert!(ParamValue::from(None::<i64>).is_null());
        assert_eq!(ParamValue::from(Some(7)), ParamValue::Int(7));
    }

    #[test]
    fn text_cells_read_back_as_timestamps() {
        let cell = RowValue::Text("2024-03-01T12:30:05.25Z".into());
        let ts = cell.as_timestamp().unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);

        let cell = RowValue::Text("2024-03-01 12:30:05".into());
        assert!(cell.as_timestamp().is_some());
        assert!(RowValue::Integer(5).as_timestamp().is_none());
    }
}
