use rusqlite::Statement;
use rusqlite::blob::ZeroBlob;

use crate::error::SqlSessionError;
use crate::types::{ParamValue, format_timestamp};

/// Prefixes under which a named argument may appear in statement text.
const NAME_PREFIXES: [&str; 3] = [":", "@", "$"];

/// An argument for a prepared statement, addressed by name or by 1-based ordinal.
///
/// Named arguments are matched against every supported prefix, so `x` binds `:x`, `@x`
/// and `$x` at once when the statement uses more than one of them.
/// ```rust
/// use sqlite_session::prelude::*;
///
/// let args = [
///     NamedValue::positional(1, 42),
///     NamedValue::named("name", "alice"),
/// ];
/// # let _ = args;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    pub name: Option<String>,
    pub ordinal: usize,
    pub value: ParamValue,
}

impl NamedValue {
    #[must_use]
    pub fn positional(ordinal: usize, value: impl Into<ParamValue>) -> Self {
        Self {
            name: None,
            ordinal,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: Some(name.into()),
            ordinal: 0,
            value: value.into(),
        }
    }
}

/// Number each value by its position, starting at 1.
#[must_use]
pub fn bind_positional(values: &[ParamValue]) -> Vec<NamedValue> {
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| NamedValue {
            name: None,
            ordinal: idx + 1,
            value: value.clone(),
        })
        .collect()
}

/// Slot indexes `arg` binds to. Unknown names resolve to no slot at all.
fn resolve_slots(stmt: &Statement<'_>, arg: &NamedValue) -> Result<Vec<usize>, SqlSessionError> {
    match arg.name.as_deref() {
        None | Some("") => Ok(vec![arg.ordinal]),
        Some(name) => {
            let mut ids = Vec::with_capacity(NAME_PREFIXES.len());
            for prefix in NAME_PREFIXES {
                if let Some(id) = stmt.parameter_index(&format!("{prefix}{name}"))? {
                    ids.push(id);
                }
            }
            Ok(ids)
        }
    }
}

fn bind_value(stmt: &mut Statement<'_>, id: usize, value: &ParamValue) -> rusqlite::Result<()> {
    match value {
        ParamValue::Bool(b) => stmt.raw_bind_parameter(id, i64::from(*b)),
        ParamValue::Int(i) => stmt.raw_bind_parameter(id, *i),
        ParamValue::Float(f) => stmt.raw_bind_parameter(id, *f),
        ParamValue::Text(s) => stmt.raw_bind_parameter(id, s.as_str()),
        ParamValue::Blob(bytes) => stmt.raw_bind_parameter(id, bytes.as_slice()),
        ParamValue::ZeroBlob(len) => stmt.raw_bind_parameter(id, ZeroBlob(*len)),
        ParamValue::Timestamp(ts) => stmt.raw_bind_parameter(id, format_timestamp(ts)),
        ParamValue::Null => stmt.raw_bind_parameter(id, rusqlite::types::Null),
    }
}

/// Reset every slot to NULL, then bind `args`.
///
/// # Errors
/// Returns the engine error for an out-of-range ordinal or a value the engine rejects
/// (for example a blob larger than the length limit).
pub(crate) fn bind_args(
    stmt: &mut Statement<'_>,
    args: &[NamedValue],
) -> Result<(), SqlSessionError> {
    for id in 1..=stmt.parameter_count() {
        stmt.raw_bind_parameter(id, rusqlite::types::Null)?;
    }

    for arg in args {
        for id in resolve_slots(stmt, arg)? {
            bind_value(stmt, id, &arg.value)?;
        }
    }
    Ok(())
}

/// Count of bind slots, or `None` ("unknown") when any slot carries a name.
///
/// Named and numbered slots cannot be matched one-to-one against ordinal arguments.
pub(crate) fn num_input(stmt: &Statement<'_>) -> Option<usize> {
    let count = stmt.parameter_count();
    if (1..=count).any(|idx| stmt.parameter_name(idx).is_some()) {
        None
    } else {
        Some(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn named_values_resolve_every_prefix() -> Result<(), SqlSessionError> {
        let conn = Connection::open_in_memory()?;
        let stmt = conn.prepare("SELECT :x, @x, $x, :y")?;
        let ids = resolve_slots(&stmt, &NamedValue::named("x", 1))?;
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(resolve_slots(&stmt, &NamedValue::named("missing", 1))?.is_empty());
        Ok(())
    }

    #[test]
    fn num_input_unknown_with_names() -> Result<(), SqlSessionError> {
        let conn = Connection::open_in_memory()?;
        assert_eq!(num_input(&conn.prepare("SELECT ?, ?")?), Some(2));
        assert_eq!(num_input(&conn.prepare("SELECT 1")?), Some(0));
        assert_eq!(num_input(&conn.prepare("SELECT ?, :a")?), None);
        assert_eq!(num_input(&conn.prepare("SELECT ?1")?), None);
        Ok(())
    }

    #[test]
    fn positional_helper_numbers_from_one() {
        let args = bind_positional(&[ParamValue::Int(1), ParamValue::Null]);
        assert_eq!(args[0].ordinal, 1);
        assert_eq!(args[1].ordinal, 2);
        assert!(args.iter().all(|a| a.name.is_none()));
    }
}
