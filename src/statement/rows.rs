use rusqlite::Row;
use rusqlite::types::ValueRef;

use crate::error::SqlSessionError;
use crate::interrupt::Installed;
use crate::session::Session;
use crate::types::RowValue;

/// Cursor over a statement's result rows.
///
/// Each cell is decoded by the type the engine reports for that cell, so one column can
/// yield an integer on one row and text on the next. After the last row, or after an error,
/// the cursor stays exhausted.
pub struct Rows<'r> {
    // Dropped first: resets the statement before a scoped token is restored.
    rows: rusqlite::Rows<'r>,
    session: &'r Session,
    columns: Vec<String>,
    done: bool,
    _scope: Option<Installed<'r>>,
}

impl<'r> Rows<'r> {
    pub(crate) fn new(
        rows: rusqlite::Rows<'r>,
        session: &'r Session,
        columns: Vec<String>,
        scope: Option<Installed<'r>>,
    ) -> Self {
        Self {
            rows,
            session,
            columns,
            done: false,
            _scope: scope,
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Advance and decode the row into `dest`, reusing its text and blob buffers.
    ///
    /// Returns `Ok(false)` at the end of the rows. Only the first `min(dest.len(), columns)`
    /// cells are decoded. A NULL cell landing in a slot that holds a blob leaves an empty
    /// blob there, so a caller's buffer survives.
    ///
    /// # Errors
    /// Returns the engine error from stepping (for example Interrupted). An error raised
    /// before the engine was entered (a token already cancelled) leaves the cursor usable:
    /// once a fresh token is installed with [`Session::set_interrupt`], the next call
    /// continues from the same row.
    pub fn next_into(&mut self, dest: &mut [RowValue]) -> Result<bool, SqlSessionError> {
        if self.done {
            return Ok(false);
        }
        let armed = self.session.interrupt().arm(self.session.conn())?;
        match self.rows.next() {
            Ok(Some(row)) => {
                let width = dest.len().min(self.columns.len());
                decode_row(row, &mut dest[..width])?;
                Ok(true)
            }
            Ok(None) => {
                self.done = true;
                Ok(false)
            }
            Err(err) => {
                self.done = true;
                Err(armed.convert(err))
            }
        }
    }

    /// Advance and return a freshly allocated row, or `None` at the end.
    ///
    /// # Errors
    /// As [`Rows::next_into`].
    pub fn next_row(&mut self) -> Result<Option<Vec<RowValue>>, SqlSessionError> {
        let mut row = vec![RowValue::Null; self.columns.len()];
        Ok(self.next_into(&mut row)?.then_some(row))
    }

    /// Step to the end without decoding.
    pub(crate) fn drain(&mut self) -> Result<(), SqlSessionError> {
        while self.next_into(&mut [])? {}
        Ok(())
    }
}

fn decode_row(row: &Row<'_>, dest: &mut [RowValue]) -> Result<(), SqlSessionError> {
    for (idx, slot) in dest.iter_mut().enumerate() {
        decode_cell(row.get_ref(idx)?, slot);
    }
    Ok(())
}

fn decode_cell(cell: ValueRef<'_>, slot: &mut RowValue) {
    match cell {
        ValueRef::Null => match slot {
            RowValue::Blob(buf) => buf.clear(),
            other => *other = RowValue::Null,
        },
        ValueRef::Integer(value) => *slot = RowValue::Integer(value),
        ValueRef::Real(value) => *slot = RowValue::Float(value),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            match slot {
                RowValue::Text(buf) => {
                    buf.clear();
                    buf.push_str(&text);
                }
                other => *other = RowValue::Text(text.into_owned()),
            }
        }
        ValueRef::Blob(bytes) => match slot {
            RowValue::Blob(buf) => {
                buf.clear();
                buf.extend_from_slice(bytes);
            }
            other => *other = RowValue::Blob(bytes.to_vec()),
        },
    }
}
