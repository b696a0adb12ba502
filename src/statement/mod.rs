// Statement module - prepares, binds and steps single statements
//
// - params: named/ordinal parameter resolution and value coercion
// - prepared: PreparedStatement (prepare, query, exec)
// - rows: result row decoding

pub mod params;
pub mod prepared;
pub mod rows;

pub use params::{NamedValue, bind_positional};
pub use prepared::PreparedStatement;
pub use rows::Rows;
