//! Rows and result sets returned by the read path.

mod result_set;
mod row;

pub use result_set::ResultSet;
pub use row::CustomDbRow;
