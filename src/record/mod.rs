pub mod filter;
pub mod formatter;
pub mod types;

pub use filter::{Constraint, FieldFilter, FilterSpec, RecordFilter};
pub use formatter::{level_tag, LineFormatter, RecordFormatter};
pub use types::{FieldValue, Record};
