pub mod dates;
pub mod money;
pub mod statement;
pub mod text;

pub use money::Side;
pub use statement::{Statement, StatementError, TransactionRecord};
