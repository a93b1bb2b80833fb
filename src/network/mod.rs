mod connection;
pub mod exchange;
mod table;

pub use connection::Connection;
pub use exchange::{Cycle, Outcome};
pub use table::ConnectionTable;
