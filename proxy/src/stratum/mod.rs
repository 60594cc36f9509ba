pub mod connection;
pub mod protocol;

pub use connection::{Connection, DialTarget, LineReader, LineWriter, Security};
pub use protocol::{Message, Method};
