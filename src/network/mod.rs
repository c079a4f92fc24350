pub mod channel;
pub mod history;
pub mod transport;

pub use channel::{LiveChannel, ReconnectPolicy};
pub use history::{HistorySource, HttpHistorySource};
pub use transport::{Connector, Link, TcpConnector};
