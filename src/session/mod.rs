pub mod config;
pub mod connection;
mod dispatch;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use connection::{Channel, Connection, ConnectionState};
pub use session::{MidiMessageHandler, Session};
