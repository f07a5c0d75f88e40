//! SSH tunneled transport

mod connection;
mod connector;

pub use connection::SshConnection;
pub use connector::{ClientHandler, SshTransport};
