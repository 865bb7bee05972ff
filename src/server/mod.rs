//! Server loops that drive a [`crate::databank::Databank`] over a transport:
//! a Tokio accept-loop-plus-per-connection-task TCP server, and a single
//! dedicated RTU serial task.

pub mod rtu;
pub mod tcp;

pub use rtu::{RtuServer, RtuServerConfig};
pub use tcp::{ConnectionInfo, TcpServer, TcpServerConfig};
