//! The master (client) engine: open/close a transport, send one request at
//! a time, decode the response.

pub mod rtu;
pub mod tcp;

pub use rtu::RtuMaster;
pub use tcp::TcpMaster;
