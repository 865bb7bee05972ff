//! Server-side address-space storage: blocks, slaves, and the databank
//! that owns them.

pub mod block;
pub mod config;
#[allow(clippy::module_inception)]
pub mod databank;
pub mod slave;

pub use block::Space;
pub use config::{BlockConfig, DatabankConfig, SlaveConfig};
pub use databank::Databank;
pub use slave::Slave;
