//! `modbuslink`: a Modbus master/slave protocol stack.
//!
//! The crate is organized leaves-first, matching the dependency order a
//! request actually travels through:
//!
//! - [`crc`] — CRC-16 and RTU timing quantities.
//! - [`codec`] — the PDU-level `Request`/`Response` codec.
//! - [`transport`] — MBAP and RTU wire framing.
//! - [`master`] — the TCP and RTU master engines.
//! - [`databank`] — the server-side address space and dispatcher.
//! - [`server`] — the TCP and RTU server loops that drive the databank.
//! - [`hooks`] — extension points shared by masters and the databank.
//! - [`error`] — the unified error type used throughout.

pub mod codec;
pub mod crc;
pub mod databank;
pub mod error;
pub mod hooks;
pub mod master;
pub mod server;
pub mod transport;

pub use codec::{ExceptionCode, Request, Response};
pub use databank::{BlockConfig, Databank, DatabankConfig, Slave, SlaveConfig, Space};
pub use error::{ModbusError, ModbusResult};
pub use master::{RtuMaster, TcpMaster};
