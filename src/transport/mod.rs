//! Wire framing for the two supported transports.

pub mod mbap;
pub mod rtu_framer;
