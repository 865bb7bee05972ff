//! Stand-alone Modbus RTU server: `modbus-rtu-server <port> [baud] [config.yaml]`.
//!
//! With no config it serves a single unit id 1 with a 100-register holding
//! block at address 0.

use std::sync::Arc;

use modbuslink::databank::DatabankConfig;
use modbuslink::server::{RtuServer, RtuServerConfig};
use modbuslink::{Databank, Space};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let port_path = args.next().unwrap_or_else(|| {
        eprintln!("usage: modbus-rtu-server <port> [baud] [config.yaml]");
        std::process::exit(1);
    });
    let baud_rate: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(9600);
    let config_path = args.next();

    let databank = Arc::new(match config_path {
        Some(path) => {
            let config = DatabankConfig::from_yaml_file(&path)
                .unwrap_or_else(|err| panic!("failed to load {path}: {err}"));
            Databank::from_config(config).expect("config describes a valid databank")
        }
        None => {
            let bank = Databank::new(true);
            bank.add_slave(1).unwrap();
            bank.add_block(1, "holding", Space::HoldingRegisters, 0, 100).unwrap();
            bank
        }
    });

    let mut server = RtuServer::new(RtuServerConfig::new(&port_path, baud_rate), databank);
    server.set_verbose(true);
    server.start().await.expect("server failed to start");

    log::info!("listening on {port_path} at {baud_rate} baud, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    server.stop().await.expect("server failed to stop cleanly");
}
