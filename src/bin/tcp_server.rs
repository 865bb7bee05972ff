//! Stand-alone Modbus/TCP server: `modbus-tcp-server [config.yaml] [port]`.
//!
//! With no arguments it serves a single unit id 1 with a 100-register
//! holding block at address 0, on port 502.

use std::sync::Arc;

use modbuslink::databank::DatabankConfig;
use modbuslink::server::{TcpServer, TcpServerConfig};
use modbuslink::{Databank, Space};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
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

    let port: u16 = args.next().and_then(|s| s.parse().ok()).unwrap_or(502);
    let mut server = TcpServer::new(TcpServerConfig::with_port(port), databank);
    server.set_verbose(true);
    server.start().await.expect("server failed to start");

    log::info!("listening on port {port}, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    server.stop().await.expect("server failed to stop cleanly");
}
