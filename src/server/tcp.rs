//! Modbus/TCP server: accept loop plus one task per connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::databank::databank::Databank;
use crate::error::{ModbusError, ModbusResult};
use crate::transport::mbap::{self, MBAP_HEADER_LEN};

const MAX_PDU_SIZE: usize = 253;

/// Listener configuration; unlike the master, a single server answers for
/// every `unit_id` the databank has a slave registered for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_connections: usize,
    pub timeout_ms: u64,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        TcpServerConfig {
            bind_address: "0.0.0.0".to_string(),
            port: 502,
            max_connections: 10,
            timeout_ms: 3000,
        }
    }
}

impl TcpServerConfig {
    pub fn with_port(port: u16) -> TcpServerConfig {
        TcpServerConfig {
            port,
            ..Default::default()
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// A connected client, tracked for introspection only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub address: String,
    pub connected_at: String,
}

impl ConnectionInfo {
    fn new(address: std::net::SocketAddr) -> ConnectionInfo {
        ConnectionInfo {
            address: address.to_string(),
            connected_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A running (or stopped) Modbus/TCP server over a shared [`Databank`].
pub struct TcpServer {
    config: TcpServerConfig,
    databank: Arc<Databank>,
    running: Arc<AtomicBool>,
    connections: Arc<RwLock<Vec<ConnectionInfo>>>,
    verbose: Arc<AtomicBool>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl TcpServer {
    pub fn new(config: TcpServerConfig, databank: Arc<Databank>) -> TcpServer {
        TcpServer {
            config,
            databank,
            running: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(RwLock::new(Vec::new())),
            verbose: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &TcpServerConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections.read().clone()
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    pub fn databank(&self) -> &Arc<Databank> {
        &self.databank
    }

    pub async fn start(&mut self) -> ModbusResult<()> {
        if self.is_running() {
            return Err(ModbusError::AlreadyRunning);
        }

        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|err| ModbusError::BindFailed(format!("{addr}: {err}")))?;
        log::info!("modbus tcp server listening on {addr}");

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());
        self.running.store(true, Ordering::SeqCst);

        let databank = Arc::clone(&self.databank);
        let connections = Arc::clone(&self.connections);
        let running = Arc::clone(&self.running);
        let verbose = Arc::clone(&self.verbose);
        let max_connections = self.config.max_connections;
        let timeout = Duration::from_millis(self.config.timeout_ms);

        tokio::spawn(async move {
            let mut shutdown_rx = shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        log::info!("modbus tcp server shutting down");
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                if connections.read().len() >= max_connections {
                                    log::warn!("connection limit reached, rejecting {peer_addr}");
                                    continue;
                                }
                                connections.write().push(ConnectionInfo::new(peer_addr));
                                if verbose.load(Ordering::Relaxed) {
                                    log::info!("modbus client connected: {peer_addr}");
                                }

                                let databank = Arc::clone(&databank);
                                let connections = Arc::clone(&connections);
                                let verbose = Arc::clone(&verbose);
                                let peer_addr_str = peer_addr.to_string();

                                tokio::spawn(async move {
                                    if let Err(err) = handle_connection(stream, &databank, timeout).await {
                                        if verbose.load(Ordering::Relaxed) {
                                            log::warn!("connection from {peer_addr} closed: {err}");
                                        }
                                    }
                                    connections.write().retain(|c| c.address != peer_addr_str);
                                });
                            }
                            Err(err) => {
                                if running.load(Ordering::SeqCst) {
                                    log::error!("error accepting connection: {err}");
                                }
                            }
                        }
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
            connections.write().clear();
        });

        Ok(())
    }

    pub async fn stop(&mut self) -> ModbusResult<()> {
        if !self.is_running() {
            return Err(ModbusError::NotRunning);
        }

        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }

        let start = std::time::Instant::now();
        while self.is_running() && start.elapsed() < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if self.is_running() {
            self.running.store(false, Ordering::SeqCst);
            self.connections.write().clear();
            return Err(ModbusError::ShutdownTimeout);
        }

        self.shutdown_tx = None;
        log::info!("modbus tcp server stopped");
        Ok(())
    }
}

/// Read MBAP frames off `stream` until it closes, dispatching each to
/// `databank` and writing back the response (if any).
async fn handle_connection(mut stream: TcpStream, databank: &Databank, timeout: Duration) -> ModbusResult<()> {
    let mut header_buf = [0u8; MBAP_HEADER_LEN];

    loop {
        // `read_exact` re-enters itself across partial reads; only a
        // clean EOF before any byte of the next header arrives ends the
        // connection, everything else either completes or times out.
        match tokio::time::timeout(timeout, stream.read_exact(&mut header_buf)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(err)) => return Err(ModbusError::Io(err)),
            Err(_) => continue, // idle connection, keep waiting
        }

        let header = match mbap::parse_header(&header_buf) {
            Ok(header) => header,
            Err(err) => {
                log::warn!("dropping frame with invalid MBAP header: {err}");
                continue;
            }
        };
        let pdu_len = (header.length as usize).saturating_sub(1);
        if pdu_len == 0 || pdu_len > MAX_PDU_SIZE {
            log::warn!("dropping frame with invalid PDU length {pdu_len}");
            continue;
        }

        let mut pdu_buf = vec![0u8; pdu_len];
        stream.read_exact(&mut pdu_buf).await?;

        if let Some(response_pdu) = databank.handle_request(header.unit_id, &pdu_buf) {
            let response = mbap::pack(header.transaction_id, header.unit_id, &response_pdu);
            stream.write_all(&response).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::request::Request;
    use crate::databank::block::Space;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn start_then_stop_round_trips_cleanly() {
        let databank = Arc::new(Databank::new(true));
        let mut server = TcpServer::new(TcpServerConfig::with_port(0), Arc::clone(&databank));
        // port 0 means "any free port"; exercise start/stop, not connectivity.
        server.start().await.unwrap();
        assert!(server.is_running());
        server.stop().await.unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn stop_without_start_errors() {
        let databank = Arc::new(Databank::new(true));
        let mut server = TcpServer::new(TcpServerConfig::with_port(0), databank);
        assert!(server.stop().await.is_err());
    }

    #[tokio::test]
    async fn double_start_errors() {
        let databank = Arc::new(Databank::new(true));
        let mut server = TcpServer::new(TcpServerConfig::with_port(0), databank);
        server.start().await.unwrap();
        assert!(server.start().await.is_err());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn end_to_end_read_holding_registers() {
        let databank = Arc::new(Databank::new(true));
        databank.add_slave(1).unwrap();
        databank.add_block(1, "hr", Space::HoldingRegisters, 0, 10).unwrap();
        let values: Vec<u16> = (0..10).collect();
        databank.set_values_registers(1, "hr", 0, &values).unwrap();

        let mut server = TcpServer::new(TcpServerConfig::with_port(15502), Arc::clone(&databank));
        server.start().await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let mut stream = TcpStream::connect("127.0.0.1:15502").await.unwrap();
        let req = Request::ReadHoldingRegisters { start: 0, qty: 10 };
        let pdu = req.encode().unwrap();
        let frame = mbap::pack(1, 1, &pdu);
        stream.write_all(&frame).await.unwrap();

        let mut header_buf = [0u8; MBAP_HEADER_LEN];
        stream.read_exact(&mut header_buf).await.unwrap();
        let header = mbap::parse_header(&header_buf).unwrap();
        let mut body = vec![0u8; (header.length - 1) as usize];
        stream.read_exact(&mut body).await.unwrap();

        assert_eq!(body, vec![0x03, 20, 0, 0, 0, 1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0, 7, 0, 8, 0, 9]);

        server.stop().await.unwrap();
    }
}
