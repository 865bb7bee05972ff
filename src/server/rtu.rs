//! Modbus RTU server: a single dedicated task owning the serial port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use serialport::SerialPort;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::crc::inter_char_timeout;
use crate::databank::databank::Databank;
use crate::error::{ModbusError, ModbusResult};
use crate::transport::rtu_framer;

const READ_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RtuParity {
    #[default]
    None,
    Odd,
    Even,
}

impl From<RtuParity> for Parity {
    fn from(p: RtuParity) -> Parity {
        match p {
            RtuParity::None => Parity::None,
            RtuParity::Odd => Parity::Odd,
            RtuParity::Even => Parity::Even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RtuStopBits {
    #[default]
    One,
    Two,
}

impl From<RtuStopBits> for StopBits {
    fn from(s: RtuStopBits) -> StopBits {
        match s {
            RtuStopBits::One => StopBits::One,
            RtuStopBits::Two => StopBits::Two,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RtuDataBits {
    Seven,
    #[default]
    Eight,
}

impl From<RtuDataBits> for DataBits {
    fn from(d: RtuDataBits) -> DataBits {
        match d {
            RtuDataBits::Seven => DataBits::Seven,
            RtuDataBits::Eight => DataBits::Eight,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtuServerConfig {
    pub port_path: String,
    pub baud_rate: u32,
    pub parity: RtuParity,
    pub stop_bits: RtuStopBits,
    pub data_bits: RtuDataBits,
}

impl RtuServerConfig {
    pub fn new(port_path: impl Into<String>, baud_rate: u32) -> RtuServerConfig {
        RtuServerConfig {
            port_path: port_path.into(),
            baud_rate,
            parity: RtuParity::None,
            stop_bits: RtuStopBits::One,
            data_bits: RtuDataBits::Eight,
        }
    }
}

/// A running (or stopped) Modbus RTU server over a shared [`Databank`].
pub struct RtuServer {
    config: RtuServerConfig,
    databank: Arc<Databank>,
    running: Arc<AtomicBool>,
    port: Arc<AsyncMutex<Option<SerialStream>>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
    verbose: Arc<AtomicBool>,
}

impl RtuServer {
    pub fn new(config: RtuServerConfig, databank: Arc<Databank>) -> RtuServer {
        RtuServer {
            config,
            databank,
            running: Arc::new(AtomicBool::new(false)),
            port: Arc::new(AsyncMutex::new(None)),
            task_handle: None,
            verbose: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &RtuServerConfig {
        &self.config
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

        let stream = tokio_serial::new(&self.config.port_path, self.config.baud_rate)
            .parity(self.config.parity.into())
            .stop_bits(self.config.stop_bits.into())
            .data_bits(self.config.data_bits.into())
            .open_native_async()
            .map_err(|err| ModbusError::BindFailed(format!("{}: {err}", self.config.port_path)))?;

        log::info!(
            "modbus rtu server started on {} at {} baud",
            self.config.port_path,
            self.config.baud_rate
        );

        *self.port.lock().await = Some(stream);
        self.running.store(true, Ordering::SeqCst);

        let databank = Arc::clone(&self.databank);
        let running = Arc::clone(&self.running);
        let port = Arc::clone(&self.port);
        let verbose = Arc::clone(&self.verbose);
        let gap = inter_char_timeout(self.config.baud_rate);

        self.task_handle = Some(tokio::spawn(async move {
            rtu_loop(port, databank, running, gap, verbose).await;
        }));

        Ok(())
    }

    pub async fn stop(&mut self) -> ModbusResult<()> {
        if !self.is_running() {
            return Err(ModbusError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.task_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        *self.port.lock().await = None;
        log::info!("modbus rtu server stopped");
        Ok(())
    }
}

async fn rtu_loop(
    port: Arc<AsyncMutex<Option<SerialStream>>>,
    databank: Arc<Databank>,
    running: Arc<AtomicBool>,
    gap: Duration,
    verbose: Arc<AtomicBool>,
) {
    let mut chunk = [0u8; READ_CHUNK];
    let mut frame_buffer = Vec::with_capacity(READ_CHUNK);

    while running.load(Ordering::SeqCst) {
        let read_result = {
            let mut guard = port.lock().await;
            match guard.as_mut() {
                Some(stream) => match tokio::time::timeout(gap, stream.read(&mut chunk)).await {
                    Ok(Ok(n)) => Some(Ok(n)),
                    Ok(Err(err)) => Some(Err(err)),
                    Err(_) => None,
                },
                None => break,
            }
        };

        match read_result {
            Some(Ok(0)) => {}
            Some(Ok(n)) => frame_buffer.extend_from_slice(&chunk[..n]),
            Some(Err(err)) => {
                log::error!("serial read error: {err}");
                frame_buffer.clear();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            None => {
                if !frame_buffer.is_empty() {
                    match rtu_framer::parse_frame(&frame_buffer) {
                        Ok((address, pdu)) => {
                            if let Some(response_pdu) = databank.handle_request(address, &pdu) {
                                let response_frame = rtu_framer::build_frame(address, &response_pdu);
                                let mut guard = port.lock().await;
                                if let Some(stream) = guard.as_mut() {
                                    // If bytes are already waiting, the peer has
                                    // given up on this exchange; don't answer.
                                    let pending = stream.bytes_to_read().unwrap_or(0);
                                    if pending == 0 {
                                        if let Err(err) = stream.write_all(&response_frame).await {
                                            log::error!("serial write error: {err}");
                                        }
                                    } else if verbose.load(Ordering::Relaxed) {
                                        log::debug!("dropping stale response, new bytes already pending");
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            if verbose.load(Ordering::Relaxed) {
                                log::debug!("dropping invalid RTU frame: {err}");
                            }
                        }
                    }
                }
                frame_buffer.clear();
            }
        }
    }

    log::info!("rtu server loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtu_parity_converts_to_tokio_serial_parity() {
        assert_eq!(Parity::from(RtuParity::None), Parity::None);
        assert_eq!(Parity::from(RtuParity::Odd), Parity::Odd);
        assert_eq!(Parity::from(RtuParity::Even), Parity::Even);
    }

    #[test]
    fn rtu_server_config_defaults_to_8n1() {
        let config = RtuServerConfig::new("/dev/ttyUSB0", 9600);
        assert_eq!(config.data_bits, RtuDataBits::Eight);
        assert_eq!(config.stop_bits, RtuStopBits::One);
        assert_eq!(config.parity, RtuParity::None);
    }

    #[tokio::test]
    async fn stop_without_start_errors() {
        let databank = Arc::new(Databank::new(true));
        let mut server = RtuServer::new(RtuServerConfig::new("/dev/ttyUSB0", 9600), databank);
        assert!(server.stop().await.is_err());
    }
}
