//! Modbus RTU master, built on address+CRC framing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::codec::request::Request;
use crate::codec::response::Response;
use crate::crc::inter_char_timeout;
use crate::databank::databank::reject_broadcast_read;
use crate::error::{ModbusError, ModbusResult};
use crate::hooks::{HookArgs, HookRegistry};
use crate::transport::rtu_framer;

const MIN_RESPONSE_LEN: usize = 4; // address + fc + crc(2)
const READ_CHUNK: usize = 256;

/// One in-flight request at a time, lazily-opened serial port, a single
/// reconnect attempt on send failure.
pub struct RtuMaster {
    port_path: String,
    baud_rate: u32,
    port: AsyncMutex<Option<SerialStream>>,
    timeout: SyncMutex<Duration>,
    verbose: AtomicBool,
    handle_local_echo: AtomicBool,
    hooks: Arc<HookRegistry>,
}

impl RtuMaster {
    pub fn new(port_path: impl Into<String>, baud_rate: u32) -> RtuMaster {
        RtuMaster {
            port_path: port_path.into(),
            baud_rate,
            port: AsyncMutex::new(None),
            timeout: SyncMutex::new(Duration::from_secs(1)),
            verbose: AtomicBool::new(false),
            handle_local_echo: AtomicBool::new(false),
            hooks: Arc::new(HookRegistry::new()),
        }
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// For half-duplex RS-485 adapters that loop the transmitted bytes back
    /// onto the receive line: after writing, read and discard that many
    /// bytes before waiting for the real response.
    pub fn set_handle_local_echo(&self, enabled: bool) {
        self.handle_local_echo.store(enabled, Ordering::Relaxed);
    }

    fn open_port(&self) -> ModbusResult<SerialStream> {
        tokio_serial::new(&self.port_path, self.baud_rate)
            .open_native_async()
            .map_err(ModbusError::SerialPort)
    }

    pub async fn open(&self) -> ModbusResult<()> {
        let mut port = self.port.lock().await;
        if port.is_none() {
            *port = Some(self.open_port()?);
        }
        Ok(())
    }

    pub async fn close(&self) {
        *self.port.lock().await = None;
    }

    /// Send `request` to `address` and return the decoded response, or
    /// `None` for a broadcast (address 0, no response expected).
    pub async fn execute(&self, address: u8, request: Request) -> ModbusResult<Option<Response>> {
        reject_broadcast_read(address, &request)?;
        let pdu = request.encode()?;
        let mut frame = rtu_framer::build_frame(address, &pdu);
        if let Some(replacement) = self.hooks.call(HookArgs::BeforeSend { buffer: frame.clone() }) {
            frame = replacement;
        }

        let mut port = self.port.lock().await;
        if port.is_none() {
            *port = Some(self.open_port()?);
        }

        if port.as_mut().unwrap().write_all(&frame).await.is_err() {
            if self.verbose.load(Ordering::Relaxed) {
                log::warn!("rtu master: send failed, reopening {}", self.port_path);
            }
            *port = Some(self.open_port()?);
            port.as_mut().unwrap().write_all(&frame).await?;
        }
        self.hooks.call(HookArgs::AfterSend { buffer: frame.clone() });

        if address == 0 {
            return Ok(None);
        }

        let stream = port.as_mut().unwrap();

        if self.handle_local_echo.load(Ordering::Relaxed) {
            let mut discard = vec![0u8; frame.len()];
            stream.read_exact(&mut discard).await?;
        }

        self.hooks.call(HookArgs::BeforeReceive);
        let expected_len = request.expected_response_len().unwrap_or(MIN_RESPONSE_LEN) + 3; // +address +crc(2)
        let gap = inter_char_timeout(self.baud_rate);
        let overall_timeout = *self.timeout.lock();

        let raw = tokio::time::timeout(overall_timeout, read_until_idle(stream, expected_len, gap))
            .await
            .map_err(|_| ModbusError::Timeout)??;

        let mut response_pdu = rtu_framer::parse_response(address, &raw)?;
        if let Some(replacement) = self.hooks.call(HookArgs::AfterReceive { buffer: response_pdu.clone() }) {
            response_pdu = replacement;
        }

        Response::decode(&request, &response_pdu).map(Some)
    }

    pub async fn read_coils(&self, address: u8, start: u16, qty: u16) -> ModbusResult<Vec<bool>> {
        match self.execute(address, Request::ReadCoils { start, qty }).await?.unwrap() {
            Response::ReadCoils(values) => Ok(values),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn read_discrete_inputs(&self, address: u8, start: u16, qty: u16) -> ModbusResult<Vec<bool>> {
        match self
            .execute(address, Request::ReadDiscreteInputs { start, qty })
            .await?
            .unwrap()
        {
            Response::ReadDiscreteInputs(values) => Ok(values),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn read_holding_registers(&self, address: u8, start: u16, qty: u16) -> ModbusResult<Vec<u16>> {
        match self
            .execute(address, Request::ReadHoldingRegisters { start, qty })
            .await?
            .unwrap()
        {
            Response::ReadHoldingRegisters(values) => Ok(values),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn read_input_registers(&self, address: u8, start: u16, qty: u16) -> ModbusResult<Vec<u16>> {
        match self
            .execute(address, Request::ReadInputRegisters { start, qty })
            .await?
            .unwrap()
        {
            Response::ReadInputRegisters(values) => Ok(values),
            other => Err(unexpected_response(other)),
        }
    }

    /// Returns the decoded echo `(address, value)` pair; `Response::raw_body()`
    /// on a matched response exposes the exact wire bytes for callers that
    /// need them verbatim.
    pub async fn write_single_coil(&self, address: u8, addr: u16, value: bool) -> ModbusResult<(u16, bool)> {
        let response = self.execute(address, Request::WriteSingleCoil { addr, value }).await?;
        if address == 0 {
            return Ok((addr, value));
        }
        match response.unwrap() {
            Response::WriteSingleCoil { addr, value } => Ok((addr, value)),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn write_single_register(&self, address: u8, addr: u16, value: u16) -> ModbusResult<(u16, u16)> {
        let response = self
            .execute(address, Request::WriteSingleRegister { addr, value })
            .await?;
        if address == 0 {
            return Ok((addr, value));
        }
        match response.unwrap() {
            Response::WriteSingleRegister { addr, value } => Ok((addr, value)),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn write_multiple_coils(&self, address: u8, start: u16, values: Vec<bool>) -> ModbusResult<()> {
        let response = self
            .execute(address, Request::WriteMultipleCoils { start, values })
            .await?;
        if address == 0 {
            return Ok(());
        }
        match response.unwrap() {
            Response::WriteMultipleCoils { .. } => Ok(()),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn write_multiple_registers(&self, address: u8, start: u16, values: Vec<u16>) -> ModbusResult<()> {
        let response = self
            .execute(address, Request::WriteMultipleRegisters { start, values })
            .await?;
        if address == 0 {
            return Ok(());
        }
        match response.unwrap() {
            Response::WriteMultipleRegisters { .. } => Ok(()),
            other => Err(unexpected_response(other)),
        }
    }
}

/// Read bytes off `stream` until either `expected_len` bytes have arrived or
/// the inter-character `gap` elapses with no new data.
async fn read_until_idle(stream: &mut SerialStream, expected_len: usize, gap: Duration) -> ModbusResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(expected_len.max(READ_CHUNK));
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if buf.len() >= expected_len {
            return Ok(buf);
        }
        match tokio::time::timeout(gap, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => {
                if buf.is_empty() {
                    return Err(ModbusError::InvalidResponse("serial port closed".into()));
                }
                return Ok(buf);
            }
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(err)) => return Err(ModbusError::Io(err)),
            Err(_) => {
                if buf.is_empty() {
                    return Err(ModbusError::Timeout);
                }
                return Ok(buf);
            }
        }
    }
}

fn unexpected_response(response: Response) -> ModbusError {
    ModbusError::InvalidResponse(format!("unexpected response variant for request: {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_read_coils_is_rejected_before_any_io() {
        // Never actually opens a port: the broadcast-read guard runs first.
        let master = RtuMaster::new("/dev/null", 9600);
        let err = master
            .execute(0, Request::ReadCoils { start: 0, qty: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidRequest(_)));
    }

    #[test]
    fn set_timeout_updates_stored_duration() {
        let master = RtuMaster::new("/dev/ttyUSB0", 9600);
        master.set_timeout(Duration::from_millis(250));
        assert_eq!(*master.timeout.lock(), Duration::from_millis(250));
    }

    #[test]
    fn handle_local_echo_defaults_to_off() {
        let master = RtuMaster::new("/dev/ttyUSB0", 9600);
        assert!(!master.handle_local_echo.load(Ordering::Relaxed));
        master.set_handle_local_echo(true);
        assert!(master.handle_local_echo.load(Ordering::Relaxed));
    }
}
