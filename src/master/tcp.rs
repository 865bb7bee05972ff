//! Modbus/TCP master, built on MBAP framing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::codec::request::Request;
use crate::codec::response::Response;
use crate::databank::databank::reject_broadcast_read;
use crate::error::{ModbusError, ModbusResult};
use crate::hooks::{HookArgs, HookRegistry};
use crate::transport::mbap::{self, TransactionIdGenerator, MBAP_HEADER_LEN};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// One in-flight request at a time, lazily-opened `TcpStream`, a single
/// reconnect attempt on send failure.
pub struct TcpMaster {
    address: String,
    conn: AsyncMutex<Option<TcpStream>>,
    tx_id: TransactionIdGenerator,
    timeout: SyncMutex<Duration>,
    verbose: AtomicBool,
    hooks: Arc<HookRegistry>,
}

impl TcpMaster {
    pub fn new(address: impl Into<String>) -> TcpMaster {
        TcpMaster {
            address: address.into(),
            conn: AsyncMutex::new(None),
            tx_id: TransactionIdGenerator::new(),
            timeout: SyncMutex::new(DEFAULT_TIMEOUT),
            verbose: AtomicBool::new(false),
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

    /// Open the connection now rather than lazily on the next `execute`.
    pub async fn open(&self) -> ModbusResult<()> {
        let mut conn = self.conn.lock().await;
        if conn.is_none() {
            *conn = Some(TcpStream::connect(&self.address).await?);
        }
        Ok(())
    }

    pub async fn close(&self) {
        *self.conn.lock().await = None;
    }

    /// Send `request` to `unit_id` and return the decoded response, or
    /// `None` for a broadcast write (which expects no reply).
    pub async fn execute(&self, unit_id: u8, request: Request) -> ModbusResult<Option<Response>> {
        reject_broadcast_read(unit_id, &request)?;
        let pdu = request.encode()?;
        let transaction_id = self.tx_id.next();
        let mut frame = mbap::pack(transaction_id, unit_id, &pdu);
        if let Some(replacement) = self.hooks.call(HookArgs::BeforeSend { buffer: frame.clone() }) {
            frame = replacement;
        }

        let mut conn = self.conn.lock().await;
        if conn.is_none() {
            *conn = Some(TcpStream::connect(&self.address).await?);
        }

        if conn.as_mut().unwrap().write_all(&frame).await.is_err() {
            if self.verbose.load(Ordering::Relaxed) {
                log::warn!("tcp master: send failed, reconnecting to {}", self.address);
            }
            *conn = Some(TcpStream::connect(&self.address).await?);
            conn.as_mut().unwrap().write_all(&frame).await?;
        }
        self.hooks.call(HookArgs::AfterSend { buffer: frame });

        if unit_id == 0 {
            return Ok(None);
        }

        self.hooks.call(HookArgs::BeforeReceive);
        let timeout = *self.timeout.lock();
        let stream = conn.as_mut().unwrap();

        let mut header_buf = [0u8; MBAP_HEADER_LEN];
        tokio::time::timeout(timeout, stream.read_exact(&mut header_buf))
            .await
            .map_err(|_| ModbusError::Timeout)??;
        let header = mbap::parse_header(&header_buf)?;
        let pdu_len = header.length.saturating_sub(1) as usize;
        let mut pdu_buf = vec![0u8; pdu_len];
        tokio::time::timeout(timeout, stream.read_exact(&mut pdu_buf))
            .await
            .map_err(|_| ModbusError::Timeout)??;

        let mut full_frame = header_buf.to_vec();
        full_frame.extend_from_slice(&pdu_buf);
        let mut response_pdu = mbap::parse_response(transaction_id, unit_id, &full_frame)?;
        if let Some(replacement) = self.hooks.call(HookArgs::AfterReceive { buffer: response_pdu.clone() }) {
            response_pdu = replacement;
        }

        Response::decode(&request, &response_pdu).map(Some)
    }

    pub async fn read_coils(&self, unit_id: u8, start: u16, qty: u16) -> ModbusResult<Vec<bool>> {
        match self.execute(unit_id, Request::ReadCoils { start, qty }).await?.unwrap() {
            Response::ReadCoils(values) => Ok(values),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn read_discrete_inputs(&self, unit_id: u8, start: u16, qty: u16) -> ModbusResult<Vec<bool>> {
        match self
            .execute(unit_id, Request::ReadDiscreteInputs { start, qty })
            .await?
            .unwrap()
        {
            Response::ReadDiscreteInputs(values) => Ok(values),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn read_holding_registers(&self, unit_id: u8, start: u16, qty: u16) -> ModbusResult<Vec<u16>> {
        match self
            .execute(unit_id, Request::ReadHoldingRegisters { start, qty })
            .await?
            .unwrap()
        {
            Response::ReadHoldingRegisters(values) => Ok(values),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn read_input_registers(&self, unit_id: u8, start: u16, qty: u16) -> ModbusResult<Vec<u16>> {
        match self
            .execute(unit_id, Request::ReadInputRegisters { start, qty })
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
    pub async fn write_single_coil(&self, unit_id: u8, addr: u16, value: bool) -> ModbusResult<(u16, bool)> {
        let response = self.execute(unit_id, Request::WriteSingleCoil { addr, value }).await?;
        if unit_id == 0 {
            return Ok((addr, value));
        }
        match response.unwrap() {
            Response::WriteSingleCoil { addr, value } => Ok((addr, value)),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn write_single_register(&self, unit_id: u8, addr: u16, value: u16) -> ModbusResult<(u16, u16)> {
        let response = self
            .execute(unit_id, Request::WriteSingleRegister { addr, value })
            .await?;
        if unit_id == 0 {
            return Ok((addr, value));
        }
        match response.unwrap() {
            Response::WriteSingleRegister { addr, value } => Ok((addr, value)),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn write_multiple_coils(&self, unit_id: u8, start: u16, values: Vec<bool>) -> ModbusResult<()> {
        let response = self
            .execute(unit_id, Request::WriteMultipleCoils { start, values })
            .await?;
        if unit_id == 0 {
            return Ok(());
        }
        match response.unwrap() {
            Response::WriteMultipleCoils { .. } => Ok(()),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn write_multiple_registers(&self, unit_id: u8, start: u16, values: Vec<u16>) -> ModbusResult<()> {
        let response = self
            .execute(unit_id, Request::WriteMultipleRegisters { start, values })
            .await?;
        if unit_id == 0 {
            return Ok(());
        }
        match response.unwrap() {
            Response::WriteMultipleRegisters { .. } => Ok(()),
            other => Err(unexpected_response(other)),
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
        let master = TcpMaster::new("127.0.0.1:1"); // never actually connected
        let err = master
            .execute(0, Request::ReadCoils { start: 0, qty: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidRequest(_)));
    }

    #[test]
    fn set_timeout_updates_stored_duration() {
        let master = TcpMaster::new("127.0.0.1:502");
        master.set_timeout(Duration::from_millis(250));
        assert_eq!(*master.timeout.lock(), Duration::from_millis(250));
    }
}
