//! The server-side store of slaves and the request entry point.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::codec::exception::ExceptionCode;
use crate::codec::request::Request;
use crate::codec::response::Response;
use crate::databank::block::Space;
use crate::databank::slave::{validate_unit_id, Slave};
use crate::error::{ModbusError, ModbusResult};
use crate::hooks::HookRegistry;

/// Owns `unit_id -> Slave` and the policy for addressing an unconfigured
/// unit id. Lock order is databank -> slave: the map lock is only ever
/// held while looking a slave up, never while a per-slave operation runs.
pub struct Databank {
    slaves: RwLock<HashMap<u8, Arc<Mutex<Slave>>>>,
    error_on_missing_slave: bool,
    hooks: Arc<HookRegistry>,
}

impl Databank {
    pub fn new(error_on_missing_slave: bool) -> Databank {
        Databank {
            slaves: RwLock::new(HashMap::new()),
            error_on_missing_slave,
            hooks: Arc::new(HookRegistry::new()),
        }
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn add_slave(&self, unit_id: u8) -> ModbusResult<()> {
        validate_unit_id(unit_id)?;
        let mut slaves = self.slaves.write();
        if slaves.contains_key(&unit_id) {
            return Err(ModbusError::DuplicatedKey(format!("slave {unit_id}")));
        }
        slaves.insert(unit_id, Arc::new(Mutex::new(Slave::new(unit_id))));
        Ok(())
    }

    pub fn get_slave(&self, unit_id: u8) -> ModbusResult<Arc<Mutex<Slave>>> {
        self.slaves
            .read()
            .get(&unit_id)
            .cloned()
            .ok_or_else(|| ModbusError::MissingKey(format!("slave {unit_id}")))
    }

    pub fn remove_slave(&self, unit_id: u8) -> ModbusResult<()> {
        self.slaves
            .write()
            .remove(&unit_id)
            .map(|_| ())
            .ok_or_else(|| ModbusError::MissingKey(format!("slave {unit_id}")))
    }

    pub fn remove_all_slaves(&self) {
        self.slaves.write().clear();
    }

    pub fn unit_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.slaves.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn add_block(
        &self,
        unit_id: u8,
        name: impl Into<String>,
        space: Space,
        starting_address: u16,
        size: u32,
    ) -> ModbusResult<()> {
        let slave = self.get_slave(unit_id)?;
        slave.lock().add_block(name, space, starting_address, size)
    }

    pub fn set_values_registers(&self, unit_id: u8, name: &str, addr: u16, values: &[u16]) -> ModbusResult<()> {
        let slave = self.get_slave(unit_id)?;
        slave.lock().set_values_registers(name, addr, values)
    }

    pub fn get_values_registers(&self, unit_id: u8, name: &str, addr: u16, len: u32) -> ModbusResult<Vec<u16>> {
        let slave = self.get_slave(unit_id)?;
        slave.lock().get_values_registers(name, addr, len)
    }

    pub fn set_values_registers_signed(&self, unit_id: u8, name: &str, addr: u16, values: &[i16]) -> ModbusResult<()> {
        let slave = self.get_slave(unit_id)?;
        slave.lock().set_values_registers_signed(name, addr, values)
    }

    pub fn set_values_bits(&self, unit_id: u8, name: &str, addr: u16, values: &[bool]) -> ModbusResult<()> {
        let slave = self.get_slave(unit_id)?;
        slave.lock().set_values_bits(name, addr, values)
    }

    pub fn get_values_bits(&self, unit_id: u8, name: &str, addr: u16, len: u32) -> ModbusResult<Vec<bool>> {
        let slave = self.get_slave(unit_id)?;
        slave.lock().get_values_bits(name, addr, len)
    }

    /// Write a single value at `space`/`addr` on `unit_id`, bypassing block
    /// names. Used by the CSV snapshot loader.
    pub fn write_single_bit(&self, unit_id: u8, space: Space, addr: u16, value: bool) -> ModbusResult<()> {
        let slave = self.get_slave(unit_id)?;
        slave.lock().write_single_bit(space, addr, value, &self.hooks)
    }

    pub fn write_single_register(&self, unit_id: u8, space: Space, addr: u16, value: u16) -> ModbusResult<()> {
        let slave = self.get_slave(unit_id)?;
        slave.lock().write_single_register(space, addr, value, &self.hooks)
    }

    /// Snapshot every configured block's current values as `(unit_id,
    /// space, address, value)` rows, bits and registers alike with their
    /// numeric value (0/1 for bits).
    pub fn snapshot_rows(&self) -> Vec<(u8, Space, u16, u32)> {
        let mut rows = Vec::new();
        for unit_id in self.unit_ids() {
            let slave = self.get_slave(unit_id).expect("just listed");
            let slave = slave.lock();
            for space in Space::ALL {
                for (addr, value) in slave.iter_space_values(space) {
                    rows.push((unit_id, space, addr, value));
                }
            }
        }
        rows
    }

    /// Dispatch one received PDU addressed to `unit_id`. Returns
    /// `Some(response_pdu)` when a reply should be sent on the wire, or
    /// `None` when none should (broadcast, or an unconfigured slave under a
    /// drop-silently policy).
    pub fn handle_request(&self, unit_id: u8, pdu: &[u8]) -> Option<Vec<u8>> {
        if unit_id == 0 {
            let slaves: Vec<_> = self.slaves.read().values().cloned().collect();
            for slave in slaves {
                let _ = slave.lock().handle_pdu(pdu, &self.hooks);
            }
            return None;
        }

        match self.get_slave(unit_id) {
            Ok(slave) => match slave.lock().handle_pdu(pdu, &self.hooks) {
                Ok(response_bytes) => Some(response_bytes),
                Err(_) => {
                    let fc = *pdu.first().unwrap_or(&0);
                    Some(Response::encode_exception(fc, ExceptionCode::SlaveDeviceFailure))
                }
            },
            Err(_) if self.error_on_missing_slave => {
                let fc = *pdu.first().unwrap_or(&0);
                Some(Response::encode_exception(fc, ExceptionCode::SlaveDeviceFailure))
            }
            Err(_) => None,
        }
    }
}

/// Used by the master-side broadcast guard: `execute(0, READ_*)` must never
/// be sent on the wire, since a broadcast request expects no reply.
pub fn reject_broadcast_read(unit_id: u8, request: &Request) -> ModbusResult<()> {
    if unit_id == 0 && request.is_read() {
        Err(ModbusError::InvalidRequest(
            "broadcast reads are not meaningful: no response is expected".into(),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_slave_rejects_reserved_broadcast_id() {
        let bank = Databank::new(true);
        assert!(bank.add_slave(0).is_err());
    }

    #[test]
    fn add_slave_rejects_duplicate() {
        let bank = Databank::new(true);
        bank.add_slave(1).unwrap();
        assert!(bank.add_slave(1).is_err());
    }

    #[test]
    fn handle_request_for_missing_slave_with_policy_on_replies_failure() {
        let bank = Databank::new(true);
        let pdu = [0x03, 0x00, 0x00, 0x00, 0x01];
        let response = bank.handle_request(9, &pdu).unwrap();
        assert_eq!(response, vec![0x83, 0x04]);
    }

    #[test]
    fn handle_request_for_missing_slave_with_policy_off_drops() {
        let bank = Databank::new(false);
        let pdu = [0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(bank.handle_request(9, &pdu), None);
    }

    #[test]
    fn broadcast_write_updates_every_registered_slave() {
        let bank = Databank::new(true);
        bank.add_slave(1).unwrap();
        bank.add_slave(5).unwrap();
        bank.add_block(1, "hr", Space::HoldingRegisters, 5000, 50).unwrap();
        bank.add_block(5, "hr", Space::HoldingRegisters, 5000, 50).unwrap();

        let values: Vec<u16> = (0..20).collect();
        let req = Request::WriteMultipleRegisters { start: 5000, values: values.clone() };
        let pdu = req.encode().unwrap();
        assert_eq!(bank.handle_request(0, &pdu), None);

        assert_eq!(bank.get_values_registers(1, "hr", 5000, 20).unwrap(), values);
        assert_eq!(bank.get_values_registers(5, "hr", 5000, 20).unwrap(), values);
    }

    #[test]
    fn broadcast_read_is_rejected_before_transmission() {
        let req = Request::ReadHoldingRegisters { start: 0, qty: 1 };
        assert!(reject_broadcast_read(0, &req).is_err());
        assert!(reject_broadcast_read(1, &req).is_ok());
    }

    #[test]
    fn handle_request_end_to_end_reads_holding_registers() {
        let bank = Databank::new(true);
        bank.add_slave(1).unwrap();
        bank.add_block(1, "hr", Space::HoldingRegisters, 0, 100).unwrap();
        let values: Vec<u16> = (0..100).collect();
        bank.set_values_registers(1, "hr", 0, &values).unwrap();

        let req = Request::ReadHoldingRegisters { start: 0, qty: 100 };
        let pdu = req.encode().unwrap();
        let response_pdu = bank.handle_request(1, &pdu).unwrap();
        let response = Response::decode(&req, &response_pdu).unwrap();
        assert_eq!(response, Response::ReadHoldingRegisters(values));
    }
}
