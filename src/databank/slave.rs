//! A single addressable unit: its blocks and the request dispatcher that
//! reads and writes them.

use std::collections::HashMap;

use crate::codec::exception::ExceptionCode;
use crate::codec::request::Request;
use crate::codec::response::Response;
use crate::databank::block::{Block, Space};
use crate::error::{ModbusError, ModbusResult};
use crate::hooks::{HookArgs, HookRegistry};

/// An 8-bit Modbus unit identifier. 0 is reserved for broadcast; 1..=247
/// are valid unicast addresses.
pub fn validate_unit_id(unit_id: u8) -> ModbusResult<()> {
    if unit_id == 0 || unit_id > 247 {
        return Err(ModbusError::InvalidArgument(format!(
            "unit id {unit_id} is not a valid unicast address (1..=247)"
        )));
    }
    Ok(())
}

pub struct Slave {
    unit_id: u8,
    unsigned_registers: bool,
    blocks: HashMap<String, Block>,
    order: HashMap<Space, Vec<String>>,
    exception_status: u8,
}

impl Slave {
    pub fn new(unit_id: u8) -> Slave {
        let mut order = HashMap::new();
        for space in Space::ALL {
            order.insert(space, Vec::new());
        }
        Slave {
            unit_id,
            unsigned_registers: true,
            blocks: HashMap::new(),
            order,
            exception_status: 0,
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn unsigned_registers(&self) -> bool {
        self.unsigned_registers
    }

    pub fn set_unsigned_registers(&mut self, unsigned: bool) {
        self.unsigned_registers = unsigned;
    }

    pub fn set_exception_status(&mut self, status: u8) {
        self.exception_status = status;
    }

    pub fn add_block(
        &mut self,
        name: impl Into<String>,
        space: Space,
        starting_address: u16,
        size: u32,
    ) -> ModbusResult<()> {
        let name = name.into();
        if self.blocks.contains_key(&name) {
            return Err(ModbusError::DuplicatedKey(name));
        }
        for existing_name in &self.order[&space] {
            let existing = &self.blocks[existing_name];
            if existing.overlaps(starting_address, size) {
                return Err(ModbusError::OverlapModbusBlock {
                    new: name,
                    existing: existing.name().to_string(),
                });
            }
        }
        let block = Block::new(name.clone(), space, starting_address, size)?;
        let order = self.order.get_mut(&space).expect("all spaces preinitialized");
        let insert_at = order
            .iter()
            .position(|n| self.blocks[n].starting_address() > starting_address)
            .unwrap_or(order.len());
        order.insert(insert_at, name.clone());
        self.blocks.insert(name, block);
        Ok(())
    }

    pub fn remove_block(&mut self, name: &str) -> ModbusResult<()> {
        let block = self
            .blocks
            .remove(name)
            .ok_or_else(|| ModbusError::MissingKey(name.to_string()))?;
        self.order
            .get_mut(&block.space())
            .expect("all spaces preinitialized")
            .retain(|n| n != name);
        Ok(())
    }

    pub fn remove_all_blocks(&mut self) {
        self.blocks.clear();
        for space in Space::ALL {
            self.order.get_mut(&space).expect("preinitialized").clear();
        }
    }

    pub fn get_values_bits(&self, name: &str, addr: u16, len: u32) -> ModbusResult<Vec<bool>> {
        self.blocks
            .get(name)
            .ok_or_else(|| ModbusError::MissingKey(name.to_string()))?
            .read_bits(addr, len)
    }

    pub fn set_values_bits(&mut self, name: &str, addr: u16, values: &[bool]) -> ModbusResult<()> {
        self.blocks
            .get_mut(name)
            .ok_or_else(|| ModbusError::MissingKey(name.to_string()))?
            .write_bits(addr, values)
    }

    pub fn get_values_registers(&self, name: &str, addr: u16, len: u32) -> ModbusResult<Vec<u16>> {
        self.blocks
            .get(name)
            .ok_or_else(|| ModbusError::MissingKey(name.to_string()))?
            .read_registers(addr, len)
    }

    pub fn set_values_registers(&mut self, name: &str, addr: u16, values: &[u16]) -> ModbusResult<()> {
        self.blocks
            .get_mut(name)
            .ok_or_else(|| ModbusError::MissingKey(name.to_string()))?
            .write_registers(addr, values)
    }

    /// Host-facing write path for signed 16-bit values. When
    /// `unsigned_registers` is set, a negative input is rejected instead of
    /// silently wrapping into the upper half of the `u16` range; when
    /// clear, it's accepted and stored as its two's-complement bit pattern.
    pub fn set_values_registers_signed(&mut self, name: &str, addr: u16, values: &[i16]) -> ModbusResult<()> {
        if self.unsigned_registers {
            if let Some(&negative) = values.iter().find(|&&v| v < 0) {
                return Err(ModbusError::InvalidArgument(format!(
                    "slave {} only accepts unsigned register values, got {negative}",
                    self.unit_id
                )));
            }
        }
        let values: Vec<u16> = values.iter().map(|&v| v as u16).collect();
        self.set_values_registers(name, addr, &values)
    }

    fn find_block(&self, space: Space, addr: u16, len: u32) -> ModbusResult<&Block> {
        self.order[&space]
            .iter()
            .map(|name| &self.blocks[name])
            .find(|block| {
                block.starting_address() <= addr && addr as u32 + len <= block.end_address()
            })
            .ok_or(ModbusError::Modbus(ExceptionCode::IllegalDataAddress))
    }

    fn find_block_mut(&mut self, space: Space, addr: u16, len: u32) -> ModbusResult<&mut Block> {
        let name = self
            .order[&space]
            .iter()
            .find(|name| {
                let block = &self.blocks[name.as_str()];
                block.starting_address() <= addr && addr as u32 + len <= block.end_address()
            })
            .cloned()
            .ok_or(ModbusError::Modbus(ExceptionCode::IllegalDataAddress))?;
        Ok(self.blocks.get_mut(&name).expect("just looked up"))
    }

    fn read_space_bits(&self, space: Space, addr: u16, qty: u16) -> ModbusResult<Vec<bool>> {
        let block = self.find_block(space, addr, qty as u32)?;
        block.read_bits(addr, qty as u32)
    }

    fn read_space_registers(&self, space: Space, addr: u16, qty: u16) -> ModbusResult<Vec<u16>> {
        let block = self.find_block(space, addr, qty as u32)?;
        block.read_registers(addr, qty as u32)
    }

    /// Write a single value at `space`/`addr`, honoring block boundaries.
    /// Used by the CSV snapshot loader, which restores raw values without
    /// going through PDU function-code semantics.
    pub fn write_single_bit(&mut self, space: Space, addr: u16, value: bool, hooks: &HookRegistry) -> ModbusResult<()> {
        self.write_space_bits(space, addr, &[value], hooks)
    }

    pub fn write_single_register(&mut self, space: Space, addr: u16, value: u16, hooks: &HookRegistry) -> ModbusResult<()> {
        self.write_space_registers(space, addr, &[value], hooks)
    }

    fn write_space_bits(
        &mut self,
        space: Space,
        addr: u16,
        values: &[bool],
        hooks: &HookRegistry,
    ) -> ModbusResult<()> {
        let block = self.find_block_mut(space, addr, values.len() as u32)?;
        hooks.call(HookArgs::BeforeWrite {
            unit_id: self.unit_id,
            space,
            address: addr,
        });
        block.write_bits(addr, values)?;
        for (i, value) in values.iter().enumerate() {
            hooks.call(HookArgs::AfterWrite {
                unit_id: self.unit_id,
                space,
                address: addr.wrapping_add(i as u16),
            });
        }
        Ok(())
    }

    fn write_space_registers(
        &mut self,
        space: Space,
        addr: u16,
        values: &[u16],
        hooks: &HookRegistry,
    ) -> ModbusResult<()> {
        let block = self.find_block_mut(space, addr, values.len() as u32)?;
        hooks.call(HookArgs::BeforeWrite {
            unit_id: self.unit_id,
            space,
            address: addr,
        });
        block.write_registers(addr, values)?;
        for (i, _) in values.iter().enumerate() {
            hooks.call(HookArgs::AfterWrite {
                unit_id: self.unit_id,
                space,
                address: addr.wrapping_add(i as u16),
            });
        }
        Ok(())
    }

    /// All `(address, value)` pairs across every block of `space`, in
    /// address order, with bit values represented as 0/1. Used by the CSV
    /// snapshot writer.
    pub fn iter_space_values(&self, space: Space) -> Vec<(u16, u32)> {
        let mut rows = Vec::new();
        for name in &self.order[&space] {
            let block = &self.blocks[name];
            let start = block.starting_address();
            let size = block.size();
            if space.is_bit_space() {
                let bits = block.read_bits(start, size).expect("in-bounds by construction");
                rows.extend(bits.into_iter().enumerate().map(|(i, b)| (start + i as u16, b as u32)));
            } else {
                let regs = block.read_registers(start, size).expect("in-bounds by construction");
                rows.extend(regs.into_iter().enumerate().map(|(i, v)| (start + i as u16, v as u32)));
            }
        }
        rows
    }

    /// Decode, execute, and encode the response for one PDU. Errors
    /// that map to a Modbus exception code are turned into an exception
    /// response; structural decode failures return `Err` so the caller can
    /// decide whether to drop the frame or answer with
    /// `SLAVE_DEVICE_FAILURE`.
    pub fn handle_pdu(&mut self, pdu: &[u8], hooks: &HookRegistry) -> ModbusResult<Vec<u8>> {
        let request = match Request::decode(pdu) {
            Ok(request) => request,
            Err(ModbusError::FunctionNotSupported(fc)) => {
                return Ok(Response::encode_exception(fc, ExceptionCode::IllegalFunction))
            }
            Err(ModbusError::Modbus(code)) => {
                let fc = *pdu.first().unwrap_or(&0);
                return Ok(Response::encode_exception(fc, code));
            }
            Err(other) => return Err(other),
        };

        let fc = request.function_code();
        let result = self.execute(&request, hooks);
        match result {
            Ok(response) => Ok(response.encode()),
            Err(err) => match err.as_exception_code() {
                Some(code) => Ok(Response::encode_exception(fc, code)),
                None => Err(err),
            },
        }
    }

    fn execute(&mut self, request: &Request, hooks: &HookRegistry) -> ModbusResult<Response> {
        match request {
            Request::ReadCoils { start, qty } => {
                let values = self.read_space_bits(Space::Coils, *start, *qty)?;
                Ok(Response::ReadCoils(values))
            }
            Request::ReadDiscreteInputs { start, qty } => {
                let values = self.read_space_bits(Space::DiscreteInputs, *start, *qty)?;
                Ok(Response::ReadDiscreteInputs(values))
            }
            Request::ReadHoldingRegisters { start, qty } => {
                let values = self.read_space_registers(Space::HoldingRegisters, *start, *qty)?;
                Ok(Response::ReadHoldingRegisters(values))
            }
            Request::ReadInputRegisters { start, qty } => {
                let values = self.read_space_registers(Space::InputRegisters, *start, *qty)?;
                Ok(Response::ReadInputRegisters(values))
            }
            Request::WriteSingleCoil { addr, value } => {
                self.write_space_bits(Space::Coils, *addr, &[*value], hooks)?;
                Ok(Response::WriteSingleCoil {
                    addr: *addr,
                    value: *value,
                })
            }
            Request::WriteSingleRegister { addr, value } => {
                self.write_space_registers(Space::HoldingRegisters, *addr, &[*value], hooks)?;
                Ok(Response::WriteSingleRegister {
                    addr: *addr,
                    value: *value,
                })
            }
            Request::WriteMultipleCoils { start, values } => {
                self.write_space_bits(Space::Coils, *start, values, hooks)?;
                Ok(Response::WriteMultipleCoils {
                    start: *start,
                    qty: values.len() as u16,
                })
            }
            Request::WriteMultipleRegisters { start, values } => {
                self.write_space_registers(Space::HoldingRegisters, *start, values, hooks)?;
                Ok(Response::WriteMultipleRegisters {
                    start: *start,
                    qty: values.len() as u16,
                })
            }
            Request::ReadWriteMultipleRegisters {
                read_start,
                read_qty,
                write_start,
                write_values,
            } => {
                self.write_space_registers(Space::HoldingRegisters, *write_start, write_values, hooks)?;
                let values = self.read_space_registers(Space::HoldingRegisters, *read_start, *read_qty)?;
                Ok(Response::ReadWriteMultipleRegisters(values))
            }
            Request::ReadExceptionStatus => Ok(Response::ReadExceptionStatus(self.exception_status)),
            Request::Diagnostic { sub_function, data } => {
                if *sub_function == 0x0000 {
                    Ok(Response::Diagnostic {
                        sub_function: *sub_function,
                        data: data.clone(),
                    })
                } else {
                    Err(ModbusError::Modbus(ExceptionCode::IllegalFunction))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookRegistry;

    #[test]
    fn add_block_rejects_duplicate_name() {
        let mut slave = Slave::new(1);
        slave.add_block("hr", Space::HoldingRegisters, 0, 10).unwrap();
        assert!(matches!(
            slave.add_block("hr", Space::HoldingRegisters, 100, 10),
            Err(ModbusError::DuplicatedKey(_))
        ));
    }

    #[test]
    fn add_block_rejects_overlap_in_same_space() {
        let mut slave = Slave::new(1);
        slave.add_block("a", Space::HoldingRegisters, 0, 100).unwrap();
        assert!(matches!(
            slave.add_block("b", Space::HoldingRegisters, 50, 100),
            Err(ModbusError::OverlapModbusBlock { .. })
        ));
    }

    #[test]
    fn add_block_allows_same_range_in_different_space() {
        let mut slave = Slave::new(1);
        slave.add_block("coils", Space::Coils, 0, 100).unwrap();
        assert!(slave.add_block("di", Space::DiscreteInputs, 0, 100).is_ok());
    }

    #[test]
    fn read_across_adjacent_blocks_is_illegal_address() {
        let mut slave = Slave::new(1);
        slave.add_block("a", Space::HoldingRegisters, 0, 100).unwrap();
        slave.add_block("b", Space::HoldingRegisters, 100, 100).unwrap();
        let hooks = HookRegistry::new();
        let req = Request::ReadHoldingRegisters { start: 50, qty: 100 };
        let err = slave.execute(&req, &hooks).unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Modbus(ExceptionCode::IllegalDataAddress)
        ));
    }

    #[test]
    fn read_holding_registers_happy_path_round_trips() {
        let mut slave = Slave::new(1);
        slave.add_block("hr", Space::HoldingRegisters, 0, 100).unwrap();
        let values: Vec<u16> = (0..100).collect();
        slave.set_values_registers("hr", 0, &values).unwrap();
        let hooks = HookRegistry::new();
        let req = Request::ReadHoldingRegisters { start: 0, qty: 100 };
        let response = slave.execute(&req, &hooks).unwrap();
        assert_eq!(response, Response::ReadHoldingRegisters(values));
    }

    #[test]
    fn write_multiple_coils_packs_and_stores_bits() {
        let mut slave = Slave::new(1);
        slave.add_block("coils", Space::Coils, 0, 8).unwrap();
        let hooks = HookRegistry::new();
        let bits = vec![false, false, true, true, false, false, true, true];
        let req = Request::WriteMultipleCoils { start: 0, values: bits.clone() };
        let response = slave.execute(&req, &hooks).unwrap();
        assert_eq!(response, Response::WriteMultipleCoils { start: 0, qty: 8 });
        assert_eq!(slave.get_values_bits("coils", 0, 8).unwrap(), bits);
    }

    #[test]
    fn handle_pdu_returns_exception_bytes_for_unknown_function() {
        let mut slave = Slave::new(1);
        let hooks = HookRegistry::new();
        let response = slave.handle_pdu(&[0x99, 0x00], &hooks).unwrap();
        assert_eq!(response, vec![0x99 | 0x80, 0x01]);
    }

    #[test]
    fn handle_pdu_rejects_invalid_coil_value() {
        let mut slave = Slave::new(1);
        slave.add_block("coils", Space::Coils, 0, 8).unwrap();
        let hooks = HookRegistry::new();
        let pdu = [0x05, 0x00, 0x00, 0x00, 0x01];
        let response = slave.handle_pdu(&pdu, &hooks).unwrap();
        assert_eq!(response, vec![0x85, 0x03]);
    }

    #[test]
    fn remove_block_then_missing_name_errors() {
        let mut slave = Slave::new(1);
        slave.add_block("hr", Space::HoldingRegisters, 0, 10).unwrap();
        slave.remove_block("hr").unwrap();
        assert!(matches!(
            slave.get_values_registers("hr", 0, 1),
            Err(ModbusError::MissingKey(_))
        ));
    }

    #[test]
    fn signed_write_rejects_negative_when_unsigned_registers_is_set() {
        let mut slave = Slave::new(1);
        slave.add_block("hr", Space::HoldingRegisters, 0, 10).unwrap();
        assert!(slave.unsigned_registers());
        assert!(slave.set_values_registers_signed("hr", 0, &[-1]).is_err());
    }

    #[test]
    fn signed_write_accepts_negative_when_unsigned_registers_is_cleared() {
        let mut slave = Slave::new(1);
        slave.add_block("hr", Space::HoldingRegisters, 0, 10).unwrap();
        slave.set_unsigned_registers(false);
        slave.set_values_registers_signed("hr", 0, &[-1, 1000]).unwrap();
        assert_eq!(slave.get_values_registers("hr", 0, 2).unwrap(), vec![0xFFFF, 1000]);
    }
}
