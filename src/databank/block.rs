//! A single contiguous, typed address range.

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};

/// The four logical Modbus address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Space {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
}

impl Space {
    /// Coils and discrete inputs are 1-bit; holding and input registers
    /// are 16-bit words.
    pub fn is_bit_space(self) -> bool {
        matches!(self, Space::Coils | Space::DiscreteInputs)
    }

    pub const ALL: [Space; 4] = [
        Space::Coils,
        Space::DiscreteInputs,
        Space::HoldingRegisters,
        Space::InputRegisters,
    ];
}

#[derive(Debug, Clone)]
enum BlockValues {
    Bits(BitVec<u8, Msb0>),
    Registers(Vec<u16>),
}

/// A named, contiguous range of one address space, owning its values.
#[derive(Debug, Clone)]
pub struct Block {
    name: String,
    space: Space,
    starting_address: u16,
    size: u32,
    values: BlockValues,
}

impl Block {
    pub fn new(name: impl Into<String>, space: Space, starting_address: u16, size: u32) -> ModbusResult<Block> {
        let name = name.into();
        if size == 0 {
            return Err(ModbusError::InvalidModbusBlock(format!(
                "block {name} has zero size"
            )));
        }
        if starting_address as u32 + size > 65536 {
            return Err(ModbusError::InvalidModbusBlock(format!(
                "block {name} range exceeds the 16-bit address space"
            )));
        }
        let values = if space.is_bit_space() {
            BlockValues::Bits(bitvec![u8, Msb0; 0; size as usize])
        } else {
            BlockValues::Registers(vec![0; size as usize])
        };
        Ok(Block {
            name,
            space,
            starting_address,
            size,
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn starting_address(&self) -> u16 {
        self.starting_address
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn end_address(&self) -> u32 {
        self.starting_address as u32 + self.size
    }

    pub fn overlaps(&self, other_start: u16, other_size: u32) -> bool {
        let other_end = other_start as u32 + other_size;
        (self.starting_address as u32) < other_end && (other_start as u32) < self.end_address()
    }

    fn contains_range(&self, addr: u16, len: u32) -> bool {
        addr >= self.starting_address && addr as u32 + len <= self.end_address()
    }

    fn range_or_err(&self, addr: u16, len: u32) -> ModbusResult<()> {
        if self.contains_range(addr, len) {
            Ok(())
        } else {
            Err(ModbusError::OutOfModbusBlock {
                block: self.name.clone(),
                start: addr,
                end: addr as u32 + len,
            })
        }
    }

    pub fn read_bits(&self, addr: u16, len: u32) -> ModbusResult<Vec<bool>> {
        self.range_or_err(addr, len)?;
        let bits = match &self.values {
            BlockValues::Bits(bits) => bits,
            BlockValues::Registers(_) => {
                return Err(ModbusError::InvalidArgument(format!(
                    "block {} is not a bit space",
                    self.name
                )))
            }
        };
        let offset = (addr - self.starting_address) as usize;
        Ok(bits[offset..offset + len as usize].iter().map(|b| *b).collect())
    }

    pub fn write_bits(&mut self, addr: u16, values: &[bool]) -> ModbusResult<()> {
        self.range_or_err(addr, values.len() as u32)?;
        let name = self.name.clone();
        let bits = match &mut self.values {
            BlockValues::Bits(bits) => bits,
            BlockValues::Registers(_) => {
                return Err(ModbusError::InvalidArgument(format!(
                    "block {name} is not a bit space"
                )))
            }
        };
        let offset = (addr - self.starting_address) as usize;
        for (i, &value) in values.iter().enumerate() {
            bits.set(offset + i, value);
        }
        Ok(())
    }

    pub fn read_registers(&self, addr: u16, len: u32) -> ModbusResult<Vec<u16>> {
        self.range_or_err(addr, len)?;
        let regs = match &self.values {
            BlockValues::Registers(regs) => regs,
            BlockValues::Bits(_) => {
                return Err(ModbusError::InvalidArgument(format!(
                    "block {} is not a register space",
                    self.name
                )))
            }
        };
        let offset = (addr - self.starting_address) as usize;
        Ok(regs[offset..offset + len as usize].to_vec())
    }

    pub fn write_registers(&mut self, addr: u16, values: &[u16]) -> ModbusResult<()> {
        self.range_or_err(addr, values.len() as u32)?;
        let name = self.name.clone();
        let regs = match &mut self.values {
            BlockValues::Registers(regs) => regs,
            BlockValues::Bits(_) => {
                return Err(ModbusError::InvalidArgument(format!(
                    "block {name} is not a register space"
                )))
            }
        };
        let offset = (addr - self.starting_address) as usize;
        regs[offset..offset + values.len()].copy_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_block_rejects_zero_size() {
        assert!(Block::new("b", Space::Coils, 0, 0).is_err());
    }

    #[test]
    fn new_block_rejects_overflow_past_65536() {
        assert!(Block::new("b", Space::HoldingRegisters, 65530, 10).is_err());
        assert!(Block::new("b", Space::HoldingRegisters, 65530, 6).is_ok());
    }

    #[test]
    fn read_write_registers_round_trip() {
        let mut block = Block::new("hr", Space::HoldingRegisters, 0, 10).unwrap();
        block.write_registers(2, &[7, 8, 9]).unwrap();
        assert_eq!(block.read_registers(2, 3).unwrap(), vec![7, 8, 9]);
        assert_eq!(block.read_registers(0, 10).unwrap()[2..5], [7, 8, 9]);
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let block = Block::new("hr", Space::HoldingRegisters, 0, 10).unwrap();
        assert!(matches!(
            block.read_registers(8, 5),
            Err(ModbusError::OutOfModbusBlock { .. })
        ));
    }

    #[test]
    fn overlap_detection_is_symmetric() {
        let a = Block::new("a", Space::Coils, 0, 10).unwrap();
        assert!(a.overlaps(5, 10));
        assert!(a.overlaps(9, 1));
        assert!(!a.overlaps(10, 10));
    }

    #[test]
    fn bit_space_rejects_register_access() {
        let block = Block::new("c", Space::Coils, 0, 8).unwrap();
        assert!(block.read_registers(0, 1).is_err());
    }
}
