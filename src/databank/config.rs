//! Declarative databank configuration and CSV value snapshots.
//!
//! Neither of these participates in the wire protocol: `DatabankConfig`
//! describes structure (slaves and blocks) without values, and the CSV
//! helpers snapshot values without structure. Loading a CSV snapshot onto a
//! databank that hasn't been given the matching blocks first will simply
//! fail with `OutOfModbusBlock`/`MissingKey`.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::databank::block::Space;
use crate::databank::databank::Databank;
use crate::error::{ModbusError, ModbusResult};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    pub name: String,
    pub space: Space,
    pub starting_address: u16,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    pub unit_id: u8,
    #[serde(default = "default_true")]
    pub unsigned_registers: bool,
    #[serde(default)]
    pub blocks: Vec<BlockConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabankConfig {
    #[serde(default)]
    pub error_on_missing_slave: bool,
    #[serde(default)]
    pub slaves: Vec<SlaveConfig>,
}

impl DatabankConfig {
    pub fn from_yaml_str(source: &str) -> ModbusResult<DatabankConfig> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> ModbusResult<DatabankConfig> {
        let source = std::fs::read_to_string(path)?;
        DatabankConfig::from_yaml_str(&source)
    }

    pub fn from_json_str(source: &str) -> ModbusResult<DatabankConfig> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ModbusResult<DatabankConfig> {
        let source = std::fs::read_to_string(path)?;
        DatabankConfig::from_json_str(&source)
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        ModbusError::Config(format!("JSON error: {err}"))
    }
}

impl Databank {
    /// Build an empty (zero-initialized) databank from a declarative
    /// configuration: unit ids and their blocks, no values.
    pub fn from_config(config: DatabankConfig) -> ModbusResult<Databank> {
        let bank = Databank::new(config.error_on_missing_slave);
        for slave_config in config.slaves {
            bank.add_slave(slave_config.unit_id)?;
            {
                let slave = bank.get_slave(slave_config.unit_id)?;
                slave.lock().set_unsigned_registers(slave_config.unsigned_registers);
            }
            for block in slave_config.blocks {
                bank.add_block(slave_config.unit_id, block.name, block.space, block.starting_address, block.size)?;
            }
        }
        Ok(bank)
    }

    /// Write every configured block's current values to `path` as
    /// `unit_id,space,address,value` rows.
    pub fn save_csv(&self, path: impl AsRef<Path>) -> ModbusResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["unit_id", "space", "address", "value"])?;
        for (unit_id, space, address, value) in self.snapshot_rows() {
            writer.write_record([
                unit_id.to_string(),
                space_to_csv(space).to_string(),
                address.to_string(),
                value.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load a CSV snapshot written by `save_csv` onto an already-configured
    /// databank. Rows addressing a space/address outside any configured
    /// block fail with the same errors a live write would.
    pub fn load_csv(&self, path: impl AsRef<Path>) -> ModbusResult<()> {
        let file = File::open(path)?;
        let mut reader = csv::Reader::from_reader(BufReader::new(file));
        for record in reader.records() {
            let record = record?;
            let unit_id: u8 = record
                .get(0)
                .ok_or_else(|| ModbusError::Config("missing unit_id column".into()))?
                .parse()
                .map_err(|_| ModbusError::Config("invalid unit_id".into()))?;
            let space = space_from_csv(record.get(1).unwrap_or(""))?;
            let address: u16 = record
                .get(2)
                .ok_or_else(|| ModbusError::Config("missing address column".into()))?
                .parse()
                .map_err(|_| ModbusError::Config("invalid address".into()))?;
            let value: u32 = record
                .get(3)
                .ok_or_else(|| ModbusError::Config("missing value column".into()))?
                .parse()
                .map_err(|_| ModbusError::Config("invalid value".into()))?;

            if space.is_bit_space() {
                self.write_single_bit(unit_id, space, address, value != 0)?;
            } else {
                self.write_single_register(unit_id, space, address, value as u16)?;
            }
        }
        Ok(())
    }
}

fn space_to_csv(space: Space) -> &'static str {
    match space {
        Space::Coils => "coils",
        Space::DiscreteInputs => "discrete_inputs",
        Space::HoldingRegisters => "holding_registers",
        Space::InputRegisters => "input_registers",
    }
}

fn space_from_csv(value: &str) -> ModbusResult<Space> {
    match value {
        "coils" => Ok(Space::Coils),
        "discrete_inputs" => Ok(Space::DiscreteInputs),
        "holding_registers" => Ok(Space::HoldingRegisters),
        "input_registers" => Ok(Space::InputRegisters),
        other => Err(ModbusError::Config(format!("unknown space {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sample_config() -> DatabankConfig {
        DatabankConfig {
            error_on_missing_slave: true,
            slaves: vec![SlaveConfig {
                unit_id: 1,
                unsigned_registers: true,
                blocks: vec![BlockConfig {
                    name: "hr".into(),
                    space: Space::HoldingRegisters,
                    starting_address: 0,
                    size: 10,
                }],
            }],
        }
    }

    #[test]
    fn from_config_builds_matching_structure() {
        let bank = Databank::from_config(sample_config()).unwrap();
        assert_eq!(bank.unit_ids(), vec![1]);
        assert_eq!(bank.get_values_registers(1, "hr", 0, 10).unwrap(), vec![0; 10]);
    }

    #[test]
    fn yaml_round_trips_through_from_config() {
        let yaml = serde_yaml::to_string(&sample_config()).unwrap();
        let config = DatabankConfig::from_yaml_str(&yaml).unwrap();
        let bank = Databank::from_config(config).unwrap();
        assert!(bank.add_block(1, "extra", Space::Coils, 0, 8).is_ok());
    }

    #[test]
    fn csv_round_trips_values() {
        let bank = Databank::from_config(sample_config()).unwrap();
        bank.set_values_registers(1, "hr", 0, &[1, 2, 3]).unwrap();

        let file = NamedTempFile::new().unwrap();
        bank.save_csv(file.path()).unwrap();

        let restored = Databank::from_config(sample_config()).unwrap();
        restored.load_csv(file.path()).unwrap();
        assert_eq!(restored.get_values_registers(1, "hr", 0, 3).unwrap(), vec![1, 2, 3]);
    }
}
