//! JSON machine descriptions and the address spaces they build.

use std::path::Path;
use std::rc::Rc;

use log::{debug, info};
use membus_core::{
    initialize, AddressMap, AddressSpace, DataWidth, Endianness, LatchPort, MemoryManager, Offset,
    RangeDescriptor, SharedManager, SpaceConfig,
};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::CliError;

/// Fields that accept `"0x..."` strings as well as JSON numbers.
const NUMERIC_FIELDS: &[&str] = &[
    "start",
    "end",
    "mask",
    "mirror",
    "select",
    "region_offset",
    "size",
    "fill",
    "value",
    "global_mask",
    "unmap_value",
];

/// Named block of initial memory contents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegionFile {
    /// Region name ranges refer to.
    pub name: String,
    /// Length in bytes.
    pub size: usize,
    /// Byte every location starts with.
    #[serde(default)]
    pub fill: u8,
}

/// Latch port registered before any range is installed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortFile {
    /// Port name ranges refer to.
    pub name: String,
    /// Initial latched value.
    #[serde(default)]
    pub value: u64,
}

/// One bus and the ranges installed on it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpaceFile {
    /// Space name.
    pub name: String,
    /// Data width in bits.
    pub data_width: u32,
    /// Logical address lines.
    pub address_width: u32,
    /// Logical-to-byte address shift.
    #[serde(default)]
    pub address_shift: i8,
    /// Byte order.
    #[serde(default)]
    pub endianness: Endianness,
    /// Optional logical address mask.
    #[serde(default)]
    pub global_mask: Option<Offset>,
    /// Value unmapped reads return; all ones when absent.
    #[serde(default)]
    pub unmap_value: Option<u64>,
    /// Log every unmapped access.
    #[serde(default)]
    pub log_unmapped: bool,
    /// Ranges in installation order.
    #[serde(default)]
    pub ranges: Vec<RangeDescriptor>,
}

impl SpaceFile {
    fn config(&self) -> Result<SpaceConfig, CliError> {
        let data_width =
            DataWidth::from_bits(self.data_width).ok_or_else(|| CliError::DataWidth {
                space: self.name.clone(),
                bits: self.data_width,
            })?;
        let mut config = SpaceConfig::new(
            self.name.as_str(),
            data_width,
            self.address_width,
            self.endianness,
        );
        config.address_shift = self.address_shift;
        config.global_mask = self.global_mask;
        config.log_unmapped = self.log_unmapped;
        if let Some(value) = self.unmap_value {
            config.unmap_value = value;
        }
        Ok(config)
    }
}

/// Whole machine description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct MachineFile {
    /// Memory regions.
    pub regions: Vec<RegionFile>,
    /// Latch ports.
    pub ports: Vec<PortFile>,
    /// Address spaces.
    pub spaces: Vec<SpaceFile>,
}

impl MachineFile {
    /// Parses a description from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Json`] for malformed input and [`CliError::Number`] for a numeric
    /// field holding an unparseable string.
    pub fn parse(text: &str) -> Result<Self, CliError> {
        let mut value: Value = serde_json::from_str(text)?;
        normalize_numbers(&mut value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Reads and parses the description at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Io`] when the file cannot be read, otherwise as [`Self::parse`].
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
#[must_use]
pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16).ok(),
        None => text.parse().ok(),
    }
}

fn normalize_numbers(value: &mut Value) -> Result<(), CliError> {
    match value {
        Value::Object(fields) => {
            for (key, field) in fields {
                if NUMERIC_FIELDS.contains(&key.as_str()) {
                    if let Value::String(text) = field {
                        let number = parse_number(text).ok_or_else(|| CliError::Number {
                            field: key.clone(),
                            text: text.clone(),
                        })?;
                        *field = Value::from(number);
                        continue;
                    }
                }
                normalize_numbers(field)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize_numbers(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Spaces built from a description, initialized and ready for accesses.
pub struct Machine {
    manager: SharedManager,
    spaces: Vec<AddressSpace>,
}

impl Machine {
    /// Registers regions and ports, populates every space and runs [`initialize`].
    ///
    /// # Errors
    ///
    /// Returns the first configuration or installation error.
    pub fn build(file: &MachineFile) -> Result<Self, CliError> {
        if file.spaces.is_empty() {
            return Err(CliError::NoSpaces);
        }
        let manager = MemoryManager::shared();
        {
            let mut guard = manager.borrow_mut();
            for region in &file.regions {
                debug!("region '{}': {:#x} bytes", region.name, region.size);
                guard.add_region(region.name.as_str(), vec![region.fill; region.size]);
            }
            for port in &file.ports {
                guard.register_port(port.name.as_str(), Rc::new(LatchPort::new(port.value)));
            }
        }

        let mut spaces = Vec::with_capacity(file.spaces.len());
        for space_file in &file.spaces {
            let mut space = AddressSpace::new(&manager, space_file.config()?)?;
            space.populate_from_map(&AddressMap::from_descriptors(&space_file.ranges))?;
            info!(
                "space '{}': {} ranges installed",
                space_file.name,
                space_file.ranges.len()
            );
            spaces.push(space);
        }

        let mut refs: Vec<&mut AddressSpace> = spaces.iter_mut().collect();
        initialize(&mut refs)?;
        Ok(Self { manager, spaces })
    }

    /// Manager shared by every space.
    #[must_use]
    pub const fn manager(&self) -> &SharedManager {
        &self.manager
    }

    /// Spaces in declaration order.
    #[must_use]
    pub fn spaces(&self) -> &[AddressSpace] {
        &self.spaces
    }

    /// Space named `name`, or the first space when `name` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::UnknownSpace`] when no space has that name.
    pub fn space(&self, name: Option<&str>) -> Result<&AddressSpace, CliError> {
        match name {
            Some(name) => self
                .spaces
                .iter()
                .find(|space| space.name() == name)
                .ok_or_else(|| CliError::UnknownSpace(name.to_string())),
            None => self.spaces.first().ok_or(CliError::NoSpaces),
        }
    }
}
