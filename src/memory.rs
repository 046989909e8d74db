//! MODBUS memory area definitions.
//!
//! This module defines the [`ModbusArea`] enum which represents the memory
//! regions of a MODBUS field-bus coupler / PFC controller, together with the
//! vendor offsets that turn an in-area location into a wire reference.
//!
//! # Memory Areas Overview
//!
//! | Area | Description | Read function | Write function |
//! |------|-------------|:-------------:|:--------------:|
//! | PhysicalInputAnalog | analog input process image | 0x03 | ✗ |
//! | PhysicalOutputAnalog | analog output process image | 0x03 | ✗ |
//! | PhysicalInputDigital | digital input process image | 0x02 | 0x0F |
//! | PhysicalOutputDigital | digital output process image | 0x02 | 0x0F |
//! | PfcInput | PFC input variables | 0x02 | 0x0F |
//! | PfcOutput | PFC output variables | 0x02 | 0x0F |
//! | Novram | retentive memory | 0x03 | 0x10 |
//!
//! # Example
//!
//! ```
//! use plclink::ModbusArea;
//!
//! assert!(ModbusArea::Novram.is_register_area());
//! assert!(!ModbusArea::PfcInput.is_register_area());
//! assert_eq!(ModbusArea::PfcOutput.to_string(), "PFC_OUTPUT");
//! ```

/// Additive offsets placed on top of an in-area location to form the wire
/// reference.
pub mod offsets {
    /// Coil access to the physical digital outputs.
    pub const BIT_OUTPUTS_ACCESS: u16 = 0x0200;
    /// Coil access to the PFC output variables.
    pub const BIT_PFC_OUTPUT_ACCESS: u16 = 0x1000;
    /// Coil access to the PFC input variables.
    pub const BIT_PFC_INPUT_ACCESS: u16 = 0x2000;
    /// Register access to the physical outputs.
    pub const REGISTER_OUTPUTS_ACCESS: u16 = 0x0200;
    /// Register access to the PFC output variables.
    pub const REGISTER_PFC_OUTPUT_ACCESS: u16 = 0x0100;
    /// Register access to the PFC input variables.
    pub const REGISTER_PFC_INPUT_ACCESS: u16 = 0x0300;
    /// Register access to the NOVRAM.
    pub const NOVRAM: u16 = 0x3000;
}

/// MODBUS function codes used by this crate.
pub mod function {
    /// Read input discretes.
    pub const READ_INPUT_DISCRETES: u8 = 0x02;
    /// Read multiple (holding) registers.
    pub const READ_MULTIPLE_REGISTERS: u8 = 0x03;
    /// Write multiple coils.
    pub const WRITE_COILS: u8 = 0x0F;
    /// Write multiple registers.
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
}

/// Memory areas of a MODBUS controller.
///
/// Digital and PFC areas are bit oriented and accessed through discretes and
/// coils; analog areas and the NOVRAM are register oriented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModbusArea {
    /// Analog input process image.
    PhysicalInputAnalog,
    /// Analog output process image.
    PhysicalOutputAnalog,
    /// Digital input process image.
    PhysicalInputDigital,
    /// Digital output process image.
    PhysicalOutputDigital,
    /// Input variables of the PFC program.
    PfcInput,
    /// Output variables of the PFC program.
    PfcOutput,
    /// Retentive memory.
    Novram,
}

impl ModbusArea {
    /// Returns whether the area is accessed register-wise.
    pub fn is_register_area(self) -> bool {
        matches!(
            self,
            ModbusArea::PhysicalInputAnalog | ModbusArea::PhysicalOutputAnalog | ModbusArea::Novram
        )
    }

    /// Returns the function code for reading this area.
    pub(crate) fn read_function_code(self) -> u8 {
        if self.is_register_area() {
            function::READ_MULTIPLE_REGISTERS
        } else {
            function::READ_INPUT_DISCRETES
        }
    }

    /// Returns the function code for writing this area.
    pub(crate) fn write_function_code(self) -> u8 {
        if self.is_register_area() {
            function::WRITE_MULTIPLE_REGISTERS
        } else {
            function::WRITE_COILS
        }
    }

    /// Offset added to a bit reference (`byte * 8 + bit`) of this area.
    ///
    /// Returns `None` for register areas.
    pub(crate) fn bit_offset(self) -> Option<u16> {
        match self {
            ModbusArea::PhysicalInputDigital => Some(0),
            ModbusArea::PhysicalOutputDigital => Some(offsets::BIT_OUTPUTS_ACCESS),
            ModbusArea::PfcInput => Some(offsets::BIT_PFC_INPUT_ACCESS),
            ModbusArea::PfcOutput => Some(offsets::BIT_PFC_OUTPUT_ACCESS),
            ModbusArea::PhysicalInputAnalog
            | ModbusArea::PhysicalOutputAnalog
            | ModbusArea::Novram => None,
        }
    }

    /// Offset added to a register index of this area on the read path.
    pub(crate) fn register_offset(self) -> Option<u16> {
        match self {
            ModbusArea::PhysicalInputAnalog => Some(0),
            ModbusArea::PhysicalOutputAnalog => Some(offsets::REGISTER_OUTPUTS_ACCESS),
            ModbusArea::Novram => Some(offsets::NOVRAM),
            _ => None,
        }
    }

    /// Offset added to a register index (`ceil(byte / 2)`) on the write path.
    ///
    /// WORD and DWORD writes address the digital and PFC areas through their
    /// register view. Analog areas have no write mapping.
    pub(crate) fn register_write_offset(self) -> Option<u16> {
        match self {
            ModbusArea::PhysicalInputDigital => Some(0),
            ModbusArea::PhysicalOutputDigital => Some(offsets::REGISTER_OUTPUTS_ACCESS),
            ModbusArea::PfcInput => Some(offsets::REGISTER_PFC_INPUT_ACCESS),
            ModbusArea::PfcOutput => Some(offsets::REGISTER_PFC_OUTPUT_ACCESS),
            ModbusArea::Novram => Some(offsets::NOVRAM),
            ModbusArea::PhysicalInputAnalog | ModbusArea::PhysicalOutputAnalog => None,
        }
    }
}

impl std::fmt::Display for ModbusArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModbusArea::PhysicalInputAnalog => write!(f, "PHYSICAL_INPUT_ANALOG"),
            ModbusArea::PhysicalOutputAnalog => write!(f, "PHYSICAL_OUTPUT_ANALOG"),
            ModbusArea::PhysicalInputDigital => write!(f, "PHYSICAL_INPUT_DIGITAL"),
            ModbusArea::PhysicalOutputDigital => write!(f, "PHYSICAL_OUTPUT_DIGITAL"),
            ModbusArea::PfcInput => write!(f, "PFC_INPUT"),
            ModbusArea::PfcOutput => write!(f, "PFC_OUTPUT"),
            ModbusArea::Novram => write!(f, "NOVRAM"),
        }
    }
}
