//! Outbound command reports.
//!
//! Every command is a fixed 8-byte report: the opcode in byte 0 followed by
//! up to 7 payload bytes, zero-padded.

use std::fmt;

use crate::error::{Error, Result};

/// Size of every report exchanged with the KPod, in both directions.
pub const REPORT_LEN: usize = 8;

/// Maximum payload carried after the opcode byte.
pub const MAX_PAYLOAD: usize = REPORT_LEN - 1;

/// Command opcodes understood by the KPod firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Poll encoder, buttons and rocker
    GetUpdate = b'u',
    /// Read the device identification block
    GetId = b'=',
    /// Set mute and scale
    Configure = b'C',
    /// Reset the device
    Reset = b'r',
    /// LED and auxiliary output control
    LedAuxControl = b'O',
    /// Beeper control
    BeepControl = b'Z',
}

impl Opcode {
    /// Wire value of this opcode.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            b'u' => Ok(Self::GetUpdate),
            b'=' => Ok(Self::GetId),
            b'C' => Ok(Self::Configure),
            b'r' => Ok(Self::Reset),
            b'O' => Ok(Self::LedAuxControl),
            b'Z' => Ok(Self::BeepControl),
            other => Err(other),
        }
    }
}

/// An 8-byte command report.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Command {
    bytes: [u8; REPORT_LEN],
}

impl Command {
    /// Build a command from an opcode and up to 7 payload bytes.
    ///
    /// # Errors
    /// Returns [`Error::PayloadTooLong`] if `payload` exceeds 7 bytes.
    pub fn new(opcode: Opcode, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLong(payload.len()));
        }

        let mut bytes = [0u8; REPORT_LEN];
        bytes[0] = opcode.as_byte();
        bytes[1..1 + payload.len()].copy_from_slice(payload);
        Ok(Self { bytes })
    }

    /// Opcode-only command with an all-zero payload.
    #[must_use]
    pub const fn bare(opcode: Opcode) -> Self {
        let mut bytes = [0u8; REPORT_LEN];
        bytes[0] = opcode.as_byte();
        Self { bytes }
    }

    /// Poll for encoder, button and rocker changes.
    #[must_use]
    pub const fn get_update() -> Self {
        Self::bare(Opcode::GetUpdate)
    }

    /// Request the device identification block.
    #[must_use]
    pub const fn get_id() -> Self {
        Self::bare(Opcode::GetId)
    }

    /// Reset the device.
    #[must_use]
    pub const fn reset() -> Self {
        Self::bare(Opcode::Reset)
    }

    /// Configure mute and scale. Byte 1 carries `(scale << 1) | mute`.
    ///
    /// # Errors
    /// Returns [`Error::ScaleOutOfRange`] if `scale` does not fit in 7 bits.
    pub fn configure(scale: u8, mute: bool) -> Result<Self> {
        if scale > 0x7f {
            return Err(Error::ScaleOutOfRange(scale));
        }
        let opt = (scale << 1) | u8::from(mute);
        Self::new(Opcode::Configure, &[opt])
    }

    /// LED and auxiliary output control with an opaque payload.
    ///
    /// # Errors
    /// Returns [`Error::PayloadTooLong`] if `payload` exceeds 7 bytes.
    pub fn led_aux(payload: &[u8]) -> Result<Self> {
        Self::new(Opcode::LedAuxControl, payload)
    }

    /// Beeper control with an opaque payload.
    ///
    /// # Errors
    /// Returns [`Error::PayloadTooLong`] if `payload` exceeds 7 bytes.
    pub fn beep(payload: &[u8]) -> Result<Self> {
        Self::new(Opcode::BeepControl, payload)
    }

    /// Raw opcode byte.
    #[must_use]
    pub const fn opcode_byte(&self) -> u8 {
        self.bytes[0]
    }

    /// The full 8-byte report.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; REPORT_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("opcode", &char::from(self.bytes[0]))
            .field("payload", &&self.bytes[1..])
            .finish()
    }
}
