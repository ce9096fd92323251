//! Inbound response reports and the get-update layout.
//!
//! A get-update response is laid out as:
//!
//! | byte | meaning |
//! |------|---------|
//! | 0    | echoed opcode (`u`) |
//! | 1-2  | encoder tick delta, `i16` little-endian |
//! | 3    | control bitfield, see [`Controls`] |
//! | 4-7  | reserved / status |

use std::fmt;

use crate::command::{Opcode, REPORT_LEN};
use crate::error::{Error, Result};

/// An 8-byte response report, not yet interpreted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Response {
    bytes: [u8; REPORT_LEN],
}

impl Response {
    /// Wrap a raw report.
    #[must_use]
    pub const fn new(bytes: [u8; REPORT_LEN]) -> Self {
        Self { bytes }
    }

    /// Echoed opcode byte.
    #[must_use]
    pub const fn opcode_byte(&self) -> u8 {
        self.bytes[0]
    }

    /// Check that this response answers `opcode`.
    ///
    /// # Errors
    /// Returns [`Error::ProtocolMismatch`] if the echoed opcode differs.
    pub fn expect_opcode(&self, opcode: Opcode) -> Result<()> {
        if self.opcode_byte() == opcode.as_byte() {
            Ok(())
        } else {
            Err(Error::ProtocolMismatch {
                expected: opcode.as_byte(),
                actual: self.opcode_byte(),
            })
        }
    }

    /// The full 8-byte report.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; REPORT_LEN] {
        &self.bytes
    }
}

impl From<[u8; REPORT_LEN]> for Response {
    fn from(bytes: [u8; REPORT_LEN]) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Response({:02x?})", self.bytes)
    }
}

/// Control bitfield from byte 3 of a get-update response.
///
/// - bits 0-3: button mask (level, not edge)
/// - bit 4: tap/hold flag (0 = tap, 1 = hold)
/// - bits 5-6: rocker position
/// - bit 7: reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Controls(u8);

impl Controls {
    const BUTTON_MASK: u8 = 0x0f;
    const TAP_HOLD_BIT: u8 = 0x10;
    const ROCKER_MASK: u8 = 0x60;
    const ROCKER_SHIFT: u32 = 5;

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Buttons currently asserted, one bit per button.
    #[must_use]
    pub const fn buttons(self) -> u8 {
        self.0 & Self::BUTTON_MASK
    }

    /// `true` when the firmware reports a hold rather than a tap.
    #[must_use]
    pub const fn tap_hold(self) -> bool {
        self.0 & Self::TAP_HOLD_BIT != 0
    }

    /// Absolute rocker position (0-3 on the wire).
    #[must_use]
    pub const fn rocker(self) -> u8 {
        (self.0 & Self::ROCKER_MASK) >> Self::ROCKER_SHIFT
    }
}

/// Decoded get-update response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateReport {
    /// Encoder ticks since the previous poll
    pub ticks: i16,
    /// Buttons, tap/hold and rocker
    pub controls: Controls,
    /// Reserved status bytes, kept verbatim
    pub status: [u8; 4],
}

impl UpdateReport {
    /// Decode a get-update response.
    ///
    /// # Errors
    /// Returns [`Error::ProtocolMismatch`] if the response does not echo the
    /// get-update opcode; such a response is stale or out of sync.
    pub fn decode(response: &Response) -> Result<Self> {
        response.expect_opcode(Opcode::GetUpdate)?;

        let b = response.as_bytes();
        Ok(Self {
            ticks: i16::from_le_bytes([b[1], b[2]]),
            controls: Controls::from_bits(b[3]),
            status: [b[4], b[5], b[6], b[7]],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_decode_update_fields() {
        // -2 ticks, buttons 0b0101 held, rocker 2
        let response = Response::new([b'u', 0xfe, 0xff, 0x55, 1, 2, 3, 4]);
        let report = UpdateReport::decode(&response).expect("update response");

        assert_eq!(report.ticks, -2);
        assert_eq!(report.controls.buttons(), 0b0101);
        assert!(report.controls.tap_hold());
        assert_eq!(report.controls.rocker(), 2);
        assert_eq!(report.status, [1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_extreme_ticks() {
        let max = Response::new([b'u', 0xff, 0x7f, 0, 0, 0, 0, 0]);
        let min = Response::new([b'u', 0x00, 0x80, 0, 0, 0, 0, 0]);
        assert_eq!(UpdateReport::decode(&max).map(|r| r.ticks), Ok(i16::MAX));
        assert_eq!(UpdateReport::decode(&min).map(|r| r.ticks), Ok(i16::MIN));
    }

    #[test]
    fn test_decode_rejects_other_opcode() {
        let response = Response::new([b'=', 1, 0, 0x0f, 0, 0, 0, 0]);
        assert_matches!(
            UpdateReport::decode(&response),
            Err(Error::ProtocolMismatch { expected: 0x75, actual: 0x3d })
        );
    }

    #[test]
    fn test_controls_ignores_reserved_bit() {
        let controls = Controls::from_bits(0x80);
        assert_eq!(controls.buttons(), 0);
        assert!(!controls.tap_hold());
        assert_eq!(controls.rocker(), 0);
    }

    #[test]
    fn test_controls_rocker_positions() {
        assert_eq!(Controls::from_bits(0x00).rocker(), 0);
        assert_eq!(Controls::from_bits(0x20).rocker(), 1);
        assert_eq!(Controls::from_bits(0x40).rocker(), 2);
        assert_eq!(Controls::from_bits(0x60).rocker(), 3);
    }
}
