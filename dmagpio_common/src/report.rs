//! Level samples and notification reports.
//!
//! A [`Report`] is the fixed 12-byte record streamed to notification
//! handles: `seqno: u16, flags: u16, tick: u32, level: u32`, little-endian.

use crate::consts::REPORT_SIZE;
use bitflags::bitflags;
use static_assertions::const_assert_eq;

/// One snapshot of the level vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sample {
    /// Capture time.
    pub tick: u32,
    /// Levels of pins 0..=53.
    pub level: u64,
}

bitflags! {
    /// Report flag word.
    ///
    /// When `WATCHDOG` is set the low five bits carry the pin index.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ReportFlags: u16 {
        /// Pin-index field.
        const PIN_MASK = 0x1F;
        /// Report synthesised by a watchdog timeout.
        const WATCHDOG = 1 << 5;
    }
}

impl ReportFlags {
    /// Flags for a watchdog timeout on `pin`.
    pub fn watchdog(pin: u8) -> Self {
        Self::WATCHDOG | Self::from_bits_truncate(u16::from(pin) & Self::PIN_MASK.bits())
    }
}

/// Notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Report {
    /// Per-handle sequence number, wrapping.
    pub seqno: u16,
    /// Flag word.
    pub flags: u16,
    /// Capture time.
    pub tick: u32,
    /// Levels of pins 0..=31.
    pub level: u32,
}

const_assert_eq!(std::mem::size_of::<Report>(), REPORT_SIZE);

impl Report {
    /// Decoded flag word.
    pub fn report_flags(&self) -> ReportFlags {
        ReportFlags::from_bits_retain(self.flags)
    }

    /// Pin whose watchdog produced this report.
    pub fn watchdog_pin(&self) -> Option<u8> {
        let flags = self.report_flags();
        flags
            .contains(ReportFlags::WATCHDOG)
            .then(|| (flags & ReportFlags::PIN_MASK).bits() as u8)
    }

    /// Little-endian wire image.
    pub fn to_bytes(&self) -> [u8; REPORT_SIZE] {
        let mut out = [0u8; REPORT_SIZE];
        out[0..2].copy_from_slice(&self.seqno.to_le_bytes());
        out[2..4].copy_from_slice(&self.flags.to_le_bytes());
        out[4..8].copy_from_slice(&self.tick.to_le_bytes());
        out[8..12].copy_from_slice(&self.level.to_le_bytes());
        out
    }

    /// Decode a wire image.
    pub fn from_bytes(bytes: &[u8; REPORT_SIZE]) -> Self {
        Self {
            seqno: u16::from_le_bytes([bytes[0], bytes[1]]),
            flags: u16::from_le_bytes([bytes[2], bytes[3]]),
            tick: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            level: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}
