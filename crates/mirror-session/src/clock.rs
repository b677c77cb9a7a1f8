//! Shared network clock for presentation timestamps.

use std::sync::Mutex;

const MICROS_PER_SEC: u64 = 1_000_000;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const SECONDS_1900_TO_1970: u64 = 2_208_988_800;

/// Shared clock translating raw 32.32 fixed-point timestamps into
/// microseconds.
///
/// Video records are stamped with a boot-relative counter (no calendar
/// epoch), so the conversion used by the framing engine applies no epoch
/// correction. The remote→local offset is maintained by the external
/// time-sync layer and available to consumers that want to place stamps on
/// the local timeline.
#[derive(Debug, Default)]
pub struct NetworkClock {
    offset_micros: Mutex<i64>,
}

impl NetworkClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new remote→local offset from the time-sync exchange.
    pub fn set_offset_micros(&self, offset: i64) {
        *self.offset_micros.lock().unwrap() = offset;
        tracing::trace!(offset_micros = offset, "clock offset updated");
    }

    /// Current remote→local offset in microseconds.
    pub fn offset_micros(&self) -> i64 {
        *self.offset_micros.lock().unwrap()
    }

    /// Convert a raw 32.32 fixed-point timestamp to microseconds.
    ///
    /// `includes_epoch` marks stamps that count from 1900; boot-relative
    /// stamps pass `false` and convert without any epoch correction.
    pub fn timestamp_to_micros(&self, raw: u64, includes_epoch: bool) -> u64 {
        let mut secs = raw >> 32;
        if includes_epoch {
            secs = secs.saturating_sub(SECONDS_1900_TO_1970);
        }
        let frac = raw & 0xffff_ffff;
        secs * MICROS_PER_SEC + ((frac * MICROS_PER_SEC) >> 32)
    }

    /// Shift a remote microsecond stamp onto the local timeline.
    pub fn remote_to_local_micros(&self, micros: u64) -> u64 {
        micros.saturating_add_signed(self.offset_micros())
    }
}
