//! Per-family thermal safety envelopes.

use crate::device::DeviceFamily;

/// Static safety envelope for one device family. Loaded once, never
/// mutated at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalProfile {
    pub min_freq_mhz: u16,
    pub max_freq_mhz: u16,
    pub default_freq_mhz: u16,
    /// Temperature the controller steers toward.
    pub optimal_temp_c: f32,
    /// Above this, frequency drops aggressively (two steps at once).
    pub warning_temp_c: f32,
    /// At or above this, emergency shutdown and cooldown.
    pub critical_temp_c: f32,
    /// Absolute chip limit; anything near this is treated as overheating
    /// when classifying health.
    pub max_chip_temp_c: f32,
    /// Deadband around the optimal temperature inside which frequency
    /// holds steady.
    pub hysteresis_c: f32,
    pub freq_step_mhz: u16,
}

const BITAXE: ThermalProfile = ThermalProfile {
    min_freq_mhz: 400,
    max_freq_mhz: 600,
    default_freq_mhz: 490,
    optimal_temp_c: 60.0,
    warning_temp_c: 65.0,
    critical_temp_c: 68.0,
    max_chip_temp_c: 75.0,
    hysteresis_c: 2.0,
    freq_step_mhz: 10,
};

// The big three industrial families share an envelope: wider thermal
// margins and coarser frequency steps than the open hardware boards.
const INDUSTRIAL: ThermalProfile = ThermalProfile {
    min_freq_mhz: 400,
    max_freq_mhz: 650,
    default_freq_mhz: 550,
    optimal_temp_c: 65.0,
    warning_temp_c: 75.0,
    critical_temp_c: 80.0,
    max_chip_temp_c: 85.0,
    hysteresis_c: 3.0,
    freq_step_mhz: 25,
};

const UNKNOWN: ThermalProfile = ThermalProfile {
    min_freq_mhz: 400,
    max_freq_mhz: 500,
    default_freq_mhz: 450,
    optimal_temp_c: 60.0,
    warning_temp_c: 65.0,
    critical_temp_c: 70.0,
    max_chip_temp_c: 75.0,
    hysteresis_c: 2.0,
    freq_step_mhz: 10,
};

impl ThermalProfile {
    /// Envelope for a device family. Unrecognized hardware gets the most
    /// conservative profile.
    pub fn for_family(family: DeviceFamily) -> &'static ThermalProfile {
        match family {
            DeviceFamily::Bitaxe => &BITAXE,
            DeviceFamily::Antminer | DeviceFamily::Whatsminer | DeviceFamily::Avalon => &INDUSTRIAL,
            DeviceFamily::Unknown => &UNKNOWN,
        }
    }

    pub fn clamp_frequency(&self, mhz: u16) -> u16 {
        mhz.clamp(self.min_freq_mhz, self.max_freq_mhz)
    }
}
