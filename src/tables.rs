//! Lookup tables driving the LA32 and the envelope machines.

use crate::math::{exp2f, log2f};
use crate::SAMPLE_RATE;

/// Decay speed factors for the resonance sine, indexed by `resonance >> 2`.
/// Found from sample analysis of the hardware.
const RES_AMP_DECAY_FACTOR: [u8; 8] = [31, 16, 12, 8, 5, 3, 2, 1];

/// Immutable LUT set built once when the synth opens and owned by it.
///
/// `exp9` and `logsin9` replicate the 9-bit ROM tables inside the LA32;
/// the remaining tables match tables in the control ROM that the MCU uses
/// to program envelope ramps.
pub struct Tables {
    /// 2^x fractions, 9-bit index over one octave, 13-bit output scale.
    pub exp9: [u16; 512],
    /// -log2(sin x) over a quarter period, 9-bit index, 1024 units/octave.
    pub logsin9: [u16; 512],
    /// Resonance amp decay factors by `resonance >> 2`.
    pub res_amp_decay_factor: [u8; 8],
    /// Envelope increment codes by level delta.
    pub env_logarithmic_time: [u8; 256],
    /// Amp subtraction by master volume 0..100.
    pub master_vol_to_amp_subtraction: [u8; 101],
    /// Amp subtraction by level parameters 0..100.
    pub level_to_amp_subtraction: [u8; 101],
    /// Pulse width parameter 0..100 to the 8-bit LA32 register value.
    pub pulse_width_100_to_255: [u8; 101],
    /// Pitch LFO period in samples by LFO rate 0..100.
    pub lfo_period: [u32; 101],
}

impl Tables {
    pub fn new() -> Tables {
        let mut exp9 = [0u16; 512];
        let mut logsin9 = [0u16; 512];
        for i in 0..512 {
            // Values are the fractions 2^(-(i+1)/512) stored against a
            // 13-bit full scale, matching the ROM contents.
            exp9[i] = (8191.5 - exp2f(13.0 - (i as f32 + 1.0) / 512.0)) as u16;
            logsin9[i] = (0.5
                - log2f(((i as f32 + 0.5) / 512.0 * core::f32::consts::FRAC_PI_2).sin()) * 1024.0)
                as u16;
        }

        let mut env_logarithmic_time = [0u8; 256];
        env_logarithmic_time[0] = 64;
        for (i, entry) in env_logarithmic_time.iter_mut().enumerate().skip(1) {
            *entry = ((log2f(i as f32) * 8.0).ceil() + 64.0) as u8;
        }

        let mut master_vol_to_amp_subtraction = [0u8; 101];
        master_vol_to_amp_subtraction[0] = 255;
        for (vol, entry) in master_vol_to_amp_subtraction.iter_mut().enumerate().skip(1) {
            *entry = (106.31 - 16.0 * log2f(vol as f32)) as u8;
        }

        let mut level_to_amp_subtraction = [0u8; 101];
        level_to_amp_subtraction[0] = 255;
        for (level, entry) in level_to_amp_subtraction.iter_mut().enumerate().skip(1) {
            *entry = (106.31 - 16.0 * log2f(level as f32)) as u8;
        }

        let mut pulse_width_100_to_255 = [0u8; 101];
        for (i, entry) in pulse_width_100_to_255.iter_mut().enumerate() {
            *entry = (i as f32 * 255.0 / 100.0 + 0.5) as u8;
        }

        let mut lfo_period = [0u32; 101];
        for (rate, entry) in lfo_period.iter_mut().enumerate() {
            // Verified against hand-logged LFO periods of the hardware.
            *entry =
                (SAMPLE_RATE as f32 / (1.088883372f32.powi(rate as i32) * 0.021236044)) as u32;
        }

        Tables {
            exp9,
            logsin9,
            res_amp_decay_factor: RES_AMP_DECAY_FACTOR,
            env_logarithmic_time,
            master_vol_to_amp_subtraction,
            level_to_amp_subtraction,
            pulse_width_100_to_255,
            lfo_period,
        }
    }
}

impl Default for Tables {
    fn default() -> Self {
        Tables::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp9_is_monotonic_and_spans_one_octave() {
        let tables = Tables::new();
        assert!(tables.exp9[0] < 16);
        for i in 1..512 {
            assert!(tables.exp9[i] >= tables.exp9[i - 1]);
        }
        // The last entry reaches half scale: 8191 - exp9[511] ~ 4096.
        let half = 8191 - tables.exp9[511];
        assert!((4090..=4100).contains(&half));
    }

    #[test]
    fn logsin9_decreases_towards_the_sine_peak() {
        let tables = Tables::new();
        for i in 1..512 {
            assert!(tables.logsin9[i] <= tables.logsin9[i - 1]);
        }
        // sin at the end of the quarter period is 1, whose log is 0.
        assert_eq!(tables.logsin9[511], 0);
    }

    #[test]
    fn envelope_time_table_matches_the_rom_curve() {
        let tables = Tables::new();
        assert_eq!(tables.env_logarithmic_time[0], 64);
        assert_eq!(tables.env_logarithmic_time[1], 64);
        assert_eq!(tables.env_logarithmic_time[255], 128);
        // Tail of the table saturates at 128.
        for i in 235..=255 {
            assert_eq!(tables.env_logarithmic_time[i], 128);
        }
    }

    #[test]
    fn amp_subtraction_vanishes_at_full_levels() {
        let tables = Tables::new();
        assert_eq!(tables.master_vol_to_amp_subtraction[100], 0);
        assert_eq!(tables.master_vol_to_amp_subtraction[0], 255);
        assert_eq!(tables.level_to_amp_subtraction[100], 0);
        // The default part output level of 80 sits a few steps down.
        assert_eq!(tables.level_to_amp_subtraction[80], 5);
    }

    #[test]
    fn pulse_width_covers_the_full_register_range() {
        let tables = Tables::new();
        assert_eq!(tables.pulse_width_100_to_255[0], 0);
        assert_eq!(tables.pulse_width_100_to_255[50], 128);
        assert_eq!(tables.pulse_width_100_to_255[100], 255);
    }
}
