//! LA32 partial wave generator working in the logarithmic fixed-point domain.
//!
//! Samples are represented as `-log2(amplitude)` scaled by 4096, so that
//! attenuation is addition and ring modulation is a single log-domain sum.
//! The square waveform is assembled from four sine segments and two linear
//! segments per period; resonance rides on a second windowed sine whose decay
//! depends on the filter cutoff.

use crate::tables::Tables;

/// Cutoff register value at which the filter stops attenuating the carrier.
pub const MIDDLE_CUTOFF_VALUE: u32 = 128 << 18;
/// Below this cutoff the resonance sine decays sinusoidally rather than
/// staying at full strength.
pub const RESONANCE_DECAY_THRESHOLD_CUTOFF_VALUE: u32 = 144 << 18;
/// Cutoff values above this are clamped; determined via sample analysis.
pub const MAX_CUTOFF_VALUE: u32 = 240 << 18;

/// Sign of a logarithmic sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogSampleSign {
    #[default]
    Positive,
    Negative,
}

/// One sample in the logarithmic domain: 0 is full scale, 65535 is silence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogSample {
    pub log_value: u16,
    pub sign: LogSampleSign,
}

/// The silent log sample.
pub const SILENCE: LogSample = LogSample {
    log_value: 65535,
    sign: LogSampleSign::Positive,
};

impl Default for LogSample {
    fn default() -> Self {
        SILENCE
    }
}

/// Interpolate the 9-bit exponent table by a 12-bit fraction.
/// Returns `8192 * 2^(-fract / 4096)` against a 13-bit full scale.
#[inline]
pub fn interpolate_exp(tables: &Tables, fract: u16) -> u16 {
    let exp_tab_index = (fract >> 3) as usize;
    let extra_bits = i32::from(fract & 7);
    let exp_tab_entry2 = i32::from(8191 - tables.exp9[exp_tab_index]);
    let exp_tab_entry1 = if exp_tab_index == 0 {
        8191
    } else {
        i32::from(8191 - tables.exp9[exp_tab_index - 1])
    };
    (exp_tab_entry1 + (((exp_tab_entry2 - exp_tab_entry1) * extra_bits) >> 3)) as u16
}

/// Convert a log sample to a linear 16-bit sample.
#[inline]
pub fn unlog(tables: &Tables, log_sample: LogSample) -> i16 {
    let int_log_value = log_sample.log_value >> 12;
    let frac_log_value = log_sample.log_value & 4095;
    let sample = (interpolate_exp(tables, frac_log_value) >> int_log_value) as i16;
    match log_sample.sign {
        LogSampleSign::Positive => sample,
        LogSampleSign::Negative => -sample,
    }
}

/// Add two log samples, multiplying the linear magnitudes and combining signs.
/// Saturates at silence.
#[inline]
pub fn add_log_samples(log_sample1: &mut LogSample, log_sample2: LogSample) {
    let log_sample_value = u32::from(log_sample1.log_value) + u32::from(log_sample2.log_value);
    log_sample1.log_value = if log_sample_value < 65536 {
        log_sample_value as u16
    } else {
        65535
    };
    log_sample1.sign = if log_sample1.sign == log_sample2.sign {
        LogSampleSign::Positive
    } else {
        LogSampleSign::Negative
    };
}

/// Segment of the square wave period currently being generated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
enum SquarePhase {
    #[default]
    PositiveRisingSine,
    PositiveLinear,
    PositiveFallingSine,
    NegativeFallingSine,
    NegativeLinear,
    NegativeRisingSine,
}

impl SquarePhase {
    /// Advance to the next segment of the period.
    fn advance(self) -> SquarePhase {
        match self {
            SquarePhase::PositiveRisingSine => SquarePhase::PositiveLinear,
            SquarePhase::PositiveLinear => SquarePhase::PositiveFallingSine,
            SquarePhase::PositiveFallingSine => SquarePhase::NegativeFallingSine,
            SquarePhase::NegativeFallingSine => SquarePhase::NegativeLinear,
            SquarePhase::NegativeLinear => SquarePhase::NegativeRisingSine,
            SquarePhase::NegativeRisingSine => SquarePhase::PositiveRisingSine,
        }
    }
}

/// Segment of the resonance sine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
enum ResonancePhase {
    #[default]
    PositiveRisingSine,
    PositiveFallingSine,
    NegativeFallingSine,
    NegativeRisingSine,
}

impl ResonancePhase {
    fn from_index(index: u32) -> ResonancePhase {
        match index & 3 {
            0 => ResonancePhase::PositiveRisingSine,
            1 => ResonancePhase::PositiveFallingSine,
            2 => ResonancePhase::NegativeFallingSine,
            _ => ResonancePhase::NegativeRisingSine,
        }
    }
}

/// Descriptor of a PCM wave played by a generator, resolved against the PCM ROM.
#[derive(Clone, Copy, Debug, Default)]
pub struct PcmWaveRef {
    /// First sample index in the PCM ROM.
    pub start: u32,
    /// Length in samples.
    pub len: u32,
    /// Whether the wave wraps at its end.
    pub looped: bool,
}

/// One oscillator of a partial pair.
#[derive(Default)]
pub struct La32WaveGenerator {
    active: bool,

    // Register inputs latched each tick.
    amp: u32,
    pitch: u16,
    cutoff_val: u32,

    // Synth mode configuration.
    sawtooth_waveform: bool,
    pulse_width: u8,
    resonance: u8,

    phase: SquarePhase,
    square_wave_position: u32,
    sample_step: u32,
    high_len: u32,
    low_len: u32,

    resonance_phase: ResonancePhase,
    resonance_sine_position: u32,
    resonance_amp_subtraction: u32,
    res_amp_decay_factor: u32,

    sawtooth_cosine_position: u32,
    sawtooth_cosine_step: u32,

    square_log_sample: LogSample,
    resonance_log_sample: LogSample,

    // PCM mode state.
    pcm_wave: Option<PcmWaveRef>,
    pcm_wave_interpolated: bool,
    pcm_position: u32,
    pcm_sample_step: u32,
    pcm_interpolation_factor: u32,
    first_pcm_log_sample: LogSample,
    second_pcm_log_sample: LogSample,
}

impl La32WaveGenerator {
    fn update_wave_generator_state(&mut self, tables: &Tables) {
        if self.sawtooth_waveform {
            // sawtoothCosineStep = 2^(pitch / 4096 + 4)
            let exp_arg_int = u32::from(self.pitch >> 12);
            let mut step = u32::from(interpolate_exp(tables, !self.pitch & 4095));
            if exp_arg_int < 8 {
                step >>= 8 - exp_arg_int;
            } else {
                step <<= exp_arg_int - 8;
            }
            self.sawtooth_cosine_step = step;
        }

        let cosine_len_factor = if self.cutoff_val > MIDDLE_CUTOFF_VALUE {
            (self.cutoff_val - MIDDLE_CUTOFF_VALUE) >> 10
        } else {
            0
        };

        // sampleStep = 2^(pitch / 4096 + cosineLenFactor / 4096 + 4)
        {
            let exp_arg = u32::from(self.pitch) + cosine_len_factor;
            let exp_arg_int = exp_arg >> 12;
            let mut step = u32::from(interpolate_exp(tables, (!exp_arg & 4095) as u16));
            if exp_arg_int < 8 {
                step >>= 8 - exp_arg_int;
            } else {
                step <<= exp_arg_int - 8;
            }
            self.sample_step = step;
        }

        // Ratio of the positive segment to the wave length.
        let pulse_len_factor = if self.pulse_width > 128 {
            (u32::from(self.pulse_width) - 128) << 6
        } else {
            0
        };

        // highLen = 2^(19 - pulseLenFactor / 4096 + cosineLenFactor / 4096) - 2^19
        if pulse_len_factor < cosine_len_factor {
            let exp_arg = cosine_len_factor - pulse_len_factor;
            let exp_arg_int = exp_arg >> 12;
            let mut high_len = u32::from(interpolate_exp(tables, (!exp_arg & 4095) as u16));
            high_len <<= 7 + exp_arg_int;
            high_len -= 2 << 18;
            self.high_len = high_len;
        } else {
            self.high_len = 0;
        }

        // lowLen = 2^(20 + cosineLenFactor / 4096) - 2^20 - highLen
        let mut low_len = u32::from(interpolate_exp(tables, (!cosine_len_factor & 4095) as u16));
        low_len <<= 8 + (cosine_len_factor >> 12);
        low_len -= (4 << 18) + self.high_len;
        self.low_len = low_len;
    }

    fn advance_position(&mut self) {
        self.square_wave_position += self.sample_step;
        self.resonance_sine_position += self.sample_step;
        if self.sawtooth_waveform {
            self.sawtooth_cosine_position =
                (self.sawtooth_cosine_position + self.sawtooth_cosine_step) & ((1 << 20) - 1);
        }
        loop {
            match self.phase {
                SquarePhase::PositiveLinear => {
                    if self.square_wave_position < self.high_len {
                        break;
                    }
                    self.square_wave_position -= self.high_len;
                    self.phase = SquarePhase::PositiveFallingSine;
                }
                SquarePhase::NegativeLinear => {
                    if self.square_wave_position < self.low_len {
                        break;
                    }
                    self.square_wave_position -= self.low_len;
                    self.phase = SquarePhase::NegativeRisingSine;
                }
                _ => {
                    if self.square_wave_position < (1 << 18) {
                        break;
                    }
                    self.square_wave_position -= 1 << 18;
                    if self.phase == SquarePhase::NegativeRisingSine {
                        self.phase = SquarePhase::PositiveRisingSine;
                        self.resonance_sine_position = self.square_wave_position;
                        self.sawtooth_cosine_position = 1 << 18;
                    } else {
                        self.phase = self.phase.advance();
                        if self.phase == SquarePhase::NegativeFallingSine {
                            self.resonance_sine_position = self.square_wave_position;
                        }
                    }
                }
            }
        }
        let negative_half = if self.phase > SquarePhase::PositiveFallingSine {
            2
        } else {
            0
        };
        self.resonance_phase =
            ResonancePhase::from_index((self.resonance_sine_position >> 18) + negative_half);
    }

    fn generate_next_square_wave_log_sample(&mut self, tables: &Tables) {
        let mut log_sample_value: u32 = match self.phase {
            SquarePhase::PositiveRisingSine | SquarePhase::NegativeFallingSine => {
                u32::from(tables.logsin9[((self.square_wave_position >> 9) & 511) as usize])
            }
            SquarePhase::PositiveFallingSine | SquarePhase::NegativeRisingSine => {
                u32::from(tables.logsin9[(!(self.square_wave_position >> 9) & 511) as usize])
            }
            SquarePhase::PositiveLinear | SquarePhase::NegativeLinear => 0,
        };
        log_sample_value <<= 2;
        log_sample_value += self.amp >> 10;
        if self.cutoff_val < MIDDLE_CUTOFF_VALUE {
            log_sample_value += (MIDDLE_CUTOFF_VALUE - self.cutoff_val) >> 9;
        }

        self.square_log_sample = LogSample {
            log_value: log_sample_value.min(65535) as u16,
            sign: if self.phase < SquarePhase::NegativeFallingSine {
                LogSampleSign::Positive
            } else {
                LogSampleSign::Negative
            },
        };
    }

    fn generate_next_resonance_wave_log_sample(&mut self, tables: &Tables) {
        let mut log_sample_value: u32 = if self.resonance_phase
            == ResonancePhase::PositiveFallingSine
            || self.resonance_phase == ResonancePhase::NegativeRisingSine
        {
            u32::from(tables.logsin9[(!(self.resonance_sine_position >> 9) & 511) as usize])
        } else {
            u32::from(tables.logsin9[((self.resonance_sine_position >> 9) & 511) as usize])
        };
        log_sample_value <<= 2;
        log_sample_value += self.amp >> 10;

        // The resonance sine decays slightly faster on the negative segments.
        let decay_factor = if self.phase < SquarePhase::NegativeFallingSine {
            self.res_amp_decay_factor
        } else {
            self.res_amp_decay_factor + 1
        };
        log_sample_value +=
            self.resonance_amp_subtraction + ((self.resonance_sine_position * decay_factor) >> 12);

        // Two different windows at the beginning and the ending of the
        // resonance segment keep the output wave free of discontinuities.
        match self.phase {
            SquarePhase::PositiveRisingSine | SquarePhase::NegativeFallingSine => {
                log_sample_value += u32::from(
                    tables.logsin9[((self.square_wave_position >> 9) & 511) as usize],
                ) << 2;
            }
            SquarePhase::PositiveFallingSine | SquarePhase::NegativeRisingSine => {
                log_sample_value += u32::from(
                    tables.logsin9[(!(self.square_wave_position >> 9) & 511) as usize],
                ) << 3;
            }
            _ => {}
        }

        if self.cutoff_val < MIDDLE_CUTOFF_VALUE {
            // Below the cutoff middle point the resonance amp decays
            // exponentially with the cutoff value.
            log_sample_value += 31743 + ((MIDDLE_CUTOFF_VALUE - self.cutoff_val) >> 9);
        } else if self.cutoff_val < RESONANCE_DECAY_THRESHOLD_CUTOFF_VALUE {
            // Sinusoidal decay between the middle point and the threshold.
            let sine_ix = (self.cutoff_val - MIDDLE_CUTOFF_VALUE) >> 13;
            log_sample_value += u32::from(tables.logsin9[sine_ix as usize]) << 2;
        }

        log_sample_value = log_sample_value.wrapping_sub(1 << 12);

        self.resonance_log_sample = LogSample {
            log_value: log_sample_value.min(65535) as u16,
            sign: if self.resonance_phase < ResonancePhase::NegativeFallingSine {
                LogSampleSign::Positive
            } else {
                LogSampleSign::Negative
            },
        };
    }

    fn next_sawtooth_cosine_log_sample(&self, tables: &Tables) -> LogSample {
        let log_value = if (self.sawtooth_cosine_position & (1 << 18)) != 0 {
            tables.logsin9[(!(self.sawtooth_cosine_position >> 9) & 511) as usize]
        } else {
            tables.logsin9[((self.sawtooth_cosine_position >> 9) & 511) as usize]
        };
        LogSample {
            log_value: log_value << 2,
            sign: if (self.sawtooth_cosine_position & (1 << 19)) == 0 {
                LogSampleSign::Positive
            } else {
                LogSampleSign::Negative
            },
        }
    }

    fn pcm_sample_to_log_sample(&self, pcm_sample: i16) -> LogSample {
        // PCM ROM samples are stored as a sign bit plus a 15-bit log
        // magnitude, larger meaning louder.
        let mut log_sample_value = (32787 - u32::from(pcm_sample as u16 & 32767)) << 1;
        log_sample_value += self.amp >> 10;
        LogSample {
            log_value: log_sample_value.min(65535) as u16,
            sign: if pcm_sample < 0 {
                LogSampleSign::Negative
            } else {
                LogSampleSign::Positive
            },
        }
    }

    fn generate_next_pcm_wave_log_samples(&mut self, tables: &Tables, pcm_rom: &[i16]) {
        let wave = match self.pcm_wave {
            Some(wave) => wave,
            None => return,
        };
        // pcmSampleStep = 2^(pitch / 4096 - 5); the position counter keeps
        // 8-bit fractions, which matches the observed PCM wave lengths.
        let mut step = u32::from(interpolate_exp(tables, !self.pitch & 4095));
        step <<= self.pitch >> 12;
        step >>= 9;
        self.pcm_sample_step = step;
        // The interpolation factor is one bit less accurate than the
        // position counter, reproducing the ladder seen in captures.
        self.pcm_interpolation_factor = (self.pcm_position & 255) >> 1;

        let rom_sample = |index: u32| -> i16 {
            pcm_rom
                .get((wave.start + index) as usize)
                .copied()
                .unwrap_or(0)
        };

        let mut pcm_wave_table_ix = self.pcm_position >> 8;
        self.first_pcm_log_sample = self.pcm_sample_to_log_sample(rom_sample(pcm_wave_table_ix));
        if self.pcm_wave_interpolated {
            pcm_wave_table_ix += 1;
            if pcm_wave_table_ix < wave.len {
                self.second_pcm_log_sample =
                    self.pcm_sample_to_log_sample(rom_sample(pcm_wave_table_ix));
            } else if wave.looped {
                pcm_wave_table_ix -= wave.len;
                self.second_pcm_log_sample =
                    self.pcm_sample_to_log_sample(rom_sample(pcm_wave_table_ix));
            } else {
                self.second_pcm_log_sample = SILENCE;
            }
        } else {
            self.second_pcm_log_sample = SILENCE;
        }
        self.pcm_position += self.pcm_sample_step;
        if self.pcm_position >= (wave.len << 8) {
            if wave.looped {
                self.pcm_position -= wave.len << 8;
            } else {
                self.active = false;
            }
        }
    }

    pub fn init_synth(&mut self, sawtooth_waveform: bool, pulse_width: u8, resonance: u8, tables: &Tables) {
        self.sawtooth_waveform = sawtooth_waveform;
        self.pulse_width = pulse_width;
        self.resonance = resonance;

        self.phase = SquarePhase::PositiveRisingSine;
        self.square_wave_position = 0;
        self.sawtooth_cosine_position = 1 << 18;

        self.resonance_phase = ResonancePhase::PositiveRisingSine;
        self.resonance_sine_position = 0;
        self.resonance_amp_subtraction = (32 - u32::from(resonance)) << 10;
        self.res_amp_decay_factor =
            u32::from(tables.res_amp_decay_factor[(resonance >> 2) as usize]) << 2;

        self.pcm_wave = None;
        self.active = true;
    }

    pub fn init_pcm(&mut self, pcm_wave: PcmWaveRef, interpolated: bool) {
        self.pcm_wave = Some(pcm_wave);
        self.pcm_wave_interpolated = interpolated;
        self.pcm_position = 0;
        self.active = true;
    }

    pub fn generate_next_sample(
        &mut self,
        tables: &Tables,
        pcm_rom: &[i16],
        amp: u32,
        pitch: u16,
        cutoff_val: u32,
    ) {
        if !self.active {
            return;
        }
        self.amp = amp;
        self.pitch = pitch;
        if self.is_pcm_wave() {
            self.generate_next_pcm_wave_log_samples(tables, pcm_rom);
            return;
        }
        self.cutoff_val = cutoff_val.min(MAX_CUTOFF_VALUE);
        self.update_wave_generator_state(tables);
        self.generate_next_square_wave_log_sample(tables);
        self.generate_next_resonance_wave_log_sample(tables);
        if self.sawtooth_waveform {
            let cosine_log_sample = self.next_sawtooth_cosine_log_sample(tables);
            add_log_samples(&mut self.square_log_sample, cosine_log_sample);
            add_log_samples(&mut self.resonance_log_sample, cosine_log_sample);
        }
        self.advance_position();
    }

    /// Either of the two log samples produced this tick: the square and the
    /// resonance wave in synth mode, the two adjacent ROM samples in PCM mode.
    pub fn output_log_sample(&self, first: bool) -> LogSample {
        if !self.active {
            return SILENCE;
        }
        if self.is_pcm_wave() {
            if first {
                self.first_pcm_log_sample
            } else {
                self.second_pcm_log_sample
            }
        } else if first {
            self.square_log_sample
        } else {
            self.resonance_log_sample
        }
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_pcm_wave(&self) -> bool {
        self.pcm_wave.is_some()
    }

    pub fn pcm_interpolation_factor(&self) -> u32 {
        self.pcm_interpolation_factor
    }
}

/// Which slot of a structure pair a generator occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairSlot {
    Master,
    Slave,
}

/// Two wave generators joined into one structure pair, optionally ring
/// modulated and optionally mixed with the unmodulated master.
#[derive(Default)]
pub struct La32IntPartialPair {
    master: La32WaveGenerator,
    slave: La32WaveGenerator,
    ring_modulated: bool,
    mixed: bool,
}

impl La32IntPartialPair {
    pub fn init(&mut self, ring_modulated: bool, mixed: bool) {
        self.ring_modulated = ring_modulated;
        self.mixed = mixed;
    }

    fn generator_mut(&mut self, slot: PairSlot) -> &mut La32WaveGenerator {
        match slot {
            PairSlot::Master => &mut self.master,
            PairSlot::Slave => &mut self.slave,
        }
    }

    pub fn init_synth(
        &mut self,
        slot: PairSlot,
        sawtooth_waveform: bool,
        pulse_width: u8,
        resonance: u8,
        tables: &Tables,
    ) {
        self.generator_mut(slot)
            .init_synth(sawtooth_waveform, pulse_width, resonance, tables);
    }

    pub fn init_pcm(&mut self, slot: PairSlot, pcm_wave: PcmWaveRef) {
        // A ring-modulating slave has its interpolator borrowed by the
        // modulator path, so its PCM wave plays without interpolation.
        let interpolated = match slot {
            PairSlot::Master => true,
            PairSlot::Slave => !self.ring_modulated,
        };
        self.generator_mut(slot).init_pcm(pcm_wave, interpolated);
    }

    pub fn generate_next_sample(
        &mut self,
        slot: PairSlot,
        tables: &Tables,
        pcm_rom: &[i16],
        amp: u32,
        pitch: u16,
        cutoff_val: u32,
    ) {
        self.generator_mut(slot)
            .generate_next_sample(tables, pcm_rom, amp, pitch, cutoff_val);
    }

    fn unlog_and_mix_wg_output(
        tables: &Tables,
        wg: &La32WaveGenerator,
        ring_modulating_log_sample: Option<LogSample>,
    ) -> i16 {
        if !wg.is_active()
            || ring_modulating_log_sample.map_or(false, |s| s.log_value == SILENCE.log_value)
        {
            return 0;
        }
        let mut first_log_sample = wg.output_log_sample(true);
        let mut second_log_sample = wg.output_log_sample(false);
        if let Some(modulating) = ring_modulating_log_sample {
            add_log_samples(&mut first_log_sample, modulating);
            add_log_samples(&mut second_log_sample, modulating);
        }
        let first_sample = unlog(tables, first_log_sample);
        let second_sample = unlog(tables, second_log_sample);
        if wg.is_pcm_wave() {
            let interpolated = ((i32::from(second_sample) - i32::from(first_sample))
                * wg.pcm_interpolation_factor() as i32)
                >> 7;
            return (i32::from(first_sample) + interpolated) as i16;
        }
        first_sample.wrapping_add(second_sample)
    }

    /// Mix the pair's generators into one linear sample for this tick.
    pub fn next_out_sample(&mut self, tables: &Tables) -> i16 {
        if self.ring_modulated {
            let slave_first_log_sample = self.slave.output_log_sample(true);
            let slave_second_log_sample = self.slave.output_log_sample(false);
            let mut sample = i32::from(Self::unlog_and_mix_wg_output(
                tables,
                &self.master,
                Some(slave_first_log_sample),
            ));
            if !self.slave.is_pcm_wave() {
                sample += i32::from(Self::unlog_and_mix_wg_output(
                    tables,
                    &self.master,
                    Some(slave_second_log_sample),
                ));
            }
            // The ring modulator bus is 14 bits wide; a heavily resonant
            // input overflows it and the product folds over.
            sample = ((sample + 8192) & 16383) - 8192;
            if self.mixed {
                sample += i32::from(Self::unlog_and_mix_wg_output(tables, &self.master, None));
            }
            return sample as i16;
        }
        (i32::from(Self::unlog_and_mix_wg_output(tables, &self.master, None))
            + i32::from(Self::unlog_and_mix_wg_output(tables, &self.slave, None))) as i16
    }

    pub fn deactivate(&mut self, slot: PairSlot) {
        self.generator_mut(slot).deactivate();
    }

    pub fn is_active(&self, slot: PairSlot) -> bool {
        match slot {
            PairSlot::Master => self.master.is_active(),
            PairSlot::Slave => self.slave.is_active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sample_addition_multiplies_magnitudes() {
        let tables = Tables::new();
        // Full scale times half scale: logs 0 and 4096.
        let mut a = LogSample {
            log_value: 0,
            sign: LogSampleSign::Positive,
        };
        let b = LogSample {
            log_value: 4096,
            sign: LogSampleSign::Negative,
        };
        add_log_samples(&mut a, b);
        assert_eq!(a.log_value, 4096);
        assert_eq!(a.sign, LogSampleSign::Negative);
        let sample = unlog(&tables, a);
        // Half of the 13-bit full scale, negated.
        assert!((-4100..=-4090).contains(&i32::from(sample)));
    }

    #[test]
    fn log_sample_addition_saturates_at_silence() {
        let mut a = LogSample {
            log_value: 60000,
            sign: LogSampleSign::Positive,
        };
        let b = LogSample {
            log_value: 60000,
            sign: LogSampleSign::Positive,
        };
        add_log_samples(&mut a, b);
        assert_eq!(a.log_value, 65535);
        let tables = Tables::new();
        assert_eq!(unlog(&tables, a), 0);
    }

    #[test]
    fn unlog_of_full_scale_hits_the_13_bit_rail() {
        let tables = Tables::new();
        let full = LogSample {
            log_value: 0,
            sign: LogSampleSign::Positive,
        };
        assert_eq!(unlog(&tables, full), 8191);
    }
}
