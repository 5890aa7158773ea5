//! Float reference implementation of the LA32 partial pair.
//!
//! Runs the same six-segment phase machine as the integer generator in
//! [`crate::la32`] but evaluates every waveform and attenuation with
//! continuous math instead of the 9-bit log tables. Full scale of a single
//! wave is 0.25, matching the 13-bit rail of the integer path against a
//! 16-bit output. Selected at open time as the `Float` renderer.

use crate::la32::{PairSlot, PcmWaveRef};
use crate::math::exp2f;
use crate::tables::Tables;

const MIDDLE_CUTOFF_VALUE: u32 = crate::la32::MIDDLE_CUTOFF_VALUE;
const RESONANCE_DECAY_THRESHOLD_CUTOFF_VALUE: u32 =
    crate::la32::RESONANCE_DECAY_THRESHOLD_CUTOFF_VALUE;
const MAX_CUTOFF_VALUE: u32 = crate::la32::MAX_CUTOFF_VALUE;

const FULL_SCALE: f32 = 0.25;
const FRAC_PI_2: f32 = core::f32::consts::FRAC_PI_2;

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

/// Attenuation of `units` in the 4096-per-octave log domain as a factor.
#[inline]
fn log_units_to_factor(units: f32) -> f32 {
    exp2f(-units / 4096.0)
}

/// One float oscillator of a partial pair.
#[derive(Default)]
pub struct La32FloatWaveGenerator {
    active: bool,

    amp: u32,
    pitch: u16,
    cutoff_val: u32,

    sawtooth_waveform: bool,
    pulse_width: u8,
    resonance: u8,

    phase: SquarePhase,
    square_wave_position: u32,
    sample_step: u32,
    high_len: u32,
    low_len: u32,

    resonance_sine_position: u32,
    resonance_negative_half: bool,
    resonance_amp_subtraction: f32,
    res_amp_decay_factor: f32,

    sawtooth_cosine_position: u32,
    sawtooth_cosine_step: u32,

    square_sample: f32,
    resonance_sample: f32,

    pcm_wave: Option<PcmWaveRef>,
    pcm_wave_interpolated: bool,
    pcm_position: u32,
    first_pcm_sample: f32,
    second_pcm_sample: f32,
    pcm_interpolation_factor: f32,
}

impl La32FloatWaveGenerator {
    /// Positions and segment lengths follow the integer generator exactly so
    /// that both paths stay phase locked; only amplitudes are continuous.
    fn update_wave_generator_state(&mut self) {
        let pitch = f32::from(self.pitch);
        if self.sawtooth_waveform {
            self.sawtooth_cosine_step = exp2f(pitch / 4096.0 + 4.0) as u32;
        }

        let cosine_len_factor = if self.cutoff_val > MIDDLE_CUTOFF_VALUE {
            ((self.cutoff_val - MIDDLE_CUTOFF_VALUE) >> 10) as f32
        } else {
            0.0
        };

        self.sample_step = exp2f(pitch / 4096.0 + cosine_len_factor / 4096.0 + 4.0) as u32;

        let pulse_len_factor = if self.pulse_width > 128 {
            ((u32::from(self.pulse_width) - 128) << 6) as f32
        } else {
            0.0
        };

        self.high_len = if pulse_len_factor < cosine_len_factor {
            (exp2f(19.0 + (cosine_len_factor - pulse_len_factor) / 4096.0) - (1 << 19) as f32)
                as u32
        } else {
            0
        };
        self.low_len = (exp2f(20.0 + cosine_len_factor / 4096.0) - (1 << 20) as f32) as u32
            - self.high_len;
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
        self.resonance_negative_half = self.phase > SquarePhase::PositiveFallingSine;
    }

    /// Waveform magnitude of a sine segment at a position inside it.
    #[inline]
    fn segment_sine(position: u32, falling: bool) -> f32 {
        let w = position as f32 / (1 << 18) as f32;
        if falling {
            (FRAC_PI_2 * (1.0 - w)).sin()
        } else {
            (FRAC_PI_2 * w).sin()
        }
    }

    fn amp_factor(&self) -> f32 {
        // amp is an attenuation in 1024ths of the 4096-per-octave log unit;
        // past the 16-bit log range the integer path saturates to silence.
        if self.amp >= 65536 << 10 {
            return 0.0;
        }
        log_units_to_factor(self.amp as f32 / 1024.0)
    }

    fn generate_next_square_wave_sample(&mut self) {
        let magnitude = match self.phase {
            SquarePhase::PositiveRisingSine | SquarePhase::NegativeFallingSine => {
                Self::segment_sine(self.square_wave_position, false)
            }
            SquarePhase::PositiveFallingSine | SquarePhase::NegativeRisingSine => {
                Self::segment_sine(self.square_wave_position, true)
            }
            SquarePhase::PositiveLinear | SquarePhase::NegativeLinear => 1.0,
        };
        let mut sample = FULL_SCALE * magnitude * self.amp_factor();
        if self.cutoff_val < MIDDLE_CUTOFF_VALUE {
            sample *= log_units_to_factor((MIDDLE_CUTOFF_VALUE - self.cutoff_val) as f32 / 512.0);
        }
        self.square_sample = if self.phase < SquarePhase::NegativeFallingSine {
            sample
        } else {
            -sample
        };
    }

    fn generate_next_resonance_wave_sample(&mut self) {
        let res_position = self.resonance_sine_position;
        let res_index = (res_position >> 18) + if self.resonance_negative_half { 2 } else { 0 };
        let falling = matches!(res_index & 3, 1 | 3);
        let mut sample =
            FULL_SCALE * Self::segment_sine(res_position & ((1 << 18) - 1), falling)
                * self.amp_factor();

        // The resonance sine decays slightly faster on the negative half.
        let decay_factor = if self.phase < SquarePhase::NegativeFallingSine {
            self.res_amp_decay_factor
        } else {
            self.res_amp_decay_factor + 1.0
        };
        sample *= log_units_to_factor(self.resonance_amp_subtraction);
        sample *= log_units_to_factor(res_position as f32 * decay_factor / 4096.0);

        // Windows at both ends of the segment keep the wave continuous.
        match self.phase {
            SquarePhase::PositiveRisingSine | SquarePhase::NegativeFallingSine => {
                sample *= Self::segment_sine(self.square_wave_position, false);
            }
            SquarePhase::PositiveFallingSine | SquarePhase::NegativeRisingSine => {
                let window = Self::segment_sine(self.square_wave_position, true);
                sample *= window * window;
            }
            _ => {}
        }

        if self.cutoff_val < MIDDLE_CUTOFF_VALUE {
            sample *= log_units_to_factor(31743.0)
                * log_units_to_factor((MIDDLE_CUTOFF_VALUE - self.cutoff_val) as f32 / 512.0);
        } else if self.cutoff_val < RESONANCE_DECAY_THRESHOLD_CUTOFF_VALUE {
            let w = (self.cutoff_val - MIDDLE_CUTOFF_VALUE) as f32
                / (RESONANCE_DECAY_THRESHOLD_CUTOFF_VALUE - MIDDLE_CUTOFF_VALUE) as f32;
            sample *= (FRAC_PI_2 * w).sin();
        }

        sample *= 2.0;

        self.resonance_sample = if res_index & 2 == 0 { sample } else { -sample };
    }

    fn next_sawtooth_cosine_sample(&self) -> f32 {
        let position = self.sawtooth_cosine_position;
        let magnitude = Self::segment_sine(position & ((1 << 18) - 1), (position & (1 << 18)) != 0);
        if position & (1 << 19) == 0 {
            magnitude
        } else {
            -magnitude
        }
    }

    fn pcm_sample_to_float(&self, pcm_sample: i16) -> f32 {
        let log15 = u32::from(pcm_sample as u16 & 32767);
        let magnitude = FULL_SCALE
            * log_units_to_factor(((32787 - log15) << 1) as f32)
            * self.amp_factor();
        if pcm_sample < 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    fn generate_next_pcm_wave_samples(&mut self, pcm_rom: &[i16]) {
        let wave = match self.pcm_wave {
            Some(wave) => wave,
            None => return,
        };
        let pcm_sample_step = (exp2f(f32::from(self.pitch) / 4096.0 - 5.0) * 256.0) as u32;
        self.pcm_interpolation_factor = ((self.pcm_position & 255) >> 1) as f32 / 128.0;

        let rom_sample = |index: u32| -> i16 {
            pcm_rom
                .get((wave.start + index) as usize)
                .copied()
                .unwrap_or(0)
        };

        let mut ix = self.pcm_position >> 8;
        self.first_pcm_sample = self.pcm_sample_to_float(rom_sample(ix));
        if self.pcm_wave_interpolated {
            ix += 1;
            if ix < wave.len {
                self.second_pcm_sample = self.pcm_sample_to_float(rom_sample(ix));
            } else if wave.looped {
                self.second_pcm_sample = self.pcm_sample_to_float(rom_sample(ix - wave.len));
            } else {
                self.second_pcm_sample = 0.0;
            }
        } else {
            self.second_pcm_sample = 0.0;
        }
        self.pcm_position += pcm_sample_step;
        if self.pcm_position >= (wave.len << 8) {
            if wave.looped {
                self.pcm_position -= wave.len << 8;
            } else {
                self.active = false;
            }
        }
    }

    pub fn init_synth(&mut self, sawtooth_waveform: bool, pulse_width: u8, resonance: u8) {
        self.sawtooth_waveform = sawtooth_waveform;
        self.pulse_width = pulse_width;
        self.resonance = resonance;

        self.phase = SquarePhase::PositiveRisingSine;
        self.square_wave_position = 0;
        self.sawtooth_cosine_position = 1 << 18;

        self.resonance_negative_half = false;
        self.resonance_sine_position = 0;
        self.resonance_amp_subtraction = f32::from(32 - resonance.min(32)) * 1024.0;
        self.res_amp_decay_factor = 0.0;

        self.pcm_wave = None;
        self.active = true;
    }

    fn set_res_amp_decay_factor(&mut self, tables: &Tables) {
        self.res_amp_decay_factor =
            f32::from(tables.res_amp_decay_factor[(self.resonance >> 2) as usize]) * 4.0;
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
        if self.pcm_wave.is_some() {
            self.generate_next_pcm_wave_samples(pcm_rom);
            return;
        }
        self.cutoff_val = cutoff_val.min(MAX_CUTOFF_VALUE);
        self.set_res_amp_decay_factor(tables);
        self.update_wave_generator_state();
        self.generate_next_square_wave_sample();
        self.generate_next_resonance_wave_sample();
        if self.sawtooth_waveform {
            let cosine = self.next_sawtooth_cosine_sample();
            self.square_sample *= cosine;
            self.resonance_sample *= cosine;
        }
        self.advance_position();
    }

    pub fn output_sample(&self, first: bool) -> f32 {
        if !self.active {
            return 0.0;
        }
        if self.pcm_wave.is_some() {
            if first {
                self.first_pcm_sample
            } else {
                self.second_pcm_sample
            }
        } else if first {
            self.square_sample
        } else {
            self.resonance_sample
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

    pub fn pcm_interpolation_factor(&self) -> f32 {
        self.pcm_interpolation_factor
    }
}

/// Float twin of [`crate::la32::La32IntPartialPair`].
#[derive(Default)]
pub struct La32FloatPartialPair {
    master: La32FloatWaveGenerator,
    slave: La32FloatWaveGenerator,
    ring_modulated: bool,
    mixed: bool,
}

impl La32FloatPartialPair {
    pub fn init(&mut self, ring_modulated: bool, mixed: bool) {
        self.ring_modulated = ring_modulated;
        self.mixed = mixed;
    }

    fn generator_mut(&mut self, slot: PairSlot) -> &mut La32FloatWaveGenerator {
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
    ) {
        self.generator_mut(slot)
            .init_synth(sawtooth_waveform, pulse_width, resonance);
    }

    pub fn init_pcm(&mut self, slot: PairSlot, pcm_wave: PcmWaveRef) {
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

    fn mix_wg_output(wg: &La32FloatWaveGenerator, modulator: Option<f32>) -> f32 {
        if !wg.is_active() {
            return 0.0;
        }
        // In the ring-modulated path the modulator multiplies in place of a
        // log-domain addition, and full scale 0.25 must stay the unit gain.
        let scale = |sample: f32, modulator: Option<f32>| match modulator {
            Some(m) => sample * m / FULL_SCALE,
            None => sample,
        };
        let first = scale(wg.output_sample(true), modulator);
        let second = scale(wg.output_sample(false), modulator);
        if wg.is_pcm_wave() {
            return first + (second - first) * wg.pcm_interpolation_factor();
        }
        first + second
    }

    pub fn next_out_sample(&mut self) -> f32 {
        if self.ring_modulated {
            let slave_first = self.slave.output_sample(true);
            let slave_second = self.slave.output_sample(false);
            let mut sample = Self::mix_wg_output(&self.master, Some(slave_first));
            if !self.slave.is_pcm_wave() {
                sample += Self::mix_wg_output(&self.master, Some(slave_second));
            }
            // The ring modulator bus folds over at full scale, like the
            // 14-bit overflow of the integer path.
            sample = (sample + FULL_SCALE).rem_euclid(2.0 * FULL_SCALE) - FULL_SCALE;
            if self.mixed {
                sample += Self::mix_wg_output(&self.master, None);
            }
            return sample;
        }
        Self::mix_wg_output(&self.master, None) + Self::mix_wg_output(&self.slave, None)
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
