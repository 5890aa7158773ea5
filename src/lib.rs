//! Emulation of the LA-synthesis sound core of classic Roland MT-32 family modules.
//!
//! The crate models the complete audio path of the hardware: the LA32 partial
//! wave generator working in a logarithmic fixed-point domain, the three
//! envelope machines driving amplitude, filter cutoff and pitch, the partial
//! allocator that arbitrates 32 oscillator slots between nine parts, three
//! interchangeable reverb topologies, and the analog output stage with its
//! optional upsampling filters.
//!
//! A [`Synth`](synth::Synth) is opened from a control ROM and a PCM ROM image
//! (see the [`rom`] module for recognition and pairing of ROM dumps), consumes
//! timestamped MIDI messages through a bounded queue, and renders interleaved
//! stereo either as 16-bit integers or as floats.

pub mod analog;
pub mod control_rom;
pub mod la32;
pub mod la32_float;
pub mod math;
pub mod midi;
pub mod params;
pub mod part;
pub mod partial;
pub mod partial_manager;
pub mod poly;
pub mod reverb;
pub mod rom;
pub mod synth;
pub mod tables;
pub mod tva;
pub mod tvf;
pub mod tvp;

pub use rom::{RomFile, RomImage, RomInfo};
pub use synth::{OpenError, ReportEvent, Synth, SynthOptions};

use math::clip16;

/// Native sample rate of the LA32, in Hz.
pub const SAMPLE_RATE: u32 = 32000;

/// Number of partials in the hardware pool.
pub const DEFAULT_MAX_PARTIALS: usize = 32;

/// Upper bound on the number of frames rendered in one internal pass.
pub const MAX_SAMPLES_PER_RUN: usize = 4096;

/// Size of a full control ROM image in bytes.
pub const CONTROL_ROM_SIZE: usize = 64 * 1024;

/// Flavor of the sample pipeline selected when the synth is opened.
///
/// The integer renderer reproduces the production fixed-point path of the
/// LA32; the float renderer is the continuous-math reference implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RendererType {
    #[default]
    Bit16s,
    Float,
}

/// Emulation mode of the stereo analog circuit behind the DAC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AnalogOutputMode {
    /// Bypass the circuit; only mix the DAC streams at the native rate.
    DigitalOnly,
    /// Single tone-shaping filter at the native 32 kHz rate.
    #[default]
    Coarse,
    /// 3x upsampling to 48 kHz with accurate mirror-spectra shaping.
    Accurate,
    /// 6x upsampling to 96 kHz with the same transfer function.
    Oversampled,
}

/// Gain staging applied between the LA32 mix and the DAC.
///
/// The default `Nice` mode doubles the LA32 output with saturation, which
/// matches how loud the hardware sounds without reproducing its wrapping.
/// `Pure` passes the mix through untouched. The two generation modes
/// reproduce how the DAC input bus was actually wired: the sample shifted
/// up one bit with the sign kept in place, the second generation feeding
/// the dropped top bit back into the LSB.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DacInputMode {
    #[default]
    Nice,
    Pure,
    Generation1,
    Generation2,
}

/// Externally visible state of one partial slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PartialState {
    #[default]
    Inactive,
    Attack,
    Sustain,
    Release,
}

/// Sample format of the rendered output stream.
///
/// Implemented for `i16` (clipped) and `f32` (full scale 1.0 = 32768).
pub trait OutputSample: Copy + Default {
    /// Convert from a 16-bit-range accumulator, clipping as needed.
    fn from_accumulator(value: i32) -> Self;
    /// Convert from a float sample at full scale 1.0.
    fn from_float(value: f32) -> Self;
    /// This sample as a float at full scale 1.0.
    fn to_float(self) -> f32;
    /// Saturating mix of two samples.
    fn mix(self, other: Self) -> Self;
    /// Gain staging between the LA32 mix and the DAC. Only the integer
    /// format can express the generation modes' bit rewiring; the float
    /// format treats them as a clean doubling.
    fn dac_shape(self, mode: DacInputMode) -> Self;
}

impl OutputSample for i16 {
    #[inline]
    fn from_accumulator(value: i32) -> Self {
        clip16(value)
    }
    #[inline]
    fn from_float(value: f32) -> Self {
        clip16((value * 32768.0) as i32)
    }
    #[inline]
    fn to_float(self) -> f32 {
        f32::from(self) / 32768.0
    }
    #[inline]
    fn mix(self, other: Self) -> Self {
        clip16(i32::from(self) + i32::from(other))
    }
    #[inline]
    fn dac_shape(self, mode: DacInputMode) -> Self {
        let sample = self as u16;
        match mode {
            DacInputMode::Nice => clip16(2 * i32::from(self)),
            DacInputMode::Pure => self,
            DacInputMode::Generation1 => ((sample & 0x8000) | ((sample << 1) & 0x7FFE)) as i16,
            DacInputMode::Generation2 => {
                ((sample & 0x8000) | ((sample << 1) & 0x7FFE) | ((sample >> 14) & 0x0001)) as i16
            }
        }
    }
}

impl OutputSample for f32 {
    #[inline]
    fn from_accumulator(value: i32) -> Self {
        value as f32 / 32768.0
    }
    #[inline]
    fn from_float(value: f32) -> Self {
        value
    }
    #[inline]
    fn to_float(self) -> f32 {
        self
    }
    #[inline]
    fn mix(self, other: Self) -> Self {
        self + other
    }
    #[inline]
    fn dac_shape(self, mode: DacInputMode) -> Self {
        match mode {
            DacInputMode::Pure => self,
            _ => self * 2.0,
        }
    }
}
