//! Analog output stage: stream mixing, tone-shaping and optional upsampling.
//!
//! The stage consumes the six DAC streams (non-reverb, reverb-dry and
//! reverb-wet stereo pairs) and produces the interleaved stereo output. In
//! `DigitalOnly` mode it only mixes; `Coarse` adds the tone filter of the
//! output circuit at the native rate; `Accurate` and `Oversampled` run the
//! same transfer function at 3x the native rate, `Accurate` then taking
//! every second sample for a 48 kHz stream.

use crate::{AnalogOutputMode, OutputSample, SAMPLE_RATE};

/// Gain of the reverb return relative to the LA32 mix on the
/// CM-32L-generation output circuit.
const NEW_GEN_REVERB_GAIN: f32 = 0.68;

/// Coarse-mode tone filter of the later-generation output circuit. The
/// endpoints are pinned to the measured response: 0.99497 at DC, 1.53186
/// at the Nyquist frequency.
const COARSE_TAPS_NEW_GEN: [f32; 5] = [-0.2549, -0.13422, 1.7732126, -0.13422, -0.2549];

/// Coarse-mode tone filter of the early units: 0.99697 at DC with a
/// slight cut to 0.94803 at the Nyquist frequency, the boost peaking
/// below it.
const COARSE_TAPS_OLD_GEN: [f32; 5] = [-0.1565, 0.0122353, 1.2854959, 0.0122353, -0.1565];

/// Tone stage run before the upsampler in the accurate modes. Unlike the
/// coarse filter this one passes DC at exactly unity gain.
const ACCURATE_TAPS_NEW_GEN: [f32; 5] = [-0.2549, -0.1325, 1.7748, -0.1325, -0.2549];

/// Early-unit variant of the accurate-mode tone stage, also unity at DC.
const ACCURATE_TAPS_OLD_GEN: [f32; 5] = [-0.1565, 0.0125, 1.288, 0.0125, -0.1565];

/// Interpolation filter for the 3x upsampled modes: windowed sinc with a
/// deliberately slow rolloff, letting through the mirror spectra the way
/// the reconstruction circuit of the hardware does.
const UPSAMPLE_TAPS: usize = 25;

fn upsample_taps() -> [f32; UPSAMPLE_TAPS] {
    let mut taps = [0.0f32; UPSAMPLE_TAPS];
    let center = (UPSAMPLE_TAPS / 2) as f32;
    for (n, tap) in taps.iter_mut().enumerate() {
        let x = (n as f32 - center) / 3.0;
        let sinc = if x == 0.0 {
            1.0
        } else {
            (core::f32::consts::PI * x).sin() / (core::f32::consts::PI * x)
        };
        let window =
            0.5 + 0.5 * (core::f32::consts::PI * (n as f32 - center) / (center + 1.0)).cos();
        *tap = sinc * window;
    }
    taps
}

/// Sample formats the stage can mix with the semantics of the hardware
/// (integer mixing runs the gains in 8-bit fixed point).
pub trait DacSample: OutputSample {
    fn mix_dac(non_reverb: Self, dry: Self, wet: Self, synth_gain: f32, reverb_gain: f32) -> Self;
}

impl DacSample for f32 {
    #[inline]
    fn mix_dac(non_reverb: f32, dry: f32, wet: f32, synth_gain: f32, reverb_gain: f32) -> f32 {
        (non_reverb + dry) * synth_gain + wet * reverb_gain
    }
}

impl DacSample for i16 {
    #[inline]
    fn mix_dac(non_reverb: i16, dry: i16, wet: i16, synth_gain: f32, reverb_gain: f32) -> i16 {
        let synth_q8 = (synth_gain * 256.0) as i32;
        let reverb_q8 = (reverb_gain * 256.0) as i32;
        let mixed = ((i32::from(non_reverb) * synth_q8) >> 8)
            + ((i32::from(dry) * synth_q8) >> 8)
            + ((i32::from(wet) * reverb_q8) >> 8);
        crate::math::clip16(mixed)
    }
}

struct ToneFilter {
    taps: &'static [f32; 5],
    history: [f32; 5],
}

impl ToneFilter {
    fn new(taps: &'static [f32; 5]) -> ToneFilter {
        ToneFilter {
            taps,
            history: [0.0; 5],
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        self.history.rotate_right(1);
        self.history[0] = input;
        let mut acc = 0.0;
        for (tap, sample) in self.taps.iter().zip(self.history.iter()) {
            acc += tap * sample;
        }
        acc
    }
}

/// 3x zero-stuffing upsampler running the interpolation filter.
struct Upsampler {
    taps: [f32; UPSAMPLE_TAPS],
    history: [f32; UPSAMPLE_TAPS],
}

impl Upsampler {
    fn new() -> Upsampler {
        Upsampler {
            taps: upsample_taps(),
            history: [0.0; UPSAMPLE_TAPS],
        }
    }

    /// Push one input sample, produce three output samples.
    #[inline]
    fn process(&mut self, input: f32, out: &mut [f32; 3]) {
        for (phase, slot) in out.iter_mut().enumerate() {
            self.history.rotate_right(1);
            self.history[0] = if phase == 0 { input * 3.0 } else { 0.0 };
            let mut acc = 0.0;
            for (tap, sample) in self.taps.iter().zip(self.history.iter()) {
                acc += tap * sample;
            }
            *slot = acc;
        }
    }
}

struct Channel {
    tone: ToneFilter,
    upsampler: Upsampler,
}

/// The analog post-stage.
pub struct Analog {
    mode: AnalogOutputMode,
    old_gen: bool,
    synth_gain: f32,
    reverb_gain: f32,
    channels: [Channel; 2],
    /// Decimation phase for `Accurate` mode: 1 when the next upsampled
    /// sample is dropped.
    decimation_carry: usize,
    /// Upsampled frames produced past the end of an output buffer, emitted
    /// first on the next call. At most two can accumulate.
    pending: Vec<(f32, f32)>,
}

impl Analog {
    pub fn new(mode: AnalogOutputMode, old_gen: bool) -> Analog {
        // The real output circuit behaves differently at the two rates:
        // the coarse filter loses a little level at DC, while the
        // upsampled modes pass DC untouched.
        let taps = match (mode, old_gen) {
            (AnalogOutputMode::Coarse, false) => &COARSE_TAPS_NEW_GEN,
            (AnalogOutputMode::Coarse, true) => &COARSE_TAPS_OLD_GEN,
            (_, false) => &ACCURATE_TAPS_NEW_GEN,
            (_, true) => &ACCURATE_TAPS_OLD_GEN,
        };
        let channel = || Channel {
            tone: ToneFilter::new(taps),
            upsampler: Upsampler::new(),
        };
        Analog {
            mode,
            old_gen,
            synth_gain: 1.0,
            reverb_gain: if old_gen { 1.0 } else { NEW_GEN_REVERB_GAIN },
            channels: [channel(), channel()],
            decimation_carry: 0,
            pending: Vec::new(),
        }
    }

    pub fn mode(&self) -> AnalogOutputMode {
        self.mode
    }

    pub fn set_synth_output_gain(&mut self, gain: f32) {
        self.synth_gain = gain;
    }

    pub fn set_reverb_output_gain(&mut self, gain: f32) {
        self.reverb_gain = if self.old_gen {
            gain
        } else {
            gain * NEW_GEN_REVERB_GAIN
        };
    }

    /// Sample rate of the produced stream.
    pub fn output_sample_rate(&self) -> u32 {
        match self.mode {
            AnalogOutputMode::DigitalOnly | AnalogOutputMode::Coarse => SAMPLE_RATE,
            AnalogOutputMode::Accurate => SAMPLE_RATE * 3 / 2,
            AnalogOutputMode::Oversampled => SAMPLE_RATE * 3,
        }
    }

    /// Number of 32 kHz input frames needed to produce `out_frames` output
    /// frames from the current filter state.
    pub fn dac_streams_length(&self, out_frames: usize) -> usize {
        let out_frames = out_frames.saturating_sub(self.pending.len());
        match self.mode {
            AnalogOutputMode::DigitalOnly | AnalogOutputMode::Coarse => out_frames,
            AnalogOutputMode::Accurate => {
                (out_frames * 2 + self.decimation_carry).div_ceil(3)
            }
            AnalogOutputMode::Oversampled => out_frames.div_ceil(3),
        }
    }

    fn mix_float<S: DacSample>(&self, non_reverb: S, dry: S, wet: S) -> f32 {
        (non_reverb.to_float() + dry.to_float()) * self.synth_gain
            + wet.to_float() * self.reverb_gain
    }

    /// Mix and filter the DAC streams into an interleaved stereo buffer.
    /// The input slices hold `dac_streams_length(output.len() / 2)` frames.
    #[allow(clippy::too_many_arguments)]
    pub fn process<S: DacSample>(
        &mut self,
        output: &mut [S],
        non_reverb_left: &[S],
        non_reverb_right: &[S],
        reverb_dry_left: &[S],
        reverb_dry_right: &[S],
        reverb_wet_left: &[S],
        reverb_wet_right: &[S],
    ) {
        let in_frames = non_reverb_left.len();
        match self.mode {
            AnalogOutputMode::DigitalOnly => {
                for i in 0..in_frames {
                    output[2 * i] = S::mix_dac(
                        non_reverb_left[i],
                        reverb_dry_left[i],
                        reverb_wet_left[i],
                        self.synth_gain,
                        self.reverb_gain,
                    );
                    output[2 * i + 1] = S::mix_dac(
                        non_reverb_right[i],
                        reverb_dry_right[i],
                        reverb_wet_right[i],
                        self.synth_gain,
                        self.reverb_gain,
                    );
                }
            }
            AnalogOutputMode::Coarse => {
                for i in 0..in_frames {
                    let left =
                        self.mix_float(non_reverb_left[i], reverb_dry_left[i], reverb_wet_left[i]);
                    let right = self.mix_float(
                        non_reverb_right[i],
                        reverb_dry_right[i],
                        reverb_wet_right[i],
                    );
                    output[2 * i] = S::from_float(self.channels[0].tone.process(left));
                    output[2 * i + 1] = S::from_float(self.channels[1].tone.process(right));
                }
            }
            AnalogOutputMode::Accurate | AnalogOutputMode::Oversampled => {
                let decimate = self.mode == AnalogOutputMode::Accurate;
                let out_frames = output.len() / 2;
                let mut out_frame = 0;
                // Frames carried over from the previous call go out first.
                while out_frame < out_frames && !self.pending.is_empty() {
                    let (left, right) = self.pending.remove(0);
                    output[2 * out_frame] = S::from_float(left);
                    output[2 * out_frame + 1] = S::from_float(right);
                    out_frame += 1;
                }
                let mut upsampled = [[0.0f32; 3]; 2];
                for i in 0..in_frames {
                    let left =
                        self.mix_float(non_reverb_left[i], reverb_dry_left[i], reverb_wet_left[i]);
                    let right = self.mix_float(
                        non_reverb_right[i],
                        reverb_dry_right[i],
                        reverb_wet_right[i],
                    );
                    let left = self.channels[0].tone.process(left);
                    let right = self.channels[1].tone.process(right);
                    self.channels[0].upsampler.process(left, &mut upsampled[0]);
                    self.channels[1].upsampler.process(right, &mut upsampled[1]);
                    for phase in 0..3 {
                        if decimate {
                            if self.decimation_carry == 1 {
                                self.decimation_carry = 0;
                                continue;
                            }
                            self.decimation_carry = 1;
                        }
                        if out_frame < out_frames {
                            output[2 * out_frame] = S::from_float(upsampled[0][phase]);
                            output[2 * out_frame + 1] = S::from_float(upsampled[1][phase]);
                            out_frame += 1;
                        } else {
                            self.pending.push((upsampled[0][phase], upsampled[1][phase]));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(value: f32, len: usize) -> Vec<f32> {
        vec![value; len]
    }

    #[test]
    fn digital_only_mixes_with_documented_gains() {
        let mut analog = Analog::new(AnalogOutputMode::DigitalOnly, true);
        let mut out = vec![0.0f32; 2];
        analog.process(
            &mut out,
            &[0.1],
            &[0.11],
            &[0.4],
            &[0.31],
            &[0.7],
            &[0.013],
        );
        assert!((out[0] - 1.2).abs() < 1e-6);
        assert!((out[1] - 0.433).abs() < 1e-6);

        let mut analog = Analog::new(AnalogOutputMode::DigitalOnly, false);
        let mut out = vec![0.0f32; 2];
        analog.process(
            &mut out,
            &[0.1],
            &[0.11],
            &[0.4],
            &[0.31],
            &[0.7],
            &[0.013],
        );
        assert!((out[0] - 0.976).abs() < 1e-6);
        assert!((out[1] - 0.42884).abs() < 1e-6);
    }

    #[test]
    fn digital_only_integer_mixing_saturates_and_scales_in_q8() {
        let mut analog = Analog::new(AnalogOutputMode::DigitalOnly, false);
        let mut out = vec![0i16; 8];
        analog.process(
            &mut out,
            &[12000, 16384, 0, 0],
            &[-10000, -100, 32767, 0],
            &[16384, 0, 16384, 0],
            &[32767, -32768, -32767, 0],
            &[3152, 0, 0, 16384],
            &[100, 100, 0, 0],
        );
        assert_eq!(out[0], 30526);
        assert_eq!(out[1], 22834);
        assert_eq!(out[2], 16384);
        assert_eq!(out[3], -32768);
        assert_eq!(out[4], 16384);
        assert_eq!(out[5], 0);
        assert_eq!(out[6], 11136);
        assert_eq!(out[7], 0);
    }

    #[test]
    fn coarse_filter_dc_gain_sits_just_below_unity() {
        // The measured DC response of the coarse output circuit.
        assert!((COARSE_TAPS_NEW_GEN.iter().sum::<f32>() - 0.9949726).abs() < 1e-4);
        assert!((COARSE_TAPS_OLD_GEN.iter().sum::<f32>() - 0.9969666).abs() < 1e-4);

        let mut analog = Analog::new(AnalogOutputMode::Coarse, false);
        let len = 64;
        let zero = frames(0.0, len);
        let dc = frames(0.5, len);
        let mut out = vec![0.0f32; 2 * len];
        analog.process(&mut out, &dc, &dc, &zero, &zero, &zero, &zero);
        // Once the history is primed, DC passes at the sum of the taps.
        let expected = 0.5 * COARSE_TAPS_NEW_GEN.iter().sum::<f32>();
        for i in 8..len {
            assert!((out[2 * i] - expected).abs() < 1e-5);
            assert!((out[2 * i + 1] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn coarse_filter_boosts_the_nyquist_frequency_on_new_gen() {
        let mut analog = Analog::new(AnalogOutputMode::Coarse, false);
        let len = 64;
        let nyquist: Vec<f32> = (0..len).map(|i| if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
        let zero = frames(0.0, len);
        let mut out = vec![0.0f32; 2 * len];
        analog.process(&mut out, &nyquist, &zero, &zero, &zero, &zero, &zero);
        // Alternating sum of symmetric taps, with the filter's 2-sample
        // delay flipping the sign at this frequency.
        let gain: f32 = COARSE_TAPS_NEW_GEN
            .iter()
            .enumerate()
            .map(|(n, t)| t * if n % 2 == 0 { 1.0 } else { -1.0 })
            .sum();
        // The measured Nyquist boost of the later-generation circuit.
        assert!((gain - 1.5318551).abs() < 1e-4);
        for i in 8..len {
            let expected = nyquist[i] * gain;
            assert!((out[2 * i] - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn upsampled_modes_stretch_the_stream() {
        let analog = Analog::new(AnalogOutputMode::Oversampled, false);
        assert_eq!(analog.output_sample_rate(), 96000);
        assert_eq!(analog.dac_streams_length(192), 64);

        let mut analog = Analog::new(AnalogOutputMode::Accurate, false);
        assert_eq!(analog.output_sample_rate(), 48000);
        assert_eq!(analog.dac_streams_length(96), 64);

        let len = 64;
        let zero = frames(0.0, len);
        let dc = frames(0.25, len);
        let mut out = vec![0.0f32; 2 * 96];
        analog.process(&mut out, &dc, &dc, &zero, &zero, &zero, &zero);
        // The accurate tone stage passes DC at unity gain, so the
        // upsampled stream settles back on the input level.
        assert!((ACCURATE_TAPS_NEW_GEN.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!((ACCURATE_TAPS_OLD_GEN.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        for i in 48..96 {
            assert!((out[2 * i] - 0.25).abs() < 0.02, "frame {}", i);
        }
    }
}
