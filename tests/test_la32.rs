//! Wave generator tests against reference sample vectors.
//!
//! The float pair is checked against known-good waveform captures; the
//! integer pair must agree with the float pair within the resolution of its
//! log tables.

use lasynth::la32::{La32IntPartialPair, PairSlot, PcmWaveRef};
use lasynth::la32_float::La32FloatPartialPair;
use lasynth::tables::Tables;

struct Context {
    tables: Tables,
    int_pair: La32IntPartialPair,
    float_pair: La32FloatPartialPair,
    master_pitch: u16,
    master_cutoff: u32,
    slave_pitch: u16,
    slave_cutoff: u32,
}

impl Context {
    fn new() -> Context {
        Context {
            tables: Tables::new(),
            int_pair: La32IntPartialPair::default(),
            float_pair: La32FloatPartialPair::default(),
            master_pitch: 0,
            master_cutoff: 0,
            slave_pitch: 0,
            slave_cutoff: 0,
        }
    }

    fn init_pair(&mut self, ring_modulated: bool, mixed: bool) {
        self.int_pair.init(ring_modulated, mixed);
        self.float_pair.init(ring_modulated, mixed);
    }

    fn init_synth(&mut self, slot: PairSlot, sawtooth: bool, pulse_width: u8, resonance: u8) {
        self.int_pair
            .init_synth(slot, sawtooth, pulse_width, resonance, &self.tables);
        self.float_pair.init_synth(slot, sawtooth, pulse_width, resonance);
    }

    fn init_single_synth(&mut self, sawtooth: bool, pulse_width: u8, resonance: u8) {
        self.init_pair(false, false);
        self.init_synth(PairSlot::Master, sawtooth, pulse_width, resonance);
    }

    fn next_samples(&mut self) -> (i16, f32) {
        let no_pcm: [i16; 0] = [];
        self.int_pair.generate_next_sample(
            PairSlot::Master,
            &self.tables,
            &no_pcm,
            0,
            self.master_pitch,
            self.master_cutoff,
        );
        self.float_pair.generate_next_sample(
            PairSlot::Master,
            &self.tables,
            &no_pcm,
            0,
            self.master_pitch,
            self.master_cutoff,
        );
        self.int_pair.generate_next_sample(
            PairSlot::Slave,
            &self.tables,
            &no_pcm,
            0,
            self.slave_pitch,
            self.slave_cutoff,
        );
        self.float_pair.generate_next_sample(
            PairSlot::Slave,
            &self.tables,
            &no_pcm,
            0,
            self.slave_pitch,
            self.slave_cutoff,
        );
        (
            self.int_pair.next_out_sample(&self.tables),
            self.float_pair.next_out_sample(),
        )
    }

    fn check_against_with_tolerance(&mut self, expected: &[f32], tolerance: f32) {
        for (i, &want) in expected.iter().enumerate() {
            let (int_sample, float_sample) = self.next_samples();
            assert!(
                (float_sample - want).abs() < tolerance,
                "float sample {}: {} vs {}",
                i,
                float_sample,
                want
            );
            let int_as_float = f32::from(int_sample) / 32768.0;
            assert!(
                (int_as_float - float_sample).abs() < 0.003,
                "int sample {}: {} vs {}",
                i,
                int_as_float,
                float_sample
            );
        }
    }

    fn check_against(&mut self, expected: &[f32]) {
        self.check_against_with_tolerance(expected, 1.0e-5);
    }
}

#[test]
fn sine_at_the_cutoff_midpoint() {
    let mut ctx = Context::new();
    ctx.master_pitch = 0xB000;
    ctx.master_cutoff = 0x80 << 18;
    ctx.init_single_synth(false, 0, 0);
    ctx.check_against(&[
        0.000000, 0.048773, 0.095671, 0.138893, 0.176777, 0.207867, 0.230970, 0.245196,
        0.250000, 0.245196, 0.230970, 0.207867, 0.176777, 0.138893, 0.095671, 0.048773,
        0.000000, -0.048773, -0.095671, -0.138893, -0.176777, -0.207867, -0.230970, -0.245196,
        -0.250000, -0.245196, -0.230970, -0.207867, -0.176777, -0.138893, -0.095671, -0.048773,
    ]);
}

#[test]
fn symmetric_square_at_a_high_cutoff() {
    let mut ctx = Context::new();
    ctx.master_pitch = 0xB000;
    ctx.master_cutoff = 0xF0 << 18;
    ctx.init_single_synth(false, 0, 0);
    ctx.check_against(&[
        0.000000, 0.250000, 0.250000, 0.250000, 0.250000, 0.250000, 0.250000, 0.250000,
        0.250000, 0.250000, 0.250000, 0.250000, 0.250000, 0.250000, 0.250000, 0.250000,
        0.000000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000,
        -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000,
    ]);
}

#[test]
fn asymmetric_square_with_a_narrow_pulse() {
    let mut ctx = Context::new();
    ctx.master_pitch = 0xB000;
    ctx.master_cutoff = 0xC0 << 18;
    ctx.init_single_synth(false, 192, 0);
    ctx.check_against(&[
        0.000000, 0.250000, 0.250000, 0.250000, 0.250000, 0.250000, 0.250000, 0.250000,
        0.000000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000,
        -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000,
        -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000, -0.250000,
    ]);
}

#[test]
fn ring_modulation_multiplies_in_the_log_domain() {
    let mut ctx = Context::new();
    ctx.master_pitch = 0xA000;
    ctx.master_cutoff = 0x80 << 18;
    ctx.slave_pitch = 0xE400;
    ctx.slave_cutoff = 0x80 << 18;
    ctx.init_pair(true, false);
    ctx.init_synth(PairSlot::Master, false, 0, 0);
    ctx.init_synth(PairSlot::Slave, false, 0, 0);
    // The slave pitch carries a fractional sample step, so the positions
    // accumulate rounding against the captured values.
    ctx.check_against_with_tolerance(&[
        0.000000, 0.023430, -0.027314, -0.045586, 0.088776, 0.009978, -0.135770, 0.077375,
        0.122290, -0.172582, -0.035072, 0.218686, -0.095208, -0.179530, 0.208842, 0.062590,
        -0.249770, 0.082996, 0.197064, -0.192420, -0.076823, 0.220287, -0.052502, -0.164495,
        0.132780, 0.065226, -0.137780, 0.020004, 0.085393, -0.050257, -0.023750, 0.023959,
    ], 2.5e-4);
}

#[test]
fn ring_modulation_mixed_with_the_master() {
    let mut ctx = Context::new();
    ctx.master_pitch = 0xA000;
    ctx.master_cutoff = 0x80 << 18;
    ctx.slave_pitch = 0xE400;
    ctx.slave_cutoff = 0x80 << 18;
    ctx.init_pair(true, true);
    ctx.init_synth(PairSlot::Master, false, 0, 0);
    ctx.init_synth(PairSlot::Slave, false, 0, 0);
    ctx.check_against_with_tolerance(&[
        0.000000, 0.047934, 0.021459, 0.026985, 0.184447, 0.127827, 0.003122, 0.235973,
        0.299067, 0.020670, 0.172795, 0.439166, 0.135762, 0.059706, 0.454039, 0.311386,
        0.000230, 0.331792, 0.442260, 0.046815, 0.154147, 0.440767, 0.155365, 0.028758,
        0.309557, 0.223824, 0.001112, 0.137854, 0.181064, 0.022314, 0.025022, 0.048463,
    ], 2.5e-4);
}

#[test]
fn resonance_rides_the_square_wave_and_decays() {
    let mut ctx = Context::new();
    ctx.master_pitch = 0xA000;
    ctx.master_cutoff = 0xB0 << 18;
    ctx.init_single_synth(false, 0, 24);
    // The resonance ripples decay along each segment and run slightly
    // faster on the negative half of the period.
    ctx.check_against_with_tolerance(&[
        0.000000, 0.236627, 0.364626, 0.327616, 0.250000, 0.178826, 0.153612, 0.184733,
        0.250000, 0.309850, 0.331052, 0.304883, 0.250000, 0.199672, 0.181843, 0.203849,
        0.250000, 0.292321, 0.307313, 0.288808, 0.250000, 0.214413, 0.201806, 0.217366,
        0.250000, 0.279925, 0.290526, 0.277441, 0.250000, 0.224836, 0.215922, 0.165239,
        0.000000, -0.236304, -0.363391, -0.326365, -0.250000, -0.180727, -0.156693, -0.187161,
        -0.250000, -0.307003, -0.326780, -0.301709, -0.250000, -0.203093, -0.186819, -0.207450,
        -0.250000, -0.288599, -0.301990, -0.285014, -0.250000, -0.218238, -0.207219, -0.221188,
        -0.250000, -0.276136, -0.285204, -0.273709, -0.250000, -0.228493, -0.221032, -0.167022,
    ], 1.5e-5);
}

#[test]
fn sawtooth_multiplies_the_square_by_a_synchronous_cosine() {
    let mut ctx = Context::new();
    ctx.master_pitch = 0xB000;
    ctx.master_cutoff = 0xA8 << 18;
    ctx.init_single_synth(true, 0, 0);
    // The sample step carries a fraction at this pitch, so the positions
    // accumulate rounding against the captured values.
    ctx.check_against_with_tolerance(&[
        0.000000, 0.220296, 0.231185, 0.207850, 0.176747, 0.138886, 0.095672, 0.048773,
        0.000000, -0.048773, -0.095671, -0.138893, -0.176777, -0.207867, -0.230970, -0.219701,
        0.000000, 0.220291, 0.231182, 0.207850, 0.176748, 0.138886, 0.095672, 0.048773,
        0.000000, -0.048773, -0.095671, -0.138893, -0.176777, -0.207867, -0.230970, -0.219700,
    ], 2.5e-4);
}

#[test]
fn ring_modulation_with_a_distorting_master() {
    let mut ctx = Context::new();
    ctx.master_pitch = 0xA000;
    ctx.master_cutoff = 0x8C << 18;
    ctx.slave_pitch = 0xA000;
    ctx.slave_cutoff = 0xF0 << 18;
    ctx.init_pair(true, false);
    // A strongly resonant master modulated by a hard square-wave slave.
    ctx.init_synth(PairSlot::Master, false, 0, 28);
    ctx.init_synth(PairSlot::Slave, false, 0, 0);
    ctx.check_against_with_tolerance(&[
        0.000000, 0.047301, 0.105126, 0.170305, 0.238719, -0.194330, -0.133685, -0.083874,
        -0.048683, -0.030794, -0.030023, -0.036897, -0.049482, -0.067387, -0.090078, -0.116897,
        -0.147078, -0.179776, -0.214079, -0.249045, 0.216281, 0.182834, 0.151510, 0.123151,
        0.099966, 0.084839, 0.078011, 0.076965, 0.077154, 0.073234, 0.060491, 0.036113,
        0.000000, 0.047294, 0.105072, 0.170130, 0.238332, -0.195022, -0.134755, -0.085361,
        -0.050578, -0.033037, -0.032513, -0.039549, -0.052203, -0.070070, -0.092607, -0.119150,
        -0.148936, -0.181122, -0.214808, -0.249065, 0.217040, 0.184421, 0.153946, 0.126406,
        0.103801, 0.088877, 0.081834, 0.080197, 0.079545, 0.074715, 0.061182, 0.036285,
    ], 2.5e-4);
}

#[test]
fn non_looping_pcm_deactivates_at_its_end() {
    let tables = Tables::new();
    // Four samples at half scale: log magnitude 32787 - 2048.
    let pcm_rom = vec![(32787 - 2048) as i16; 4];
    let wave = PcmWaveRef {
        start: 0,
        len: 4,
        looped: false,
    };
    let mut pair = La32IntPartialPair::default();
    pair.init(false, false);
    pair.init_pcm(PairSlot::Master, wave);

    // Pitch 0x5000 steps one ROM sample per tick.
    for _ in 0..4 {
        assert!(pair.is_active(PairSlot::Master));
        pair.generate_next_sample(PairSlot::Master, &tables, &pcm_rom, 0, 0x5000, 0);
        let sample = pair.next_out_sample(&tables);
        // Half of the 13-bit scale, interpolated between equal samples.
        assert!((i32::from(sample) - 4096).abs() <= 8, "sample {}", sample);
    }
    pair.generate_next_sample(PairSlot::Master, &tables, &pcm_rom, 0, 0x5000, 0);
    assert!(!pair.is_active(PairSlot::Master));
    assert_eq!(pair.next_out_sample(&tables), 0);
}

#[test]
fn looping_pcm_wraps_at_its_end() {
    let tables = Tables::new();
    let pcm_rom = vec![(32787 - 2048) as i16; 4];
    let wave = PcmWaveRef {
        start: 0,
        len: 4,
        looped: true,
    };
    let mut pair = La32IntPartialPair::default();
    pair.init(false, false);
    pair.init_pcm(PairSlot::Master, wave);
    for _ in 0..64 {
        pair.generate_next_sample(PairSlot::Master, &tables, &pcm_rom, 0, 0x5000, 0);
        assert!(pair.is_active(PairSlot::Master));
    }
}
