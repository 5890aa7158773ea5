//! Time-variant pitch: the per-partial pitch machine.
//!
//! Combines the base pitch of the played key with the pitch envelope, the
//! triangle LFO and the bender, all in the 4096-units-per-semitone domain the
//! wave generator consumes. Unlike the amp and filter ramps, the machine runs
//! at a reduced control rate driven by an internal counter.

use crate::params::PartialParam;
use crate::tables::Tables;

/// Samples between control-rate updates (roughly 4 kHz at the native rate).
pub const PROCESS_INTERVAL: u32 = 8;

/// Observed ceiling of the pitch register.
const MAX_PITCH: i32 = 59392;

/// Pitch of a square-wave partial playing key 60 with centered coarse and
/// fine tuning; puts middle C near 261.6 Hz.
const BASE_PITCH_OFFSET: i32 = 37133;

/// Pitch keyfollow ratios in 4096ths, indexed by the keyfollow parameter.
/// The two trailing entries are the stretched "s1"/"s2" tunings.
const PITCH_KEYFOLLOW_MULT: [i32; 17] = [
    -4096, -2048, -1024, 0, 512, 1024, 1536, 2048, 2560, 3072, 3584, 4096, 5120, 6144, 8192, 4100,
    4116,
];

/// Live values the machine reads while running.
pub struct TvpContext<'a> {
    pub tables: &'a Tables,
    pub partial_param: &'a PartialParam,
    pub key: i32,
    pub velocity: u32,
    /// Bender contribution in 4096ths of a semitone, kept current by the part.
    pub pitch_bend: i32,
    /// Modulation controller of the owning part, 0..127.
    pub modulation: u8,
    pub master_tune: u8,
    /// Raw tuning word of the PCM wave being played, if any.
    pub pcm_pitch: Option<u16>,
}

#[derive(Default)]
pub struct Tvp {
    base_pitch: i32,
    pitch: u16,

    counter: u32,

    // Pitch envelope state, all in 4096ths of a semitone.
    env_phase: usize,
    env_current: i32,
    env_target: i32,
    env_increment: i32,
    env_ticks_left: u32,
    key_time_subtraction: i32,
    velo_mult: i32,

    lfo_position: u32,
}

fn coarse_to_pitch(coarse: u8) -> i32 {
    (i32::from(coarse) - 36) * 4096 / 12
}

fn fine_to_pitch(fine: u8) -> i32 {
    (i32::from(fine) - 50) * 4096 / 1200
}

fn key_to_pitch(key: i32) -> i32 {
    let delta = (key - 60).abs() * 4096;
    let pitch = (delta + 6) / 12;
    if key < 60 {
        -pitch
    } else {
        pitch
    }
}

fn master_tune_to_pitch(master_tune: u8) -> i32 {
    (i32::from(master_tune) - 64) * 4096 / (128 * 12)
}

/// Envelope point level to a pitch offset, scaled by the envelope depth.
fn env_level_to_offset(level: u8, depth: u8, velo_mult: i32) -> i32 {
    let centered = i32::from(level) - 50;
    (centered * i32::from(depth) * 164 * velo_mult) / (10 * 256)
}

/// Envelope point time to a duration in control-rate ticks.
fn env_time_to_ticks(time: u8, key_time_subtraction: i32) -> u32 {
    let time = (i32::from(time) - key_time_subtraction).clamp(1, 127);
    crate::math::exp2f(time as f32 / 8.0) as u32 + 1
}

impl Tvp {
    pub fn new() -> Tvp {
        Tvp::default()
    }

    fn calc_base_pitch(ctx: &TvpContext) -> i32 {
        let param = ctx.partial_param;
        let mut base_pitch = key_to_pitch(ctx.key);
        base_pitch = (base_pitch
            * PITCH_KEYFOLLOW_MULT[param.wg.pitch_keyfollow.min(16) as usize])
            >> 12;
        base_pitch += coarse_to_pitch(param.wg.pitch_coarse);
        base_pitch += fine_to_pitch(param.wg.pitch_fine);
        if let Some(pcm_pitch) = ctx.pcm_pitch {
            base_pitch += i32::from(pcm_pitch);
        } else if param.wg.waveform & 1 == 0 {
            base_pitch += BASE_PITCH_OFFSET;
        } else {
            // Sawtooth waves run an octave below the equivalent square.
            base_pitch += BASE_PITCH_OFFSET - 4096;
        }
        base_pitch.clamp(0, MAX_PITCH)
    }

    pub fn reset(&mut self, ctx: &TvpContext, patch_fine_tune: u8) {
        let param = ctx.partial_param;

        self.base_pitch = Self::calc_base_pitch(ctx) + fine_to_pitch(patch_fine_tune);
        self.counter = 0;
        self.lfo_position = 0;

        self.key_time_subtraction = if param.pitch_env.time_keyfollow != 0 {
            (ctx.key - 60) >> (5 - param.pitch_env.time_keyfollow.min(4) as u32)
        } else {
            0
        };
        // Velocity sensitivity scales the whole envelope, 256 = unity.
        self.velo_mult = 256
            + ((ctx.velocity as i32 - 64)
                * i32::from(param.pitch_env.velo_sensitivity))
                / 64;

        self.env_phase = 0;
        self.env_current =
            env_level_to_offset(param.pitch_env.level[0], param.pitch_env.depth, self.velo_mult);
        self.start_env_phase(ctx, 0);
        self.update_pitch(ctx);
    }

    fn start_env_phase(&mut self, ctx: &TvpContext, phase: usize) {
        let param = ctx.partial_param;
        self.env_phase = phase;
        if phase >= 4 {
            // Terminal point; hold the level.
            self.env_target = env_level_to_offset(
                param.pitch_env.level[4],
                param.pitch_env.depth,
                self.velo_mult,
            );
            self.env_increment = 0;
            self.env_ticks_left = 0;
            return;
        }
        self.env_target = env_level_to_offset(
            param.pitch_env.level[phase + 1],
            param.pitch_env.depth,
            self.velo_mult,
        );
        let ticks = env_time_to_ticks(param.pitch_env.time[phase], self.key_time_subtraction);
        self.env_ticks_left = ticks;
        self.env_increment = (self.env_target - self.env_current) / ticks as i32;
    }

    /// Move the envelope and LFO one control-rate step.
    fn process(&mut self, ctx: &TvpContext) {
        let param = ctx.partial_param;

        if self.env_ticks_left > 0 {
            self.env_ticks_left -= 1;
            self.env_current += self.env_increment;
            if self.env_ticks_left == 0 {
                self.env_current = self.env_target;
                if self.env_phase < 4 {
                    let next = self.env_phase + 1;
                    self.start_env_phase(ctx, next);
                }
            }
        }

        // Triangle LFO; modulation deepens it through the mod sensitivity.
        let period = ctx.tables.lfo_period[param.pitch_lfo.rate.min(100) as usize].max(4);
        self.lfo_position += PROCESS_INTERVAL;
        if self.lfo_position >= period {
            self.lfo_position -= period;
        }

        self.update_pitch(ctx);
    }

    fn lfo_offset(&self, ctx: &TvpContext) -> i32 {
        let param = ctx.partial_param;
        let depth = u32::from(param.pitch_lfo.depth)
            + ((u32::from(ctx.modulation) * u32::from(param.pitch_lfo.mod_sensitivity)) >> 7);
        let depth = depth.min(100) as i32;
        if depth == 0 {
            return 0;
        }
        let period = ctx.tables.lfo_period[param.pitch_lfo.rate.min(100) as usize].max(4);
        let half = period / 2;
        // Triangle in -half..half, scaled to +-41 units per depth step.
        let tri = if self.lfo_position < half {
            self.lfo_position as i32 * 2 - half as i32
        } else {
            half as i32 * 3 - self.lfo_position as i32 * 2
        };
        ((tri * depth * 41) / half.max(1) as i32) / 100
    }

    fn update_pitch(&mut self, ctx: &TvpContext) {
        let mut pitch = self.base_pitch + self.env_current + self.lfo_offset(ctx);
        pitch += master_tune_to_pitch(ctx.master_tune);
        if ctx.partial_param.wg.pitch_bender_enabled & 1 != 0 {
            pitch += ctx.pitch_bend;
        }
        self.pitch = pitch.clamp(0, MAX_PITCH) as u16;
    }

    /// Advance one sample and return the current pitch register value.
    pub fn next_pitch(&mut self, ctx: &TvpContext) -> u16 {
        if self.counter == 0 {
            self.process(ctx);
            self.counter = PROCESS_INTERVAL;
        }
        self.counter -= 1;
        self.pitch
    }

    pub fn current_pitch(&self) -> u16 {
        self.pitch
    }

    /// Base pitch of the note before envelope, LFO and bender.
    pub fn base_pitch(&self) -> u16 {
        self.base_pitch.clamp(0, MAX_PITCH) as u16
    }

    /// On note release, slide towards the envelope's end level.
    pub fn start_decay(&mut self, ctx: &TvpContext) {
        if self.env_phase >= 4 {
            return;
        }
        let param = ctx.partial_param;
        self.env_phase = 4;
        self.env_target = env_level_to_offset(
            param.pitch_env.level[4],
            param.pitch_env.depth,
            self.velo_mult,
        );
        let ticks = env_time_to_ticks(param.pitch_env.time[3], self.key_time_subtraction);
        self.env_ticks_left = ticks;
        self.env_increment = (self.env_target - self.env_current) / ticks as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutral_param() -> PartialParam {
        let mut param = PartialParam::default();
        param.wg.pitch_coarse = 36;
        param.wg.pitch_fine = 50;
        param.wg.pitch_keyfollow = 11;
        param.pitch_env.level = [50, 50, 50, 50, 50];
        param
    }

    fn context<'a>(tables: &'a Tables, param: &'a PartialParam) -> TvpContext<'a> {
        TvpContext {
            tables,
            partial_param: param,
            key: 60,
            velocity: 127,
            pitch_bend: 0,
            modulation: 0,
            master_tune: 64,
            pcm_pitch: None,
        }
    }

    #[test]
    fn neutral_parameters_hold_the_base_pitch() {
        let tables = Tables::new();
        let param = neutral_param();
        let ctx = context(&tables, &param);
        let mut tvp = Tvp::new();
        tvp.reset(&ctx, 50);
        for _ in 0..512 {
            assert_eq!(tvp.next_pitch(&ctx), BASE_PITCH_OFFSET as u16);
        }
    }

    #[test]
    fn keyfollow_of_one_tracks_the_keyboard() {
        let tables = Tables::new();
        let param = neutral_param();
        let mut ctx = context(&tables, &param);
        ctx.key = 72;
        let mut tvp = Tvp::new();
        tvp.reset(&ctx, 50);
        let octave_up = tvp.next_pitch(&ctx);
        assert_eq!(i32::from(octave_up), BASE_PITCH_OFFSET + 4096);
    }

    #[test]
    fn bender_shifts_by_half_range_at_half_throw() {
        let tables = Tables::new();
        let mut param = neutral_param();
        param.wg.pitch_bender_enabled = 1;
        let mut ctx = context(&tables, &param);
        // A bend of +4096 units is one semitone up.
        ctx.pitch_bend = 4096;
        let mut tvp = Tvp::new();
        tvp.reset(&ctx, 50);
        assert_eq!(i32::from(tvp.next_pitch(&ctx)), BASE_PITCH_OFFSET + 4096);
    }
}
