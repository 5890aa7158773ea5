//! Time-variant filter: the per-partial cutoff envelope machine.

use crate::params::PartialParam;
use crate::tables::Tables;

const TARGET_MULT: u32 = 0x800000;
const MAX_CURRENT: u32 = 0xFF * TARGET_MULT;

// The target phase is incremented on entry to next_phase; names below
// describe its use after the increment.
const PHASE_2: u32 = 2;
const PHASE_SUSTAIN: u32 = 5;
const PHASE_RELEASE: u32 = 6;
const PHASE_DONE: u32 = 7;

/// Live values the machine reads on phase entry.
pub struct TvfContext<'a> {
    pub tables: &'a Tables,
    pub partial_param: &'a PartialParam,
    pub key: i32,
    pub velocity: u32,
    pub can_sustain: bool,
}

fn calc_base_cutoff(partial_param: &PartialParam, base_pitch: u32, key: i32) -> u8 {
    // This table matches the values used by a real LAPC-I.
    const BIAS_LEVEL_TO_BIAS_MULT: [i8; 15] =
        [85, 42, 21, 16, 10, 5, 2, 0, -2, -5, -10, -16, -21, -74, -85];
    // The entries divided by 21 match approximately what the manual claims.
    const KEYFOLLOW_MULT21: [i8; 17] =
        [-21, -10, -5, 0, 2, 5, 8, 10, 13, 16, 18, 21, 26, 32, 42, 21, 21];

    let mut base_cutoff = i32::from(KEYFOLLOW_MULT21[partial_param.tvf.keyfollow.min(16) as usize])
        - i32::from(KEYFOLLOW_MULT21[partial_param.wg.pitch_keyfollow.min(16) as usize]);
    base_cutoff *= key - 60;
    let bias_point = partial_param.tvf.bias_point;
    let bias_mult =
        i32::from(BIAS_LEVEL_TO_BIAS_MULT[partial_param.tvf.bias_level.min(14) as usize]);
    if bias_point & 0x40 == 0 {
        let bias = i32::from(bias_point) + 33 - key;
        if bias > 0 {
            base_cutoff += -bias * bias_mult;
        }
    } else {
        let bias = i32::from(bias_point) - 31 - key;
        if bias < 0 {
            base_cutoff += bias * bias_mult;
        }
    }
    base_cutoff += (i32::from(partial_param.tvf.cutoff) << 4) - 800;
    if base_cutoff >= 0 {
        let pitch_delta = (base_pitch >> 4) as i32 + base_cutoff - 3584;
        if pitch_delta > 0 {
            base_cutoff -= pitch_delta;
        }
    } else if base_cutoff < -2048 {
        base_cutoff = -2048;
    }
    base_cutoff += 2056;
    base_cutoff >>= 4;
    base_cutoff.min(255).max(0) as u8
}

#[derive(Default)]
pub struct Tvf {
    base_cutoff: u8,
    target: u8,
    target_phase: u32,
    increment: u8,
    big_increment: u32,
    current: u32,
    level_mult: u32,
    key_time_subtraction: i32,
}

impl Tvf {
    pub fn new() -> Tvf {
        Tvf::default()
    }

    fn set_increment(&mut self, increment: u8) {
        self.increment = increment;
        let magnitude = f32::from(increment & 0x7F);
        self.big_increment = (crate::math::exp10f((magnitude - 1.0) / 26.0) * 256.0) as u32;
    }

    pub fn reset(&mut self, ctx: &TvfContext, base_pitch: u32) {
        let partial_param = ctx.partial_param;
        let key = ctx.key;

        self.base_cutoff = calc_base_cutoff(partial_param, base_pitch, key);

        let mut new_level_mult = ctx.velocity as i32 * i32::from(partial_param.tvf.env_velo_sensitivity);
        new_level_mult >>= 6;
        new_level_mult += 109 - i32::from(partial_param.tvf.env_velo_sensitivity);
        new_level_mult += (key - 60) >> (4 - partial_param.tvf.env_depth_keyfollow.min(4) as u32);
        if new_level_mult < 0 {
            new_level_mult = 0;
        }
        new_level_mult *= i32::from(partial_param.tvf.env_depth);
        new_level_mult >>= 6;
        self.level_mult = new_level_mult.min(255) as u32;

        self.key_time_subtraction = if partial_param.tvf.env_time_keyfollow != 0 {
            (key - 60) >> (5 - partial_param.tvf.env_time_keyfollow.min(5) as u32)
        } else {
            0
        };

        let new_target = (self.level_mult * u32::from(partial_param.tvf.env_level[0])) >> 8;
        let env_time_setting =
            i32::from(partial_param.tvf.env_time[0]) - self.key_time_subtraction;
        let new_increment = if env_time_setting <= 0 {
            0x80 | 127
        } else {
            let increment = i32::from(ctx.tables.env_logarithmic_time[(new_target & 0xFF) as usize])
                - env_time_setting;
            if increment <= 0 {
                1
            } else {
                increment
            }
        };
        self.set_increment((new_increment & 0xFF) as u8);
        self.target = new_target as u8;
        self.target_phase = PHASE_2 - 1;

        self.current = 0;
    }

    pub fn base_cutoff(&self) -> u8 {
        self.base_cutoff
    }

    /// Advance the ramp one sample and return the cutoff modifier in
    /// `TARGET_MULT` fixed point.
    pub fn next_cutoff_modifier(&mut self, ctx: &TvfContext) -> u32 {
        let big_target = u32::from(self.target) * TARGET_MULT;
        if self.increment == 0 {
            self.current = big_target;
        } else if self.increment & 0x80 != 0 {
            // Lowering.
            if self.big_increment > self.current {
                self.current = big_target;
                self.next_phase(ctx);
            } else {
                self.current -= self.big_increment;
                if self.current <= big_target {
                    self.current = big_target;
                    self.next_phase(ctx);
                }
            }
        } else {
            // Raising.
            if MAX_CURRENT - self.current < self.big_increment {
                self.current = big_target;
                self.next_phase(ctx);
            } else {
                self.current += self.big_increment;
                if self.current >= big_target {
                    self.current = big_target;
                    self.next_phase(ctx);
                }
            }
        }
        self.current
    }

    pub fn start_decay(&mut self, partial_param: &PartialParam) {
        if self.target_phase >= PHASE_RELEASE {
            return;
        }
        self.target_phase = PHASE_DONE - 1;
        if partial_param.tvf.env_time[4] == 0 {
            self.set_increment(1);
        } else {
            self.set_increment(0u8.wrapping_sub(partial_param.tvf.env_time[4]));
        }
        self.target = 0;
    }

    fn next_phase(&mut self, ctx: &TvfContext) {
        let tables = ctx.tables;
        let partial_param = ctx.partial_param;
        self.target_phase += 1;

        match self.target_phase {
            PHASE_DONE => {
                self.set_increment(0);
                self.target = 0;
                return;
            }
            PHASE_SUSTAIN | PHASE_RELEASE => {
                if !ctx.can_sustain {
                    self.start_decay(partial_param);
                    return;
                }
                self.set_increment(0);
                self.target =
                    ((self.level_mult * u32::from(partial_param.tvf.env_level[3])) >> 8) as u8;
                return;
            }
            _ => {}
        }

        let env_point_index = (self.target_phase - 1) as usize;
        let env_time_setting =
            i32::from(partial_param.tvf.env_time[env_point_index.min(4)]) - self.key_time_subtraction;

        let new_target =
            ((self.level_mult * u32::from(partial_param.tvf.env_level[env_point_index.min(3)])) >> 8)
                as i32;
        let mut new_target = new_target;
        let new_increment: i32;
        if env_time_setting > 0 {
            let mut target_delta = new_target - i32::from(self.target);
            if target_delta == 0 {
                if new_target == 0 {
                    target_delta = 1;
                    new_target = 1;
                } else {
                    target_delta = -1;
                    new_target -= 1;
                }
            }
            let mut increment = i32::from(
                tables.env_logarithmic_time[(target_delta.unsigned_abs() & 0xFF) as usize],
            ) - env_time_setting;
            increment &= 0xFF;
            if increment <= 0 {
                increment = 1;
            }
            if target_delta < 0 {
                increment |= 0x80;
            }
            new_increment = increment;
        } else {
            new_increment = if new_target >= i32::from(self.target) {
                0x80 | 127
            } else {
                127
            };
        }
        self.set_increment((new_increment & 0xFF) as u8);
        self.target = new_target as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_parameters_put_the_base_cutoff_at_the_filter_midpoint() {
        let mut param = PartialParam::default();
        param.tvf.cutoff = 50;
        param.tvf.keyfollow = 11;
        param.wg.pitch_keyfollow = 11;
        // (50 << 4) - 800 = 0, no keyfollow, no bias: lands on 128.
        assert_eq!(calc_base_cutoff(&param, 28672, 60), 128);
    }

    #[test]
    fn base_cutoff_saturates_at_the_register_maximum() {
        let mut param = PartialParam::default();
        param.tvf.cutoff = 100;
        param.tvf.keyfollow = 11;
        param.wg.pitch_keyfollow = 11;
        assert_eq!(calc_base_cutoff(&param, 0, 60), 178);
        param.tvf.cutoff = 127;
        assert_eq!(calc_base_cutoff(&param, 0, 60), 205);
    }

    #[test]
    fn zero_env_depth_keeps_the_cutoff_modifier_at_zero() {
        let tables = Tables::new();
        let mut param = PartialParam::default();
        param.tvf.cutoff = 50;
        param.tvf.env_depth = 0;
        param.tvf.env_level = [100, 100, 100, 100];
        let ctx = TvfContext {
            tables: &tables,
            partial_param: &param,
            key: 60,
            velocity: 127,
            can_sustain: true,
        };
        let mut tvf = Tvf::new();
        tvf.reset(&ctx, 28672);
        for _ in 0..256 {
            assert_eq!(tvf.next_cutoff_modifier(&ctx), 0);
        }
    }
}
