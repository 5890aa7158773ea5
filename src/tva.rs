//! Time-variant amplifier: the per-partial amplitude envelope machine.
//!
//! The machine programs the LA32 amp register the way the control program
//! does: an 8-bit target plus a 7-bit increment with a direction flag. When
//! the ramp reaches its target an "interrupt" fires after a short delay and
//! the next envelope phase is entered.

use crate::params::{PartialParam, RhythmTemp};
use crate::tables::Tables;

/// Samples to wait before handling a "target reached" interrupt, emulating
/// the asynchronous LA32 to MCU signalling. Varies with the sample rate on
/// real hardware; kept injectable through [`Tva::new`].
pub const INTERRUPT_TIME: u32 = 7;

const TARGET_MULT: u32 = 0x40000;
const MAX_CURRENT_AMP: u32 = 0xFF * TARGET_MULT;

/// The LA32 amp register input is this base minus the ramp value, turning
/// the upward-counting envelope into a log-domain attenuation.
pub const AMP_BASE: u32 = 0x4002000;

pub const TVA_PHASE_BASIC: usize = 0;
pub const TVA_PHASE_ATTACK: usize = 1;
pub const TVA_PHASE_2: usize = 2;
pub const TVA_PHASE_3: usize = 3;
pub const TVA_PHASE_4: usize = 4;
pub const TVA_PHASE_SUSTAIN: usize = 5;
pub const TVA_PHASE_RELEASE: usize = 6;
pub const TVA_PHASE_DEAD: usize = 7;

/// Matches a table in the control ROM.
const BIAS_LEVEL_TO_AMP_SUBTRACTION_COEFF: [u8; 13] =
    [255, 187, 137, 100, 74, 54, 40, 29, 21, 15, 10, 5, 0];

/// Live values the machine reads from the rest of the synth on phase entry
/// and while sustaining.
pub struct TvaContext<'a> {
    pub tables: &'a Tables,
    pub partial_param: &'a PartialParam,
    pub rhythm_temp: Option<RhythmTemp>,
    pub master_vol: u8,
    pub output_level: u8,
    pub expression: u8,
    pub key: i32,
    pub velocity: u32,
    pub ring_modulating_slave: bool,
    pub can_sustain: bool,
}

#[derive(Default)]
pub struct Tva {
    playing: bool,
    phase: usize,
    current_amp: u32,
    la32_amp_target: u8,
    la32_amp_increment: u8,
    large_amp_inc: u32,
    interrupt_countdown: u32,
    interrupt_time: u32,
    key_time_subtraction: i32,
    bias_amp_subtraction: i32,
    velo_amp_subtraction: i32,
}

fn mult_bias(bias_level: u8, bias: i32) -> i32 {
    (bias * i32::from(BIAS_LEVEL_TO_AMP_SUBTRACTION_COEFF[bias_level.min(12) as usize])) >> 5
}

fn calc_bias_amp_subtraction(bias_point: u8, bias_level: u8, key: i32) -> i32 {
    if bias_point & 0x40 == 0 {
        let bias = i32::from(bias_point) + 33 - key;
        if bias > 0 {
            return mult_bias(bias_level, bias);
        }
    } else {
        let bias = i32::from(bias_point) - 31 - key;
        if bias < 0 {
            return mult_bias(bias_level, -bias);
        }
    }
    0
}

fn calc_bias_amp_subtractions(partial_param: &PartialParam, key: i32) -> i32 {
    let sub1 = calc_bias_amp_subtraction(
        partial_param.tva.bias_point1,
        partial_param.tva.bias_level1,
        key,
    );
    if sub1 > 255 {
        return 255;
    }
    let sub2 = calc_bias_amp_subtraction(
        partial_param.tva.bias_point2,
        partial_param.tva.bias_level2,
        key,
    );
    if sub2 > 255 {
        return 255;
    }
    (sub1 + sub2).min(255)
}

fn calc_velo_amp_subtraction(velo_sensitivity: u8, velocity: u32) -> i32 {
    let velocity_mult = i32::from(velo_sensitivity) - 50;
    let abs_velocity_mult = velocity_mult.abs();
    let velocity_mult = (velocity_mult * (velocity as i32 - 64)) << 2;
    abs_velocity_mult - (velocity_mult >> 8)
}

fn calc_basic_amp(ctx: &TvaContext, bias_amp_subtraction: i32, velo_amp_subtraction: i32) -> i32 {
    let tables = ctx.tables;
    let mut amp = 155;

    if !ctx.ring_modulating_slave {
        amp -= i32::from(tables.master_vol_to_amp_subtraction[ctx.master_vol.min(100) as usize]);
        if amp < 0 {
            return 0;
        }
        amp -= i32::from(tables.level_to_amp_subtraction[ctx.output_level.min(100) as usize]);
        if amp < 0 {
            return 0;
        }
        amp -= i32::from(tables.level_to_amp_subtraction[ctx.expression.min(100) as usize]);
        if amp < 0 {
            return 0;
        }
        if let Some(rhythm_temp) = ctx.rhythm_temp {
            amp -= i32::from(
                tables.level_to_amp_subtraction[rhythm_temp.output_level.min(100) as usize],
            );
            if amp < 0 {
                return 0;
            }
        }
    }
    amp -= bias_amp_subtraction;
    if amp < 0 {
        return 0;
    }
    amp -= i32::from(
        ctx.tables.level_to_amp_subtraction[ctx.partial_param.tva.level.min(100) as usize],
    );
    if amp < 0 {
        return 0;
    }
    amp -= velo_amp_subtraction;
    if amp < 0 {
        return 0;
    }
    if amp > 155 {
        amp = 155;
    }
    amp -= i32::from(ctx.partial_param.tvf.resonance >> 1);
    if amp < 0 {
        return 0;
    }
    amp
}

pub fn calc_key_time_subtraction(env_time_keyfollow: u8, key: i32) -> i32 {
    if env_time_keyfollow == 0 {
        return 0;
    }
    (key - 60) >> (5 - env_time_keyfollow.min(5) as u32)
}

impl Tva {
    pub fn new() -> Tva {
        Tva::with_interrupt_time(INTERRUPT_TIME)
    }

    /// The interrupt delay depends on the sample rate on real hardware;
    /// callers emulating other rates can recalibrate it here.
    pub fn with_interrupt_time(interrupt_time: u32) -> Tva {
        Tva {
            interrupt_time,
            phase: TVA_PHASE_DEAD,
            ..Tva::default()
        }
    }

    fn start_ramp(&mut self, target: u8, increment: u8, phase: usize) {
        self.la32_amp_increment = increment;
        let mut large_amp_inc = u32::from(increment & 0x7F);
        // Confirmed to be very accurate from sample analysis.
        large_amp_inc = (crate::math::exp2f((large_amp_inc as f32 + 24.0) / 8.0) + 0.125) as u32;
        if increment & 0x80 != 0 {
            // Descending increments run slightly faster.
            large_amp_inc += 1;
        }
        self.large_amp_inc = large_amp_inc;
        self.la32_amp_target = target;
        self.phase = phase;
        self.interrupt_countdown = 0;
    }

    fn end(&mut self, phase: usize) {
        self.phase = phase;
        self.playing = false;
    }

    pub fn reset(&mut self, ctx: &TvaContext) {
        self.playing = true;

        self.key_time_subtraction =
            calc_key_time_subtraction(ctx.partial_param.tva.env_time_keyfollow, ctx.key);
        self.bias_amp_subtraction = calc_bias_amp_subtractions(ctx.partial_param, ctx.key);
        self.velo_amp_subtraction =
            calc_velo_amp_subtraction(ctx.partial_param.tva.velo_sensitivity, ctx.velocity);

        let mut new_amp_target =
            calc_basic_amp(ctx, self.bias_amp_subtraction, self.velo_amp_subtraction);
        let new_phase = if ctx.partial_param.tva.env_time[0] == 0 {
            // Go straight to the attack target; velocity never affects the
            // time of this partial's first ramp.
            new_amp_target += i32::from(ctx.partial_param.tva.env_level[0]);
            TVA_PHASE_ATTACK
        } else {
            TVA_PHASE_BASIC
        };

        self.current_amp = 0;
        // Descend as quickly as possible: since the level starts at zero the
        // first tick jumps to the target and schedules the interrupt.
        self.start_ramp(new_amp_target.clamp(0, 255) as u8, 0x80 | 127, new_phase);
    }

    pub fn start_abort(&mut self) {
        self.start_ramp(64, 0x80 | 127, TVA_PHASE_RELEASE);
    }

    pub fn start_decay(&mut self, partial_param: &PartialParam) {
        if self.phase >= TVA_PHASE_RELEASE {
            return;
        }
        let new_amp_increment = if partial_param.tva.env_time[4] == 0 {
            1
        } else {
            0u8.wrapping_sub(partial_param.tva.env_time[4])
        };
        // The next interrupt will treat the release as finished and the
        // partial will be aborted.
        self.start_ramp(0, new_amp_increment, TVA_PHASE_RELEASE);
    }

    /// Re-evaluate the sustain target so that live volume and expression
    /// changes take effect. The hardware skips the recalculation when
    /// `envLevel[3]` is zero; that quirk is preserved.
    pub fn recalc_sustain(&mut self, ctx: &TvaContext) {
        if self.phase != TVA_PHASE_SUSTAIN || ctx.partial_param.tva.env_level[3] == 0 {
            return;
        }
        let mut new_amp_target =
            calc_basic_amp(ctx, self.bias_amp_subtraction, self.velo_amp_subtraction);
        new_amp_target += i32::from(ctx.partial_param.tva.env_level[3]);
        new_amp_target = new_amp_target.clamp(0, 255);
        // The previous target has been reached, so it is the current amp.
        let amp_delta = new_amp_target - i32::from(self.la32_amp_target);

        let new_amp_increment = if amp_delta >= 0 {
            ctx.tables.env_logarithmic_time[amp_delta as usize].wrapping_sub(2)
        } else {
            ctx.tables.env_logarithmic_time[(-amp_delta) as usize].wrapping_sub(2) | 0x80
        };
        // Once the transition completes, the interrupt re-enters sustain.
        self.start_ramp(new_amp_target as u8, new_amp_increment, TVA_PHASE_SUSTAIN - 1);
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn phase(&self) -> usize {
        self.phase
    }

    /// Advance the ramp one sample and return the LA32 amp register input.
    pub fn next_amp(&mut self, ctx: &TvaContext) -> u32 {
        let target = u32::from(self.la32_amp_target) * TARGET_MULT;
        if self.interrupt_countdown > 0 {
            self.interrupt_countdown -= 1;
            if self.interrupt_countdown == 0 {
                self.next_phase(ctx);
            }
        } else if self.la32_amp_increment != 0 {
            // An increment of zero freezes the level without an interrupt.
            if self.la32_amp_increment & 0x80 != 0 {
                // Lowering.
                if self.large_amp_inc > self.current_amp {
                    self.current_amp = target;
                    self.interrupt_countdown = self.interrupt_time;
                } else {
                    self.current_amp -= self.large_amp_inc;
                    if self.current_amp <= target {
                        self.current_amp = target;
                        self.interrupt_countdown = self.interrupt_time;
                    }
                }
            } else {
                // Raising.
                if MAX_CURRENT_AMP - self.current_amp < self.large_amp_inc {
                    self.current_amp = target;
                    self.interrupt_countdown = self.interrupt_time;
                } else {
                    self.current_amp += self.large_amp_inc;
                    if self.current_amp >= target {
                        self.current_amp = target;
                        self.interrupt_countdown = self.interrupt_time;
                    }
                }
            }
        }
        AMP_BASE - self.current_amp
    }

    fn next_phase(&mut self, ctx: &TvaContext) {
        let tables = ctx.tables;
        let partial_param = ctx.partial_param;

        if self.phase >= TVA_PHASE_DEAD || !self.playing {
            log::debug!("TVA next_phase with phase {} playing {}", self.phase, self.playing);
            return;
        }
        let mut new_phase = self.phase + 1;

        if new_phase == TVA_PHASE_DEAD {
            self.end(new_phase);
            return;
        }

        let mut all_levels_zero_from_now_on = false;
        if partial_param.tva.env_level[3] == 0 {
            if new_phase == TVA_PHASE_4 {
                all_levels_zero_from_now_on = true;
            } else if partial_param.tva.env_level[2] == 0 {
                if new_phase == TVA_PHASE_3 {
                    all_levels_zero_from_now_on = true;
                } else if partial_param.tva.env_level[1] == 0 {
                    if new_phase == TVA_PHASE_2 {
                        all_levels_zero_from_now_on = true;
                    } else if partial_param.tva.env_level[0] == 0 && new_phase == TVA_PHASE_ATTACK {
                        // Not present in the original firmware.
                        all_levels_zero_from_now_on = true;
                    }
                }
            }
        }

        let mut new_amp_target: i32;
        let mut new_amp_increment: i32 = 0;
        let env_point_index = self.phase;

        if !all_levels_zero_from_now_on {
            new_amp_target =
                calc_basic_amp(ctx, self.bias_amp_subtraction, self.velo_amp_subtraction);

            if new_phase == TVA_PHASE_SUSTAIN || new_phase == TVA_PHASE_RELEASE {
                if partial_param.tva.env_level[3] == 0 {
                    self.end(new_phase);
                    return;
                }
                if !ctx.can_sustain {
                    new_phase = TVA_PHASE_RELEASE;
                    new_amp_target = 0;
                    new_amp_increment = -i32::from(partial_param.tva.env_time[4]);
                    if new_amp_increment == 0 {
                        // A zero increment would never fire the interrupt;
                        // an "upward" unit increment zeroes the amp at once
                        // and brings us back here.
                        new_amp_increment = 1;
                    }
                } else {
                    new_amp_target += i32::from(partial_param.tva.env_level[3]);
                    new_amp_increment = 0;
                }
            } else {
                new_amp_target += i32::from(partial_param.tva.env_level[env_point_index]);
            }
        } else {
            new_amp_target = 0;
        }

        if (new_phase != TVA_PHASE_SUSTAIN && new_phase != TVA_PHASE_RELEASE)
            || all_levels_zero_from_now_on
        {
            let mut env_time_setting = i32::from(partial_param.tva.env_time[env_point_index.min(4)]);

            if new_phase == TVA_PHASE_ATTACK {
                env_time_setting -= (ctx.velocity as i32 - 64)
                    >> (6 - partial_param.tva.env_time_velo_sensitivity.min(6) as u32);
                if env_time_setting <= 0 && partial_param.tva.env_time[env_point_index] != 0 {
                    env_time_setting = 1;
                }
            } else {
                env_time_setting -= self.key_time_subtraction;
            }
            if env_time_setting > 0 {
                let mut amp_delta = new_amp_target - i32::from(self.la32_amp_target);
                if amp_delta <= 0 {
                    if amp_delta == 0 {
                        // The target is unchanged; without a delta no
                        // interrupt would fire, so aim one step below.
                        amp_delta = -1;
                        new_amp_target -= 1;
                        if new_amp_target < 0 {
                            // Firmware quirk: the target flips positive but
                            // the ramp still comes out descending, via a
                            // wrapped table index.
                            amp_delta = 1;
                            new_amp_target = -new_amp_target;
                        }
                    }
                    amp_delta = -amp_delta;
                    new_amp_increment = i32::from(
                        tables.env_logarithmic_time[(amp_delta & 0xFF) as usize],
                    ) - env_time_setting;
                    if new_amp_increment <= 0 {
                        new_amp_increment = 1;
                    }
                    new_amp_increment |= 0x80;
                } else {
                    new_amp_increment = i32::from(
                        tables.env_logarithmic_time[(amp_delta & 0xFF) as usize],
                    ) - env_time_setting;
                    if new_amp_increment <= 0 {
                        new_amp_increment = 1;
                    }
                }
            } else {
                new_amp_increment = if new_amp_target >= i32::from(self.la32_amp_target) {
                    0x80 | 127
                } else {
                    127
                };
            }

            if new_amp_increment == 0 {
                new_amp_increment = 1;
            }
        }

        self.start_ramp(
            new_amp_target.clamp(0, 255) as u8,
            (new_amp_increment & 0xFF) as u8,
            new_phase,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PartialParam;

    fn context<'a>(tables: &'a Tables, partial_param: &'a PartialParam) -> TvaContext<'a> {
        TvaContext {
            tables,
            partial_param,
            rhythm_temp: None,
            master_vol: 100,
            output_level: 100,
            expression: 100,
            key: 60,
            velocity: 127,
            ring_modulating_slave: false,
            can_sustain: true,
        }
    }

    fn sustained_partial_param() -> PartialParam {
        let mut param = PartialParam::default();
        param.tva.level = 100;
        param.tva.velo_sensitivity = 50;
        param.tva.env_level = [100, 100, 100, 100];
        param.tva.env_time = [0, 0, 0, 0, 0];
        param
    }

    #[test]
    fn full_level_note_reaches_the_top_target_immediately() {
        let tables = Tables::new();
        let param = sustained_partial_param();
        let ctx = context(&tables, &param);
        let mut tva = Tva::new();
        tva.reset(&ctx);
        let amp = tva.next_amp(&ctx);
        // Target 255: base amp 155 plus envLevel[0] 100, reached at once.
        assert_eq!(amp, AMP_BASE - 255 * TARGET_MULT);
        assert!(tva.is_playing());
    }

    #[test]
    fn decay_with_zero_release_time_dies_quickly() {
        let tables = Tables::new();
        let param = sustained_partial_param();
        let ctx = context(&tables, &param);
        let mut tva = Tva::new();
        tva.reset(&ctx);
        for _ in 0..64 {
            tva.next_amp(&ctx);
        }
        tva.start_decay(&param);
        let mut ticks = 0;
        while tva.is_playing() && ticks < 64 {
            tva.next_amp(&ctx);
            ticks += 1;
        }
        assert!(!tva.is_playing());
        assert_eq!(tva.next_amp(&ctx), AMP_BASE);
    }

    #[test]
    fn velocity_scales_the_subtraction_symmetrically() {
        assert_eq!(calc_velo_amp_subtraction(50, 127), 0);
        assert_eq!(calc_velo_amp_subtraction(50, 1), 0);
        // Full sensitivity attenuates soft notes far more than loud ones.
        let soft = calc_velo_amp_subtraction(100, 1);
        let loud = calc_velo_amp_subtraction(100, 127);
        assert!(soft > loud);
    }
}
