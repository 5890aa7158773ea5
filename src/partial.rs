//! One of the 32 partial slots: envelope trio plus a wave generator pair.

use crate::control_rom::PcmWaveEntry;
use crate::la32::{La32IntPartialPair, PairSlot, PcmWaveRef};
use crate::la32_float::La32FloatPartialPair;
use crate::params::{PartialParam, PatchTemp, RhythmTemp, SystemParams};
use crate::tables::Tables;
use crate::tva::{Tva, TvaContext, TVA_PHASE_RELEASE, TVA_PHASE_SUSTAIN};
use crate::tvf::{Tvf, TvfContext};
use crate::tvp::{Tvp, TvpContext};
use crate::{OutputSample, PartialState, RendererType};

/// Structure mix modes decoded from the timbre structure number.
pub const MIX_STANDARD: u8 = 0;
pub const MIX_RING_MIXED: u8 = 1;
pub const MIX_RING_ONLY: u8 = 2;
pub const MIX_STEREO: u8 = 3;

/// Samples between sustain-target re-evaluations, the control program's
/// periodic ping at its slow tick rate.
const SUSTAIN_PING_INTERVAL: u32 = 8;

/// Per-note decoded parameters shared by a part and the partials it starts.
#[derive(Clone, Debug, Default)]
pub struct PatchCache {
    pub play_partial: bool,
    pub pcm_partial: bool,
    pub pcm: u8,
    pub waveform: u8,
    pub structure_mix: u8,
    pub structure_position: u8,
    pub structure_pair: usize,
    pub partial_count: u32,
    pub sustain: bool,
    pub reverb: bool,
    pub src_partial: PartialParam,
}

/// Live per-part values a partial reads while rendering a block.
#[derive(Clone)]
pub struct PartialRenderCtx<'a> {
    pub tables: &'a Tables,
    pub pcm_rom: &'a [i16],
    pub system: SystemParams,
    pub patch_temp: PatchTemp,
    pub expression: u8,
    pub modulation: u8,
    pub pitch_bend: i32,
}

impl<'a> PartialRenderCtx<'a> {
    /// Snapshot the live values a partial of `part_num` consumes. Built
    /// from individual synth fields so the partial pool can stay mutably
    /// borrowed alongside it.
    pub(crate) fn build(
        tables: &'a Tables,
        pcm_rom: &'a [i16],
        mem: &crate::params::MemParams,
        part: &crate::part::Part,
        part_num: usize,
    ) -> PartialRenderCtx<'a> {
        PartialRenderCtx {
            tables,
            pcm_rom,
            system: mem.system(),
            patch_temp: mem.patch_temp(part_num),
            expression: part.expression(),
            modulation: part.modulation(),
            pitch_bend: part.pitch_bend(),
        }
    }
}

/// Pan position 0..14 (reversed relative to General MIDI) quantized to the
/// hardware's 8 volume steps per channel.
fn pan_volumes(panpot: u8) -> (u8, u8) {
    let pan = panpot.min(14);
    (pan.min(7), (14 - pan).min(7))
}

/// In a stereo structure the two partials spread to either side of the pan.
fn stereo_pan(panpot: u8, structure_position: u8) -> u8 {
    if structure_position == 0 {
        panpot.min(14) / 2
    } else {
        7 + panpot.min(14) / 2
    }
}

#[derive(Default)]
pub struct Partial {
    index: usize,
    owner_part: Option<usize>,
    poly: Option<usize>,
    pair: Option<usize>,
    structure_position: u8,
    mix_type: u8,

    patch_cache: PatchCache,
    rhythm_temp: Option<RhythmTemp>,
    key: i32,
    velocity: u32,
    can_sustain: bool,

    tva: Tva,
    tvf: Tvf,
    tvp: Tvp,

    int_pair: La32IntPartialPair,
    float_pair: La32FloatPartialPair,
    use_float: bool,

    pcm_wave: Option<PcmWaveEntry>,
    left_pan: u8,
    right_pan: u8,

    already_outputed: bool,
    pending_deactivation: bool,
    sustain_ping: u32,
}

impl Partial {
    pub fn new(index: usize) -> Partial {
        Partial {
            index,
            tva: Tva::new(),
            tvf: Tvf::new(),
            tvp: Tvp::new(),
            ..Partial::default()
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn owner_part(&self) -> Option<usize> {
        self.owner_part
    }

    pub fn poly(&self) -> Option<usize> {
        self.poly
    }

    pub fn pair(&self) -> Option<usize> {
        self.pair
    }

    pub fn clear_pair(&mut self) {
        self.pair = None;
    }

    pub fn is_active(&self) -> bool {
        self.owner_part.is_some()
    }

    pub fn should_reverb(&self) -> bool {
        self.is_active() && self.patch_cache.reverb
    }

    pub fn state(&self) -> PartialState {
        if !self.is_active() {
            return PartialState::Inactive;
        }
        match self.tva.phase() {
            p if p >= TVA_PHASE_RELEASE => PartialState::Release,
            p if p >= TVA_PHASE_SUSTAIN => PartialState::Sustain,
            _ => PartialState::Attack,
        }
    }

    pub fn clear_already_outputed(&mut self) {
        self.already_outputed = false;
    }

    pub fn pending_deactivation(&self) -> bool {
        self.pending_deactivation
    }

    /// Mark the slot inactive. Pool bookkeeping is done by the caller.
    pub fn deactivate_slot(&mut self) {
        self.owner_part = None;
        self.poly = None;
        self.pending_deactivation = false;
        self.int_pair.deactivate(PairSlot::Master);
        self.int_pair.deactivate(PairSlot::Slave);
        self.float_pair.deactivate(PairSlot::Master);
        self.float_pair.deactivate(PairSlot::Slave);
    }

    pub fn has_ring_modulating_slave(&self) -> bool {
        self.pair.is_some()
            && self.structure_position == 0
            && (self.mix_type == MIX_RING_MIXED || self.mix_type == MIX_RING_ONLY)
    }

    pub fn is_ring_modulating_slave(&self) -> bool {
        self.pair.is_some()
            && self.structure_position == 1
            && (self.mix_type == MIX_RING_MIXED || self.mix_type == MIX_RING_ONLY)
    }

    fn tva_context<'a>(
        &self,
        ctx: &PartialRenderCtx<'a>,
        param: &'a PartialParam,
    ) -> TvaContext<'a> {
        TvaContext {
            tables: ctx.tables,
            partial_param: param,
            rhythm_temp: self.rhythm_temp,
            master_vol: ctx.system.master_vol,
            output_level: ctx.patch_temp.output_level,
            expression: ctx.expression,
            key: self.key,
            velocity: self.velocity,
            ring_modulating_slave: self.is_ring_modulating_slave(),
            can_sustain: self.can_sustain,
        }
    }

    fn tvf_context<'a>(
        &self,
        ctx: &PartialRenderCtx<'a>,
        param: &'a PartialParam,
    ) -> TvfContext<'a> {
        TvfContext {
            tables: ctx.tables,
            partial_param: param,
            key: self.key,
            velocity: self.velocity,
            can_sustain: self.can_sustain,
        }
    }

    fn tvp_context<'a>(
        &self,
        ctx: &PartialRenderCtx<'a>,
        param: &'a PartialParam,
    ) -> TvpContext<'a> {
        TvpContext {
            tables: ctx.tables,
            partial_param: param,
            key: self.key,
            velocity: self.velocity,
            pitch_bend: ctx.pitch_bend,
            modulation: ctx.modulation,
            master_tune: ctx.system.master_tune,
            pcm_pitch: self.pcm_wave.map(|wave| wave.pitch),
        }
    }

    /// Start this slot for a note.
    #[allow(clippy::too_many_arguments)]
    pub fn start_partial(
        &mut self,
        ctx: &PartialRenderCtx,
        part_num: usize,
        poly_index: usize,
        cache: &PatchCache,
        rhythm_temp: Option<RhythmTemp>,
        key: i32,
        velocity: u32,
        can_sustain: bool,
        pair: Option<usize>,
        renderer_type: RendererType,
        pcm_wave: Option<PcmWaveEntry>,
        panpot: u8,
    ) {
        self.owner_part = Some(part_num);
        self.poly = Some(poly_index);
        self.pair = pair;
        self.patch_cache = cache.clone();
        self.rhythm_temp = rhythm_temp;
        self.structure_position = cache.structure_position;
        self.mix_type = cache.structure_mix;
        self.key = key;
        self.velocity = velocity;
        self.can_sustain = can_sustain;
        self.use_float = renderer_type == RendererType::Float;
        self.pcm_wave = pcm_wave;
        self.already_outputed = false;
        self.pending_deactivation = false;
        self.sustain_ping = 0;

        let mut mix_type = cache.structure_mix;
        let mut panpot = panpot;
        if mix_type == MIX_STEREO {
            // Stereo structures mix normally, panned apart.
            panpot = stereo_pan(panpot, cache.structure_position);
            mix_type = MIX_STANDARD;
            self.pair = None;
        }
        self.mix_type = mix_type;
        let (left, right) = pan_volumes(panpot);
        self.left_pan = left;
        self.right_pan = right;

        let param = self.patch_cache.src_partial;
        {
            let tvp_ctx = self.tvp_context(ctx, &param);
            self.tvp.reset(&tvp_ctx, ctx.patch_temp.patch.fine_tune);
        }
        {
            let base_pitch = u32::from(self.tvp.base_pitch());
            let tvf_ctx = self.tvf_context(ctx, &param);
            self.tvf.reset(&tvf_ctx, base_pitch);
        }
        {
            let tva_ctx = self.tva_context(ctx, &param);
            self.tva.reset(&tva_ctx);
        }

        let ring_modulated = mix_type == MIX_RING_MIXED || mix_type == MIX_RING_ONLY;
        if !self.is_ring_modulating_slave() {
            self.int_pair.init(ring_modulated, mix_type == MIX_RING_MIXED);
            self.float_pair.init(ring_modulated, mix_type == MIX_RING_MIXED);
            self.init_wave_generator(PairSlot::Master, ctx.tables);
        }
    }

    /// Program one slot of this partial's wave generator pair from a patch
    /// cache (the master's own cache, or a ring-modulating slave's).
    fn init_slot_from(
        &mut self,
        slot: PairSlot,
        tables: &Tables,
        cache: &PatchCache,
        velocity: u32,
        pcm_wave: Option<PcmWaveEntry>,
    ) {
        if cache.pcm_partial {
            if let Some(wave) = pcm_wave {
                let wave_ref = PcmWaveRef {
                    start: wave.addr,
                    len: wave.len,
                    looped: wave.looped,
                };
                if self.use_float {
                    self.float_pair.init_pcm(slot, wave_ref);
                } else {
                    self.int_pair.init_pcm(slot, wave_ref);
                }
            }
            return;
        }
        let param = &cache.src_partial;
        let sawtooth = param.wg.waveform & 1 != 0;
        let mut pulse_width_val = (velocity as i32 - 64)
            * (i32::from(param.wg.pulse_width_velo_sensitivity) - 7)
            + i32::from(tables.pulse_width_100_to_255[param.wg.pulse_width.min(100) as usize]);
        pulse_width_val = pulse_width_val.clamp(0, 255);
        let resonance = param.tvf.resonance;
        if self.use_float {
            self.float_pair
                .init_synth(slot, sawtooth, pulse_width_val as u8, resonance);
        } else {
            self.int_pair
                .init_synth(slot, sawtooth, pulse_width_val as u8, resonance, tables);
        }
    }

    fn init_wave_generator(&mut self, slot: PairSlot, tables: &Tables) {
        let cache = self.patch_cache.clone();
        let velocity = self.velocity;
        let pcm_wave = self.pcm_wave;
        self.init_slot_from(slot, tables, &cache, velocity, pcm_wave);
    }

    /// Program the slave slot of this (master) partial's pair from the
    /// ring-modulating slave partial's configuration.
    pub fn init_ring_slave_slot(&mut self, tables: &Tables, slave: &Partial) {
        self.init_slot_from(
            PairSlot::Slave,
            tables,
            &slave.patch_cache.clone(),
            slave.velocity,
            slave.pcm_wave,
        );
    }

    /// The LA32 amp register input for this tick.
    fn next_amp(&mut self, ctx: &PartialRenderCtx) -> u32 {
        let param = self.patch_cache.src_partial;
        let tva_ctx = self.tva_context(ctx, &param);
        let amp = self.tva.next_amp(&tva_ctx);
        self.sustain_ping += 1;
        if self.sustain_ping >= SUSTAIN_PING_INTERVAL {
            self.sustain_ping = 0;
            self.tva.recalc_sustain(&tva_ctx);
        }
        amp
    }

    /// The LA32 cutoff register input for this tick.
    fn next_cutoff(&mut self, ctx: &PartialRenderCtx) -> u32 {
        if self.patch_cache.pcm_partial {
            return 0;
        }
        let param = self.patch_cache.src_partial;
        let tvf_ctx = self.tvf_context(ctx, &param);
        let modifier = self.tvf.next_cutoff_modifier(&tvf_ctx);
        (u32::from(self.tvf.base_cutoff()) << 18) + (modifier >> 5)
    }

    fn next_pitch(&mut self, ctx: &PartialRenderCtx) -> u16 {
        let param = self.patch_cache.src_partial;
        let tvp_ctx = self.tvp_context(ctx, &param);
        self.tvp.next_pitch(&tvp_ctx)
    }

    /// Force the decay of all three envelopes.
    pub fn start_decay_all(&mut self, ctx: &PartialRenderCtx) {
        let param = self.patch_cache.src_partial;
        self.tva.start_decay(&param);
        self.tvf.start_decay(&param);
        let tvp_ctx = self.tvp_context(ctx, &param);
        self.tvp.start_decay(&tvp_ctx);
    }

    /// Slam the amplitude shut to reclaim the slot as fast as the hardware
    /// allows.
    pub fn start_abort(&mut self) {
        self.tva.start_abort();
    }

    fn pair_active(&self, slot: PairSlot) -> bool {
        if self.use_float {
            self.float_pair.is_active(slot)
        } else {
            self.int_pair.is_active(slot)
        }
    }

    /// Render `left.len()` samples, mixing into the buffers. Returns false
    /// when this partial produces no output of its own (inactive, already
    /// rendered through its pair, or a ring-modulating slave).
    pub fn produce_output<S: OutputSample>(
        &mut self,
        mut slave: Option<&mut Partial>,
        ctx: &PartialRenderCtx,
        slave_ctx: Option<&PartialRenderCtx>,
        left: &mut [S],
        right: &mut [S],
    ) -> bool {
        if !self.is_active() || self.already_outputed || self.is_ring_modulating_slave() {
            return false;
        }
        self.already_outputed = true;

        for frame in 0..left.len() {
            if !self.tva.is_playing() || !self.pair_active(PairSlot::Master) {
                self.pending_deactivation = true;
                break;
            }
            let amp = self.next_amp(ctx);
            let pitch = self.next_pitch(ctx);
            let cutoff = self.next_cutoff(ctx);
            if self.use_float {
                self.float_pair.generate_next_sample(
                    PairSlot::Master,
                    ctx.tables,
                    ctx.pcm_rom,
                    amp,
                    pitch,
                    cutoff,
                );
            } else {
                self.int_pair.generate_next_sample(
                    PairSlot::Master,
                    ctx.tables,
                    ctx.pcm_rom,
                    amp,
                    pitch,
                    cutoff,
                );
            }

            if self.has_ring_modulating_slave() {
                if let (Some(slave_partial), Some(sctx)) = (slave.as_deref_mut(), slave_ctx) {
                    let slave_amp = slave_partial.next_amp(sctx);
                    let slave_pitch = slave_partial.next_pitch(sctx);
                    let slave_cutoff = slave_partial.next_cutoff(sctx);
                    if self.use_float {
                        self.float_pair.generate_next_sample(
                            PairSlot::Slave,
                            ctx.tables,
                            ctx.pcm_rom,
                            slave_amp,
                            slave_pitch,
                            slave_cutoff,
                        );
                    } else {
                        self.int_pair.generate_next_sample(
                            PairSlot::Slave,
                            ctx.tables,
                            ctx.pcm_rom,
                            slave_amp,
                            slave_pitch,
                            slave_cutoff,
                        );
                    }
                    if !slave_partial.tva.is_playing() || !self.pair_active(PairSlot::Slave) {
                        slave_partial.pending_deactivation = true;
                        if self.use_float {
                            self.float_pair.deactivate(PairSlot::Slave);
                        } else {
                            self.int_pair.deactivate(PairSlot::Slave);
                        }
                        if self.mix_type == MIX_RING_ONLY {
                            // Nothing audible remains without the modulator.
                            self.pending_deactivation = true;
                            break;
                        }
                    }
                }
            }

            if self.use_float {
                let sample = self.float_pair.next_out_sample();
                let left_out = sample * f32::from(self.left_pan) / 7.0;
                let right_out = sample * f32::from(self.right_pan) / 7.0;
                left[frame] = left[frame].mix(S::from_float(left_out));
                right[frame] = right[frame].mix(S::from_float(right_out));
            } else {
                let sample = i32::from(self.int_pair.next_out_sample(ctx.tables));
                let left_out = sample * i32::from(self.left_pan) / 7;
                let right_out = sample * i32::from(self.right_pan) / 7;
                left[frame] = left[frame].mix(S::from_accumulator(left_out));
                right[frame] = right[frame].mix(S::from_accumulator(right_out));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pan_splits_the_hardware_range_in_half() {
        assert_eq!(pan_volumes(0), (0, 7));
        assert_eq!(pan_volumes(7), (7, 7));
        assert_eq!(pan_volumes(14), (7, 0));
        assert_eq!(pan_volumes(3), (3, 7));
    }

    #[test]
    fn stereo_structures_spread_around_the_pan_center() {
        let master = stereo_pan(7, 0);
        let slave = stereo_pan(7, 1);
        assert!(master < 7);
        assert!(slave > 7);
    }
}
