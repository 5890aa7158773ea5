//! Parts: the eight melodic channels and the rhythm channel.

use tinyvec::TinyVec;

use crate::params::{RhythmTemp, TimbreParam};
use crate::partial::{PatchCache, MIX_RING_MIXED, MIX_RING_ONLY};
use crate::poly::PolyState;
use crate::synth::{ReportEvent, Synth};

/// Index of the rhythm part.
pub const RHYTHM_PART: usize = 8;

/// Maps a structure number to the PCM discriminator bits of its pair
/// (bit 1: first partial is PCM, bit 0: second partial is PCM).
const PARTIAL_STRUCT: [u8; 13] = [0, 0, 2, 2, 1, 3, 3, 0, 3, 0, 2, 1, 3];

/// Maps a structure number to the pair's mix mode.
const PARTIAL_MIX_STRUCT: [u8; 13] = [0, 1, 0, 1, 1, 0, 1, 3, 3, 2, 2, 2, 2];

/// One part: a MIDI-addressable group of polys with a live patch.
pub struct Part {
    part_num: usize,
    name: String,
    patch_cache: [PatchCache; 4],
    cache_dirty: bool,
    /// Rhythm-only: per-drum caches, built lazily.
    drum_cache: Vec<[PatchCache; 4]>,
    drum_cache_dirty: Vec<bool>,
    /// Active polys, oldest first; stays inline for typical polyphony.
    active_polys: TinyVec<[usize; 8]>,
    current_instr: String,
    expression: u8,
    modulation: u8,
    pitch_bend: i32,
    bender_raw: u16,
    hold_pedal: bool,
}

impl Part {
    pub fn new(part_num: usize) -> Part {
        let (name, drum_slots) = if part_num == RHYTHM_PART {
            ("Rhythm".to_string(), crate::params::RHYTHM_SLOTS)
        } else {
            (format!("Part {}", part_num + 1), 0)
        };
        Part {
            part_num,
            name,
            patch_cache: Default::default(),
            cache_dirty: true,
            drum_cache: vec![Default::default(); drum_slots],
            drum_cache_dirty: vec![true; drum_slots],
            active_polys: TinyVec::new(),
            current_instr: String::new(),
            expression: 100,
            modulation: 0,
            pitch_bend: 0,
            bender_raw: 0x2000,
            hold_pedal: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_rhythm(&self) -> bool {
        self.part_num == RHYTHM_PART
    }

    pub fn expression(&self) -> u8 {
        self.expression
    }

    pub fn modulation(&self) -> u8 {
        self.modulation
    }

    pub fn pitch_bend(&self) -> i32 {
        self.pitch_bend
    }

    pub fn hold_pedal(&self) -> bool {
        self.hold_pedal
    }

    pub fn current_instr(&self) -> &str {
        &self.current_instr
    }

    pub fn active_polys(&self) -> &[usize] {
        &self.active_polys
    }

    pub fn add_active_poly(&mut self, poly_index: usize) {
        self.active_polys.push(poly_index);
    }

    pub fn remove_active_poly(&mut self, poly_index: usize) {
        self.active_polys.retain(|&p| p != poly_index);
    }

    pub fn active_polys_clear(&mut self) {
        self.active_polys.clear();
    }

    pub fn mark_cache_dirty(&mut self) {
        self.cache_dirty = true;
        for dirty in self.drum_cache_dirty.iter_mut() {
            *dirty = true;
        }
    }

    pub fn set_current_instr(&mut self, name: &str) {
        self.current_instr = name.to_string();
    }

    pub fn set_expression(&mut self, midi_expression: u8) {
        // Matches the mapping table in the control ROM.
        self.expression = midi_expression.min(127) * 100 / 127;
    }

    pub fn set_modulation(&mut self, midi_modulation: u8) {
        self.modulation = midi_modulation;
    }

    /// Update the bender from a 14-bit MIDI value and the patch's range in
    /// semitones; the result is in 4096ths of a semitone.
    pub fn set_bend(&mut self, midi_bend: u16, bender_range: u8) {
        self.bender_raw = midi_bend;
        self.pitch_bend = ((i32::from(midi_bend) - 8192) * i32::from(bender_range)) >> 1;
    }

    pub fn update_bend_range(&mut self, bender_range: u8) {
        self.set_bend(self.bender_raw, bender_range);
    }

    pub fn set_hold_pedal_flag(&mut self, down: bool) {
        self.hold_pedal = down;
    }

    /// Map a MIDI key through the patch key shift, folding out-of-range
    /// keys back by octaves. The result is the internal key, middle C = 60.
    pub fn midi_key_to_key(&self, midi_key: u8, key_shift: u8) -> i32 {
        let mut key = i32::from(midi_key) + i32::from(key_shift);
        while key < 36 {
            key += 12;
        }
        while key > 132 {
            key -= 12;
        }
        key - 24
    }

    /// Decode a timbre into per-partial caches.
    pub fn cache_timbre(cache: &mut [PatchCache; 4], timbre: &TimbreParam) {
        let mut partial_count = 0;
        for t in 0..4 {
            if (timbre.partial_mute >> t) & 1 == 1 {
                cache[t].play_partial = true;
                partial_count += 1;
            } else {
                cache[t].play_partial = false;
                continue;
            }
            let structure = if t < 2 {
                timbre.partial_structure12
            } else {
                timbre.partial_structure34
            }
            .min(12) as usize;
            let (pcm_bit, position, pair) = match t {
                0 => (2, 0, 1),
                1 => (1, 1, 0),
                2 => (2, 0, 3),
                _ => (1, 1, 2),
            };
            cache[t].pcm_partial = PARTIAL_STRUCT[structure] & pcm_bit != 0;
            cache[t].structure_mix = PARTIAL_MIX_STRUCT[structure];
            cache[t].structure_position = position;
            cache[t].structure_pair = pair;
            cache[t].pcm = timbre.partial[t].wg.pcm_wave;
            cache[t].waveform = timbre.partial[t].wg.waveform;
            cache[t].src_partial = timbre.partial[t];
        }
        for entry in cache.iter_mut() {
            entry.partial_count = partial_count;
            entry.sustain = timbre.no_sustain == 0;
        }
    }
}

impl Synth {
    /// Note-on for a melodic part, or a drum hit for the rhythm part.
    pub(crate) fn part_note_on(&mut self, part_num: usize, midi_key: u8, velocity: u8) {
        if part_num == RHYTHM_PART {
            self.rhythm_note_on(midi_key, velocity);
            return;
        }
        let patch_temp = self.mem.patch_temp(part_num);
        let key = self.parts[part_num].midi_key_to_key(midi_key, patch_temp.patch.key_shift);

        // Single assign: a new note-on on a sounding key replaces it.
        self.stop_note(part_num, key);

        if self.parts[part_num].cache_dirty {
            let timbre = self.mem.timbre_temp_param(part_num);
            Part::cache_timbre(&mut self.parts[part_num].patch_cache, &timbre);
            let reverb = patch_temp.patch.reverb_switch > 0;
            for entry in self.parts[part_num].patch_cache.iter_mut() {
                entry.reverb = reverb;
            }
            self.parts[part_num].cache_dirty = false;
            let name = timbre.name_str();
            self.parts[part_num].set_current_instr(&name);
        }
        let cache = self.parts[part_num].patch_cache.clone();
        self.play_poly(part_num, &cache, None, key, velocity);
    }

    fn rhythm_note_on(&mut self, midi_key: u8, velocity: u8) {
        if !(24..=108).contains(&midi_key) {
            log::debug!("Rhythm: invalid key {} (velocity {})", midi_key, velocity);
            return;
        }
        let drum_num = usize::from(midi_key - 24);
        if drum_num >= crate::params::RHYTHM_SLOTS {
            return;
        }
        let rhythm_temp = self.mem.rhythm_temp(drum_num);
        let drum_timbre_num = rhythm_temp.timbre;
        if drum_timbre_num >= 94 && self.control_rom.map.pcm_count <= 128 {
            log::debug!("Rhythm: unmapped key {} (velocity {})", midi_key, velocity);
            return;
        }
        if drum_timbre_num >= 127 {
            log::debug!("Rhythm: unmapped key {} (velocity {})", midi_key, velocity);
            return;
        }
        let abs_timbre_num = usize::from(drum_timbre_num) + 128;
        let timbre = self.mem.timbre(abs_timbre_num);
        if self.parts[RHYTHM_PART].drum_cache_dirty[drum_num] {
            let mut cache = self.parts[RHYTHM_PART].drum_cache[drum_num].clone();
            Part::cache_timbre(&mut cache, &timbre);
            for entry in cache.iter_mut() {
                entry.reverb = rhythm_temp.reverb_switch > 0;
            }
            self.parts[RHYTHM_PART].drum_cache[drum_num] = cache;
            self.parts[RHYTHM_PART].drum_cache_dirty[drum_num] = false;
        }
        let name = timbre.name_str();
        self.parts[RHYTHM_PART].set_current_instr(&name);
        let cache = self.parts[RHYTHM_PART].drum_cache[drum_num].clone();
        self.play_poly(RHYTHM_PART, &cache, Some(rhythm_temp), i32::from(midi_key), velocity);
    }

    fn play_poly(
        &mut self,
        part_num: usize,
        cache: &[PatchCache; 4],
        rhythm_temp: Option<RhythmTemp>,
        key: i32,
        velocity: u8,
    ) {
        let needed = cache[0].partial_count;
        let free = self.partial_manager.free_partial_count();
        if needed == 0 {
            log::debug!("{}: no partials to play", self.parts[part_num].name());
            return;
        }
        if !self.free_partials(needed as usize, part_num) {
            self.report(ReportEvent::NoteOnIgnored {
                partials_needed: needed as u8,
                partials_free: free as u8,
            });
            return;
        }
        if self.aborting_poly.is_some() && self.partial_manager.free_partial_count() < needed as usize
        {
            // The controller busy-waits for the aborted partials to die;
            // the note plays as soon as they do.
            if self.pending_note_on.is_some() {
                log::warn!("a newer note-on arrived while one was parked behind an abortion");
            }
            self.pending_note_on = Some(PendingNoteOn {
                part_num,
                cache: cache.clone(),
                rhythm_temp,
                key,
                velocity,
            });
            return;
        }
        self.start_poly(part_num, cache, rhythm_temp, key, velocity);
    }

    pub(crate) fn start_poly(
        &mut self,
        part_num: usize,
        cache: &[PatchCache; 4],
        rhythm_temp: Option<RhythmTemp>,
        key: i32,
        velocity: u8,
    ) {
        let poly_index = match self.partial_manager.assign_poly() {
            Some(index) => index,
            None => {
                log::warn!("{}: no free poly for key {}", self.parts[part_num].name(), key);
                return;
            }
        };

        let mut partial_ixs: [Option<usize>; 4] = [None; 4];
        for t in 0..4 {
            if cache[t].play_partial {
                partial_ixs[t] = self.partial_manager.alloc_partial();
                if partial_ixs[t].is_none() {
                    log::warn!("{}: partial pool exhausted", self.parts[part_num].name());
                }
            }
        }

        self.polys[poly_index].set_part(Some(part_num));
        self.polys[poly_index].reset(
            key.clamp(0, 127) as u8,
            velocity,
            cache[0].sustain,
            partial_ixs,
        );
        self.parts[part_num].add_active_poly(poly_index);

        let ctx = crate::partial::PartialRenderCtx::build(
            &self.tables,
            &self.pcm_rom,
            &self.mem,
            &self.parts[part_num],
            part_num,
        );
        let renderer_type = self.renderer_type;
        for t in 0..4 {
            let partial_index = match partial_ixs[t] {
                Some(index) => index,
                None => continue,
            };
            let pair_index = partial_ixs[cache[t].structure_pair];
            let pcm_wave = if cache[t].pcm_partial {
                let mut pcm_num = usize::from(cache[t].pcm);
                if self.control_rom.map.pcm_count > 128 && cache[t].waveform > 1 {
                    pcm_num += 128;
                }
                self.pcm_waves.get(pcm_num).copied()
            } else {
                None
            };
            let panpot = rhythm_temp
                .map(|r| r.panpot)
                .unwrap_or(ctx.patch_temp.panpot);
            self.partials[partial_index].start_partial(
                &ctx,
                part_num,
                poly_index,
                &cache[t],
                rhythm_temp,
                key,
                u32::from(velocity),
                cache[0].sustain,
                pair_index,
                renderer_type,
                pcm_wave,
                panpot,
            );
        }
        // Wire up the ring-modulating pairs after every slot is running.
        for t in 0..4 {
            let (Some(master_ix), Some(slave_ix)) = (partial_ixs[t], partial_ixs[cache[t].structure_pair])
            else {
                continue;
            };
            if cache[t].structure_position == 0
                && (cache[t].structure_mix == MIX_RING_MIXED
                    || cache[t].structure_mix == MIX_RING_ONLY)
            {
                let (master, slave) = get_two_mut(&mut self.partials, master_ix, slave_ix);
                if let Some(slave) = slave {
                    master.init_ring_slave_slot(&self.tables, slave);
                }
            }
        }
        self.report(ReportEvent::PolyStateChanged { part: part_num as u8 });
    }

    /// Force the release phase of polys playing `key` on a part.
    pub(crate) fn stop_note(&mut self, part_num: usize, key: i32) {
        let poly_ixs: Vec<usize> = self.parts[part_num].active_polys().to_vec();
        for poly_index in poly_ixs {
            if i32::from(self.polys[poly_index].key()) == key {
                self.start_poly_decay(poly_index);
            }
        }
    }

    pub(crate) fn part_note_off(&mut self, part_num: usize, midi_key: u8) {
        let key = if part_num == RHYTHM_PART {
            i32::from(midi_key)
        } else {
            let patch_temp = self.mem.patch_temp(part_num);
            self.parts[part_num].midi_key_to_key(midi_key, patch_temp.patch.key_shift)
        };
        let hold = self.parts[part_num].hold_pedal();
        let poly_ixs: Vec<usize> = self.parts[part_num].active_polys().to_vec();
        for poly_index in poly_ixs {
            if i32::from(self.polys[poly_index].key()) == key {
                self.poly_note_off(poly_index, hold);
            }
        }
    }

    fn poly_note_off(&mut self, poly_index: usize, pedal_held: bool) {
        let was = self.polys[poly_index].state();
        if self.polys[poly_index].note_off(pedal_held)
            && self.polys[poly_index].state() == PolyState::Releasing
            && was != PolyState::Releasing
        {
            self.decay_poly_partials(poly_index);
        }
    }

    /// Start every partial of a poly decaying and mark it releasing.
    pub(crate) fn start_poly_decay(&mut self, poly_index: usize) {
        if !self.polys[poly_index].start_decay() {
            return;
        }
        self.decay_poly_partials(poly_index);
    }

    fn decay_poly_partials(&mut self, poly_index: usize) {
        let part_num = match self.polys[poly_index].part() {
            Some(part) => part,
            None => return,
        };
        let ctx = crate::partial::PartialRenderCtx::build(
            &self.tables,
            &self.pcm_rom,
            &self.mem,
            &self.parts[part_num],
            part_num,
        );
        let partial_ixs = *self.polys[poly_index].partials();
        for partial_index in partial_ixs.into_iter().flatten() {
            self.partials[partial_index].start_decay_all(&ctx);
        }
    }

    /// All notes off (0x7B): respects the hold pedal.
    pub(crate) fn part_all_notes_off(&mut self, part_num: usize) {
        let hold = self.parts[part_num].hold_pedal();
        let poly_ixs: Vec<usize> = self.parts[part_num].active_polys().to_vec();
        for poly_index in poly_ixs {
            self.poly_note_off(poly_index, hold);
        }
    }

    /// All sound off: immediate decay regardless of the hold pedal.
    pub(crate) fn part_all_sound_off(&mut self, part_num: usize) {
        let poly_ixs: Vec<usize> = self.parts[part_num].active_polys().to_vec();
        for poly_index in poly_ixs {
            self.start_poly_decay(poly_index);
        }
    }

    pub(crate) fn part_set_hold_pedal(&mut self, part_num: usize, down: bool) {
        if self.parts[part_num].hold_pedal() && !down {
            self.parts[part_num].set_hold_pedal_flag(false);
            let poly_ixs: Vec<usize> = self.parts[part_num].active_polys().to_vec();
            for poly_index in poly_ixs {
                if self.polys[poly_index].stop_pedal_hold() {
                    self.decay_poly_partials(poly_index);
                }
            }
        } else {
            self.parts[part_num].set_hold_pedal_flag(down);
        }
    }

    /// Load a patch from the bank onto a part and silence it.
    pub(crate) fn part_set_program(&mut self, part_num: usize, patch_num: u8) {
        if part_num == RHYTHM_PART {
            log::debug!("Rhythm: program change {} is invalid", patch_num);
            return;
        }
        let patch_bytes = self.mem.patches[usize::from(patch_num) & 127];
        self.mem.set_patch_temp_patch(part_num, &patch_bytes);
        let patch = self.mem.patch_temp(part_num).patch;
        let timbre_bytes = self.mem.timbres[patch.abs_timbre_num()];
        self.mem.set_timbre_temp(
            part_num,
            timbre_bytes[..crate::params::TIMBRE_PARAM_SIZE]
                .try_into()
                .unwrap(),
        );
        self.refresh_part(part_num);
        self.part_all_sound_off(part_num);
        let name = self.parts[part_num].current_instr().to_string();
        self.report(ReportEvent::ProgramChanged {
            part: part_num as u8,
            patch_name: name,
        });
    }

    /// Re-read a part's live areas after a SysEx write.
    pub(crate) fn refresh_part(&mut self, part_num: usize) {
        self.parts[part_num].mark_cache_dirty();
        if part_num != RHYTHM_PART {
            let patch = self.mem.patch_temp(part_num).patch;
            self.parts[part_num].update_bend_range(patch.bender_range);
            let timbre = self.mem.timbre_temp_param(part_num);
            let name = timbre.name_str();
            self.parts[part_num].set_current_instr(&name);
            // Melodic parts carry the patch reverb switch in their caches.
            let reverb = patch.reverb_switch > 0;
            for entry in self.parts[part_num].patch_cache.iter_mut() {
                entry.reverb = reverb;
            }
        }
    }

    /// Invalidate caches of parts using a rewritten memory timbre.
    pub(crate) fn refresh_timbre(&mut self, abs_timbre_num: usize) {
        for part_num in 0..8 {
            let patch = self.mem.patch_temp(part_num).patch;
            if patch.abs_timbre_num() == abs_timbre_num {
                self.parts[part_num].mark_cache_dirty();
            }
        }
        if abs_timbre_num >= 128 {
            self.parts[RHYTHM_PART].mark_cache_dirty();
        }
    }
}

/// A note-on parked while the controller waits for aborted partials.
pub(crate) struct PendingNoteOn {
    pub part_num: usize,
    pub cache: [PatchCache; 4],
    pub rhythm_temp: Option<RhythmTemp>,
    pub key: i32,
    pub velocity: u8,
}

/// Disjoint mutable access to two pool entries.
pub(crate) fn get_two_mut<T>(slice: &mut [T], i: usize, j: usize) -> (&mut T, Option<&mut T>) {
    if i == j {
        let (item, _) = slice.split_at_mut(i + 1);
        return (&mut item[i], None);
    }
    if i < j {
        let (left, right) = slice.split_at_mut(j);
        (&mut left[i], Some(&mut right[0]))
    } else {
        let (left, right) = slice.split_at_mut(i);
        (&mut right[0], Some(&mut left[j]))
    }
}
