//! The synth: ROM loading, MIDI dispatch, parameter memory and the render
//! loop that ties the partial pool, reverb and analog stage together.

use thiserror::Error;

use crate::analog::{Analog, DacSample};
use crate::control_rom::{decode_pcm_rom, init_pcm_list, init_timbres, ControlRom, PcmWaveEntry};
use crate::midi::{MidiEvent, MidiEventBody, MidiQueue, MidiSender, DEFAULT_MIDI_EVENT_QUEUE_SIZE};
use crate::params::{
    find_region, memaddr, MemParams, Region, RegionType, SystemParams, PATCH_PARAM_SIZE,
    SYSTEM_SIZE, TIMBRE_PARAM_SIZE,
};
use crate::part::{Part, PendingNoteOn, RHYTHM_PART};
use crate::partial::{Partial, PartialRenderCtx};
use crate::partial_manager::PartialManager;
use crate::poly::{Poly, PolyState};
use crate::reverb::{ReverbModel, ReverbModelKind};
use crate::rom::RomImage;
use crate::tables::Tables;
use crate::{
    AnalogOutputMode, DacInputMode, OutputSample, PartialState, RendererType, CONTROL_ROM_SIZE,
    DEFAULT_MAX_PARTIALS, MAX_SAMPLES_PER_RUN,
};

const SYSEX_MANUFACTURER_ROLAND: u8 = 0x41;
const SYSEX_MDL_MT32: u8 = 0x16;
const SYSEX_MDL_D50: u8 = 0x14;
const SYSEX_CMD_RQ1: u8 = 0x11;
const SYSEX_CMD_DT1: u8 = 0x12;

/// Chunk bound while a poly abort is in flight, keeping the busy-wait
/// emulation responsive.
const ABORT_CHUNK: usize = 8;

/// Why a synth failed to open.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("control ROM is not usable: {0}")]
    ControlRom(String),
    #[error("PCM ROM is not usable: {0}")]
    PcmRom(String),
}

/// One-way events reported to the listener from the render thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportEvent {
    DebugMessage(String),
    LcdMessage(String),
    MidiMessagePlayed,
    MidiQueueOverflow,
    DeviceReset,
    DeviceReconfig,
    NewReverbMode(u8),
    NewReverbTime(u8),
    NewReverbLevel(u8),
    PolyStateChanged { part: u8 },
    ProgramChanged { part: u8, patch_name: String },
    NoteOnIgnored { partials_needed: u8, partials_free: u8 },
    PlayingPolySilenced { part: u8 },
    ChecksumError { expected: u8, actual: u8 },
}

/// Construction-time options.
#[derive(Clone, Copy, Debug)]
pub struct SynthOptions {
    pub partial_count: usize,
    pub analog_output_mode: AnalogOutputMode,
    pub renderer_type: RendererType,
    pub dac_input_mode: DacInputMode,
    pub midi_queue_size: usize,
    /// Overrides the reverb model implied by the control ROM generation.
    pub reverb_model: Option<ReverbModelKind>,
}

impl Default for SynthOptions {
    fn default() -> Self {
        SynthOptions {
            partial_count: DEFAULT_MAX_PARTIALS,
            analog_output_mode: AnalogOutputMode::default(),
            renderer_type: RendererType::default(),
            dac_input_mode: DacInputMode::default(),
            midi_queue_size: DEFAULT_MIDI_EVENT_QUEUE_SIZE,
            reverb_model: None,
        }
    }
}

type ReportHandler = Box<dyn FnMut(&ReportEvent)>;

/// The sound-generation core of the module.
pub struct Synth {
    pub(crate) tables: Tables,
    pub(crate) control_rom: ControlRom,
    pub(crate) pcm_rom: Vec<i16>,
    pub(crate) pcm_waves: Vec<PcmWaveEntry>,

    pub(crate) mem: MemParams,
    mem_default: MemParams,
    padded_timbre_max_table: Vec<u8>,

    pub(crate) parts: Vec<Part>,
    pub(crate) polys: Vec<Poly>,
    pub(crate) partials: Vec<Partial>,
    pub(crate) partial_manager: PartialManager,
    pub(crate) aborting_poly: Option<usize>,
    pub(crate) pending_note_on: Option<PendingNoteOn>,

    chantable: [i8; 16],

    pub(crate) renderer_type: RendererType,
    dac_input_mode: DacInputMode,
    reverb: ReverbModel,
    reverb_enabled: bool,
    reverb_overridden: bool,
    reverb_model_kind: ReverbModelKind,
    mt32_reverb_compatible: bool,
    analog: Analog,

    midi_queue: MidiQueue,
    rendered_sample_count: u32,

    report_handler: Option<ReportHandler>,
    partial_count: usize,
}

impl Synth {
    /// Open a synth from recognized control and PCM ROM images.
    pub fn open(
        control_rom_image: &RomImage,
        pcm_rom_image: &RomImage,
        options: SynthOptions,
    ) -> Result<Synth, OpenError> {
        let control_rom = ControlRom::from_image(control_rom_image)
            .ok_or_else(|| OpenError::ControlRom("unsupported control ROM".to_string()))?;
        if control_rom.data.len() != CONTROL_ROM_SIZE {
            return Err(OpenError::ControlRom("wrong control ROM size".to_string()));
        }

        let pcm_rom = decode_pcm_rom(pcm_rom_image.data());
        let expected_samples = if control_rom.map.pcm_count > 128 {
            512 * 1024
        } else {
            256 * 1024
        };
        if pcm_rom.len() < expected_samples {
            return Err(OpenError::PcmRom(format!(
                "expected {} samples, got {}",
                expected_samples,
                pcm_rom.len()
            )));
        }
        let pcm_waves = init_pcm_list(&control_rom.data, control_rom.map, pcm_rom.len())
            .map_err(OpenError::ControlRom)?;

        let mut mem = MemParams::new();

        // Timbre banks A and B, then the rhythm bank; the memory bank is
        // left zeroed the way the hardware initialises it.
        let map = control_rom.map;
        init_timbres(&mut mem, &control_rom.data, map.timbre_a_map, map.timbre_a_offset, 64, 0, map.timbre_a_compressed)
            .map_err(OpenError::ControlRom)?;
        init_timbres(&mut mem, &control_rom.data, map.timbre_b_map, map.timbre_b_offset, 64, 64, map.timbre_b_compressed)
            .map_err(OpenError::ControlRom)?;
        init_timbres(&mut mem, &control_rom.data, map.timbre_r_map, 0, map.timbre_r_count as usize, 192, true)
            .map_err(OpenError::ControlRom)?;

        // Rhythm temp defaults.
        for (slot, bytes) in mem.rhythm_temp.iter_mut().enumerate().take(map.rhythm_settings_count as usize) {
            let base = map.rhythm_settings as usize + 4 * slot;
            bytes.copy_from_slice(&control_rom.data[base..base + 4]);
        }

        // Patch bank defaults.
        for (i, patch) in mem.patches.iter_mut().enumerate() {
            patch[0] = (i / 64) as u8;
            patch[1] = (i % 64) as u8;
            patch[2] = 24; // key shift
            patch[3] = 50; // fine tune
            patch[4] = 12; // bender range
            patch[5] = 0; // assign mode
            patch[6] = 1; // reverb switch
        }

        // System defaults; the standard pitch of the hardware is 442 Hz.
        let system = SystemParams {
            master_tune: 0x4A,
            reverb_mode: 0,
            reverb_time: 5,
            reverb_level: 3,
            reserve_settings: control_rom.reserve_settings(),
            chan_assign: [1, 2, 3, 4, 5, 6, 7, 8, 9],
            master_vol: 100,
        };
        mem.system = system.to_bytes();

        let pan_settings = control_rom.pan_settings();
        for part_num in 0..8 {
            mem.set_patch_temp_output_level(part_num, 80);
            mem.set_patch_temp_panpot(part_num, pan_settings[part_num]);
        }

        let partial_count = options.partial_count.clamp(1, 256);
        let features = *control_rom.features();
        let reverb_model_kind = options.reverb_model.unwrap_or_default();
        let padded_timbre_max_table = control_rom.padded_timbre_max_table();

        let mut synth = Synth {
            tables: Tables::new(),
            control_rom,
            pcm_rom,
            pcm_waves,
            mem,
            mem_default: MemParams::new(),
            padded_timbre_max_table,
            parts: (0..9).map(Part::new).collect(),
            polys: vec![Poly::default(); partial_count],
            partials: (0..partial_count).map(Partial::new).collect(),
            partial_manager: PartialManager::new(partial_count),
            aborting_poly: None,
            pending_note_on: None,
            chantable: [-1; 16],
            renderer_type: options.renderer_type,
            dac_input_mode: options.dac_input_mode,
            reverb: ReverbModel::new(reverb_model_kind, 0, features.old_mt32_reverb_compatible),
            reverb_enabled: true,
            reverb_overridden: false,
            reverb_model_kind,
            mt32_reverb_compatible: features.old_mt32_reverb_compatible,
            analog: Analog::new(options.analog_output_mode, features.old_mt32_reverb_compatible),
            midi_queue: MidiQueue::new(options.midi_queue_size),
            rendered_sample_count: 0,
            report_handler: None,
            partial_count,
        };

        // Default programs on the melodic parts.
        let programs = synth.control_rom.program_settings();
        for part_num in 0..8 {
            synth.part_set_program(part_num, programs[part_num]);
        }
        synth.refresh_part(RHYTHM_PART);
        synth.refresh_system(true);

        // The default state is what a reset restores.
        synth.mem_default = synth.mem.clone();
        Ok(synth)
    }

    /// Attach the one-way event listener.
    pub fn set_report_handler(&mut self, handler: impl FnMut(&ReportEvent) + 'static) {
        self.report_handler = Some(Box::new(handler));
    }

    pub(crate) fn report(&mut self, event: ReportEvent) {
        if let Some(handler) = self.report_handler.as_mut() {
            handler(&event);
        }
    }

    // -- MIDI ingress -----------------------------------------------------

    /// Producer handle for enqueueing MIDI from another thread.
    pub fn midi_sender(&self) -> MidiSender {
        self.midi_queue.sender()
    }

    /// Enqueue a packed short message to play at `timestamp` (in rendered
    /// samples). Returns false and reports on queue overflow.
    pub fn play_msg_at(&mut self, msg: u32, timestamp: u32) -> bool {
        if !self.midi_queue.push_short(msg, timestamp) {
            self.report(ReportEvent::MidiQueueOverflow);
            return false;
        }
        true
    }

    /// Enqueue a packed short message to play as soon as possible.
    pub fn play_msg(&mut self, msg: u32) -> bool {
        let timestamp = self.rendered_sample_count;
        self.play_msg_at(msg, timestamp)
    }

    /// Enqueue a framed SysEx message to play at `timestamp`.
    pub fn play_sysex_at(&mut self, sysex: &[u8], timestamp: u32) -> bool {
        if !self.midi_queue.push_sysex(sysex, timestamp) {
            self.report(ReportEvent::MidiQueueOverflow);
            return false;
        }
        true
    }

    /// Enqueue a framed SysEx message to play as soon as possible.
    pub fn play_sysex(&mut self, sysex: &[u8]) -> bool {
        let timestamp = self.rendered_sample_count;
        self.play_sysex_at(sysex, timestamp)
    }

    /// Process a short message immediately, bypassing the queue. The caller
    /// must be synchronised with rendering.
    pub fn play_msg_now(&mut self, msg: u32) {
        let code = ((msg & 0xF0) >> 4) as u8;
        let chan = (msg & 0x0F) as usize;
        let note = ((msg >> 8) & 0x7F) as u8;
        let velocity = ((msg >> 16) & 0x7F) as u8;
        if code < 8 {
            log::debug!("invalid MIDI command 0x{:06x}", msg);
            return;
        }
        if code == 0xF {
            log::debug!("system realtime/common message 0x{:02x} ignored", msg & 0xFF);
            return;
        }
        let part = self.chantable[chan];
        if !(0..=8).contains(&part) {
            log::debug!("short message on unassigned channel {}", chan);
            return;
        }
        self.play_msg_on_part(part as usize, code, note, velocity);
    }

    /// Process an unpacked short message on a part immediately.
    pub fn play_msg_on_part(&mut self, part: usize, code: u8, note: u8, velocity: u8) {
        match code {
            0x8 => self.part_note_off(part, note),
            0x9 => {
                // Note-on with zero velocity acts as note-off.
                if velocity == 0 {
                    self.part_note_off(part, note);
                } else {
                    self.part_note_on(part, note, velocity);
                }
            }
            0xB => self.control_change(part, note, velocity),
            0xC => self.part_set_program(part, note),
            0xE => {
                let bend = (u16::from(velocity) << 7) | u16::from(note);
                let range = self.mem.patch_temp(part).patch.bender_range;
                self.parts[part].set_bend(bend, range);
            }
            _ => {
                self.report(ReportEvent::DebugMessage(format!(
                    "unsupported MIDI command 0x{:x}",
                    code
                )));
                return;
            }
        }
        self.report(ReportEvent::MidiMessagePlayed);
    }

    fn control_change(&mut self, part: usize, controller: u8, value: u8) {
        match controller {
            0x01 => self.parts[part].set_modulation(value),
            0x07 => {
                // Matches the volume mapping table in the control ROM.
                let level = value.min(127) * 100 / 127;
                self.mem.set_patch_temp_output_level(part, level);
            }
            0x0A => {
                let panpot = value.min(127) * 14 / 127;
                self.mem.set_patch_temp_panpot(part, panpot);
            }
            0x0B => self.parts[part].set_expression(value),
            0x40 => self.part_set_hold_pedal(part, value >= 64),
            0x79 => {
                // Reset all controllers, as a real LAPC-I responds.
                self.part_set_hold_pedal(part, false);
                self.parts[part].set_modulation(0);
                self.parts[part].set_expression(127);
                let range = self.mem.patch_temp(part).patch.bender_range;
                self.parts[part].set_bend(0x2000, range);
            }
            0x7B => self.part_all_notes_off(part),
            0x7C..=0x7F => {
                self.part_set_hold_pedal(part, false);
                self.part_all_notes_off(part);
            }
            _ => {
                log::debug!("unknown MIDI control 0x{:02x} value 0x{:02x}", controller, value);
            }
        }
    }

    // -- SysEx ------------------------------------------------------------

    pub fn calc_sysex_checksum(data: &[u8]) -> u8 {
        let sum: u32 = data.iter().map(|&b| u32::from(b)).sum();
        let checksum = (sum & 0x7F) as u8;
        if checksum != 0 {
            0x80 - checksum
        } else {
            0
        }
    }

    /// Process a complete framed SysEx message immediately.
    pub fn play_sysex_now(&mut self, sysex: &[u8]) {
        if sysex.len() < 2 || sysex[0] != 0xF0 {
            log::debug!("SysEx lacks start byte");
            return;
        }
        let Some(end) = sysex.iter().position(|&b| b == 0xF7) else {
            log::debug!("SysEx lacks end byte");
            return;
        };
        self.play_sysex_without_framing(&sysex[1..end]);
    }

    /// Process a SysEx message without its F0/F7 framing.
    pub fn play_sysex_without_framing(&mut self, sysex: &[u8]) {
        if sysex.len() < 4 {
            log::debug!("SysEx too short ({} bytes)", sysex.len());
            return;
        }
        if sysex[0] != SYSEX_MANUFACTURER_ROLAND {
            log::debug!("SysEx for another manufacturer 0x{:02x}", sysex[0]);
            return;
        }
        if sysex[2] == SYSEX_MDL_D50 {
            log::debug!("SysEx intended for model D-50");
            return;
        }
        if sysex[2] != SYSEX_MDL_MT32 {
            log::debug!("SysEx for another model 0x{:02x}", sysex[2]);
            return;
        }
        self.play_sysex_without_header(sysex[1], sysex[3], &sysex[4..]);
    }

    /// Process the addressed body of a SysEx message.
    pub fn play_sysex_without_header(&mut self, device: u8, command: u8, sysex: &[u8]) {
        if device > 0x10 {
            // Device 0x10 is the default unit id; smaller values address
            // single channels.
            log::debug!("SysEx for device 0x{:02x} ignored", device);
            return;
        }
        // The reset address is handled before any length or checksum check.
        if command == SYSEX_CMD_DT1 && sysex.first() == Some(&0x7F) {
            self.reset();
            return;
        }
        if sysex.len() < 4 {
            log::debug!("SysEx body too short ({} bytes)", sysex.len());
            return;
        }
        let expected = Self::calc_sysex_checksum(&sysex[..sysex.len() - 1]);
        let actual = sysex[sysex.len() - 1];
        if expected != actual {
            self.report(ReportEvent::ChecksumError { expected, actual });
            self.report(ReportEvent::LcdMessage("SysEx error!".to_string()));
            return;
        }
        let body = &sysex[..sysex.len() - 1];
        match command {
            SYSEX_CMD_DT1 => self.write_sysex(device, body),
            SYSEX_CMD_RQ1 => {
                log::debug!("RQ1 read of {} bytes ignored on the event path", body.len());
            }
            _ => {
                log::debug!("unsupported SysEx command 0x{:02x}", command);
            }
        }
        self.report(ReportEvent::MidiMessagePlayed);
    }

    /// Write `sysex` (three address bytes followed by data) into parameter
    /// memory, resolving channel-addressed messages first.
    pub fn write_sysex(&mut self, device: u8, sysex: &[u8]) {
        if sysex.len() < 3 {
            return;
        }
        let addr_display = (u32::from(sysex[0]) << 16) | (u32::from(sysex[1]) << 8) | u32::from(sysex[2]);
        let mut addr = memaddr(addr_display);
        let mut data = &sysex[3..];

        if device < 0x10 {
            let part = self.chantable[usize::from(device)];
            let part_offset = |entry_size: u32| -> u32 {
                if (0..8).contains(&part) {
                    part as u32 * entry_size
                } else {
                    0
                }
            };
            if addr < memaddr(0x01_0000) {
                addr += memaddr(0x03_0000) + part_offset(crate::params::PATCH_TEMP_SIZE as u32);
            } else if addr < memaddr(0x02_0000) {
                addr += memaddr(0x03_0110) - memaddr(0x01_0000);
            } else if addr < memaddr(0x03_0000) {
                addr = addr - memaddr(0x02_0000)
                    + memaddr(0x04_0000)
                    + part_offset(TIMBRE_PARAM_SIZE as u32);
            } else {
                log::debug!(
                    "invalid channel-addressed SysEx to 0x{:06x}",
                    addr_display
                );
                return;
            }
        }

        loop {
            let Some(region) = find_region(addr) else {
                self.report(ReportEvent::DebugMessage(format!(
                    "SysEx write to unrecognised address 0x{:06x}, len {}",
                    crate::params::display_addr(addr),
                    data.len()
                )));
                break;
            };
            let len = region.clamped_len(addr, data.len() as u32) as usize;
            self.write_memory_region(region, addr, &data[..len]);
            let next = region.next(addr, data.len() as u32);
            if next == 0 {
                break;
            }
            addr += next;
            data = &data[next as usize..];
        }
    }

    fn max_table_for(&self, region_type: RegionType) -> Option<Vec<u8>> {
        let map = self.control_rom.map;
        match region_type {
            RegionType::PatchTemp | RegionType::Patches => {
                Some(self.control_rom.table(map.patch_max_table, PATCH_PARAM_SIZE).to_vec())
            }
            RegionType::RhythmTemp => {
                Some(self.control_rom.table(map.rhythm_max_table, 4).to_vec())
            }
            RegionType::TimbreTemp | RegionType::Timbres => {
                Some(self.padded_timbre_max_table.clone())
            }
            RegionType::System => {
                Some(self.control_rom.table(map.system_max_table, SYSTEM_SIZE).to_vec())
            }
            RegionType::Display | RegionType::Reset => None,
        }
    }

    fn write_memory_region(&mut self, region: &'static Region, addr: u32, data: &[u8]) {
        match region.region_type {
            RegionType::Display => {
                let text: String = data
                    .iter()
                    .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { ' ' })
                    .collect();
                self.report(ReportEvent::LcdMessage(text));
                return;
            }
            RegionType::Reset => {
                self.reset();
                return;
            }
            _ => {}
        }

        let max_table = self.max_table_for(region.region_type);
        // Patch bank maxima repeat for every entry; the region write takes
        // the per-entry offset internally.
        self.mem
            .write_region(region, addr, data, max_table.as_deref(), false);

        let first = region.first_touched(addr) as usize;
        let last = region.last_touched(addr, data.len() as u32) as usize;
        match region.region_type {
            RegionType::PatchTemp => {
                let off = region.first_touched_offset(addr);
                for part_num in first..=last.min(8) {
                    if part_num != RHYTHM_PART && !(part_num == first && off > 2) {
                        // The timbre follows the patch selection unless the
                        // write only touched later bytes.
                        let patch = self.mem.patch_temp(part_num).patch;
                        let timbre = self.mem.timbres[patch.abs_timbre_num()];
                        self.mem.set_timbre_temp(
                            part_num,
                            timbre[..TIMBRE_PARAM_SIZE].try_into().unwrap(),
                        );
                    }
                    self.refresh_part(part_num);
                }
            }
            RegionType::RhythmTemp => {
                self.refresh_part(RHYTHM_PART);
            }
            RegionType::TimbreTemp => {
                for part_num in first..=last.min(7) {
                    self.refresh_part(part_num);
                }
            }
            RegionType::Patches => {}
            RegionType::Timbres => {
                for timbre_num in first..=last {
                    self.refresh_timbre(128 + timbre_num);
                }
            }
            RegionType::System => {
                self.report(ReportEvent::DeviceReconfig);
                self.refresh_system(false);
            }
            RegionType::Display | RegionType::Reset => {}
        }
    }

    /// Read parameter memory the way an RQ1 request would.
    pub fn read_memory(&self, addr_display: u32, data: &mut [u8]) {
        let addr = memaddr(addr_display);
        if let Some(region) = find_region(addr) {
            self.mem.read_region(region, addr, data);
        }
    }

    // -- System refresh, reset --------------------------------------------

    fn refresh_system(&mut self, force: bool) {
        let system = self.mem.system();

        self.chantable = [-1; 16];
        for part_num in 0..9 {
            let assign = system.chan_assign[part_num];
            if assign == 16 {
                self.part_all_sound_off(part_num);
            } else if assign < 16 {
                self.chantable[usize::from(assign)] = part_num as i8;
            }
        }

        let reserve_sum = self.partial_manager.set_reserve(system.reserve_settings);
        if reserve_sum != self.partial_count as u32 {
            log::warn!(
                "partial reserve table accounts for {} of {} partials",
                reserve_sum,
                self.partial_count
            );
        }

        self.refresh_reverb(system, force);
    }

    fn refresh_reverb(&mut self, system: SystemParams, force: bool) {
        if self.reverb_overridden && !force {
            return;
        }
        let mode_changed = match &self.reverb {
            ReverbModel::BReverb(model) => model.mode() != system.reverb_mode,
            _ => false,
        };
        if force || mode_changed || self.reverb.kind() != self.reverb_model_kind {
            // A mode change replaces the model and clears its buffers.
            self.reverb = ReverbModel::new(
                self.reverb_model_kind,
                system.reverb_mode,
                self.mt32_reverb_compatible,
            );
            self.reverb
                .set_parameters(system.reverb_time, system.reverb_level);
            self.report(ReportEvent::NewReverbMode(system.reverb_mode));
            self.report(ReportEvent::NewReverbTime(system.reverb_time));
            self.report(ReportEvent::NewReverbLevel(system.reverb_level));
        } else {
            self.reverb
                .set_parameters(system.reverb_time, system.reverb_level);
        }
    }

    /// Full device reset, as triggered over SysEx.
    pub fn reset(&mut self) {
        self.report(ReportEvent::DeviceReset);
        for partial in self.partials.iter_mut() {
            partial.deactivate_slot();
        }
        self.partial_manager = PartialManager::new(self.partial_count);
        for poly in self.polys.iter_mut() {
            *poly = Poly::default();
        }
        self.aborting_poly = None;
        self.pending_note_on = None;
        self.mem = self.mem_default.clone();
        for part_num in 0..9 {
            self.parts[part_num].active_polys_clear();
            self.refresh_part(part_num);
        }
        for part_num in 0..8 {
            let name = self.parts[part_num].current_instr().to_string();
            self.report(ReportEvent::ProgramChanged {
                part: part_num as u8,
                patch_name: name,
            });
        }
        self.refresh_system(true);
    }

    // -- Reverb and analog configuration ----------------------------------

    pub fn set_reverb_enabled(&mut self, enabled: bool) {
        self.reverb_enabled = enabled;
    }

    pub fn is_reverb_enabled(&self) -> bool {
        self.reverb_enabled
    }

    pub fn set_reverb_overridden(&mut self, overridden: bool) {
        self.reverb_overridden = overridden;
    }

    pub fn is_reverb_overridden(&self) -> bool {
        self.reverb_overridden
    }

    /// Force the reverb circuit generation; true selects the old MT-32
    /// circuit.
    pub fn set_reverb_compatibility_mode(&mut self, mt32_compatible: bool) {
        self.mt32_reverb_compatible = mt32_compatible;
        let system = self.mem.system();
        self.refresh_reverb(system, true);
    }

    pub fn is_mt32_reverb_compatibility_mode(&self) -> bool {
        self.mt32_reverb_compatible
    }

    pub fn is_default_reverb_mt32_compatible(&self) -> bool {
        self.control_rom.features().old_mt32_reverb_compatible
    }

    pub fn set_dac_input_mode(&mut self, mode: DacInputMode) {
        self.dac_input_mode = mode;
    }

    pub fn dac_input_mode(&self) -> DacInputMode {
        self.dac_input_mode
    }

    pub fn set_output_gain(&mut self, gain: f32) {
        self.analog.set_synth_output_gain(gain);
    }

    pub fn set_reverb_output_gain(&mut self, gain: f32) {
        self.analog.set_reverb_output_gain(gain);
    }

    /// Sample rate of the stream `render` produces.
    pub fn stereo_output_sample_rate(&self) -> u32 {
        self.analog.output_sample_rate()
    }

    pub fn is_reverb_active(&self) -> bool {
        self.reverb_enabled && self.reverb.is_active()
    }

    // -- Introspection ----------------------------------------------------

    pub fn partial_count(&self) -> usize {
        self.partial_count
    }

    pub fn free_partial_count(&self) -> usize {
        self.partial_manager.free_partial_count()
    }

    pub fn has_active_partials(&self) -> bool {
        self.partials.iter().any(|partial| partial.is_active())
    }

    pub fn is_active(&self) -> bool {
        self.has_active_partials() || self.is_reverb_active()
    }

    /// Per-part flag: true when at least one non-releasing partial plays.
    pub fn part_states(&self) -> [bool; 9] {
        core::array::from_fn(|part_num| {
            self.parts[part_num].active_polys().iter().any(|&poly| {
                self.polys[poly].state() == PolyState::Playing
                    || self.polys[poly].state() == PolyState::Held
            })
        })
    }

    pub fn partial_states(&self) -> Vec<PartialState> {
        self.partials.iter().map(|partial| partial.state()).collect()
    }

    /// Keys and velocities of the notes playing on a part.
    pub fn playing_notes(&self, part_num: usize) -> Vec<(u8, u8)> {
        self.parts[part_num]
            .active_polys()
            .iter()
            .map(|&poly| (self.polys[poly].key(), self.polys[poly].velocity()))
            .collect()
    }

    pub fn patch_name(&self, part_num: usize) -> &str {
        self.parts[part_num].current_instr()
    }

    /// Number of active partials per part, rhythm last.
    pub fn per_part_partial_usage(&self) -> [usize; 9] {
        core::array::from_fn(|part_num| self.part_active_partial_count(part_num))
    }

    // -- Rendering --------------------------------------------------------

    /// Render interleaved stereo at the analog stage's output rate.
    pub fn render<S: DacSample>(&mut self, stream: &mut [S]) {
        let mut rendered = 0;
        let out_frames_total = stream.len() / 2;
        while rendered < out_frames_total {
            let out_chunk = (out_frames_total - rendered).min(MAX_SAMPLES_PER_RUN / 3);
            let in_frames = self.analog.dac_streams_length(out_chunk);

            let mut na_l = vec![S::default(); in_frames];
            let mut na_r = vec![S::default(); in_frames];
            let mut dry_l = vec![S::default(); in_frames];
            let mut dry_r = vec![S::default(); in_frames];
            let mut wet_l = vec![S::default(); in_frames];
            let mut wet_r = vec![S::default(); in_frames];
            self.render_streams(
                &mut na_l, &mut na_r, &mut dry_l, &mut dry_r, &mut wet_l, &mut wet_r,
            );
            self.analog.process(
                &mut stream[2 * rendered..2 * (rendered + out_chunk)],
                &na_l,
                &na_r,
                &dry_l,
                &dry_r,
                &wet_l,
                &wet_r,
            );
            rendered += out_chunk;
        }
    }

    /// Render the six DAC streams at the native 32 kHz rate.
    #[allow(clippy::too_many_arguments)]
    pub fn render_streams<S: OutputSample>(
        &mut self,
        non_reverb_left: &mut [S],
        non_reverb_right: &mut [S],
        reverb_dry_left: &mut [S],
        reverb_dry_right: &mut [S],
        reverb_wet_left: &mut [S],
        reverb_wet_right: &mut [S],
    ) {
        let total = non_reverb_left.len();
        let mut done = 0;
        while done < total {
            let mut chunk = (total - done).min(MAX_SAMPLES_PER_RUN);
            self.process_due_midi_events();
            if self.aborting_poly.is_some() {
                chunk = chunk.min(ABORT_CHUNK);
            } else if let Some(next) = self.midi_queue.peek_timestamp() {
                let now = self.rendered_sample_count;
                if next > now {
                    chunk = chunk.min((next - now) as usize);
                }
            }
            let range = done..done + chunk;
            self.render_chunk(
                &mut non_reverb_left[range.clone()],
                &mut non_reverb_right[range.clone()],
                &mut reverb_dry_left[range.clone()],
                &mut reverb_dry_right[range.clone()],
                &mut reverb_wet_left[range.clone()],
                &mut reverb_wet_right[range],
            );
            done += chunk;
            self.rendered_sample_count = self.rendered_sample_count.wrapping_add(chunk as u32);
        }
        self.process_due_midi_events();
    }

    /// Pull events whose timestamp has been reached. While a poly abort is
    /// in flight the queue is held back, like the MCU busy-wait does.
    fn process_due_midi_events(&mut self) {
        while self.aborting_poly.is_none() {
            let now = self.rendered_sample_count;
            match self.midi_queue.peek_timestamp() {
                Some(timestamp) if timestamp <= now => {
                    let event = self.midi_queue.pop().expect("peeked event vanished");
                    self.dispatch_midi_event(event);
                }
                _ => break,
            }
        }
    }

    fn dispatch_midi_event(&mut self, event: MidiEvent) {
        match event.body {
            MidiEventBody::Short(msg) => self.play_msg_now(msg),
            MidiEventBody::Sysex(data) => self.play_sysex_now(&data),
            MidiEventBody::Empty => {}
        }
    }

    fn render_chunk<S: OutputSample>(
        &mut self,
        non_reverb_left: &mut [S],
        non_reverb_right: &mut [S],
        reverb_dry_left: &mut [S],
        reverb_dry_right: &mut [S],
        reverb_wet_left: &mut [S],
        reverb_wet_right: &mut [S],
    ) {
        let len = non_reverb_left.len();

        for partial_num in 0..self.partial_count {
            if !self.partials[partial_num].is_active() {
                continue;
            }
            let part_num = match self.partials[partial_num].owner_part() {
                Some(part) => part,
                None => continue,
            };
            let ctx = PartialRenderCtx::build(
                &self.tables,
                &self.pcm_rom,
                &self.mem,
                &self.parts[part_num],
                part_num,
            );
            let pair_index = self.partials[partial_num]
                .pair()
                .filter(|_| self.partials[partial_num].has_ring_modulating_slave());
            let should_reverb = self.reverb_enabled && self.partials[partial_num].should_reverb();
            let (left, right) = if should_reverb {
                (&mut reverb_dry_left[..], &mut reverb_dry_right[..])
            } else {
                (&mut non_reverb_left[..], &mut non_reverb_right[..])
            };
            let (partial, slave) =
                crate::part::get_two_mut(&mut self.partials, partial_num, pair_index.unwrap_or(partial_num));
            partial.produce_output(slave, &ctx, Some(&ctx), left, right);
        }

        for partial in self.partials.iter_mut() {
            partial.clear_already_outputed();
        }
        self.run_deactivation_cascade();

        // The reverb taps the raw dry mix; the DAC gain staging applies to
        // the LA32 streams afterwards.
        let mut in_l = vec![0.0f32; len];
        let mut in_r = vec![0.0f32; len];
        let mut out_l = vec![0.0f32; len];
        let mut out_r = vec![0.0f32; len];
        for i in 0..len {
            in_l[i] = reverb_dry_left[i].to_float();
            in_r[i] = reverb_dry_right[i].to_float();
        }
        self.reverb.process(&in_l, &in_r, &mut out_l, &mut out_r);
        for i in 0..len {
            reverb_wet_left[i] = S::from_float(out_l[i]);
            reverb_wet_right[i] = S::from_float(out_r[i]);
        }

        if self.dac_input_mode != DacInputMode::Pure {
            for sample in non_reverb_left
                .iter_mut()
                .chain(non_reverb_right.iter_mut())
                .chain(reverb_dry_left.iter_mut())
                .chain(reverb_dry_right.iter_mut())
            {
                *sample = sample.dac_shape(self.dac_input_mode);
            }
        }
    }

    /// Retire partials that died during the last chunk, freeing their polys
    /// and releasing any deferred note-on.
    fn run_deactivation_cascade(&mut self) {
        for partial_num in 0..self.partial_count {
            if !self.partials[partial_num].pending_deactivation() {
                continue;
            }
            let poly_index = self.partials[partial_num].poly();
            let pair = self.partials[partial_num].pair();
            self.partials[partial_num].deactivate_slot();
            if let Some(pair) = pair {
                self.partials[pair].clear_pair();
            }
            self.partial_manager.partial_deactivated(partial_num);
            if let Some(poly_index) = poly_index {
                if self.polys[poly_index].partial_deactivated(partial_num) {
                    self.finish_poly(poly_index);
                }
            }
        }

        if self.aborting_poly.is_none() {
            if let Some(pending) = self.pending_note_on.take() {
                self.start_poly(
                    pending.part_num,
                    &pending.cache,
                    pending.rhythm_temp,
                    pending.key,
                    pending.velocity,
                );
            }
        }
    }

    fn finish_poly(&mut self, poly_index: usize) {
        if let Some(part_num) = self.polys[poly_index].part() {
            self.parts[part_num].remove_active_poly(poly_index);
            self.report(ReportEvent::PolyStateChanged { part: part_num as u8 });
        }
        self.polys[poly_index].set_part(None);
        self.partial_manager.poly_freed(poly_index);
        if self.aborting_poly == Some(poly_index) {
            self.aborting_poly = None;
        }
    }
}
