//! Shared helpers: synthesized ROM sets and MIDI shorthand.
//!
//! Test ROM images are zero-filled dumps registered under the identities of
//! real ROMs, with the per-offset maximum tables made permissive so SysEx
//! writes are accepted. The ranges cover the table addresses of all
//! supported ROM versions.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use lasynth::rom::find_machine_configuration;
use lasynth::synth::{ReportEvent, Synth, SynthOptions};
use lasynth::{AnalogOutputMode, RendererType, RomFile, RomImage, RomInfo};

pub fn fake_rom_set(machine_id: &str) -> (RomImage, RomImage) {
    let config = find_machine_configuration(machine_id).expect("unknown machine");
    let control_info = RomInfo::find_by_short_name(config.control_rom).unwrap();
    let pcm_info = RomInfo::find_by_short_name(config.pcm_rom).unwrap();

    let mut control = vec![0u8; control_info.file_size];
    for byte in control[0x4880..0x4980].iter_mut() {
        *byte = 0x7F;
    }
    for byte in control[0x51F0..0x52F0].iter_mut() {
        *byte = 0x7F;
    }
    let control = RomImage::make(RomFile::with_digest(control, control_info.sha1)).unwrap();

    let pcm = vec![0u8; pcm_info.file_size];
    let pcm = RomImage::make(RomFile::with_digest(pcm, pcm_info.sha1)).unwrap();
    (control, pcm)
}

pub fn open_synth(machine_id: &str, options: SynthOptions) -> Synth {
    let (control, pcm) = fake_rom_set(machine_id);
    Synth::open(&control, &pcm, options).expect("synth should open")
}

pub fn digital_options(renderer_type: RendererType) -> SynthOptions {
    SynthOptions {
        analog_output_mode: AnalogOutputMode::DigitalOnly,
        renderer_type,
        ..SynthOptions::default()
    }
}

/// Collects reported events for later assertions.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<ReportEvent>>>,
}

impl EventLog {
    pub fn attach(synth: &mut Synth) -> EventLog {
        let log = EventLog::default();
        let events = log.events.clone();
        synth.set_report_handler(move |event| events.borrow_mut().push(event.clone()));
        log
    }

    pub fn take(&self) -> Vec<ReportEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn contains(&self, event: &ReportEvent) -> bool {
        self.events.borrow().iter().any(|e| e == event)
    }

    pub fn count_matching(&self, matcher: impl Fn(&ReportEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| matcher(e)).count()
    }
}

pub fn send_note_on(synth: &mut Synth, channel: u8, key: u8, velocity: u8) {
    synth.play_msg_now(0x90 | u32::from(channel) | (u32::from(key) << 8) | (u32::from(velocity) << 16));
}

pub fn send_all_notes_off(synth: &mut Synth, channel: u8) {
    synth.play_msg_now(0x7BB0 | u32::from(channel));
}

/// The "test sine" setup: a single square partial with the filter exactly
/// at its midpoint and the tuning arranged so one period spans 256 samples.
pub fn send_sine_wave_sysex(synth: &mut Synth, channel: u8) {
    // Master tune to dead center.
    synth.write_sysex(16, &[0x10, 0x00, 0x00, 64]);
    let patch_sysex = [
        0x00, 0x00, 0x00, // patch temp
        0x00, 0x00, 24, 11, 12, 0x00, 0x00, 0x00, // patch: fine tune 11
        100, 0x00, // output level, panpot
    ];
    synth.write_sysex(channel, &patch_sysex);
    let timbre_sysex = [
        0x02, 0x00, 0x00, // timbre temp
        b'T', b'e', b's', b't', b'-', b's', b'i', b'n', b'e', b'.', // name
        0x00, 0x00, 0x01, 0x00, // structures, partial 1 only, sustaining
        24, 10, 3, 0, 0, 0, 0, 7, // wg: coarse 24, fine 10, no keyfollow
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // pitch env
        0, 0, 0, // pitch lfo
        50, 0, 11, 0, 0, 0, 0, 0, 0, // tvf: cutoff 50 lands on the midpoint
        0, 0, 0, 0, 0, // tvf env time
        0, 0, 0, 0, // tvf env level
        100, 50, 0, 0, 0, 0, 0, 0, // tva: full level, neutral velocity
        0, 0, 0, 0, 0, // tva env time
        100, 100, 100, 100, // tva env level
    ];
    synth.write_sysex(channel, &timbre_sysex);
}

pub fn send_assign_mode_sysex(synth: &mut Synth, channel: u8, assign_mode: u8) {
    synth.write_sysex(channel, &[0x00, 0x00, 0x05, assign_mode]);
}

pub fn send_system_reset_sysex(synth: &mut Synth) {
    synth.play_sysex_without_header(0x10, 0x12, &[0x7F]);
}

pub fn skip_rendered_frames(synth: &mut Synth, mut frames: usize) {
    let mut buffer = [0i16; 2 * 256];
    while frames > 0 {
        let chunk = frames.min(256);
        synth.render(&mut buffer[..2 * chunk]);
        frames -= chunk;
    }
}
