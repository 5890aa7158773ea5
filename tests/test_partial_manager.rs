//! Allocation and stealing behavior of the partial manager under a small
//! partial pool.

mod common;

use common::*;
use lasynth::synth::{ReportEvent, SynthOptions};
use lasynth::{AnalogOutputMode, RendererType};

fn small_pool_options() -> SynthOptions {
    SynthOptions {
        partial_count: 4,
        analog_output_mode: AnalogOutputMode::DigitalOnly,
        renderer_type: RendererType::Bit16s,
        ..SynthOptions::default()
    }
}

fn machine_ids() -> [&'static str; 2] {
    // Old generation and new generation note cancellation.
    ["mt32_1_07", "cm32l_1_02"]
}

#[test]
fn partials_are_allocated_for_notes_and_freed_after_release() {
    for machine_id in machine_ids() {
        let mut synth = open_synth(machine_id, small_pool_options());
        send_sine_wave_sysex(&mut synth, 1);

        send_note_on(&mut synth, 1, 60, 80);
        assert_eq!(synth.free_partial_count(), 3, "{}", machine_id);

        send_all_notes_off(&mut synth, 1);
        assert_eq!(synth.free_partial_count(), 3, "{}", machine_id);

        // The release of this patch is instant; a few frames suffice.
        skip_rendered_frames(&mut synth, 32);
        assert_eq!(synth.free_partial_count(), 4, "{}", machine_id);
        assert!(!synth.is_active());
    }
}

#[test]
fn exhausting_the_pool_silences_the_oldest_playing_poly() {
    for machine_id in machine_ids() {
        let mut synth = open_synth(machine_id, small_pool_options());
        send_sine_wave_sysex(&mut synth, 1);
        for key in [36, 37, 38, 39] {
            send_note_on(&mut synth, 1, key, 100);
        }
        assert_eq!(synth.free_partial_count(), 0);

        let events = EventLog::attach(&mut synth);
        send_note_on(&mut synth, 1, 40, 100);
        assert_eq!(
            events.count_matching(|e| matches!(e, ReportEvent::PlayingPolySilenced { part: 0 })),
            1,
            "{}",
            machine_id
        );

        // Once the aborted partial dies, the new note takes its place.
        skip_rendered_frames(&mut synth, 256);
        let keys: Vec<u8> = synth.playing_notes(0).iter().map(|&(k, _)| k).collect();
        assert!(keys.contains(&40), "{}: {:?}", machine_id, keys);
    }
}

#[test]
fn replaying_a_sounding_key_does_not_silence_other_polys() {
    for machine_id in machine_ids() {
        let mut synth = open_synth(machine_id, small_pool_options());
        send_sine_wave_sysex(&mut synth, 1);
        for key in [36, 37, 38, 39] {
            send_note_on(&mut synth, 1, key, 100);
        }

        let events = EventLog::attach(&mut synth);
        // Single assign: the same key replaces its own poly, which has
        // already entered its release by the time partials are reclaimed.
        send_note_on(&mut synth, 1, 38, 100);
        assert_eq!(
            events.count_matching(|e| matches!(e, ReportEvent::PlayingPolySilenced { .. })),
            0,
            "{}",
            machine_id
        );
    }
}

#[test]
fn lower_priority_parts_cannot_steal_and_get_ignored() {
    for machine_id in machine_ids() {
        let mut synth = open_synth(machine_id, small_pool_options());
        send_sine_wave_sysex(&mut synth, 1);
        for key in [36, 37, 38, 39] {
            send_note_on(&mut synth, 1, key, 100);
        }

        send_sine_wave_sysex(&mut synth, 2);
        let events = EventLog::attach(&mut synth);
        // Part 2 has lower priority than part 1 where all notes play, and
        // no reserve of its own.
        send_note_on(&mut synth, 2, 36, 100);
        assert_eq!(
            events.count_matching(|e| matches!(
                e,
                ReportEvent::NoteOnIgnored {
                    partials_needed: 1,
                    partials_free: 0
                }
            )),
            1,
            "{}",
            machine_id
        );
        skip_rendered_frames(&mut synth, 64);
        assert!(synth.playing_notes(1).is_empty(), "{}", machine_id);
    }
}

#[test]
fn higher_priority_parts_steal_from_lower_priority_parts() {
    for machine_id in machine_ids() {
        let mut synth = open_synth(machine_id, small_pool_options());
        send_sine_wave_sysex(&mut synth, 2);
        for key in [36, 37, 38, 39] {
            send_note_on(&mut synth, 2, key, 100);
        }
        assert_eq!(synth.free_partial_count(), 0);

        send_sine_wave_sysex(&mut synth, 1);
        let events = EventLog::attach(&mut synth);
        send_note_on(&mut synth, 1, 60, 100);
        assert_eq!(
            events.count_matching(|e| matches!(e, ReportEvent::PlayingPolySilenced { part: 1 })),
            1,
            "{}",
            machine_id
        );

        skip_rendered_frames(&mut synth, 256);
        let keys: Vec<u8> = synth.playing_notes(0).iter().map(|&(k, _)| k).collect();
        assert_eq!(keys, vec![60], "{}", machine_id);
        assert_eq!(synth.playing_notes(1).len(), 3, "{}", machine_id);
    }
}

#[test]
fn single_assign_mode_refuses_to_steal_for_new_notes() {
    for machine_id in machine_ids() {
        let mut synth = open_synth(machine_id, small_pool_options());
        send_sine_wave_sysex(&mut synth, 1);
        send_assign_mode_sysex(&mut synth, 1, 1);
        for key in [36, 37, 38, 39] {
            send_note_on(&mut synth, 1, key, 100);
        }

        let events = EventLog::attach(&mut synth);
        send_note_on(&mut synth, 1, 40, 100);
        assert_eq!(
            events.count_matching(|e| matches!(e, ReportEvent::NoteOnIgnored { .. })),
            1,
            "{}",
            machine_id
        );
        assert_eq!(
            events.count_matching(|e| matches!(e, ReportEvent::PlayingPolySilenced { .. })),
            0
        );
        // The original four notes keep sounding.
        skip_rendered_frames(&mut synth, 64);
        assert_eq!(synth.playing_notes(0).len(), 4, "{}", machine_id);
    }
}

#[test]
fn releasing_notes_are_reclaimed_before_sounding_ones() {
    for machine_id in machine_ids() {
        let mut synth = open_synth(machine_id, small_pool_options());
        send_sine_wave_sysex(&mut synth, 1);
        send_sine_wave_sysex(&mut synth, 2);
        for key in [36, 37, 38] {
            send_note_on(&mut synth, 1, key, 100);
        }
        send_note_on(&mut synth, 2, 48, 100);
        assert_eq!(synth.free_partial_count(), 0);
        // The poly on part 2 goes into release but holds its partial.
        send_all_notes_off(&mut synth, 2);

        let events = EventLog::attach(&mut synth);
        send_note_on(&mut synth, 1, 39, 100);
        // The releasing poly is the victim; nothing playing is silenced.
        assert_eq!(
            events.count_matching(|e| matches!(e, ReportEvent::PlayingPolySilenced { .. })),
            0,
            "{}",
            machine_id
        );
        skip_rendered_frames(&mut synth, 256);
        assert_eq!(synth.playing_notes(0).len(), 4, "{}", machine_id);
    }
}

#[test]
fn notes_within_a_parts_reserve_are_never_ignored() {
    for machine_id in machine_ids() {
        let mut synth = open_synth(machine_id, small_pool_options());
        send_sine_wave_sysex(&mut synth, 1);
        // The whole pool is reserved for part 1.
        synth.write_sysex(16, &[0x10, 0x00, 0x04, 4, 0, 0, 0, 0, 0, 0, 0, 0]);
        let events = EventLog::attach(&mut synth);

        for round in 0..16 {
            for key in [36, 37, 38, 39] {
                send_note_on(&mut synth, 1, key, 100);
            }
            send_all_notes_off(&mut synth, 1);
            skip_rendered_frames(&mut synth, 64 + round);
        }
        assert_eq!(
            events.count_matching(|e| matches!(e, ReportEvent::NoteOnIgnored { .. })),
            0,
            "{}",
            machine_id
        );
    }
}

#[test]
fn the_partial_accounting_invariant_holds_under_random_traffic() {
    let mut rnd = funutd::Rnd::from_u64(0x5EED);
    for machine_id in machine_ids() {
        let mut synth = open_synth(
            machine_id,
            SynthOptions {
                analog_output_mode: AnalogOutputMode::DigitalOnly,
                renderer_type: RendererType::Bit16s,
                ..SynthOptions::default()
            },
        );
        for channel in 1..=8 {
            send_sine_wave_sysex(&mut synth, channel);
        }
        for _ in 0..200 {
            let channel = 1 + (rnd.u64() % 8) as u8;
            let key = 36 + (rnd.u64() % 48) as u8;
            if rnd.u64() % 3 == 0 {
                send_all_notes_off(&mut synth, channel);
            } else {
                send_note_on(&mut synth, channel, key, 1 + (rnd.u64() % 127) as u8);
            }
            skip_rendered_frames(&mut synth, (rnd.u64() % 64) as usize);

            let active = synth
                .partial_states()
                .iter()
                .filter(|&&state| state != lasynth::PartialState::Inactive)
                .count();
            assert_eq!(
                active + synth.free_partial_count(),
                synth.partial_count(),
                "{}",
                machine_id
            );
        }
    }
}
