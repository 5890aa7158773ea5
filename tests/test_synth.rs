//! End-to-end synth tests against synthesized ROM sets.

mod common;

use common::*;
use lasynth::synth::ReportEvent;
use lasynth::{RendererType, SAMPLE_RATE};

#[test]
fn opens_with_recognized_rom_images() {
    let synth = open_synth("mt32_1_07", digital_options(RendererType::Bit16s));
    assert!(!synth.is_active());
    assert_eq!(synth.partial_count(), 32);
    assert_eq!(synth.stereo_output_sample_rate(), SAMPLE_RATE);
}

#[test]
fn open_rejects_a_pcm_image_in_place_of_a_control_image() {
    let (control, pcm) = fake_rom_set("cm32l_1_02");
    assert!(lasynth::Synth::open(&pcm, &pcm, Default::default()).is_err());
    assert!(lasynth::Synth::open(&control, &control, Default::default()).is_err());
}

#[test]
fn renders_silence_when_inactive() {
    let mut synth = open_synth("cm32l_1_02", digital_options(RendererType::Bit16s));
    let mut buffer = [123i16; 2 * 256];
    synth.render(&mut buffer);
    assert!(buffer.iter().all(|&s| s == 0));

    let mut synth = open_synth("cm32l_1_02", digital_options(RendererType::Float));
    let mut buffer = [1.0f32; 2 * 256];
    synth.render(&mut buffer);
    assert!(buffer.iter().all(|&s| s == 0.0));
}

#[test]
fn float_renderer_produces_the_test_sine() {
    let mut synth = open_synth("cm32l_1_02", digital_options(RendererType::Float));
    send_sine_wave_sysex(&mut synth, 1);
    send_note_on(&mut synth, 1, 60, 127);
    assert!(synth.is_active());

    const FRAMES: usize = 512;
    let mut buffer = [0.0f32; 2 * FRAMES];
    synth.render(&mut buffer);

    send_all_notes_off(&mut synth, 1);
    let mut tail = [0.0f32; 2 * FRAMES];
    synth.render(&mut tail);

    // The patch pans hard to one side: the left channel is silent.
    for frame in 0..FRAMES {
        assert_eq!(buffer[2 * frame], 0.0, "left frame {}", frame);
    }

    // The right channel carries a 125 Hz sine at the amplitude the DAC
    // staging yields for a full-level partial: 0.25 * 2 * 2^(-264/4096).
    for frame in 0..FRAMES {
        let expected = 0.478154 * (core::f32::consts::PI * frame as f32 / 128.0).sin();
        let actual = buffer[2 * frame + 1];
        assert!(
            (actual - expected).abs() < 1.0e-5,
            "right frame {}: {} vs {}",
            frame,
            actual,
            expected
        );
    }

    // After all notes off the amplitude ramp slams shut.
    for frame in 0..FRAMES {
        assert_eq!(tail[2 * frame], 0.0);
        assert!(tail[2 * frame + 1].abs() <= 1.5e-6, "tail frame {}", frame);
    }
}

#[test]
fn integer_renderer_produces_a_sine_like_wave() {
    let mut synth = open_synth("cm32l_1_02", digital_options(RendererType::Bit16s));
    send_sine_wave_sysex(&mut synth, 1);
    send_note_on(&mut synth, 1, 60, 127);

    const FRAMES: usize = 512;
    let mut buffer = [0i16; 2 * FRAMES];
    synth.render(&mut buffer);

    let right = |frame: usize| i32::from(buffer[2 * frame + 1]);

    // Left silent; right starts near zero and peaks a quarter period in.
    assert!(buffer.iter().step_by(2).all(|&s| s == 0));
    assert!(right(0).abs() < 64);
    for frame in 1..=64 {
        assert!(right(frame) >= right(frame - 1), "rise at {}", frame);
    }
    for frame in 65..=128 {
        assert!(right(frame) <= right(frame - 1), "fall at {}", frame);
    }
    let peak = right(64);
    let expected_peak = (0.478154 * 32768.0) as i32;
    assert!((peak - expected_peak).abs() < 160, "peak {}", peak);

    // The second half period mirrors the first; the next period repeats it.
    for frame in 0..128 {
        assert!((right(frame) + right(frame + 128)).abs() <= 8, "mirror at {}", frame);
    }
    for frame in 0..256 {
        assert!((right(frame) - right(frame + 256)).abs() <= 8, "period at {}", frame);
    }
}

#[test]
fn master_volume_sysex_reconfigures_the_device() {
    let mut synth = open_synth("mt32_1_07", digital_options(RendererType::Bit16s));
    let events = EventLog::attach(&mut synth);

    let mut volume = [0u8; 1];
    synth.read_memory(0x10_0016, &mut volume);
    assert_eq!(volume[0], 100);

    synth.write_sysex(16, &[0x10, 0x00, 0x16, 23]);
    synth.read_memory(0x10_0016, &mut volume);
    assert_eq!(volume[0], 23);
    assert!(events.contains(&ReportEvent::DeviceReconfig));
}

#[test]
fn sysex_round_trips_through_writable_regions() {
    let mut synth = open_synth("cm32l_1_02", digital_options(RendererType::Bit16s));

    // Patch bank entry 3, whole entry.
    synth.write_sysex(16, &[0x05, 0x00, 0x18, 1, 5, 30, 60, 12, 1, 1, 0]);
    let mut bytes = [0u8; 8];
    synth.read_memory(0x05_0018, &mut bytes);
    assert_eq!(bytes, [1, 5, 30, 60, 12, 1, 1, 0]);

    // A write crossing two patch entries lands in both.
    synth.write_sysex(16, &[0x05, 0x00, 0x26, 9, 9, 9, 9]);
    let mut bytes = [0u8; 4];
    synth.read_memory(0x05_0026, &mut bytes);
    assert_eq!(bytes, [9, 9, 9, 9]);
}

#[test]
fn sysex_values_clamp_to_the_maximum_tables() {
    let mut synth = open_synth("cm32l_1_02", digital_options(RendererType::Bit16s));
    // The permissive fake tables cap every byte at 0x7F.
    synth.write_sysex(16, &[0x10, 0x00, 0x16, 0x7F]);
    let mut volume = [0u8; 1];
    synth.read_memory(0x10_0016, &mut volume);
    assert_eq!(volume[0], 0x7F);
}

#[test]
fn checksum_error_leaves_memory_unchanged_and_shows_on_the_display() {
    let mut synth = open_synth("mt32_1_07", digital_options(RendererType::Bit16s));
    let events = EventLog::attach(&mut synth);

    let body = [0x10u8, 0x00, 0x16, 23];
    let checksum = lasynth::Synth::calc_sysex_checksum(&body);
    let mut message = vec![0xF0, 0x41, 0x10, 0x16, 0x12];
    message.extend_from_slice(&body);
    message.push(checksum.wrapping_add(1) & 0x7F);
    message.push(0xF7);
    synth.play_sysex_now(&message);

    let mut volume = [0u8; 1];
    synth.read_memory(0x10_0016, &mut volume);
    assert_eq!(volume[0], 100);
    assert_eq!(
        events.count_matching(|e| matches!(e, ReportEvent::ChecksumError { .. })),
        1
    );
    assert!(events.contains(&ReportEvent::LcdMessage("SysEx error!".to_string())));
}

#[test]
fn well_formed_framed_sysex_is_accepted() {
    let mut synth = open_synth("mt32_1_07", digital_options(RendererType::Bit16s));
    let body = [0x10u8, 0x00, 0x16, 23];
    let mut message = vec![0xF0, 0x41, 0x10, 0x16, 0x12];
    message.extend_from_slice(&body);
    message.push(lasynth::Synth::calc_sysex_checksum(&body));
    message.push(0xF7);
    synth.play_sysex_now(&message);

    let mut volume = [0u8; 1];
    synth.read_memory(0x10_0016, &mut volume);
    assert_eq!(volume[0], 23);
}

#[test]
fn display_writes_raise_lcd_events() {
    let mut synth = open_synth("mt32_1_07", digital_options(RendererType::Bit16s));
    let events = EventLog::attach(&mut synth);
    let mut sysex = vec![0x20u8, 0x00, 0x00];
    sysex.extend_from_slice(b"Hello!");
    synth.write_sysex(16, &sysex);
    assert!(events.contains(&ReportEvent::LcdMessage("Hello!".to_string())));
}

#[test]
fn device_reset_restores_the_default_state() {
    let mut synth = open_synth("mt32_1_07", digital_options(RendererType::Bit16s));
    synth.write_sysex(16, &[0x10, 0x00, 0x16, 23]);
    let events = EventLog::attach(&mut synth);

    send_system_reset_sysex(&mut synth);

    let mut volume = [0u8; 1];
    synth.read_memory(0x10_0016, &mut volume);
    assert_eq!(volume[0], 100);
    assert!(events.contains(&ReportEvent::DeviceReset));
    assert!(events.contains(&ReportEvent::NewReverbMode(0)));
    assert!(events.contains(&ReportEvent::NewReverbTime(5)));
    assert!(events.contains(&ReportEvent::NewReverbLevel(3)));
}

#[test]
fn midi_queue_overflow_is_reported() {
    let mut synth = open_synth("mt32_1_07", {
        let mut options = digital_options(RendererType::Bit16s);
        options.midi_queue_size = 4;
        options
    });
    let events = EventLog::attach(&mut synth);
    for _ in 0..4 {
        assert!(synth.play_msg(0x7F3C91));
    }
    assert!(!synth.play_msg(0x7F3C91));
    assert!(events.contains(&ReportEvent::MidiQueueOverflow));
}

#[test]
fn queued_events_wait_for_their_timestamp() {
    let mut synth = open_synth("cm32l_1_02", digital_options(RendererType::Bit16s));
    send_sine_wave_sysex(&mut synth, 1);
    // Note-on scheduled 100 samples in.
    assert!(synth.play_msg_at(0x7F3C91, 100));

    let mut buffer = [0i16; 2 * 100];
    synth.render(&mut buffer);
    assert!(buffer.iter().all(|&s| s == 0));

    let mut buffer = [0i16; 2 * 128];
    synth.render(&mut buffer);
    assert!(synth.is_active());
    assert!(buffer.iter().any(|&s| s != 0));
}

#[test]
fn unassigned_channels_and_malformed_messages_are_ignored() {
    let mut synth = open_synth("cm32l_1_02", digital_options(RendererType::Bit16s));
    send_sine_wave_sysex(&mut synth, 1);
    assert!(!synth.is_active());

    // Channel 15 has no part; command 0x3 is not a status; realtime is
    // not a channel message.
    synth.play_msg_now(0x7F3C9F);
    synth.play_msg_now(0x341271);
    synth.play_msg_now(0xF8);

    assert!(!synth.is_active());
}

#[test]
fn reverb_tail_survives_rewriting_identical_parameters() {
    let mut synth = open_synth("cm32l_1_02", digital_options(RendererType::Float));
    send_sine_wave_sysex(&mut synth, 1);
    // Reverb mode 2, time 5, level 3; turn the patch's reverb switch on.
    synth.write_sysex(16, &[0x10, 0x00, 0x01, 2, 5, 3]);
    synth.write_sysex(1, &[0x00, 0x00, 0x06, 1]);

    send_note_on(&mut synth, 1, 60, 127);
    skip_rendered_frames(&mut synth, 2048);
    send_all_notes_off(&mut synth, 1);
    skip_rendered_frames(&mut synth, 512);
    assert!(synth.is_reverb_active());

    // Rewriting the same parameters must not mute or restart the tail.
    synth.write_sysex(16, &[0x10, 0x00, 0x01, 2, 5, 3]);
    assert!(synth.is_reverb_active());
    let mut buffer = [0.0f32; 2 * 256];
    synth.render(&mut buffer);
    assert!(buffer.iter().any(|&s| s != 0.0));
}
