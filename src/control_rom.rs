//! Control ROM layout maps and extraction of the tables the synth consumes.
//!
//! Each supported control ROM version stores its tables at different
//! addresses; the map for a version is selected by the recognized ROM
//! identity. Timbre banks may be stored "compressed", with muted partials
//! omitted.

use crate::params::{MemParams, PARTIAL_PARAM_SIZE, TIMBRE_COMMON_SIZE, TIMBRE_PARAM_SIZE};
use crate::rom::RomImage;
use crate::CONTROL_ROM_SIZE;

/// Behavioral switches implied by the control ROM generation.
#[derive(Clone, Copy, Debug)]
pub struct ControlRomFeatures {
    /// Selects the new-generation partial allocator.
    pub new_gen_note_cancellation: bool,
    /// Whether the default reverb circuit is the old MT-32 one.
    pub old_mt32_reverb_compatible: bool,
}

/// Table addresses inside one control ROM version.
#[derive(Clone, Copy, Debug)]
pub struct ControlRomMap {
    pub short_name: &'static str,
    pub pcm_table: u16,
    pub pcm_count: u16,
    pub timbre_a_map: u16,
    pub timbre_a_offset: u16,
    pub timbre_a_compressed: bool,
    pub timbre_b_map: u16,
    pub timbre_b_offset: u16,
    pub timbre_b_compressed: bool,
    pub timbre_r_map: u16,
    pub timbre_r_count: u16,
    pub rhythm_settings: u16,
    pub rhythm_settings_count: u16,
    pub reserve_settings: u16,
    pub pan_settings: u16,
    pub program_settings: u16,
    pub rhythm_max_table: u16,
    pub patch_max_table: u16,
    pub system_max_table: u16,
    pub timbre_max_table: u16,
    pub features: ControlRomFeatures,
}

const OLD_GEN: ControlRomFeatures = ControlRomFeatures {
    new_gen_note_cancellation: false,
    old_mt32_reverb_compatible: true,
};

const NEW_GEN: ControlRomFeatures = ControlRomFeatures {
    new_gen_note_cancellation: true,
    old_mt32_reverb_compatible: false,
};

pub static CONTROL_ROM_MAPS: &[ControlRomMap] = &[
    ControlRomMap { short_name: "ctrl_mt32_1_04", pcm_table: 0x3000, pcm_count: 128, timbre_a_map: 0x8000, timbre_a_offset: 0x0000, timbre_a_compressed: false, timbre_b_map: 0xC000, timbre_b_offset: 0x4000, timbre_b_compressed: false, timbre_r_map: 0x3200, timbre_r_count: 30, rhythm_settings: 0x73A6, rhythm_settings_count: 85, reserve_settings: 0x57C7, pan_settings: 0x57E2, program_settings: 0x57D0, rhythm_max_table: 0x5252, patch_max_table: 0x525E, system_max_table: 0x526E, timbre_max_table: 0x520A, features: OLD_GEN },
    ControlRomMap { short_name: "ctrl_mt32_1_05", pcm_table: 0x3000, pcm_count: 128, timbre_a_map: 0x8000, timbre_a_offset: 0x0000, timbre_a_compressed: false, timbre_b_map: 0xC000, timbre_b_offset: 0x4000, timbre_b_compressed: false, timbre_r_map: 0x3200, timbre_r_count: 30, rhythm_settings: 0x7414, rhythm_settings_count: 85, reserve_settings: 0x57C7, pan_settings: 0x57E2, program_settings: 0x57D0, rhythm_max_table: 0x5252, patch_max_table: 0x525E, system_max_table: 0x526E, timbre_max_table: 0x520A, features: OLD_GEN },
    ControlRomMap { short_name: "ctrl_mt32_1_06", pcm_table: 0x3000, pcm_count: 128, timbre_a_map: 0x8000, timbre_a_offset: 0x0000, timbre_a_compressed: false, timbre_b_map: 0xC000, timbre_b_offset: 0x4000, timbre_b_compressed: false, timbre_r_map: 0x3200, timbre_r_count: 30, rhythm_settings: 0x7414, rhythm_settings_count: 85, reserve_settings: 0x57D9, pan_settings: 0x57F4, program_settings: 0x57E2, rhythm_max_table: 0x5264, patch_max_table: 0x5270, system_max_table: 0x5280, timbre_max_table: 0x521C, features: OLD_GEN },
    ControlRomMap { short_name: "ctrl_mt32_1_07", pcm_table: 0x3000, pcm_count: 128, timbre_a_map: 0x8000, timbre_a_offset: 0x0000, timbre_a_compressed: false, timbre_b_map: 0xC000, timbre_b_offset: 0x4000, timbre_b_compressed: false, timbre_r_map: 0x3200, timbre_r_count: 30, rhythm_settings: 0x73FE, rhythm_settings_count: 85, reserve_settings: 0x57B1, pan_settings: 0x57CC, program_settings: 0x57BA, rhythm_max_table: 0x523C, patch_max_table: 0x5248, system_max_table: 0x5258, timbre_max_table: 0x51F4, features: OLD_GEN },
    ControlRomMap { short_name: "ctrl_mt32_bluer", pcm_table: 0x3000, pcm_count: 128, timbre_a_map: 0x8000, timbre_a_offset: 0x0000, timbre_a_compressed: false, timbre_b_map: 0xC000, timbre_b_offset: 0x4000, timbre_b_compressed: false, timbre_r_map: 0x3200, timbre_r_count: 30, rhythm_settings: 0x741C, rhythm_settings_count: 85, reserve_settings: 0x57E5, pan_settings: 0x5800, program_settings: 0x57EE, rhythm_max_table: 0x5270, patch_max_table: 0x527C, system_max_table: 0x528C, timbre_max_table: 0x5228, features: OLD_GEN },
    ControlRomMap { short_name: "ctrl_cm32l_1_00", pcm_table: 0x8100, pcm_count: 256, timbre_a_map: 0x8000, timbre_a_offset: 0x8000, timbre_a_compressed: false, timbre_b_map: 0x8080, timbre_b_offset: 0x8000, timbre_b_compressed: false, timbre_r_map: 0x8500, timbre_r_count: 64, rhythm_settings: 0x8580, rhythm_settings_count: 85, reserve_settings: 0x4F65, pan_settings: 0x4F80, program_settings: 0x4F6E, rhythm_max_table: 0x48A1, patch_max_table: 0x48A5, system_max_table: 0x48BE, timbre_max_table: 0x48D5, features: NEW_GEN },
    ControlRomMap { short_name: "ctrl_cm32l_1_02", pcm_table: 0x8100, pcm_count: 256, timbre_a_map: 0x8000, timbre_a_offset: 0x8000, timbre_a_compressed: true, timbre_b_map: 0x8080, timbre_b_offset: 0x8000, timbre_b_compressed: true, timbre_r_map: 0x8500, timbre_r_count: 64, rhythm_settings: 0x8580, rhythm_settings_count: 85, reserve_settings: 0x4F93, pan_settings: 0x4FAE, program_settings: 0x4F9C, rhythm_max_table: 0x48CB, patch_max_table: 0x48CF, system_max_table: 0x48E8, timbre_max_table: 0x48FF, features: NEW_GEN },
    ControlRomMap { short_name: "ctrl_cm32ln_1_00", pcm_table: 0x8100, pcm_count: 256, timbre_a_map: 0x8000, timbre_a_offset: 0x8000, timbre_a_compressed: true, timbre_b_map: 0x8080, timbre_b_offset: 0x8000, timbre_b_compressed: true, timbre_r_map: 0x8500, timbre_r_count: 64, rhythm_settings: 0x8580, rhythm_settings_count: 85, reserve_settings: 0x4F93, pan_settings: 0x4FAE, program_settings: 0x4F9C, rhythm_max_table: 0x48CB, patch_max_table: 0x48CF, system_max_table: 0x48E8, timbre_max_table: 0x48FF, features: NEW_GEN },
];

/// Find the layout map for a recognized control ROM.
pub fn find_control_rom_map(short_name: &str) -> Option<&'static ControlRomMap> {
    CONTROL_ROM_MAPS.iter().find(|map| map.short_name == short_name)
}

/// One entry of the PCM wave list extracted from the control ROM.
#[derive(Clone, Copy, Debug, Default)]
pub struct PcmWaveEntry {
    /// First sample index in the PCM ROM.
    pub addr: u32,
    /// Length in samples.
    pub len: u32,
    pub looped: bool,
    /// Raw tuning word consumed by the pitch machine.
    pub pitch: u16,
}

/// Extract the PCM wave list. Entries pointing outside the PCM ROM are an
/// error in the control ROM.
pub fn init_pcm_list(
    rom: &[u8],
    map: &ControlRomMap,
    pcm_rom_samples: usize,
) -> Result<Vec<PcmWaveEntry>, String> {
    let base = map.pcm_table as usize;
    let mut waves = Vec::with_capacity(map.pcm_count as usize);
    for i in 0..map.pcm_count as usize {
        let entry = &rom[base + 4 * i..base + 4 * i + 4];
        let pos = u32::from(entry[0]);
        let len_code = entry[1];
        let addr = pos * 0x800;
        let len = 0x800u32 << ((len_code & 0x70) >> 4);
        let pitch = (u16::from(entry[3]) << 8) | u16::from(entry[2]);
        if (addr + len) as usize > pcm_rom_samples {
            return Err(format!(
                "wave map entry {} points to invalid PCM address 0x{:04X}, length 0x{:04X}",
                i, addr, len
            ));
        }
        waves.push(PcmWaveEntry {
            addr,
            len,
            looped: len_code & 0x80 != 0,
            pitch,
        });
    }
    Ok(waves)
}

/// Unscramble the PCM ROM bit lanes into sign + 15-bit log magnitude words.
pub fn decode_pcm_rom(data: &[u8]) -> Vec<i16> {
    // The ROM routes its data pins in this order.
    const ORDER: [u32; 16] = [0, 9, 1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13, 14, 15, 8];
    let mut samples = Vec::with_capacity(data.len() / 2);
    for pair in data.chunks_exact(2) {
        let s = u32::from(pair[0]);
        let c = u32::from(pair[1]);
        let mut word: u16 = 0;
        for (u, &lane) in ORDER.iter().enumerate().take(15) {
            let bit = if lane < 8 {
                (s >> (7 - lane)) & 1
            } else {
                (c >> (7 - (lane - 8))) & 1
            };
            word |= (bit as u16) << (15 - u);
        }
        samples.push(word as i16);
    }
    samples
}

fn write_timbre(mem: &mut MemParams, timbre_num: usize, bytes: &[u8; TIMBRE_PARAM_SIZE]) {
    mem.timbres[timbre_num][..TIMBRE_PARAM_SIZE].copy_from_slice(bytes);
}

/// Expand one compressed timbre: muted partials (other than partial 0) are
/// not stored, the previous partial's bytes standing in for them.
fn init_compressed_timbre(
    mem: &mut MemParams,
    timbre_num: usize,
    src: &[u8],
) -> Result<(), String> {
    if src.len() < TIMBRE_COMMON_SIZE {
        return Err(format!("compressed timbre {} is truncated", timbre_num));
    }
    let mut bytes = [0u8; TIMBRE_PARAM_SIZE];
    bytes[..TIMBRE_COMMON_SIZE].copy_from_slice(&src[..TIMBRE_COMMON_SIZE]);
    let partial_mute = bytes[12];
    let mut src_pos = TIMBRE_COMMON_SIZE;
    let mut mem_pos = TIMBRE_COMMON_SIZE;
    for t in 0..4 {
        if t != 0 && (partial_mute >> t) & 1 == 0 {
            src_pos -= PARTIAL_PARAM_SIZE;
        } else if src_pos + PARTIAL_PARAM_SIZE > src.len() {
            return Err(format!("compressed timbre {} is truncated", timbre_num));
        }
        bytes[mem_pos..mem_pos + PARTIAL_PARAM_SIZE]
            .copy_from_slice(&src[src_pos..src_pos + PARTIAL_PARAM_SIZE]);
        src_pos += PARTIAL_PARAM_SIZE;
        mem_pos += PARTIAL_PARAM_SIZE;
    }
    write_timbre(mem, timbre_num, &bytes);
    Ok(())
}

/// Load one timbre bank through its address map.
pub fn init_timbres(
    mem: &mut MemParams,
    rom: &[u8],
    map_address: u16,
    offset: u16,
    count: usize,
    start_timbre: usize,
    compressed: bool,
) -> Result<(), String> {
    let map_base = map_address as usize;
    let mut timbre_num = start_timbre;
    for i in 0..count {
        let address = usize::from(rom[map_base + 2 * i])
            | (usize::from(rom[map_base + 2 * i + 1]) << 8);
        let address = address + offset as usize;
        if !compressed && address + TIMBRE_PARAM_SIZE > CONTROL_ROM_SIZE {
            return Err(format!(
                "timbre map entry {} points to invalid timbre address 0x{:04x}",
                i, address
            ));
        }
        if compressed {
            init_compressed_timbre(mem, timbre_num, &rom[address..])?;
        } else {
            write_timbre(
                mem,
                timbre_num,
                rom[address..address + TIMBRE_PARAM_SIZE].try_into().unwrap(),
            );
        }
        timbre_num += 1;
    }
    Ok(())
}

/// A recognized control ROM with its layout map and raw contents.
pub struct ControlRom {
    pub data: Vec<u8>,
    pub map: &'static ControlRomMap,
}

impl ControlRom {
    /// Accept a full control ROM image for which a layout map exists.
    pub fn from_image(image: &RomImage) -> Option<ControlRom> {
        let map = find_control_rom_map(image.info().short_name)?;
        if image.data().len() != CONTROL_ROM_SIZE {
            return None;
        }
        Some(ControlRom {
            data: image.data().to_vec(),
            map,
        })
    }

    pub fn features(&self) -> &ControlRomFeatures {
        &self.map.features
    }

    /// Slice of `len` bytes at a table address.
    pub fn table(&self, addr: u16, len: usize) -> &[u8] {
        &self.data[addr as usize..addr as usize + len]
    }

    /// The padded per-offset maximum table for timbre regions: the ROM
    /// stores maxima for the common section and a single partial; the
    /// remaining partials repeat and the padding is write-protected.
    pub fn padded_timbre_max_table(&self) -> Vec<u8> {
        let base = self.map.timbre_max_table as usize;
        let mut table =
            self.data[base..base + TIMBRE_COMMON_SIZE + PARTIAL_PARAM_SIZE].to_vec();
        for _ in 0..3 {
            table.extend_from_slice(
                &self.data[base + TIMBRE_COMMON_SIZE..base + TIMBRE_COMMON_SIZE + PARTIAL_PARAM_SIZE],
            );
        }
        table.resize(crate::params::PADDED_TIMBRE_SIZE, 0);
        table
    }

    /// Default patch numbers for the eight melodic parts.
    pub fn program_settings(&self) -> [u8; 8] {
        self.table(self.map.program_settings, 8).try_into().unwrap()
    }

    /// Default pan settings for the eight melodic parts.
    pub fn pan_settings(&self) -> [u8; 8] {
        self.table(self.map.pan_settings, 8).try_into().unwrap()
    }

    /// Default partial reserve table.
    pub fn reserve_settings(&self) -> [u8; 9] {
        self.table(self.map.reserve_settings, 9).try_into().unwrap()
    }
}
