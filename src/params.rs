//! Byte-backed parameter memory and its typed views.
//!
//! The hardware exposes its working state as a 7-bit-per-byte address space
//! written over SysEx. Keeping every region as raw bytes and decoding on
//! demand makes DT1 writes followed by RQ1 reads exact by construction.

/// Bytes in a patch bank entry.
pub const PATCH_PARAM_SIZE: usize = 8;
/// Bytes in a per-part live patch entry.
pub const PATCH_TEMP_SIZE: usize = 16;
/// Bytes in a rhythm key slot.
pub const RHYTHM_TEMP_SIZE: usize = 4;
/// Bytes in a timbre.
pub const TIMBRE_PARAM_SIZE: usize = 246;
/// Bytes in a stored timbre including padding.
pub const PADDED_TIMBRE_SIZE: usize = 256;
/// Bytes in the system area.
pub const SYSTEM_SIZE: usize = 23;
/// Rhythm key slots.
pub const RHYTHM_SLOTS: usize = 85;
/// Stored timbres (four banks of 64).
pub const TIMBRE_COUNT: usize = 256;

/// Convert a display-style address (three 7-bit bytes shown as hex pairs)
/// into the packed 21-bit address used internally.
#[inline]
pub const fn memaddr(display: u32) -> u32 {
    ((display & 0x7F_0000) >> 2) | ((display & 0x7F00) >> 1) | (display & 0x7F)
}

/// Inverse of [`memaddr`], for diagnostics.
#[inline]
pub const fn display_addr(packed: u32) -> u32 {
    ((packed & 0x1F_C000) << 2) | ((packed & 0x3F80) << 1) | (packed & 0x7F)
}

/// The SysEx-visible memory regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionType {
    PatchTemp,
    RhythmTemp,
    TimbreTemp,
    Patches,
    Timbres,
    System,
    Display,
    Reset,
}

/// Geometry of one memory region in the packed address space.
#[derive(Clone, Copy, Debug)]
pub struct Region {
    pub region_type: RegionType,
    pub start_addr: u32,
    pub entry_size: u32,
    pub entries: u32,
}

pub static REGIONS: [Region; 8] = [
    Region {
        region_type: RegionType::PatchTemp,
        start_addr: memaddr(0x03_0000),
        entry_size: PATCH_TEMP_SIZE as u32,
        entries: 9,
    },
    Region {
        region_type: RegionType::RhythmTemp,
        start_addr: memaddr(0x03_0110),
        entry_size: RHYTHM_TEMP_SIZE as u32,
        entries: RHYTHM_SLOTS as u32,
    },
    Region {
        region_type: RegionType::TimbreTemp,
        start_addr: memaddr(0x04_0000),
        entry_size: TIMBRE_PARAM_SIZE as u32,
        entries: 8,
    },
    Region {
        region_type: RegionType::Patches,
        start_addr: memaddr(0x05_0000),
        entry_size: PATCH_PARAM_SIZE as u32,
        entries: 128,
    },
    Region {
        region_type: RegionType::Timbres,
        start_addr: memaddr(0x08_0000),
        entry_size: PADDED_TIMBRE_SIZE as u32,
        entries: 64 + 64 + 64 + 64,
    },
    Region {
        region_type: RegionType::System,
        start_addr: memaddr(0x10_0000),
        entry_size: SYSTEM_SIZE as u32,
        entries: 1,
    },
    Region {
        region_type: RegionType::Display,
        start_addr: memaddr(0x20_0000),
        entry_size: 511,
        entries: 1,
    },
    Region {
        region_type: RegionType::Reset,
        start_addr: memaddr(0x7F_0000),
        entry_size: 0x3FFF,
        entries: 1,
    },
];

impl Region {
    pub fn region_end(&self) -> u32 {
        self.start_addr + self.entry_size * self.entries
    }
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start_addr && addr < self.region_end()
    }
    pub fn offset(&self, addr: u32) -> u32 {
        addr - self.start_addr
    }
    pub fn first_touched(&self, addr: u32) -> u32 {
        self.offset(addr) / self.entry_size
    }
    pub fn first_touched_offset(&self, addr: u32) -> u32 {
        self.offset(addr) % self.entry_size
    }
    pub fn last_touched(&self, addr: u32, len: u32) -> u32 {
        (self.offset(addr) + len - 1) / self.entry_size
    }
    pub fn clamped_len(&self, addr: u32, len: u32) -> u32 {
        if addr + len > self.region_end() {
            self.region_end() - addr
        } else {
            len
        }
    }
    /// Bytes remaining past the region end, 0 when the access fits.
    pub fn next(&self, addr: u32, len: u32) -> u32 {
        if addr + len > self.region_end() {
            self.region_end() - addr
        } else {
            0
        }
    }
}

/// Find the region containing a packed address.
pub fn find_region(addr: u32) -> Option<&'static Region> {
    REGIONS.iter().find(|region| region.contains(addr))
}

/// All writable parameter memory, as raw bytes.
#[derive(Clone)]
pub struct MemParams {
    pub patch_temp: [[u8; PATCH_TEMP_SIZE]; 9],
    pub rhythm_temp: [[u8; RHYTHM_TEMP_SIZE]; RHYTHM_SLOTS],
    pub timbre_temp: [[u8; TIMBRE_PARAM_SIZE]; 8],
    pub patches: [[u8; PATCH_PARAM_SIZE]; 128],
    pub timbres: Vec<[u8; PADDED_TIMBRE_SIZE]>,
    pub system: [u8; SYSTEM_SIZE],
}

impl MemParams {
    pub fn new() -> MemParams {
        MemParams {
            patch_temp: [[0; PATCH_TEMP_SIZE]; 9],
            rhythm_temp: [[0; RHYTHM_TEMP_SIZE]; RHYTHM_SLOTS],
            timbre_temp: [[0; TIMBRE_PARAM_SIZE]; 8],
            patches: [[0; PATCH_PARAM_SIZE]; 128],
            // The SysEx window opens 128 entries into the table and spans
            // 256 more, so the storage is padded past the meaningful banks.
            timbres: vec![[0; PADDED_TIMBRE_SIZE]; TIMBRE_COUNT + 128],
            system: [0; SYSTEM_SIZE],
        }
    }

    fn region_bytes(&self, region_type: RegionType) -> Option<&[u8]> {
        match region_type {
            RegionType::PatchTemp => Some(self.patch_temp.as_flattened()),
            RegionType::RhythmTemp => Some(self.rhythm_temp.as_flattened()),
            RegionType::TimbreTemp => Some(self.timbre_temp.as_flattened()),
            RegionType::Patches => Some(self.patches.as_flattened()),
            RegionType::Timbres => None,
            RegionType::System => Some(&self.system),
            RegionType::Display | RegionType::Reset => None,
        }
    }

    fn region_bytes_mut(&mut self, region_type: RegionType) -> Option<&mut [u8]> {
        match region_type {
            RegionType::PatchTemp => Some(self.patch_temp.as_flattened_mut()),
            RegionType::RhythmTemp => Some(self.rhythm_temp.as_flattened_mut()),
            RegionType::TimbreTemp => Some(self.timbre_temp.as_flattened_mut()),
            RegionType::Patches => Some(self.patches.as_flattened_mut()),
            RegionType::Timbres => None,
            RegionType::System => Some(&mut self.system),
            RegionType::Display | RegionType::Reset => None,
        }
    }

    /// Read bytes out of a region. Unreadable regions fill with a marker.
    pub fn read_region(&self, region: &Region, addr: u32, data: &mut [u8]) {
        let len = region.clamped_len(addr, data.len() as u32) as usize;
        let off = region.offset(addr) as usize;
        match region.region_type {
            RegionType::Timbres => {
                // The writable timbre banks start at memory timbre 128.
                let flat_off = 128 * PADDED_TIMBRE_SIZE + off;
                for (i, byte) in data.iter_mut().enumerate().take(len) {
                    let pos = flat_off + i;
                    *byte = self.timbres[pos / PADDED_TIMBRE_SIZE][pos % PADDED_TIMBRE_SIZE];
                }
            }
            _ => {
                if let Some(bytes) = self.region_bytes(region.region_type) {
                    data[..len].copy_from_slice(&bytes[off..off + len]);
                } else {
                    for (i, byte) in data.iter_mut().enumerate().take(len) {
                        *byte = if i % 2 == 0 { 0xFF } else { 0x00 };
                    }
                }
            }
        }
    }

    /// Write bytes into a region, clamping each byte to the per-offset
    /// maximum. A maximum of zero write-protects the byte except during
    /// initialisation from ROM.
    pub fn write_region(
        &mut self,
        region: &Region,
        addr: u32,
        data: &[u8],
        max_table: Option<&[u8]>,
        init: bool,
    ) {
        let len = region.clamped_len(addr, data.len() as u32) as usize;
        let entry_size = region.entry_size as usize;
        let mut off = region.offset(addr) as usize;
        if region.region_type == RegionType::Timbres {
            off += 128 * PADDED_TIMBRE_SIZE;
        }
        for &desired in data.iter().take(len) {
            let max_value = match max_table {
                Some(table) => table[off % entry_size],
                None => 0xFF,
            };
            let mut value = desired;
            if max_value != 0 || init {
                if value > max_value {
                    log::debug!(
                        "write[{:?}]: wanted 0x{:02x} at {}, but max 0x{:02x}",
                        region.region_type,
                        value,
                        off,
                        max_value
                    );
                    value = max_value;
                }
                match region.region_type {
                    RegionType::Timbres => {
                        self.timbres[off / PADDED_TIMBRE_SIZE][off % PADDED_TIMBRE_SIZE] = value;
                    }
                    _ => {
                        if let Some(bytes) = self.region_bytes_mut(region.region_type) {
                            bytes[off] = value;
                        }
                    }
                }
            } else if value != 0 {
                log::debug!(
                    "write[{:?}]: wanted 0x{:02x} at {}, but write-protected",
                    region.region_type,
                    value,
                    off
                );
            }
            off += 1;
        }
    }

    pub fn patch_temp(&self, part: usize) -> PatchTemp {
        PatchTemp::from_bytes(&self.patch_temp[part])
    }

    pub fn rhythm_temp(&self, slot: usize) -> RhythmTemp {
        RhythmTemp::from_bytes(&self.rhythm_temp[slot])
    }

    pub fn patch(&self, index: usize) -> PatchParam {
        PatchParam::from_bytes(&self.patches[index])
    }

    pub fn timbre_temp_param(&self, part: usize) -> TimbreParam {
        TimbreParam::from_bytes(&self.timbre_temp[part])
    }

    pub fn timbre(&self, index: usize) -> TimbreParam {
        TimbreParam::from_bytes(&self.timbres[index][..TIMBRE_PARAM_SIZE].try_into().unwrap())
    }

    pub fn system(&self) -> SystemParams {
        SystemParams::from_bytes(&self.system)
    }

    pub fn set_patch_temp_output_level(&mut self, part: usize, level: u8) {
        self.patch_temp[part][8] = level;
    }

    pub fn set_patch_temp_panpot(&mut self, part: usize, panpot: u8) {
        self.patch_temp[part][9] = panpot;
    }

    pub fn set_patch_temp_patch(&mut self, part: usize, patch: &[u8; PATCH_PARAM_SIZE]) {
        self.patch_temp[part][..PATCH_PARAM_SIZE].copy_from_slice(patch);
    }

    pub fn set_timbre_temp(&mut self, part: usize, timbre: &[u8; TIMBRE_PARAM_SIZE]) {
        self.timbre_temp[part] = *timbre;
    }
}

impl Default for MemParams {
    fn default() -> Self {
        MemParams::new()
    }
}

/// One patch bank entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct PatchParam {
    pub timbre_group: u8,
    pub timbre_num: u8,
    pub key_shift: u8,
    pub fine_tune: u8,
    pub bender_range: u8,
    pub assign_mode: u8,
    pub reverb_switch: u8,
}

impl PatchParam {
    pub fn from_bytes(bytes: &[u8]) -> PatchParam {
        PatchParam {
            timbre_group: bytes[0],
            timbre_num: bytes[1],
            key_shift: bytes[2],
            fine_tune: bytes[3],
            bender_range: bytes[4],
            assign_mode: bytes[5],
            reverb_switch: bytes[6],
        }
    }

    pub fn abs_timbre_num(&self) -> usize {
        usize::from(self.timbre_group) * 64 + usize::from(self.timbre_num)
    }
}

/// Per-part live patch area.
#[derive(Clone, Copy, Debug, Default)]
pub struct PatchTemp {
    pub patch: PatchParam,
    pub output_level: u8,
    pub panpot: u8,
}

impl PatchTemp {
    pub fn from_bytes(bytes: &[u8; PATCH_TEMP_SIZE]) -> PatchTemp {
        PatchTemp {
            patch: PatchParam::from_bytes(&bytes[..PATCH_PARAM_SIZE]),
            output_level: bytes[8],
            panpot: bytes[9],
        }
    }
}

/// One rhythm key slot.
#[derive(Clone, Copy, Debug, Default)]
pub struct RhythmTemp {
    pub timbre: u8,
    pub output_level: u8,
    pub panpot: u8,
    pub reverb_switch: u8,
}

impl RhythmTemp {
    pub fn from_bytes(bytes: &[u8; RHYTHM_TEMP_SIZE]) -> RhythmTemp {
        RhythmTemp {
            timbre: bytes[0],
            output_level: bytes[1],
            panpot: bytes[2],
            reverb_switch: bytes[3],
        }
    }
}

/// The system area.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemParams {
    pub master_tune: u8,
    pub reverb_mode: u8,
    pub reverb_time: u8,
    pub reverb_level: u8,
    pub reserve_settings: [u8; 9],
    pub chan_assign: [u8; 9],
    pub master_vol: u8,
}

impl SystemParams {
    pub fn from_bytes(bytes: &[u8; SYSTEM_SIZE]) -> SystemParams {
        let mut reserve_settings = [0u8; 9];
        reserve_settings.copy_from_slice(&bytes[4..13]);
        let mut chan_assign = [0u8; 9];
        chan_assign.copy_from_slice(&bytes[13..22]);
        SystemParams {
            master_tune: bytes[0],
            reverb_mode: bytes[1],
            reverb_time: bytes[2],
            reverb_level: bytes[3],
            reserve_settings,
            chan_assign,
            master_vol: bytes[22],
        }
    }

    pub fn to_bytes(&self) -> [u8; SYSTEM_SIZE] {
        let mut bytes = [0u8; SYSTEM_SIZE];
        bytes[0] = self.master_tune;
        bytes[1] = self.reverb_mode;
        bytes[2] = self.reverb_time;
        bytes[3] = self.reverb_level;
        bytes[4..13].copy_from_slice(&self.reserve_settings);
        bytes[13..22].copy_from_slice(&self.chan_assign);
        bytes[22] = self.master_vol;
        bytes
    }
}

/// Wave generator section of a partial.
#[derive(Clone, Copy, Debug, Default)]
pub struct WgParam {
    pub pitch_coarse: u8,
    pub pitch_fine: u8,
    pub pitch_keyfollow: u8,
    pub pitch_bender_enabled: u8,
    pub waveform: u8,
    pub pcm_wave: u8,
    pub pulse_width: u8,
    pub pulse_width_velo_sensitivity: u8,
}

/// Pitch envelope section of a partial.
#[derive(Clone, Copy, Debug, Default)]
pub struct PitchEnvParam {
    pub depth: u8,
    pub velo_sensitivity: u8,
    pub time_keyfollow: u8,
    pub time: [u8; 4],
    pub level: [u8; 5],
}

/// Pitch LFO section of a partial.
#[derive(Clone, Copy, Debug, Default)]
pub struct PitchLfoParam {
    pub rate: u8,
    pub depth: u8,
    pub mod_sensitivity: u8,
}

/// Filter section of a partial.
#[derive(Clone, Copy, Debug, Default)]
pub struct TvfParam {
    pub cutoff: u8,
    pub resonance: u8,
    pub keyfollow: u8,
    pub bias_point: u8,
    pub bias_level: u8,
    pub env_depth: u8,
    pub env_velo_sensitivity: u8,
    pub env_depth_keyfollow: u8,
    pub env_time_keyfollow: u8,
    pub env_time: [u8; 5],
    pub env_level: [u8; 4],
}

/// Amplifier section of a partial.
#[derive(Clone, Copy, Debug, Default)]
pub struct TvaParam {
    pub level: u8,
    pub velo_sensitivity: u8,
    pub bias_point1: u8,
    pub bias_level1: u8,
    pub bias_point2: u8,
    pub bias_level2: u8,
    pub env_time_keyfollow: u8,
    pub env_time_velo_sensitivity: u8,
    pub env_time: [u8; 5],
    pub env_level: [u8; 4],
}

/// One of the four partials of a timbre, 58 bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct PartialParam {
    pub wg: WgParam,
    pub pitch_env: PitchEnvParam,
    pub pitch_lfo: PitchLfoParam,
    pub tvf: TvfParam,
    pub tva: TvaParam,
}

/// Bytes in one partial of a timbre.
pub const PARTIAL_PARAM_SIZE: usize = 58;
/// Bytes in the common section of a timbre.
pub const TIMBRE_COMMON_SIZE: usize = 14;

impl PartialParam {
    pub fn from_bytes(bytes: &[u8]) -> PartialParam {
        PartialParam {
            wg: WgParam {
                pitch_coarse: bytes[0],
                pitch_fine: bytes[1],
                pitch_keyfollow: bytes[2],
                pitch_bender_enabled: bytes[3],
                waveform: bytes[4],
                pcm_wave: bytes[5],
                pulse_width: bytes[6],
                pulse_width_velo_sensitivity: bytes[7],
            },
            pitch_env: PitchEnvParam {
                depth: bytes[8],
                velo_sensitivity: bytes[9],
                time_keyfollow: bytes[10],
                time: [bytes[11], bytes[12], bytes[13], bytes[14]],
                level: [bytes[15], bytes[16], bytes[17], bytes[18], bytes[19]],
            },
            pitch_lfo: PitchLfoParam {
                rate: bytes[20],
                depth: bytes[21],
                mod_sensitivity: bytes[22],
            },
            tvf: TvfParam {
                cutoff: bytes[23],
                resonance: bytes[24],
                keyfollow: bytes[25],
                bias_point: bytes[26],
                bias_level: bytes[27],
                env_depth: bytes[28],
                env_velo_sensitivity: bytes[29],
                env_depth_keyfollow: bytes[30],
                env_time_keyfollow: bytes[31],
                env_time: [bytes[32], bytes[33], bytes[34], bytes[35], bytes[36]],
                env_level: [bytes[37], bytes[38], bytes[39], bytes[40]],
            },
            tva: TvaParam {
                level: bytes[41],
                velo_sensitivity: bytes[42],
                bias_point1: bytes[43],
                bias_level1: bytes[44],
                bias_point2: bytes[45],
                bias_level2: bytes[46],
                env_time_keyfollow: bytes[47],
                env_time_velo_sensitivity: bytes[48],
                env_time: [bytes[49], bytes[50], bytes[51], bytes[52], bytes[53]],
                env_level: [bytes[54], bytes[55], bytes[56], bytes[57]],
            },
        }
    }
}

/// One timbre: the common section plus four partials.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimbreParam {
    pub name: [u8; 10],
    pub partial_structure12: u8,
    pub partial_structure34: u8,
    pub partial_mute: u8,
    pub no_sustain: u8,
    pub partial: [PartialParam; 4],
}

impl TimbreParam {
    pub fn from_bytes(bytes: &[u8; TIMBRE_PARAM_SIZE]) -> TimbreParam {
        let mut name = [0u8; 10];
        name.copy_from_slice(&bytes[..10]);
        let partial = core::array::from_fn(|t| {
            let start = TIMBRE_COMMON_SIZE + t * PARTIAL_PARAM_SIZE;
            PartialParam::from_bytes(&bytes[start..start + PARTIAL_PARAM_SIZE])
        });
        TimbreParam {
            name,
            partial_structure12: bytes[10],
            partial_structure34: bytes[11],
            partial_mute: bytes[12],
            no_sustain: bytes[13],
            partial,
        }
    }

    /// Patch name with trailing garbage stripped.
    pub fn name_str(&self) -> String {
        self.name
            .iter()
            .map(|&b| {
                if (0x20..0x7F).contains(&b) {
                    b as char
                } else {
                    ' '
                }
            })
            .collect::<String>()
            .trim_end()
            .to_string()
    }
}
