//! Recognition, pairing and merging of control and PCM ROM images.
//!
//! ROM identity is established by the pair (file size, SHA-1 digest). Dumps
//! of partial ROMs (odd/even bytes of a multiplexed pair, or low/high
//! halves) are recognized and merged into full images before use.

use std::collections::HashMap;

use lazy_static::lazy_static;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// What a ROM image contains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RomType {
    Control,
    Pcm,
}

/// How an image relates to the full ROM it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairType {
    /// Complete image, ready for the synth.
    Full,
    /// Data occupying the lower half of the addresses; needs pairing.
    FirstHalf,
    /// Data occupying the upper half of the addresses; needs pairing.
    SecondHalf,
    /// Data occupying the even addresses; needs pairing.
    Mux0,
    /// Data occupying the odd addresses; needs pairing.
    Mux1,
}

/// Vital information about one known ROM dump.
#[derive(Debug)]
pub struct RomInfo {
    pub file_size: usize,
    pub sha1: &'static str,
    pub rom_type: RomType,
    pub short_name: &'static str,
    pub description: &'static str,
    pub pair_type: PairType,
    /// Short name of the image this one pairs with, for partial images.
    pub pair_short_name: Option<&'static str>,
}

macro_rules! rom_info {
    ($size:expr, $sha1:expr, $type:ident, $short:expr, $desc:expr, $pair:ident, $pair_name:expr) => {
        RomInfo {
            file_size: $size,
            sha1: $sha1,
            rom_type: RomType::$type,
            short_name: $short,
            description: $desc,
            pair_type: PairType::$pair,
            pair_short_name: $pair_name,
        }
    };
}

/// Every ROM dump the synth knows how to use.
pub static ROM_INFOS: &[RomInfo] = &[
    rom_info!(65536, "5a5cb5a77d7d55ee69657c2f870416daed52dea7", Control, "ctrl_mt32_1_04", "MT-32 Control v1.04", Full, None),
    rom_info!(65536, "e17a3a6d265bf1fa150312061134293d2b58288c", Control, "ctrl_mt32_1_05", "MT-32 Control v1.05", Full, None),
    rom_info!(65536, "a553481f4e2794c10cfe597fef154eef0d8257de", Control, "ctrl_mt32_1_06", "MT-32 Control v1.06", Full, None),
    rom_info!(65536, "b083518fffb7f66b03c23b7eb4f868e62dc5a987", Control, "ctrl_mt32_1_07", "MT-32 Control v1.07", Full, None),
    rom_info!(65536, "7b8c2a5ddb42fd0732e2f22b3340dcf5360edf92", Control, "ctrl_mt32_bluer", "MT-32 Control BlueRidge", Full, None),
    rom_info!(131072, "5837064c9df4741a55f7c4d8787ac158dff2d3ce", Control, "ctrl_mt32_2_03", "MT-32 Control v2.03", Full, None),
    rom_info!(131072, "2c16432b6c73dd2a3947cba950a0f4c19d6180eb", Control, "ctrl_mt32_2_04", "MT-32 Control v2.04", Full, None),
    rom_info!(131072, "2869cf4c235d671668cfcb62415e2ce8323ad4ed", Control, "ctrl_mt32_2_06", "MT-32 Control v2.06", Full, None),
    rom_info!(131072, "47b52adefedaec475c925e54340e37673c11707c", Control, "ctrl_mt32_2_07", "MT-32 Control v2.07", Full, None),
    rom_info!(65536, "73683d585cd6948cc19547942ca0e14a0319456d", Control, "ctrl_cm32l_1_00", "CM-32L/LAPC-I Control v1.00", Full, None),
    rom_info!(65536, "a439fbb390da38cada95a7cbb1d6ca199cd66ef8", Control, "ctrl_cm32l_1_02", "CM-32L/LAPC-I Control v1.02", Full, None),
    rom_info!(65536, "dc1c5b1b90a4646d00f7daf3679733c7badc7077", Control, "ctrl_cm32ln_1_00", "CM-32LN/CM-500/LAPC-N Control v1.00", Full, None),
    rom_info!(524288, "f6b1eebc4b2d200ec6d3d21d51325d5b48c60252", Pcm, "pcm_mt32", "MT-32 PCM ROM", Full, None),
    rom_info!(1048576, "289cc298ad532b702461bfc738009d9ebe8025ea", Pcm, "pcm_cm32l", "CM-32L/CM-64/LAPC-I PCM ROM", Full, None),
    // Partial dumps.
    rom_info!(32768, "9cd4858014c4e8a9dff96053f784bfaac1092a2e", Control, "ctrl_mt32_1_04_a", "MT-32 Control v1.04", Mux0, Some("ctrl_mt32_1_04_b")),
    rom_info!(32768, "fe8db469b5bfeb37edb269fd47e3ce6d91014652", Control, "ctrl_mt32_1_04_b", "MT-32 Control v1.04", Mux1, Some("ctrl_mt32_1_04_a")),
    rom_info!(32768, "57a09d80d2f7ca5b9734edbe9645e6e700f83701", Control, "ctrl_mt32_1_05_a", "MT-32 Control v1.05", Mux0, Some("ctrl_mt32_1_05_b")),
    rom_info!(32768, "52e3c6666db9ef962591a8ee99be0cde17f3a6b6", Control, "ctrl_mt32_1_05_b", "MT-32 Control v1.05", Mux1, Some("ctrl_mt32_1_05_a")),
    rom_info!(32768, "cc83bf23cee533097fb4c7e2c116e43b50ebacc8", Control, "ctrl_mt32_1_06_a", "MT-32 Control v1.06", Mux0, Some("ctrl_mt32_1_06_b")),
    rom_info!(32768, "bf4f15666bc46679579498386704893b630c1171", Control, "ctrl_mt32_1_06_b", "MT-32 Control v1.06", Mux1, Some("ctrl_mt32_1_06_a")),
    rom_info!(32768, "13f06b38f0d9e0fc050b6503ab777bb938603260", Control, "ctrl_mt32_1_07_a", "MT-32 Control v1.07", Mux0, Some("ctrl_mt32_1_07_b")),
    rom_info!(32768, "c55e165487d71fa88bd8c5e9c083bc456c1a89aa", Control, "ctrl_mt32_1_07_b", "MT-32 Control v1.07", Mux1, Some("ctrl_mt32_1_07_a")),
    rom_info!(32768, "11a6ae5d8b6ee328b371af7f1e40b82125aa6b4d", Control, "ctrl_mt32_bluer_a", "MT-32 Control BlueRidge", Mux0, Some("ctrl_mt32_bluer_b")),
    rom_info!(32768, "e0934320d7cbb5edfaa29e0d01ae835ef620085b", Control, "ctrl_mt32_bluer_b", "MT-32 Control BlueRidge", Mux1, Some("ctrl_mt32_bluer_a")),
    rom_info!(262144, "3a1e19b0cd4036623fd1d1d11f5f25995585962b", Pcm, "pcm_mt32_l", "MT-32 PCM ROM", FirstHalf, Some("pcm_mt32_h")),
    rom_info!(262144, "2cadb99d21a6a4a6f5b61b6218d16e9b43f61d01", Pcm, "pcm_mt32_h", "MT-32 PCM ROM", SecondHalf, Some("pcm_mt32_l")),
    // The lower half of the CM-32L PCM ROM is the full MT-32 PCM ROM, aliased.
    rom_info!(524288, "f6b1eebc4b2d200ec6d3d21d51325d5b48c60252", Pcm, "pcm_cm32l_l", "CM-32L/CM-64/LAPC-I PCM ROM", FirstHalf, Some("pcm_cm32l_h")),
    rom_info!(524288, "3ad889fde5db5b6437cbc2eb6e305312fec3df93", Pcm, "pcm_cm32l_h", "CM-32L/CM-64/LAPC-I PCM ROM", SecondHalf, Some("pcm_cm32l_l")),
];

lazy_static! {
    static ref ROM_INFO_BY_IDENTITY: HashMap<(usize, &'static str), &'static RomInfo> = {
        let mut map = HashMap::new();
        for info in ROM_INFOS {
            // Aliased entries keep the first (full) registration.
            map.entry((info.file_size, info.sha1)).or_insert(info);
        }
        map
    };
    static ref ROM_INFO_BY_SHORT_NAME: HashMap<&'static str, &'static RomInfo> = {
        ROM_INFOS.iter().map(|info| (info.short_name, info)).collect()
    };
}

impl RomInfo {
    /// Look a ROM up by its identity pair.
    pub fn find(file_size: usize, sha1: &str) -> Option<&'static RomInfo> {
        ROM_INFO_BY_IDENTITY.get(&(file_size, sha1)).copied()
    }

    /// Look a ROM up by its registry short name.
    pub fn find_by_short_name(short_name: &str) -> Option<&'static RomInfo> {
        ROM_INFO_BY_SHORT_NAME.get(short_name).copied()
    }
}

/// ROM sets of machines the synth can emulate.
#[derive(Debug)]
pub struct MachineConfiguration {
    pub machine_id: &'static str,
    pub control_rom: &'static str,
    pub pcm_rom: &'static str,
}

pub static MACHINE_CONFIGURATIONS: &[MachineConfiguration] = &[
    MachineConfiguration { machine_id: "mt32_1_04", control_rom: "ctrl_mt32_1_04", pcm_rom: "pcm_mt32" },
    MachineConfiguration { machine_id: "mt32_1_05", control_rom: "ctrl_mt32_1_05", pcm_rom: "pcm_mt32" },
    MachineConfiguration { machine_id: "mt32_1_06", control_rom: "ctrl_mt32_1_06", pcm_rom: "pcm_mt32" },
    MachineConfiguration { machine_id: "mt32_1_07", control_rom: "ctrl_mt32_1_07", pcm_rom: "pcm_mt32" },
    MachineConfiguration { machine_id: "mt32_bluer", control_rom: "ctrl_mt32_bluer", pcm_rom: "pcm_mt32" },
    MachineConfiguration { machine_id: "mt32_2_03", control_rom: "ctrl_mt32_2_03", pcm_rom: "pcm_mt32" },
    MachineConfiguration { machine_id: "mt32_2_04", control_rom: "ctrl_mt32_2_04", pcm_rom: "pcm_mt32" },
    MachineConfiguration { machine_id: "mt32_2_06", control_rom: "ctrl_mt32_2_06", pcm_rom: "pcm_mt32" },
    MachineConfiguration { machine_id: "mt32_2_07", control_rom: "ctrl_mt32_2_07", pcm_rom: "pcm_mt32" },
    MachineConfiguration { machine_id: "cm32l_1_00", control_rom: "ctrl_cm32l_1_00", pcm_rom: "pcm_cm32l" },
    MachineConfiguration { machine_id: "cm32l_1_02", control_rom: "ctrl_cm32l_1_02", pcm_rom: "pcm_cm32l" },
    MachineConfiguration { machine_id: "cm32ln_1_00", control_rom: "ctrl_cm32ln_1_00", pcm_rom: "pcm_cm32l" },
];

/// Find a machine configuration by id.
pub fn find_machine_configuration(machine_id: &str) -> Option<&'static MachineConfiguration> {
    MACHINE_CONFIGURATIONS
        .iter()
        .find(|config| config.machine_id == machine_id)
}

/// Errors recognizing or combining ROM files.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RomError {
    #[error("ROM not recognised (size {size}, sha1 {sha1})")]
    UnknownRom { size: usize, sha1: String },
    #[error("ROM {0} is a partial image and needs its counterpart")]
    PartialRom(&'static str),
    #[error("ROMs {0} and {1} cannot be paired")]
    IncompatiblePair(&'static str, &'static str),
}

/// A ROM dump plus its digest.
///
/// The digest is normally computed from the data; callers that already know
/// the identity of synthesized content (such as test fixtures) may declare
/// it instead.
#[derive(Clone)]
pub struct RomFile {
    data: Vec<u8>,
    sha1: String,
}

impl RomFile {
    /// Wrap a dump, computing its SHA-1 digest.
    pub fn new(data: Vec<u8>) -> RomFile {
        let digest = Sha1::digest(&data);
        RomFile {
            data,
            sha1: hex::encode(digest),
        }
    }

    /// Wrap a dump under a declared digest without hashing the content.
    pub fn with_digest(data: Vec<u8>, sha1: &str) -> RomFile {
        RomFile {
            data,
            sha1: sha1.to_string(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sha1(&self) -> &str {
        &self.sha1
    }

    fn identify(&self) -> Result<&'static RomInfo, RomError> {
        RomInfo::find(self.data.len(), &self.sha1).ok_or_else(|| RomError::UnknownRom {
            size: self.data.len(),
            sha1: self.sha1.clone(),
        })
    }
}

/// A recognized, full ROM image ready for the synth.
pub struct RomImage {
    data: Vec<u8>,
    info: &'static RomInfo,
}

impl RomImage {
    /// Make an image from a single file, which must be a full dump.
    pub fn make(file: RomFile) -> Result<RomImage, RomError> {
        let info = file.identify()?;
        if info.pair_type != PairType::Full {
            return Err(RomError::PartialRom(info.short_name));
        }
        Ok(RomImage {
            data: file.data,
            info,
        })
    }

    /// Make an image from two partial dumps, merging them as their pair
    /// types dictate (interleave for muxed pairs, append for halves).
    pub fn make_pair(file1: RomFile, file2: RomFile) -> Result<RomImage, RomError> {
        let info1 = file1.identify()?;
        let info2 = file2.identify()?;
        if info1.pair_short_name != Some(info2.short_name) {
            return Err(RomError::IncompatiblePair(info1.short_name, info2.short_name));
        }
        let merged = match (info1.pair_type, info2.pair_type) {
            (PairType::Mux0, PairType::Mux1) => interleave(file1.data(), file2.data()),
            (PairType::Mux1, PairType::Mux0) => interleave(file2.data(), file1.data()),
            (PairType::FirstHalf, PairType::SecondHalf) => append(file1.data(), file2.data()),
            (PairType::SecondHalf, PairType::FirstHalf) => append(file2.data(), file1.data()),
            _ => return Err(RomError::IncompatiblePair(info1.short_name, info2.short_name)),
        };
        RomImage::make(RomFile::new(merged))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn info(&self) -> &'static RomInfo {
        self.info
    }
}

fn interleave(even: &[u8], odd: &[u8]) -> Vec<u8> {
    let mut merged = Vec::with_capacity(even.len() + odd.len());
    for (&e, &o) in even.iter().zip(odd.iter()) {
        merged.push(e);
        merged.push(o);
    }
    merged
}

fn append(low: &[u8], high: &[u8]) -> Vec<u8> {
    let mut merged = Vec::with_capacity(low.len() + high.len());
    merged.extend_from_slice(low);
    merged.extend_from_slice(high);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_finds_roms_by_identity() {
        let info = RomInfo::find(65536, "b083518fffb7f66b03c23b7eb4f868e62dc5a987").unwrap();
        assert_eq!(info.short_name, "ctrl_mt32_1_07");
        assert_eq!(info.rom_type, RomType::Control);
        assert!(RomInfo::find(65536, "0000000000000000000000000000000000000000").is_none());
    }

    #[test]
    fn every_partial_rom_references_a_known_counterpart() {
        for info in ROM_INFOS {
            match info.pair_type {
                PairType::Full => assert!(info.pair_short_name.is_none()),
                _ => {
                    let pair = info.pair_short_name.expect("partial ROM without pair");
                    assert!(RomInfo::find_by_short_name(pair).is_some());
                }
            }
        }
    }

    #[test]
    fn unknown_files_are_rejected() {
        let file = RomFile::new(vec![0u8; 123]);
        assert!(matches!(
            RomImage::make(file),
            Err(RomError::UnknownRom { size: 123, .. })
        ));
    }

    #[test]
    fn partial_files_cannot_be_used_alone() {
        let file = RomFile::with_digest(
            vec![0u8; 32768],
            "13f06b38f0d9e0fc050b6503ab777bb938603260",
        );
        assert_eq!(
            RomImage::make(file).err(),
            Some(RomError::PartialRom("ctrl_mt32_1_07_a"))
        );
    }

    #[test]
    fn interleave_restores_byte_order() {
        assert_eq!(interleave(&[0, 2, 4], &[1, 3, 5]), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(append(&[0, 1], &[2, 3]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn declared_digests_bypass_hashing() {
        let file = RomFile::with_digest(vec![0u8; 4], "abcd");
        assert_eq!(file.sha1(), "abcd");
        let hashed = RomFile::new(vec![]);
        assert_eq!(hashed.sha1(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}
