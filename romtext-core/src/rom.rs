use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::{Result, RomTextError};

const INES_MAGIC: &[u8; 4] = b"NES\x1a";
const INES_HEADER_LEN: usize = 0x10;
const PRG_UNIT: usize = 0x4000;
const CHR_UNIT: usize = 0x2000;

/// Fixed addresses and sizes of the message data in the PRG image.
///
/// `Default` is the layout of the shipped cartridge image. Every address is
/// a PRG offset (iNES header excluded). Word and table pointers are stored
/// as 16-bit values relative to `word_offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RomLayout {
    pub word_offset: usize,
    pub common_words_ref: usize,
    pub uncommon_words_ref: usize,
    pub person_names_ref: usize,
    /// Code locations that load the item-name table; all are repointed on write.
    pub item_names_refs: Vec<usize>,
    pub common_word_count: usize,
    pub person_name_count: usize,
    pub item_name_count: usize,
    pub banks_table: usize,
    pub bank_count: usize,
    pub parts_table: usize,
    pub part_count: usize,
    /// The last part has no successor to measure against.
    pub last_part_len: usize,
    pub bank_window_org: usize,
    pub bank_size: usize,
    pub message_tables_start: usize,
    pub word_tables_start: usize,
    /// Free `[start, end)` ranges the writer may place message bytes into.
    pub message_space: Vec<(usize, usize)>,
}

impl Default for RomLayout {
    fn default() -> Self {
        Self {
            word_offset: 0x20000,
            common_words_ref: 0x28704,
            uncommon_words_ref: 0x2868a,
            person_names_ref: 0x286d5,
            item_names_refs: vec![0x286e9, 0x28789],
            common_word_count: 0x80,
            person_name_count: 36,
            item_name_count: 74,
            banks_table: 0x283fe,
            bank_count: 0x24,
            parts_table: 0x28422,
            part_count: 0x22,
            last_part_len: 3,
            bank_window_org: 0xa000,
            bank_size: 0x2000,
            message_tables_start: 0x28000,
            word_tables_start: 0x288a5,
            message_space: vec![(0x2a000, 0x2fc00)],
        }
    }
}

impl RomLayout {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// PRG address of the first byte of a bank's window.
    pub fn bank_base(&self, bank: u8) -> usize {
        bank as usize * self.bank_size
    }

    /// Difference between a PRG address in `bank` and the CPU address the
    /// message tables store for it.
    pub fn bank_delta(&self, bank: u8) -> Result<usize> {
        self.bank_base(bank)
            .checked_sub(self.bank_window_org)
            .ok_or_else(|| {
                RomTextError::Config(format!(
                    "bank ${:02x} lies below the message window origin",
                    bank
                ))
            })
    }
}

/// A cartridge image split into header, PRG and CHR.
pub struct Rom {
    header: Vec<u8>,
    prg: Vec<u8>,
    chr: Vec<u8>,
}

impl Rom {
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        if raw.len() < INES_HEADER_LEN || &raw[0..4] != INES_MAGIC {
            return Ok(Self {
                header: Vec::new(),
                prg: raw,
                chr: Vec::new(),
            });
        }

        let prg_len = raw[4] as usize * PRG_UNIT;
        let chr_len = raw[5] as usize * CHR_UNIT;
        // Bit 2 of flags 6 marks a 512-byte trainer between header and PRG.
        let trainer = if raw[6] & 0x04 != 0 { 0x200 } else { 0 };
        let header_len = INES_HEADER_LEN + trainer;
        if header_len + prg_len > raw.len() {
            return Err(RomTextError::Config(format!(
                "ROM header declares {:#x} PRG bytes but the image holds {:#x}",
                prg_len,
                raw.len() - header_len
            )));
        }

        let chr_end = (header_len + prg_len + chr_len).min(raw.len());
        Ok(Self {
            header: raw[..header_len].to_vec(),
            prg: raw[header_len..header_len + prg_len].to_vec(),
            chr: raw[header_len + prg_len..chr_end].to_vec(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let raw = if is_gzip_path(path) {
            let mut decoder = GzDecoder::new(data.as_slice());
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            out
        } else {
            data
        };
        Self::from_bytes(raw)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.len() + self.prg.len() + self.chr.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.prg);
        out.extend_from_slice(&self.chr);
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes = self.to_bytes();
        if is_gzip_path(path) {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(&bytes)?;
            fs::write(path, encoder.finish()?)?;
        } else {
            fs::write(path, bytes)?;
        }
        Ok(())
    }

    pub fn has_header(&self) -> bool {
        !self.header.is_empty()
    }

    pub fn prg(&self) -> &[u8] {
        &self.prg
    }

    pub fn prg_mut(&mut self) -> &mut [u8] {
        &mut self.prg
    }
}

fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("gz"))
}

pub fn read_le(data: &[u8], at: usize) -> Result<u16> {
    match data.get(at..at + 2) {
        Some(b) => Ok(u16::from_le_bytes([b[0], b[1]])),
        None => Err(RomTextError::OutOfBounds(at)),
    }
}

pub fn write_le(data: &mut [u8], at: usize, value: u16) -> Result<()> {
    match data.get_mut(at..at + 2) {
        Some(b) => {
            b.copy_from_slice(&value.to_le_bytes());
            Ok(())
        }
        None => Err(RomTextError::OutOfBounds(at)),
    }
}

/// Reads a NUL-terminated string. Bytes map one-to-one onto chars.
pub fn read_string(data: &[u8], at: usize) -> Result<String> {
    let tail = data.get(at..).ok_or(RomTextError::OutOfBounds(at))?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(RomTextError::OutOfBounds(data.len()))?;
    Ok(tail[..len].iter().map(|&b| b as char).collect())
}

/// Writes `s` followed by a NUL terminator and returns the address just past it.
pub fn write_string(data: &mut [u8], at: usize, s: &str) -> Result<usize> {
    let bytes = s.as_bytes();
    let end = at + bytes.len() + 1;
    let dest = data.get_mut(at..end).ok_or(RomTextError::OutOfBounds(at))?;
    dest[..bytes.len()].copy_from_slice(bytes);
    dest[bytes.len()] = 0;
    Ok(end)
}

/// Converts a PRG address to the 16-bit pointer stored for it.
pub(crate) fn pointer_to(addr: usize, offset: usize) -> Result<u16> {
    addr.checked_sub(offset)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or(RomTextError::OutOfBounds(addr))
}
