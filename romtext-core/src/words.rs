use crate::rom::{read_le, read_string, RomLayout};
use crate::Result;

pub const UNCOMMON_GROUP: u8 = 5;
pub const PERSON_GROUP: u8 = 6;
pub const ITEM_GROUP: u8 = 7;

/// The fixed vocabularies referenced by message bytes.
///
/// `common` backs the one-byte codes `$80..=$ff`; the other three are the
/// groups selected by the two-byte codes `[5] [6] [7]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordBanks {
    pub common: Vec<String>,
    pub uncommon: Vec<String>,
    pub person_names: Vec<String>,
    pub item_names: Vec<String>,
}

impl WordBanks {
    pub fn load(prg: &[u8], layout: &RomLayout) -> Result<Self> {
        let base = |reference: usize| -> Result<usize> {
            Ok(read_le(prg, reference)? as usize + layout.word_offset)
        };

        let common_base = base(layout.common_words_ref)?;
        let uncommon_base = base(layout.uncommon_words_ref)?;
        let person_base = base(layout.person_names_ref)?;
        let item_ref = layout.item_names_refs.first().copied().ok_or_else(|| {
            crate::RomTextError::Config("layout names no item-name table reference".to_string())
        })?;
        let item_base = base(item_ref)?;

        // The uncommon table has no stored length; it runs up to the
        // person-name table, which always follows it.
        let uncommon_count = person_base.saturating_sub(uncommon_base) / 2;

        Ok(Self {
            common: read_table(prg, common_base, layout.common_word_count, layout)?,
            uncommon: read_table(prg, uncommon_base, uncommon_count, layout)?,
            person_names: read_table(prg, person_base, layout.person_name_count, layout)?,
            item_names: read_table(prg, item_base, layout.item_name_count, layout)?,
        })
    }

    /// Word for a one-byte code `$80..=$ff`.
    pub fn common_word(&self, code: u8) -> Option<&str> {
        let index = code.checked_sub(0x80)? as usize;
        self.common.get(index).map(String::as_str)
    }

    pub fn group(&self, group: u8) -> Option<&[String]> {
        match group {
            UNCOMMON_GROUP => Some(&self.uncommon),
            PERSON_GROUP => Some(&self.person_names),
            ITEM_GROUP => Some(&self.item_names),
            _ => None,
        }
    }

    pub fn extra_word(&self, group: u8, index: u8) -> Option<&str> {
        self.group(group)?.get(index as usize).map(String::as_str)
    }

    pub fn person_name(&self, index: u8) -> Option<&str> {
        self.extra_word(PERSON_GROUP, index)
    }

    pub fn item_name(&self, index: u8) -> Option<&str> {
        self.extra_word(ITEM_GROUP, index)
    }

    /// Widest item name; the `[:ITEM:]` placeholder is budgeted at this width.
    pub fn max_item_name_len(&self) -> usize {
        self.item_names.iter().map(String::len).max().unwrap_or(0)
    }
}

fn read_table(prg: &[u8], base: usize, count: usize, layout: &RomLayout) -> Result<Vec<String>> {
    let mut words = Vec::with_capacity(count);
    for i in 0..count {
        let ptr = read_le(prg, base + 2 * i)? as usize;
        if ptr == 0 {
            words.push(String::new());
        } else {
            words.push(read_string(prg, ptr + layout.word_offset)?);
        }
    }
    Ok(words)
}
