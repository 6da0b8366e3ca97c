//! Synthetic PRG images in the message layout, for tests.

use crate::codec::encode;
use crate::rom::{write_le, write_string, RomLayout};

pub(crate) const FIXTURE_PRG_LEN: usize = 0x30000;
/// Every fixture part lives in this bank.
pub(crate) const FIXTURE_BANK: u8 = 0x15;
const STRINGS_START: usize = 0x29000;

pub(crate) enum Slot {
    Message(Vec<u8>),
    /// Shares the address of slot `n` of the same part.
    Alias(usize),
    Null,
}

impl Slot {
    pub(crate) fn text(text: &str) -> Self {
        Slot::Message(encode(text, &[]).unwrap().bytes)
    }
}

#[derive(Default)]
pub(crate) struct FixtureRom {
    common: Vec<String>,
    uncommon: Vec<String>,
    persons: Vec<String>,
    items: Vec<String>,
    parts: Vec<Vec<Slot>>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl FixtureRom {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn common(mut self, words: &[&str]) -> Self {
        self.common = owned(words);
        self
    }

    pub(crate) fn uncommon(mut self, words: &[&str]) -> Self {
        self.uncommon = owned(words);
        self
    }

    pub(crate) fn persons(mut self, words: &[&str]) -> Self {
        self.persons = owned(words);
        self
    }

    pub(crate) fn items(mut self, words: &[&str]) -> Self {
        self.items = owned(words);
        self
    }

    pub(crate) fn part(mut self, slots: Vec<Slot>) -> Self {
        self.parts.push(slots);
        self
    }

    /// Default layout trimmed to the parts this fixture defines.
    pub(crate) fn layout(&self) -> RomLayout {
        RomLayout {
            part_count: self.parts.len().max(1),
            last_part_len: self.parts.last().map_or(0, Vec::len),
            ..RomLayout::default()
        }
    }

    pub(crate) fn build(&self, layout: &RomLayout) -> Vec<u8> {
        let mut prg = vec![0u8; FIXTURE_PRG_LEN];
        let offset = layout.word_offset;
        let ptr = |addr: usize| (addr - offset) as u16;

        let padded = |words: &[String], count: usize| {
            let mut words = words.to_vec();
            words.resize(count.max(words.len()), String::new());
            words
        };
        let tables = [
            (padded(&self.common, layout.common_word_count), vec![layout.common_words_ref]),
            (self.uncommon.clone(), vec![layout.uncommon_words_ref]),
            (padded(&self.persons, layout.person_name_count), vec![layout.person_names_ref]),
            (padded(&self.items, layout.item_name_count), layout.item_names_refs.clone()),
        ];

        let mut a = layout.word_tables_start;
        let mut d = STRINGS_START;
        for (words, refs) in &tables {
            for &r in refs {
                write_le(&mut prg, r, ptr(a)).unwrap();
                write_le(&mut prg, r + 5, ptr(a + 1)).unwrap();
            }
            for word in words {
                if word.is_empty() {
                    write_le(&mut prg, a, 0).unwrap();
                } else {
                    write_le(&mut prg, a, ptr(d)).unwrap();
                    d = write_string(&mut prg, d, word).unwrap();
                }
                a += 2;
            }
        }

        for i in 0..layout.bank_count {
            prg[layout.banks_table + i] = FIXTURE_BANK;
        }

        let base = layout.bank_base(FIXTURE_BANK);
        let delta = layout.bank_delta(FIXTURE_BANK).unwrap();
        let mut table = layout.message_tables_start;
        let mut next = base;
        for (p, slots) in self.parts.iter().enumerate() {
            write_le(&mut prg, layout.parts_table + 2 * p, ptr(table)).unwrap();
            let mut addrs = Vec::with_capacity(slots.len());
            for slot in slots {
                let addr = match slot {
                    Slot::Message(bytes) => {
                        prg[next..next + bytes.len()].copy_from_slice(bytes);
                        next += bytes.len();
                        next - bytes.len()
                    }
                    Slot::Alias(n) => addrs[*n],
                    Slot::Null => 0,
                };
                let value = if addr == 0 { 0 } else { (addr - delta) as u16 };
                write_le(&mut prg, table, value).unwrap();
                table += 2;
                addrs.push(addr);
            }
        }
        prg
    }
}
