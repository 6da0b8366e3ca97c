use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::abbrev::{self, Abbreviation, CorpusEntry, ONE_BYTE_CODES};
use crate::codec::{decode_at, encode};
use crate::reflow::{check_text, fix_text};
use crate::rom::{pointer_to, read_le, write_le, write_string, RomLayout};
use crate::usage::{self, EntityRefs, MessageId, Usage};
use crate::words::WordBanks;
use crate::writer::{Ticket, Writer};
use crate::{Result, RomTextError};

/// One slot of a part's address table and the text it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub part: u8,
    pub id: u16,
    /// PRG address of the first byte; 0 for a null slot.
    pub addr: usize,
    /// PRG address of the table cell holding this slot's pointer.
    pub pointer: usize,
    pub text: String,
    pub bytes: Vec<u8>,
    /// Trace of the last encoding, empty until written.
    pub hex: String,
}

impl Message {
    pub fn mid(&self) -> MessageId {
        MessageId::new(self.part, self.id)
    }

    pub fn check_text(&self, words: &WordBanks) -> bool {
        check_text(&self.text, words)
    }

    /// Re-wraps the text if it overflows its box. Returns whether it changed.
    pub fn fix_text(&mut self, words: &WordBanks) -> bool {
        match fix_text(&self.text, words) {
            Cow::Borrowed(_) => false,
            Cow::Owned(text) => {
                self.text = text;
                true
            }
        }
    }
}

/// A slot as written to a text dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpEntry {
    pub mid: MessageId,
    pub addr: usize,
    pub text: String,
    pub usages: Vec<String>,
}

/// Replacement texts keyed by slot.
pub type Edits = BTreeMap<MessageId, String>;

pub fn load_edits(path: &Path) -> Result<Edits> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Every message in the image, grouped by part.
pub struct Messages {
    layout: RomLayout,
    words: WordBanks,
    banks: Vec<u8>,
    parts: Vec<Vec<Message>>,
}

impl Messages {
    pub fn load(prg: &[u8], layout: &RomLayout) -> Result<Self> {
        let words = WordBanks::load(prg, layout)?;
        let banks = prg
            .get(layout.banks_table..layout.banks_table + layout.bank_count)
            .ok_or(RomTextError::OutOfBounds(layout.banks_table))?
            .to_vec();

        let starts = (0..layout.part_count)
            .map(|p| -> Result<usize> {
                Ok(read_le(prg, layout.parts_table + 2 * p)? as usize + layout.word_offset)
            })
            .collect::<Result<Vec<usize>>>()?;

        let mut parts = Vec::with_capacity(starts.len());
        for (p, &start) in starts.iter().enumerate() {
            let part = u8::try_from(p)
                .map_err(|_| RomTextError::Config(format!("part {} is beyond $ff", p)))?;
            let count = match starts.get(p + 1) {
                None => layout.last_part_len,
                Some(&next) => next.checked_sub(start).map(|n| n / 2).ok_or_else(|| {
                    RomTextError::Config(format!("address table of part ${:02x} runs backwards", p))
                })?,
            };
            let delta = layout.bank_delta(bank_of(&banks, p)?)?;

            let mut messages = Vec::with_capacity(count);
            for i in 0..count {
                let id = u16::try_from(i)
                    .map_err(|_| RomTextError::Config(format!("part ${:02x} has too many slots", p)))?;
                let pointer = start + 2 * i;
                let raw = read_le(prg, pointer)? as usize;
                let addr = if raw == 0 { 0 } else { raw + delta };
                let mid = MessageId::new(part, id);
                let decoded = decode_at(prg, addr, &words)
                    .map_err(|source| RomTextError::Codec { mid, source })?;
                messages.push(Message {
                    part,
                    id,
                    addr,
                    pointer,
                    text: decoded.text,
                    bytes: decoded.bytes,
                    hex: String::new(),
                });
            }
            parts.push(messages);
        }

        let total: usize = parts.iter().map(Vec::len).sum();
        info!(parts = parts.len(), messages = total, "loaded messages");
        Ok(Self {
            layout: layout.clone(),
            words,
            banks,
            parts,
        })
    }

    pub fn words(&self) -> &WordBanks {
        &self.words
    }

    pub fn parts(&self) -> &[Vec<Message>] {
        &self.parts
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.parts.get(id.part as usize)?.get(id.index as usize)
    }

    pub fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.parts.get_mut(id.part as usize)?.get_mut(id.index as usize)
    }

    /// Walks the parts in order, keeping only slots in `used` when given.
    pub fn messages<'a>(&'a self, used: Option<&'a Usage>) -> impl Iterator<Item = &'a Message> + 'a {
        self.parts
            .iter()
            .flatten()
            .filter(move |m| used.map_or(true, |u| u.contains(&m.mid())))
    }

    pub fn ids(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.messages(None).map(Message::mid)
    }

    /// First slot nothing references.
    pub fn alloc(&self, usage: &Usage) -> Option<MessageId> {
        self.ids().find(|id| !usage.contains(id))
    }

    /// Live slots per `refs`; without references every non-null slot is live.
    pub fn uses(&self, refs: Option<&EntityRefs>) -> Usage {
        match refs {
            Some(refs) => usage::collect(refs),
            None => Usage::all(self.messages(None).filter(|m| m.addr != 0).map(Message::mid)),
        }
    }

    pub fn build_abbreviation_table(&self, usage: &Usage) -> Vec<Abbreviation> {
        let corpus: Vec<CorpusEntry<'_>> = self
            .messages(Some(usage))
            .map(|m| CorpusEntry {
                mid: m.mid(),
                addr: m.addr,
                text: &m.text,
            })
            .collect();
        abbrev::build_abbreviation_table(&corpus)
    }

    /// Re-wraps every live message that overflows its box.
    pub fn fix_all(&mut self, usage: &Usage) -> usize {
        let mut fixed = 0;
        for m in self.parts.iter_mut().flatten() {
            if usage.contains(&m.mid()) && m.fix_text(&self.words) {
                debug!(mid = %m.mid(), "reflowed text");
                fixed += 1;
            }
        }
        fixed
    }

    pub fn dump(&self, usage: &Usage) -> Vec<DumpEntry> {
        self.messages(None)
            .map(|m| DumpEntry {
                mid: m.mid(),
                addr: m.addr,
                text: m.text.clone(),
                usages: usage
                    .labels(&m.mid())
                    .map(|l| l.iter().cloned().collect())
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Replaces slot texts. Every edit must name an existing slot.
    pub fn apply_edits(&mut self, edits: &Edits) -> Result<usize> {
        for (&id, text) in edits {
            match self.get_mut(id) {
                Some(m) => m.text = text.clone(),
                None => {
                    warn!(mid = %id, "edit names a slot that does not exist");
                    return Err(RomTextError::Config(format!("no message slot {}", id)));
                }
            }
        }
        Ok(edits.len())
    }

    /// Compresses and writes every live message, the word tables and the
    /// address tables. Dead slots become null pointers.
    ///
    /// On success the in-memory word banks and addresses describe the
    /// written image. On failure the image is left half-written.
    pub fn write(&mut self, writer: &mut Writer<'_>, usage: &Usage) -> Result<Vec<Abbreviation>> {
        let table = self.build_abbreviation_table(usage);
        let layout = self.layout.clone();
        self.write_word_tables(writer.rom_mut(), &table)?;

        let mut by_mid: HashMap<MessageId, Vec<&Abbreviation>> = HashMap::new();
        for abbr in &table {
            for &mid in &abbr.mids {
                by_mid.entry(mid).or_default().push(abbr);
            }
        }
        for list in by_mid.values_mut() {
            list.sort_by(|a, b| b.text.len().cmp(&a.text.len()));
        }

        let mut tickets: Vec<Vec<Option<Ticket>>> = Vec::with_capacity(self.parts.len());
        let mut live = 0;
        for (p, part) in self.parts.iter_mut().enumerate() {
            let base = layout.bank_base(bank_of(&self.banks, p)?);
            let mut part_tickets = vec![None; part.len()];
            for (m, ticket) in part.iter_mut().zip(&mut part_tickets) {
                let mid = m.mid();
                if !usage.contains(&mid) {
                    continue;
                }
                let abbrs = by_mid.get(&mid).map_or(&[][..], Vec::as_slice);
                let encoded =
                    encode(&m.text, abbrs).map_err(|source| RomTextError::Codec { mid, source })?;
                m.hex = encoded.hex;
                m.bytes = encoded.bytes;
                *ticket = Some(writer.write(
                    m.bytes.clone(),
                    base,
                    base + layout.bank_size,
                    format!("Message {}", mid),
                ));
                live += 1;
            }
            tickets.push(part_tickets);
        }

        // Tables may only be assembled once every placement is known.
        writer.commit()?;

        let total: usize = self.parts.iter().map(Vec::len).sum();
        let end = layout.message_tables_start + 2 * total;
        if layout.message_tables_start < layout.banks_table && end > layout.banks_table {
            return Err(RomTextError::Config(format!(
                "{} message pointers overflow into the bank table",
                total
            )));
        }

        let mut pos = layout.message_tables_start;
        for (p, part) in self.parts.iter_mut().enumerate() {
            let delta = layout.bank_delta(bank_of(&self.banks, p)?)?;
            let table_start = pos;
            for (m, ticket) in part.iter_mut().zip(&tickets[p]) {
                let value = match ticket {
                    Some(t) => {
                        let addr = writer
                            .address(*t)
                            .ok_or_else(|| RomTextError::Config(format!("{} was never placed", m.mid())))?;
                        m.addr = addr;
                        pointer_to(addr, delta)?
                    }
                    None => 0,
                };
                debug!(mid = %m.mid(), addr = %format!("${:05x}", m.addr), live = ticket.is_some(), "address table entry");
                write_le(writer.rom_mut(), pos, value)?;
                m.pointer = pos;
                pos += 2;
            }
            write_le(
                writer.rom_mut(),
                layout.parts_table + 2 * p,
                pointer_to(table_start, layout.word_offset)?,
            )?;
        }

        let rom = writer.rom_mut();
        let banks = rom
            .get_mut(layout.banks_table..layout.banks_table + self.banks.len())
            .ok_or(RomTextError::OutOfBounds(layout.banks_table))?;
        banks.copy_from_slice(&self.banks);

        let (common, uncommon) = table.split_at(table.len().min(ONE_BYTE_CODES));
        self.words.common = common.iter().map(|a| a.text.clone()).collect();
        self.words.uncommon = uncommon.iter().map(|a| a.text.clone()).collect();

        info!(
            live,
            dead = total - live,
            abbreviations = table.len(),
            free = writer.free(),
            "wrote messages"
        );
        Ok(table)
    }

    /// Abbreviations, then person names, then item names: pointers back to
    /// back from the table start and the strings after them.
    fn write_word_tables(&self, rom: &mut [u8], table: &[Abbreviation]) -> Result<()> {
        let layout = &self.layout;
        let offset = layout.word_offset;
        let coderef = |rom: &mut [u8], loc: usize, addr: usize| -> Result<()> {
            write_le(rom, loc, pointer_to(addr, offset)?)?;
            write_le(rom, loc + 5, pointer_to(addr + 1, offset)?)
        };

        let mut a = layout.word_tables_start;
        let mut d = a + 2 * (table.len() + self.words.person_names.len() + self.words.item_names.len());
        let mut put = |rom: &mut [u8], a: &mut usize, s: &str| -> Result<()> {
            write_le(rom, *a, pointer_to(d, offset)?)?;
            *a += 2;
            d = write_string(rom, d, s)?;
            Ok(())
        };

        coderef(rom, layout.common_words_ref, a)?;
        for (i, abbr) in table.iter().enumerate() {
            if i == ONE_BYTE_CODES {
                coderef(rom, layout.uncommon_words_ref, a)?;
            }
            put(rom, &mut a, &abbr.text)?;
        }
        if table.len() <= ONE_BYTE_CODES {
            coderef(rom, layout.uncommon_words_ref, a)?;
        }

        coderef(rom, layout.person_names_ref, a)?;
        for name in &self.words.person_names {
            put(rom, &mut a, name)?;
        }
        for &loc in &layout.item_names_refs {
            coderef(rom, loc, a)?;
        }
        for name in &self.words.item_names {
            put(rom, &mut a, name)?;
        }
        Ok(())
    }
}

fn bank_of(banks: &[u8], part: usize) -> Result<u8> {
    banks
        .get(part)
        .copied()
        .ok_or_else(|| RomTextError::Config(format!("part ${:02x} has no bank", part)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FixtureRom, Slot};
    use crate::usage::{NpcRef, TriggerRef};

    fn fixture() -> FixtureRom {
        FixtureRom::new()
            .common(&["the", "you"])
            .uncommon(&["Mesia"])
            .persons(&["Zebu", "Tornel"])
            .items(&["Sword of Wind", "Medical Herb"])
            .part(vec![
                Slot::Null,
                Slot::Message(vec![0x01, 0x80, b'c', b'a', b't', b'.', 0x00]),
                Slot::text("Hello there, hello there."),
                Slot::Alias(2),
                Slot::Null,
            ])
            .part(vec![
                Slot::text("An orphan quokka zigzags."),
                Slot::text("{01:Tornel} says hello there."),
            ])
    }

    fn mid(s: &str) -> MessageId {
        s.parse().unwrap()
    }

    fn refs() -> EntityRefs {
        EntityRefs {
            triggers: vec![
                TriggerRef { id: 0, message: mid("00:00") },
                TriggerRef { id: 1, message: mid("00:01") },
                TriggerRef { id: 2, message: mid("00:02") },
                TriggerRef { id: 3, message: mid("00:03") },
            ],
            npcs: vec![NpcRef {
                id: 0x12,
                global_dialogs: vec![mid("01:01")],
                local_dialogs: Vec::new(),
            }],
            ..EntityRefs::default()
        }
    }

    fn load() -> (Vec<u8>, RomLayout, Messages) {
        let fixture = fixture();
        let layout = fixture.layout();
        let prg = fixture.build(&layout);
        let messages = Messages::load(&prg, &layout).unwrap();
        (prg, layout, messages)
    }

    #[test]
    fn loads_texts_aliases_and_null_slots() {
        let (_, _, messages) = load();
        assert_eq!(messages.parts().len(), 2);
        assert_eq!(messages.get(mid("00:01")).unwrap().text, "the cat.");
        assert_eq!(messages.get(mid("01:01")).unwrap().text, "{01:Tornel} says hello there.");

        let shared = messages.get(mid("00:02")).unwrap();
        let alias = messages.get(mid("00:03")).unwrap();
        assert_eq!(shared.addr, alias.addr);
        assert_eq!(alias.text, "Hello there, hello there.");

        for null in ["00:00", "00:04"] {
            let null = messages.get(mid(null)).unwrap();
            assert_eq!((null.addr, null.text.as_str()), (0, ""));
        }
        assert!(messages.get(mid("01:02")).is_none());
    }

    #[test]
    fn traversal_is_filtered_and_restartable() {
        let (_, _, messages) = load();
        let usage = messages.uses(Some(&refs()));
        let live: Vec<String> = messages.messages(Some(&usage)).map(|m| m.mid().to_string()).collect();
        assert_eq!(live, vec!["00:01", "00:02", "00:03", "01:01"]);
        assert_eq!(messages.messages(Some(&usage)).count(), 4);
        assert_eq!(messages.messages(None).count(), 7);
        assert_eq!(messages.alloc(&usage), Some(mid("00:00")));
    }

    #[test]
    fn without_refs_every_non_null_slot_is_live() {
        let (_, _, messages) = load();
        let usage = messages.uses(None);
        assert_eq!(usage.len(), 5);
        assert!(!usage.contains(&mid("00:00")));
        assert!(!usage.contains(&mid("00:04")));
        assert_eq!(messages.alloc(&usage), Some(mid("00:00")));
    }

    #[test]
    fn null_slots_stay_null_when_written_without_refs() {
        let (mut prg, layout, mut messages) = load();
        let usage = messages.uses(None);
        write(&mut prg, &layout, &mut messages, &usage);

        let reloaded = Messages::load(&prg, &layout).unwrap();
        assert_eq!(reloaded.get(mid("00:00")).unwrap().addr, 0);
        assert_eq!(reloaded.get(mid("00:04")).unwrap().addr, 0);
        assert_eq!(reloaded.get(mid("01:00")).unwrap().text, "An orphan quokka zigzags.");
    }

    #[test]
    fn dump_and_edits() {
        let (_, _, mut messages) = load();
        let usage = messages.uses(Some(&refs()));
        let dump = messages.dump(&usage);
        assert_eq!(dump.len(), 7);
        assert!(dump[0].usages.is_empty());
        assert_eq!(dump[1].usages, vec!["Trigger $01"]);
        assert_eq!(dump[5].mid, mid("01:00"));
        assert!(dump[5].usages.is_empty());

        let edits: Edits = serde_json::from_str(r#"{"00:01": "the dog."}"#).unwrap();
        assert_eq!(messages.apply_edits(&edits).unwrap(), 1);
        assert_eq!(messages.get(mid("00:01")).unwrap().text, "the dog.");

        let bad: Edits = serde_json::from_str(r#"{"05:00": "nobody"}"#).unwrap();
        assert!(matches!(messages.apply_edits(&bad), Err(RomTextError::Config(_))));
    }

    #[test]
    fn fix_all_reflows_live_overflowing_text() {
        let (_, _, mut messages) = load();
        let usage = messages.uses(Some(&refs()));
        let long = "This sentence is far too long to fit on a single line of the box.";
        messages.get_mut(mid("00:01")).unwrap().text = long.to_string();
        messages.get_mut(mid("01:00")).unwrap().text = long.to_string();

        assert_eq!(messages.fix_all(&usage), 1);
        let words = messages.words().clone();
        assert!(messages.get(mid("00:01")).unwrap().check_text(&words));
        // Dead slots are left alone.
        assert_eq!(messages.get(mid("01:00")).unwrap().text, long);
    }

    fn write(prg: &mut [u8], layout: &RomLayout, messages: &mut Messages, usage: &Usage) -> Vec<Abbreviation> {
        let mut writer = Writer::new(prg);
        for &(start, end) in &layout.message_space {
            writer.alloc(start, end).unwrap();
        }
        messages.write(&mut writer, usage).unwrap()
    }

    #[test]
    fn written_image_reloads_to_the_same_texts() {
        let (mut prg, layout, mut messages) = load();
        let usage = messages.uses(Some(&refs()));
        let before: Vec<(MessageId, String)> = messages
            .messages(Some(&usage))
            .map(|m| (m.mid(), m.text.clone()))
            .collect();

        let table = write(&mut prg, &layout, &mut messages, &usage);
        assert!(!table.is_empty());

        let reloaded = Messages::load(&prg, &layout).unwrap();
        for (id, text) in &before {
            let m = reloaded.get(*id).unwrap();
            assert_eq!(&m.text, text, "{}", id);
            assert_eq!(m.addr, messages.get(*id).unwrap().addr);
        }
        assert_eq!(reloaded.words().person_names, messages.words().person_names);
        assert_eq!(reloaded.words().item_names, messages.words().item_names);
        assert_eq!(&reloaded.words().common[..table.len()], &messages.words().common[..]);
        assert!(messages.get(mid("00:01")).unwrap().hex.starts_with("[01]"));
    }

    #[test]
    fn orphans_are_neither_compressed_nor_written() {
        let (mut prg, layout, mut messages) = load();
        let usage = messages.uses(Some(&refs()));
        let table = write(&mut prg, &layout, &mut messages, &usage);

        let orphan = mid("01:00");
        for abbr in &table {
            assert!(!abbr.mids.contains(&orphan), "{:?}", abbr);
            for word in ["orphan", "quokka", "zigzag"] {
                assert!(!abbr.text.contains(word), "{:?}", abbr);
            }
        }

        let reloaded = Messages::load(&prg, &layout).unwrap();
        assert_eq!(reloaded.get(orphan).unwrap().addr, 0);
        assert_eq!(reloaded.get(orphan).unwrap().text, "");
        assert_eq!(reloaded.get(mid("00:00")).unwrap().addr, 0);
        assert_eq!(reloaded.get(mid("00:04")).unwrap().addr, 0);
        assert_eq!(reloaded.parts()[0].len(), 5);
        assert_eq!(reloaded.parts()[1].len(), 2);
    }

    #[test]
    fn aliased_slots_share_abbreviations_and_bytes() {
        let (mut prg, layout, mut messages) = load();
        let usage = messages.uses(Some(&refs()));
        let table = write(&mut prg, &layout, &mut messages, &usage);

        let (a, b) = (mid("00:02"), mid("00:03"));
        assert!(table.iter().any(|abbr| abbr.mids.contains(&a)));
        for abbr in &table {
            assert_eq!(abbr.mids.contains(&a), abbr.mids.contains(&b), "{:?}", abbr);
        }
        assert_eq!(messages.get(a).unwrap().addr, messages.get(b).unwrap().addr);
    }

    #[test]
    fn bad_markup_aborts_the_write() {
        let (mut prg, layout, mut messages) = load();
        let usage = messages.uses(Some(&refs()));
        messages.get_mut(mid("00:01")).unwrap().text = "broken [12".to_string();
        let mut writer = Writer::new(&mut prg);
        writer.alloc(layout.message_space[0].0, layout.message_space[0].1).unwrap();
        let err = messages.write(&mut writer, &usage).unwrap_err();
        assert!(matches!(err, RomTextError::Codec { mid: m, .. } if m == mid("00:01")));
    }
}
