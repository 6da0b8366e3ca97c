use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::{debug, info};

use crate::codec::is_punctuation;
use crate::usage::MessageId;
use crate::words::UNCOMMON_GROUP;

/// Upper bound on `Σ(len + 3)` over the serialized table.
pub const MAX_TABLE_LENGTH: usize = 1250;

/// Codes `$80..=$ff` are one byte; later entries go through group 5.
pub const ONE_BYTE_CODES: usize = 0x80;
const MAX_CODES: usize = ONE_BYTE_CODES + 0x100;

/// A dictionary entry substituted into message bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Abbreviation {
    pub bytes: Vec<u8>,
    /// Every slot the text occurs in, aliases included.
    pub mids: BTreeSet<MessageId>,
    pub text: String,
}

pub fn code_for(index: usize) -> Vec<u8> {
    if index < ONE_BYTE_CODES {
        vec![0x80 + index as u8]
    } else {
        vec![UNCOMMON_GROUP, (index - ONE_BYTE_CODES) as u8]
    }
}

/// Serialized size of the table: one pointer, the string and its terminator
/// per entry.
pub fn table_length(table: &[Abbreviation]) -> usize {
    table.iter().map(|a| a.text.len() + 3).sum()
}

/// One live message as seen by the builder.
#[derive(Debug, Clone, Copy)]
pub struct CorpusEntry<'a> {
    pub mid: MessageId,
    pub addr: usize,
    pub text: &'a str,
}

struct Canonical {
    mid: MessageId,
    aliases: Vec<MessageId>,
}

struct Word {
    text: String,
    /// Boundary character joining this word to the next when a suffix may
    /// run across it.
    chain: Option<char>,
    /// Encoded cost, including an implied trailing space.
    bytes: usize,
    used: i64,
    suffixes: BTreeSet<usize>,
    message: usize,
}

struct Suffix {
    text: String,
    chains: usize,
    missing: usize,
    saving: i64,
    /// Originating word indices, highest first.
    origins: Vec<usize>,
}

fn is_boundary(c: char) -> bool {
    c.is_ascii() && is_punctuation(c as u8)
}

fn tokenize(text: &str, message: usize, words: &mut Vec<Word>) {
    let chars: Vec<char> = text.chars().collect();
    let mut letters = String::new();
    let mut i = 0;
    while i <= chars.len() {
        let c = chars.get(i).copied();
        let closer = match c {
            Some('{') => Some('}'),
            Some('[') => Some(']'),
            _ => None,
        };
        if c.is_some() && closer.is_none() && !c.map_or(false, is_boundary) {
            letters.extend(c);
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).copied();
        if let Some(close) = closer {
            if let Some(p) = chars[i..].iter().position(|&x| x == close) {
                i += p;
            }
        }
        if !letters.is_empty() {
            // A chain never runs into markup, so it always lands on the
            // next word of the same message.
            let chain = match (c, next) {
                (Some(b @ (' ' | '\'')), Some(n)) if !is_boundary(n) && n != '{' && n != '[' => {
                    Some(b)
                }
                _ => None,
            };
            let text = std::mem::take(&mut letters);
            let bytes = text.chars().count() + usize::from(c == Some(' '));
            words.push(Word {
                text,
                chain,
                bytes,
                used: 0,
                suffixes: BTreeSet::new(),
                message,
            });
        }
        i += 1;
    }
}

fn enumerate_suffixes(words: &mut [Word]) -> Vec<Suffix> {
    let mut suffixes: Vec<Suffix> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for i in (0..words.len()).rev() {
        let bytes = words[i].bytes;
        if bytes < 2 {
            continue;
        }
        for j in (0..=bytes - 2).rev() {
            let mut text: String = words[i].text.chars().skip(j).collect();
            let mut chains = 0;
            let mut saving = (bytes - j - 1) as i64;
            loop {
                let idx = match index.get(&text) {
                    Some(&idx) => idx,
                    None => {
                        suffixes.push(Suffix {
                            text: text.clone(),
                            chains,
                            missing: j,
                            saving: -(text.chars().count() as i64),
                            origins: Vec::new(),
                        });
                        index.insert(text.clone(), suffixes.len() - 1);
                        suffixes.len() - 1
                    }
                };
                let entry = &mut suffixes[idx];
                if entry.origins.last() != Some(&i) {
                    entry.origins.push(i);
                }
                entry.saving += saving;
                for word in &mut words[i..=i + chains] {
                    word.suffixes.insert(idx);
                }

                let link = match words[i + chains].chain {
                    Some(link) if i + chains + 1 < words.len() => link,
                    _ => break,
                };
                chains += 1;
                text.push(link);
                text.push_str(&words[i + chains].text);
                saving += words[i + chains].bytes as i64;
            }
        }
    }
    suffixes
}

fn resort(pending: &mut VecDeque<usize>, suffixes: &[Suffix]) {
    pending
        .make_contiguous()
        .sort_by(|&a, &b| suffixes[b].saving.cmp(&suffixes[a].saving));
}

/// Greedily picks the substrings whose replacement by a word code saves the
/// most bytes across `corpus`.
///
/// Entries sharing an address and text are tokenized once; the others are
/// recorded as aliases and inherit every abbreviation of the canonical one.
/// Ties keep insertion order, so the result is deterministic.
pub fn build_abbreviation_table(corpus: &[CorpusEntry<'_>]) -> Vec<Abbreviation> {
    let mut canon: Vec<Canonical> = Vec::new();
    let mut seen: HashMap<(usize, &str), usize> = HashMap::new();
    let mut words = Vec::new();
    for entry in corpus {
        if let Some(&c) = seen.get(&(entry.addr, entry.text)) {
            canon[c].aliases.push(entry.mid);
            continue;
        }
        seen.insert((entry.addr, entry.text), canon.len());
        tokenize(entry.text, canon.len(), &mut words);
        canon.push(Canonical {
            mid: entry.mid,
            aliases: Vec::new(),
        });
    }

    let mut suffixes = enumerate_suffixes(&mut words);
    debug!(
        messages = canon.len(),
        words = words.len(),
        candidates = suffixes.len(),
        "tokenized corpus"
    );

    let mut pending: VecDeque<usize> = (0..suffixes.len()).collect();
    resort(&mut pending, &suffixes);
    let mut invalid = vec![false; suffixes.len()];
    let mut table: Vec<Abbreviation> = Vec::new();
    let mut table_len = 0;

    while let Some(&head) = pending.front() {
        if table.len() >= MAX_CODES {
            break;
        }
        if invalid[head] {
            resort(&mut pending, &suffixes);
            invalid.fill(false);
        }
        let Some(best) = pending.pop_front() else {
            break;
        };
        let (chains, missing) = (suffixes[best].chains, suffixes[best].missing);
        if suffixes[best].saving <= 0 {
            break;
        }
        let cost = suffixes[best].text.len() + 3;
        if table_len + cost > MAX_TABLE_LENGTH {
            break;
        }
        table_len += cost;

        let origins = suffixes[best].origins.clone();
        let mut mids = BTreeSet::new();
        for &w in &origins {
            let message = &canon[words[w].message];
            mids.insert(message.mid);
            mids.extend(message.aliases.iter().copied());
        }
        table.push(Abbreviation {
            bytes: code_for(table.len()),
            mids,
            text: suffixes[best].text.clone(),
        });

        for &origin in &origins {
            for k in 0..=chains {
                let Some(word) = words.get_mut(origin + k) else {
                    break;
                };
                let used = word.bytes as i64 - if k == 0 { missing as i64 } else { 0 };
                let delta = used - word.used;
                for &s in &word.suffixes {
                    suffixes[s].saving -= delta;
                    invalid[s] = true;
                }
                word.used = used;
            }
        }

        // Every later entry costs one more byte per use.
        if table.len() == ONE_BYTE_CODES {
            for s in &mut suffixes {
                s.saving -= s.origins.len() as i64;
            }
            resort(&mut pending, &suffixes);
            invalid.fill(false);
        }
    }

    info!(
        entries = table.len(),
        bytes = table_len,
        "built abbreviation table"
    );
    table
}
