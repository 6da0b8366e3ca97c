use std::fmt::Write as _;
use thiserror::Error;

use crate::abbrev::Abbreviation;
use crate::words::{WordBanks, ITEM_GROUP, PERSON_GROUP};

pub const TERMINATOR: u8 = 0x00;
pub const START: u8 = 0x01;
pub const NEWLINE: u8 = 0x02;
pub const CONTINUE: u8 = 0x03;
pub const HERO: u8 = 0x04;
pub const ITEM: u8 = 0x08;
pub const SPACES: u8 = 0x09;

/// Page-break marker in decoded text.
pub const CONTINUED: u8 = b'#';
pub const HERO_TOKEN: &str = "{:HERO:}";
pub const ITEM_TOKEN: &str = "[:ITEM:]";

/// Characters after which the game does not insert a space following a
/// dictionary word.
const PUNCTUATION: &[u8] = b"\0 !',.:;?_\n#";

pub fn is_punctuation(b: u8) -> bool {
    PUNCTUATION.contains(&b)
}

/// Errors raised while decoding message bytes or encoding message text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected start-of-message byte at ${addr:05x}")]
    UnexpectedStart { addr: usize },

    #[error("unrecognised control byte ${byte:02x} at ${addr:05x}")]
    UnknownControl { byte: u8, addr: usize },

    #[error("word group {group} has no entry ${index:02x} (referenced at ${addr:05x})")]
    UnknownWord { group: u8, index: u8, addr: usize },

    #[error("message running from ${addr:05x} is not terminated")]
    Truncated { addr: usize },

    #[error("malformed markup '{fragment}' at offset {pos}")]
    BadMarkup { fragment: String, pos: usize },

    #[error("escape '[{token}]' at offset {pos} is not a byte value")]
    BadEscape { token: String, pos: usize },

    #[error("unterminated '[' at offset {pos}")]
    UnterminatedEscape { pos: usize },

    #[error("character {ch:?} at offset {pos} cannot be encoded")]
    Unencodable { ch: char, pos: usize },
}

/// A decoded message together with the raw bytes it was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    /// Raw bytes consumed, terminator excluded.
    pub bytes: Vec<u8>,
}

/// An encoded message and its human-readable trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub hex: String,
}

/// Decodes a stand-alone byte stream (start marker first, terminator last).
pub fn decode(bytes: &[u8], words: &WordBanks) -> Result<String, CodecError> {
    decode_stream(bytes, 0, words).map(|d| d.text)
}

/// Decodes the message at `addr` in `rom`. Address zero is the null message.
pub fn decode_at(rom: &[u8], addr: usize, words: &WordBanks) -> Result<Decoded, CodecError> {
    if addr == 0 {
        return Ok(Decoded::default());
    }
    decode_stream(rom, addr, words)
}

fn decode_stream(rom: &[u8], addr: usize, words: &WordBanks) -> Result<Decoded, CodecError> {
    let mut out = Decoded::default();
    let text = &mut out.text;
    let mut i = addr;
    loop {
        let b = *rom.get(i).ok_or(CodecError::Truncated { addr })?;
        if b == TERMINATOR {
            break;
        }
        out.bytes.push(b);

        match b {
            START => {
                if i != addr && rom[i - 1] != CONTINUE {
                    return Err(CodecError::UnexpectedStart { addr: i });
                }
            }
            NEWLINE => text.push_str("\n "),
            CONTINUE => {
                text.push(CONTINUED as char);
                text.push('\n');
            }
            HERO => text.push_str(HERO_TOKEN),
            ITEM => text.push_str(ITEM_TOKEN),
            0x05 | 0x06 | 0x07 | SPACES => {
                i += 1;
                let arg = *rom.get(i).ok_or(CodecError::Truncated { addr })?;
                out.bytes.push(arg);
                if b == SPACES {
                    text.extend(std::iter::repeat(' ').take(arg as usize));
                    i += 1;
                    continue;
                }
                let word = words.extra_word(b, arg).ok_or(CodecError::UnknownWord {
                    group: b,
                    index: arg,
                    addr: i,
                })?;
                match b {
                    PERSON_GROUP => {
                        let _ = write!(text, "{{{:02x}:{}}}", arg, word);
                    }
                    ITEM_GROUP => {
                        let _ = write!(text, "[{:02x}:{}]", arg, word);
                    }
                    _ => text.push_str(word),
                }
                space_after_word(text, rom.get(i + 1).copied());
            }
            0x80..=0xff => {
                let word = words.common_word(b).ok_or(CodecError::UnknownWord {
                    group: 0,
                    index: b - 0x80,
                    addr: i,
                })?;
                text.push_str(word);
                space_after_word(text, rom.get(i + 1).copied());
            }
            0x20..=0x7f => text.push(b as char),
            _ => return Err(CodecError::UnknownControl { byte: b, addr: i }),
        }
        i += 1;
    }

    Ok(out)
}

fn space_after_word(text: &mut String, next: Option<u8>) {
    if !is_punctuation(next.unwrap_or(TERMINATOR)) {
        text.push(' ');
    }
}

/// Inline markup recognised in message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Markup {
    Hero,
    Item,
    Person(u8),
    ItemName(u8),
    /// `[n]`: a literal byte value.
    Escape(u8),
}

/// Parses the markup opened at `text[pos]` (`{` or `[`) and returns it with
/// the index of its closing bracket.
pub(crate) fn parse_markup(text: &[u8], pos: usize) -> Result<(Markup, usize), CodecError> {
    let rest = &text[pos..];
    if rest.starts_with(HERO_TOKEN.as_bytes()) {
        return Ok((Markup::Hero, pos + HERO_TOKEN.len() - 1));
    }
    if rest.starts_with(ITEM_TOKEN.as_bytes()) {
        return Ok((Markup::Item, pos + ITEM_TOKEN.len() - 1));
    }

    let bad = || CodecError::BadMarkup {
        fragment: String::from_utf8_lossy(&rest[..rest.len().min(16)]).into_owned(),
        pos,
    };
    match rest.first() {
        Some(b'{') => {
            let close = find(text, b'}', pos).ok_or_else(bad)?;
            let id = named_id(&text[pos + 1..close]).ok_or_else(bad)?;
            Ok((Markup::Person(id), close))
        }
        Some(b'[') => {
            let close = find(text, b']', pos).ok_or(CodecError::UnterminatedEscape { pos })?;
            let inside = &text[pos + 1..close];
            if inside.contains(&b':') {
                let id = named_id(inside).ok_or_else(bad)?;
                return Ok((Markup::ItemName(id), close));
            }
            let token = String::from_utf8_lossy(inside).into_owned();
            match token.parse::<u8>() {
                Ok(b) => Ok((Markup::Escape(b), close)),
                Err(_) => Err(CodecError::BadEscape { token, pos }),
            }
        }
        _ => Err(bad()),
    }
}

/// `hh:name` -> `hh`
fn named_id(inside: &[u8]) -> Option<u8> {
    let colon = inside.iter().position(|&b| b == b':')?;
    let digits = std::str::from_utf8(&inside[..colon]).ok()?;
    if digits.is_empty() {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

pub(crate) fn find(text: &[u8], needle: u8, from: usize) -> Option<usize> {
    text.get(from..)?
        .iter()
        .position(|&b| b == needle)
        .map(|p| p + from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Unit {
    Char(u8),
    /// Dictionary/table reference. Only word codes make the decoder insert
    /// a trailing space, so `spaced` is false for the bare placeholders.
    Code { bytes: Vec<u8>, spaced: bool },
    Raw(u8),
}

impl Unit {
    fn is_char(&self, c: u8) -> bool {
        matches!(self, Unit::Char(b) if *b == c)
    }
}

/// First byte the decoder will see for `unit` is in the punctuation set.
fn leads_with_punctuation(unit: Option<&Unit>) -> bool {
    match unit {
        None => true,
        Some(Unit::Char(b'\n')) | Some(Unit::Char(CONTINUED)) => false,
        Some(Unit::Char(c)) | Some(Unit::Raw(c)) => is_punctuation(*c),
        Some(Unit::Code { .. }) => false,
    }
}

fn lex(text: &str) -> Result<Vec<Unit>, CodecError> {
    let bytes = text.as_bytes();
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'{' | b'[' => {
                let (markup, close) = parse_markup(bytes, i)?;
                units.push(match markup {
                    Markup::Hero => Unit::Code { bytes: vec![HERO], spaced: false },
                    Markup::Item => Unit::Code { bytes: vec![ITEM], spaced: false },
                    Markup::Person(id) => Unit::Code { bytes: vec![PERSON_GROUP, id], spaced: true },
                    Markup::ItemName(id) => Unit::Code { bytes: vec![ITEM_GROUP, id], spaced: true },
                    Markup::Escape(b) => Unit::Raw(b),
                });
                i = close;
            }
            b'\n' | 0x20..=0x7f => units.push(Unit::Char(c)),
            _ => {
                let ch = text[i..].chars().next().unwrap_or('\u{fffd}');
                return Err(CodecError::Unencodable { ch, pos: i });
            }
        }
        i += 1;
    }
    Ok(units)
}

/// Replaces every occurrence of `abbr` that is followed by punctuation or
/// the end of the text. Line and page breaks do not count: the decoder
/// would put a space before them.
fn substitute(units: Vec<Unit>, abbr: &Abbreviation) -> Vec<Unit> {
    let needle = abbr.text.as_bytes();
    if needle.is_empty() || units.len() < needle.len() {
        return units;
    }

    let mut out = Vec::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        let end = i + needle.len();
        let matches = end <= units.len()
            && needle
                .iter()
                .zip(&units[i..end])
                .all(|(&n, u)| u.is_char(n));
        let bounded = matches && leads_with_punctuation(units.get(end));
        if bounded {
            out.push(Unit::Code {
                bytes: abbr.bytes.clone(),
                spaced: true,
            });
            i = end;
        } else {
            out.push(units[i].clone());
            i += 1;
        }
    }
    out
}

struct Emitter {
    bytes: Vec<u8>,
    hex: String,
}

impl Emitter {
    fn code(&mut self, b: u8) {
        self.bytes.push(b);
        let _ = write!(self.hex, "[{:02x}]", b);
    }

    fn char(&mut self, c: u8) {
        self.bytes.push(c);
        self.hex.push(c as char);
    }

    fn spaces(&mut self, mut run: usize) {
        while run > 0 {
            let n = run.min(0xff);
            self.code(SPACES);
            self.code(n as u8);
            run -= n;
        }
    }
}

/// Encodes message text, applying the given abbreviations longest-first.
pub fn encode(text: &str, abbreviations: &[&Abbreviation]) -> Result<Encoded, CodecError> {
    let mut units = lex(text)?;

    let mut ordered = abbreviations.to_vec();
    ordered.sort_by(|a, b| b.text.len().cmp(&a.text.len()));
    for abbr in ordered {
        units = substitute(units, abbr);
    }

    let mut em = Emitter {
        bytes: Vec::with_capacity(units.len() + 2),
        hex: String::new(),
    };
    em.code(START);

    let run_at = |p: usize| units[p..].iter().take_while(|u| u.is_char(b' ')).count();
    let mut p = 0;
    while p < units.len() {
        match &units[p] {
            Unit::Code { bytes, spaced } => {
                for &b in bytes {
                    em.code(b);
                }
                p += 1;
                if !spaced {
                    continue;
                }
                // The decoder re-inserts one space after a word unless the
                // next byte is punctuation.
                match run_at(p) {
                    0 => {}
                    1 => {
                        if !leads_with_punctuation(units.get(p + 1)) {
                            p += 1;
                        }
                    }
                    run => {
                        em.spaces(run - 1);
                        p += run;
                    }
                }
            }
            Unit::Raw(b) => {
                em.code(*b);
                p += 1;
            }
            Unit::Char(CONTINUED) => {
                em.code(CONTINUE);
                em.code(START);
                p += 1;
                if units.get(p).map_or(false, |u| u.is_char(b'\n')) {
                    p += 1;
                }
            }
            Unit::Char(b'\n') => {
                em.code(NEWLINE);
                p += 1;
                if units.get(p).map_or(false, |u| u.is_char(b' ')) {
                    p += 1;
                }
            }
            Unit::Char(b' ') => {
                let run = run_at(p);
                if run >= 2 {
                    em.spaces(run);
                } else {
                    em.char(b' ');
                }
                p += run;
            }
            Unit::Char(c) => {
                em.char(*c);
                p += 1;
            }
        }
    }

    em.code(TERMINATOR);
    Ok(Encoded {
        bytes: em.bytes,
        hex: em.hex,
    })
}
