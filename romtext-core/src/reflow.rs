use std::borrow::Cow;

use crate::codec::{parse_markup, Markup};
use crate::words::WordBanks;

/// Widest line a message box shows.
pub const LINE_WIDTH: usize = 29;
/// Lines per box; one more forces a page break.
pub const BOX_LINES: usize = 4;

/// Width the box reserves for `{:HERO:}`.
const HERO_WIDTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Newline,
    /// `#`, with the newline that follows it.
    PageBreak,
    Space,
    Glyph {
        text: &'a str,
        width: usize,
        /// Display name a named reference may be split into.
        fallback: Option<&'a str>,
    },
}

/// `None` when the text holds markup that does not resolve.
fn scan<'a>(text: &'a str, words: &'a WordBanks) -> Option<Vec<Token<'a>>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < text.len() {
        match bytes[i] {
            b'\n' => {
                tokens.push(Token::Newline);
                i += 1;
            }
            b'#' => {
                tokens.push(Token::PageBreak);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
            }
            b' ' | b'\t' | b'\r' => {
                tokens.push(Token::Space);
                i += 1;
            }
            b'{' | b'[' => {
                let (markup, close) = parse_markup(bytes, i).ok()?;
                let (width, fallback) = match markup {
                    Markup::Hero => (HERO_WIDTH, None),
                    Markup::Item => (words.max_item_name_len(), None),
                    Markup::Person(id) => {
                        let name = words.person_name(id)?;
                        (name.len(), Some(name))
                    }
                    Markup::ItemName(id) => {
                        let name = words.item_name(id)?;
                        (name.len(), Some(name))
                    }
                    Markup::Escape(_) => (1, None),
                };
                tokens.push(Token::Glyph {
                    text: &text[i..=close],
                    width,
                    fallback,
                });
                i = close + 1;
            }
            _ => {
                let len = text[i..].chars().next().map_or(1, char::len_utf8);
                tokens.push(Token::Glyph {
                    text: &text[i..i + len],
                    width: 1,
                    fallback: None,
                });
                i += len;
            }
        }
    }
    Some(tokens)
}

/// True when every line fits the box and no box holds more than four lines.
///
/// A line break renders as a newline plus one column of indent, so the
/// first glyph after `\n ` sits in column 3. Trailing spaces may run past
/// the edge.
pub fn check_text(text: &str, words: &WordBanks) -> bool {
    let Some(tokens) = scan(text, words) else {
        return false;
    };
    let mut line_num = 0;
    let mut line_len = 0;
    for token in tokens {
        match token {
            Token::Newline => {
                line_num += 1;
                line_len = 1;
                if line_num >= BOX_LINES {
                    return false;
                }
            }
            Token::PageBreak => {
                line_num = 0;
                line_len = 0;
            }
            Token::Space => line_len += 1,
            Token::Glyph { width, .. } => {
                line_len += width;
                if line_len > LINE_WIDTH {
                    return false;
                }
            }
        }
    }
    true
}

struct Reflow {
    out: String,
    word: String,
    word_len: usize,
    line_num: usize,
    line_len: usize,
    space: bool,
}

impl Reflow {
    fn insert(&mut self, text: &str, width: usize, fallback: Option<&str>) {
        if self.line_len + width > LINE_WIDTH {
            let fits_fresh_line = 2 + self.word_len + width <= LINE_WIDTH;
            if let Some(name) = fallback.filter(|n| !fits_fresh_line && n.contains(' ')) {
                for (i, piece) in name.split_whitespace().enumerate() {
                    if i > 0 {
                        self.insert_space();
                    }
                    self.insert(piece, piece.chars().count(), None);
                }
                return;
            }
            self.newline(width);
        }
        self.word.push_str(text);
        self.word_len += width;
        self.line_len += width;
        self.space = false;
    }

    fn insert_space(&mut self) {
        if self.space {
            return;
        }
        self.flush();
        if self.line_len + 1 > LINE_WIDTH {
            self.newline(0);
        } else {
            self.out.push(' ');
            self.line_len += 1;
        }
        self.space = true;
    }

    fn flush(&mut self) {
        self.out.push_str(&self.word);
        self.word.clear();
        self.word_len = 0;
    }

    /// Breaks the line before the pending word, carrying it over. A word
    /// too wide for a fresh line is left where it is.
    fn newline(&mut self, incoming: usize) {
        if 2 + self.word_len + incoming > LINE_WIDTH {
            self.flush();
        }
        self.line_num += 1;
        if self.line_num >= BOX_LINES {
            self.out.push_str("#\n ");
            self.line_num = 0;
            self.line_len = 1 + self.word_len;
        } else {
            self.out.push_str("\n ");
            self.line_len = 2 + self.word_len;
        }
        self.space = true;
    }

    fn page_break(&mut self) {
        self.flush();
        self.out.push_str("#\n");
        self.line_num = 0;
        self.line_len = 0;
        self.space = true;
    }
}

/// Re-wraps `text` so that [`check_text`] accepts it.
///
/// Whitespace is reflowed; explicit `#` page breaks are kept. A named
/// reference moves to the next line whole when it fits there; only a
/// multi-word name too wide for any line is replaced by its split name.
/// Text that already fits, or whose markup does not resolve, is returned
/// unchanged.
pub fn fix_text<'a>(text: &'a str, words: &WordBanks) -> Cow<'a, str> {
    if check_text(text, words) {
        return Cow::Borrowed(text);
    }
    let Some(tokens) = scan(text, words) else {
        return Cow::Borrowed(text);
    };

    let mut flow = Reflow {
        out: String::with_capacity(text.len() + 8),
        word: String::new(),
        word_len: 0,
        line_num: 0,
        line_len: 0,
        space: false,
    };
    for token in tokens {
        match token {
            Token::Newline | Token::Space => flow.insert_space(),
            Token::PageBreak => flow.page_break(),
            Token::Glyph { text, width, fallback } => flow.insert(text, width, fallback),
        }
    }
    flow.flush();
    Cow::Owned(flow.out)
}
