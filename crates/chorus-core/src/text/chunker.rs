//! TextChunker - テキストを合成単位（chunk）に分割する
//!
//! - 境界の優先順: 文末（`.` `!` `?` の後の空白）→ 単語境界
//! - 長さは文字数（Unicode scalar value）で数える
//! - 1 単語が `max_len` を超える場合は切らずにそのまま 1 chunk にする

/// Sentence-first greedy splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    max_len: usize,
}

impl TextChunker {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        split(text, self.max_len)
    }
}

/// Split `text` into ordered, non-empty chunks of at most `max_len` chars.
///
/// Whole sentences are packed greedily and joined by a single space. A
/// sentence longer than `max_len` is split on whitespace; a word longer than
/// `max_len` is emitted on its own.
pub fn split(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut packer = Packer::new(max_len);

    for sentence in sentences(text) {
        if char_len(sentence) > max_len {
            packer.flush();
            for word in sentence.split_whitespace() {
                packer.push(word);
            }
            packer.flush();
        } else {
            packer.push(sentence);
        }
    }

    packer.finish()
}

/// Greedy joiner: appends pieces with a single space while they fit.
struct Packer {
    max_len: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_len: usize) -> Self {
        Self {
            max_len,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    fn push(&mut self, piece: &str) {
        let len = char_len(piece);
        if self.current_len > 0 && self.current_len + 1 + len > self.max_len {
            self.flush();
        }
        if self.current_len > 0 {
            self.current.push(' ');
            self.current_len += 1;
        }
        self.current.push_str(piece);
        self.current_len += len;
    }

    fn flush(&mut self) {
        if self.current_len > 0 {
            self.chunks.push(std::mem::take(&mut self.current));
            self.current_len = 0;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

/// Trimmed, non-empty sentences. A boundary is a run of terminators followed
/// by whitespace or the end of the text, so "3.14" stays whole.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !is_terminator(next) {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        let at_boundary = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if at_boundary {
            push_trimmed(&mut out, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut out, &text[start..]);
    out
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, s: &'a str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s);
    }
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
