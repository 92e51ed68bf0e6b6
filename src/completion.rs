//! Tokenization and query-building for completion and inspection requests.

/// One token with its byte span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

/// Splits code into non-overlapping tokens covering the whole input, matched
/// greedily left to right: an identifier/number run, a run of newlines, or a
/// run of any other characters.
pub fn tokens(code: &str) -> Tokens<'_> {
    Tokens { code, pos: 0 }
}

pub struct Tokens<'a> {
    code: &'a str,
    pos: usize,
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let rest = &self.code[self.pos..];
        let mut chars = rest.chars();
        let first = chars.next()?;

        let accept: fn(char) -> bool = if is_word_char(first) {
            is_word_char
        } else if first == '\n' {
            |ch| ch == '\n'
        } else {
            |ch| !is_word_char(ch) && ch != '\n'
        };

        let mut end = first.len_utf8();
        for ch in chars {
            if !accept(ch) {
                break;
            }
            end += ch.len_utf8();
        }

        let start = self.pos;
        self.pos += end;
        Some(Token {
            text: &rest[..end],
            start,
            end: self.pos,
        })
    }
}

/// The token under the cursor for inspection: the first token whose span
/// ends at or after the cursor and whose trimmed text is non-empty.
pub fn token_at_cursor(code: &str, cursor_pos: usize) -> Option<&str> {
    for token in tokens(code) {
        if token.end >= cursor_pos {
            let trimmed = token.text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
    }
    None
}

/// Builds the engine expression that lists completions for `code` at
/// `cursor_pos`. The code must survive embedding as an engine-side string
/// literal: quotes are doubled and lines are joined with the engine's
/// `newline` constant.
pub fn build_completion_query(code: &str, cursor_pos: usize) -> String {
    let escaped = code.replace('\'', "''");
    let literal = escaped
        .split('\n')
        .map(|line| format!("'{line}'"))
        .collect::<Vec<_>>()
        .join(", newline, ");
    format!(
        "string(javaMethod('mtFindAllTabCompletions', \
         javaObject('com.mathworks.jmi.MatlabMCR'), [{literal}], {cursor_pos}, 0))"
    )
}

/// Longest common prefix of the matches, compared case-insensitively.
/// Returned lowercased.
pub fn common_prefix_ci(matches: &[String]) -> String {
    let mut iter = matches.iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let mut prefix = first.to_lowercase();
    for item in iter {
        let lowered = item.to_lowercase();
        let mut keep = 0;
        for (a, b) in prefix.chars().zip(lowered.chars()) {
            if a != b {
                break;
            }
            keep += a.len_utf8();
        }
        prefix.truncate(keep);
        if prefix.is_empty() {
            break;
        }
    }
    prefix
}

/// How much of `prefix` already appears immediately before the cursor: the
/// byte length, in `before`, of its longest suffix that is also a prefix of
/// `prefix`, compared case-insensitively. Measured against the original
/// text, not its lowercase form, so the result never exceeds `before.len()`
/// even when lowercasing changes a character's byte length.
pub fn prefix_overlap(before: &str, prefix: &str) -> usize {
    for (start, _) in before.char_indices() {
        let lowered = before[start..].to_lowercase();
        if prefix.starts_with(&lowered) {
            return before.len() - start;
        }
    }
    0
}
