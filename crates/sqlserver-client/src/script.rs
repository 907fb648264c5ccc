//! T-SQL script splitting at `GO` batch separators.
//!
//! `GO` is a tool convention, not T-SQL: it must sit on its own line,
//! case-insensitively, optionally followed by a repeat count. A `GO` inside
//! a string literal, bracketed or quoted identifier, or comment is plain
//! text. Block comments nest, per T-SQL.

/// One batch of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// The batch text, comments included.
    pub sql: String,
    /// 1-based line of the batch's first non-blank character.
    pub line: usize,
    /// 1-based column of that character.
    pub column: usize,
    /// Times to execute (from `GO <count>`, default 1).
    pub repeat: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    Plain,
    SingleQuote,
    BracketIdent,
    DoubleQuote,
    BlockComment(u32),
}

/// Split `script` into executable batches.
///
/// Batches that contain only whitespace and comments are dropped.
#[must_use]
pub fn split_batches(script: &str) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut state = Lex::Plain;

    let mut sql = String::new();
    let mut start: Option<(usize, usize)> = None;
    let mut has_content = false;

    for (line_index, line) in script.lines().enumerate() {
        if state == Lex::Plain {
            if let Some(repeat) = parse_go_line(line) {
                flush(&mut batches, &mut sql, &mut start, &mut has_content, repeat);
                continue;
            }
        }

        scan_line(
            line,
            line_index + 1,
            &mut state,
            &mut start,
            &mut has_content,
        );
        sql.push_str(line);
        sql.push('\n');
    }

    flush(&mut batches, &mut sql, &mut start, &mut has_content, 1);
    batches
}

fn flush(
    batches: &mut Vec<Batch>,
    sql: &mut String,
    start: &mut Option<(usize, usize)>,
    has_content: &mut bool,
    repeat: u32,
) {
    let text = std::mem::take(sql);
    let position = start.take();
    let content = std::mem::replace(has_content, false);

    if !content {
        return;
    }
    let (line, column) = position.unwrap_or((1, 1));
    batches.push(Batch {
        sql: text.trim_end().to_owned(),
        line,
        column,
        repeat,
    });
}

/// Match `GO`, `GO <count>` or `GO -- comment` on a line of its own.
fn parse_go_line(line: &str) -> Option<u32> {
    let trimmed = line.trim();
    if trimmed.len() < 2 || !trimmed.is_char_boundary(2) || !trimmed[..2].eq_ignore_ascii_case("go")
    {
        return None;
    }
    let rest = &trimmed[2..];
    if rest.is_empty() {
        return Some(1);
    }
    // Anything glued to the token (GOTO, GOV) is not a separator.
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let arg = rest.trim();
    if arg.is_empty() || arg.starts_with("--") {
        return Some(1);
    }
    arg.parse::<u32>().ok().filter(|count| *count > 0)
}

/// Advance the lexer over one line, recording where real content starts.
fn scan_line(
    line: &str,
    line_number: usize,
    state: &mut Lex,
    start: &mut Option<(usize, usize)>,
    has_content: &mut bool,
) {
    let bytes = line.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        let rest = &line[i..];
        match *state {
            Lex::Plain => {
                if rest.starts_with("--") {
                    // Line comment: nothing more on this line matters.
                    return;
                }
                if rest.starts_with("/*") {
                    *state = Lex::BlockComment(1);
                    i += 2;
                    continue;
                }
                let Some(c) = rest.chars().next() else { break };
                match c {
                    '\'' => *state = Lex::SingleQuote,
                    '[' => *state = Lex::BracketIdent,
                    '"' => *state = Lex::DoubleQuote,
                    _ => {}
                }
                if !c.is_whitespace() && !*has_content {
                    *has_content = true;
                    if start.is_none() {
                        *start = Some((line_number, i + 1));
                    }
                }
                i += c.len_utf8();
            }
            Lex::SingleQuote => {
                if !*has_content {
                    *has_content = true;
                }
                if rest.starts_with("''") {
                    i += 2;
                } else if rest.starts_with('\'') {
                    *state = Lex::Plain;
                    i += 1;
                } else {
                    let Some(c) = rest.chars().next() else { break };
                    i += c.len_utf8();
                }
            }
            Lex::BracketIdent => {
                *has_content = true;
                if rest.starts_with("]]") {
                    i += 2;
                } else if rest.starts_with(']') {
                    *state = Lex::Plain;
                    i += 1;
                } else {
                    let Some(c) = rest.chars().next() else { break };
                    i += c.len_utf8();
                }
            }
            Lex::DoubleQuote => {
                *has_content = true;
                if rest.starts_with("\"\"") {
                    i += 2;
                } else if rest.starts_with('"') {
                    *state = Lex::Plain;
                    i += 1;
                } else {
                    let Some(c) = rest.chars().next() else { break };
                    i += c.len_utf8();
                }
            }
            Lex::BlockComment(depth) => {
                if rest.starts_with("/*") {
                    *state = Lex::BlockComment(depth + 1);
                    i += 2;
                } else if rest.starts_with("*/") {
                    *state = if depth == 1 {
                        Lex::Plain
                    } else {
                        Lex::BlockComment(depth - 1)
                    };
                    i += 2;
                } else {
                    let Some(c) = rest.chars().next() else { break };
                    i += c.len_utf8();
                }
            }
        }
    }
}
