//! Splitting a SQL script into individual statements
//!
//! Semicolons inside quotes, identifiers, comments and PostgreSQL
//! dollar-quoted bodies do not end a statement.

/// Keywords whose statements return rows
const ROW_RETURNING: &[&str] = &[
    "SELECT", "SHOW", "DESC", "DESCRIBE", "EXPLAIN", "WITH", "VALUES", "TABLE",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Quoted(u8),
    LineComment,
    BlockComment,
}

/// Split `sql` into statements, dropping the terminating `;` and any
/// statement made only of whitespace and comments.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut state = State::Normal;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Normal => match b {
                b'\'' | b'"' | b'`' => state = State::Quoted(b),
                b'-' if next == Some(b'-') => {
                    state = State::LineComment;
                    i += 1;
                }
                b'#' => state = State::LineComment,
                b'/' if next == Some(b'*') => {
                    state = State::BlockComment;
                    i += 1;
                }
                b'$' => {
                    if let Some(end) = dollar_quote_end(sql, i) {
                        i = end;
                        continue;
                    }
                }
                b';' => {
                    push_statement(&mut statements, &sql[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
            State::Quoted(quote) => {
                if b == b'\\' && quote != b'`' {
                    i += 1;
                } else if b == quote {
                    if next == Some(quote) {
                        i += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = State::Normal;
                    i += 1;
                }
            }
        }
        i += 1;
    }
    push_statement(&mut statements, &sql[start..]);
    statements
}

/// If a `$tag$` opens at `at`, return the index just past its closing tag.
fn dollar_quote_end(sql: &str, at: usize) -> Option<usize> {
    let rest = &sql[at + 1..];
    let tag_len = rest.find('$')?;
    let tag = &rest[..tag_len];
    if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    if tag.starts_with(|c: char| c.is_ascii_digit()) {
        // `$1` is a positional parameter, not a quote
        return None;
    }
    let delimiter = format!("${tag}$");
    let body_start = at + delimiter.len();
    let close = sql[body_start..].find(&delimiter)?;
    Some(body_start + close + delimiter.len())
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !strip_leading_comments(trimmed).is_empty() {
        statements.push(trimmed.to_string());
    }
}

fn strip_leading_comments(mut s: &str) -> &str {
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("--").or_else(|| s.strip_prefix('#')) {
            s = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(rest) = s.strip_prefix("/*") {
            s = rest.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            return s;
        }
    }
}

/// True when the statement produces a result set to render
pub fn is_row_returning(statement: &str) -> bool {
    let body = strip_leading_comments(statement).trim_start_matches(['(', ' ', '\t', '\n', '\r']);
    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    ROW_RETURNING.contains(&keyword.as_str())
}
