//! `!`-style history expansion.
//!
//! Supported event designators:
//! - `!!` the previous line
//! - `!n` line number `n` (1-based, as printed by `history`)
//! - `!-n` the `n`-th previous line
//! - `!prefix` the most recent line starting with `prefix`
//!
//! A `!` followed by whitespace, `=` or the end of the line is kept as is.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("!{0}: event not found")]
    EventNotFound(String),
}

/// Expand every event designator in `line` against `history` (oldest first).
///
/// Returns `Ok(None)` when the line contains nothing to expand, so callers
/// can tell whether to echo the result.
pub fn expand(line: &str, history: &[String]) -> Result<Option<String>, HistoryError> {
    if !line.contains('!') {
        return Ok(None);
    }

    let mut out = String::with_capacity(line.len());
    let mut expanded = false;
    let mut rest = line;

    while let Some(bang) = rest.find('!') {
        out.push_str(&rest[..bang]);
        let after = &rest[bang + 1..];
        let designator_len = designator_len(after);
        if designator_len == 0 {
            out.push('!');
            rest = after;
            continue;
        }

        let designator = &after[..designator_len];
        let event = resolve(designator, history)
            .ok_or_else(|| HistoryError::EventNotFound(designator.to_string()))?;
        out.push_str(event);
        expanded = true;
        rest = &after[designator_len..];
    }
    out.push_str(rest);

    Ok(expanded.then_some(out))
}

/// Byte length of the event designator at the start of `s`; 0 if none.
fn designator_len(s: &str) -> usize {
    match s.chars().next() {
        None => 0,
        Some('!') => 1,
        Some(c) if c.is_whitespace() || c == '=' => 0,
        Some('-') => {
            let digits = s[1..].chars().take_while(char::is_ascii_digit).count();
            if digits == 0 { 0 } else { 1 + digits }
        }
        Some(c) if c.is_ascii_digit() => s.chars().take_while(char::is_ascii_digit).count(),
        Some(_) => s
            .find(|c: char| c.is_whitespace() || c == '!')
            .unwrap_or(s.len()),
    }
}

fn resolve<'a>(designator: &str, history: &'a [String]) -> Option<&'a str> {
    let line = if designator == "!" {
        history.last()
    } else if let Some(back) = designator.strip_prefix('-') {
        let back: usize = back.parse().ok()?;
        history.len().checked_sub(back).and_then(|i| history.get(i))
    } else if designator.starts_with(|c: char| c.is_ascii_digit()) {
        let number: usize = designator.parse().ok()?;
        number.checked_sub(1).and_then(|i| history.get(i))
    } else {
        history.iter().rev().find(|line| line.starts_with(designator))
    };
    line.map(String::as_str)
}
