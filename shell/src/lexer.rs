//! Splits a raw input line into words.
//!
//! Words are separated by blanks. Quoting is not supported, so a word that
//! contains a quote character is rejected rather than silently mangled.

use thiserror::Error;

const QUOTE_CHARS: [char; 3] = ['"', '\'', '`'];

/// Errors that can occur during tokenization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    /// A word contained `"`, `'` or `` ` ``.
    #[error("\", ', and ` characters are not allowed")]
    QuoteNotAllowed,
}

/// Split `line` on whitespace.
pub fn tokenize(line: &str) -> Result<Vec<String>, LexError> {
    let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if tokens.iter().any(|t| t.contains(QUOTE_CHARS)) {
        return Err(LexError::QuoteNotAllowed);
    }
    Ok(tokens)
}
