//! Token rewriting that happens between tokenizing and dispatch:
//! local assignments, alias substitution and variable substitution.

use crate::command::Delimiter;
use crate::env::Environment;
use regex::Regex;
use std::sync::OnceLock;

fn assignment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>[A-Za-z_][A-Za-z0-9_]*)=(?P<value>.*)$")
            .expect("assignment pattern is valid")
    })
}

/// Consume leading `NAME=value` words, storing each as a local variable.
///
/// Scanning stops at the first word that is not an assignment; a line made
/// only of assignments leaves no tokens behind.
pub fn assign_locals(tokens: &mut Vec<String>, env: &mut Environment) {
    let re = assignment_regex();
    let consumed = tokens.iter().take_while(|t| re.is_match(t)).count();
    for token in tokens.drain(..consumed) {
        if let Some(caps) = re.captures(&token) {
            tracing::debug!(name = &caps["name"], "local assignment");
            env.set_local(&caps["name"], &caps["value"]);
        }
    }
}

/// Replace aliases in command position: the first word and every word that
/// directly follows a `|`.
///
/// The alias value is split on whitespace. Substitution is not repeated on
/// the replacement, so `alias ls=ls` cannot loop.
pub fn substitute_aliases(tokens: &mut Vec<String>, env: &Environment) {
    if env.aliases.is_empty() {
        return;
    }
    let mut out = Vec::with_capacity(tokens.len());
    let mut command_position = true;
    for token in tokens.drain(..) {
        let next_is_command = Delimiter::parse(&token) == Some(Delimiter::Pipe);
        match env.aliases.get(&token) {
            Some(value) if command_position => {
                out.extend(value.split_whitespace().map(str::to_string));
            }
            _ => out.push(token),
        }
        command_position = next_is_command;
    }
    *tokens = out;
}

/// Replace every `$NAME` word with the variable's value.
///
/// Exported variables win over locals. A reference to an unset variable
/// removes the word entirely.
pub fn substitute_variables(tokens: &mut Vec<String>, env: &Environment) {
    tokens.retain_mut(|token| {
        let Some(name) = token.strip_prefix('$') else {
            return true;
        };
        if name.is_empty() {
            return true;
        }
        match env.lookup(name) {
            Some(value) => {
                *token = value.to_string();
                true
            }
            None => false,
        }
    });
}
