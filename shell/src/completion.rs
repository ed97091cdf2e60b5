//! Tab-completion for the interactive loop.
//!
//! The interpreter publishes a [`CompletionTable`] snapshot before every
//! prompt; [`ShellHelper`] answers rustyline's completion requests from it.

use crate::builtin::Builtins;
use crate::command::Delimiter;
use crate::env::Environment;
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;

/// Names the completer may offer, copied out of the interpreter state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionTable {
    pub builtins: Vec<String>,
    pub aliases: Vec<String>,
    /// Exported and local variable names, without the `$`.
    pub variables: Vec<String>,
    /// Raw `PATH` value used to enumerate executables.
    pub path: String,
}

impl CompletionTable {
    pub fn from_state(env: &Environment, builtins: &Builtins) -> Self {
        let variables: BTreeSet<&String> = env.vars.keys().chain(env.locals.keys()).collect();
        Self {
            builtins: builtins.names().map(str::to_string).collect(),
            aliases: env.aliases.keys().cloned().collect(),
            variables: variables.into_iter().cloned().collect(),
            path: env.get_var("PATH").unwrap_or_default().to_string(),
        }
    }

    /// `$NAME` candidates for a word that starts with `$`.
    pub fn variable_candidates(&self, word: &str) -> Vec<String> {
        let prefix = word.strip_prefix('$').unwrap_or(word);
        self.variables
            .iter()
            .filter(|name| name.starts_with(prefix))
            .map(|name| format!("${name}"))
            .collect()
    }

    /// Builtins, aliases and executables on `PATH` whose name starts with
    /// `word`, sorted and without duplicates.
    pub fn command_candidates(&self, word: &str) -> Vec<String> {
        let mut names: BTreeSet<String> = self
            .builtins
            .iter()
            .chain(&self.aliases)
            .filter(|name| name.starts_with(word))
            .cloned()
            .collect();
        for dir in std::env::split_paths(&self.path) {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(word) && is_executable(&entry) {
                    names.insert(name);
                }
            }
        }
        names.into_iter().collect()
    }
}

fn is_executable(entry: &fs::DirEntry) -> bool {
    // metadata() follows symlinks, which is what PATH lookup does too.
    fs::metadata(entry.path())
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Where the word under the cursor starts, and whether it names a command.
fn word_under_cursor(line: &str, pos: usize) -> (usize, bool) {
    let before = &line[..pos];
    let start = before
        .rfind(char::is_whitespace)
        .map_or(0, |i| i + before[i..].chars().next().map_or(1, char::len_utf8));
    let previous = before[..start].split_whitespace().last();
    let command_position = match previous {
        None => true,
        Some(token) => Delimiter::parse(token) == Some(Delimiter::Pipe),
    };
    (start, command_position)
}

/// rustyline helper providing completion only.
pub struct ShellHelper {
    table: CompletionTable,
    files: FilenameCompleter,
}

impl ShellHelper {
    pub fn new() -> Self {
        Self {
            table: CompletionTable::default(),
            files: FilenameCompleter::new(),
        }
    }

    /// Replace the snapshot the completer answers from.
    pub fn refresh(&mut self, table: CompletionTable) {
        self.table = table;
    }
}

impl Default for ShellHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, command_position) = word_under_cursor(line, pos);
        let word = &line[start..pos];

        let candidates = if word.starts_with('$') {
            self.table.variable_candidates(word)
        } else if command_position && !word.contains('/') {
            self.table.command_candidates(word)
        } else {
            return self.files.complete(line, pos, ctx);
        };

        let pairs = candidates
            .into_iter()
            .map(|c| Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}
