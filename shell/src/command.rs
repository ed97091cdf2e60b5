//! Descriptor model shared by the partitioner and the orchestrator.
//!
//! These types carry no behavior beyond construction and inspection: a
//! [`Pipeline`] is produced by [`crate::parser::partition`], consumed once by
//! [`crate::external::run`] and then dropped.

use std::fmt;

/// Conventional process exit code type used by this crate.
///
/// `0..=255` are ordinary exit codes. Negative values never come from a
/// program's own `exit`: `-s` means the process was killed by signal `s`, and
/// [`STATUS_FAILED`] marks a line that could not be run at all.
pub type ExitCode = i32;

/// Status reported for a line that failed before any stage ran to completion
/// (syntax error, failed fork, failed pipe).
pub const STATUS_FAILED: ExitCode = -1;

/// Tokens with pipeline-syntax meaning.
///
/// Recognition is by exact token equality: `a|b` is a single ordinary word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// `|`
    Pipe,
    /// `<`
    Input,
    /// `>`
    Output,
    /// `>>`
    Append,
}

impl Delimiter {
    /// Classify a token, returning `None` for ordinary words.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "|" => Some(Delimiter::Pipe),
            "<" => Some(Delimiter::Input),
            ">" => Some(Delimiter::Output),
            ">>" => Some(Delimiter::Append),
            _ => None,
        }
    }

    pub fn is_delimiter(token: &str) -> bool {
        Self::parse(token).is_some()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Delimiter::Pipe => "|",
            Delimiter::Input => "<",
            Delimiter::Output => ">",
            Delimiter::Append => ">>",
        }
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stage reads its standard input from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InputSource {
    /// Inherited from the interpreter.
    #[default]
    Stdin,
    /// `< path`
    FromFile(String),
    /// Read end of the pipe fed by the previous stage.
    FromPipe,
}

/// Where a stage writes its standard output to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputSink {
    /// Inherited from the interpreter.
    #[default]
    Stdout,
    /// Write end of the pipe feeding the next stage.
    ToPipe,
    /// `> path`: create or truncate.
    ToFile(String),
    /// `>> path`: create or append.
    AppendFile(String),
}

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    /// Program (or builtin) name followed by its arguments. Never empty once
    /// the stage is part of a [`Pipeline`].
    pub argv: Vec<String>,
    pub input: InputSource,
    pub output: OutputSink,
}

impl CommandSpec {
    pub fn name(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

/// An ordered, non-empty chain of stages connected by anonymous pipes.
///
/// Only [`crate::parser::partition`] builds pipelines, which is what keeps
/// the pipe wiring between neighbouring stages consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<CommandSpec>,
}

impl Pipeline {
    pub(crate) fn from_stages(stages: Vec<CommandSpec>) -> Self {
        debug_assert!(!stages.is_empty());
        Self { stages }
    }

    pub fn stages(&self) -> &[CommandSpec] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn first(&self) -> &CommandSpec {
        &self.stages[0]
    }

    /// Flatten the pipeline back into a token sequence.
    ///
    /// Each stage contributes its argv, then `< path`, then `> path` or
    /// `>> path`, and stages are joined with `|`. Partitioning the result
    /// yields an equal pipeline.
    pub fn to_tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                tokens.push(Delimiter::Pipe.to_string());
            }
            tokens.extend(stage.argv.iter().cloned());
            if let InputSource::FromFile(path) = &stage.input {
                tokens.push(Delimiter::Input.to_string());
                tokens.push(path.clone());
            }
            match &stage.output {
                OutputSink::ToFile(path) => {
                    tokens.push(Delimiter::Output.to_string());
                    tokens.push(path.clone());
                }
                OutputSink::AppendFile(path) => {
                    tokens.push(Delimiter::Append.to_string());
                    tokens.push(path.clone());
                }
                OutputSink::Stdout | OutputSink::ToPipe => {}
            }
        }
        tokens
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_tokens().join(" "))
    }
}
