//! Pipeline partitioner: a flat token sequence in, a validated [`Pipeline`] out.
//!
//! The tokens arrive fully resolved (aliases, variables and assignments are
//! already handled), so this module only understands the four delimiters
//! `|`, `<`, `>` and `>>`. It does no I/O.

use crate::command::{CommandSpec, Delimiter, InputSource, OutputSink, Pipeline};
use thiserror::Error;

/// Reasons a token sequence cannot be turned into a pipeline.
///
/// The `Display` text of each variant is stable; callers may print it but
/// only ever branch on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("pipe or redirect at beginning of command")]
    LeadingDelimiter,
    #[error("pipe or redirect at end of command")]
    TrailingDelimiter,
    #[error("two pipes or redirects in a row")]
    AdjacentDelimiters,
    #[error("too many inputs")]
    DuplicateInput,
    #[error("too many outputs")]
    DuplicateOutput,
    #[error("missing file operand after `{0}`")]
    MissingOperand(Delimiter),
    #[error("empty command")]
    EmptyCommand,
}

/// Split `tokens` into pipeline stages.
///
/// Checks run in a fixed order and the first failure wins: leading
/// delimiter, trailing delimiter, adjacent delimiters, then the per-stage
/// redirection checks of a single left-to-right scan.
pub fn partition<S: AsRef<str>>(tokens: &[S]) -> Result<Pipeline, SyntaxError> {
    let (first, last) = match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => (first.as_ref(), last.as_ref()),
        _ => return Err(SyntaxError::EmptyCommand),
    };
    if Delimiter::is_delimiter(first) {
        return Err(SyntaxError::LeadingDelimiter);
    }
    if Delimiter::is_delimiter(last) {
        return Err(SyntaxError::TrailingDelimiter);
    }
    if tokens
        .windows(2)
        .any(|pair| pair.iter().all(|t| Delimiter::is_delimiter(t.as_ref())))
    {
        return Err(SyntaxError::AdjacentDelimiters);
    }

    let mut stages = Vec::new();
    let mut current = CommandSpec::default();
    let mut iter = tokens.iter().map(|t| t.as_ref());

    while let Some(token) = iter.next() {
        let Some(delimiter) = Delimiter::parse(token) else {
            current.argv.push(token.to_string());
            continue;
        };
        match delimiter {
            Delimiter::Pipe => {
                if current.output != OutputSink::Stdout {
                    return Err(SyntaxError::DuplicateOutput);
                }
                current.output = OutputSink::ToPipe;
                stages.push(seal(current)?);
                current = CommandSpec {
                    input: InputSource::FromPipe,
                    ..CommandSpec::default()
                };
            }
            Delimiter::Input => {
                if current.input != InputSource::Stdin {
                    return Err(SyntaxError::DuplicateInput);
                }
                let path = iter.next().ok_or(SyntaxError::MissingOperand(delimiter))?;
                current.input = InputSource::FromFile(path.to_string());
            }
            Delimiter::Output | Delimiter::Append => {
                if current.output != OutputSink::Stdout {
                    return Err(SyntaxError::DuplicateOutput);
                }
                let path = iter
                    .next()
                    .ok_or(SyntaxError::MissingOperand(delimiter))?
                    .to_string();
                current.output = if delimiter == Delimiter::Output {
                    OutputSink::ToFile(path)
                } else {
                    OutputSink::AppendFile(path)
                };
            }
        }
    }
    stages.push(seal(current)?);

    let pipeline = Pipeline::from_stages(stages);
    tracing::debug!(stages = pipeline.len(), %pipeline, "partitioned");
    Ok(pipeline)
}

fn seal(stage: CommandSpec) -> Result<CommandSpec, SyntaxError> {
    if stage.argv.is_empty() {
        return Err(SyntaxError::EmptyCommand);
    }
    Ok(stage)
}
