use crate::builtin::{self, Builtins};
use crate::command::{CommandSpec, ExitCode, InputSource, OutputSink, STATUS_FAILED};
use crate::completion::{CompletionTable, ShellHelper};
use crate::env::Environment;
use crate::external::{self, EXIT_REDIRECT_FAILED};
use crate::{expand, history, lexer, parser};
use nix::sys::signal::{self, SigHandler, Signal};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Editor, Result};
use std::fmt::Display;
use std::io::{self, Read, Write};

/// The command dispatcher and interactive loop.
///
/// The interpreter owns the [`Environment`] and the [`Builtins`] table. Each
/// input line goes through history expansion, tokenizing, local assignment,
/// alias and variable substitution, and is then partitioned into a pipeline:
/// a lone builtin runs in-process, anything else is handed to the process
/// orchestrator.
///
/// Example
/// ```no_run
/// use pipesh::Interpreter;
/// let mut sh = Interpreter::default();
/// let code = sh.execute_line("echo hello | wc -c");
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    env: Environment,
    builtins: Builtins,
}

impl Interpreter {
    pub fn new(env: Environment, builtins: Builtins) -> Self {
        Self { env, builtins }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Run one input line and return its status.
    ///
    /// Failures before anything runs (history, lexing, partitioning, pipe or
    /// fork errors) are reported on stderr and yield [`STATUS_FAILED`].
    pub fn execute_line(&mut self, line: &str) -> ExitCode {
        if line.trim().is_empty() {
            return 0;
        }

        let line = match history::expand(line, &self.env.history) {
            Ok(Some(expanded)) => {
                eprintln!("{expanded}");
                expanded
            }
            Ok(None) => line.to_string(),
            Err(e) => return fail("history", e),
        };
        self.env.history.push(line.clone());

        let mut tokens = match lexer::tokenize(&line) {
            Ok(tokens) => tokens,
            Err(e) => return fail("lexer", e),
        };
        expand::assign_locals(&mut tokens, &mut self.env);
        expand::substitute_aliases(&mut tokens, &self.env);
        expand::substitute_variables(&mut tokens, &self.env);

        self.dispatch(&tokens)
    }

    /// Partition `tokens` and run the resulting pipeline.
    pub fn dispatch(&mut self, tokens: &[String]) -> ExitCode {
        if tokens.is_empty() {
            return 0;
        }

        let pipeline = match parser::partition(tokens) {
            Ok(pipeline) => pipeline,
            Err(e) => return fail("partition", e),
        };

        if pipeline.len() == 1 && self.builtins.is_builtin(pipeline.first().name()) {
            return self.run_builtin(pipeline.first());
        }

        match external::run(&pipeline, &self.env, &self.builtins) {
            Ok(status) => status,
            Err(e) => fail("orchestrator", e),
        }
    }

    fn run_builtin(&mut self, stage: &CommandSpec) -> ExitCode {
        let Some(command) = self.builtins.create(stage.name(), stage.args()) else {
            return STATUS_FAILED;
        };

        let mut stdin: Box<dyn Read> = match &stage.input {
            InputSource::FromFile(path) => match external::open_input(path) {
                Ok(file) => Box::new(file),
                Err(e) => return redirect_failed(path, e),
            },
            InputSource::Stdin | InputSource::FromPipe => Box::new(io::stdin().lock()),
        };
        let mut stdout: Box<dyn Write> = match &stage.output {
            OutputSink::ToFile(path) | OutputSink::AppendFile(path) => {
                match external::open_output(&stage.output) {
                    Ok(file) => Box::new(file),
                    Err(e) => return redirect_failed(path, e),
                }
            }
            OutputSink::Stdout | OutputSink::ToPipe => Box::new(io::stdout().lock()),
        };

        let status = builtin::run_command(command, &mut *stdin, &mut *stdout, &mut self.env);
        if let Err(e) = stdout.flush() {
            eprintln!("pipesh: {}: {e}", stage.name());
            return EXIT_REDIRECT_FAILED;
        }
        status
    }

    /// `"{USER} :) > "` after success, `"{USER} :( > "` otherwise.
    pub fn prompt(&self, last_status: ExitCode) -> String {
        let user = self.env.get_var("USER").unwrap_or_default();
        let face = if last_status == 0 { ":)" } else { ":(" };
        format!("{user} {face} > ")
    }

    /// Read-Eval-Print Loop.
    ///
    /// Returns the status of the last line, or the status passed to `exit`.
    pub fn repl(&mut self, completion: bool) -> Result<ExitCode> {
        // Ctrl-C and Ctrl-\ while a pipeline runs are meant for the pipeline.
        for sig in [Signal::SIGINT, Signal::SIGQUIT] {
            // SAFETY: SIG_IGN installs no handler.
            unsafe { signal::signal(sig, SigHandler::SigIgn) }
                .map_err(|e| ReadlineError::Io(e.into()))?;
        }

        let mut rl: Editor<ShellHelper, DefaultHistory> = Editor::new()?;
        if completion {
            rl.set_helper(Some(ShellHelper::new()));
        }

        let mut status = 0;
        loop {
            if let Some(helper) = rl.helper_mut() {
                helper.refresh(CompletionTable::from_state(&self.env, &self.builtins));
            }
            match rl.readline(&self.prompt(status)) {
                Ok(line) => {
                    let recorded = self.env.history.len();
                    status = self.execute_line(&line);
                    if self.env.history.len() > recorded {
                        if let Some(entry) = self.env.history.last() {
                            rl.add_history_entry(entry.as_str())?;
                        }
                    }
                    if self.env.should_exit {
                        status = self.env.exit_status;
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            }
        }

        Ok(status)
    }
}

impl Default for Interpreter {
    /// The process environment and the default builtins.
    fn default() -> Self {
        Self::new(Environment::new(), Builtins::default())
    }
}

fn fail(component: &str, error: impl Display) -> ExitCode {
    tracing::warn!(component, %error, "line rejected");
    eprintln!("pipesh: {component}: {error}");
    STATUS_FAILED
}

fn redirect_failed(path: &str, error: io::Error) -> ExitCode {
    eprintln!("pipesh: {path}: {error}");
    EXIT_REDIRECT_FAILED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::tests::lock_current_dir;
    use std::env as stdenv;
    use std::fs;

    fn shell() -> Interpreter {
        Interpreter::default()
    }

    #[test]
    fn blank_lines_succeed_without_history() {
        let mut sh = shell();
        assert_eq!(sh.execute_line("   "), 0);
        assert!(sh.env().history.is_empty());
    }

    #[test]
    fn builtin_output_can_be_redirected() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.txt");
        let mut sh = shell();

        assert_eq!(sh.execute_line(&format!("echo one > {}", out.display())), 0);
        assert_eq!(sh.execute_line(&format!("echo two >> {}", out.display())), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn builtin_with_unreadable_input_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.txt");
        let mut sh = shell();
        assert_eq!(
            sh.execute_line(&format!("echo x < {}", missing.display())),
            EXIT_REDIRECT_FAILED
        );
    }

    #[test]
    fn syntax_errors_return_sentinel() {
        let mut sh = shell();
        for line in ["| ls", "ls |", "ls | | wc", "cat < a < b", "ls > a > b", "cd | ls >"] {
            assert_eq!(sh.execute_line(line), STATUS_FAILED, "{line}");
        }
    }

    #[test]
    fn quotes_are_rejected_but_recorded() {
        let mut sh = shell();
        assert_eq!(sh.execute_line("echo 'hi'"), STATUS_FAILED);
        assert_eq!(sh.env().history, ["echo 'hi'"]);
    }

    #[test]
    fn unknown_history_event_is_not_recorded() {
        let mut sh = shell();
        assert_eq!(sh.execute_line("!nothing"), STATUS_FAILED);
        assert!(sh.env().history.is_empty());
    }

    #[test]
    fn history_expansion_reruns_previous_line() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.txt");
        let mut sh = shell();

        let line = format!("echo again >> {}", out.display());
        assert_eq!(sh.execute_line(&line), 0);
        assert_eq!(sh.execute_line("!!"), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "again\nagain\n");
        assert_eq!(sh.env().history, [line.clone(), line]);
    }

    #[test]
    fn locals_aliases_and_variables_are_applied() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.txt");
        let mut sh = shell();

        assert_eq!(sh.execute_line("greeting=hello"), 0);
        assert_eq!(sh.execute_line("alias say=echo"), 0);
        let line = format!("say $greeting $pipesh_unset world > {}", out.display());
        assert_eq!(sh.execute_line(&line), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello world\n");
    }

    #[test]
    fn pipelines_run_through_the_orchestrator() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.txt");
        let out = tmp.path().join("out.txt");
        fs::write(&input, "b\na\nb\n").unwrap();
        let mut sh = shell();

        let line = format!("sort < {} | uniq > {}", input.display(), out.display());
        assert_eq!(sh.execute_line(&line), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "a\nb\n");
    }

    #[test]
    fn builtin_in_pipeline_does_not_change_state() {
        let mut sh = shell();
        assert_eq!(sh.execute_line("alias x=true | true"), 0);
        assert!(sh.env().aliases.is_empty());
        assert_eq!(sh.execute_line("exit 3 | true"), 0);
        assert!(!sh.env().should_exit);
    }

    #[test]
    fn exit_requests_termination() {
        let mut sh = shell();
        assert_eq!(sh.execute_line("exit 4"), 4);
        assert!(sh.env().should_exit);
        assert_eq!(sh.env().exit_status, 4);
    }

    #[test]
    fn cd_changes_directory_for_later_commands() {
        let _lock = lock_current_dir();
        let original = stdenv::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let canonical = fs::canonicalize(tmp.path()).unwrap();
        let mut sh = shell();

        assert_eq!(sh.execute_line(&format!("cd {}", canonical.display())), 0);
        assert_eq!(sh.execute_line("pwd > here.txt"), 0);
        let written = fs::read_to_string(canonical.join("here.txt"));

        stdenv::set_current_dir(&original).unwrap();
        assert_eq!(written.unwrap().trim(), canonical.to_string_lossy());
    }

    #[test]
    fn prompt_reflects_last_status() {
        let mut sh = shell();
        sh.env_mut().set_var("USER", "ada");
        assert_eq!(sh.prompt(0), "ada :) > ");
        assert_eq!(sh.prompt(1), "ada :( > ");
        sh.env_mut().vars.remove("USER");
        assert_eq!(sh.prompt(-1), " :( > ");
    }
}
