use crate::command::ExitCode;
use crate::env::Environment;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::PathBuf;

/// A command implemented inside the shell.
///
/// Arguments are parsed with [`argh`]. A lone builtin runs in the shell
/// process; inside a pipeline it runs in the stage's child.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command using provided IO streams and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

/// Object-safe handle to a parsed builtin invocation.
pub trait ExecutableCommand {
    /// Executes the command. An `Err` means the command itself failed (for
    /// example `cd` into a missing directory); the caller reports it.
    fn execute(
        self: Box<Self>,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        T::execute(*self, stdin, stdout, env).with_context(|| T::name())
    }
}

/// Arguments rejected by argh, or an explicit `--help`.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.is_error {
            eprintln!("{}", self.output.trim_end());
            Ok(1)
        } else {
            writeln!(stdout, "{}", self.output.trim_end())?;
            Ok(0)
        }
    }
}

/// Run a builtin, turning a failure into a diagnostic on stderr and status 1.
pub fn run_command(
    command: Box<dyn ExecutableCommand>,
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    env: &mut Environment,
) -> ExitCode {
    match command.execute(stdin, stdout, env) {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(error = %format!("{e:#}"), "builtin failed");
            eprintln!("{e:#}");
            1
        }
    }
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// The name this factory answers to.
    fn name(&self) -> &'static str;

    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}

/// Factory for one [`BuiltinCommand`] type.
pub(crate) struct Factory<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

/// Name-to-handler table consulted by the dispatcher.
pub struct Builtins {
    factories: Vec<Box<dyn CommandFactory>>,
}

impl Builtins {
    /// Create a table from a custom set of factories.
    pub fn new(factories: Vec<Box<dyn CommandFactory>>) -> Self {
        Self { factories }
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.factories.iter().any(|f| f.name() == name)
    }

    /// Builtin names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.iter().map(|f| f.name())
    }

    /// Parse `args` for the builtin called `name`.
    pub fn create(&self, name: &str, args: &[String]) -> Option<Box<dyn ExecutableCommand>> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.factories
            .iter()
            .find_map(|factory| factory.try_create(name, &args))
    }
}

impl Default for Builtins {
    /// `cd`, `pwd`, `echo`, `alias`, `unalias`, `history` and `exit`.
    fn default() -> Self {
        Self::new(vec![
            Box::new(Factory::<Cd>::default()),
            Box::new(Factory::<Pwd>::default()),
            Box::new(Factory::<Echo>::default()),
            Box::new(Factory::<Alias>::default()),
            Box::new(Factory::<Unalias>::default()),
            Box::new(Factory::<History>::default()),
            Box::new(Factory::<Exit>::default()),
        ])
    }
}

#[derive(FromArgs)]
/// print the shell's working directory.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", env.current_dir.to_string_lossy())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// change the working directory (default: $HOME).
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => bail!("no target and HOME not set"),
            },
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("can't canonicalize {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("can't chdir to {}", canonical.display()))?;
        env.set_var("PWD", canonical.to_string_lossy());
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell after the current line.
pub struct Exit {
    #[argh(positional, default = "0")]
    /// exit status reported by the shell, 0 when omitted.
    pub status: ExitCode,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        env.request_exit(self.status);
        Ok(self.status)
    }
}

#[derive(FromArgs)]
/// print the arguments joined by single spaces, followed by a newline.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// define or display aliases.
/// without arguments, print every alias as name=value.
pub struct Alias {
    #[argh(positional, greedy)]
    /// name=value to define an alias, or name to print one.
    pub definitions: Vec<String>,
}

impl BuiltinCommand for Alias {
    fn name() -> &'static str {
        "alias"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.definitions.is_empty() {
            for (name, value) in &env.aliases {
                writeln!(stdout, "{}={}", name, value)?;
            }
            return Ok(0);
        }

        let mut status = 0;
        for definition in self.definitions {
            match definition.split_once('=') {
                Some(("", _)) => bail!("`{}`: invalid alias name", definition),
                Some((name, value)) => {
                    env.aliases.insert(name.to_string(), value.to_string());
                }
                None => match env.aliases.get(&definition) {
                    Some(value) => writeln!(stdout, "{}={}", definition, value)?,
                    None => {
                        eprintln!("alias: {}: not found", definition);
                        status = 1;
                    }
                },
            }
        }
        Ok(status)
    }
}

#[derive(FromArgs)]
/// remove aliases.
pub struct Unalias {
    #[argh(switch, short = 'a')]
    /// remove every alias.
    pub all: bool,

    #[argh(positional)]
    /// names of the aliases to remove.
    pub names: Vec<String>,
}

impl BuiltinCommand for Unalias {
    fn name() -> &'static str {
        "unalias"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.all {
            env.aliases.clear();
            return Ok(0);
        }
        if self.names.is_empty() {
            bail!("usage: unalias [-a] name [name ...]");
        }

        let mut status = 0;
        for name in &self.names {
            if env.aliases.remove(name).is_none() {
                eprintln!("unalias: {}: not found", name);
                status = 1;
            }
        }
        Ok(status)
    }
}

#[derive(FromArgs)]
/// print the numbered command history.
pub struct History {
    #[argh(positional)]
    /// only print the last COUNT entries.
    pub count: Option<usize>,
}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let total = env.history.len();
        let skip = self.count.map_or(0, |count| total.saturating_sub(count));
        for (i, line) in env.history.iter().enumerate().skip(skip) {
            writeln!(stdout, "{:>5}  {}", i + 1, line)?;
        }
        Ok(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::env as stdenv;
    use std::io::Cursor;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    pub(crate) fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn test_env() -> Environment {
        Environment::empty(stdenv::current_dir().unwrap())
    }

    fn run_builtin(env: &mut Environment, name: &str, args: &[&str]) -> (ExitCode, String) {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let cmd = Builtins::default().create(name, &args).expect("builtin");
        let mut out = Vec::new();
        let code = run_command(cmd, &mut Cursor::new(Vec::new()), &mut out, env);
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_registry_knows_every_builtin() {
        let builtins = Builtins::default();
        let names: Vec<_> = builtins.names().collect();
        assert_eq!(
            names,
            ["cd", "pwd", "echo", "alias", "unalias", "history", "exit"]
        );
        assert!(builtins.is_builtin("cd"));
        assert!(!builtins.is_builtin("ls"));
        assert!(builtins.create("ls", &[]).is_none());
    }

    #[test]
    fn test_pwd_prints_current_dir() {
        let _lock = lock_current_dir();
        let cur = stdenv::current_dir().unwrap();

        let mut env = test_env();

        let mut out = Vec::new();
        let cmd = Pwd {};
        let res = cmd.execute(&mut Cursor::new(Vec::new()), &mut out, &mut env);

        assert!(res.is_ok());

        let s = String::from_utf8(out).unwrap();
        let expected = format!("{}\n", cur.to_string_lossy());

        assert_eq!(s, expected);
    }

    #[test]
    fn test_echo_with_and_without_newline() {
        let mut env = test_env();

        let (code, out) = run_builtin(&mut env, "echo", &["hello", "world"]);
        assert_eq!(code, 0);
        assert_eq!(out, "hello world\n");

        let (code, out) = run_builtin(&mut env, "echo", &["-n", "foo", "bar"]);
        assert_eq!(code, 0);
        assert_eq!(out, "foo bar");
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).expect("canonicalize failed");

        // save original cwd to restore later
        let orig = stdenv::current_dir().unwrap();
        let mut env = test_env();

        let target = Some(canonical_temp.to_string_lossy().to_string());
        let cmd = Cd { target };
        let res = cmd.execute(&mut Cursor::new(Vec::new()), &mut Vec::new(), &mut env);

        assert!(res.is_ok());

        let new_canonical = fs::canonicalize(stdenv::current_dir().unwrap()).unwrap();

        assert_eq!(new_canonical, canonical_temp);
        assert_eq!(env.current_dir, canonical_temp);
        assert_eq!(env.get_var("PWD"), Some(&*canonical_temp.to_string_lossy()));

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
    }

    #[test]
    fn test_cd_to_home_when_none() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).expect("canonicalize failed");

        let orig = stdenv::current_dir().unwrap();
        let mut env = test_env();
        env.set_var("HOME", canonical_temp.to_string_lossy().to_string());

        let cmd = Cd { target: None };
        let res = cmd.execute(&mut Cursor::new(Vec::new()), &mut Vec::new(), &mut env);

        assert!(res.is_ok());
        assert_eq!(env.current_dir, canonical_temp);

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
    }

    #[test]
    fn test_cd_nonexistent_path_errors() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut env = test_env();

        let name = format!("nonexistent_dir_for_pipesh_test_{}", std::process::id());
        let (code, _) = run_builtin(&mut env, "cd", &[&name]);

        assert_eq!(code, 1);
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_cd_without_home_errors() {
        let mut env = test_env();
        let res = Cd { target: None }.execute(&mut Cursor::new(Vec::new()), &mut Vec::new(), &mut env);
        assert!(res.is_err());
    }

    #[test]
    fn test_alias_define_list_and_lookup() {
        let mut env = test_env();

        let (code, _) = run_builtin(&mut env, "alias", &["ll=ls", "g=grep"]);
        assert_eq!(code, 0);
        assert_eq!(env.aliases.get("ll").map(String::as_str), Some("ls"));

        let (code, out) = run_builtin(&mut env, "alias", &[]);
        assert_eq!(code, 0);
        assert_eq!(out, "g=grep\nll=ls\n");

        let (code, out) = run_builtin(&mut env, "alias", &["ll"]);
        assert_eq!(code, 0);
        assert_eq!(out, "ll=ls\n");

        let (code, out) = run_builtin(&mut env, "alias", &["missing"]);
        assert_eq!(code, 1);
        assert_eq!(out, "");

        let (code, _) = run_builtin(&mut env, "alias", &["=oops"]);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_unalias_removes_names() {
        let mut env = test_env();
        env.aliases.insert("a".into(), "ls".into());
        env.aliases.insert("b".into(), "pwd".into());

        let (code, _) = run_builtin(&mut env, "unalias", &["a", "zzz"]);
        assert_eq!(code, 1);
        assert!(!env.aliases.contains_key("a"));
        assert!(env.aliases.contains_key("b"));

        let (code, _) = run_builtin(&mut env, "unalias", &["-a"]);
        assert_eq!(code, 0);
        assert!(env.aliases.is_empty());

        let (code, _) = run_builtin(&mut env, "unalias", &[]);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_history_numbers_entries() {
        let mut env = test_env();
        env.history = vec!["ls".into(), "pwd".into(), "echo hi".into()];

        let (code, out) = run_builtin(&mut env, "history", &[]);
        assert_eq!(code, 0);
        assert_eq!(out, "    1  ls\n    2  pwd\n    3  echo hi\n");

        let (_, out) = run_builtin(&mut env, "history", &["2"]);
        assert_eq!(out, "    2  pwd\n    3  echo hi\n");
    }

    #[test]
    fn test_exit_requests_termination() {
        let mut env = test_env();
        let (code, _) = run_builtin(&mut env, "exit", &["4"]);
        assert_eq!(code, 4);
        assert!(env.should_exit);
        assert_eq!(env.exit_status, 4);

        let mut env = test_env();
        let (code, _) = run_builtin(&mut env, "exit", &[]);
        assert_eq!(code, 0);
        assert!(env.should_exit);
    }

    #[test]
    fn test_bad_arguments_report_status_one() {
        let mut env = test_env();
        let (code, _) = run_builtin(&mut env, "exit", &["not-a-number"]);
        assert_eq!(code, 1);
        assert!(!env.should_exit);

        let (code, out) = run_builtin(&mut env, "pwd", &["--help"]);
        assert_eq!(code, 0);
        assert!(out.contains("Usage: pwd"));
    }
}
