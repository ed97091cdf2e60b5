use crate::command::ExitCode;
use std::collections::{BTreeMap, HashMap};
use std::env as stdenv;
use std::ffi::{CString, OsString};
use std::path::PathBuf;

/// Mutable interpreter state threaded through the dispatcher, the builtins
/// and the orchestrator.
///
/// The environment contains:
/// - `vars`: exported variables, handed to every spawned program.
/// - `locals`: shell-local variables created by `NAME=value` words.
/// - `aliases`: alias name to replacement text.
/// - `history`: every accepted input line, oldest first.
/// - `current_dir`: the working directory for command execution.
/// - `should_exit` / `exit_status`: set by the `exit` builtin; an
///   interactive loop checks them after each line.
#[derive(Debug, Clone)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub locals: HashMap<String, String>,
    pub aliases: BTreeMap<String, String>,
    pub history: Vec<String>,
    pub current_dir: PathBuf,
    pub should_exit: bool,
    pub exit_status: ExitCode,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    ///
    /// This copies variables from `std::env::vars_os()` and initializes `current_dir`
    /// from `std::env::current_dir()`. Everything else starts empty.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_vars(current_dir, stdenv::vars_os())
    }

    /// An environment exporting `vars`, rooted at `current_dir`.
    ///
    /// Pairs that are not valid UTF-8 cannot be named by `$NAME` and are
    /// left out.
    pub fn with_vars(
        current_dir: PathBuf,
        vars: impl IntoIterator<Item = (OsString, OsString)>,
    ) -> Self {
        let vars = vars
            .into_iter()
            .filter_map(|(key, val)| match (key.into_string(), val.into_string()) {
                (Ok(key), Ok(val)) => Some((key, val)),
                (key, _) => {
                    tracing::debug!(key = ?key, "skipping non-UTF-8 variable");
                    None
                }
            })
            .collect();
        Self {
            vars,
            ..Self::empty(current_dir)
        }
    }

    /// An environment with no variables at all, rooted at `current_dir`.
    pub fn empty(current_dir: PathBuf) -> Self {
        Self {
            vars: HashMap::new(),
            locals: HashMap::new(),
            aliases: BTreeMap::new(),
            history: Vec::new(),
            current_dir,
            should_exit: false,
            exit_status: 0,
        }
    }

    /// Get the value of an exported variable.
    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set or override an exported variable.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Resolve `$name`: exported variables shadow local ones.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.get_var(name)
            .or_else(|| self.locals.get(name).map(String::as_str))
    }

    pub fn set_local(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.locals.insert(key.into(), val.into());
    }

    /// Exported variables as `KEY=VALUE` C strings for `execve`.
    ///
    /// Pairs containing a NUL byte cannot be passed to a program and are
    /// skipped.
    pub fn envp(&self) -> Vec<CString> {
        self.vars
            .iter()
            .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
            .collect()
    }

    /// Mark the interpreter for termination with `status`.
    pub fn request_exit(&mut self, status: ExitCode) {
        self.should_exit = true;
        self.exit_status = status;
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::env::Environment;
    use std::env as stdenv;
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = Environment::empty(stdenv::current_dir().unwrap());

        // initially absent
        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_var("KEY", "VALUE");

        assert_eq!(env.get_var("KEY"), Some("VALUE"));
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.get_var("PATH").is_some());
    }

    #[test]
    fn test_non_utf8_variables_are_skipped() {
        let vars = vec![
            (OsString::from("GOOD"), OsString::from("yes")),
            (OsString::from("BAD_VALUE"), OsString::from_vec(b"\xff\xfe".to_vec())),
            (OsString::from_vec(b"BAD_\xffKEY".to_vec()), OsString::from("x")),
        ];
        let env = Environment::with_vars(stdenv::current_dir().unwrap(), vars);

        assert_eq!(env.vars.len(), 1);
        assert_eq!(env.get_var("GOOD"), Some("yes"));
        assert_eq!(env.get_var("BAD_VALUE"), None);
    }

    #[test]
    fn test_exported_shadows_local() {
        let mut env = Environment::empty(stdenv::current_dir().unwrap());
        env.set_local("X", "local");
        assert_eq!(env.lookup("X"), Some("local"));

        env.set_var("X", "exported");
        assert_eq!(env.lookup("X"), Some("exported"));
        assert_eq!(env.lookup("Y"), None);
    }

    #[test]
    fn test_envp_only_carries_exported_vars() {
        let mut env = Environment::empty(stdenv::current_dir().unwrap());
        env.set_var("A", "1");
        env.set_local("B", "2");
        env.set_var("BAD", "nul\0byte");

        let envp = env.envp();
        assert_eq!(envp.len(), 1);
        assert_eq!(envp[0].to_str().unwrap(), "A=1");
    }

    #[test]
    fn test_request_exit() {
        let mut env = Environment::empty(stdenv::current_dir().unwrap());
        assert!(!env.should_exit);
        env.request_exit(3);
        assert!(env.should_exit);
        assert_eq!(env.exit_status, 3);
    }
}
