//! Process orchestrator: realizes a [`Pipeline`] as child processes.
//!
//! Every descriptor the parent opens is an [`OwnedFd`], so it is closed on
//! every path out of a function (normal return, `?`, or a fork failure)
//! without mirrored `close` calls. Pipes are created with `O_CLOEXEC`; the
//! only descriptors a program inherits are the ones duplicated onto its
//! stdin and stdout.

use crate::builtin::Builtins;
use crate::command::{CommandSpec, ExitCode, InputSource, OutputSink, Pipeline, STATUS_FAILED};
use crate::env::Environment;
use anyhow::Context;
use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, FdFlag, OFlag};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{self, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use std::borrow::Cow;
use std::ffi::{CString, OsStr};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Child exit status when `argv[0]` cannot be found.
pub const EXIT_NOT_FOUND: ExitCode = 127;
/// Child exit status when the program exists but cannot be executed.
pub const EXIT_NOT_EXECUTABLE: ExitCode = 126;
/// Child exit status when a redirection file cannot be opened or a
/// descriptor cannot be wired.
pub const EXIT_REDIRECT_FAILED: ExitCode = 1;

const REDIRECT_MODE: u32 = 0o644;

/// Resource failures that stop a pipeline from being started completely.
///
/// Stages spawned before the failure have already been waited on when this
/// error is returned.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("cannot create pipe after stage {stage}: {source}")]
    Pipe {
        stage: usize,
        #[source]
        source: Errno,
    },
    #[error("cannot create process for stage {stage}: {source}")]
    Fork {
        stage: usize,
        #[source]
        source: Errno,
    },
}

/// A spawned stage, owned by the orchestrator until it is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcessHandle {
    pid: Pid,
    stage: usize,
}

/// The pipe ends a child receives at fork time.
///
/// `stdin` and `stdout` are duplicated onto descriptors 0 and 1; `unused` is
/// the read end of the stage's own pipe, which belongs to the next stage.
/// Whatever is left is closed when the value is dropped.
struct StageFds {
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
    unused: Option<OwnedFd>,
}

/// Run every stage of `pipeline` and wait for all of them.
///
/// Returns the status of the last stage: its exit code, or `-signal` when it
/// was killed. Stages that fail to open a redirection or to exec report that
/// through their own exit status only.
pub fn run(
    pipeline: &Pipeline,
    env: &Environment,
    builtins: &Builtins,
) -> Result<ExitCode, SpawnError> {
    let mut children = Vec::with_capacity(pipeline.len());
    let spawned = spawn_stages(pipeline, env, builtins, &mut children);
    // spawn_stages has dropped every descriptor by now, so no child can block
    // on a pipe end the parent still holds.
    let statuses: Vec<ExitCode> = children.iter().map(|child| wait_for(*child)).collect();
    spawned?;
    Ok(statuses.last().copied().unwrap_or(STATUS_FAILED))
}

fn spawn_stages(
    pipeline: &Pipeline,
    env: &Environment,
    builtins: &Builtins,
    children: &mut Vec<ProcessHandle>,
) -> Result<(), SpawnError> {
    let mut previous_read_end: Option<OwnedFd> = None;

    for (index, stage) in pipeline.stages().iter().enumerate() {
        let (this_read_end, this_write_end) = if stage.output == OutputSink::ToPipe {
            let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC)
                .map_err(|source| SpawnError::Pipe { stage: index, source })?;
            (Some(read), Some(write))
        } else {
            (None, None)
        };

        // SAFETY: the interpreter is single-threaded; the child only sets up
        // descriptors and then execs or exits.
        match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => {
                let fds = StageFds {
                    stdin: previous_read_end,
                    stdout: this_write_end,
                    unused: this_read_end,
                };
                run_child(stage, env, builtins, fds)
            }
            Ok(ForkResult::Parent { child }) => {
                tracing::debug!(pid = %child, stage = index, program = stage.name(), "spawned");
                children.push(ProcessHandle { pid: child, stage: index });
                drop(this_write_end);
                drop(previous_read_end);
                previous_read_end = this_read_end;
            }
            Err(source) => return Err(SpawnError::Fork { stage: index, source }),
        }
    }
    Ok(())
}

fn wait_for(child: ProcessHandle) -> ExitCode {
    loop {
        match wait::waitpid(child.pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                tracing::debug!(pid = %child.pid, stage = child.stage, code, "reaped");
                return code;
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                tracing::debug!(pid = %child.pid, stage = child.stage, %signal, "killed");
                return -(signal as ExitCode);
            }
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(errno) => {
                tracing::warn!(pid = %child.pid, %errno, "waitpid failed");
                return STATUS_FAILED;
            }
        }
    }
}

fn run_child(stage: &CommandSpec, env: &Environment, builtins: &Builtins, fds: StageFds) -> ! {
    let status = match wire_stdio(stage, fds) {
        Ok(()) => exec_stage(stage, env, builtins),
        Err(err) => {
            report(&format!("{}: {err:#}", stage.name()));
            EXIT_REDIRECT_FAILED
        }
    };
    // SAFETY: _exit skips atexit handlers and stdio flushing, which belong
    // to the parent's copy of the process.
    unsafe { nix::libc::_exit(status) }
}

fn wire_stdio(stage: &CommandSpec, fds: StageFds) -> anyhow::Result<()> {
    let StageFds { stdin, stdout, unused } = fds;
    drop(unused);

    match (&stage.input, stdin) {
        (InputSource::FromPipe, Some(fd)) => redirect(fd, io::stdin().as_raw_fd())?,
        (InputSource::FromFile(path), _) => {
            let file = open_input(path).with_context(|| path.clone())?;
            redirect(file.into(), io::stdin().as_raw_fd())?;
        }
        _ => {}
    }
    match (&stage.output, stdout) {
        (OutputSink::ToPipe, Some(fd)) => redirect(fd, io::stdout().as_raw_fd())?,
        (OutputSink::ToFile(path) | OutputSink::AppendFile(path), _) => {
            let file = open_output(&stage.output).with_context(|| path.clone())?;
            redirect(file.into(), io::stdout().as_raw_fd())?;
        }
        _ => {}
    }
    Ok(())
}

/// Make `target` refer to what `fd` refers to, then close `fd`.
fn redirect(fd: OwnedFd, target: RawFd) -> nix::Result<()> {
    if fd.as_raw_fd() == target {
        // Already in place; keep it open across exec.
        let raw = fd.into_raw_fd();
        fcntl::fcntl(raw, FcntlArg::F_SETFD(FdFlag::empty()))?;
        return Ok(());
    }
    unistd::dup2(fd.as_raw_fd(), target)?;
    Ok(())
}

fn exec_stage(stage: &CommandSpec, env: &Environment, builtins: &Builtins) -> ExitCode {
    restore_default_signals();

    if let Some(command) = builtins.create(stage.name(), stage.args()) {
        let mut env = env.clone();
        let status = crate::builtin::run_command(
            command,
            &mut io::stdin().lock(),
            &mut io::stdout().lock(),
            &mut env,
        );
        let _ = io::stdout().flush();
        return status;
    }

    let search_paths = env.get_var("PATH").unwrap_or_default();
    let Some(program) = find_command_path(OsStr::new(search_paths), Path::new(stage.name()))
    else {
        report(&format!("{}: command not found", stage.name()));
        return EXIT_NOT_FOUND;
    };

    let argv: Result<Vec<CString>, _> = stage.argv.iter().map(|a| CString::new(a.as_str())).collect();
    let (Ok(argv), Ok(program)) = (argv, CString::new(program.as_os_str().as_bytes())) else {
        report(&format!("{}: argument contains a NUL byte", stage.name()));
        return EXIT_NOT_EXECUTABLE;
    };

    let Err(errno) = unistd::execve(&program, &argv, &env.envp());
    report(&format!("{}: {errno}", stage.name()));
    EXIT_NOT_EXECUTABLE
}

/// Rust ignores SIGPIPE and the interactive loop ignores SIGINT and SIGQUIT;
/// a stage, builtin or program, runs with the defaults so that writing to a
/// closed pipe ends it quietly.
fn restore_default_signals() {
    for sig in [Signal::SIGPIPE, Signal::SIGINT, Signal::SIGQUIT] {
        // SAFETY: restoring the default disposition installs no handler.
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }
}

/// Write a diagnostic line straight to descriptor 2.
///
/// Used between fork and exec, where taking the std stderr lock is not safe.
fn report(message: &str) {
    let line = format!("pipesh: {message}\n");
    let _ = unistd::write(io::stderr(), line.as_bytes());
}

/// Open the file named by `< path`.
pub(crate) fn open_input(path: &str) -> io::Result<File> {
    File::open(path)
}

/// Open the file named by `> path` (truncating) or `>> path` (appending).
///
/// Fails with `InvalidInput` for sinks that are not files.
pub(crate) fn open_output(sink: &OutputSink) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).mode(REDIRECT_MODE);
    let path = match sink {
        OutputSink::ToFile(path) => {
            options.write(true).truncate(true);
            path
        }
        OutputSink::AppendFile(path) => {
            options.append(true);
            path
        }
        OutputSink::Stdout | OutputSink::ToPipe => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "output is not a file",
            ));
        }
    };
    options.open(path)
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`): returns it if it exists.
/// - `./foo`: returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first regular file with that name.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    if path.starts_with("./") && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, _) => None,
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.is_file())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}
