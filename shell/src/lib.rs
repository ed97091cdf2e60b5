//! A small POSIX-like command interpreter.
//!
//! A line such as `sort < in.txt | uniq -c | head > out.txt` is split into
//! words, partitioned into a [`Pipeline`] of command descriptors by
//! [`partition`], and realized by [`run`] as one child process per stage
//! connected by pipes. The [`Interpreter`] ties these together with
//! builtins, aliases, variables, history and an interactive loop.
//!
//! ```no_run
//! use pipesh::{Builtins, partition, run};
//! use pipesh::env::Environment;
//!
//! let pipeline = partition(&["ls", "-l", "|", "wc", "-l"]).unwrap();
//! let status = run(&pipeline, &Environment::new(), &Builtins::default()).unwrap();
//! assert_eq!(status, 0);
//! ```

pub mod builtin;
pub mod command;
pub mod completion;
pub mod env;
pub mod expand;
pub mod external;
pub mod history;
pub mod interpreter;
pub mod lexer;
pub mod parser;

pub use builtin::Builtins;
pub use command::{CommandSpec, ExitCode, Pipeline, STATUS_FAILED};
pub use external::run;
pub use interpreter::Interpreter;
pub use parser::partition;
