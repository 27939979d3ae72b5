//! An interactive command interpreter for a small POSIX-ish language:
//! pipelines of simple commands with redirections, here-documents,
//! single/double quoting, `$NAME`/`$?` expansion and a handful of builtins.
//!
//! The crate is organized as one module per stage of the line's journey:
//! [`lexer`] splits the input while recording a per-byte quoting mask,
//! [`parser`] builds the flat pipeline tree, [`expand`] rewrites words
//! against the [`env::Environment`], [`heredoc`] gathers `<<` bodies,
//! and [`executor`] realizes the tree as processes, dispatching to
//! [`builtin`] where appropriate. [`signal`] switches dispositions between
//! the prompt and child-running phases, and [`Interpreter`] ties the loop
//! together.

pub mod builtin;
pub mod env;
pub mod executor;
pub mod expand;
pub mod external;
pub mod heredoc;
mod interpreter;
pub mod lexer;
pub mod parser;
pub mod signal;

pub use interpreter::Interpreter;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line
/// tools.
pub type ExitCode = i32;
