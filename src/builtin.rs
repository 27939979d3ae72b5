//! Built-in commands known to the shell at compile time.
//!
//! A builtin that forms a whole pipeline by itself runs in the shell
//! process against the real state, which is how `cd`, `export`, `unset`
//! and `exit` make their effects outlive the line; inside a larger
//! pipeline the executor forks it like any other stage, so nothing leaks
//! back.
//!
//! Argument handling is deliberately bash-flavored rather than GNU-flavored:
//! `echo -nnn` is a flag, `echo -x` is data, and `export A+=b` is an
//! assignment, none of which fit a conventional flags parser.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use crate::env::Environment;
use crate::external::describe_io_error;
use crate::ExitCode;

/// A command implemented by the shell itself.
pub trait Builtin: Sync {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name(&self) -> &'static str;

    /// Executes the command using provided IO streams and environment.
    ///
    /// Return value follows shell conventions: 0 for success, non-zero for
    /// error. Diagnostics go to the shell's stderr, which redirections do
    /// not touch.
    fn execute(
        &self,
        args: &[String],
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

static BUILTINS: &[&dyn Builtin] = &[&Echo, &Cd, &Pwd, &Export, &Unset, &EnvCmd, &Exit];

/// Find a builtin by name.
pub fn lookup(name: &str) -> Option<&'static dyn Builtin> {
    BUILTINS.iter().find(|b| b.name() == name).copied()
}

pub fn is_builtin(name: &str) -> bool {
    lookup(name).is_some()
}

/// Shell identifier check shared by `export` and `unset`.
fn valid_identifier(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
        .is_match(name)
}

/// Write the arguments to standard output separated by single spaces.
pub struct Echo;

fn is_n_flag(arg: &str) -> bool {
    arg.len() >= 2 && arg.starts_with('-') && arg[1..].bytes().all(|b| b == b'n')
}

impl Builtin for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn execute(
        &self,
        args: &[String],
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let mut newline = true;
        let mut rest = args;
        while let Some(first) = rest.first() {
            if is_n_flag(first) {
                newline = false;
                rest = &rest[1..];
            } else {
                break;
            }
        }
        write!(stdout, "{}", rest.join(" "))?;
        if newline {
            writeln!(stdout)?;
        }
        Ok(0)
    }
}

/// Change the current working directory, updating `PWD` and `OLDPWD`.
pub struct Cd;

impl Builtin for Cd {
    fn name(&self) -> &'static str {
        "cd"
    }

    fn execute(
        &self,
        args: &[String],
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match args {
            [] => Ok(0),
            [target] => match std::env::set_current_dir(target) {
                Ok(()) => {
                    let old = env.current_dir.clone();
                    env.set("OLDPWD", &old.to_string_lossy());
                    let new_dir =
                        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(target));
                    env.set("PWD", &new_dir.to_string_lossy());
                    env.current_dir = new_dir;
                    Ok(0)
                }
                Err(e) => {
                    eprintln!("minishell: cd: {}: {}", target, describe_io_error(&e));
                    Ok(1)
                }
            },
            _ => {
                eprintln!("minishell: cd: too many arguments");
                Ok(1)
            }
        }
    }
}

/// Print the current working directory.
pub struct Pwd;

impl Builtin for Pwd {
    fn name(&self) -> &'static str {
        "pwd"
    }

    fn execute(
        &self,
        _args: &[String],
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", env.current_dir.display())?;
        Ok(0)
    }
}

/// Mark variables for export: `NAME`, `NAME=VALUE` or `NAME+=VALUE`.
/// Without operands, list the table sorted by name.
pub struct Export;

impl Builtin for Export {
    fn name(&self) -> &'static str {
        "export"
    }

    fn execute(
        &self,
        args: &[String],
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        if args.is_empty() {
            let mut entries: Vec<_> = env.iter().collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in entries {
                match &entry.value {
                    Some(value) => writeln!(stdout, "declare -x {}=\"{}\"", entry.name, value)?,
                    None => writeln!(stdout, "declare -x {}", entry.name)?,
                }
            }
            return Ok(0);
        }

        let mut status = 0;
        for arg in args {
            match arg.find('=') {
                Some(eq) => {
                    let value = &arg[eq + 1..];
                    let (name, append) = match arg[..eq].strip_suffix('+') {
                        Some(name) => (name, true),
                        None => (&arg[..eq], false),
                    };
                    if !valid_identifier(name) {
                        eprintln!("minishell: export: `{}': not a valid identifier", arg);
                        status = 1;
                        continue;
                    }
                    if append {
                        env.append(name, value);
                    } else {
                        env.set(name, value);
                    }
                }
                None => {
                    if !valid_identifier(arg) {
                        eprintln!("minishell: export: `{}': not a valid identifier", arg);
                        status = 1;
                        continue;
                    }
                    env.set_unvalued(arg);
                }
            }
        }
        Ok(status)
    }
}

/// Remove variables from the environment.
pub struct Unset;

impl Builtin for Unset {
    fn name(&self) -> &'static str {
        "unset"
    }

    fn execute(
        &self,
        args: &[String],
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let mut failures = 0;
        for arg in args {
            if valid_identifier(arg) {
                env.unset(arg);
            } else {
                eprintln!("minishell: unset: `{}': not a valid identifier", arg);
                failures += 1;
            }
        }
        if !args.is_empty() && failures == args.len() {
            Ok(1)
        } else {
            Ok(0)
        }
    }
}

/// Print the valued entries in insertion order. Takes no operands.
pub struct EnvCmd;

impl Builtin for EnvCmd {
    fn name(&self) -> &'static str {
        "env"
    }

    fn execute(
        &self,
        args: &[String],
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        if let Some(arg) = args.first() {
            eprintln!("minishell: env: {}: No such file or directory", arg);
            return Ok(127);
        }
        for (name, value) in env.snapshot() {
            writeln!(stdout, "{}={}", name, value)?;
        }
        Ok(0)
    }
}

/// Leave the shell, optionally with an explicit status.
pub struct Exit;

fn parse_exit_code(arg: &str) -> Option<i32> {
    arg.parse::<i64>().ok().map(|v| v.rem_euclid(256) as i32)
}

impl Builtin for Exit {
    fn name(&self) -> &'static str {
        "exit"
    }

    fn execute(
        &self,
        args: &[String],
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        eprintln!("exit");
        match args {
            [] => {
                env.should_exit = true;
                Ok(env.last_status)
            }
            [arg] => match parse_exit_code(arg) {
                Some(code) => {
                    env.should_exit = true;
                    Ok(code)
                }
                None => {
                    eprintln!("minishell: exit: {}: numeric argument required", arg);
                    env.should_exit = true;
                    Ok(2)
                }
            },
            _ => {
                eprintln!("minishell: exit: too many arguments");
                Ok(1)
            }
        }
    }
}
