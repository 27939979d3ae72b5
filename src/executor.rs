//! Realization of a parsed pipeline as processes.
//!
//! Every command of a multi-command pipeline becomes a child process,
//! spawned left to right with its stdout chained into the next command's
//! stdin through a kernel pipe. External commands go through
//! `std::process::Command`; builtins and redirection-only commands fork
//! directly, wire their descriptors with `dup2`, run in the child and
//! `_exit`, so their side effects die with the child. Redirections are
//! applied in declaration order, later ones overriding earlier ones for the
//! same descriptor, and every file named in a redirection is opened whether
//! or not the command itself can run.
//!
//! The one exception is a builtin that forms the whole pipeline by itself:
//! it runs in the parent, which is how `cd`, `export`, `unset` and `exit`
//! make their effects outlive the line.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};

use log::debug;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, fork, pipe, ForkResult, Pid};

use crate::builtin::{self, Builtin};
use crate::env::Environment;
use crate::external::{self, describe_io_error};
use crate::parser::{Pipeline, Redirect, RedirectKind, SimpleCommand};
use crate::signal;
use crate::ExitCode;

/// Execute one pipeline and return the status `$?` should take: the status
/// of the rightmost command. Diagnostics are printed here; the caller only
/// records the status.
pub fn run_pipeline(mut pipeline: Pipeline, env: &mut Environment) -> ExitCode {
    if pipeline.commands.len() == 1 {
        let name = pipeline.commands[0].argv.first().map(|w| w.text.clone());
        if let Some(b) = name.as_deref().and_then(builtin::lookup) {
            return run_builtin_in_parent(b, pipeline.commands.remove(0), env);
        }
    }
    run_pipeline_children(pipeline, env)
}

/// Where a stage reads its input from.
enum StageInput {
    /// First stage with no redirection: the shell's own stdin.
    Inherit,
    /// Upstream produced nothing (failed stage, redirected-away stdout).
    Closed,
    /// Read end of the pipe from the previous stage.
    Pipe(OwnedFd),
    /// An input redirection or staged here-document.
    File(File),
}

enum Stage {
    /// External command spawned through `std::process::Command`.
    Spawned(Child),
    /// Builtin or empty-argv command forked directly.
    Forked(Pid),
    /// Never became a child: redirection open failure, resolution failure.
    Finished(ExitCode),
}

fn run_pipeline_children(pipeline: Pipeline, env: &mut Environment) -> ExitCode {
    signal::enter_exec_phase();

    let count = pipeline.commands.len();
    let mut stages: Vec<Stage> = Vec::with_capacity(count);
    let mut prev = StageInput::Inherit;
    let mut fatal = false;

    for (index, mut command) in pipeline.commands.into_iter().enumerate() {
        let last = index + 1 == count;
        let upstream = std::mem::replace(&mut prev, StageInput::Closed);

        let redirected = match open_redirections(&mut command.redirects) {
            Ok(r) => r,
            Err(status) => {
                stages.push(Stage::Finished(status));
                continue;
            }
        };
        let input = match redirected.input {
            Some(file) => StageInput::File(file),
            None => upstream,
        };

        let args: Vec<String> = command.argv.iter().map(|w| w.text.clone()).collect();
        let Some((name, rest)) = args.split_first() else {
            // redirections only: the child just exits 0
            match fork_in_shell_stage(input, redirected.output, None, || 0) {
                Ok(pid) => stages.push(Stage::Forked(pid)),
                Err(errno) => {
                    eprintln!("minishell: fork: {}", errno);
                    fatal = true;
                    break;
                }
            }
            continue;
        };

        if let Some(b) = builtin::lookup(name) {
            let (next_read, write_end) = if redirected.output.is_none() && !last {
                match pipe() {
                    Ok((read, write)) => (Some(read), Some(write)),
                    Err(errno) => {
                        eprintln!("minishell: pipe: {}", errno);
                        fatal = true;
                        break;
                    }
                }
            } else {
                (None, None)
            };
            let forked = fork_in_shell_stage(input, redirected.output, write_end, || {
                run_builtin_in_child(b, rest, env)
            });
            match forked {
                Ok(pid) => {
                    if let Some(read) = next_read {
                        prev = StageInput::Pipe(read);
                    }
                    stages.push(Stage::Forked(pid));
                }
                Err(errno) => {
                    eprintln!("minishell: fork: {}", errno);
                    fatal = true;
                    break;
                }
            }
            continue;
        }

        let path = match external::resolve(env, name) {
            Ok(path) => path,
            Err(err) => {
                eprintln!("minishell: {}", err);
                stages.push(Stage::Finished(err.status()));
                continue;
            }
        };
        debug!("resolved {} -> {}", name, path.display());

        let mut process = Command::new(&path);
        process
            .args(rest)
            .env_clear()
            .envs(env.snapshot())
            .current_dir(&env.current_dir);

        process.stdin(match input {
            StageInput::File(file) => Stdio::from(file),
            StageInput::Pipe(fd) => Stdio::from(fd),
            StageInput::Inherit => Stdio::inherit(),
            StageInput::Closed => Stdio::null(),
        });

        let wants_pipe = redirected.output.is_none() && !last;
        process.stdout(match redirected.output {
            Some(file) => Stdio::from(file),
            None if !last => Stdio::piped(),
            None => Stdio::inherit(),
        });

        unsafe {
            process.pre_exec(signal::restore_child_defaults);
        }

        match process.spawn() {
            Ok(mut child) => {
                if wants_pipe {
                    if let Some(out) = child.stdout.take() {
                        prev = StageInput::Pipe(OwnedFd::from(out));
                    }
                }
                stages.push(Stage::Spawned(child));
            }
            Err(e) => {
                eprintln!("minishell: {}: {}", name, describe_io_error(&e));
                stages.push(Stage::Finished(126));
            }
        }
    }

    // all parent pipe copies are gone by now; reap in spawn order
    drop(prev);
    let mut last_status = 0;
    let mut saw_sigint = false;
    for (index, stage) in stages.into_iter().enumerate() {
        last_status = match stage {
            Stage::Finished(status) => status,
            Stage::Spawned(mut child) => match child.wait() {
                Ok(status) => exit_code_of(status, &mut saw_sigint),
                Err(e) => {
                    eprintln!("minishell: wait: {}", describe_io_error(&e));
                    1
                }
            },
            Stage::Forked(pid) => match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, code)) => code,
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    if sig == Signal::SIGINT {
                        saw_sigint = true;
                    }
                    128 + sig as i32
                }
                Ok(_) => 1,
                Err(errno) => {
                    eprintln!("minishell: wait: {}", errno);
                    1
                }
            },
        };
        debug!("stage {} finished with status {}", index, last_status);
    }
    if saw_sigint {
        println!();
    }
    if fatal {
        last_status = 1;
    }

    signal::enter_prompt_phase();
    last_status
}

/// Fork one in-shell stage. The child gets the same descriptor plumbing an
/// exec'd command would, runs `body`, and `_exit`s with its status; the
/// parent's copies of the descriptors are closed before this returns.
fn fork_in_shell_stage(
    input: StageInput,
    output: Option<File>,
    pipe_out: Option<OwnedFd>,
    body: impl FnOnce() -> ExitCode,
) -> nix::Result<Pid> {
    match unsafe { fork() }? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            let _ = signal::restore_child_defaults();
            wire_stdin(&input);
            wire_stdout(&output, &pipe_out);
            let status = body();
            unsafe { nix::libc::_exit(status) }
        }
    }
}

fn wire_stdin(input: &StageInput) {
    match input {
        StageInput::File(file) => {
            let _ = dup2(file.as_raw_fd(), 0);
        }
        StageInput::Pipe(fd) => {
            let _ = dup2(fd.as_raw_fd(), 0);
        }
        StageInput::Inherit => {}
        StageInput::Closed => {
            if let Ok(null) = File::open("/dev/null") {
                let _ = dup2(null.as_raw_fd(), 0);
            }
        }
    }
}

fn wire_stdout(output: &Option<File>, pipe_out: &Option<OwnedFd>) {
    if let Some(file) = output {
        let _ = dup2(file.as_raw_fd(), 1);
    } else if let Some(write) = pipe_out {
        let _ = dup2(write.as_raw_fd(), 1);
    }
}

/// Body of a forked builtin stage. Runs against a copy of the environment;
/// any mutation dies with the child, which is the isolation the fork is for.
fn run_builtin_in_child(b: &dyn Builtin, args: &[String], env: &Environment) -> ExitCode {
    let mut scratch = env.clone();
    let mut empty = std::io::empty();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let status = match b.execute(args, &mut empty, &mut out, &mut scratch) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("minishell: {}: {}", b.name(), e);
            1
        }
    };
    let _ = out.flush();
    status
}

fn exit_code_of(status: ExitStatus, saw_sigint: &mut bool) -> ExitCode {
    if let Some(code) = status.code() {
        return code;
    }
    if let Some(sig) = status.signal() {
        if sig == nix::libc::SIGINT {
            *saw_sigint = true;
        }
        return 128 + sig;
    }
    1
}

/// Singleton-builtin carve-out: run against the real environment so `cd`,
/// `export`, `unset` and `exit` keep their effects.
fn run_builtin_in_parent(
    b: &dyn Builtin,
    mut command: SimpleCommand,
    env: &mut Environment,
) -> ExitCode {
    let redirected = match open_redirections(&mut command.redirects) {
        Ok(r) => r,
        Err(status) => return status,
    };
    let args: Vec<String> = command.argv[1..].iter().map(|w| w.text.clone()).collect();

    let mut file_in;
    let mut std_in;
    let stdin: &mut dyn Read = match redirected.input {
        Some(file) => {
            file_in = file;
            &mut file_in
        }
        None => {
            std_in = std::io::stdin();
            &mut std_in
        }
    };
    let mut file_out;
    let mut std_out;
    let stdout: &mut dyn Write = match redirected.output {
        Some(file) => {
            file_out = file;
            &mut file_out
        }
        None => {
            std_out = std::io::stdout();
            &mut std_out
        }
    };

    match b.execute(&args, stdin, stdout, env) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("minishell: {}: {}", b.name(), e);
            1
        }
    }
}

struct Redirected {
    input: Option<File>,
    output: Option<File>,
}

/// Open every redirection in declaration order; the last one per descriptor
/// wins. The first failure aborts this command with a diagnostic and
/// status 1, leaving the rest of the pipeline to run.
fn open_redirections(redirects: &mut [Redirect]) -> Result<Redirected, ExitCode> {
    let mut input = None;
    let mut output = None;
    for redirect in redirects.iter_mut() {
        let target = redirect.target.text.as_str();
        match redirect.kind {
            RedirectKind::Input => match File::open(target) {
                Ok(file) => input = Some(file),
                Err(e) => {
                    eprintln!("minishell: {}: {}", target, describe_io_error(&e));
                    return Err(1);
                }
            },
            RedirectKind::Heredoc => {
                if let Some(file) = redirect.heredoc.take() {
                    input = Some(file);
                }
            }
            RedirectKind::Output => {
                match OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(target)
                {
                    Ok(file) => output = Some(file),
                    Err(e) => {
                        eprintln!("minishell: {}: {}", target, describe_io_error(&e));
                        return Err(1);
                    }
                }
            }
            RedirectKind::Append => {
                match OpenOptions::new().append(true).create(true).open(target) {
                    Ok(file) => output = Some(file),
                    Err(e) => {
                        eprintln!("minishell: {}: {}", target, describe_io_error(&e));
                        return Err(1);
                    }
                }
            }
        }
    }
    Ok(Redirected { input, output })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heredoc;
    use crate::lexer::{split_into_tokens, Word};
    use crate::parser::construct_pipeline;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn test_env() -> Environment {
        let mut env = Environment::empty();
        env.set("PATH", "/bin:/usr/bin");
        env
    }

    fn run_line(line: &str, env: &mut Environment) -> ExitCode {
        let tokens = split_into_tokens(line).unwrap();
        let mut pipeline = construct_pipeline(tokens).unwrap();
        crate::expand::expand_pipeline(&mut pipeline, env);
        let status = run_pipeline(pipeline, env);
        env.last_status = status;
        status
    }

    fn temp_path(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("minishell_exec_{}_{}_{}", tag, std::process::id(), nanos));
        p
    }

    #[test]
    fn builtin_with_output_redirection_writes_the_file() {
        let mut env = test_env();
        let out = temp_path("builtin_redir");
        let status = run_line(&format!("> {} echo done", out.display()), &mut env);
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "done\n");
        let _ = fs::remove_file(out);
    }

    #[test]
    fn external_pipeline_moves_bytes_through_a_real_pipe() {
        let mut env = test_env();
        let out = temp_path("pipe");
        let status = run_line(&format!("/bin/echo ok | /bin/cat > {}", out.display()), &mut env);
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "ok\n");
        let _ = fs::remove_file(out);
    }

    #[test]
    fn three_stage_pipeline_runs_concurrently() {
        let mut env = test_env();
        let out = temp_path("three");
        let status = run_line(
            &format!("/bin/echo abc | /bin/cat | /bin/cat > {}", out.display()),
            &mut env,
        );
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "abc\n");
        let _ = fs::remove_file(out);
    }

    #[test]
    fn builtin_stage_feeds_a_downstream_external_through_a_pipe() {
        let mut env = test_env();
        let out = temp_path("builtin_feed");
        let status = run_line(&format!("echo hi | /bin/cat > {}", out.display()), &mut env);
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "hi\n");
        let _ = fs::remove_file(out);
    }

    #[test]
    fn builtin_stage_output_larger_than_a_pipe_buffer_does_not_deadlock() {
        let mut env = test_env();
        let out = temp_path("big_feed");
        // 40 args of 8000 bytes each: well past the 64 KiB a kernel pipe holds
        let arg = "x".repeat(8000);
        let mut line = String::from("echo");
        for _ in 0..40 {
            line.push(' ');
            line.push_str(&arg);
        }
        line.push_str(&format!(" | /bin/cat > {}", out.display()));
        let status = run_line(&line, &mut env);
        assert_eq!(status, 0);
        let written = fs::read_to_string(&out).unwrap();
        assert_eq!(written.len(), 40 * 8000 + 39 + 1);
        let _ = fs::remove_file(out);
    }

    #[test]
    fn mutating_builtin_inside_a_pipeline_is_isolated() {
        let mut env = test_env();
        let out = temp_path("isolated");
        let status = run_line(
            &format!("export LEAK=yes | /bin/cat > {}", out.display()),
            &mut env,
        );
        assert_eq!(status, 0);
        assert_eq!(env.get("LEAK"), None);
        let _ = fs::remove_file(out);
    }

    #[test]
    fn missing_command_is_127() {
        let mut env = test_env();
        assert_eq!(run_line("definitely_missing_command_xyz", &mut env), 127);
    }

    #[test]
    fn pipeline_status_is_the_rightmost_commands() {
        let mut env = test_env();
        assert_eq!(run_line("sh -c 'exit 3'", &mut env), 3);
        let out = temp_path("rightmost");
        assert_eq!(
            run_line(
                &format!("sh -c 'exit 7' | /bin/echo ok > {}", out.display()),
                &mut env
            ),
            0
        );
        assert_eq!(run_line("echo hi | sh -c 'exit 7'", &mut env), 7);
        let _ = fs::remove_file(out);
    }

    #[test]
    fn failed_stage_does_not_abort_its_siblings() {
        let mut env = test_env();
        let out = temp_path("siblings");
        let status = run_line(
            &format!(
                "definitely_missing_command_xyz | /bin/echo alive > {}",
                out.display()
            ),
            &mut env,
        );
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "alive\n");
        let _ = fs::remove_file(out);
    }

    #[test]
    fn input_redirection_feeds_the_command() {
        let mut env = test_env();
        let src = temp_path("in_src");
        let out = temp_path("in_out");
        fs::write(&src, "line one\nline two\n").unwrap();
        let status = run_line(
            &format!("/bin/cat < {} > {}", src.display(), out.display()),
            &mut env,
        );
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "line one\nline two\n");
        let _ = fs::remove_file(src);
        let _ = fs::remove_file(out);
    }

    #[test]
    fn append_redirection_accumulates() {
        let mut env = test_env();
        let out = temp_path("append");
        run_line(&format!("> {} echo one", out.display()), &mut env);
        run_line(&format!(">> {} echo two", out.display()), &mut env);
        assert_eq!(fs::read_to_string(&out).unwrap(), "one\ntwo\n");
        let _ = fs::remove_file(out);
    }

    #[test]
    fn later_output_redirection_wins_but_both_files_exist() {
        let mut env = test_env();
        let first = temp_path("multi_a");
        let second = temp_path("multi_b");
        let status = run_line(
            &format!("> {} > {} echo winner", first.display(), second.display()),
            &mut env,
        );
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&first).unwrap(), "");
        assert_eq!(fs::read_to_string(&second).unwrap(), "winner\n");
        let _ = fs::remove_file(first);
        let _ = fs::remove_file(second);
    }

    #[test]
    fn redirection_open_failure_fails_only_that_command() {
        let mut env = test_env();
        assert_eq!(run_line("/bin/cat < /definitely/not/here", &mut env), 1);
        let out = temp_path("redir_fail");
        let status = run_line(
            &format!(
                "/bin/cat < /definitely/not/here | /bin/echo alive > {}",
                out.display()
            ),
            &mut env,
        );
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "alive\n");
        let _ = fs::remove_file(out);
    }

    #[test]
    fn redirections_without_argv_create_files_and_succeed() {
        let mut env = test_env();
        let out = temp_path("touch");
        let status = run_line(&format!("> {}", out.display()), &mut env);
        assert_eq!(status, 0);
        assert!(out.exists());
        let _ = fs::remove_file(out);
    }

    #[test]
    fn heredoc_file_becomes_stdin() {
        let mut env = test_env();
        let out = temp_path("heredoc");
        let body = heredoc::materialize("hi root\n").unwrap();
        let pipeline = Pipeline {
            commands: vec![SimpleCommand {
                argv: vec![Word::unquoted("/bin/cat")],
                redirects: vec![
                    Redirect {
                        kind: RedirectKind::Heredoc,
                        target: Word::unquoted("END"),
                        heredoc: Some(body),
                    },
                    Redirect {
                        kind: RedirectKind::Output,
                        target: Word::unquoted(&out.to_string_lossy()),
                        heredoc: None,
                    },
                ],
            }],
        };
        let status = run_pipeline(pipeline, &mut env);
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "hi root\n");
        let _ = fs::remove_file(out);
    }

    #[test]
    fn signal_terminated_child_reports_128_plus_n() {
        let mut env = test_env();
        // sh kills itself with SIGTERM (15)
        assert_eq!(run_line("sh -c 'kill -TERM $$'", &mut env), 143);
    }

    #[test]
    fn quoted_arguments_reach_the_child_intact() {
        let mut env = test_env();
        let out = temp_path("quoted");
        let status = run_line(&format!("/bin/echo \"a b\" c > {}", out.display()), &mut env);
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "a b c\n");
        let _ = fs::remove_file(out);
    }

    #[test]
    fn same_pipeline_twice_gives_identical_results() {
        let mut env = test_env();
        let out = temp_path("idem");
        let line = format!("/bin/echo stable | /bin/cat > {}", out.display());
        let first_status = run_line(&line, &mut env);
        let first_content = fs::read_to_string(&out).unwrap();
        let second_status = run_line(&line, &mut env);
        let second_content = fs::read_to_string(&out).unwrap();
        assert_eq!(first_status, second_status);
        assert_eq!(first_content, second_content);
        let _ = fs::remove_file(out);
    }
}
