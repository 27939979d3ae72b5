//! Interactive collection of here-document bodies.
//!
//! Bodies are gathered before any child is forked, while the shell still owns
//! the terminal and the awaiting-input signal regime, and are staged in an
//! anonymous temp file the child later inherits as stdin.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::env::Environment;
use crate::expand;
use crate::parser::{Pipeline, RedirectKind};

/// What happened while gathering bodies for one line.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    /// Ctrl-C arrived mid-collection; the whole line must be abandoned.
    Interrupted,
}

/// Read the body of every `<<` redirection in the pipeline, in declaration
/// order, prompting with `> ` until the delimiter line.
///
/// A delimiter that carried quotes suppresses `$` expansion of the body;
/// otherwise each line is expanded like double-quoted text. End-of-file ends
/// the body with a warning, the way interactive shells do.
pub fn collect_heredocs(
    editor: &mut DefaultEditor,
    pipeline: &mut Pipeline,
    env: &Environment,
) -> Result<Outcome> {
    for command in &mut pipeline.commands {
        for redirect in &mut command.redirects {
            if redirect.kind != RedirectKind::Heredoc {
                continue;
            }
            let delimiter = redirect.target.text.clone();
            let expand_body = !redirect.target.quoted;
            let mut body = String::new();
            loop {
                match editor.readline("> ") {
                    Ok(line) => {
                        if line == delimiter {
                            break;
                        }
                        if expand_body {
                            body.push_str(&expand::expand_heredoc_line(&line, env));
                        } else {
                            body.push_str(&line);
                        }
                        body.push('\n');
                    }
                    Err(ReadlineError::Interrupted) => return Ok(Outcome::Interrupted),
                    Err(ReadlineError::Eof) => {
                        eprintln!(
                            "minishell: warning: here-document delimited by end-of-file (wanted '{}')",
                            delimiter
                        );
                        break;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            redirect.heredoc =
                Some(materialize(&body).context("failed to stage here-document")?);
        }
    }
    Ok(Outcome::Complete)
}

/// Write a collected body into an unlinked temp file and rewind it so the
/// consumer reads from the start.
pub fn materialize(body: &str) -> std::io::Result<File> {
    let mut file = tempfile::tempfile()?;
    file.write_all(body.as_bytes())?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}
