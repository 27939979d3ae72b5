//! Top-level read-eval loop: read, lex, parse, expand, gather heredocs,
//! execute, record the status, and always come back to the prompt.

use anyhow::Result;
use log::debug;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::env::Environment;
use crate::executor;
use crate::expand;
use crate::heredoc::{self, Outcome};
use crate::lexer;
use crate::parser;
use crate::signal;
use crate::ExitCode;

const PROMPT: &str = "minishell$ ";

/// The interactive shell: owns the environment and the last exit status,
/// and drives every line through the lex → parse → expand → exec chain.
pub struct Interpreter {
    env: Environment,
}

impl Interpreter {
    /// Create an interpreter seeded from the process environment.
    pub fn new() -> Self {
        Self {
            env: Environment::from_process(),
        }
    }

    /// Run the interactive loop until `exit` or end-of-file. Returns the
    /// status the shell process should leave with.
    pub fn repl(&mut self) -> Result<ExitCode> {
        let mut editor = DefaultEditor::new()?;
        signal::enter_prompt_phase();

        loop {
            if self.env.should_exit {
                break;
            }
            match editor.readline(PROMPT) {
                Ok(line) => {
                    if signal::take_last() == Some(nix::libc::SIGINT) {
                        self.env.last_status = 130;
                    }
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = editor.add_history_entry(line.as_str());
                    self.run_line(&line, &mut editor);
                }
                Err(ReadlineError::Interrupted) => {
                    // the editor already cleared the line and will redraw
                    self.env.last_status = 130;
                }
                Err(ReadlineError::Eof) => {
                    eprintln!("exit");
                    break;
                }
                Err(err) => {
                    eprintln!("minishell: {}", err);
                    self.env.last_status = 1;
                    break;
                }
            }
        }
        Ok(self.env.last_status)
    }

    /// Process one accepted line. Every outcome, success or not, lands in
    /// `last_status`; tokens, tree and heredoc descriptors die with this
    /// call frame.
    fn run_line(&mut self, line: &str, editor: &mut DefaultEditor) {
        let tokens = match lexer::split_into_tokens(line) {
            Ok(tokens) => tokens,
            Err(e) => {
                eprintln!("minishell: {}", e);
                self.env.last_status = 2;
                return;
            }
        };
        debug!("tokens: {:?}", tokens);
        if tokens.is_empty() {
            return;
        }

        let mut pipeline = match parser::construct_pipeline(tokens) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                eprintln!("minishell: {}", e);
                self.env.last_status = 2;
                return;
            }
        };
        expand::expand_pipeline(&mut pipeline, &self.env);
        debug!("pipeline: {:?}", pipeline);

        match heredoc::collect_heredocs(editor, &mut pipeline, &self.env) {
            Ok(Outcome::Complete) => {}
            Ok(Outcome::Interrupted) => {
                self.env.last_status = 130;
                return;
            }
            Err(e) => {
                eprintln!("minishell: {}", e);
                self.env.last_status = 1;
                return;
            }
        }

        self.env.last_status = executor::run_pipeline(pipeline, &mut self.env);
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
