//! Recursive-descent parsing of the token stream into a pipeline tree.
//!
//! The grammar is flat by construction:
//!
//! ```text
//! pipeline := command ( '|' command )*
//! command  := (redir | WORD)*
//! redir    := ('<' | '>' | '>>' | '<<') WORD
//! ```
//!
//! Pipelines never nest, so the tree is just a list of commands.

use crate::lexer::{Token, Word};

/// Kind of redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Input,
    Output,
    Append,
    Heredoc,
}

/// I/O redirection attached to a single command.
///
/// For heredocs, `target` holds the delimiter word; the collected body is
/// materialized into `heredoc` before execution.
#[derive(Debug)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub target: Word,
    pub heredoc: Option<std::fs::File>,
}

impl PartialEq for Redirect {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.target == other.target
    }
}

/// A simple command: argv plus its redirections, in declaration order.
///
/// `argv` may legitimately be empty when a command consists of redirections
/// only; such a command performs its redirections and succeeds.
#[derive(Debug, Default, PartialEq)]
pub struct SimpleCommand {
    pub argv: Vec<Word>,
    pub redirects: Vec<Redirect>,
}

impl SimpleCommand {
    fn is_empty(&self) -> bool {
        self.argv.is_empty() && self.redirects.is_empty()
    }
}

/// A sequence of commands chained stdout-to-stdin. Always length >= 1.
#[derive(Debug, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<SimpleCommand>,
}

/// Errors that can occur while building the pipeline tree.
#[derive(Debug, PartialEq, Eq)]
pub enum ParsingError {
    /// A token appeared where the grammar does not allow it. The payload is
    /// the surface spelling of the offending token, with end-of-input spelled
    /// `newline` the way interactive shells report it.
    UnexpectedToken(String),
}

impl std::fmt::Display for ParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParsingError::UnexpectedToken(tok) => {
                write!(f, "syntax error near unexpected token '{}'", tok)
            }
        }
    }
}

struct PipelineBuilder {
    tokens: std::vec::IntoIter<Token>,
    lookahead: Option<Token>,
}

impl PipelineBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        let mut tokens = tokens.into_iter();
        let lookahead = tokens.next();
        PipelineBuilder { tokens, lookahead }
    }

    fn peek(&self) -> Option<&Token> {
        self.lookahead.as_ref()
    }

    fn advance(&mut self) -> Option<Token> {
        std::mem::replace(&mut self.lookahead, self.tokens.next())
    }

    fn unexpected_here(&self) -> ParsingError {
        let spelling = match self.peek() {
            Some(tok) => tok.describe().to_string(),
            None => "newline".to_string(),
        };
        ParsingError::UnexpectedToken(spelling)
    }

    fn build(mut self) -> Result<Pipeline, ParsingError> {
        let mut commands = Vec::new();
        loop {
            let command = self.parse_command()?;
            if command.is_empty() {
                // leading `|`, `| |`, or a trailing `|` with nothing after it
                return Err(self.unexpected_here());
            }
            commands.push(command);
            match self.peek() {
                Some(Token::Pipe) => {
                    self.advance();
                }
                _ => break,
            }
        }
        Ok(Pipeline { commands })
    }

    /// Parse a command: (redir | WORD)*. Stops at `|` or end of input.
    fn parse_command(&mut self) -> Result<SimpleCommand, ParsingError> {
        let mut command = SimpleCommand::default();

        while let Some(token) = self.peek() {
            match token {
                Token::Pipe => break,
                Token::Word(_) => {
                    if let Some(Token::Word(w)) = self.advance() {
                        command.argv.push(w);
                    }
                }
                Token::RedirIn | Token::RedirOut | Token::Append | Token::Heredoc => {
                    let kind = match self.advance() {
                        Some(Token::RedirIn) => RedirectKind::Input,
                        Some(Token::RedirOut) => RedirectKind::Output,
                        Some(Token::Append) => RedirectKind::Append,
                        Some(Token::Heredoc) => RedirectKind::Heredoc,
                        _ => unreachable!(),
                    };
                    match self.peek() {
                        Some(Token::Word(_)) => {
                            if let Some(Token::Word(target)) = self.advance() {
                                command.redirects.push(Redirect {
                                    kind,
                                    target,
                                    heredoc: None,
                                });
                            }
                        }
                        // operator or end of input where a filename belongs
                        _ => return Err(self.unexpected_here()),
                    }
                }
            }
        }

        Ok(command)
    }
}

/// Build the pipeline tree from the lexer's token stream.
pub fn construct_pipeline(tokens: Vec<Token>) -> Result<Pipeline, ParsingError> {
    PipelineBuilder::from(tokens).build()
}
