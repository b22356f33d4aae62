//! Splitting one input line into what the process core consumes.
//!
//! The grammar is deliberately tiny: whitespace-separated words, at most one `|`,
//! `<`/`>`/`>>` redirections and a trailing `&`. There is no quoting, globbing or
//! variable expansion. Operators do not need surrounding spaces (`ls>out` works).

use std::path::PathBuf;

use thiserror::Error;

use crate::command::Command;
use crate::pipeline::Pipeline;
use crate::redirect::OutputMode;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Pipe,
    RedirectIn,
    RedirectOut,
    RedirectAppend,
    Background,
}

impl Token {
    fn describe(&self) -> &str {
        match self {
            Token::Word(word) => word,
            Token::Pipe => "|",
            Token::RedirectIn => "<",
            Token::RedirectOut => ">",
            Token::RedirectAppend => ">>",
            Token::Background => "&",
        }
    }
}

/// Errors reported for a line that cannot be run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("syntax error near unexpected token `{0}'")]
    UnexpectedToken(String),

    #[error("missing file name after `{0}'")]
    MissingTarget(&'static str),

    #[error("missing command in pipeline")]
    EmptyStage,

    #[error("only two-stage pipelines are supported")]
    TooManyStages,

    #[error("more than one {0} redirection")]
    DuplicateRedirect(&'static str),

    #[error("{0} cannot be combined with a pipeline")]
    UnsupportedWithPipeline(&'static str),
}

/// A single command with its redirections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCommand {
    pub command: Command,
    pub input: Option<PathBuf>,
    pub output: Option<(PathBuf, OutputMode)>,
    pub background: bool,
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Blank input.
    Empty,
    Simple(SimpleCommand),
    Pipeline(Pipeline),
}

fn tokenize(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        let operator = match ch {
            '|' => Some(Token::Pipe),
            '<' => Some(Token::RedirectIn),
            '>' if chars.peek() == Some(&'>') => {
                chars.next();
                Some(Token::RedirectAppend)
            }
            '>' => Some(Token::RedirectOut),
            '&' => Some(Token::Background),
            c if c.is_whitespace() => None,
            c => {
                word.push(c);
                continue;
            }
        };
        if !word.is_empty() {
            tokens.push(Token::Word(std::mem::take(&mut word)));
        }
        tokens.extend(operator);
    }
    if !word.is_empty() {
        tokens.push(Token::Word(word));
    }
    tokens
}

#[derive(Default)]
struct Stage {
    words: Vec<String>,
    input: Option<PathBuf>,
    output: Option<(PathBuf, OutputMode)>,
}

impl Stage {
    fn command(words: Vec<String>) -> Result<Command, ParseError> {
        let mut words = words.into_iter();
        let name = words.next().ok_or(ParseError::EmptyStage)?;
        Ok(Command::new(name, words))
    }
}

struct LineBuilder {
    tokens: Vec<Token>,
    pos: usize,
}

impl LineBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        LineBuilder { tokens, pos: 0 }
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn target(&mut self, operator: &'static str) -> Result<PathBuf, ParseError> {
        match self.consume() {
            Some(Token::Word(word)) => Ok(PathBuf::from(word)),
            Some(other) => Err(ParseError::UnexpectedToken(other.describe().to_string())),
            None => Err(ParseError::MissingTarget(operator)),
        }
    }

    /// Parse: stage ('|' stage)? '&'?
    fn build(mut self) -> Result<Line, ParseError> {
        if self.tokens.is_empty() {
            return Ok(Line::Empty);
        }

        let mut first: Option<Stage> = None;
        let mut current = Stage::default();
        let mut background = false;

        while let Some(token) = self.consume() {
            if background {
                return Err(ParseError::UnexpectedToken(token.describe().to_string()));
            }
            match token {
                Token::Word(word) => current.words.push(word),
                Token::RedirectIn => {
                    let path = self.target("<")?;
                    if current.input.replace(path).is_some() {
                        return Err(ParseError::DuplicateRedirect("input"));
                    }
                }
                Token::RedirectOut | Token::RedirectAppend => {
                    let (operator, mode) = if token == Token::RedirectOut {
                        (">", OutputMode::Truncate)
                    } else {
                        (">>", OutputMode::Append)
                    };
                    let path = self.target(operator)?;
                    if current.output.replace((path, mode)).is_some() {
                        return Err(ParseError::DuplicateRedirect("output"));
                    }
                }
                Token::Pipe => {
                    if current.words.is_empty() {
                        return Err(ParseError::EmptyStage);
                    }
                    if first.is_some() {
                        return Err(ParseError::TooManyStages);
                    }
                    first = Some(std::mem::take(&mut current));
                }
                Token::Background => background = true,
            }
        }
        debug_assert!(self.is_at_end());

        let Some(first) = first else {
            let Stage {
                words,
                input,
                output,
            } = current;
            return Ok(Line::Simple(SimpleCommand {
                command: Stage::command(words)?,
                input,
                output,
                background,
            }));
        };

        if background {
            return Err(ParseError::UnsupportedWithPipeline("`&'"));
        }
        if [&first, &current]
            .iter()
            .any(|stage| stage.input.is_some() || stage.output.is_some())
        {
            return Err(ParseError::UnsupportedWithPipeline("redirection"));
        }
        Ok(Line::Pipeline(Pipeline::new(
            Stage::command(first.words)?,
            Stage::command(current.words)?,
        )))
    }
}

/// Parse one line of user input.
pub fn parse_line(line: &str) -> Result<Line, ParseError> {
    LineBuilder::from(tokenize(line)).build()
}
