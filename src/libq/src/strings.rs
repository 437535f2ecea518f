use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use thiserror::Error;

#[derive(PartialEq, Clone, Copy)]
enum QuoteType {
    Single,
    Double,
    None,
}

impl QuoteType {
    fn from_char(chr: char) -> QuoteType {
        match chr {
            '\'' => QuoteType::Single,
            '"' => QuoteType::Double,
            _ => QuoteType::None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Clone, Copy)]
pub enum TokenizationError {
    #[error("unclosed quote")]
    UnclosedQuote,
    #[error("trailing escape character")]
    InvalidEscapeChar,
}

/// Splits a line into whitespace separated words. Quotes group words together
/// (and are stripped), and a backslash outside of single quotes escapes the next char
pub struct Tokenizer<'a> {
    iter: Peekable<Chars<'a>>,
    last_err: Option<TokenizationError>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(corpus: &'a str) -> Tokenizer<'a> {
        return Tokenizer {
            iter: corpus.chars().peekable(),
            last_err: None,
        };
    }

    pub fn try_tokenize(mut self) -> Result<Vec<String>, TokenizationError> {
        let tokens: Vec<String> = (&mut self).collect();
        return match self.last_err {
            Some(err) => Err(err),
            None => Ok(tokens),
        };
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.last_err.is_some() {
            return None;
        }

        while let Some(chr) = self.iter.peek() {
            if !chr.is_whitespace() {
                break;
            }
            self.iter.next();
        }

        self.iter.peek()?;

        let mut build = String::new();
        let mut in_quotes = QuoteType::None;
        while let Some(chr) = self.iter.next() {
            match chr {
                '\\' if in_quotes != QuoteType::Single => match self.iter.next() {
                    Some(escaped) => build.push(escaped),
                    None => {
                        self.last_err = Some(TokenizationError::InvalidEscapeChar);
                        return None;
                    }
                },
                '\'' | '"' if in_quotes == QuoteType::None => {
                    in_quotes = QuoteType::from_char(chr);
                }
                '\'' | '"' if QuoteType::from_char(chr) == in_quotes => {
                    in_quotes = QuoteType::None;
                }
                _ if chr.is_whitespace() && in_quotes == QuoteType::None => {
                    return Some(build);
                }
                _ => build.push(chr),
            }
        }

        if in_quotes != QuoteType::None {
            self.last_err = Some(TokenizationError::UnclosedQuote);
            return None;
        }

        return Some(build);
    }
}

/// Displays a list of words joined by ", ", e.g. for rendering exit code sets
pub struct CommaList<'a, T: fmt::Display>(pub &'a [T]);

impl<'a, T: fmt::Display> fmt::Display for CommaList<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", item)?;
        }
        return Ok(());
    }
}
