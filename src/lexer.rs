//! Lexer for Keras-style layer declarations using logos
//!
//! Supports tokens like:
//! - Identifiers: model, add, Conv2D, kernel_size
//! - Numbers: 3, 120
//! - Quotes around string values: 'relu', "same"
//! - Punctuation: ( ) ; + , . =
//!
//! A `#` starts a comment that runs to the end of the line.

use logos::Logos;

/// Token types for the layer declaration language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Number(i64),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token("'")]
    #[token("\"")]
    Quote,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(";")]
    Semicolon,

    #[token("+")]
    Plus,

    #[token(",")]
    Comma,

    #[token(".")]
    Dot,

    #[token("=")]
    Equals,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Quote => write!(f, "'"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Semicolon => write!(f, ";"),
            Token::Plus => write!(f, "+"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Equals => write!(f, "="),
        }
    }
}

/// A token and the 1-based column it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub column: usize,
}

/// Text the lexer could not turn into a token
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub column: usize,
    pub text: String,
}

/// Lexer wrapper that yields located tokens for one source line
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Tokenize the whole line, separating tokens from unrecognized text
    pub fn tokenize(source: &'source str) -> (Vec<Spanned>, Vec<LexError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();

        for result in Lexer::new(source) {
            match result {
                Ok(spanned) => tokens.push(spanned),
                Err(error) => errors.push(error),
            }
        }

        (tokens, errors)
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Spanned, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.inner.next()?;
        let column = self.inner.span().start + 1;
        Some(match result {
            Ok(token) => Ok(Spanned { token, column }),
            Err(()) => Err(LexError {
                column,
                text: self.inner.slice().to_string(),
            }),
        })
    }
}
