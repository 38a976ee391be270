//! Parser for Keras-style layer declarations
//!
//! Recognizes lines shaped like:
//! - `model.add(Conv2D(filters=6, kernel_size=(5,5), activation='relu', input_shape=(28,28,1)))`
//! - `model.add(layers.MaxPool2D(strides=2))`
//! - `model.add(Dense(120, activation='relu'))`
//!
//! Every other line is skipped. Problems inside a recognized line are recorded
//! as diagnostics and parsing carries on with the next argument.

use crate::ast::{Activation, LayerSpec, LayerSpecKind, ModelSpec, Padding, PoolingKind, Volume};
use crate::diagnostic::{Diagnostics, SourceLocation};
use crate::error::{CompileError, CompileResult};
use crate::lexer::{Lexer, Spanned, Token};

/// Parser for a whole DSL source
pub struct Parser<'source> {
    source: &'source str,
    diagnostics: Diagnostics,
}

/// A parsed argument value
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Str(String),
    Tuple(Vec<i64>),
}

impl Value {
    fn describe(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Str(s) => format!("'{}'", s),
            Value::Tuple(items) => format!(
                "({})",
                items.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

/// One `keyword=value` or positional argument
#[derive(Debug, Clone)]
struct Argument {
    keyword: Option<String>,
    value: Value,
    column: usize,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            source,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Parse every `model.add(...)` line into a layer declaration
    pub fn parse_model(mut self) -> (ModelSpec, Diagnostics) {
        let mut model = ModelSpec::default();

        for (index, text) in self.source.lines().enumerate() {
            let line = index + 1;
            if let Some(layer) = self.parse_line(line, text) {
                tracing::debug!("line {}: {}", line, layer.kind.constructor());
                model.layers.push(layer);
            }
        }

        tracing::info!("Parsed {} layer declaration(s)", model.layers.len());
        (model, self.diagnostics)
    }

    fn parse_line(&mut self, line: usize, text: &str) -> Option<LayerSpec> {
        let (tokens, lex_errors) = Lexer::tokenize(text);
        if !is_model_add(&tokens) {
            return None;
        }

        for error in lex_errors {
            self.diagnostics.error(
                Some(SourceLocation::new(line, error.column)),
                format!("unexpected character(s) '{}'", error.text),
            );
        }

        let mut stream = TokenStream::new(line, tokens);
        let header = stream.parse_header();
        let (constructor, column) = match header {
            Ok(found) => found,
            Err(e) => {
                self.report(line, stream.column(), e);
                return None;
            }
        };

        let kind = match constructor.as_str() {
            "Conv2D" => LayerSpecKind::Conv2D {
                filters: None,
                kernel: None,
                padding: None,
            },
            "MaxPool2D" | "MaxPooling2D" => LayerSpecKind::Pooling2D {
                pooling: PoolingKind::Max,
                pool_size: None,
                padding: None,
            },
            "AveragePooling2D" => LayerSpecKind::Pooling2D {
                pooling: PoolingKind::Average,
                pool_size: None,
                padding: None,
            },
            "Flatten" => LayerSpecKind::Flatten,
            "Dense" => LayerSpecKind::Dense { units: None },
            other => {
                self.diagnostics.error(
                    Some(SourceLocation::new(line, column)),
                    format!("unsupported layer constructor '{}'", other),
                );
                return None;
            }
        };

        let mut layer = LayerSpec::new(line, kind);

        loop {
            match stream.parse_argument() {
                Ok(Some(argument)) => {
                    let column = argument.column;
                    if let Err(e) = apply_argument(&mut layer, argument) {
                        self.report(line, column, e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.report(line, stream.column(), e);
                    if !stream.recover() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = stream.finish() {
            self.report(line, stream.column(), e);
        }

        Some(layer)
    }

    fn report(&mut self, line: usize, column: usize, error: CompileError) {
        let message = match error {
            CompileError::ParseError { message, .. } => message,
            other => other.to_string(),
        };
        self.diagnostics
            .error(Some(SourceLocation::new(line, column)), message);
    }
}

/// Only lines starting with `model.add` declare layers
fn is_model_add(tokens: &[Spanned]) -> bool {
    matches!(
        tokens,
        [
            Spanned { token: Token::Ident(model), .. },
            Spanned { token: Token::Dot, .. },
            Spanned { token: Token::Ident(add), .. },
            ..
        ] if model == "model" && add == "add"
    )
}

/// Cursor over one line's tokens
struct TokenStream {
    line: usize,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl TokenStream {
    fn new(line: usize, tokens: Vec<Spanned>) -> Self {
        Self { line, tokens, pos: 0 }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    /// Column of the current token, or one past the last token
    fn column(&self) -> usize {
        match self.tokens.get(self.pos) {
            Some(spanned) => spanned.column,
            None => self
                .tokens
                .last()
                .map(|s| s.column + s.token.to_string().len())
                .unwrap_or(1),
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, expected: &Token) -> bool {
        self.current() == Some(expected)
    }

    fn expect(&mut self, expected: Token) -> CompileResult<Token> {
        if self.check(&expected) {
            self.advance()
                .ok_or_else(|| CompileError::parse_error(self.line, "Unexpected end of line"))
        } else {
            Err(CompileError::parse_error(
                self.line,
                format!("expected '{}', found {}", expected, self.describe_current()),
            ))
        }
    }

    fn expect_ident(&mut self) -> CompileResult<String> {
        match self.current() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(CompileError::parse_error(
                self.line,
                format!("expected a name, found {}", self.describe_current()),
            )),
        }
    }

    fn expect_number(&mut self) -> CompileResult<i64> {
        match self.current() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.advance();
                Ok(n)
            }
            _ => Err(CompileError::parse_error(
                self.line,
                format!("expected a number, found {}", self.describe_current()),
            )),
        }
    }

    fn describe_current(&self) -> String {
        match self.current() {
            Some(token) => format!("'{}'", token),
            None => "end of line".to_string(),
        }
    }

    /// `model . add ( [layers .] Constructor (`
    fn parse_header(&mut self) -> CompileResult<(String, usize)> {
        self.expect_ident()?;
        self.expect(Token::Dot)?;
        self.expect_ident()?;
        self.expect(Token::LParen)?;

        if matches!(self.current(), Some(Token::Ident(name)) if name == "layers") {
            self.advance();
            self.expect(Token::Dot)?;
        }

        let column = self.column();
        let constructor = self.expect_ident()?;
        self.expect(Token::LParen)?;
        Ok((constructor, column))
    }

    /// Next argument, or `None` at the constructor's closing parenthesis
    fn parse_argument(&mut self) -> CompileResult<Option<Argument>> {
        if self.check(&Token::RParen) {
            return Ok(None);
        }
        if self.current().is_none() {
            return Err(CompileError::parse_error(
                self.line,
                "unterminated layer constructor",
            ));
        }

        let column = self.column();
        let keyword = match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
            (
                Some(Spanned { token: Token::Ident(name), .. }),
                Some(Spanned { token: Token::Equals, .. }),
            ) => {
                let name = name.clone();
                self.pos += 2;
                Some(name)
            }
            _ => None,
        };

        let value = self.parse_value()?;

        if self.check(&Token::Comma) {
            self.advance();
        } else if !self.check(&Token::RParen) {
            return Err(CompileError::parse_error(
                self.line,
                format!("expected ',' or ')', found {}", self.describe_current()),
            ));
        }

        Ok(Some(Argument { keyword, value, column }))
    }

    fn parse_value(&mut self) -> CompileResult<Value> {
        match self.current() {
            Some(Token::Number(_)) => Ok(Value::Int(self.expect_number()?)),
            Some(Token::Quote) => {
                self.advance();
                let text = self.expect_ident()?;
                self.expect(Token::Quote)?;
                Ok(Value::Str(text))
            }
            Some(Token::LParen) => {
                self.advance();
                let mut items = vec![self.expect_number()?];
                while self.check(&Token::Comma) {
                    self.advance();
                    if self.check(&Token::RParen) {
                        break; // Trailing comma
                    }
                    items.push(self.expect_number()?);
                }
                self.expect(Token::RParen)?;
                Ok(Value::Tuple(items))
            }
            _ => Err(CompileError::parse_error(
                self.line,
                format!("expected a value, found {}", self.describe_current()),
            )),
        }
    }

    /// Skip to just after the next top-level comma. Returns false at end of arguments.
    fn recover(&mut self) -> bool {
        let mut depth = 0usize;
        while let Some(token) = self.current() {
            match token {
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => return true,
                Token::RParen => depth -= 1,
                Token::Comma if depth == 0 => {
                    self.advance();
                    return true;
                }
                _ => {}
            }
            self.advance();
        }
        false
    }

    /// `) )` closing the constructor and the add call
    fn finish(&mut self) -> CompileResult<()> {
        self.expect(Token::RParen)?;
        self.expect(Token::RParen)?;
        while self.check(&Token::Semicolon) {
            self.advance();
        }
        match self.current() {
            None => Ok(()),
            Some(_) => Err(CompileError::parse_error(
                self.line,
                format!("unexpected {} after layer declaration", self.describe_current()),
            )),
        }
    }
}

fn positive(line: usize, keyword: &str, n: i64) -> CompileResult<usize> {
    if n > 0 {
        usize::try_from(n).map_err(|_| CompileError::parse_error(line, format!("{} is too large", keyword)))
    } else {
        Err(CompileError::parse_error(
            line,
            format!("{} must be a positive number, got {}", keyword, n),
        ))
    }
}

/// A scalar or an equal pair, as accepted by `strides` and `pool_size`
fn symmetric(line: usize, keyword: &str, value: &Value) -> CompileResult<usize> {
    match value {
        Value::Int(n) => positive(line, keyword, *n),
        Value::Tuple(items) => match items.as_slice() {
            [a, b] if a == b => positive(line, keyword, *a),
            [a, b] => Err(CompileError::parse_error(
                line,
                format!("{} must be symmetric, got ({}, {})", keyword, a, b),
            )),
            _ => Err(CompileError::parse_error(
                line,
                format!("{} expects a number or a pair, got {}", keyword, value.describe()),
            )),
        },
        Value::Str(_) => Err(CompileError::parse_error(
            line,
            format!("{} expects a number, got {}", keyword, value.describe()),
        )),
    }
}

fn number(line: usize, keyword: &str, value: &Value) -> CompileResult<usize> {
    match value {
        Value::Int(n) => positive(line, keyword, *n),
        other => Err(CompileError::parse_error(
            line,
            format!("{} expects a number, got {}", keyword, other.describe()),
        )),
    }
}

fn text<'a>(line: usize, keyword: &str, value: &'a Value) -> CompileResult<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(CompileError::parse_error(
            line,
            format!("{} expects a quoted name, got {}", keyword, other.describe()),
        )),
    }
}

fn padding_name(line: usize, keyword: &str, value: &Value) -> CompileResult<Padding> {
    let name = text(line, keyword, value)?;
    Padding::from_name(name)
        .ok_or_else(|| CompileError::parse_error(line, format!("unknown padding '{}'", name)))
}

fn not_applicable(line: usize, keyword: &str, constructor: &str) -> CompileError {
    CompileError::parse_error(
        line,
        format!("keyword '{}' does not apply to {}", keyword, constructor),
    )
}

/// Record one argument on the layer being declared
fn apply_argument(layer: &mut LayerSpec, argument: Argument) -> CompileResult<()> {
    let line = layer.line;
    let constructor = layer.kind.constructor();
    let value = &argument.value;

    let keyword = match argument.keyword {
        Some(keyword) => keyword,
        None => {
            return match &mut layer.kind {
                LayerSpecKind::Dense { units } if units.is_none() => {
                    *units = Some(number(line, "units", value)?);
                    Ok(())
                }
                LayerSpecKind::Dense { .. } => Err(CompileError::parse_error(
                    line,
                    "units given more than once",
                )),
                kind => Err(CompileError::parse_error(
                    line,
                    format!(
                        "unexpected positional argument {} for {}",
                        value.describe(),
                        kind.constructor()
                    ),
                )),
            };
        }
    };

    match keyword.as_str() {
        "input_shape" => {
            let shape = match value {
                Value::Tuple(items) => match items.as_slice() {
                    [x, y, z] => Volume::new(
                        positive(line, "input_shape", *x)?,
                        positive(line, "input_shape", *y)?,
                        positive(line, "input_shape", *z)?,
                    ),
                    [x] => Volume::flat(positive(line, "input_shape", *x)?),
                    _ => {
                        return Err(CompileError::parse_error(
                            line,
                            format!("input_shape expects (x, y, z) or (n,), got {}", value.describe()),
                        ))
                    }
                },
                Value::Int(n) => Volume::flat(positive(line, "input_shape", *n)?),
                Value::Str(_) => {
                    return Err(CompileError::parse_error(
                        line,
                        format!("input_shape expects a tuple, got {}", value.describe()),
                    ))
                }
            };
            layer.input_shape = Some(shape);
        }
        "activation" => {
            if !matches!(layer.kind, LayerSpecKind::Conv2D { .. } | LayerSpecKind::Dense { .. }) {
                return Err(not_applicable(line, &keyword, constructor));
            }
            let name = text(line, &keyword, value)?;
            layer.activation = Activation::from_name(name).ok_or_else(|| {
                CompileError::parse_error(line, format!("unknown activation '{}'", name))
            })?;
        }
        "strides" => {
            if !matches!(layer.kind, LayerSpecKind::Conv2D { .. } | LayerSpecKind::Pooling2D { .. }) {
                return Err(not_applicable(line, &keyword, constructor));
            }
            layer.stride = Some(symmetric(line, &keyword, value)?);
        }
        _ => match &mut layer.kind {
            LayerSpecKind::Conv2D { filters, kernel, padding } => match keyword.as_str() {
                "filters" => *filters = Some(number(line, &keyword, value)?),
                "kernel_size" => {
                    *kernel = Some(match value {
                        Value::Int(n) => {
                            let k = positive(line, &keyword, *n)?;
                            (k, k)
                        }
                        Value::Tuple(items) => match items.as_slice() {
                            [r, c] => (positive(line, &keyword, *r)?, positive(line, &keyword, *c)?),
                            _ => {
                                return Err(CompileError::parse_error(
                                    line,
                                    format!("kernel_size expects (rows, cols), got {}", value.describe()),
                                ))
                            }
                        },
                        Value::Str(_) => {
                            return Err(CompileError::parse_error(
                                line,
                                format!("kernel_size expects a pair, got {}", value.describe()),
                            ))
                        }
                    })
                }
                "padding" => *padding = Some(padding_name(line, &keyword, value)?),
                _ => return Err(unknown_keyword(line, &keyword, constructor)),
            },
            LayerSpecKind::Pooling2D { pool_size, padding, .. } => match keyword.as_str() {
                "pool_size" => {
                    let size = symmetric(line, &keyword, value)?;
                    *pool_size = Some((size, size));
                }
                "padding" => *padding = Some(padding_name(line, &keyword, value)?),
                _ => return Err(unknown_keyword(line, &keyword, constructor)),
            },
            LayerSpecKind::Dense { units } => match keyword.as_str() {
                "units" if units.is_some() => {
                    return Err(CompileError::parse_error(line, "units given more than once"))
                }
                "units" => *units = Some(number(line, &keyword, value)?),
                _ => return Err(unknown_keyword(line, &keyword, constructor)),
            },
            LayerSpecKind::Flatten => return Err(unknown_keyword(line, &keyword, constructor)),
        },
    }

    Ok(())
}

fn unknown_keyword(line: usize, keyword: &str, constructor: &str) -> CompileError {
    match keyword {
        "filters" | "kernel_size" | "padding" | "units" | "pool_size" => {
            not_applicable(line, keyword, constructor)
        }
        _ => CompileError::parse_error(line, format!("unknown keyword '{}'", keyword)),
    }
}
