//! Converts expression text into a stream of tokens. Uses memchr for
//! accelerated string scanning. Tracks line/column for error reporting.

use memchr::memchr;

use crate::token::{Token, TokenKind};

/// Expression lexer producing a stream of tokens from source text.
pub struct Lexer<'a> {
    /// The source bytes (UTF-8).
    src: &'a [u8],
    /// Current byte offset into src.
    pos: usize,
    /// Current line number (1-based).
    line: u32,
    /// Current column number (1-based).
    col: u32,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given expression text.
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input into a Vec of tokens.
    #[must_use]
    pub fn tokenize(source: &'a str) -> Vec<Token> {
        let mut lexer = Self::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token();
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        tokens
    }

    /// Produce the next token.
    pub fn next_token(&mut self) -> Token {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.advance();
        }

        let start_line = self.line;
        let start_col = self.col;

        if self.pos >= self.src.len() {
            return Token {
                kind: TokenKind::Eof,
                line: start_line,
                col: start_col,
            };
        }

        let ch = self.src[self.pos];
        let kind = match ch {
            b'\'' => self.lex_string(),
            b'`' => self.lex_quoted_id(b'`'),
            b'"' => self.lex_quoted_id(b'"'),

            b'0'..=b'9' => self.lex_number(),
            b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.lex_number(),

            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_identifier(),

            b'?' => {
                self.advance();
                TokenKind::Placeholder
            }
            b'+' => {
                self.advance();
                TokenKind::Plus
            }
            b'-' => {
                self.advance();
                TokenKind::Minus
            }
            b'*' => {
                self.advance();
                TokenKind::Star
            }
            b'/' => {
                self.advance();
                TokenKind::Slash
            }
            b'%' => {
                self.advance();
                TokenKind::Percent
            }
            b'^' => {
                self.advance();
                TokenKind::Caret
            }
            b'~' => {
                self.advance();
                TokenKind::Tilde
            }
            b'.' => {
                self.advance();
                TokenKind::Dot
            }
            b',' => {
                self.advance();
                TokenKind::Comma
            }
            b'(' => {
                self.advance();
                TokenKind::LeftParen
            }
            b')' => {
                self.advance();
                TokenKind::RightParen
            }

            // Multi-character operators, longest match first
            b'!' => {
                self.advance();
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::Ne
                } else {
                    TokenKind::Bang
                }
            }
            b'=' => {
                self.advance();
                TokenKind::Eq
            }
            b'<' => {
                self.advance();
                match self.peek() {
                    Some(b'=') => {
                        self.advance();
                        TokenKind::Le
                    }
                    Some(b'>') => {
                        self.advance();
                        TokenKind::Ne
                    }
                    _ => TokenKind::Lt,
                }
            }
            b'>' => {
                self.advance();
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }

            _ => {
                self.advance();
                TokenKind::Error(format!("unexpected character: {}", ch as char))
            }
        };

        Token {
            kind,
            line: start_line,
            col: start_col,
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn advance(&mut self) -> u8 {
        let ch = self.src[self.pos];
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        ch
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    /// Lex a single-quoted string literal. Uses memchr for fast quote search;
    /// `''` escapes an embedded quote.
    fn lex_string(&mut self) -> TokenKind {
        self.advance(); // skip opening quote

        let mut value = String::new();
        loop {
            let remaining = &self.src[self.pos..];
            match memchr(b'\'', remaining) {
                Some(offset) => {
                    value.push_str(&String::from_utf8_lossy(
                        &self.src[self.pos..self.pos + offset],
                    ));
                    for _ in 0..offset {
                        self.advance();
                    }
                    self.advance(); // the quote itself

                    if self.peek() == Some(b'\'') {
                        value.push('\'');
                        self.advance();
                    } else {
                        return TokenKind::String(value);
                    }
                }
                None => {
                    while self.pos < self.src.len() {
                        self.advance();
                    }
                    return TokenKind::Error("unterminated string literal".to_owned());
                }
            }
        }
    }

    /// Lex a backtick- or double-quoted identifier.
    fn lex_quoted_id(&mut self, quote: u8) -> TokenKind {
        self.advance(); // skip opening quote

        let remaining = &self.src[self.pos..];
        match memchr(quote, remaining) {
            Some(offset) => {
                let value =
                    String::from_utf8_lossy(&self.src[self.pos..self.pos + offset]).into_owned();
                for _ in 0..offset {
                    self.advance();
                }
                self.advance(); // closing quote
                TokenKind::QuotedId(value)
            }
            None => {
                while self.pos < self.src.len() {
                    self.advance();
                }
                TokenKind::Error("unterminated quoted identifier".to_owned())
            }
        }
    }

    /// Lex a number: integer or float.
    fn lex_number(&mut self) -> TokenKind {
        let start = self.pos;
        let mut is_float = false;

        while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
            self.advance();
        }

        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance(); // skip dot
            while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
                self.advance();
            }
        }
        if self.src[start] == b'.' {
            is_float = true;
        }

        // Exponent
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.advance();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.advance();
            }
            while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
                self.advance();
            }
        }

        let text = String::from_utf8_lossy(&self.src[start..self.pos]);
        if is_float {
            match text.parse::<f64>() {
                Ok(v) => TokenKind::Float(v),
                Err(_) => TokenKind::Error(format!("invalid float: {text}")),
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => TokenKind::Integer(v),
                Err(_) => TokenKind::Error(format!("integer out of range: {text}")),
            }
        }
    }

    /// Lex an identifier or keyword.
    fn lex_identifier(&mut self) -> TokenKind {
        let start = self.pos;
        self.advance(); // first character already validated

        while self.pos < self.src.len() {
            let ch = self.src[self.pos];
            if ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'$' {
                self.advance();
            } else {
                break;
            }
        }

        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        TokenKind::lookup_keyword(&text).unwrap_or(TokenKind::Id(text))
    }
}
