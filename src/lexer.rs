// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::error::MapError;
use crate::Rc;

use core::fmt::{self, Debug, Formatter};
use core::iter::Peekable;
use core::str::CharIndices;
use std::path::Path;

use anyhow::{anyhow, bail, Result};

struct SourceInternal {
    file: String,
    contents: String,
    lines: Vec<(u32, u32)>,
}

/// Mapping text together with the name it was loaded from.
#[derive(Clone)]
pub struct Source {
    src: Rc<SourceInternal>,
}

impl Debug for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        self.src.file.fmt(f)
    }
}

impl Source {
    pub fn from_contents(file: String, contents: String) -> Result<Source> {
        let max_size = u32::MAX as usize - 2;
        if contents.len() > max_size {
            bail!("{file} exceeds maximum allowed map size {max_size}");
        }
        let mut lines = vec![];
        let mut prev_ch = ' ';
        let mut prev_pos = 0u32;
        let mut start = 0u32;
        for (i, ch) in contents.char_indices() {
            if ch == '\n' {
                let end = match prev_ch {
                    '\r' => prev_pos,
                    _ => i as u32,
                };
                lines.push((start, end));
                start = i as u32 + 1;
            }
            prev_ch = ch;
            prev_pos = i as u32;
        }

        if (start as usize) < contents.len() {
            lines.push((start, contents.len() as u32));
        } else if contents.is_empty() {
            lines.push((0, 0));
        } else {
            let s = (contents.len() - 1) as u32;
            lines.push((s, s));
        }
        Ok(Self {
            src: Rc::new(SourceInternal {
                file,
                contents,
                lines,
            }),
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Source> {
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => bail!("Failed to read {}. {e}", path.as_ref().display()),
        };
        Self::from_contents(path.as_ref().to_string_lossy().to_string(), contents)
    }

    pub fn file(&self) -> &String {
        &self.src.file
    }

    pub fn contents(&self) -> &String {
        &self.src.contents
    }

    pub fn line(&self, idx: u32) -> &str {
        let idx = idx as usize;
        if idx < self.src.lines.len() {
            let (start, end) = self.src.lines[idx];
            &self.src.contents[start as usize..end as usize]
        } else {
            ""
        }
    }

    pub fn message(&self, line: u32, col: u32, kind: &str, msg: &str) -> String {
        if line as usize > self.src.lines.len() || line == 0 {
            return format!("{}: invalid line {} specified", self.src.file, line);
        }

        let line_str = format!("{line}");
        let line_num_width = line_str.len() + 1;
        let col_spaces = (col as usize).saturating_sub(1);

        format!(
            "\n--> {}:{}:{}\n{:<line_num_width$}|\n\
             {:<line_num_width$}| {}\n\
             {:<line_num_width$}| {:<col_spaces$}^\n\
             {}: {}",
            self.src.file,
            line,
            col,
            "",
            line,
            self.line(line - 1),
            "",
            "",
            kind,
            msg
        )
    }

    pub fn error(&self, line: u32, col: u32, msg: &str) -> anyhow::Error {
        anyhow!(MapError::Parse {
            file: self.src.file.clone(),
            line,
            col,
            message: msg.to_string(),
            rendered: self.message(line, col, "error", msg),
        })
    }
}

#[derive(Clone)]
pub struct Span {
    pub source: Source,
    pub line: u32,
    pub col: u32,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn text(&self) -> &str {
        &self.source.contents()[self.start as usize..self.end as usize]
    }

    pub fn message(&self, kind: &str, msg: &str) -> String {
        self.source.message(self.line, self.col, kind, msg)
    }

    pub fn error(&self, msg: &str) -> anyhow::Error {
        self.source.error(self.line, self.col, msg)
    }
}

impl Debug for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let t = self.text().escape_debug().to_string();
        let max = 32;
        let (txt, trailer) = if t.chars().count() > max {
            (t.chars().take(max).collect::<String>(), "...")
        } else {
            (t, "")
        };

        f.write_fmt(format_args!(
            "{}:{}:{}:{}, \"{}{}\"",
            self.line, self.col, self.start, self.end, txt, trailer
        ))
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenKind {
    Symbol,
    /// A `"` or `'` quoted string. The span excludes the quotes.
    String,
    Number,
    Ident,
    /// A `//` comment running to the end of its line.
    Comment,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token(pub TokenKind, pub Span);

#[derive(Clone)]
pub struct Lexer<'source> {
    source: Source,
    iter: Peekable<CharIndices<'source>>,
    line: u32,
    col: u32,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source Source) -> Self {
        Self {
            source: source.clone(),
            iter: source.contents().char_indices().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn peek(&mut self) -> (usize, char) {
        match self.iter.peek() {
            Some((index, chr)) => (*index, *chr),
            _ => (self.source.contents().len(), '\x00'),
        }
    }

    fn peekahead(&mut self, n: usize) -> (usize, char) {
        match self.iter.clone().nth(n) {
            Some((index, chr)) => (index, chr),
            _ => (self.source.contents().len(), '\x00'),
        }
    }

    fn span(&self, line: u32, col: u32, start: usize, end: usize) -> Span {
        Span {
            source: self.source.clone(),
            line,
            col,
            start: start as u32,
            end: end as u32,
        }
    }

    fn read_ident(&mut self) -> Result<Token> {
        let start = self.peek().0;
        let col = self.col;
        loop {
            let ch = self.peek().1;
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.iter.next();
            } else {
                break;
            }
        }
        let end = self.peek().0;
        self.col += (end - start) as u32;
        Ok(Token(TokenKind::Ident, self.span(self.line, col, start, end)))
    }

    fn read_digits(&mut self) {
        while self.peek().1.is_ascii_digit() {
            self.iter.next();
        }
    }

    // Integers and decimals. `0..1` lexes as `0`, `..`, `1`.
    fn read_number(&mut self) -> Result<Token> {
        let start = self.peek().0;
        let col = self.col;
        self.read_digits();

        if self.peek().1 == '.' && self.peekahead(1).1.is_ascii_digit() {
            self.iter.next();
            self.read_digits();
        }

        let end = self.peek().0;
        self.col += (end - start) as u32;
        Ok(Token(
            TokenKind::Number,
            self.span(self.line, col, start, end),
        ))
    }

    fn read_string(&mut self, quote: char) -> Result<Token> {
        let (line, col) = (self.line, self.col);
        self.iter.next();
        self.col += 1;
        let (start, _) = self.peek();
        loop {
            let (_, ch) = self.peek();
            match ch {
                '\x00' | '\n' => {
                    return Err(self.source.error(line, col, &format!("unmatched {quote}")));
                }
                '\\' => {
                    self.iter.next();
                    let (_, esc) = self.peek();
                    match esc {
                        '"' | '\'' | '`' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' => {
                            self.iter.next();
                            self.col += 2;
                        }
                        'u' => {
                            self.iter.next();
                            self.col += 2;
                            for _i in 0..4 {
                                if !self.peek().1.is_ascii_hexdigit() {
                                    return Err(self.source.error(
                                        self.line,
                                        self.col,
                                        "invalid hex escape sequence",
                                    ));
                                }
                                self.iter.next();
                                self.col += 1;
                            }
                        }
                        _ => {
                            return Err(self.source.error(
                                self.line,
                                self.col,
                                "invalid escape sequence",
                            ))
                        }
                    }
                }
                c if c == quote => break,
                '\t' => {
                    self.iter.next();
                    self.col += 4;
                }
                _ => {
                    self.iter.next();
                    self.col += 1;
                }
            }
        }
        let end = self.peek().0;
        self.iter.next();
        self.col += 1;

        Ok(Token(TokenKind::String, self.span(line, col + 1, start, end)))
    }

    fn read_comment(&mut self) -> Result<Token> {
        let (start, _) = self.peek();
        let col = self.col;
        loop {
            match self.peek().1 {
                '\n' | '\x00' => break,
                '\r' if self.peekahead(1).1 == '\n' => break,
                '\t' => self.col += 4,
                _ => self.col += 1,
            }
            self.iter.next();
        }
        let end = self.peek().0;
        Ok(Token(
            TokenKind::Comment,
            self.span(self.line, col, start, end),
        ))
    }

    fn skip_ws(&mut self) -> Result<()> {
        // A tab is considered 4 space characters.
        loop {
            match self.peek().1 {
                ' ' => self.col += 1,
                '\t' => self.col += 4,
                '\r' => {
                    if self.peekahead(1).1 != '\n' {
                        return Err(self.source.error(
                            self.line,
                            self.col,
                            "\\r must be followed by \\n",
                        ));
                    }
                }
                '\n' => {
                    self.col = 1;
                    self.line += 1;
                }
                '/' if self.peekahead(1).1 == '*' => {
                    let (line, col) = (self.line, self.col);
                    self.iter.next();
                    self.iter.next();
                    self.col += 2;
                    loop {
                        match self.peek().1 {
                            '\x00' => {
                                return Err(self.source.error(line, col, "unterminated comment"))
                            }
                            '*' if self.peekahead(1).1 == '/' => {
                                self.iter.next();
                                self.col += 2;
                                break;
                            }
                            '\n' => {
                                self.col = 1;
                                self.line += 1;
                            }
                            _ => self.col += 1,
                        }
                        self.iter.next();
                    }
                }
                _ => break,
            }
            self.iter.next();
        }
        Ok(())
    }

    fn symbol(&mut self, len: usize) -> Result<Token> {
        let (start, _) = self.peek();
        let col = self.col;
        for _ in 0..len {
            self.iter.next();
        }
        self.col += len as u32;
        Ok(Token(
            TokenKind::Symbol,
            self.span(self.line, col, start, start + len),
        ))
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_ws()?;

        let (start, chr) = self.peek();
        let next = self.peekahead(1).1;

        match (chr, next) {
            ('/', '/') => self.read_comment(),
            ('.', '.') | ('=', '=') | ('!', '=') | ('<', '=') | ('>', '=') | ('<', '-')
            | ('>', '-') | ('-', '-') => self.symbol(2),
            ('{' | '}' | '[' | ']' | '(' | ')', _)
            | ('+' | '-' | '*' | '/' | '&' | '|' | '%' | '@' | '$', _)
            | (',' | ';' | ':' | '.' | '=' | '~' | '<' | '>', _) => self.symbol(1),
            ('"' | '\'', _) => self.read_string(chr),
            ('\x00', _) => Ok(Token(
                TokenKind::Eof,
                self.span(self.line, self.col, start, start),
            )),
            _ if chr.is_ascii_digit() => self.read_number(),
            _ if chr.is_ascii_alphabetic() || chr == '_' => self.read_ident(),
            _ => Err(self.source.error(self.line, self.col, "invalid character")),
        }
    }
}

/// Resolve the escape sequences of a quoted string token.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => out.push(c),
                    None => out.push('\u{fffd}'),
                }
            }
            Some(c) => out.push(c),
            None => out.push('\\'),
        }
    }
    out
}

/// Escape a string so that it can be written between `quote` characters.
pub fn escape(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// A token stream with one token of lookahead.
///
/// Comments never become the current token. A `//` comment that sits on the same line
/// as the token just consumed is held aside and can be claimed with [`Tokens::take_comment`]
/// until the next token is consumed; all other comments are dropped.
#[derive(Clone)]
pub struct Tokens<'source> {
    source: Source,
    lexer: Lexer<'source>,
    tok: Token,
    comment: Option<Token>,
}

impl<'source> Tokens<'source> {
    pub fn new(source: &'source Source) -> Result<Self> {
        let mut lexer = Lexer::new(source);
        let mut tok = lexer.next_token()?;
        while tok.0 == TokenKind::Comment {
            tok = lexer.next_token()?;
        }
        Ok(Self {
            source: source.clone(),
            lexer,
            tok,
            comment: None,
        })
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn current(&self) -> &Token {
        &self.tok
    }

    /// Text of the current token for keyword and symbol matching.
    /// Quoted strings never match.
    pub fn current_text(&self) -> &str {
        match self.tok.0 {
            TokenKind::String | TokenKind::Comment => "",
            _ => self.tok.1.text(),
        }
    }

    fn advance(&mut self) -> Result<()> {
        let line = self.tok.1.line;
        self.comment = None;
        loop {
            let next = self.lexer.next_token()?;
            if next.0 != TokenKind::Comment {
                self.tok = next;
                return Ok(());
            }
            if next.1.line == line {
                self.comment = Some(next);
            }
        }
    }

    /// Consume the current token.
    pub fn take(&mut self) -> Result<Token> {
        if self.tok.0 == TokenKind::Eof {
            return Err(self.error("unexpected end of input"));
        }
        let tok = self.tok.clone();
        self.advance()?;
        Ok(tok)
    }

    /// Consume the current token and return its value; quoted strings are unescaped.
    pub fn take_text(&mut self) -> Result<String> {
        let tok = self.take()?;
        Ok(match tok.0 {
            TokenKind::String => unescape(tok.1.text()),
            _ => tok.1.text().to_string(),
        })
    }

    /// Consume an identifier.
    pub fn take_ident(&mut self, context: &str) -> Result<String> {
        if self.tok.0 != TokenKind::Ident {
            return Err(self.unexpected(&format!("expecting identifier {context}")));
        }
        self.take_text()
    }

    /// Consume `ident ('.' ident)*` and return it joined by dots.
    pub fn take_dotted(&mut self, context: &str) -> Result<String> {
        let mut name = self.take_ident(context)?;
        while self.has_token(".") {
            self.advance()?;
            name.push('.');
            name.push_str(&self.take_ident(context)?);
        }
        Ok(name)
    }

    pub fn expect(&mut self, text: &str, context: &str) -> Result<()> {
        if self.current_text() == text {
            self.advance()
        } else {
            let msg = match context {
                "" => format!("expecting `{text}`"),
                _ => format!("expecting `{text}` {context}"),
            };
            Err(self.unexpected(&msg))
        }
    }

    /// Consume `text` if it is the current token.
    pub fn skip_token(&mut self, text: &str) -> Result<bool> {
        if self.has_token(text) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn has_token(&self, text: &str) -> bool {
        self.current_text() == text
    }

    pub fn has_tokens(&self, texts: &[&str]) -> bool {
        texts.contains(&self.current_text())
    }

    /// Consume a quoted string constant.
    pub fn read_constant(&mut self, label: &str) -> Result<String> {
        if self.tok.0 != TokenKind::String {
            return Err(self.unexpected(&format!("expecting quoted {label}")));
        }
        self.take_text()
    }

    /// Whether the current token is a literal. Numbers and booleans count only when
    /// `allow_literals` is set.
    pub fn is_constant(&self, allow_literals: bool) -> bool {
        match self.tok.0 {
            TokenKind::String => true,
            TokenKind::Number => allow_literals,
            TokenKind::Ident => allow_literals && matches!(self.tok.1.text(), "true" | "false"),
            TokenKind::Symbol => allow_literals && self.tok.1.text() == "-",
            _ => false,
        }
    }

    pub fn is_string_constant(&self) -> bool {
        self.tok.0 == TokenKind::String
    }

    pub fn has_comment(&self) -> bool {
        self.comment.is_some()
    }

    /// Claim the same-line comment, without the leading `//`, trimmed.
    pub fn take_comment(&mut self) -> Option<String> {
        self.comment
            .take()
            .map(|c| c.1.text().trim_start_matches('/').trim().to_string())
    }

    pub fn skip_comments(&mut self) {
        self.comment = None;
    }

    pub fn done(&self) -> bool {
        self.tok.0 == TokenKind::Eof
    }

    /// An error located at the current token.
    pub fn error(&self, msg: &str) -> anyhow::Error {
        self.tok.1.error(msg)
    }

    fn unexpected(&self, msg: &str) -> anyhow::Error {
        let found = match self.tok.0 {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::String => format!("\"{}\"", self.tok.1.text()),
            _ => format!("`{}`", self.tok.1.text()),
        };
        self.error(&format!("{msg}, found {found}"))
    }
}
