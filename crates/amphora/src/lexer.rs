//! Context-sensitive lexer.
//!
//! Source files start in literal-text mode and drop into code mode at an
//! opening tag; double-quoted strings and heredocs are their own modes with
//! `$name` / `${name}` interpolation fragments. The active modes live on an
//! explicit stack. Lexing is a pure function of the input bytes: the same
//! source always yields the same item stream.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    error::LexError,
    location::Loc,
    node::CastKind,
    token::{Item, TokenKind, keyword_kind},
};

/// Tokenizes a source. The returned stream always ends with an `Eof` item;
/// whitespace and comments are included (the compiler filters them).
pub fn lex(source: &[u8], filename: &str) -> Result<Vec<Item>, LexError> {
    Lexer::new(source, filename).run()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Html,
    Script,
    DoubleQuote,
    Heredoc(String),
    Nowdoc(String),
}

struct Lexer<'s> {
    src: &'s [u8],
    pos: usize,
    line: u32,
    col: u32,
    start_pos: usize,
    start_line: u32,
    start_col: u32,
    filename: Rc<str>,
    items: Vec<Item>,
    modes: SmallVec<[Mode; 4]>,
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

/// Multi-character operators, longest first so a simple prefix scan is a
/// longest-match scan.
const OPERATORS: &[(&str, TokenKind)] = &[
    ("<=>", TokenKind::Spaceship),
    ("===", TokenKind::EqEqEq),
    ("!==", TokenKind::NotEqEq),
    ("**=", TokenKind::PowEq),
    ("<<=", TokenKind::ShlEq),
    (">>=", TokenKind::ShrEq),
    ("??=", TokenKind::CoalesceEq),
    ("...", TokenKind::Ellipsis),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::NotEq),
    ("<>", TokenKind::NotEq),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("->", TokenKind::Arrow),
    ("=>", TokenKind::DoubleArrow),
    ("::", TokenKind::DoubleColon),
    ("??", TokenKind::Coalesce),
    ("**", TokenKind::Pow),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("++", TokenKind::Inc),
    ("--", TokenKind::Dec),
    ("&&", TokenKind::AndAnd),
    ("||", TokenKind::OrOr),
    ("+=", TokenKind::PlusEq),
    ("-=", TokenKind::MinusEq),
    ("*=", TokenKind::MulEq),
    ("/=", TokenKind::DivEq),
    ("%=", TokenKind::ModEq),
    (".=", TokenKind::ConcatEq),
    ("&=", TokenKind::AndEq),
    ("|=", TokenKind::OrEq),
    ("^=", TokenKind::XorEq),
];

/// Single-byte operators emitted as `Punct` when no longer match applies.
const SINGLE_OPS: &[u8] = b"+-*/%.<>=&|^!?:";

fn cast_kind(word: &str) -> Option<CastKind> {
    Some(match word {
        "int" | "integer" => CastKind::Int,
        "bool" | "boolean" => CastKind::Bool,
        "float" | "double" | "real" => CastKind::Float,
        "string" | "binary" => CastKind::String,
        "array" => CastKind::Array,
        "object" => CastKind::Object,
        _ => return None,
    })
}

impl<'s> Lexer<'s> {
    fn new(src: &'s [u8], filename: &str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            col: 1,
            start_pos: 0,
            start_line: 1,
            start_col: 1,
            filename: Rc::from(filename),
            items: Vec::new(),
            modes: SmallVec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Item>, LexError> {
        self.modes.push(Mode::Html);
        loop {
            let mode = self.modes.last().cloned().expect("mode stack never empties");
            match mode {
                Mode::Html => self.lex_html()?,
                Mode::Script => self.lex_script()?,
                Mode::DoubleQuote => self.lex_double_quote()?,
                Mode::Heredoc(label) => self.lex_heredoc_body(&label, true)?,
                Mode::Nowdoc(label) => self.lex_heredoc_body(&label, false)?,
            }
            if self.items.last().is_some_and(Item::is_eof) {
                return Ok(self.items);
            }
        }
    }

    // --- low-level helpers ----------------------------------------------

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn advance(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn has_prefix(&self, prefix: &str) -> bool {
        self.src[self.pos..].starts_with(prefix.as_bytes())
    }

    fn has_prefix_ci(&self, prefix: &str) -> bool {
        let rest = &self.src[self.pos..];
        rest.len() >= prefix.len() && rest[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    }

    /// Marks the start of the next token at the current position.
    fn mark(&mut self) {
        self.start_pos = self.pos;
        self.start_line = self.line;
        self.start_col = self.col;
    }

    fn start_loc(&self) -> Loc {
        Loc::new(
            self.filename.clone(),
            self.start_line,
            self.start_col,
            self.start_pos as u32,
        )
    }

    fn here_loc(&self) -> Loc {
        Loc::new(self.filename.clone(), self.line, self.col, self.pos as u32)
    }

    /// Emits the marked span as one item and re-marks.
    fn emit(&mut self, kind: TokenKind) {
        let data = String::from_utf8_lossy(&self.src[self.start_pos..self.pos]).into_owned();
        let loc = self.start_loc();
        self.items.push(Item::new(kind, data, loc));
        self.mark();
    }

    /// Emits the marked span with explicit item data and re-marks.
    fn emit_with(&mut self, kind: TokenKind, data: String) {
        let loc = self.start_loc();
        self.items.push(Item::new(kind, data, loc));
        self.mark();
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError::new(message, self.here_loc())
    }

    // --- literal text mode ----------------------------------------------

    fn lex_html(&mut self) -> Result<(), LexError> {
        self.mark();
        loop {
            if self.pos >= self.src.len() {
                if self.pos > self.start_pos {
                    self.emit(TokenKind::InlineHtml);
                }
                self.emit(TokenKind::Eof);
                return Ok(());
            }
            if self.has_prefix_ci("<?php") {
                if self.pos > self.start_pos {
                    self.emit(TokenKind::InlineHtml);
                }
                self.advance(5);
                self.emit(TokenKind::OpenTag);
                self.modes.push(Mode::Script);
                return Ok(());
            }
            if self.has_prefix("<?=") {
                if self.pos > self.start_pos {
                    self.emit(TokenKind::InlineHtml);
                }
                self.advance(3);
                self.emit(TokenKind::OpenTagEcho);
                self.modes.push(Mode::Script);
                return Ok(());
            }
            self.bump();
        }
    }

    // --- code mode --------------------------------------------------------

    fn lex_script(&mut self) -> Result<(), LexError> {
        loop {
            self.mark();
            let Some(c) = self.peek() else {
                self.emit(TokenKind::Eof);
                return Ok(());
            };
            match c {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
                        self.bump();
                    }
                    self.emit(TokenKind::Whitespace);
                }
                b'?' if self.has_prefix("?>") => {
                    self.advance(2);
                    self.emit(TokenKind::CloseTag);
                    self.modes.pop();
                    return Ok(());
                }
                b'(' => self.lex_cast_or_paren(),
                b')' | b',' | b'{' | b'}' | b';' | b'[' | b']' | b'@' | b'~' => {
                    self.bump();
                    self.emit(TokenKind::Punct(c as char));
                }
                b'$' => self.lex_variable(),
                b'#' => self.lex_line_comment(),
                b'/' if self.has_prefix("//") => self.lex_line_comment(),
                b'/' if self.has_prefix("/*") => self.lex_block_comment()?,
                b'\'' => self.lex_single_quoted()?,
                b'"' => {
                    self.bump();
                    self.emit(TokenKind::Punct('"'));
                    self.modes.push(Mode::DoubleQuote);
                    return Ok(());
                }
                b'\\' => {
                    self.bump();
                    self.emit(TokenKind::NsSeparator);
                }
                b'<' if self.has_prefix("<<<") => {
                    self.lex_heredoc_start()?;
                    return Ok(());
                }
                b'0'..=b'9' => self.lex_number()?,
                b'.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.lex_number()?,
                c if is_ident_start(c) => self.lex_identifier(),
                _ => {
                    if let Some((text, kind)) = OPERATORS.iter().find(|(text, _)| self.has_prefix(text)) {
                        self.advance(text.len());
                        self.emit(*kind);
                    } else if SINGLE_OPS.contains(&c) {
                        self.bump();
                        self.emit(TokenKind::Punct(c as char));
                    } else {
                        return Err(self.error(format!("unexpected character '{}'", c as char)));
                    }
                }
            }
        }
    }

    fn lex_identifier(&mut self) {
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        let text = String::from_utf8_lossy(&self.src[self.start_pos..self.pos]).into_owned();
        match keyword_kind(&text) {
            Some(kind) => self.emit(kind),
            None => self.emit(TokenKind::Identifier),
        }
    }

    fn lex_variable(&mut self) {
        self.bump(); // $
        match self.peek() {
            // `$$x`: emit the dollar alone; the next round lexes `$x`
            Some(b'$') => self.emit(TokenKind::Punct('$')),
            Some(c) if is_ident_start(c) => {
                while self.peek().is_some_and(is_ident_char) {
                    self.bump();
                }
                let name = String::from_utf8_lossy(&self.src[self.start_pos + 1..self.pos]).into_owned();
                self.emit_with(TokenKind::Variable, name);
            }
            _ => self.emit(TokenKind::Punct('$')),
        }
    }

    fn lex_line_comment(&mut self) {
        // `//` and `#`, up to end of line; a close tag also ends the comment
        while let Some(c) = self.peek() {
            if c == b'\n' || self.has_prefix("?>") {
                break;
            }
            self.bump();
        }
        self.emit(TokenKind::Comment);
    }

    fn lex_block_comment(&mut self) -> Result<(), LexError> {
        let doc = self.has_prefix("/**") && self.peek_at(3) != Some(b'/');
        self.advance(2);
        loop {
            if self.pos >= self.src.len() {
                return Err(self.error("unterminated comment"));
            }
            if self.has_prefix("*/") {
                self.advance(2);
                break;
            }
            self.bump();
        }
        self.emit(if doc { TokenKind::DocComment } else { TokenKind::Comment });
        Ok(())
    }

    fn lex_single_quoted(&mut self) -> Result<(), LexError> {
        self.bump(); // opening quote
        let content_start = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'\\') => self.advance(2),
                Some(b'\'') => {
                    let inner = String::from_utf8_lossy(&self.src[content_start..self.pos]).into_owned();
                    self.bump(); // closing quote
                    self.emit_with(TokenKind::SingleQuoted, inner);
                    return Ok(());
                }
                Some(_) => self.bump(),
            }
        }
    }

    fn lex_number(&mut self) -> Result<(), LexError> {
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.advance(2);
            let digits = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            if self.pos == digits {
                return Err(self.error("malformed hexadecimal number"));
            }
            self.emit(TokenKind::IntLiteral);
            return Ok(());
        }
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'b' | b'B')) {
            self.advance(2);
            let digits = self.pos;
            while matches!(self.peek(), Some(b'0' | b'1')) {
                self.bump();
            }
            if self.pos == digits {
                return Err(self.error("malformed binary number"));
            }
            self.emit(TokenKind::IntLiteral);
            return Ok(());
        }

        let mut float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut offset = 1;
            if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                offset = 2;
            }
            if self.peek_at(offset).is_some_and(|c| c.is_ascii_digit()) {
                float = true;
                self.advance(offset);
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        self.emit(if float { TokenKind::FloatLiteral } else { TokenKind::IntLiteral });
        Ok(())
    }

    /// On `(`: looks ahead past spaces for a type name followed by `)` and
    /// emits a cast token when found, a bare paren otherwise.
    fn lex_cast_or_paren(&mut self) {
        let mut j = self.pos + 1;
        while matches!(self.src.get(j), Some(b' ' | b'\t')) {
            j += 1;
        }
        let word_start = j;
        while self.src.get(j).is_some_and(u8::is_ascii_alphabetic) {
            j += 1;
        }
        if j > word_start {
            let word = String::from_utf8_lossy(&self.src[word_start..j]).to_ascii_lowercase();
            let mut k = j;
            while matches!(self.src.get(k), Some(b' ' | b'\t')) {
                k += 1;
            }
            if self.src.get(k) == Some(&b')')
                && let Some(kind) = cast_kind(&word)
            {
                self.advance(k + 1 - self.pos);
                self.emit(TokenKind::Cast(kind));
                return;
            }
        }
        self.bump();
        self.emit(TokenKind::Punct('('));
    }

    // --- double-quoted strings -------------------------------------------

    /// Flushes any pending literal bytes as an `EncapsedText` fragment.
    fn flush_fragment(&mut self) {
        if self.pos > self.start_pos {
            self.emit(TokenKind::EncapsedText);
        } else {
            self.mark();
        }
    }

    /// Lexes one `$name` / `${name}` interpolation, assuming the caller saw
    /// an interpolation-starting `$`. Returns false when the `$` is literal.
    fn lex_interpolation(&mut self) -> Result<bool, LexError> {
        match self.peek_at(1) {
            Some(b'{') => {
                self.flush_fragment();
                self.advance(2); // ${
                let name_start = self.pos;
                while self.peek().is_some_and(is_ident_char) {
                    self.bump();
                }
                if self.pos == name_start {
                    return Err(self.error("malformed ${} interpolation"));
                }
                let name = String::from_utf8_lossy(&self.src[name_start..self.pos]).into_owned();
                if self.peek() != Some(b'}') {
                    return Err(self.error("unterminated ${} interpolation"));
                }
                self.bump(); // }
                self.emit_with(TokenKind::Variable, name);
                Ok(true)
            }
            Some(c) if is_ident_start(c) => {
                self.flush_fragment();
                self.bump(); // $
                let name_start = self.pos;
                while self.peek().is_some_and(is_ident_char) {
                    self.bump();
                }
                let name = String::from_utf8_lossy(&self.src[name_start..self.pos]).into_owned();
                self.emit_with(TokenKind::Variable, name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn lex_double_quote(&mut self) -> Result<(), LexError> {
        self.mark();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'\\') => self.advance(2),
                Some(b'"') => {
                    self.flush_fragment();
                    self.bump();
                    self.emit(TokenKind::Punct('"'));
                    self.modes.pop();
                    return Ok(());
                }
                Some(b'$') => {
                    if !self.lex_interpolation()? {
                        self.bump();
                    }
                }
                Some(_) => self.bump(),
            }
        }
    }

    // --- heredoc / nowdoc ------------------------------------------------

    fn lex_heredoc_start(&mut self) -> Result<(), LexError> {
        self.advance(3); // <<<
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.bump();
        }
        let (quote, nowdoc) = match self.peek() {
            Some(b'\'') => (Some(b'\''), true),
            Some(b'"') => (Some(b'"'), false),
            _ => (None, false),
        };
        if quote.is_some() {
            self.bump();
        }
        let label_start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        if self.pos == label_start {
            return Err(self.error("malformed heredoc start"));
        }
        let label = String::from_utf8_lossy(&self.src[label_start..self.pos]).into_owned();
        if let Some(q) = quote {
            if self.peek() != Some(q) {
                return Err(self.error("malformed heredoc start"));
            }
            self.bump();
        }
        if self.peek() == Some(b'\r') {
            self.bump();
        }
        if self.peek() != Some(b'\n') {
            return Err(self.error("malformed heredoc start"));
        }
        self.bump();
        self.emit_with(
            if nowdoc { TokenKind::StartNowdoc } else { TokenKind::StartHeredoc },
            label.clone(),
        );
        self.modes.push(if nowdoc { Mode::Nowdoc(label) } else { Mode::Heredoc(label) });
        Ok(())
    }

    /// True when the closing label sits at the current (line-start) position.
    fn at_heredoc_end(&self, label: &str) -> bool {
        if self.col != 1 || !self.has_prefix(label) {
            return false;
        }
        !self.src.get(self.pos + label.len()).copied().is_some_and(is_ident_char)
    }

    fn lex_heredoc_body(&mut self, label: &str, interpolate: bool) -> Result<(), LexError> {
        self.mark();
        loop {
            if self.pos >= self.src.len() {
                return Err(self.error("unterminated heredoc"));
            }
            if self.at_heredoc_end(label) {
                // the newline before the label is syntax, not content
                let mut end = self.pos;
                if end > self.start_pos && self.src[end - 1] == b'\n' {
                    end -= 1;
                    if end > self.start_pos && self.src[end - 1] == b'\r' {
                        end -= 1;
                    }
                }
                if end > self.start_pos {
                    let fragment = String::from_utf8_lossy(&self.src[self.start_pos..end]).into_owned();
                    self.emit_with(TokenKind::EncapsedText, fragment);
                }
                self.mark();
                self.advance(label.len());
                self.emit(TokenKind::EndHeredoc);
                self.modes.pop();
                return Ok(());
            }
            match self.peek() {
                Some(b'\\') if interpolate => self.advance(2),
                Some(b'$') if interpolate => {
                    if !self.lex_interpolation()? {
                        self.bump();
                    }
                }
                _ => self.bump(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source.as_bytes(), "test.php")
            .unwrap()
            .into_iter()
            .map(|i| i.kind)
            .filter(|k| !matches!(k, TokenKind::Whitespace | TokenKind::Comment))
            .collect()
    }

    #[test]
    fn literal_text_then_code() {
        let items = lex(b"hello <?php echo 1;", "t.php").unwrap();
        assert_eq!(items[0].kind, TokenKind::InlineHtml);
        assert_eq!(items[0].data, "hello ");
        assert_eq!(items[1].kind, TokenKind::OpenTag);
        assert!(items.last().unwrap().is_eof());
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            kinds("<?php ECHO Foo;"),
            [
                TokenKind::OpenTag,
                TokenKind::KwEcho,
                TokenKind::Identifier,
                TokenKind::Punct(';'),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn longest_match_operators() {
        assert_eq!(
            kinds("<?php 1 <=> 2 === 3 <= 4 < 5;"),
            [
                TokenKind::OpenTag,
                TokenKind::IntLiteral,
                TokenKind::Spaceship,
                TokenKind::IntLiteral,
                TokenKind::EqEqEq,
                TokenKind::IntLiteral,
                TokenKind::Le,
                TokenKind::IntLiteral,
                TokenKind::Punct('<'),
                TokenKind::IntLiteral,
                TokenKind::Punct(';'),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn cast_detection_needs_closing_paren() {
        assert_eq!(
            kinds("<?php (int) $x; ( string ) $y; (foo) $z;"),
            [
                TokenKind::OpenTag,
                TokenKind::Cast(CastKind::Int),
                TokenKind::Variable,
                TokenKind::Punct(';'),
                TokenKind::Cast(CastKind::String),
                TokenKind::Variable,
                TokenKind::Punct(';'),
                TokenKind::Punct('('),
                TokenKind::Identifier,
                TokenKind::Punct(')'),
                TokenKind::Variable,
                TokenKind::Punct(';'),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn variable_data_excludes_dollar() {
        let items = lex(b"<?php $foo;", "t.php").unwrap();
        let var = items.iter().find(|i| i.kind == TokenKind::Variable).unwrap();
        assert_eq!(var.data, "foo");
    }

    #[test]
    fn double_dollar_lexes_as_punct_then_variable() {
        assert_eq!(
            kinds("<?php $$x;"),
            [
                TokenKind::OpenTag,
                TokenKind::Punct('$'),
                TokenKind::Variable,
                TokenKind::Punct(';'),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn double_quote_interpolation_fragments() {
        let items = lex(br#"<?php "a $x b ${y} c";"#, "t.php").unwrap();
        let kinds: Vec<TokenKind> = items.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            [
                TokenKind::OpenTag,
                TokenKind::Whitespace,
                TokenKind::Punct('"'),
                TokenKind::EncapsedText,
                TokenKind::Variable,
                TokenKind::EncapsedText,
                TokenKind::Variable,
                TokenKind::EncapsedText,
                TokenKind::Punct('"'),
                TokenKind::Punct(';'),
                TokenKind::Eof
            ]
        );
        assert_eq!(items[3].data, "a ");
        assert_eq!(items[4].data, "x");
        assert_eq!(items[6].data, "y");
    }

    #[test]
    fn heredoc_emits_fragments_and_labels() {
        let src = b"<?php $s = <<<END\nline $v tail\nEND;\n";
        let items = lex(src, "t.php").unwrap();
        let kinds: Vec<TokenKind> = items
            .iter()
            .map(|i| i.kind)
            .filter(|k| !matches!(k, TokenKind::Whitespace))
            .collect();
        assert_eq!(
            kinds,
            [
                TokenKind::OpenTag,
                TokenKind::Variable,
                TokenKind::Punct('='),
                TokenKind::StartHeredoc,
                TokenKind::EncapsedText,
                TokenKind::Variable,
                TokenKind::EncapsedText,
                TokenKind::EndHeredoc,
                TokenKind::Punct(';'),
                TokenKind::Eof
            ]
        );
        assert_eq!(items.iter().find(|i| i.kind == TokenKind::EndHeredoc).unwrap().data, "END");
    }

    #[test]
    fn nowdoc_body_is_wholly_literal() {
        let src = b"<?php $s = <<<'END'\nno $interp here\nEND;\n";
        let items = lex(src, "t.php").unwrap();
        let frag = items.iter().find(|i| i.kind == TokenKind::EncapsedText).unwrap();
        assert_eq!(frag.data, "no $interp here");
    }

    #[test]
    fn comment_kinds() {
        assert_eq!(
            kinds("<?php // x\n# y\n/* z */ /** doc */ 1;"),
            [
                TokenKind::OpenTag,
                TokenKind::DocComment,
                TokenKind::IntLiteral,
                TokenKind::Punct(';'),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let err = lex(b"<?php 'abc", "t.php").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn close_tag_returns_to_literal_text() {
        assert_eq!(
            kinds("<?php 1; ?>text<?php 2;"),
            [
                TokenKind::OpenTag,
                TokenKind::IntLiteral,
                TokenKind::Punct(';'),
                TokenKind::CloseTag,
                TokenKind::InlineHtml,
                TokenKind::OpenTag,
                TokenKind::IntLiteral,
                TokenKind::Punct(';'),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexing_is_deterministic() {
        let src = br#"<?php $a = "x $y"; function f() { return 0x1F + 0b10 + 1.5e3; }"#;
        let first = lex(src, "t.php").unwrap();
        let second = lex(src, "t.php").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn locations_track_lines_and_columns() {
        let items = lex(b"<?php\n  $x;\n", "t.php").unwrap();
        let var = items.iter().find(|i| i.kind == TokenKind::Variable).unwrap();
        assert_eq!(var.loc.line, 2);
        assert_eq!(var.loc.column, 3);
    }
}
