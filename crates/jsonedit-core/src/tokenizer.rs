//! Restartable streaming JSON lexer.
//!
//! The tokenizer pulls bytes through the [`SliceRead`] contract in fixed-size
//! chunks, so it never materializes the document it is scanning. It may be
//! started at any byte offset that is a valid JSON value boundary (callers
//! guarantee this; in practice the start of a re-indexed container).
//!
//! Malformed input never aborts the scan: bytes that are unreachable from the
//! current state become an [`Error`](crate::TokenKind::Error) token, and the
//! lexer resynchronizes at the next `,`, `}`, `]` or whitespace boundary so
//! the rest of the document still yields a navigable token stream.

use crate::token::{Token, TokenKind};

/// Number of bytes fetched from the source per refill.
///
/// This is the only working buffer the lexer owns; memory use is independent
/// of document size.
const CHUNK_BYTES: usize = 64 * 1024;

/// Read access to a range of document bytes.
///
/// Implemented by the hybrid buffer (composing overlay over base content) and
/// by plain byte slices for tests and small inputs. Implementations clamp
/// out-of-range requests rather than panicking.
pub trait SliceRead {
    /// Total length of the readable content in bytes.
    fn len_bytes(&self) -> usize;

    /// Copy out the bytes in `[start, end)`, clamped to the content length.
    fn read_range(&self, start: usize, end: usize) -> Vec<u8>;
}

impl SliceRead for [u8] {
    fn len_bytes(&self) -> usize {
        self.len()
    }

    fn read_range(&self, start: usize, end: usize) -> Vec<u8> {
        let start = start.min(self.len());
        let end = end.min(self.len()).max(start);
        self[start..end].to_vec()
    }
}

impl SliceRead for str {
    fn len_bytes(&self) -> usize {
        self.len()
    }

    fn read_range(&self, start: usize, end: usize) -> Vec<u8> {
        self.as_bytes().read_range(start, end)
    }
}

/// Incremental UTF-8 validity check that carries partial multi-byte
/// sequences across chunk refills.
#[derive(Debug, Clone, Copy)]
struct Utf8Checker {
    /// Continuation bytes still expected for the current sequence.
    pending: u8,
    valid: bool,
}

impl Utf8Checker {
    fn new() -> Self {
        Self {
            pending: 0,
            valid: true,
        }
    }

    fn push(&mut self, byte: u8) {
        if !self.valid {
            return;
        }
        if self.pending > 0 {
            if byte & 0xC0 == 0x80 {
                self.pending -= 1;
            } else {
                self.valid = false;
            }
        } else if byte < 0x80 {
            // ASCII
        } else if byte & 0xE0 == 0xC0 {
            // 0xC0/0xC1 would encode an overlong sequence
            if byte < 0xC2 {
                self.valid = false;
            } else {
                self.pending = 1;
            }
        } else if byte & 0xF0 == 0xE0 {
            self.pending = 2;
        } else if byte & 0xF8 == 0xF0 {
            if byte > 0xF4 {
                self.valid = false;
            } else {
                self.pending = 3;
            }
        } else {
            self.valid = false;
        }
    }

    fn is_valid(&self) -> bool {
        self.valid && self.pending == 0
    }
}

/// Streaming lexer over a [`SliceRead`] source.
pub struct Tokenizer<'a, S: SliceRead + ?Sized> {
    source: &'a S,
    /// Working buffer holding `[chunk_start, chunk_start + chunk.len())`.
    chunk: Vec<u8>,
    chunk_start: usize,
    /// Absolute byte position of the next unread byte.
    pos: usize,
    /// Absolute byte offset the scan stops at (exclusive).
    limit: usize,
    line: usize,
    column: usize,
}

impl<'a, S: SliceRead + ?Sized> Tokenizer<'a, S> {
    /// Lex the whole source from the beginning.
    pub fn new(source: &'a S) -> Self {
        let limit = source.len_bytes();
        Self::with_window(source, 0, limit, 0, 0)
    }

    /// Lex the byte window `[start, end)`, with `line`/`column` giving the
    /// document position of `start`. `start` must be a value boundary.
    pub fn with_window(source: &'a S, start: usize, end: usize, line: usize, column: usize) -> Self {
        let limit = end.min(source.len_bytes());
        Self {
            source,
            chunk: Vec::new(),
            chunk_start: start,
            pos: start,
            limit,
            line,
            column,
        }
    }

    /// Absolute byte position of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn peek(&mut self) -> Option<u8> {
        if self.pos >= self.limit {
            return None;
        }
        if self.pos < self.chunk_start || self.pos >= self.chunk_start + self.chunk.len() {
            let end = (self.pos + CHUNK_BYTES).min(self.limit);
            self.chunk = self.source.read_range(self.pos, end);
            self.chunk_start = self.pos;
            if self.chunk.is_empty() {
                return None;
            }
        }
        Some(self.chunk[self.pos - self.chunk_start])
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn skip_whitespace(&mut self) {
        while let Some(byte) = self.peek() {
            if matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Skip forward to the next plausible token boundary after an error:
    /// a `,`, `}`, `]`, or any whitespace.
    fn resync(&mut self) {
        while let Some(byte) = self.peek() {
            if matches!(byte, b',' | b'}' | b']') || byte.is_ascii_whitespace() {
                break;
            }
            self.advance();
        }
    }

    fn scan_string(&mut self, start: usize, line: usize, column: usize) -> Token {
        // Opening quote.
        self.advance();

        let mut well_formed = true;
        let mut utf8 = Utf8Checker::new();

        loop {
            match self.advance() {
                None => {
                    // Unterminated string; the span runs to end of input.
                    return Token::new(TokenKind::Error, start, self.pos, line, column);
                }
                Some(b'"') => {
                    let kind = if well_formed && utf8.is_valid() {
                        TokenKind::String
                    } else {
                        TokenKind::Error
                    };
                    return Token::new(kind, start, self.pos, line, column);
                }
                Some(b'\\') => match self.advance() {
                    None => {
                        return Token::new(TokenKind::Error, start, self.pos, line, column);
                    }
                    Some(b'u') => {
                        for _ in 0..4 {
                            match self.advance() {
                                Some(h) if h.is_ascii_hexdigit() => {}
                                Some(_) => {
                                    well_formed = false;
                                    break;
                                }
                                None => {
                                    return Token::new(
                                        TokenKind::Error,
                                        start,
                                        self.pos,
                                        line,
                                        column,
                                    );
                                }
                            }
                        }
                    }
                    Some(b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't') => {}
                    Some(_) => well_formed = false,
                },
                Some(byte) => utf8.push(byte),
            }
        }
    }

    fn scan_number(&mut self, start: usize, line: usize, column: usize) -> Token {
        if self.peek() == Some(b'-') {
            self.advance();
        }

        let mut int_digits = 0usize;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_digit() {
                self.advance();
                int_digits += 1;
            } else {
                break;
            }
        }
        let mut well_formed = int_digits > 0;

        if self.peek() == Some(b'.') {
            self.advance();
            let mut frac_digits = 0usize;
            while let Some(byte) = self.peek() {
                if byte.is_ascii_digit() {
                    self.advance();
                    frac_digits += 1;
                } else {
                    break;
                }
            }
            well_formed &= frac_digits > 0;
        }

        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.advance();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.advance();
            }
            let mut exp_digits = 0usize;
            while let Some(byte) = self.peek() {
                if byte.is_ascii_digit() {
                    self.advance();
                    exp_digits += 1;
                } else {
                    break;
                }
            }
            well_formed &= exp_digits > 0;
        }

        if well_formed {
            Token::new(TokenKind::Number, start, self.pos, line, column)
        } else {
            self.resync();
            Token::new(TokenKind::Error, start, self.pos, line, column)
        }
    }

    fn scan_literal(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
        word: &[u8],
        kind: TokenKind,
    ) -> Token {
        for &expected in word {
            match self.advance() {
                Some(byte) if byte == expected => {}
                _ => {
                    self.resync();
                    return Token::new(TokenKind::Error, start, self.pos, line, column);
                }
            }
        }
        Token::new(kind, start, self.pos, line, column)
    }

    /// Lex the next token, skipping whitespace. Returns `None` at the end of
    /// the window.
    pub fn next_token(&mut self) -> Option<Token> {
        self.skip_whitespace();

        let start = self.pos;
        let line = self.line;
        let column = self.column;
        let byte = self.peek()?;

        let token = match byte {
            b'{' => {
                self.advance();
                Token::new(TokenKind::ObjectStart, start, self.pos, line, column)
            }
            b'}' => {
                self.advance();
                Token::new(TokenKind::ObjectEnd, start, self.pos, line, column)
            }
            b'[' => {
                self.advance();
                Token::new(TokenKind::ArrayStart, start, self.pos, line, column)
            }
            b']' => {
                self.advance();
                Token::new(TokenKind::ArrayEnd, start, self.pos, line, column)
            }
            b':' => {
                self.advance();
                Token::new(TokenKind::Colon, start, self.pos, line, column)
            }
            b',' => {
                self.advance();
                Token::new(TokenKind::Comma, start, self.pos, line, column)
            }
            b'"' => self.scan_string(start, line, column),
            b'-' | b'0'..=b'9' => self.scan_number(start, line, column),
            b't' => self.scan_literal(start, line, column, b"true", TokenKind::True),
            b'f' => self.scan_literal(start, line, column, b"false", TokenKind::False),
            b'n' => self.scan_literal(start, line, column, b"null", TokenKind::Null),
            _ => {
                self.advance();
                self.resync();
                Token::new(TokenKind::Error, start, self.pos, line, column)
            }
        };

        Some(token)
    }

    /// Collect every remaining token.
    pub fn tokenize_all(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token() {
            tokens.push(token);
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let mut tokenizer = Tokenizer::new(input);
        tokenizer.tokenize_all().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_simple_object() {
        assert_eq!(
            kinds(r#"{"key": "value"}"#),
            vec![
                TokenKind::ObjectStart,
                TokenKind::String,
                TokenKind::Colon,
                TokenKind::String,
                TokenKind::ObjectEnd,
            ]
        );
    }

    #[test]
    fn test_tokenize_array() {
        assert_eq!(
            kinds("[1, 2, 3]"),
            vec![
                TokenKind::ArrayStart,
                TokenKind::Number,
                TokenKind::Comma,
                TokenKind::Number,
                TokenKind::Comma,
                TokenKind::Number,
                TokenKind::ArrayEnd,
            ]
        );
    }

    #[test]
    fn test_tokenize_keywords() {
        assert_eq!(
            kinds("[true, false, null]"),
            vec![
                TokenKind::ArrayStart,
                TokenKind::True,
                TokenKind::Comma,
                TokenKind::False,
                TokenKind::Comma,
                TokenKind::Null,
                TokenKind::ArrayEnd,
            ]
        );
    }

    #[test]
    fn test_tokenize_numbers() {
        for input in ["123", "-456", "12.34", "-78.90", "1e10", "1.5e-3", "0"] {
            let mut tokenizer = Tokenizer::new(input);
            let tokens = tokenizer.tokenize_all();
            assert_eq!(tokens.len(), 1, "input: {input}");
            assert_eq!(tokens[0].kind, TokenKind::Number, "input: {input}");
            assert_eq!(tokens[0].len(), input.len(), "input: {input}");
        }
    }

    #[test]
    fn test_malformed_numbers_are_error_tokens() {
        for input in ["-", "1.", "2e", "3e+"] {
            let mut tokenizer = Tokenizer::new(input);
            let tokens = tokenizer.tokenize_all();
            assert_eq!(tokens.len(), 1, "input: {input}");
            assert_eq!(tokens[0].kind, TokenKind::Error, "input: {input}");
        }
    }

    #[test]
    fn test_escaped_string_is_single_token() {
        let mut tokenizer = Tokenizer::new(r#""hello \"world\" é""#);
        let tokens = tokenizer.tokenize_all();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::String);
    }

    #[test]
    fn test_unterminated_string_spans_to_end() {
        let input = r#"{"a": "unterminated"#;
        let mut tokenizer = Tokenizer::new(input);
        let tokens = tokenizer.tokenize_all();
        let last = tokens.last().unwrap();
        assert_eq!(last.kind, TokenKind::Error);
        assert_eq!(last.end, input.len());
    }

    #[test]
    fn test_invalid_utf8_in_string_is_error_span() {
        let input: Vec<u8> = vec![b'[', b'"', 0xFF, 0xFE, b'"', b']'];
        let mut tokenizer = Tokenizer::new(&input[..]);
        let tokens = tokenizer.tokenize_all();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::ArrayStart, TokenKind::Error, TokenKind::ArrayEnd]
        );
    }

    #[test]
    fn test_garbage_resynchronizes_at_boundary() {
        assert_eq!(
            kinds("[1, @@@, 2]"),
            vec![
                TokenKind::ArrayStart,
                TokenKind::Number,
                TokenKind::Comma,
                TokenKind::Error,
                TokenKind::Comma,
                TokenKind::Number,
                TokenKind::ArrayEnd,
            ]
        );
    }

    #[test]
    fn test_line_and_column_tracking() {
        let input = "{\n  \"a\": 1\n}";
        let mut tokenizer = Tokenizer::new(input);
        let tokens = tokenizer.tokenize_all();

        assert_eq!(tokens[0].line, 0); // {
        assert_eq!(tokens[1].line, 1); // "a"
        assert_eq!(tokens[1].column, 2);
        assert_eq!(tokens.last().unwrap().line, 2); // }
    }

    #[test]
    fn test_restart_at_value_boundary() {
        let input = r#"{"a": [1, 2]}"#;
        let offset = input.find('[').unwrap();
        let mut tokenizer = Tokenizer::with_window(input, offset, input.len(), 0, offset);
        let first = tokenizer.next_token().unwrap();
        assert_eq!(first.kind, TokenKind::ArrayStart);
        assert_eq!(first.start, offset);
        assert_eq!(first.column, offset);
    }

    #[test]
    fn test_window_limit_stops_scan() {
        let input = r#"[1, 2]"#;
        let end = input.find(',').unwrap();
        let mut tokenizer = Tokenizer::with_window(input, 0, end, 0, 0);
        let tokens = tokenizer.tokenize_all();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::ArrayStart, TokenKind::Number]);
    }

    #[test]
    fn test_chunk_refill_on_large_input() {
        // Builds an array larger than one chunk so the lexer must refill.
        let mut input = String::from("[");
        let count = 20_000;
        for i in 0..count {
            if i > 0 {
                input.push(',');
            }
            input.push_str("123456");
        }
        input.push(']');
        assert!(input.len() > CHUNK_BYTES);

        let mut tokenizer = Tokenizer::new(input.as_str());
        let tokens = tokenizer.tokenize_all();
        let numbers = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .count();
        assert_eq!(numbers, count);
        assert_eq!(tokens.last().unwrap().kind, TokenKind::ArrayEnd);
    }
}
