use crate::error::{SandboxError, SandboxResult};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    /// Source text, except for string literals where this is the decoded
    /// value.
    pub(crate) text: String,
    pub(crate) offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Name,
    Int,
    Float,
    Str,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semi,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Tilde,
    Amp,
    Pipe,
    Caret,
    LShift,
    RShift,
    Lt,
    LtEq,
    Gt,
    GtEq,
    EqEq,
    NotEq,
    Assign,
    Walrus,
    AugAssign,
    Unknown,
}

pub(crate) fn tokenize(text: &str) -> SandboxResult<Vec<Token>> {
    let mut lexer = Lexer::new(text);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Lexer { text, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_char_n(&self, n: usize) -> Option<char> {
        self.remaining().chars().nth(n)
    }

    fn bump_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
                self.bump_char();
            }

            let rem = self.remaining();
            if rem.starts_with('#') {
                while let Some(c) = self.bump_char() {
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }

            // Explicit line continuation.
            if rem.starts_with("\\\n") {
                self.bump_char();
                self.bump_char();
                continue;
            }

            break;
        }
    }

    fn lex_identifier(&mut self, first: char) -> String {
        let mut out = String::new();
        out.push(first);
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                out.push(c);
                self.bump_char();
            } else {
                break;
            }
        }
        out
    }

    fn lex_digits(&mut self, out: &mut String, radix: u32) {
        while let Some(c) = self.peek_char() {
            if c.is_digit(radix) || c == '_' {
                out.push(c);
                self.bump_char();
            } else {
                break;
            }
        }
    }

    fn lex_number(&mut self, first: char) -> (TokenKind, String) {
        let mut out = String::new();
        out.push(first);

        if first == '0' {
            if let Some(prefix @ ('x' | 'X' | 'o' | 'O' | 'b' | 'B')) = self.peek_char() {
                out.push(prefix);
                self.bump_char();
                let radix = match prefix.to_ascii_lowercase() {
                    'x' => 16,
                    'o' => 8,
                    _ => 2,
                };
                self.lex_digits(&mut out, radix);
                return (TokenKind::Int, out);
            }
        }

        let mut kind = TokenKind::Int;
        if first != '.' {
            self.lex_digits(&mut out, 10);
            let fraction_follows = self.peek_char() == Some('.')
                && !matches!(self.peek_char_n(1), Some(c) if c.is_alphabetic() || c == '_');
            if fraction_follows {
                out.push('.');
                self.bump_char();
                kind = TokenKind::Float;
            }
        } else {
            kind = TokenKind::Float;
        }
        if kind == TokenKind::Float {
            self.lex_digits(&mut out, 10);
        }

        if matches!(self.peek_char(), Some('e' | 'E')) {
            let sign = self.peek_char_n(1);
            let digit_at = if matches!(sign, Some('+' | '-')) { 2 } else { 1 };
            if matches!(self.peek_char_n(digit_at), Some(c) if c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    if let Some(c) = self.bump_char() {
                        out.push(c);
                    }
                }
                self.lex_digits(&mut out, 10);
                kind = TokenKind::Float;
            }
        }
        (kind, out)
    }

    fn lex_string_literal(&mut self, quote: char, raw: bool, start: usize) -> SandboxResult<String> {
        // Opening quote already consumed.
        let triple = self.peek_char() == Some(quote) && self.peek_char_n(1) == Some(quote);
        if triple {
            self.bump_char();
            self.bump_char();
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.bump_char() else {
                return Err(SandboxError::compile(format!(
                    "unterminated string literal at offset {start}"
                )));
            };
            match c {
                c if c == quote => {
                    if !triple {
                        return Ok(out);
                    }
                    if self.peek_char() == Some(quote) && self.peek_char_n(1) == Some(quote) {
                        self.bump_char();
                        self.bump_char();
                        return Ok(out);
                    }
                    out.push(c);
                }
                '\n' if !triple => {
                    return Err(SandboxError::compile(format!(
                        "unterminated string literal at offset {start}"
                    )))
                }
                '\\' if raw => {
                    out.push('\\');
                    if let Some(next) = self.bump_char() {
                        out.push(next);
                    }
                }
                '\\' => self.lex_escape(&mut out)?,
                c => out.push(c),
            }
        }
    }

    fn lex_escape(&mut self, out: &mut String) -> SandboxResult<()> {
        let Some(c) = self.bump_char() else {
            return Err(SandboxError::compile("unterminated escape sequence"));
        };
        match c {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            'x' => out.push(self.lex_hex_escape('x', 2)?),
            'u' => out.push(self.lex_hex_escape('u', 4)?),
            'U' => out.push(self.lex_hex_escape('U', 8)?),
            'N' => {
                return Err(SandboxError::compile(
                    "named unicode escapes are not supported",
                ))
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn lex_hex_escape(&mut self, escape: char, digits: usize) -> SandboxResult<char> {
        let mut code = 0u32;
        for _ in 0..digits {
            let digit = self
                .bump_char()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| {
                    let placeholder = "X".repeat(digits);
                    SandboxError::compile(format!("truncated \\{escape}{placeholder} escape"))
                })?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| SandboxError::compile("invalid unicode escape"))
    }

    fn next_token(&mut self) -> SandboxResult<Option<Token>> {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        let Some(ch) = self.bump_char() else {
            return Ok(None);
        };

        let two = |lexer: &mut Self, next: char, long: TokenKind, short: TokenKind, text: &str| {
            if lexer.peek_char() == Some(next) {
                lexer.bump_char();
                (long, format!("{text}{next}"))
            } else {
                (short, text.to_string())
            }
        };

        let (kind, text) = match ch {
            '(' => (TokenKind::LParen, "(".to_string()),
            ')' => (TokenKind::RParen, ")".to_string()),
            '[' => (TokenKind::LBracket, "[".to_string()),
            ']' => (TokenKind::RBracket, "]".to_string()),
            '{' => (TokenKind::LBrace, "{".to_string()),
            '}' => (TokenKind::RBrace, "}".to_string()),
            ',' => (TokenKind::Comma, ",".to_string()),
            ';' => (TokenKind::Semi, ";".to_string()),
            '~' => (TokenKind::Tilde, "~".to_string()),
            '.' if matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) => {
                self.lex_number('.')
            }
            '.' => (TokenKind::Dot, ".".to_string()),
            ':' => two(self, '=', TokenKind::Walrus, TokenKind::Colon, ":"),
            '=' => two(self, '=', TokenKind::EqEq, TokenKind::Assign, "="),
            '!' if self.peek_char() == Some('=') => {
                self.bump_char();
                (TokenKind::NotEq, "!=".to_string())
            }
            '+' | '-' | '%' | '&' | '|' | '^' if self.peek_char() == Some('=') => {
                self.bump_char();
                (TokenKind::AugAssign, format!("{ch}="))
            }
            '+' => (TokenKind::Plus, "+".to_string()),
            '-' => (TokenKind::Minus, "-".to_string()),
            '%' => (TokenKind::Percent, "%".to_string()),
            '&' => (TokenKind::Amp, "&".to_string()),
            '|' => (TokenKind::Pipe, "|".to_string()),
            '^' => (TokenKind::Caret, "^".to_string()),
            '*' | '/' | '<' | '>' => {
                let doubled = self.peek_char() == Some(ch);
                if doubled {
                    self.bump_char();
                }
                let augmented = self.peek_char() == Some('=');
                let op = if doubled {
                    format!("{ch}{ch}")
                } else {
                    ch.to_string()
                };
                if augmented && (doubled || matches!(ch, '*' | '/')) {
                    self.bump_char();
                    (TokenKind::AugAssign, format!("{op}="))
                } else if augmented {
                    self.bump_char();
                    let kind = if ch == '<' {
                        TokenKind::LtEq
                    } else {
                        TokenKind::GtEq
                    };
                    (kind, format!("{op}="))
                } else {
                    let kind = match (ch, doubled) {
                        ('*', false) => TokenKind::Star,
                        ('*', true) => TokenKind::DoubleStar,
                        ('/', false) => TokenKind::Slash,
                        ('/', true) => TokenKind::DoubleSlash,
                        ('<', false) => TokenKind::Lt,
                        ('<', true) => TokenKind::LShift,
                        ('>', false) => TokenKind::Gt,
                        _ => TokenKind::RShift,
                    };
                    (kind, op)
                }
            }
            '"' | '\'' => (TokenKind::Str, self.lex_string_literal(ch, false, start)?),
            c if c.is_ascii_digit() => self.lex_number(c),
            c if c.is_alphabetic() || c == '_' => {
                let ident = self.lex_identifier(c);
                match (ident.as_str(), self.peek_char()) {
                    ("r" | "R", Some(quote @ ('"' | '\''))) => {
                        self.bump_char();
                        (TokenKind::Str, self.lex_string_literal(quote, true, start)?)
                    }
                    ("u" | "U", Some(quote @ ('"' | '\''))) => {
                        self.bump_char();
                        (TokenKind::Str, self.lex_string_literal(quote, false, start)?)
                    }
                    (prefix, Some('"' | '\''))
                        if prefix.len() <= 2
                            && prefix.chars().all(|c| "bBfFrR".contains(c)) =>
                    {
                        return Err(SandboxError::compile(format!(
                            "string prefix '{prefix}' is not supported"
                        )));
                    }
                    _ => (TokenKind::Name, ident),
                }
            }
            other => (TokenKind::Unknown, other.to_string()),
        };

        Ok(Some(Token {
            kind,
            text,
            offset: start,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn operators_are_maximal_munch() {
        use TokenKind::*;
        assert_eq!(
            kinds("a ** b // c << d >>= e <= f != g := h"),
            vec![
                Name, DoubleStar, Name, DoubleSlash, Name, LShift, Name, AugAssign, Name, LtEq,
                Name, NotEq, Name, Walrus, Name
            ]
        );
        assert_eq!(kinds("x += 1"), vec![Name, AugAssign, Int]);
        assert_eq!(kinds("x == 1"), vec![Name, EqEq, Int]);
    }

    #[test]
    fn numbers() {
        use TokenKind::*;
        assert_eq!(kinds("1 1.5 .5 1e3 0x1F 1_000"), vec![Int, Float, Float, Float, Int, Int]);
        let tokens = tokenize("0x1F").unwrap();
        assert_eq!(tokens[0].text, "0x1F");
    }

    #[test]
    fn strings_decode_escapes() {
        let tokens = tokenize(r#"'a\'b' "c\n" r'\d' '\x41'"#).unwrap();
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a'b", "c\n", "\\d", "A"]);
    }

    #[test]
    fn bad_escapes_name_their_own_form() {
        let message = |text: &str| match tokenize(text) {
            Err(SandboxError::Compile(message)) => message,
            other => panic!("expected a compile error, got {other:?}"),
        };
        assert_eq!(message(r"'\x4'"), r"truncated \xXX escape");
        assert_eq!(message(r"'\u{zz}'"), r"truncated \uXXXX escape");
        assert_eq!(message(r"'\U0001F60'"), r"truncated \UXXXXXXXX escape");
        assert_eq!(tokenize(r"'\u00e9'").unwrap()[0].text, "\u{e9}");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(matches!(tokenize("'abc"), Err(SandboxError::Compile(_))));
        assert!(matches!(tokenize("f'{x}'"), Err(SandboxError::Compile(_))));
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("x # trailing"), vec![TokenKind::Name]);
    }
}
