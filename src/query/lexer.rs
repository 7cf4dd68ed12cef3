//! Hand-rolled lexer (spec §4.7 step 1). Grounded structurally on
//! `mdb/query/parse.py`'s `Lexer` token table and `reserved` word map; no
//! lexer-generator crate appears anywhere in the retrieved corpus, so this
//! is a plain character scanner rather than a `logos`/`pest` grammar.

use super::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Integer(i64),
    Decimal(f64),
    Str(String),

    Minus,
    Plus,
    Star,
    Slash,
    DSlash,
    DColon,
    DDot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    At,
    Dollar,
    Union,

    Cmp(super::ast::CmpOpKind),

    Return,
    For,
    In,
    Quantity(super::ast::Quantifier),
    Satisfies,
    If,
    Then,
    Else,
    Or,
    And,
    To,
    Div,
    Mod,
    IntersectWord,
    ExceptWord,
    UnionWord,

    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One lexed token plus its byte offset, so `query::Error::Syntax` can
/// report `{pos, token}` (spec §7).
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

fn reserved(word: &str) -> Option<Token> {
    use super::ast::CmpOpKind as C;
    use super::ast::Quantifier as Q;
    Option::Some(match word {
        "return" => Token::Return,
        "for" => Token::For,
        "in" => Token::In,
        "some" => Token::Quantity(Q::Some),
        "every" => Token::Quantity(Q::Every),
        "satisfies" => Token::Satisfies,
        "if" => Token::If,
        "then" => Token::Then,
        "else" => Token::Else,
        "or" => Token::Or,
        "and" => Token::And,
        "eq" => Token::Cmp(C::Eq),
        "ne" => Token::Cmp(C::Ne),
        "lt" => Token::Cmp(C::Lt),
        "le" => Token::Cmp(C::Le),
        "gt" => Token::Cmp(C::Gt),
        "ge" => Token::Cmp(C::Ge),
        "is" => Token::Cmp(C::Is),
        "to" => Token::To,
        "div" => Token::Div,
        "mod" => Token::Mod,
        "union" => Token::UnionWord,
        "intersect" => Token::IntersectWord,
        "except" => Token::ExceptWord,
        _ => return None,
    })
}

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src, bytes: src.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
            self.pos += 1;
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, Error> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            let pos = self.pos;
            let Some(c) = self.peek() else {
                out.push(Spanned { token: Token::Eof, pos });
                break;
            };
            let token = match c {
                b'+' => { self.bump(); Token::Plus }
                b'-' => { self.bump(); Token::Minus }
                b'*' => { self.bump(); Token::Star }
                b'|' => { self.bump(); Token::Union }
                b'(' => { self.bump(); Token::LParen }
                b')' => { self.bump(); Token::RParen }
                b'[' => { self.bump(); Token::LBracket }
                b']' => { self.bump(); Token::RBracket }
                b',' => { self.bump(); Token::Comma }
                b'@' => { self.bump(); Token::At }
                b'$' => { self.bump(); Token::Dollar }
                b':' => {
                    self.bump();
                    if self.peek() == Some(b':') {
                        self.bump();
                        Token::DColon
                    } else {
                        return Err(self.syntax_error(pos, ":"));
                    }
                }
                b'/' => {
                    self.bump();
                    if self.peek() == Some(b'/') {
                        self.bump();
                        Token::DSlash
                    } else {
                        Token::Slash
                    }
                }
                b'.' => {
                    if self.peek_at(1) == Some(b'.') {
                        self.bump();
                        self.bump();
                        Token::DDot
                    } else if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                        self.lex_number()
                    } else {
                        self.bump();
                        Token::Dot
                    }
                }
                b'=' | b'!' | b'<' | b'>' => self.lex_cmp(pos)?,
                b'"' | b'\'' => self.lex_string(c, pos)?,
                b'0'..=b'9' => self.lex_number(),
                c if c.is_ascii_alphabetic() => self.lex_name(),
                _ => return Err(self.syntax_error(pos, &(c as char).to_string())),
            };
            out.push(Spanned { token, pos });
        }
        Ok(out)
    }

    fn syntax_error(&self, pos: usize, token: &str) -> Error {
        Error::Syntax { pos, token: token.to_string() }
    }

    fn lex_cmp(&mut self, pos: usize) -> Result<Token, Error> {
        use super::ast::CmpOpKind::*;
        let c = self.bump().unwrap();
        let op = match c {
            b'=' => Eq,
            b'!' => {
                if self.bump() != Some(b'=') {
                    return Err(self.syntax_error(pos, "!"));
                }
                Ne
            }
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    Le
                } else {
                    Lt
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ge
                } else {
                    Gt
                }
            }
            _ => unreachable!(),
        };
        Ok(Token::Cmp(op))
    }

    /// `"(?:[^"]|"")*"` / `'(?:[^']|'')*'` — doubled-quote escapes a
    /// literal quote (spec §6 "`\"\"`/`''` escape").
    fn lex_string(&mut self, quote: u8, pos: usize) -> Result<Token, Error> {
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(self.syntax_error(pos, "<eof in string>")),
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                        s.push(quote as char);
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    // Re-walk as UTF-8: strings may contain multi-byte
                    // characters, so push whole chars, not raw bytes.
                    let start = self.pos - 1;
                    let ch_len = utf8_len(c);
                    let end = (start + ch_len).min(self.bytes.len());
                    s.push_str(&self.src[start..end]);
                    self.pos = end;
                }
            }
        }
        Ok(Token::Str(s))
    }

    fn lex_number(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_decimal = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_decimal = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        } else if self.peek() == Some(b'.') && start == self.pos {
            is_decimal = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let save = self.pos;
            self.bump();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.bump();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_decimal = true;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                self.pos = save;
            }
        }
        let text = &self.src[start..self.pos];
        if is_decimal {
            Token::Decimal(text.parse().unwrap_or(0.0))
        } else {
            Token::Integer(text.parse().unwrap_or(0))
        }
    }

    /// `[a-zA-Z][\w\-]*` — names may contain hyphens (`descendant-or-self`,
    /// `following-sibling`), per `mdb/query/parse.py::t_NAME`.
    fn lex_name(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'-')
        {
            self.bump();
        }
        let text = &self.src[start..self.pos];
        reserved(text).unwrap_or_else(|| Token::Name(text.to_string()))
    }
}

fn utf8_len(first_byte: u8) -> usize {
    if first_byte & 0x80 == 0 {
        1
    } else if first_byte & 0xE0 == 0xC0 {
        2
    } else if first_byte & 0xF0 == 0xE0 {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lexes_a_simple_path() {
        assert_eq!(
            tokens("/site/news"),
            vec![Token::Slash, Token::Name("site".into()), Token::Slash, Token::Name("news".into()), Token::Eof]
        );
    }

    #[test]
    fn lexes_axis_steps_and_predicates() {
        assert_eq!(
            tokens("child::Page[1]"),
            vec![
                Token::Name("child".into()),
                Token::DColon,
                Token::Name("Page".into()),
                Token::LBracket,
                Token::Integer(1),
                Token::RBracket,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn lexes_strings_with_doubled_quote_escapes() {
        assert_eq!(tokens(r#""a""b""#), vec![Token::Str("a\"b".to_string()), Token::Eof]);
        assert_eq!(tokens("'it''s'"), vec![Token::Str("it's".to_string()), Token::Eof]);
    }

    #[test]
    fn lexes_numbers() {
        assert_eq!(tokens("1 2.5 .5"), vec![Token::Integer(1), Token::Decimal(2.5), Token::Decimal(0.5), Token::Eof]);
    }

    #[test]
    fn lexes_reserved_words_and_operators() {
        assert_eq!(
            tokens("$x to 10 eq 1 and not-a-keyword"),
            vec![
                Token::Dollar,
                Token::Name("x".into()),
                Token::To,
                Token::Integer(10),
                Token::Cmp(super::super::ast::CmpOpKind::Eq),
                Token::Integer(1),
                Token::And,
                Token::Name("not-a-keyword".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn rejects_unterminated_strings() {
        assert!(matches!(Lexer::new("\"abc").tokenize(), Err(Error::Syntax { .. })));
    }
}
