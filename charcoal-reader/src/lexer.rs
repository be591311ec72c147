//! The C lexer.
//!
//! A hand-written scanner over the preprocessed source. `#line N "file"`
//! directives and GCC linemarkers (`# N "file" flags…`) update the
//! reported location; everything else on a `#` line is an error, since
//! the preprocessor has already run.

use crate::error::{Location, ParseResult};

/// A lexed token with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// What kind of token.
    pub kind: TokenKind,
    /// Where it was read.
    pub loc: Location,
}

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum TokenKind {
    Ident(String),
    /// Integer literal with its suffix information.
    IntLit {
        value: u64,
        unsigned: bool,
        long: bool,
    },
    /// Float literal; `single` when suffixed with `f`.
    FloatLit {
        value: f64,
        single: bool,
    },
    /// Character constant, as its integer value.
    CharLit(i64),
    /// String literal bytes, without the terminating NUL.
    StrLit(Vec<u8>),

    // Keywords.
    KwVoid,
    KwChar,
    KwShort,
    KwInt,
    KwLong,
    KwFloat,
    KwDouble,
    KwSigned,
    KwUnsigned,
    KwStruct,
    KwConst,
    KwExtern,
    KwStatic,
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwDo,
    KwReturn,
    KwBreak,
    KwContinue,
    KwSwitch,
    KwCase,
    KwDefault,
    KwGoto,
    KwSizeof,

    // Punctuation.
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Colon,
    Question,
    Ellipsis,

    // Operators.
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    BangEq,
    AmpAmp,
    PipePipe,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,
    PlusPlus,
    MinusMinus,
    Dot,
    Arrow,
}

/// Scan the whole input into tokens.
pub fn tokenize(src: &str, file: &str) -> ParseResult<Vec<Token>> {
    let mut lexer = Lexer::new(src, file);
    let mut out = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        out.push(tok);
    }
    Ok(out)
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    loc: Location,
    /// True right after a newline, where a `#` starts a linemarker.
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, file: &str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            loc: Location::new(file, 1),
            at_line_start: true,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.loc.line += 1;
            self.at_line_start = true;
        } else if !(c as char).is_whitespace() {
            self.at_line_start = false;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> ParseResult<()> {
        loop {
            match self.peek() {
                Some(c) if (c as char).is_whitespace() => {
                    self.bump();
                }
                Some(b'/') if self.peek2() == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek2() == Some(b'*') => {
                    let start = self.loc.clone();
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek2() == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => return err!(start, "unterminated comment"),
                        }
                    }
                }
                Some(b'#') if self.at_line_start => self.linemarker()?,
                _ => return Ok(()),
            }
        }
    }

    /// Consume a `#line N "file"` directive or GCC linemarker.
    fn linemarker(&mut self) -> ParseResult<()> {
        let start = self.loc.clone();
        self.bump(); // '#'
        let mut rest = Vec::new();
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            rest.push(c);
            self.pos += 1; // raw advance; the line counter updates below
        }
        let text = String::from_utf8_lossy(&rest).into_owned();
        let mut parts = text.split_whitespace();
        let mut first = match parts.next() {
            Some(f) => f,
            None => return err!(start, "empty preprocessor directive"),
        };
        if first == "line" {
            first = match parts.next() {
                Some(f) => f,
                None => return err!(start, "#line without a line number"),
            };
        }
        let line: usize = match first.parse() {
            Ok(n) => n,
            Err(_) => return err!(start, "unsupported preprocessor directive `#{}`", text),
        };
        if let Some(name) = parts.next() {
            let name = name.trim_matches('"');
            self.loc.file = name.to_string();
        }
        // The directive names the line of the *next* source line; bump()
        // on the newline below would add one more.
        self.loc.line = line;
        if self.peek() == Some(b'\n') {
            self.pos += 1;
            self.at_line_start = true;
        }
        Ok(())
    }

    fn next_token(&mut self) -> ParseResult<Option<Token>> {
        self.skip_trivia()?;
        let loc = self.loc.clone();
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        let kind = if c.is_ascii_digit() || (c == b'.' && self.peek2().map_or(false, |d| d.is_ascii_digit())) {
            self.number(&loc)?
        } else if c.is_ascii_alphabetic() || c == b'_' {
            self.ident_or_keyword()
        } else if c == b'"' {
            self.string(&loc)?
        } else if c == b'\'' {
            self.char_lit(&loc)?
        } else {
            self.operator(&loc)?
        };

        Ok(Some(Token { kind, loc }))
    }

    fn ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        match text {
            "void" => TokenKind::KwVoid,
            "char" => TokenKind::KwChar,
            "short" => TokenKind::KwShort,
            "int" => TokenKind::KwInt,
            "long" => TokenKind::KwLong,
            "float" => TokenKind::KwFloat,
            "double" => TokenKind::KwDouble,
            "signed" => TokenKind::KwSigned,
            "unsigned" => TokenKind::KwUnsigned,
            "struct" => TokenKind::KwStruct,
            "const" => TokenKind::KwConst,
            "extern" => TokenKind::KwExtern,
            "static" => TokenKind::KwStatic,
            "if" => TokenKind::KwIf,
            "else" => TokenKind::KwElse,
            "while" => TokenKind::KwWhile,
            "for" => TokenKind::KwFor,
            "do" => TokenKind::KwDo,
            "return" => TokenKind::KwReturn,
            "break" => TokenKind::KwBreak,
            "continue" => TokenKind::KwContinue,
            "switch" => TokenKind::KwSwitch,
            "case" => TokenKind::KwCase,
            "default" => TokenKind::KwDefault,
            "goto" => TokenKind::KwGoto,
            "sizeof" => TokenKind::KwSizeof,
            _ => TokenKind::Ident(text.to_string()),
        }
    }

    fn number(&mut self, loc: &Location) -> ParseResult<TokenKind> {
        let start = self.pos;
        let mut is_float = false;

        if self.peek() == Some(b'0') && matches!(self.peek2(), Some(b'x') | Some(b'X')) {
            self.bump();
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    self.bump();
                } else {
                    break;
                }
            }
        } else {
            while let Some(c) = self.peek() {
                match c {
                    b'0'..=b'9' => {
                        self.bump();
                    }
                    b'.' => {
                        is_float = true;
                        self.bump();
                    }
                    b'e' | b'E' => {
                        is_float = true;
                        self.bump();
                        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                            self.bump();
                        }
                    }
                    _ => break,
                }
            }
        }
        let digits = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();

        if is_float {
            let mut single = false;
            if matches!(self.peek(), Some(b'f') | Some(b'F')) {
                self.bump();
                single = true;
            }
            let value: f64 = match digits.parse() {
                Ok(v) => v,
                Err(_) => return err!(loc, "invalid float literal `{}`", digits),
            };
            return Ok(TokenKind::FloatLit { value, single });
        }

        let mut unsigned = false;
        let mut long = false;
        loop {
            match self.peek() {
                Some(b'u') | Some(b'U') if !unsigned => {
                    self.bump();
                    unsigned = true;
                }
                Some(b'l') | Some(b'L') => {
                    self.bump();
                    long = true;
                    if matches!(self.peek(), Some(b'l') | Some(b'L')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }

        let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16)
        } else if digits.len() > 1 && digits.starts_with('0') {
            u64::from_str_radix(&digits[1..], 8)
        } else {
            digits.parse()
        };
        match parsed {
            Ok(value) => Ok(TokenKind::IntLit {
                value,
                unsigned,
                long,
            }),
            Err(_) => err!(loc, "invalid integer literal `{}`", digits),
        }
    }

    fn escape(&mut self, loc: &Location) -> ParseResult<u8> {
        let c = match self.bump() {
            Some(c) => c,
            None => return err!(loc, "unterminated escape sequence"),
        };
        Ok(match c {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'0' => 0,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'x' => {
                let mut v: u32 = 0;
                while let Some(d) = self.peek() {
                    if let Some(h) = (d as char).to_digit(16) {
                        v = v * 16 + h;
                        self.bump();
                    } else {
                        break;
                    }
                }
                v as u8
            }
            other => return err!(loc, "unknown escape `\\{}`", other as char),
        })
    }

    fn string(&mut self, loc: &Location) -> ParseResult<TokenKind> {
        self.bump(); // opening quote
        let mut bytes = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(b'\\') => bytes.push(self.escape(loc)?),
                Some(b'\n') | None => return err!(loc, "unterminated string literal"),
                Some(c) => bytes.push(c),
            }
        }
        Ok(TokenKind::StrLit(bytes))
    }

    fn char_lit(&mut self, loc: &Location) -> ParseResult<TokenKind> {
        self.bump(); // opening quote
        let value = match self.bump() {
            Some(b'\\') => self.escape(loc)? as i64,
            Some(b'\'') | None => return err!(loc, "empty character constant"),
            Some(c) => c as i64,
        };
        match self.bump() {
            Some(b'\'') => Ok(TokenKind::CharLit(value)),
            _ => err!(loc, "unterminated character constant"),
        }
    }

    fn operator(&mut self, loc: &Location) -> ParseResult<TokenKind> {
        use TokenKind::*;
        let c = self.bump().unwrap();
        let two = |l: &mut Self, next: u8, yes: TokenKind, no: TokenKind| {
            if l.peek() == Some(next) {
                l.bump();
                yes
            } else {
                no
            }
        };
        Ok(match c {
            b'(' => LParen,
            b')' => RParen,
            b'{' => LBrace,
            b'}' => RBrace,
            b'[' => LBracket,
            b']' => RBracket,
            b';' => Semi,
            b',' => Comma,
            b':' => Colon,
            b'?' => Question,
            b'~' => Tilde,
            b'.' => {
                if self.peek() == Some(b'.') && self.peek2() == Some(b'.') {
                    self.bump();
                    self.bump();
                    Ellipsis
                } else {
                    Dot
                }
            }
            b'+' => {
                if self.peek() == Some(b'+') {
                    self.bump();
                    PlusPlus
                } else {
                    two(self, b'=', PlusAssign, Plus)
                }
            }
            b'-' => {
                if self.peek() == Some(b'-') {
                    self.bump();
                    MinusMinus
                } else if self.peek() == Some(b'>') {
                    self.bump();
                    Arrow
                } else {
                    two(self, b'=', MinusAssign, Minus)
                }
            }
            b'*' => two(self, b'=', StarAssign, Star),
            b'/' => two(self, b'=', SlashAssign, Slash),
            b'%' => two(self, b'=', PercentAssign, Percent),
            b'^' => two(self, b'=', CaretAssign, Caret),
            b'!' => two(self, b'=', BangEq, Bang),
            b'=' => two(self, b'=', EqEq, Assign),
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.bump();
                    AmpAmp
                } else {
                    two(self, b'=', AmpAssign, Amp)
                }
            }
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.bump();
                    PipePipe
                } else {
                    two(self, b'=', PipeAssign, Pipe)
                }
            }
            b'<' => {
                if self.peek() == Some(b'<') {
                    self.bump();
                    two(self, b'=', ShlAssign, Shl)
                } else {
                    two(self, b'=', Le, Lt)
                }
            }
            b'>' => {
                if self.peek() == Some(b'>') {
                    self.bump();
                    two(self, b'=', ShrAssign, Shr)
                } else {
                    two(self, b'=', Ge, Gt)
                }
            }
            other => return err!(loc, "unexpected character `{}`", other as char),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src, "test.c")
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("int main"),
            vec![TokenKind::KwInt, TokenKind::Ident("main".into())]
        );
    }

    #[test]
    fn integer_literals() {
        assert_eq!(
            kinds("42 0x2a 052 7u 7l"),
            vec![
                TokenKind::IntLit { value: 42, unsigned: false, long: false },
                TokenKind::IntLit { value: 42, unsigned: false, long: false },
                TokenKind::IntLit { value: 42, unsigned: false, long: false },
                TokenKind::IntLit { value: 7, unsigned: true, long: false },
                TokenKind::IntLit { value: 7, unsigned: false, long: true },
            ]
        );
    }

    #[test]
    fn float_literals() {
        assert_eq!(
            kinds("1.5 2.0f"),
            vec![
                TokenKind::FloatLit { value: 1.5, single: false },
                TokenKind::FloatLit { value: 2.0, single: true },
            ]
        );
    }

    #[test]
    fn operators() {
        assert_eq!(
            kinds("a += b >> 2 && c->d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::PlusAssign,
                TokenKind::Ident("b".into()),
                TokenKind::Shr,
                TokenKind::IntLit { value: 2, unsigned: false, long: false },
                TokenKind::AmpAmp,
                TokenKind::Ident("c".into()),
                TokenKind::Arrow,
                TokenKind::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn strings_and_chars() {
        assert_eq!(
            kinds("\"hi\\n\" 'A'"),
            vec![
                TokenKind::StrLit(b"hi\n".to_vec()),
                TokenKind::CharLit(65),
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a // one\n/* two \n three */ b"),
            vec![TokenKind::Ident("a".into()), TokenKind::Ident("b".into())]
        );
    }

    #[test]
    fn linemarkers_update_location() {
        let toks = tokenize("# 10 \"foo.c\"\nx", "test.c").unwrap();
        assert_eq!(toks[0].loc.file, "foo.c");
        assert_eq!(toks[0].loc.line, 10);

        let toks = tokenize("#line 99 \"bar.c\"\ny", "test.c").unwrap();
        assert_eq!(toks[0].loc.file, "bar.c");
        assert_eq!(toks[0].loc.line, 99);
    }

    #[test]
    fn plain_line_numbers_advance() {
        let toks = tokenize("a\nb\n\nc", "t.c").unwrap();
        assert_eq!(toks[0].loc.line, 1);
        assert_eq!(toks[1].loc.line, 2);
        assert_eq!(toks[2].loc.line, 4);
    }
}
