//! The C parser.
//!
//! Recursive descent over the token stream; expressions use one
//! precedence-climbing routine per C precedence level. With `typedef`
//! outside the subset there is no declaration/expression ambiguity: a
//! parenthesis followed by a type keyword is always a cast.
//!
//! Declarator parsing handles pointers, arrays, function parameter lists
//! and the `(*name)(…)` function-pointer shape; more exotic declarators
//! are rejected with a diagnostic.

use crate::ast::*;
use crate::error::{Location, ParseResult};
use crate::lexer::{Token, TokenKind};

/// Parse a token stream into a translation unit.
pub fn parse(tokens: Vec<Token>) -> ParseResult<PProgram> {
    let mut p = Parser {
        tokens,
        pos: 0,
        eof_loc: Location::new("<eof>", 0),
    };
    let mut prog = PProgram::default();
    while !p.at_end() {
        prog.decls.push(p.top_decl()?);
    }
    Ok(prog)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    eof_loc: Location,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn loc(&self) -> Location {
        self.tokens
            .get(self.pos)
            .map(|t| t.loc.clone())
            .unwrap_or_else(|| {
                self.tokens
                    .last()
                    .map(|t| t.loc.clone())
                    .unwrap_or_else(|| self.eof_loc.clone())
            })
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek2(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos + 1).map(|t| &t.kind)
    }

    fn bump(&mut self) -> ParseResult<TokenKind> {
        match self.tokens.get(self.pos) {
            Some(t) => {
                self.pos += 1;
                Ok(t.kind.clone())
            }
            None => err!(self.loc(), "unexpected end of input"),
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> ParseResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            err!(self.loc(), "expected {}", what)
        }
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<String> {
        match self.peek() {
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => err!(self.loc(), "expected {}", what),
        }
    }

    // -----------------------------------------------------------------
    // Types and declarators.

    /// Does the current token begin a type?
    fn starts_type(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                TokenKind::KwVoid
                    | TokenKind::KwChar
                    | TokenKind::KwShort
                    | TokenKind::KwInt
                    | TokenKind::KwLong
                    | TokenKind::KwFloat
                    | TokenKind::KwDouble
                    | TokenKind::KwSigned
                    | TokenKind::KwUnsigned
                    | TokenKind::KwStruct
                    | TokenKind::KwConst
            )
        )
    }

    /// Parse declaration specifiers: qualifiers and the base type.
    /// Returns the base type and whether `const` appeared.
    fn specifiers(&mut self) -> ParseResult<(PType, bool)> {
        let loc = self.loc();
        let mut is_const = false;
        let mut unsigned: Option<bool> = None;
        let mut base: Option<PType> = None;
        let mut longs = 0;

        loop {
            match self.peek() {
                Some(TokenKind::KwConst) => {
                    self.pos += 1;
                    is_const = true;
                }
                Some(TokenKind::KwUnsigned) => {
                    self.pos += 1;
                    unsigned = Some(true);
                }
                Some(TokenKind::KwSigned) => {
                    self.pos += 1;
                    unsigned = Some(false);
                }
                Some(TokenKind::KwVoid) => {
                    self.pos += 1;
                    base = Some(PType::Void);
                }
                Some(TokenKind::KwChar) => {
                    self.pos += 1;
                    base = Some(PType::Char(false));
                }
                Some(TokenKind::KwShort) => {
                    self.pos += 1;
                    base = Some(PType::Short(false));
                }
                Some(TokenKind::KwInt) => {
                    self.pos += 1;
                    if base.is_none() && longs == 0 {
                        base = Some(PType::Int(false));
                    }
                }
                Some(TokenKind::KwLong) => {
                    self.pos += 1;
                    longs += 1;
                }
                Some(TokenKind::KwFloat) => {
                    self.pos += 1;
                    base = Some(PType::Float);
                }
                Some(TokenKind::KwDouble) => {
                    self.pos += 1;
                    base = Some(PType::Double);
                }
                Some(TokenKind::KwStruct) => {
                    self.pos += 1;
                    let tag = self.expect_ident("struct tag")?;
                    base = Some(PType::Struct(tag));
                }
                _ => break,
            }
        }

        let u = unsigned.unwrap_or(false);
        let ty = if longs > 0 {
            PType::Long(u)
        } else {
            match base {
                Some(PType::Char(_)) => PType::Char(u),
                Some(PType::Short(_)) => PType::Short(u),
                Some(PType::Int(_)) => PType::Int(u),
                Some(other) => {
                    if unsigned.is_some() {
                        return err!(loc, "signedness does not apply to this type");
                    }
                    other
                }
                None if unsigned.is_some() => PType::Int(u),
                None => return err!(loc, "expected a type"),
            }
        };
        Ok((ty, is_const))
    }

    /// A declarator suffix: array bounds or a parameter list.
    fn declarator_suffixes(&mut self, mut ty: PType) -> ParseResult<PType> {
        let mut suffixes: Vec<Suffix> = Vec::new();
        loop {
            if self.eat(&TokenKind::LBracket) {
                if self.eat(&TokenKind::RBracket) {
                    suffixes.push(Suffix::Array(None));
                } else {
                    let n = self.assignment_expr()?;
                    self.expect(&TokenKind::RBracket, "`]`")?;
                    suffixes.push(Suffix::Array(Some(Box::new(n))));
                }
            } else if self.eat(&TokenKind::LParen) {
                let (params, variadic) = self.param_list()?;
                suffixes.push(Suffix::Params(params, variadic));
            } else {
                break;
            }
        }
        for s in suffixes.into_iter().rev() {
            ty = match s {
                Suffix::Array(n) => PType::Array(Box::new(ty), n),
                Suffix::Params(params, variadic) => {
                    PType::Function(Box::new(ty), params, variadic)
                }
            };
        }
        Ok(ty)
    }

    /// Parse a declarator over `base`; the name is optional (abstract
    /// declarators appear in casts and parameter lists).
    fn declarator(&mut self, mut base: PType) -> ParseResult<(Option<String>, PType)> {
        while self.eat(&TokenKind::Star) {
            // `* const` qualifies the pointer; charcoal does not track it.
            while self.eat(&TokenKind::KwConst) {}
            base = PType::Pointer(Box::new(base));
        }
        match self.peek() {
            Some(TokenKind::Ident(_)) => {
                let name = self.expect_ident("name")?;
                let ty = self.declarator_suffixes(base)?;
                Ok((Some(name), ty))
            }
            // The `(*name)(…)` function-pointer shape.
            Some(TokenKind::LParen) if self.peek2() == Some(&TokenKind::Star) => {
                self.pos += 1; // (
                let mut stars = 0;
                while self.eat(&TokenKind::Star) {
                    stars += 1;
                }
                let name = match self.peek() {
                    Some(TokenKind::Ident(_)) => Some(self.expect_ident("name")?),
                    _ => None,
                };
                self.expect(&TokenKind::RParen, "`)`")?;
                let mut ty = self.declarator_suffixes(base)?;
                for _ in 0..stars {
                    ty = PType::Pointer(Box::new(ty));
                }
                Ok((name, ty))
            }
            _ => {
                let ty = self.declarator_suffixes(base)?;
                Ok((None, ty))
            }
        }
    }

    fn param_list(&mut self) -> ParseResult<(Vec<(Option<String>, PType)>, bool)> {
        let mut params = Vec::new();
        let mut variadic = false;

        if self.eat(&TokenKind::RParen) {
            return Ok((params, false));
        }
        // `(void)` declares no parameters.
        if self.peek() == Some(&TokenKind::KwVoid) && self.peek2() == Some(&TokenKind::RParen)
        {
            self.pos += 2;
            return Ok((params, false));
        }

        loop {
            if self.eat(&TokenKind::Ellipsis) {
                variadic = true;
                break;
            }
            let (base, _) = self.specifiers()?;
            let (name, ty) = self.declarator(base)?;
            // Parameters of array or function type adjust to pointers.
            let ty = match ty {
                PType::Array(elem, _) => PType::Pointer(elem),
                f @ PType::Function(..) => PType::Pointer(Box::new(f)),
                other => other,
            };
            params.push((name, ty));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "`)`")?;
        Ok((params, variadic))
    }

    /// A type name, as in a cast or `sizeof`.
    fn type_name(&mut self) -> ParseResult<PType> {
        let (base, _) = self.specifiers()?;
        let (name, ty) = self.declarator(base)?;
        if let Some(name) = name {
            return err!(self.loc(), "unexpected name `{}` in type", name);
        }
        Ok(ty)
    }

    // -----------------------------------------------------------------
    // Top-level declarations.

    fn top_decl(&mut self) -> ParseResult<PTopDecl> {
        let loc = self.loc();

        // A struct *definition*; `struct tag name` falls through to the
        // declaration path.
        if self.peek() == Some(&TokenKind::KwStruct) {
            if let Some(TokenKind::Ident(_)) = self.peek2() {
                if self.tokens.get(self.pos + 2).map(|t| &t.kind) == Some(&TokenKind::LBrace) {
                    return self.struct_def(loc);
                }
            }
        }

        let mut is_extern = false;
        loop {
            if self.eat(&TokenKind::KwExtern) {
                is_extern = true;
            } else if self.eat(&TokenKind::KwStatic) {
                // Linkage is outside the subset; `static` parses and is
                // otherwise ignored.
            } else {
                break;
            }
        }

        let (base, is_const) = self.specifiers()?;
        let (name, ty) = self.declarator(base.clone())?;
        let name = match name {
            Some(n) => n,
            None => return err!(loc, "expected a declared name"),
        };

        if let PType::Function(ret, params, variadic) = ty {
            if self.eat(&TokenKind::LBrace) {
                let mut body = Vec::new();
                while !self.eat(&TokenKind::RBrace) {
                    body.push(self.stmt()?);
                }
                return Ok(PTopDecl::Func {
                    name,
                    ret: *ret,
                    params,
                    variadic,
                    body: Some(body),
                    loc,
                });
            }
            self.expect(&TokenKind::Semi, "`;`")?;
            return Ok(PTopDecl::Func {
                name,
                ret: *ret,
                params,
                variadic,
                body: None,
                loc,
            });
        }

        let init = if self.eat(&TokenKind::Assign) {
            Some(self.initializer()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semi, "`;`")?;
        Ok(PTopDecl::Var {
            name,
            ty,
            init,
            readonly: is_const,
            is_extern,
            loc,
        })
    }

    fn struct_def(&mut self, loc: Location) -> ParseResult<PTopDecl> {
        self.expect(&TokenKind::KwStruct, "`struct`")?;
        let tag = self.expect_ident("struct tag")?;
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut fields = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            let (base, _) = self.specifiers()?;
            loop {
                let (name, ty) = self.declarator(base.clone())?;
                let name = match name {
                    Some(n) => n,
                    None => return err!(self.loc(), "expected a field name"),
                };
                fields.push((name, ty));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Semi, "`;`")?;
        }
        self.expect(&TokenKind::Semi, "`;`")?;
        Ok(PTopDecl::Struct { tag, fields, loc })
    }

    fn initializer(&mut self) -> ParseResult<PInit> {
        if self.eat(&TokenKind::LBrace) {
            let mut items = Vec::new();
            if !self.eat(&TokenKind::RBrace) {
                loop {
                    items.push(self.initializer()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    // Allow a trailing comma.
                    if self.peek() == Some(&TokenKind::RBrace) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace, "`}`")?;
            }
            Ok(PInit::List(items))
        } else {
            Ok(PInit::Scalar(self.assignment_expr()?))
        }
    }

    // -----------------------------------------------------------------
    // Statements.

    fn stmt(&mut self) -> ParseResult<PStmt> {
        let loc = self.loc();
        match self.peek() {
            Some(TokenKind::LBrace) => {
                self.pos += 1;
                let mut body = Vec::new();
                while !self.eat(&TokenKind::RBrace) {
                    body.push(self.stmt()?);
                }
                Ok(PStmt::Block(body))
            }
            Some(TokenKind::Semi) => {
                self.pos += 1;
                Ok(PStmt::Expr(None))
            }
            Some(TokenKind::KwIf) => {
                self.pos += 1;
                self.expect(&TokenKind::LParen, "`(`")?;
                let cond = self.expr()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                let then = Box::new(self.stmt()?);
                let els = if self.eat(&TokenKind::KwElse) {
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                Ok(PStmt::If(cond, then, els))
            }
            Some(TokenKind::KwWhile) => {
                self.pos += 1;
                self.expect(&TokenKind::LParen, "`(`")?;
                let cond = self.expr()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(PStmt::While(cond, Box::new(self.stmt()?)))
            }
            Some(TokenKind::KwDo) => {
                self.pos += 1;
                let body = Box::new(self.stmt()?);
                self.expect(&TokenKind::KwWhile, "`while`")?;
                self.expect(&TokenKind::LParen, "`(`")?;
                let cond = self.expr()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(PStmt::DoWhile(body, cond))
            }
            Some(TokenKind::KwFor) => {
                self.pos += 1;
                self.expect(&TokenKind::LParen, "`(`")?;
                let init = if self.eat(&TokenKind::Semi) {
                    None
                } else if self.starts_type() {
                    Some(Box::new(self.decl_stmt()?))
                } else {
                    let e = self.expr()?;
                    self.expect(&TokenKind::Semi, "`;`")?;
                    Some(Box::new(PStmt::Expr(Some(e))))
                };
                let cond = if self.peek() == Some(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&TokenKind::Semi, "`;`")?;
                let step = if self.peek() == Some(&TokenKind::RParen) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(PStmt::For {
                    init,
                    cond,
                    step,
                    body: Box::new(self.stmt()?),
                })
            }
            Some(TokenKind::KwReturn) => {
                self.pos += 1;
                let value = if self.peek() == Some(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(PStmt::Return(value, loc))
            }
            Some(TokenKind::KwBreak) => {
                self.pos += 1;
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(PStmt::Break(loc))
            }
            Some(TokenKind::KwContinue) => {
                self.pos += 1;
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(PStmt::Continue(loc))
            }
            Some(TokenKind::KwSwitch) => {
                self.pos += 1;
                self.expect(&TokenKind::LParen, "`(`")?;
                let scrutinee = self.expr()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                let arms = self.switch_body()?;
                Ok(PStmt::Switch(scrutinee, arms, loc))
            }
            Some(TokenKind::KwGoto) => {
                self.pos += 1;
                let label = self.expect_ident("label")?;
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(PStmt::Goto(label, loc))
            }
            Some(TokenKind::Ident(name))
                if self.peek2() == Some(&TokenKind::Colon) =>
            {
                let name = name.clone();
                self.pos += 2;
                Ok(PStmt::Label(name, Box::new(self.stmt()?)))
            }
            _ if self.starts_type() => self.decl_stmt(),
            _ => {
                let e = self.expr()?;
                self.expect(&TokenKind::Semi, "`;`")?;
                Ok(PStmt::Expr(Some(e)))
            }
        }
    }

    /// One declaration statement, possibly declaring several names.
    fn decl_stmt(&mut self) -> ParseResult<PStmt> {
        let (base, _) = self.specifiers()?;
        let mut decls = Vec::new();
        loop {
            let loc = self.loc();
            let (name, ty) = self.declarator(base.clone())?;
            let name = match name {
                Some(n) => n,
                None => return err!(loc, "expected a declared name"),
            };
            let init = if self.eat(&TokenKind::Assign) {
                Some(self.initializer()?)
            } else {
                None
            };
            decls.push(PDecl {
                name,
                ty,
                init,
                loc,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Semi, "`;`")?;
        Ok(PStmt::Decl(decls))
    }

    /// The braced body of a switch, grouped into arms.
    fn switch_body(&mut self) -> ParseResult<Vec<PSwitchArm>> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut arms: Vec<PSwitchArm> = Vec::new();
        loop {
            match self.peek() {
                Some(TokenKind::RBrace) => {
                    self.pos += 1;
                    break;
                }
                Some(TokenKind::KwCase) | Some(TokenKind::KwDefault) => {
                    let mut labels = Vec::new();
                    while matches!(
                        self.peek(),
                        Some(TokenKind::KwCase) | Some(TokenKind::KwDefault)
                    ) {
                        let lloc = self.loc();
                        if self.eat(&TokenKind::KwCase) {
                            let v = self.cond_expr()?;
                            self.expect(&TokenKind::Colon, "`:`")?;
                            labels.push((Some(v), lloc));
                        } else {
                            self.pos += 1;
                            self.expect(&TokenKind::Colon, "`:`")?;
                            labels.push((None, lloc));
                        }
                    }
                    let mut body = Vec::new();
                    while !matches!(
                        self.peek(),
                        Some(TokenKind::KwCase)
                            | Some(TokenKind::KwDefault)
                            | Some(TokenKind::RBrace)
                            | None
                    ) {
                        body.push(self.stmt()?);
                    }
                    arms.push(PSwitchArm { labels, body });
                }
                Some(_) => return err!(self.loc(), "statement before the first case label"),
                None => return err!(self.loc(), "unterminated switch"),
            }
        }
        Ok(arms)
    }

    // -----------------------------------------------------------------
    // Expressions, one routine per precedence level.

    fn expr(&mut self) -> ParseResult<PExpr> {
        let mut e = self.assignment_expr()?;
        while self.peek() == Some(&TokenKind::Comma) {
            let loc = self.loc();
            self.pos += 1;
            let rhs = self.assignment_expr()?;
            e = PExpr::Comma(Box::new(e), Box::new(rhs), loc);
        }
        Ok(e)
    }

    fn assignment_expr(&mut self) -> ParseResult<PExpr> {
        let lhs = self.cond_expr()?;
        let op = match self.peek() {
            Some(TokenKind::Assign) => None,
            Some(TokenKind::PlusAssign) => Some(PBinop::Add),
            Some(TokenKind::MinusAssign) => Some(PBinop::Sub),
            Some(TokenKind::StarAssign) => Some(PBinop::Mul),
            Some(TokenKind::SlashAssign) => Some(PBinop::Div),
            Some(TokenKind::PercentAssign) => Some(PBinop::Mod),
            Some(TokenKind::AmpAssign) => Some(PBinop::And),
            Some(TokenKind::PipeAssign) => Some(PBinop::Or),
            Some(TokenKind::CaretAssign) => Some(PBinop::Xor),
            Some(TokenKind::ShlAssign) => Some(PBinop::Shl),
            Some(TokenKind::ShrAssign) => Some(PBinop::Shr),
            _ => return Ok(lhs),
        };
        let loc = self.loc();
        self.pos += 1;
        let rhs = self.assignment_expr()?;
        Ok(PExpr::Assign(op, Box::new(lhs), Box::new(rhs), loc))
    }

    fn cond_expr(&mut self) -> ParseResult<PExpr> {
        let cond = self.binary_expr(0)?;
        if self.peek() == Some(&TokenKind::Question) {
            let loc = self.loc();
            self.pos += 1;
            let then = self.expr()?;
            self.expect(&TokenKind::Colon, "`:`")?;
            let els = self.cond_expr()?;
            Ok(PExpr::Cond(
                Box::new(cond),
                Box::new(then),
                Box::new(els),
                loc,
            ))
        } else {
            Ok(cond)
        }
    }

    /// Binary operators by precedence level, loosest first.
    fn binary_expr(&mut self, level: usize) -> ParseResult<PExpr> {
        const LEVELS: &[&[(TokenKind, PBinop)]] = &[
            &[(TokenKind::PipePipe, PBinop::LogOr)],
            &[(TokenKind::AmpAmp, PBinop::LogAnd)],
            &[(TokenKind::Pipe, PBinop::Or)],
            &[(TokenKind::Caret, PBinop::Xor)],
            &[(TokenKind::Amp, PBinop::And)],
            &[
                (TokenKind::EqEq, PBinop::Eq),
                (TokenKind::BangEq, PBinop::Ne),
            ],
            &[
                (TokenKind::Lt, PBinop::Lt),
                (TokenKind::Gt, PBinop::Gt),
                (TokenKind::Le, PBinop::Le),
                (TokenKind::Ge, PBinop::Ge),
            ],
            &[(TokenKind::Shl, PBinop::Shl), (TokenKind::Shr, PBinop::Shr)],
            &[
                (TokenKind::Plus, PBinop::Add),
                (TokenKind::Minus, PBinop::Sub),
            ],
            &[
                (TokenKind::Star, PBinop::Mul),
                (TokenKind::Slash, PBinop::Div),
                (TokenKind::Percent, PBinop::Mod),
            ],
        ];

        if level == LEVELS.len() {
            return self.cast_expr();
        }
        let mut lhs = self.binary_expr(level + 1)?;
        'outer: loop {
            for (tok, op) in LEVELS[level] {
                if self.peek() == Some(tok) {
                    let loc = self.loc();
                    self.pos += 1;
                    let rhs = self.binary_expr(level + 1)?;
                    lhs = PExpr::Binary(*op, Box::new(lhs), Box::new(rhs), loc);
                    continue 'outer;
                }
            }
            break;
        }
        Ok(lhs)
    }

    fn cast_expr(&mut self) -> ParseResult<PExpr> {
        if self.peek() == Some(&TokenKind::LParen) {
            if let Some(next) = self.peek2() {
                if type_starts(next) {
                    let loc = self.loc();
                    self.pos += 1;
                    let ty = self.type_name()?;
                    self.expect(&TokenKind::RParen, "`)`")?;
                    let inner = self.cast_expr()?;
                    return Ok(PExpr::Cast(ty, Box::new(inner), loc));
                }
            }
        }
        self.unary_expr()
    }

    fn unary_expr(&mut self) -> ParseResult<PExpr> {
        let loc = self.loc();
        match self.peek() {
            Some(TokenKind::PlusPlus) => {
                self.pos += 1;
                let e = self.unary_expr()?;
                Ok(PExpr::PreIncDec(true, Box::new(e), loc))
            }
            Some(TokenKind::MinusMinus) => {
                self.pos += 1;
                let e = self.unary_expr()?;
                Ok(PExpr::PreIncDec(false, Box::new(e), loc))
            }
            Some(TokenKind::Minus) => {
                self.pos += 1;
                Ok(PExpr::Unary(PUnop::Neg, Box::new(self.cast_expr()?), loc))
            }
            Some(TokenKind::Plus) => {
                self.pos += 1;
                Ok(PExpr::Unary(PUnop::Plus, Box::new(self.cast_expr()?), loc))
            }
            Some(TokenKind::Tilde) => {
                self.pos += 1;
                Ok(PExpr::Unary(PUnop::BitNot, Box::new(self.cast_expr()?), loc))
            }
            Some(TokenKind::Bang) => {
                self.pos += 1;
                Ok(PExpr::Unary(PUnop::LogNot, Box::new(self.cast_expr()?), loc))
            }
            Some(TokenKind::Star) => {
                self.pos += 1;
                Ok(PExpr::Unary(PUnop::Deref, Box::new(self.cast_expr()?), loc))
            }
            Some(TokenKind::Amp) => {
                self.pos += 1;
                Ok(PExpr::Unary(PUnop::AddrOf, Box::new(self.cast_expr()?), loc))
            }
            Some(TokenKind::KwSizeof) => {
                self.pos += 1;
                if self.peek() == Some(&TokenKind::LParen) {
                    if let Some(next) = self.peek2() {
                        if type_starts(next) {
                            self.pos += 1;
                            let ty = self.type_name()?;
                            self.expect(&TokenKind::RParen, "`)`")?;
                            return Ok(PExpr::SizeofType(ty, loc));
                        }
                    }
                }
                let e = self.unary_expr()?;
                Ok(PExpr::SizeofExpr(Box::new(e), loc))
            }
            _ => self.postfix_expr(),
        }
    }

    fn postfix_expr(&mut self) -> ParseResult<PExpr> {
        let mut e = self.primary_expr()?;
        loop {
            let loc = self.loc();
            match self.peek() {
                Some(TokenKind::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if !self.eat(&TokenKind::RParen) {
                        loop {
                            args.push(self.assignment_expr()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(&TokenKind::RParen, "`)`")?;
                    }
                    e = PExpr::Call(Box::new(e), args, loc);
                }
                Some(TokenKind::LBracket) => {
                    self.pos += 1;
                    let idx = self.expr()?;
                    self.expect(&TokenKind::RBracket, "`]`")?;
                    e = PExpr::Index(Box::new(e), Box::new(idx), loc);
                }
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                    let field = self.expect_ident("field name")?;
                    e = PExpr::Member(Box::new(e), field, false, loc);
                }
                Some(TokenKind::Arrow) => {
                    self.pos += 1;
                    let field = self.expect_ident("field name")?;
                    e = PExpr::Member(Box::new(e), field, true, loc);
                }
                Some(TokenKind::PlusPlus) => {
                    self.pos += 1;
                    e = PExpr::PostIncDec(true, Box::new(e), loc);
                }
                Some(TokenKind::MinusMinus) => {
                    self.pos += 1;
                    e = PExpr::PostIncDec(false, Box::new(e), loc);
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn primary_expr(&mut self) -> ParseResult<PExpr> {
        let loc = self.loc();
        match self.bump()? {
            TokenKind::Ident(name) => Ok(PExpr::Ident(name, loc)),
            TokenKind::IntLit {
                value,
                unsigned,
                long,
            } => Ok(PExpr::IntLit {
                value,
                unsigned,
                long,
                loc,
            }),
            TokenKind::FloatLit { value, single } => Ok(PExpr::FloatLit {
                value,
                single,
                loc,
            }),
            TokenKind::CharLit(v) => Ok(PExpr::CharLit(v, loc)),
            TokenKind::StrLit(bytes) => Ok(PExpr::StrLit(bytes, loc)),
            TokenKind::LParen => {
                let e = self.expr()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(e)
            }
            other => err!(loc, "unexpected token {:?}", other),
        }
    }
}

enum Suffix {
    Array(Option<Box<PExpr>>),
    Params(Vec<(Option<String>, PType)>, bool),
}

/// Does this token begin a type name (inside parentheses)?
fn type_starts(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::KwVoid
            | TokenKind::KwChar
            | TokenKind::KwShort
            | TokenKind::KwInt
            | TokenKind::KwLong
            | TokenKind::KwFloat
            | TokenKind::KwDouble
            | TokenKind::KwSigned
            | TokenKind::KwUnsigned
            | TokenKind::KwStruct
            | TokenKind::KwConst
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_str(src: &str) -> PProgram {
        parse(tokenize(src, "test.c").unwrap()).unwrap()
    }

    #[test]
    fn function_definition() {
        let prog = parse_str("int add(int a, int b) { return a + b; }");
        match &prog.decls[0] {
            PTopDecl::Func {
                name,
                ret,
                params,
                body,
                ..
            } => {
                assert_eq!(name, "add");
                assert_eq!(*ret, PType::Int(false));
                assert_eq!(params.len(), 2);
                assert!(body.is_some());
            }
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn declarators() {
        let prog = parse_str("int a[3]; int *p; int **q; long m[2][4];");
        match &prog.decls[0] {
            PTopDecl::Var { ty, .. } => {
                assert!(matches!(ty, PType::Array(_, Some(_))));
            }
            other => panic!("unexpected: {:?}", other),
        }
        match &prog.decls[2] {
            PTopDecl::Var { ty, .. } => match ty {
                PType::Pointer(inner) => assert!(matches!(**inner, PType::Pointer(_))),
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
        match &prog.decls[3] {
            PTopDecl::Var { ty, .. } => match ty {
                PType::Array(inner, _) => assert!(matches!(**inner, PType::Array(..))),
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn function_pointer_declarator() {
        let prog = parse_str("int (*callback)(int);");
        match &prog.decls[0] {
            PTopDecl::Var { ty, .. } => match ty {
                PType::Pointer(inner) => {
                    assert!(matches!(**inner, PType::Function(..)))
                }
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn precedence() {
        let prog = parse_str("int x = 1 + 2 * 3;");
        match &prog.decls[0] {
            PTopDecl::Var {
                init: Some(PInit::Scalar(e)),
                ..
            } => match e {
                PExpr::Binary(PBinop::Add, _, rhs, _) => {
                    assert!(matches!(**rhs, PExpr::Binary(PBinop::Mul, ..)));
                }
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn struct_definition_and_use() {
        let prog = parse_str("struct point { int x; int y; }; struct point p;");
        assert!(matches!(prog.decls[0], PTopDecl::Struct { .. }));
        match &prog.decls[1] {
            PTopDecl::Var { ty, .. } => assert_eq!(*ty, PType::Struct("point".into())),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn switch_grouping() {
        let prog = parse_str(
            "void f(int x) { switch (x) { case 1: case 2: x = 0; break; default: x = 1; } }",
        );
        match &prog.decls[0] {
            PTopDecl::Func { body: Some(b), .. } => match &b[0] {
                PStmt::Switch(_, arms, _) => {
                    assert_eq!(arms.len(), 2);
                    assert_eq!(arms[0].labels.len(), 2);
                    assert!(arms[1].labels[0].0.is_none());
                }
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn for_loop_with_declaration() {
        let prog = parse_str("void f(void) { for (int i = 0; i < 10; i++) ; }");
        match &prog.decls[0] {
            PTopDecl::Func { body: Some(b), .. } => match &b[0] {
                PStmt::For { init, cond, step, .. } => {
                    assert!(matches!(init.as_deref(), Some(PStmt::Decl(_))));
                    assert!(cond.is_some());
                    assert!(step.is_some());
                }
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn cast_versus_parenthesis() {
        let prog = parse_str("int x = (int)1.0; int y = (x);");
        match &prog.decls[0] {
            PTopDecl::Var {
                init: Some(PInit::Scalar(e)),
                ..
            } => assert!(matches!(e, PExpr::Cast(..))),
            other => panic!("unexpected: {:?}", other),
        }
        match &prog.decls[1] {
            PTopDecl::Var {
                init: Some(PInit::Scalar(e)),
                ..
            } => assert!(matches!(e, PExpr::Ident(..))),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
