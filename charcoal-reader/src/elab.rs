//! Elaboration: parsed C to Clight.
//!
//! Everything the back-end does not want to see is dealt with here:
//!
//! * types are checked and the usual arithmetic conversions become
//!   explicit `Ecast` nodes, so operator operands reach `cshmgen` with
//!   equal arithmetic types;
//! * side effects leave expressions: assignments, calls, `&&`/`||`, `?:`,
//!   `++`/`--` and the comma operator turn into statement prefixes over
//!   fresh temporaries (pure, non-trapping `&&`/`||` of boolean operands
//!   instead becomes a bitwise `&`/`|` of comparisons);
//! * initialisers become assignments (locals) or byte images (globals);
//! * `while`/`do`/`for` become the Clight `Sloop` form;
//! * switch case values are canonicalised to the scrutinee's bit pattern;
//! * `main` gets its implicit `return 0`.
//!
//! Outside the subset (diagnosed, never silently accepted): `typedef`,
//! `enum`, `union`, bitfields, variadic definitions, `long double`,
//! aggregate parameters and returns, `extern` variables.

use crate::ast::*;
use crate::error::{Location, ParseResult};
use charcoal_codegen::ir::clight::{
    BinaryOp, CType, Expr, FunType, Function, GlobVar, IntSize, Program, Signedness, Stmt,
    StructTable, SwitchCase, UnaryOp,
};
use charcoal_codegen::symbols::{symbol, Symbol};
use std::collections::{HashMap, HashSet};

/// Elaborate a parsed translation unit into Clight.
pub fn elaborate(prog: PProgram) -> ParseResult<Program> {
    let mut elab = Elab::default();
    for decl in &prog.decls {
        elab.top_decl(decl)?;
    }
    let mut out = Program::default();
    out.structs = elab.structs;
    out.globals = elab.globals;
    out.functions = elab.functions;
    // Declared functions that were never defined are externals.
    for (name, ft) in elab.declared {
        if !elab.defined.contains(&name) {
            out.externals.push((symbol(&name), ft));
        }
    }
    Ok(out)
}

#[derive(Default)]
struct Elab {
    structs: StructTable,
    globals: Vec<(Symbol, GlobVar)>,
    functions: Vec<(Symbol, Function)>,
    /// Types of globals and functions, for identifier lookup.
    global_types: HashMap<String, CType>,
    /// Declared function types, in declaration order.
    declared: Vec<(String, FunType)>,
    defined: HashSet<String>,
}

fn int() -> CType {
    CType::Int(IntSize::I32, Signedness::Signed)
}

fn uint() -> CType {
    CType::Int(IntSize::I32, Signedness::Unsigned)
}

impl Elab {
    fn ctype(&self, ty: &PType, loc: &Location) -> ParseResult<CType> {
        Ok(match ty {
            PType::Void => CType::Void,
            PType::Char(u) | PType::Short(u) | PType::Int(u) => {
                let size = match ty {
                    PType::Char(_) => IntSize::I8,
                    PType::Short(_) => IntSize::I16,
                    _ => IntSize::I32,
                };
                CType::Int(size, signedness(*u))
            }
            PType::Long(u) => CType::Long(signedness(*u)),
            PType::Float => CType::Float,
            PType::Double => CType::Double,
            PType::Struct(tag) => {
                let tag = symbol(tag);
                if !self.structs.is_defined(tag) {
                    return err!(loc, "use of undefined struct `{}`", tag);
                }
                CType::Struct(tag)
            }
            PType::Pointer(inner) => CType::Pointer(Box::new(self.ctype(inner, loc)?)),
            PType::Array(inner, len) => {
                let n = match len {
                    Some(e) => const_int(e)?,
                    None => return err!(loc, "array type needs an explicit length here"),
                };
                if n <= 0 {
                    return err!(loc, "array length must be positive");
                }
                CType::Array(Box::new(self.ctype(inner, loc)?), n)
            }
            PType::Function(ret, params, variadic) => {
                let mut ps = Vec::with_capacity(params.len());
                for (_, p) in params {
                    ps.push(self.ctype(p, loc)?);
                }
                CType::Function(Box::new(FunType {
                    params: ps,
                    ret: self.ctype(ret, loc)?,
                    variadic: *variadic,
                }))
            }
        })
    }

    fn top_decl(&mut self, decl: &PTopDecl) -> ParseResult<()> {
        match decl {
            PTopDecl::Struct { tag, fields, loc } => {
                let tag = symbol(tag);
                let mut fs = Vec::with_capacity(fields.len());
                for (name, ty) in fields {
                    let ty = self.ctype(ty, loc)?;
                    fs.push((symbol(name), ty));
                }
                self.structs.define(tag, fs);
                Ok(())
            }
            PTopDecl::Var {
                name,
                ty,
                init,
                readonly,
                is_extern,
                loc,
            } => {
                if *is_extern {
                    return err!(loc, "extern variables are not supported");
                }
                let ty = self.ctype(ty, loc)?;
                let init = match init {
                    None => None,
                    Some(i) => Some(self.init_bytes(&ty, i, loc)?),
                };
                self.global_types.insert(name.clone(), ty.clone());
                self.globals.push((
                    symbol(name),
                    GlobVar {
                        ty,
                        init,
                        readonly: *readonly,
                    },
                ));
                Ok(())
            }
            PTopDecl::Func {
                name,
                ret,
                params,
                variadic,
                body,
                loc,
            } => {
                let ret_ty = self.ctype(ret, loc)?;
                let mut param_tys = Vec::with_capacity(params.len());
                for (_, p) in params {
                    param_tys.push(self.ctype(p, loc)?);
                }
                let ft = FunType {
                    params: param_tys.clone(),
                    ret: ret_ty.clone(),
                    variadic: *variadic,
                };
                if ft.signature().is_none() {
                    return err!(loc, "aggregate parameter or result in `{}`", name);
                }
                self.global_types
                    .insert(name.clone(), CType::Function(Box::new(ft.clone())));
                if !self.declared.iter().any(|(n, _)| n == name) {
                    self.declared.push((name.clone(), ft));
                }

                if let Some(body) = body {
                    if *variadic {
                        return err!(loc, "variadic function definitions are not supported");
                    }
                    if self.defined.contains(name) {
                        return err!(loc, "redefinition of `{}`", name);
                    }
                    self.defined.insert(name.clone());
                    let func = self.function(name, ret_ty, params, &param_tys, body, loc)?;
                    self.functions.push((symbol(name), func));
                }
                Ok(())
            }
        }
    }

    fn function(
        &mut self,
        name: &str,
        ret: CType,
        params: &[(Option<String>, PType)],
        param_tys: &[CType],
        body: &[PStmt],
        loc: &Location,
    ) -> ParseResult<Function> {
        let mut func = Function {
            ret: ret.clone(),
            params: Vec::new(),
            param_temps: Vec::new(),
            vars: Vec::new(),
            temps: Vec::new(),
            variadic: false,
            body: Stmt::Sskip,
        };
        let mut ctx = FuncElab {
            elab: self,
            func: &mut func,
            scopes: vec![HashMap::new()],
            rename: HashMap::new(),
            labels: HashSet::new(),
            gotos: Vec::new(),
            ret: ret.clone(),
        };

        for ((pname, _), ty) in params.iter().zip(param_tys.iter()) {
            let pname = match pname {
                Some(n) => n,
                None => return err!(loc, "parameter name missing in definition of `{}`", name),
            };
            let sym = ctx.declare(pname, ty.clone());
            ctx.func.params.push((sym, ty.clone()));
        }

        let mut stmts = Stmt::Sskip;
        for s in body {
            let lowered = ctx.stmt(s, Ctl::default())?;
            stmts = Stmt::seq(stmts, lowered);
        }

        // C99 5.1.2.2.3: falling off the end of main returns 0.
        if name == "main" {
            stmts = Stmt::seq(
                stmts,
                Stmt::Sreturn(Some(Expr::EconstInt(0, int()))),
            );
        }

        for (label, gloc) in &ctx.gotos {
            if !ctx.labels.contains(label) {
                return err!(gloc, "goto to undefined label `{}`", label);
            }
        }

        func.body = stmts;
        Ok(func)
    }

    // -----------------------------------------------------------------
    // Global initialiser images.

    fn init_bytes(&self, ty: &CType, init: &PInit, loc: &Location) -> ParseResult<Vec<u8>> {
        let size = ty.sizeof(&self.structs) as usize;
        let mut bytes = vec![0u8; size];
        self.fill_init(ty, init, loc, &mut bytes, 0)?;
        Ok(bytes)
    }

    fn fill_init(
        &self,
        ty: &CType,
        init: &PInit,
        loc: &Location,
        out: &mut [u8],
        at: usize,
    ) -> ParseResult<()> {
        match (ty, init) {
            (CType::Array(elem, n), PInit::List(items)) => {
                if items.len() as i64 > *n {
                    return err!(loc, "too many initialisers");
                }
                let esize = elem.sizeof(&self.structs) as usize;
                for (i, item) in items.iter().enumerate() {
                    self.fill_init(elem, item, loc, out, at + i * esize)?;
                }
                Ok(())
            }
            (CType::Array(elem, n), PInit::Scalar(PExpr::StrLit(s, _))) => {
                if !matches!(**elem, CType::Int(IntSize::I8, _)) {
                    return err!(loc, "string initialiser for a non-char array");
                }
                if s.len() as i64 + 1 > *n {
                    return err!(loc, "string initialiser does not fit");
                }
                out[at..at + s.len()].copy_from_slice(s);
                Ok(())
            }
            (CType::Struct(tag), PInit::List(items)) => {
                let fields: Vec<(Symbol, CType)> = self
                    .structs
                    .fields(*tag)
                    .iter()
                    .map(|(n, t)| (*n, t.clone()))
                    .collect();
                if items.len() > fields.len() {
                    return err!(loc, "too many initialisers");
                }
                for (item, (fname, fty)) in items.iter().zip(fields.iter()) {
                    let (ofs, _) = self.structs.field_offset(*tag, *fname).unwrap();
                    self.fill_init(fty, item, loc, out, at + ofs as usize)?;
                }
                Ok(())
            }
            (_, PInit::Scalar(e)) => {
                if !ty.is_scalar() {
                    return err!(loc, "invalid initialiser for `{}`", ty);
                }
                let size = ty.sizeof(&self.structs) as usize;
                match ty {
                    CType::Float => {
                        let v = const_float(e)? as f32;
                        out[at..at + 4].copy_from_slice(&v.to_le_bytes());
                    }
                    CType::Double => {
                        let v = const_float(e)?;
                        out[at..at + 8].copy_from_slice(&v.to_le_bytes());
                    }
                    _ => {
                        let v = const_int(e)?;
                        out[at..at + size].copy_from_slice(&v.to_le_bytes()[..size]);
                    }
                }
                Ok(())
            }
            (_, PInit::List(_)) => err!(loc, "brace initialiser for a scalar"),
        }
    }
}

fn signedness(unsigned: bool) -> Signedness {
    if unsigned {
        Signedness::Unsigned
    } else {
        Signedness::Signed
    }
}

/// Evaluate a constant integer expression.
fn const_int(e: &PExpr) -> ParseResult<i64> {
    Ok(match e {
        PExpr::IntLit { value, .. } => *value as i64,
        PExpr::CharLit(v, _) => *v,
        PExpr::Unary(PUnop::Neg, a, _) => const_int(a)?.wrapping_neg(),
        PExpr::Unary(PUnop::BitNot, a, _) => !const_int(a)?,
        PExpr::Binary(op, a, b, loc) => {
            let x = const_int(a)?;
            let y = const_int(b)?;
            match op {
                PBinop::Add => x.wrapping_add(y),
                PBinop::Sub => x.wrapping_sub(y),
                PBinop::Mul => x.wrapping_mul(y),
                PBinop::Div if y != 0 => x / y,
                PBinop::Mod if y != 0 => x % y,
                PBinop::And => x & y,
                PBinop::Or => x | y,
                PBinop::Xor => x ^ y,
                PBinop::Shl => x.wrapping_shl(y as u32),
                PBinop::Shr => x.wrapping_shr(y as u32),
                _ => return err!(loc, "operator not allowed in a constant expression"),
            }
        }
        other => return err!(other.loc(), "not a constant expression"),
    })
}

/// Evaluate a constant float expression.
fn const_float(e: &PExpr) -> ParseResult<f64> {
    Ok(match e {
        PExpr::FloatLit { value, .. } => *value,
        PExpr::Unary(PUnop::Neg, a, _) => -const_float(a)?,
        _ => const_int(e)? as f64,
    })
}

/// Break/continue admissibility at the current point.
#[derive(Clone, Copy, Default)]
struct Ctl {
    in_loop: bool,
    in_switch: bool,
}

struct FuncElab<'a> {
    elab: &'a Elab,
    func: &'a mut Function,
    /// Innermost scope last; maps source names to renamed symbols.
    scopes: Vec<HashMap<String, (Symbol, CType)>>,
    /// Shadowing counter per source name.
    rename: HashMap<String, u32>,
    labels: HashSet<String>,
    gotos: Vec<(String, Location)>,
    ret: CType,
}

/// An elaborated expression: the statements carrying its side effects,
/// then its pure value.
type Elaborated = (Stmt, Expr);

impl<'a> FuncElab<'a> {
    fn declare(&mut self, name: &str, ty: CType) -> Symbol {
        let n = self.rename.entry(name.to_string()).or_insert(0);
        let sym = if *n == 0 {
            symbol(name)
        } else {
            symbol(&format!("{}${}", name, n))
        };
        *n += 1;
        self.scopes
            .last_mut()
            .unwrap()
            .insert(name.to_string(), (sym, ty));
        sym
    }

    fn lookup(&self, name: &str) -> Option<(Symbol, CType, bool)> {
        for scope in self.scopes.iter().rev() {
            if let Some((sym, ty)) = scope.get(name) {
                return Some((*sym, ty.clone(), true));
            }
        }
        self.elab
            .global_types
            .get(name)
            .map(|ty| (symbol(name), ty.clone(), false))
    }

    fn new_temp(&mut self, ty: CType) -> charcoal_codegen::ir::Temp {
        self.func.new_temp(ty)
    }

    // -----------------------------------------------------------------
    // Conversions.

    /// Integer promotion: sub-int integers widen to `int`.
    fn promote(&self, e: Expr) -> Expr {
        match e.ty() {
            CType::Int(IntSize::I8, _) | CType::Int(IntSize::I16, _) => {
                Expr::Ecast(Box::new(e), int())
            }
            _ => e,
        }
    }

    /// Implicit conversion of `e` to `to`.
    fn convert(&self, e: Expr, to: &CType, loc: &Location) -> ParseResult<Expr> {
        let from = e.ty().clone();
        if from == *to {
            return Ok(e);
        }
        let ok = (from.is_scalar() && to.is_scalar())
            || matches!(to, CType::Void);
        if !ok {
            return err!(loc, "cannot convert `{}` to `{}`", from, to);
        }
        Ok(Expr::Ecast(Box::new(e), to.clone()))
    }

    /// The common type of the usual arithmetic conversions.
    fn arith_common(&self, a: &CType, b: &CType, loc: &Location) -> ParseResult<CType> {
        use Signedness::*;
        let rank = |t: &CType| -> Option<u32> {
            match t {
                CType::Double => Some(6),
                CType::Float => Some(5),
                CType::Long(Unsigned) => Some(4),
                CType::Long(Signed) => Some(3),
                CType::Int(_, Unsigned) => Some(2),
                CType::Int(_, Signed) => Some(1),
                _ => None,
            }
        };
        // Promotion first collapses sub-int sizes.
        let pa = match a {
            CType::Int(IntSize::I8, _) | CType::Int(IntSize::I16, _) => int(),
            other => other.clone(),
        };
        let pb = match b {
            CType::Int(IntSize::I8, _) | CType::Int(IntSize::I16, _) => int(),
            other => other.clone(),
        };
        match (rank(&pa), rank(&pb)) {
            (Some(ra), Some(rb)) => Ok(if ra >= rb { pa } else { pb }),
            _ => err!(loc, "invalid operands `{}` and `{}`", a, b),
        }
    }

    /// A "truthiness" comparison of `e` against zero, yielding `int`.
    fn not_zero(&self, e: Expr, loc: &Location) -> ParseResult<Expr> {
        self.zero_cmp(e, BinaryOp::Ne, loc)
    }

    fn zero_cmp(&self, e: Expr, op: BinaryOp, loc: &Location) -> ParseResult<Expr> {
        let ty = e.ty().clone();
        let zero = match &ty {
            CType::Int(..) => Expr::EconstInt(0, int()),
            CType::Long(_) | CType::Pointer(_) | CType::Function(_) => {
                Expr::EconstLong(0, CType::Long(Signedness::Unsigned))
            }
            CType::Double => Expr::EconstFloat(0.0, CType::Double),
            CType::Float => Expr::EconstSingle(0.0, CType::Float),
            other => return err!(loc, "`{}` is not a scalar condition", other),
        };
        Ok(Expr::Ebinop(op, Box::new(e), Box::new(zero), int()))
    }

    // -----------------------------------------------------------------
    // Expressions.

    /// Elaborate `e` as an l-value.
    fn lvalue(&mut self, e: &PExpr) -> ParseResult<Elaborated> {
        match e {
            PExpr::Ident(name, loc) => match self.lookup(name) {
                Some((sym, ty, _)) => Ok((Stmt::Sskip, Expr::Evar(sym, ty))),
                None => err!(loc, "undeclared identifier `{}`", name),
            },
            PExpr::Unary(PUnop::Deref, inner, loc) => {
                let (pre, p) = self.rvalue(inner)?;
                match p.ty().clone() {
                    CType::Pointer(pointee) => {
                        Ok((pre, Expr::Ederef(Box::new(p), *pointee)))
                    }
                    other => err!(loc, "cannot dereference `{}`", other),
                }
            }
            PExpr::Index(base, idx, loc) => {
                let add = PExpr::Binary(
                    PBinop::Add,
                    base.clone(),
                    idx.clone(),
                    loc.clone(),
                );
                let (pre, p) = self.rvalue(&add)?;
                match p.ty().clone() {
                    CType::Pointer(pointee) => {
                        Ok((pre, Expr::Ederef(Box::new(p), *pointee)))
                    }
                    other => err!(loc, "cannot index `{}`", other),
                }
            }
            PExpr::Member(base, field, arrow, loc) => {
                let (pre, base_lv) = if *arrow {
                    let (pre, p) = self.rvalue(base)?;
                    match p.ty().clone() {
                        CType::Pointer(pointee) => {
                            (pre, Expr::Ederef(Box::new(p), *pointee))
                        }
                        other => return err!(loc, "`->` on `{}`", other),
                    }
                } else {
                    self.lvalue(base)?
                };
                let tag = match base_lv.ty() {
                    CType::Struct(tag) => *tag,
                    other => return err!(loc, "member access on `{}`", other),
                };
                let fsym = symbol(field);
                let fty = match self.elab.structs.field_offset(tag, fsym) {
                    Some((_, ty)) => ty.clone(),
                    None => return err!(loc, "no field `{}` in struct {}", field, tag),
                };
                Ok((pre, Expr::Efield(Box::new(base_lv), fsym, fty)))
            }
            other => err!(other.loc(), "expression is not an l-value"),
        }
    }

    /// Elaborate `e` as an r-value, applying array decay.
    fn rvalue(&mut self, e: &PExpr) -> ParseResult<Elaborated> {
        let (pre, v) = self.rvalue_novalue_check(e)?;
        if matches!(v.ty(), CType::Void) {
            return err!(e.loc(), "void value used where a value is required");
        }
        Ok((pre, v))
    }

    fn rvalue_novalue_check(&mut self, e: &PExpr) -> ParseResult<Elaborated> {
        match e {
            PExpr::IntLit {
                value,
                unsigned,
                long,
                loc: _,
            } => {
                // C type of an integer literal: the first of
                // int/unsigned int/long/unsigned long that can hold it,
                // starting from the suffix.
                let fits_i32 = *value <= i32::MAX as u64;
                let fits_u32 = *value <= u32::MAX as u64;
                let fits_i64 = *value <= i64::MAX as u64;
                let (use_long, uns) = if *long {
                    (true, *unsigned || !fits_i64)
                } else if *unsigned {
                    (!fits_u32, true)
                } else if fits_i32 {
                    (false, false)
                } else {
                    (true, !fits_i64)
                };
                Ok((
                    Stmt::Sskip,
                    if use_long {
                        Expr::EconstLong(*value as i64, CType::Long(signedness(uns)))
                    } else {
                        Expr::EconstInt(
                            *value as i32,
                            CType::Int(IntSize::I32, signedness(uns)),
                        )
                    },
                ))
            }
            PExpr::FloatLit { value, single, .. } => Ok((
                Stmt::Sskip,
                if *single {
                    Expr::EconstSingle(*value as f32, CType::Float)
                } else {
                    Expr::EconstFloat(*value, CType::Double)
                },
            )),
            PExpr::CharLit(v, _) => Ok((Stmt::Sskip, Expr::EconstInt(*v as i32, int()))),
            PExpr::StrLit(bytes, _) => Ok((
                Stmt::Sskip,
                Expr::EconstStr(
                    bytes.clone(),
                    CType::Pointer(Box::new(CType::Int(IntSize::I8, Signedness::Signed))),
                ),
            )),
            PExpr::Ident(..) | PExpr::Index(..) | PExpr::Member(..) => {
                let (pre, lv) = self.lvalue(e)?;
                Ok((pre, self.decay(lv)))
            }
            PExpr::Unary(PUnop::Deref, ..) => {
                let (pre, lv) = self.lvalue(e)?;
                Ok((pre, self.decay(lv)))
            }
            PExpr::Unary(PUnop::AddrOf, inner, _) => {
                let (pre, lv) = self.lvalue(inner)?;
                let ty = CType::Pointer(Box::new(lv.ty().clone()));
                Ok((pre, Expr::Eaddrof(Box::new(lv), ty)))
            }
            PExpr::Unary(op, inner, loc) => {
                let (pre, v) = self.rvalue(inner)?;
                match op {
                    PUnop::Plus => {
                        let v = self.promote(v);
                        Ok((pre, v))
                    }
                    PUnop::Neg => {
                        let v = self.promote(v);
                        let ty = v.ty().clone();
                        if !ty.is_integer() && !ty.is_float() {
                            return err!(loc, "cannot negate `{}`", ty);
                        }
                        Ok((pre, Expr::Eunop(UnaryOp::Neg, Box::new(v), ty)))
                    }
                    PUnop::BitNot => {
                        let v = self.promote(v);
                        let ty = v.ty().clone();
                        if !ty.is_integer() {
                            return err!(loc, "`~` needs an integer operand");
                        }
                        Ok((pre, Expr::Eunop(UnaryOp::Not, Box::new(v), ty)))
                    }
                    PUnop::LogNot => {
                        let v = self.zero_cmp(v, BinaryOp::Eq, loc)?;
                        Ok((pre, v))
                    }
                    PUnop::Deref | PUnop::AddrOf => unreachable!(),
                }
            }
            PExpr::Binary(PBinop::LogAnd, a, b, loc) => self.logical(true, a, b, loc),
            PExpr::Binary(PBinop::LogOr, a, b, loc) => self.logical(false, a, b, loc),
            PExpr::Binary(op, a, b, loc) => {
                let (pre_a, va) = self.rvalue(a)?;
                let (pre_b, vb) = self.rvalue(b)?;
                let (v, _) = self.binary(*op, va, vb, loc)?;
                Ok((Stmt::seq(pre_a, pre_b), v))
            }
            PExpr::Assign(op, lhs, rhs, loc) => {
                let (pre, lv, assign) = self.assignment(*op, lhs, rhs, loc)?;
                // The value of an assignment is the stored value; re-read
                // the (now pure) l-value.
                Ok((Stmt::seq(pre, assign), lv))
            }
            PExpr::Cond(c, a, b, loc) => {
                let (pre_c, vc) = self.rvalue(c)?;
                let (pre_a, va) = self.rvalue(a)?;
                let (pre_b, vb) = self.rvalue(b)?;
                let common = if va.ty() == vb.ty() {
                    va.ty().clone()
                } else {
                    self.arith_common(va.ty(), vb.ty(), loc)?
                };
                let va = self.convert(va, &common, loc)?;
                let vb = self.convert(vb, &common, loc)?;
                let t = self.new_temp(common.clone());
                let branch = Stmt::Sifthenelse(
                    vc,
                    Box::new(Stmt::seq(pre_a, Stmt::Sset(t, va))),
                    Box::new(Stmt::seq(pre_b, Stmt::Sset(t, vb))),
                );
                Ok((
                    Stmt::seq(pre_c, branch),
                    Expr::Etempvar(t, common),
                ))
            }
            PExpr::Call(..) => {
                let (pre, value) = self.call(e, true)?;
                Ok((pre, value.expect("call value")))
            }
            PExpr::Cast(ty, inner, loc) => {
                let to = self.elab.ctype(ty, loc)?;
                let (pre, v) = self.rvalue_novalue_check(inner)?;
                if !matches!(to, CType::Void) && (!v.ty().is_scalar() || !to.is_scalar()) {
                    return err!(loc, "invalid cast from `{}` to `{}`", v.ty(), to);
                }
                Ok((pre, Expr::Ecast(Box::new(v), to)))
            }
            PExpr::SizeofType(ty, loc) => {
                let ty = self.elab.ctype(ty, loc)?;
                Ok((Stmt::Sskip, Expr::Esizeof(ty, uint())))
            }
            PExpr::SizeofExpr(inner, _) => {
                // The operand is not evaluated; its effects are dropped.
                let (_, v) = self.rvalue_novalue_check(inner)?;
                Ok((Stmt::Sskip, Expr::Esizeof(v.ty().clone(), uint())))
            }
            PExpr::PreIncDec(inc, inner, loc) => {
                let (pre, lv) = self.lvalue(inner)?;
                let assign = self.incdec_assign(&lv, *inc, loc)?;
                Ok((Stmt::seq(pre, assign), lv))
            }
            PExpr::PostIncDec(inc, inner, loc) => {
                let (pre, lv) = self.lvalue(inner)?;
                let ty = lv.ty().clone();
                if !ty.is_scalar() {
                    return err!(loc, "`++`/`--` needs a scalar");
                }
                let t = self.new_temp(ty.clone());
                let save = Stmt::Sset(t, lv.clone());
                let assign = self.incdec_assign(&lv, *inc, loc)?;
                Ok((
                    Stmt::seq(pre, Stmt::seq(save, assign)),
                    Expr::Etempvar(t, ty),
                ))
            }
            PExpr::Comma(a, b, _) => {
                let pre_a = self.effects_only(a)?;
                let (pre_b, vb) = self.rvalue_novalue_check(b)?;
                Ok((Stmt::seq(pre_a, pre_b), vb))
            }
        }
    }

    /// Array-to-pointer and function designator decay.
    fn decay(&self, lv: Expr) -> Expr {
        match lv.ty().clone() {
            CType::Array(elem, _) => {
                let ty = CType::Pointer(elem);
                Expr::Eaddrof(Box::new(lv), ty)
            }
            _ => lv,
        }
    }

    /// `++`/`--` update of an already-elaborated pure l-value.
    fn incdec_assign(&mut self, lv: &Expr, inc: bool, loc: &Location) -> ParseResult<Stmt> {
        let ty = lv.ty().clone();
        let one = Expr::EconstInt(1, int());
        let op = if inc { BinaryOp::Add } else { BinaryOp::Sub };
        let new_value = match &ty {
            CType::Pointer(_) => Expr::Ebinop(op, Box::new(lv.clone()), Box::new(one), ty),
            t if t.is_integer() || t.is_float() => {
                let (a, b, common) = {
                    let common = self.arith_common(t, &int(), loc)?;
                    let a = self.convert(lv.clone(), &common, loc)?;
                    let b = self.convert(one, &common, loc)?;
                    (a, b, common)
                };
                let sum = Expr::Ebinop(op, Box::new(a), Box::new(b), common);
                self.convert(sum, t, loc)?
            }
            other => return err!(loc, "`++`/`--` on `{}`", other),
        };
        Ok(Stmt::Sassign(lv.clone(), new_value))
    }

    /// Typed binary operation over elaborated operands. Returns the
    /// expression and its type.
    fn binary(
        &mut self,
        op: PBinop,
        a: Expr,
        b: Expr,
        loc: &Location,
    ) -> ParseResult<(Expr, CType)> {
        use PBinop::*;
        let ta = a.ty().clone();
        let tb = b.ty().clone();

        let cop = |op: PBinop| match op {
            Add => BinaryOp::Add,
            Sub => BinaryOp::Sub,
            Mul => BinaryOp::Mul,
            Div => BinaryOp::Div,
            Mod => BinaryOp::Mod,
            And => BinaryOp::And,
            Or => BinaryOp::Or,
            Xor => BinaryOp::Xor,
            Shl => BinaryOp::Shl,
            Shr => BinaryOp::Shr,
            Eq => BinaryOp::Eq,
            Ne => BinaryOp::Ne,
            Lt => BinaryOp::Lt,
            Gt => BinaryOp::Gt,
            Le => BinaryOp::Le,
            Ge => BinaryOp::Ge,
            LogAnd | LogOr => unreachable!(),
        };

        // Pointer arithmetic keeps its mixed types.
        match op {
            Add if ta.is_pointer() && tb.is_integer() => {
                let ty = ta.clone();
                return Ok((
                    Expr::Ebinop(BinaryOp::Add, Box::new(a), Box::new(b), ty.clone()),
                    ty,
                ));
            }
            Add if ta.is_integer() && tb.is_pointer() => {
                let ty = tb.clone();
                return Ok((
                    Expr::Ebinop(BinaryOp::Add, Box::new(a), Box::new(b), ty.clone()),
                    ty,
                ));
            }
            Sub if ta.is_pointer() && tb.is_integer() => {
                let ty = ta.clone();
                return Ok((
                    Expr::Ebinop(BinaryOp::Sub, Box::new(a), Box::new(b), ty.clone()),
                    ty,
                ));
            }
            Sub if ta.is_pointer() && tb.is_pointer() => {
                let ty = CType::Long(Signedness::Signed);
                return Ok((
                    Expr::Ebinop(BinaryOp::Sub, Box::new(a), Box::new(b), ty.clone()),
                    ty,
                ));
            }
            Eq | Ne | Lt | Gt | Le | Ge if ta.is_pointer() || tb.is_pointer() => {
                // Pointer comparison; a literal 0 on either side is fine.
                return Ok((
                    Expr::Ebinop(cop(op), Box::new(a), Box::new(b), int()),
                    int(),
                ));
            }
            Shl | Shr => {
                if !ta.is_integer() || !tb.is_integer() {
                    return err!(loc, "shift needs integer operands");
                }
                let a = self.promote(a);
                let ty = a.ty().clone();
                let b = self.convert(b, &int(), loc)?;
                return Ok((
                    Expr::Ebinop(cop(op), Box::new(a), Box::new(b), ty.clone()),
                    ty,
                ));
            }
            _ => {}
        }

        let common = self.arith_common(&ta, &tb, loc)?;
        if matches!(op, Mod | And | Or | Xor) && !common.is_integer() {
            return err!(loc, "operator needs integer operands");
        }
        let a = self.convert(a, &common, loc)?;
        let b = self.convert(b, &common, loc)?;
        let result = if cop(op).is_comparison() { int() } else { common };
        Ok((
            Expr::Ebinop(cop(op), Box::new(a), Box::new(b), result.clone()),
            result,
        ))
    }

    /// Short-circuit `&&` (`and == true`) and `||`.
    fn logical(
        &mut self,
        and: bool,
        a: &PExpr,
        b: &PExpr,
        loc: &Location,
    ) -> ParseResult<Elaborated> {
        let (pre_a, va) = self.rvalue(a)?;
        let (pre_b, vb) = self.rvalue(b)?;

        // Pure, non-trapping operands need no short circuit: `p && q`
        // is `(p != 0) & (q != 0)` bit for bit.
        if matches!(pre_a, Stmt::Sskip)
            && matches!(pre_b, Stmt::Sskip)
            && is_safe(&va)
            && is_safe(&vb)
        {
            let ba = self.not_zero(va, loc)?;
            let bb = self.not_zero(vb, loc)?;
            let op = if and { BinaryOp::And } else { BinaryOp::Or };
            return Ok((
                Stmt::Sskip,
                Expr::Ebinop(op, Box::new(ba), Box::new(bb), int()),
            ));
        }

        let t = self.new_temp(int());
        let set_b = {
            let bb = self.not_zero(vb, loc)?;
            Stmt::seq(pre_b, Stmt::Sset(t, bb))
        };
        let branch = if and {
            Stmt::Sifthenelse(
                va,
                Box::new(set_b),
                Box::new(Stmt::Sset(t, Expr::EconstInt(0, int()))),
            )
        } else {
            Stmt::Sifthenelse(
                va,
                Box::new(Stmt::Sset(t, Expr::EconstInt(1, int()))),
                Box::new(set_b),
            )
        };
        Ok((
            Stmt::seq(pre_a, branch),
            Expr::Etempvar(t, int()),
        ))
    }

    /// An assignment, plain or compound. Returns (effects, pure l-value,
    /// the assignment itself).
    fn assignment(
        &mut self,
        op: Option<PBinop>,
        lhs: &PExpr,
        rhs: &PExpr,
        loc: &Location,
    ) -> ParseResult<(Stmt, Expr, Stmt)> {
        let (pre_l, lv) = self.lvalue(lhs)?;
        let lty = lv.ty().clone();

        if lty.is_aggregate() {
            if op.is_some() {
                return err!(loc, "compound assignment on an aggregate");
            }
            let (pre_r, rv) = self.lvalue(rhs)?;
            if rv.ty() != &lty {
                return err!(loc, "aggregate assignment with mismatched types");
            }
            return Ok((
                Stmt::seq(pre_l, pre_r),
                lv.clone(),
                Stmt::Sassign(lv, rv),
            ));
        }

        let (pre_r, rv) = self.rvalue(rhs)?;
        let value = match op {
            None => self.convert(rv, &lty, loc)?,
            Some(op) => {
                let (combined, _) = self.binary(op, lv.clone(), rv, loc)?;
                self.convert(combined, &lty, loc)?
            }
        };
        Ok((
            Stmt::seq(pre_l, pre_r),
            lv.clone(),
            Stmt::Sassign(lv, value),
        ))
    }

    /// A call, in value position (`want_value`) or as a statement.
    fn call(&mut self, e: &PExpr, want_value: bool) -> ParseResult<(Stmt, Option<Expr>)> {
        let (callee, args, loc) = match e {
            PExpr::Call(callee, args, loc) => (callee, args, loc),
            _ => unreachable!(),
        };
        let (pre_f, f) = self.rvalue_novalue_check(callee)?;
        let ft = match f.ty() {
            CType::Function(ft) => (**ft).clone(),
            CType::Pointer(inner) => match &**inner {
                CType::Function(ft) => (**ft).clone(),
                other => return err!(loc, "call through `{}`", other),
            },
            other => return err!(loc, "`{}` is not callable", other),
        };

        if args.len() < ft.params.len()
            || (args.len() > ft.params.len() && !ft.variadic)
        {
            return err!(
                loc,
                "wrong number of arguments: expected {}, got {}",
                ft.params.len(),
                args.len()
            );
        }

        let mut pre = pre_f;
        let mut lowered = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let (pre_a, va) = self.rvalue(arg)?;
            pre = Stmt::seq(pre, pre_a);
            let va = match ft.params.get(i) {
                Some(pty) => self.convert(va, pty, loc)?,
                // Default argument promotions for variadic extras.
                None => match va.ty() {
                    CType::Float => self.convert(va, &CType::Double, loc)?,
                    CType::Int(IntSize::I8, _) | CType::Int(IntSize::I16, _) => {
                        self.convert(va, &int(), loc)?
                    }
                    _ => va,
                },
            };
            lowered.push(va);
        }

        if matches!(ft.ret, CType::Void) {
            let call = Stmt::Scall(None, f, lowered);
            if want_value {
                return err!(loc, "void call used as a value");
            }
            return Ok((Stmt::seq(pre, call), None));
        }
        let t = self.new_temp(ft.ret.clone());
        let call = Stmt::Scall(Some(t), f, lowered);
        Ok((
            Stmt::seq(pre, call),
            Some(Expr::Etempvar(t, ft.ret)),
        ))
    }

    /// Elaborate `e` only for its effects.
    fn effects_only(&mut self, e: &PExpr) -> ParseResult<Stmt> {
        match e {
            PExpr::Call(..) => {
                // Allow void calls here.
                let want_value = false;
                let (pre, _) = self.call(e, want_value)?;
                Ok(pre)
            }
            PExpr::Assign(op, lhs, rhs, loc) => {
                let (pre, _, assign) = self.assignment(*op, lhs, rhs, loc)?;
                Ok(Stmt::seq(pre, assign))
            }
            PExpr::PreIncDec(inc, inner, loc) => {
                let (pre, lv) = self.lvalue(inner)?;
                let assign = self.incdec_assign(&lv, *inc, loc)?;
                Ok(Stmt::seq(pre, assign))
            }
            PExpr::PostIncDec(inc, inner, loc) => {
                let (pre, lv) = self.lvalue(inner)?;
                let assign = self.incdec_assign(&lv, *inc, loc)?;
                Ok(Stmt::seq(pre, assign))
            }
            PExpr::Comma(a, b, _) => {
                let sa = self.effects_only(a)?;
                let sb = self.effects_only(b)?;
                Ok(Stmt::seq(sa, sb))
            }
            _ => {
                let (pre, _) = self.rvalue_novalue_check(e)?;
                Ok(pre)
            }
        }
    }

    // -----------------------------------------------------------------
    // Statements.

    fn stmt(&mut self, s: &PStmt, ctl: Ctl) -> ParseResult<Stmt> {
        match s {
            PStmt::Expr(None) => Ok(Stmt::Sskip),
            PStmt::Expr(Some(e)) => self.effects_only(e),
            PStmt::Decl(decls) => {
                let mut out = Stmt::Sskip;
                for d in decls {
                    out = Stmt::seq(out, self.local_decl(d)?);
                }
                Ok(out)
            }
            PStmt::Block(body) => {
                self.scopes.push(HashMap::new());
                let mut out = Stmt::Sskip;
                for s in body {
                    let lowered = self.stmt(s, ctl);
                    match lowered {
                        Ok(l) => out = Stmt::seq(out, l),
                        Err(e) => {
                            self.scopes.pop();
                            return Err(e);
                        }
                    }
                }
                self.scopes.pop();
                Ok(out)
            }
            PStmt::If(c, then, els) => {
                let (pre, vc) = self.rvalue(c)?;
                let then = self.stmt(then, ctl)?;
                let els = match els {
                    Some(e) => self.stmt(e, ctl)?,
                    None => Stmt::Sskip,
                };
                Ok(Stmt::seq(
                    pre,
                    Stmt::Sifthenelse(vc, Box::new(then), Box::new(els)),
                ))
            }
            PStmt::While(c, body) => {
                let (pre, vc) = self.rvalue(c)?;
                let body = self.stmt(
                    body,
                    Ctl {
                        in_loop: true,
                        in_switch: false,
                    },
                )?;
                let test = Stmt::seq(
                    pre,
                    Stmt::Sifthenelse(vc, Box::new(Stmt::Sskip), Box::new(Stmt::Sbreak)),
                );
                Ok(Stmt::Sloop(
                    Box::new(Stmt::seq(test, body)),
                    Box::new(Stmt::Sskip),
                ))
            }
            PStmt::DoWhile(body, c) => {
                let body = self.stmt(
                    body,
                    Ctl {
                        in_loop: true,
                        in_switch: false,
                    },
                )?;
                let (pre, vc) = self.rvalue(c)?;
                let test = Stmt::seq(
                    pre,
                    Stmt::Sifthenelse(vc, Box::new(Stmt::Sskip), Box::new(Stmt::Sbreak)),
                );
                Ok(Stmt::Sloop(Box::new(body), Box::new(test)))
            }
            PStmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.scopes.push(HashMap::new());
                let result = (|| {
                    let init = match init {
                        Some(s) => self.stmt(s, Ctl::default())?,
                        None => Stmt::Sskip,
                    };
                    let test = match cond {
                        Some(c) => {
                            let (pre, vc) = self.rvalue(c)?;
                            Stmt::seq(
                                pre,
                                Stmt::Sifthenelse(
                                    vc,
                                    Box::new(Stmt::Sskip),
                                    Box::new(Stmt::Sbreak),
                                ),
                            )
                        }
                        None => Stmt::Sskip,
                    };
                    let body = self.stmt(
                        body,
                        Ctl {
                            in_loop: true,
                            in_switch: false,
                        },
                    )?;
                    let step = match step {
                        Some(e) => self.effects_only(e)?,
                        None => Stmt::Sskip,
                    };
                    Ok(Stmt::seq(
                        init,
                        Stmt::Sloop(Box::new(Stmt::seq(test, body)), Box::new(step)),
                    ))
                })();
                self.scopes.pop();
                result
            }
            PStmt::Return(value, loc) => {
                let ret = self.ret.clone();
                match (value, matches!(ret, CType::Void)) {
                    (None, true) => Ok(Stmt::Sreturn(None)),
                    (None, false) => err!(loc, "return without a value"),
                    (Some(_), true) => err!(loc, "return with a value in a void function"),
                    (Some(e), false) => {
                        let (pre, v) = self.rvalue(e)?;
                        let v = self.convert(v, &ret, loc)?;
                        Ok(Stmt::seq(pre, Stmt::Sreturn(Some(v))))
                    }
                }
            }
            PStmt::Break(loc) => {
                if !ctl.in_loop && !ctl.in_switch {
                    return err!(loc, "break outside loop or switch");
                }
                Ok(Stmt::Sbreak)
            }
            PStmt::Continue(loc) => {
                if !ctl.in_loop {
                    return err!(loc, "continue outside loop");
                }
                Ok(Stmt::Scontinue)
            }
            PStmt::Switch(e, arms, loc) => self.switch(e, arms, ctl, loc),
            PStmt::Label(l, inner) => {
                if !self.labels.insert(l.clone()) {
                    return err!(Location::default(), "duplicate label `{}`", l);
                }
                let inner = self.stmt(inner, ctl)?;
                Ok(Stmt::Slabel(symbol(l), Box::new(inner)))
            }
            PStmt::Goto(l, loc) => {
                self.gotos.push((l.clone(), loc.clone()));
                Ok(Stmt::Sgoto(symbol(l)))
            }
        }
    }

    fn local_decl(&mut self, d: &PDecl) -> ParseResult<Stmt> {
        let ty = self.elab.ctype(&d.ty, &d.loc)?;
        if matches!(ty, CType::Void | CType::Function(_)) {
            return err!(d.loc, "cannot declare a local of type `{}`", ty);
        }
        let sym = self.declare(&d.name, ty.clone());
        self.func.vars.push((sym, ty.clone()));
        match &d.init {
            None => Ok(Stmt::Sskip),
            Some(init) => self.local_init(&Expr::Evar(sym, ty), init, &d.loc),
        }
    }

    /// Lower a local initialiser into assignments.
    fn local_init(&mut self, lv: &Expr, init: &PInit, loc: &Location) -> ParseResult<Stmt> {
        let ty = lv.ty().clone();
        match (&ty, init) {
            (CType::Array(elem, n), PInit::List(items)) => {
                if items.len() as i64 > *n {
                    return err!(loc, "too many initialisers");
                }
                let mut out = Stmt::Sskip;
                for (i, item) in items.iter().enumerate() {
                    let idx = Expr::Ederef(
                        Box::new(Expr::Ebinop(
                            BinaryOp::Add,
                            Box::new(self.decay(lv.clone())),
                            Box::new(Expr::EconstInt(i as i32, int())),
                            CType::Pointer(elem.clone()),
                        )),
                        (**elem).clone(),
                    );
                    out = Stmt::seq(out, self.local_init(&idx, item, loc)?);
                }
                Ok(out)
            }
            (CType::Array(elem, n), PInit::Scalar(PExpr::StrLit(s, _))) => {
                if !matches!(**elem, CType::Int(IntSize::I8, _)) {
                    return err!(loc, "string initialiser for a non-char array");
                }
                if s.len() as i64 + 1 > *n {
                    return err!(loc, "string initialiser does not fit");
                }
                let mut out = Stmt::Sskip;
                for i in 0..(*n as usize) {
                    let byte = s.get(i).copied().unwrap_or(0) as i32;
                    let idx = Expr::Ederef(
                        Box::new(Expr::Ebinop(
                            BinaryOp::Add,
                            Box::new(self.decay(lv.clone())),
                            Box::new(Expr::EconstInt(i as i32, int())),
                            CType::Pointer(elem.clone()),
                        )),
                        (**elem).clone(),
                    );
                    out = Stmt::seq(
                        out,
                        Stmt::Sassign(idx, Expr::EconstInt(byte, int())),
                    );
                }
                Ok(out)
            }
            (CType::Struct(tag), PInit::List(items)) => {
                let fields: Vec<(Symbol, CType)> = self
                    .elab
                    .structs
                    .fields(*tag)
                    .iter()
                    .map(|(n, t)| (*n, t.clone()))
                    .collect();
                if items.len() > fields.len() {
                    return err!(loc, "too many initialisers");
                }
                let mut out = Stmt::Sskip;
                for (item, (fname, fty)) in items.iter().zip(fields.iter()) {
                    let fl = Expr::Efield(Box::new(lv.clone()), *fname, fty.clone());
                    out = Stmt::seq(out, self.local_init(&fl, item, loc)?);
                }
                Ok(out)
            }
            (_, PInit::Scalar(e)) => {
                let (pre, v) = self.rvalue(e)?;
                let v = self.convert(v, &ty, loc)?;
                Ok(Stmt::seq(pre, Stmt::Sassign(lv.clone(), v)))
            }
            (_, PInit::List(_)) => err!(loc, "brace initialiser for a scalar"),
        }
    }

    fn switch(
        &mut self,
        e: &PExpr,
        arms: &[PSwitchArm],
        ctl: Ctl,
        loc: &Location,
    ) -> ParseResult<Stmt> {
        let (pre, v) = self.rvalue(e)?;
        let v = self.promote(v);
        let (is_long, scrutinee_signed) = match v.ty() {
            CType::Int(_, s) => (false, *s == Signedness::Signed),
            CType::Long(s) => (true, *s == Signedness::Signed),
            other => return err!(loc, "switch on `{}`", other),
        };

        let body_ctl = Ctl {
            in_loop: ctl.in_loop,
            in_switch: true,
        };
        let mut cases = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();
        let mut have_default = false;
        for arm in arms {
            let mut body = Stmt::Sskip;
            for s in &arm.body {
                body = Stmt::seq(body, self.stmt(s, body_ctl)?);
            }
            // Several labels on one arm: the earlier ones are empty cases
            // falling through to the last, which holds the body.
            for (k, (value, lloc)) in arm.labels.iter().enumerate() {
                let last = k + 1 == arm.labels.len();
                let canonical = match value {
                    Some(ve) => {
                        let raw = const_int(ve)?;
                        // Canonicalise to the scrutinee's bit pattern.
                        let bits = if is_long {
                            raw
                        } else if scrutinee_signed {
                            raw as i32 as i64
                        } else {
                            raw as u32 as i64
                        };
                        if !seen.insert(bits) {
                            return err!(lloc, "duplicate case value {}", bits);
                        }
                        Some(bits)
                    }
                    None => {
                        if have_default {
                            return err!(lloc, "multiple default labels");
                        }
                        have_default = true;
                        None
                    }
                };
                cases.push(SwitchCase {
                    value: canonical,
                    body: if last {
                        std::mem::replace(&mut body, Stmt::Sskip)
                    } else {
                        Stmt::Sskip
                    },
                });
            }
        }

        Ok(Stmt::seq(pre, Stmt::Sswitch(v, cases)))
    }
}

/// Is this pure expression also non-trapping, so both operands of a
/// logical operator may evaluate unconditionally?
fn is_safe(e: &Expr) -> bool {
    match e {
        Expr::EconstInt(..)
        | Expr::EconstLong(..)
        | Expr::EconstFloat(..)
        | Expr::EconstSingle(..)
        | Expr::Etempvar(..)
        | Expr::Evar(..)
        | Expr::Esizeof(..)
        | Expr::Ealignof(..) => true,
        Expr::Eunop(_, a, _) => is_safe(a),
        Expr::Ecast(a, _) => is_safe(a),
        Expr::Ebinop(op, a, b, _) => {
            !matches!(op, BinaryOp::Div | BinaryOp::Mod) && is_safe(a) && is_safe(b)
        }
        // Loads (through pointers or fields) and address-taking chains
        // may fault or be costly; keep the short circuit.
        Expr::Ederef(..)
        | Expr::Efield(..)
        | Expr::Eaddrof(..)
        | Expr::EconstStr(..) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn elab_src(src: &str) -> Program {
        elaborate(parse(tokenize(src, "t.c").unwrap()).unwrap()).unwrap()
    }

    fn elab_err(src: &str) -> String {
        elaborate(parse(tokenize(src, "t.c").unwrap()).unwrap())
            .unwrap_err()
            .message
    }

    fn body_of(prog: &Program, name: &str) -> Stmt {
        prog.functions
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, f)| f.body.clone())
            .unwrap()
    }

    #[test]
    fn arithmetic_conversion_inserts_casts() {
        let prog = elab_src("double f(int i, double d) { return i + d; }");
        let body = body_of(&prog, "f");
        // i is cast to double before the addition.
        fn find_cast(s: &Stmt) -> bool {
            match s {
                Stmt::Sreturn(Some(Expr::Ebinop(BinaryOp::Add, a, _, ty))) => {
                    matches!(**a, Expr::Ecast(_, CType::Double)) && *ty == CType::Double
                }
                Stmt::Ssequence(a, b) => find_cast(a) || find_cast(b),
                _ => false,
            }
        }
        assert!(find_cast(&body), "no cast found in {:?}", body);
    }

    #[test]
    fn calls_move_out_of_expressions() {
        let prog = elab_src(
            "int g(void); int f(void) { return g() + 1; }",
        );
        let body = body_of(&prog, "f");
        fn has_call_stmt(s: &Stmt) -> bool {
            match s {
                Stmt::Scall(Some(_), _, _) => true,
                Stmt::Ssequence(a, b) => has_call_stmt(a) || has_call_stmt(b),
                _ => false,
            }
        }
        assert!(has_call_stmt(&body));
        // g is an external.
        assert_eq!(prog.externals.len(), 1);
    }

    #[test]
    fn pure_logical_and_becomes_bitwise() {
        let prog = elab_src("int f(int a, int b) { return a < 1 && b > 2; }");
        let body = body_of(&prog, "f");
        fn has_bitand(s: &Stmt) -> bool {
            match s {
                Stmt::Sreturn(Some(Expr::Ebinop(BinaryOp::And, ..))) => true,
                Stmt::Ssequence(a, b) => has_bitand(a) || has_bitand(b),
                _ => false,
            }
        }
        assert!(has_bitand(&body), "expected fused logical and: {:?}", body);
    }

    #[test]
    fn effectful_logical_and_short_circuits() {
        let prog = elab_src("int g(void); int f(int a) { return a && g(); }");
        let body = body_of(&prog, "f");
        fn has_if(s: &Stmt) -> bool {
            match s {
                Stmt::Sifthenelse(..) => true,
                Stmt::Ssequence(a, b) => has_if(a) || has_if(b),
                _ => false,
            }
        }
        assert!(has_if(&body), "expected a branch: {:?}", body);
    }

    #[test]
    fn main_gets_implicit_return() {
        let prog = elab_src("int main() { }");
        let body = body_of(&prog, "main");
        assert!(matches!(
            body,
            Stmt::Sreturn(Some(Expr::EconstInt(0, _)))
        ));
    }

    #[test]
    fn array_initialiser_becomes_assignments() {
        let prog = elab_src("int f(void) { int a[3] = {10, 20, 30}; return a[0]; }");
        let (_, f) = &prog.functions[0];
        assert_eq!(f.vars.len(), 1);
        fn count_assigns(s: &Stmt) -> usize {
            match s {
                Stmt::Sassign(..) => 1,
                Stmt::Ssequence(a, b) => count_assigns(a) + count_assigns(b),
                _ => 0,
            }
        }
        assert_eq!(count_assigns(&f.body), 3);
    }

    #[test]
    fn shadowing_renames() {
        let prog = elab_src("int f(void) { int x = 1; { int x = 2; } return x; }");
        let (_, f) = &prog.functions[0];
        assert_eq!(f.vars.len(), 2);
        assert_ne!(f.vars[0].0, f.vars[1].0);
    }

    #[test]
    fn switch_case_values_canonicalise() {
        let prog = elab_src(
            "unsigned int x; int f(void) { switch (x) { case 1: return 1; default: return 0; } }",
        );
        let body = body_of(&prog, "f");
        fn find_switch(s: &Stmt) -> Option<Vec<Option<i64>>> {
            match s {
                Stmt::Sswitch(_, cases) => {
                    Some(cases.iter().map(|c| c.value).collect())
                }
                Stmt::Ssequence(a, b) => find_switch(a).or_else(|| find_switch(b)),
                _ => None,
            }
        }
        let values = find_switch(&body).unwrap();
        assert_eq!(values, vec![Some(1), None]);
    }

    #[test]
    fn errors_are_located() {
        let msg = elab_err("int f(void) { return y; }");
        assert!(msg.contains("undeclared identifier"), "{}", msg);
        let msg = elab_err("int f(void) { break; }");
        assert!(msg.contains("break outside"), "{}", msg);
        let msg = elab_err("int f(int x) { switch (x) { case 1: case 1: return 0; } }");
        assert!(msg.contains("duplicate case"), "{}", msg);
    }

    #[test]
    fn globals_get_byte_images() {
        let prog = elab_src("int x = 5; const int t[3] = {1, 2, 3};");
        assert_eq!(prog.globals.len(), 2);
        let (_, x) = &prog.globals[0];
        assert_eq!(x.init.as_ref().unwrap(), &vec![5, 0, 0, 0]);
        let (_, t) = &prog.globals[1];
        assert!(t.readonly);
        assert_eq!(t.init.as_ref().unwrap().len(), 12);
        assert_eq!(&t.init.as_ref().unwrap()[4..8], &[2, 0, 0, 0]);
    }
}
