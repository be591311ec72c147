//! Lowering from Clight to Csharpminor.
//!
//! C types disappear here. Every operator is resolved against the C types
//! of its operands into a width- and signedness-explicit Csharpminor
//! operator; l-values become address computations feeding chunked loads
//! and stores; casts become conversion operators chosen by the
//! (from, to) pair; pointer arithmetic is scaled by the pointee size;
//! `break`/`continue` become `Sexit` with de Bruijn depths; string
//! literals are hoisted into read-only globals; aggregate assignment
//! becomes a `memcpy` builtin.
//!
//! The front-end has already inserted the usual-arithmetic-conversion
//! casts, so both operands of an arithmetic operator always have the same
//! arithmetic type here. Pointer arithmetic is the one place where mixed
//! operand types remain.

use crate::ir::clight::{self, CType, IntSize, Signedness, StructTable};
use crate::ir::csharpminor::{Expr, Function, Program, Stmt, SwitchCase, Var};
use crate::ir::ops::{Binop, Const, Unop};
use crate::ir::types::{Builtin, Chunk, Comparison, Signature};
use crate::ir::DataItem;
use crate::symbols::{string_literal_label, Symbol};
use crate::{CodegenError, CodegenResult};
use std::collections::{BTreeMap, BTreeSet};

/// Run the pass over a whole program.
pub fn run(prog: clight::Program) -> CodegenResult<Program> {
    let mut strings = StringPool::default();
    let mut out = Program::default();

    for (name, g) in &prog.globals {
        out.globals.push((
            *name,
            DataItem {
                size: g.ty.sizeof(&prog.structs),
                align: g.ty.alignof(&prog.structs).min(8),
                init: g.init.clone(),
                readonly: g.readonly,
            },
        ));
    }

    for (name, ft) in &prog.externals {
        let sig = ft.signature().ok_or_else(|| {
            CodegenError::Unsupported(format!("aggregate argument or result in `{}`", name))
        })?;
        out.externals.push((*name, sig));
    }

    for (name, func) in &prog.functions {
        log::debug!("cshmgen: {}", name);
        out.functions
            .push((*name, transl_function(name, func, &prog, &mut strings)?));
    }

    // Hoisted string literals, in first-use order.
    for (label, bytes) in strings.in_order {
        out.globals
            .push((label, DataItem::with_bytes(bytes, 1, true)));
    }

    Ok(out)
}

/// Interning pool for hoisted string literals.
#[derive(Default)]
struct StringPool {
    by_content: BTreeMap<Vec<u8>, Symbol>,
    in_order: Vec<(Symbol, Vec<u8>)>,
}

impl StringPool {
    /// The label of the literal with `bytes` content (NUL excluded),
    /// minting one on first use.
    fn label(&mut self, bytes: &[u8]) -> Symbol {
        let mut data = bytes.to_vec();
        data.push(0);
        if let Some(&label) = self.by_content.get(&data) {
            return label;
        }
        let label = string_literal_label(self.by_content.len() as u32 + 1);
        self.by_content.insert(data.clone(), label);
        self.in_order.push((label, data));
        label
    }
}

struct Ctx<'a> {
    structs: &'a StructTable,
    /// Names of this function's stack-resident locals; any other name is a
    /// global.
    locals: BTreeSet<Symbol>,
    strings: &'a mut StringPool,
}

fn transl_function(
    name: &Symbol,
    func: &clight::Function,
    prog: &clight::Program,
    strings: &mut StringPool,
) -> CodegenResult<Function> {
    let sig = func.signature().ok_or_else(|| {
        CodegenError::Unsupported(format!("aggregate parameter or result in `{}`", name))
    })?;
    assert_eq!(
        func.param_temps.len(),
        func.params.len(),
        "cshmgen: simpl_locals has not run on `{}`",
        name
    );

    let vars: Vec<Var> = func
        .vars
        .iter()
        .map(|(vname, ty)| Var {
            name: *vname,
            size: ty.sizeof(&prog.structs),
            align: ty.alignof(&prog.structs),
        })
        .collect();

    let temps = func
        .temps
        .iter()
        .map(|(t, ty)| {
            (*t, ty.machine_type().unwrap_or_else(|| {
                panic!("cshmgen: non-scalar temporary {} in `{}`", t, name)
            }))
        })
        .collect();

    let mut ctx = Ctx {
        structs: &prog.structs,
        locals: vars.iter().map(|v| v.name).collect(),
        strings,
    };
    let body = transl_stmt(&mut ctx, &func.body, None, None);

    Ok(Function {
        sig,
        params: func.param_temps.clone(),
        vars,
        temps,
        body,
    })
}

/// The address of l-value `e`.
fn transl_lvalue(ctx: &mut Ctx, e: &clight::Expr) -> Expr {
    match e {
        clight::Expr::Evar(x, _) => {
            if ctx.locals.contains(x) {
                Expr::Evar(*x)
            } else {
                Expr::Eaddrof(*x)
            }
        }
        clight::Expr::Ederef(inner, _) => transl_expr(ctx, inner),
        clight::Expr::Efield(base, field, _) => {
            let tag = match base.ty() {
                CType::Struct(tag) => *tag,
                other => panic!("cshmgen: field access on non-struct {}", other),
            };
            let (ofs, _) = ctx
                .structs
                .field_offset(tag, *field)
                .unwrap_or_else(|| panic!("cshmgen: no field {} in struct {}", field, tag));
            let base_addr = transl_lvalue(ctx, base);
            if ofs == 0 {
                base_addr
            } else {
                Expr::Ebinop(
                    Binop::Oaddl,
                    Box::new(base_addr),
                    Box::new(Expr::Econst(Const::Olongconst(ofs))),
                )
            }
        }
        other => panic!("cshmgen: not an l-value: {:?}", other),
    }
}

/// The value of r-value `e`.
fn transl_expr(ctx: &mut Ctx, e: &clight::Expr) -> Expr {
    match e {
        clight::Expr::EconstInt(n, _) => Expr::Econst(Const::Ointconst(*n)),
        clight::Expr::EconstLong(n, _) => Expr::Econst(Const::Olongconst(*n)),
        clight::Expr::EconstFloat(x, _) => Expr::Econst(Const::Ofloatconst(*x)),
        clight::Expr::EconstSingle(x, _) => Expr::Econst(Const::Osingleconst(*x)),
        clight::Expr::EconstStr(bytes, _) => {
            let label = ctx.strings.label(bytes);
            Expr::Eaddrof(label)
        }
        clight::Expr::Etempvar(t, _) => Expr::Etempvar(*t),
        clight::Expr::Eaddrof(inner, _) => transl_lvalue(ctx, inner),
        clight::Expr::Esizeof(ty, _) => {
            Expr::Econst(Const::Ointconst(ty.sizeof(ctx.structs) as i32))
        }
        clight::Expr::Ealignof(ty, _) => {
            Expr::Econst(Const::Ointconst(ty.alignof(ctx.structs) as i32))
        }
        clight::Expr::Eunop(op, a, ty) => {
            let a_ty = a.ty().clone();
            let a = transl_expr(ctx, a);
            Expr::Eunop(transl_unop(*op, &a_ty, ty), Box::new(a))
        }
        clight::Expr::Ebinop(op, a, b, ty) => transl_binop(ctx, *op, a, b, ty),
        clight::Expr::Ecast(a, to) => {
            let from = a.ty().clone();
            let a = transl_expr(ctx, a);
            make_cast(&from, to, a)
        }
        lv @ (clight::Expr::Evar(..) | clight::Expr::Ederef(..) | clight::Expr::Efield(..)) => {
            let ty = lv.ty().clone();
            let addr = transl_lvalue(ctx, lv);
            match ty.access_chunk() {
                // Function designators and aggregates decay to their
                // address.
                None => addr,
                Some(_) if matches!(ty, CType::Function(_)) => addr,
                Some(chunk) => Expr::Eload(chunk, Box::new(addr)),
            }
        }
    }
}

/// Pick the unary operator for C-level `op` at type `ty`.
fn transl_unop(op: clight::UnaryOp, arg_ty: &CType, _result: &CType) -> Unop {
    match (op, arg_ty) {
        (clight::UnaryOp::Neg, CType::Int(..)) => Unop::Onegint,
        (clight::UnaryOp::Neg, CType::Long(_)) => Unop::Onegl,
        (clight::UnaryOp::Neg, CType::Double) => Unop::Onegf,
        (clight::UnaryOp::Neg, CType::Float) => Unop::Onegs,
        (clight::UnaryOp::Not, CType::Int(..)) => Unop::Onotint,
        (clight::UnaryOp::Not, CType::Long(_)) => Unop::Onotl,
        (op, ty) => panic!("cshmgen: {:?} applied at type {}", op, ty),
    }
}

/// The arithmetic class of a C type, for operator selection.
enum Class {
    IntSigned,
    IntUnsigned,
    LongSigned,
    LongUnsigned,
    Double,
    Single,
    Pointer,
}

fn classify(ty: &CType) -> Class {
    match ty {
        CType::Int(_, Signedness::Signed) => Class::IntSigned,
        CType::Int(_, Signedness::Unsigned) => Class::IntUnsigned,
        CType::Long(Signedness::Signed) => Class::LongSigned,
        CType::Long(Signedness::Unsigned) => Class::LongUnsigned,
        CType::Double => Class::Double,
        CType::Float => Class::Single,
        CType::Pointer(_) | CType::Array(..) | CType::Function(_) => Class::Pointer,
        other => panic!("cshmgen: no arithmetic class for {}", other),
    }
}

/// Scale an integer index expression to a byte offset for pointee size
/// `size`, widening it to 64 bits first.
fn scale_index(idx: Expr, idx_ty: &CType, size: i64) -> Expr {
    let widened = match classify(idx_ty) {
        Class::IntSigned => Expr::Eunop(Unop::Olongofint, Box::new(idx)),
        Class::IntUnsigned => Expr::Eunop(Unop::Olongofintu, Box::new(idx)),
        Class::LongSigned | Class::LongUnsigned => idx,
        _ => panic!("cshmgen: non-integer pointer offset"),
    };
    if size == 1 {
        widened
    } else {
        Expr::Ebinop(
            Binop::Omull,
            Box::new(widened),
            Box::new(Expr::Econst(Const::Olongconst(size))),
        )
    }
}

fn transl_binop(
    ctx: &mut Ctx,
    op: clight::BinaryOp,
    a: &clight::Expr,
    b: &clight::Expr,
    result_ty: &CType,
) -> Expr {
    use clight::BinaryOp as B;

    let a_ty = a.ty().clone();
    let b_ty = b.ty().clone();
    let ea = transl_expr(ctx, a);
    let eb = transl_expr(ctx, b);

    // Pointer arithmetic first: it is the only mixed-type case.
    match (op, classify(&a_ty), classify(&b_ty)) {
        (B::Add, Class::Pointer, _) => {
            let size = pointee_size(&a_ty, ctx.structs);
            return Expr::Ebinop(
                Binop::Oaddl,
                Box::new(ea),
                Box::new(scale_index(eb, &b_ty, size)),
            );
        }
        (B::Add, _, Class::Pointer) => {
            let size = pointee_size(&b_ty, ctx.structs);
            return Expr::Ebinop(
                Binop::Oaddl,
                Box::new(eb),
                Box::new(scale_index(ea, &a_ty, size)),
            );
        }
        (B::Sub, Class::Pointer, Class::Pointer) => {
            let size = pointee_size(&a_ty, ctx.structs);
            let diff = Expr::Ebinop(Binop::Osubl, Box::new(ea), Box::new(eb));
            return if size == 1 {
                diff
            } else {
                Expr::Ebinop(
                    Binop::Odivl,
                    Box::new(diff),
                    Box::new(Expr::Econst(Const::Olongconst(size))),
                )
            };
        }
        (B::Sub, Class::Pointer, _) => {
            let size = pointee_size(&a_ty, ctx.structs);
            return Expr::Ebinop(
                Binop::Osubl,
                Box::new(ea),
                Box::new(scale_index(eb, &b_ty, size)),
            );
        }
        _ => {}
    }

    // Comparisons look at the operand type, not the (int) result type.
    if op.is_comparison() {
        let cmp = comparison_code(op);
        let family = match classify(&a_ty) {
            Class::IntSigned => Binop::Ocmp(cmp),
            Class::IntUnsigned => Binop::Ocmpu(cmp),
            Class::LongSigned => Binop::Ocmpl(cmp),
            Class::LongUnsigned | Class::Pointer => Binop::Ocmplu(cmp),
            Class::Double => Binop::Ocmpf(cmp),
            Class::Single => Binop::Ocmps(cmp),
        };
        return Expr::Ebinop(family, Box::new(ea), Box::new(eb));
    }

    // Same-type arithmetic; the result type names the common type.
    let binop = match (op, classify(result_ty)) {
        (B::Add, Class::IntSigned) | (B::Add, Class::IntUnsigned) => Binop::Oadd,
        (B::Add, Class::LongSigned) | (B::Add, Class::LongUnsigned) => Binop::Oaddl,
        (B::Add, Class::Double) => Binop::Oaddf,
        (B::Add, Class::Single) => Binop::Oadds,
        (B::Sub, Class::IntSigned) | (B::Sub, Class::IntUnsigned) => Binop::Osub,
        (B::Sub, Class::LongSigned) | (B::Sub, Class::LongUnsigned) => Binop::Osubl,
        (B::Sub, Class::Double) => Binop::Osubf,
        (B::Sub, Class::Single) => Binop::Osubs,
        (B::Mul, Class::IntSigned) | (B::Mul, Class::IntUnsigned) => Binop::Omul,
        (B::Mul, Class::LongSigned) | (B::Mul, Class::LongUnsigned) => Binop::Omull,
        (B::Mul, Class::Double) => Binop::Omulf,
        (B::Mul, Class::Single) => Binop::Omuls,
        (B::Div, Class::IntSigned) => Binop::Odiv,
        (B::Div, Class::IntUnsigned) => Binop::Odivu,
        (B::Div, Class::LongSigned) => Binop::Odivl,
        (B::Div, Class::LongUnsigned) => Binop::Odivlu,
        (B::Div, Class::Double) => Binop::Odivf,
        (B::Div, Class::Single) => Binop::Odivs,
        (B::Mod, Class::IntSigned) => Binop::Omod,
        (B::Mod, Class::IntUnsigned) => Binop::Omodu,
        (B::Mod, Class::LongSigned) => Binop::Omodl,
        (B::Mod, Class::LongUnsigned) => Binop::Omodlu,
        (B::And, Class::IntSigned) | (B::And, Class::IntUnsigned) => Binop::Oand,
        (B::And, Class::LongSigned) | (B::And, Class::LongUnsigned) => Binop::Oandl,
        (B::Or, Class::IntSigned) | (B::Or, Class::IntUnsigned) => Binop::Oor,
        (B::Or, Class::LongSigned) | (B::Or, Class::LongUnsigned) => Binop::Oorl,
        (B::Xor, Class::IntSigned) | (B::Xor, Class::IntUnsigned) => Binop::Oxor,
        (B::Xor, Class::LongSigned) | (B::Xor, Class::LongUnsigned) => Binop::Oxorl,
        (B::Shl, Class::IntSigned) | (B::Shl, Class::IntUnsigned) => Binop::Oshl,
        (B::Shl, Class::LongSigned) | (B::Shl, Class::LongUnsigned) => Binop::Oshll,
        (B::Shr, Class::IntSigned) => Binop::Oshr,
        (B::Shr, Class::IntUnsigned) => Binop::Oshru,
        (B::Shr, Class::LongSigned) => Binop::Oshrl,
        (B::Shr, Class::LongUnsigned) => Binop::Oshrlu,
        (op, _) => panic!("cshmgen: {:?} at type {}", op, result_ty),
    };
    Expr::Ebinop(binop, Box::new(ea), Box::new(eb))
}

fn comparison_code(op: clight::BinaryOp) -> Comparison {
    use clight::BinaryOp as B;
    match op {
        B::Eq => Comparison::Eq,
        B::Ne => Comparison::Ne,
        B::Lt => Comparison::Lt,
        B::Gt => Comparison::Gt,
        B::Le => Comparison::Le,
        B::Ge => Comparison::Ge,
        _ => unreachable!(),
    }
}

fn pointee_size(ty: &CType, structs: &StructTable) -> i64 {
    match ty {
        CType::Pointer(inner) => inner.sizeof(structs),
        CType::Array(inner, _) => inner.sizeof(structs),
        other => panic!("cshmgen: pointer arithmetic on {}", other),
    }
}

/// Realise the cast `(to)expr` where `expr` has type `from`.
///
/// Identity casts are elided; `TranslateCast(t, t)` never emits an
/// operator.
fn make_cast(from: &CType, to: &CType, expr: Expr) -> Expr {
    use Signedness::*;

    // Pointer-flavoured and identical representations: no conversion.
    let from_c = classify_cast(from);
    let to_c = classify_cast(to);
    if from_c == to_c {
        return narrow_if_needed(from, to, expr);
    }

    let converted = match (from_c, to_c) {
        // Same 32-bit representation, possibly different signedness: only
        // the narrowing below matters.
        (CastClass::Int(_), CastClass::Int(_)) => expr,
        // Casts to void keep the (discarded) value.
        (_, CastClass::Void) => expr,
        // Between the two integer widths.
        (CastClass::Int(sg), CastClass::Long) => match sg {
            Signed => un(Unop::Olongofint, expr),
            Unsigned => un(Unop::Olongofintu, expr),
        },
        (CastClass::Long, CastClass::Int(_)) => un(Unop::Ointoflong, expr),
        // Int to float.
        (CastClass::Int(Signed), CastClass::Double) => un(Unop::Ofloatofint, expr),
        (CastClass::Int(Unsigned), CastClass::Double) => un(Unop::Ofloatofintu, expr),
        (CastClass::Int(Signed), CastClass::Single) => un(Unop::Osingleofint, expr),
        (CastClass::Int(Unsigned), CastClass::Single) => un(Unop::Osingleofintu, expr),
        (CastClass::Long, CastClass::Double) => match from.signedness().unwrap_or(Signed) {
            Signed => un(Unop::Ofloatoflong, expr),
            Unsigned => un(Unop::Ofloatoflongu, expr),
        },
        (CastClass::Long, CastClass::Single) => match from.signedness().unwrap_or(Signed) {
            Signed => un(Unop::Osingleoflong, expr),
            Unsigned => un(Unop::Osingleoflongu, expr),
        },
        // Float to int.
        (CastClass::Double, CastClass::Int(Signed)) => un(Unop::Ointoffloat, expr),
        (CastClass::Double, CastClass::Int(Unsigned)) => un(Unop::Ointuoffloat, expr),
        (CastClass::Single, CastClass::Int(Signed)) => un(Unop::Ointofsingle, expr),
        (CastClass::Single, CastClass::Int(Unsigned)) => un(Unop::Ointuofsingle, expr),
        (CastClass::Double, CastClass::Long) => match to.signedness().unwrap_or(Signed) {
            Signed => un(Unop::Olongoffloat, expr),
            Unsigned => un(Unop::Olonguoffloat, expr),
        },
        (CastClass::Single, CastClass::Long) => match to.signedness().unwrap_or(Signed) {
            Signed => un(Unop::Olongofsingle, expr),
            Unsigned => un(Unop::Olonguofsingle, expr),
        },
        // Between float widths.
        (CastClass::Double, CastClass::Single) => un(Unop::Osingleoffloat, expr),
        (CastClass::Single, CastClass::Double) => un(Unop::Ofloatofsingle, expr),
        (from_c, to_c) => panic!("cshmgen: cast {:?} -> {:?}", from_c, to_c),
    };
    narrow_if_needed(from, to, converted)
}

fn un(op: Unop, e: Expr) -> Expr {
    Expr::Eunop(op, Box::new(e))
}

/// Representation classes for cast selection. `Long` covers pointers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CastClass {
    Int(Signedness),
    Long,
    Double,
    Single,
    Void,
}

fn classify_cast(ty: &CType) -> CastClass {
    match ty {
        CType::Int(_, sg) => CastClass::Int(*sg),
        CType::Long(_) | CType::Pointer(_) | CType::Array(..) | CType::Function(_) => {
            CastClass::Long
        }
        CType::Double => CastClass::Double,
        CType::Float => CastClass::Single,
        CType::Void | CType::Struct(_) => CastClass::Void,
    }
}

/// Narrow a 32-bit value to the target's sub-int width, if it has one.
fn narrow_if_needed(_from: &CType, to: &CType, expr: Expr) -> Expr {
    match to {
        CType::Int(IntSize::I8, Signedness::Signed) => un(Unop::Ocast8signed, expr),
        CType::Int(IntSize::I8, Signedness::Unsigned) => un(Unop::Ocast8unsigned, expr),
        CType::Int(IntSize::I16, Signedness::Signed) => un(Unop::Ocast16signed, expr),
        CType::Int(IntSize::I16, Signedness::Unsigned) => un(Unop::Ocast16unsigned, expr),
        _ => expr,
    }
}

/// The guard of a conditional: a 32-bit integer that is nonzero exactly
/// when the C value is "true".
fn transl_guard(ctx: &mut Ctx, e: &clight::Expr) -> Expr {
    let ty = e.ty().clone();
    let val = transl_expr(ctx, e);
    match classify(&ty) {
        Class::IntSigned | Class::IntUnsigned => val,
        Class::LongSigned | Class::LongUnsigned | Class::Pointer => Expr::Ebinop(
            Binop::Ocmplu(Comparison::Ne),
            Box::new(val),
            Box::new(Expr::Econst(Const::Olongconst(0))),
        ),
        Class::Double => Expr::Ebinop(
            Binop::Ocmpf(Comparison::Ne),
            Box::new(val),
            Box::new(Expr::Econst(Const::Ofloatconst(0.0))),
        ),
        Class::Single => Expr::Ebinop(
            Binop::Ocmps(Comparison::Ne),
            Box::new(val),
            Box::new(Expr::Econst(Const::Osingleconst(0.0))),
        ),
    }
}

/// Translate a statement. `brk`/`cnt` are the exit depths `break` and
/// `continue` must use, or `None` outside any loop or switch.
fn transl_stmt(ctx: &mut Ctx, s: &clight::Stmt, brk: Option<u32>, cnt: Option<u32>) -> Stmt {
    match s {
        clight::Stmt::Sskip => Stmt::Sskip,
        clight::Stmt::Sassign(lhs, rhs) => {
            let ty = lhs.ty().clone();
            if ty.is_aggregate() {
                let size = ty.sizeof(ctx.structs);
                let align = ty.alignof(ctx.structs);
                let dst = transl_lvalue(ctx, lhs);
                let src = transl_lvalue(ctx, rhs);
                Stmt::Sbuiltin(None, Builtin::Memcpy { size, align }, vec![dst, src])
            } else {
                let chunk = ty
                    .access_chunk()
                    .unwrap_or_else(|| panic!("cshmgen: assignment at type {}", ty));
                let addr = transl_lvalue(ctx, lhs);
                let val = transl_expr(ctx, rhs);
                Stmt::Sstore(chunk, addr, val)
            }
        }
        clight::Stmt::Sset(t, e) => Stmt::Sset(*t, transl_expr(ctx, e)),
        clight::Stmt::Scall(dest, callee, args) => {
            let ft = fun_type_of(callee.ty());
            let mut sig = ft
                .signature()
                .unwrap_or_else(|| panic!("cshmgen: call with aggregate signature"));
            // A variadic call's signature records the actual argument
            // types, so the calling convention sees every argument.
            for extra in args.iter().skip(ft.params.len()) {
                let ty = extra.ty().machine_type().unwrap_or_else(|| {
                    panic!("cshmgen: aggregate variadic argument")
                });
                sig.params.push(ty);
            }
            let callee = transl_expr(ctx, callee);
            let args = args.iter().map(|a| transl_expr(ctx, a)).collect();
            Stmt::Scall(*dest, sig, callee, args)
        }
        clight::Stmt::Sbuiltin(dest, b, args) => Stmt::Sbuiltin(
            *dest,
            *b,
            args.iter().map(|a| transl_expr(ctx, a)).collect(),
        ),
        clight::Stmt::Ssequence(a, b) => Stmt::seq(
            transl_stmt(ctx, a, brk, cnt),
            transl_stmt(ctx, b, brk, cnt),
        ),
        clight::Stmt::Sifthenelse(c, a, b) => Stmt::Sifthenelse(
            transl_guard(ctx, c),
            Box::new(transl_stmt(ctx, a, brk, cnt)),
            Box::new(transl_stmt(ctx, b, brk, cnt)),
        ),
        clight::Stmt::Sloop(body, cont) => {
            // block {            <- break exits this
            //   loop {
            //     block {        <- continue exits this
            //       body
            //     }
            //     cont
            //   }
            // }
            let body = transl_stmt(ctx, body, Some(1), Some(0));
            let cont = transl_stmt(ctx, cont, Some(0), None);
            Stmt::Sblock(Box::new(Stmt::Sloop(Box::new(Stmt::seq(
                Stmt::Sblock(Box::new(body)),
                cont,
            )))))
        }
        clight::Stmt::Sbreak => {
            Stmt::Sexit(brk.expect("cshmgen: break outside loop or switch"))
        }
        clight::Stmt::Scontinue => {
            Stmt::Sexit(cnt.expect("cshmgen: continue outside loop"))
        }
        clight::Stmt::Sreturn(e) => Stmt::Sreturn(e.as_ref().map(|e| transl_expr(ctx, e))),
        clight::Stmt::Sswitch(e, cases) => {
            let is_long = match classify(e.ty()) {
                Class::LongSigned | Class::LongUnsigned => true,
                _ => false,
            };
            let scrutinee = transl_expr(ctx, e);
            // The selected arm runs inside one implicit block: break is
            // exit 0, and outer depths shift by one.
            let cases = cases
                .iter()
                .map(|case| SwitchCase {
                    value: case.value,
                    body: transl_stmt(ctx, &case.body, Some(0), cnt.map(|n| n + 1)),
                })
                .collect();
            Stmt::Sswitch(is_long, scrutinee, cases)
        }
        clight::Stmt::Slabel(l, inner) => {
            Stmt::Slabel(*l, Box::new(transl_stmt(ctx, inner, brk, cnt)))
        }
        clight::Stmt::Sgoto(l) => Stmt::Sgoto(*l),
    }
}

fn fun_type_of(ty: &CType) -> &clight::FunType {
    match ty {
        CType::Function(ft) => ft,
        CType::Pointer(inner) => fun_type_of(inner),
        other => panic!("cshmgen: call through non-function type {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::clight::{BinaryOp, Expr as CE};
    use crate::symbols::symbol;

    fn int() -> CType {
        CType::Int(IntSize::I32, Signedness::Signed)
    }

    fn uint() -> CType {
        CType::Int(IntSize::I32, Signedness::Unsigned)
    }

    fn ctx_with<'a>(strings: &'a mut StringPool, structs: &'a StructTable) -> Ctx<'a> {
        Ctx {
            structs,
            locals: BTreeSet::new(),
            strings,
        }
    }

    fn lower(e: &CE) -> Expr {
        let mut strings = StringPool::default();
        let structs = StructTable::new();
        let mut ctx = ctx_with(&mut strings, &structs);
        transl_expr(&mut ctx, e)
    }

    #[test]
    fn operator_selection_follows_types() {
        let add = CE::Ebinop(
            BinaryOp::Add,
            Box::new(CE::EconstInt(1, int())),
            Box::new(CE::EconstInt(2, int())),
            int(),
        );
        match lower(&add) {
            Expr::Ebinop(Binop::Oadd, ..) => {}
            other => panic!("expected Oadd, got {:?}", other),
        }

        let div = CE::Ebinop(
            BinaryOp::Div,
            Box::new(CE::EconstInt(1, uint())),
            Box::new(CE::EconstInt(2, uint())),
            uint(),
        );
        match lower(&div) {
            Expr::Ebinop(Binop::Odivu, ..) => {}
            other => panic!("expected Odivu, got {:?}", other),
        }

        let fadd = CE::Ebinop(
            BinaryOp::Add,
            Box::new(CE::EconstFloat(1.0, CType::Double)),
            Box::new(CE::EconstFloat(2.0, CType::Double)),
            CType::Double,
        );
        match lower(&fadd) {
            Expr::Ebinop(Binop::Oaddf, ..) => {}
            other => panic!("expected Oaddf, got {:?}", other),
        }
    }

    #[test]
    fn comparison_encodes_signedness_of_operands() {
        let cmp = CE::Ebinop(
            BinaryOp::Lt,
            Box::new(CE::EconstInt(1, uint())),
            Box::new(CE::EconstInt(2, uint())),
            int(),
        );
        match lower(&cmp) {
            Expr::Ebinop(Binop::Ocmpu(Comparison::Lt), ..) => {}
            other => panic!("expected Ocmpu(<), got {:?}", other),
        }
    }

    #[test]
    fn identity_cast_is_elided() {
        let e = CE::Ecast(Box::new(CE::EconstInt(7, int())), int());
        assert_eq!(lower(&e), Expr::Econst(Const::Ointconst(7)));
    }

    #[test]
    fn int_to_double_cast() {
        let e = CE::Ecast(Box::new(CE::EconstInt(7, int())), CType::Double);
        match lower(&e) {
            Expr::Eunop(Unop::Ofloatofint, _) => {}
            other => panic!("expected Ofloatofint, got {:?}", other),
        }
    }

    #[test]
    fn narrowing_cast_emits_cast8() {
        let to = CType::Int(IntSize::I8, Signedness::Signed);
        let e = CE::Ecast(Box::new(CE::EconstInt(300, int())), to);
        match lower(&e) {
            Expr::Eunop(Unop::Ocast8signed, _) => {}
            other => panic!("expected Ocast8signed, got {:?}", other),
        }
    }

    #[test]
    fn pointer_arithmetic_scales() {
        let pty = CType::Pointer(Box::new(int()));
        let p = symbol("p");
        // p is a global here; the interesting part is the scaling.
        let e = CE::Ebinop(
            BinaryOp::Add,
            Box::new(CE::Evar(p, pty.clone())),
            Box::new(CE::EconstInt(3, int())),
            pty,
        );
        match lower(&e) {
            Expr::Ebinop(Binop::Oaddl, _, rhs) => match *rhs {
                Expr::Ebinop(Binop::Omull, ref idx, ref size) => {
                    assert!(matches!(**idx, Expr::Eunop(Unop::Olongofint, _)));
                    assert_eq!(**size, Expr::Econst(Const::Olongconst(4)));
                }
                ref other => panic!("expected scaled index, got {:?}", other),
            },
            other => panic!("expected Oaddl, got {:?}", other),
        }
    }

    #[test]
    fn string_literals_get_stable_labels() {
        let mut strings = StringPool::default();
        let l1 = strings.label(b"hello");
        let l2 = strings.label(b"world");
        let l3 = strings.label(b"hello");
        assert_eq!(l1, l3);
        assert_ne!(l1, l2);
        assert_eq!(l1.to_string(), "__stringlit_1");
        assert_eq!(l2.to_string(), "__stringlit_2");
    }

    #[test]
    fn loop_lowering_uses_exits() {
        // while-style loop: break -> exit 1, continue -> exit 0.
        let mut strings = StringPool::default();
        let structs = StructTable::new();
        let mut ctx = ctx_with(&mut strings, &structs);
        let s = clight::Stmt::Sloop(
            Box::new(clight::Stmt::Ssequence(
                Box::new(clight::Stmt::Sbreak),
                Box::new(clight::Stmt::Scontinue),
            )),
            Box::new(clight::Stmt::Sskip),
        );
        let lowered = transl_stmt(&mut ctx, &s, None, None);
        match lowered {
            Stmt::Sblock(inner) => match *inner {
                Stmt::Sloop(loop_body) => match *loop_body {
                    Stmt::Sblock(body) => match *body {
                        Stmt::Sseq(ref first, ref second) => {
                            assert_eq!(**first, Stmt::Sexit(1));
                            assert_eq!(**second, Stmt::Sexit(0));
                        }
                        other => panic!("unexpected loop body: {:?}", other),
                    },
                    other => panic!("expected inner block: {:?}", other),
                },
                other => panic!("expected loop: {:?}", other),
            },
            other => panic!("expected outer block: {:?}", other),
        }
    }
}
