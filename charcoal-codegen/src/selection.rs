//! Instruction selection: Cminor to CminorSel.
//!
//! A local, syntactic pass. Smart constructors recognise machine-friendly
//! shapes while expressions are rebuilt bottom-up: immediate operands,
//! shifted second operands, multiply-add/subtract, fused float
//! multiply-add, shift-by-constant. Address expressions are matched
//! against the AArch64 addressing modes in priority order, and conditions
//! are selected into flat machine conditions combined by the short-circuit
//! forms of [`CondExpr`].
//!
//! Integer remainder has no AArch64 instruction; it is selected into
//! `div` + `msub` sharing the operands through `Elet` bindings.

use crate::ir::cminor as cm;
use crate::ir::cminorsel::{CondExpr, Expr, Function, Program, Stmt};
use crate::ir::op::{Addressing, Condition, Extension, Operation, ShiftOp};
use crate::ir::ops::{Binop, Const, Unop};
use crate::ir::types::Comparison;

/// Run the pass over a whole program.
pub fn run(prog: cm::Program) -> Program {
    Program {
        globals: prog.globals,
        externals: prog.externals,
        functions: prog
            .functions
            .into_iter()
            .map(|(name, f)| {
                log::debug!("selection: {}", name);
                (
                    name,
                    Function {
                        sig: f.sig,
                        params: f.params,
                        stackspace: f.stackspace,
                        temps: f.temps,
                        body: sel_stmt(f.body),
                    },
                )
            })
            .collect(),
    }
}

fn op0(op: Operation) -> Expr {
    Expr::Eop(op, vec![])
}

fn op1(op: Operation, a: Expr) -> Expr {
    Expr::Eop(op, vec![a])
}

fn op2(op: Operation, a: Expr, b: Expr) -> Expr {
    Expr::Eop(op, vec![a, b])
}

fn op3(op: Operation, a: Expr, b: Expr, c: Expr) -> Expr {
    Expr::Eop(op, vec![a, b, c])
}

/// A selected expression that is a 32-bit integer constant.
fn int_const(e: &Expr) -> Option<i32> {
    match e {
        Expr::Eop(Operation::Ointconst(n), _) => Some(*n),
        _ => None,
    }
}

/// A selected expression that is a 64-bit integer constant.
fn long_const(e: &Expr) -> Option<i64> {
    match e {
        Expr::Eop(Operation::Olongconst(n), _) => Some(*n),
        _ => None,
    }
}

/// Destructure `x << s` (by immediate) and similar shifted operands.
fn shifted32(e: &Expr) -> Option<(ShiftOp, u8, &Expr)> {
    match e {
        Expr::Eop(Operation::Oshiftimm(s, n), args) => Some((*s, *n, &args[0])),
        _ => None,
    }
}

fn shifted64(e: &Expr) -> Option<(ShiftOp, u8, &Expr)> {
    match e {
        Expr::Eop(Operation::Oshiftlimm(s, n), args) => Some((*s, *n, &args[0])),
        _ => None,
    }
}

/// Destructure a two-operand multiply.
fn mul32(e: &Expr) -> Option<(&Expr, &Expr)> {
    match e {
        Expr::Eop(Operation::Omul, args) => Some((&args[0], &args[1])),
        _ => None,
    }
}

fn mul64(e: &Expr) -> Option<(&Expr, &Expr)> {
    match e {
        Expr::Eop(Operation::Omull, args) => Some((&args[0], &args[1])),
        _ => None,
    }
}

/// Shift `Eletvar` indices at or above `depth` up by one, for insertion
/// under a new `Elet`.
fn lift(e: Expr, depth: u32) -> Expr {
    match e {
        Expr::Eletvar(n) => {
            if n >= depth {
                Expr::Eletvar(n + 1)
            } else {
                Expr::Eletvar(n)
            }
        }
        Expr::Elet(a, b) => Expr::Elet(
            Box::new(lift(*a, depth)),
            Box::new(lift(*b, depth + 1)),
        ),
        Expr::Eop(op, args) => {
            Expr::Eop(op, args.into_iter().map(|a| lift(a, depth)).collect())
        }
        Expr::Eload(chunk, mode, args) => Expr::Eload(
            chunk,
            mode,
            args.into_iter().map(|a| lift(a, depth)).collect(),
        ),
        Expr::Econdition(c, a, b) => Expr::Econdition(
            Box::new(lift_cond(*c, depth)),
            Box::new(lift(*a, depth)),
            Box::new(lift(*b, depth)),
        ),
        Expr::Evar(_) => e,
    }
}

fn lift_cond(c: CondExpr, depth: u32) -> CondExpr {
    match c {
        CondExpr::CondTrue | CondExpr::CondFalse => c,
        CondExpr::CondCmp(cond, args) => CondExpr::CondCmp(
            cond,
            args.into_iter().map(|a| lift(a, depth)).collect(),
        ),
        CondExpr::CondNot(inner) => CondExpr::CondNot(Box::new(lift_cond(*inner, depth))),
        CondExpr::CondAnd(a, b) => CondExpr::CondAnd(
            Box::new(lift_cond(*a, depth)),
            Box::new(lift_cond(*b, depth)),
        ),
        CondExpr::CondOr(a, b) => CondExpr::CondOr(
            Box::new(lift_cond(*a, depth)),
            Box::new(lift_cond(*b, depth)),
        ),
    }
}

// ---------------------------------------------------------------------------
// Smart constructors, 32-bit integers.

fn add32(a: Expr, b: Expr) -> Expr {
    if let (Some(x), Some(y)) = (int_const(&a), int_const(&b)) {
        return op0(Operation::Ointconst(x.wrapping_add(y)));
    }
    if let Some(n) = int_const(&b) {
        return add32imm(a, n);
    }
    if let Some(n) = int_const(&a) {
        return add32imm(b, n);
    }
    if let Some((s, n, _)) = shifted32(&b) {
        let y = shift_arg(b.clone());
        return op2(Operation::Oaddshift(s, n), a, y);
    }
    if let Some((s, n, _)) = shifted32(&a) {
        let y = shift_arg(a.clone());
        return op2(Operation::Oaddshift(s, n), b, y);
    }
    if mul32(&b).is_some() {
        let (y, z) = take_mul(b);
        return op3(Operation::Omadd, a, y, z);
    }
    if mul32(&a).is_some() {
        let (y, z) = take_mul(a);
        return op3(Operation::Omadd, b, y, z);
    }
    op2(Operation::Oadd, a, b)
}

fn add32imm(a: Expr, n: i32) -> Expr {
    if n == 0 {
        return a;
    }
    match a {
        Expr::Eop(Operation::Oaddimm(m), args) => op1(
            Operation::Oaddimm(m.wrapping_add(n)),
            args.into_iter().next().unwrap(),
        ),
        a => op1(Operation::Oaddimm(n), a),
    }
}

/// Pull the shifted value out of an `Oshiftimm` node.
fn shift_arg(e: Expr) -> Expr {
    match e {
        Expr::Eop(Operation::Oshiftimm(..), args)
        | Expr::Eop(Operation::Oshiftlimm(..), args) => args.into_iter().next().unwrap(),
        _ => unreachable!("shift_arg on non-shift"),
    }
}

/// Pull the factors out of a multiply node.
fn take_mul(e: Expr) -> (Expr, Expr) {
    match e {
        Expr::Eop(Operation::Omul, args) | Expr::Eop(Operation::Omull, args) => {
            let mut it = args.into_iter();
            let y = it.next().unwrap();
            let z = it.next().unwrap();
            (y, z)
        }
        _ => unreachable!("take_mul on non-multiply"),
    }
}

fn sub32(a: Expr, b: Expr) -> Expr {
    if let (Some(x), Some(y)) = (int_const(&a), int_const(&b)) {
        return op0(Operation::Ointconst(x.wrapping_sub(y)));
    }
    if let Some(n) = int_const(&b) {
        return add32imm(a, n.wrapping_neg());
    }
    if let Some((s, n, _)) = shifted32(&b) {
        let y = shift_arg(b.clone());
        return op2(Operation::Osubshift(s, n), a, y);
    }
    if mul32(&b).is_some() {
        let (y, z) = take_mul(b);
        return op3(Operation::Omsub, a, y, z);
    }
    op2(Operation::Osub, a, b)
}

fn mul32c(a: Expr, b: Expr) -> Expr {
    if let (Some(x), Some(y)) = (int_const(&a), int_const(&b)) {
        return op0(Operation::Ointconst(x.wrapping_mul(y)));
    }
    if let Some(n) = int_const(&b) {
        if n > 0 && (n as u32).is_power_of_two() {
            return op1(
                Operation::Oshiftimm(ShiftOp::Lsl, (n as u32).trailing_zeros() as u8),
                a,
            );
        }
    }
    if let Some(n) = int_const(&a) {
        if n > 0 && (n as u32).is_power_of_two() {
            return op1(
                Operation::Oshiftimm(ShiftOp::Lsl, (n as u32).trailing_zeros() as u8),
                b,
            );
        }
    }
    op2(Operation::Omul, a, b)
}

/// `a % b` via `div` and `msub`, sharing operands with `Elet`.
fn mod_via_msub(div: Operation, msub: Operation, a: Expr, b: Expr) -> Expr {
    let b = lift(b, 0);
    Expr::Elet(
        Box::new(a),
        Box::new(Expr::Elet(
            Box::new(b),
            Box::new(op3(
                msub,
                Expr::Eletvar(1),
                op2(div, Expr::Eletvar(1), Expr::Eletvar(0)),
                Expr::Eletvar(0),
            )),
        )),
    )
}

fn logical32(op: Operation, shifted_op: impl Fn(ShiftOp, u8) -> Operation, imm_op: impl Fn(i32) -> Operation, a: Expr, b: Expr) -> Expr {
    if let Some(n) = int_const(&b) {
        return op1(imm_op(n), a);
    }
    if let Some(n) = int_const(&a) {
        return op1(imm_op(n), b);
    }
    if let Some((s, n, _)) = shifted32(&b) {
        let y = shift_arg(b.clone());
        return op2(shifted_op(s, n), a, y);
    }
    if let Some((s, n, _)) = shifted32(&a) {
        let y = shift_arg(a.clone());
        return op2(shifted_op(s, n), b, y);
    }
    op2(op, a, b)
}

fn shift32(s: ShiftOp, reg_op: Operation, a: Expr, b: Expr) -> Expr {
    match int_const(&b) {
        Some(n) if (0..32).contains(&n) => op1(Operation::Oshiftimm(s, n as u8), a),
        _ => op2(reg_op, a, b),
    }
}

// ---------------------------------------------------------------------------
// Smart constructors, 64-bit integers.

fn add64(a: Expr, b: Expr) -> Expr {
    if let (Some(x), Some(y)) = (long_const(&a), long_const(&b)) {
        return op0(Operation::Olongconst(x.wrapping_add(y)));
    }
    if let Some(n) = long_const(&b) {
        return add64imm(a, n);
    }
    if let Some(n) = long_const(&a) {
        return add64imm(b, n);
    }
    if let Some((s, n, _)) = shifted64(&b) {
        let y = shift_arg(b.clone());
        return op2(Operation::Oaddlshift(s, n), a, y);
    }
    if let Some((s, n, _)) = shifted64(&a) {
        let y = shift_arg(a.clone());
        return op2(Operation::Oaddlshift(s, n), b, y);
    }
    if mul64(&b).is_some() {
        let (y, z) = take_mul(b);
        return op3(Operation::Omaddl, a, y, z);
    }
    if mul64(&a).is_some() {
        let (y, z) = take_mul(a);
        return op3(Operation::Omaddl, b, y, z);
    }
    op2(Operation::Oaddl, a, b)
}

fn add64imm(a: Expr, n: i64) -> Expr {
    if n == 0 {
        return a;
    }
    match a {
        Expr::Eop(Operation::Oaddlimm(m), args) => op1(
            Operation::Oaddlimm(m.wrapping_add(n)),
            args.into_iter().next().unwrap(),
        ),
        Expr::Eop(Operation::Oaddrsymbol(s, ofs), _) => {
            op0(Operation::Oaddrsymbol(s, ofs + n))
        }
        Expr::Eop(Operation::Oaddrstack(ofs), _) => op0(Operation::Oaddrstack(ofs + n)),
        a => op1(Operation::Oaddlimm(n), a),
    }
}

fn sub64(a: Expr, b: Expr) -> Expr {
    if let (Some(x), Some(y)) = (long_const(&a), long_const(&b)) {
        return op0(Operation::Olongconst(x.wrapping_sub(y)));
    }
    if let Some(n) = long_const(&b) {
        return add64imm(a, n.wrapping_neg());
    }
    if let Some((s, n, _)) = shifted64(&b) {
        let y = shift_arg(b.clone());
        return op2(Operation::Osublshift(s, n), a, y);
    }
    if mul64(&b).is_some() {
        let (y, z) = take_mul(b);
        return op3(Operation::Omsubl, a, y, z);
    }
    op2(Operation::Osubl, a, b)
}

fn mul64c(a: Expr, b: Expr) -> Expr {
    if let (Some(x), Some(y)) = (long_const(&a), long_const(&b)) {
        return op0(Operation::Olongconst(x.wrapping_mul(y)));
    }
    if let Some(n) = long_const(&b) {
        if n > 0 && (n as u64).is_power_of_two() {
            return op1(
                Operation::Oshiftlimm(ShiftOp::Lsl, (n as u64).trailing_zeros() as u8),
                a,
            );
        }
    }
    if let Some(n) = long_const(&a) {
        if n > 0 && (n as u64).is_power_of_two() {
            return op1(
                Operation::Oshiftlimm(ShiftOp::Lsl, (n as u64).trailing_zeros() as u8),
                b,
            );
        }
    }
    op2(Operation::Omull, a, b)
}

fn logical64(op: Operation, shifted_op: impl Fn(ShiftOp, u8) -> Operation, imm_op: impl Fn(i64) -> Operation, a: Expr, b: Expr) -> Expr {
    if let Some(n) = long_const(&b) {
        return op1(imm_op(n), a);
    }
    if let Some(n) = long_const(&a) {
        return op1(imm_op(n), b);
    }
    if let Some((s, n, _)) = shifted64(&b) {
        let y = shift_arg(b.clone());
        return op2(shifted_op(s, n), a, y);
    }
    if let Some((s, n, _)) = shifted64(&a) {
        let y = shift_arg(a.clone());
        return op2(shifted_op(s, n), b, y);
    }
    op2(op, a, b)
}

fn shift64(s: ShiftOp, reg_op: Operation, a: Expr, b: Expr) -> Expr {
    match int_const(&b) {
        Some(n) if (0..64).contains(&n) => op1(Operation::Oshiftlimm(s, n as u8), a),
        _ => op2(reg_op, a, b),
    }
}

// ---------------------------------------------------------------------------
// Floats.

fn addf(a: Expr, b: Expr) -> Expr {
    if let Expr::Eop(Operation::Omulf, _) = b {
        let (y, z) = take_mulf(b);
        return op3(Operation::Ofmadd, a, y, z);
    }
    if let Expr::Eop(Operation::Omulf, _) = a {
        let (y, z) = take_mulf(a);
        return op3(Operation::Ofmadd, b, y, z);
    }
    op2(Operation::Oaddf, a, b)
}

fn subf(a: Expr, b: Expr) -> Expr {
    if let Expr::Eop(Operation::Omulf, _) = b {
        let (y, z) = take_mulf(b);
        return op3(Operation::Ofmsub, a, y, z);
    }
    op2(Operation::Osubf, a, b)
}

fn adds(a: Expr, b: Expr) -> Expr {
    if let Expr::Eop(Operation::Omuls, _) = b {
        let (y, z) = take_mulf(b);
        return op3(Operation::Ofmadds, a, y, z);
    }
    if let Expr::Eop(Operation::Omuls, _) = a {
        let (y, z) = take_mulf(a);
        return op3(Operation::Ofmadds, b, y, z);
    }
    op2(Operation::Oadds, a, b)
}

fn subs(a: Expr, b: Expr) -> Expr {
    if let Expr::Eop(Operation::Omuls, _) = b {
        let (y, z) = take_mulf(b);
        return op3(Operation::Ofmsubs, a, y, z);
    }
    op2(Operation::Osubs, a, b)
}

fn take_mulf(e: Expr) -> (Expr, Expr) {
    match e {
        Expr::Eop(Operation::Omulf, args) | Expr::Eop(Operation::Omuls, args) => {
            let mut it = args.into_iter();
            let y = it.next().unwrap();
            let z = it.next().unwrap();
            (y, z)
        }
        _ => unreachable!("take_mulf on non-multiply"),
    }
}

// ---------------------------------------------------------------------------
// Conditions.

/// Build a flat condition from a comparison family applied to selected
/// operands, folding immediates.
fn flat_cond(family: CmpFamily, c: Comparison, a: Expr, b: Expr) -> CondExpr {
    match family {
        CmpFamily::Int | CmpFamily::IntU => {
            if let (Some(x), Some(y)) = (int_const(&a), int_const(&b)) {
                return fold_cmp(family, c, x as i64, y as i64);
            }
            if let Some(n) = int_const(&b) {
                let cond = match family {
                    CmpFamily::Int => Condition::Ccompimm(c, n),
                    _ => Condition::Ccompuimm(c, n),
                };
                return CondExpr::CondCmp(cond, vec![a]);
            }
            if let Some(n) = int_const(&a) {
                let cond = match family {
                    CmpFamily::Int => Condition::Ccompimm(c.swap(), n),
                    _ => Condition::Ccompuimm(c.swap(), n),
                };
                return CondExpr::CondCmp(cond, vec![b]);
            }
            let cond = match family {
                CmpFamily::Int => Condition::Ccomp(c),
                _ => Condition::Ccompu(c),
            };
            CondExpr::CondCmp(cond, vec![a, b])
        }
        CmpFamily::Long | CmpFamily::LongU => {
            if let (Some(x), Some(y)) = (long_const(&a), long_const(&b)) {
                return fold_cmp(family, c, x, y);
            }
            if let Some(n) = long_const(&b) {
                let cond = match family {
                    CmpFamily::Long => Condition::Ccomplimm(c, n),
                    _ => Condition::Ccompluimm(c, n),
                };
                return CondExpr::CondCmp(cond, vec![a]);
            }
            if let Some(n) = long_const(&a) {
                let cond = match family {
                    CmpFamily::Long => Condition::Ccomplimm(c.swap(), n),
                    _ => Condition::Ccompluimm(c.swap(), n),
                };
                return CondExpr::CondCmp(cond, vec![b]);
            }
            let cond = match family {
                CmpFamily::Long => Condition::Ccompl(c),
                _ => Condition::Ccomplu(c),
            };
            CondExpr::CondCmp(cond, vec![a, b])
        }
        CmpFamily::Float => CondExpr::CondCmp(Condition::Ccompf(c), vec![a, b]),
        CmpFamily::Single => CondExpr::CondCmp(Condition::Ccompfs(c), vec![a, b]),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CmpFamily {
    Int,
    IntU,
    Long,
    LongU,
    Float,
    Single,
}

fn fold_cmp(family: CmpFamily, c: Comparison, x: i64, y: i64) -> CondExpr {
    let (x, y) = match family {
        CmpFamily::Int => (x as i32 as i64, y as i32 as i64),
        CmpFamily::IntU => ((x as u32) as i64, (y as u32) as i64),
        CmpFamily::Long => (x, y),
        CmpFamily::LongU => {
            let holds = cmp_u64(c, x as u64, y as u64);
            return if holds {
                CondExpr::CondTrue
            } else {
                CondExpr::CondFalse
            };
        }
        _ => unreachable!(),
    };
    let holds = match c {
        Comparison::Eq => x == y,
        Comparison::Ne => x != y,
        Comparison::Lt => x < y,
        Comparison::Le => x <= y,
        Comparison::Gt => x > y,
        Comparison::Ge => x >= y,
    };
    if holds {
        CondExpr::CondTrue
    } else {
        CondExpr::CondFalse
    }
}

fn cmp_u64(c: Comparison, x: u64, y: u64) -> bool {
    match c {
        Comparison::Eq => x == y,
        Comparison::Ne => x != y,
        Comparison::Lt => x < y,
        Comparison::Le => x <= y,
        Comparison::Gt => x > y,
        Comparison::Ge => x >= y,
    }
}

/// Does this Cminor expression always evaluate to 0 or 1?
fn is_boolean(e: &cm::Expr) -> bool {
    match e {
        cm::Expr::Ebinop(op, a, b) => match op {
            Binop::Ocmp(_)
            | Binop::Ocmpu(_)
            | Binop::Ocmpl(_)
            | Binop::Ocmplu(_)
            | Binop::Ocmpf(_)
            | Binop::Ocmps(_) => true,
            Binop::Oand | Binop::Oor => is_boolean(a) && is_boolean(b),
            _ => false,
        },
        cm::Expr::Econst(Const::Ointconst(n)) => *n == 0 || *n == 1,
        _ => false,
    }
}

/// Select a guard expression into a condition tree.
fn sel_condexpr(e: &cm::Expr) -> CondExpr {
    match e {
        cm::Expr::Econst(Const::Ointconst(0)) => CondExpr::CondFalse,
        cm::Expr::Econst(Const::Ointconst(_)) => CondExpr::CondTrue,
        cm::Expr::Ebinop(Binop::Oand, a, b) if is_boolean(a) && is_boolean(b) => {
            CondExpr::CondAnd(Box::new(sel_condexpr(a)), Box::new(sel_condexpr(b)))
        }
        cm::Expr::Ebinop(Binop::Oor, a, b) if is_boolean(a) && is_boolean(b) => {
            CondExpr::CondOr(Box::new(sel_condexpr(a)), Box::new(sel_condexpr(b)))
        }
        // `b == 0` of a boolean-valued b is a negation.
        cm::Expr::Ebinop(Binop::Ocmp(Comparison::Eq), a, z)
            if is_boolean(a) && matches!(**z, cm::Expr::Econst(Const::Ointconst(0))) =>
        {
            CondExpr::CondNot(Box::new(sel_condexpr(a)))
        }
        // `b != 0` of a boolean-valued b is b itself.
        cm::Expr::Ebinop(Binop::Ocmp(Comparison::Ne), a, z)
            if is_boolean(a) && matches!(**z, cm::Expr::Econst(Const::Ointconst(0))) =>
        {
            sel_condexpr(a)
        }
        cm::Expr::Ebinop(op, a, b) => {
            let family = match op {
                Binop::Ocmp(_) => Some(CmpFamily::Int),
                Binop::Ocmpu(_) => Some(CmpFamily::IntU),
                Binop::Ocmpl(_) => Some(CmpFamily::Long),
                Binop::Ocmplu(_) => Some(CmpFamily::LongU),
                Binop::Ocmpf(_) => Some(CmpFamily::Float),
                Binop::Ocmps(_) => Some(CmpFamily::Single),
                _ => None,
            };
            match (family, cmp_code(op)) {
                (Some(family), Some(c)) => {
                    flat_cond(family, c, sel_expr(a.as_ref().clone()), sel_expr(b.as_ref().clone()))
                }
                _ => default_cond(e),
            }
        }
        _ => default_cond(e),
    }
}

fn cmp_code(op: &Binop) -> Option<Comparison> {
    match op {
        Binop::Ocmp(c)
        | Binop::Ocmpu(c)
        | Binop::Ocmpl(c)
        | Binop::Ocmplu(c)
        | Binop::Ocmpf(c)
        | Binop::Ocmps(c) => Some(*c),
        _ => None,
    }
}

/// Truthiness of an arbitrary 32-bit guard value.
fn default_cond(e: &cm::Expr) -> CondExpr {
    CondExpr::CondCmp(
        Condition::Ccompimm(Comparison::Ne, 0),
        vec![sel_expr(e.clone())],
    )
}

// ---------------------------------------------------------------------------
// Addressing modes.

/// Match a selected 64-bit address expression against the addressing
/// modes, in priority order.
pub(crate) fn sel_addressing(addr: Expr) -> (Addressing, Vec<Expr>) {
    match addr {
        // A global, possibly with a folded offset.
        Expr::Eop(Operation::Oaddrsymbol(s, ofs), _) => (Addressing::Aglobal(s, ofs), vec![]),
        // Stack data, possibly with a folded offset.
        Expr::Eop(Operation::Oaddrstack(ofs), _) => (Addressing::Ainstack(ofs), vec![]),
        // base + constant.
        Expr::Eop(Operation::Oaddlimm(n), args) => {
            let base = args.into_iter().next().unwrap();
            (Addressing::Aindexed(n), vec![base])
        }
        // base + (index << s), s in 0..=3.
        Expr::Eop(Operation::Oaddlshift(ShiftOp::Lsl, s), args) if s <= 3 => {
            let mut it = args.into_iter();
            let base = it.next().unwrap();
            let index = it.next().unwrap();
            match index {
                Expr::Eop(Operation::Ocast32signed, cast_args) => (
                    Addressing::Aindexed2ext(Extension::Sxtw, s),
                    vec![base, cast_args.into_iter().next().unwrap()],
                ),
                Expr::Eop(Operation::Ocast32unsigned, cast_args) => (
                    Addressing::Aindexed2ext(Extension::Uxtw, s),
                    vec![base, cast_args.into_iter().next().unwrap()],
                ),
                index => (Addressing::Aindexed2shift(s), vec![base, index]),
            }
        }
        // base + index, including extended 32-bit indices.
        Expr::Eop(Operation::Oaddl, args) => {
            let mut it = args.into_iter();
            let base = it.next().unwrap();
            let index = it.next().unwrap();
            match index {
                Expr::Eop(Operation::Ocast32signed, cast_args) => (
                    Addressing::Aindexed2ext(Extension::Sxtw, 0),
                    vec![base, cast_args.into_iter().next().unwrap()],
                ),
                Expr::Eop(Operation::Ocast32unsigned, cast_args) => (
                    Addressing::Aindexed2ext(Extension::Uxtw, 0),
                    vec![base, cast_args.into_iter().next().unwrap()],
                ),
                index => (Addressing::Aindexed2, vec![base, index]),
            }
        }
        // Anything else: the whole expression is the base.
        addr => (Addressing::Aindexed(0), vec![addr]),
    }
}

// ---------------------------------------------------------------------------
// Expressions and statements.

fn sel_unop(op: Unop, a: Expr) -> Expr {
    let machine = match op {
        Unop::Onegint => Operation::Oneg,
        Unop::Onotint => Operation::Onot,
        Unop::Onegl => Operation::Onegl,
        Unop::Onotl => Operation::Onotl,
        Unop::Onegf => Operation::Onegf,
        Unop::Oabsf => Operation::Oabsf,
        Unop::Onegs => Operation::Onegs,
        Unop::Oabss => Operation::Oabss,
        Unop::Ocast8signed => Operation::Ocast8signed,
        Unop::Ocast8unsigned => Operation::Ocast8unsigned,
        Unop::Ocast16signed => Operation::Ocast16signed,
        Unop::Ocast16unsigned => Operation::Ocast16unsigned,
        Unop::Olongofint => Operation::Ocast32signed,
        Unop::Olongofintu => Operation::Ocast32unsigned,
        Unop::Ointoflong => Operation::Olowlong,
        Unop::Ofloatofint => Operation::Ofloatofint,
        Unop::Ofloatofintu => Operation::Ofloatofintu,
        Unop::Ointoffloat => Operation::Ointoffloat,
        Unop::Ointuoffloat => Operation::Ointuoffloat,
        Unop::Osingleofint => Operation::Osingleofint,
        Unop::Osingleofintu => Operation::Osingleofintu,
        Unop::Ointofsingle => Operation::Ointofsingle,
        Unop::Ointuofsingle => Operation::Ointuofsingle,
        Unop::Ofloatoflong => Operation::Ofloatoflong,
        Unop::Ofloatoflongu => Operation::Ofloatoflongu,
        Unop::Olongoffloat => Operation::Olongoffloat,
        Unop::Olonguoffloat => Operation::Olonguoffloat,
        Unop::Osingleoflong => Operation::Osingleoflong,
        Unop::Osingleoflongu => Operation::Osingleoflongu,
        Unop::Olongofsingle => Operation::Olongofsingle,
        Unop::Olonguofsingle => Operation::Olonguofsingle,
        Unop::Osingleoffloat => Operation::Osingleoffloat,
        Unop::Ofloatofsingle => Operation::Ofloatofsingle,
    };
    // Fold conversions of integer constants that selection itself
    // introduces around address arithmetic.
    match (machine, int_const(&a)) {
        (Operation::Ocast32signed, Some(n)) => op0(Operation::Olongconst(n as i64)),
        (Operation::Ocast32unsigned, Some(n)) => {
            op0(Operation::Olongconst(n as u32 as i64))
        }
        _ => op1(machine, a),
    }
}

fn sel_binop(op: Binop, a: Expr, b: Expr) -> Expr {
    use Binop::*;
    match op {
        Oadd => add32(a, b),
        Osub => sub32(a, b),
        Omul => mul32c(a, b),
        Odiv => op2(Operation::Odiv, a, b),
        Odivu => op2(Operation::Odivu, a, b),
        Omod => mod_via_msub(Operation::Odiv, Operation::Omsub, a, b),
        Omodu => mod_via_msub(Operation::Odivu, Operation::Omsub, a, b),
        Oand => logical32(Operation::Oand, Operation::Oandshift, Operation::Oandimm, a, b),
        Oor => logical32(Operation::Oor, Operation::Oorshift, Operation::Oorimm, a, b),
        Oxor => logical32(Operation::Oxor, Operation::Oxorshift, Operation::Oxorimm, a, b),
        Oshl => shift32(ShiftOp::Lsl, Operation::Oshl, a, b),
        Oshr => shift32(ShiftOp::Asr, Operation::Oshr, a, b),
        Oshru => shift32(ShiftOp::Lsr, Operation::Oshru, a, b),
        Oaddl => add64(a, b),
        Osubl => sub64(a, b),
        Omull => mul64c(a, b),
        Odivl => op2(Operation::Odivl, a, b),
        Odivlu => op2(Operation::Odivlu, a, b),
        Omodl => mod_via_msub(Operation::Odivl, Operation::Omsubl, a, b),
        Omodlu => mod_via_msub(Operation::Odivlu, Operation::Omsubl, a, b),
        Oandl => logical64(Operation::Oandl, Operation::Oandlshift, Operation::Oandlimm, a, b),
        Oorl => logical64(Operation::Oorl, Operation::Oorlshift, Operation::Oorlimm, a, b),
        Oxorl => logical64(Operation::Oxorl, Operation::Oxorlshift, Operation::Oxorlimm, a, b),
        Oshll => shift64(ShiftOp::Lsl, Operation::Oshll, a, b),
        Oshrl => shift64(ShiftOp::Asr, Operation::Oshrl, a, b),
        Oshrlu => shift64(ShiftOp::Lsr, Operation::Oshrlu, a, b),
        Oaddf => addf(a, b),
        Osubf => subf(a, b),
        Omulf => op2(Operation::Omulf, a, b),
        Odivf => op2(Operation::Odivf, a, b),
        Oadds => adds(a, b),
        Osubs => subs(a, b),
        Omuls => op2(Operation::Omuls, a, b),
        Odivs => op2(Operation::Odivs, a, b),
        // Value-position comparisons: integers materialise through a
        // conditional set; float comparisons take the branchy path.
        Ocmp(c) => cmp_value(CmpFamily::Int, c, a, b),
        Ocmpu(c) => cmp_value(CmpFamily::IntU, c, a, b),
        Ocmpl(c) => cmp_value(CmpFamily::Long, c, a, b),
        Ocmplu(c) => cmp_value(CmpFamily::LongU, c, a, b),
        Ocmpf(c) => cmp_value(CmpFamily::Float, c, a, b),
        Ocmps(c) => cmp_value(CmpFamily::Single, c, a, b),
    }
}

/// A comparison whose 0/1 value is wanted.
fn cmp_value(family: CmpFamily, c: Comparison, a: Expr, b: Expr) -> Expr {
    let cond = flat_cond(family, c, a, b);
    match cond {
        CondExpr::CondTrue => op0(Operation::Ointconst(1)),
        CondExpr::CondFalse => op0(Operation::Ointconst(0)),
        CondExpr::CondCmp(flat, args) => match family {
            // Integer conditions materialise with a conditional set.
            CmpFamily::Int | CmpFamily::IntU | CmpFamily::Long | CmpFamily::LongU => {
                Expr::Eop(Operation::Ocmp(flat), args)
            }
            // Float conditions go through a branch.
            CmpFamily::Float | CmpFamily::Single => Expr::Econdition(
                Box::new(CondExpr::CondCmp(flat, args)),
                Box::new(op0(Operation::Ointconst(1))),
                Box::new(op0(Operation::Ointconst(0))),
            ),
        },
        _ => unreachable!("flat_cond returned a combinator"),
    }
}

fn sel_expr(e: cm::Expr) -> Expr {
    match e {
        cm::Expr::Econst(c) => match c {
            Const::Ointconst(n) => op0(Operation::Ointconst(n)),
            Const::Olongconst(n) => op0(Operation::Olongconst(n)),
            Const::Ofloatconst(x) => op0(Operation::Ofloatconst(x)),
            Const::Osingleconst(x) => op0(Operation::Osingleconst(x)),
            Const::Oaddrsymbol(s, ofs) => op0(Operation::Oaddrsymbol(s, ofs)),
            Const::Oaddrstack(ofs) => op0(Operation::Oaddrstack(ofs)),
        },
        cm::Expr::Etempvar(t) => Expr::Evar(t),
        cm::Expr::Eunop(op, a) => sel_unop(op, sel_expr(*a)),
        cm::Expr::Ebinop(op, a, b) => sel_binop(op, sel_expr(*a), sel_expr(*b)),
        cm::Expr::Eload(chunk, addr) => {
            let (mode, args) = sel_addressing(sel_expr(*addr));
            Expr::Eload(chunk, mode, args)
        }
    }
}

fn sel_stmt(s: cm::Stmt) -> Stmt {
    match s {
        cm::Stmt::Sskip => Stmt::Sskip,
        cm::Stmt::Sset(t, e) => Stmt::Sset(t, sel_expr(e)),
        cm::Stmt::Sstore(chunk, addr, val) => {
            let (mode, args) = sel_addressing(sel_expr(addr));
            Stmt::Sstore(chunk, mode, args, sel_expr(val))
        }
        cm::Stmt::Scall(dest, sig, callee, args) => Stmt::Scall(
            dest,
            sig,
            sel_expr(callee),
            args.into_iter().map(sel_expr).collect(),
        ),
        cm::Stmt::Sbuiltin(dest, b, args) => {
            Stmt::Sbuiltin(dest, b, args.into_iter().map(sel_expr).collect())
        }
        cm::Stmt::Sseq(a, b) => Stmt::seq(sel_stmt(*a), sel_stmt(*b)),
        cm::Stmt::Sifthenelse(c, a, b) => Stmt::Sifthenelse(
            sel_condexpr(&c),
            Box::new(sel_stmt(*a)),
            Box::new(sel_stmt(*b)),
        ),
        cm::Stmt::Sloop(body) => Stmt::Sloop(Box::new(sel_stmt(*body))),
        cm::Stmt::Sblock(body) => Stmt::Sblock(Box::new(sel_stmt(*body))),
        cm::Stmt::Sexit(n) => Stmt::Sexit(n),
        cm::Stmt::Sswitch {
            is_long,
            scrutinee,
            targets,
            default,
        } => Stmt::Sswitch {
            is_long,
            scrutinee: sel_expr(scrutinee),
            targets,
            default,
        },
        cm::Stmt::Sreturn(e) => Stmt::Sreturn(e.map(sel_expr)),
        cm::Stmt::Slabel(l, inner) => Stmt::Slabel(l, Box::new(sel_stmt(*inner))),
        cm::Stmt::Sgoto(l) => Stmt::Sgoto(l),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Temp;
    use crate::symbols::symbol;

    fn tv(n: u32) -> cm::Expr {
        cm::Expr::Etempvar(Temp::from_u32(n))
    }

    fn ci(n: i32) -> cm::Expr {
        cm::Expr::Econst(Const::Ointconst(n))
    }

    fn cl(n: i64) -> cm::Expr {
        cm::Expr::Econst(Const::Olongconst(n))
    }

    fn bin(op: Binop, a: cm::Expr, b: cm::Expr) -> cm::Expr {
        cm::Expr::Ebinop(op, Box::new(a), Box::new(b))
    }

    #[test]
    fn add_immediate() {
        match sel_expr(bin(Binop::Oadd, tv(1), ci(5))) {
            Expr::Eop(Operation::Oaddimm(5), _) => {}
            other => panic!("expected Oaddimm, got {:?}", other),
        }
        // Commuted.
        match sel_expr(bin(Binop::Oadd, ci(5), tv(1))) {
            Expr::Eop(Operation::Oaddimm(5), _) => {}
            other => panic!("expected Oaddimm, got {:?}", other),
        }
    }

    #[test]
    fn add_shifted_operand() {
        let shl = bin(Binop::Oshl, tv(2), ci(3));
        match sel_expr(bin(Binop::Oadd, tv(1), shl)) {
            Expr::Eop(Operation::Oaddshift(ShiftOp::Lsl, 3), args) => {
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected Oaddshift, got {:?}", other),
        }
        // Shifted term on the left commutes.
        let shl = bin(Binop::Oshl, tv(2), ci(3));
        match sel_expr(bin(Binop::Oadd, shl, tv(1))) {
            Expr::Eop(Operation::Oaddshift(ShiftOp::Lsl, 3), _) => {}
            other => panic!("expected Oaddshift, got {:?}", other),
        }
    }

    #[test]
    fn madd_and_msub() {
        let mul = bin(Binop::Omul, tv(2), tv(3));
        match sel_expr(bin(Binop::Oadd, tv(1), mul)) {
            Expr::Eop(Operation::Omadd, args) => assert_eq!(args.len(), 3),
            other => panic!("expected Omadd, got {:?}", other),
        }
        let mul = bin(Binop::Omul, tv(2), tv(3));
        match sel_expr(bin(Binop::Osub, tv(1), mul)) {
            Expr::Eop(Operation::Omsub, args) => assert_eq!(args.len(), 3),
            other => panic!("expected Omsub, got {:?}", other),
        }
    }

    #[test]
    fn fused_float_multiply_add() {
        let mul = bin(Binop::Omulf, tv(2), tv(3));
        match sel_expr(bin(Binop::Oaddf, tv(1), mul)) {
            Expr::Eop(Operation::Ofmadd, _) => {}
            other => panic!("expected Ofmadd, got {:?}", other),
        }
    }

    #[test]
    fn modulo_selects_div_msub_with_let() {
        match sel_expr(bin(Binop::Omod, tv(1), tv(2))) {
            Expr::Elet(_, inner) => match *inner {
                Expr::Elet(_, ref body) => match **body {
                    Expr::Eop(Operation::Omsub, ref args) => {
                        assert_eq!(args[0], Expr::Eletvar(1));
                        assert_eq!(args[2], Expr::Eletvar(0));
                    }
                    ref other => panic!("expected Omsub body, got {:?}", other),
                },
                ref other => panic!("expected nested let, got {:?}", other),
            },
            other => panic!("expected Elet, got {:?}", other),
        }
    }

    #[test]
    fn addressing_priority() {
        let g = symbol("g");
        // A bare global.
        let (mode, args) =
            sel_addressing(sel_expr(cm::Expr::Econst(Const::Oaddrsymbol(g, 0))));
        assert_eq!(mode, Addressing::Aglobal(g, 0));
        assert!(args.is_empty());

        // global + constant folds into the mode.
        let (mode, _) = sel_addressing(sel_expr(bin(
            Binop::Oaddl,
            cm::Expr::Econst(Const::Oaddrsymbol(g, 0)),
            cl(16),
        )));
        assert_eq!(mode, Addressing::Aglobal(g, 16));

        // Stack data plus constant.
        let (mode, _) = sel_addressing(sel_expr(bin(
            Binop::Oaddl,
            cm::Expr::Econst(Const::Oaddrstack(8)),
            cl(4),
        )));
        assert_eq!(mode, Addressing::Ainstack(12));

        // base + constant.
        let (mode, args) = sel_addressing(sel_expr(bin(Binop::Oaddl, tv(1), cl(24))));
        assert_eq!(mode, Addressing::Aindexed(24));
        assert_eq!(args.len(), 1);

        // base + (index << 3).
        let shl = bin(Binop::Oshll, tv(2), ci(3));
        let (mode, args) = sel_addressing(sel_expr(bin(Binop::Oaddl, tv(1), shl)));
        assert_eq!(mode, Addressing::Aindexed2shift(3));
        assert_eq!(args.len(), 2);

        // Shift amounts above 3 do not qualify: the whole expression
        // falls back to a plain base.
        let shl = bin(Binop::Oshll, tv(2), ci(4));
        let (mode, args) = sel_addressing(sel_expr(bin(Binop::Oaddl, tv(1), shl)));
        assert_eq!(mode, Addressing::Aindexed(0));
        assert_eq!(args.len(), 1);

        // base + index.
        let (mode, args) = sel_addressing(sel_expr(bin(Binop::Oaddl, tv(1), tv(2))));
        assert_eq!(mode, Addressing::Aindexed2);
        assert_eq!(args.len(), 2);

        // Fallback.
        let (mode, args) = sel_addressing(sel_expr(tv(1)));
        assert_eq!(mode, Addressing::Aindexed(0));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn extended_index_addressing() {
        // base + sign-extended 32-bit index scaled by 4.
        let widened = cm::Expr::Eunop(Unop::Olongofint, Box::new(tv(2)));
        let scaled = bin(Binop::Omull, widened, cl(4));
        let (mode, args) = sel_addressing(sel_expr(bin(Binop::Oaddl, tv(1), scaled)));
        assert_eq!(mode, Addressing::Aindexed2ext(Extension::Sxtw, 2));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn condition_selection() {
        // Constant-foldable comparison.
        assert_eq!(sel_condexpr(&bin(Binop::Ocmp(Comparison::Lt), ci(1), ci(2))), CondExpr::CondTrue);
        assert_eq!(sel_condexpr(&bin(Binop::Ocmp(Comparison::Gt), ci(1), ci(2))), CondExpr::CondFalse);

        // Immediate forms.
        match sel_condexpr(&bin(Binop::Ocmp(Comparison::Lt), tv(1), ci(10))) {
            CondExpr::CondCmp(Condition::Ccompimm(Comparison::Lt, 10), _) => {}
            other => panic!("expected Ccompimm, got {:?}", other),
        }
        // Swapped when the constant is on the left.
        match sel_condexpr(&bin(Binop::Ocmp(Comparison::Lt), ci(10), tv(1))) {
            CondExpr::CondCmp(Condition::Ccompimm(Comparison::Gt, 10), _) => {}
            other => panic!("expected swapped Ccompimm, got {:?}", other),
        }

        // Boolean & of comparisons becomes CondAnd.
        let c1 = bin(Binop::Ocmp(Comparison::Lt), tv(1), ci(10));
        let c2 = bin(Binop::Ocmp(Comparison::Gt), tv(2), ci(0));
        match sel_condexpr(&bin(Binop::Oand, c1, c2)) {
            CondExpr::CondAnd(..) => {}
            other => panic!("expected CondAnd, got {:?}", other),
        }

        // Comparison of a boolean with zero is a negation.
        let c1 = bin(Binop::Ocmp(Comparison::Lt), tv(1), ci(10));
        match sel_condexpr(&bin(Binop::Ocmp(Comparison::Eq), c1, ci(0))) {
            CondExpr::CondNot(_) => {}
            other => panic!("expected CondNot, got {:?}", other),
        }
    }

    #[test]
    fn long_guard_uses_long_immediate_condition() {
        let guard = bin(Binop::Ocmplu(Comparison::Ne), tv(1), cl(0));
        match sel_condexpr(&guard) {
            CondExpr::CondCmp(Condition::Ccompluimm(Comparison::Ne, 0), _) => {}
            other => panic!("expected Ccompluimm, got {:?}", other),
        }
    }
}
