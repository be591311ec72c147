//! Lowering from Csharpminor to Cminor.
//!
//! Two jobs. First, named stack-resident locals disappear: the pass lays
//! them out in a per-function stack-data area and rewrites `Evar`/`Eaddrof`
//! into `Oaddrstack`/`Oaddrsymbol` constants. Second, `switch` statements
//! lose their labelled fall-through arms: each switch becomes the CompCert
//! nested-block encoding, with the arm bodies stacked one per enclosing
//! block (fall-through is falling off the end of a block) and a dispatch
//! at the centre whose shape is chosen per switch: an if-cascade for few
//! cases, a dense jump table when the case set is dense, and a binary
//! search otherwise.
//!
//! Switch comparisons are unsigned on the bit pattern of the scrutinee,
//! which is how the case values were canonicalised by the front-end.

use crate::ir::cminor::{Expr, Function, Program, Stmt};
use crate::ir::csharpminor as cs;
use crate::ir::ops::{Binop, Const};
use crate::ir::types::{Comparison, Type};
use crate::symbols::Symbol;
use std::collections::BTreeMap;

/// Run the pass over a whole program.
pub fn run(prog: cs::Program) -> Program {
    Program {
        globals: prog.globals,
        externals: prog.externals,
        functions: prog
            .functions
            .into_iter()
            .map(|(name, f)| {
                log::debug!("cminorgen: {}", name);
                (name, transl_function(f))
            })
            .collect(),
    }
}

/// The alignment used for a stack-allocated local of `size` bytes.
pub fn alignment_for_size(size: i64) -> i64 {
    if size >= 8 {
        8
    } else if size >= 4 {
        4
    } else if size >= 2 {
        2
    } else {
        1
    }
}

/// Lay out `vars` in declaration order. Returns the offset of each
/// variable and the total stack-data size, aligned up to 8 bytes.
pub fn layout_stack(vars: &[cs::Var]) -> (BTreeMap<Symbol, i64>, i64) {
    let mut offsets = BTreeMap::new();
    let mut ofs: i64 = 0;
    for v in vars {
        let align = alignment_for_size(v.size);
        ofs = (ofs + align - 1) & !(align - 1);
        offsets.insert(v.name, ofs);
        ofs += v.size;
    }
    ofs = (ofs + 7) & !7;
    (offsets, ofs)
}

fn transl_function(func: cs::Function) -> Function {
    let (offsets, stackspace) = layout_stack(&func.vars);
    let mut out = Function {
        sig: func.sig,
        params: func.params,
        stackspace,
        temps: func.temps,
        body: Stmt::Sskip,
    };
    out.body = transl_stmt(&mut out, &offsets, func.body);
    out
}

fn transl_expr(offsets: &BTreeMap<Symbol, i64>, e: cs::Expr) -> Expr {
    match e {
        cs::Expr::Econst(c) => Expr::Econst(c),
        cs::Expr::Evar(x) => {
            let ofs = *offsets
                .get(&x)
                .unwrap_or_else(|| panic!("cminorgen: unknown local `{}`", x));
            Expr::Econst(Const::Oaddrstack(ofs))
        }
        cs::Expr::Eaddrof(g) => Expr::Econst(Const::Oaddrsymbol(g, 0)),
        cs::Expr::Etempvar(t) => Expr::Etempvar(t),
        cs::Expr::Eunop(op, a) => Expr::Eunop(op, Box::new(transl_expr(offsets, *a))),
        cs::Expr::Ebinop(op, a, b) => Expr::Ebinop(
            op,
            Box::new(transl_expr(offsets, *a)),
            Box::new(transl_expr(offsets, *b)),
        ),
        cs::Expr::Eload(chunk, addr) => {
            Expr::Eload(chunk, Box::new(transl_expr(offsets, *addr)))
        }
    }
}

fn transl_stmt(func: &mut Function, offsets: &BTreeMap<Symbol, i64>, s: cs::Stmt) -> Stmt {
    match s {
        cs::Stmt::Sskip => Stmt::Sskip,
        cs::Stmt::Sset(t, e) => Stmt::Sset(t, transl_expr(offsets, e)),
        cs::Stmt::Sstore(chunk, addr, val) => Stmt::Sstore(
            chunk,
            transl_expr(offsets, addr),
            transl_expr(offsets, val),
        ),
        cs::Stmt::Scall(dest, sig, callee, args) => Stmt::Scall(
            dest,
            sig,
            transl_expr(offsets, callee),
            args.into_iter().map(|a| transl_expr(offsets, a)).collect(),
        ),
        cs::Stmt::Sbuiltin(dest, b, args) => Stmt::Sbuiltin(
            dest,
            b,
            args.into_iter().map(|a| transl_expr(offsets, a)).collect(),
        ),
        cs::Stmt::Sseq(a, b) => Stmt::seq(
            transl_stmt(func, offsets, *a),
            transl_stmt(func, offsets, *b),
        ),
        cs::Stmt::Sifthenelse(c, a, b) => Stmt::Sifthenelse(
            transl_expr(offsets, c),
            Box::new(transl_stmt(func, offsets, *a)),
            Box::new(transl_stmt(func, offsets, *b)),
        ),
        cs::Stmt::Sloop(body) => {
            Stmt::Sloop(Box::new(transl_stmt(func, offsets, *body)))
        }
        cs::Stmt::Sblock(body) => {
            Stmt::Sblock(Box::new(transl_stmt(func, offsets, *body)))
        }
        cs::Stmt::Sexit(n) => Stmt::Sexit(n),
        cs::Stmt::Sswitch(is_long, scrutinee, cases) => {
            let scrutinee = transl_expr(offsets, scrutinee);
            let arms: Vec<(Option<i64>, Stmt)> = cases
                .into_iter()
                .map(|c| (c.value, transl_stmt(func, offsets, c.body)))
                .collect();
            transl_switch(func, is_long, scrutinee, arms)
        }
        cs::Stmt::Sreturn(e) => Stmt::Sreturn(e.map(|e| transl_expr(offsets, e))),
        cs::Stmt::Slabel(l, inner) => {
            Stmt::Slabel(l, Box::new(transl_stmt(func, offsets, *inner)))
        }
        cs::Stmt::Sgoto(l) => Stmt::Sgoto(l),
    }
}

/// The dispatch shape chosen for one switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Nested equality tests; few cases.
    Linear,
    /// Dense table indexed by the normalised scrutinee.
    JumpTable,
    /// Binary search over the sorted case values.
    BinarySearch,
}

impl Strategy {
    /// Pick the dispatch strategy for `n` cases covering `density` of
    /// their value range.
    pub fn select(n: usize, density: f64) -> Strategy {
        if n <= 4 {
            Strategy::Linear
        } else if density >= 0.5 {
            Strategy::JumpTable
        } else {
            Strategy::BinarySearch
        }
    }
}

/// One valued case: bit pattern and the arm it enters.
#[derive(Clone, Copy)]
struct Case {
    value: u64,
    arm: u32,
}

/// Lower one switch into the nested-block encoding.
///
/// Arms were translated under the assumption that the switch is one
/// enclosing block; inside the encoding, arm `k` of `n` actually sits
/// inside `n - k` blocks, so its free exits are shifted by `n - k - 1`.
fn transl_switch(
    func: &mut Function,
    is_long: bool,
    scrutinee: Expr,
    arms: Vec<(Option<i64>, Stmt)>,
) -> Stmt {
    let n = arms.len() as u32;

    let mut cases: Vec<Case> = Vec::new();
    let mut default_arm: Option<u32> = None;
    for (k, (value, _)) in arms.iter().enumerate() {
        match value {
            Some(v) => {
                let bits = if is_long { *v as u64 } else { *v as u32 as u64 };
                cases.push(Case {
                    value: bits,
                    arm: k as u32,
                });
            }
            None => default_arm = Some(k as u32),
        }
    }
    cases.sort_by_key(|c| c.value);
    // Exit depth n leaves the whole encoding (no default arm).
    let default_target = default_arm.unwrap_or(n);

    // Evaluate the scrutinee once.
    let ty = if is_long { Type::I64 } else { Type::I32 };
    let t = func.new_temp(ty);
    let dispatch = build_dispatch(is_long, t, &cases, default_target);
    let dispatch = Stmt::seq(Stmt::Sset(t, scrutinee), dispatch);

    // X_0 = dispatch; X_{k+1} = seq(block(X_k), arm_k); result = block(X_n).
    let mut acc = dispatch;
    for (k, (_, body)) in arms.into_iter().enumerate() {
        let shifted = shift_exits(body, n - k as u32 - 1, 0);
        acc = Stmt::seq(Stmt::Sblock(Box::new(acc)), shifted);
    }
    Stmt::Sblock(Box::new(acc))
}

fn build_dispatch(is_long: bool, t: crate::ir::types::Temp, cases: &[Case], default: u32) -> Stmt {
    let density = if cases.is_empty() {
        0.0
    } else {
        let span = cases[cases.len() - 1].value - cases[0].value + 1;
        cases.len() as f64 / span as f64
    };
    match Strategy::select(cases.len(), density) {
        Strategy::Linear => {
            // From last to first, ending in the default.
            let mut acc = Stmt::Sexit(default);
            for c in cases.iter().rev() {
                acc = Stmt::Sifthenelse(
                    cmp_eq(is_long, t, c.value),
                    Box::new(Stmt::Sexit(c.arm)),
                    Box::new(acc),
                );
            }
            acc
        }
        Strategy::JumpTable => {
            let min = cases[0].value;
            let max = cases[cases.len() - 1].value;
            let mut targets = vec![default; (max - min + 1) as usize];
            for c in cases {
                targets[(c.value - min) as usize] = c.arm;
            }
            let normalised = if min == 0 {
                Expr::Etempvar(t)
            } else if is_long {
                Expr::Ebinop(
                    Binop::Osubl,
                    Box::new(Expr::Etempvar(t)),
                    Box::new(Expr::Econst(Const::Olongconst(min as i64))),
                )
            } else {
                Expr::Ebinop(
                    Binop::Osub,
                    Box::new(Expr::Etempvar(t)),
                    Box::new(Expr::Econst(Const::Ointconst(min as u32 as i32))),
                )
            };
            Stmt::Sswitch {
                is_long,
                scrutinee: normalised,
                targets,
                default,
            }
        }
        Strategy::BinarySearch => build_search(is_long, t, cases, default),
    }
}

fn build_search(is_long: bool, t: crate::ir::types::Temp, cases: &[Case], default: u32) -> Stmt {
    match cases.len() {
        0 => Stmt::Sexit(default),
        1 => Stmt::Sifthenelse(
            cmp_eq(is_long, t, cases[0].value),
            Box::new(Stmt::Sexit(cases[0].arm)),
            Box::new(Stmt::Sexit(default)),
        ),
        len => {
            let mid = len / 2;
            let pivot = cases[mid].value;
            Stmt::Sifthenelse(
                cmp_lt(is_long, t, pivot),
                Box::new(build_search(is_long, t, &cases[..mid], default)),
                Box::new(build_search(is_long, t, &cases[mid..], default)),
            )
        }
    }
}

fn cmp_eq(is_long: bool, t: crate::ir::types::Temp, value: u64) -> Expr {
    let (op, konst) = if is_long {
        (
            Binop::Ocmplu(Comparison::Eq),
            Const::Olongconst(value as i64),
        )
    } else {
        (
            Binop::Ocmpu(Comparison::Eq),
            Const::Ointconst(value as u32 as i32),
        )
    };
    Expr::Ebinop(
        op,
        Box::new(Expr::Etempvar(t)),
        Box::new(Expr::Econst(konst)),
    )
}

fn cmp_lt(is_long: bool, t: crate::ir::types::Temp, pivot: u64) -> Expr {
    let (op, konst) = if is_long {
        (
            Binop::Ocmplu(Comparison::Lt),
            Const::Olongconst(pivot as i64),
        )
    } else {
        (
            Binop::Ocmpu(Comparison::Lt),
            Const::Ointconst(pivot as u32 as i32),
        )
    };
    Expr::Ebinop(
        op,
        Box::new(Expr::Etempvar(t)),
        Box::new(Expr::Econst(konst)),
    )
}

/// Add `delta` to every exit that escapes the statement: an `Sexit(d)`
/// under `depth` local blocks is free when `d >= depth`.
fn shift_exits(s: Stmt, delta: u32, depth: u32) -> Stmt {
    if delta == 0 {
        return s;
    }
    match s {
        Stmt::Sexit(d) => {
            if d >= depth {
                Stmt::Sexit(d + delta)
            } else {
                Stmt::Sexit(d)
            }
        }
        Stmt::Sblock(inner) => Stmt::Sblock(Box::new(shift_exits(*inner, delta, depth + 1))),
        Stmt::Sloop(inner) => Stmt::Sloop(Box::new(shift_exits(*inner, delta, depth))),
        Stmt::Sseq(a, b) => Stmt::Sseq(
            Box::new(shift_exits(*a, delta, depth)),
            Box::new(shift_exits(*b, delta, depth)),
        ),
        Stmt::Sifthenelse(c, a, b) => Stmt::Sifthenelse(
            c,
            Box::new(shift_exits(*a, delta, depth)),
            Box::new(shift_exits(*b, delta, depth)),
        ),
        Stmt::Sswitch {
            is_long,
            scrutinee,
            targets,
            default,
        } => {
            // A dense switch's targets are exit depths bound like Sexit.
            let fix = |d: u32| if d >= depth { d + delta } else { d };
            Stmt::Sswitch {
                is_long,
                scrutinee,
                targets: targets.into_iter().map(fix).collect(),
                default: fix(default),
            }
        }
        Stmt::Slabel(l, inner) => Stmt::Slabel(l, Box::new(shift_exits(*inner, delta, depth))),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{Signature, Temp};
    use crate::symbols::symbol;

    #[test]
    fn stack_layout_examples() {
        let var = |name: &str, size| cs::Var {
            name: symbol(name),
            size,
            align: 1,
        };
        let (offsets, total) = layout_stack(&[var("a", 1), var("b", 4), var("c", 8)]);
        assert_eq!(offsets[&symbol("a")], 0);
        assert_eq!(offsets[&symbol("b")], 4);
        assert_eq!(offsets[&symbol("c")], 8);
        assert_eq!(total, 16);

        let (offsets, total) = layout_stack(&[var("a", 1), var("b", 8)]);
        assert_eq!(offsets[&symbol("a")], 0);
        assert_eq!(offsets[&symbol("b")], 8);
        assert_eq!(total, 16);
    }

    #[test]
    fn every_offset_is_aligned() {
        let sizes = [3i64, 8, 1, 2, 12, 4, 1];
        let vars: Vec<cs::Var> = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| cs::Var {
                name: symbol(&format!("v{}", i)),
                size,
                align: 1,
            })
            .collect();
        let (offsets, total) = layout_stack(&vars);
        for v in &vars {
            assert_eq!(offsets[&v.name] % alignment_for_size(v.size), 0);
        }
        assert_eq!(total % 8, 0);
    }

    #[test]
    fn strategy_selection() {
        assert_eq!(Strategy::select(3, 1.0), Strategy::Linear);
        assert_eq!(Strategy::select(4, 0.1), Strategy::Linear);
        assert_eq!(Strategy::select(5, 0.6), Strategy::JumpTable);
        assert_eq!(Strategy::select(5, 0.4), Strategy::BinarySearch);
        assert_eq!(Strategy::select(100, 0.5), Strategy::JumpTable);
    }

    fn test_function() -> Function {
        Function {
            sig: Signature::void(),
            params: vec![],
            stackspace: 0,
            temps: vec![],
            body: Stmt::Sskip,
        }
    }

    /// Walk the dispatch of a lowered switch and find which exit a given
    /// scrutinee value reaches, then resolve the exit to an arm index (or
    /// `None` for "past the whole switch").
    fn dispatch_result(lowered: &Stmt, value: u64, n: u32) -> Option<u32> {
        // Peel the encoding's blocks down to the `Sset; dispatch` pair.
        let depth_to_arm = |exit: u32| -> Option<u32> {
            if exit < n {
                Some(exit)
            } else {
                None
            }
        };
        let mut cur = lowered;
        let dispatch = loop {
            match cur {
                Stmt::Sblock(inner) => cur = inner,
                Stmt::Sseq(a, b) => {
                    if matches!(**a, Stmt::Sset(..)) {
                        break b;
                    }
                    cur = a;
                }
                other => panic!("unexpected shape: {:?}", other),
            }
        };
        let exit = eval_dispatch(dispatch, value);
        depth_to_arm(exit)
    }

    /// Symbolically evaluate a dispatch tree for scrutinee `value`.
    fn eval_dispatch(s: &Stmt, value: u64) -> u32 {
        match s {
            Stmt::Sexit(d) => *d,
            Stmt::Sifthenelse(c, a, b) => {
                let holds = eval_cond(c, value);
                if holds {
                    eval_dispatch(a, value)
                } else {
                    eval_dispatch(b, value)
                }
            }
            Stmt::Sswitch {
                scrutinee,
                targets,
                default,
                ..
            } => {
                let idx = eval_expr(scrutinee, value);
                match targets.get(idx as usize) {
                    Some(&d) => d,
                    None => *default,
                }
            }
            other => panic!("unexpected dispatch form: {:?}", other),
        }
    }

    fn eval_expr(e: &Expr, value: u64) -> u64 {
        match e {
            Expr::Etempvar(_) => value,
            Expr::Ebinop(Binop::Osub, a, b) | Expr::Ebinop(Binop::Osubl, a, b) => {
                eval_expr(a, value).wrapping_sub(eval_expr(b, value))
            }
            Expr::Econst(Const::Ointconst(n)) => *n as u32 as u64,
            Expr::Econst(Const::Olongconst(n)) => *n as u64,
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    fn eval_cond(e: &Expr, value: u64) -> bool {
        match e {
            Expr::Ebinop(Binop::Ocmpu(cmp), a, b) | Expr::Ebinop(Binop::Ocmplu(cmp), a, b) => {
                let l = eval_expr(a, value);
                let r = eval_expr(b, value);
                match cmp {
                    Comparison::Eq => l == r,
                    Comparison::Lt => l < r,
                    other => panic!("unexpected comparison {:?}", other),
                }
            }
            other => panic!("unexpected condition: {:?}", other),
        }
    }

    fn lower_switch(values: &[i64], with_default: bool) -> (Stmt, u32) {
        let mut func = test_function();
        let mut arms: Vec<(Option<i64>, Stmt)> =
            values.iter().map(|&v| (Some(v), Stmt::Sskip)).collect();
        if with_default {
            arms.push((None, Stmt::Sskip));
        }
        let n = arms.len() as u32;
        let lowered = transl_switch(
            &mut func,
            false,
            Expr::Etempvar(Temp::from_u32(99)),
            arms,
        );
        (lowered, n)
    }

    #[test]
    fn linear_switch_reaches_every_case() {
        let values = [1i64, 5, 9];
        let (lowered, n) = lower_switch(&values, true);
        for (k, &v) in values.iter().enumerate() {
            assert_eq!(dispatch_result(&lowered, v as u64, n), Some(k as u32));
        }
        // Unlisted value goes to the default arm (index 3).
        assert_eq!(dispatch_result(&lowered, 7, n), Some(3));
    }

    #[test]
    fn dense_switch_uses_jump_table() {
        let values = [10i64, 11, 12, 13, 14, 15];
        let (lowered, n) = lower_switch(&values, true);
        for (k, &v) in values.iter().enumerate() {
            assert_eq!(dispatch_result(&lowered, v as u64, n), Some(k as u32));
        }
        assert_eq!(dispatch_result(&lowered, 9, n), Some(6));
        assert_eq!(dispatch_result(&lowered, 16, n), Some(6));
    }

    #[test]
    fn sparse_switch_uses_binary_search() {
        let values = [1i64, 100, 2000, 30000, 400000, 5000000];
        let (lowered, n) = lower_switch(&values, false);
        for (k, &v) in values.iter().enumerate() {
            assert_eq!(dispatch_result(&lowered, v as u64, n), Some(k as u32));
        }
        // No default arm: misses exit the whole encoding.
        assert_eq!(dispatch_result(&lowered, 3, n), None);
        assert_eq!(dispatch_result(&lowered, 6000000, n), None);
    }

    #[test]
    fn exit_shift_respects_binders() {
        // exit 0 bound by the local block stays; exit 1 escapes and moves.
        let s = Stmt::Sblock(Box::new(Stmt::seq(Stmt::Sexit(0), Stmt::Sexit(1))));
        let shifted = shift_exits(s, 2, 0);
        match shifted {
            Stmt::Sblock(inner) => match *inner {
                Stmt::Sseq(ref a, ref b) => {
                    assert_eq!(**a, Stmt::Sexit(0));
                    assert_eq!(**b, Stmt::Sexit(3));
                }
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }
}
