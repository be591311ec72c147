//! Promotion of scalar locals to temporaries.
//!
//! A named local whose address is never taken does not need a home in
//! memory. This pass rewrites every such scalar local (including
//! parameters) into a fresh numbered temporary, leaving only address-taken
//! locals and aggregates as named, stack-resident variables.
//!
//! The address-taken analysis must see through every statement and
//! expression form: one missed `&x` and a later pass will be asked for the
//! address of a value that no longer has one.

use crate::ir::clight::{CType, Expr, Function, Program, Stmt, SwitchCase};
use crate::ir::types::Temp;
use crate::symbols::Symbol;
use std::collections::{BTreeMap, BTreeSet};

/// Run the pass over a whole program.
pub fn run(mut prog: Program) -> Program {
    for (name, func) in prog.functions.iter_mut() {
        log::debug!("simpl_locals: {}", name);
        run_function(func);
    }
    prog
}

/// Promote the promotable locals of one function in place.
pub fn run_function(func: &mut Function) {
    let mut taken = BTreeSet::new();
    addr_taken_stmt(&func.body, &mut taken);

    // Decide the fate of each local: parameters first, then declared vars.
    let mut promoted: BTreeMap<Symbol, Temp> = BTreeMap::new();
    let mut kept_vars: Vec<(Symbol, CType)> = Vec::new();
    let mut param_temps = Vec::with_capacity(func.params.len());
    let mut entry_copies: Vec<Stmt> = Vec::new();

    let params = func.params.clone();
    for (name, ty) in &params {
        if promotable(ty) && !taken.contains(name) {
            let t = func.new_temp(ty.clone());
            promoted.insert(*name, t);
            param_temps.push(t);
        } else {
            // The parameter arrives in a temporary and is stored to its
            // stack home on entry.
            let t = func.new_temp(ty.clone());
            param_temps.push(t);
            entry_copies.push(Stmt::Sassign(
                Expr::Evar(*name, ty.clone()),
                Expr::Etempvar(t, ty.clone()),
            ));
            kept_vars.push((*name, ty.clone()));
        }
    }

    let vars = std::mem::replace(&mut func.vars, Vec::new());
    for (name, ty) in vars {
        if promotable(&ty) && !taken.contains(&name) {
            let t = func.new_temp(ty.clone());
            promoted.insert(name, t);
        } else {
            kept_vars.push((name, ty));
        }
    }

    let body = std::mem::replace(&mut func.body, Stmt::Sskip);
    let mut body = rewrite_stmt(body, &promoted);
    for copy in entry_copies.into_iter().rev() {
        body = Stmt::seq(copy, body);
    }

    func.vars = kept_vars;
    func.param_temps = param_temps;
    func.body = body;
}

/// May a local of this type live in a temporary at all?
fn promotable(ty: &CType) -> bool {
    ty.is_scalar()
}

/// The named variable at the base of an l-value chain, if any.
fn lvalue_base(e: &Expr) -> Option<Symbol> {
    match e {
        Expr::Evar(x, _) => Some(*x),
        Expr::Efield(inner, _, _) => lvalue_base(inner),
        _ => None,
    }
}

fn addr_taken_expr(e: &Expr, taken: &mut BTreeSet<Symbol>) {
    match e {
        Expr::Eaddrof(inner, _) => {
            if let Some(x) = lvalue_base(inner) {
                taken.insert(x);
            }
            addr_taken_expr(inner, taken);
        }
        Expr::Ederef(inner, _)
        | Expr::Eunop(_, inner, _)
        | Expr::Ecast(inner, _)
        | Expr::Efield(inner, _, _) => addr_taken_expr(inner, taken),
        Expr::Ebinop(_, a, b, _) => {
            addr_taken_expr(a, taken);
            addr_taken_expr(b, taken);
        }
        Expr::EconstInt(..)
        | Expr::EconstLong(..)
        | Expr::EconstFloat(..)
        | Expr::EconstSingle(..)
        | Expr::EconstStr(..)
        | Expr::Evar(..)
        | Expr::Etempvar(..)
        | Expr::Esizeof(..)
        | Expr::Ealignof(..) => {}
    }
}

fn addr_taken_stmt(s: &Stmt, taken: &mut BTreeSet<Symbol>) {
    match s {
        Stmt::Sskip | Stmt::Sbreak | Stmt::Scontinue | Stmt::Sgoto(_) => {}
        Stmt::Sassign(lhs, rhs) => {
            addr_taken_expr(lhs, taken);
            addr_taken_expr(rhs, taken);
        }
        Stmt::Sset(_, e) => addr_taken_expr(e, taken),
        Stmt::Scall(_, callee, args) => {
            addr_taken_expr(callee, taken);
            for a in args {
                addr_taken_expr(a, taken);
            }
        }
        Stmt::Sbuiltin(_, _, args) => {
            for a in args {
                addr_taken_expr(a, taken);
            }
        }
        Stmt::Ssequence(a, b) => {
            addr_taken_stmt(a, taken);
            addr_taken_stmt(b, taken);
        }
        Stmt::Sifthenelse(c, a, b) => {
            addr_taken_expr(c, taken);
            addr_taken_stmt(a, taken);
            addr_taken_stmt(b, taken);
        }
        Stmt::Sloop(body, cont) => {
            addr_taken_stmt(body, taken);
            addr_taken_stmt(cont, taken);
        }
        Stmt::Sreturn(None) => {}
        Stmt::Sreturn(Some(e)) => addr_taken_expr(e, taken),
        Stmt::Sswitch(e, cases) => {
            addr_taken_expr(e, taken);
            for case in cases {
                addr_taken_stmt(&case.body, taken);
            }
        }
        Stmt::Slabel(_, inner) => addr_taken_stmt(inner, taken),
    }
}

fn rewrite_expr(e: Expr, promoted: &BTreeMap<Symbol, Temp>) -> Expr {
    match e {
        Expr::Evar(x, ty) => match promoted.get(&x) {
            Some(&t) => Expr::Etempvar(t, ty),
            None => Expr::Evar(x, ty),
        },
        Expr::Ederef(inner, ty) => {
            Expr::Ederef(Box::new(rewrite_expr(*inner, promoted)), ty)
        }
        Expr::Eaddrof(inner, ty) => {
            // The base of `inner` is never promoted; recurse for indices
            // hiding in the l-value chain.
            Expr::Eaddrof(Box::new(rewrite_expr(*inner, promoted)), ty)
        }
        Expr::Eunop(op, inner, ty) => {
            Expr::Eunop(op, Box::new(rewrite_expr(*inner, promoted)), ty)
        }
        Expr::Ebinop(op, a, b, ty) => Expr::Ebinop(
            op,
            Box::new(rewrite_expr(*a, promoted)),
            Box::new(rewrite_expr(*b, promoted)),
            ty,
        ),
        Expr::Ecast(inner, ty) => Expr::Ecast(Box::new(rewrite_expr(*inner, promoted)), ty),
        Expr::Efield(inner, name, ty) => {
            Expr::Efield(Box::new(rewrite_expr(*inner, promoted)), name, ty)
        }
        other => other,
    }
}

fn rewrite_stmt(s: Stmt, promoted: &BTreeMap<Symbol, Temp>) -> Stmt {
    match s {
        Stmt::Sskip | Stmt::Sbreak | Stmt::Scontinue | Stmt::Sgoto(_) => s,
        Stmt::Sassign(lhs, rhs) => {
            let rhs = rewrite_expr(rhs, promoted);
            // Assignment to a promoted local becomes a temporary update.
            if let Expr::Evar(x, _) = &lhs {
                if let Some(&t) = promoted.get(x) {
                    return Stmt::Sset(t, rhs);
                }
            }
            Stmt::Sassign(rewrite_expr(lhs, promoted), rhs)
        }
        Stmt::Sset(t, e) => Stmt::Sset(t, rewrite_expr(e, promoted)),
        Stmt::Scall(dest, callee, args) => Stmt::Scall(
            dest,
            rewrite_expr(callee, promoted),
            args.into_iter().map(|a| rewrite_expr(a, promoted)).collect(),
        ),
        Stmt::Sbuiltin(dest, b, args) => Stmt::Sbuiltin(
            dest,
            b,
            args.into_iter().map(|a| rewrite_expr(a, promoted)).collect(),
        ),
        Stmt::Ssequence(a, b) => Stmt::Ssequence(
            Box::new(rewrite_stmt(*a, promoted)),
            Box::new(rewrite_stmt(*b, promoted)),
        ),
        Stmt::Sifthenelse(c, a, b) => Stmt::Sifthenelse(
            rewrite_expr(c, promoted),
            Box::new(rewrite_stmt(*a, promoted)),
            Box::new(rewrite_stmt(*b, promoted)),
        ),
        Stmt::Sloop(body, cont) => Stmt::Sloop(
            Box::new(rewrite_stmt(*body, promoted)),
            Box::new(rewrite_stmt(*cont, promoted)),
        ),
        Stmt::Sreturn(e) => Stmt::Sreturn(e.map(|e| rewrite_expr(e, promoted))),
        Stmt::Sswitch(e, cases) => Stmt::Sswitch(
            rewrite_expr(e, promoted),
            cases
                .into_iter()
                .map(|case| SwitchCase {
                    value: case.value,
                    body: rewrite_stmt(case.body, promoted),
                })
                .collect(),
        ),
        Stmt::Slabel(l, inner) => Stmt::Slabel(l, Box::new(rewrite_stmt(*inner, promoted))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::clight::{IntSize, Signedness};
    use crate::symbols::symbol;

    fn int() -> CType {
        CType::Int(IntSize::I32, Signedness::Signed)
    }

    fn make_function(vars: Vec<(Symbol, CType)>, body: Stmt) -> Function {
        Function {
            ret: int(),
            params: vec![],
            param_temps: vec![],
            vars,
            temps: vec![],
            variadic: false,
            body,
        }
    }

    #[test]
    fn plain_local_is_promoted() {
        let x = symbol("x");
        let body = Stmt::seq(
            Stmt::Sassign(Expr::Evar(x, int()), Expr::EconstInt(1, int())),
            Stmt::Sreturn(Some(Expr::Evar(x, int()))),
        );
        let mut func = make_function(vec![(x, int())], body);
        run_function(&mut func);
        assert!(func.vars.is_empty());
        match &func.body {
            Stmt::Ssequence(a, b) => {
                assert!(matches!(**a, Stmt::Sset(..)));
                assert!(matches!(**b, Stmt::Sreturn(Some(Expr::Etempvar(..)))));
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn address_taken_local_is_kept() {
        // x = 5; p = &x; return x;  — keeps x a named variable.
        let x = symbol("x");
        let p = symbol("p");
        let pty = CType::Pointer(Box::new(int()));
        let body = Stmt::seq(
            Stmt::Sassign(Expr::Evar(x, int()), Expr::EconstInt(5, int())),
            Stmt::seq(
                Stmt::Sassign(
                    Expr::Evar(p, pty.clone()),
                    Expr::Eaddrof(Box::new(Expr::Evar(x, int())), pty.clone()),
                ),
                Stmt::Sreturn(Some(Expr::Evar(x, int()))),
            ),
        );
        let mut func = make_function(vec![(x, int()), (p, pty)], body);
        run_function(&mut func);
        // x stays, p is promoted.
        assert_eq!(func.vars.len(), 1);
        assert_eq!(func.vars[0].0, x);
    }

    #[test]
    fn address_taken_inside_nested_forms_is_found() {
        // if (0) { while (1) { q = &x; } }  — &x hides in nested blocks.
        let x = symbol("x");
        let q = symbol("q");
        let pty = CType::Pointer(Box::new(int()));
        let inner = Stmt::Sassign(
            Expr::Evar(q, pty.clone()),
            Expr::Eaddrof(Box::new(Expr::Evar(x, int())), pty.clone()),
        );
        let body = Stmt::Sifthenelse(
            Expr::EconstInt(0, int()),
            Box::new(Stmt::Sloop(Box::new(inner), Box::new(Stmt::Sskip))),
            Box::new(Stmt::Sskip),
        );
        let mut func = make_function(vec![(x, int()), (q, pty)], body);
        run_function(&mut func);
        assert_eq!(func.vars.len(), 1);
        assert_eq!(func.vars[0].0, x);
    }

    #[test]
    fn aggregates_stay_in_memory() {
        let a = symbol("a");
        let arr = CType::Array(Box::new(int()), 3);
        let mut func = make_function(vec![(a, arr)], Stmt::Sreturn(None));
        run_function(&mut func);
        assert_eq!(func.vars.len(), 1);
    }

    #[test]
    fn address_taken_param_gets_entry_copy() {
        let n = symbol("n");
        let pty = CType::Pointer(Box::new(int()));
        let body = Stmt::Sreturn(Some(Expr::Eaddrof(
            Box::new(Expr::Evar(n, int())),
            pty,
        )));
        let mut func = make_function(vec![], body);
        func.params = vec![(n, int())];
        run_function(&mut func);
        assert_eq!(func.param_temps.len(), 1);
        assert_eq!(func.vars.len(), 1);
        // Body begins with the store of the arrival temp to the stack home.
        match &func.body {
            Stmt::Ssequence(first, _) => {
                assert!(matches!(**first, Stmt::Sassign(..)));
            }
            other => panic!("missing entry copy: {:?}", other),
        }
    }
}
