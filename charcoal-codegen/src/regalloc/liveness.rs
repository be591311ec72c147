//! Liveness analysis on the RTL control-flow graph.
//!
//! Standard backward dataflow:
//!
//! ```text
//! liveIn[n]  = use[n] ∪ (liveOut[n] − def[n])
//! liveOut[n] = ⋃ over successors s of liveIn[s]
//! ```
//!
//! iterated to a fixed point. The equations are monotone over finite
//! sets, so the round-robin iteration below terminates.

use crate::ir::rtl::{Function, Node};
use crate::regalloc::set::RegBitSet;

/// Live-in and live-out sets for every node of one function.
pub struct Liveness {
    /// Registers live on entry to each node, indexed by node.
    pub live_in: Vec<RegBitSet>,
    /// Registers live on exit from each node, indexed by node.
    pub live_out: Vec<RegBitSet>,
}

impl Liveness {
    /// The live-out set of `n`.
    pub fn out(&self, n: Node) -> &RegBitSet {
        &self.live_out[n.as_u32() as usize]
    }
}

/// Compute liveness for `func`.
pub fn compute(func: &Function) -> Liveness {
    let n = func.code.len();
    let nregs = func.reg_types.len();
    let mut live_in = vec![RegBitSet::with_capacity(nregs); n];
    let mut live_out = vec![RegBitSet::with_capacity(nregs); n];

    // Iterating the nodes in reverse creation order approximates reverse
    // program order well enough that few rounds are needed.
    let mut changed = true;
    let mut rounds = 0;
    while changed {
        changed = false;
        rounds += 1;
        for node in func.code.keys().rev() {
            let i = node.as_u32() as usize;
            let inst = &func.code[node];

            let mut out = RegBitSet::with_capacity(nregs);
            for succ in inst.successors() {
                out.union_with(&live_in[succ.as_u32() as usize]);
            }

            let mut inn = out.clone();
            if let Some(d) = inst.def() {
                inn.remove(d);
            }
            for u in inst.uses() {
                inn.insert(u);
            }

            if out != live_out[i] {
                live_out[i] = out;
                changed = true;
            }
            if inn != live_in[i] {
                live_in[i] = inn;
                changed = true;
            }
        }
    }
    log::trace!("liveness: fixed point after {} rounds", rounds);

    Liveness { live_in, live_out }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::op::{Condition, Operation};
    use crate::ir::rtl::Inst;
    use crate::ir::types::{Comparison, Signature, Type};
    use charcoal_entity::PrimaryMap;
    use smallvec::smallvec;

    fn new_func() -> Function {
        Function {
            sig: Signature::void(),
            params: vec![],
            stacksize: 0,
            code: PrimaryMap::new(),
            entry: Node::from_u32(0),
            reg_types: PrimaryMap::new(),
            spill_slots: PrimaryMap::new(),
        }
    }

    #[test]
    fn straight_line() {
        // n2: return a      (a live in)
        // n1: a = b + c -> n2
        // n0: nop -> n1
        let mut f = new_func();
        let a = f.new_reg(Type::I32);
        let b = f.new_reg(Type::I32);
        let c = f.new_reg(Type::I32);
        let n2 = f.add_instr(Inst::Ireturn(Some(a)));
        let n1 = f.add_instr(Inst::Iop {
            op: Operation::Oadd,
            args: smallvec![b, c],
            dest: a,
            succ: n2,
        });
        let n0 = f.add_instr(Inst::Inop { succ: n1 });
        f.entry = n0;

        let live = compute(&f);
        // b and c are live into the add, a is not (it is defined there).
        assert!(live.live_in[n1.as_u32() as usize].contains(b));
        assert!(live.live_in[n1.as_u32() as usize].contains(c));
        assert!(!live.live_in[n1.as_u32() as usize].contains(a));
        // a is live out of the add.
        assert!(live.out(n1).contains(a));
        // Everything b, c flows into the entry nop.
        assert!(live.live_in[n0.as_u32() as usize].contains(b));
    }

    #[test]
    fn loop_keeps_register_alive() {
        // n0: i = 0 -> n1
        // n1: if (i < 10) -> n2 else n3
        // n2: i = i + 1 -> n1
        // n3: return
        let mut f = new_func();
        let i = f.new_reg(Type::I32);
        let n3 = f.add_instr(Inst::Ireturn(None));
        let n1 = f.add_instr(Inst::Inop {
            succ: Node::from_u32(0),
        });
        let n2 = f.add_instr(Inst::Iop {
            op: Operation::Oaddimm(1),
            args: smallvec![i],
            dest: i,
            succ: n1,
        });
        f.code[n1] = Inst::Icond {
            cond: Condition::Ccompimm(Comparison::Lt, 10),
            args: smallvec![i],
            ifso: n2,
            ifnot: n3,
        };
        let n0 = f.add_instr(Inst::Iop {
            op: Operation::Ointconst(0),
            args: smallvec![],
            dest: i,
            succ: n1,
        });
        f.entry = n0;

        let live = compute(&f);
        // i is live around the loop: out of its increment and out of the
        // initialisation.
        assert!(live.out(n2).contains(i));
        assert!(live.out(n0).contains(i));
        // Dead after the exit branch is taken.
        assert!(live.live_in[n3.as_u32() as usize].is_empty());
    }
}
