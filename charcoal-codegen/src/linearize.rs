//! Basic-block linearisation.
//!
//! Picks a total order on the LTL blocks that minimises taken branches:
//! starting from the entry, each chain greedily follows the fall-through
//! successor (the branch target, or the false leg of a conditional) until
//! it hits a visited block; the other legs are queued and seed later
//! chains. Unreachable blocks are dropped.

use crate::ir::ltl::{Function, Inst};
use crate::ir::rtl::Node;

/// The emission order of the blocks of `func`.
pub fn order(func: &Function) -> Vec<Node> {
    let mut visited = vec![false; func.code.len()];
    let mut out = Vec::with_capacity(func.code.len());
    let mut work = vec![func.entry];

    while let Some(start) = work.pop() {
        let mut cur = start;
        while !visited[cur.as_u32() as usize] {
            visited[cur.as_u32() as usize] = true;
            out.push(cur);

            let block = &func.code[cur];
            let term = block
                .body
                .last()
                .expect("linearize: empty basic block");
            match term {
                Inst::Lbranch(t) => cur = *t,
                Inst::Lcond { ifso, ifnot, .. } => {
                    work.push(*ifso);
                    cur = *ifnot;
                }
                Inst::Ljumptable { targets, .. } => {
                    for &t in targets {
                        work.push(t);
                    }
                    break;
                }
                Inst::Lreturn | Inst::Ltailcall { .. } => break,
                other => panic!("linearize: non-terminator {} ends a block", other),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ltl::BBlock;
    use crate::ir::op::Condition;
    use crate::ir::types::{Comparison, Signature};
    use crate::isa::arm64::Mreg;
    use charcoal_entity::PrimaryMap;
    use smallvec::smallvec;

    fn func_with(blocks: Vec<BBlock>, entry: u32) -> Function {
        Function {
            sig: Signature::void(),
            entry: Node::from_u32(entry),
            code: blocks.into_iter().collect::<PrimaryMap<Node, BBlock>>(),
            stackdata: 0,
            locals_size: 0,
            outgoing_size: 0,
            used_callee_saved: vec![],
            has_calls: false,
        }
    }

    fn branch_to(n: u32) -> BBlock {
        BBlock {
            body: vec![Inst::Lbranch(Node::from_u32(n))],
        }
    }

    fn ret() -> BBlock {
        BBlock {
            body: vec![Inst::Lreturn],
        }
    }

    #[test]
    fn chains_follow_fallthrough() {
        // 0 -> 2 -> 1(ret); block 3 unreachable.
        let func = func_with(vec![branch_to(2), ret(), branch_to(1), ret()], 0);
        let order = order(&func);
        assert_eq!(
            order,
            vec![Node::from_u32(0), Node::from_u32(2), Node::from_u32(1)]
        );
    }

    #[test]
    fn cond_prefers_false_leg() {
        // 0: if ... -> 1 else 2; the false leg should follow directly.
        let cond = BBlock {
            body: vec![Inst::Lcond {
                cond: Condition::Ccompimm(Comparison::Eq, 0),
                args: smallvec![Mreg::X0],
                ifso: Node::from_u32(1),
                ifnot: Node::from_u32(2),
            }],
        };
        let func = func_with(vec![cond, ret(), ret()], 0);
        let order = order(&func);
        assert_eq!(order[0], Node::from_u32(0));
        assert_eq!(order[1], Node::from_u32(2));
        assert_eq!(order[2], Node::from_u32(1));
    }
}
