//! Lowers the NFA into the linear bytecode program.
//!
//! # Algorithm
//! 1. Discovery: deterministic DFS from state 0 assigns each state a
//!    discover rank; states with more than one in-edge get a check index.
//! 2. Sizing: each state's snippet is measured (transition eval, optional
//!    Match, fork/jump tail or jump table) and assigned its start offset in
//!    discover-rank order.
//! 3. Emission: instructions are written into the preallocated stream;
//!    every snippet is verified against its measured size.
//!
//! # Invariants
//! - An edge to the state discovered immediately after the current one is a
//!   fallthrough: no instruction is emitted and the thread runs off the end
//!   of the snippet into the next one.
//! - The last non-fallthrough edge of a snippet without fallthrough is a
//!   tail-call Jump; every other encoded edge is a Fork.
//! - A snippet whose naive total would exceed [`JUMP_TABLE_THRESHOLD`]
//!   slots is emitted as a 256-entry jump table plus an indirect section
//!   for bytes leading to multiple targets.
//! - Sizing and emission must agree instruction-for-instruction; any
//!   mismatch aborts with `InvariantViolation`.

use crate::analysis::{bfs_depths, first_bytes, min_match_length, SkipTable};
use crate::error::{Error, Result};
use crate::graph::{Graph, Predicate, StateId};
use crate::program::{Instruction, Program};

const UNALLOCATED: u32 = u32::MAX;

/// Snippet size beyond which a state's out-edges are encoded as a jump
/// table instead of a fork/jump tail.
const JUMP_TABLE_THRESHOLD: u32 = 256;

/// Layout record for one state.
#[derive(Clone, Copy, Debug)]
struct Snippet {
    start: u32,
    num_eval: u32,
    num_match: u32,
    num_tail: u32,
    check_index: u32,
    jump_table: bool,
}

impl Snippet {
    fn total(&self) -> u32 {
        self.num_eval + self.num_match + self.num_tail
    }

    /// First instruction after the transition eval; jump-table entries
    /// target this so the dispatching table consumes the byte on the
    /// target's behalf.
    fn post_eval(&self) -> u32 {
        self.start + self.num_eval
    }
}

/// Deterministic DFS preorder. The first out-edge is pushed last so it is
/// discovered next, which is what makes fallthrough chains contiguous.
fn discover(graph: &Graph) -> (Vec<StateId>, Vec<u32>) {
    let n = graph.num_states();
    let mut rank = vec![UNALLOCATED; n];
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![0 as StateId];
    while let Some(v) = stack.pop() {
        if rank[v as usize] != UNALLOCATED {
            continue;
        }
        rank[v as usize] = order.len() as u32;
        order.push(v);
        let outs: Vec<StateId> = graph.out_neighbors(v).collect();
        for &w in outs.iter().rev() {
            if rank[w as usize] == UNALLOCATED {
                stack.push(w);
            }
        }
    }
    (order, rank)
}

/// Per-byte target lists for a jump-table state, in edge order, deduped.
fn pivot_states(graph: &Graph, v: StateId) -> Vec<Vec<StateId>> {
    let mut tbl: Vec<Vec<StateId>> = vec![Vec::new(); 256];
    for w in graph.out_neighbors(v) {
        let mut bytes = crate::stdx::ByteSet::empty();
        graph.predicate(w).accepting_bytes(&mut bytes);
        for b in bytes.iter() {
            let row = &mut tbl[b as usize];
            if !row.contains(&w) {
                row.push(w);
            }
        }
    }
    tbl
}

fn naive_tail_size(graph: &Graph, v: StateId, rank: &[u32], checks: &[u32]) -> u32 {
    if graph.out_degree(v) == 0 {
        return 1; // Halt
    }
    let mut size = 0u32;
    let mut fall = None;
    for w in graph.out_neighbors(v) {
        if rank[w as usize] == rank[v as usize] + 1 {
            fall = Some(w);
            continue;
        }
        size += 1;
        if checks[w as usize] != UNALLOCATED {
            size += 1;
        }
    }
    if let Some(w) = fall {
        if checks[w as usize] != UNALLOCATED {
            size += 1;
        }
    }
    size
}

fn jump_table_tail_size(graph: &Graph, v: StateId) -> u32 {
    let tbl = pivot_states(graph, v);
    let indirect: u32 = tbl
        .iter()
        .filter(|row| row.len() > 1)
        .map(|row| row.len() as u32)
        .sum();
    1 + 256 + indirect
}

/// Lowers `graph` into a [`Program`]. The graph must be fully reachable
/// from state 0 and contain at least one accepting state.
pub fn create_program(graph: &Graph) -> Result<Program> {
    let (order, rank) = discover(graph);
    if order.len() != graph.num_states() {
        return Err(Error::InvariantViolation(format!(
            "{} of {} states unreachable from start",
            graph.num_states() - order.len(),
            graph.num_states()
        )));
    }

    // Check indices dedup threads at re-convergent states.
    let mut checks = vec![UNALLOCATED; graph.num_states()];
    let mut num_checked = 1u32; // index 0 is the dirty flag
    for &v in &order {
        if graph.in_degree(v) > 1 {
            checks[v as usize] = num_checked;
            num_checked += 1;
        }
    }

    // Sizing pass, in discover-rank order.
    let mut snippets = vec![
        Snippet {
            start: 0,
            num_eval: 0,
            num_match: 0,
            num_tail: 0,
            check_index: UNALLOCATED,
            jump_table: false,
        };
        graph.num_states()
    ];
    let mut guard = 0u32;
    for &v in &order {
        let num_eval = if v == 0 { 0 } else { 1 };
        let num_match = if graph.is_match(v) { 1 } else { 0 };
        let naive = naive_tail_size(graph, v, &rank, &checks);
        let (num_tail, jump_table) = if num_eval + num_match + naive > JUMP_TABLE_THRESHOLD {
            (jump_table_tail_size(graph, v), true)
        } else {
            (naive, false)
        };
        snippets[v as usize] = Snippet {
            start: guard,
            num_eval,
            num_match,
            num_tail,
            check_index: checks[v as usize],
            jump_table,
        };
        guard += num_eval + num_match + num_tail;
    }

    // Emission pass.
    let mut insts = vec![Instruction::halt(); guard as usize];
    for &v in &order {
        let snip = snippets[v as usize];
        let mut cur = snip.start as usize;

        match graph.predicate(v) {
            Predicate::Start => debug_assert_eq!(v, 0),
            Predicate::Lit(b) => {
                insts[cur] = Instruction::lit(b);
                cur += 1;
            }
            Predicate::Either(a, b) => {
                insts[cur] = Instruction::either(a, b);
                cur += 1;
            }
            Predicate::Range(lo, hi) => {
                insts[cur] = Instruction::range(lo, hi);
                cur += 1;
            }
        }
        if let Some(label) = graph.label(v) {
            insts[cur] = Instruction::match_(label);
            cur += 1;
        }

        if snip.jump_table {
            cur = emit_jump_table(graph, v, &snippets, &mut insts, cur);
        } else {
            cur = emit_fork_tail(graph, v, &rank, &snippets, &mut insts, cur);
        }

        let expected = (snip.start + snip.total()) as usize;
        if cur != expected {
            return Err(Error::InvariantViolation(format!(
                "snippet for state {v} wrote to {cur}, sized to {expected}"
            )));
        }
    }

    let depths = bfs_depths(graph);
    let l_min = min_match_length(graph, &depths).ok_or_else(|| {
        Error::InvariantViolation("program has no accepting state".to_string())
    })?;

    Ok(Program {
        insts,
        num_checked,
        first_bytes: first_bytes(graph),
        skip: SkipTable::build(graph, &depths, l_min),
        l_min,
    })
}

/// Straight-line tail: Fork per non-fallthrough edge, the last one a
/// tail-call Jump when nothing falls through, check guards in front of
/// checked targets, and a trailing CheckHalt for a checked fallthrough.
fn emit_fork_tail(
    graph: &Graph,
    v: StateId,
    rank: &[u32],
    snippets: &[Snippet],
    insts: &mut [Instruction],
    mut cur: usize,
) -> usize {
    if graph.out_degree(v) == 0 {
        insts[cur] = Instruction::halt();
        return cur + 1;
    }

    let outs: Vec<StateId> = graph.out_neighbors(v).collect();
    let mut fall: Option<StateId> = None;
    for (i, &w) in outs.iter().enumerate() {
        if rank[w as usize] == rank[v as usize] + 1 {
            fall = Some(w);
            continue;
        }
        let terminal = i + 1 == outs.len() && fall.is_none();
        let target = snippets[w as usize];
        if target.check_index != UNALLOCATED {
            insts[cur] = if terminal {
                Instruction::check_halt(target.check_index)
            } else {
                Instruction::check_branch(target.check_index)
            };
            cur += 1;
        }
        insts[cur] = if terminal {
            Instruction::jump(target.start)
        } else {
            Instruction::fork(target.start)
        };
        cur += 1;
    }
    if let Some(w) = fall {
        let target = snippets[w as usize];
        if target.check_index != UNALLOCATED {
            insts[cur] = Instruction::check_halt(target.check_index);
            cur += 1;
        }
    }
    cur
}

/// 256-entry dispatch: Halt for dead bytes, a direct Jump past the target's
/// eval for single-target bytes, and a Jump into the indirect fork section
/// for bytes with several targets.
fn emit_jump_table(
    graph: &Graph,
    v: StateId,
    snippets: &[Snippet],
    insts: &mut [Instruction],
    cur: usize,
) -> usize {
    let tbl = pivot_states(graph, v);
    insts[cur] = Instruction::jump_table();
    let entries = cur + 1;
    let mut indirect = entries + 256;
    for (b, row) in tbl.iter().enumerate() {
        insts[entries + b] = match row.len() {
            0 => Instruction::halt(),
            1 => Instruction::jump(snippets[row[0] as usize].post_eval()),
            _ => {
                let entry = Instruction::jump(indirect as u32);
                for (j, &w) in row.iter().enumerate() {
                    let addr = snippets[w as usize].post_eval();
                    insts[indirect] = if j + 1 == row.len() {
                        Instruction::jump(addr)
                    } else {
                        Instruction::fork(addr)
                    };
                    indirect += 1;
                }
                entry
            }
        };
    }
    indirect
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Predicate;
    use crate::program::OpCode;

    fn literal_graph(words: &[(&[u8], u32)]) -> Graph {
        let mut g = Graph::new();
        for &(word, label) in words {
            let mut prev = 0;
            for &b in word {
                let s = g.add_state();
                g.set_predicate(s, Predicate::Lit(b));
                g.add_edge(prev, s);
                prev = s;
            }
            g.set_label(prev, label);
        }
        g
    }

    #[test]
    fn single_literal_layout() {
        let g = literal_graph(&[(b"ab", 0)]);
        let prog = create_program(&g).unwrap();
        // Start snippet is empty (single out-edge is fallthrough), then
        // Lit a, Lit b, Match, Halt.
        let ops: Vec<OpCode> = prog.insts.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![OpCode::Lit, OpCode::Lit, OpCode::Match, OpCode::Halt]
        );
        assert_eq!(prog.insts[0].b0, b'a');
        assert_eq!(prog.insts[1].b0, b'b');
        assert_eq!(prog.insts[2].arg, 0);
        assert_eq!(prog.l_min, 2);
        assert_eq!(prog.num_checked, 1);
    }

    #[test]
    fn two_patterns_fork_from_start() {
        let g = literal_graph(&[(b"ab", 0), (b"cd", 1)]);
        let prog = create_program(&g).unwrap();
        // First chain falls through, so the start snippet is a single Fork
        // to the second chain.
        assert_eq!(prog.insts[0].op, OpCode::Fork);
        assert!(prog.first_bytes.contains(b'a'));
        assert!(prog.first_bytes.contains(b'c'));
        assert!(!prog.first_bytes.contains(b'b'));
    }

    #[test]
    fn convergent_state_gets_check() {
        // Two edges into one state: (ab|cb) via shared trailing state.
        let mut g = Graph::new();
        let a = g.add_state();
        let c = g.add_state();
        let b = g.add_state();
        g.set_predicate(a, Predicate::Lit(b'a'));
        g.set_predicate(c, Predicate::Lit(b'c'));
        g.set_predicate(b, Predicate::Lit(b'b'));
        g.add_edge(0, a);
        g.add_edge(0, c);
        g.add_edge(a, b);
        g.add_edge(c, b);
        g.set_label(b, 0);
        let prog = create_program(&g).unwrap();
        assert_eq!(prog.num_checked, 2);
        assert!(prog
            .insts
            .iter()
            .any(|i| i.op == OpCode::CheckHalt || i.op == OpCode::CheckBranch));
    }

    #[test]
    fn wide_fanout_uses_jump_table() {
        // 300 single-byte patterns forces the start tail over the
        // threshold.
        let words: Vec<(Vec<u8>, u32)> = (0..300u32).map(|i| (vec![b'a'], i)).collect();
        let refs: Vec<(&[u8], u32)> = words.iter().map(|(w, l)| (w.as_slice(), *l)).collect();
        let g = literal_graph(&refs);
        let prog = create_program(&g).unwrap();
        assert_eq!(prog.insts[0].op, OpCode::JumpTable);
        // Entry for 'a' routes to the indirect section (multiple targets).
        let entry = prog.insts[1 + b'a' as usize];
        assert_eq!(entry.op, OpCode::Jump);
        assert!(entry.arg as usize >= 257);
        // Dead byte entries halt.
        assert_eq!(prog.insts[1 + b'z' as usize].op, OpCode::Halt);
    }

    #[test]
    fn unreachable_state_is_rejected() {
        let mut g = literal_graph(&[(b"a", 0)]);
        let orphan = g.add_state();
        g.set_predicate(orphan, Predicate::Lit(b'z'));
        assert!(matches!(
            create_program(&g),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn addresses_stay_in_bounds() {
        let g = literal_graph(&[(b"ab", 0), (b"abc", 1), (b"cb", 2)]);
        let prog = create_program(&g).unwrap();
        for inst in &prog.insts {
            match inst.op {
                OpCode::Jump | OpCode::Fork => {
                    assert!((inst.arg as usize) < prog.len());
                }
                OpCode::CheckBranch | OpCode::CheckHalt => {
                    assert!(inst.arg >= 1 && inst.arg < prog.num_checked);
                }
                _ => {}
            }
        }
    }
}
