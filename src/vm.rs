//! Bytecode interpreter: lockstep NFA simulation over logical threads.
//!
//! # Algorithm
//! At each input position the VM seeds a thread when the byte can begin a
//! match, steps every active thread until it consumes the byte or dies,
//! reconciles any match produced at this position, then swaps the active
//! and next lists. Threads are value-copied tuples; a Fork appends a
//! sibling to the active list, which the index-based iteration will reach
//! within the same byte.
//!
//! # Invariants
//! - A thread's `start` is the offset it was seeded at and never changes.
//! - `end` is half-open: a Match executing while byte `offset` is under
//!   examination records `end = offset`, one past the last consumed byte,
//!   so `end - start` is the hit length.
//! - The check bitset deduplicates threads at re-convergent states; bit 0
//!   is the dirty flag so an untouched bitset clears in O(1).
//! - `search` never flushes: all VM state except the input buffer survives
//!   block boundaries, which keeps the hit stream independent of block
//!   splits. `close_out` drains epsilon successors and the reconciliation
//!   buffer at true end of input.

use crate::api::{Hit, HitSink};
use crate::program::{Instruction, OpCode, Program};
use crate::stdx::DynamicBitSet;
use memchr::{memchr, memchr2, memchr3};
use std::sync::Arc;

const NO_LABEL: u32 = u32::MAX;
const NO_END: u64 = u64::MAX;

/// One live branch of the NFA simulation.
#[derive(Clone, Copy, Debug)]
struct Thread {
    pc: u32,
    label: u32,
    start: u64,
    end: u64,
}

/// Pending leftmost-longest candidate for one label.
#[derive(Clone, Copy, Debug)]
struct Pending {
    start: u64,
    end: u64,
}

enum Step {
    /// Re-enter the same byte (epsilon progress).
    Continue,
    /// Thread consumed the byte or is parked for the next one.
    Parked,
    Dead,
}

/// Strategy for advancing the cursor while no thread is live.
enum SeedFilter {
    /// At most three distinct first bytes: memchr straight to the next
    /// candidate.
    Few([u8; 3], usize),
    /// Wide first-byte set: consult the skip table at the minimal window
    /// end.
    Many,
}

/// Executes one compiled program against a byte stream.
///
/// The program is shared and immutable; all mutable search state lives
/// here. One `Vm` serves one search pass at a time but may be reused via
/// [`Vm::reset`].
pub struct Vm {
    prog: Arc<Program>,
    active: Vec<Thread>,
    next: Vec<Thread>,
    checks: DynamicBitSet,
    matches: Vec<Option<Pending>>,
    seed: SeedFilter,
}

impl Vm {
    pub fn new(prog: Arc<Program>) -> Self {
        let num_labels = prog.num_labels() as usize;
        let mut firsts = [0u8; 3];
        let mut n = 0usize;
        for b in prog.first_bytes.iter() {
            if n == 3 {
                n = 4;
                break;
            }
            firsts[n] = b;
            n += 1;
        }
        let seed = if (1..=3).contains(&n) {
            SeedFilter::Few(firsts, n)
        } else {
            SeedFilter::Many
        };
        Self {
            active: Vec::with_capacity(prog.len()),
            next: Vec::with_capacity(prog.len()),
            checks: DynamicBitSet::empty(prog.num_checked as usize),
            matches: vec![None; num_labels],
            prog,
            seed,
        }
    }

    /// Searches one block. `base` is the absolute offset of `buf[0]`;
    /// carried threads, check bits, and pending matches survive from the
    /// previous block. Returns whether any thread is still live (potential
    /// hits if more data follows).
    pub fn search(&mut self, buf: &[u8], base: u64, sink: &mut dyn HitSink) -> bool {
        let mut pos = 0usize;
        while pos < buf.len() {
            if self.active.is_empty() {
                match self.advance_cursor(buf, pos) {
                    Some(p) => pos = p,
                    None => break,
                }
                if pos >= buf.len() {
                    break;
                }
            }
            let byte = buf[pos];
            let offset = base + pos as u64;
            if self.prog.first_bytes.contains(byte) {
                self.active.push(Thread {
                    pc: 0,
                    label: NO_LABEL,
                    start: offset,
                    end: NO_END,
                });
            }
            let mut i = 0;
            while i < self.active.len() {
                let mut t = self.active[i];
                loop {
                    match exec(
                        &self.prog.insts,
                        &mut t,
                        &mut self.checks,
                        &mut self.active,
                        &mut self.next,
                        byte,
                        offset,
                    ) {
                        Step::Continue => continue,
                        Step::Parked | Step::Dead => break,
                    }
                }
                self.active[i] = t;
                if t.end == offset {
                    reconcile(&mut self.matches, &t, sink);
                }
                i += 1;
            }
            self.active.clear();
            std::mem::swap(&mut self.active, &mut self.next);
            if self.checks.is_set(0) {
                self.checks.clear_all();
            }
            pos += 1;
        }
        !self.active.is_empty()
    }

    /// Finishes the pass: runs carried threads through their remaining
    /// epsilon instructions at `end_offset` (the total input length),
    /// reconciles, then emits every pending candidate ordered by start
    /// offset and label. The VM is reset afterwards.
    pub fn close_out(&mut self, end_offset: u64, sink: &mut dyn HitSink) {
        let mut i = 0;
        while i < self.active.len() {
            let mut t = self.active[i];
            loop {
                match exec_eos(
                    &self.prog.insts,
                    &mut t,
                    &mut self.checks,
                    &mut self.active,
                    &mut self.next,
                    end_offset,
                ) {
                    Step::Continue => continue,
                    Step::Parked | Step::Dead => break,
                }
            }
            self.active[i] = t;
            if t.end == end_offset {
                reconcile(&mut self.matches, &t, sink);
            }
            i += 1;
        }

        let mut rest: Vec<(u64, u32, u64)> = self
            .matches
            .iter()
            .enumerate()
            .filter_map(|(label, cell)| cell.map(|p| (p.start, label as u32, p.end)))
            .collect();
        rest.sort_unstable();
        for (start, label, end) in rest {
            sink.on_hit(&Hit {
                offset: start,
                length: end - start,
                label,
            });
        }
        self.reset();
    }

    /// Discards all per-pass state (cancellation, or reuse for a new pass).
    pub fn reset(&mut self) {
        self.active.clear();
        self.next.clear();
        self.checks.clear_all();
        self.matches.fill(None);
    }

    /// With no live thread, returns the next position worth examining, or
    /// `None` when the rest of the block cannot seed a match.
    fn advance_cursor(&self, buf: &[u8], pos: usize) -> Option<usize> {
        match self.seed {
            SeedFilter::Few(bytes, n) => {
                let hay = &buf[pos..];
                let rel = match n {
                    1 => memchr(bytes[0], hay),
                    2 => memchr2(bytes[0], bytes[1], hay),
                    _ => memchr3(bytes[0], bytes[1], bytes[2], hay),
                }?;
                Some(pos + rel)
            }
            SeedFilter::Many => {
                let l_min = self.prog.l_min as usize;
                let mut p = pos;
                if l_min >= 2 {
                    // A shift of 1 carries no skip information; step
                    // normally.
                    while p + l_min - 1 < buf.len() {
                        let s = self.prog.skip.shift(buf[p + l_min - 1]);
                        if s <= 1 {
                            break;
                        }
                        p += s as usize;
                    }
                }
                Some(p)
            }
        }
    }
}

/// Single instruction dispatch. Returns whether the thread re-enters the
/// same byte, parked into `next`, or died.
fn exec(
    insts: &[Instruction],
    t: &mut Thread,
    checks: &mut DynamicBitSet,
    active: &mut Vec<Thread>,
    next: &mut Vec<Thread>,
    byte: u8,
    offset: u64,
) -> Step {
    let inst = insts[t.pc as usize];
    match inst.op {
        OpCode::Lit => {
            if byte == inst.b0 {
                t.pc += 1;
                next.push(*t);
                Step::Parked
            } else {
                Step::Dead
            }
        }
        OpCode::Either => {
            if byte == inst.b0 || byte == inst.b1 {
                t.pc += 1;
                next.push(*t);
                Step::Parked
            } else {
                Step::Dead
            }
        }
        OpCode::Range => {
            if inst.b0 <= byte && byte <= inst.b1 {
                t.pc += 1;
                next.push(*t);
                Step::Parked
            } else {
                Step::Dead
            }
        }
        OpCode::JumpTable => {
            // The table consumes the byte on the target's behalf; the
            // thread parks on the dispatch entry and its Jump runs as an
            // epsilon on the following byte.
            let entry = t.pc + 1 + byte as u32;
            if insts[entry as usize].op == OpCode::Halt {
                Step::Dead
            } else {
                t.pc = entry;
                next.push(*t);
                Step::Parked
            }
        }
        _ => exec_epsilon(inst, t, checks, active, offset),
    }
}

/// End-of-stream dispatch: byte-consuming opcodes park unfired; epsilon
/// opcodes run normally.
fn exec_eos(
    insts: &[Instruction],
    t: &mut Thread,
    checks: &mut DynamicBitSet,
    active: &mut Vec<Thread>,
    next: &mut Vec<Thread>,
    offset: u64,
) -> Step {
    let inst = insts[t.pc as usize];
    match inst.op {
        OpCode::Lit | OpCode::Either | OpCode::Range | OpCode::JumpTable => {
            next.push(*t);
            Step::Parked
        }
        _ => exec_epsilon(inst, t, checks, active, offset),
    }
}

fn exec_epsilon(
    inst: Instruction,
    t: &mut Thread,
    checks: &mut DynamicBitSet,
    active: &mut Vec<Thread>,
    offset: u64,
) -> Step {
    match inst.op {
        OpCode::Jump => {
            t.pc = inst.arg;
            Step::Continue
        }
        OpCode::Fork => {
            active.push(Thread {
                pc: inst.arg,
                ..*t
            });
            t.pc += 1;
            Step::Continue
        }
        OpCode::CheckBranch => {
            // Guards the following Fork: if another thread already claimed
            // the target this byte, skip the Fork entirely.
            if checks.is_set(inst.arg as usize) {
                t.pc += 2;
            } else {
                checks.set(inst.arg as usize);
                checks.set(0);
                t.pc += 1;
            }
            Step::Continue
        }
        OpCode::CheckHalt => {
            if checks.is_set(inst.arg as usize) {
                Step::Dead
            } else {
                checks.set(inst.arg as usize);
                checks.set(0);
                t.pc += 1;
                Step::Continue
            }
        }
        OpCode::Match => {
            t.label = inst.arg;
            t.end = offset;
            t.pc += 1;
            Step::Continue
        }
        OpCode::Halt => Step::Dead,
        OpCode::Lit | OpCode::Either | OpCode::Range | OpCode::JumpTable => {
            unreachable!("consuming opcode in epsilon dispatch")
        }
    }
}

/// Leftmost-longest reconciliation for one thread that matched at the
/// current offset.
fn reconcile(matches: &mut [Option<Pending>], t: &Thread, sink: &mut dyn HitSink) {
    debug_assert_ne!(t.label, NO_LABEL);
    let cell = &mut matches[t.label as usize];
    match cell {
        None => {
            *cell = Some(Pending {
                start: t.start,
                end: t.end,
            });
        }
        Some(prior) if prior.start == t.start && prior.end < t.end => {
            // Same start, longer match: extend.
            prior.end = t.end;
        }
        Some(prior) if prior.end <= t.start => {
            // Prior candidate is complete and disjoint: commit it.
            sink.on_hit(&Hit {
                offset: prior.start,
                length: prior.end - prior.start,
                label: t.label,
            });
            *cell = Some(Pending {
                start: t.start,
                end: t.end,
            });
        }
        // Overlapping candidate with a later start: the earlier one wins.
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::create_program;
    use crate::graph::{Graph, Predicate};

    fn literal_program(words: &[(&[u8], u32)]) -> Arc<Program> {
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
        Arc::new(create_program(&g).unwrap())
    }

    fn run(prog: &Arc<Program>, input: &[u8]) -> Vec<Hit> {
        let mut hits = Vec::new();
        let mut vm = Vm::new(prog.clone());
        let mut sink = |h: &Hit| hits.push(*h);
        vm.search(input, 0, &mut sink);
        vm.close_out(input.len() as u64, &mut sink);
        hits
    }

    #[test]
    fn finds_all_occurrences() {
        let prog = literal_program(&[(b"abc", 0)]);
        let hits = run(&prog, b"xabcyabc");
        assert_eq!(
            hits,
            vec![
                Hit { offset: 1, length: 3, label: 0 },
                Hit { offset: 5, length: 3, label: 0 },
            ]
        );
    }

    #[test]
    fn empty_input_is_clean() {
        let prog = literal_program(&[(b"abc", 0)]);
        assert!(run(&prog, b"").is_empty());
    }

    #[test]
    fn no_match_no_hits() {
        let prog = literal_program(&[(b"abc", 0)]);
        assert!(run(&prog, b"xyzzy").is_empty());
    }

    #[test]
    fn adjacent_matches_both_commit() {
        let prog = literal_program(&[(b"ab", 0)]);
        let hits = run(&prog, b"abab");
        assert_eq!(
            hits,
            vec![
                Hit { offset: 0, length: 2, label: 0 },
                Hit { offset: 2, length: 2, label: 0 },
            ]
        );
    }

    #[test]
    fn overlapping_same_label_keeps_leftmost() {
        // "aa" in "aaa": candidates at 0 and 1 overlap; leftmost wins.
        let prog = literal_program(&[(b"aa", 0)]);
        let hits = run(&prog, b"aaa");
        assert_eq!(hits, vec![Hit { offset: 0, length: 2, label: 0 }]);
    }

    #[test]
    fn state_carries_across_blocks() {
        let prog = literal_program(&[(b"abc", 0)]);
        let input = b"xabcyabc";
        for split in 0..=input.len() {
            let mut hits = Vec::new();
            let mut sink = |h: &Hit| hits.push(*h);
            let mut vm = Vm::new(prog.clone());
            vm.search(&input[..split], 0, &mut sink);
            vm.search(&input[split..], split as u64, &mut sink);
            vm.close_out(input.len() as u64, &mut sink);
            assert_eq!(
                hits,
                vec![
                    Hit { offset: 1, length: 3, label: 0 },
                    Hit { offset: 5, length: 3, label: 0 },
                ],
                "split at {split}"
            );
        }
    }

    #[test]
    fn same_start_prefers_longer() {
        let prog = literal_program(&[(b"ab", 0), (b"abc", 1)]);
        let hits = run(&prog, b"abcab");
        assert_eq!(
            hits,
            vec![
                Hit { offset: 0, length: 2, label: 0 },
                Hit { offset: 0, length: 3, label: 1 },
                Hit { offset: 3, length: 2, label: 0 },
            ]
        );
    }

    #[test]
    fn aho_corasick_example() {
        let prog = literal_program(&[(b"he", 0), (b"she", 1), (b"his", 2), (b"hers", 3)]);
        let hits = run(&prog, b"ushers");
        assert_eq!(
            hits,
            vec![
                Hit { offset: 1, length: 3, label: 1 },
                Hit { offset: 2, length: 2, label: 0 },
                Hit { offset: 2, length: 4, label: 3 },
            ]
        );
    }

    #[test]
    fn jump_table_program_matches() {
        let words: Vec<(Vec<u8>, u32)> = (0..300u32).map(|i| (vec![b'a'], i)).collect();
        let refs: Vec<(&[u8], u32)> = words.iter().map(|(w, l)| (w.as_slice(), *l)).collect();
        let prog = literal_program(&refs);
        let hits = run(&prog, b"xa");
        assert_eq!(hits.len(), 300);
        assert!(hits.iter().all(|h| h.offset == 1 && h.length == 1));
        // Same offset: labels ascend.
        assert!(hits.windows(2).all(|w| w[0].label < w[1].label));
    }

    #[test]
    fn reset_discards_pending() {
        let prog = literal_program(&[(b"ab", 0)]);
        let mut vm = Vm::new(prog);
        let mut hits = Vec::new();
        let mut sink = |h: &Hit| hits.push(*h);
        vm.search(b"ab", 0, &mut sink);
        vm.reset();
        vm.close_out(2, &mut sink);
        assert!(hits.is_empty(), "reset must drop the pending candidate");
    }
}
