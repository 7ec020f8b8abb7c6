//! Compilation pipeline: pattern intake to executable program.
//!
//! Per-pattern fragments from the parser are offset-copied into one shared
//! graph so every pattern runs simultaneously from the common start state.
//! Pattern-level failures are collected, not thrown: a compile succeeds if
//! at least one pattern survives.
//!
//! # Invariants
//! - Labels are dense and assigned in merge order; `PatternMap` entry `i`
//!   describes label `i`.
//! - A failed pattern leaves the combined graph untouched.
//! - Determinization never changes the matched language or labels, only
//!   the state count and fan-out.

use crate::api::{Pattern, PatternMap, PatternMapEntry};
use crate::codegen::create_program;
use crate::encoding::encoding_by_name;
use crate::error::{Error, Result};
use crate::graph::{Graph, StateId};
use crate::parse::{ParseFail, ParsedPattern, Parser};
use crate::program::Program;
use ahash::AHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Compile-time switches.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompileOptions {
    /// Collapse shared prefixes by subset construction before layout.
    pub determinize: bool,
}

/// Output of a successful compile.
pub struct Compiled {
    pub program: Arc<Program>,
    pub map: PatternMap,
    /// Pattern-level failures; the corresponding patterns are simply
    /// absent from the program.
    pub errors: Vec<Error>,
    /// State count of the graph the program was generated from.
    pub num_states: usize,
}

/// Copies a parsed fragment into the combined graph: states offset, label
/// stamped on the accepting states, start edges added to the entry states.
fn merge_fragment(graph: &mut Graph, parsed: &ParsedPattern, label: u32) {
    let src = &parsed.graph;
    // Scratch state 0 is a placeholder; fragment states are 1.. and map to
    // freshly appended combined states.
    let base = graph.num_states() as StateId;
    let map = |v: StateId| base + v - 1;
    for v in 1..src.num_states() as StateId {
        let nv = graph.add_state();
        debug_assert_eq!(nv, map(v));
        graph.set_predicate(nv, src.predicate(v));
    }
    for v in 1..src.num_states() as StateId {
        for w in src.out_neighbors(v) {
            graph.add_edge(map(v), map(w));
        }
    }
    for &l in &parsed.lasts {
        graph.set_label(map(l), label);
    }
    for &f in &parsed.firsts {
        graph.add_edge(0, map(f));
    }
}

/// Parses and merges `patterns` into a single shared NFA.
///
/// Returns the graph, the label map, and the collected pattern-level
/// errors. Fails with [`Error::EmptyPatternSet`] when nothing compiled.
pub fn build_graph(patterns: &[Pattern]) -> Result<(Graph, PatternMap, Vec<Error>)> {
    let mut graph = Graph::new();
    let mut map = PatternMap::default();
    let mut errors = Vec::new();

    for pat in patterns {
        let Some(enc) = encoding_by_name(&pat.encoding) else {
            errors.push(Error::Encoding {
                index: pat.index,
                pattern: pat.expr.clone(),
                encoding: pat.encoding.clone(),
                msg: "unknown encoding".to_string(),
            });
            continue;
        };
        match Parser::new(enc, pat.case_insensitive).parse(&pat.expr, pat.fixed_string) {
            Ok(parsed) => {
                let label = map.push(PatternMapEntry {
                    pattern_index: pat.index,
                    pattern: pat.expr.clone(),
                    encoding: enc.name().to_string(),
                });
                merge_fragment(&mut graph, &parsed, label);
                debug!(label, pattern = %pat.expr, encoding = enc.name(), "merged pattern");
            }
            Err(ParseFail::Syntax(msg)) => errors.push(Error::PatternParse {
                index: pat.index,
                pattern: pat.expr.clone(),
                msg,
            }),
            Err(ParseFail::Encoding(msg)) => errors.push(Error::Encoding {
                index: pat.index,
                pattern: pat.expr.clone(),
                encoding: enc.name().to_string(),
                msg,
            }),
        }
    }

    if map.is_empty() {
        return Err(Error::EmptyPatternSet);
    }
    Ok((graph, map, errors))
}

/// Subset construction restricted to identical (predicate, label) siblings.
///
/// Collapses shared prefixes (the dominant redundancy in keyword sets)
/// without ever conflating distinct labels or byte classes. The result is
/// compact: only reachable states are emitted.
pub fn determinize(graph: &Graph) -> Graph {
    type Key = (crate::graph::Predicate, Option<u32>);

    let mut out = Graph::new();
    let mut memo: AHashMap<Vec<StateId>, StateId> = AHashMap::new();
    let mut queue: VecDeque<(Vec<StateId>, StateId)> = VecDeque::new();
    memo.insert(vec![0], 0);
    queue.push_back((vec![0], 0));

    while let Some((set, nv)) = queue.pop_front() {
        // Group successors by (predicate, label) in first-occurrence order
        // so the output edge order is deterministic.
        let mut groups: Vec<(Key, Vec<StateId>)> = Vec::new();
        for &v in &set {
            for w in graph.out_neighbors(v) {
                let key = (graph.predicate(w), graph.label(w));
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => {
                        if !members.contains(&w) {
                            members.push(w);
                        }
                    }
                    None => groups.push((key, vec![w])),
                }
            }
        }
        for ((pred, label), mut members) in groups {
            members.sort_unstable();
            members.dedup();
            let target = match memo.get(&members) {
                Some(&t) => t,
                None => {
                    let t = out.add_state();
                    out.set_predicate(t, pred);
                    if let Some(l) = label {
                        out.set_label(t, l);
                    }
                    memo.insert(members.clone(), t);
                    queue.push_back((members, t));
                    t
                }
            };
            out.add_edge(nv, target);
        }
    }
    out
}

/// Full pipeline: intake to program.
pub fn compile(patterns: &[Pattern], opts: CompileOptions) -> Result<Compiled> {
    let (mut graph, map, errors) = build_graph(patterns)?;
    if opts.determinize {
        let before = graph.num_states();
        graph = determinize(&graph);
        debug!(before, after = graph.num_states(), "determinized");
    }
    let program = create_program(&graph)?;
    info!(
        patterns = map.len(),
        states = graph.num_states(),
        instructions = program.len(),
        l_min = program.l_min,
        "compiled pattern set"
    );
    Ok(Compiled {
        program: Arc::new(program),
        map,
        errors,
        num_states: graph.num_states(),
    })
}
