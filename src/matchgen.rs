//! Sample-string enumeration: breadth-first walk of the pattern graph
//! producing example inputs each pattern set would match.
//!
//! Exploration is bounded three ways (string count, string length, total
//! expansions) so looping or class-heavy graphs terminate; within those
//! bounds the output is the deterministic sorted set of shortest matches.

use crate::graph::Graph;
use crate::stdx::ByteSet;
use std::collections::{BTreeSet, VecDeque};

/// Longest sample string the walk will build.
const MAX_SAMPLE_LEN: usize = 64;

/// Upper bound on (state, byte) expansions per enumeration.
const MAX_EXPANSIONS: usize = 1 << 17;

/// Collects up to `limit` distinct matched strings, shortest first within
/// the sorted order.
pub fn sample_matches(graph: &Graph, limit: usize) -> Vec<Vec<u8>> {
    let mut found: BTreeSet<Vec<u8>> = BTreeSet::new();
    if limit == 0 {
        return Vec::new();
    }

    let mut queue: VecDeque<(u32, Vec<u8>)> = VecDeque::new();
    queue.push_back((0, Vec::new()));
    let mut expansions = 0usize;

    while let Some((v, prefix)) = queue.pop_front() {
        if found.len() >= limit || expansions >= MAX_EXPANSIONS {
            break;
        }
        if prefix.len() >= MAX_SAMPLE_LEN {
            continue;
        }
        for w in graph.out_neighbors(v) {
            let mut bytes = ByteSet::empty();
            graph.predicate(w).accepting_bytes(&mut bytes);
            for b in bytes.iter() {
                expansions += 1;
                if expansions >= MAX_EXPANSIONS {
                    break;
                }
                let mut s = prefix.clone();
                s.push(b);
                if graph.is_match(w) {
                    found.insert(s.clone());
                    if found.len() >= limit {
                        return found.into_iter().collect();
                    }
                }
                queue.push_back((w, s));
            }
        }
    }
    found.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Pattern;
    use crate::compile::build_graph;

    fn graph_for(exprs: &[&str]) -> Graph {
        let patterns: Vec<Pattern> = exprs
            .iter()
            .map(|e| Pattern {
                expr: e.to_string(),
                fixed_string: false,
                case_insensitive: false,
                index: 0,
                encoding: "ASCII".to_string(),
            })
            .collect();
        build_graph(&patterns).unwrap().0
    }

    #[test]
    fn literal_sample_is_the_literal() {
        let g = graph_for(&["abc"]);
        assert_eq!(sample_matches(&g, 10), vec![b"abc".to_vec()]);
    }

    #[test]
    fn alternation_enumerates_both() {
        let g = graph_for(&["ab|cd"]);
        assert_eq!(
            sample_matches(&g, 10),
            vec![b"ab".to_vec(), b"cd".to_vec()]
        );
    }

    #[test]
    fn repetition_is_bounded_by_limit() {
        let g = graph_for(&["a+"]);
        let samples = sample_matches(&g, 3);
        assert_eq!(samples.len(), 3);
        assert!(samples.contains(&b"a".to_vec()));
        assert!(samples.contains(&b"aa".to_vec()));
    }

    #[test]
    fn class_expands_each_byte() {
        let g = graph_for(&["[ab]c"]);
        assert_eq!(
            sample_matches(&g, 10),
            vec![b"ac".to_vec(), b"bc".to_vec()]
        );
    }
}
