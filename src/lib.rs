//! Multi-pattern streaming byte search engine.
//!
//! Keyword patterns (literal or a small regex dialect) compile through a
//! shared NFA into a flat bytecode program; a logical-thread VM executes it
//! one input byte at a time and reports every occurrence of any pattern as
//! `(offset, length, label)` with leftmost-longest selection per label.
//! The input can be gigabytes long: the search controller streams it in
//! blocks, overlapping reads with compute, and the VM carries its state
//! across block boundaries so hits never depend on where a block ends.
//!
//! # Flow
//! 1. Intake lines become [`Pattern`]s, one per requested encoding.
//! 2. [`compile`] parses each into an NFA fragment, merges them behind one
//!    start state, optionally collapses shared prefixes, and lowers the
//!    graph to a [`Program`].
//! 3. A [`Vm`] plus [`SearchController`] run the program over a stream,
//!    emitting [`Hit`]s into a caller-supplied [`HitSink`].
//!
//! The program and its tables are immutable after compilation and may be
//! shared across concurrent searches; each search owns its own `Vm`.

pub mod analysis;
pub mod api;
pub mod codegen;
pub mod compile;
pub mod encoding;
pub mod error;
pub mod graph;
pub mod matchgen;
pub mod parse;
pub mod pipeline;
pub mod program;
pub mod stdx;
pub mod vm;

pub use api::{parse_pattern_line, Hit, HitCounter, HitSink, Pattern, PatternDefaults, PatternMap};
pub use compile::{build_graph, compile, determinize, Compiled, CompileOptions};
pub use error::{Error, Result};
pub use pipeline::{SearchController, SearchStats, DEFAULT_BLOCK_SIZE};
pub use program::Program;
pub use vm::Vm;
