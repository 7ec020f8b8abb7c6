//! Streaming search controller: block reads overlapped with VM compute.
//!
//! While the VM searches block N, a scoped reader thread fills block N+1
//! into the second buffer; joining the reader at the block boundary is the
//! one synchronization point per block. The VM is stateful across blocks
//! (threads, check bits, pending matches all survive), so hits are
//! independent of where the block boundaries fall; only the running base
//! offset moves.
//!
//! # Invariants
//! - `read_full` returns short only at end of input, so a short block is
//!   the last block even on pipes.
//! - Cancellation is honored between blocks; the VM state is discarded.
//! - `close_out` runs exactly once, after the final block.

use crate::api::HitSink;
use crate::error::Result;
use crate::vm::Vm;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default block size (bytes).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Counters for one finished (or cancelled) pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchStats {
    pub bytes_searched: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

/// Feeds a byte stream to a [`Vm`] in double-buffered blocks.
pub struct SearchController {
    block_size: usize,
}

impl SearchController {
    /// # Panics
    /// Panics if `block_size` is zero.
    pub fn new(block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be > 0");
        Self { block_size }
    }

    /// Searches `input` to end of stream, emitting hits into `sink`.
    ///
    /// `cancel` is polled between blocks; on cancellation the VM discards
    /// its state and the stats report how far the search got.
    pub fn search<R: Read + Send + ?Sized>(
        &self,
        input: &mut R,
        vm: &mut Vm,
        sink: &mut dyn HitSink,
        cancel: Option<&AtomicBool>,
    ) -> Result<SearchStats> {
        let clock = Instant::now();
        let mut cur = vec![0u8; self.block_size];
        let mut next = vec![0u8; self.block_size];
        let mut offset = 0u64;

        let mut len = read_full(input, &mut cur)?;
        while len > 0 {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                vm.reset();
                return Ok(SearchStats {
                    bytes_searched: offset,
                    elapsed: clock.elapsed(),
                    cancelled: true,
                });
            }

            let next_len = if len == self.block_size {
                // Prefetch the next block while this one is searched; the
                // join is the promise handoff.
                let reader_input = &mut *input;
                let next_buf = &mut next;
                std::thread::scope(|scope| {
                    let reader = scope.spawn(move || read_full(reader_input, next_buf));
                    vm.search(&cur[..len], offset, sink);
                    reader.join().expect("block reader thread panicked")
                })?
            } else {
                // Short read means end of input; nothing left to prefetch.
                vm.search(&cur[..len], offset, sink);
                0
            };

            debug!(offset, len, "searched block");
            offset += len as u64;
            std::mem::swap(&mut cur, &mut next);
            len = next_len;
        }

        vm.close_out(offset, sink);
        Ok(SearchStats {
            bytes_searched: offset,
            elapsed: clock.elapsed(),
            cancelled: false,
        })
    }
}

impl Default for SearchController {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

/// Reads until `buf` is full or the stream ends. A short count is a
/// definitive end-of-input signal.
fn read_full<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match input.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Hit, Pattern};
    use crate::compile::{compile, CompileOptions};
    use std::io::Cursor;

    fn ascii_patterns(exprs: &[&str]) -> Vec<Pattern> {
        exprs
            .iter()
            .enumerate()
            .map(|(i, e)| Pattern {
                expr: e.to_string(),
                fixed_string: false,
                case_insensitive: false,
                index: i as u32,
                encoding: "ASCII".to_string(),
            })
            .collect()
    }

    fn run_blocks(exprs: &[&str], input: &[u8], block_size: usize) -> Vec<Hit> {
        let compiled = compile(&ascii_patterns(exprs), CompileOptions::default()).unwrap();
        let mut vm = Vm::new(compiled.program.clone());
        let mut hits = Vec::new();
        let mut sink = |h: &Hit| hits.push(*h);
        let stats = SearchController::new(block_size)
            .search(&mut Cursor::new(input), &mut vm, &mut sink, None)
            .unwrap();
        assert_eq!(stats.bytes_searched, input.len() as u64);
        assert!(!stats.cancelled);
        hits
    }

    #[test]
    fn hits_are_block_boundary_independent() {
        let input = b"xabcyabczzabc";
        let whole = run_blocks(&["abc"], input, input.len().max(1));
        assert_eq!(whole.len(), 3);
        for block_size in 1..=input.len() {
            assert_eq!(
                run_blocks(&["abc"], input, block_size),
                whole,
                "block size {block_size}"
            );
        }
    }

    #[test]
    fn match_spanning_many_blocks() {
        let hits = run_blocks(&["abcdefgh"], b"..abcdefgh..", 3);
        assert_eq!(
            hits,
            vec![Hit {
                offset: 2,
                length: 8,
                label: 0
            }]
        );
    }

    #[test]
    fn empty_input_is_clean() {
        assert!(run_blocks(&["abc"], b"", 4).is_empty());
    }

    #[test]
    fn cancellation_discards_state() {
        let compiled = compile(&ascii_patterns(&["ab"]), CompileOptions::default()).unwrap();
        let mut vm = Vm::new(compiled.program.clone());
        let mut hits = Vec::new();
        let mut sink = |h: &Hit| hits.push(*h);
        let cancel = AtomicBool::new(true);
        let stats = SearchController::new(4)
            .search(&mut Cursor::new(b"abab"), &mut vm, &mut sink, Some(&cancel))
            .unwrap();
        assert!(stats.cancelled);
        assert!(hits.is_empty());
    }
}
