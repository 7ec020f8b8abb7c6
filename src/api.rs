//! Public API data types for configuring the engine and reporting results.
//!
//! # Invariants
//! - A `label` is a dense index assigned per successfully compiled
//!   (pattern, encoding) instance; [`PatternMap`] is the only way to map it
//!   back to user-facing pattern text and encoding.
//! - [`Hit`] offsets are absolute stream offsets; `length` is in bytes of
//!   the searched input, so a UTF-16 hit is twice as long as its ASCII twin.
//!
//! # Design Notes
//! - Types here are intentionally lightweight and `Copy` where possible;
//!   the VM emits hits on its own thread and the sink must not block.

/// One pattern instance queued for compilation.
///
/// A single intake line can expand to several `Pattern`s, one per encoding
/// named in its encoding list. `index` is the caller's line/pattern index
/// and is preserved for error reporting; it is not the match label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    /// Pattern text (regex syntax unless `fixed_string`).
    pub expr: String,
    /// Treat `expr` as a verbatim byte string.
    pub fixed_string: bool,
    /// ASCII case folding.
    pub case_insensitive: bool,
    /// Caller-side pattern index (input line number for file intake).
    pub index: u32,
    /// Encoding name, e.g. `"ASCII"` or `"UTF-16LE"`.
    pub encoding: String,
}

/// Prevailing defaults applied to intake lines that do not override them.
#[derive(Clone, Debug)]
pub struct PatternDefaults {
    pub fixed_string: bool,
    pub case_insensitive: bool,
    /// Comma-separated encoding list.
    pub encodings: String,
}

impl Default for PatternDefaults {
    fn default() -> Self {
        Self {
            fixed_string: false,
            case_insensitive: false,
            encodings: "ASCII".to_string(),
        }
    }
}

/// Parses `"0"`/`"1"`; anything else leaves the current value untouched.
fn set_bool(s: &str, b: &mut bool) {
    match s {
        "0" => *b = false,
        "1" => *b = true,
        _ => {}
    }
}

/// Parses one intake line into zero or more [`Pattern`]s.
///
/// Format is tab-separated. The single-field form is just the pattern text;
/// the four-field form is
/// `pattern \t fixed(0|1) \t case_insensitive(0|1) \t encoding-list`.
/// Any other field count keeps the prevailing defaults. One `Pattern` is
/// produced per encoding in the (possibly defaulted) comma-separated list.
/// Empty lines produce nothing.
pub fn parse_pattern_line(
    index: u32,
    line: &str,
    defaults: &PatternDefaults,
    out: &mut Vec<Pattern>,
) {
    if line.is_empty() {
        return;
    }
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.is_empty() || fields[0].is_empty() {
        return;
    }

    let mut fixed = defaults.fixed_string;
    let mut nocase = defaults.case_insensitive;
    let mut encodings = defaults.encodings.as_str();
    if fields.len() == 4 {
        set_bool(fields[1], &mut fixed);
        set_bool(fields[2], &mut nocase);
        encodings = fields[3];
    }

    for enc in encodings.split(',') {
        let enc = enc.trim();
        if enc.is_empty() {
            continue;
        }
        out.push(Pattern {
            expr: fields[0].to_string(),
            fixed_string: fixed,
            case_insensitive: nocase,
            index,
            encoding: enc.to_string(),
        });
    }
}

/// Maps a match label back to the pattern instance that produced it.
#[derive(Clone, Debug)]
pub struct PatternMapEntry {
    /// Caller-side pattern index.
    pub pattern_index: u32,
    /// Pattern text.
    pub pattern: String,
    /// Encoding name.
    pub encoding: String,
}

/// Label-indexed table of compiled pattern instances.
///
/// Labels are dense: entry `i` describes label `i`. Only patterns that
/// compiled successfully appear here.
#[derive(Clone, Debug, Default)]
pub struct PatternMap {
    entries: Vec<PatternMapEntry>,
}

impl PatternMap {
    pub(crate) fn push(&mut self, entry: PatternMapEntry) -> u32 {
        let label = self.entries.len() as u32;
        self.entries.push(entry);
        label
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `label`. Panics if the label was not produced by this
    /// compile.
    pub fn entry(&self, label: u32) -> &PatternMapEntry {
        &self.entries[label as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatternMapEntry> {
        self.entries.iter()
    }
}

/// One committed match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hit {
    /// Absolute byte offset of the first matched byte.
    pub offset: u64,
    /// Match length in bytes.
    pub length: u64,
    /// Label of the (pattern, encoding) instance that matched.
    pub label: u32,
}

/// Receives committed hits from the VM.
///
/// Called at most once per committed hit, synchronously on the search
/// thread; implementations must not block indefinitely.
pub trait HitSink {
    fn on_hit(&mut self, hit: &Hit);
}

impl<F: FnMut(&Hit)> HitSink for F {
    fn on_hit(&mut self, hit: &Hit) {
        self(hit)
    }
}

/// Sink that counts hits and otherwise drops them.
#[derive(Debug, Default)]
pub struct HitCounter {
    pub hits: u64,
}

impl HitSink for HitCounter {
    fn on_hit(&mut self, _hit: &Hit) {
        self.hits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_field_line_uses_defaults() {
        let mut out = Vec::new();
        parse_pattern_line(3, "foo", &PatternDefaults::default(), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].expr, "foo");
        assert_eq!(out[0].encoding, "ASCII");
        assert_eq!(out[0].index, 3);
        assert!(!out[0].fixed_string);
    }

    #[test]
    fn four_field_line_overrides() {
        let mut out = Vec::new();
        parse_pattern_line(
            0,
            "a.c\t1\t1\tASCII,UTF-16LE",
            &PatternDefaults::default(),
            &mut out,
        );
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|p| p.fixed_string && p.case_insensitive));
        assert_eq!(out[0].encoding, "ASCII");
        assert_eq!(out[1].encoding, "UTF-16LE");
    }

    #[test]
    fn unrecognized_bool_keeps_default() {
        let defaults = PatternDefaults {
            fixed_string: true,
            ..PatternDefaults::default()
        };
        let mut out = Vec::new();
        parse_pattern_line(0, "x\tmaybe\t1\tASCII", &defaults, &mut out);
        assert_eq!(out.len(), 1);
        assert!(out[0].fixed_string, "non-boolean field must not clear it");
        assert!(out[0].case_insensitive);
    }

    #[test]
    fn two_field_line_keeps_defaults() {
        let mut out = Vec::new();
        parse_pattern_line(0, "x\t1", &PatternDefaults::default(), &mut out);
        assert_eq!(out.len(), 1);
        assert!(!out[0].fixed_string);
    }

    #[test]
    fn empty_line_produces_nothing() {
        let mut out = Vec::new();
        parse_pattern_line(0, "", &PatternDefaults::default(), &mut out);
        assert!(out.is_empty());
    }
}
