//! Pattern front-end: a small regex syntax compiled straight into NFA
//! fragments.
//!
//! Supported syntax: literal characters, escapes (`\\ \t \n \r \0 \xHH` and
//! escaped punctuation), `.`, character classes with ranges and `^`
//! negation, alternation `|`, grouping `(...)`, and the postfix operators
//! `? * +`. Fixed-string mode bypasses all of it.
//!
//! Construction is Glushkov-style: states carry byte predicates and there
//! are no epsilon edges, so a fragment is just its first/last state sets
//! plus a nullability flag. A pattern that accepts the empty string is
//! rejected; it would seed a zero-length match at every input position.

use crate::encoding::{Chain, CodePointSet, Encoding};
use crate::graph::{Graph, StateId};

/// Why a pattern failed, before error-kind mapping gets the pattern
/// index/text attached.
#[derive(Debug)]
pub enum ParseFail {
    Syntax(String),
    Encoding(String),
}

/// A pattern compiled into a standalone fragment graph.
///
/// State 0 of `graph` is an unused start placeholder; the fragment proper
/// lives in states `1..`. `firsts` are the states a match may begin in,
/// `lasts` the states a match may end in.
#[derive(Debug)]
pub struct ParsedPattern {
    pub graph: Graph,
    pub firsts: Vec<StateId>,
    pub lasts: Vec<StateId>,
}

#[derive(Clone, Debug)]
struct Fragment {
    firsts: Vec<StateId>,
    lasts: Vec<StateId>,
    nullable: bool,
}

impl Fragment {
    fn empty() -> Self {
        Fragment {
            firsts: Vec::new(),
            lasts: Vec::new(),
            nullable: true,
        }
    }

    fn from_chains(chains: &[Chain]) -> Self {
        Fragment {
            firsts: chains.iter().map(|c| c.head).collect(),
            lasts: chains.iter().map(|c| c.tail).collect(),
            nullable: false,
        }
    }
}

pub struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    enc: &'a dyn Encoding,
    case_insensitive: bool,
    graph: Graph,
}

impl<'a> Parser<'a> {
    pub fn new(enc: &'a dyn Encoding, case_insensitive: bool) -> Self {
        Self {
            chars: Vec::new(),
            pos: 0,
            enc,
            case_insensitive,
            graph: Graph::new(),
        }
    }

    /// Parses `expr` into a fragment graph.
    pub fn parse(mut self, expr: &str, fixed_string: bool) -> Result<ParsedPattern, ParseFail> {
        self.chars = expr.chars().collect();
        self.pos = 0;

        let frag = if fixed_string {
            self.parse_fixed()?
        } else {
            let f = self.parse_alt()?;
            if self.pos < self.chars.len() {
                return Err(ParseFail::Syntax(format!(
                    "unexpected '{}' at position {}",
                    self.chars[self.pos], self.pos
                )));
            }
            f
        };

        if frag.nullable || frag.firsts.is_empty() {
            return Err(ParseFail::Syntax("pattern matches the empty string".into()));
        }
        Ok(ParsedPattern {
            graph: self.graph,
            firsts: frag.firsts,
            lasts: frag.lasts,
        })
    }

    fn parse_fixed(&mut self) -> Result<Fragment, ParseFail> {
        let mut frag = Fragment::empty();
        while self.pos < self.chars.len() {
            let cp = self.chars[self.pos] as u32;
            self.pos += 1;
            let atom = self.atom_from_set(CodePointSet::single(cp))?;
            frag = self.concat(frag, atom);
        }
        Ok(frag)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn parse_alt(&mut self) -> Result<Fragment, ParseFail> {
        let mut frag = self.parse_concat()?;
        while self.peek() == Some('|') {
            self.pos += 1;
            let rhs = self.parse_concat()?;
            frag = Self::alt(frag, rhs);
        }
        Ok(frag)
    }

    fn parse_concat(&mut self) -> Result<Fragment, ParseFail> {
        let mut frag = Fragment::empty();
        while let Some(c) = self.peek() {
            if c == '|' || c == ')' {
                break;
            }
            let rhs = self.parse_rep()?;
            frag = self.concat(frag, rhs);
        }
        Ok(frag)
    }

    fn parse_rep(&mut self) -> Result<Fragment, ParseFail> {
        let mut frag = self.parse_atom()?;
        while let Some(op) = self.peek() {
            match op {
                '?' => frag.nullable = true,
                '*' => {
                    self.loop_back(&frag);
                    frag.nullable = true;
                }
                '+' => self.loop_back(&frag),
                _ => break,
            }
            self.pos += 1;
        }
        Ok(frag)
    }

    fn parse_atom(&mut self) -> Result<Fragment, ParseFail> {
        let c = self
            .bump()
            .ok_or_else(|| ParseFail::Syntax("unexpected end of pattern".into()))?;
        match c {
            '(' => {
                let inner = self.parse_alt()?;
                match self.bump() {
                    Some(')') => Ok(inner),
                    _ => Err(ParseFail::Syntax("unbalanced '('".into())),
                }
            }
            ')' => Err(ParseFail::Syntax("unbalanced ')'".into())),
            '.' => {
                let mut set = self.enc.any_point_set();
                set.normalize();
                self.expand(&set)
            }
            '[' => {
                let set = self.parse_class()?;
                self.atom_from_set(set)
            }
            ']' => Err(ParseFail::Syntax("unbalanced ']'".into())),
            '?' | '*' | '+' => Err(ParseFail::Syntax(format!("dangling '{c}'"))),
            '\\' => {
                let cp = self.parse_escape()?;
                self.atom_from_set(CodePointSet::single(cp))
            }
            _ => self.atom_from_set(CodePointSet::single(c as u32)),
        }
    }

    fn parse_escape(&mut self) -> Result<u32, ParseFail> {
        let c = self
            .bump()
            .ok_or_else(|| ParseFail::Syntax("trailing backslash".into()))?;
        match c {
            '\\' => Ok('\\' as u32),
            't' => Ok('\t' as u32),
            'n' => Ok('\n' as u32),
            'r' => Ok('\r' as u32),
            '0' => Ok(0),
            'x' => {
                let mut v = 0u32;
                for _ in 0..2 {
                    let d = self
                        .bump()
                        .and_then(|c| c.to_digit(16))
                        .ok_or_else(|| ParseFail::Syntax("\\x needs two hex digits".into()))?;
                    v = v * 16 + d;
                }
                Ok(v)
            }
            '.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '|' | '-' | '^' => Ok(c as u32),
            _ => Err(ParseFail::Syntax(format!("unsupported escape '\\{c}'"))),
        }
    }

    fn parse_class(&mut self) -> Result<CodePointSet, ParseFail> {
        let negated = if self.peek() == Some('^') {
            self.pos += 1;
            true
        } else {
            false
        };
        let mut set = CodePointSet::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| ParseFail::Syntax("unterminated class".into()))?;
            if c == ']' {
                break;
            }
            let lo = if c == '\\' {
                self.parse_escape()?
            } else {
                c as u32
            };
            // A '-' between two members forms a range; elsewhere it is
            // literal.
            if self.peek() == Some('-') && self.chars.get(self.pos + 1) != Some(&']') {
                self.pos += 1;
                let hc = self
                    .bump()
                    .ok_or_else(|| ParseFail::Syntax("unterminated class".into()))?;
                let hi = if hc == '\\' {
                    self.parse_escape()?
                } else {
                    hc as u32
                };
                if hi < lo {
                    return Err(ParseFail::Syntax("inverted class range".into()));
                }
                set.push_range(lo, hi);
            } else {
                set.push_range(lo, lo);
            }
        }
        if set.is_empty() && !negated {
            return Err(ParseFail::Syntax("empty class".into()));
        }
        set.normalize();
        if negated {
            let mut universe = self.enc.any_point_set();
            universe.normalize();
            set = set.complement_within(&universe);
            if set.is_empty() {
                return Err(ParseFail::Syntax("class excludes every code point".into()));
            }
        }
        Ok(set)
    }

    fn atom_from_set(&mut self, mut set: CodePointSet) -> Result<Fragment, ParseFail> {
        if self.case_insensitive {
            set.fold_ascii_case();
        } else {
            set.normalize();
        }
        self.expand(&set)
    }

    fn expand(&mut self, set: &CodePointSet) -> Result<Fragment, ParseFail> {
        let chains = self
            .enc
            .expand_set(set, &mut self.graph)
            .map_err(ParseFail::Encoding)?;
        Ok(Fragment::from_chains(&chains))
    }

    fn concat(&mut self, f1: Fragment, f2: Fragment) -> Fragment {
        for &a in &f1.lasts {
            for &b in &f2.firsts {
                self.graph.add_edge(a, b);
            }
        }
        let mut firsts = f1.firsts;
        if f1.nullable {
            firsts.extend_from_slice(&f2.firsts);
        }
        let mut lasts = f2.lasts;
        if f2.nullable {
            lasts.extend_from_slice(&f1.lasts);
        }
        Fragment {
            firsts,
            lasts,
            nullable: f1.nullable && f2.nullable,
        }
    }

    fn alt(mut f1: Fragment, f2: Fragment) -> Fragment {
        f1.firsts.extend_from_slice(&f2.firsts);
        f1.lasts.extend_from_slice(&f2.lasts);
        f1.nullable |= f2.nullable;
        f1
    }

    fn loop_back(&mut self, f: &Fragment) {
        for &a in &f.lasts {
            for &b in &f.firsts {
                self.graph.add_edge(a, b);
            }
        }
    }
}
