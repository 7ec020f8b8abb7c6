//! Command-line front-end: search, graph/bytecode dumps, and sample
//! enumeration over a compiled pattern set.

use clap::{Args, Parser, Subcommand};
use keygrep_rs::{
    build_graph, compile, determinize, matchgen, parse_pattern_line, CompileOptions, Hit,
    HitCounter, HitSink, Pattern, PatternDefaults, PatternMap, SearchController, Vm,
    DEFAULT_BLOCK_SIZE,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "keygrep-rs", version, about = "multi-pattern byte stream search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a file or stdin for every pattern occurrence.
    Search(SearchArgs),
    /// Long-lived search listener (not available in this build).
    Server(PatternArgs),
    /// Dump the pattern NFA as Graphviz dot.
    Graph(DumpArgs),
    /// Dump the compiled bytecode as text.
    Prog(DumpArgs),
    /// Enumerate sample strings the pattern set matches.
    Samp(SampArgs),
}

#[derive(Args)]
struct PatternArgs {
    /// Pattern file: one tab-separated pattern per line.
    #[arg(short = 'k', long = "keywords")]
    keyword_file: Option<PathBuf>,

    /// Inline pattern (repeatable; takes precedence over the file).
    #[arg(short = 'p', long = "pattern")]
    patterns: Vec<String>,

    /// Default encoding list (comma-separated).
    #[arg(short = 'e', long = "encoding", default_value = "ASCII")]
    encoding: String,

    /// ASCII case-insensitive matching by default.
    #[arg(short = 'i', long = "ignore-case")]
    ignore_case: bool,

    /// Treat patterns as fixed strings by default.
    #[arg(short = 'F', long = "fixed-strings")]
    fixed_strings: bool,

    /// Collapse shared prefixes before code generation.
    #[arg(long)]
    determinize: bool,
}

#[derive(Args)]
struct SearchArgs {
    #[command(flatten)]
    patterns: PatternArgs,

    /// Input file ('-' for stdin).
    #[arg(default_value = "-")]
    input: String,

    /// Output file ('-' for stdout).
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: String,

    /// Block size in bytes.
    #[arg(long = "block-size", default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Prefix each hit with the input path.
    #[arg(long = "print-path")]
    print_path: bool,

    /// Count hits without writing them.
    #[arg(short = 'c', long = "no-output")]
    no_output: bool,
}

#[derive(Args)]
struct DumpArgs {
    #[command(flatten)]
    patterns: PatternArgs,

    /// Output file ('-' for stdout).
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: String,
}

#[derive(Args)]
struct SampArgs {
    #[command(flatten)]
    patterns: PatternArgs,

    /// Maximum number of sample strings.
    #[arg(short = 'l', long = "limit", default_value_t = 20)]
    limit: usize,

    /// Output file ('-' for stdout).
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: String,
}

impl PatternArgs {
    fn defaults(&self) -> PatternDefaults {
        PatternDefaults {
            fixed_string: self.fixed_strings,
            case_insensitive: self.ignore_case,
            encodings: self.encoding.clone(),
        }
    }

    /// Collects pattern instances from inline patterns or the keyword file.
    fn collect(&self) -> io::Result<Vec<Pattern>> {
        let defaults = self.defaults();
        let mut out = Vec::new();
        if !self.patterns.is_empty() {
            for (i, line) in self.patterns.iter().enumerate() {
                parse_pattern_line(i as u32, line, &defaults, &mut out);
            }
        } else if let Some(path) = &self.keyword_file {
            let file = File::open(path)?;
            for (i, line) in BufReader::new(file).lines().enumerate() {
                parse_pattern_line(i as u32, &line?, &defaults, &mut out);
            }
        }
        Ok(out)
    }

    fn options(&self) -> CompileOptions {
        CompileOptions {
            determinize: self.determinize,
        }
    }
}

fn open_output(path: &str) -> io::Result<Box<dyn Write>> {
    Ok(if path == "-" {
        Box::new(BufWriter::new(io::stdout()))
    } else {
        Box::new(BufWriter::new(File::create(path)?))
    })
}

/// Writes one tab-separated line per hit, optionally prefixed with the
/// input path. Write failures are latched and surfaced after the pass.
struct HitWriter<'a> {
    out: Box<dyn Write>,
    map: &'a PatternMap,
    path: Option<&'a str>,
    hits: u64,
    error: Option<io::Error>,
}

impl<'a> HitWriter<'a> {
    fn new(out: Box<dyn Write>, map: &'a PatternMap, path: Option<&'a str>) -> Self {
        Self {
            out,
            map,
            path,
            hits: 0,
            error: None,
        }
    }

    fn finish(mut self) -> io::Result<u64> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.out.flush()?;
        Ok(self.hits)
    }
}

impl HitSink for HitWriter<'_> {
    fn on_hit(&mut self, hit: &Hit) {
        self.hits += 1;
        if self.error.is_some() {
            return;
        }
        let entry = self.map.entry(hit.label);
        let result = if let Some(path) = self.path {
            writeln!(
                self.out,
                "{path}\t{}\t{}\t{}\t{}\t{}",
                hit.offset, hit.length, entry.pattern_index, entry.pattern, entry.encoding
            )
        } else {
            writeln!(
                self.out,
                "{}\t{}\t{}\t{}\t{}",
                hit.offset, hit.length, entry.pattern_index, entry.pattern, entry.encoding
            )
        };
        if let Err(e) = result {
            self.error = Some(e);
        }
    }
}

fn compile_or_exit(args: &PatternArgs) -> Result<keygrep_rs::Compiled, ()> {
    let patterns = match args.collect() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {e}");
            return Err(());
        }
    };
    eprintln!(
        "{} pattern{}",
        patterns.len(),
        if patterns.len() == 1 { "" } else { "s" }
    );
    match compile(&patterns, args.options()) {
        Ok(compiled) => {
            for err in &compiled.errors {
                eprintln!("{err}");
            }
            eprintln!("{} states", compiled.num_states);
            eprintln!("{} instructions", compiled.program.len());
            Ok(compiled)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Err(())
        }
    }
}

fn search_input<R: io::Read + Send>(
    args: &SearchArgs,
    compiled: &keygrep_rs::Compiled,
    input: &mut R,
) -> Result<(u64, keygrep_rs::SearchStats), ()> {
    let mut vm = Vm::new(compiled.program.clone());
    let controller = SearchController::new(args.block_size);
    if args.no_output {
        let mut sink = HitCounter::default();
        let stats = controller
            .search(input, &mut vm, &mut sink, None)
            .map_err(|e| eprintln!("Error: {e}"))?;
        Ok((sink.hits, stats))
    } else {
        let out = open_output(&args.output).map_err(|e| eprintln!("Error: {e}"))?;
        let path = args.print_path.then_some(args.input.as_str());
        let mut sink = HitWriter::new(out, &compiled.map, path);
        let stats = controller
            .search(input, &mut vm, &mut sink, None)
            .map_err(|e| eprintln!("Error: {e}"))?;
        let hits = sink.finish().map_err(|e| eprintln!("Error: {e}"))?;
        Ok((hits, stats))
    }
}

fn run_search(args: &SearchArgs) -> Result<(), ()> {
    let compiled = compile_or_exit(&args.patterns)?;

    let (hits, stats) = if args.input == "-" {
        // Stdin (not StdinLock) so the reader handoff thread can borrow it.
        let mut stdin = io::stdin();
        search_input(args, &compiled, &mut stdin)?
    } else {
        let mut file = File::open(&args.input).map_err(|e| {
            eprintln!("Error: could not open {}: {e}", args.input);
        })?;
        search_input(args, &compiled, &mut file)?
    };

    let secs = stats.elapsed.as_secs_f64();
    eprintln!("{} bytes", stats.bytes_searched);
    eprintln!("{secs} searchTime");
    if secs > 0.0 {
        eprintln!(
            "{} MB/s avg",
            stats.bytes_searched as f64 / secs / (1 << 20) as f64
        );
    } else {
        eprintln!("+inf MB/s avg");
    }
    eprintln!("{hits} hits");
    Ok(())
}

fn run_graph(args: &DumpArgs) -> Result<(), ()> {
    let patterns = args.patterns.collect().map_err(|e| eprintln!("Error: {e}"))?;
    let (mut graph, _, errors) =
        build_graph(&patterns).map_err(|e| eprintln!("Error: {e}"))?;
    for err in &errors {
        eprintln!("{err}");
    }
    if args.patterns.determinize {
        graph = determinize(&graph);
    }
    eprintln!("{} states", graph.num_states());
    let mut out = open_output(&args.output).map_err(|e| eprintln!("Error: {e}"))?;
    graph
        .write_graphviz(&mut out)
        .and_then(|_| out.flush())
        .map_err(|e| eprintln!("Error: {e}"))
}

fn run_prog(args: &DumpArgs) -> Result<(), ()> {
    let compiled = compile_or_exit(&args.patterns)?;
    let mut out = open_output(&args.output).map_err(|e| eprintln!("Error: {e}"))?;
    write!(out, "{}", compiled.program)
        .and_then(|_| out.flush())
        .map_err(|e| eprintln!("Error: {e}"))
}

fn run_samp(args: &SampArgs) -> Result<(), ()> {
    let patterns = args.patterns.collect().map_err(|e| eprintln!("Error: {e}"))?;
    let (mut graph, _, errors) =
        build_graph(&patterns).map_err(|e| eprintln!("Error: {e}"))?;
    for err in &errors {
        eprintln!("{err}");
    }
    if args.patterns.determinize {
        graph = determinize(&graph);
    }
    let mut out = open_output(&args.output).map_err(|e| eprintln!("Error: {e}"))?;
    for sample in matchgen::sample_matches(&graph, args.limit) {
        writeln!(out, "{}", sample.escape_ascii()).map_err(|e| eprintln!("Error: {e}"))?;
    }
    out.flush().map_err(|e| eprintln!("Error: {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Search(args) => run_search(args),
        Command::Server(_) => {
            eprintln!("Error: server mode is not available in this build");
            Err(())
        }
        Command::Graph(args) => run_graph(args),
        Command::Prog(args) => run_prog(args),
        Command::Samp(args) => run_samp(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(()) => ExitCode::FAILURE,
    }
}
