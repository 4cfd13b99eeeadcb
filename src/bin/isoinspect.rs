use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use isoinspect::{
    EventStream, IssueOrdering, ParseEventKind, ParseMode, ParseOptions, ParseTreeState, ParseTreeStore,
    RandomAccessReader, ReaderKind, RuleId, Severity, ValidationConfig, ValidationPreset, chunked::DEFAULT_CHUNK_SIZE,
    hex_range, open_reader,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about = "ISOBMFF / MP4 structure inspector and validator")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// More logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream box events as they are parsed
    Inspect {
        path: PathBuf,
        #[command(flatten)]
        parse: ParseArgs,
    },
    /// Parse the whole file and report issues; exits non-zero on errors
    Validate {
        path: PathBuf,
        #[command(flatten)]
        parse: ParseArgs,
        /// Issue display order
        #[arg(long, value_enum, default_value_t = Order::Offset)]
        order: Order,
    },
    /// Print the parse tree snapshot as JSON
    Tree {
        path: PathBuf,
        #[command(flatten)]
        parse: ParseArgs,
    },
    /// Hex dump a byte range
    Hex {
        path: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 256)]
        length: i64,
        #[arg(long, value_enum, default_value_t = Backend::Mapped)]
        reader: Backend,
    },
}

#[derive(Args, Debug)]
struct ParseArgs {
    /// Abort on the first structural anomaly
    #[arg(long)]
    strict: bool,

    #[arg(long, value_enum, default_value_t = Backend::Chunked)]
    reader: Backend,

    /// Chunk size for the chunked reader, in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    #[arg(long, default_value_t = 64)]
    max_depth: usize,

    /// Built-in preset id (all-checks, structural) or a preset JSON file
    #[arg(long)]
    preset: Option<String>,

    /// Rule id to disable (e.g. VR-006); repeatable
    #[arg(long = "disable-rule")]
    disable_rule: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    Chunked,
    Mapped,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Order {
    Offset,
    Node,
    Severity,
}

impl Backend {
    fn kind(self, chunk_size: usize) -> ReaderKind {
        match self {
            Backend::Chunked => ReaderKind::Chunked { chunk_size },
            Backend::Mapped => ReaderKind::Mapped,
        }
    }
}

impl ParseArgs {
    fn options(&self) -> anyhow::Result<ParseOptions> {
        let mut validation = ValidationConfig::default();
        if let Some(preset) = &self.preset {
            let preset = if Path::new(preset).exists() {
                ValidationPreset::load(preset).with_context(|| format!("loading preset {preset}"))?
            } else {
                ValidationPreset::builtin_by_id(preset)?
            };
            validation = validation.with_preset(preset);
        }
        for rule in &self.disable_rule {
            validation = validation.disable(rule.parse::<RuleId>()?);
        }
        Ok(ParseOptions {
            mode: if self.strict { ParseMode::Strict } else { ParseMode::Tolerant },
            max_depth: self.max_depth,
            decode_payloads: true,
            validation,
        })
    }

    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn RandomAccessReader + Send>> {
        open_reader(path, self.reader.kind(self.chunk_size)).with_context(|| format!("opening {}", path.display()))
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose { "isoinspect=debug".to_string() } else { "isoinspect=warn".to_string() }
    });
    tracing_subscriber::fmt().with_env_filter(&env_filter).with_writer(std::io::stderr).init();

    match cli.command {
        Command::Inspect { path, parse } => inspect(&path, &parse),
        Command::Validate { path, parse, order } => validate(&path, &parse, order),
        Command::Tree { path, parse } => tree(&path, &parse),
        Command::Hex { path, offset, length, reader } => {
            let r = open_reader(&path, reader.kind(DEFAULT_CHUNK_SIZE))?;
            let dump = hex_range(&r, offset, length)?;
            print!("{}", dump.hex);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn inspect(path: &Path, args: &ParseArgs) -> anyhow::Result<ExitCode> {
    let stream = EventStream::new(args.open(path)?, args.options()?);
    for event in stream {
        let event = event?;
        let ParseEventKind::WillStartBox { header, depth } = &event.kind else {
            continue;
        };
        let indent = "  ".repeat(*depth);
        let name = event.metadata.as_ref().map(|m| m.name).unwrap_or("");
        println!("{indent}{} @{} size={} {name}", header.identifier(), header.start(), header.total_size);
        if let Some(payload) = &event.payload {
            for field in &payload.fields {
                println!("{indent}    {} = {}", field.label, field.value);
            }
        }
        for issue in &event.issues {
            println!("{indent}  ! [{}] {}: {}", issue.severity, issue.code, issue.message);
        }
        for issue in &event.validation_issues {
            println!("{indent}  ? [{}] {}: {}", issue.severity, issue.rule_id, issue.message);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn build_tree(path: &Path, args: &ParseArgs) -> anyhow::Result<ParseTreeStore> {
    let mut store = ParseTreeStore::new();
    let stream = EventStream::new(args.open(path)?, args.options()?);
    // a failed parse is reported through the store's state
    let _ = store.run(stream);
    Ok(store)
}

fn validate(path: &Path, args: &ParseArgs, order: Order) -> anyhow::Result<ExitCode> {
    let store = build_tree(path, args)?;
    let ordering = match order {
        Order::Offset => IssueOrdering::Offset,
        Order::Node => IssueOrdering::AffectedNode,
        Order::Severity => IssueOrdering::Severity,
    };

    for issue in store.issues().sorted(ordering) {
        let at = issue.byte_range.as_ref().map(|r| format!("{}..{}", r.start, r.end)).unwrap_or_else(|| "-".into());
        println!("{:<8} {:<34} {:>22}  {}", issue.severity, issue.code, at, issue.message);
    }

    let m = store.metrics();
    println!(
        "{}: {} errors, {} warnings, {} info (deepest depth {})",
        path.display(),
        m.error_count,
        m.warning_count,
        m.info_count,
        m.deepest_affected_depth
    );
    if let ParseTreeState::Failed(message) = store.state() {
        eprintln!("parse failed: {message}");
        return Ok(ExitCode::from(2));
    }
    Ok(if m.count(Severity::Error) > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn tree(path: &Path, args: &ParseArgs) -> anyhow::Result<ExitCode> {
    let store = build_tree(path, args)?;
    println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
    Ok(ExitCode::SUCCESS)
}
