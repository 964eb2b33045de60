use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use coach_scoring::{
    scored_event, EmbeddingStrategy, HashingEmbedder, MeetingScorer, ScoringBatchController,
    ScoringConfig, ScoringTelemetry, SessionBundle, SessionReport, StageIndexCache, SCORED_EVENT,
};
use serde::Serialize;
use serde_json::json;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(
    name = "meeting-score",
    version,
    about = "Scores practice stakeholder interviews"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scores one session file.
    Score(ScoreArgs),
    /// Shows how a stage's prompt cards are distributed across its topic keys.
    Assign {
        /// Session or stage JSON carrying `stage` and `cards`.
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Scores every session of a JSON-lines file concurrently.
    Batch(BatchArgs),
}

#[derive(Args, Debug)]
struct ScoreArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured and the input's pass threshold.
    #[arg(long)]
    pass_threshold: Option<f32>,
    /// Writes the report here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    log: Option<PathBuf>,
    #[arg(long)]
    event_log: Option<PathBuf>,
    /// Scores with hashed-embedding cosine similarity instead of BM25.
    #[arg(long)]
    embedding: bool,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// One session JSON object per line.
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Writes one report per line here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    log: Option<PathBuf>,
    #[arg(long)]
    event_log: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Score(args) => handle_score(&args),
        Commands::Assign { input, config } => {
            let stdout = io::stdout();
            handle_assign(&input, config.as_deref(), &mut stdout.lock())
        }
        Commands::Batch(args) => handle_batch(&args),
    }
}

fn handle_score(args: &ScoreArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut bundle = read_session(&args.input)?;
    if let Some(threshold) = args.pass_threshold {
        bundle.input.pass_threshold = Some(threshold);
    }
    let telemetry = build_telemetry(args.log.as_deref(), args.event_log.as_deref())?;
    let mut scorer = MeetingScorer::new(config)?.with_telemetry(telemetry.clone());
    if args.embedding {
        let threshold = scorer.config().classifier.cosine_threshold;
        scorer = scorer.with_strategy(Arc::new(EmbeddingStrategy::new(
            Arc::new(HashingEmbedder::default()),
            threshold,
        )));
    }
    let _ = telemetry.log(
        LogLevel::Info,
        "cli.score.start",
        json!({
            "input": args.input,
            "session_id": bundle.session_id,
            "strategy": scorer.strategy_label(),
        }),
    );
    let output = scorer
        .score_session(bundle.session_id.as_deref(), &bundle.input)
        .with_context(|| format!("scoring {}", args.input.display()))?;
    write_json(args.output.as_deref(), &output)
}

fn handle_assign(input: &Path, config: Option<&Path>, out: &mut impl Write) -> Result<()> {
    let scorer = MeetingScorer::new(load_config(config)?)?;
    let bundle = read_session(input)?;
    let Some(stage) = &bundle.input.stage else {
        bail!("{} carries no stage definition", input.display());
    };
    let context = scorer.stage_context(stage, &bundle.input.cards);
    writeln!(out, "stage {} ({} keys)", context.stage_id(), context.key_count())?;
    for assignment in context.assignment_report() {
        let key = assignment.key.as_deref().unwrap_or("-");
        write!(out, "{:<16} {:<24} {:.3}", assignment.card_id, key, assignment.score)?;
        if assignment.is_ambiguous() {
            write!(out, "  tied with {}", assignment.tied_with.join(", "))?;
        }
        writeln!(out)?;
    }
    for warning in context.warnings() {
        writeln!(out, "warning: {warning}")?;
    }
    Ok(())
}

fn handle_batch(args: &BatchArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let bundles = read_sessions(&args.input)?;
    // Events are published after the runtime finishes so none are dropped on shutdown.
    let logs_only = build_telemetry(args.log.as_deref(), None)?;
    let events = build_telemetry(None, args.event_log.as_deref())?;
    let scorer = MeetingScorer::new(config)?
        .with_cache(Arc::new(StageIndexCache::new()))
        .with_telemetry(logs_only.clone());
    let controller = ScoringBatchController::new(scorer, Some(logs_only));

    let runtime = Runtime::new()?;
    let reports = runtime.block_on(controller.process_batch(bundles))?;
    drop(runtime);

    for report in &reports {
        if let Some(output) = &report.output {
            events.event(SCORED_EVENT, scored_event(Some(&report.session_id), output))?;
        }
    }
    write_reports(args.output.as_deref(), &reports)
}

fn load_config(path: Option<&Path>) -> Result<ScoringConfig> {
    match path {
        Some(path) => ScoringConfig::load(path),
        None => Ok(ScoringConfig::default()),
    }
}

fn build_telemetry(log: Option<&Path>, event_log: Option<&Path>) -> Result<ScoringTelemetry> {
    let mut builder = ScoringTelemetry::builder("meeting-score");
    if let Some(path) = log {
        builder = builder.log_path(path);
    }
    if let Some(path) = event_log {
        builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    builder.build()
}

fn read_session(path: &Path) -> Result<SessionBundle> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn read_sessions(path: &Path) -> Result<Vec<SessionBundle>> {
    let file = File::open(path).with_context(|| format!("reading {}", path.display()))?;
    let mut bundles = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let bundle = serde_json::from_str(&line)
            .with_context(|| format!("parsing {} line {}", path.display(), line_no + 1))?;
        bundles.push(bundle);
    }
    Ok(bundles)
}

fn write_json(path: Option<&Path>, value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => {
            fs::write(path, text + "\n").with_context(|| format!("writing {}", path.display()))
        }
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn write_reports(path: Option<&Path>, reports: &[SessionReport]) -> Result<()> {
    let mut sink: Box<dyn Write> = match path {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    for report in reports {
        serde_json::to_writer(&mut sink, report)?;
        sink.write_all(b"\n")?;
    }
    sink.flush()?;
    Ok(())
}
