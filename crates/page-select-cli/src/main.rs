use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use page_select_api::{ProgressEntry, SelectionSession};
use page_select_core::{PageIndex, Progress, RecordId};
use page_select_source::{ArtworkSource, ConfiguredSource, FixtureSource, SourceConfig};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "psel")]
#[command(about = "Browse a paginated collection and build cross-page selections")]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct SourceArgs {
    #[arg(long, value_enum, default_value_t = SourceArg::Artic, global = true)]
    source: SourceArg,
    #[arg(long, default_value = "https://api.artic.edu/api/v1", global = true)]
    base_url: String,
    #[arg(long, default_value_t = 30, global = true)]
    timeout_secs: u64,
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    Artic,
    Fixture,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show one page and how the selection covers it
    Page(SessionArgs),
    /// Check or clear the header checkbox of a page
    TogglePage(TogglePageArgs),
    /// Flip one row on the displayed page
    ToggleRecord(ToggleRecordArgs),
    /// Grow the selection to a total count, fetching later pages as needed
    Select(SelectArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    /// Ids selected earlier; repeatable
    #[arg(long = "selected")]
    selected: Vec<u64>,
}

#[derive(Debug, Args)]
struct TogglePageArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long, action = ArgAction::Set)]
    checked: bool,
}

#[derive(Debug, Args)]
struct ToggleRecordArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long)]
    id: u64,
}

#[derive(Debug, Args)]
struct SelectArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long, allow_hyphen_values = true)]
    target: i64,
    /// Print one JSON line per consumed page to stderr
    #[arg(long, default_value_t = false)]
    progress: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let source = build_source(&cli.source)?;
    match cli.command {
        Command::Page(args) => run_page(source, &args).await,
        Command::TogglePage(args) => run_toggle_page(source, &args).await,
        Command::ToggleRecord(args) => run_toggle_record(source, &args).await,
        Command::Select(args) => run_select(source, &args).await,
    }
}

fn build_source(args: &SourceArgs) -> Result<ConfiguredSource> {
    tracing::debug!(source = ?args.source, "configuring record source");
    match args.source {
        SourceArg::Artic => {
            let config = SourceConfig {
                base_url: args.base_url.clone(),
                timeout_secs: args.timeout_secs,
                ..SourceConfig::default()
            };
            Ok(ConfiguredSource::Artic(ArtworkSource::new(config)?))
        }
        SourceArg::Fixture => {
            let path = args
                .fixture
                .as_ref()
                .ok_or_else(|| anyhow!("--fixture is required with --source fixture"))?;
            let source = FixtureSource::from_path(path)
                .with_context(|| format!("failed to load fixture {}", path.display()))?;
            Ok(ConfiguredSource::Fixture(source))
        }
    }
}

async fn open_session(
    source: ConfiguredSource,
    args: &SessionArgs,
) -> Result<SelectionSession<ConfiguredSource>> {
    let page = PageIndex::new(args.page)?;
    let session = SelectionSession::open(source, page).await?;
    Ok(session.restore_selection(args.selected.iter().copied().map(RecordId)))
}

async fn run_page(source: ConfiguredSource, args: &SessionArgs) -> Result<()> {
    let session = open_session(source, args).await?;
    emit_json(serde_json::json!({ "view": session.view() }))
}

async fn run_toggle_page(source: ConfiguredSource, args: &TogglePageArgs) -> Result<()> {
    let mut session = open_session(source, &args.session).await?;
    let result = session.set_page_checked(args.checked);
    emit_json(serde_json::to_value(result)?)
}

async fn run_toggle_record(source: ConfiguredSource, args: &ToggleRecordArgs) -> Result<()> {
    let mut session = open_session(source, &args.session).await?;
    let result = session.toggle_record(RecordId(args.id))?;
    emit_json(serde_json::to_value(result)?)
}

async fn run_select(source: ConfiguredSource, args: &SelectArgs) -> Result<()> {
    let mut session = open_session(source, &args.session).await?;
    let show_progress = args.progress;
    let mut observer = |progress: &Progress<'_>| {
        if !show_progress {
            return;
        }
        if let Ok(line) = serde_json::to_string(&ProgressEntry::from(progress)) {
            eprintln!("{line}");
        }
    };

    match session.select_target(args.target, &mut observer).await {
        Ok(result) => emit_json(serde_json::to_value(result)?),
        Err(err) => {
            emit_json(serde_json::json!({
                "status": "failed",
                "error": err.to_string(),
                "view": session.view()
            }))?;
            Err(anyhow::Error::new(err).context("selection run stopped early"))
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_target_parses() {
        let cli = Cli::try_parse_from(["psel", "select", "--target", "-3"])
            .unwrap_or_else(|err| panic!("negative target should parse: {err}"));
        match cli.command {
            Command::Select(args) => assert_eq!(args.target, -3),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn non_object_payload_is_wrapped() {
        let wrapped = with_contract_version(serde_json::json!([1, 2]));
        assert_eq!(wrapped["contract_version"], CLI_CONTRACT_VERSION);
        assert_eq!(wrapped["payload"], serde_json::json!([1, 2]));
    }
}
