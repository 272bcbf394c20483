use ragloop::cli::{Cli, Commands, ConfigAction};
use ragloop::config::{expand_path, Config, ConfigValidator};
use ragloop::embedding::{
    read_jsonl, CrossEncoderScorer, EmbeddingProvider, FastEmbedProvider, HnswParams, LocalIndex,
};
use ragloop::engine::Searcher;
use ragloop::error::{RagloopError, Result};
use ragloop::llm::OpenAiGenerator;
use ragloop::planner::Decision;
use ragloop::retrieval::{EvidenceSet, Turn};
use ragloop::stream::{Phase, StreamEvent};
use ragloop::{Collaborators, Engine};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PREVIEW_CHARS: usize = 160;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Ask {
            question,
            json,
            history,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ask(&config, question, json, history)?;
        }
        Commands::Search { query, limit, json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_search(&config, &query, limit, json)?;
        }
        Commands::Import { file } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_import(&config, &file)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "ragloop=debug" } else { "ragloop=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries the answer; logs go to stderr
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| RagloopError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn open_index(config: &Config) -> Result<(Arc<dyn EmbeddingProvider>, Arc<LocalIndex>)> {
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(FastEmbedProvider::new(&config.embedding.model)?);

    let data_dir = expand_path(&config.index.data_dir)?;
    std::fs::create_dir_all(&data_dir).map_err(|e| RagloopError::Io {
        source: e,
        context: format!("Failed to create data directory: {:?}", data_dir),
    })?;

    let params = HnswParams {
        m: config.index.hnsw_m,
        ef_construction: config.index.hnsw_ef_construction,
        ef_search: config.index.hnsw_ef_search,
    };
    let index = LocalIndex::open(&data_dir, Arc::clone(&embedder), params)?;

    Ok((embedder, Arc::new(index)))
}

fn cmd_ask(config: &Config, question: String, json: bool, history: Option<PathBuf>) -> Result<()> {
    let history = match history {
        Some(path) => load_history(&path)?,
        None => Vec::new(),
    };

    let (embedder, index) = open_index(config)?;
    let collaborators = Collaborators {
        index,
        embedder,
        scorer: Arc::new(CrossEncoderScorer::new(&config.embedding.reranker_model)?),
        generator: Arc::new(OpenAiGenerator::new(&config.llm, &config.generation)?),
    };
    let engine = Engine::new(config, collaborators)?;

    let rt = runtime()?;
    rt.block_on(async move {
        let mut stream = engine.handle_turn(question, history);

        let cancel = stream.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling turn");
                cancel.cancel();
            }
        });

        let mut stdout = std::io::stdout();
        let mut evidence = None;
        let mut failure = None;

        while let Some(event) = stream.next_event().await {
            if json {
                let line = serde_json::to_string(&event).map_err(|e| RagloopError::Json {
                    source: e,
                    context: "Failed to serialize event".to_string(),
                })?;
                println!("{}", line);
            } else {
                render_event(&event, &mut stdout);
            }

            match event {
                StreamEvent::Evidence { evidence: set } => evidence = Some(set),
                StreamEvent::Error { kind, message } => failure = Some((kind, message)),
                _ => {}
            }
        }

        if !json {
            if let Some(evidence) = evidence.filter(|e| !e.is_empty()) {
                println!("\nSources:");
                print_evidence(&evidence);
            }
        }

        match failure {
            Some((kind, message)) => Err(RagloopError::Other(anyhow::anyhow!(
                "Turn failed ({:?}): {}",
                kind,
                message
            ))),
            None => Ok(()),
        }
    })
}

fn render_event(event: &StreamEvent, stdout: &mut std::io::Stdout) {
    match event {
        StreamEvent::Status {
            phase: Phase::Retrieving { round },
        } => {
            eprintln!("· searching (round {})", round);
        }
        StreamEvent::Status {
            phase: Phase::Generating,
        } => {}
        StreamEvent::Process { trace } => {
            let outcome = match &trace.decision {
                Decision::Continue { gap } => format!("retrying: {}", gap),
                Decision::Terminate { reason } => format!("stop: {:?}", reason),
            };
            eprintln!(
                "  \"{}\" → {} passages, top {:.2} ({})",
                trace.query.text(),
                trace.evidence.len(),
                trace.evidence.top_score().unwrap_or_default(),
                outcome
            );
            for degradation in &trace.degradations {
                eprintln!("  ⚠ {:?}", degradation);
            }
        }
        StreamEvent::Evidence { .. } => {}
        StreamEvent::Token { text } => {
            print!("{}", text);
            stdout.flush().ok();
        }
        StreamEvent::Done => println!(),
        StreamEvent::Error { message, .. } => eprintln!("\n✗ {}", message),
    }
}

fn print_evidence(evidence: &EvidenceSet) {
    for (i, candidate) in evidence.candidates().iter().enumerate() {
        println!(
            "  [{}] {} ({:.3}, {})",
            i + 1,
            candidate.doc_id,
            candidate.score(),
            candidate.origin.as_str()
        );
        println!("      {}", candidate.preview(PREVIEW_CHARS));
    }
}

fn cmd_search(config: &Config, query: &str, limit: usize, json: bool) -> Result<()> {
    let (embedder, index) = open_index(config)?;
    let scorer = Arc::new(CrossEncoderScorer::new(&config.embedding.reranker_model)?);
    let searcher = Searcher::new(config, index, embedder, scorer)?;

    let rt = runtime()?;
    let evidence = rt.block_on(searcher.search(query, limit))?;

    if json {
        let out = serde_json::to_string_pretty(&evidence).map_err(|e| RagloopError::Json {
            source: e,
            context: "Failed to serialize results".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    if evidence.is_empty() {
        println!("No results for: {}", query);
        return Ok(());
    }

    println!("Results for: {}", query);
    print_evidence(&evidence);
    println!(
        "\n{} {}",
        if evidence.is_sufficient() { "✓" } else { "⚠" },
        evidence.verdict().rationale
    );

    Ok(())
}

fn cmd_import(config: &Config, file: &Path) -> Result<()> {
    let records = read_jsonl(file)?;
    tracing::info!("Read {} records from {}", records.len(), file.display());

    let (_, index) = open_index(config)?;
    let rt = runtime()?;
    let imported = rt.block_on(async {
        let imported = index.import(records).await?;
        Ok::<_, RagloopError>((imported, index.len().await))
    })?;

    println!("✓ Imported {} chunks", imported.0);
    println!("  Index now holds {} chunks", imported.1);

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let mut value = serde_json::to_value(&config).map_err(|e| RagloopError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            if let Some(section) = section {
                value = value
                    .get(&section)
                    .cloned()
                    .ok_or_else(|| RagloopError::Config(format!("Unknown section: {}", section)))?;
            }

            let json = serde_json::to_string_pretty(&value).map_err(|e| RagloopError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RagloopError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'ragloop config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn load_history(path: &Path) -> Result<Vec<Turn>> {
    let content = std::fs::read_to_string(path).map_err(|e| RagloopError::Io {
        source: e,
        context: format!("Failed to read history file: {:?}", path),
    })?;
    serde_json::from_str(&content).map_err(|e| RagloopError::Json {
        source: e,
        context: format!("Invalid history file: {:?}", path),
    })
}
