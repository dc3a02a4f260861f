use meetrag::cli::{Cli, Commands, ConfigAction};
use meetrag::config::Config;
use meetrag::error::{RagError, Result};
use meetrag::transcript::format_timestamp;
use meetrag::TranscriptRag;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Index { recording, json } => {
            cmd_index(cli.config, &recording, json)?;
        }
        Commands::Query {
            recording,
            query,
            k,
            json,
        } => {
            cmd_query(cli.config, &recording, &query, k, json)?;
        }
        Commands::Status { recording, json } => {
            cmd_status(cli.config, &recording, json)?;
        }
        Commands::Delete { recording } => {
            cmd_delete(cli.config, &recording)?;
        }
        Commands::Chunks {
            recording,
            indexed,
            json,
        } => {
            cmd_chunks(cli.config, &recording, indexed, json)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let fallback = if verbose { "meetrag=debug" } else { "meetrag=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Run `f` on a fresh runtime with a `TranscriptRag` built from the config
fn with_rag<T, F, Fut>(config_path: Option<PathBuf>, f: F) -> Result<T>
where
    F: FnOnce(TranscriptRag) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let config = load_config(config_path)?;
    let rag = TranscriptRag::from_config(config)?;

    let rt = tokio::runtime::Runtime::new().map_err(|e| RagError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;

    rt.block_on(f(rag))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| RagError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

fn cmd_index(config_path: Option<PathBuf>, recording: &Path, json: bool) -> Result<()> {
    let report = with_rag(config_path, |rag| async move {
        Ok(rag.build_index(recording).await)
    })?;

    if json {
        println!("{}", to_json(&report)?);
        return Ok(());
    }

    if let Some(error) = &report.error {
        println!("✗ Indexing failed: {}", error);
    } else if report.skipped {
        println!("⚠ Transcript too short, index skipped");
    } else {
        println!("✓ Indexed {} chunks", report.chunk_count);
        println!("  Recording: {}", recording.display());
    }

    Ok(())
}

fn cmd_query(
    config_path: Option<PathBuf>,
    recording: &Path,
    query: &str,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let results = with_rag(config_path, |rag| async move {
        rag.query(recording, query, k).await
    })?;

    if json {
        println!("{}", to_json(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results. Is the recording indexed? Try 'meetrag index {}'", recording.display());
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let chunk = &result.chunk;
        println!(
            "[{}] {}-{}  score {:.3}  ({})",
            i + 1,
            format_timestamp(chunk.start_time),
            format_timestamp(chunk.end_time),
            result.score,
            chunk.speakers.join(", ")
        );
        for line in chunk.display_text.lines() {
            println!("    {}", line);
        }
        println!();
    }

    Ok(())
}

fn cmd_status(config_path: Option<PathBuf>, recording: &Path, json: bool) -> Result<()> {
    let report = with_rag(config_path, |rag| async move { Ok(rag.status(recording).await) })?;

    if json {
        println!("{}", to_json(&report)?);
        return Ok(());
    }

    println!("Index Status");
    println!("============");
    println!("\nRecording: {}", recording.display());
    println!("Status: {}", report.status);
    println!("Chunks: {}", report.chunk_count);
    if let Some(indexed_at) = report.indexed_at {
        println!("Indexed: {}", indexed_at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(fingerprint) = &report.fingerprint {
        println!("Transcript: {}", &fingerprint[..fingerprint.len().min(16)]);
    }
    if let Some(error) = &report.last_error {
        println!("Last error: {}", error);
    }

    Ok(())
}

fn cmd_delete(config_path: Option<PathBuf>, recording: &Path) -> Result<()> {
    with_rag(config_path, |rag| async move { rag.delete_index(recording).await })?;
    println!("✓ Index deleted for {}", recording.display());
    Ok(())
}

fn cmd_chunks(
    config_path: Option<PathBuf>,
    recording: &Path,
    indexed: bool,
    json: bool,
) -> Result<()> {
    let chunks = with_rag(config_path, |rag| async move {
        if indexed {
            rag.indexed_chunks(recording).await
        } else {
            rag.chunks(recording).await
        }
    })?;

    if json {
        println!("{}", to_json(&chunks)?);
        return Ok(());
    }

    println!("{} chunks", chunks.len());
    for chunk in &chunks {
        println!(
            "  #{:<4} {}-{}  {} chars  {}",
            chunk.chunk_id,
            format_timestamp(chunk.start_time),
            format_timestamp(chunk.end_time),
            chunk.embed_text.chars().count(),
            chunk.speakers.join(", ")
        );
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path)?;
            let value = serde_json::to_value(&config).map_err(|e| RagError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    RagError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            println!("{}", to_json(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
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
                std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => expand_path(&path)?,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'meetrag config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| RagError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| RagError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
