use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use trialcite_core::validation::HttpValidationService;
use trialcite_core::{
    ChunkIndex, CitationSearchEngine, CitationValidator, Config, Extraction, PageTextSource,
    PdfBackend, RevalidationScheduler, RevalidationStatus, SearchHint, SearchOutcome, config_file,
    get_revalidation_recommendations,
};
use trialcite_parsing::{SectionType, detect_sections, pages_for};
use trialcite_pdf_mupdf::{MupdfBackend, MupdfPageSource};

mod output;

use output::ColorMode;

/// Fraction of page height treated as running header/footer by `--strip-margins`.
const MARGIN_RATIO: f32 = 0.06;

/// Trial citation locator - find and verify where extracted values come from in a PDF
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract and chunk a PDF into a persisted chunk index
    Index {
        /// Path to the PDF
        pdf: PathBuf,

        /// Where to write the index (default: <pdf>.index.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Drop running headers and footers before chunking
        #[arg(long)]
        strip_margins: bool,
    },

    /// Detect document sections from a chunk index
    Sections {
        /// Path to the chunk index
        index: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Locate a value in a document
    Search {
        /// Text to look for
        query: String,

        /// Chunk index to search
        #[arg(long)]
        index: Option<PathBuf>,

        /// PDF to read pages from when no usable index is available
        #[arg(long)]
        pdf: Option<PathBuf>,

        /// Restrict the search to these pages (repeatable)
        #[arg(long = "page")]
        pages: Vec<u32>,

        /// Restrict the search to the pages of a detected section (e.g. methods)
        #[arg(long)]
        section: Option<String>,

        /// Return at most this many citations
        #[arg(long)]
        max_results: Option<usize>,

        /// Drop running headers and footers when reading pages from the PDF
        #[arg(long)]
        strip_margins: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Re-run validation for every cited extraction in a JSON file
    Revalidate {
        /// JSON array of extractions
        extractions: PathBuf,

        /// Where to write the updated extractions (default: <input>.revalidated.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Validation service endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Validation service API key
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Report whether a set of extractions should be revalidated
    Recommend {
        /// JSON array of extractions
        extractions: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let color = ColorMode(!cli.no_color);
    let config = resolve_config();

    match cli.command {
        Command::Index {
            pdf,
            output,
            strip_margins,
        } => index(&pdf, output, strip_margins, color),
        Command::Sections { index, json } => sections(&index, json, color),
        Command::Search {
            query,
            index,
            pdf,
            pages,
            section,
            max_results,
            strip_margins,
            json,
        } => {
            let hint = SearchHint { pages, max_results };
            search(
                config,
                &query,
                index.as_deref(),
                pdf.as_deref(),
                hint,
                section.as_deref(),
                strip_margins,
                json,
                color,
            )
        }
        Command::Revalidate {
            extractions,
            output,
            endpoint,
            api_key,
        } => revalidate(config, &extractions, output, endpoint, api_key, color).await,
        Command::Recommend { extractions, json } => recommend(&config, &extractions, json, color),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file values, then environment overrides. Flags are applied per command.
fn resolve_config() -> Config {
    let mut config = config_file::load_config().to_config();
    if let Ok(url) = std::env::var("TRIALCITE_VALIDATION_URL") {
        config.validation_endpoint = Some(url);
    }
    if let Ok(key) = std::env::var("TRIALCITE_API_KEY") {
        config.validation_api_key = Some(key);
    }
    if let Some(secs) = std::env::var("TRIALCITE_VALIDATION_TIMEOUT")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        config.validation_timeout_secs = secs;
    }
    config
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];
    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn default_index_path(pdf: &Path) -> PathBuf {
    pdf.with_extension("index.json")
}

fn mupdf_backend(strip_margins: bool) -> MupdfBackend {
    if strip_margins {
        MupdfBackend::new()
            .with_header_exclusion(MARGIN_RATIO)
            .with_footer_exclusion(MARGIN_RATIO)
    } else {
        MupdfBackend::new()
    }
}

fn load_index(path: &Path) -> anyhow::Result<ChunkIndex> {
    match ChunkIndex::load(path) {
        Some(index) => Ok(index),
        None => anyhow::bail!(
            "Could not read a chunk index from {}. Build one with: trialcite index <pdf>",
            path.display()
        ),
    }
}

fn load_extractions(path: &Path) -> anyhow::Result<Vec<Extraction>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of extractions", path.display()))
}

fn index(
    pdf: &Path,
    output: Option<PathBuf>,
    strip_margins: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    if !pdf.exists() {
        anyhow::bail!("PDF not found: {}", pdf.display());
    }
    let output = output.unwrap_or_else(|| default_index_path(pdf));

    let sha = sha256_file(pdf)?;
    let pages = mupdf_backend(strip_margins).extract_pages(pdf)?;

    let bar = ProgressBar::new(pages.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len} pages")
            .unwrap()
            .progress_chars("=> "),
    );
    bar.set_message("Chunking");
    let chunks = trialcite_core::chunk_with_progress(&pages, |done, _| bar.set_position(done as u64));
    bar.finish_and_clear();

    let index = ChunkIndex::from_chunks(chunks, Some(sha));
    index.save(&output)?;

    let mut stdout = std::io::stdout();
    output::print_index_summary(&mut stdout, &index, &output, color)?;
    Ok(())
}

fn sections(index_path: &Path, json: bool, color: ColorMode) -> anyhow::Result<()> {
    let index = load_index(index_path)?;
    let sections = detect_sections(&index.page_chunks);

    let mut stdout = std::io::stdout();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&sections)?)?;
    } else {
        output::print_sections(&mut stdout, &sections, color)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn search(
    config: Config,
    query: &str,
    index_path: Option<&Path>,
    pdf: Option<&Path>,
    mut hint: SearchHint,
    section: Option<&str>,
    strip_margins: bool,
    json: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    if index_path.is_none() && pdf.is_none() {
        anyhow::bail!("Nothing to search: pass --index, --pdf, or both");
    }

    let index_path = index_path
        .map(Path::to_path_buf)
        .or_else(|| pdf.map(default_index_path).filter(|p| p.exists()));

    let mut index = index_path.as_deref().and_then(ChunkIndex::load);
    if index.is_none()
        && let Some(ref path) = index_path
    {
        tracing::warn!(path = %path.display(), "chunk index unreadable, searching pages directly");
    }

    // A stale index would place citations on the wrong pages
    if let (Some(existing), Some(pdf)) = (index.as_ref(), pdf) {
        let sha = sha256_file(pdf)?;
        if !existing.is_fresh_for(&sha) {
            tracing::warn!(pdf = %pdf.display(), "chunk index does not match the PDF, ignoring it");
            index = None;
        }
    }

    if let Some(name) = section {
        let Some(section_type) = SectionType::from_name(name) else {
            anyhow::bail!(
                "Unknown section '{}'. Expected one of: {}",
                name,
                SectionType::ALL
                    .iter()
                    .map(|t| t.name().to_lowercase())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        };
        let Some(index) = index.as_ref() else {
            anyhow::bail!(
                "--section needs a usable chunk index. Build one with: trialcite index <pdf>"
            );
        };
        let narrowed = section_pages(index, section_type, &hint.pages);
        if narrowed.is_empty() {
            // An empty page hint means "every page"; never widen a narrowed search
            tracing::warn!(section = name, "no pages of the requested section to search");
            return print_outcome(query, &SearchOutcome::not_found(), json, color);
        }
        hint.pages = narrowed;
    }

    let source = pdf.map(|p| MupdfPageSource::new(p).with_backend(mupdf_backend(strip_margins)));
    let engine = CitationSearchEngine::new(config);
    let outcome = engine.search(
        query,
        index.as_ref(),
        source.as_ref().map(|s| s as &dyn PageTextSource),
        &hint,
    );
    print_outcome(query, &outcome, json, color)
}

/// Pages of the detected sections of `section_type`, intersected with the
/// pages the user already asked for (if any).
fn section_pages(index: &ChunkIndex, section_type: SectionType, requested: &[u32]) -> Vec<u32> {
    let pages = pages_for(&detect_sections(&index.page_chunks), section_type);
    if requested.is_empty() {
        pages
    } else {
        requested
            .iter()
            .copied()
            .filter(|p| pages.contains(p))
            .collect()
    }
}

fn print_outcome(
    query: &str,
    outcome: &SearchOutcome,
    json: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(outcome)?)?;
    } else {
        output::print_search_outcome(&mut stdout, query, outcome, color)?;
    }
    Ok(())
}

async fn revalidate(
    mut config: Config,
    input: &Path,
    output: Option<PathBuf>,
    endpoint: Option<String>,
    api_key: Option<String>,
    color: ColorMode,
) -> anyhow::Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    // Resolve configuration: CLI flags > env vars > config file > defaults
    if endpoint.is_some() {
        config.validation_endpoint = endpoint;
    }
    if api_key.is_some() {
        config.validation_api_key = api_key;
    }
    let Some(endpoint) = config.validation_endpoint.clone() else {
        anyhow::bail!(
            "No validation endpoint configured. Pass --endpoint, set TRIALCITE_VALIDATION_URL, \
             or add [validation] endpoint to the config file"
        );
    };

    let extractions = load_extractions(input)?;
    let output = output.unwrap_or_else(|| input.with_extension("revalidated.json"));

    let service = HttpValidationService::new(endpoint)
        .with_api_key(config.validation_api_key.clone())
        .with_timeout(config.validation_timeout());
    let validator = CitationValidator::new(Arc::new(service), &config);
    let scheduler = RevalidationScheduler::new(validator, &config);

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("[{bar:30}] {pos}/{len} ({percent}%) {wide_msg}")
            .unwrap()
            .progress_chars("=> "),
    );

    let result = scheduler
        .batch_revalidate(
            &extractions,
            |progress| {
                bar.set_length(progress.total as u64);
                bar.set_position(progress.current as u64);
                match progress.status {
                    RevalidationStatus::Running => bar.set_message(progress.current_field.clone()),
                    RevalidationStatus::Error => {
                        let err = progress.error.as_deref().unwrap_or("unknown error");
                        bar.println(format!("{}: {}", progress.current_field, err));
                    }
                    RevalidationStatus::Completed => bar.finish_and_clear(),
                }
            },
            &cancel,
        )
        .await;
    if !bar.is_finished() {
        bar.finish_and_clear();
    }

    let mut updated: HashMap<&str, &Extraction> = result
        .updated_extractions
        .iter()
        .map(|e| (e.id.as_str(), e))
        .collect();
    let merged: Vec<Extraction> = extractions
        .iter()
        .map(|e| updated.remove(e.id.as_str()).unwrap_or(e).clone())
        .collect();
    std::fs::write(&output, serde_json::to_string_pretty(&merged)?)
        .with_context(|| format!("failed to write {}", output.display()))?;

    let mut stdout = std::io::stdout();
    output::print_revalidation_summary(&mut stdout, &result, color)?;
    writeln!(stdout, "Wrote {}", output.display())?;
    Ok(())
}

fn recommend(config: &Config, input: &Path, json: bool, color: ColorMode) -> anyhow::Result<()> {
    let extractions = load_extractions(input)?;
    let rec = get_revalidation_recommendations(&extractions, config.low_confidence_threshold);

    let mut stdout = std::io::stdout();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&rec)?)?;
    } else {
        output::print_recommendation(&mut stdout, &rec, color)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trialcite_core::TextItem;

    #[test]
    fn index_path_sits_next_to_pdf() {
        assert_eq!(
            default_index_path(Path::new("/data/trial.pdf")),
            PathBuf::from("/data/trial.index.json")
        );
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn extractions_must_be_an_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extractions.json");
        std::fs::write(&path, r#"{"id":"e1"}"#).unwrap();
        assert!(load_extractions(&path).is_err());

        std::fs::write(
            &path,
            r#"[{"id":"e1","fieldName":"sample_size","value":"120"}]"#,
        )
        .unwrap();
        let extractions = load_extractions(&path).unwrap();
        assert_eq!(extractions.len(), 1);
        assert!(extractions[0].citations.is_empty());
    }

    fn trial_index() -> ChunkIndex {
        let pages: Vec<Vec<TextItem>> = [
            &["Abstract", "Short."][..],
            &["Methods", "Enrolment."],
            &["More methods text."],
            &["Results", "Outcomes."],
        ]
        .iter()
        .map(|lines| {
            lines
                .iter()
                .enumerate()
                .map(|(n, t)| TextItem::new(*t, 72.0, 700.0 - 14.0 * n as f64, 300.0, 12.0))
                .collect()
        })
        .collect();
        ChunkIndex::build(&pages, None)
    }

    #[test]
    fn section_hint_uses_section_pages() {
        let index = trial_index();
        assert_eq!(section_pages(&index, SectionType::Methods, &[]), vec![2, 3]);
        assert_eq!(section_pages(&index, SectionType::Methods, &[3, 4]), vec![3]);
    }

    #[test]
    fn section_hint_can_be_empty() {
        let index = trial_index();
        assert!(section_pages(&index, SectionType::Discussion, &[]).is_empty());
        assert!(section_pages(&index, SectionType::Methods, &[4]).is_empty());
    }

    #[test]
    fn section_without_index_is_an_error() {
        let err = search(
            Config::default(),
            "120 patients",
            None,
            Some(Path::new("/nonexistent/trial.pdf")),
            SearchHint::default(),
            Some("methods"),
            false,
            true,
            ColorMode(false),
        )
        .unwrap_err();
        assert!(err.to_string().contains("--section needs"));
    }

    #[test]
    fn cli_parses_search_flags() {
        let cli = Cli::try_parse_from([
            "trialcite",
            "--no-color",
            "search",
            "120 patients",
            "--index",
            "trial.index.json",
            "--page",
            "2",
            "--page",
            "3",
            "--section",
            "methods",
            "--strip-margins",
        ])
        .unwrap();
        assert!(cli.no_color);
        match cli.command {
            Command::Search {
                pages,
                section,
                strip_margins,
                ..
            } => {
                assert_eq!(pages, vec![2, 3]);
                assert_eq!(section.as_deref(), Some("methods"));
                assert!(strip_margins);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
