//! CLI binary for edgequake-quotes.
//!
//! A thin shim over the library crate: each subcommand maps its flags to
//! library calls and prints the result.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_quotes::pipeline::book::default_output_path;
use edgequake_quotes::pipeline::llm::resolve_client;
use edgequake_quotes::publish::publish_stored;
use edgequake_quotes::refine::DEFAULT_BATCH_SIZE;
use edgequake_quotes::store::import_quote_file;
use edgequake_quotes::{
    extract_quotes, extract_to_file, improve_file, inspect, insights, refine_file,
    ExtractionConfig, ExtractionProgressCallback, LlmClient, PageSelection, ProgressCallback,
    Quote, QuoteFile, QuoteFilter, QuoteStore, QuoteValidator, Strategy, ThreadsConfig,
    ThreadsPublisher, ValidatorConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────

/// Progress bar over chunks (or chapters for `insights`). Chunks complete
/// out of order when several run concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    unit: &'static str,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic(unit: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            unit,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let template = format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {}  \
             ⏱ {{elapsed_precise}}  ETA {{eta_precise}}",
            self.unit
        );
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed(&self, chunk: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&chunk))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_chunks: usize) {
        self.activate_bar(total_chunks);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_chunks} {}…", self.unit))
        ));
    }

    fn on_chunk_start(&self, chunk: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(chunk, Instant::now());
        }
        self.bar.set_message(format!("{} {chunk}", self.unit));
    }

    fn on_chunk_complete(&self, chunk: usize, total: usize, accepted: usize) {
        let secs = self.elapsed(chunk);
        if accepted > 0 {
            self.bar.println(format!(
                "  {} {:>4}/{:<4}  {}  {}",
                green("✓"),
                chunk,
                total,
                dim(&format!("{accepted:>2} quotes")),
                dim(&format!("{secs:.1}s")),
            ));
        }
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk: usize, total: usize, error: &str) {
        let secs = self.elapsed(chunk);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>4}/{:<4}  {}  {}",
            red("✗"),
            chunk,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_chunks: usize, quotes: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} quotes from {} {}",
                green("✔"),
                bold(&quotes.to_string()),
                total_chunks,
                self.unit
            );
        } else {
            eprintln!(
                "{} {} quotes from {} {}  ({} failed)",
                cyan("⚠"),
                bold(&quotes.to_string()),
                total_chunks,
                self.unit,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract quotes into data/quotes/<book>.json
  pdf2quotes extract book.pdf

  # Paragraph analysis, first 50 pages, English output
  pdf2quotes extract --strategy smart --pages 1-50 --lang en book.pdf

  # Without any API key: heuristics only
  pdf2quotes extract --no-translate book.pdf -o quotes.json

  # Post-process an existing quote file in place
  pdf2quotes refine data/quotes/book.json
  pdf2quotes improve data/quotes/book.json

  # Chapter-by-chapter insight analysis
  pdf2quotes insights book.pdf

  # Database
  pdf2quotes import data/quotes/*.json
  pdf2quotes list --unpublished --min-quality 0.7
  pdf2quotes search "доверие"
  pdf2quotes stats

  # Publish quote 42 to Threads
  pdf2quotes publish 42

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (smart gpt-4o, fast gpt-4o-mini)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDF2QUOTES_DB           SQLite database path (default data/quotes.db)
  THREADS_ACCESS_TOKEN    Threads Graph API token
  THREADS_USER_ID         Threads user id (IG_USER_ID also accepted)
  PDFIUM_LIB_PATH         Path to an existing libpdfium; skips auto-download
"#;

/// Extract publishable quotes from PDF books with LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2quotes",
    version,
    about = "Extract, validate, store and publish quotes from PDF books",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2QUOTES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2QUOTES_QUIET")]
    quiet: bool,

    /// Disable progress bars.
    #[arg(long, global = true, env = "PDF2QUOTES_NO_PROGRESS")]
    no_progress: bool,
}

/// Model selection and call policy.
#[derive(Args, Debug, Clone)]
struct LlmArgs {
    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Smart-tier model (extraction, translation).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Fast-tier model (grading, refine).
    #[arg(long, env = "PDF2QUOTES_FAST_MODEL")]
    fast_model: Option<String>,

    /// Number of concurrent LLM calls.
    #[arg(short, long, env = "PDF2QUOTES_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per LLM call.
    #[arg(long, env = "PDF2QUOTES_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF2QUOTES_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[derive(Args, Debug, Clone)]
struct DbArgs {
    /// SQLite database file.
    #[arg(long, env = "PDF2QUOTES_DB", default_value = "data/quotes.db")]
    db: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract quotes from a PDF file or URL.
    Extract {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// Quote file to write (default: <dir>/<book-slug>.json).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for default output paths.
        #[arg(long, env = "PDF2QUOTES_OUTPUT_DIR", default_value = "data/quotes")]
        dir: PathBuf,

        /// structured or smart.
        #[arg(long, env = "PDF2QUOTES_STRATEGY", default_value = "structured")]
        strategy: Strategy,

        /// Page selection: all, 5, 3-15, or 1,3,5-7.
        #[arg(long, env = "PDF2QUOTES_PAGES", default_value = "all")]
        pages: PageSelection,

        /// Stop after this many validated quotes.
        #[arg(long, env = "PDF2QUOTES_MAX_QUOTES", default_value_t = 50)]
        max_quotes: usize,

        /// Top up with basic-only quotes below this count.
        #[arg(long, env = "PDF2QUOTES_MIN_QUOTES", default_value_t = 20)]
        min_quotes: usize,

        /// Publication language (ISO code).
        #[arg(long, env = "PDF2QUOTES_LANG", default_value = "ru")]
        lang: String,

        /// Book topic; inferred when omitted.
        #[arg(long)]
        topic: Option<String>,

        /// Audience hint for the extraction prompt.
        #[arg(long)]
        audience: Option<String>,

        /// Keep quotes in the source language.
        #[arg(long)]
        no_translate: bool,

        /// Skip the LLM topic-relevance stage.
        #[arg(long)]
        no_topic_check: bool,

        /// PDF user password for encrypted documents.
        #[arg(long, env = "PDF2QUOTES_PASSWORD")]
        password: Option<String>,

        /// Overwrite an existing output file.
        #[arg(short, long)]
        force: bool,

        /// Print the full extraction output as JSON instead of writing a file.
        #[arg(long)]
        json: bool,

        /// Also import the result into the database.
        #[arg(long)]
        import: bool,

        #[command(flatten)]
        llm: LlmArgs,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Print PDF metadata (no API key needed).
    Inspect {
        input: String,

        #[arg(long, env = "PDF2QUOTES_PASSWORD")]
        password: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Run the validation chain on a text or a quote file.
    Validate {
        /// Text to validate.
        #[arg(required_unless_present = "file")]
        text: Option<String>,

        /// Validate every quote of this file instead.
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Write the passing quotes of `--file` here.
        #[arg(short, long, requires = "file")]
        output: Option<PathBuf>,
    },

    /// Polish a quote file and keep only engaging quotes.
    Refine {
        file: PathBuf,

        /// Output file (default: overwrite the input).
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Re-analyse each quote's source paragraph for a better span.
    Improve {
        file: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Chapter-by-chapter insight analysis of a book.
    Insights {
        input: String,

        /// Analysis file (default: <dir>/<book-slug>_analysis.json).
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, env = "PDF2QUOTES_OUTPUT_DIR", default_value = "data/quotes")]
        dir: PathBuf,

        #[arg(long, env = "PDF2QUOTES_PAGES", default_value = "all")]
        pages: PageSelection,

        #[arg(long, env = "PDF2QUOTES_PASSWORD")]
        password: Option<String>,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Import quote files into the database.
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        db: DbArgs,
    },

    /// List stored quotes.
    List {
        #[arg(long)]
        book: Option<i64>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long, default_value_t = 0.0)]
        min_quality: f64,

        #[arg(long)]
        engaging: bool,

        #[arg(long)]
        unpublished: bool,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// List books instead of quotes.
        #[arg(long, conflicts_with_all = ["book", "category", "engaging", "unpublished"])]
        books: bool,

        #[arg(long)]
        json: bool,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Search stored quotes by substring.
    Search {
        text: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        json: bool,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Database totals.
    Stats {
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Post a stored quote (or a raw text) to Threads.
    Publish {
        /// Stored quote id.
        #[arg(required_unless_present = "text")]
        id: Option<i64>,

        /// Publish this text instead of a stored quote.
        #[arg(long, conflicts_with = "id")]
        text: Option<String>,

        /// Validate and print, but do not post.
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        db: DbArgs,
    },
}

impl Command {
    /// Subcommands that read PDFs need the pdfium engine.
    fn needs_pdfium(&self) -> bool {
        matches!(
            self,
            Command::Extract { .. } | Command::Inspect { .. } | Command::Insights { .. }
        )
    }

    /// Subcommands that drive a progress bar.
    fn shows_progress(&self) -> bool {
        matches!(
            self,
            Command::Extract { json: false, .. } | Command::Insights { .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && cli.command.shows_progress();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.command.needs_pdfium() {
        ensure_pdfium(cli.quiet)?;
    }

    let progress = |unit: &'static str| -> Option<ProgressCallback> {
        show_progress.then(|| CliProgressCallback::new_dynamic(unit) as ProgressCallback)
    };

    match cli.command {
        Command::Extract {
            input,
            output,
            dir,
            strategy,
            pages,
            max_quotes,
            min_quotes,
            lang,
            topic,
            audience,
            no_translate,
            no_topic_check,
            password,
            force,
            json,
            import,
            llm,
            db,
        } => {
            let mut builder = llm
                .builder()
                .strategy(strategy)
                .pages(pages)
                .max_quotes(max_quotes)
                .min_quotes(min_quotes.min(max_quotes))
                .target_language(lang)
                .translate(!no_translate)
                .topic_check(!no_topic_check);
            if let Some(t) = topic {
                builder = builder.topic(t);
            }
            if let Some(a) = audience {
                builder = builder.audience(a);
            }
            if let Some(p) = password {
                builder = builder.password(p);
            }
            if let Some(cb) = progress("chunks") {
                builder = builder.progress_callback(cb);
            }
            let config = builder.build().context("Invalid configuration")?;

            if json {
                let out = extract_quotes(&input, &config)
                    .await
                    .context("Extraction failed")?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&out).context("Failed to serialise output")?
                );
                return Ok(());
            }

            let path = output.unwrap_or_else(|| default_output_path(&dir, input_stem(&input)));
            let Some(out) = extract_to_file(&input, &path, &config, force)
                .await
                .context("Extraction failed")?
            else {
                if !cli.quiet {
                    eprintln!(
                        "{} {} exists, use --force to overwrite",
                        cyan("⚠"),
                        bold(&path.display().to_string())
                    );
                }
                return Ok(());
            };

            if !cli.quiet {
                let s = &out.stats;
                eprintln!(
                    "{}  {} quotes  {} chunks ({} failed)  {}ms  →  {}",
                    if s.chunks_failed == 0 { green("✔") } else { cyan("⚠") },
                    out.quotes.len(),
                    s.chunks,
                    s.chunks_failed,
                    s.total_duration_ms,
                    bold(&path.display().to_string()),
                );
                eprintln!(
                    "   {} candidates, {} rejected, {} fallback, {} translated{}",
                    s.candidates,
                    s.rejected(),
                    s.fallback_quotes,
                    s.translated,
                    if s.offline { "  (offline)" } else { "" }
                );
                eprintln!(
                    "   {} tokens in  /  {} tokens out",
                    dim(&s.total_input_tokens.to_string()),
                    dim(&s.total_output_tokens.to_string()),
                );
            }

            if import {
                let mut store = open_store(&db.db)?;
                let report = store
                    .import(&out.to_quote_file(), Some(input.as_str()))
                    .context("Import failed")?;
                if !cli.quiet {
                    eprintln!(
                        "   imported {} quotes into book {}",
                        report.imported, report.book_id
                    );
                }
            }
        }

        Command::Inspect {
            input,
            password,
            json,
        } => {
            let meta = inspect(&input, password.as_deref())
                .await
                .context("Failed to inspect PDF")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
                );
            } else {
                println!("File:         {}", input);
                if let Some(ref t) = meta.title {
                    println!("Title:        {}", t);
                }
                if let Some(ref a) = meta.author {
                    println!("Author:       {}", a);
                }
                if let Some(ref s) = meta.subject {
                    println!("Subject:      {}", s);
                }
                println!("Pages:        {}", meta.page_count);
                println!("PDF Version:  {}", meta.pdf_version);
                if let Some(ref p) = meta.producer {
                    println!("Producer:     {}", p);
                }
                if let Some(ref d) = meta.creation_date {
                    println!("Created:      {}", d);
                }
            }
        }

        Command::Validate { text, file, output } => {
            let validator = QuoteValidator::new(ValidatorConfig::default());
            match (text, file) {
                (Some(text), _) => {
                    let report = validator.validate(&Quote::new(text));
                    for stage in &report.stages {
                        let mark = if stage.passed() { green("✓") } else { red("✗") };
                        println!(
                            "{} {:<22} {:.2}  {}",
                            mark,
                            stage.stage.as_str(),
                            stage.score,
                            stage.message
                        );
                    }
                    match report.final_text() {
                        Some(t) if report.passed() => println!("\n{}", bold(t)),
                        _ => bail!("quote rejected"),
                    }
                }
                (None, Some(file)) => {
                    let qf = QuoteFile::load(&file)
                        .await
                        .with_context(|| format!("Failed to load {}", file.display()))?;
                    let total = qf.quotes.len();
                    let passed: Vec<Quote> = qf
                        .quotes
                        .iter()
                        .filter_map(|q| validator.validated_quote(q))
                        .collect();
                    println!("{}/{} quotes pass validation", passed.len(), total);
                    if let Some(out) = output {
                        QuoteFile::new(qf.book, passed)
                            .save(&out)
                            .await
                            .with_context(|| format!("Failed to write {}", out.display()))?;
                    }
                }
                (None, None) => bail!("give a text or --file"),
            }
        }

        Command::Refine {
            file,
            output,
            batch_size,
            llm,
        } => {
            let client = llm.client()?;
            let before = QuoteFile::load(&file).await?.quotes.len();
            let out = refine_file(client.as_ref(), &file, output.as_deref(), batch_size)
                .await
                .context("Refine failed")?;
            if !cli.quiet {
                eprintln!(
                    "{} {} → {} quotes  →  {}",
                    green("✔"),
                    before,
                    out.quotes.len(),
                    bold(&output.as_deref().unwrap_or(&file).display().to_string())
                );
            }
        }

        Command::Improve { file, output, llm } => {
            let client = llm.client()?;
            let out = improve_file(client.as_ref(), &file, output.as_deref())
                .await
                .context("Improve failed")?;
            if !cli.quiet {
                let improved = out
                    .quotes
                    .iter()
                    .filter(|q| q.meta.improved == Some(true))
                    .count();
                eprintln!(
                    "{} {} of {} quotes improved",
                    green("✔"),
                    improved,
                    out.quotes.len()
                );
            }
        }

        Command::Insights {
            input,
            output,
            dir,
            pages,
            password,
            llm,
        } => {
            let mut builder = llm.builder().pages(pages);
            if let Some(p) = password {
                builder = builder.password(p);
            }
            if let Some(cb) = progress("chapters") {
                builder = builder.progress_callback(cb);
            }
            let config = builder.build().context("Invalid configuration")?;
            let analysis = insights::analyze_pdf(&input, &config)
                .await
                .context("Insight analysis failed")?;
            let path = output
                .unwrap_or_else(|| insights::default_analysis_path(&dir, input_stem(&input)));
            analysis.save(&path).await?;
            if !cli.quiet {
                eprintln!(
                    "{} {} insights from {} chapters  →  {}",
                    green("✔"),
                    analysis.total_insights,
                    analysis.total_chapters,
                    bold(&path.display().to_string())
                );
            }
        }

        Command::Import { files, db } => {
            let mut store = open_store(&db.db)?;
            let mut failed = 0usize;
            for f in &files {
                match import_quote_file(&mut store, f).await {
                    Ok(r) => println!(
                        "{} {}  {} imported, {} skipped (book {})",
                        green("✓"),
                        f.display(),
                        r.imported,
                        r.skipped,
                        r.book_id
                    ),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{} {}  {}", red("✗"), f.display(), e);
                    }
                }
            }
            if failed == files.len() {
                bail!("no file imported");
            }
        }

        Command::List {
            book,
            category,
            min_quality,
            engaging,
            unpublished,
            limit,
            offset,
            books,
            json,
            db,
        } => {
            let store = open_store(&db.db)?;
            if books {
                let list = store.list_books(limit)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&list)?);
                } else {
                    for b in list {
                        println!(
                            "{:>5}  {:<40}  {:>4} quotes  {}",
                            b.id.unwrap_or_default(),
                            b.title,
                            b.total_quotes,
                            dim(&b.author)
                        );
                    }
                }
                return Ok(());
            }
            let quotes = store.get_quotes(&QuoteFilter {
                book_id: book,
                category,
                min_quality,
                engaging_only: engaging,
                unpublished_only: unpublished,
                limit,
                offset,
            })?;
            print_quotes(&quotes, json)?;
        }

        Command::Search {
            text,
            limit,
            json,
            db,
        } => {
            let store = open_store(&db.db)?;
            print_quotes(&store.search_quotes(&text, limit)?, json)?;
        }

        Command::Stats { json, db } => {
            let stats = open_store(&db.db)?.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Books:        {}", stats.total_books);
                println!("Quotes:       {}", stats.total_quotes);
                println!("Published:    {}", stats.published_quotes);
                println!("Avg quality:  {:.2}", stats.avg_quality);
                for (cat, n) in &stats.by_category {
                    println!("  {:<20} {}", cat, n);
                }
            }
        }

        Command::Publish {
            id,
            text,
            dry_run,
            db,
        } => {
            if dry_run {
                let body = match (text, id) {
                    (Some(t), _) => t,
                    (None, Some(id)) => open_store(&db.db)?
                        .get_quote(id)?
                        .with_context(|| format!("quote {id} not found"))?
                        .quote
                        .publish_text()
                        .to_string(),
                    (None, None) => bail!("give a quote id or --text"),
                };
                println!("{body}");
                eprintln!("{}", dim(&format!("{} chars (dry run)", body.chars().count())));
                return Ok(());
            }

            let publisher = ThreadsPublisher::new(ThreadsConfig::from_env()?)?;
            let post = match (text, id) {
                (Some(t), _) => publisher.publish(&t).await?,
                (None, Some(id)) => {
                    let store = open_store(&db.db)?;
                    publish_stored(&store, &publisher, id).await?
                }
                (None, None) => bail!("give a quote id or --text"),
            };
            println!("{} published post {}", green("✔"), bold(&post.post_id));
        }
    }

    Ok(())
}

impl LlmArgs {
    fn builder(&self) -> edgequake_quotes::ExtractionConfigBuilder {
        let mut b = ExtractionConfig::builder()
            .concurrency(self.concurrency)
            .max_retries(self.max_retries)
            .api_timeout_secs(self.api_timeout);
        if let Some(ref p) = self.provider {
            b = b.provider_name(p.clone());
        }
        if let Some(ref m) = self.model {
            b = b.model(m.clone());
        }
        if let Some(ref m) = self.fast_model {
            b = b.fast_model(m.clone());
        }
        b
    }

    /// The configured client, or `None` to run offline.
    fn client(&self) -> Result<Option<LlmClient>> {
        let config = self.builder().build().context("Invalid configuration")?;
        resolve_client(&config).context("Failed to set up the LLM provider")
    }
}

fn open_store(path: &Path) -> Result<QuoteStore> {
    QuoteStore::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// File-name part of a path or URL, for default output names.
fn input_stem(input: &str) -> PathBuf {
    let tail = input
        .split(['?', '#'])
        .next()
        .unwrap_or(input)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(input);
    PathBuf::from(tail)
}

fn print_quotes(quotes: &[edgequake_quotes::store::StoredQuote], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(quotes)?);
        return Ok(());
    }
    for s in quotes {
        let flag = if s.published { green("●") } else { dim("○") };
        println!(
            "{} {:>5}  {:.2}  {}  {}",
            flag,
            s.id,
            s.quality_score,
            dim(&format!("[{}]", s.quote.category)),
            s.quote.publish_text()
        );
    }
    if quotes.is_empty() {
        eprintln!("{}", dim("no quotes"));
    }
    Ok(())
}

/// Make sure the pdfium library is present, downloading it with a progress
/// bar on first run.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    #[cfg(feature = "bundled")]
    {
        let _ = quiet;
        // The embedded library is unpacked into the cache on first use.
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to extract bundled PDFium engine")?;
    }

    #[cfg(not(feature = "bundled"))]
    if !pdfium_auto::is_pdfium_cached() {
        if quiet {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
            return Ok(());
        }

        let dl_bar = ProgressBar::new(0);
        dl_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        dl_bar.set_prefix("PDF engine");
        dl_bar.set_message("Connecting…");
        dl_bar.enable_steady_tick(Duration::from_millis(80));

        let bar = dl_bar.clone();
        tokio::task::block_in_place(|| {
            pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                if let Some(t) = total {
                    if bar.length().unwrap_or(0) != t {
                        bar.set_length(t);
                    }
                }
                bar.set_position(downloaded);
            }))
        })
        .context("Failed to download PDFium engine")?;
        dl_bar.finish_with_message("ready ✓");
    }
    Ok(())
}
