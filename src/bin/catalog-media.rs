//! CLI binary for catalog-media.
//!
//! The polling display loop over the library's job board: it maps flags to a
//! `PipelineConfig`, launches one job, drains its messages without blocking
//! and renders them.

use anyhow::{Context, Result};
use catalog_media::{
    CadArchivePipeline, CatalogImagesPipeline, DrawingFormat, DrawingsPipeline, FileListCache,
    JobBoard, JobInput, JobRecord, JobStatus, JpegConvertPipeline, MediaDownloadPipeline,
    PdfPagesPipeline, Pipeline, PipelineConfig, StatusMessage, StorageKind, UploadedFile,
};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── Live display ─────────────────────────────────────────────────────────────

/// Renders job messages as a progress bar plus one line per event.
///
/// Without a bar the library's own `tracing` output on stderr is the trail,
/// so nothing is printed here.
struct JobDisplay {
    bar: Option<ProgressBar>,
    total: u64,
}

impl JobDisplay {
    fn new(show_progress: bool) -> Self {
        let bar = show_progress.then(|| {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_strings(TICKS),
            );
            bar.set_prefix("Queued");
            bar.set_message("Waiting for the job thread…");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        Self { bar, total: 0 }
    }

    fn handle(&mut self, message: &StatusMessage) {
        let line = match message {
            StatusMessage::StatusUpdate(record) | StatusMessage::Complete(record) => {
                self.refresh(record);
                return;
            }
            StatusMessage::Info(text) => format!("{} {}", cyan("◆"), text),
            StatusMessage::Warning(text) => format!("  {} {}", yellow("⚠"), text),
            StatusMessage::Error(text) => format!("  {} {}", red("✗"), red(text)),
            StatusMessage::Fatal(text) => format!("{} {}", red("✘"), bold(text)),
        };
        if let Some(bar) = &self.bar {
            bar.println(line);
        }
    }

    fn refresh(&mut self, record: &JobRecord) {
        let Some(bar) = &self.bar else { return };
        let total = record.total_files as u64;
        if total > 0 && total != self.total {
            self.total = total;
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {pos:>4}/{len} files  \
                     ⏱ {elapsed_precise}  {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
            );
            bar.set_length(total);
        }
        bar.set_position(record.processed_files as u64);
        if let Some(stage) = &record.stage {
            bar.set_prefix(format!("{}/{} {}", stage.position, stage.count, stage.name));
        } else {
            bar.set_prefix(record.status.to_string());
        }
        if let Some(current) = &record.current_file {
            bar.set_message(dim(current));
        }
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Crop and render every image in <project>/1_Abbildungen/1_Originale
  catalog-media images /data/projects/spring

  # Same, copy results to the media share and write a download zip
  catalog-media images /data/projects/spring --secondary /mnt/media --bundle spring.zip

  # Process uploaded files instead of the originals folder
  catalog-media images /data/projects/spring --upload a.png --upload b.jpg

  # Technical drawings on a half-page template
  catalog-media drawings /data/projects/spring --template Vorlage.pdf --half-page

  # Zip every CAD file in a folder, plus one master archive
  catalog-media cad /data/cad/export --bundle alle_CAD.zip

  # Every PDF page as a JPEG, at four times 72 dpi
  catalog-media pdf-to-jpg /data/scans --zoom 4 --bundle konvertierte_bilder.zip

  # TIFF, BMP and PNG to JPEG
  catalog-media to-jpg /data/scans

  # Fetch the media listed in a spreadsheet
  catalog-media download Mediendaten.xlsx -o /data/projects/spring/downloads

  # Machine-readable final job record
  catalog-media --json images /data/projects/spring > job.json

PROJECT LAYOUT:
  images    1_Abbildungen/1_Originale → 2_Bad_Artikelbild_max (.tif) → 3_Katalog (.jpg)
  drawings  2_Masszeichnungen/1_Originale → 2b_WebJPEG (.jpg + .pdf)
  cad       <folder> → <folder>/ZIP_Output (.zip)
  pdf       <folder>/*.pdf → <folder>/JPG_Output/<name>/ (.jpg per page)
  to-jpg    <folder>/*.tif|bmp|png → <folder>/JPG_Output (.jpg)
  download  sheet URLs → <output> (+ download_log.txt on failures)
  summary   8_Importfiles_Media-Datenpfade/*.xlsx

ENVIRONMENT VARIABLES:
  CATALOG_MEDIA_SECONDARY     Secondary destination root
  CATALOG_MEDIA_CONCURRENCY   Worker count per stage
  CATALOG_MEDIA_TIMEOUT       Per-item timeout in seconds
  CATALOG_MEDIA_TEMPLATE      PDF template for drawings
  CATALOG_MEDIA_FONT          Font for the date stamp on drawings
  CATALOG_MEDIA_GHOSTSCRIPT   Ghostscript executable (EPS drawings)
  PDFIUM_LIB_PATH             Path to an existing libpdfium (pdf-to-jpg)
  RUST_LOG                    Log filter, overrides -v / -q

EXIT STATUS:
  0 when the job completed (even with failed items), 1 when it ended in error.
"#;

/// Batch-convert product-catalog media into import folder layouts.
#[derive(Parser, Debug)]
#[command(
    name = "catalog-media",
    version,
    about = "Batch-convert product-catalog media into import folder layouts",
    long_about = "Batch-convert catalog media: crop and render article images, compose technical \
drawings onto PDF templates, zip CAD files, render PDF pages and other rasters to JPEG, and \
download the media listed in a spreadsheet. Every job runs in the background over a bounded \
worker pool and writes a summary spreadsheet for the downstream import.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print the final job record as JSON on stdout.
    #[arg(long, global = true, env = "CATALOG_MEDIA_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "CATALOG_MEDIA_NO_PROGRESS")]
    no_progress: bool,

    /// Interval between two polls of the job queue, in milliseconds.
    #[arg(long, global = true, env = "CATALOG_MEDIA_POLL_MS", default_value_t = 100,
          value_parser = clap::value_parser!(u64).range(10..=10_000))]
    poll_ms: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CATALOG_MEDIA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CATALOG_MEDIA_QUIET")]
    quiet: bool,

    /// Also append logs to this file.
    #[arg(long, global = true, env = "CATALOG_MEDIA_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crop article images and render grayscale catalog thumbnails.
    Images(JobArgs),
    /// Compose technical drawings and merge them into a PDF template.
    Drawings(DrawingArgs),
    /// Zip every CAD file of a folder individually.
    Cad(JobArgs),
    /// Render every page of every PDF in a folder to JPEG.
    #[command(name = "pdf-to-jpg")]
    PdfToJpg(PdfArgs),
    /// Convert TIFF, BMP and PNG files of a folder to JPEG.
    #[command(name = "to-jpg")]
    ToJpg(JobArgs),
    /// Download the product images, ambience pictures and drawings listed
    /// in a media spreadsheet.
    Download(DownloadArgs),
}

#[derive(Args, Debug)]
struct JobArgs {
    /// Project root (images, drawings) or source folder (cad, pdf-to-jpg, to-jpg).
    project: PathBuf,

    /// Process these files instead of scanning the input folder.
    #[arg(long = "upload", value_name = "FILE")]
    uploads: Vec<PathBuf>,

    /// Treat the project as network storage (at most two workers).
    #[arg(long, env = "CATALOG_MEDIA_NETWORK")]
    network: bool,

    /// Copy results below this secondary destination root.
    #[arg(long, env = "CATALOG_MEDIA_SECONDARY")]
    secondary: Option<PathBuf>,

    /// Workers per stage. Default: derived from the storage kind and CPUs.
    #[arg(short, long, env = "CATALOG_MEDIA_CONCURRENCY",
          value_parser = clap::value_parser!(u64).range(1..=64))]
    concurrency: Option<u64>,

    /// Per-item timeout in seconds.
    #[arg(long, env = "CATALOG_MEDIA_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Write a download zip with all results.
    #[arg(long, value_name = "ZIP")]
    bundle: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DrawingArgs {
    #[command(flatten)]
    job: JobArgs,

    /// PDF template the drawings are merged onto.
    #[arg(long, env = "CATALOG_MEDIA_TEMPLATE")]
    template: Option<PathBuf>,

    /// Compose for the half-page format (17.3 × 9.6 cm).
    #[arg(long, env = "CATALOG_MEDIA_HALF_PAGE")]
    half_page: bool,

    /// Font for the date stamp. Default: Arial or any system sans-serif.
    #[arg(long, env = "CATALOG_MEDIA_FONT")]
    font: Option<PathBuf>,

    /// Ghostscript executable for EPS sources. Default: searched on PATH.
    #[arg(long, env = "CATALOG_MEDIA_GHOSTSCRIPT")]
    ghostscript: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PdfArgs {
    #[command(flatten)]
    job: JobArgs,

    /// Page scale, 1.0 = 72 dpi.
    #[arg(long, default_value_t = 3.0)]
    zoom: f32,

    /// PDFium shared library. Default: working directory, then system paths.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Spreadsheet with the columns Artikel-Nr, Abbildungen, Ambientebilder
    /// and Masszeichnungen (xlsx, xls, ods or csv).
    sheet: PathBuf,

    /// Folder the files are saved to.
    #[arg(short, long)]
    output: PathBuf,

    /// Parallel downloads. Default: derived from the storage kind.
    #[arg(short, long, env = "CATALOG_MEDIA_CONCURRENCY",
          value_parser = clap::value_parser!(u64).range(1..=64))]
    concurrency: Option<u64>,

    /// Per-file timeout in seconds.
    #[arg(long, env = "CATALOG_MEDIA_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Treat the output folder as network storage.
    #[arg(long, env = "CATALOG_MEDIA_NETWORK")]
    network: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar prints every job message itself; library logs below
    // ERROR would only duplicate them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    // ── Build job ────────────────────────────────────────────────────────
    let pipeline = build_pipeline(&cli.command)?;

    // ── Poll ─────────────────────────────────────────────────────────────
    let mut board = JobBoard::new();
    let id = board.launch(pipeline).context("Failed to start job")?;
    let mut display = JobDisplay::new(show_progress);
    let poll = Duration::from_millis(cli.poll_ms);

    while board.polling_needed() {
        for message in board.drain(&id) {
            display.handle(&message);
        }
        if board.polling_needed() {
            std::thread::sleep(poll);
        }
    }
    display.finish();

    let record = board
        .snapshot(&id)
        .cloned()
        .context("Job disappeared from the board")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&record).context("Failed to serialise job record")?
        );
    } else if !cli.quiet {
        print_summary(&record);
    }

    Ok(if record.status == JobStatus::Error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Map a subcommand to its pipeline.
fn build_pipeline(command: &Command) -> Result<Box<dyn Pipeline>> {
    let pipeline: Box<dyn Pipeline> = match command {
        Command::Images(args) => {
            let (config, cache) = build_config(args, |b| b)?;
            let mut p = CatalogImagesPipeline::new(config, cache).with_input(read_uploads(&args.uploads)?);
            if let Some(bundle) = &args.bundle {
                p = p.with_bundle(bundle);
            }
            Box::new(p)
        }
        Command::Drawings(args) => {
            let (config, cache) = build_config(&args.job, |mut b| {
                if let Some(template) = &args.template {
                    b = b.template_pdf(template);
                }
                if let Some(font) = &args.font {
                    b = b.font_path(font);
                }
                if let Some(gs) = &args.ghostscript {
                    b = b.ghostscript(gs);
                }
                if args.half_page {
                    b = b.drawing_format(DrawingFormat::HalfPage);
                }
                b
            })?;
            Box::new(
                DrawingsPipeline::new(config, cache).with_input(read_uploads(&args.job.uploads)?),
            )
        }
        Command::Cad(args) => {
            let (config, cache) = build_config(args, |b| b)?;
            let mut p = CadArchivePipeline::new(config, cache).with_input(read_uploads(&args.uploads)?);
            if let Some(bundle) = &args.bundle {
                p = p.with_bundle(bundle);
            }
            Box::new(p)
        }
        Command::PdfToJpg(args) => {
            let (config, cache) = build_config(&args.job, |mut b| {
                b = b.pdf_zoom(args.zoom);
                if let Some(lib) = &args.pdfium {
                    b = b.pdfium_library(lib);
                }
                b
            })?;
            let mut p =
                PdfPagesPipeline::new(config, cache).with_input(read_uploads(&args.job.uploads)?);
            if let Some(bundle) = &args.job.bundle {
                p = p.with_bundle(bundle);
            }
            Box::new(p)
        }
        Command::ToJpg(args) => {
            let (config, cache) = build_config(args, |b| b)?;
            let mut p = JpegConvertPipeline::new(config, cache).with_input(read_uploads(&args.uploads)?);
            if let Some(bundle) = &args.bundle {
                p = p.with_bundle(bundle);
            }
            Box::new(p)
        }
        Command::Download(args) => {
            let storage = if args.network {
                StorageKind::Network
            } else {
                StorageKind::detect(&args.output)
            };
            let mut builder = PipelineConfig::builder(&args.output).storage(storage);
            if let Some(n) = args.concurrency {
                builder = builder.concurrency(n as usize);
            }
            if let Some(secs) = args.timeout {
                builder = builder.item_timeout_secs(secs);
            }
            let config = builder.build().context("Invalid configuration")?;
            Box::new(MediaDownloadPipeline::new(config, &args.sheet))
        }
    };
    Ok(pipeline)
}

/// Map shared job flags to `PipelineConfig`; `extra` applies
/// subcommand-specific settings.
fn build_config(
    args: &JobArgs,
    extra: impl FnOnce(catalog_media::PipelineConfigBuilder) -> catalog_media::PipelineConfigBuilder,
) -> Result<(PipelineConfig, Arc<FileListCache>)> {
    let storage = if args.network {
        StorageKind::Network
    } else {
        StorageKind::detect(&args.project)
    };

    let mut builder = PipelineConfig::builder(&args.project).storage(storage);
    if let Some(n) = args.concurrency {
        builder = builder.concurrency(n as usize);
    }
    if let Some(secs) = args.timeout {
        builder = builder.item_timeout_secs(secs);
    }
    if let Some(root) = &args.secondary {
        builder = builder.secondary_root(root);
    }
    let config = extra(builder).build().context("Invalid configuration")?;
    let cache = Arc::new(FileListCache::new(config.listing_ttl()));
    Ok((config, cache))
}

/// Read `--upload` files into memory.
fn read_uploads(paths: &[PathBuf]) -> Result<JobInput> {
    if paths.is_empty() {
        return Ok(JobInput::Directory);
    }
    let uploads = paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read upload {}", path.display()))?;
            Ok(UploadedFile::new(file_label(path), bytes))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(JobInput::Uploads(uploads))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Final report on stderr.
fn print_summary(record: &JobRecord) {
    let seconds = record.duration().num_milliseconds() as f64 / 1000.0;
    match record.status {
        JobStatus::Completed => {
            let result = record.result.clone().unwrap_or_default();
            let failed = result.failed_items.len();
            eprintln!(
                "{}  {}/{} files  {:.1}s",
                if failed == 0 { green("✔") } else { yellow("⚠") },
                bold(&result.rows.to_string()),
                record.total_files,
                seconds,
            );
            if let Some(summary) = &result.summary {
                eprintln!("   summary  →  {}", bold(&summary.display().to_string()));
            }
            if let Some(bundle) = &result.bundle {
                eprintln!("   bundle   →  {}", bold(&bundle.display().to_string()));
            }
            if let Some(copied) = record.copied_to_secondary {
                eprintln!(
                    "   secondary copy {}",
                    if copied { green("ok") } else { yellow("incomplete") }
                );
            }
            if failed > 0 {
                eprintln!("   {} failed:", red(&failed.to_string()));
                for name in &result.failed_items {
                    eprintln!("     {} {}", red("✗"), name);
                }
            }
        }
        JobStatus::Error => {
            let fatal = record.errors.last().map(String::as_str).unwrap_or("unknown error");
            eprintln!("{} Job failed after {:.1}s: {}", red("✘"), seconds, bold(fatal));
            let earlier = record.errors.len().saturating_sub(1);
            if earlier > 0 {
                eprintln!("   {} earlier message(s):", dim(&earlier.to_string()));
                for line in &record.errors[..earlier] {
                    eprintln!("     {}", dim(line));
                }
            }
        }
        JobStatus::Queued | JobStatus::Processing => {
            eprintln!("{} Job ended while {}", yellow("⚠"), record.status);
        }
    }
}
