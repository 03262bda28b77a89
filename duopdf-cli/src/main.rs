use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use chrono::Utc;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use duopdf_core::{
    BackupStore, Command, FileBackupStore, Settings, Side, Workspace, WorkspaceEvent,
};
use duopdf_render::{LopdfPersistence, PdfiumEngine};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "duopdf",
    version,
    about = "Side-by-side PDF viewer core, driven from the command line"
)]
struct Args {
    /// Settings file; defaults to the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Render one page through the scheduler and write it as PNG
    Render {
        file: PathBuf,
        /// 1-based page number
        #[arg(short, long, default_value_t = 1)]
        page: usize,
        #[arg(short, long)]
        scale: Option<f32>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Search the document, nearest pages to --from first
    Search {
        file: PathBuf,
        query: String,
        #[arg(long, default_value_t = 1)]
        from: usize,
    },
    /// List the comments and highlights stored in the document
    Annotations { file: PathBuf },
    /// Add a point comment at a page position given in percent and export
    Annotate {
        file: PathBuf,
        #[arg(short, long)]
        page: usize,
        #[arg(short)]
        x: f64,
        #[arg(short)]
        y: f64,
        #[arg(short, long)]
        text: String,
        #[arg(long)]
        author: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show where the right document lands when the left one is scrolled
    Sync {
        left: PathBuf,
        right: PathBuf,
        /// 1-based page of the left document
        #[arg(short, long)]
        page: usize,
        /// Fraction of that page scrolled past the top edge
        #[arg(short, long, default_value_t = 0.0)]
        fraction: f64,
    },
    /// Print the effective settings, or write them with --write
    Config {
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "duopdf", "duopdf")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(|| Settings::default_path(&project_dirs));
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("failed to read settings from {:?}", settings_path))?;

    if let Action::Config { write } = args.command {
        if write {
            settings
                .save(&settings_path)
                .with_context(|| format!("failed to write settings to {:?}", settings_path))?;
            println!("wrote {}", settings_path.display());
        } else {
            print!("{}", toml::to_string_pretty(&settings)?);
        }
        return Ok(());
    }

    let backups: Arc<dyn BackupStore> = Arc::new(FileBackupStore::new(
        project_dirs.data_local_dir().join("backups"),
    )?);
    let engine = PdfiumEngine::new()?;

    match args.command {
        Action::Render {
            file,
            page,
            scale,
            output,
        } => {
            let mut workspace = Workspace::new(settings, Arc::new(LopdfPersistence), backups);
            open(&mut workspace, &engine, Side::Left, &file).await?;
            render(&mut workspace, &file, page, scale, output).await
        }
        Action::Search { file, query, from } => {
            let mut workspace = Workspace::new(settings, Arc::new(LopdfPersistence), backups);
            open(&mut workspace, &engine, Side::Left, &file).await?;
            workspace.apply(
                Command::GotoPage {
                    side: Side::Left,
                    page: from,
                },
                Instant::now(),
            )?;
            workspace.search(Side::Left, &query).await;
            let results = workspace.search_results(Side::Left);
            for result in &results {
                println!(
                    "page {:>4}  #{:<3} {}",
                    result.page,
                    result.occurrence_index_on_page + 1,
                    result.snippet.replace('\n', " ")
                );
            }
            info!(query, matches = results.len(), "search finished");
            Ok(())
        }
        Action::Annotations { file } => {
            let mut workspace = Workspace::new(settings, Arc::new(LopdfPersistence), backups);
            open(&mut workspace, &engine, Side::Left, &file).await?;
            let annotations: Vec<_> = workspace
                .annotations()
                .for_side(Side::Left)
                .into_iter()
                .cloned()
                .collect();
            println!("{}", serde_json::to_string_pretty(&annotations)?);
            Ok(())
        }
        Action::Annotate {
            file,
            page,
            x,
            y,
            text,
            author,
            output,
        } => {
            let mut settings = settings;
            if let Some(author) = author {
                settings.author = author;
            }
            let mut workspace = Workspace::new(settings, Arc::new(LopdfPersistence), backups);
            open(&mut workspace, &engine, Side::Left, &file).await?;
            workspace.add_comment(Side::Left, page, x, y)?;
            workspace.set_draft_text(&text)?;
            let saved = workspace.save_comment(Utc::now())?;
            let exported = workspace.export(Side::Left, Utc::now())?;
            let target = output.unwrap_or_else(|| sibling(&file, &exported.file_name));
            fs::write(&target, &exported.bytes)
                .with_context(|| format!("failed to write {:?}", target))?;
            println!("{} -> {}", saved.id, target.display());
            Ok(())
        }
        Action::Sync {
            left,
            right,
            page,
            fraction,
        } => {
            let mut workspace = Workspace::new(settings, Arc::new(LopdfPersistence), backups);
            open(&mut workspace, &engine, Side::Left, &left).await?;
            open(&mut workspace, &engine, Side::Right, &right).await?;
            sync(&mut workspace, page, fraction)
        }
        Action::Config { .. } => Ok(()),
    }
}

async fn open(
    workspace: &mut Workspace,
    engine: &PdfiumEngine,
    side: Side,
    path: &Path,
) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {:?}", path))?;
    let display_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    workspace
        .open_with(
            engine,
            side,
            Bytes::from(bytes),
            &display_name,
            Some(path.display().to_string()),
        )
        .await
        .with_context(|| format!("failed to open {:?}", path))?;
    for event in workspace.drain_events() {
        if let WorkspaceEvent::BackupAvailable { count, .. } = event {
            warn!(count, path = %path.display(), "an annotation backup exists for this document");
        }
    }
    Ok(())
}

async fn render(
    workspace: &mut Workspace,
    file: &Path,
    page: usize,
    scale: Option<f32>,
    output: Option<PathBuf>,
) -> Result<()> {
    let now = Instant::now();
    workspace.apply(
        Command::GotoPage {
            side: Side::Left,
            page,
        },
        now,
    )?;
    if let Some(scale) = scale {
        workspace.apply(
            Command::SetScale {
                side: Side::Left,
                scale,
            },
            now,
        )?;
        // Let the zoom debounce run out so the scheduler renders at the new scale.
        let settled = now + workspace.settings().calibration.zoom_debounce;
        workspace.tick(settled);
    }
    workspace.render_until_settled(false).await;

    for event in workspace.drain_events() {
        match event {
            WorkspaceEvent::PageTooLarge { message, .. } => bail!(message),
            WorkspaceEvent::RenderFailed { error, .. } if error.page() == page => {
                bail!(error)
            }
            _ => {}
        }
    }

    let rendered = workspace
        .pane(Side::Left)
        .surface(page)
        .ok_or_else(|| anyhow!("page {page} was not rendered"))?;
    let surface = &rendered.surface;
    let image = image::RgbaImage::from_raw(surface.width, surface.height, surface.pixels.clone())
        .ok_or_else(|| anyhow!("surface of page {page} has an unexpected size"))?;
    let target = output.unwrap_or_else(|| {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string());
        sibling(file, &format!("{stem}-p{page}.png"))
    });
    image
        .save(&target)
        .with_context(|| format!("failed to write {:?}", target))?;
    println!(
        "page {page} at {:.2}x: {}x{} -> {}",
        rendered.scale,
        surface.width,
        surface.height,
        target.display()
    );
    Ok(())
}

fn sync(workspace: &mut Workspace, page: usize, fraction: f64) -> Result<()> {
    let now = Instant::now();
    workspace.apply(
        Command::ToggleSync {
            capture_offset: false,
        },
        now,
    )?;
    let slot = workspace
        .pane(Side::Left)
        .layout()
        .and_then(|layout| layout.slot(page).copied())
        .ok_or_else(|| anyhow!("page {page} is not in the left document"))?;
    workspace.scroll(
        Side::Left,
        slot.top + fraction.clamp(0.0, 1.0) * slot.height,
        0.0,
        now,
    );
    match workspace.frame(now) {
        Some(command) => println!(
            "right pane -> page {} at {:.1}% (position {:.3}, scroll top {:.1})",
            command.page,
            command.fraction * 100.0,
            command.position,
            command.scroll_top
        ),
        None => println!("right pane already in sync"),
    }
    Ok(())
}

fn sibling(file: &Path, name: &str) -> PathBuf {
    file.parent()
        .map(|dir| dir.join(name))
        .unwrap_or_else(|| PathBuf::from(name))
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "duopdf.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
