//! # Folio CLI
//!
//! Command-line interface for the report composition engine.
//!
//! ## Usage
//!
//! ```bash
//! # Serve the image editor API
//! folio serve --listen 0.0.0.0:8080
//!
//! # Crop and blur part of a photo offline
//! folio edit photo.jpg out.png --crop 0,0,800,600 --pixelate 100,100,200,80
//!
//! # Download a report (must be in Final Review or Submitted)
//! folio --api-url https://reports.example/api --token $TOKEN export r-42 --format pdf -o r-42.pdf
//!
//! # Move a report one status forward
//! folio advance r-42
//! ```

use clap::{Args, Parser, Subcommand};
use image::ImageFormat;
use std::path::PathBuf;
use tracing::{error, info, warn};

use folio::{
    EngineConfig, FolioError, logging,
    editor::{EditorOptions, RasterEditor, Rect},
    notice::NoticeLevel,
    report::ExportFormat,
    server::{self, ServerConfig},
    session::SessionContext,
    store::http::{HttpBackend, HttpGeographyService},
    workflow::Workflow,
};

/// Folio - report composition engine
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Base URL of the report API
    #[arg(long, env = "FOLIO_API_URL", global = true)]
    api_url: Option<String>,

    /// Base URL of the geography feature service
    #[arg(long, env = "FOLIO_GEO_URL", global = true)]
    geo_url: Option<String>,

    /// Bearer token sent to the report API
    #[arg(long, env = "FOLIO_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// User the session acts as
    #[arg(long, env = "FOLIO_USER", default_value = "cli", global = true)]
    user: String,

    /// Request timeout in seconds
    #[arg(long, env = "FOLIO_TIMEOUT", global = true)]
    timeout: Option<u64>,

    /// Emit JSON log lines
    #[arg(long, env = "FOLIO_LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the image editor HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, env = "FOLIO_LISTEN", default_value = "0.0.0.0:8080")]
        listen: String,

        /// Longest edge kept when an image is loaded
        #[arg(long, env = "FOLIO_MAX_DIMENSION")]
        max_dimension: Option<u32>,
    },

    /// Edit an image file offline
    Edit {
        /// Input image
        input: PathBuf,

        /// Output image (format from extension)
        output: PathBuf,

        /// Crop to x,y,width,height (applied first)
        #[arg(long, value_parser = parse_rect)]
        crop: Option<Rect>,

        /// Pixelate x,y,width,height (repeatable)
        #[arg(long, value_parser = parse_rect)]
        pixelate: Vec<Rect>,

        /// Block size for pixelation
        #[arg(long, default_value = "10")]
        pixel_size: u32,

        /// Longest edge kept when the image is loaded
        #[arg(long)]
        max_dimension: Option<u32>,
    },

    /// Download a rendered report
    Export {
        /// Report identifier
        report: String,

        /// Output format (pdf or docx)
        #[arg(long, default_value = "pdf", value_parser = parse_format)]
        format: ExportFormat,

        /// Output file (defaults to <report>.<format>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Advance a report to its next review status
    Advance {
        /// Report identifier
        report: String,
    },
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("expected x,y,width,height: {}", e))?;
    match parts.as_slice() {
        [x, y, w, h] => Ok(Rect::new(*x, *y, *w, *h)),
        _ => Err("expected x,y,width,height".to_string()),
    }
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    ExportFormat::parse(s).ok_or_else(|| format!("unknown format '{}' (pdf, docx)", s))
}

impl GlobalArgs {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(url) = &self.api_url {
            config.api_base_url = url.clone();
        }
        if let Some(url) = &self.geo_url {
            config.geo_base_url = url.clone();
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_secs = timeout;
        }
        config
    }

    fn session(&self) -> SessionContext {
        let session = SessionContext::new(self.user.clone());
        match &self.token {
            Some(token) => session.with_token(token.clone()),
            None => session,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init("folio=info,tower_http=info", cli.global.log_json);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), FolioError> {
    let mut config = cli.global.engine_config();

    match cli.command {
        Commands::Serve {
            listen,
            max_dimension,
        } => {
            if let Some(max) = max_dimension {
                config.editor_max_dimension = max;
            }
            server::serve(ServerConfig {
                listen_addr: listen,
                engine: config,
            })
            .await
        }

        Commands::Edit {
            input,
            output,
            crop,
            pixelate,
            pixel_size,
            max_dimension,
        } => {
            if let Some(max) = max_dimension {
                config.editor_max_dimension = max;
            }
            let bytes = std::fs::read(&input)?;
            let mut editor = RasterEditor::new(EditorOptions::from(&config));
            editor.load_bytes(&bytes, None)?;

            if let Some(rect) = crop
                && !editor.crop(rect)
            {
                return Err(FolioError::Validation(format!("crop {:?} is outside the image", rect)));
            }
            for rect in pixelate {
                if !editor.pixelate(rect, pixel_size) {
                    warn!(?rect, "pixelate region is outside the image, skipped");
                }
            }

            let format = ImageFormat::from_path(&output).unwrap_or(ImageFormat::Png);
            std::fs::write(&output, editor.export_snapshot(format)?)?;
            let (w, h) = editor.dimensions();
            info!(output = %output.display(), width = w, height = h, "image written");
            Ok(())
        }

        Commands::Export {
            report,
            format,
            output,
        } => {
            let mut workflow = http_workflow(&cli.global, config)?;
            workflow.load_report(&report).await?;
            let bytes = workflow.export(format).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(format!("{}.{}", report, format.as_str())));
            std::fs::write(&path, &bytes)?;
            info!(path = %path.display(), bytes = bytes.len(), "report downloaded");
            report_notices(&workflow);
            workflow.close().await;
            Ok(())
        }

        Commands::Advance { report } => {
            let mut workflow = http_workflow(&cli.global, config)?;
            workflow.load_report(&report).await?;
            match workflow.advance_status().await? {
                Some(status) => info!(report = %report, status = status.label(), "status advanced"),
                None => info!(report = %report, "report is already at its final status"),
            }
            workflow.close().await;
            Ok(())
        }
    }
}

fn http_workflow(global: &GlobalArgs, config: EngineConfig) -> Result<Workflow, FolioError> {
    let session = global.session();
    let stores = HttpBackend::new(&config, &session)?.stores(HttpGeographyService::new(&config)?);
    Ok(Workflow::new(session, stores, config))
}

fn report_notices(workflow: &Workflow) {
    for notice in workflow.drain_notices() {
        match notice.level {
            NoticeLevel::Warning => warn!("{}", notice.message),
            NoticeLevel::Error => error!("{}", notice.message),
        }
    }
}
