//! CLI Tooling
//!
//! `gentable replay` pushes a captured backend response through a real
//! session; `gentable generate` runs a session against the configured HTTP
//! backend for a table loaded from JSON.

use crate::config::{ConfigLoader, GenTableConfig};
use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::provider::HttpBackend;
use crate::session::{
    GenerationBackend, ReplayBackend, SessionManager, SessionReport, SessionRequest,
};
use crate::table::{Column, GenConfig, Row, TableRegistry, TableStore};
use crate::types::CellAddress;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Gentable CLI - streaming generation for table cells
#[derive(Parser)]
#[command(name = "gentable")]
#[command(about = "Stream generated values into table cells")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Logging config with command-line flags applied over `base`.
    pub fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut config = base.clone();
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a captured response (SSE stream or JSON body) into one cell
    Replay {
        /// Captured response body
        #[arg(long)]
        capture: PathBuf,
        /// Row id of the replayed cell
        #[arg(long, default_value = "row-1")]
        row: String,
        /// Column id of the replayed cell
        #[arg(long, default_value = "output")]
        column: String,
        /// Bytes per simulated network read
        #[arg(long, default_value = "64")]
        chunk_size: usize,
        /// Treat the capture as a single JSON body
        #[arg(long)]
        non_streaming: bool,
    },
    /// Generate cells of a JSON table definition with the configured backend
    Generate {
        /// Table definition: {"id": ..., "columns": [...], "rows": [...]}
        #[arg(long)]
        table: PathBuf,
        /// Target cell as row:column (repeatable)
        #[arg(long = "target", required = true)]
        targets: Vec<String>,
        /// Request a single JSON response instead of a stream
        #[arg(long)]
        non_streaming: bool,
        /// Output format (table or json)
        #[arg(long, default_value = "table")]
        format: String,
    },
}

/// Table definition file for `generate`
#[derive(Debug, Deserialize)]
struct TableDefinition {
    #[serde(default = "default_table_id")]
    id: String,
    columns: Vec<Column>,
    #[serde(default)]
    rows: Vec<Row>,
}

fn default_table_id() -> String {
    "table".to_string()
}

/// CLI context for executing commands
pub struct CliContext {
    config: GenTableConfig,
}

impl CliContext {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(None)?,
        };
        Ok(Self { config })
    }

    pub fn from_config(config: GenTableConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GenTableConfig {
        &self.config
    }

    /// Execute a CLI command
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Replay {
                capture,
                row,
                column,
                chunk_size,
                non_streaming,
            } => {
                self.replay(capture, row, column, *chunk_size, !non_streaming)
                    .await
            }
            Commands::Generate {
                table,
                targets,
                non_streaming,
                format,
            } => self.generate(table, targets, !non_streaming, format).await,
        }
    }

    async fn replay(
        &self,
        capture: &Path,
        row: &str,
        column: &str,
        chunk_size: usize,
        streaming: bool,
    ) -> Result<String, ApiError> {
        if chunk_size == 0 {
            return Err(ApiError::InvalidRequest(
                "--chunk-size must be at least 1".to_string(),
            ));
        }
        let body = std::fs::read(capture).map_err(|e| {
            ApiError::InvalidRequest(format!("Failed to read {}: {}", capture.display(), e))
        })?;
        info!(capture = %capture.display(), bytes = body.len(), "Replaying capture");

        let registry = Arc::new(TableRegistry::new());
        let store = registry.init(
            "replay",
            vec![Column::output(
                column,
                GenConfig {
                    model: "replay".to_string(),
                    prompt: String::new(),
                    system_prompt: None,
                    temperature: None,
                    max_tokens: None,
                    rag_params: None,
                },
            )],
        );
        store.add_row(Row::new(row))?;

        let backend = Arc::new(ReplayBackend::new(body, chunk_size));
        let address = CellAddress::new(row, column);
        let report = run_session(
            registry,
            backend,
            self,
            SessionRequest::new("replay", vec![address.clone()], streaming),
        )
        .await?;

        let output = json!({
            "session": report_json(&report),
            "cell": store.cell(&address),
        });
        serde_json::to_string_pretty(&output)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to render output: {}", e)))
    }

    async fn generate(
        &self,
        table: &Path,
        targets: &[String],
        streaming: bool,
        format: &str,
    ) -> Result<String, ApiError> {
        if format != "table" && format != "json" {
            return Err(ApiError::InvalidRequest(format!(
                "Invalid format '{}' (must be 'table' or 'json')",
                format
            )));
        }
        let definition = load_table_definition(table)?;
        let targets = targets
            .iter()
            .map(|target| {
                CellAddress::parse(target).ok_or_else(|| {
                    ApiError::InvalidRequest(format!("Target must be row:column, got '{}'", target))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let backend = Arc::new(HttpBackend::new(self.config.provider()?)?);
        let registry = Arc::new(TableRegistry::new());
        let store = registry.init(&definition.id, definition.columns);
        for row in definition.rows {
            store.add_row(row)?;
        }

        let report = run_session(
            registry,
            backend,
            self,
            SessionRequest::new(definition.id.clone(), targets, streaming),
        )
        .await?;
        if let Some(err) = report.error() {
            return Err(err);
        }

        if format == "json" {
            return serde_json::to_string_pretty(&json!({
                "session": report_json(&report),
                "rows": store.rows(),
            }))
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to render output: {}", e)));
        }
        Ok(render_table(&store))
    }
}

async fn run_session(
    registry: Arc<TableRegistry>,
    backend: Arc<dyn GenerationBackend>,
    context: &CliContext,
    request: SessionRequest,
) -> Result<SessionReport, ApiError> {
    let manager = SessionManager::new(registry, backend, context.config.session.clone());
    let handle = manager.start_session(request)?;
    Ok(handle.wait().await)
}

fn load_table_definition(path: &Path) -> Result<TableDefinition, ApiError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ApiError::InvalidRequest(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        ApiError::InvalidRequest(format!("Invalid table definition {}: {}", path.display(), e))
    })
}

fn report_json(report: &SessionReport) -> serde_json::Value {
    json!({
        "id": report.session_id.to_string(),
        "state": report.state.name(),
        "error": report.error().map(|e| e.to_string()),
        "frames": report.frames,
        "malformed_frames": report.malformed_frames,
        "skipped_events": report.skipped_events,
        "diagnostics": report.diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        "cell_errors": report
            .cell_errors
            .iter()
            .map(|(address, err)| json!({ "cell": address.to_string(), "message": err.message }))
            .collect::<Vec<_>>(),
    })
}

fn render_table(store: &TableStore) -> String {
    let columns = store.columns();
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    let mut header = vec!["ID".to_string()];
    header.extend(columns.iter().map(|c| c.id.clone()));
    table.set_header(header);

    for row in store.rows() {
        let mut cells = vec![row.id.clone()];
        for column in &columns {
            let text = match row.cells.get(&column.id) {
                Some(cell) => match &cell.error {
                    Some(err) => format!("error: {}", err.message),
                    None => cell.value.clone(),
                },
                None => String::new(),
            };
            cells.push(text);
        }
        table.add_row(cells);
    }
    table.to_string()
}
