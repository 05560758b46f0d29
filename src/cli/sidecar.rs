//! Line-delimited JSON transport over stdin/stdout
//!
//! Requests are `{"command", "id", ...args}`, one per line. Every request
//! gets exactly one `{"id", "result"}` or `{"id", "error": {"code",
//! "message"}}` line; long-running commands also emit
//! `{"id", "type": "progress", "data"}` lines carrying progress events. A
//! `{"type": "ready"}` line is written before the first request is read.
//! Logs never go to stdout.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use url::Url;

use crate::app::{
    ContentHasher, Mirror, Operation, PlanRequest, ProgressEvent, ProgressSink, UpdateManager,
};
use crate::config::RuntimeConfig;
use crate::errors::{AppError, HashError, PlanError};

/// Transport error with its wire code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarError {
    pub code: &'static str,
    pub message: String,
}

impl SidecarError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn missing_field(field: &str) -> Self {
        Self::new("MISSING_FIELD", format!("Request missing required field: {}", field))
    }
}

impl From<AppError> for SidecarError {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Hash(HashError::NotFound { .. }) => "FILE_NOT_FOUND",
            AppError::Hash(HashError::PermissionDenied { .. })
            | AppError::Plan(PlanError::Hash(HashError::PermissionDenied { .. })) => {
                "PERMISSION_DENIED"
            }
            AppError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => "FILE_NOT_FOUND",
            AppError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                "PERMISSION_DENIED"
            }
            _ => "INTERNAL_ERROR",
        };
        Self::new(code, error.to_string())
    }
}

impl From<HashError> for SidecarError {
    fn from(error: HashError) -> Self {
        AppError::from(error).into()
    }
}

type HandlerResult = std::result::Result<Value, SidecarError>;

/// Request dispatcher bound to one output channel
///
/// A mirror chosen with `select_mirror` overrides the configured mirror for
/// every later request on this sidecar.
pub struct Sidecar {
    config: RuntimeConfig,
    out: mpsc::UnboundedSender<Value>,
    selected_mirror: Mutex<Option<String>>,
}

impl Sidecar {
    pub fn new(config: RuntimeConfig, out: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            config,
            out,
            selected_mirror: Mutex::new(None),
        }
    }

    /// Announce readiness, then answer requests until `input` closes
    pub async fn serve<R: AsyncBufRead + Unpin>(&self, input: R) -> std::io::Result<()> {
        info!("Sidecar started");
        self.send(json!({"type": "ready"}));

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line).await;
            self.send(response);
        }
        info!("Sidecar input closed");
        Ok(())
    }

    /// Response for one request line
    pub async fn handle_line(&self, line: &str) -> Value {
        let request: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                error!("JSON decode error: {}", e);
                return error_response(
                    &json!("unknown"),
                    SidecarError::new("JSON_ERROR", format!("Invalid JSON request format: {}", e)),
                );
            }
        };

        let id = request.get("id").cloned().unwrap_or_else(|| json!("unknown"));
        let command = match request.get("command").and_then(Value::as_str) {
            Some(command) => command.to_string(),
            None => return error_response(&id, SidecarError::missing_field("command")),
        };

        debug!("Sidecar request {} ({})", id, command);
        match self.dispatch(&command, &id, &request).await {
            Ok(result) => json!({"id": id, "result": result}),
            Err(e) => {
                error!("Command '{}' failed: {}", command, e.message);
                error_response(&id, e)
            }
        }
    }

    async fn dispatch(&self, command: &str, id: &Value, request: &Value) -> HandlerResult {
        match command {
            "ping" => Ok(json!("pong")),
            "hash_file" => {
                let path = required_str(request, "path")?;
                let digest = ContentHasher::new()
                    .hash(&PathBuf::from(path))
                    .await?;
                Ok(json!(digest.to_hex()))
            }
            "verify_all" => {
                let manager = self.manager(request, true)?;
                let progress = self.progress_sink(id);
                let operations = manager
                    .plan(&plan_request(&manager, request)?, &progress)
                    .await
                    .map_err(AppError::from)?;
                Ok(serde_json::to_value(operations).map_err(internal)?)
            }
            "start_update" => {
                let manager = self.manager(request, true)?;
                let progress = self.progress_sink(id);
                let operations: Vec<Operation> = match manager
                    .plan(&plan_request(&manager, request)?, &progress)
                    .await
                {
                    Ok(operations) => operations,
                    Err(e) => return Ok(json!({"success": false, "message": e.to_string()})),
                };
                let outcome = manager.apply(&operations, &progress).await;
                Ok(json!({"success": outcome.success, "message": outcome.message}))
            }
            "check_interrupted" => {
                let manager = self.manager(request, false)?;
                Ok(json!({
                    "interrupted": manager.check_interrupted(),
                    "pending": manager.pending_operations(),
                }))
            }
            "run_recovery" => {
                let manager = self.manager(request, false)?;
                let restore_point = request.get("restore_point").and_then(Value::as_str);
                let (success, diagnostics) = manager.run_recovery_with_report(restore_point).await;
                Ok(json!({"success": success, "diagnostics": diagnostics}))
            }
            "create_backup" => {
                let manager = self.manager(request, false)?;
                let files: Vec<String> = optional_field(request, "files")?.unwrap_or_default();
                Ok(json!({"zip_name": manager.create_backup(files).await}))
            }
            "list_backups" => {
                let manager = self.manager(request, false)?;
                Ok(json!(manager.list_backups()))
            }
            "resolve_dlc_dependencies" => {
                let selected: Vec<String> =
                    optional_field(request, "selected")?.unwrap_or_default();
                let dependencies: BTreeMap<String, Vec<String>> =
                    optional_field(request, "dependencies")?.unwrap_or_default();
                Ok(json!(UpdateManager::resolve_dependencies(&selected, &dependencies)))
            }
            "get_dlc_status" => {
                let manager = self.manager(request, true)?;
                let version = request.get("version").and_then(Value::as_str);
                let status = manager.pack_status(version).await?;
                Ok(serde_json::to_value(status).map_err(internal)?)
            }
            "discover_mirrors" => {
                let mirrors: Vec<Mirror> = optional_field(request, "mirrors")?.unwrap_or_default();
                let manager = self.manager_for_root(PathBuf::from("."), None)?;
                let probes = manager.discover_mirrors(&mirrors).await?;
                Ok(serde_json::to_value(probes).map_err(internal)?)
            }
            "select_mirror" => {
                let url = required_str(request, "url")?;
                Url::parse(url).map_err(|e| {
                    SidecarError::new("JSON_ERROR", format!("Invalid mirror url '{}': {}", url, e))
                })?;
                info!("Selected mirror {}", url);
                *self.lock_mirror() = Some(url.to_string());
                Ok(json!("success"))
            }
            "discover_versions" => {
                let url = required_str(request, "url")?;
                let manager = self.manager_for_root(PathBuf::from("."), None)?;
                let versions = manager.discover_versions(url).await?;
                let names: Vec<String> = versions.iter().map(ToString::to_string).collect();
                Ok(json!(names))
            }
            other => Err(SidecarError::new(
                "UNKNOWN_COMMAND",
                format!("Unknown command: {}", other),
            )),
        }
    }

    fn manager(&self, request: &Value, with_manifest: bool) -> Result<UpdateManager, SidecarError> {
        let game_dir = required_str(request, "game_dir")?;
        let manifest_url = if with_manifest {
            request
                .get("manifest_url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| self.config.manifest_url.clone())
        } else {
            None
        };
        self.manager_for_root(PathBuf::from(game_dir), manifest_url)
    }

    fn manager_for_root(
        &self,
        root: PathBuf,
        manifest_url: Option<String>,
    ) -> Result<UpdateManager, SidecarError> {
        let mut config = self.config.clone();
        config.manifest_url = manifest_url;
        if let Some(mirror) = self.lock_mirror().clone() {
            config.mirror = Some(mirror);
        }
        Ok(UpdateManager::from_config(&config, root)?)
    }

    fn lock_mirror(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.selected_mirror
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn progress_sink(&self, id: &Value) -> ProgressSink {
        let out = self.out.clone();
        let id = id.clone();
        Arc::new(move |event: ProgressEvent| {
            let _ = out.send(json!({"id": id, "type": "progress", "data": event}));
        })
    }

    fn send(&self, message: Value) {
        let _ = self.out.send(message);
    }
}

/// Plan request from the optional `selected_packs`, `version` and `language`
///
/// An absent or null `selected_packs` means every pack; any other value that
/// is not a list of pack ids is rejected rather than widened to every pack.
fn plan_request(manager: &UpdateManager, request: &Value) -> Result<PlanRequest, SidecarError> {
    let selected: Option<BTreeSet<String>> = optional_field(request, "selected_packs")?;
    let version = request
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut plan = manager.plan_request(selected, version);
    if let Some(language) = request.get("language").and_then(Value::as_str) {
        plan.language = language.to_string();
    }
    Ok(plan)
}

fn required_str<'a>(request: &'a Value, field: &str) -> Result<&'a str, SidecarError> {
    request
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| SidecarError::missing_field(field))
}

fn optional_field<T: serde::de::DeserializeOwned>(
    request: &Value,
    field: &str,
) -> Result<Option<T>, SidecarError> {
    match request.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            SidecarError::new("JSON_ERROR", format!("Invalid value for '{}': {}", field, e))
        }),
    }
}

fn internal(error: serde_json::Error) -> SidecarError {
    SidecarError::new("INTERNAL_ERROR", error.to_string())
}

fn error_response(id: &Value, error: SidecarError) -> Value {
    json!({"id": id, "error": {"code": error.code, "message": error.message}})
}

/// Serve stdin/stdout until stdin closes
pub async fn run(config: RuntimeConfig) -> crate::errors::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = rx.recv().await {
            let mut line = message.to_string();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let sidecar = Sidecar::new(config, tx);
    let served = sidecar.serve(BufReader::new(tokio::io::stdin())).await;
    drop(sidecar);
    let _ = writer.await;
    Ok(served?)
}
