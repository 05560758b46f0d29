//! Command handlers for the content updater CLI
//!
//! This module implements the command handlers that connect parsed CLI
//! arguments to the update manager.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::app::{
    client, silent_sink, ContentHasher, DiagnosticResult, DiagnosticStatus, Diagnostics, Doctor,
    Operation, OperationKind, SpaceCalculator, UpdateManager, VersionScanner,
};
use crate::cli::{
    ApplyArgs, BackupAction, BackupArgs, GlobalArgs, PlanArgs, ProgressConfig, ProgressDisplay,
};
use crate::config::RuntimeConfig;
use crate::errors::{AppError, ConfigError, Result};

/// Settings shared by every command handler
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: RuntimeConfig,
    pub quiet: bool,
    pub colors: bool,
}

impl CommandContext {
    /// Apply global CLI overrides on top of the loaded configuration
    pub fn new(mut config: RuntimeConfig, global: &GlobalArgs, colors: bool) -> Self {
        if let Some(root) = &global.root {
            config.content_root = Some(root.clone());
        }
        if let Some(data_dir) = &global.data_dir {
            config.app_data_dir = data_dir.clone();
        }
        Self {
            config,
            quiet: global.quiet,
            colors,
        }
    }

    fn content_root(&self) -> Result<PathBuf> {
        self.config.content_root.clone().ok_or_else(|| {
            ConfigError::DirectoryUnavailable {
                what: "content root (pass --root or set paths.content_root)".to_string(),
            }
            .into()
        })
    }

    fn manager(&self, args: Option<&PlanArgs>) -> Result<UpdateManager> {
        let mut config = self.config.clone();
        if let Some(args) = args {
            if let Some(manifest) = &args.manifest {
                config.manifest_url = Some(manifest.clone());
            }
            if let Some(language) = &args.language {
                config.default_language = language.clone();
            }
        }
        UpdateManager::from_config(&config, self.content_root()?)
    }

    fn progress(&self) -> ProgressDisplay {
        ProgressDisplay::new(ProgressConfig {
            enable_progress_bars: !self.quiet,
            enable_colors: self.colors,
            ..Default::default()
        })
    }
}

/// Handle the plan command
pub async fn handle_plan(ctx: &CommandContext, args: PlanArgs) -> Result<()> {
    let manager = ctx.manager(Some(&args))?;
    let operations = plan_with_progress(ctx, &manager, &args).await?;

    if args.json {
        println!("{}", to_json(&operations)?);
    } else {
        print_plan(&operations);
    }
    Ok(())
}

/// Handle the apply command
///
/// Refuses to start while an interrupted session is pending; the caller must
/// run `recover` first.
pub async fn handle_apply(ctx: &CommandContext, args: ApplyArgs) -> Result<()> {
    let start_time = Instant::now();
    let manager = ctx.manager(Some(&args.plan))?;

    if manager.check_interrupted() {
        warn!("Interrupted session detected at {}", manager.content_root().display());
        println!("⚠️  The previous update did not finish.");
        println!("   Run 'content_updater recover' before applying a new update.");
        return Err(AppError::generic("interrupted session pending"));
    }

    let operations = plan_with_progress(ctx, &manager, &args.plan).await?;
    let actionable: Vec<&Operation> = operations.iter().filter(|o| o.is_actionable()).collect();

    if args.dry_run {
        print_plan(&operations);
        println!("Dry run: no files were changed.");
        return Ok(());
    }

    if actionable.is_empty() {
        println!("✅ Installation is up to date ({} files checked)", operations.len());
        return Ok(());
    }

    let estimate = SpaceCalculator::estimate(&operations);
    match SpaceCalculator::has_enough_space(manager.content_root(), estimate.download_size) {
        Ok(false) => warn!(
            "Less than {} free under {}",
            format_bytes(estimate.download_size),
            manager.content_root().display()
        ),
        Ok(true) => {}
        Err(e) => debug!("Could not query free space: {}", e),
    }

    if args.backup {
        let files: Vec<String> = actionable
            .iter()
            .filter(|o| manager.content_root().join(&o.relative_path).exists())
            .map(|o| o.relative_path.clone())
            .collect();
        match manager.create_backup(files).await {
            Some(name) => println!("📦 Restore point created: {}", name),
            None => {
                return Err(AppError::generic(
                    "could not create restore point; aborting before changing files",
                ))
            }
        }
    }

    info!("Applying {} operations", actionable.len());
    let mut display = ctx.progress();
    let progress = display.start();
    let outcome = manager.apply(&operations, &progress).await;
    drop(progress);
    display.finish().await;

    info!("Apply finished in {:?}: {}", start_time.elapsed(), outcome.message);
    if outcome.success {
        println!("✅ {}", outcome.message);
        Ok(())
    } else {
        println!("❌ {}", outcome.message);
        println!("   Run 'content_updater status' to inspect the interrupted session.");
        Err(AppError::generic(outcome.message))
    }
}

/// Handle the status command
pub async fn handle_status(ctx: &CommandContext) -> Result<()> {
    let manager = ctx.manager(None)?;

    if !manager.check_interrupted() {
        println!("✅ No interrupted session at {}", manager.content_root().display());
        return Ok(());
    }

    let pending = manager.pending_operations();
    println!("⚠️  Interrupted session at {}", manager.content_root().display());
    println!("   {} operations did not complete:", pending.len());
    for op in &pending {
        println!("   - {} {} ({})", op.id, op.data.relative_path, op.data.kind);
    }
    println!("   Run 'content_updater recover' to restore and clear the session.");
    Ok(())
}

/// Handle the recover command
pub async fn handle_recover(ctx: &CommandContext, restore_point: Option<String>) -> Result<()> {
    let manager = ctx.manager(None)?;
    if !manager.check_interrupted() {
        info!("No interrupted session; running recovery anyway");
    }

    let (success, diagnostics) = manager
        .run_recovery_with_report(restore_point.as_deref())
        .await;
    print_diagnostics(&diagnostics);

    if success {
        println!("✅ Recovery complete");
        Ok(())
    } else {
        println!("❌ Recovery failed; the session remains marked as interrupted");
        Err(AppError::generic("recovery failed"))
    }
}

/// Handle the resolve command
pub async fn handle_resolve(packs: Vec<String>, deps: String) -> Result<()> {
    let dependencies: BTreeMap<String, Vec<String>> = serde_json::from_str(&deps)
        .map_err(|e| AppError::generic(format!("Invalid dependency map: {}", e)))?;

    let resolved = UpdateManager::resolve_dependencies(&packs, &dependencies);
    for pack in resolved {
        println!("{}", pack);
    }
    Ok(())
}

/// Handle the hash command
pub async fn handle_hash(ctx: &CommandContext, paths: Vec<PathBuf>) -> Result<()> {
    let hasher = ContentHasher::with_workers(ctx.config.hash_workers);
    let mut failures = 0usize;

    for path in &paths {
        match hasher.hash(path).await {
            Ok(digest) => println!("{}  {}", digest, path.display()),
            Err(e) => {
                failures += 1;
                eprintln!("{}: {}", path.display(), e);
            }
        }
    }

    if failures > 0 {
        return Err(AppError::generic(format!("{} files could not be hashed", failures)));
    }
    Ok(())
}

/// Handle the backup command
pub async fn handle_backup(ctx: &CommandContext, args: BackupArgs) -> Result<()> {
    let manager = ctx.manager(None)?;

    match args.action {
        BackupAction::Create { files } => match manager.create_backup(files).await {
            Some(name) => {
                println!("📦 Restore point created: {}", name);
                Ok(())
            }
            None => Err(AppError::generic("could not create restore point")),
        },
        BackupAction::List => {
            let points = manager.list_backups();
            if points.is_empty() {
                println!("No restore points found");
            }
            for name in points {
                println!("{}", name);
            }
            Ok(())
        }
        BackupAction::Restore { name } => {
            if manager.restore_backup(&name).await {
                println!("✅ Restored {}", name);
                Ok(())
            } else {
                Err(AppError::generic(format!("could not restore {}", name)))
            }
        }
    }
}

/// Handle the doctor command
pub async fn handle_doctor(ctx: &CommandContext, repair: bool) -> Result<()> {
    let handler = client::build_handler(&ctx.config.client)?;
    let doctor = Doctor::new(&ctx.config.app_data_dir, handler.client().clone())
        .with_tools(&ctx.config.xdelta_path, &ctx.config.aria2_path);

    let results = doctor.check_all().await;
    print_diagnostics(&results);

    if repair {
        print_diagnostics(&doctor.attempt_repair());
    }
    Ok(())
}

/// Handle the versions command
pub async fn handle_versions(ctx: &CommandContext, index_url: String) -> Result<()> {
    let handler = std::sync::Arc::new(client::build_handler(&ctx.config.client)?);
    let versions = VersionScanner::new(handler).scan(&index_url).await?;

    if versions.is_empty() {
        println!("No versions found at {}", index_url);
    }
    for version in versions {
        println!("{}", version);
    }
    Ok(())
}

async fn plan_with_progress(
    ctx: &CommandContext,
    manager: &UpdateManager,
    args: &PlanArgs,
) -> Result<Vec<Operation>> {
    let request = manager.plan_request(args.selected_packs(), args.target_version.clone());

    if args.json {
        return Ok(manager.plan(&request, &silent_sink()).await?);
    }

    let mut display = ctx.progress();
    let progress = display.start();
    let result = manager.plan(&request, &progress).await;
    drop(progress);
    display.finish().await;
    Ok(result?)
}

fn print_plan(operations: &[Operation]) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for op in operations {
        *counts.entry(op.kind.to_string()).or_default() += 1;
        if op.kind != OperationKind::NoOp {
            println!("{:<14} {} ({})", op.kind, op.relative_path, op.reason);
        }
    }

    let estimate = SpaceCalculator::estimate(operations);
    println!();
    println!("📋 {} files checked", operations.len());
    for (kind, count) in &counts {
        println!("   {:<14} {}", kind, count);
    }
    println!("   Download size: {}", format_bytes(estimate.download_size));
    println!("   Install size:  {}", format_bytes(estimate.install_size));
}

fn print_diagnostics(results: &[DiagnosticResult]) {
    for result in results {
        let icon = match result.status {
            DiagnosticStatus::Ok => "✅",
            DiagnosticStatus::Warning => "⚠️ ",
            DiagnosticStatus::Error => "❌",
        };
        match &result.version {
            Some(version) => println!("{} {}: {} ({})", icon, result.name, result.message, version),
            None => println!("{} {}: {}", icon, result.name, result.message),
        }
    }
}

fn to_json(operations: &[Operation]) -> Result<String> {
    serde_json::to_string_pretty(operations)
        .map_err(|e| AppError::generic(format!("Could not encode plan: {}", e)))
}

/// Format a byte count for display
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use tempfile::TempDir;

    fn context(data: &TempDir, root: Option<&TempDir>) -> CommandContext {
        let mut config = AppConfig::default();
        config.paths.app_data_dir = Some(data.path().to_path_buf());
        let global = GlobalArgs {
            root: root.map(|r| r.path().to_path_buf()),
            quiet: true,
            ..Default::default()
        };
        CommandContext::new(config.to_runtime_config().unwrap(), &global, false)
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn test_global_overrides_apply() {
        let data = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.paths.app_data_dir = Some(data.path().to_path_buf());
        let global = GlobalArgs {
            data_dir: Some(other.path().to_path_buf()),
            root: Some(PathBuf::from("/games/install")),
            ..Default::default()
        };

        let ctx = CommandContext::new(config.to_runtime_config().unwrap(), &global, true);
        assert_eq!(ctx.config.app_data_dir, other.path());
        assert_eq!(ctx.content_root().unwrap(), PathBuf::from("/games/install"));
    }

    #[tokio::test]
    async fn test_commands_need_content_root() {
        let data = TempDir::new().unwrap();
        let ctx = context(&data, None);
        assert!(matches!(
            handle_status(&ctx).await,
            Err(AppError::Config(ConfigError::DirectoryUnavailable { .. }))
        ));
    }

    #[tokio::test]
    async fn test_plan_from_local_manifest() {
        let data = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let manifest = data.path().join("manifest.json");
        std::fs::write(
            &manifest,
            r#"{"files":[{"name":"f.txt","MD5_to":"ABCD","type":"full","url":"http://x/f.txt"}]}"#,
        )
        .unwrap();
        let ctx = context(&data, Some(&root));

        let args = PlanArgs {
            manifest: Some(manifest.to_string_lossy().into_owned()),
            json: true,
            ..Default::default()
        };
        assert!(handle_plan(&ctx, args).await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_json() {
        assert!(handle_resolve(vec!["EP01".to_string()], "{".to_string())
            .await
            .is_err());
        assert!(handle_resolve(vec!["EP01".to_string()], "{}".to_string())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_backup_create_and_list() {
        let data = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.txt"), b"a").unwrap();
        let ctx = context(&data, Some(&root));

        let create = BackupArgs {
            action: BackupAction::Create {
                files: vec!["a.txt".to_string()],
            },
        };
        handle_backup(&ctx, create).await.unwrap();
        let manager = ctx.manager(None).unwrap();
        assert_eq!(manager.list_backups().len(), 1);
    }
}
