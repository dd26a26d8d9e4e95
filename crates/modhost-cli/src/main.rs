//! Command-line interface for the ModHost module host.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modhost_core::{
    BuiltinModuleTable, HostConfig, LoadReport, ModuleHost, ModuleWatcher, ReclamationOutcome,
    ScanReport,
};

/// Set to `true` for JSON log lines.
const LOG_JSON_ENV: &str = "MODHOST_LOG_JSON";

/// ModHost - load, hot-reload and manage modules.
#[derive(Parser, Debug)]
#[command(name = "modhost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Host config file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Module directory, overrides the config file.
    #[arg(short, long, global = true)]
    module_dir: Option<PathBuf>,

    /// Only load modules compiled into this binary.
    #[arg(long, global = true)]
    no_native: bool,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List the modules on disk without running them.
    Scan {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Load every module once, print the report and shut down.
    Load {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Load every module and reload on changes until Ctrl-C.
    Run,
    /// Copy a module's file to another location.
    Export {
        /// Module id.
        id: String,
        /// Target file or directory.
        dest: PathBuf,
    },
    /// Delete a module's file from the module directory.
    Delete {
        /// Module id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = host_config(&args)?;
    let host = build_host(config, !args.no_native)?;

    match args.command {
        Command::Scan { json } => {
            let report = host.scan()?;
            print_scan(&report, json)
        }
        Command::Load { json } => {
            let report = host.load_all()?;
            print_load(&report, json)?;
            host.shutdown();
            Ok(())
        }
        Command::Run => run(Arc::new(host)).await,
        Command::Export { id, dest } => {
            host.scan()?;
            let written = host
                .export_copy(&id, &dest)
                .with_context(|| format!("failed to export {}", id))?;
            println!("Exported {} to {}", id, written.display());
            Ok(())
        }
        Command::Delete { id } => {
            host.scan()?;
            host.delete_physically(&id)
                .with_context(|| format!("failed to delete {}", id))?;
            println!("Deleted {}", id);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose {
        "warn,modhost=debug"
    } else {
        "warn,modhost=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

/// Compiled-in modules, enabled by `<stem>.module` marker files.
fn builtin_modules() -> BuiltinModuleTable {
    BuiltinModuleTable::new()
        .register("samples", modhost_sample_modules::modhost_manifest)
        .register("counter", modhost_sample_modules::counter_manifest)
        .register("clock", modhost_sample_modules::clock_manifest)
}

fn host_config(args: &Args) -> Result<HostConfig> {
    let mut config =
        HostConfig::load(args.config.as_deref()).context("failed to load host config")?;
    if let Some(dir) = &args.module_dir {
        config.module_dir = dir.clone();
    }
    Ok(config)
}

fn build_host(config: HostConfig, native: bool) -> Result<ModuleHost> {
    ModuleHost::builder(config)
        .with_builtin(builtin_modules())
        .with_native(native)
        .build()
        .context("failed to start module host")
}

async fn run(host: Arc<ModuleHost>) -> Result<()> {
    let loader = host.clone();
    let report = tokio::task::spawn_blocking(move || loader.load_all()).await??;
    print_load(&report, false)?;

    let watcher = ModuleWatcher::spawn(host.clone()).context("failed to watch module directory")?;
    tracing::info!(
        dir = %host.module_dir().display(),
        "Watching for module changes, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    drop(watcher);
    match host.shutdown() {
        Some(ReclamationOutcome::StillReferenced {
            generation,
            strong_count,
        }) => tracing::warn!(
            generation,
            strong_count,
            "Generation still referenced at shutdown"
        ),
        Some(ReclamationOutcome::Reclaimed { generation }) => {
            tracing::info!(generation, "Module host stopped")
        }
        None => tracing::info!("Module host stopped"),
    }
    Ok(())
}

fn print_scan(report: &ScanReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Discovered Modules");
    println!("==================\n");

    for module in &report.modules {
        println!("  {} {} ({})", module.id, module.version, module.kind);
        println!("      Name: {}", module.name);
        if !module.description.is_empty() {
            println!("      Description: {}", module.description);
        }
        for dep in &module.dependencies {
            let kind = if dep.required { "required" } else { "optional" };
            println!("      Needs: {} ({})", dep.id, kind);
        }
        println!("      Path: {}", module.path.display());
        println!();
    }
    for skipped in &report.skipped {
        println!("  Skipped: {}", skipped.path.display());
        println!("      Reason: {}", skipped.reason);
    }

    if report.modules.is_empty() {
        println!("  No modules found.");
    } else {
        println!("Total: {} module(s)", report.modules.len());
    }
    Ok(())
}

fn print_load(report: &LoadReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    match report.generation {
        Some(generation) => println!("Generation {}", generation),
        None => println!("No modules loaded"),
    }
    for id in &report.active {
        println!("  Active: {}", id);
    }
    for failure in &report.failures {
        println!("  Failed: {} during {}: {}", failure.id, failure.stage, failure.error);
    }
    for missing in &report.missing_dependencies {
        let kind = if missing.required { "required" } else { "optional" };
        println!(
            "  Missing: {} needs {} ({})",
            missing.module, missing.dependency, kind
        );
    }
    for duplicate in &report.duplicates {
        println!(
            "  Duplicate: {} in {} (kept {})",
            duplicate.id,
            duplicate.path.display(),
            duplicate.kept.display()
        );
    }
    for skipped in &report.skipped {
        println!("  Skipped: {}: {}", skipped.path.display(), skipped.reason);
    }
    if let Some(ReclamationOutcome::StillReferenced {
        generation,
        strong_count,
    }) = report.reclamation
    {
        println!(
            "  Generation {} is still referenced ({} holders)",
            generation, strong_count
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(dir: &std::path::Path) -> ModuleHost {
        build_host(HostConfig::with_base_dir(dir), false).unwrap()
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Args::command().debug_assert();

        let args = Args::parse_from([
            "modhost",
            "export",
            "samples.clock",
            "/tmp/out",
            "-m",
            "mods",
        ]);
        assert_eq!(args.module_dir, Some(PathBuf::from("mods")));
        assert!(matches!(args.command, Command::Export { ref id, .. } if id == "samples.clock"));
    }

    #[test]
    fn test_module_dir_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "debounce_ms = 250\n").unwrap();

        let args = Args::parse_from([
            "modhost",
            "scan",
            "--config",
            path.to_str().unwrap(),
            "--module-dir",
            "/srv/modules",
        ]);
        let config = host_config(&args).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.module_dir, PathBuf::from("/srv/modules"));
    }

    #[test]
    fn test_builtin_markers_load() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        std::fs::write(host.module_dir().join("clock.module"), b"").unwrap();

        let report = host.load_all().unwrap();
        assert!(report.is_active(modhost_sample_modules::CLOCK_WIDGET_ID));
        assert!(print_load(&report, true).is_ok());
        host.shutdown();
    }

    #[test]
    fn test_scan_lists_without_loading() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        std::fs::write(host.module_dir().join("counter.module"), b"").unwrap();

        let report = host.scan().unwrap();
        assert_eq!(report.modules.len(), 2);
        assert!(host.loaded_modules().is_empty());
        assert!(print_scan(&report, false).is_ok());
    }
}
