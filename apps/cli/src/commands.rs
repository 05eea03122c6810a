//! CLI command implementations

use crate::output::{print_output, DownloadSummary, Report};
use crate::progress::DownloadProgress;
use crate::{ConfigAction, GetArgs, OutputFormat};
use anyhow::{anyhow, bail, Context, Result};
use console::style;
use dlpool_core::{
    config, filename_from_url, ChannelListener, Credential, DownloadEngine, DownloadTask,
    EngineConfig, ProgressEvent, TaskStatus,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

// ============================================================================
// Configuration
// ============================================================================

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dlpool").join("config.json"))
}

/// Explicit file, else the per-user file if present, else defaults; then env
pub fn resolve_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => config::load_config(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => EngineConfig::default(),
        },
    };

    config::apply_env(&mut config)?;
    Ok(config)
}

pub fn config_action(
    path: Option<&Path>,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let config = resolve_config(path)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Human => {
                    println!("{}", style("Engine configuration").bold());
                    println!("  Pool size:       {}", config.pool_size);
                    println!("  Buffer size:     {} bytes", config.buffer_size);
                    println!("  Connect timeout: {} ms", config.connect_timeout_ms);
                    println!("  Read timeout:    {} ms", config.read_timeout_ms);
                    println!("  Method:          {}", config.request_method);
                    println!(
                        "  Proxy:           {}",
                        config.proxy.as_deref().unwrap_or("none")
                    );
                    for (key, value) in &config.headers {
                        println!("  Header:          {}: {}", key, value);
                    }
                }
            }
        }

        ConfigAction::Init { force } => {
            let path = path
                .map(Path::to_path_buf)
                .or_else(default_config_path)
                .ok_or_else(|| anyhow!("No config directory available; pass --config"))?;
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config::save_config(&EngineConfig::default(), &path)?;
            println!(
                "{} Wrote default configuration to {}",
                style("✓").green().bold(),
                path.display()
            );
        }
    }

    Ok(())
}

// ============================================================================
// Downloads
// ============================================================================

/// Parse a `Name: value` header argument
fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid header {:?}, expected 'Name: value'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid header {:?}: empty name", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// `dir/name`, or `dir/name (n).ext` if that is already taken
fn unique_path(dir: &Path, name: &str, taken: &[PathBuf]) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() && !taken.contains(&candidate) {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{} ({}).{}", stem, n, ext)),
            None => dir.join(format!("{} ({})", stem, n)),
        })
        .find(|p| !p.exists() && !taken.contains(p))
        .unwrap_or(candidate)
}

fn apply_overrides(config: &mut EngineConfig, args: &GetArgs) -> Result<()> {
    if let Some(pool) = args.pool {
        config.pool_size = pool;
    }
    if let Some(buffer) = args.buffer {
        config.buffer_size = buffer;
    }
    if let Some(timeout) = args.timeout {
        config.read_timeout_ms = Duration::from_secs(timeout).as_millis() as u64;
    }
    if let Some(proxy) = &args.proxy {
        config.proxy = Some(proxy.clone());
    }
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        config.headers.insert(name, value);
    }
    config::validate(config)?;
    Ok(())
}

fn credential(args: &GetArgs) -> Option<Credential> {
    match (&args.user, &args.password, &args.bearer) {
        (Some(user), Some(password), _) => Some(Credential::basic(user, password)),
        (_, _, Some(token)) => Some(Credential::bearer(token)),
        _ => None,
    }
}

pub fn get(mut config: EngineConfig, args: GetArgs, format: OutputFormat) -> Result<()> {
    apply_overrides(&mut config, &args)?;
    let credential = credential(&args);

    let dir = match &args.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let engine = DownloadEngine::new(config);
    let (tx, rx) = mpsc::channel();
    let mut summaries: Vec<DownloadSummary> = Vec::new();
    let mut taken: Vec<PathBuf> = Vec::new();

    for raw in &args.urls {
        let url = Url::parse(raw).with_context(|| format!("Invalid URL: {}", raw))?;
        let path = unique_path(&dir, &filename_from_url(&url), &taken);

        let mut task = DownloadTask::to_file(raw, &path)?;
        task.add_listener(Arc::new(ChannelListener::new(task.id(), tx.clone())));
        task.set_credential(credential.clone());

        summaries.push(DownloadSummary::queued(task.id(), raw.clone(), path.clone()));
        taken.push(path);
        engine.submit(task)?;
    }
    drop(tx);

    engine.start()?;

    let index: HashMap<Uuid, usize> = summaries
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id, i))
        .collect();
    let mut progress = DownloadProgress::new(format == OutputFormat::Human);
    let mut finished = 0;

    while finished < summaries.len() {
        let Ok(event) = rx.recv() else {
            break;
        };
        progress.handle_event(&event);

        let Some(summary) = index.get(&event.id()).map(|&i| &mut summaries[i]) else {
            continue;
        };
        match event {
            ProgressEvent::Started { filename, size, .. } => {
                summary.filename = Some(filename);
                summary.size = size;
                summary.status = TaskStatus::Transferring;
            }
            ProgressEvent::Progress { total, .. } => summary.bytes = total,
            ProgressEvent::Completed { .. } => summary.status = TaskStatus::Completed,
            ProgressEvent::Cancelled { .. } => summary.status = TaskStatus::Cancelled,
            ProgressEvent::Failed { error, .. } => {
                summary.status = TaskStatus::Interrupted;
                summary.error = Some(error);
            }
        }
        if summary.status.is_terminal() {
            finished += 1;
        }
    }

    engine.shutdown();
    engine.join();
    progress.clear();

    let report = Report(summaries);
    print_output(&report, format)?;

    match report.failures() {
        0 => Ok(()),
        n => Err(anyhow!("{} of {} downloads did not complete", n, report.0.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Referer: https://example.com").unwrap(),
            ("Referer".to_string(), "https://example.com".to_string())
        );
        assert!(parse_header("no colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_unique_path() {
        let dir = tempdir().unwrap();
        let first = unique_path(dir.path(), "a.iso", &[]);
        assert_eq!(first, dir.path().join("a.iso"));

        let second = unique_path(dir.path(), "a.iso", &[first.clone()]);
        assert_eq!(second, dir.path().join("a (1).iso"));

        std::fs::write(dir.path().join("README"), b"x").unwrap();
        assert_eq!(
            unique_path(dir.path(), "README", &[]),
            dir.path().join("README (1)")
        );
    }

    #[test]
    fn test_overrides_and_credentials() {
        let args = GetArgs {
            urls: vec!["http://example.com/a".into()],
            pool: Some(7),
            timeout: Some(2),
            bearer: Some("tok".into()),
            headers: vec!["X-Mirror: eu".into()],
            ..GetArgs::default()
        };

        let mut config = EngineConfig::default();
        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.pool_size, 7);
        assert_eq!(config.read_timeout_ms, 2000);
        assert_eq!(config.headers.get("X-Mirror").map(String::as_str), Some("eu"));
        assert_eq!(credential(&args), Some(Credential::bearer("tok")));
    }

    #[test]
    fn test_zero_pool_override_rejected() {
        let args = GetArgs {
            pool: Some(0),
            ..GetArgs::default()
        };
        assert!(apply_overrides(&mut EngineConfig::default(), &args).is_err());
    }
}
