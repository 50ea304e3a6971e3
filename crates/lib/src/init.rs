//! Initialize the configuration directory: create ~/.taskgate, a default config, and the bundled scripts.
//!
//! Layout mirrors `crates/lib/config/`: `config/scripts/` → `~/.taskgate/scripts/`.

use anyhow::{Context, Result};
use include_dir::{include_dir, Dir};
use std::path::{Path, PathBuf};

use crate::config;

static BUNDLED_SCRIPTS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/config/scripts");

/// Ensure the configuration directory has been initialized (config file and scripts directory exist).
pub fn require_initialized(config_path: &Path, config: &config::Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `taskgate init` first (config file not found: {})",
            config_path.display()
        );
    }
    let scripts_dir = config::resolve_scripts_dir(config, config_path);
    if !scripts_dir.exists() {
        anyhow::bail!(
            "configuration not initialized; run `taskgate init` first (scripts directory not found: {})",
            scripts_dir.display()
        );
    }
    Ok(())
}

/// Write the bundled scripts into `dir`, creating it if needed. Existing files are left alone.
/// Returns the names of the files written.
pub fn install_bundled_scripts(dir: &Path) -> Result<Vec<String>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating scripts directory {}", dir.display()))?;
    let mut written = Vec::new();
    for file in BUNDLED_SCRIPTS.files() {
        let Some(name) = file.path().file_name() else {
            continue;
        };
        let target = dir.join(name);
        if target.exists() {
            log::debug!("{} already exists, skipping", target.display());
            continue;
        }
        std::fs::write(&target, file.contents())
            .with_context(|| format!("writing {}", target.display()))?;
        make_executable(&target)?;
        written.push(name.to_string_lossy().into_owned());
    }
    written.sort();
    Ok(written)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("setting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Extracts the bundled scripts into the scripts directory (`execution.scriptsDir` or `scripts`).
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = b"{}";
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let scripts_dir = config::resolve_scripts_dir(&config, config_path);
    let written = install_bundled_scripts(&scripts_dir)?;
    if written.is_empty() {
        log::debug!("bundled scripts already present in {}", scripts_dir.display());
    } else {
        log::info!(
            "installed {} script(s) to {}: {}",
            written.len(),
            scripts_dir.display(),
            written.join(", ")
        );
    }

    Ok(config_dir.to_path_buf())
}
