pub mod demo;

use std::path::Path;

use ct_domain::config::Config;

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `CT_CONFIG` (or
/// `convtrace.toml` by default), after pulling a `.env` file into the
/// process environment.  Returns the resolved [`Config`] and the path that
/// was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    // A missing .env is normal; a malformed one is worth a line on stderr.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("WARNING: ignoring .env: {e}");
        }
    }

    let config_path = std::env::var("CT_CONFIG").unwrap_or_else(|_| "convtrace.toml".into());
    let config = load_config_from(Path::new(&config_path), &|name: &str| std::env::var(name).ok())?;
    Ok((config, config_path))
}

/// Parse `path` if it exists (defaults otherwise) and overlay environment
/// variables resolved through `lookup`.
pub fn load_config_from(
    path: &Path,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> anyhow::Result<Config> {
    let mut config: Config = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?
    } else {
        Config::default()
    };
    config.apply_env(lookup);
    Ok(config)
}
