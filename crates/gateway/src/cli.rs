//! Minimal CLI surface — just enough to point the gateway at a config file.
//! The teacher's CLI carries a dozen subcommands (doctor, import, systemd,
//! login, ...) for subsystems this gateway doesn't have; none of that
//! applies here, so this is just `serve` with an optional `--config`.

use clap::Parser;

use ag_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "assistants-gateway", version, about = "OpenAI Assistants API compatible gateway")]
pub struct Cli {
    /// Path to a TOML config file. Falls back to `AG_CONFIG`, then `config.toml`.
    #[arg(long)]
    pub config: Option<String>,
}

/// Load the config file at `path` (or the `AG_CONFIG` env var, or
/// `config.toml`), falling back to all-defaults if nothing exists there.
pub fn load_config(path: Option<String>) -> anyhow::Result<(Config, String)> {
    let config_path = path
        .or_else(|| std::env::var("AG_CONFIG").ok())
        .unwrap_or_else(|| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path).map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}
