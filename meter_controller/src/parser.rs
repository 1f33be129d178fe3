use crate::config::{ControllerConfig, ControllerFile};
use anyhow::{Context, Result};
use std::path::Path;

pub async fn parse_config_from_file(path: impl AsRef<Path>) -> Result<ControllerConfig> {
    let path = path.as_ref();
    let format = match path.extension().and_then(|s| s.to_str()) {
        Some(ext @ ("yaml" | "yml" | "toml" | "json")) => ext,
        _ => anyhow::bail!("Unsupported file format. Use .yaml, .yml, .toml, or .json"),
    };

    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    parse_config_from_str(&contents, format)
}

pub fn parse_config_from_str(content: &str, format: &str) -> Result<ControllerConfig> {
    let config = match format.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(content)?,
        "toml" => toml::from_str::<ControllerFile>(content)?.controller,
        "json" => serde_json::from_str(content)?,
        _ => anyhow::bail!("Unsupported format: {}", format),
    };
    validated(config)
}

fn validated(config: ControllerConfig) -> Result<ControllerConfig> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid controller config: {}", e))?;
    Ok(config)
}
