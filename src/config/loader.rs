use std::path::Path;

use anyhow::Context;

use super::types::Config;

/// Name of the per-directory config file.
pub const CONFIG_FILE: &str = ".linkrun.yaml";

/// Load config from a [`CONFIG_FILE`] in the given directory.
///
/// Returns `Ok(None)` when the file does not exist. Missing keys take their
/// defaults. Environment overrides are not applied here; see
/// [`Config::resolve_env`].
pub fn load(dir: &Path) -> anyhow::Result<Option<Config>> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("invalid config in {}", path.display()))?;
    Ok(Some(config))
}
