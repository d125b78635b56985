//! `stepwise config` — print the effective configuration.

use anyhow::Context;
use std::path::{Path, PathBuf};

use stepwise_config::LoopConfig;

/// The effective configuration at `path` (or `./stepwise.toml`) as TOML,
/// environment overrides included.
pub fn render(path: Option<&Path>) -> anyhow::Result<String> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(LoopConfig::default_path);
    let config = load(&path)?;
    Ok(config.to_toml())
}

pub fn run(path: Option<PathBuf>) -> anyhow::Result<()> {
    println!("{}", render(path.as_deref())?);
    Ok(())
}

pub(crate) fn load(path: &Path) -> anyhow::Result<LoopConfig> {
    LoopConfig::load(path).with_context(|| format!("failed to load config from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_renders_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let rendered = render(Some(&dir.path().join("absent.toml"))).unwrap();
        let parsed = LoopConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed.limits.max_steps, LoopConfig::default().limits.max_steps);
    }

    #[test]
    fn invalid_file_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[limits]\nmax_steps = 0\n").unwrap();

        let err = render(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("bad.toml"));
        assert!(format!("{err:#}").contains("max_steps"));
    }
}
