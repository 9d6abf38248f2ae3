use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable that relocates the config directory (used by tests
/// and by users who keep several profiles).
pub const CONFIG_DIR_ENV: &str = "DUBBER_CONFIG_DIR";

/// Get the dubber config directory, creating it if needed
pub fn dubber_config_dir() -> Result<PathBuf> {
    let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()
            .context("Unable to determine user config directory")?
            .join("dubber"),
    };

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory at {}", config_dir.display()))?;

    Ok(config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_override_is_created_and_used() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("profile");

        // SAFETY: serialized with every other test that reads this variable
        unsafe { std::env::set_var(CONFIG_DIR_ENV, &target) };
        let resolved = dubber_config_dir();
        unsafe { std::env::remove_var(CONFIG_DIR_ENV) };

        assert_eq!(resolved.unwrap(), target);
        assert!(target.is_dir());
    }
}
