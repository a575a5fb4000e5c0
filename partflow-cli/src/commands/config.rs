//! `partflow config` - inspect and edit the INI config file.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use partflow::config::{config_file_path, ConfigFile, ConfigKey};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one value
    Get {
        /// Key as section.key (e.g., loader.part_size)
        key: String,
    },

    /// Change one value and save the file
    Set {
        /// Key as section.key (e.g., resources.total_limit)
        key: String,

        /// New value; sizes accept K, M and G suffixes
        value: String,
    },

    /// Print every setting, marking the ones changed from the defaults
    List,

    /// Restore one value (or all of them) to the default
    Reset {
        /// Key as section.key; omit to reset everything
        key: Option<String>,
    },

    /// Print the config file path
    Path,
}

/// Runs a config subcommand against `file`, or the default location.
pub fn run(command: ConfigCommands, file: Option<PathBuf>) -> Result<(), CliError> {
    let path = file.unwrap_or_else(config_file_path);
    match command {
        ConfigCommands::Get { key } => run_get(&path, &key),
        ConfigCommands::Set { key, value } => run_set(&path, &key, &value),
        ConfigCommands::List => run_list(&path),
        ConfigCommands::Reset { key } => run_reset(&path, key.as_deref()),
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown key '{}'. Run 'partflow config list' for the available keys.",
            key
        ))
    })
}

fn show(value: String) -> String {
    if value.is_empty() {
        "(not set)".to_string()
    } else {
        value
    }
}

fn run_get(path: &Path, key: &str) -> Result<(), CliError> {
    let key = parse_key(key)?;
    let config = ConfigFile::load_from(path)?;
    println!("{}", show(key.get(&config)));
    Ok(())
}

fn run_set(path: &Path, key: &str, value: &str) -> Result<(), CliError> {
    let key = parse_key(key)?;
    let mut config = ConfigFile::load_from(path)?;
    key.set(&mut config, value)?;
    config.save_to(path)?;
    println!("{} = {}", key.name(), show(key.get(&config)));
    Ok(())
}

fn run_list(path: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load_from(path)?;
    let defaults = ConfigFile::default();
    println!("# {}", path.display());

    let mut section = "";
    for key in ConfigKey::all() {
        if key.section() != section {
            section = key.section();
            println!();
            println!("[{}]", section);
        }
        let value = key.get(&config);
        let marker = if value != key.get(&defaults) { "*" } else { " " };
        println!("{} {} = {}", marker, key.key_name(), show(value));
    }
    Ok(())
}

fn run_reset(path: &Path, key: Option<&str>) -> Result<(), CliError> {
    let defaults = ConfigFile::default();
    let config = match key {
        None => defaults,
        Some(key) => {
            let key = parse_key(key)?;
            let mut config = ConfigFile::load_from(path)?;
            key.set(&mut config, &key.get(&defaults))?;
            config
        }
    };
    config.save_to(path)?;
    println!("Reset {}", key.unwrap_or("all settings"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_then_reset_one_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");

        run_set(&path, "resources.total_limit", "64M").unwrap();
        run_set(&path, "loader.ordered", "true").unwrap();
        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.total_limit, 64 * 1024 * 1024);
        assert!(config.ordered);

        run_reset(&path, Some("resources.total_limit")).unwrap();
        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.total_limit, ConfigFile::default().total_limit);
        assert!(config.ordered);
    }

    #[test]
    fn test_reset_all() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        run_set(&path, "retry.max_attempts", "9").unwrap();
        run_reset(&path, None).unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        assert!(matches!(
            run_set(&path, "loader.nonsense", "1"),
            Err(CliError::Config(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_invalid_value_not_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        assert!(run_set(&path, "loader.part_size", "lots").is_err());
        assert!(!path.exists());
    }
}
