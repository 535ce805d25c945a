use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Setting `ENABLE_MOD=false` switches off the optional presets.
pub const ENABLE_MOD_ENV: &str = "ENABLE_MOD";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Directory holding `framework_unpacked/`, `services_unpacked/`, ...
    pub root: PathBuf,
    pub java: String,
    pub smali_jar: PathBuf,
    pub baksmali_jar: PathBuf,
    pub api_level: u32,
    /// Files patched in parallel. 1 keeps declared order, 0 uses every core.
    pub workers: usize,
    pub enable_mod: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            java: "java".to_string(),
            smali_jar: PathBuf::from("smali.jar"),
            baksmali_jar: PathBuf::from("baksmali.jar"),
            api_level: 33,
            workers: 1,
            enable_mod: true,
        }
    }
}

impl Config {
    /// Replaces empty or zero values with their defaults.
    fn with_defaults(self) -> Self {
        let default_config = Config::default();
        Config {
            root: if self.root.as_os_str().is_empty() {
                default_config.root
            } else {
                self.root
            },
            java: if self.java.is_empty() {
                default_config.java
            } else {
                self.java
            },
            smali_jar: if self.smali_jar.as_os_str().is_empty() {
                default_config.smali_jar
            } else {
                self.smali_jar
            },
            baksmali_jar: if self.baksmali_jar.as_os_str().is_empty() {
                default_config.baksmali_jar
            } else {
                self.baksmali_jar
            },
            api_level: if self.api_level == 0 {
                default_config.api_level
            } else {
                self.api_level
            },
            workers: self.workers,
            enable_mod: self.enable_mod,
        }
    }

    /// Applies `ENABLE_MOD` from the environment.
    pub fn apply_env(mut self, enable_mod: Option<&str>) -> Self {
        if let Some(value) = enable_mod {
            self.enable_mod = !value.trim().eq_ignore_ascii_case("false");
        }
        self
    }
}

/// Reads the config at `path`, or the XDG default location when `None`.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let config_string = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            parse(&config_string)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => load_or_create()?,
    };
    let enable_mod = std::env::var(ENABLE_MOD_ENV).ok();
    Ok(config.apply_env(enable_mod.as_deref()))
}

fn parse(config_string: &str) -> Result<Config> {
    let config: Config = toml::from_str(config_string)?;
    Ok(config.with_defaults())
}

pub fn load_or_create() -> Result<Config> {
    let xdg_dirs = xdg::BaseDirectories::new();
    let config_path = xdg_dirs.place_config_file("smalipatch/config.toml")?;
    load_or_create_at(&config_path)
}

fn load_or_create_at(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        let default_config = Config::default();
        let toml_string = toml::to_string_pretty(&default_config)?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(config_path, toml_string)?;

        tracing::info!(path = %config_path.display(), "created default config");
        return Ok(default_config);
    }

    let config_string = fs::read_to_string(config_path)?;
    let final_config = parse(&config_string)?;

    // Write missing fields back so every option is visible in the file.
    let final_toml_string = toml::to_string_pretty(&final_config)?;
    if final_toml_string != config_string {
        fs::write(config_path, final_toml_string)?;
    }

    Ok(final_config)
}
