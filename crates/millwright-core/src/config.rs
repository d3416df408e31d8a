use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono_tz::Tz;
use tracing::{debug, info, trace, warn};

use crate::dates::parse_timezone;

pub const RC_ENV_VAR: &str = "MILLWRIGHTRC";
pub const TIMEZONE_ENV_VAR: &str = "MILLWRIGHT_TIMEZONE";

const RC_FILE_NAME: &str = ".millwrightrc";
const DEFAULT_DATA_DIR: &str = "~/.millwright";

#[derive(Debug, Clone)]
pub struct Config {
    map: HashMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert("data.location".to_string(), DEFAULT_DATA_DIR.to_string());
        map.insert("color".to_string(), "on".to_string());
        map.insert("completion.confirm_early".to_string(), "on".to_string());
        map.insert("completion.disallow_early_mark".to_string(), "off".to_string());
        Self {
            map,
            loaded_files: vec![],
        }
    }
}

impl Config {
    #[tracing::instrument(skip(rc_override))]
    pub fn load(rc_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        match resolve_rc_path(rc_override)? {
            Some(path) => {
                info!(rc = %path.display(), "loading rc file");
                cfg.load_file(&path, &mut Vec::new())?;
            }
            None => debug!("no rc file found; using defaults"),
        }

        Ok(cfg)
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.map.insert(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.map.get(key).map(|v| parse_bool(v))
    }

    pub fn get_i64(&self, key: &str) -> anyhow::Result<Option<i64>> {
        self.map
            .get(key)
            .map(|v| {
                v.trim()
                    .parse::<i64>()
                    .with_context(|| format!("config key {key} expects a whole number, got '{v}'"))
            })
            .transpose()
    }

    /// Zone that decides what "today" is. `$MILLWRIGHT_TIMEZONE` wins over
    /// the `timezone` key; `None` means the system zone.
    pub fn timezone(&self) -> anyhow::Result<Option<Tz>> {
        let from_env = std::env::var(TIMEZONE_ENV_VAR).ok();
        self.timezone_with(from_env.as_deref())
    }

    fn timezone_with(&self, from_env: Option<&str>) -> anyhow::Result<Option<Tz>> {
        let (raw, source) = match (from_env, self.map.get("timezone")) {
            (Some(raw), _) if !raw.trim().is_empty() => (raw.to_string(), TIMEZONE_ENV_VAR),
            (_, Some(raw)) if !raw.trim().is_empty() => (raw.clone(), "timezone"),
            _ => return Ok(None),
        };
        parse_timezone(&raw, source)
            .map(Some)
            .ok_or_else(|| anyhow!("unknown time zone '{}' (from {source})", raw.trim()))
    }

    #[tracing::instrument(skip(self, including))]
    fn load_file(&mut self, path: &Path, including: &mut Vec<PathBuf>) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let canonical = fs::canonicalize(&path)
            .with_context(|| format!("failed to resolve {}", path.display()))?;
        if including.contains(&canonical) {
            let chain = including
                .iter()
                .chain(std::iter::once(&canonical))
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(anyhow!("include cycle: {chain}"));
        }
        including.push(canonical);

        self.loaded_files.push(path.clone());

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        for (line_num, raw_line) in text.lines().enumerate() {
            let line = match raw_line.split_once('#') {
                Some((before, _)) => before.trim(),
                None => raw_line.trim(),
            };
            if line.is_empty() {
                continue;
            }

            if let Some(include_rest) = line.strip_prefix("include ") {
                let include_path = resolve_include_path(&base_dir, include_rest.trim())?;
                debug!(
                    file = %path.display(),
                    include = %include_path.display(),
                    line = line_num + 1,
                    "processing include"
                );
                if include_path.exists() {
                    self.load_file(&include_path, including)?;
                } else {
                    warn!(include = %include_path.display(), "include file does not exist; skipping");
                }
                continue;
            }

            let (k, v) = line.split_once('=').ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            let key = k.trim().to_string();
            let value = v.trim().to_string();
            trace!(key = %key, value = %value, "loaded config key");
            self.map.insert(key, value);
        }

        including.pop();
        Ok(())
    }
}

/// `--data` beats `data.location`; the directory is created when missing.
#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = match (override_dir, cfg.get("data.location")) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(location)) if !location.trim().is_empty() => {
            expand_tilde(Path::new(location.trim()))
        }
        _ => expand_tilde(Path::new(DEFAULT_DATA_DIR)),
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

#[tracing::instrument(skip(override_path))]
fn resolve_rc_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(from_env) = std::env::var(RC_ENV_VAR) {
        if from_env == "/dev/null" {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(from_env)));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let candidate = home.join(RC_FILE_NAME);
    Ok(candidate.exists().then_some(candidate))
}

fn resolve_include_path(base_dir: &Path, include: &str) -> anyhow::Result<PathBuf> {
    if include.is_empty() {
        return Err(anyhow!("include path cannot be empty"));
    }

    let expanded = expand_tilde(Path::new(include));
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base_dir.join(expanded))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "on" | "true"
    )
}
