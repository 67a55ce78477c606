use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

const APP_DIR_NAME: &str = "scriptsync";
const DEFAULT_MIRROR_DIR_NAME: &str = "scriptsync";
const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;
const DEFAULT_PAGE_SIZE: u64 = 100;
const DEFAULT_SCRIPT_EXT: &str = "js";

/// What `expand` pulls for each script of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Names only; content is fetched when a script is selected.
    NamesOnly,
    /// Names and content; every script is written to the mirror on expand.
    Full,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub settings_path: PathBuf,
    pub mirror_root: PathBuf,
    pub compare_root: PathBuf,
    pub search_debounce: Duration,
    pub page_size: u32,
    pub fetch_policy: FetchPolicy,
    pub script_ext: String,
    pub watch_settings: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let settings_path = std::env::var("SCRIPTSYNC_SETTINGS")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_settings_path);
        let mirror_root = std::env::var("SCRIPTSYNC_MIRROR_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_MIRROR_DIR_NAME));
        let compare_root = std::env::var("SCRIPTSYNC_COMPARE_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_compare_root);
        let search_debounce = Duration::from_millis(read_u64_env(
            "SCRIPTSYNC_SEARCH_DEBOUNCE_MS",
            DEFAULT_SEARCH_DEBOUNCE_MS,
        ));
        let page_size = u32::try_from(read_u64_env("SCRIPTSYNC_PAGE_SIZE", DEFAULT_PAGE_SIZE))
            .unwrap_or(u32::MAX);
        let fetch_policy = if read_bool_env("SCRIPTSYNC_FETCH_FULL", false) {
            FetchPolicy::Full
        } else {
            FetchPolicy::NamesOnly
        };
        let script_ext = std::env::var("SCRIPTSYNC_SCRIPT_EXT")
            .ok()
            .map(|value| value.trim().trim_start_matches('.').to_string())
            .filter(|value| !value.is_empty() && !value.contains(['.', '/', '\\']))
            .unwrap_or_else(|| DEFAULT_SCRIPT_EXT.to_string());
        let watch_settings = read_bool_env("SCRIPTSYNC_WATCH_SETTINGS", true);

        Ok(Self {
            settings_path,
            mirror_root,
            compare_root,
            search_debounce,
            page_size,
            fetch_policy,
            script_ext,
            watch_settings,
        })
    }

    /// Configuration rooted in one directory, used by tests and by callers
    /// that manage their own layout.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            settings_path: root.join("settings.json"),
            mirror_root: root.join("mirror"),
            compare_root: root.join("compare"),
            search_debounce: Duration::from_millis(DEFAULT_SEARCH_DEBOUNCE_MS),
            page_size: DEFAULT_PAGE_SIZE as u32,
            fetch_policy: FetchPolicy::NamesOnly,
            script_ext: DEFAULT_SCRIPT_EXT.to_string(),
            watch_settings: false,
        }
    }
}

fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join("settings.json")
}

fn default_compare_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join("compare")
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
