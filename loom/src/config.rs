// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use ini::Ini;
use log::{debug, info, warn};
use loom_common::settings::{parse_bool, Settings};
use loom_common::BackendApi;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "loom.ini";

/// Locate loom.ini in the user's config directory.
pub fn find_config_path() -> Option<PathBuf> {
    // $XDG_CONFIG_HOME/loom/loom.ini
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&xdg).join("loom").join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    // ~/.config/loom/loom.ini
    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(&home)
            .join(".config")
            .join("loom")
            .join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Load settings from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                warn!("Config file not found: {}", p.display());
                return settings;
            }
            p.to_path_buf()
        }
        None => match find_config_path() {
            Some(p) => p,
            None => {
                info!("No loom.ini found, using defaults");
                return settings;
            }
        },
    };

    info!("Loading config from: {}", config_path.display());

    match Ini::load_from_file(&config_path) {
        Ok(conf) => apply_ini(&conf, &mut settings),
        Err(e) => warn!("Failed to parse config: {}", e),
    }
    settings
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str, current: T) -> T {
    match value.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", key, value);
            current
        }
    }
}

fn parse_flag(key: &str, value: &str, current: bool) -> bool {
    parse_bool(value).unwrap_or_else(|| {
        warn!("Ignoring invalid value for {}: {:?}", key, value);
        current
    })
}

/// Overlay the values present in `conf` onto `settings`.
pub fn apply_ini(conf: &Ini, settings: &mut Settings) {
    // [Backend]
    if let Some(section) = conf.section(Some("Backend")) {
        if let Some(backend) = section.get("backend") {
            settings.backend = BackendApi::from_str_or_default(backend);
            debug!("Backend: {:?}", settings.backend);
        }
        if let Some(size) = section.get("max_texture_size") {
            settings.max_texture_size = parse_number("max_texture_size", size, settings.max_texture_size);
        }
        if let Some(retire) = section.get("retire_on_poll") {
            settings.retire_on_poll = parse_flag("retire_on_poll", retire, settings.retire_on_poll);
        }
    }

    // [Context]
    if let Some(section) = conf.section(Some("Context")) {
        if let Some(limit) = section.get("transfer_buffer_cache_limit") {
            settings.transfer_buffer_cache_limit = parse_number(
                "transfer_buffer_cache_limit",
                limit,
                settings.transfer_buffer_cache_limit,
            );
        }
    }

    // [Demo]
    if let Some(section) = conf.section(Some("Demo")) {
        if let Some(threads) = section.get("recorder_threads") {
            settings.recorder_threads = parse_number("recorder_threads", threads, settings.recorder_threads);
        }
        if let Some(size) = section.get("readback_size") {
            settings.readback_size = parse_number("readback_size", size, settings.readback_size);
        }
    }

    // [Debugging]
    if let Some(section) = conf.section(Some("Debugging")) {
        if let Some(debug_log) = section.get("use_debug_logging") {
            settings.use_debug_logging =
                parse_flag("use_debug_logging", debug_log, settings.use_debug_logging);
        }
    }
}
