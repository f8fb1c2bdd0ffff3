// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::types::BackendApi;

/// Global settings, populated from the config INI and command line.
#[derive(Debug, Clone)]
pub struct Settings {
    // Backend
    pub backend: BackendApi,
    pub max_texture_size: i32,
    /// Null backend: in-flight work retires the first time it is polled.
    pub retire_on_poll: bool,

    // Context
    pub transfer_buffer_cache_limit: usize,

    // Demo
    pub recorder_threads: u32,
    pub readback_size: i32,

    // Debug
    pub use_debug_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendApi::Null,
            max_texture_size: 8192,
            retire_on_poll: true,
            transfer_buffer_cache_limit: 16,
            recorder_threads: 2,
            readback_size: 4,
            use_debug_logging: false,
        }
    }
}

/// Parse a boolean config value the way INI files usually spell them.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
