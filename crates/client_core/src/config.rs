use std::{collections::HashMap, fs, path::Path};

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";
const MAX_PAGE_SIZE: u32 = 100;
const MIN_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Messages requested when a session is first opened.
    pub page_size: u32,
    /// Buffer depth of the store and client event channels.
    pub event_capacity: usize,
    pub log_filter: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            event_capacity: 1024,
            log_filter: "info".into(),
        }
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(DEFAULT_SETTINGS_FILE)
}

pub fn load_settings_from(path: impl AsRef<Path>) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path.as_ref()) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply_overrides(&mut settings, |key| file_cfg.get(key).cloned());
        }
    }

    apply_overrides(&mut settings, |key| {
        std::env::var(format!("APP__{}", key.to_ascii_uppercase())).ok()
    });

    settings.normalized()
}

fn apply_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("page_size") {
        if let Ok(parsed) = v.trim().parse::<u32>() {
            settings.page_size = parsed;
        }
    }
    if let Some(v) = lookup("event_capacity") {
        if let Ok(parsed) = v.trim().parse::<usize>() {
            settings.event_capacity = parsed;
        }
    }
    if let Some(v) = lookup("log_filter") {
        if !v.trim().is_empty() {
            settings.log_filter = v.trim().to_string();
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        self.event_capacity = self.event_capacity.max(MIN_EVENT_CAPACITY);
        self
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
