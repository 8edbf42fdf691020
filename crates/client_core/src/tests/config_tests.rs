use super::*;

use std::{
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn temp_settings_file(contents: &str) -> std::path::PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let root = env::temp_dir().join(format!("chat_timeline_config_test_{suffix}"));
    fs::create_dir_all(&root).expect("temp root");
    let path = root.join("client.toml");
    fs::write(&path, contents).expect("write settings");
    path
}

#[test]
fn missing_file_yields_defaults() {
    let settings = load_settings_from("/definitely/not/here/client.toml");
    assert_eq!(settings.event_capacity, 1024);
    assert!(settings.page_size >= 1 && settings.page_size <= 100);
}

#[test]
fn file_values_override_defaults() {
    let path = temp_settings_file("page_size = \"20\"\nlog_filter = \"debug\"\n");

    let settings = load_settings_from(&path);
    assert_eq!(settings.page_size, 20);
    assert_eq!(settings.log_filter, "debug");

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn unparseable_values_keep_previous() {
    let mut settings = ClientSettings::default();
    apply_overrides(&mut settings, |key| match key {
        "page_size" => Some("lots".into()),
        "event_capacity" => Some("64".into()),
        _ => None,
    });
    assert_eq!(settings.page_size, 50);
    assert_eq!(settings.event_capacity, 64);
}

#[test]
fn normalization_clamps_ranges() {
    let settings = ClientSettings {
        page_size: 0,
        event_capacity: 1,
        log_filter: "info".into(),
    }
    .normalized();
    assert_eq!(settings.page_size, 1);
    assert_eq!(settings.event_capacity, 16);

    let settings = ClientSettings {
        page_size: 5000,
        ..ClientSettings::default()
    }
    .normalized();
    assert_eq!(settings.page_size, 100);
}
