use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn env_map(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn file_values_override_defaults() {
    let mut settings = ClientSettings::default();
    apply_file_settings(
        &mut settings,
        r#"
server_url = "https://inventory.example.com/api"
request_timeout_secs = 5
refresh_interval_secs = 60
"#,
    )
    .expect("parse");

    assert_eq!(settings.server_url, "https://inventory.example.com/api");
    assert_eq!(settings.request_timeout(), Duration::from_secs(5));
    assert_eq!(settings.refresh_interval(), Some(Duration::from_secs(60)));
    assert_eq!(settings.api_token, None);
}

#[test]
fn malformed_file_is_reported() {
    let mut settings = ClientSettings::default();
    assert!(apply_file_settings(&mut settings, "server_url = [").is_err());
}

#[test]
fn app_prefixed_env_wins_over_plain_env() {
    let mut settings = ClientSettings::default();
    apply_env_overrides(
        &mut settings,
        env_map(&[
            ("PATCH_SERVER_URL", "http://plain:1/api"),
            ("APP__SERVER_URL", "http://prefixed:2/api"),
            ("APP__API_TOKEN", "secret"),
        ]),
    );

    assert_eq!(settings.server_url, "http://prefixed:2/api");
    assert_eq!(settings.api_token.as_deref(), Some("secret"));
}

#[test]
fn unparsable_numeric_env_is_ignored() {
    let mut settings = ClientSettings::default();
    apply_env_overrides(
        &mut settings,
        env_map(&[("APP__REQUEST_TIMEOUT_SECS", "soon")]),
    );
    assert_eq!(settings.request_timeout_secs, 30);
}

#[test]
fn zero_refresh_interval_disables_refresh() {
    let settings = ClientSettings {
        refresh_interval_secs: Some(0),
        ..ClientSettings::default()
    };
    assert_eq!(settings.refresh_interval(), None);
}

#[test]
fn validate_rejects_non_http_urls() {
    let settings = ClientSettings {
        server_url: "ftp://inventory".into(),
        ..ClientSettings::default()
    };
    assert!(settings.validate().is_err());
    assert!(ClientSettings::default().validate().is_ok());
}

#[test]
fn load_settings_from_reads_file_and_tolerates_missing_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("patchctl_settings_test_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");

    let missing = load_settings_from(&temp_root.join("absent.toml")).expect("defaults");
    assert_eq!(missing.request_timeout_secs, 30);

    let path = temp_root.join("patchctl.toml");
    fs::write(&path, "request_timeout_secs = 9\n").expect("write settings");
    let loaded = load_settings_from(&path).expect("load");
    assert_eq!(loaded.request_timeout_secs, 9);

    fs::remove_dir_all(temp_root).expect("cleanup");
}
