use std::{
    env,
    time::{SystemTime, UNIX_EPOCH},
};

use super::*;

fn no_env(_: &str) -> Option<String> {
    None
}

fn temp_settings_file(contents: &str) -> std::path::PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("market_settings_test_{suffix}.toml"));
    fs::write(&path, contents).expect("write settings");
    path
}

#[test]
fn defaults_apply_without_file_or_env() {
    let settings = load_settings_from(Path::new("/nonexistent/market.toml"), no_env);
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.session_ttl_minutes, 30);
    assert_eq!(settings.blob_epochs, 5);
    settings.validate().expect("defaults are valid");
}

#[test]
fn file_values_override_defaults_and_env_overrides_file() {
    let path = temp_settings_file(
        r#"
package_id = "0xabc"
backend_url = "http://file.example"
blob_epochs = 7
"#,
    );
    let settings = load_settings_from(&path, |name| match name {
        "VITE_ENDPOINT" => Some("http://vite.example".into()),
        "APP__BACKEND_URL" => Some("http://app.example".into()),
        _ => None,
    });
    fs::remove_file(&path).expect("cleanup");

    assert_eq!(settings.package_id, "0xabc");
    assert_eq!(settings.blob_epochs, 7);
    assert_eq!(settings.backend_url, "http://app.example");
}

#[test]
fn original_vite_names_are_honoured() {
    let settings = load_settings_from(Path::new("/nonexistent/market.toml"), |name| match name {
        "VITE_PID" => Some("0x1234".into()),
        "VITE_FUNC_dtb" => Some("delist_and_take".into()),
        "VITE_TP" => Some("0x99".into()),
        _ => None,
    });
    let contracts = settings.contracts().expect("contracts");
    assert_eq!(contracts.package_id, ObjectId::parse("0x1234").expect("id"));
    assert_eq!(contracts.delist_function, "delist_and_take");
    assert_eq!(contracts.transfer_policy_id, ObjectId::parse("0x99").expect("id"));
}

#[test]
fn malformed_values_fail_validation() {
    let mut settings = Settings {
        package_id: "abc".into(),
        ..Settings::default()
    };
    assert!(matches!(
        settings.validate(),
        Err(SettingsError::InvalidId {
            field: "package id",
            ..
        })
    ));

    settings.package_id = "0xabc".into();
    settings.blob_publisher_url = "not a url".into();
    assert!(matches!(
        settings.validate(),
        Err(SettingsError::InvalidUrl { .. })
    ));

    settings.blob_publisher_url = Settings::default().blob_publisher_url;
    settings.session_ttl_minutes = 45;
    assert!(matches!(
        settings.validate(),
        Err(SettingsError::SessionTtl(45))
    ));
}

#[test]
fn unparsable_numbers_keep_defaults() {
    let settings = load_settings_from(Path::new("/nonexistent/market.toml"), |name| {
        (name == "APP__SESSION_TTL_MINUTES").then(|| "soon".to_string())
    });
    assert_eq!(settings.session_ttl_minutes, 30);
}
