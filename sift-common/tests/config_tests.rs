//! Configuration resolution tests
//!
//! Covers the priority order CLI > environment > TOML > compiled default
//! and graceful handling of missing or broken TOML files.
//!
//! Tests that set SIFT_* / MINIO_* variables are marked #[serial] so they
//! never run in parallel with each other.

use std::env;
use std::io::Write;

use clap::Parser;
use serial_test::serial;
use sift_common::config::{load_toml_config, CommonArgs, TomlConfig, DEFAULT_PORT};

#[derive(Debug, Parser)]
struct TestCli {
    #[command(flatten)]
    common: CommonArgs,
}

const ENV_VARS: &[&str] = &[
    "SIFT_CONFIG",
    "SIFT_PROJECT_ID",
    "SIFT_FILESTORE",
    "SIFT_PUBSUB_ENDPOINT",
    "SIFT_REGION",
    "SIFT_PORT",
    "SIFT_ACCESS_TOKEN",
    "MINIO_ACCESSKEYID",
    "MINIO_SECRETKEY",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

fn write_toml(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

// ========================================
// TOML loading
// ========================================

#[test]
fn test_load_toml_config_reads_all_sections() {
    let file = write_toml(
        r#"
project_id = "demo-project"
filestore = "minio:9000"
bucket = "uploads"
target_label = "dog"
port = 9090
delete_subscription_on_stop = true
purge_after_archive = false
"#,
    );

    let config = load_toml_config(Some(file.path()));
    assert_eq!(config.project_id.as_deref(), Some("demo-project"));
    assert_eq!(config.filestore.as_deref(), Some("minio:9000"));
    assert_eq!(config.bucket.as_deref(), Some("uploads"));
    assert_eq!(config.target_label.as_deref(), Some("dog"));
    assert_eq!(config.port, Some(9090));
    assert_eq!(config.delete_subscription_on_stop, Some(true));
    assert_eq!(config.purge_after_archive, Some(false));
    assert_eq!(config.archive_bucket, None);
}

#[test]
fn test_missing_toml_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_toml_config(Some(&dir.path().join("absent.toml")));
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_unparseable_toml_file_falls_back_to_defaults() {
    let file = write_toml("port = \"not a number\"\n[[[");
    let config = load_toml_config(Some(file.path()));
    assert_eq!(config, TomlConfig::default());
}

// ========================================
// Priority order
// ========================================

#[test]
#[serial]
fn test_cli_overrides_env_and_file() {
    clear_env();
    env::set_var("SIFT_PROJECT_ID", "from-env");

    let cli = TestCli::try_parse_from([
        "test",
        "--project-id",
        "from-cli",
        "--filestore",
        "minio:9000",
    ])
    .unwrap();
    let file = TomlConfig {
        project_id: Some("from-file".into()),
        ..TomlConfig::default()
    };

    let settings = cli.common.resolve(&file).unwrap();
    assert_eq!(settings.project_id, "from-cli");
    clear_env();
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    env::set_var("SIFT_PROJECT_ID", "from-env");
    env::set_var("SIFT_FILESTORE", "minio:9000");
    env::set_var("MINIO_ACCESSKEYID", "access");
    env::set_var("MINIO_SECRETKEY", "secret");

    let cli = TestCli::try_parse_from(["test"]).unwrap();
    let file = TomlConfig {
        project_id: Some("from-file".into()),
        port: Some(9090),
        ..TomlConfig::default()
    };

    let settings = cli.common.resolve(&file).unwrap();
    assert_eq!(settings.project_id, "from-env");
    assert_eq!(settings.access_key_id, "access");
    assert_eq!(settings.secret_access_key, "secret");
    // Not set on CLI or env: the file wins over the default
    assert_eq!(settings.port, 9090);
    clear_env();
}

#[test]
#[serial]
fn test_file_used_when_cli_and_env_absent() {
    clear_env();
    let file = write_toml("project_id = \"from-file\"\nfilestore = \"store:9000\"\n");

    let cli = TestCli::try_parse_from(["test", "--config", file.path().to_str().unwrap()]).unwrap();
    let settings = cli.common.resolve(&cli.common.load_file()).unwrap();

    assert_eq!(settings.project_id, "from-file");
    assert_eq!(settings.filestore, "store:9000");
    assert_eq!(settings.port, DEFAULT_PORT);
    assert_eq!(settings.region, "us-east-1");
}

#[test]
#[serial]
fn test_missing_required_setting_is_config_error() {
    clear_env();
    let cli = TestCli::try_parse_from(["test", "--project-id", "demo"]).unwrap();
    let err = cli.common.resolve(&TomlConfig::default()).unwrap_err();
    assert!(matches!(err, sift_common::Error::Config(_)));
    assert!(err.to_string().contains("filestore"));
}

#[test]
#[serial]
fn test_empty_access_token_means_anonymous() {
    clear_env();
    env::set_var("SIFT_ACCESS_TOKEN", "");

    let cli = TestCli::try_parse_from(["test", "--project-id", "p", "--filestore", "f"]).unwrap();
    let settings = cli.common.resolve(&TomlConfig::default()).unwrap();
    assert_eq!(settings.access_token, None);
    clear_env();
}
