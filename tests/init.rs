use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "strata init failed: {}", String::from_utf8_lossy(&output.stderr));

    let config_path = dir.path().join("strata.toml");
    assert!(config_path.exists(), "strata.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[search]"));
    assert!(content.contains("[embedding]"));

    let config: strata_core::StrataConfig = toml::from_str(&content).unwrap();
    assert_eq!(config.search.max_results_per_type, 10);
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("strata.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
}
