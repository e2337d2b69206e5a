use std::path::Path;
use std::process::{Command, Output};

const CONFIG: &str = r#"
[embedding]
provider = "hashing"
dimensions = 256

[search]
similarity_threshold = 0.2
"#;

const MAILER: &str = r#"class Mailer:
    """Sends transactional email."""

    def validate_address(self, address):
        """Validates email format."""
        return "@" in address
"#;

const GEOMETRY: &str = r#"class Circle:
    """A circle in the plane."""

    def area(self):
        """Computes the enclosed area."""
        return 3.14159 * self.r * self.r
"#;

fn strata(root: &Path, args: &[&str]) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .args(args)
        .arg("--path")
        .arg(root)
        .arg("--format")
        .arg("json")
        .env("STRATA_LOG", "warn")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "strata {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("strata.toml"), CONFIG).unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/mailer.py"), MAILER).unwrap();
    std::fs::write(dir.path().join("src/geometry.py"), GEOMETRY).unwrap();
    dir
}

#[test]
fn index_resume_and_search() {
    let dir = project();

    let first = json(&strata(dir.path(), &["index"]));
    assert_eq!(first["filesProcessed"], 2);
    assert_eq!(first["membersProcessed"], 2);
    assert_eq!(first["methodsProcessed"], 2);
    assert!(dir.path().join(".strata/files.json").exists());

    let second = json(&strata(dir.path(), &["index"]));
    assert_eq!(second["embeddingsGenerated"], 0);
    assert_eq!(second["filesSkipped"], 2);
    assert_eq!(second["methodsSkipped"], 2);

    let stats = json(&strata(dir.path(), &["stats"]));
    assert_eq!(stats["files"], 2);
    assert_eq!(stats["methods"], 2);

    let response = json(&strata(dir.path(), &["search", "validate email", "--methods-only"]));
    assert_eq!(response["query"], "validate email");
    assert!(response["fileHits"].as_array().unwrap().is_empty());
    let methods = response["methodHits"].as_array().unwrap();
    assert_eq!(methods[0]["name"], "validate_address");
    assert_eq!(methods[0]["parentName"], "Mailer");
    assert_eq!(methods[0]["path"], "src/mailer.py");
}

#[test]
fn terms_and_reset() {
    let dir = project();
    strata(dir.path(), &["index"]);

    let response = json(&strata(dir.path(), &["terms", "circle", "area"]));
    assert_eq!(response["query"], "Multi-term: circle, area");
    let members = response["memberHits"].as_array().unwrap();
    assert_eq!(members[0]["name"], "Circle");

    strata(dir.path(), &["reset"]);
    assert!(!dir.path().join(".strata").exists());
    let stats = json(&strata(dir.path(), &["stats"]));
    assert_eq!(stats["files"], 0);
}

#[test]
fn missing_api_key_fails_before_creating_store() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("strata.toml"), "[embedding]\nprovider = \"openai\"\n").unwrap();
    std::fs::write(dir.path().join("mailer.py"), MAILER).unwrap();

    for args in [&["index"][..], &["search", "email"][..]] {
        let output = Command::new(env!("CARGO_BIN_EXE_strata"))
            .args(args)
            .arg("--path")
            .arg(dir.path())
            .env("STRATA_LOG", "warn")
            .env_remove("OPENAI_API_KEY")
            .output()
            .unwrap();
        assert!(!output.status.success(), "strata {args:?} should fail");
        assert!(!dir.path().join(".strata").exists());
    }
}
