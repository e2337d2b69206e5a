use std::path::{Component, Path};

use strata_core::{IndexConfig, StrataError};
use tracing::debug;

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// A source file discovered while walking a project.
///
/// # Examples
///
/// ```
/// use strata_extract::walker::SourceFile;
///
/// let file = SourceFile {
///     path: "src/main.rs".into(),
///     content: "fn main() {}".into(),
/// };
/// assert_eq!(file.extension(), Some("rs"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    /// Full UTF-8 content.
    pub content: String,
}

impl SourceFile {
    /// Extension of the file name without the dot, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.path.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty()).then_some(ext)
    }
}

/// Walk a project tree and return every indexable source file, sorted by path.
///
/// Honors `.gitignore`, skips hidden directories and any directory whose name
/// is listed in `config.excluded_dirs`, keeps only files whose extension is in
/// `config.extensions`, and drops files that are larger than
/// `config.max_file_bytes`, contain NUL bytes, or are not valid UTF-8.
///
/// # Errors
///
/// Returns [`StrataError::Io`] if `root` is not a readable directory.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use strata_core::IndexConfig;
/// use strata_extract::walker::walk_project;
///
/// let files = walk_project(Path::new("."), &IndexConfig::default()).unwrap();
/// for f in &files {
///     println!("{} ({} bytes)", f.path, f.content.len());
/// }
/// ```
pub fn walk_project(root: &Path, config: &IndexConfig) -> Result<Vec<SourceFile>, StrataError> {
    if !root.is_dir() {
        return Err(StrataError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("project root is not a directory: {}", root.display()),
        )));
    }

    let excluded = config.excluded_dirs.clone();
    let walker = ignore::WalkBuilder::new(root)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            if !is_dir {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !name.starts_with('.') && !excluded.iter().any(|d| d.as_str() == name)
        })
        .build();

    let mut files = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !config.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
            continue;
        }

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if metadata.len() > config.max_file_bytes {
            debug!(path = %path.display(), size = metadata.len(), "skipping oversized file");
            continue;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                debug!(path = %path.display(), "skipping non-UTF-8 file");
                continue;
            }
        };

        let check_len = content.len().min(BINARY_CHECK_SIZE);
        if content.as_bytes()[..check_len].contains(&0) {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        files.push(SourceFile {
            path: to_slash_path(relative),
            content,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(count = files.len(), root = %root.display(), "walked project");
    Ok(files)
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_temp_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("src/models")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/models/user.py"), "class User: pass").unwrap();
        fs::write(root.join("src/app.ts"), "class App {}").unwrap();
        fs::write(root.join("src/Main.java"), "public class Main {}").unwrap();

        fs::write(root.join("README.md"), "# Hello").unwrap();
        fs::write(root.join("data.csv"), "a,b,c").unwrap();

        dir
    }

    #[test]
    fn walk_finds_configured_extensions_sorted() {
        let dir = make_temp_project();
        let files = walk_project(dir.path(), &IndexConfig::default()).unwrap();

        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "src/Main.java",
                "src/app.ts",
                "src/main.rs",
                "src/models/user.py"
            ]
        );
    }

    #[test]
    fn walk_honors_extension_list() {
        let dir = make_temp_project();
        let config = IndexConfig {
            extensions: vec!["py".into()],
            ..IndexConfig::default()
        };
        let files = walk_project(dir.path(), &config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/models/user.py");
        assert_eq!(files[0].content, "class User: pass");
    }

    #[test]
    fn walk_skips_excluded_and_hidden_dirs() {
        let dir = make_temp_project();
        let root = dir.path();
        fs::create_dir_all(root.join("node_modules/lib")).unwrap();
        fs::write(root.join("node_modules/lib/index.js"), "x").unwrap();
        fs::create_dir_all(root.join("venv")).unwrap();
        fs::write(root.join("venv/site.py"), "x").unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join(".cache/tmp.py"), "x").unwrap();

        let files = walk_project(root, &IndexConfig::default()).unwrap();
        for f in &files {
            assert!(!f.path.starts_with("node_modules"), "{}", f.path);
            assert!(!f.path.starts_with("venv"), "{}", f.path);
            assert!(!f.path.starts_with(".cache"), "{}", f.path);
        }
        assert_eq!(files.len(), 4);
    }

    #[test]
    fn walk_respects_gitignore() {
        let dir = make_temp_project();
        let root = dir.path();

        // The ignore crate needs a .git dir to recognize .gitignore files
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("generated")).unwrap();
        fs::write(root.join("generated/out.rs"), "fn ignored() {}").unwrap();
        fs::write(root.join(".gitignore"), "generated/\n").unwrap();

        let files = walk_project(root, &IndexConfig::default()).unwrap();
        assert!(files.iter().all(|f| !f.path.starts_with("generated")));
    }

    #[test]
    fn walk_skips_binary_and_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let mut binary_content = b"fn main() { ".to_vec();
        binary_content.push(0);
        binary_content.extend_from_slice(b" }");
        fs::write(root.join("binary.rs"), &binary_content).unwrap();
        fs::write(root.join("huge.rs"), "x".repeat(2048)).unwrap();
        fs::write(root.join("ok.rs"), "fn ok() {}").unwrap();

        let config = IndexConfig {
            max_file_bytes: 1024,
            ..IndexConfig::default()
        };
        let files = walk_project(root, &config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "ok.rs");
    }

    #[test]
    fn walk_skips_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("latin1.py"), [0x63, 0x61, 0x66, 0xE9]).unwrap();
        fs::write(dir.path().join("ok.py"), "x = 1").unwrap();

        let files = walk_project(dir.path(), &IndexConfig::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "ok.py");
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = walk_project(&dir.path().join("nope"), &IndexConfig::default());
        assert!(matches!(result, Err(StrataError::Io(_))));
    }

    #[test]
    fn extension_of_dotfile_is_none() {
        let file = SourceFile {
            path: "dir/.env".into(),
            content: String::new(),
        };
        assert_eq!(file.extension(), None);
    }
}
