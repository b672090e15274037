//! Repository walk: find every supported source file, skipping dependency
//! and build directories.

use crate::parsing::Language;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Directories never descended into, regardless of gitignore state.
pub const DENY_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    ".git",
    ".pampa",
    ".pampax",
    "dist",
    "build",
    "tmp",
    "temp",
    ".npm",
    ".yarn",
    ".Trash",
    "$RECYCLE.BIN",
];

pub fn is_denied_dir(name: &str) -> bool {
    DENY_DIRS.contains(&name)
}

/// Whether any component of a (relative) path is on the deny list.
pub fn path_is_denied(path: &Path) -> bool {
    path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(is_denied_dir)
    })
}

/// Walk `root` and return every supported source file, repo-relative.
/// Respects `.gitignore` on top of the fixed deny list.
pub fn walk_source_files(root: &Path) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .follow_links(false)
        .require_git(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_str().unwrap_or("");
            !(entry.file_type().is_some_and(|ft| ft.is_dir()) && is_denied_dir(name))
        });

    let mut files: Vec<PathBuf> = builder
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|entry| Language::from_path(entry.path()).is_some())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .ok()
        })
        .collect();
    files.sort();
    files
}

/// Normalize a repo-relative path to the forward-slash form used in chunk
/// ids and the manifest.
pub fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_supported_files_and_skips_denied_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".pampa")).unwrap();
        fs::write(root.join("src/app.js"), "function a() {}").unwrap();
        fs::write(root.join("src/util.py"), "def u(): pass").unwrap();
        fs::write(root.join("README.md"), "# readme").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join(".pampa/cache.js"), "x").unwrap();

        let files = walk_source_files(root);
        let names: Vec<String> = files.iter().map(|p| normalize_rel_path(p)).collect();
        assert_eq!(names, vec!["src/app.js", "src/util.py"]);
    }

    #[test]
    fn gitignore_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "generated.js\n").unwrap();
        fs::write(root.join("generated.js"), "x").unwrap();
        fs::write(root.join("kept.js"), "function k() {}").unwrap();

        let files = walk_source_files(root);
        let names: Vec<String> = files.iter().map(|p| normalize_rel_path(p)).collect();
        assert_eq!(names, vec!["kept.js"]);
    }

    #[test]
    fn deny_check_covers_nested_components() {
        assert!(path_is_denied(Path::new("node_modules/a/b.js")));
        assert!(path_is_denied(Path::new("a/dist/b.js")));
        assert!(!path_is_denied(Path::new("src/b.js")));
    }
}
