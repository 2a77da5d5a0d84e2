use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Files under `root` (recursively) whose name starts with `prefix` and ends with `suffix`.
pub fn find_files(prefix: &str, suffix: &str, root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(suffix) {
            found.push(entry.path().to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

pub fn remove_files(prefix: &str, suffix: &str, root: &Path) -> Result<usize> {
    let files = find_files(prefix, suffix, root)?;
    for file in &files {
        fs::remove_file(file)?;
        tracing::debug!(path = %file.display(), "removed generated file");
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_only_matching_files_recursively() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).expect("nested");
        fs::write(dir.path().join("test_diode_agent_abc.yaml"), "a").expect("write");
        fs::write(nested.join("test_diode_agent_def.yaml"), "b").expect("write");
        fs::write(dir.path().join("test_diode_agent_abc.yml"), "c").expect("write");
        fs::write(dir.path().join("other.yaml"), "d").expect("write");

        let found = find_files("test_diode_agent_", ".yaml", dir.path()).expect("find");
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().unwrap() == "yaml"));
    }

    #[test]
    fn remove_files_reports_count_and_keeps_others() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("test_diode_agent_x.yaml"), "a").expect("write");
        fs::write(dir.path().join("keep.yaml"), "b").expect("write");

        assert_eq!(remove_files("test_diode_agent_", ".yaml", dir.path()).expect("rm"), 1);
        assert!(dir.path().join("keep.yaml").exists());
        assert_eq!(remove_files("test_diode_agent_", ".yaml", dir.path()).expect("rm"), 0);
    }
}
