use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::profile::manifest_path;

/// Removes every artifact a transcoder session left in `work_dir`: all
/// segment files carrying the `<id>-` prefix plus the manifest itself.
///
/// Runs before a session starts (a crashed prior session may have reused the
/// id) and again once it ends. Missing files are fine either way; only
/// genuine I/O failures are reported, and callers treat those as log-only.
pub fn remove_session_files(work_dir: &Path, id: &str) -> anyhow::Result<()> {
    let prefix = format!("{id}-");
    let entries = match fs::read_dir(work_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(&prefix) {
            remove_if_present(&entry.path())?;
        }
    }

    remove_if_present(&manifest_path(work_dir, id))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("removed {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn test_work_dir(name: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("tvbridge-cleanup-{name}-{id}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create test dir");
        dir
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").expect("write test file");
    }

    #[test]
    fn removes_only_matching_session_artifacts() {
        let dir = test_work_dir("matching");
        for name in ["abc-0.ts", "abc-1.ts", "abc.m3u8", "other-0.ts", "other.m3u8"] {
            touch(&dir, name);
        }

        remove_session_files(&dir, "abc").expect("cleanup");

        let remaining: Vec<String> = fs::read_dir(&dir)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert!(remaining.contains(&"other-0.ts".to_string()));
        assert!(remaining.contains(&"other.m3u8".to_string()));
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn idempotent_on_clean_directory() {
        let dir = test_work_dir("idempotent");

        remove_session_files(&dir, "abc").expect("first run");
        remove_session_files(&dir, "abc").expect("second run");

        assert_eq!(fs::read_dir(&dir).expect("read dir").count(), 0);
    }

    #[test]
    fn missing_work_dir_is_not_an_error() {
        let dir = test_work_dir("missing");
        fs::remove_dir_all(&dir).expect("remove dir");

        remove_session_files(&dir, "abc").expect("cleanup of absent dir");
    }

    #[test]
    fn prefix_match_does_not_cross_sessions() {
        // "abc12-0.ts" does not carry the "abc1-" prefix
        let dir = test_work_dir("prefix");
        touch(&dir, "abc1-0.ts");
        touch(&dir, "abc12-0.ts");

        remove_session_files(&dir, "abc1").expect("cleanup");

        assert!(!dir.join("abc1-0.ts").exists());
        assert!(dir.join("abc12-0.ts").exists());
    }
}
