//! Crash-safe file writes shared by both stores.

use std::io;
use std::path::Path;

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Writes `content` to `path` via a sibling temp file and a rename.
///
/// Readers observe either the previous file or the complete new one. Parent
/// directories are created as needed.
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' has no parent directory", path.display()),
        ));
    };
    tokio::fs::create_dir_all(parent).await?;

    let temp_path = parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));
    {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Escapes one path component so any string maps to a distinct, safe file
/// name.
///
/// ASCII alphanumerics, `-`, `_` and `.` pass through; every other byte is
/// percent-encoded. A leading `.` is encoded too, which rules out `.`, `..`
/// and hidden names.
pub(crate) fn escape_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, byte) in value.bytes().enumerate() {
        let passthrough = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || (byte == b'.' && i > 0);
        if passthrough {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_component() {
        assert_eq!(escape_component("abc-123_x.json"), "abc-123_x.json");
        assert_eq!(escape_component("a/b"), "a%2Fb");
        assert_eq!(escape_component(".."), "%2E.");
        assert_eq!(escape_component("50%"), "50%25");
        assert_eq!(escape_component("é"), "%C3%A9");
    }

    #[tokio::test]
    async fn test_write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/file.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "temp files left behind: {leftovers:?}");
    }
}
