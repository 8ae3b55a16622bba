use std::io;
use std::path::Path;

/// Make an identifier (email, group id, API name) usable as one path segment.
pub fn path_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' | '@' => c,
            _ => '_',
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Replace `path` with `contents` via a sibling temp file and a rename, so a
/// reader never sees a partially written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_component() {
        assert_eq!(path_component("ops@example.com"), "ops@example.com");
        assert_eq!(path_component("org/acc:nhg 1"), "org_acc_nhg_1");
        assert_eq!(path_component(".."), "_");
        assert_eq!(path_component(""), "_");
    }

    #[tokio::test]
    async fn test_write_atomic_creates_parents_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/value.txt");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "second");
        assert!(!dir.path().join("a/b/value.txt.tmp").exists());
    }
}
