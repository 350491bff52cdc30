//! On-disk storage layout and version rotation
//!
//! Layout:
//!
//! ```text
//! <root>/<customer_id>/device/<device_id>/<posix-normalized-path>
//! <root>/<customer_id>/device/<device_id>/<dir>/.SCVERS/<name>.SCVER<N>
//! ```
//!
//! The canonical file lives at its natural path; prior versions live in a
//! sibling `.SCVERS` directory with numbered suffixes (2 = most recent
//! prior, higher = older). The set of suffixes present is always a prefix
//! of {2..max_versions}; rotation drops whatever would exceed the cap.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::protocol::ClientPath;

use super::errors::{ServerError, ServerResult};

/// Chunk size for streamed writes and ranged reads.
pub const CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Versions directory name, sibling to the files it shadows.
const VERSIONS_DIR: &str = ".SCVERS";
const VERSION_SUFFIX: &str = ".SCVER";

/// Per-customer/device file layout rooted at one directory.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    max_versions: u32,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, max_versions: u32) -> Self {
        Self {
            root: root.into(),
            max_versions: max_versions.max(2),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_versions(&self) -> u32 {
        self.max_versions
    }

    /// Resolve the canonical server path for a client file.
    pub fn server_path(&self, customer_id: i64, device_id: i64, path: &ClientPath) -> PathBuf {
        let posix = path.as_posix();
        let relative = posix.trim_start_matches('/');
        self.root
            .join(customer_id.to_string())
            .join("device")
            .join(device_id.to_string())
            .join(relative)
    }

    /// Path of version `n` (n >= 2) for a canonical path.
    pub fn version_path(&self, canonical: &Path, n: u32) -> PathBuf {
        let dir = canonical.parent().unwrap_or(Path::new(""));
        let name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        dir.join(VERSIONS_DIR)
            .join(format!("{}{}{}", name, VERSION_SUFFIX, n))
    }

    /// Begin a streamed write. Bytes accumulate in a temp file next to the
    /// target; nothing at the canonical path changes until `commit`.
    pub fn begin_write(&self, canonical: &Path) -> ServerResult<PendingWrite> {
        let parent = canonical
            .parent()
            .ok_or(ServerError::BadRequest)?
            .to_path_buf();
        fs::create_dir_all(&parent)?;

        let temp_path = temp_name(canonical);
        let file = File::create(&temp_path)?;

        Ok(PendingWrite {
            layout: self.clone(),
            canonical: canonical.to_path_buf(),
            temp_path,
            file,
            written: 0,
        })
    }

    /// Convenience for callers that already hold the whole body.
    pub fn write_file(&self, canonical: &Path, content: &[u8]) -> ServerResult<u64> {
        let mut pending = self.begin_write(canonical)?;
        for chunk in content.chunks(CHUNK_SIZE.max(1)) {
            pending.append(chunk)?;
        }
        pending.commit()
    }

    /// Rotate existing versions of `canonical` up one slot and move the
    /// canonical file into the `.SCVER2` slot. Suffixes are processed
    /// highest first so renames never collide; anything that would exceed
    /// `max_versions` is deleted instead of renamed.
    pub fn rotate_versions(&self, canonical: &Path) -> ServerResult<()> {
        if !canonical.exists() {
            return Ok(());
        }

        let versions_dir = canonical
            .parent()
            .ok_or(ServerError::BadRequest)?
            .join(VERSIONS_DIR);
        fs::create_dir_all(&versions_dir)?;

        let mut existing = self.existing_versions(canonical)?;
        existing.sort_unstable_by(|a, b| b.cmp(a));

        for n in existing {
            let from = self.version_path(canonical, n);
            if n + 1 > self.max_versions {
                fs::remove_file(&from)?;
            } else {
                fs::rename(&from, self.version_path(canonical, n + 1))?;
            }
        }

        fs::rename(canonical, self.version_path(canonical, 2))?;
        Ok(())
    }

    /// Version numbers currently present for a canonical path.
    pub fn existing_versions(&self, canonical: &Path) -> ServerResult<Vec<u32>> {
        let name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let versions_dir = canonical
            .parent()
            .ok_or(ServerError::BadRequest)?
            .join(VERSIONS_DIR);

        let mut versions = Vec::new();
        let entries = match fs::read_dir(&versions_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(versions),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}{}", name, VERSION_SUFFIX);
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(suffix) = file_name.strip_prefix(&prefix) {
                if let Ok(n) = suffix.parse::<u32>() {
                    versions.push(n);
                }
            }
        }

        Ok(versions)
    }

    /// Read a whole file.
    pub fn read_file(&self, path: &Path) -> ServerResult<Vec<u8>> {
        fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ServerError::UnknownFile(path.display().to_string())
            } else {
                e.into()
            }
        })
    }

    /// Read `[offset, offset+length)` of a file.
    pub fn read_range(&self, path: &Path, offset: u64, length: u64) -> ServerResult<Vec<u8>> {
        let size = self.file_size(path)?;
        if offset >= size {
            return Err(ServerError::InvalidRange(format!(
                "offset {} beyond size {}",
                offset, size
            )));
        }

        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;

        let capped = length.min(size - offset) as usize;
        let mut buf = vec![0u8; capped];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn file_size(&self, path: &Path) -> ServerResult<u64> {
        let meta = fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ServerError::UnknownFile(path.display().to_string())
            } else {
                ServerError::from(e)
            }
        })?;
        Ok(meta.len())
    }
}

fn temp_name(canonical: &Path) -> PathBuf {
    let name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    canonical
        .parent()
        .unwrap_or(Path::new(""))
        .join(format!(".{}.scupload", name))
}

/// An upload in flight. Dropping it without commit leaves the canonical
/// path untouched; the temp file is cleaned up.
pub struct PendingWrite {
    layout: StorageLayout,
    canonical: PathBuf,
    temp_path: PathBuf,
    file: File,
    written: u64,
}

impl PendingWrite {
    pub fn append(&mut self, chunk: &[u8]) -> ServerResult<()> {
        self.file.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Rotate the prior canonical file into `.SCVERS`, then rename the
    /// temp file into place. An observer who sees the new canonical file
    /// also sees the prior content at `.SCVER2`.
    pub fn commit(mut self) -> ServerResult<u64> {
        self.file.flush()?;
        self.file.sync_all()?;

        self.layout.rotate_versions(&self.canonical)?;
        fs::rename(&self.temp_path, &self.canonical)?;
        Ok(self.written)
    }

    /// Abort the write and remove the temp file.
    pub fn abort(self) {
        let _ = fs::remove_file(&self.temp_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(dir: &TempDir) -> StorageLayout {
        StorageLayout::new(dir.path().join("storage"), 3)
    }

    #[test]
    fn test_server_path_prefixes_customer_and_device() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let path = layout.server_path(1, 7, &ClientPath::new("/tmp/sc/root/a.txt"));
        assert_eq!(
            path,
            dir.path().join("storage/1/device/7/tmp/sc/root/a.txt")
        );
    }

    #[test]
    fn test_server_path_normalizes_backslashes() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let path = layout.server_path(2, 3, &ClientPath::new("C:\\Users\\bob\\a.txt"));
        assert_eq!(
            path,
            dir.path().join("storage/2/device/3/C:/Users/bob/a.txt")
        );
    }

    #[test]
    fn test_write_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let target = layout.server_path(1, 1, &ClientPath::new("/data/a.bin"));

        let body: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let written = layout.write_file(&target, &body).unwrap();
        assert_eq!(written, body.len() as u64);
        assert_eq!(layout.read_file(&target).unwrap(), body);
    }

    #[test]
    fn test_first_write_creates_no_versions() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let target = layout.server_path(1, 1, &ClientPath::new("/data/a.txt"));

        layout.write_file(&target, b"hello").unwrap();
        assert!(layout.existing_versions(&target).unwrap().is_empty());
    }

    #[test]
    fn test_rotation_shifts_versions() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let target = layout.server_path(1, 1, &ClientPath::new("/data/a.txt"));

        layout.write_file(&target, b"hello").unwrap();
        layout.write_file(&target, b"world").unwrap();
        layout.write_file(&target, b"!").unwrap();

        assert_eq!(layout.read_file(&target).unwrap(), b"!");
        assert_eq!(
            fs::read(layout.version_path(&target, 2)).unwrap(),
            b"world"
        );
        assert_eq!(
            fs::read(layout.version_path(&target, 3)).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_versions_beyond_max_dropped() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let target = layout.server_path(1, 1, &ClientPath::new("/data/a.txt"));

        for content in [b"v1" as &[u8], b"v2", b"v3", b"v4", b"v5"] {
            layout.write_file(&target, content).unwrap();
        }

        // max_versions = 3: only SCVER2 and SCVER3 survive.
        let mut versions = layout.existing_versions(&target).unwrap();
        versions.sort_unstable();
        assert_eq!(versions, vec![2, 3]);
        assert_eq!(layout.read_file(&target).unwrap(), b"v5");
        assert_eq!(fs::read(layout.version_path(&target, 2)).unwrap(), b"v4");
        assert_eq!(fs::read(layout.version_path(&target, 3)).unwrap(), b"v3");
    }

    #[test]
    fn test_zero_byte_file_rotates() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let target = layout.server_path(1, 1, &ClientPath::new("/data/empty"));

        layout.write_file(&target, b"").unwrap();
        layout.write_file(&target, b"x").unwrap();

        assert_eq!(layout.read_file(&target).unwrap(), b"x");
        assert_eq!(fs::read(layout.version_path(&target, 2)).unwrap(), b"");
    }

    #[test]
    fn test_aborted_write_leaves_canonical_untouched() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let target = layout.server_path(1, 1, &ClientPath::new("/data/a.txt"));
        layout.write_file(&target, b"stable").unwrap();

        let mut pending = layout.begin_write(&target).unwrap();
        pending.append(b"half-writ").unwrap();
        pending.abort();

        assert_eq!(layout.read_file(&target).unwrap(), b"stable");
        assert!(layout.existing_versions(&target).unwrap().is_empty());
    }

    #[test]
    fn test_read_range() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let target = layout.server_path(1, 1, &ClientPath::new("/data/a.bin"));
        layout.write_file(&target, b"0123456789").unwrap();

        assert_eq!(layout.read_range(&target, 2, 3).unwrap(), b"234");
        // Length is capped at EOF.
        assert_eq!(layout.read_range(&target, 8, 100).unwrap(), b"89");
        assert!(layout.read_range(&target, 10, 1).is_err());
    }

    #[test]
    fn test_read_missing_file_is_unknown() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let err = layout.read_file(Path::new("/nope/missing.txt")).unwrap_err();
        assert!(matches!(err, ServerError::UnknownFile(_)));
    }
}
