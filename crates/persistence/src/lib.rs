//! Atomic write-rename persistence protocol.
//!
//! This crate is the durability primitive the rest of the firmware core
//! builds on: every mutation that must survive a power loss goes through
//! [`safe_write`], and every boot-time reload goes through
//! [`load_file_into`]. Above the single-file level, [`PartitionDriver`]
//! models the contract for mounting a wear-levelled FAT volume and for the
//! "upload backup" external interface (unmount, erase, stream raw chunks,
//! remount). The concrete FAT/wear-levelling implementation is an external
//! collaborator; this crate only defines what the core requires of it and
//! ships a plain-file reference adapter ([`FilePartition`]) for hosts that
//! back the partition with a regular filesystem (and for tests).
//!
//! # Examples
//!
//! ```rust,no_run
//! use persistence::safe_write;
//! use std::path::Path;
//!
//! safe_write(Path::new("/mnt/values/devices.bin"), ".tmp", b"snapshot bytes")
//!     .expect("failed to persist snapshot");
//! ```

#![warn(missing_docs)]

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Errors raised by the persistence protocol.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Underlying filesystem operation failed.
    #[error("persistence I/O error on {path}: {source}")]
    Io {
        /// Path the failing operation targeted.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// `load_file_into` was given a buffer smaller than the file's contents.
    #[error("buffer of {buf_len} bytes too small for {path} ({file_len} bytes)")]
    BufferTooSmall {
        /// Path of the file that did not fit.
        path: PathBuf,
        /// Capacity of the caller-provided buffer.
        buf_len: usize,
        /// Actual file length.
        file_len: usize,
    },
    /// A partition operation was attempted before `mount` succeeded.
    #[error("partition is not mounted")]
    NotMounted,
    /// Partition self-test (write + read back) failed to round-trip.
    #[error("partition self-test failed: wrote {wrote:?}, read back {read:?}")]
    SelfTestMismatch {
        /// Bytes written during self-test.
        wrote: Vec<u8>,
        /// Bytes read back during self-test.
        read: Vec<u8>,
    },
}

fn io_err(path: &Path, source: io::Error) -> PersistError {
    PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Loads the contents of `path` into `buf`, returning the number of bytes
/// read. Mirrors the source protocol's `load_file_into`, which returns `-1`
/// on failure; here that is `Err(PersistError)` instead.
pub fn load_file_into(path: &Path, buf: &mut [u8]) -> Result<usize, PersistError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let file_len = file
        .metadata()
        .map_err(|e| io_err(path, e))?
        .len() as usize;
    if file_len > buf.len() {
        return Err(PersistError::BufferTooSmall {
            path: path.to_path_buf(),
            buf_len: buf.len(),
            file_len,
        });
    }
    let read = file.read(buf).map_err(|e| io_err(path, e))?;
    Ok(read)
}

/// Writes `bytes` durably to `path` using the write-temp/fsync/rename
/// protocol: the data lands at `path` with extension `tmp_ext` appended,
/// is fsync'd and closed, then renamed over `path`. Parent directories are
/// created on demand. A crash at any point before the rename leaves the
/// original `path` untouched; a crash after the rename leaves the new
/// contents in place. This is the unit of atomicity the event store relies
/// on — never call this for part of a snapshot.
pub fn safe_write(path: &Path, tmp_ext: &str, bytes: &[u8]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(tmp_ext);
    let tmp_path = PathBuf::from(tmp_name);

    {
        let mut file = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        file.write_all(bytes).map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "safe_write committed");
    Ok(())
}

/// A producer callback used by [`PartitionDriver::backup`]: called
/// repeatedly with a scratch buffer to fill; returns the number of bytes
/// produced, or `0` to signal end of stream.
pub type BackupSource<'a> = dyn FnMut(&mut [u8]) -> io::Result<usize> + 'a;

/// A sink callback used by [`PartitionDriver::restore`]: called with each
/// chunk read from the incoming stream.
pub type RestoreSink<'a> = dyn FnMut(&[u8]) -> io::Result<()> + 'a;

/// Contract for mounting a labelled, wear-levelled partition and for the
/// partition-image backup/restore path used by the "upload backup" external
/// interface. No per-file interpretation happens at this level — snapshots
/// are raw trivially-copyable records, and atomicity here is file-grained,
/// not record-grained.
pub trait PartitionDriver {
    /// Mounts the partition at its fixed mount point, then self-tests by
    /// writing and re-reading a small marker file.
    fn mount(&mut self) -> Result<(), PersistError>;

    /// Unmounts, erases the partition, and re-mounts, streaming raw bytes
    /// from `source` in between. Used to push a full partition image (e.g.
    /// the `POST .../devices` octet-stream route).
    fn restore(&mut self, source: &mut BackupSource<'_>) -> Result<(), PersistError>;

    /// Streams the partition's raw contents to `sink`, chunk by chunk.
    /// Used to serve the octet-stream GET of the values partition.
    fn backup(&mut self, sink: &mut RestoreSink<'_>) -> Result<(), PersistError>;
}

const SELF_TEST_FILE: &str = ".mount_self_test";
const SELF_TEST_BYTES: &[u8] = b"aquacore-mount-ok";

/// Reference [`PartitionDriver`] backed by a plain host directory, standing
/// in for the wear-levelled FAT volume on targets that lack one (and in
/// tests). Production deployments substitute a real FAT/NVS driver behind
/// the same trait; nothing else in the core depends on the substitution.
pub struct FilePartition {
    mount_point: PathBuf,
    mounted: bool,
}

impl FilePartition {
    /// Creates a partition rooted at `mount_point`. Call [`mount`] before use.
    ///
    /// [`mount`]: PartitionDriver::mount
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        FilePartition {
            mount_point: mount_point.into(),
            mounted: false,
        }
    }

    /// Path under the mount point for a given logical file name, e.g.
    /// `devices.bin` or a schedule's `<creation_id>.state`.
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.mount_point.join(file_name)
    }

    fn require_mounted(&self) -> Result<(), PersistError> {
        if self.mounted {
            Ok(())
        } else {
            Err(PersistError::NotMounted)
        }
    }
}

impl PartitionDriver for FilePartition {
    fn mount(&mut self) -> Result<(), PersistError> {
        fs::create_dir_all(&self.mount_point).map_err(|e| io_err(&self.mount_point, e))?;
        let probe = self.mount_point.join(SELF_TEST_FILE);
        safe_write(&probe, ".tmp", SELF_TEST_BYTES)?;
        let mut buf = [0u8; SELF_TEST_BYTES.len()];
        let n = load_file_into(&probe, &mut buf)?;
        if &buf[..n] != SELF_TEST_BYTES {
            return Err(PersistError::SelfTestMismatch {
                wrote: SELF_TEST_BYTES.to_vec(),
                read: buf[..n].to_vec(),
            });
        }
        self.mounted = true;
        tracing::info!(mount_point = %self.mount_point.display(), "partition mounted");
        Ok(())
    }

    fn restore(&mut self, source: &mut BackupSource<'_>) -> Result<(), PersistError> {
        self.require_mounted()?;
        self.mounted = false;
        fs::remove_dir_all(&self.mount_point).map_err(|e| io_err(&self.mount_point, e))?;
        fs::create_dir_all(&self.mount_point).map_err(|e| io_err(&self.mount_point, e))?;

        let image_path = self.mount_point.join("partition.img");
        let mut file = File::create(&image_path).map_err(|e| io_err(&image_path, e))?;
        let mut scratch = [0u8; 4096];
        loop {
            let n = source(&mut scratch).map_err(|e| io_err(&image_path, e))?;
            if n == 0 {
                break;
            }
            file.write_all(&scratch[..n])
                .map_err(|e| io_err(&image_path, e))?;
        }
        file.sync_all().map_err(|e| io_err(&image_path, e))?;
        drop(file);

        self.mount()
    }

    fn backup(&mut self, sink: &mut RestoreSink<'_>) -> Result<(), PersistError> {
        self.require_mounted()?;
        let image_path = self.mount_point.join("partition.img");
        let mut file = File::open(&image_path).map_err(|e| io_err(&image_path, e))?;
        let mut scratch = [0u8; 4096];
        loop {
            let n = file.read(&mut scratch).map_err(|e| io_err(&image_path, e))?;
            if n == 0 {
                break;
            }
            sink(&scratch[..n]).map_err(|e| io_err(&image_path, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.bin");
        let payload = b"hello durable world";

        safe_write(&path, ".tmp", payload).unwrap();

        let mut buf = [0u8; 64];
        let n = load_file_into(&path, &mut buf).unwrap();
        assert_eq!(n, payload.len());
        assert_eq!(&buf[..n], payload);
    }

    #[test]
    fn safe_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/devices.bin");
        safe_write(&path, ".tmp", b"x").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn load_file_into_rejects_short_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.bin");
        safe_write(&path, ".tmp", b"0123456789").unwrap();

        let mut buf = [0u8; 4];
        let err = load_file_into(&path, &mut buf).unwrap_err();
        assert!(matches!(err, PersistError::BufferTooSmall { .. }));
    }

    #[test]
    fn load_file_into_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");
        let mut buf = [0u8; 8];
        assert!(load_file_into(&path, &mut buf).is_err());
    }

    #[test]
    fn mount_self_tests_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let mut part = FilePartition::new(dir.path().join("values"));
        part.mount().unwrap();
    }

    #[test]
    fn backup_restore_round_trips_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut part = FilePartition::new(dir.path().join("values"));
        part.mount().unwrap();

        let original = b"devices.bin contents go here".to_vec();
        safe_write(&part.path_for("devices.bin"), ".tmp", &original).unwrap();

        // Snapshot the partition image by concatenating every file in it —
        // a stand-in for what a real FAT driver would stream raw.
        let mut image = Vec::new();
        image.extend_from_slice(&original);
        let mut cursor = 0usize;
        part.restore(&mut |buf| {
            if cursor >= image.len() {
                return Ok(0);
            }
            let n = (buf.len()).min(image.len() - cursor);
            buf[..n].copy_from_slice(&image[cursor..cursor + n]);
            cursor += n;
            Ok(n)
        })
        .unwrap();

        let mut read_back = Vec::new();
        part.backup(&mut |chunk| {
            read_back.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        assert_eq!(read_back, original);
    }

    #[test]
    fn operations_before_mount_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut part = FilePartition::new(dir.path().join("values"));
        let err = part.backup(&mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, PersistError::NotMounted));
    }
}
