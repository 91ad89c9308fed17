// Global bounded pool of OS file handles. Per-file `read_at`/`write_at` are
// copied from parity-db's `table.rs::ValueTable` (`disable_read_ahead`,
// `read_exact_at`/`write_all_at`), generalized from "one handle per table"
// to "one handle per path, shared from a capped pool" (spec.md §4.4/§9).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

#[cfg(target_os = "macos")]
fn disable_read_ahead(file: &File) -> Result<()> {
	use std::os::unix::io::AsRawFd;
	if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_RDAHEAD, 0) } != 0 {
		Err(Error::Io(io::Error::last_os_error()))
	} else {
		Ok(())
	}
}

#[cfg(not(target_os = "macos"))]
fn disable_read_ahead(_file: &File) -> Result<()> {
	Ok(())
}

struct Slot {
	file: Arc<File>,
	last_used: u64,
}

struct PoolState {
	slots: HashMap<PathBuf, Slot>,
	clock: u64,
}

/// Bounded LRU pool of open `std::fs::File` handles, shared across every
/// run/header store in a partition (spec.md §4.4). Enforces "one physical
/// file, one wrapper": a path is opened at most once concurrently; callers
/// receive clones of the same `Arc<File>`.
pub struct FilePool {
	state: Mutex<PoolState>,
	capacity: usize,
}

impl FilePool {
	pub fn new(capacity: usize) -> FilePool {
		FilePool { state: Mutex::new(PoolState { slots: HashMap::new(), clock: 0 }), capacity: capacity.max(1) }
	}

	/// Returns a handle to the file at `path`, opening (creating if
	/// necessary) and read-ahead-disabling it if not already resident.
	pub fn open(&self, path: &Path) -> Result<PooledFile> {
		let mut state = self.state.lock();
		state.clock += 1;
		let now = state.clock;
		if let Some(slot) = state.slots.get_mut(path) {
			slot.last_used = now;
			return Ok(PooledFile { file: slot.file.clone() });
		}

		if state.slots.len() >= self.capacity {
			evict_one(&mut state);
		}

		let file = OpenOptions::new().create(true).read(true).write(true).open(path).map_err(Error::Io)?;
		disable_read_ahead(&file)?;
		let file = Arc::new(file);
		state.slots.insert(path.to_path_buf(), Slot { file: file.clone(), last_used: now });
		log::trace!(target: "posdb", "file pool: opened {} ({}/{})", path.display(), state.slots.len(), self.capacity);
		Ok(PooledFile { file })
	}

	pub fn len(&self) -> usize {
		self.state.lock().slots.len()
	}
}

/// Evicts the least-recently-used slot not currently borrowed elsewhere
/// (`Arc::strong_count` above 1 means a `PooledFile` still holds it). If
/// every slot is pinned, the pool is left over capacity rather than
/// breaking a live borrower.
fn evict_one(state: &mut PoolState) {
	let victim = state
		.slots
		.iter()
		.filter(|(_, slot)| Arc::strong_count(&slot.file) == 1)
		.min_by_key(|(_, slot)| slot.last_used)
		.map(|(path, _)| path.clone());
	if let Some(path) = victim {
		log::debug!(target: "posdb", "file pool: evicting {}", path.display());
		state.slots.remove(&path);
	}
}

/// A shared handle to one OS file, borrowed from a `FilePool`.
#[derive(Clone)]
pub struct PooledFile {
	file: Arc<File>,
}

impl PooledFile {
	pub fn len(&self) -> Result<u64> {
		Ok(self.file.metadata().map_err(Error::Io)?.len())
	}

	pub fn set_len(&self, len: u64) -> Result<()> {
		self.file.set_len(len).map_err(Error::Io)
	}

	pub fn sync_all(&self) -> Result<()> {
		self.file.sync_all().map_err(Error::Io)
	}

	#[cfg(unix)]
	pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
		use std::os::unix::fs::FileExt;
		self.file
			.read_exact_at(buf, offset)
			.map_err(|e| if e.kind() == io::ErrorKind::UnexpectedEof { Error::ShortRead { expected: buf.len(), got: 0 } } else { Error::Io(e) })
	}

	#[cfg(unix)]
	pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
		use std::os::unix::fs::FileExt;
		self.file.write_all_at(buf, offset).map_err(Error::Io)
	}

	#[cfg(windows)]
	pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
		use std::os::windows::fs::FileExt;
		let mut read = 0;
		while read < buf.len() {
			let n = self.file.seek_read(&mut buf[read..], offset + read as u64).map_err(Error::Io)?;
			if n == 0 {
				return Err(Error::ShortRead { expected: buf.len(), got: read });
			}
			read += n;
		}
		Ok(())
	}

	#[cfg(windows)]
	pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
		use std::os::windows::fs::FileExt;
		let mut written = 0;
		while written < buf.len() {
			let n = self.file.seek_write(&buf[written..], offset + written as u64).map_err(Error::Io)?;
			written += n;
		}
		Ok(())
	}
}

/// Advisory-locks `dir` for the lifetime of the returned guard, preventing
/// two processes from opening the same partition directory concurrently
/// (spec.md §5).
pub struct DirectoryLock {
	_file: File,
}

impl DirectoryLock {
	pub fn acquire(dir: &Path) -> Result<DirectoryLock> {
		use fs2::FileExt;
		let lock_path = dir.join(".lock");
		let file = OpenOptions::new().create(true).write(true).open(&lock_path).map_err(Error::Io)?;
		file.try_lock_exclusive().map_err(|_| Error::Internal(format!("partition directory {} is already locked by another process", dir.display())))?;
		log::info!(target: "posdb", "locked partition directory {}", dir.display());
		Ok(DirectoryLock { _file: file })
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn reopening_same_path_returns_shared_handle() {
		let dir = tempdir().unwrap();
		let pool = FilePool::new(4);
		let path = dir.path().join("a.bin");
		let a = pool.open(&path).unwrap();
		let b = pool.open(&path).unwrap();
		a.write_at(b"hello", 0).unwrap();
		let mut buf = [0u8; 5];
		b.read_at(&mut buf, 0).unwrap();
		assert_eq!(&buf, b"hello");
	}

	#[test]
	fn capacity_evicts_unpinned_entries() {
		let dir = tempdir().unwrap();
		let pool = FilePool::new(2);
		let p1 = dir.path().join("1.bin");
		let p2 = dir.path().join("2.bin");
		let p3 = dir.path().join("3.bin");
		drop(pool.open(&p1).unwrap());
		drop(pool.open(&p2).unwrap());
		assert_eq!(pool.len(), 2);
		drop(pool.open(&p3).unwrap());
		assert_eq!(pool.len(), 2);
	}

	#[test]
	fn directory_lock_rejects_second_holder() {
		let dir = tempdir().unwrap();
		let _lock = DirectoryLock::acquire(dir.path()).unwrap();
		assert!(DirectoryLock::acquire(dir.path()).is_err());
	}
}
