// Sequential/random-access binary file wrappers over a pooled file handle.
// Buffered-append-then-flush shape follows parity-db's staged-write split
// (stage into an in-memory writer, then persist in one `write_at` per
// batch) visible in `column.rs`'s log/enact split.

use std::marker::PhantomData;
use std::path::Path;

use crate::error::{Error, Result};
use crate::file_pool::{FilePool, PooledFile};

/// A fixed-size, `Copy` record that can be laid out as raw bytes on disk.
/// Every on-disk array in this crate (entries, sparse-index samples, packed
/// game headers) implements this rather than going through `serde`, since
/// layouts here are fixed-width and endianness-sensitive (spec.md §4.4/§7).
pub trait FixedRecord: Copy {
	const SIZE: usize;
	fn to_bytes(&self) -> Vec<u8>;
	fn from_bytes(bytes: &[u8]) -> Self;
}

/// A file of `T` records, opened read-only, whose length is known and fixed
/// for the file's lifetime (spec.md §4.4). Backs run entry/index files and
/// header stores once sealed.
pub struct ImmutableBinaryFile<T: FixedRecord> {
	file: PooledFile,
	len: usize,
	_marker: PhantomData<T>,
}

impl<T: FixedRecord> ImmutableBinaryFile<T> {
	pub fn open(pool: &FilePool, path: &Path) -> Result<ImmutableBinaryFile<T>> {
		let file = pool.open(path)?;
		let byte_len = file.len()? as usize;
		if byte_len % T::SIZE != 0 {
			return Err(Error::ShortRead { expected: T::SIZE, got: byte_len % T::SIZE });
		}
		Ok(ImmutableBinaryFile { file, len: byte_len / T::SIZE, _marker: PhantomData })
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn read(&self, index: usize) -> Result<T> {
		assert!(index < self.len);
		let mut buf = vec![0u8; T::SIZE];
		self.file.read_at(&mut buf, (index * T::SIZE) as u64)?;
		Ok(T::from_bytes(&buf))
	}

	/// Reads `[start, end)` as a single contiguous buffer, one syscall.
	pub fn read_range(&self, start: usize, end: usize) -> Result<Vec<T>> {
		assert!(start <= end && end <= self.len);
		let mut buf = vec![0u8; (end - start) * T::SIZE];
		if !buf.is_empty() {
			self.file.read_at(&mut buf, (start * T::SIZE) as u64)?;
		}
		Ok(buf.chunks_exact(T::SIZE).map(T::from_bytes).collect())
	}

	pub fn iter(&self) -> ImmutableSpanIter<'_, T> {
		ImmutableSpanIter { file: self, next: 0 }
	}
}

pub struct ImmutableSpanIter<'a, T: FixedRecord> {
	file: &'a ImmutableBinaryFile<T>,
	next: usize,
}

impl<'a, T: FixedRecord> Iterator for ImmutableSpanIter<'a, T> {
	type Item = Result<T>;

	fn next(&mut self) -> Option<Result<T>> {
		if self.next >= self.file.len {
			return None;
		}
		let item = self.file.read(self.next);
		self.next += 1;
		Some(item)
	}
}

/// An in-memory staging buffer that accumulates records and flushes them to
/// a file in append order (spec.md §4.4). Used by sort-merge run writers
/// and header stores; never random-access.
pub struct BackInserter<T: FixedRecord> {
	buffer: Vec<u8>,
	flushed_records: usize,
	_marker: PhantomData<T>,
}

impl<T: FixedRecord> BackInserter<T> {
	pub fn new() -> BackInserter<T> {
		BackInserter { buffer: Vec::new(), flushed_records: 0, _marker: PhantomData }
	}

	pub fn with_capacity(records: usize) -> BackInserter<T> {
		BackInserter { buffer: Vec::with_capacity(records * T::SIZE), flushed_records: 0, _marker: PhantomData }
	}

	pub fn push(&mut self, record: &T) {
		self.buffer.extend_from_slice(&record.to_bytes());
	}

	pub fn buffered_records(&self) -> usize {
		self.buffer.len() / T::SIZE
	}

	/// Appends the staged buffer to `file` at `flushed_records * T::SIZE`
	/// and clears the stage. Returns the number of records just flushed.
	pub fn flush(&mut self, file: &PooledFile) -> Result<usize> {
		if self.buffer.is_empty() {
			return Ok(0);
		}
		let offset = (self.flushed_records * T::SIZE) as u64;
		file.write_at(&self.buffer, offset)?;
		let flushed = self.buffer.len() / T::SIZE;
		self.flushed_records += flushed;
		self.buffer.clear();
		Ok(flushed)
	}
}

impl<T: FixedRecord> Default for BackInserter<T> {
	fn default() -> BackInserter<T> {
		BackInserter::new()
	}
}

/// A file opened for both sequential append (`BackInserter::flush`) and
/// random-access read, used while a run is still being written (spec.md
/// §4.7) before it's sealed into an `ImmutableBinaryFile`.
pub struct BinaryOutputFile<T: FixedRecord> {
	file: PooledFile,
	records: usize,
	_marker: PhantomData<T>,
}

impl<T: FixedRecord> BinaryOutputFile<T> {
	pub fn create(pool: &FilePool, path: &Path) -> Result<BinaryOutputFile<T>> {
		let file = pool.open(path)?;
		file.set_len(0)?;
		Ok(BinaryOutputFile { file, records: 0, _marker: PhantomData })
	}

	pub fn append(&mut self, inserter: &mut BackInserter<T>) -> Result<()> {
		self.records += inserter.flush(&self.file)?;
		Ok(())
	}

	pub fn len(&self) -> usize {
		self.records
	}

	pub fn sync(&self) -> Result<()> {
		self.file.sync_all()
	}

	pub fn into_pooled_file(self) -> PooledFile {
		self.file
	}
}

pub type BinaryInputOutputFile<T> = BinaryOutputFile<T>;

#[cfg(test)]
mod test {
	use super::*;
	use crate::file_pool::FilePool;
	use tempfile::tempdir;

	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	struct U64Record(u64);

	impl FixedRecord for U64Record {
		const SIZE: usize = 8;
		fn to_bytes(&self) -> Vec<u8> {
			self.0.to_le_bytes().to_vec()
		}
		fn from_bytes(bytes: &[u8]) -> U64Record {
			U64Record(u64::from_le_bytes(bytes.try_into().unwrap()))
		}
	}

	#[test]
	fn write_then_read_back_as_immutable_file() {
		let dir = tempdir().unwrap();
		let pool = FilePool::new(4);
		let path = dir.path().join("run.bin");

		let mut out = BinaryOutputFile::<U64Record>::create(&pool, &path).unwrap();
		let mut stage = BackInserter::<U64Record>::new();
		for v in 0..10u64 {
			stage.push(&U64Record(v));
		}
		out.append(&mut stage).unwrap();
		assert_eq!(out.len(), 10);
		out.sync().unwrap();
		drop(out);

		let immutable = ImmutableBinaryFile::<U64Record>::open(&pool, &path).unwrap();
		assert_eq!(immutable.len(), 10);
		for v in 0..10u64 {
			assert_eq!(immutable.read(v as usize).unwrap(), U64Record(v));
		}
		let range = immutable.read_range(2, 5).unwrap();
		assert_eq!(range, vec![U64Record(2), U64Record(3), U64Record(4)]);
		let all: Vec<U64Record> = immutable.iter().collect::<Result<_>>().unwrap();
		assert_eq!(all.len(), 10);
	}

	#[test]
	fn back_inserter_supports_incremental_flush() {
		let dir = tempdir().unwrap();
		let pool = FilePool::new(4);
		let path = dir.path().join("incremental.bin");
		let mut out = BinaryOutputFile::<U64Record>::create(&pool, &path).unwrap();

		let mut stage = BackInserter::<U64Record>::new();
		stage.push(&U64Record(1));
		stage.push(&U64Record(2));
		out.append(&mut stage).unwrap();

		stage.push(&U64Record(3));
		out.append(&mut stage).unwrap();

		assert_eq!(out.len(), 3);
		drop(out);

		let immutable = ImmutableBinaryFile::<U64Record>::open(&pool, &path).unwrap();
		assert_eq!(immutable.read(2).unwrap(), U64Record(3));
	}
}
