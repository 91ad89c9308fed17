// Async store pipeline: a buffer pool, sort workers, and a single write
// worker joined by bounded channels (spec.md §4.7/§5 — "parallel threads
// with explicit hand-off queues; no cooperative tasks"). The stage-then-
// flush-by-a-dedicated-thread shape is the same role parity-db's
// background log-flush thread plays relative to its `LogWriter` staging
// buffer.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::file_pool::FilePool;
use crate::run::Run;
use crate::sort_merge::{coalesce_equal, sort_in_memory};

struct SortJob {
	id: u64,
	buffer: Vec<Entry>,
	promise: Sender<Result<Run>>,
}

struct WriteJob {
	id: u64,
	sorted: Vec<Entry>,
	promise: Sender<Result<Run>>,
}

/// A pending run promise, ordered by the id it was scheduled under (spec.md
/// §4.8 `FutureFile`).
pub struct FutureFile {
	pub id: u64,
	receiver: Receiver<Result<Run>>,
}

impl FutureFile {
	/// Blocks until the write worker finishes (or fails) this job.
	pub fn wait(self) -> Result<Run> {
		self.receiver.recv().map_err(|_| Error::Internal("pipeline write worker dropped without a result".to_string()))?
	}
}

/// Reusable `Vec<Entry>` buffers so the ingest producer rarely allocates
/// (spec.md §4.7 "Buffer queue").
pub struct BufferPool {
	tx: Sender<Vec<Entry>>,
	rx: Receiver<Vec<Entry>>,
}

impl BufferPool {
	pub fn new(capacity: usize, buffer_len: usize) -> BufferPool {
		let (tx, rx) = bounded(capacity);
		for _ in 0..capacity {
			tx.send(Vec::with_capacity(buffer_len)).expect("pool channel has room for its own capacity");
		}
		BufferPool { tx, rx }
	}

	/// Blocks if every buffer is currently in flight (spec.md §5
	/// "producer blocks on the buffer pool when all buffers are in flight").
	pub fn acquire(&self) -> Vec<Entry> {
		self.rx.recv().expect("buffer pool sender outlives the pool")
	}

	pub fn release(&self, mut buffer: Vec<Entry>) {
		buffer.clear();
		let _ = self.tx.send(buffer);
	}
}

/// Buffer pool + sort queue + write queue + `K` sort workers + 1 write
/// worker (spec.md §4.7). Each sort/write job is independent; the
/// partition enforces id ordering separately (§4.8).
pub struct Pipeline {
	sort_tx: Option<Sender<SortJob>>,
	write_tx: Option<Sender<WriteJob>>,
	sort_handles: Vec<JoinHandle<()>>,
	write_handle: Option<JoinHandle<()>>,
	first_error: Arc<Mutex<Option<Error>>>,
	pub buffers: Arc<BufferPool>,
}

impl Pipeline {
	/// Launches `sort_workers` sort threads and one write thread against
	/// `dir` (spec.md §4.10 step 2: `K = max(1, hw_concurrency -
	/// worker_threads)`).
	pub fn launch(pool: Arc<FilePool>, dir: PathBuf, sort_workers: usize, granularity: usize, buffer_capacity: usize, buffer_len: usize) -> Pipeline {
		let sort_workers = sort_workers.max(1);
		log::info!(target: "posdb", "launching pipeline: {} sort workers, {} buffers of {} entries", sort_workers, buffer_capacity, buffer_len);
		let (sort_tx, sort_rx) = bounded::<SortJob>(sort_workers * 2);
		let (write_tx, write_rx) = bounded::<WriteJob>(sort_workers * 2);
		let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
		let buffers = Arc::new(BufferPool::new(buffer_capacity, buffer_len));

		let mut sort_handles = Vec::with_capacity(sort_workers);
		for _ in 0..sort_workers {
			let sort_rx = sort_rx.clone();
			let write_tx = write_tx.clone();
			let buffers = buffers.clone();
			let first_error = first_error.clone();
			sort_handles.push(std::thread::spawn(move || {
				while let Ok(job) = sort_rx.recv() {
					let mut buffer = job.buffer;
					sort_in_memory(&mut buffer, true);
					let sorted = coalesce_equal(&buffer);
					buffers.release(buffer);
					let write_job = WriteJob { id: job.id, sorted, promise: job.promise };
					if let Err(send_err) = write_tx.send(write_job) {
						// Write queue gone (shutdown mid-flight): the job we
						// failed to hand off still owns the promise, so
						// fulfil it with the shutdown error ourselves.
						let err = Error::Internal("write queue closed while a sort job was in flight".to_string());
						let mut guard = first_error.lock();
						if guard.is_none() {
							*guard = Some(Error::Internal(err.to_string()));
						}
						let _ = send_err.into_inner().promise.send(Err(err));
					}
				}
			}));
		}
		drop(sort_rx);

		let write_handle = {
			let first_error = first_error.clone();
			std::thread::spawn(move || {
				while let Ok(job) = write_rx.recv() {
					let result = Run::write_sorted(&pool, &dir, job.id, &job.sorted, granularity);
					if let Err(e) = &result {
						let mut guard = first_error.lock();
						if guard.is_none() {
							*guard = Some(clone_error(e));
						}
					}
					let _ = job.promise.send(result);
				}
			})
		};

		Pipeline {
			sort_tx: Some(sort_tx),
			write_tx: Some(write_tx),
			sort_handles,
			write_handle: Some(write_handle),
			first_error,
			buffers,
		}
	}

	/// Schedules `buffer` (tagged `id`) into the pipeline, returning a
	/// promise for the finished run (spec.md §4.8 `store_unordered`).
	pub fn submit(&self, id: u64, buffer: Vec<Entry>) -> FutureFile {
		let (promise_tx, promise_rx) = bounded(1);
		let sort_tx = self.sort_tx.as_ref().expect("submit called after wait_for_completion");
		let job = SortJob { id, buffer, promise: promise_tx.clone() };
		if let Err(send_err) = sort_tx.send(job) {
			let _ = send_err.into_inner().promise.send(Err(Error::Internal("sort queue is closed".to_string())));
		}
		FutureFile { id, receiver: promise_rx }
	}

	/// Closes both queues in turn and joins every worker (spec.md §4.7
	/// "Shutdown"). Returns the first error any worker recorded, if any.
	pub fn wait_for_completion(mut self) -> Result<()> {
		log::debug!(target: "posdb", "pipeline shutdown: closing sort queue");
		self.sort_tx.take();
		for handle in self.sort_handles.drain(..) {
			let _ = handle.join();
		}
		self.write_tx.take();
		if let Some(handle) = self.write_handle.take() {
			let _ = handle.join();
		}
		let mut guard = self.first_error.lock();
		match guard.take() {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}
}

fn clone_error(e: &Error) -> Error {
	Error::Internal(e.to_string())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::chess::ReverseMove;
	use crate::entry::PackedCountAndGameOffset;
	use crate::key::{GameResult, Key, Level};
	use tempfile::tempdir;

	fn entry_for(hash: u128, offset: u64) -> Entry {
		let key = Key::with_metadata(hash, &ReverseMove::null(), Level::Human, GameResult::WhiteWin);
		Entry::new(key, PackedCountAndGameOffset::pack_single(offset))
	}

	#[test]
	fn submitted_jobs_are_sorted_and_deduplicated_by_the_write_worker() {
		let dir = tempdir().unwrap();
		let pool = Arc::new(FilePool::new(8));
		let pipeline = Pipeline::launch(pool, dir.path().to_path_buf(), 2, 4, 4, 16);

		let buffer = vec![entry_for(3, 1), entry_for(1, 2), entry_for(3, 9), entry_for(2, 5)];
		let future = pipeline.submit(0, buffer);
		let run = future.wait().unwrap();
		// Two distinct keys (1 and 2) survive as-is; the two entries for key
		// 3 combine into one via the sort worker's coalesce pass.
		assert_eq!(run.len(), 3);

		pipeline.wait_for_completion().unwrap();
	}

	#[test]
	fn buffer_pool_recycles_released_buffers() {
		let pool = BufferPool::new(2, 8);
		let a = pool.acquire();
		let b = pool.acquire();
		pool.release(a);
		pool.release(b);
		let _ = pool.acquire();
		let _ = pool.acquire();
	}
}
