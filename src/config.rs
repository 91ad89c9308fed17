// Runtime configuration knobs. Grounded on parity-db's `options::ColumnOptions`:
// a plain, `Default`-able struct passed by reference into constructors.

use std::path::PathBuf;

/// Default number of entries between sparse-index samples (spec.md §4.5/§9).
pub const DEFAULT_INDEX_GRANULARITY: usize = 1024;

/// Default cap on concurrently open pooled file handles (spec.md §4.4).
pub const DEFAULT_FILE_POOL_CAPACITY: usize = 256;

/// Bounded fan-in for a single external-merge pass (spec.md §4.4).
pub const MAX_FANIN: usize = 16;

/// `OUTPUT_BUFFER_MULTIPLIER` from spec.md §4.4's per-buffer sizing formula.
pub const OUTPUT_BUFFER_MULTIPLIER: usize = 2;

#[derive(Clone, Debug)]
pub struct Options {
	/// Root directory holding the partition and header stores.
	pub path: PathBuf,
	/// Entries between sparse-index samples.
	pub index_granularity: usize,
	/// Soft RAM budget, in bytes, for a single import or merge pass.
	pub memory_budget: usize,
	/// Number of sort workers in the async store pipeline. `None` means
	/// derive from `hw_concurrency - 1` (one thread reserved for the
	/// write worker), per spec.md §4.10.
	pub sort_workers: Option<usize>,
	/// Cap on concurrently open OS file handles in the global file pool.
	pub file_pool_capacity: usize,
}

impl Default for Options {
	fn default() -> Options {
		Options {
			path: PathBuf::from("."),
			index_granularity: DEFAULT_INDEX_GRANULARITY,
			memory_budget: 256 * 1024 * 1024,
			sort_workers: None,
			file_pool_capacity: DEFAULT_FILE_POOL_CAPACITY,
		}
	}
}

impl Options {
	pub fn with_path(path: impl Into<PathBuf>) -> Options {
		Options { path: path.into(), ..Options::default() }
	}

	pub fn resolved_sort_workers(&self) -> usize {
		self.sort_workers.unwrap_or_else(|| {
			let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
			// one thread reserved for the write worker, one for the producer.
			cores.saturating_sub(2).max(1)
		})
	}
}
