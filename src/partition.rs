// Sorted run list + pending write promises (spec.md §4.8). Shape follows
// parity-db's `Column` holding a stable `index` table plus a
// `rebalancing: VecDeque<IndexTable>` of in-flight tables — here a stable
// run list plus a set of pending `FutureFile`s fills the same role.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::Entry;
use crate::error::Result;
use crate::file_io::{BackInserter, BinaryOutputFile};
use crate::file_pool::FilePool;
use crate::key::{GameResult, Key, Level};
use crate::pipeline::{FutureFile, Pipeline};
use crate::query::{PositionStats, Select};
use crate::run::{self, Run};
use crate::sort_merge::{self, coalesce_equal, NoProgress, ProgressSink};
use crate::sparse_index::{Sample, SparseIndex};

/// A sorted list of completed runs plus the promises for runs still being
/// written (spec.md §4.8).
pub struct Partition {
	dir: PathBuf,
	pool: Arc<FilePool>,
	granularity: usize,
	runs: Mutex<Vec<Run>>,
	pending: Mutex<Vec<FutureFile>>,
}

impl Partition {
	/// Opens every run already present under `dir`, skipping partial
	/// writes left by a killed import (spec.md §5 "Cancellation &
	/// timeouts"): any entry without a sidecar index, and any zero-size
	/// file.
	pub fn open(pool: Arc<FilePool>, dir: &Path, granularity: usize) -> Result<Partition> {
		std::fs::create_dir_all(dir)?;
		let ids = run::discover_ids(dir)?;
		let mut runs = Vec::with_capacity(ids.len());
		for id in ids {
			runs.push(Run::open(&pool, dir, id)?);
		}
		Ok(Partition { dir: dir.to_path_buf(), pool, granularity, runs: Mutex::new(runs), pending: Mutex::new(Vec::new()) })
	}

	/// Maximum present id + 1, across both completed runs and pending
	/// promises (spec.md §4.8 `next_id`).
	pub fn next_id(&self) -> u64 {
		let runs = self.runs.lock();
		let pending = self.pending.lock();
		let max_run = runs.iter().map(Run::id).max();
		let max_pending = pending.iter().map(|f| f.id).max();
		match max_run.into_iter().chain(max_pending).max() {
			Some(max) => max + 1,
			None => 0,
		}
	}

	/// Writes `buffer` directly as a new run, no pipeline involved — the
	/// caller guarantees it is already `CompareLessFull`-sorted and
	/// deduplicated (spec.md §4.8 `store_ordered`).
	pub fn store_ordered(&self, buffer: &[Entry]) -> Result<u64> {
		let id = self.next_id();
		if let Some(first) = buffer.first() {
			log::trace!(target: "posdb", "store_ordered {}: first key {}", id, hex::encode(first.key.to_bytes()));
		}
		let run = Run::write_sorted(&self.pool, &self.dir, id, buffer, self.granularity)?;
		self.runs.lock().push(run);
		Ok(id)
	}

	/// Schedules `buffer` into `pipeline` under `id` (or `next_id()` if
	/// omitted), keeping the resulting promise pending until
	/// `collect_future_files` (spec.md §4.8 `store_unordered`).
	pub fn store_unordered(&self, pipeline: &Pipeline, buffer: Vec<Entry>, id: Option<u64>) -> u64 {
		let id = id.unwrap_or_else(|| self.next_id());
		let future = pipeline.submit(id, buffer);
		self.pending.lock().push(future);
		id
	}

	/// Waits on every pending promise and moves the finished runs into the
	/// run list, keeping it sorted by id (spec.md §4.8
	/// `collect_future_files`). Called after `Pipeline::wait_for_completion`,
	/// by which point every promise is already fulfilled.
	pub fn collect_future_files(&self) -> Result<()> {
		let pending: Vec<FutureFile> = std::mem::take(&mut *self.pending.lock());
		log::debug!(target: "posdb", "collecting {} pending runs", pending.len());
		let mut first_error = None;
		let mut runs = self.runs.lock();
		for future in pending {
			match future.wait() {
				Ok(run) => runs.push(run),
				Err(e) if first_error.is_none() => first_error = Some(e),
				Err(_) => {}
			}
		}
		runs.sort_by_key(Run::id);
		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	/// Dispatches `keys` to every run, in id order, accumulating into
	/// `stats` (spec.md §4.8 `execute_query`). Run order doesn't affect the
	/// result — every run is independently scanned and monoid-combined —
	/// but id order keeps behavior deterministic across calls.
	pub fn execute_query(&self, keys: &[Key], level: Level, result: GameResult, selects: &[Select], stats: &mut [PositionStats]) -> Result<()> {
		let runs = self.runs.lock();
		for run in runs.iter() {
			run.execute_query(keys, level, result, selects, stats)?;
		}
		Ok(())
	}

	/// Merges every run into one "merge_tmp" file plus its index, then
	/// renames both atomically to the old lowest id (spec.md §4.8
	/// `merge_all`). No-op if at most one run is present.
	pub fn merge_all(&self, progress: &mut dyn ProgressSink) -> Result<()> {
		let mut runs = self.runs.lock();
		if runs.len() <= 1 {
			return Ok(());
		}
		log::info!(target: "posdb", "merging {} runs in {}", runs.len(), self.dir.display());
		let lowest_id = runs.iter().map(Run::id).min().unwrap();
		let merged = merge_runs(&runs, progress)?;
		write_merge_tmp(&self.pool, &self.dir, &merged, self.granularity)?;
		rename_merge_tmp(&self.dir, lowest_id)?;

		for id in runs.iter().map(Run::id).collect::<Vec<_>>() {
			if id != lowest_id {
				Run::delete_files(&self.dir, id)?;
			}
		}
		*runs = vec![Run::open(&self.pool, &self.dir, lowest_id)?];
		Ok(())
	}

	/// Merges every run into `dest/0` without touching this partition's own
	/// files (spec.md §4.8 `replicate_merge_all`, used for consistent-backup
	/// export).
	pub fn replicate_merge_all(&self, dest: &Path, progress: &mut dyn ProgressSink) -> Result<()> {
		std::fs::create_dir_all(dest)?;
		let runs = self.runs.lock();
		let merged = if runs.len() <= 1 {
			match runs.first() {
				Some(run) => run.read_all()?,
				None => Vec::new(),
			}
		} else {
			merge_runs(&runs, progress)?
		};
		Run::write_sorted(&self.pool, dest, 0, &merged, self.granularity)?;
		Ok(())
	}

	pub fn run_count(&self) -> usize {
		self.runs.lock().len()
	}

	/// Deletes every run's backing files and empties the run list (spec.md
	/// §4.10 `Database::clear`). Assumes no pipeline jobs are in flight.
	pub fn clear(&self) -> Result<()> {
		let mut runs = self.runs.lock();
		for id in runs.iter().map(Run::id).collect::<Vec<_>>() {
			Run::delete_files(&self.dir, id)?;
		}
		runs.clear();
		self.pending.lock().clear();
		Ok(())
	}
}

fn merge_runs(runs: &[Run], progress: &mut dyn ProgressSink) -> Result<Vec<Entry>> {
	let mut per_run = Vec::with_capacity(runs.len());
	for run in runs {
		per_run.push(run.read_all()?);
	}
	let slices: Vec<&[Entry]> = per_run.iter().map(|v| v.as_slice()).collect();
	let merged = sort_merge::merge(&slices, progress);
	Ok(coalesce_equal(&merged))
}

fn merge_tmp_entries_path(dir: &Path) -> PathBuf {
	dir.join("merge_tmp")
}

fn merge_tmp_index_path(dir: &Path) -> PathBuf {
	dir.join("merge_tmp_index")
}

/// Writes `merged` to the fixed `merge_tmp`/`merge_tmp_index` pair so a
/// crash mid-merge leaves no run claiming a real id in an inconsistent
/// state (spec.md §4.8).
fn write_merge_tmp(pool: &FilePool, dir: &Path, merged: &[Entry], granularity: usize) -> Result<()> {
	let mut entries_out = BinaryOutputFile::<Entry>::create(pool, &merge_tmp_entries_path(dir))?;
	let mut stage = BackInserter::<Entry>::with_capacity(merged.len());
	for e in merged {
		stage.push(e);
	}
	entries_out.append(&mut stage)?;
	entries_out.sync()?;

	let index = SparseIndex::build(merged.iter(), granularity);
	let mut index_out = BinaryOutputFile::<Sample>::create(pool, &merge_tmp_index_path(dir))?;
	let mut index_stage = BackInserter::<Sample>::with_capacity(index.samples().len());
	for sample in index.samples() {
		index_stage.push(sample);
	}
	index_out.append(&mut index_stage)?;
	index_out.sync()?;
	Ok(())
}

fn rename_merge_tmp(dir: &Path, to_id: u64) -> Result<()> {
	std::fs::rename(merge_tmp_entries_path(dir), run::entries_path(dir, to_id))?;
	std::fs::rename(merge_tmp_index_path(dir), run::index_path(dir, to_id))?;
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::chess::ReverseMove;
	use crate::entry::PackedCountAndGameOffset;
	use tempfile::tempdir;

	fn entry_for(hash: u128, offset: u64) -> Entry {
		let key = Key::with_metadata(hash, &ReverseMove::null(), Level::Human, GameResult::WhiteWin);
		Entry::new(key, PackedCountAndGameOffset::pack_single(offset))
	}

	#[test]
	fn store_ordered_assigns_increasing_ids() {
		let dir = tempdir().unwrap();
		let pool = Arc::new(FilePool::new(8));
		let partition = Partition::open(pool, dir.path(), 4).unwrap();

		let first = partition.store_ordered(&[entry_for(1, 0)]).unwrap();
		let second = partition.store_ordered(&[entry_for(2, 0)]).unwrap();
		assert_eq!(first, 0);
		assert_eq!(second, 1);
		assert_eq!(partition.run_count(), 2);
	}

	#[test]
	fn merge_all_combines_duplicate_keys_across_runs() {
		let dir = tempdir().unwrap();
		let pool = Arc::new(FilePool::new(8));
		let partition = Partition::open(pool, dir.path(), 4).unwrap();

		partition.store_ordered(&[entry_for(5, 1), entry_for(6, 1)]).unwrap();
		partition.store_ordered(&[entry_for(5, 2)]).unwrap();
		assert_eq!(partition.run_count(), 2);

		partition.merge_all(&mut NoProgress).unwrap();
		assert_eq!(partition.run_count(), 1);

		let query_key = Key::with_metadata(5, &ReverseMove::null(), Level::Human, GameResult::WhiteWin);
		let mut stats = vec![PositionStats::default()];
		partition.execute_query(&[query_key], Level::Human, GameResult::WhiteWin, &[Select::All], &mut stats).unwrap();
		let bucket = stats[0].buckets.get(&(Select::All, Level::Human, GameResult::WhiteWin)).unwrap();
		assert_eq!(bucket.count, 2);
		assert_eq!(bucket.first_game_offset, Some(1));
	}

	#[test]
	fn merge_all_is_a_no_op_with_one_run() {
		let dir = tempdir().unwrap();
		let pool = Arc::new(FilePool::new(8));
		let partition = Partition::open(pool, dir.path(), 4).unwrap();
		partition.store_ordered(&[entry_for(1, 0)]).unwrap();
		partition.merge_all(&mut NoProgress).unwrap();
		assert_eq!(partition.run_count(), 1);
	}

	#[test]
	fn open_skips_zero_size_and_sidecar_less_entries() {
		let dir = tempdir().unwrap();
		let pool = Arc::new(FilePool::new(8));
		std::fs::write(dir.path().join("7"), []).unwrap();
		std::fs::write(dir.path().join("9"), [0u8; 24]).unwrap();
		let partition = Partition::open(pool, dir.path(), 4).unwrap();
		assert_eq!(partition.run_count(), 0);
	}
}
