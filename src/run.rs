// One immutable sorted run: an entries file plus its sparse index sidecar,
// identified by an ascending integer id (spec.md §4.6). Id-named immutable
// file pairing follows parity-db's `TableId`-named `ValueTable` plus its
// paired index table.

use std::path::Path;

use crate::entry::Entry;
use crate::error::Result;
use crate::file_io::{BackInserter, BinaryOutputFile, ImmutableBinaryFile};
use crate::file_pool::FilePool;
use crate::key::{GameResult, Key, Level};
use crate::query::{PositionStats, Select};
use crate::sparse_index::{Sample, SparseIndex};

pub(crate) fn entries_path(dir: &Path, id: u64) -> std::path::PathBuf {
	dir.join(id.to_string())
}

pub(crate) fn index_path(dir: &Path, id: u64) -> std::path::PathBuf {
	dir.join(format!("{id}_index"))
}

/// Lists the run ids present in `dir` by directory entry name, skipping
/// anything that isn't a bare integer (manifest, stats, `_index` sidecars,
/// lock files) or that lacks a valid sidecar/has zero size (spec.md §5
/// "Cancellation & timeouts" — a killed import may leave one such entry).
pub(crate) fn discover_ids(dir: &Path) -> std::io::Result<Vec<u64>> {
	let mut ids = Vec::new();
	for entry in std::fs::read_dir(dir)? {
		let entry = entry?;
		let name = entry.file_name();
		let name = match name.to_str() {
			Some(n) => n,
			None => continue,
		};
		let id: u64 = match name.parse() {
			Ok(id) => id,
			Err(_) => continue,
		};
		let entries_meta = match std::fs::metadata(entries_path(dir, id)) {
			Ok(m) => m,
			Err(_) => continue,
		};
		if entries_meta.len() == 0 {
			continue;
		}
		if std::fs::metadata(index_path(dir, id)).is_err() {
			continue;
		}
		ids.push(id);
	}
	ids.sort_unstable();
	Ok(ids)
}

/// An immutable sorted run (spec.md §4.6): a contiguous `Entry` array in
/// `cmp_full` order, at most one entry per `(key-without-rmove, rmove,
/// level, result)` tuple, plus its sparse index.
pub struct Run {
	id: u64,
	entries: ImmutableBinaryFile<Entry>,
	index: SparseIndex,
}

impl Run {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn len(&self) -> u64 {
		self.entries.len() as u64
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Opens an already-written run by id: a directory entry named `id`
	/// plus its `{id}_index` sidecar (spec.md §4.6 construction mode (b)).
	pub fn open(pool: &FilePool, dir: &Path, id: u64) -> Result<Run> {
		let entries = ImmutableBinaryFile::<Entry>::open(pool, &entries_path(dir, id))?;
		let index_file = ImmutableBinaryFile::<Sample>::open(pool, &index_path(dir, id))?;
		let samples = index_file.read_range(0, index_file.len())?;
		let granularity = infer_granularity(&samples, entries.len() as u64);
		let index = SparseIndex::from_samples(samples, granularity, entries.len() as u64);
		log::debug!(target: "posdb", "opened run {} with {} entries", id, entries.len());
		Ok(Run { id, entries, index })
	}

	/// Writes a new run directly from an already-sorted-and-deduplicated
	/// buffer (spec.md §4.6 construction mode (a)): `store_ordered`'s
	/// underlying primitive, also used by the pipeline's write worker.
	pub fn write_sorted(pool: &FilePool, dir: &Path, id: u64, sorted_entries: &[Entry], granularity: usize) -> Result<Run> {
		let mut entries_out = BinaryOutputFile::<Entry>::create(pool, &entries_path(dir, id))?;
		let mut stage = BackInserter::<Entry>::with_capacity(sorted_entries.len());
		for e in sorted_entries {
			stage.push(e);
		}
		entries_out.append(&mut stage)?;
		entries_out.sync()?;

		let index = SparseIndex::build(sorted_entries.iter(), granularity);
		let mut index_out = BinaryOutputFile::<Sample>::create(pool, &index_path(dir, id))?;
		let mut index_stage = BackInserter::<Sample>::with_capacity(index.samples().len());
		for sample in index.samples() {
			index_stage.push(sample);
		}
		index_out.append(&mut index_stage)?;
		index_out.sync()?;

		let entries_file = ImmutableBinaryFile::<Entry>::open(pool, &entries_path(dir, id))?;
		log::debug!(target: "posdb", "wrote run {} with {} entries", id, sorted_entries.len());
		Ok(Run { id, entries: entries_file, index })
	}

	/// Reads every entry in the run, in `cmp_full` order (spec.md §4.8
	/// `merge_all`'s source material).
	pub fn read_all(&self) -> Result<Vec<Entry>> {
		self.entries.read_range(0, self.entries.len())
	}

	/// Removes a merged-away run's backing files (spec.md §4.6 lifecycle).
	/// Any still-open pooled handle for these paths remains valid until
	/// the pool evicts it — POSIX unlink doesn't invalidate open fds.
	pub fn delete_files(dir: &Path, id: u64) -> Result<()> {
		log::trace!(target: "posdb", "deleting run {}", id);
		std::fs::remove_file(entries_path(dir, id)).ok();
		std::fs::remove_file(index_path(dir, id)).ok();
		Ok(())
	}

	/// For each query key, `equal_range` then a bulk scan, accumulating
	/// matching entries into `stats` under every requested `Select`
	/// (spec.md §4.6 `execute_query`). `keys`/`stats` are parallel to the
	/// caller's query list; `level`/`result` fix which metadata slice of
	/// this batch of keys is being probed (the caller loops over every
	/// requested level/result pair, rebuilding keys each time).
	pub fn execute_query(
		&self,
		keys: &[Key],
		level: Level,
		result: GameResult,
		selects: &[Select],
		stats: &mut [PositionStats],
	) -> Result<()> {
		assert_eq!(keys.len(), stats.len());
		for (key, stat) in keys.iter().zip(stats.iter_mut()) {
			let (begin, end) = self.index.equal_range(key);
			if begin >= end {
				continue;
			}
			let range = self.entries.read_range(begin as usize, end as usize)?;
			for entry in &range {
				if entry.key.level() != level || entry.key.result() != result {
					continue;
				}
				for &select in selects {
					if select.matches(&entry.key, key) {
						stat.bucket_mut(select, level, result).accumulate(entry.packed);
					}
				}
			}
		}
		Ok(())
	}
}

/// The index's own granularity isn't stored on disk (spec.md §6 only
/// specifies the sample record shape); recovered from sample spacing, or
/// defaulting when there are fewer than two samples to diff.
fn infer_granularity(samples: &[Sample], total_entries: u64) -> usize {
	if samples.len() >= 2 {
		(samples[1].ordinal - samples[0].ordinal).max(1) as usize
	} else {
		crate::config::DEFAULT_INDEX_GRANULARITY.min(total_entries.max(1) as usize)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::chess::ReverseMove;
	use crate::entry::PackedCountAndGameOffset;
	use tempfile::tempdir;

	fn entry_for(hash: u128, level: Level, result: GameResult, offset: u64) -> Entry {
		let key = Key::with_metadata(hash, &ReverseMove::null(), level, result);
		Entry::new(key, PackedCountAndGameOffset::pack_single(offset))
	}

	#[test]
	fn write_sorted_then_open_round_trips_and_queries() {
		let dir = tempdir().unwrap();
		let pool = FilePool::new(8);
		let mut entries: Vec<Entry> =
			(0..100u128).map(|h| entry_for(h, Level::Human, GameResult::WhiteWin, h as u64)).collect();
		entries.sort_by(|a, b| a.cmp_full(b));

		let run = Run::write_sorted(&pool, dir.path(), 0, &entries, 8).unwrap();
		assert_eq!(run.len(), 100);
		assert_eq!(run.id(), 0);

		let reopened = Run::open(&pool, dir.path(), 0).unwrap();
		assert_eq!(reopened.len(), 100);

		let probe_key = Key::with_metadata(42, &ReverseMove::null(), Level::Human, GameResult::WhiteWin);
		let mut stats = vec![PositionStats::default()];
		reopened
			.execute_query(&[probe_key], Level::Human, GameResult::WhiteWin, &[Select::All], &mut stats)
			.unwrap();
		let bucket = stats[0].buckets.get(&(Select::All, Level::Human, GameResult::WhiteWin)).unwrap();
		assert_eq!(bucket.count, 1);
		assert_eq!(bucket.first_game_offset, Some(42));
	}

	#[test]
	fn execute_query_ignores_entries_of_a_different_level() {
		let dir = tempdir().unwrap();
		let pool = FilePool::new(8);
		let mut entries = vec![entry_for(7, Level::Human, GameResult::Draw, 1), entry_for(7, Level::Engine, GameResult::Draw, 2)];
		entries.sort_by(|a, b| a.cmp_full(b));
		let run = Run::write_sorted(&pool, dir.path(), 0, &entries, 4).unwrap();

		let probe_key = Key::with_metadata(7, &ReverseMove::null(), Level::Engine, GameResult::Draw);
		let mut stats = vec![PositionStats::default()];
		run.execute_query(&[probe_key], Level::Engine, GameResult::Draw, &[Select::All], &mut stats).unwrap();
		let bucket = stats[0].buckets.get(&(Select::All, Level::Engine, GameResult::Draw)).unwrap();
		assert_eq!(bucket.count, 1);
		assert_eq!(bucket.first_game_offset, Some(2));
	}
}
