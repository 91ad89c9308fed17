// External sort/merge over entry buffers, bounded by a fixed fan-in
// (spec.md §4.4). K-way merge via a binary heap follows the corpus's
// external-sort idiom in `fcoreutils`'s sort core (index-sorting plus a
// `BinaryHeap`-driven merge of sorted runs), adapted to fixed 24-byte
// `Entry` records and the `combine` monoid instead of line bytes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::entry::Entry;

pub const MAX_FANIN: usize = 16;

/// `{work_done, work_total}`, reported as sort/merge progresses (spec.md
/// §4.4). `work_total` is pre-assessed as entries read plus merge writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
	pub work_done: u64,
	pub work_total: u64,
}

pub trait ProgressSink {
	fn report(&mut self, progress: Progress);
}

impl<F: FnMut(Progress)> ProgressSink for F {
	fn report(&mut self, progress: Progress) {
		self(progress)
	}
}

pub struct NoProgress;
impl ProgressSink for NoProgress {
	fn report(&mut self, _progress: Progress) {}
}

/// In-RAM chunk sort: `CompareLessFull` order (spec.md §4.5's sort worker
/// step), stable or unstable per caller choice.
pub fn sort_in_memory(entries: &mut [Entry], stable: bool) {
	if stable {
		entries.sort_by(|a, b| a.cmp_full(b));
	} else {
		entries.sort_unstable_by(|a, b| a.cmp_full(b));
	}
}

/// Single pass over a `CompareLessFull`-sorted slice that coalesces
/// consecutive `eq_full` entries via `combine` (spec.md §4.7). Requires the
/// input already be sorted by `cmp_full`.
pub fn coalesce_equal(entries: &[Entry]) -> Vec<Entry> {
	let mut out: Vec<Entry> = Vec::with_capacity(entries.len());
	for &e in entries {
		match out.last_mut() {
			Some(last) if last.key.eq_full(&e.key) => *last = last.combine(e),
			_ => out.push(e),
		}
	}
	out
}

struct HeapItem {
	entry: Entry,
	source: usize,
	index: usize,
}

impl PartialEq for HeapItem {
	fn eq(&self, other: &HeapItem) -> bool {
		self.entry.key.eq_full(&other.entry.key) && self.source == other.source
	}
}
impl Eq for HeapItem {}

impl Ord for HeapItem {
	fn cmp(&self, other: &HeapItem) -> Ordering {
		// Reversed: BinaryHeap is a max-heap, we want the smallest entry on
		// top, with ties broken by the earlier source index (stability).
		other.entry.cmp_full(&self.entry).then_with(|| other.source.cmp(&self.source))
	}
}
impl PartialOrd for HeapItem {
	fn partial_cmp(&self, other: &HeapItem) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Stable k-way merge of already-sorted slices, `sources.len() <=
/// MAX_FANIN`. Ties break by earlier source index (spec.md §4.4).
fn merge_bounded(sources: &[&[Entry]], progress: &mut dyn ProgressSink, done_so_far: &mut u64, total: u64) -> Vec<Entry> {
	assert!(sources.len() <= MAX_FANIN);
	let total_len: usize = sources.iter().map(|s| s.len()).sum();
	let mut out = Vec::with_capacity(total_len);
	let mut heap = BinaryHeap::with_capacity(sources.len());
	for (source, slice) in sources.iter().enumerate() {
		if !slice.is_empty() {
			heap.push(HeapItem { entry: slice[0], source, index: 0 });
		}
	}
	while let Some(HeapItem { entry, source, index }) = heap.pop() {
		out.push(entry);
		*done_so_far += 1;
		progress.report(Progress { work_done: *done_so_far, work_total: total });
		let next_index = index + 1;
		if next_index < sources[source].len() {
			heap.push(HeapItem { entry: sources[source][next_index], source, index: next_index });
		}
	}
	out
}

/// External merge (spec.md §4.4): fan-in `<= MAX_FANIN` merges directly;
/// otherwise groups of `MAX_FANIN` are merged first and the results
/// recursively merged, so no merge step ever opens more than `MAX_FANIN`
/// sources at once.
pub fn merge(sources: &[&[Entry]], progress: &mut dyn ProgressSink) -> Vec<Entry> {
	let total: u64 = sources.iter().map(|s| s.len() as u64).sum();
	let mut done = 0u64;
	merge_recursive(sources, progress, &mut done, total)
}

fn merge_recursive(sources: &[&[Entry]], progress: &mut dyn ProgressSink, done: &mut u64, total: u64) -> Vec<Entry> {
	if sources.len() <= MAX_FANIN {
		return merge_bounded(sources, progress, done, total);
	}
	let merged_groups: Vec<Vec<Entry>> =
		sources.chunks(MAX_FANIN).map(|group| merge_bounded(group, progress, done, total)).collect();
	let group_slices: Vec<&[Entry]> = merged_groups.iter().map(|v| v.as_slice()).collect();
	merge_recursive(&group_slices, progress, done, total)
}

/// External sort (spec.md §4.4): partitions `entries` into chunks of at
/// most `chunk_len` (sized to the caller's memory budget), sorts each
/// chunk in RAM, then external-merges the chunks.
pub fn sort(entries: &[Entry], chunk_len: usize, stable: bool, progress: &mut dyn ProgressSink) -> Vec<Entry> {
	assert!(chunk_len > 0);
	if entries.len() <= chunk_len {
		let mut chunk = entries.to_vec();
		sort_in_memory(&mut chunk, stable);
		let total = entries.len() as u64;
		progress.report(Progress { work_done: total, work_total: total });
		return chunk;
	}
	let chunks: Vec<Vec<Entry>> = entries
		.chunks(chunk_len)
		.map(|c| {
			let mut chunk = c.to_vec();
			sort_in_memory(&mut chunk, stable);
			chunk
		})
		.collect();
	let chunk_slices: Vec<&[Entry]> = chunks.iter().map(|c| c.as_slice()).collect();
	merge(&chunk_slices, progress)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::entry::PackedCountAndGameOffset;
	use crate::key::Key;

	fn entry_for(hash: u128, offset: u64) -> Entry {
		let key = Key::new(hash, &crate::chess::ReverseMove::null());
		Entry::new(key, PackedCountAndGameOffset::pack_single(offset))
	}

	#[test]
	fn sort_in_memory_is_monotone() {
		let mut entries = vec![entry_for(9, 0), entry_for(1, 1), entry_for(5, 2)];
		sort_in_memory(&mut entries, true);
		for w in entries.windows(2) {
			assert_ne!(w[1].cmp_full(&w[0]), Ordering::Less);
		}
	}

	#[test]
	fn coalesce_equal_combines_adjacent_duplicates() {
		let mut entries = vec![entry_for(1, 0), entry_for(1, 5), entry_for(2, 1)];
		sort_in_memory(&mut entries, true);
		let merged = coalesce_equal(&entries);
		assert_eq!(merged.len(), 2);
		let dup = merged.iter().find(|e| e.key.eq_full(&entries[0].key)).unwrap();
		assert_eq!(dup.packed.count(), 2);
	}

	#[test]
	fn merge_of_sorted_runs_preserves_total_length_and_order() {
		let mut a = vec![entry_for(1, 0), entry_for(3, 0), entry_for(5, 0)];
		let mut b = vec![entry_for(2, 0), entry_for(4, 0)];
		sort_in_memory(&mut a, true);
		sort_in_memory(&mut b, true);
		let merged = merge(&[&a, &b], &mut NoProgress);
		assert_eq!(merged.len(), 5);
		for w in merged.windows(2) {
			assert_ne!(w[1].cmp_full(&w[0]), Ordering::Less);
		}
	}

	#[test]
	fn merge_beyond_max_fanin_still_produces_total_order() {
		let mut sources: Vec<Vec<Entry>> = Vec::new();
		for i in 0..40u128 {
			sources.push(vec![entry_for(i, 0)]);
		}
		let slices: Vec<&[Entry]> = sources.iter().map(|s| s.as_slice()).collect();
		let merged = merge(&slices, &mut NoProgress);
		assert_eq!(merged.len(), 40);
		for w in merged.windows(2) {
			assert_ne!(w[1].cmp_full(&w[0]), Ordering::Less);
		}
	}

	#[test]
	fn external_sort_matches_in_memory_sort_on_small_chunks() {
		let entries: Vec<Entry> = (0..50u128).rev().map(|i| entry_for(i, 0)).collect();
		let sorted = sort(&entries, 7, true, &mut NoProgress);
		assert_eq!(sorted.len(), 50);
		for w in sorted.windows(2) {
			assert_ne!(w[1].cmp_full(&w[0]), Ordering::Less);
		}
	}

	#[test]
	fn external_sort_orders_a_large_randomly_shuffled_input() {
		use rand::seq::SliceRandom;
		let mut entries: Vec<Entry> = (0..5_000u128).map(|i| entry_for(i, i as u64)).collect();
		entries.shuffle(&mut rand::thread_rng());
		let sorted = sort(&entries, 137, false, &mut NoProgress);
		assert_eq!(sorted.len(), 5_000);
		for w in sorted.windows(2) {
			assert_ne!(w[1].cmp_full(&w[0]), Ordering::Less);
		}
	}
}
