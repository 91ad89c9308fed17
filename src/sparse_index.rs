// Every-Nth-entry key sample supporting `equal_range` by binary search plus
// granule widening (spec.md §4.5). Sparse-offset-over-sorted-data shape
// grounded on git pack index readers (reverse index / pack index writer in
// the retrieved examples), generalized here to 128-bit position keys.

use crate::key::Key;

/// One sample: the key at `ordinal` in the run's entry file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
	pub key: Key,
	pub ordinal: u64,
}

impl crate::file_io::FixedRecord for Sample {
	const SIZE: usize = 24;

	fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(Self::SIZE);
		out.extend_from_slice(&self.key.to_bytes());
		out.extend_from_slice(&self.ordinal.to_le_bytes());
		out
	}

	fn from_bytes(bytes: &[u8]) -> Sample {
		let key = Key::from_bytes(bytes[0..16].try_into().unwrap());
		let ordinal = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
		Sample { key, ordinal }
	}
}

/// Sparse index over a single sorted run: one `Sample` per `granularity`
/// entries (spec.md §4.5).
#[derive(Clone, Debug)]
pub struct SparseIndex {
	samples: Vec<Sample>,
	granularity: usize,
	total_entries: u64,
}

impl SparseIndex {
	pub fn granularity(&self) -> usize {
		self.granularity
	}

	pub fn samples(&self) -> &[Sample] {
		&self.samples
	}

	/// Builds the index while streaming `sorted_entries` into an output
	/// file (spec.md §4.7's write worker). `sorted_entries` must already be
	/// sorted by `cmp_full`.
	pub fn build<'a>(sorted_entries: impl Iterator<Item = &'a crate::entry::Entry>, granularity: usize) -> SparseIndex {
		assert!(granularity > 0);
		let mut samples = Vec::new();
		let mut total: u64 = 0;
		for entry in sorted_entries {
			if total % granularity as u64 == 0 {
				samples.push(Sample { key: entry.key, ordinal: total });
			}
			total += 1;
		}
		SparseIndex { samples, granularity, total_entries: total }
	}

	pub fn from_samples(samples: Vec<Sample>, granularity: usize, total_entries: u64) -> SparseIndex {
		SparseIndex { samples, granularity, total_entries }
	}

	pub fn total_entries(&self) -> u64 {
		self.total_entries
	}

	/// Returns `[begin, end)` such that any entry equal to `key` under
	/// `cmp_without_reverse_move` lies within the range (spec.md §4.5).
	/// Binary-searches for the highest sample `<= key` and the lowest
	/// sample `> key`, then widens by one granule on each side.
	pub fn equal_range(&self, key: &Key) -> (u64, u64) {
		if self.samples.is_empty() {
			return (0, self.total_entries);
		}
		// Partition point: first sample whose key is > `key` under the
		// position-only comparison.
		let split = self.samples.partition_point(|s| s.key.cmp_without_reverse_move(key) != std::cmp::Ordering::Greater);

		let begin_sample_index = split.saturating_sub(1);
		let begin = self.samples[begin_sample_index].ordinal;

		let end = if split < self.samples.len() { self.samples[split].ordinal } else { self.total_entries };

		(begin, end)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::chess::ReverseMove;
	use crate::entry::{Entry, PackedCountAndGameOffset};

	fn entry_for(hash: u128) -> Entry {
		let key = Key::new(hash, &ReverseMove::null());
		Entry::new(key, PackedCountAndGameOffset::pack_single(0))
	}

	#[test]
	fn equal_range_locates_every_key_in_a_sorted_run() {
		let mut entries: Vec<Entry> = (0..200u128).map(entry_for).collect();
		entries.sort_by(|a, b| a.cmp_full(b));
		let index = SparseIndex::build(entries.iter(), 8);

		for (ordinal, entry) in entries.iter().enumerate() {
			let (begin, end) = index.equal_range(&entry.key);
			assert!(begin as usize <= ordinal && (ordinal as u64) < end, "ordinal {ordinal} not in range [{begin}, {end})");
			assert!(entries[begin as usize..end as usize].iter().any(|e| e.key.eq_full(&entry.key)));
		}
	}

	#[test]
	fn empty_index_spans_the_whole_run() {
		let index = SparseIndex::from_samples(Vec::new(), 16, 42);
		assert_eq!(index.equal_range(&Key::new(0, &ReverseMove::null())), (0, 42));
	}
}
