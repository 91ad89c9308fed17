// Bit-packed count+game-offset entry. Variable-width counter-sharing-a-word
// pattern grounded on parity-db's ref-count-plus-compressed-flag packing in
// `table.rs::change_ref` (`COMPRESSED_MASK`, a tag bit sharing a machine
// word with a payload): here the tag is a self-describing width field.

use crate::file_io::FixedRecord;
use crate::key::Key;

/// Sentinel game offset meaning "no valid offset" — used when a count grows
/// large enough that there's no room left to store a real offset (spec.md
/// §3).
pub const INVALID_OFFSET: u64 = (1u64 << 58) - 1;

const WIDTH_BITS: u32 = 6;
const DATA_BITS: u32 = 64 - WIDTH_BITS;
/// When `count` and `game_offset` together need 58 or more data bits,
/// `count` takes all of them and `game_offset` becomes `INVALID_OFFSET`. The
/// "normal" branch is restricted to combined widths strictly less than this
/// so a legitimately-packed width can never equal the sentinel itself.
const OVERFLOW_WIDTH: u64 = 58;

/// Variable-length internal layout (spec.md §3): low 6 bits store `s` = bits
/// used by `count`; next `s` bits store `count`; the rest store
/// `game_offset`. Private layout — `count()`/`game_offset()` are the only
/// stable accessors (spec.md §9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedCountAndGameOffset(u64);

fn bits_needed(value: u64) -> u32 {
	if value == 0 {
		0
	} else {
		64 - value.leading_zeros()
	}
}

impl PackedCountAndGameOffset {
	pub fn pack(count: u64, game_offset: u64) -> PackedCountAndGameOffset {
		let count_bits = bits_needed(count);
		let offset_bits = bits_needed(game_offset);
		if count_bits as u64 + offset_bits as u64 < OVERFLOW_WIDTH {
			let s = count_bits;
			let raw = (s as u64) | (count << WIDTH_BITS) | (game_offset << (WIDTH_BITS + s));
			PackedCountAndGameOffset(raw)
		} else {
			let s = OVERFLOW_WIDTH as u32;
			let raw = (s as u64) | (count << WIDTH_BITS);
			PackedCountAndGameOffset(raw)
		}
	}

	pub fn pack_single(game_offset: u64) -> PackedCountAndGameOffset {
		PackedCountAndGameOffset::pack(1, game_offset)
	}

	pub fn unpack(self) -> (u64, u64) {
		let s = self.0 & ((1 << WIDTH_BITS) - 1);
		if s == OVERFLOW_WIDTH {
			let count = self.0 >> WIDTH_BITS;
			(count, INVALID_OFFSET)
		} else {
			let count_mask = if s == 0 { 0 } else { (1u64 << s) - 1 };
			let count = (self.0 >> WIDTH_BITS) & count_mask;
			let offset = self.0 >> (WIDTH_BITS + s as u32);
			(count, offset)
		}
	}

	pub fn count(self) -> u64 {
		self.unpack().0
	}

	pub fn game_offset(self) -> u64 {
		self.unpack().1
	}

	/// Associative, commutative monoid operation: count sums, offset takes
	/// the minimum (spec.md §3/§8 — the first game to reach a position).
	pub fn combine(self, other: PackedCountAndGameOffset) -> PackedCountAndGameOffset {
		let (count_a, offset_a) = self.unpack();
		let (count_b, offset_b) = other.unpack();
		let offset = match (offset_a == INVALID_OFFSET, offset_b == INVALID_OFFSET) {
			(true, true) => INVALID_OFFSET,
			(true, false) => offset_b,
			(false, true) => offset_a,
			(false, false) => offset_a.min(offset_b),
		};
		PackedCountAndGameOffset::pack(count_a + count_b, offset)
	}

	pub fn to_u64(self) -> u64 {
		self.0
	}

	pub fn from_u64(raw: u64) -> PackedCountAndGameOffset {
		PackedCountAndGameOffset(raw)
	}
}

/// 24-byte, trivially-copyable record: a `Key` plus a packed count+offset
/// (spec.md §3). Only ever copied in bulk on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
	pub key: Key,
	pub packed: PackedCountAndGameOffset,
}

pub const ENTRY_SIZE: usize = 24;

impl Entry {
	pub fn new(key: Key, packed: PackedCountAndGameOffset) -> Entry {
		Entry { key, packed }
	}

	/// Preconditions: caller has established `key.eq_full` on the two
	/// entries (spec.md §4.3).
	pub fn combine(self, other: Entry) -> Entry {
		debug_assert!(self.key.eq_full(&other.key));
		Entry { key: self.key, packed: self.packed.combine(other.packed) }
	}

	pub fn cmp_full(&self, other: &Entry) -> std::cmp::Ordering {
		self.key.cmp_full(&other.key)
	}

	pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
		let mut out = [0u8; ENTRY_SIZE];
		out[0..16].copy_from_slice(&self.key.to_bytes());
		out[16..24].copy_from_slice(&self.packed.to_u64().to_le_bytes());
		out
	}

	pub fn from_bytes(bytes: &[u8; ENTRY_SIZE]) -> Entry {
		let key = Key::from_bytes(bytes[0..16].try_into().unwrap());
		let packed = PackedCountAndGameOffset::from_u64(u64::from_le_bytes(bytes[16..24].try_into().unwrap()));
		Entry { key, packed }
	}
}

impl FixedRecord for Entry {
	const SIZE: usize = ENTRY_SIZE;
	fn to_bytes(&self) -> Vec<u8> {
		Entry::to_bytes(self).to_vec()
	}
	fn from_bytes(bytes: &[u8]) -> Entry {
		Entry::from_bytes(bytes.try_into().unwrap())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn pack_unpack_small_values_round_trip() {
		for count in [0u64, 1, 2, 5, 100, 1_000_000] {
			for offset in [0u64, 1, 42, 1 << 20, 1 << 40] {
				if bits_needed(count) + bits_needed(offset) >= OVERFLOW_WIDTH as u32 {
					continue;
				}
				let packed = PackedCountAndGameOffset::pack(count, offset);
				assert_eq!(packed.unpack(), (count, offset));
			}
		}
	}

	#[test]
	fn overflow_uses_sentinel_offset() {
		let count = 1u64 << 60;
		let packed = PackedCountAndGameOffset::pack(count, 5);
		let (unpacked_count, unpacked_offset) = packed.unpack();
		assert_eq!(unpacked_count, count);
		assert_eq!(unpacked_offset, INVALID_OFFSET);
	}

	#[test]
	fn pack_does_not_collide_with_the_sentinel_width_at_the_58_bit_boundary() {
		// count_bits(2^57) + bits_needed(0) == 58 == OVERFLOW_WIDTH: this used
		// to be packed with s == 58, indistinguishable from the sentinel, which
		// made unpack() take the overflow branch and made pack() shift
		// `game_offset` left by 64 (a debug-mode overflow panic). It must now
		// be routed through the overflow branch consistently, not panic, and
		// still report the correct count.
		let count = 1u64 << 57;
		let packed = PackedCountAndGameOffset::pack(count, 0);
		let (unpacked_count, unpacked_offset) = packed.unpack();
		assert_eq!(unpacked_count, count);
		assert_eq!(unpacked_offset, INVALID_OFFSET);
	}

	#[test]
	fn combine_is_commutative_and_associative() {
		let a = PackedCountAndGameOffset::pack(2, 10);
		let b = PackedCountAndGameOffset::pack(3, 4);
		let c = PackedCountAndGameOffset::pack(1, 99);

		assert_eq!(a.combine(b).unpack(), b.combine(a).unpack());
		assert_eq!(a.combine(b).combine(c).unpack(), a.combine(b.combine(c)).unpack());
		let combined = a.combine(b).combine(c);
		assert_eq!(combined.count(), 6);
		assert_eq!(combined.game_offset(), 4);
	}

	#[test]
	fn pack_single_has_count_one() {
		let packed = PackedCountAndGameOffset::pack_single(77);
		assert_eq!(packed.unpack(), (1, 77));
	}
}
