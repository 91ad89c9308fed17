// 128-bit position key: the linchpin that makes range scans at query time
// possible. Bit-packing style (newtype over an integer, `new`/accessor
// methods that mask and shift) follows parity-db/Tpt-parity-db's
// `table::Address` (size-tier + offset packed into a u64).

use crate::chess::{CastlingRights, PieceType, ReverseMove, Square};

/// Origin classification of a game (GLOSSARY "Level"). Discriminants are
/// fixed explicitly since they're persisted inside every on-disk key —
/// reordering the enum must never change what's already on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Level {
	Human = 0,
	Engine = 1,
	Server = 2,
}

impl Level {
	pub const ALL: [Level; 3] = [Level::Human, Level::Engine, Level::Server];

	pub fn ordinal(self) -> u32 {
		self as u32
	}

	pub fn from_ordinal(ord: u32) -> Level {
		match ord & 0b11 {
			0 => Level::Human,
			1 => Level::Engine,
			_ => Level::Server,
		}
	}
}

/// GLOSSARY "Result": WhiteWin / BlackWin / Draw. Discriminants fixed for
/// the same reason as `Level`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GameResult {
	WhiteWin = 0,
	BlackWin = 1,
	Draw = 2,
}

impl GameResult {
	pub const ALL: [GameResult; 3] = [GameResult::WhiteWin, GameResult::BlackWin, GameResult::Draw];

	pub fn ordinal(self) -> u32 {
		self as u32
	}

	pub fn from_ordinal(ord: u32) -> GameResult {
		match ord & 0b11 {
			0 => GameResult::WhiteWin,
			1 => GameResult::BlackWin,
			_ => GameResult::Draw,
		}
	}

	/// Parses a PGN result tag. Returns `None` for `"*"` (game in progress,
	/// no result) — the caller accounts this as a skipped game.
	pub fn from_pgn_tag(tag: &str) -> Option<GameResult> {
		match tag {
			"1-0" => Some(GameResult::WhiteWin),
			"0-1" => Some(GameResult::BlackWin),
			"1/2-1/2" => Some(GameResult::Draw),
			_ => None,
		}
	}
}

const FROM_BITS: u32 = 6;
const TO_BITS: u32 = 6;
const CAPTURED_BITS: u32 = 4;
const CASTLING_BITS: u32 = 4;
const PROMOTED_BITS: u32 = 3;
const EP_VALID_BITS: u32 = 1;
const EP_FILE_BITS: u32 = 3;
pub const PACKED_REVERSE_MOVE_BITS: u32 =
	FROM_BITS + TO_BITS + CAPTURED_BITS + CASTLING_BITS + PROMOTED_BITS + EP_VALID_BITS + EP_FILE_BITS;

const EP_FILE_SHIFT: u32 = 0;
const EP_VALID_SHIFT: u32 = EP_FILE_SHIFT + EP_FILE_BITS;
const PROMOTED_SHIFT: u32 = EP_VALID_SHIFT + EP_VALID_BITS;
const CASTLING_SHIFT: u32 = PROMOTED_SHIFT + PROMOTED_BITS;
const CAPTURED_SHIFT: u32 = CASTLING_SHIFT + CASTLING_BITS;
const TO_SHIFT: u32 = CAPTURED_SHIFT + CAPTURED_BITS;
const FROM_SHIFT: u32 = TO_SHIFT + TO_BITS;

/// The inbound move plus everything needed to undo it, packed into 27 bits
/// (spec.md §3): from-square(6) to-square(6) captured-piece(4)
/// previous-castling-rights(4) promoted-piece-type(3) ep-was-valid(1)
/// previous-ep-file(3), high to low.
///
/// Invariant: the null reverse-move packs to all zeros (ep-was-valid
/// cleared along with everything else).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct PackedReverseMove(u32);

impl PackedReverseMove {
	pub fn pack(rmove: &ReverseMove) -> PackedReverseMove {
		if rmove.is_null() {
			return PackedReverseMove(0);
		}
		let from = rmove.from.map(Square::index).unwrap_or(0) as u32;
		let to = rmove.to.map(Square::index).unwrap_or(0) as u32;
		let captured = rmove.captured_piece.to_bits() as u32;
		let castling = rmove.previous_castling_rights.to_bits() as u32;
		let promoted = rmove.promoted_piece_type.to_bits() as u32;
		let (ep_valid, ep_file) = match rmove.previous_ep_file {
			Some(file) => (1u32, file as u32),
			None => (0u32, 0u32),
		};
		let bits = (from << FROM_SHIFT)
			| (to << TO_SHIFT)
			| (captured << CAPTURED_SHIFT)
			| (castling << CASTLING_SHIFT)
			| (promoted << PROMOTED_SHIFT)
			| (ep_valid << EP_VALID_SHIFT)
			| (ep_file << EP_FILE_SHIFT);
		PackedReverseMove(bits)
	}

	pub fn as_u32(self) -> u32 {
		self.0
	}

	pub fn from_u32(bits: u32) -> PackedReverseMove {
		PackedReverseMove(bits & ((1 << PACKED_REVERSE_MOVE_BITS) - 1))
	}

	pub fn is_null(self) -> bool {
		self.0 == 0
	}

	pub fn unpack(self) -> ReverseMove {
		if self.is_null() {
			return ReverseMove::null();
		}
		let from = (self.0 >> FROM_SHIFT) & ((1 << FROM_BITS) - 1);
		let to = (self.0 >> TO_SHIFT) & ((1 << TO_BITS) - 1);
		let captured = (self.0 >> CAPTURED_SHIFT) & ((1 << CAPTURED_BITS) - 1);
		let castling = (self.0 >> CASTLING_SHIFT) & ((1 << CASTLING_BITS) - 1);
		let promoted = (self.0 >> PROMOTED_SHIFT) & ((1 << PROMOTED_BITS) - 1);
		let ep_valid = (self.0 >> EP_VALID_SHIFT) & ((1 << EP_VALID_BITS) - 1);
		let ep_file = (self.0 >> EP_FILE_SHIFT) & ((1 << EP_FILE_BITS) - 1);
		ReverseMove {
			from: Some(Square::new(from as u8)),
			to: Some(Square::new(to as u8)),
			captured_piece: PieceType::from_bits(captured as u8),
			previous_castling_rights: CastlingRights::from_bits(castling as u8),
			promoted_piece_type: PieceType::from_bits(promoted as u8),
			previous_ep_file: if ep_valid != 0 { Some(ep_file as u8) } else { None },
		}
	}
}

// Word 3 layout: [packed_reverse_move: 27][level: 2][result: 2], with the
// top bit always zero (27 + 2 + 2 = 31 of 32 bits). Reverse-move outranks
// level/result in significance, and level/result share the lowest 4 bits —
// this is what makes entries for the same (position, reverse-move) sort
// adjacent regardless of level/result, and what lets a position-only
// prefix compare ignore all of word 3.
const LEVEL_SHIFT: u32 = 2;
const RESULT_SHIFT: u32 = 0;
const REVERSE_MOVE_SHIFT: u32 = 4;

/// 128-bit position identifier: position hash folded with the packed
/// reverse-move, level and result (spec.md §3). Stored as four big-endian
/// u32 words so lexicographic comparison of the words matches numeric
/// comparison of the 128-bit value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key([u32; 4]);

impl Key {
	/// Computes the position hash and folds in the reverse-move only (level
	/// and result left as zero) — used by the sparse index's
	/// without-reverse-move comparisons and as a building block for
	/// `with_metadata`.
	pub fn new(position_hash: u128, rmove: &ReverseMove) -> Key {
		Key::with_metadata_packed(position_hash, PackedReverseMove::pack(rmove), Level::Human, GameResult::Draw, false)
	}

	pub fn with_metadata(position_hash: u128, rmove: &ReverseMove, level: Level, result: GameResult) -> Key {
		Key::with_metadata_packed(position_hash, PackedReverseMove::pack(rmove), level, result, true)
	}

	fn with_metadata_packed(
		position_hash: u128,
		packed_rmove: PackedReverseMove,
		level: Level,
		result: GameResult,
		include_metadata: bool,
	) -> Key {
		let bytes = position_hash.to_be_bytes();
		let word0 = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
		let word1 = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
		let word2 = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
		let (level_bits, result_bits) = if include_metadata {
			(level.ordinal(), result.ordinal())
		} else {
			(0, 0)
		};
		let word3 = (packed_rmove.as_u32() << REVERSE_MOVE_SHIFT) | (level_bits << LEVEL_SHIFT) | (result_bits << RESULT_SHIFT);
		Key([word0, word1, word2, word3])
	}

	pub fn words(&self) -> [u32; 4] {
		self.0
	}

	pub fn from_words(words: [u32; 4]) -> Key {
		Key(words)
	}

	pub fn reverse_move(&self) -> PackedReverseMove {
		PackedReverseMove::from_u32(self.0[3] >> REVERSE_MOVE_SHIFT)
	}

	pub fn level(&self) -> Level {
		Level::from_ordinal(self.0[3] >> LEVEL_SHIFT)
	}

	pub fn result(&self) -> GameResult {
		GameResult::from_ordinal(self.0[3] >> RESULT_SHIFT)
	}

	/// Comparison over the first three words only: position identity,
	/// ignoring inbound reverse-move/level/result. Used by the sparse
	/// index so a single probe locates all entries for a position.
	pub fn cmp_without_reverse_move(&self, other: &Key) -> std::cmp::Ordering {
		self.0[0..3].cmp(&other.0[0..3])
	}

	pub fn eq_without_reverse_move(&self, other: &Key) -> bool {
		self.0[0..3] == other.0[0..3]
	}

	/// Comparison ignoring level/result but including the reverse-move:
	/// position identity plus inbound reverse-move.
	pub fn cmp_with_reverse_move(&self, other: &Key) -> std::cmp::Ordering {
		match self.0[0..3].cmp(&other.0[0..3]) {
			std::cmp::Ordering::Equal => (self.0[3] >> REVERSE_MOVE_SHIFT).cmp(&(other.0[3] >> REVERSE_MOVE_SHIFT)),
			ord => ord,
		}
	}

	pub fn eq_with_reverse_move(&self, other: &Key) -> bool {
		self.eq_without_reverse_move(other) && self.reverse_move() == other.reverse_move()
	}

	/// Full 128-bit comparison: used inside runs to maintain a canonical
	/// order and to identify equal entries for combining.
	pub fn cmp_full(&self, other: &Key) -> std::cmp::Ordering {
		self.0.cmp(&other.0)
	}

	pub fn eq_full(&self, other: &Key) -> bool {
		self.0 == other.0
	}

	pub fn to_bytes(&self) -> [u8; 16] {
		let mut out = [0u8; 16];
		for (i, w) in self.0.iter().enumerate() {
			out[i * 4..i * 4 + 4].copy_from_slice(&w.to_be_bytes());
		}
		out
	}

	pub fn from_bytes(bytes: &[u8; 16]) -> Key {
		let mut words = [0u32; 4];
		for i in 0..4 {
			words[i] = u32::from_be_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
		}
		Key(words)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::chess::Square;

	fn sample_rmove() -> ReverseMove {
		ReverseMove {
			from: Some(Square::new(12)),
			to: Some(Square::new(28)),
			captured_piece: PieceType::None,
			previous_castling_rights: CastlingRights::from_bits(0b1111),
			promoted_piece_type: PieceType::None,
			previous_ep_file: None,
		}
	}

	#[test]
	fn null_reverse_move_packs_to_zero() {
		let packed = PackedReverseMove::pack(&ReverseMove::null());
		assert_eq!(packed.as_u32(), 0);
		assert!(packed.is_null());
	}

	#[test]
	fn reverse_move_round_trips() {
		let rmove = sample_rmove();
		let packed = PackedReverseMove::pack(&rmove);
		assert_eq!(packed.unpack(), rmove);
	}

	#[test]
	fn varying_level_result_only_perturbs_low_four_bits() {
		let hash = 0x1122_3344_5566_7788_99aa_bbcc_ddee_ff00u128;
		let rmove = sample_rmove();
		let k1 = Key::with_metadata(hash, &rmove, Level::Human, GameResult::WhiteWin);
		let k2 = Key::with_metadata(hash, &rmove, Level::Server, GameResult::Draw);
		assert_eq!(k1.words()[0..3], k2.words()[0..3]);
		assert_eq!(k1.words()[3] & !0b1111, k2.words()[3] & !0b1111);
		assert!(k1.eq_without_reverse_move(&k2));
		assert!(k1.eq_with_reverse_move(&k2));
	}

	#[test]
	fn different_reverse_move_keeps_position_prefix_equal() {
		let hash = 42u128;
		let rmove_a = sample_rmove();
		let mut rmove_b = sample_rmove();
		rmove_b.to = Some(Square::new(36));
		let ka = Key::with_metadata(hash, &rmove_a, Level::Engine, GameResult::Draw);
		let kb = Key::with_metadata(hash, &rmove_b, Level::Engine, GameResult::Draw);
		assert!(ka.eq_without_reverse_move(&kb));
		assert!(!ka.eq_with_reverse_move(&kb));
	}
}
