// The chess move generator, SAN parser and PGN/BCGN tokenizer are external
// collaborators (spec.md §1): this module only defines the narrow interface
// the core actually consumes, and the plain data types (`Square`,
// `PieceType`, `CastlingRights`, `ReverseMove`) whose bit layout spec.md §3
// fixes directly. It never depends on a concrete chess engine crate.

use crate::error::Result;

/// A board square, 0..64 (a1=0 .. h8=63). Fits in 6 bits (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Square(pub u8);

impl Square {
	pub fn new(index: u8) -> Square {
		debug_assert!(index < 64);
		Square(index)
	}

	pub fn index(self) -> u8 {
		self.0
	}
}

/// Piece type, used both for captured pieces and promotions. Packs into 4
/// bits for captured-piece and 3 bits for promoted-piece-type (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PieceType {
	None = 0,
	Pawn = 1,
	Knight = 2,
	Bishop = 3,
	Rook = 4,
	Queen = 5,
	King = 6,
}

impl PieceType {
	pub fn from_bits(bits: u8) -> PieceType {
		match bits {
			1 => PieceType::Pawn,
			2 => PieceType::Knight,
			3 => PieceType::Bishop,
			4 => PieceType::Rook,
			5 => PieceType::Queen,
			6 => PieceType::King,
			_ => PieceType::None,
		}
	}

	pub fn to_bits(self) -> u8 {
		self as u8
	}
}

/// Castling rights, one bit per (side, direction): white kingside/queenside,
/// black kingside/queenside. Packs into 4 bits (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct CastlingRights(pub u8);

impl CastlingRights {
	pub const WHITE_KINGSIDE: u8 = 0b0001;
	pub const WHITE_QUEENSIDE: u8 = 0b0010;
	pub const BLACK_KINGSIDE: u8 = 0b0100;
	pub const BLACK_QUEENSIDE: u8 = 0b1000;

	pub fn from_bits(bits: u8) -> CastlingRights {
		CastlingRights(bits & 0b1111)
	}

	pub fn to_bits(self) -> u8 {
		self.0 & 0b1111
	}
}

/// Move plus everything needed to undo it: captured piece, prior en-passant
/// file, prior castling rights (spec.md §3, GLOSSARY "Reverse move").
///
/// Invariant: the null reverse-move packs to all zeros except
/// `ep_was_valid` cleared (spec.md §3 PackedReverseMove invariant).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ReverseMove {
	pub from: Option<Square>,
	pub to: Option<Square>,
	pub captured_piece: PieceType,
	pub previous_castling_rights: CastlingRights,
	pub promoted_piece_type: PieceType,
	pub previous_ep_file: Option<u8>,
}

impl ReverseMove {
	/// The null reverse-move: the root of a game has no inbound move.
	pub fn null() -> ReverseMove {
		ReverseMove::default()
	}

	pub fn is_null(&self) -> bool {
		self.from.is_none() && self.to.is_none()
	}
}

impl Default for PieceType {
	fn default() -> PieceType {
		PieceType::None
	}
}

/// A forward move, as produced by the collaborator's move generator/SAN
/// parser. Only enough is exposed for the core to ask "what reverse-move
/// would this produce" via `Position::do_move`, plus its own SAN text so
/// query responses can key per-child results (spec.md §6 response shape
/// `"<san>": child-entries`) without the core depending on a concrete
/// move-to-text implementation beyond this one method.
pub trait Move: Copy + Clone {
	fn notation(&self) -> String;
}

/// The collaborator boundary (spec.md §1/§6): a chess position that can
/// compute its own 128-bit identity hash, apply a move (returning the
/// reverse-move needed to undo it) and enumerate legal moves. The core
/// never validates move legality beyond what this trait exposes.
pub trait Position: Clone {
	type Move: Move;

	/// 128-bit structural hash of the position (board + side to move +
	/// castling rights + en-passant file), independent of move history.
	fn position_hash(&self) -> u128;

	/// Applies `mv` in place and returns the reverse-move needed to undo it.
	fn do_move(&mut self, mv: Self::Move) -> ReverseMove;

	/// All legal moves from this position.
	fn legal_moves(&self) -> Vec<Self::Move>;

	/// Parses a FEN string into a position. Collaborator-provided; errors
	/// surface as `Error::InvalidFen`.
	fn from_fen(fen: &str) -> Result<Self>
	where
		Self: Sized;

	/// The standard chess starting position.
	fn start_position() -> Self
	where
		Self: Sized;
}

/// Parses SAN notation against a position's legal moves. External
/// collaborator function (spec.md §1): `san_to_move(&Position, &str) ->
/// Option<Move>`. Kept as a free function matching the spec's signature so
/// any SAN parser can be plugged in without implementing a trait.
pub type SanParser<P> = fn(&P, &str) -> Option<<P as Position>::Move>;

/// One parsed game: header tags plus the sequence of moves to replay from
/// the start position (or from `fen` if the game didn't start at the
/// initial position). Produced by the PGN/BCGN tokenizer, also out of
/// scope (spec.md §1): the core only consumes this shape.
pub struct ParsedGame {
	pub event: String,
	pub white: String,
	pub black: String,
	pub result: Option<crate::key::GameResult>,
	pub date: Option<(u16, u8, u8)>,
	pub eco: Option<[u8; 3]>,
	pub starting_fen: Option<String>,
	/// SAN tokens in play order; a parse failure partway through still
	/// keeps everything parsed so far (spec.md §4.10 step 3).
	pub sans: Vec<String>,
}
