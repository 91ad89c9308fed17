// Query request/response wire shapes and execution (spec.md §4.9/§6). JSON
// shapes via serde/serde_json, the same crates the corpus reaches for at
// its external interfaces.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::chess::{Move, Position, ReverseMove};
use crate::entry::PackedCountAndGameOffset;
use crate::header::GameHeader;
use crate::key::{GameResult, Key, Level};

/// GLOSSARY "Continuation"/"Transposition": which entries count toward a
/// query key (spec.md §4.9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Select {
	Continuations,
	Transpositions,
	All,
}

impl Select {
	pub const ALL_VARIANTS: [Select; 3] = [Select::Continuations, Select::Transpositions, Select::All];

	/// Whether an entry with key `entry_key` counts toward a query for
	/// `query_key` under this select mode (spec.md §4.9).
	pub fn matches(self, entry_key: &Key, query_key: &Key) -> bool {
		match self {
			Select::Continuations => entry_key.eq_with_reverse_move(query_key),
			Select::Transpositions => entry_key.eq_without_reverse_move(query_key) && !entry_key.eq_with_reverse_move(query_key),
			Select::All => entry_key.eq_without_reverse_move(query_key),
		}
	}
}

/// Which fetches the caller asked for under one `Select` (spec.md §6).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct FetchOptions {
	#[serde(default)]
	pub fetch_children: bool,
	#[serde(default)]
	pub fetch_first_game: bool,
	#[serde(default)]
	pub fetch_last_game: bool,
	#[serde(default)]
	pub fetch_first_game_for_each_child: bool,
	#[serde(default)]
	pub fetch_last_game_for_each_child: bool,
}

impl FetchOptions {
	fn wants_children(&self) -> bool {
		self.fetch_children || self.fetch_first_game_for_each_child || self.fetch_last_game_for_each_child
	}

	/// Clears last-game fetches: this engine tracks only the minimum
	/// offset under `combine`, never a maximum (spec.md §4.9 "Disabled
	/// features").
	fn with_last_game_disabled(mut self) -> FetchOptions {
		self.fetch_last_game = false;
		self.fetch_last_game_for_each_child = false;
		self
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionRequest {
	pub fen: String,
	#[serde(default)]
	pub r#move: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelTag {
	Human,
	Engine,
	Server,
}

impl From<LevelTag> for Level {
	fn from(tag: LevelTag) -> Level {
		match tag {
			LevelTag::Human => Level::Human,
			LevelTag::Engine => Level::Engine,
			LevelTag::Server => Level::Server,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultTag {
	Win,
	Loss,
	Draw,
}

/// `win`/`loss` are relative to the side to move at the queried position,
/// which the core does not track — interpreted here as White/Black
/// directly (spec.md §6 names the wire tags; resolving them to a concrete
/// side is left to the caller via FEN side-to-move, which this layer does
/// not parse, so `win` maps to `WhiteWin` and `loss` to `BlackWin`).
impl From<ResultTag> for GameResult {
	fn from(tag: ResultTag) -> GameResult {
		match tag {
			ResultTag::Win => GameResult::WhiteWin,
			ResultTag::Loss => GameResult::BlackWin,
			ResultTag::Draw => GameResult::Draw,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryRequest {
	pub token: serde_json::Value,
	pub positions: Vec<PositionRequest>,
	pub levels: Vec<LevelTag>,
	pub results: Vec<ResultTag>,
	#[serde(default)]
	pub continuations: Option<FetchOptions>,
	#[serde(default)]
	pub transpositions: Option<FetchOptions>,
	#[serde(default)]
	pub all: Option<FetchOptions>,
}

impl QueryRequest {
	/// Shape validation (spec.md §6): `all` and `{continuations,
	/// transpositions}` are mutually exclusive.
	pub fn validate(&self) -> crate::error::Result<()> {
		if self.all.is_some() && (self.continuations.is_some() || self.transpositions.is_some()) {
			return Err(crate::error::Error::InvalidQuery(
				"`all` may not be combined with `continuations` or `transpositions`".to_string(),
			));
		}
		if self.positions.is_empty() {
			return Err(crate::error::Error::InvalidQuery("`positions` must not be empty".to_string()));
		}
		Ok(())
	}

	fn selects(&self) -> Vec<(Select, FetchOptions)> {
		let mut out = Vec::new();
		if let Some(opts) = &self.continuations {
			out.push((Select::Continuations, opts.with_last_game_disabled()));
		}
		if let Some(opts) = &self.transpositions {
			out.push((Select::Transpositions, opts.with_last_game_disabled()));
		}
		if let Some(opts) = &self.all {
			out.push((Select::All, opts.with_last_game_disabled()));
		}
		out
	}
}

/// Where a `PositionQuery` came from: the requested root, or a legal child
/// move expanded from it (spec.md §4.9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
	Root,
	Child,
}

/// One key to probe against every run (spec.md §4.9). `root_id` ties
/// children back to the root they expanded from, for response assembly.
#[derive(Clone, Debug)]
pub struct PositionQuery {
	pub root_id: usize,
	pub origin: Origin,
	pub san: Option<String>,
	pub position_hash: u128,
	pub reverse_move: ReverseMove,
}

/// Running aggregate for one `(select, level, result)` bucket against one
/// `PositionQuery` (spec.md §4.9 step 3). Combined via the same monoid as
/// `PackedCountAndGameOffset`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bucket {
	pub count: u64,
	pub first_game_offset: Option<u64>,
}

impl Bucket {
	pub fn accumulate(&mut self, packed: PackedCountAndGameOffset) {
		let (count, offset) = packed.unpack();
		self.count += count;
		if offset != crate::entry::INVALID_OFFSET {
			self.first_game_offset = Some(match self.first_game_offset {
				Some(existing) => existing.min(offset),
				None => offset,
			});
		}
	}
}

/// Per-query-key stats: one `Bucket` per `(select, level, result)`
/// combination actually requested.
#[derive(Clone, Debug, Default)]
pub struct PositionStats {
	pub buckets: HashMap<(Select, Level, GameResult), Bucket>,
}

impl PositionStats {
	pub fn bucket_mut(&mut self, select: Select, level: Level, result: GameResult) -> &mut Bucket {
		self.buckets.entry((select, level, result)).or_default()
	}
}

/// Expands each requested position into a root `PositionQuery`, plus one
/// child `PositionQuery` per legal move if any fetch option asked for
/// children (spec.md §4.9 "Request expansion").
pub fn expand_positions<P: Position>(
	request: &QueryRequest,
	san_parser: crate::chess::SanParser<P>,
) -> crate::error::Result<Vec<PositionQuery>> {
	let wants_children = request.selects().iter().any(|(_, opts)| opts.wants_children());
	let mut out = Vec::new();
	for (root_id, pos_req) in request.positions.iter().enumerate() {
		let mut position = P::from_fen(&pos_req.fen)?;
		let mut reverse_move = ReverseMove::null();
		if let Some(mv_str) = &pos_req.r#move {
			let mv = san_parser(&position, mv_str).ok_or_else(|| crate::error::Error::InvalidMove(mv_str.clone()))?;
			reverse_move = position.do_move(mv);
		}
		out.push(PositionQuery {
			root_id,
			origin: Origin::Root,
			san: None,
			position_hash: position.position_hash(),
			reverse_move,
		});
		if wants_children {
			for mv in position.legal_moves() {
				let san = mv.notation();
				let mut child = position.clone();
				let rmove = child.do_move(mv);
				out.push(PositionQuery {
					root_id,
					origin: Origin::Child,
					san: Some(san),
					position_hash: child.position_hash(),
					reverse_move: rmove,
				});
			}
		}
	}
	Ok(out)
}

/// Builds the key list for a set of `PositionQuery` against one `(level,
/// result)` pair, returning keys alongside a stable sort permutation
/// (spec.md §4.9 "Key sorting").
pub fn build_sorted_keys(queries: &[PositionQuery], level: Level, result: GameResult) -> (Vec<Key>, Vec<usize>) {
	let keys: Vec<Key> = queries.iter().map(|q| Key::with_metadata(q.position_hash, &q.reverse_move, level, result)).collect();
	let mut permutation: Vec<usize> = (0..keys.len()).collect();
	permutation.sort_by(|&a, &b| keys[a].cmp_without_reverse_move(&keys[b]));
	(keys, permutation)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseEntry {
	pub count: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub first_game: Option<GameHeader>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_game: Option<GameHeader>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionResult {
	pub position: String,
	#[serde(flatten)]
	pub selects: HashMap<String, HashMap<String, ResponseEntry>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResponse {
	pub token: serde_json::Value,
	pub results: Vec<PositionResult>,
}

pub(crate) fn select_wire_name(select: Select) -> &'static str {
	match select {
		Select::Continuations => "continuations",
		Select::Transpositions => "transpositions",
		Select::All => "all",
	}
}

pub(crate) fn requested_selects(request: &QueryRequest) -> Vec<(Select, FetchOptions)> {
	request.selects()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn validate_rejects_all_combined_with_continuations() {
		let request = QueryRequest {
			token: serde_json::Value::Null,
			positions: vec![PositionRequest { fen: "startpos".to_string(), r#move: None }],
			levels: vec![LevelTag::Human],
			results: vec![ResultTag::Win],
			continuations: Some(FetchOptions::default()),
			transpositions: None,
			all: Some(FetchOptions::default()),
		};
		assert!(request.validate().is_err());
	}

	#[test]
	fn validate_rejects_empty_positions() {
		let request = QueryRequest {
			token: serde_json::Value::Null,
			positions: vec![],
			levels: vec![],
			results: vec![],
			continuations: None,
			transpositions: None,
			all: Some(FetchOptions::default()),
		};
		assert!(request.validate().is_err());
	}

	#[test]
	fn select_matches_distinguish_continuation_from_transposition() {
		let rmove_a = ReverseMove { from: Some(crate::chess::Square::new(1)), ..ReverseMove::default() };
		let rmove_b = ReverseMove { from: Some(crate::chess::Square::new(2)), ..ReverseMove::default() };
		let k_query = Key::new(5, &rmove_a);
		let k_same = Key::new(5, &rmove_a);
		let k_transposed = Key::new(5, &rmove_b);

		assert!(Select::Continuations.matches(&k_same, &k_query));
		assert!(!Select::Continuations.matches(&k_transposed, &k_query));
		assert!(Select::Transpositions.matches(&k_transposed, &k_query));
		assert!(!Select::Transpositions.matches(&k_same, &k_query));
		assert!(Select::All.matches(&k_same, &k_query));
		assert!(Select::All.matches(&k_transposed, &k_query));
	}

	#[test]
	fn bucket_accumulate_tracks_minimum_offset() {
		let mut bucket = Bucket::default();
		bucket.accumulate(PackedCountAndGameOffset::pack_single(10));
		bucket.accumulate(PackedCountAndGameOffset::pack_single(3));
		assert_eq!(bucket.count, 2);
		assert_eq!(bucket.first_game_offset, Some(3));
	}

	#[derive(Clone, Copy)]
	struct MockMove {
		rmove: ReverseMove,
		hash_after: u128,
		notation: &'static str,
	}

	impl crate::chess::Move for MockMove {
		fn notation(&self) -> String {
			self.notation.to_string()
		}
	}

	#[derive(Clone)]
	struct MockPosition {
		hash: u128,
		moves: Vec<MockMove>,
	}

	impl crate::chess::Position for MockPosition {
		type Move = MockMove;

		fn position_hash(&self) -> u128 {
			self.hash
		}

		fn do_move(&mut self, mv: MockMove) -> ReverseMove {
			self.hash = mv.hash_after;
			self.moves = vec![];
			mv.rmove
		}

		fn legal_moves(&self) -> Vec<MockMove> {
			self.moves.clone()
		}

		fn from_fen(_fen: &str) -> crate::error::Result<Self> {
			let mv = MockMove {
				rmove: ReverseMove { from: Some(crate::chess::Square::new(12)), to: Some(crate::chess::Square::new(28)), ..ReverseMove::default() },
				hash_after: 99,
				notation: "e4",
			};
			Ok(MockPosition { hash: 1, moves: vec![mv] })
		}

		fn start_position() -> Self {
			MockPosition { hash: 0, moves: vec![] }
		}
	}

	fn mock_san_parser(position: &MockPosition, s: &str) -> Option<MockMove> {
		position.moves.iter().copied().find(|m| m.notation == s)
	}

	#[test]
	fn expand_positions_threads_the_root_move_s_reverse_move_into_the_root_query() {
		let request = QueryRequest {
			token: serde_json::Value::Null,
			positions: vec![PositionRequest { fen: "ignored".to_string(), r#move: Some("e4".to_string()) }],
			levels: vec![LevelTag::Human],
			results: vec![ResultTag::Win],
			continuations: Some(FetchOptions::default()),
			transpositions: None,
			all: None,
		};
		let queries = expand_positions::<MockPosition>(&request, mock_san_parser).unwrap();
		let root = queries.iter().find(|q| q.origin == Origin::Root).unwrap();

		assert_eq!(root.position_hash, 99);
		assert!(!root.reverse_move.is_null());

		// A continuation entry recorded under the true reverse-move must match;
		// without this fix the root key carried `ReverseMove::null()` and could
		// never match a real continuation entry.
		let key_query = Key::with_metadata(root.position_hash, &root.reverse_move, Level::Human, GameResult::WhiteWin);
		let key_same_rmove = Key::with_metadata(root.position_hash, &root.reverse_move, Level::Human, GameResult::WhiteWin);
		assert!(Select::Continuations.matches(&key_same_rmove, &key_query));
	}
}
