// Top-level database orchestration (spec.md §4.10): a partition plus three
// per-level header stores, a manifest, and persisted stats. Plays the same
// role parity-db's top-level `Db` plays over its `Column`s (each column =
// index + tiered value tables), generalized here to one partition plus
// three header stores instead of N columns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::chess::{ParsedGame, Position, SanParser};
use crate::config::Options;
use crate::entry::{Entry, PackedCountAndGameOffset};
use crate::error::{Error, Result};
use crate::file_pool::{DirectoryLock, FilePool};
use crate::header::{GameHeader, HeaderStore, PackedGameHeader};
use crate::key::{GameResult, Key, Level};
use crate::partition::Partition;
use crate::pipeline::Pipeline;
use crate::query::{
	expand_positions, requested_selects, select_wire_name, Bucket, Origin, PositionQuery, PositionResult, PositionStats, QueryRequest,
	QueryResponse, ResponseEntry,
};
use crate::sort_merge::ProgressSink;

const MANIFEST_SCHEMA: &str = "posdb";
const MANIFEST_VERSION: &str = env!("CARGO_PKG_VERSION");

fn current_endianness() -> &'static str {
	if cfg!(target_endian = "little") {
		"little"
	} else {
		"big"
	}
}

/// JSON-persisted open-time identity check (spec.md §6 "Manifest file").
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Manifest {
	schema: String,
	version: String,
	endianness: String,
}

impl Manifest {
	fn current() -> Manifest {
		Manifest { schema: MANIFEST_SCHEMA.to_string(), version: MANIFEST_VERSION.to_string(), endianness: current_endianness().to_string() }
	}

	fn validate(&self) -> Result<()> {
		if self.schema != MANIFEST_SCHEMA {
			return Err(Error::SchemaMismatch { expected: MANIFEST_SCHEMA.to_string(), found: self.schema.clone() });
		}
		if self.version != MANIFEST_VERSION {
			return Err(Error::VersionMismatch { expected: MANIFEST_VERSION.to_string(), found: self.version.clone() });
		}
		if self.endianness != current_endianness() {
			return Err(Error::EndiannessMismatch { found: current_endianness() });
		}
		Ok(())
	}
}

/// Running totals for one level (spec.md §4.10/§6 "Stats file").
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LevelStats {
	pub num_games: u64,
	pub num_positions: u64,
	pub skipped_games: u64,
}

/// Persisted on every flush (spec.md §6).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Stats {
	pub human: LevelStats,
	pub engine: LevelStats,
	pub server: LevelStats,
}

impl Stats {
	fn level_mut(&mut self, level: Level) -> &mut LevelStats {
		match level {
			Level::Human => &mut self.human,
			Level::Engine => &mut self.engine,
			Level::Server => &mut self.server,
		}
	}

	fn level(&self, level: Level) -> LevelStats {
		match level {
			Level::Human => self.human,
			Level::Engine => self.engine,
			Level::Server => self.server,
		}
	}
}

fn level_suffix(level: Level) -> &'static str {
	match level {
		Level::Human => "0",
		Level::Engine => "1",
		Level::Server => "2",
	}
}

fn manifest_path(dir: &Path) -> PathBuf {
	dir.join("manifest")
}

fn stats_path(dir: &Path) -> PathBuf {
	dir.join("stats")
}

/// One header store per `Level`, index-aligned with `Level::ALL`.
struct HeaderStores([HeaderStore; 3]);

impl HeaderStores {
	fn get(&self, level: Level) -> &HeaderStore {
		&self.0[level.ordinal() as usize]
	}

	fn get_mut(&mut self, level: Level) -> &mut HeaderStore {
		&mut self.0[level.ordinal() as usize]
	}
}

/// Position-indexed chess game database (spec.md §4.10): orchestrates a
/// `Partition` of sorted runs plus three per-level `HeaderStore`s.
pub struct Database {
	options: Options,
	pool: Arc<FilePool>,
	_lock: DirectoryLock,
	partition: Partition,
	headers: Mutex<HeaderStores>,
	stats: Mutex<Stats>,
}

impl Database {
	/// Opens (or initializes) a database at `options.path`: acquires the
	/// directory lock, validates or writes the manifest, opens the
	/// partition and the three header stores, and loads persisted stats
	/// (spec.md §4.10/§6).
	pub fn open(options: Options) -> Result<Database> {
		log::info!(target: "posdb", "opening database at {}", options.path.display());
		std::fs::create_dir_all(&options.path)?;
		let lock = DirectoryLock::acquire(&options.path)?;
		let pool = Arc::new(FilePool::new(options.file_pool_capacity));

		let manifest_path = manifest_path(&options.path);
		if manifest_path.exists() {
			let bytes = std::fs::read(&manifest_path)?;
			let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| Error::InvalidManifest(e.to_string()))?;
			manifest.validate()?;
		} else {
			let bytes = serde_json::to_vec_pretty(&Manifest::current()).map_err(|e| Error::InvalidManifest(e.to_string()))?;
			std::fs::write(&manifest_path, bytes)?;
		}

		let partition = Partition::open(pool.clone(), &options.path, options.index_granularity)?;
		let headers = HeaderStores([
			HeaderStore::open(&pool, &options.path, level_suffix(Level::Human))?,
			HeaderStore::open(&pool, &options.path, level_suffix(Level::Engine))?,
			HeaderStore::open(&pool, &options.path, level_suffix(Level::Server))?,
		]);

		let stats_path = stats_path(&options.path);
		let stats = if stats_path.exists() {
			let bytes = std::fs::read(&stats_path)?;
			serde_json::from_slice(&bytes).unwrap_or_default()
		} else {
			Stats::default()
		};

		Ok(Database { options, pool, _lock: lock, partition, headers: Mutex::new(headers), stats: Mutex::new(stats) })
	}

	pub fn stats(&self) -> Stats {
		*self.stats.lock()
	}

	/// Imports every game from `games`, tagging each with `level` (spec.md
	/// §4.10 `import`). `games` plays the role of one already-tokenized
	/// input file's worth of parsed games; call once per input file.
	pub fn import<P: Position>(&self, level: Level, games: &[ParsedGame], san_parser: SanParser<P>, mut progress: impl FnMut(u64, u64)) -> Result<()> {
		log::info!(target: "posdb", "importing {} games at level {:?}", games.len(), level);
		let sort_workers = self.options.resolved_sort_workers();
		// Pipeline slack: one buffer per sort worker in flight, one being
		// filled by the write worker, one being filled by this producer
		// (spec.md §4.10 step 1's "num_batches + pipeline_slack" divisor).
		let pipeline_slack = sort_workers + 2;
		let batch_capacity = (self.options.memory_budget / (pipeline_slack * crate::entry::ENTRY_SIZE)).max(1);

		let pipeline = Pipeline::launch(self.pool.clone(), self.options.path.clone(), sort_workers, self.options.index_granularity, pipeline_slack, batch_capacity);

		let mut buffer = pipeline.buffers.acquire();
		let total = games.len() as u64;
		let mut level_stats = LevelStats::default();

		for (done, game) in games.iter().enumerate() {
			let result = match game.result {
				Some(r) => r,
				None => {
					level_stats.skipped_games += 1;
					progress(done as u64 + 1, total);
					continue;
				}
			};

			// `ply` reflects the tokenized move count, known up front; if the
			// SAN walk below stops early on a parse failure the realized
			// position trail may be shorter than this.
			let ply = u16::try_from(game.sans.len()).ok();
			let game_offset = {
				let mut headers = self.headers.lock();
				let game_index = headers.get(level).game_count();
				let header = PackedGameHeader::pack(game_index, result, game.date, game.eco, ply, &game.event, &game.white, &game.black)?;
				headers.get_mut(level).append(&header)?
			};

			let mut position = match &game.starting_fen {
				Some(fen) => P::from_fen(fen)?,
				None => P::start_position(),
			};
			buffer.push(make_entry(position.position_hash(), &crate::chess::ReverseMove::null(), level, result, game_offset));
			let mut num_positions = 1u64;

			for san in &game.sans {
				let mv = match san_parser(&position, san) {
					Some(mv) => mv,
					None => break,
				};
				let reverse_move = position.do_move(mv);
				buffer.push(make_entry(position.position_hash(), &reverse_move, level, result, game_offset));
				num_positions += 1;
			}

			level_stats.num_games += 1;
			level_stats.num_positions += num_positions;

			if buffer.len() >= batch_capacity {
				let full = std::mem::replace(&mut buffer, pipeline.buffers.acquire());
				self.partition.store_unordered(&pipeline, full, None);
			}
			progress(done as u64 + 1, total);
		}

		if !buffer.is_empty() {
			self.partition.store_unordered(&pipeline, buffer, None);
		}

		pipeline.wait_for_completion()?;
		self.partition.collect_future_files()?;

		{
			let mut stats = self.stats.lock();
			let entry = stats.level_mut(level);
			entry.num_games += level_stats.num_games;
			entry.num_positions += level_stats.num_positions;
			entry.skipped_games += level_stats.skipped_games;
		}
		self.persist_stats()?;
		log::info!(target: "posdb", "imported {} games, {} positions, {} skipped", level_stats.num_games, level_stats.num_positions, level_stats.skipped_games);
		Ok(())
	}

	/// Delegates to the partition (spec.md §4.10 `merge_all`).
	pub fn merge_all(&self, progress: &mut dyn ProgressSink) -> Result<()> {
		self.partition.merge_all(progress)
	}

	/// Runs the algorithm of spec.md §4.9: expand requested positions, sort
	/// keys per `(level, result)`, dispatch to the partition, then resolve
	/// headers for whichever entries requested them.
	pub fn execute_query<P: Position>(&self, request: &QueryRequest, san_parser: SanParser<P>) -> Result<QueryResponse> {
		request.validate()?;
		log::debug!(target: "posdb", "executing query over {} positions", request.positions.len());
		let queries = expand_positions::<P>(request, san_parser)?;
		let select_opts = requested_selects(request);

		let mut stats: Vec<PositionStats> = vec![PositionStats::default(); queries.len()];
		for level_tag in &request.levels {
			let level: Level = level_tag.clone().into();
			for result_tag in &request.results {
				let result: GameResult = result_tag.clone().into();
				self.dispatch_one_level_result(&queries, level, result, &select_opts, &mut stats)?;
			}
		}

		self.assemble_response(request, &queries, &select_opts, &stats)
	}

	fn dispatch_one_level_result(
		&self,
		queries: &[PositionQuery],
		level: Level,
		result: GameResult,
		select_opts: &[(crate::query::Select, crate::query::FetchOptions)],
		stats: &mut [PositionStats],
	) -> Result<()> {
		let (keys, permutation) = crate::query::build_sorted_keys(queries, level, result);
		let sorted_keys: Vec<Key> = permutation.iter().map(|&i| keys[i]).collect();
		let mut sorted_stats = vec![PositionStats::default(); sorted_keys.len()];
		let selects: Vec<_> = select_opts.iter().map(|(s, _)| *s).collect();

		self.partition.execute_query(&sorted_keys, level, result, &selects, &mut sorted_stats)?;

		for (slot, &original_index) in sorted_stats.into_iter().zip(permutation.iter()) {
			for (key, bucket) in slot.buckets {
				stats[original_index].buckets.entry(key).and_modify(|b| merge_bucket(b, bucket)).or_insert(bucket);
			}
		}
		Ok(())
	}

	/// Assembles the response, summing over whichever `(level, result)` pairs
	/// were actually dispatched — `stats` only ever holds buckets for
	/// requested pairs, so no re-filtering against `request.levels`/
	/// `request.results` is needed here.
	fn assemble_response(
		&self,
		request: &QueryRequest,
		queries: &[PositionQuery],
		select_opts: &[(crate::query::Select, crate::query::FetchOptions)],
		stats: &[PositionStats],
	) -> Result<QueryResponse> {
		let mut results = Vec::with_capacity(request.positions.len());
		for root_id in 0..request.positions.len() {
			let mut selects = std::collections::HashMap::new();
			for (select, opts) in select_opts {
				let mut entries: std::collections::HashMap<String, ResponseEntry> = std::collections::HashMap::new();
				for (query_index, query) in queries.iter().enumerate() {
					if query.root_id != root_id {
						continue;
					}
					let san_key = match query.origin {
						Origin::Root => "--".to_string(),
						Origin::Child => query.san.clone().unwrap_or_default(),
					};
					let wants_first_game = match query.origin {
						Origin::Root => opts.fetch_first_game,
						Origin::Child => opts.fetch_first_game_for_each_child,
					};
					for (&(bucket_select, level, _result), bucket) in &stats[query_index].buckets {
						if bucket_select != *select || bucket.count == 0 {
							continue;
						}
						let first_game = if wants_first_game { self.resolve_header(level, bucket.first_game_offset)? } else { None };
						let entry = entries.entry(san_key.clone()).or_insert(ResponseEntry { count: 0, first_game: None, last_game: None });
						entry.count += bucket.count;
						if entry.first_game.is_none() {
							entry.first_game = first_game;
						}
					}
				}
				selects.insert(select_wire_name(*select).to_string(), entries);
			}
			results.push(PositionResult { position: request.positions[root_id].fen.clone(), selects });
		}
		Ok(QueryResponse { token: request.token.clone(), results })
	}

	fn resolve_header(&self, level: Level, offset: Option<u64>) -> Result<Option<GameHeader>> {
		match offset {
			Some(offset) if offset != crate::entry::INVALID_OFFSET => {
				let headers = self.headers.lock();
				Ok(Some(headers.get(level).read_at_offset(offset)?.to_game_header()))
			}
			_ => Ok(None),
		}
	}

	/// Empties the partition and every header store (spec.md §4.10 `clear`).
	pub fn clear(&self) -> Result<()> {
		log::warn!(target: "posdb", "clearing database at {}", self.options.path.display());
		self.partition.clear()?;
		let mut headers = self.headers.lock();
		for level in Level::ALL {
			headers.get_mut(level).clear()?;
		}
		*self.stats.lock() = Stats::default();
		self.persist_stats()?;
		Ok(())
	}

	/// Flushes every open file (spec.md §4.10 `flush`).
	pub fn flush(&self) -> Result<()> {
		let headers = self.headers.lock();
		for level in Level::ALL {
			headers.get(level).flush()?;
		}
		self.persist_stats()
	}

	fn persist_stats(&self) -> Result<()> {
		let stats = *self.stats.lock();
		let bytes = serde_json::to_vec_pretty(&stats).map_err(|e| Error::Internal(e.to_string()))?;
		std::fs::write(stats_path(&self.options.path), bytes)?;
		Ok(())
	}
}

fn merge_bucket(into: &mut Bucket, other: Bucket) {
	into.count += other.count;
	into.first_game_offset = match (into.first_game_offset, other.first_game_offset) {
		(Some(a), Some(b)) => Some(a.min(b)),
		(Some(a), None) => Some(a),
		(None, b) => b,
	};
}

fn make_entry(position_hash: u128, reverse_move: &crate::chess::ReverseMove, level: Level, result: GameResult, game_offset: u64) -> Entry {
	let key = Key::with_metadata(position_hash, reverse_move, level, result);
	Entry::new(key, PackedCountAndGameOffset::pack_single(game_offset))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn manifest_rejects_schema_mismatch() {
		let manifest = Manifest { schema: "other".to_string(), version: MANIFEST_VERSION.to_string(), endianness: current_endianness().to_string() };
		assert!(manifest.validate().is_err());
	}

	#[test]
	fn manifest_accepts_current_build() {
		assert!(Manifest::current().validate().is_ok());
	}

	#[test]
	fn level_stats_round_trip_through_stats_accessor() {
		let mut stats = Stats::default();
		stats.level_mut(Level::Engine).num_games = 3;
		assert_eq!(stats.level(Level::Engine).num_games, 3);
		assert_eq!(stats.level(Level::Human).num_games, 0);
	}
}
