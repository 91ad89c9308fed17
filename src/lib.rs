//! Position-indexed chess game database. A collection of chess games
//! (human, engine or server play) is imported once per batch, then
//! queried by position: "how many games reached this FEN, broken down
//! by level and result, and what happened after it".
//!
//! The storage engine is a set of immutable sorted runs behind a sparse
//! index (`run`, `sparse_index`, `sort_merge`), fed through an async
//! sort-then-write pipeline (`pipeline`) and orchestrated by a single
//! `Database` (`database`) that also owns three per-level game-header
//! stores (`header`) and the JSON manifest/stats files. Chess move
//! generation and SAN parsing are external collaborators (`chess`);
//! this crate only consumes the narrow trait boundary they implement.

mod bitstream;
mod chess;
mod codec;
mod config;
mod database;
mod entry;
mod error;
mod file_io;
mod file_pool;
mod header;
mod key;
mod partition;
mod pipeline;
mod query;
mod run;
mod sort_merge;
mod sparse_index;

pub use chess::{CastlingRights, Move, ParsedGame, PieceType, Position, ReverseMove, SanParser, Square};
pub use config::Options;
pub use database::{Database, LevelStats, Stats};
pub use error::{Error, Result};
pub use header::{GameHeader, GameResultTag};
pub use key::{GameResult, Level};
pub use query::{
	FetchOptions, LevelTag, PositionRequest, PositionResult, QueryRequest, QueryResponse, ResponseEntry, ResultTag, Select,
};
pub use sort_merge::{NoProgress, Progress, ProgressSink};
