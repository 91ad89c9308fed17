// Per-level game metadata store: an append-only blob of variable-sized
// packed records plus a dense offset index, mirroring parity-db's
// `ValueTable` (data file) paired with its index table. Fixed-record
// packing/unpacking style (explicit byte offsets, length-prefixed strings)
// follows `Disservin-binpack-rust`'s `PackedTrainingDataEntry`.

use crate::error::{Error, Result};
use crate::file_pool::{FilePool, PooledFile};
use crate::key::GameResult;
use std::path::Path;

/// Maximum bytes any one of event/white/black may occupy (spec.md §3).
const MAX_STRING_LEN: usize = 255;
/// Fixed capacity of a `PackedGameHeader` buffer: an 8-byte game index, a
/// 2-byte total-size field, 1-byte result, 4-byte date (year:u16, month,
/// day), 3-byte ECO, 2-byte ply, then three length-prefixed strings capped
/// at 255 bytes each (spec.md §3's "784 or 792 bytes depending on 32/64-bit
/// game index" — this build uses a 64-bit game index).
pub const PACKED_GAME_HEADER_CAPACITY: usize = 8 + 2 + 1 + 4 + 3 + 2 + 3 * (1 + MAX_STRING_LEN);

const PLY_UNKNOWN: u16 = 0xFFFF;

/// Public, owned representation of a game header, returned from queries
/// (spec.md §6 response shape).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GameHeader {
	pub game_index: u64,
	pub result: GameResultTag,
	pub date: Option<(u16, u8, u8)>,
	pub eco: Option<[u8; 3]>,
	pub ply: Option<u16>,
	pub event: String,
	pub white: String,
	pub black: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameResultTag {
	WhiteWin,
	BlackWin,
	Draw,
}

impl From<GameResult> for GameResultTag {
	fn from(r: GameResult) -> GameResultTag {
		match r {
			GameResult::WhiteWin => GameResultTag::WhiteWin,
			GameResult::BlackWin => GameResultTag::BlackWin,
			GameResult::Draw => GameResultTag::Draw,
		}
	}
}

/// A single game's header, packed into a variable-length buffer bounded by
/// `PACKED_GAME_HEADER_CAPACITY` (spec.md §3/§6). Only `total_size()` bytes
/// of the buffer are meaningful; the rest is never written to disk.
#[derive(Clone, Debug)]
pub struct PackedGameHeader {
	buf: Vec<u8>,
}

impl PackedGameHeader {
	pub fn pack(
		game_index: u64,
		result: GameResult,
		date: Option<(u16, u8, u8)>,
		eco: Option<[u8; 3]>,
		ply: Option<u16>,
		event: &str,
		white: &str,
		black: &str,
	) -> Result<PackedGameHeader> {
		for (name, s) in [("event", event), ("white", white), ("black", black)] {
			if s.len() > MAX_STRING_LEN {
				return Err(Error::Internal(format!("{name} exceeds {MAX_STRING_LEN} bytes")));
			}
		}
		let mut buf = Vec::with_capacity(PACKED_GAME_HEADER_CAPACITY);
		buf.extend_from_slice(&game_index.to_le_bytes());
		buf.extend_from_slice(&[0u8; 2]); // total_size placeholder, patched below
		buf.push(match result {
			GameResult::WhiteWin => 0,
			GameResult::BlackWin => 1,
			GameResult::Draw => 2,
		});
		match date {
			Some((y, m, d)) => {
				buf.extend_from_slice(&y.to_le_bytes());
				buf.push(m);
				buf.push(d);
			}
			None => {
				buf.extend_from_slice(&0xFFFFu16.to_le_bytes());
				buf.push(0);
				buf.push(0);
			}
		}
		buf.extend_from_slice(&eco.unwrap_or([0xFF, 0xFF, 0xFF]));
		buf.extend_from_slice(&ply.unwrap_or(PLY_UNKNOWN).to_le_bytes());
		for s in [event, white, black] {
			buf.push(s.len() as u8);
			buf.extend_from_slice(s.as_bytes());
		}
		let total_size = buf.len() as u16;
		buf[8..10].copy_from_slice(&total_size.to_le_bytes());
		Ok(PackedGameHeader { buf })
	}

	pub fn total_size(&self) -> usize {
		u16::from_le_bytes(self.buf[8..10].try_into().unwrap()) as usize
	}

	pub fn game_index(&self) -> u64 {
		u64::from_le_bytes(self.buf[0..8].try_into().unwrap())
	}

	pub fn to_bytes(&self) -> &[u8] {
		&self.buf
	}

	pub fn from_bytes(bytes: Vec<u8>) -> PackedGameHeader {
		PackedGameHeader { buf: bytes }
	}

	pub fn to_game_header(&self) -> GameHeader {
		let game_index = self.game_index();
		let result = match self.buf[10] {
			0 => GameResultTag::WhiteWin,
			1 => GameResultTag::BlackWin,
			_ => GameResultTag::Draw,
		};
		let year = u16::from_le_bytes(self.buf[11..13].try_into().unwrap());
		let date = if year == 0xFFFF { None } else { Some((year, self.buf[13], self.buf[14])) };
		let eco_bytes: [u8; 3] = self.buf[15..18].try_into().unwrap();
		let eco = if eco_bytes == [0xFF, 0xFF, 0xFF] { None } else { Some(eco_bytes) };
		let ply_raw = u16::from_le_bytes(self.buf[18..20].try_into().unwrap());
		let ply = if ply_raw == PLY_UNKNOWN { None } else { Some(ply_raw) };

		let mut offset = 20;
		let mut read_string = |buf: &[u8]| -> String {
			let len = buf[offset] as usize;
			offset += 1;
			let s = String::from_utf8_lossy(&buf[offset..offset + len]).into_owned();
			offset += len;
			s
		};
		let event = read_string(&self.buf);
		let white = read_string(&self.buf);
		let black = read_string(&self.buf);

		GameHeader { game_index, result, date, eco, ply, event, white, black }
	}
}

/// Append-only metadata store for one `Level`: a header blob plus a dense
/// offset index (spec.md §3/§6).
pub struct HeaderStore {
	blob: PooledFile,
	index: PooledFile,
	blob_len: u64,
	game_count: u64,
}

impl HeaderStore {
	pub fn open(pool: &FilePool, dir: &Path, suffix: &str) -> Result<HeaderStore> {
		let blob = pool.open(&dir.join(format!("header{suffix}")))?;
		let index = pool.open(&dir.join(format!("index{suffix}")))?;
		let blob_len = blob.len()?;
		let index_len = index.len()?;
		if index_len % 8 != 0 {
			return Err(Error::ShortRead { expected: 8, got: (index_len % 8) as usize });
		}
		Ok(HeaderStore { blob, index, blob_len, game_count: index_len / 8 })
	}

	pub fn game_count(&self) -> u64 {
		self.game_count
	}

	/// Appends `header` to the blob, records its offset, and returns the
	/// offset it was written at (embedded into every entry for that game).
	pub fn append(&mut self, header: &PackedGameHeader) -> Result<u64> {
		let offset = self.blob_len;
		self.blob.write_at(header.to_bytes(), offset)?;
		self.index.write_at(&offset.to_le_bytes(), self.game_count * 8)?;
		self.blob_len += header.to_bytes().len() as u64;
		self.game_count += 1;
		Ok(offset)
	}

	/// Lookup by game index (spec.md §6): a random-access read of the index
	/// array, then a read at the resolved offset.
	pub fn read_by_game_index(&self, game_index: u64) -> Result<PackedGameHeader> {
		if game_index >= self.game_count {
			return Err(Error::Internal(format!("game index {game_index} out of range (have {})", self.game_count)));
		}
		let mut offset_buf = [0u8; 8];
		self.index.read_at(&mut offset_buf, game_index * 8)?;
		let offset = u64::from_le_bytes(offset_buf);
		self.read_at_offset(offset)
	}

	/// Lookup by raw byte offset (spec.md §6): the offset embedded in an
	/// `Entry`'s `game_offset`.
	pub fn read_at_offset(&self, offset: u64) -> Result<PackedGameHeader> {
		let mut size_buf = [0u8; 2];
		self.blob.read_at(&mut size_buf, offset + 8)?;
		let total_size = u16::from_le_bytes(size_buf) as usize;
		let mut buf = vec![0u8; total_size];
		self.blob.read_at(&mut buf, offset)?;
		Ok(PackedGameHeader::from_bytes(buf))
	}

	pub fn clear(&mut self) -> Result<()> {
		self.blob.set_len(0)?;
		self.index.set_len(0)?;
		self.blob_len = 0;
		self.game_count = 0;
		Ok(())
	}

	pub fn flush(&self) -> Result<()> {
		self.blob.sync_all()?;
		self.index.sync_all()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::file_pool::FilePool;
	use tempfile::tempdir;

	#[test]
	fn pack_and_unpack_round_trips_all_fields() {
		let header = PackedGameHeader::pack(
			7,
			GameResult::BlackWin,
			Some((2024, 3, 15)),
			Some([b'B', b'1', b'2']),
			Some(64),
			"World Championship",
			"Carlsen, Magnus",
			"Caruana, Fabiano",
		)
		.unwrap();
		let parsed = header.to_game_header();
		assert_eq!(parsed.game_index, 7);
		assert_eq!(parsed.result, GameResultTag::BlackWin);
		assert_eq!(parsed.date, Some((2024, 3, 15)));
		assert_eq!(parsed.eco, Some([b'B', b'1', b'2']));
		assert_eq!(parsed.ply, Some(64));
		assert_eq!(parsed.event, "World Championship");
		assert_eq!(parsed.white, "Carlsen, Magnus");
		assert_eq!(parsed.black, "Caruana, Fabiano");
	}

	#[test]
	fn unknown_date_eco_ply_round_trip_as_none() {
		let header = PackedGameHeader::pack(0, GameResult::Draw, None, None, None, "", "", "").unwrap();
		let parsed = header.to_game_header();
		assert_eq!(parsed.date, None);
		assert_eq!(parsed.eco, None);
		assert_eq!(parsed.ply, None);
	}

	#[test]
	fn store_append_and_lookup_by_index_and_offset() {
		let dir = tempdir().unwrap();
		let pool = FilePool::new(8);
		let mut store = HeaderStore::open(&pool, dir.path(), "0").unwrap();

		let h0 = PackedGameHeader::pack(0, GameResult::WhiteWin, None, None, None, "E1", "W1", "B1").unwrap();
		let h1 = PackedGameHeader::pack(1, GameResult::Draw, None, None, None, "E2", "W2", "B2").unwrap();
		let off0 = store.append(&h0).unwrap();
		let off1 = store.append(&h1).unwrap();
		assert_eq!(store.game_count(), 2);

		let by_index = store.read_by_game_index(1).unwrap();
		assert_eq!(by_index.to_game_header().event, "E2");

		let by_offset = store.read_at_offset(off1).unwrap();
		assert_eq!(by_offset.to_game_header().white, "W2");
		assert_ne!(off0, off1);
	}
}
