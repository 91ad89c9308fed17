use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("short read: expected {expected} elements, got {got}")]
	ShortRead { expected: usize, got: usize },
	#[error("short write: expected {expected} bytes, wrote {got}")]
	ShortWrite { expected: usize, got: usize },
	#[error("schema mismatch: expected {expected}, found {found}")]
	SchemaMismatch { expected: String, found: String },
	#[error("version mismatch: expected {expected}, found {found}")]
	VersionMismatch { expected: String, found: String },
	#[error("endianness mismatch: database was created on a {found} machine")]
	EndiannessMismatch { found: &'static str },
	#[error("invalid manifest: {0}")]
	InvalidManifest(String),
	#[error("invalid FEN: {0}")]
	InvalidFen(String),
	#[error("invalid SAN: {0}")]
	InvalidSan(String),
	#[error("invalid move: {0}")]
	InvalidMove(String),
	#[error("invalid query: {0}")]
	InvalidQuery(String),
	#[error("internal invariant violated: {0}")]
	Internal(String),
}

impl Error {
	pub fn short_read(expected: usize, got: usize) -> Error {
		Error::ShortRead { expected, got }
	}

	pub fn short_write(expected: usize, got: usize) -> Error {
		Error::ShortWrite { expected, got }
	}

	pub fn internal(msg: impl Into<String>) -> Error {
		Error::Internal(msg.into())
	}
}

// Small helper used in tests and debug logging, mirrors the teacher's
// `display::hex` utility.
pub fn display_bytes(bytes: &[u8]) -> impl fmt::Display + '_ {
	struct Hex<'a>(&'a [u8]);
	impl<'a> fmt::Display for Hex<'a> {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			for b in self.0 {
				write!(f, "{:02x}", b)?;
			}
			Ok(())
		}
	}
	Hex(bytes)
}
