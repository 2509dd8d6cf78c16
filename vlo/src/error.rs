use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VloError {
	#[error("Alignment bytes at {offset:#X} are not zero")]
	Alignment {
		offset: u32,
	},
	#[error("Malformed {0}")]
	Corrupt(&'static str),
	#[error("Invalid input: {0}")]
	InvalidInput(String),
	#[error("Invariant violated: {0}")]
	Invariant(String),
	#[error("I/O error")]
	IO {
		#[from]
		source: io::Error,
	},
	#[error("Not a VLO archive: {0:02X?}")]
	Signature([u8; 4]),
	#[error("Structural mismatch reading {what}: expected offset {expected:#X}, found {found:#X}")]
	Structure {
		what: &'static str,
		expected: u32,
		found: u32,
	},
}
