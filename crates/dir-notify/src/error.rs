use std::{io, path::Path};

use thiserror::Error;

/// Smallest buffer the kernel is guaranteed to fill with at least one record.
pub const MIN_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum Error {
	#[error("path not found: <path='{}'>", .0.display())]
	NotFound(Box<Path>),
	#[error("access denied: <path='{}'>", .0.display())]
	AccessDenied(Box<Path>),
	#[error("can't remove non-existent watch: <path='{}'>", .0.display())]
	NoSuchWatch(Box<Path>),
	#[error("watcher already closed")]
	AlreadyClosed,
	#[error("event queue overflow, the kernel buffer filled before it was drained")]
	EventOverflow,
	#[error("corrupted notification buffer: record at offset {offset} runs past {filled} filled bytes")]
	Corrupted { offset: usize, filled: usize },
	#[error("{operation} failed: {source}")]
	SystemCall {
		operation: &'static str,
		#[source]
		source: io::Error,
	},
	#[error("buffer size cannot be smaller than {minimum} bytes, got {requested}")]
	BufferTooSmall { requested: usize, minimum: usize },
	#[error("invalid watcher configuration: {0}")]
	InvalidConfig(&'static str),
	#[error("event loop exited before replying")]
	EventLoopGone,
}

impl Error {
	pub(crate) fn system_call(operation: &'static str, source: io::Error) -> Self {
		Self::SystemCall { operation, source }
	}

	/// Maps a failed kernel call on `path` to the matching error kind.
	pub(crate) fn from_io(operation: &'static str, path: &Path, source: io::Error) -> Self {
		match source.kind() {
			io::ErrorKind::NotFound => Self::NotFound(path.into()),
			io::ErrorKind::PermissionDenied => Self::AccessDenied(path.into()),
			_ => Self::system_call(operation, source),
		}
	}

	#[must_use]
	pub const fn is_overflow(&self) -> bool {
		matches!(self, Self::EventOverflow)
	}
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use super::*;

	#[test]
	fn io_errors_map_to_path_kinds() {
		let path = PathBuf::from("/watched/dir");

		assert!(matches!(
			Error::from_io("CreateFileW", &path, io::Error::from(io::ErrorKind::NotFound)),
			Error::NotFound(p) if *p == *path
		));
		assert!(matches!(
			Error::from_io(
				"CreateFileW",
				&path,
				io::Error::from(io::ErrorKind::PermissionDenied)
			),
			Error::AccessDenied(_)
		));
		assert!(matches!(
			Error::from_io("CreateFileW", &path, io::Error::other("boom")),
			Error::SystemCall {
				operation: "CreateFileW",
				..
			}
		));
	}

	#[test]
	fn system_call_names_the_operation() {
		let err = Error::system_call("CancelIo", io::Error::other("handle is invalid"));
		assert_eq!(err.to_string(), "CancelIo failed: handle is invalid");
	}
}
