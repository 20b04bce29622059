use std::{
	fmt,
	path::{Path, PathBuf},
};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
	/// The operations a single [`Event`] reports. One kernel record may set several bits.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
	pub struct Op: u8 {
		/// A new path was created. Renaming a path into a watched directory also reports
		/// `CREATE` for the new name.
		const CREATE = 1 << 0;
		/// A file was written to or truncated.
		const WRITE  = 1 << 1;
		/// A path was removed, including the watched directory itself.
		const REMOVE = 1 << 2;
		/// A path was renamed. Reported for the old name, or for the new name of an
		/// explicitly watched entry that moved.
		const RENAME = 1 << 3;
		/// Attributes changed. Directory-change buffers report attribute changes as writes,
		/// so this backend never sets it.
		const CHMOD  = 1 << 4;
	}
}

impl fmt::Display for Op {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		const NAMES: [(Op, &str); 5] = [
			(Op::CREATE, "CREATE"),
			(Op::REMOVE, "REMOVE"),
			(Op::WRITE, "WRITE"),
			(Op::RENAME, "RENAME"),
			(Op::CHMOD, "CHMOD"),
		];

		let mut first = true;
		for (op, name) in NAMES {
			if self.contains(op) {
				if !first {
					f.write_str("|")?;
				}
				f.write_str(name)?;
				first = false;
			}
		}

		if first {
			f.write_str("[no events]")?;
		}

		Ok(())
	}
}

/// A filesystem change delivered on [`Watcher::events`](crate::Watcher::events).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
	pub path: PathBuf,
	pub op: Op,
}

impl Event {
	#[must_use]
	pub fn new(path: impl Into<PathBuf>, op: Op) -> Self {
		Self {
			path: path.into(),
			op,
		}
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	#[must_use]
	pub const fn has(&self, op: Op) -> bool {
		self.op.contains(op)
	}

	#[must_use]
	pub const fn is_create(&self) -> bool {
		self.has(Op::CREATE)
	}

	#[must_use]
	pub const fn is_write(&self) -> bool {
		self.has(Op::WRITE)
	}

	#[must_use]
	pub const fn is_remove(&self) -> bool {
		self.has(Op::REMOVE)
	}

	#[must_use]
	pub const fn is_rename(&self) -> bool {
		self.has(Op::RENAME)
	}

	#[must_use]
	pub const fn is_chmod(&self) -> bool {
		self.has(Op::CHMOD)
	}
}

impl fmt::Display for Event {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:<13} {:?}", self.op.to_string(), self.path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn op_display_joins_set_bits() {
		assert_eq!((Op::CREATE | Op::WRITE).to_string(), "CREATE|WRITE");
		assert_eq!(Op::RENAME.to_string(), "RENAME");
		assert_eq!(Op::empty().to_string(), "[no events]");
	}

	#[test]
	fn event_helpers_follow_op_bits() {
		let event = Event::new("/watched/file.txt", Op::CREATE | Op::WRITE);

		assert!(event.is_create());
		assert!(event.is_write());
		assert!(!event.is_remove());
		assert!(!event.is_rename());
		assert!(!event.is_chmod());
		assert_eq!(event.path(), Path::new("/watched/file.txt"));
	}

	#[test]
	fn event_serializes_op_as_flags() {
		let event = Event::new("/watched/file.txt", Op::REMOVE);
		let json = serde_json::to_string(&event).unwrap();

		assert_eq!(json, r#"{"path":"/watched/file.txt","op":"REMOVE"}"#);
		assert_eq!(serde_json::from_str::<Event>(&json).unwrap(), event);
	}
}
