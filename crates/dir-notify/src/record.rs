//! Cursor over the notification records the kernel writes into a change buffer.
//!
//! Each record is laid out as:
//!
//! ```text
//! u32 next_entry_offset | u32 action | u32 name_length_in_bytes | u16 name[..]
//! ```
//!
//! all little-endian, with a next offset of zero marking the last record. Nothing the kernel
//! reports is trusted: every header and name is checked against the filled length first.

use std::ffi::OsString;

use crate::error::Error;

const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
	Added,
	Removed,
	Modified,
	RenamedOldName,
	RenamedNewName,
	Other(u32),
}

impl From<u32> for Action {
	fn from(code: u32) -> Self {
		match code {
			1 => Self::Added,
			2 => Self::Removed,
			3 => Self::Modified,
			4 => Self::RenamedOldName,
			5 => Self::RenamedNewName,
			other => Self::Other(other),
		}
	}
}

impl From<Action> for u32 {
	fn from(action: Action) -> Self {
		match action {
			Action::Added => 1,
			Action::Removed => 2,
			Action::Modified => 3,
			Action::RenamedOldName => 4,
			Action::RenamedNewName => 5,
			Action::Other(code) => code,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
	pub action: Action,
	/// Entry name relative to the watched directory.
	pub name: OsString,
}

/// Yields every record in `buffer[..filled]`, then stops. A malformed buffer yields a single
/// error and nothing after it.
pub(crate) struct Records<'buf> {
	buffer: &'buf [u8],
	filled: usize,
	offset: usize,
	done: bool,
}

impl<'buf> Records<'buf> {
	pub(crate) fn new(buffer: &'buf [u8], reported: usize) -> Self {
		Self {
			buffer,
			filled: reported.min(buffer.len()),
			offset: 0,
			done: false,
		}
	}

	fn corrupted(&mut self) -> Error {
		self.done = true;
		Error::Corrupted {
			offset: self.offset,
			filled: self.filled,
		}
	}

	fn read_u32(&self, at: usize) -> u32 {
		let mut bytes = [0; 4];
		bytes.copy_from_slice(&self.buffer[at..at + 4]);
		u32::from_le_bytes(bytes)
	}
}

impl Iterator for Records<'_> {
	type Item = Result<Record, Error>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done {
			return None;
		}

		if self.filled == 0 {
			self.done = true;
			return Some(Err(Error::EventOverflow));
		}

		let header_end = self.offset.saturating_add(HEADER_LEN);
		if header_end > self.filled {
			return Some(Err(self.corrupted()));
		}

		let next_offset = self.read_u32(self.offset) as usize;
		let action = Action::from(self.read_u32(self.offset + 4));
		let name_len = self.read_u32(self.offset + 8) as usize;

		let name_end = header_end.saturating_add(name_len);
		if name_len % 2 != 0 || name_end > self.filled {
			return Some(Err(self.corrupted()));
		}

		let name = decode_name(&self.buffer[header_end..name_end]);

		if next_offset == 0 {
			self.done = true;
		} else {
			// An offset past the filled length surfaces as corruption on the next call.
			self.offset = self.offset.saturating_add(next_offset);
		}

		Some(Ok(Record { action, name }))
	}
}

fn decode_name(bytes: &[u8]) -> OsString {
	let units = bytes
		.chunks_exact(2)
		.map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
		.collect::<Vec<_>>();

	#[cfg(windows)]
	{
		use std::os::windows::ffi::OsStringExt;
		OsString::from_wide(&units)
	}

	#[cfg(not(windows))]
	{
		OsString::from(String::from_utf16_lossy(&units))
	}
}

/// Lays `records` out the way the kernel does, each one padded to a 4 byte boundary.
#[cfg(test)]
pub(crate) fn encode(records: &[(Action, &str)]) -> Vec<u8> {
	let mut buffer = Vec::new();

	for (idx, (action, name)) in records.iter().enumerate() {
		let name = name.encode_utf16().flat_map(u16::to_le_bytes).collect::<Vec<_>>();
		let len = (HEADER_LEN + name.len() + 3) & !3;
		let next = if idx + 1 == records.len() { 0 } else { len };

		let start = buffer.len();
		buffer.extend_from_slice(&u32::try_from(next).unwrap().to_le_bytes());
		buffer.extend_from_slice(&u32::from(*action).to_le_bytes());
		buffer.extend_from_slice(&u32::try_from(name.len()).unwrap().to_le_bytes());
		buffer.extend_from_slice(&name);
		buffer.resize(start + len, 0);
	}

	buffer
}
