//! The seam between the watch state machine and the operating system.
//!
//! A [`Kernel`] owns one completion queue. Directory handles are bound to it with a
//! [`Token`] as completion key, single-shot reads are submitted against them, and the I/O
//! thread blocks in [`Kernel::wait`] for whatever completes next: a finished read, or a
//! wake-up posted by [`Kernel::wake`] to tell the thread a command is waiting.

use std::{
	fmt, mem,
	ops::{Deref, DerefMut},
	path::Path,
	slice,
};

use bitflags::bitflags;

use crate::{error::Error, identity::FileIdentity};

#[cfg(windows)]
pub mod windows;

#[cfg(test)]
pub(crate) mod mock;

/// Completion key binding a directory handle to its watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

impl fmt::Display for Token {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

bitflags! {
	/// Which changes a read asks the kernel to report. Values match `FILE_NOTIFY_CHANGE_*`.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct NotifyFilter: u32 {
		const FILE_NAME   = 0x0000_0001;
		const DIR_NAME    = 0x0000_0002;
		const ATTRIBUTES  = 0x0000_0004;
		const SIZE        = 0x0000_0008;
		const LAST_WRITE  = 0x0000_0010;
		const LAST_ACCESS = 0x0000_0020;
		const CREATION    = 0x0000_0040;
		const SECURITY    = 0x0000_0100;
	}
}

/// Destination of one read.
///
/// Backed by `u32` words so the records the kernel writes into it are always DWORD aligned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeBuffer {
	words: Vec<u32>,
}

impl ChangeBuffer {
	/// A zeroed buffer holding at least `len` bytes.
	pub fn new(len: usize) -> Self {
		Self {
			words: vec![0; len.div_ceil(mem::size_of::<u32>())],
		}
	}
}

impl Deref for ChangeBuffer {
	type Target = [u8];

	fn deref(&self) -> &[u8] {
		// SAFETY: `u32` has no padding and every byte pattern is a valid `u8`; the slice covers
		// exactly the words owned by `self`.
		unsafe {
			slice::from_raw_parts(
				self.words.as_ptr().cast::<u8>(),
				self.words.len() * mem::size_of::<u32>(),
			)
		}
	}
}

impl DerefMut for ChangeBuffer {
	fn deref_mut(&mut self) -> &mut [u8] {
		// SAFETY: as in `deref`, and any bytes written back form valid `u32`s.
		unsafe {
			slice::from_raw_parts_mut(
				self.words.as_mut_ptr().cast::<u8>(),
				self.words.len() * mem::size_of::<u32>(),
			)
		}
	}
}

/// How a submitted read finished.
#[derive(Debug)]
pub enum CompletionStatus {
	Success,
	/// The changes did not fit; the buffer holds as many records as the kernel managed.
	MoreData,
	/// The watched directory is gone.
	AccessDenied,
	/// The read was cancelled on purpose.
	Aborted,
	Failed(Error),
}

#[derive(Debug)]
pub struct ReadCompletion {
	pub token: Token,
	pub status: CompletionStatus,
	/// Bytes the kernel reports having written into `buffer`.
	pub bytes: u32,
	/// The buffer handed to [`Kernel::read_changes`], returned to its owner.
	pub buffer: ChangeBuffer,
}

#[derive(Debug)]
pub enum Completion {
	/// Posted by [`Kernel::wake`]; carries no read.
	Wake,
	Read(ReadCompletion),
}

/// Kernel facility driving one watcher.
///
/// Every method except [`Kernel::wake`] is only called from the watcher's I/O thread.
pub trait Kernel: Send + Sync + 'static {
	type Handle: Copy + Eq + fmt::Debug + Send + Sync + 'static;

	fn is_directory(&self, path: &Path) -> Result<bool, Error>;

	/// Stable identity of the object at `path`. Does not keep any handle open.
	fn identify(&self, path: &Path) -> Result<FileIdentity, Error>;

	/// Opens `path` as a directory usable as an asynchronous read source, sharing read, write
	/// and delete access with other processes.
	fn open_directory(&self, path: &Path) -> Result<Self::Handle, Error>;

	fn associate(&self, handle: Self::Handle, token: Token) -> Result<(), Error>;

	/// Submits one asynchronous read into `buffer`. On success the buffer comes back with the
	/// matching [`ReadCompletion`]; on failure it is dropped.
	fn read_changes(
		&self,
		handle: Self::Handle,
		token: Token,
		buffer: ChangeBuffer,
		filter: NotifyFilter,
	) -> Result<(), Error>;

	/// Cancels the outstanding read on `handle`; it completes with
	/// [`CompletionStatus::Aborted`].
	fn cancel(&self, handle: Self::Handle) -> Result<(), Error>;

	fn close(&self, handle: Self::Handle) -> Result<(), Error>;

	/// Posts a completion with no read attached. Safe to call from any thread.
	fn wake(&self) -> Result<(), Error>;

	/// Blocks until the next completion.
	fn wait(&self) -> Result<Completion, Error>;

	/// Reclaims reads still owned by the kernel and releases the completion queue.
	fn shutdown(&self) -> Result<(), Error>;
}
