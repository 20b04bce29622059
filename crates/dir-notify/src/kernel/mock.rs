//! In-memory kernel used by the unit tests.
//!
//! Paths are registered up front with [`MockKernel::add_dir`] and [`MockKernel::add_file`].
//! Reads stay pending until a test completes them with [`MockKernel::deliver`] or
//! [`MockKernel::complete`], and cancelling or closing a handle queues an aborted completion
//! just like the real completion port does.

use std::{
	collections::{HashMap, VecDeque},
	io,
	path::{Path, PathBuf},
};

use parking_lot::{Condvar, Mutex};

use super::{
	ChangeBuffer, Completion, CompletionStatus, Kernel, NotifyFilter, ReadCompletion, Token,
};
use crate::{
	error::Error,
	identity::FileIdentity,
	record::{encode, Action},
};

#[derive(Debug)]
struct Node {
	identity: FileIdentity,
	is_dir: bool,
}

#[derive(Debug)]
struct PendingRead {
	token: Token,
	buffer: ChangeBuffer,
	filter: NotifyFilter,
}

#[derive(Debug, Default)]
struct MockState {
	nodes: HashMap<PathBuf, Node>,
	next_index: u64,
	next_handle: u64,
	open: HashMap<u64, PathBuf>,
	reads: HashMap<u64, PendingRead>,
	completions: VecDeque<Completion>,
	read_failures: HashMap<PathBuf, VecDeque<Error>>,
	opens: usize,
	closes: usize,
	shut_down: bool,
}

impl MockState {
	fn handle_for(&self, dir: &Path) -> u64 {
		self.open
			.iter()
			.find_map(|(handle, path)| (path == dir).then_some(*handle))
			.unwrap_or_else(|| panic!("no open handle for {}", dir.display()))
	}

	fn abort_read(&mut self, handle: u64) {
		if let Some(read) = self.reads.remove(&handle) {
			self.completions.push_back(Completion::Read(ReadCompletion {
				token: read.token,
				status: CompletionStatus::Aborted,
				bytes: 0,
				buffer: read.buffer,
			}));
		}
	}

	fn add_node(&mut self, path: &Path, is_dir: bool) -> FileIdentity {
		self.next_index += 1;
		let identity = FileIdentity::new(1, self.next_index);
		self.nodes.insert(path.to_path_buf(), Node { identity, is_dir });
		identity
	}
}

fn invalid_handle(operation: &'static str) -> Error {
	Error::system_call(operation, io::Error::other("invalid handle"))
}

#[derive(Debug, Default)]
pub(crate) struct MockKernel {
	state: Mutex<MockState>,
	ready: Condvar,
}

impl MockKernel {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	pub(crate) fn add_dir(&self, path: impl AsRef<Path>) -> FileIdentity {
		self.state.lock().add_node(path.as_ref(), true)
	}

	pub(crate) fn add_file(&self, path: impl AsRef<Path>) -> FileIdentity {
		self.state.lock().add_node(path.as_ref(), false)
	}

	/// Completes the pending read on `dir` with `records`, as the kernel would.
	pub(crate) fn deliver(&self, dir: impl AsRef<Path>, records: &[(Action, &str)]) {
		let data = encode(records);
		self.complete(
			dir,
			CompletionStatus::Success,
			u32::try_from(data.len()).unwrap(),
			&data,
		);
	}

	/// Completes the pending read on `dir` with an arbitrary status and buffer contents.
	pub(crate) fn complete(
		&self,
		dir: impl AsRef<Path>,
		status: CompletionStatus,
		bytes: u32,
		data: &[u8],
	) {
		let mut state = self.state.lock();
		let handle = state.handle_for(dir.as_ref());
		let mut read = state
			.reads
			.remove(&handle)
			.unwrap_or_else(|| panic!("no read pending on {}", dir.as_ref().display()));

		let len = data.len().min(read.buffer.len());
		read.buffer[..len].copy_from_slice(&data[..len]);

		state.completions.push_back(Completion::Read(ReadCompletion {
			token: read.token,
			status,
			bytes,
			buffer: read.buffer,
		}));
		self.ready.notify_one();
	}

	/// Makes the next read submitted on `dir` fail with `error`.
	pub(crate) fn fail_next_read(&self, dir: impl AsRef<Path>, error: Error) {
		self.state
			.lock()
			.read_failures
			.entry(dir.as_ref().to_path_buf())
			.or_default()
			.push_back(error);
	}

	/// Pops a queued completion without blocking.
	pub(crate) fn try_next(&self) -> Option<Completion> {
		self.state.lock().completions.pop_front()
	}

	pub(crate) fn directory_opens(&self) -> usize {
		self.state.lock().opens
	}

	pub(crate) fn closes(&self) -> usize {
		self.state.lock().closes
	}

	pub(crate) fn open_handles(&self) -> usize {
		self.state.lock().open.len()
	}

	pub(crate) fn pending_reads(&self) -> usize {
		self.state.lock().reads.len()
	}

	pub(crate) fn filter_for(&self, dir: impl AsRef<Path>) -> Option<NotifyFilter> {
		let state = self.state.lock();
		let handle = state.handle_for(dir.as_ref());
		state.reads.get(&handle).map(|read| read.filter)
	}

	pub(crate) fn is_shut_down(&self) -> bool {
		self.state.lock().shut_down
	}
}

impl Kernel for MockKernel {
	type Handle = u64;

	fn is_directory(&self, path: &Path) -> Result<bool, Error> {
		self.state
			.lock()
			.nodes
			.get(path)
			.map(|node| node.is_dir)
			.ok_or_else(|| Error::NotFound(path.into()))
	}

	fn identify(&self, path: &Path) -> Result<FileIdentity, Error> {
		self.state
			.lock()
			.nodes
			.get(path)
			.map(|node| node.identity)
			.ok_or_else(|| Error::NotFound(path.into()))
	}

	fn open_directory(&self, path: &Path) -> Result<Self::Handle, Error> {
		let mut state = self.state.lock();

		match state.nodes.get(path) {
			Some(node) if node.is_dir => {}
			_ => return Err(Error::NotFound(path.into())),
		}

		state.next_handle += 1;
		let handle = state.next_handle;
		state.open.insert(handle, path.to_path_buf());
		state.opens += 1;

		Ok(handle)
	}

	fn associate(&self, handle: Self::Handle, _token: Token) -> Result<(), Error> {
		if self.state.lock().open.contains_key(&handle) {
			Ok(())
		} else {
			Err(invalid_handle("CreateIoCompletionPort"))
		}
	}

	fn read_changes(
		&self,
		handle: Self::Handle,
		token: Token,
		buffer: ChangeBuffer,
		filter: NotifyFilter,
	) -> Result<(), Error> {
		let mut state = self.state.lock();

		let Some(path) = state.open.get(&handle).cloned() else {
			return Err(invalid_handle("ReadDirectoryChangesW"));
		};

		if let Some(error) = state
			.read_failures
			.get_mut(&path)
			.and_then(VecDeque::pop_front)
		{
			return Err(error);
		}

		if state.reads.contains_key(&handle) {
			return Err(Error::system_call(
				"ReadDirectoryChangesW",
				io::Error::other("a read is already pending on this handle"),
			));
		}

		state.reads.insert(
			handle,
			PendingRead {
				token,
				buffer,
				filter,
			},
		);

		Ok(())
	}

	fn cancel(&self, handle: Self::Handle) -> Result<(), Error> {
		let mut state = self.state.lock();

		if !state.open.contains_key(&handle) {
			return Err(invalid_handle("CancelIo"));
		}

		state.abort_read(handle);
		self.ready.notify_one();

		Ok(())
	}

	fn close(&self, handle: Self::Handle) -> Result<(), Error> {
		let mut state = self.state.lock();

		if state.open.remove(&handle).is_none() {
			return Err(invalid_handle("CloseHandle"));
		}

		state.closes += 1;
		state.abort_read(handle);
		self.ready.notify_one();

		Ok(())
	}

	fn wake(&self) -> Result<(), Error> {
		let mut state = self.state.lock();

		if state.shut_down {
			return Err(invalid_handle("PostQueuedCompletionStatus"));
		}

		state.completions.push_back(Completion::Wake);
		self.ready.notify_one();

		Ok(())
	}

	fn wait(&self) -> Result<Completion, Error> {
		let mut state = self.state.lock();

		loop {
			if state.shut_down {
				return Err(invalid_handle("GetQueuedCompletionStatus"));
			}

			if let Some(completion) = state.completions.pop_front() {
				return Ok(completion);
			}

			self.ready.wait(&mut state);
		}
	}

	fn shutdown(&self) -> Result<(), Error> {
		let mut state = self.state.lock();

		state
			.completions
			.retain(|completion| !matches!(completion, Completion::Read(_)));
		state.reads.clear();
		state.shut_down = true;
		self.ready.notify_all();

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cancel_queues_aborted_completion() {
		let kernel = MockKernel::new();
		kernel.add_dir("/watched");
		let handle = kernel.open_directory(Path::new("/watched")).unwrap();

		kernel
			.read_changes(handle, Token(1), ChangeBuffer::new(64), NotifyFilter::FILE_NAME)
			.unwrap();
		assert_eq!(kernel.pending_reads(), 1);

		kernel.cancel(handle).unwrap();

		assert_eq!(kernel.pending_reads(), 0);
		assert!(matches!(
			kernel.try_next(),
			Some(Completion::Read(ReadCompletion {
				token: Token(1),
				status: CompletionStatus::Aborted,
				..
			}))
		));
	}

	#[test]
	fn deliver_fills_the_pending_buffer() {
		let kernel = MockKernel::new();
		kernel.add_dir("/watched");
		let handle = kernel.open_directory(Path::new("/watched")).unwrap();
		kernel
			.read_changes(handle, Token(7), ChangeBuffer::new(64), NotifyFilter::FILE_NAME)
			.unwrap();

		kernel.deliver("/watched", &[(Action::Added, "a")]);

		let Some(Completion::Read(read)) = kernel.try_next() else {
			panic!("expected a read completion");
		};
		assert_eq!(read.token, Token(7));
		assert_eq!(read.buffer.len(), 64);
		assert_eq!(&read.buffer[..read.bytes as usize], &encode(&[(Action::Added, "a")])[..]);
	}

	#[test]
	fn wait_fails_after_shutdown() {
		let kernel = MockKernel::new();
		kernel.wake().unwrap();
		assert!(matches!(kernel.wait(), Ok(Completion::Wake)));

		kernel.shutdown().unwrap();

		assert!(kernel.wait().is_err());
		assert!(kernel.wake().is_err());
	}
}
