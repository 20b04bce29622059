//! [`Kernel`] over an I/O completion port and `ReadDirectoryChangesW`.

use std::{
	ffi::c_void,
	io, iter, mem,
	os::windows::ffi::OsStrExt,
	path::Path,
	ptr,
	sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tracing::{trace, warn};
use windows_sys::Win32::{
	Foundation::{
		CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_MORE_DATA, ERROR_OPERATION_ABORTED,
		HANDLE, INVALID_HANDLE_VALUE, WAIT_TIMEOUT,
	},
	Storage::FileSystem::{
		CreateFileW, GetFileAttributesW, GetFileInformationByHandle, ReadDirectoryChangesW,
		BY_HANDLE_FILE_INFORMATION, FILE_ATTRIBUTE_DIRECTORY, FILE_FLAG_BACKUP_SEMANTICS,
		FILE_FLAG_OVERLAPPED, FILE_LIST_DIRECTORY, FILE_SHARE_DELETE, FILE_SHARE_READ,
		FILE_SHARE_WRITE, INVALID_FILE_ATTRIBUTES, OPEN_EXISTING,
	},
	System::{
		Threading::INFINITE,
		IO::{
			CancelIo, CreateIoCompletionPort, GetQueuedCompletionStatus,
			PostQueuedCompletionStatus, OVERLAPPED,
		},
	},
};

use super::{
	ChangeBuffer, Completion, CompletionStatus, Kernel, NotifyFilter, ReadCompletion, Token,
};
use crate::{error::Error, identity::FileIdentity};

/// How long shutdown waits for each cancelled read to come back before giving up on it.
const DRAIN_TIMEOUT_MS: u32 = 100;

/// One in-flight read. The `OVERLAPPED` header has to come first: the completion port hands
/// back a pointer to it, which is turned back into the whole allocation.
#[repr(C)]
struct PendingRead {
	overlapped: OVERLAPPED,
	buffer: ChangeBuffer,
}

pub struct WindowsKernel {
	port: HANDLE,
	/// Reads submitted and not yet dequeued. Each one owns a leaked [`PendingRead`].
	in_flight: AtomicUsize,
	closed: AtomicBool,
}

#[allow(clippy::cast_possible_wrap)]
fn os_error(code: u32) -> io::Error {
	io::Error::from_raw_os_error(code as i32)
}

fn to_wide(path: &Path) -> Vec<u16> {
	path.as_os_str()
		.encode_wide()
		.chain(iter::once(0))
		.collect()
}

fn check(operation: &'static str, ret: i32) -> Result<(), Error> {
	if ret == 0 {
		Err(Error::system_call(operation, io::Error::last_os_error()))
	} else {
		Ok(())
	}
}

impl WindowsKernel {
	pub fn new() -> Result<Self, Error> {
		// SAFETY: creating a fresh port touches no caller memory.
		let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 0) };
		if port == 0 {
			return Err(Error::system_call(
				"CreateIoCompletionPort",
				io::Error::last_os_error(),
			));
		}

		Ok(Self {
			port,
			in_flight: AtomicUsize::new(0),
			closed: AtomicBool::new(false),
		})
	}

	fn open(path: &Path, access: u32, flags: u32) -> Result<HANDLE, Error> {
		let wide = to_wide(path);

		// SAFETY: `wide` is a nul terminated UTF-16 string that outlives the call.
		let handle = unsafe {
			CreateFileW(
				wide.as_ptr(),
				access,
				FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
				ptr::null(),
				OPEN_EXISTING,
				flags,
				0,
			)
		};

		if handle == INVALID_HANDLE_VALUE {
			return Err(Error::from_io("CreateFileW", path, io::Error::last_os_error()));
		}

		Ok(handle)
	}

	/// Takes back ownership of a read the kernel is done with.
	///
	/// # Safety
	/// `overlapped` must come from a dequeued completion of a read submitted by this kernel.
	unsafe fn reclaim(&self, overlapped: *mut OVERLAPPED) -> ChangeBuffer {
		self.in_flight.fetch_sub(1, Ordering::AcqRel);
		Box::from_raw(overlapped.cast::<PendingRead>()).buffer
	}

	fn close_port(&self) -> Result<(), Error> {
		if self.closed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}

		// SAFETY: the port is only closed once, guarded by `closed`.
		check("CloseHandle", unsafe { CloseHandle(self.port) })
	}
}

impl Kernel for WindowsKernel {
	type Handle = HANDLE;

	fn is_directory(&self, path: &Path) -> Result<bool, Error> {
		let wide = to_wide(path);

		// SAFETY: `wide` is a nul terminated UTF-16 string that outlives the call.
		let attributes = unsafe { GetFileAttributesW(wide.as_ptr()) };
		if attributes == INVALID_FILE_ATTRIBUTES {
			return Err(Error::from_io(
				"GetFileAttributesW",
				path,
				io::Error::last_os_error(),
			));
		}

		Ok(attributes & FILE_ATTRIBUTE_DIRECTORY != 0)
	}

	fn identify(&self, path: &Path) -> Result<FileIdentity, Error> {
		let handle = Self::open(path, 0, FILE_FLAG_BACKUP_SEMANTICS)?;

		// SAFETY: plain old data, fully written by the call below on success.
		let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { mem::zeroed() };
		// SAFETY: `handle` is open and `info` is a valid out pointer.
		let queried = unsafe { GetFileInformationByHandle(handle, &mut info) };
		let query_error = (queried == 0).then(io::Error::last_os_error);

		// SAFETY: `handle` was opened above and is not used afterwards.
		if unsafe { CloseHandle(handle) } == 0 {
			warn!(path = %path.display(), "Failed to close identity query handle;");
		}

		if let Some(e) = query_error {
			return Err(Error::from_io("GetFileInformationByHandle", path, e));
		}

		Ok(FileIdentity::from_parts(
			info.dwVolumeSerialNumber,
			info.nFileIndexHigh,
			info.nFileIndexLow,
		))
	}

	fn open_directory(&self, path: &Path) -> Result<Self::Handle, Error> {
		Self::open(
			path,
			FILE_LIST_DIRECTORY,
			FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
		)
	}

	fn associate(&self, handle: Self::Handle, token: Token) -> Result<(), Error> {
		let key = usize::try_from(token.0).map_err(|_| {
			Error::system_call(
				"CreateIoCompletionPort",
				io::Error::other("completion key out of range"),
			)
		})?;

		// SAFETY: both handles are open; the port outlives every associated handle.
		let port = unsafe { CreateIoCompletionPort(handle, self.port, key, 0) };
		if port == 0 {
			return Err(Error::system_call(
				"CreateIoCompletionPort",
				io::Error::last_os_error(),
			));
		}

		Ok(())
	}

	fn read_changes(
		&self,
		handle: Self::Handle,
		_token: Token,
		buffer: ChangeBuffer,
		filter: NotifyFilter,
	) -> Result<(), Error> {
		let mut pending = Box::new(PendingRead {
			// SAFETY: an all zero OVERLAPPED is the documented initial state.
			overlapped: unsafe { mem::zeroed() },
			buffer,
		});
		let len = u32::try_from(pending.buffer.len()).unwrap_or(u32::MAX);
		let data = pending.buffer.as_mut_ptr().cast::<c_void>();
		let raw = Box::into_raw(pending);

		self.in_flight.fetch_add(1, Ordering::AcqRel);

		// SAFETY: `raw` and the buffer it owns stay alive until the completion is dequeued, or
		// are reclaimed right below when the submission fails.
		let submitted = unsafe {
			ReadDirectoryChangesW(
				handle,
				data,
				len,
				0,
				filter.bits(),
				ptr::null_mut(),
				raw.cast::<OVERLAPPED>(),
				None,
			)
		};

		if submitted == 0 {
			let e = io::Error::last_os_error();
			// SAFETY: the kernel rejected the read, so it never took ownership of `raw`.
			drop(unsafe { self.reclaim(raw.cast::<OVERLAPPED>()) });

			// The handle carries no path; the caller knows which directory this was.
			return Err(match e.kind() {
				io::ErrorKind::PermissionDenied => Error::AccessDenied(Path::new("").into()),
				_ => Error::system_call("ReadDirectoryChangesW", e),
			});
		}

		Ok(())
	}

	fn cancel(&self, handle: Self::Handle) -> Result<(), Error> {
		// SAFETY: `handle` is open; cancellation completes through the port.
		check("CancelIo", unsafe { CancelIo(handle) })
	}

	fn close(&self, handle: Self::Handle) -> Result<(), Error> {
		// SAFETY: the caller releases each handle exactly once.
		check("CloseHandle", unsafe { CloseHandle(handle) })
	}

	fn wake(&self) -> Result<(), Error> {
		// SAFETY: a completion without an OVERLAPPED carries no memory.
		check("PostQueuedCompletionStatus", unsafe {
			PostQueuedCompletionStatus(self.port, 0, 0, ptr::null())
		})
	}

	fn wait(&self) -> Result<Completion, Error> {
		let mut bytes = 0;
		let mut key = 0;
		let mut overlapped = ptr::null_mut();

		// SAFETY: all out pointers are valid locals.
		let dequeued = unsafe {
			GetQueuedCompletionStatus(self.port, &mut bytes, &mut key, &mut overlapped, INFINITE)
		};
		// SAFETY: reads the calling thread's last error code.
		let code = if dequeued == 0 { unsafe { GetLastError() } } else { 0 };

		if overlapped.is_null() {
			return if dequeued == 0 {
				Err(Error::system_call("GetQueuedCompletionStatus", os_error(code)))
			} else {
				Ok(Completion::Wake)
			};
		}

		// SAFETY: every OVERLAPPED queued on this port belongs to a `PendingRead`.
		let buffer = unsafe { self.reclaim(overlapped) };

		let status = match code {
			0 => CompletionStatus::Success,
			ERROR_MORE_DATA => CompletionStatus::MoreData,
			ERROR_ACCESS_DENIED => CompletionStatus::AccessDenied,
			ERROR_OPERATION_ABORTED => CompletionStatus::Aborted,
			other => CompletionStatus::Failed(Error::system_call(
				"GetQueuedCompletionStatus",
				os_error(other),
			)),
		};

		Ok(Completion::Read(ReadCompletion {
			token: Token(key as u64),
			status,
			bytes,
			buffer,
		}))
	}

	fn shutdown(&self) -> Result<(), Error> {
		while self.in_flight.load(Ordering::Acquire) > 0 {
			let mut bytes = 0;
			let mut key = 0;
			let mut overlapped = ptr::null_mut();

			// SAFETY: all out pointers are valid locals.
			let dequeued = unsafe {
				GetQueuedCompletionStatus(
					self.port,
					&mut bytes,
					&mut key,
					&mut overlapped,
					DRAIN_TIMEOUT_MS,
				)
			};

			if overlapped.is_null() {
				// SAFETY: reads the calling thread's last error code.
				if dequeued == 0 && unsafe { GetLastError() } == WAIT_TIMEOUT {
					warn!(
						in_flight = self.in_flight.load(Ordering::Acquire),
						"Reads still pending at shutdown, leaking their buffers;"
					);
					break;
				}

				continue;
			}

			// SAFETY: every OVERLAPPED queued on this port belongs to a `PendingRead`.
			drop(unsafe { self.reclaim(overlapped) });
			trace!("Reclaimed read at shutdown;");
		}

		self.close_port()
	}
}

impl Drop for WindowsKernel {
	fn drop(&mut self) {
		if let Err(e) = self.close_port() {
			warn!(?e, "Failed to close completion port;");
		}
	}
}
