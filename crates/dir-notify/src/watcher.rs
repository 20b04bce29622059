use std::{
	path::{Path, PathBuf},
	sync::Arc,
	thread::{self, JoinHandle},
};

use async_channel as chan;
use parking_lot::Mutex;
use tracing::{debug, error, instrument, warn};

use crate::{
	config::{AddOptions, WatcherConfig},
	error::Error,
	event::Event,
	event_loop::{EventLoop, Outbox, State},
	kernel::Kernel,
	message::{Ack, Command},
	translate::Interest,
	Result,
};

/// Watches directories and files for changes.
///
/// Every watcher owns one kernel completion queue and one I/O thread. `add`, `remove` and
/// `close` block the calling thread until the I/O thread has handled the request. Changes are
/// delivered on [`Watcher::events`] and failures nobody is waiting on on [`Watcher::errors`];
/// both receivers must be drained or the I/O thread stalls until the watcher is closed.
pub struct Watcher<K: Kernel> {
	kernel: Arc<K>,
	state: Arc<Mutex<State<K::Handle>>>,
	commands: chan::Sender<Command>,
	events: chan::Receiver<Event>,
	errors: chan::Receiver<Error>,
	closing: chan::Sender<()>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

#[cfg(windows)]
impl Watcher<crate::kernel::windows::WindowsKernel> {
	/// Watcher over the native I/O completion port, with default settings.
	pub fn new() -> Result<Self> {
		Self::with_config(WatcherConfig::default())
	}

	pub fn with_config(config: WatcherConfig) -> Result<Self> {
		Self::with_kernel(
			Arc::new(crate::kernel::windows::WindowsKernel::new()?),
			config,
		)
	}
}

impl<K: Kernel> Watcher<K> {
	/// Watcher over an arbitrary kernel facility.
	pub fn with_kernel(kernel: Arc<K>, config: WatcherConfig) -> Result<Self> {
		config.validate()?;

		let (commands_tx, commands_rx) = chan::unbounded();
		let (events_tx, events_rx) = chan::bounded(config.event_capacity);
		let (errors_tx, errors_rx) = chan::bounded(config.error_capacity);
		let (closing_tx, closing_rx) = chan::bounded(1);

		let state = Arc::new(Mutex::new(State::new()));

		let event_loop = EventLoop::new(
			Arc::clone(&kernel),
			Arc::clone(&state),
			commands_rx,
			Outbox::new(events_tx, errors_tx, closing_rx),
		);

		let handle = thread::Builder::new()
			.name("sd-dir-notify".to_string())
			.spawn(move || event_loop.run())
			.map_err(|e| Error::system_call("spawn", e))?;

		Ok(Self {
			kernel,
			state,
			commands: commands_tx,
			events: events_rx,
			errors: errors_rx,
			closing: closing_tx,
			handle: Mutex::new(Some(handle)),
		})
	}

	/// Starts watching `path`.
	///
	/// A directory reports changes to itself and to its direct children; a file reports changes
	/// to itself only. Adding a path that is already watched is not an error.
	pub fn add(&self, path: impl AsRef<Path>) -> Result<()> {
		self.add_with(path, AddOptions::default())
	}

	#[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
	pub fn add_with(&self, path: impl AsRef<Path>, options: AddOptions) -> Result<()> {
		options.validate()?;

		self.request(|ack| Command::Add {
			path: path.as_ref().to_path_buf(),
			interest: Interest::ALL_EVENTS,
			options,
			ack,
		})
	}

	/// Stops watching `path`. Only paths passed to [`Watcher::add`] can be removed.
	#[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
	pub fn remove(&self, path: impl AsRef<Path>) -> Result<()> {
		self.request(|ack| Command::Remove {
			path: path.as_ref().to_path_buf(),
			ack,
		})
	}

	/// Every path currently registered, in no particular order. Empty once closed.
	#[must_use]
	pub fn watch_list(&self) -> Vec<PathBuf> {
		let state = self.state.lock();

		if state.closed {
			return Vec::new();
		}

		state.table.paths()
	}

	#[must_use]
	pub fn events(&self) -> chan::Receiver<Event> {
		self.events.clone()
	}

	#[must_use]
	pub fn errors(&self) -> chan::Receiver<Error> {
		self.errors.clone()
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	/// Stops every watch, releases the kernel queue and closes both channels.
	///
	/// Returns once the I/O thread has exited, even if nobody reads the channels. Later calls
	/// return `Ok(())` immediately.
	pub fn close(&self) -> Result<()> {
		{
			let mut state = self.state.lock();
			if state.closed {
				return Ok(());
			}
			state.closed = true;
		}

		debug!("Closing directory watcher;");

		// Unblocks any pending event or error delivery.
		self.closing.close();

		let result = match self.request_unchecked(Command::Shutdown) {
			// The I/O thread stopped on its own and already tore everything down.
			Err(Error::AlreadyClosed) => Ok(()),
			result => result,
		};

		if let Some(handle) = self.handle.lock().take() {
			if handle.join().is_err() {
				error!("Directory watcher I/O thread panicked;");
			}
		}

		result
	}

	fn request(&self, command: impl FnOnce(Ack) -> Command) -> Result<()> {
		if self.state.lock().closed {
			return Err(Error::AlreadyClosed);
		}

		self.request_unchecked(command)
	}

	fn request_unchecked(&self, command: impl FnOnce(Ack) -> Command) -> Result<()> {
		let (ack_tx, ack_rx) = chan::bounded(1);

		self.commands
			.try_send(command(ack_tx))
			.map_err(|_| Error::AlreadyClosed)?;

		if let Err(e) = self.kernel.wake() {
			if self.commands.is_closed() {
				return Err(Error::AlreadyClosed);
			}

			warn!(?e, "Failed to wake the I/O thread;");
			return Err(e);
		}

		ack_rx.recv_blocking().map_err(|_| Error::EventLoopGone)?
	}
}

impl<K: Kernel> Drop for Watcher<K> {
	fn drop(&mut self) {
		if let Err(e) = self.close() {
			error!(?e, "Failed to close directory watcher on drop;");
		}
	}
}
