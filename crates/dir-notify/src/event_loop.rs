use std::{ops::ControlFlow, pin::pin, sync::Arc};

use async_channel as chan;
use futures::{
	executor::block_on,
	future::{select, Either},
};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::{
	engine::{Engine, Notice},
	error::Error,
	event::Event,
	kernel::{Completion, Kernel},
	message::{Ack, Command},
	table::WatchTable,
};

/// What the façade and the I/O thread share under one lock.
#[derive(Debug)]
pub(crate) struct State<H> {
	pub closed: bool,
	pub table: WatchTable<H>,
}

impl<H> State<H> {
	pub(crate) fn new() -> Self {
		Self {
			closed: false,
			table: WatchTable::new(),
		}
	}
}

/// Outbound side of the event and error channels.
///
/// Sends block while the consumer is behind, but give up as soon as `closing` is closed, so a
/// consumer that stopped reading can never keep the watcher from shutting down.
pub(crate) struct Outbox {
	events: chan::Sender<Event>,
	errors: chan::Sender<Error>,
	closing: chan::Receiver<()>,
}

impl Outbox {
	pub(crate) fn new(
		events: chan::Sender<Event>,
		errors: chan::Sender<Error>,
		closing: chan::Receiver<()>,
	) -> Self {
		Self {
			events,
			errors,
			closing,
		}
	}

	fn send<T>(&self, tx: &chan::Sender<T>, item: T) -> bool {
		if self.closing.is_closed() {
			return false;
		}

		block_on(async {
			match select(pin!(tx.send(item)), pin!(self.closing.recv())).await {
				Either::Left((res, _)) => res.is_ok(),
				Either::Right(_) => false,
			}
		})
	}

	pub(crate) fn event(&self, event: Event) {
		if !self.send(&self.events, event) {
			trace!("Dropped event, watcher is closing;");
		}
	}

	pub(crate) fn error(&self, e: Error) {
		if !self.send(&self.errors, e) {
			trace!("Dropped error, watcher is closing;");
		}
	}

	fn close(&self) {
		self.events.close();
		self.errors.close();
	}
}

pub(crate) struct EventLoop<K: Kernel> {
	engine: Engine<K>,
	state: Arc<Mutex<State<K::Handle>>>,
	commands: chan::Receiver<Command>,
	outbox: Outbox,
}

impl<K: Kernel> EventLoop<K> {
	pub(crate) fn new(
		kernel: Arc<K>,
		state: Arc<Mutex<State<K::Handle>>>,
		commands: chan::Receiver<Command>,
		outbox: Outbox,
	) -> Self {
		Self {
			engine: Engine::new(kernel),
			state,
			commands,
			outbox,
		}
	}

	pub(crate) fn run(mut self) {
		self.state.lock().table.bind_to_current_thread();
		debug!("Directory watcher I/O thread started;");

		loop {
			let completion = match self.engine.kernel().wait() {
				Ok(completion) => completion,
				Err(e) => {
					error!(?e, "Completion queue failed, stopping the watcher;");
					self.outbox.error(e);
					self.finish(None);
					return;
				}
			};

			match completion {
				Completion::Wake => {
					if let ControlFlow::Break(ack) = self.handle_command() {
						self.finish(ack);
						return;
					}
				}

				Completion::Read(read) => {
					let mut state = self.state.lock();
					self.engine.handle_completion(&mut state.table, read);
				}
			}

			self.flush();
		}
	}

	/// Services exactly one queued command.
	fn handle_command(&mut self) -> ControlFlow<Option<Ack>> {
		let command = match self.commands.try_recv() {
			Ok(command) => command,
			Err(chan::TryRecvError::Empty) => {
				warn!("Woken up without a pending command;");
				return ControlFlow::Continue(());
			}
			Err(chan::TryRecvError::Closed) => return ControlFlow::Break(None),
		};

		match command {
			Command::Add {
				path,
				interest,
				options,
				ack,
			} => {
				let result = self.engine.resolve(&path).and_then(|resolved| {
					let mut state = self.state.lock();
					self.engine
						.add_watch(&mut state.table, resolved, interest, &options)
				});

				ack.try_send(result).ok();
			}

			Command::Remove { path, ack } => {
				let result = self.engine.resolve(&path).and_then(|resolved| {
					let mut state = self.state.lock();
					self.engine.remove_watch(&mut state.table, resolved)
				});

				ack.try_send(result).ok();
			}

			Command::Shutdown(ack) => return ControlFlow::Break(Some(ack)),
		}

		ControlFlow::Continue(())
	}

	/// Delivers everything the engine produced, outside of the lock.
	fn flush(&mut self) {
		for notice in self.engine.take_notices() {
			match notice {
				Notice::Event {
					event,
					exclude_directories,
				} => {
					if exclude_directories
						&& self.engine.kernel().is_directory(event.path()).unwrap_or(false)
					{
						trace!(path = %event.path().display(), "Skipping directory event;");
						continue;
					}

					self.outbox.event(event);
				}

				Notice::Error(e) => self.outbox.error(e),
			}
		}
	}

	fn finish(mut self, ack: Option<Ack>) {
		{
			let mut state = self.state.lock();
			state.closed = true;
			self.engine.shutdown(&mut state.table);
		}

		self.flush();

		let result = self.engine.kernel().shutdown();
		if let Err(e) = &result {
			error!(?e, "Failed to release the completion queue;");
		}

		self.outbox.close();

		self.commands.close();
		while let Ok(command) = self.commands.try_recv() {
			command.reject();
		}

		debug!("Directory watcher I/O thread stopped;");

		if let Some(ack) = ack {
			ack.try_send(result).ok();
		}
	}
}
