//! The watch lifecycle: registering interest, arming single-shot reads, decoding what they
//! return and tearing watches down again.
//!
//! Everything here runs on the I/O thread, with the watch table borrowed from under the
//! watcher's lock. Events and errors are collected as [`Notice`]s and only delivered once the
//! lock has been released.

use std::{mem, path::Path, sync::Arc};

use tracing::{debug, error, instrument, trace, warn};

use crate::{
	config::AddOptions,
	error::Error,
	event::Event,
	identity::{clean, resolve, FileIdentity, Resolved},
	kernel::{CompletionStatus, Kernel, ReadCompletion, Token},
	record::{Action, Record, Records},
	table::WatchTable,
	translate::Interest,
	watch::{Target, Watch, WatchState},
	Result,
};

/// Something the I/O thread has to hand to the consumer.
#[derive(Debug)]
pub(crate) enum Notice {
	Event {
		event: Event,
		/// Drop the event if its path turns out to be a directory.
		exclude_directories: bool,
	},
	Error(Error),
}

pub(crate) struct Engine<K: Kernel> {
	kernel: Arc<K>,
	next_token: u64,
	notices: Vec<Notice>,
}

fn acknowledge(path: &Path) {
	debug!(path = %path.display(), "Registration removed;");
}

impl<K: Kernel> Engine<K> {
	pub(crate) fn new(kernel: Arc<K>) -> Self {
		Self {
			kernel,
			next_token: 1,
			notices: Vec::new(),
		}
	}

	pub(crate) fn kernel(&self) -> &K {
		&self.kernel
	}

	/// Cleans `path` and finds the directory that has to be watched for it.
	pub(crate) fn resolve(&self, path: &Path) -> Result<Resolved> {
		resolve(&*self.kernel, &clean(path))
	}

	pub(crate) fn take_notices(&mut self) -> Vec<Notice> {
		mem::take(&mut self.notices)
	}

	fn emit(&mut self, path: &Path, interest: Interest, exclude_directories: bool) {
		let op = interest.to_op();
		if op.is_empty() {
			return;
		}

		self.notices.push(Notice::Event {
			event: Event::new(path, op),
			exclude_directories,
		});
	}

	fn report(&mut self, e: Error) {
		error!(?e, "Directory watch failure;");
		self.notices.push(Notice::Error(e));
	}

	#[instrument(skip(self, table, resolved, options), fields(path = %resolved.path().display()))]
	pub(crate) fn add_watch(
		&mut self,
		table: &mut WatchTable<K::Handle>,
		resolved: Resolved,
		interest: Interest,
		options: &AddOptions,
	) -> Result<()> {
		let Resolved {
			directory,
			identity,
			entry,
		} = resolved;

		let kernel = &*self.kernel;
		let next_token = &mut self.next_token;

		let watch = table.get_or_try_insert_with(identity, || {
			let handle = kernel.open_directory(&directory)?;
			let token = Token(*next_token);

			if let Err(e) = kernel.associate(handle, token) {
				if let Err(e) = kernel.close(handle) {
					warn!(?e, "Failed to close directory handle after association failure;");
				}
				return Err(e);
			}

			*next_token += 1;
			debug!(%token, %identity, "Created watch;");

			Ok(Watch::new(
				token,
				identity,
				handle,
				directory,
				options.buffer_size,
			))
		})?;

		watch.exclude_directory_events = options.exclude_directory_events;

		let target = Target::from(entry);
		watch.register(&target, interest);

		self.start_read(table, identity)?;

		if let Some(watch) = table.get_mut(identity) {
			watch.confirm(&target);
		}

		Ok(())
	}

	#[instrument(skip(self, table, resolved), fields(path = %resolved.path().display()))]
	pub(crate) fn remove_watch(
		&mut self,
		table: &mut WatchTable<K::Handle>,
		resolved: Resolved,
	) -> Result<()> {
		let path = resolved.path();
		let target = Target::from(resolved.entry);

		let Some(registration) = table
			.get_mut(resolved.identity)
			.and_then(|watch| watch.unregister(&target))
		else {
			return Err(Error::NoSuchWatch(path.into()));
		};

		if !registration.provisional {
			acknowledge(&path);
		}

		self.start_read(table, resolved.identity)
	}

	/// Re-arms the watch with the union of its registrations, or releases it when nothing is
	/// registered anymore.
	///
	/// A failed submission tears the watch down before returning. An access denied failure
	/// means the directory itself is gone and is reported as its removal, and only becomes an
	/// error when it lands on a registration that was never armed.
	#[instrument(skip(self, table))]
	fn start_read(
		&mut self,
		table: &mut WatchTable<K::Handle>,
		identity: FileIdentity,
	) -> Result<()> {
		let Some(watch) = table.get_mut(identity) else {
			return Ok(());
		};

		watch.transition(WatchState::ReArming);

		if let Err(e) = self.kernel.cancel(watch.handle) {
			warn!(?e, "Failed to cancel outstanding read;");
			self.report(e);
			self.delete_watch(table, identity);
		}

		let Some(watch) = table.get_mut(identity) else {
			return Ok(());
		};

		let filter = watch.filter();
		if filter.is_empty() {
			self.release(table, identity);
			return Ok(());
		}

		let buffer = watch.take_buffer();
		let Err(e) = self
			.kernel
			.read_changes(watch.handle, watch.token, buffer, filter)
		else {
			watch.transition(WatchState::Armed);
			debug!(?filter, "Armed watch;");
			return Ok(());
		};

		let result = match e {
			Error::AccessDenied(_) => {
				debug!("Watched directory is gone;");
				let path = watch.path.clone();
				let provisional = watch.has_provisional();

				if !watch.directory.provisional {
					let interest = watch.directory.interest & Interest::DELETE_SELF;
					let exclude_directories = watch.exclude_directory_events;
					self.emit(&path, interest, exclude_directories);
				}

				// A registration that was never armed belongs to the caller still waiting on it.
				if provisional {
					Err(Error::AccessDenied(path.into()))
				} else {
					Ok(())
				}
			}
			e => {
				warn!(?e, "Failed to arm watch;");
				Err(e)
			}
		};

		self.delete_watch(table, identity);
		self.release(table, identity);

		result
	}

	/// Clears every registration of the watch. Only armed registrations are acknowledged.
	fn delete_watch(&mut self, table: &mut WatchTable<K::Handle>, identity: FileIdentity) {
		let Some(watch) = table.get_mut(identity) else {
			return;
		};

		watch.pending_rename = None;
		for path in watch.clear() {
			acknowledge(&path);
		}
	}

	fn release(&mut self, table: &mut WatchTable<K::Handle>, identity: FileIdentity) {
		let Some(mut watch) = table.remove(identity) else {
			return;
		};

		if let Err(e) = self.kernel.close(watch.handle) {
			warn!(?e, "Failed to close directory handle;");
			self.report(e);
		}

		watch.transition(WatchState::Closed);
		debug!(path = %watch.path.display(), "Released watch;");
	}

	fn rearm(&mut self, table: &mut WatchTable<K::Handle>, identity: FileIdentity) {
		if let Err(e) = self.start_read(table, identity) {
			self.report(e);
		}
	}

	#[instrument(skip_all, fields(token = %completion.token, bytes = completion.bytes))]
	pub(crate) fn handle_completion(
		&mut self,
		table: &mut WatchTable<K::Handle>,
		completion: ReadCompletion,
	) {
		let ReadCompletion {
			token,
			status,
			bytes,
			buffer,
		} = completion;

		let Some(identity) = table.identity_for(token) else {
			trace!("Dropping completion for a released watch;");
			return;
		};

		let filled = match status {
			CompletionStatus::Success => bytes as usize,

			CompletionStatus::MoreData => {
				warn!("Change buffer overflowed, decoding what fit;");
				buffer.len()
			}

			CompletionStatus::Aborted => {
				if let Some(watch) = table.get_mut(identity) {
					trace!(state = ?watch.state(), "Read cancelled;");
					watch.restore_buffer(buffer);
				}
				return;
			}

			CompletionStatus::AccessDenied => {
				if let Some(watch) = table.get_mut(identity) {
					debug!(path = %watch.path.display(), "Watched directory is gone;");
					let path = watch.path.clone();
					let interest = watch.directory.interest & Interest::DELETE_SELF;
					let exclude_directories = watch.exclude_directory_events;
					watch.restore_buffer(buffer);
					self.emit(&path, interest, exclude_directories);
				}

				self.delete_watch(table, identity);
				self.rearm(table, identity);
				return;
			}

			CompletionStatus::Failed(e) => {
				self.report(e);
				if let Some(watch) = table.get_mut(identity) {
					watch.restore_buffer(buffer);
				}
				self.rearm(table, identity);
				return;
			}
		};

		for record in Records::new(&buffer, filled) {
			match record {
				Ok(record) => self.apply(table, identity, record),
				Err(e) => {
					self.report(e);
					break;
				}
			}
		}

		if let Some(watch) = table.get_mut(identity) {
			watch.restore_buffer(buffer);
		}

		self.rearm(table, identity);
	}

	fn apply(&mut self, table: &mut WatchTable<K::Handle>, identity: FileIdentity, record: Record) {
		let Record { action, name } = record;

		let Some(watch) = table.get_mut(identity) else {
			return;
		};

		let path = watch.path.join(&name);
		let exclude_directories = watch.exclude_directory_events;
		trace!(?action, path = %path.display(), "Decoded record;");

		let mut entry_mask = Interest::empty();
		match action {
			Action::Removed => entry_mask = Interest::DELETE_SELF,
			Action::Modified => entry_mask = Interest::MODIFY,
			Action::RenamedOldName => watch.pending_rename = Some(name.clone()),
			Action::RenamedNewName => {
				if let Some(old_name) = watch.pending_rename.take() {
					let old_path = watch.path.join(&old_name);

					if watch.rename_entry(&old_name, &name) {
						entry_mask = Interest::MOVE_SELF;
					}

					table.rewrite_paths(&old_path, &path);
				}
			}
			Action::Added | Action::Other(_) => {}
		}

		let Some(watch) = table.get_mut(identity) else {
			return;
		};

		let entry_interest = watch.entry_interest(&name);
		let directory_interest = watch.directory.interest;

		if action != Action::RenamedNewName {
			self.emit(&path, entry_interest & entry_mask, exclude_directories);
		}

		if action == Action::Removed {
			if let Some(registration) = watch.unregister(&Target::Entry(name)) {
				if !registration.provisional {
					acknowledge(&path);
				}
			}
		}

		self.emit(
			&path,
			directory_interest & Interest::from_action(action),
			exclude_directories,
		);

		if action == Action::RenamedNewName {
			self.emit(&path, entry_interest & entry_mask, exclude_directories);
		}
	}

	/// Tears every watch down. Called once, right before the kernel queue is released.
	#[instrument(skip_all, fields(watches = table.len()))]
	pub(crate) fn shutdown(&mut self, table: &mut WatchTable<K::Handle>) {
		for identity in table.identities() {
			self.delete_watch(table, identity);
			self.rearm(table, identity);
		}
	}
}
