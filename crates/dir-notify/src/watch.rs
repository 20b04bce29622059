use std::{
	collections::HashMap,
	ffi::{OsStr, OsString},
	path::PathBuf,
};

use tracing::trace;

use crate::{
	identity::FileIdentity,
	kernel::{ChangeBuffer, NotifyFilter, Token},
	translate::Interest,
};

/// Interest registered for the directory itself or for one entry inside it.
///
/// A registration stays provisional until the read carrying it has been armed. Provisional
/// registrations are dropped silently when arming fails; armed ones are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Registration {
	pub interest: Interest,
	pub provisional: bool,
}

impl Registration {
	pub(crate) const fn is_empty(&self) -> bool {
		self.interest.is_empty()
	}

	fn merge(&mut self, interest: Interest) {
		if self.is_empty() {
			self.provisional = true;
		}
		self.interest |= interest;
	}
}

/// What inside a watched directory a request refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
	Directory,
	Entry(OsString),
}

impl From<Option<OsString>> for Target {
	fn from(entry: Option<OsString>) -> Self {
		entry.map_or(Self::Directory, Self::Entry)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchState {
	/// Registered, no read submitted yet.
	Provisional,
	/// A read is in flight.
	Armed,
	/// Between a completion or mask change and the next submission.
	ReArming,
	/// Handle released and gone from the table.
	Closed,
}

/// Everything known about one watched directory.
#[derive(Debug)]
pub(crate) struct Watch<H> {
	pub token: Token,
	pub identity: FileIdentity,
	pub handle: H,
	/// Where the directory currently lives. Rewritten when an ancestor is renamed.
	pub path: PathBuf,
	/// `None` while the buffer is lent to an in-flight read.
	buffer: Option<ChangeBuffer>,
	buffer_size: usize,
	pub directory: Registration,
	pub entries: HashMap<OsString, Registration>,
	/// Old name seen in a rename, waiting for its new-name half.
	pub pending_rename: Option<OsString>,
	pub exclude_directory_events: bool,
	state: WatchState,
}

impl<H> Watch<H> {
	pub(crate) fn new(
		token: Token,
		identity: FileIdentity,
		handle: H,
		path: PathBuf,
		buffer_size: usize,
	) -> Self {
		Self {
			token,
			identity,
			handle,
			path,
			buffer: None,
			buffer_size,
			directory: Registration::default(),
			entries: HashMap::new(),
			pending_rename: None,
			exclude_directory_events: false,
			state: WatchState::Provisional,
		}
	}

	pub(crate) const fn state(&self) -> WatchState {
		self.state
	}

	pub(crate) fn transition(&mut self, next: WatchState) {
		debug_assert!(
			matches!(
				(self.state, next),
				(
					WatchState::Provisional | WatchState::Armed | WatchState::ReArming,
					WatchState::ReArming
				) | (WatchState::ReArming, WatchState::Armed | WatchState::Closed)
			),
			"illegal watch transition {:?} -> {next:?}",
			self.state
		);

		trace!(token = %self.token, from = ?self.state, to = ?next, "Watch transition;");
		self.state = next;
	}

	pub(crate) fn register(&mut self, target: &Target, interest: Interest) {
		match target {
			Target::Directory => self.directory.merge(interest),
			Target::Entry(name) => self.entries.entry(name.clone()).or_default().merge(interest),
		}
	}

	/// Marks the registration for `target` as armed.
	pub(crate) fn confirm(&mut self, target: &Target) {
		let registration = match target {
			Target::Directory => Some(&mut self.directory),
			Target::Entry(name) => self.entries.get_mut(name),
		};

		if let Some(registration) = registration {
			registration.provisional = false;
		}
	}

	/// Whether any registration is still waiting for its first read to be armed.
	pub(crate) fn has_provisional(&self) -> bool {
		self.directory.provisional
			|| self
				.entries
				.values()
				.any(|registration| registration.provisional)
	}

	/// Drops the registration for `target`, returning it if there was one.
	pub(crate) fn unregister(&mut self, target: &Target) -> Option<Registration> {
		match target {
			Target::Directory => {
				let registration = std::mem::take(&mut self.directory);
				(!registration.is_empty()).then_some(registration)
			}
			Target::Entry(name) => self.entries.remove(name),
		}
	}

	pub(crate) fn entry_interest(&self, name: &OsStr) -> Interest {
		self.entries
			.get(name)
			.map(|registration| registration.interest)
			.unwrap_or_default()
	}

	/// Moves the registration of `old` onto `new`. Returns whether there was one to move.
	pub(crate) fn rename_entry(&mut self, old: &OsStr, new: &OsStr) -> bool {
		match self.entries.remove(old) {
			Some(moved) if !moved.is_empty() => {
				let target = self.entries.entry(new.to_os_string()).or_insert(Registration {
					interest: Interest::empty(),
					provisional: moved.provisional,
				});
				target.interest |= moved.interest;
				true
			}
			_ => false,
		}
	}

	/// Union of every registration, as the filter the next read has to ask for.
	pub(crate) fn filter(&self) -> NotifyFilter {
		self.entries
			.values()
			.fold(self.directory.interest, |acc, registration| {
				acc | registration.interest
			})
			.to_filter()
	}

	/// Clears every registration, returning the paths of those that were armed.
	pub(crate) fn clear(&mut self) -> Vec<PathBuf> {
		let mut released = self
			.entries
			.drain()
			.filter(|(_, registration)| !registration.provisional)
			.map(|(name, _)| self.path.join(name))
			.collect::<Vec<_>>();

		let directory = std::mem::take(&mut self.directory);
		if !directory.is_empty() && !directory.provisional {
			released.push(self.path.clone());
		}

		released
	}

	/// Paths explicitly registered on this watch.
	pub(crate) fn registered_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
		(!self.directory.is_empty())
			.then(|| self.path.clone())
			.into_iter()
			.chain(
				self.entries
					.iter()
					.filter(|(_, registration)| !registration.is_empty())
					.map(|(name, _)| self.path.join(name)),
			)
	}

	pub(crate) fn take_buffer(&mut self) -> ChangeBuffer {
		self.buffer
			.take()
			.unwrap_or_else(|| ChangeBuffer::new(self.buffer_size))
	}

	/// Keeps `buffer` for the next read, unless one is already waiting.
	pub(crate) fn restore_buffer(&mut self, buffer: ChangeBuffer) {
		if self.buffer.is_none() && buffer.len() >= self.buffer_size {
			self.buffer = Some(buffer);
		}
	}
}
