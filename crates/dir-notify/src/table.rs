use std::{
	collections::{hash_map::Entry, HashMap},
	path::{Path, PathBuf},
	thread::{self, ThreadId},
};

use tracing::trace;

use crate::{identity::FileIdentity, kernel::Token, watch::Watch};

/// Every directory currently watched, keyed by volume and then by file index.
///
/// Readers on any thread may look at it through the watcher's lock, but once bound only the
/// I/O thread may change it.
#[derive(Debug)]
pub(crate) struct WatchTable<H> {
	volumes: HashMap<u32, HashMap<u64, Watch<H>>>,
	tokens: HashMap<Token, FileIdentity>,
	owner: Option<ThreadId>,
}

impl<H> Default for WatchTable<H> {
	fn default() -> Self {
		Self {
			volumes: HashMap::new(),
			tokens: HashMap::new(),
			owner: None,
		}
	}
}

impl<H> WatchTable<H> {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Makes the calling thread the only one allowed to mutate the table.
	pub(crate) fn bind_to_current_thread(&mut self) {
		self.owner = Some(thread::current().id());
	}

	fn assert_owner(&self) {
		debug_assert!(
			self.owner.map_or(true, |owner| owner == thread::current().id()),
			"watch table mutated outside of its I/O thread"
		);
	}

	pub(crate) fn get(&self, identity: FileIdentity) -> Option<&Watch<H>> {
		self.volumes
			.get(&identity.volume)
			.and_then(|indexes| indexes.get(&identity.index))
	}

	pub(crate) fn get_mut(&mut self, identity: FileIdentity) -> Option<&mut Watch<H>> {
		self.assert_owner();

		self.volumes
			.get_mut(&identity.volume)
			.and_then(|indexes| indexes.get_mut(&identity.index))
	}

	/// Returns the watch for `identity`, creating it with `create` if there is none yet.
	pub(crate) fn get_or_try_insert_with<E>(
		&mut self,
		identity: FileIdentity,
		create: impl FnOnce() -> Result<Watch<H>, E>,
	) -> Result<&mut Watch<H>, E> {
		self.assert_owner();

		let indexes = self.volumes.entry(identity.volume).or_default();

		match indexes.entry(identity.index) {
			Entry::Occupied(entry) => Ok(entry.into_mut()),
			Entry::Vacant(entry) => {
				let watch = create()?;
				self.tokens.insert(watch.token, identity);
				Ok(entry.insert(watch))
			}
		}
	}

	pub(crate) fn remove(&mut self, identity: FileIdentity) -> Option<Watch<H>> {
		self.assert_owner();

		let indexes = self.volumes.get_mut(&identity.volume)?;
		let watch = indexes.remove(&identity.index)?;

		if indexes.is_empty() {
			self.volumes.remove(&identity.volume);
		}
		self.tokens.remove(&watch.token);

		Some(watch)
	}

	pub(crate) fn identity_for(&self, token: Token) -> Option<FileIdentity> {
		self.tokens.get(&token).copied()
	}

	pub(crate) fn identities(&self) -> Vec<FileIdentity> {
		self.volumes
			.iter()
			.flat_map(|(volume, indexes)| {
				indexes
					.keys()
					.map(|index| FileIdentity::new(*volume, *index))
			})
			.collect()
	}

	/// Moves every watch living at or below `old` to the same place below `new`.
	pub(crate) fn rewrite_paths(&mut self, old: &Path, new: &Path) -> usize {
		self.assert_owner();

		let mut rewritten = 0;

		for watch in self.volumes.values_mut().flat_map(HashMap::values_mut) {
			let Ok(rest) = watch.path.strip_prefix(old) else {
				continue;
			};

			let path = if rest.as_os_str().is_empty() {
				new.to_path_buf()
			} else {
				new.join(rest)
			};

			trace!(
				from = %watch.path.display(),
				to = %path.display(),
				"Rewriting watched path;"
			);
			watch.path = path;
			rewritten += 1;
		}

		rewritten
	}

	/// Snapshot of every explicitly registered path.
	pub(crate) fn paths(&self) -> Vec<PathBuf> {
		self.volumes
			.values()
			.flat_map(HashMap::values)
			.flat_map(|watch| watch.registered_paths())
			.collect()
	}

	pub(crate) fn len(&self) -> usize {
		self.tokens.len()
	}

	#[cfg(test)]
	pub(crate) fn is_empty(&self) -> bool {
		self.tokens.is_empty()
	}
}
