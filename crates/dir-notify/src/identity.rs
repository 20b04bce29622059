use std::{
	ffi::OsString,
	fmt,
	path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{error::Error, kernel::Kernel};

/// Volume serial number plus file index: names a directory regardless of the path it is
/// currently reachable through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
	pub volume: u32,
	pub index: u64,
}

impl FileIdentity {
	#[must_use]
	pub const fn new(volume: u32, index: u64) -> Self {
		Self { volume, index }
	}

	/// Joins the two halves of a 64 bit file index as reported by the kernel.
	#[must_use]
	pub const fn from_parts(volume: u32, index_high: u32, index_low: u32) -> Self {
		Self {
			volume,
			index: (index_high as u64) << 32 | index_low as u64,
		}
	}
}

impl fmt::Display for FileIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:08x}:{:016x}", self.volume, self.index)
	}
}

/// A path resolved to the directory that has to be watched for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolved {
	pub directory: PathBuf,
	pub identity: FileIdentity,
	/// Set when the path names an entry inside `directory` rather than the directory itself.
	pub entry: Option<OsString>,
}

impl Resolved {
	pub(crate) fn path(&self) -> PathBuf {
		self.entry
			.as_ref()
			.map_or_else(|| self.directory.clone(), |name| self.directory.join(name))
	}
}

/// Finds the directory to watch for `path` and its identity.
pub(crate) fn resolve<K: Kernel>(kernel: &K, path: &Path) -> Result<Resolved, Error> {
	let (directory, entry) = if kernel.is_directory(path)? {
		(path.to_path_buf(), None)
	} else {
		let name = path
			.file_name()
			.ok_or_else(|| Error::NotFound(path.into()))?;
		let parent = match path.parent() {
			Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
			_ => PathBuf::from(Component::CurDir.as_os_str()),
		};

		(parent, Some(name.to_os_string()))
	};

	let identity = kernel.identify(&directory)?;

	Ok(Resolved {
		directory,
		identity,
		entry,
	})
}

/// Drops `.` components and redundant separators. `..` is kept as is, since resolving it
/// lexically is wrong across symlinks and junctions.
pub(crate) fn clean(path: &Path) -> PathBuf {
	let cleaned = path
		.components()
		.filter(|component| !matches!(component, Component::CurDir))
		.collect::<PathBuf>();

	if cleaned.as_os_str().is_empty() {
		PathBuf::from(Component::CurDir.as_os_str())
	} else {
		cleaned
	}
}

#[cfg(test)]
mod tests {
	use std::ffi::OsStr;

	use super::*;
	use crate::kernel::mock::MockKernel;

	#[test]
	fn directory_resolves_to_itself() {
		let kernel = MockKernel::new();
		let identity = kernel.add_dir("/watched");

		let resolved = resolve(&kernel, Path::new("/watched")).unwrap();

		assert_eq!(resolved.directory, Path::new("/watched"));
		assert_eq!(resolved.identity, identity);
		assert_eq!(resolved.entry, None);
		assert_eq!(resolved.path(), Path::new("/watched"));
	}

	#[test]
	fn file_resolves_to_parent() {
		let kernel = MockKernel::new();
		let identity = kernel.add_dir("/watched");
		kernel.add_file("/watched/notes.txt");

		let resolved = resolve(&kernel, Path::new("/watched/notes.txt")).unwrap();

		assert_eq!(resolved.directory, Path::new("/watched"));
		assert_eq!(resolved.identity, identity);
		assert_eq!(resolved.entry.as_deref(), Some(OsStr::new("notes.txt")));
		assert_eq!(resolved.path(), Path::new("/watched/notes.txt"));
	}

	#[test]
	fn missing_path_is_not_found() {
		let kernel = MockKernel::new();

		assert!(matches!(
			resolve(&kernel, Path::new("/nowhere")),
			Err(Error::NotFound(_))
		));
	}

	#[test]
	fn resolving_keeps_no_handle_open() {
		let kernel = MockKernel::new();
		kernel.add_dir("/watched");

		resolve(&kernel, Path::new("/watched")).unwrap();

		assert_eq!(kernel.directory_opens(), 0);
		assert_eq!(kernel.open_handles(), 0);
	}

	#[test]
	fn identity_joins_index_halves() {
		let identity = FileIdentity::from_parts(0xdead_beef, 0x1, 0x2);

		assert_eq!(identity.index, 0x1_0000_0002);
		assert_eq!(identity.to_string(), "deadbeef:0000000100000002");
	}

	#[test]
	fn clean_drops_cur_dir_and_separators() {
		assert_eq!(clean(Path::new("/a/./b//c/")), Path::new("/a/b/c"));
		assert_eq!(clean(Path::new("./")), Path::new("."));
		assert_eq!(clean(Path::new("a/../b")), Path::new("a/../b"));
	}
}
