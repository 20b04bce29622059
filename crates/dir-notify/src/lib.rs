//!
//! # Directory Notify
//!
//! Directory change notifications for Spacedrive, built on the kernel's asynchronous
//! directory-change buffers.
//!
//! A [`Watcher`] owns one kernel completion queue and one dedicated I/O thread. Watched paths
//! are tracked by file identity (volume serial plus file index) rather than by name, so a
//! watch keeps working when one of its ancestors is renamed. Along with plain event delivery it
//! takes care of:
//! - Sharing one directory handle between a directory and any files watched inside it;
//! - Re-arming the single-shot kernel reads after every completion;
//! - Reporting the removal of a watched directory and dropping its watch;
//! - Pairing the two halves of a rename, carrying a watched entry over to its new name;
//! - Signalling kernel buffer overflows on the error stream.
//!
//! Watching is never recursive: a directory reports changes to itself and its direct children.
//!
//! ## Basic example
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn main() -> Result<(), sd_dir_notify::Error> {
//! use sd_dir_notify::Watcher;
//!
//! let watcher = Watcher::new()?;
//! watcher.add("C:\\Users\\Public\\Documents")?;
//!
//! let events = watcher.events();
//! while let Ok(event) = events.recv_blocking() {
//!     println!("{event}");
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(windows))]
//! # fn main() {}
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod config;
mod engine;
mod error;
mod event;
mod event_loop;
mod identity;
pub mod kernel;
mod message;
mod record;
mod table;
mod translate;
mod watch;
mod watcher;

pub use config::{AddOptions, WatcherConfig, DEFAULT_BUFFER_SIZE};
pub use error::{Error, MIN_BUFFER_SIZE};
pub use event::{Event, Op};
pub use identity::FileIdentity;
pub use watcher::Watcher;

pub type Result<T, E = Error> = std::result::Result<T, E>;
