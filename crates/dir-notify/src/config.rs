use serde::{Deserialize, Serialize};

use crate::error::{Error, MIN_BUFFER_SIZE};

/// Largest buffer size guaranteed to work with SMB shares.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

const DEFAULT_EVENT_CAPACITY: usize = 50;
const DEFAULT_ERROR_CAPACITY: usize = 8;

/// Watcher wide settings, fixed when the watcher is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
	/// How many events may wait on the event channel before the I/O thread blocks.
	pub event_capacity: usize,
	/// How many errors may wait on the error channel before the I/O thread blocks.
	pub error_capacity: usize,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			event_capacity: DEFAULT_EVENT_CAPACITY,
			error_capacity: DEFAULT_ERROR_CAPACITY,
		}
	}
}

impl WatcherConfig {
	#[must_use]
	pub const fn with_event_capacity(mut self, event_capacity: usize) -> Self {
		self.event_capacity = event_capacity;
		self
	}

	#[must_use]
	pub const fn with_error_capacity(mut self, error_capacity: usize) -> Self {
		self.error_capacity = error_capacity;
		self
	}

	pub fn validate(&self) -> Result<(), Error> {
		if self.event_capacity == 0 {
			return Err(Error::InvalidConfig("event capacity must be at least 1"));
		}

		if self.error_capacity == 0 {
			return Err(Error::InvalidConfig("error capacity must be at least 1"));
		}

		Ok(())
	}
}

/// Per path settings for [`Watcher::add_with`](crate::Watcher::add_with).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddOptions {
	/// Size of the kernel change buffer for a newly watched directory. Ignored when the
	/// directory is already watched.
	pub buffer_size: usize,
	/// Skip events whose path is a directory.
	pub exclude_directory_events: bool,
}

impl Default for AddOptions {
	fn default() -> Self {
		Self {
			buffer_size: DEFAULT_BUFFER_SIZE,
			exclude_directory_events: false,
		}
	}
}

impl AddOptions {
	#[must_use]
	pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
		self.buffer_size = buffer_size;
		self
	}

	#[must_use]
	pub const fn exclude_directory_events(mut self, exclude: bool) -> Self {
		self.exclude_directory_events = exclude;
		self
	}

	pub fn validate(&self) -> Result<(), Error> {
		if self.buffer_size < MIN_BUFFER_SIZE {
			return Err(Error::BufferTooSmall {
				requested: self.buffer_size,
				minimum: MIN_BUFFER_SIZE,
			});
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn buffer_size_lower_bound() {
		assert!(AddOptions::default().validate().is_ok());
		assert!(AddOptions::default()
			.with_buffer_size(MIN_BUFFER_SIZE)
			.validate()
			.is_ok());
		assert!(matches!(
			AddOptions::default().with_buffer_size(4095).validate(),
			Err(Error::BufferTooSmall {
				requested: 4095,
				minimum: MIN_BUFFER_SIZE
			})
		));
	}

	#[test]
	fn zero_capacities_are_rejected() {
		assert!(WatcherConfig::default().validate().is_ok());
		assert!(matches!(
			WatcherConfig::default().with_event_capacity(0).validate(),
			Err(Error::InvalidConfig(_))
		));
		assert!(matches!(
			WatcherConfig::default().with_error_capacity(0).validate(),
			Err(Error::InvalidConfig(_))
		));
	}

	#[test]
	fn missing_fields_fall_back_to_defaults() {
		let config: WatcherConfig = serde_json::from_str(r#"{"event_capacity":1}"#).unwrap();
		assert_eq!(config.event_capacity, 1);
		assert_eq!(config.error_capacity, DEFAULT_ERROR_CAPACITY);

		let options: AddOptions =
			serde_json::from_str(r#"{"exclude_directory_events":true}"#).unwrap();
		assert_eq!(options.buffer_size, DEFAULT_BUFFER_SIZE);
		assert!(options.exclude_directory_events);
	}
}
