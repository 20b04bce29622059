use std::path::PathBuf;

use async_channel as chan;

use crate::{config::AddOptions, error::Error, translate::Interest};

pub(crate) type Ack = chan::Sender<Result<(), Error>>;

/// Requests handed to the I/O thread. Each one is followed by exactly one kernel wake-up.
#[derive(Debug)]
pub(crate) enum Command {
	Add {
		path: PathBuf,
		interest: Interest,
		options: AddOptions,
		ack: Ack,
	},
	Remove {
		path: PathBuf,
		ack: Ack,
	},
	Shutdown(Ack),
}

impl Command {
	/// Answers a command that arrived after the I/O thread stopped taking new work.
	pub(crate) fn reject(self) {
		let (ack, result) = match self {
			Self::Add { ack, .. } | Self::Remove { ack, .. } => (ack, Err(Error::AlreadyClosed)),
			Self::Shutdown(ack) => (ack, Ok(())),
		};

		// The caller may have given up waiting already.
		ack.try_send(result).ok();
	}
}
