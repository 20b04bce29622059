//! Prints every change under the directories given on the command line.
//!
//! ```text
//! RUST_LOG=sd_dir_notify=debug cargo run -p sd-dir-notify --example watch -- C:\some\dir
//! ```

#[cfg(windows)]
fn main() -> Result<(), sd_dir_notify::Error> {
	use std::{env, thread};

	use sd_dir_notify::Watcher;
	use tracing::{error, info};
	use tracing_subscriber::EnvFilter;

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.init();

	let watcher = Watcher::new()?;

	for path in env::args_os().skip(1) {
		watcher.add(&path)?;
		info!(path = ?path, "Watching;");
	}

	let errors = watcher.errors();
	thread::spawn(move || {
		while let Ok(e) = errors.recv_blocking() {
			error!(?e, "Watcher error;");
		}
	});

	let events = watcher.events();
	while let Ok(event) = events.recv_blocking() {
		println!("{event}");
	}

	Ok(())
}

#[cfg(not(windows))]
fn main() {
	eprintln!("this example needs the Windows directory change backend");
}
