//! Maps kernel action codes and registered interest onto the public [`Op`] taxonomy.

use bitflags::bitflags;

use crate::{event::Op, kernel::NotifyFilter, record::Action};

bitflags! {
	/// What a registration wants to hear about, and what a single record reports.
	///
	/// `*_SELF` bits describe the registered entry itself rather than a child of it.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub(crate) struct Interest: u32 {
		const MODIFY      = 0x0002;
		const MOVED_FROM  = 0x0040;
		const MOVED_TO    = 0x0080;
		const CREATE      = 0x0100;
		const DELETE      = 0x0200;
		const DELETE_SELF = 0x0400;
		const MOVE_SELF   = 0x0800;

		const MOVE       = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();
		const ALL_EVENTS = Self::MODIFY.bits()
			| Self::MOVE.bits()
			| Self::CREATE.bits()
			| Self::DELETE.bits()
			| Self::DELETE_SELF.bits()
			| Self::MOVE_SELF.bits();
	}
}

impl Interest {
	pub(crate) const fn from_action(action: Action) -> Self {
		match action {
			Action::Added => Self::CREATE,
			Action::Removed => Self::DELETE,
			Action::Modified => Self::MODIFY,
			Action::RenamedOldName => Self::MOVED_FROM,
			Action::RenamedNewName => Self::MOVED_TO,
			Action::Other(_) => Self::empty(),
		}
	}

	pub(crate) fn to_op(self) -> Op {
		let mut op = Op::empty();

		if self.intersects(Self::CREATE | Self::MOVED_TO) {
			op |= Op::CREATE;
		}
		if self.intersects(Self::DELETE | Self::DELETE_SELF) {
			op |= Op::REMOVE;
		}
		if self.contains(Self::MODIFY) {
			op |= Op::WRITE;
		}
		if self.intersects(Self::MOVED_FROM | Self::MOVE_SELF) {
			op |= Op::RENAME;
		}

		op
	}

	pub(crate) fn to_filter(self) -> NotifyFilter {
		let mut filter = NotifyFilter::empty();

		if self.contains(Self::MODIFY) {
			filter |= NotifyFilter::LAST_WRITE;
		}
		if self.intersects(Self::MOVE | Self::CREATE | Self::DELETE) {
			filter |= NotifyFilter::FILE_NAME | NotifyFilter::DIR_NAME;
		}

		filter
	}
}
