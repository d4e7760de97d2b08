/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Debug, Formatter};
use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};

use mio::event::Event;

const ACCEPTABLE: u8 = 0b0001;
const READABLE: u8 = 0b0010;
const WRITABLE: u8 = 0b0100;
const CONNECTABLE: u8 = 0b1000;

const READ_SIDE: u8 = ACCEPTABLE | READABLE;
const WRITE_SIDE: u8 = WRITABLE | CONNECTABLE;

/// A set of readiness operations
///
/// Used both as the *interest set* of a registration and as the *ready set*
/// reported for a selected key. Sets are combined with `|`, intersected with
/// `&` and reduced with `-`:
///
/// ```
/// use mnio_rs::Interest;
///
/// let interest = Interest::READABLE | Interest::WRITABLE;
/// assert!(interest.contains(Interest::WRITABLE));
/// assert_eq!(interest - Interest::WRITABLE, Interest::READABLE);
/// ```
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    /// The empty set
    pub const NONE: Interest = Interest(0);
    /// A listening channel has a pending connection.
    pub const ACCEPTABLE: Interest = Interest(ACCEPTABLE);
    /// A channel can be read without blocking.
    pub const READABLE: Interest = Interest(READABLE);
    /// A channel can be written without blocking.
    pub const WRITABLE: Interest = Interest(WRITABLE);
    /// A pending stream connection is ready to be finished.
    pub const CONNECTABLE: Interest = Interest(CONNECTABLE);

    pub const fn add(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    pub const fn remove(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }

    pub const fn contains(self, other: Interest) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn intersects(self, other: Interest) -> bool {
        (self.0 & other.0) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_acceptable(self) -> bool {
        (self.0 & ACCEPTABLE) != 0
    }

    pub const fn is_readable(self) -> bool {
        (self.0 & READABLE) != 0
    }

    pub const fn is_writable(self) -> bool {
        (self.0 & WRITABLE) != 0
    }

    pub const fn is_connectable(self) -> bool {
        (self.0 & CONNECTABLE) != 0
    }

    pub(crate) const fn bits(self) -> u8 {
        self.0
    }

    pub(crate) const fn from_bits(bits: u8) -> Interest {
        Interest(bits & (READ_SIDE | WRITE_SIDE))
    }

    /// Maps onto the OS-level interest; `None` means nothing to watch.
    pub(crate) fn to_mio(self) -> Option<mio::Interest> {
        match ((self.0 & READ_SIDE) != 0, (self.0 & WRITE_SIDE) != 0) {
            (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Readiness reported by an OS event. Read-side readiness covers accept,
    /// write-side readiness covers connect completion; errors and hang-ups
    /// mark both sides so the next operation surfaces them.
    pub(crate) fn from_event(event: &Event) -> Interest {
        let mut bits = 0;
        if event.is_readable() || event.is_read_closed() {
            bits |= READ_SIDE;
        }
        if event.is_writable() || event.is_write_closed() {
            bits |= WRITE_SIDE;
        }
        if event.is_error() {
            bits |= READ_SIDE | WRITE_SIDE;
        }
        Interest(bits)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, other: Interest) -> Interest {
        self.add(other)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, other: Interest) {
        *self = self.add(other);
    }
}

impl BitAnd for Interest {
    type Output = Interest;

    fn bitand(self, other: Interest) -> Interest {
        Interest(self.0 & other.0)
    }
}

impl Sub for Interest {
    type Output = Interest;

    fn sub(self, other: Interest) -> Interest {
        self.remove(other)
    }
}

impl Debug for Interest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let names = [
            (ACCEPTABLE, "ACCEPTABLE"),
            (READABLE, "READABLE"),
            (WRITABLE, "WRITABLE"),
            (CONNECTABLE, "CONNECTABLE"),
        ];
        let mut separator = false;
        for (bit, name) in names {
            if (self.0 & bit) != 0 {
                if separator {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                separator = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_reduce() {
        let interest = Interest::ACCEPTABLE | Interest::READABLE;
        assert!(interest.is_acceptable());
        assert!(interest.is_readable());
        assert!(!interest.is_writable());
        assert!(interest.intersects(Interest::READABLE | Interest::WRITABLE));
        assert_eq!(interest - Interest::ACCEPTABLE, Interest::READABLE);
        assert!((interest - interest).is_empty());
        assert_eq!(interest & Interest::READABLE, Interest::READABLE);
    }

    #[test]
    fn maps_onto_os_interest() {
        assert_eq!(Interest::NONE.to_mio(), None);
        assert_eq!(Interest::ACCEPTABLE.to_mio(), Some(mio::Interest::READABLE));
        assert_eq!(Interest::CONNECTABLE.to_mio(), Some(mio::Interest::WRITABLE));
        assert_eq!(
            (Interest::READABLE | Interest::WRITABLE).to_mio(),
            Some(mio::Interest::READABLE | mio::Interest::WRITABLE)
        );
    }

    #[test]
    fn debug_lists_members() {
        assert_eq!(format!("{:?}", Interest::READABLE | Interest::WRITABLE), "READABLE | WRITABLE");
        assert_eq!(format!("{:?}", Interest::NONE), "NONE");
    }
}
