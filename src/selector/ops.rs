use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use super::poller::Interest;

/// Set of selectable operations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ops(u8);

impl Ops {
    pub const EMPTY: Ops = Ops(0);
    pub const READ: Ops = Ops(1 << 0);
    pub const WRITE: Ops = Ops(1 << 2);
    pub const CONNECT: Ops = Ops(1 << 3);
    pub const ACCEPT: Ops = Ops(1 << 4);

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Builds a set from raw bits, dropping unknown ones.
    pub fn from_bits_truncate(bits: u8) -> Ops {
        Ops(bits & (Self::READ | Self::WRITE | Self::CONNECT | Self::ACCEPT).0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: Ops) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Ops) -> bool {
        self.0 & other.0 != 0
    }

    /// Poll directions needed to observe these operations, if any.
    pub(crate) fn poll_interest(&self) -> Option<Interest> {
        let readable = self.intersects(Ops::READ | Ops::ACCEPT);
        let writable = self.intersects(Ops::WRITE | Ops::CONNECT);
        match (readable, writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl BitOr for Ops {
    type Output = Ops;
    fn bitor(self, rhs: Ops) -> Ops {
        Ops(self.0 | rhs.0)
    }
}

impl BitOrAssign for Ops {
    fn bitor_assign(&mut self, rhs: Ops) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Ops {
    type Output = Ops;
    fn bitand(self, rhs: Ops) -> Ops {
        Ops(self.0 & rhs.0)
    }
}

impl Not for Ops {
    type Output = Ops;
    fn not(self) -> Ops {
        Ops::from_bits_truncate(!self.0)
    }
}

impl fmt::Debug for Ops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Ops::READ, "READ"),
            (Ops::WRITE, "WRITE"),
            (Ops::CONNECT, "CONNECT"),
            (Ops::ACCEPT, "ACCEPT"),
        ];
        let mut first = true;
        for (op, name) in names {
            if self.contains(op) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("(empty)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_intersects() {
        let ops = Ops::READ | Ops::WRITE;
        assert!(ops.contains(Ops::READ));
        assert!(!ops.contains(Ops::READ | Ops::CONNECT));
        assert!(ops.intersects(Ops::WRITE | Ops::CONNECT));
        assert!(Ops::EMPTY.is_empty());
    }

    #[test]
    fn test_poll_interest() {
        let interest = Ops::CONNECT.poll_interest().unwrap();
        assert!(interest.is_writable());
        assert!(!interest.is_readable());

        let interest = (Ops::ACCEPT | Ops::WRITE).poll_interest().unwrap();
        assert!(interest.is_readable() && interest.is_writable());

        assert!(Ops::EMPTY.poll_interest().is_none());
    }

    #[test]
    fn test_not_stays_in_range() {
        let rest = !Ops::READ;
        assert!(!rest.contains(Ops::READ));
        assert_eq!(rest, Ops::WRITE | Ops::CONNECT | Ops::ACCEPT);
    }

    #[test]
    fn test_debug() {
        assert_eq!(format!("{:?}", Ops::READ | Ops::ACCEPT), "READ | ACCEPT");
        assert_eq!(format!("{:?}", Ops::EMPTY), "(empty)");
    }
}
