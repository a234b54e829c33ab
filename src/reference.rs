use std::fmt::{Display, Formatter};

/// A lightweight handle to a node in the manager's store.
///
/// `Ref`s are the internal currency of the manager: freely copyable,
/// compared by index (diagrams are canonical, so index equality is
/// structural equality), and not reference-counted. They must never
/// escape to evaluator code; the owning handle for that is [`Dd`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Ref(u32);

impl Ref {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Return the index of the reference.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn unsigned(self) -> u64 {
        self.0 as u64
    }
}

impl Display for Ref {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// An owning handle to a diagram.
///
/// Every `Dd` carries exactly one external reference registered with the
/// manager. It is deliberately neither `Copy` nor `Clone`: duplication is
/// the explicit [`Mtbdd::copy`][crate::mtbdd::Mtbdd::copy], and disposal
/// is the explicit [`Mtbdd::release`][crate::mtbdd::Mtbdd::release].
/// Manager operations that take a `Dd` by value consume its reference.
#[derive(Debug)]
#[must_use]
pub struct Dd(Ref);

impl Dd {
    pub(crate) fn new(r: Ref) -> Self {
        Dd(r)
    }

    /// The underlying node reference. Borrowing only; the handle stays owned.
    pub fn raw(&self) -> Ref {
        self.0
    }
}

impl PartialEq for Dd {
    fn eq(&self, other: &Self) -> bool {
        // Canonicity: handle equality is structural equality.
        self.0 == other.0
    }
}

impl Display for Dd {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
