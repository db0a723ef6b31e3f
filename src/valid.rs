//! Self-consistency checks for model entities.
//!
//! An entity opts in by implementing [`CheckValid`]; callers then either
//! probe it directly (`check_valid`, which surfaces
//! [`Error::ValidationFailure`]) or hold a scoped guard over a region of
//! code that must preserve validity. The assertion-style guard is active
//! only in debug builds; the check-style guard stays active in release.

use crate::error::{Error, Result};

pub trait CheckValid {
    /// Entity-specific consistency predicate. The default accepts
    /// everything so partial implementations stay cheap.
    fn is_valid(&self) -> bool {
        true
    }

    fn check_valid(&self, what: &str) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::ValidationFailure(what.to_string()))
        }
    }
}

/// Scope guard that re-checks validity when dropped.
///
/// Construction fails if the subject is already inconsistent; a subject
/// that becomes inconsistent before scope exit panics in `drop`, since
/// that can only indicate a defect in the guarded region itself.
pub struct CheckValidGuard<'a, T: CheckValid + ?Sized> {
    subject: &'a T,
    what: &'a str,
}

pub fn check_valid_guard<'a, T: CheckValid + ?Sized>(
    subject: &'a T,
    what: &'a str,
) -> Result<CheckValidGuard<'a, T>> {
    subject.check_valid(what)?;
    Ok(CheckValidGuard { subject, what })
}

impl<T: CheckValid + ?Sized> Drop for CheckValidGuard<'_, T> {
    fn drop(&mut self) {
        if !self.subject.is_valid() && !std::thread::panicking() {
            panic!("validation failure on scope exit: {}", self.what);
        }
    }
}

/// Debug-only variant of [`CheckValidGuard`]; both the entry and the exit
/// check compile to nothing when debug assertions are disabled.
pub struct AssertValidGuard<'a, T: CheckValid + ?Sized> {
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    subject: &'a T,
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    what: &'a str,
}

pub fn assert_valid_guard<'a, T: CheckValid + ?Sized>(
    subject: &'a T,
    what: &'a str,
) -> AssertValidGuard<'a, T> {
    debug_assert!(subject.is_valid(), "validation failure: {what}");
    AssertValidGuard { subject, what }
}

impl<T: CheckValid + ?Sized> Drop for AssertValidGuard<'_, T> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !self.subject.is_valid() && !std::thread::panicking() {
            panic!("validation failure on scope exit: {}", self.what);
        }
    }
}
