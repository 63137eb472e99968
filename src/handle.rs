//! Owning wrapper over a raw OS descriptor with guaranteed close-on-drop.
//!
//! Grounded on `coronet::handle<I>` (CRTP base in the C++ reference): move
//! only, one live owner per descriptor, derived close must be infallible.
//! Rust has no CRTP, so the "derived close" becomes a type parameter `C`
//! bound by [`Close`] instead of a virtual/static-polymorphic method.

use std::fmt;

/// Types that know how to release a raw descriptor. Implementations must
/// not fail — the same contract `coronet::handle::~handle()` documents via
/// `static_assert(noexcept(...))`.
pub trait Close<T: Copy> {
    /// The sentinel value that marks "no descriptor owned".
    const INVALID: T;

    /// Releases `value`. Must be idempotent-safe to call at most once per
    /// live descriptor and must not panic.
    fn close(value: T);
}

/// Move-only owner of a raw descriptor of type `T`, closed via `C::close`
/// when dropped.
pub struct Handle<T: Copy + PartialEq, C: Close<T>> {
    value: T,
    _close: std::marker::PhantomData<C>,
}

impl<T: Copy + PartialEq, C: Close<T>> Handle<T, C> {
    /// Wraps an existing descriptor. Ownership transfers to the `Handle`.
    pub const fn new(value: T) -> Self {
        Self {
            value,
            _close: std::marker::PhantomData,
        }
    }

    /// A `Handle` that owns nothing.
    pub const fn invalid() -> Self {
        Self::new(C::INVALID)
    }

    pub fn valid(&self) -> bool {
        self.value != C::INVALID
    }

    pub fn value(&self) -> T {
        self.value
    }

    /// Closes any descriptor currently owned, then takes ownership of `new`.
    pub fn reset(&mut self, new: T) {
        if self.valid() {
            C::close(self.value);
        }
        self.value = new;
    }

    /// Relinquishes ownership without closing. The caller becomes
    /// responsible for the descriptor.
    #[must_use]
    pub fn release(&mut self) -> T {
        std::mem::replace(&mut self.value, C::INVALID)
    }
}

impl<T: Copy + PartialEq, C: Close<T>> Drop for Handle<T, C> {
    fn drop(&mut self) {
        if self.valid() {
            C::close(self.value);
        }
    }
}

impl<T: Copy + PartialEq, C: Close<T>> PartialEq for Handle<T, C> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

/// Descriptor-like scalars that can be rendered as a fixed-width hex value
/// for diagnostic logs, matching `coronet`'s `format_arg`/`operator<<`
/// overloads.
pub trait DescriptorValue {
    fn as_i64(&self) -> i64;
}

impl DescriptorValue for i32 {
    fn as_i64(&self) -> i64 {
        i64::from(*self)
    }
}

impl DescriptorValue for isize {
    fn as_i64(&self) -> i64 {
        *self as i64
    }
}

impl DescriptorValue for u64 {
    fn as_i64(&self) -> i64 {
        *self as i64
    }
}

impl<T: Copy + PartialEq + DescriptorValue, C: Close<T>> fmt::Debug for Handle<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.value.as_i64() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static CLOSED: Cell<i32> = const { Cell::new(0) };
    }

    struct Counting;
    impl Close<i32> for Counting {
        const INVALID: i32 = -1;
        fn close(_value: i32) {
            CLOSED.with(|c| c.set(c.get() + 1));
        }
    }

    #[test]
    fn closes_exactly_once_on_drop() {
        CLOSED.with(|c| c.set(0));
        {
            let h: Handle<i32, Counting> = Handle::new(7);
            assert!(h.valid());
        }
        CLOSED.with(|c| assert_eq!(c.get(), 1));
    }

    #[test]
    fn release_suppresses_close() {
        CLOSED.with(|c| c.set(0));
        {
            let mut h: Handle<i32, Counting> = Handle::new(7);
            assert_eq!(h.release(), 7);
            assert!(!h.valid());
        }
        CLOSED.with(|c| assert_eq!(c.get(), 0));
    }

    #[test]
    fn reset_closes_previous() {
        CLOSED.with(|c| c.set(0));
        let mut h: Handle<i32, Counting> = Handle::new(7);
        h.reset(8);
        CLOSED.with(|c| assert_eq!(c.get(), 1));
        assert_eq!(h.value(), 8);
    }

    #[test]
    fn invalid_is_not_valid() {
        let h: Handle<i32, Counting> = Handle::invalid();
        assert!(!h.valid());
    }
}
