//! Load-address correction
//!
//! The agent reports raw return addresses from a relocated image. The
//! executable on disk places the same code at its link-time address. One
//! anchor symbol known on both sides gives the difference:
//!
//! ```text
//! offset    = static_anchor - runtime_anchor
//! corrected = runtime_frame + offset
//! ```
//!
//! Computed once per session and applied to every frame before
//! fingerprinting and symbol lookup.

use allocview_common::Stack;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressCorrection {
    offset: i64,
}

impl AddressCorrection {
    /// No correction.
    pub const IDENTITY: AddressCorrection = AddressCorrection { offset: 0 };

    #[must_use]
    #[allow(clippy::cast_possible_wrap)] // two's-complement difference
    pub fn between(static_addr: u64, runtime_addr: u64) -> Self {
        Self { offset: static_addr.wrapping_sub(runtime_addr) as i64 }
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    #[must_use]
    pub fn apply(&self, addr: u64) -> u64 {
        addr.wrapping_add_signed(self.offset)
    }

    /// Correct every frame; the zero terminator is left untouched.
    #[must_use]
    pub fn apply_stack(&self, stack: &Stack) -> Stack {
        if self.offset == 0 {
            return *stack;
        }
        stack.map_frames(|pc| self.apply(pc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_from_anchor() {
        let c = AddressCorrection::between(0x1000, 0x5000);
        assert_eq!(c.offset(), -0x4000);
        assert_eq!(c.apply(0x5010), 0x1010);
    }

    #[test]
    fn test_positive_offset() {
        let c = AddressCorrection::between(0x40_1000, 0x1000);
        assert_eq!(c.offset(), 0x40_0000);
        assert_eq!(c.apply(0x1234), 0x40_1234);
    }

    #[test]
    fn test_apply_stack_keeps_terminator() {
        let c = AddressCorrection::between(0x1000, 0x5000);
        let corrected = c.apply_stack(&Stack::from_frames(&[0x5010, 0x5020]));
        assert_eq!(corrected, Stack::from_frames(&[0x1010, 0x1020]));
        assert_eq!(AddressCorrection::IDENTITY.apply(0x5010), 0x5010);
    }

    #[test]
    fn test_high_addresses_wrap() {
        let c = AddressCorrection::between(0x1000, 0x7fff_0000_1000);
        assert_eq!(c.apply(0x7fff_0000_1010), 0x1010);
    }
}
