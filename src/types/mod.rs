//! Plain data types shared across the link.
//!
//! - [`LinkFlags`] wraps the header's flag byte with named accessors
//! - [`sequence_after`] orders frame sequence numbers across the u16 wrap

mod link_flags;

pub use link_flags::{LinkFlags, sequence_after};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::flags;

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_sequence_comparison_handles_wraparound(seq in any::<u16>(), step in 1u16..0x8000) {
            let next = seq.wrapping_add(step);
            prop_assert!(sequence_after(next, seq));
            prop_assert!(!sequence_after(seq, next));
            prop_assert!(!sequence_after(seq, seq));
        }

        #[test]
        fn prop_flag_operations(value in any::<u8>(), bit_index in 0..8u32) {
            let link_flags = LinkFlags::new(value);
            let expected_bit_set = (value & (1 << bit_index)) != 0;
            prop_assert_eq!(link_flags.is_set(bit_index), expected_bit_set);
            prop_assert_eq!(link_flags.has_flag(1 << bit_index), expected_bit_set);
        }
    }

    #[test]
    fn sequence_wraps_from_max_to_zero() {
        assert!(sequence_after(0, u16::MAX));
        assert!(sequence_after(5, 65_530));
        assert!(!sequence_after(65_530, 5));
    }

    #[test]
    fn named_flag_accessors() {
        let link_flags = LinkFlags::new(flags::WANT_MOUSE | flags::PAUSED);
        assert!(link_flags.wants_mouse());
        assert!(link_flags.is_paused());
        assert!(!link_flags.wants_keyboard());
        assert!(!link_flags.is_tracking_only());
        assert!(LinkFlags::new(flags::NO_FRAME).is_tracking_only());
        assert!(LinkFlags::new(flags::WANT_KEYBOARD).wants_keyboard());
        assert!(!link_flags.is_set(9));
    }
}
