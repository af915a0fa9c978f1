use crate::constants::{PUZZLE_SEQUENCE_LEN, PUZZLE_VARIATIONS};

/// Target escape sequence for a round. Rounds cycle through the fixed
/// variation table, so clients and server agree without negotiation.
pub fn target_sequence(round_number: u32) -> [u8; PUZZLE_SEQUENCE_LEN] {
    PUZZLE_VARIATIONS[round_number as usize % PUZZLE_VARIATIONS.len()]
}

pub fn check_sequence(round_number: u32, submitted: &[u8]) -> bool {
    submitted == target_sequence(round_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_cycle_by_round() {
        assert_eq!(target_sequence(1), target_sequence(6));
        assert_ne!(target_sequence(1), target_sequence(2));
    }

    #[test]
    fn check_accepts_exact_match_only() {
        let target = target_sequence(3);
        assert!(check_sequence(3, &target));
        assert!(!check_sequence(3, &target[..3]));
        assert!(!check_sequence(3, &[9, 9, 9, 9]));
    }

    #[test]
    fn every_variation_is_a_permutation_of_one_to_four() {
        for variation in PUZZLE_VARIATIONS {
            let mut sorted = variation;
            sorted.sort();
            assert_eq!(sorted, [1, 2, 3, 4]);
        }
    }
}
