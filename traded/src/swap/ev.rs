//! Effort-value spread labels.
//!
//! Six-character labels use one designator per stat:
//! `M` max (252), `0` zero, `S` split the remaining budget, `A` keep as is.
//! Twelve-character labels carry one hex pair per stat, with `NN` meaning
//! zero and `SS` keeping the current value. `Reset` clears every stat.

const MAX_TOTAL: u32 = 510;
const MAX_STAT: u32 = 252;

pub const RESET_LABEL: &str = "Reset";

/// Whether `label` looks like a six-character designator spread.
pub fn is_designator_label(label: &str) -> bool {
    label.chars().count() == 6 && label.chars().all(|c| "M0SA".contains(c))
}

/// Whether `label` looks like a twelve-character hex spread.
pub fn is_hex_label(label: &str) -> bool {
    label.chars().count() == 12 && label.chars().all(|c| "0123456789ABCDEFSN".contains(c))
}

/// Decode an EV label against the payload's current spread.
///
/// Spreads over the 510 budget are rejected, never clamped.
pub fn decode_ev_spread(label: &str, current: [u8; 6]) -> Result<[u8; 6], String> {
    if label == RESET_LABEL {
        return Ok([0; 6]);
    }
    let chars: Vec<char> = label.chars().collect();
    match chars.len() {
        6 => decode_designators(&chars, current),
        12 => decode_hex(&chars, current),
        n => Err(format!("expected 6 or 12 characters, got {n}")),
    }
}

fn decode_designators(chars: &[char], current: [u8; 6]) -> Result<[u8; 6], String> {
    let mut spread = [0u32; 6];
    let mut split = Vec::new();
    for (i, c) in chars.iter().enumerate() {
        match c {
            'M' => spread[i] = MAX_STAT,
            '0' => spread[i] = 0,
            'S' => split.push(i),
            'A' => spread[i] = u32::from(current[i]),
            other => return Err(format!("unknown designator '{other}'")),
        }
    }

    let total: u32 = spread.iter().sum();
    if total > MAX_TOTAL {
        return Err(format!("total {total} exceeds {MAX_TOTAL}"));
    }
    if !split.is_empty() {
        let share = ((MAX_TOTAL - total) / split.len() as u32).min(MAX_STAT);
        for i in split {
            spread[i] = share;
        }
    }
    finish(spread)
}

fn decode_hex(chars: &[char], current: [u8; 6]) -> Result<[u8; 6], String> {
    let mut spread = [0u32; 6];
    for (i, pair) in chars.chunks(2).enumerate() {
        let text: String = pair.iter().collect();
        spread[i] = match text.as_str() {
            "NN" => 0,
            "SS" => u32::from(current[i]),
            hex => u32::from_str_radix(hex, 16)
                .map_err(|_| format!("'{hex}' is not a hex pair"))?
                .min(MAX_STAT),
        };
    }
    finish(spread)
}

fn finish(spread: [u32; 6]) -> Result<[u8; 6], String> {
    let total: u32 = spread.iter().sum();
    if total > MAX_TOTAL {
        return Err(format!("total {total} exceeds {MAX_TOTAL}"));
    }
    let mut out = [0u8; 6];
    for (slot, value) in out.iter_mut().zip(spread) {
        // Each value came from a u8 or was capped at 252.
        *slot = value as u8;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn all_max_is_rejected_not_clamped() {
        assert!(decode_ev_spread("MMMMMM", [0; 6]).is_err());
    }

    #[test]
    fn all_zero_succeeds() {
        assert_eq!(decode_ev_spread("000000", [10; 6]), Ok([0; 6]));
    }

    #[test]
    fn split_shares_remaining_budget() {
        assert_eq!(
            decode_ev_spread("M00SS0", [0; 6]),
            Ok([252, 0, 0, 129, 129, 0])
        );
        // A lone split slot is capped at 252.
        assert_eq!(decode_ev_spread("S00000", [0; 6]), Ok([252, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn keep_designator_reads_current_values() {
        assert_eq!(
            decode_ev_spread("AM0000", [100, 0, 0, 0, 0, 0]),
            Ok([100, 252, 0, 0, 0, 0])
        );
        assert!(decode_ev_spread("AAMM00", [10, 10, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn hex_pairs_decode_and_cap() {
        assert_eq!(
            decode_ev_spread("FCNN00SS0404", [0, 0, 0, 50, 0, 0]),
            Ok([252, 0, 0, 50, 4, 4])
        );
        assert_eq!(
            decode_ev_spread("FFFF00000000", [0; 6]),
            Ok([252, 252, 0, 0, 0, 0])
        );
        assert!(decode_ev_spread("FCFCFC000000", [0; 6]).is_err());
        assert!(decode_ev_spread("S0NN00000000", [0; 6]).is_err());
    }

    #[test]
    fn reset_and_bad_lengths() {
        assert_eq!(decode_ev_spread(RESET_LABEL, [9; 6]), Ok([0; 6]));
        assert!(decode_ev_spread("MM", [0; 6]).is_err());
    }

    #[test]
    fn label_shapes() {
        assert!(is_designator_label("MMS0A0"));
        assert!(!is_designator_label("MMS0A"));
        assert!(is_hex_label("FCNN00SS0404"));
        assert!(!is_hex_label("fcnn00ss0404"));
    }

    proptest! {
        #[test]
        fn designator_results_respect_budget(label in "[M0SA]{6}", current in proptest::array::uniform6(0u8..=252)) {
            if let Ok(spread) = decode_ev_spread(&label, current) {
                let total: u32 = spread.iter().map(|&v| u32::from(v)).sum();
                prop_assert!(total <= 510);
                prop_assert!(spread.iter().all(|&v| v <= 252));
            }
        }
    }
}
