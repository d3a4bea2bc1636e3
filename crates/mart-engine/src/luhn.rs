//! Checksum validation for order numbers.
//!
//! Order numbers are digit strings whose last digit is a Luhn check digit.
//! Validation happens once at the submission edge; storage and the queue
//! treat numbers as opaque strings after that.

/// Returns true when `number` is a non-empty digit string that satisfies
/// the Luhn checksum.
///
/// Any non-digit character fails the whole number; there is no whitespace
/// or separator tolerance.
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let mut sum: u32 = 0;
    let mut double = false;
    for ch in number.chars().rev() {
        let Some(mut digit) = ch.to_digit(10) else {
            return false;
        };
        if double {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
        double = !double;
    }
    sum % 10 == 0
}
