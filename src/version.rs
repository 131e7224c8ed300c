use std::cmp::Ordering;
use std::num::IntErrorKind;

use once_cell::sync::Lazy;
use regex::Regex;

pub const FALLBACK_VERSION: &str = "0.0.0";

static LEADING_NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^0-9]*").expect("valid leading prefix regex"));
static NON_VERSION_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9.]").expect("valid version charset regex"));
static REPEATED_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").expect("valid repeated dot regex"));

/// Reduces a tag such as `v1.2.3-beta` to its dotted numeric core (`1.2.3`).
pub fn normalize(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped = LEADING_NON_DIGITS.replace(&lowered, "");
    let digits = NON_VERSION_CHARS.replace_all(&stripped, "");
    let collapsed = REPEATED_DOTS.replace_all(&digits, ".");
    let trimmed = collapsed.strip_suffix('.').unwrap_or(&collapsed);
    if trimmed.is_empty() {
        FALLBACK_VERSION.to_string()
    } else {
        trimmed.to_string()
    }
}

fn components(raw: &str) -> Vec<u64> {
    normalize(raw)
        .split('.')
        .map(|part| match part.parse::<u64>() {
            Ok(value) => value,
            // Digits only reach here, so the one failure left is overflow.
            Err(err) if *err.kind() == IntErrorKind::PosOverflow => u64::MAX,
            Err(_) => 0,
        })
        .collect()
}

/// Component-wise numeric comparison; missing trailing components count as 0.
pub fn compare(a: &str, b: &str) -> Ordering {
    let left = components(a);
    let right = components(b);
    let len = left.len().max(right.len());
    for idx in 0..len {
        let l = left.get(idx).copied().unwrap_or(0);
        let r = right.get(idx).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// `compare` as the `-1 / 0 / 1` integer used by the bridge.
pub fn compare_sign(a: &str, b: &str) -> i8 {
    match compare(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

pub fn is_at_least(local: &str, remote: &str) -> bool {
    compare(local, remote) != Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_prefix_and_suffix_noise() {
        assert_eq!(normalize("v1.2.3-beta"), "1.2.3");
        assert_eq!(normalize("Release 2.0"), "2.0");
        assert_eq!(normalize("1..4."), "1.4");
        assert_eq!(normalize(""), "0.0.0");
        assert_eq!(normalize("garbage"), "0.0.0");
    }

    #[test]
    fn compare_is_reflexive_over_odd_inputs() {
        for raw in ["", "v", "1", "v1.2.3-beta", "..7..", "10.0.0.1", "abc1.x2"] {
            let norm = normalize(raw);
            assert_eq!(compare(&norm, &norm), Ordering::Equal, "input {raw:?}");
        }
    }

    #[test]
    fn compare_is_antisymmetric() {
        let samples = ["v1.2.3-beta", "1.2.3", "1.2", "1.10", "0.9.9", "junk", "2"];
        for a in samples {
            for b in samples {
                assert_eq!(compare_sign(a, b), -compare_sign(b, a), "{a:?} vs {b:?}");
            }
        }
        assert_eq!(compare("v1.2.3-beta", "1.2.3"), Ordering::Equal);
    }

    #[test]
    fn missing_components_are_zero() {
        assert_eq!(compare("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare("1.2.1", "1.2"), Ordering::Greater);
        assert_eq!(compare("1.9", "1.10"), Ordering::Less);
        assert!(is_at_least("1.4.0", "1.3.9"));
        assert!(!is_at_least("1.3.0", "1.4.0"));
    }

    #[test]
    fn oversized_components_saturate() {
        assert_eq!(compare("99999999999999999999", "1"), Ordering::Greater);
        assert_eq!(compare("1.99999999999999999999", "1.18446744073709551614"), Ordering::Greater);
        assert_eq!(compare_sign("2", "99999999999999999999.0"), -1);
    }
}
