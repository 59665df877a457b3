//! dpkg-style version comparison.
//!
//! Out of scope to *design* per the component list — the coordinator treats
//! version ordering as an external collaborator — but something has to
//! implement it. Grounded on `debian_support.version_compare`, which
//! `autoimport.py` calls to decide which of two same-named packages is
//! newer, and on the `comparable_dpkgver` SQL helper the teacher references
//! in `scan/dbscan.rs` for the same purpose over stored rows.

use std::cmp::Ordering;

/// Compares two Debian package version strings
/// (`[epoch:]upstream-version[-debian-revision]`) per `deb-version(7)`.
pub fn version_compare(a: &str, b: &str) -> Ordering {
    let (epoch_a, upstream_a, revision_a) = split_version(a);
    let (epoch_b, upstream_b, revision_b) = split_version(b);

    epoch_a
        .cmp(&epoch_b)
        .then_with(|| compare_part(upstream_a, upstream_b))
        .then_with(|| compare_part(revision_a, revision_b))
}

fn split_version(version: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match version.split_once(':') {
        Some((epoch, rest)) => (epoch.parse().unwrap_or(0), rest),
        None => (0, version),
    };
    match rest.rfind('-') {
        Some(idx) => (epoch, &rest[..idx], &rest[idx + 1..]),
        None => (epoch, rest, ""),
    }
}

/// Orders one character of a non-digit run: `~` sorts before everything,
/// including the end of the string; letters sort before every other
/// character; everything else compares by ASCII value.
fn char_order(c: Option<char>) -> i32 {
    match c {
        None => -1,
        Some('~') => -2,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

fn compare_nondigit_run(a: &str, b: &str) -> Ordering {
    let mut ac = a.chars();
    let mut bc = b.chars();
    loop {
        let ca = ac.next();
        let cb = bc.next();
        if ca.is_none() && cb.is_none() {
            return Ordering::Equal;
        }
        let cmp = char_order(ca).cmp(&char_order(cb));
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
}

fn take_nondigits(s: &str) -> (&str, &str) {
    let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(split)
}

fn take_digits(s: &str) -> (&str, &str) {
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(split)
}

/// Compares `upstream_version` or `debian_revision` fragments by alternating
/// between non-digit runs (compared character-by-character via
/// `compare_nondigit_run`) and digit runs (compared numerically).
fn compare_part(mut a: &str, mut b: &str) -> Ordering {
    loop {
        let (a_nondigit, a_rest) = take_nondigits(a);
        let (b_nondigit, b_rest) = take_nondigits(b);
        let cmp = compare_nondigit_run(a_nondigit, b_nondigit);
        if cmp != Ordering::Equal {
            return cmp;
        }

        let (a_digits, a_rest) = take_digits(a_rest);
        let (b_digits, b_rest) = take_digits(b_rest);
        let an: u64 = a_digits.trim_start_matches('0').parse().unwrap_or(0);
        let bn: u64 = b_digits.trim_start_matches('0').parse().unwrap_or(0);
        let cmp = an.cmp(&bn);
        if cmp != Ordering::Equal {
            return cmp;
        }

        if a_rest.is_empty() && b_rest.is_empty() {
            return Ordering::Equal;
        }
        a = a_rest;
        b = b_rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gt(a: &str, b: &str) {
        assert_eq!(version_compare(a, b), Ordering::Greater, "{a} should be > {b}");
        assert_eq!(version_compare(b, a), Ordering::Less, "{b} should be < {a}");
    }

    #[test]
    fn compares_simple_upstream_versions() {
        gt("2.0", "1.0");
        gt("1.10", "1.9");
        assert_eq!(version_compare("1.0", "1.0"), Ordering::Equal);
    }

    #[test]
    fn epoch_dominates_upstream() {
        gt("1:0.5", "2.0");
    }

    #[test]
    fn tilde_sorts_before_everything() {
        gt("1.0", "1.0~beta1");
        gt("1.0~beta2", "1.0~beta1");
        gt("1.0~beta1", "1.0~~");
    }

    #[test]
    fn debian_revision_breaks_ties() {
        gt("1.0-2", "1.0-1");
        assert_eq!(version_compare("1.0-1", "1.0"), Ordering::Greater);
    }

    #[test]
    fn letters_sort_before_punctuation() {
        gt("1.0+", "1.0a");
    }
}
