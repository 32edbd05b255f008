//! Upstream version normalization and ordering.
//!
//! Upstreams tag releases as `v1.2.0`, `cli-v1.2.0`, `1.2.0-rc.1` and so on.
//! Before a version lands in the catalog it is normalized into a form pacman
//! accepts as `pkgver` (no leading `v`, no `-`), and ordering between two
//! normalized versions follows pacman's `vercmp`.

use std::cmp::Ordering;

/// Normalize a raw upstream tag or version string.
///
/// 1. Strips `tag_prefix` when the string starts with it.
/// 2. Strips a single leading `v`.
/// 3. Maps `-` to `.`.
///
/// ```
/// use archrepo_schema::normalize_version;
///
/// assert_eq!(normalize_version("v1.2.0", ""), "1.2.0");
/// assert_eq!(normalize_version("cli-v2.0.0-rc-1", "cli-"), "2.0.0.rc.1");
/// ```
pub fn normalize_version(raw: &str, tag_prefix: &str) -> String {
    let raw = raw.trim();
    let without_prefix = if tag_prefix.is_empty() {
        raw
    } else {
        raw.strip_prefix(tag_prefix).unwrap_or(raw)
    };
    let without_v = without_prefix.strip_prefix('v').unwrap_or(without_prefix);
    without_v.replace('-', ".")
}

/// Whether a normalized version looks like a prerelease.
///
/// Any alphabetic segment (`rc1`, `beta`, `alpha.2`) marks a prerelease;
/// purely numeric versions are stable.
pub fn is_prerelease(version: &str) -> bool {
    version.chars().any(|c| c.is_ascii_alphabetic())
}

/// Compare two versions with pacman's `vercmp` rules.
///
/// Versions are split into alternating runs of digits and letters;
/// everything else is a separator. Numeric runs compare numerically,
/// alphabetic runs lexically, and a numeric run is always newer than an
/// alphabetic one. When one version runs out first, a trailing alphabetic
/// run makes the longer version older (`1.0rc1 < 1.0`), a trailing numeric
/// run makes it newer (`1.0 < 1.0.1`).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let one = a.as_bytes();
    let two = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    loop {
        while i < one.len() && !one[i].is_ascii_alphanumeric() {
            i += 1;
        }
        while j < two.len() && !two[j].is_ascii_alphanumeric() {
            j += 1;
        }
        if i >= one.len() || j >= two.len() {
            break;
        }

        let is_num = one[i].is_ascii_digit();
        let seg_one = take_run(one, &mut i, is_num);
        let seg_two = take_run(two, &mut j, is_num);

        // Segment kinds differ: the numeric side wins.
        if seg_two.is_empty() {
            return if is_num {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if is_num {
            compare_numeric(seg_one, seg_two)
        } else {
            seg_one.cmp(seg_two)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    let rest_one = &one[i.min(one.len())..];
    let rest_two = &two[j.min(two.len())..];
    if rest_one.is_empty() && rest_two.is_empty() {
        return Ordering::Equal;
    }

    // A remaining alphabetic run never beats an empty string.
    let one_alpha = rest_one.first().is_some_and(u8::is_ascii_alphabetic);
    let two_alpha = rest_two.first().is_some_and(u8::is_ascii_alphabetic);
    if (rest_one.is_empty() && !two_alpha) || one_alpha {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

fn take_run<'a>(bytes: &'a [u8], pos: &mut usize, numeric: bool) -> &'a [u8] {
    let start = *pos;
    while *pos < bytes.len()
        && if numeric {
            bytes[*pos].is_ascii_digit()
        } else {
            bytes[*pos].is_ascii_alphabetic()
        }
    {
        *pos += 1;
    }
    &bytes[start..*pos]
}

fn compare_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let strip = |s: &[u8]| -> usize { s.iter().take_while(|&&c| c == b'0').count() };
    let a = &a[strip(a)..];
    let b = &b[strip(b)..];
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
