//! Filename to DNS label sanitization
//!
//! Turns an arbitrary filename into a hostname-compliant label made only of
//! `[a-z0-9-]`. The steps are order-sensitive:
//!
//! 1. drop every byte outside 7-bit ASCII
//! 2. lowercase
//! 3. replace every remaining character outside `[a-z0-9-]` with `-`
//!
//! No truncation happens here. A label longer than 63 bytes, or a label that
//! pushes `<label>.<mode>.<index>.<zone>` past 253 bytes, is served but can
//! never be queried.

use std::ffi::OsStr;

/// Maximum bytes per DNS label (RFC 1035)
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum total QNAME length
pub const MAX_QNAME_LEN: usize = 253;

/// Sanitize raw filename bytes into a DNS label
pub fn sanitize_bytes(raw: &[u8]) -> String {
    raw.iter()
        .filter(|b| b.is_ascii())
        .map(|b| b.to_ascii_lowercase())
        .map(|b| match b {
            b'a'..=b'z' | b'0'..=b'9' | b'-' => b as char,
            _ => '-',
        })
        .collect()
}

/// Sanitize a filename into a DNS label
pub fn sanitize(name: &str) -> String {
    sanitize_bytes(name.as_bytes())
}

/// Sanitize an OS filename, which may not be valid UTF-8
pub fn sanitize_os(name: &OsStr) -> String {
    sanitize_bytes(name.as_encoded_bytes())
}

/// Check whether a label (plus zone and addressing overhead) stays within
/// DNS name limits
pub fn fits_dns_limits(label: &str, zone: &str) -> bool {
    // "<label>.save.<index>.<zone>" is the longest name a client will build
    const ADDRESSING_OVERHEAD: usize = ".save.".len() + 10 + 1;

    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && label.len() + ADDRESSING_OVERHEAD + zone.len() <= MAX_QNAME_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_label_safe(s: &str) -> bool {
        s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    }

    #[test]
    fn test_dot_becomes_dash() {
        assert_eq!(sanitize("payload.bin"), "payload-bin");
    }

    #[test]
    fn test_uppercase_and_symbols() {
        assert_eq!(sanitize("Invoke-Mimikatz.PS1"), "invoke-mimikatz-ps1");
        assert_eq!(sanitize("my file (1).txt"), "my-file--1--txt");
        assert_eq!(sanitize("under_score"), "under-score");
    }

    #[test]
    fn test_non_ascii_dropped_before_replacement() {
        // Non-ASCII is removed entirely, not replaced with '-'
        assert_eq!(sanitize("résumé.pdf"), "rsum-pdf");
        assert_eq!(sanitize("日本.txt"), "-txt");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "payload.bin",
            "Some File.EXE",
            "ünïcödé__name",
            "",
            "already-safe-123",
            "\u{7f}\t\n",
        ];

        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "not idempotent for {:?}", input);
            assert!(is_label_safe(&once), "unsafe output {:?}", once);
        }
    }

    #[test]
    fn test_raw_bytes_outside_utf8() {
        let raw = [b'A', 0xff, 0xfe, b'.', b'z'];
        assert_eq!(sanitize_bytes(&raw), "a-z");
    }

    #[test]
    fn test_dns_limits() {
        assert!(fits_dns_limits("payload-bin", "example.com"));
        assert!(!fits_dns_limits("", "example.com"));
        assert!(!fits_dns_limits(&"a".repeat(64), "example.com"));
        assert!(!fits_dns_limits(&"a".repeat(60), &"z".repeat(190)));
    }
}
