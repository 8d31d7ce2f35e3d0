//! Per-file ordering key parsed from an NZB `<file subject="...">` attribute,
//! e.g. `[3/10] - "release.part3.rar" yEnc (1/200) 12345` sorts third among
//! its siblings regardless of upload order.

use lazy_regex::regex;

/// The leading `[N/total]` file index in a subject, used to stable-sort
/// `<file>` entries within a manifest. Subjects without a leading index sort
/// last, in original (subject-text) order among themselves.
pub(crate) fn file_number(subject: &str) -> u64 {
    regex!(r"^\s*(?:\[|\()(\d+)\s*/\s*\d+(?:\]|\))")
        .captures(subject)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(u64::MAX)
}
