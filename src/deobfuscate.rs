//! Recovering a plausible real filename for a manifest-declared name that
//! matches the obfuscation heuristic, trying strategies in order and
//! stopping at the first success.

use std::collections::HashMap;

use lazy_regex::regex;

use crate::model::Par2FileDescriptor;
use crate::obfuscation::is_obfuscated;

/// Strategy 1: match the target file's first-16KiB MD5 against a PAR2
/// file-description index built from the smallest non-recovery PAR2 file.
#[must_use]
pub fn match_par2_descriptor(
    index: &HashMap<[u8; 16], Par2FileDescriptor>,
    first16k_md5: [u8; 16],
) -> Option<&Par2FileDescriptor> {
    index.get(&first16k_md5)
}

/// Strategy 2: the yEnc header's filename, if it differs from the
/// manifest's declared name and isn't itself obfuscated.
#[must_use]
pub fn yenc_name_if_usable(manifest_name: &str, yenc_name: Option<&str>) -> Option<String> {
    let candidate = yenc_name?;
    if candidate.is_empty() || candidate == manifest_name {
        return None;
    }
    let stem = crate::subparsers::split_filename_at_extension(candidate).0;
    if is_obfuscated(stem) {
        return None;
    }
    Some(candidate.to_owned())
}

/// Strategy 3: name-pattern cleanup — strip a leading `abc.xyz.` marker,
/// drop bracketed `[Word]` spans, collapse runs of dots, and trim leading/
/// trailing separators. If the cleaned result is too short to be useful,
/// fall back to re-extracting "meaningful" delimited parts.
#[must_use]
pub fn cleanup_name_pattern(name: &str) -> String {
    let mut s = name.to_owned();

    if let Some(rest) = s.strip_prefix("abc.xyz.") {
        s = rest.to_owned();
    }

    s = regex!(r"\[\w+\]").replace_all(&s, "").into_owned();
    s = regex!(r"\.{2,}").replace_all(&s, ".").into_owned();
    s = s.trim_matches(|c: char| c == '.' || c == '-' || c == '_').to_owned();

    if s.len() < 3 {
        return extract_meaningful_parts(name);
    }

    s
}

fn extract_meaningful_parts(name: &str) -> String {
    let parts: Vec<&str> = name
        .split(|c: char| c == '.' || c == '-' || c == ' ')
        .filter(|part| {
            let len = part.len();
            if len < 3 {
                return false;
            }
            if len == 32 && regex!(r"^[a-f0-9]{32}$"i).is_match(part) {
                return false;
            }
            if len >= 20 && regex!(r"^[A-Za-z0-9]+$").is_match(part) {
                return false;
            }
            true
        })
        .collect();

    parts.join(".")
}

/// Title-cases a PAR2-derived fallback basename, e.g. `movie.title.2023` to
/// `Movie.Title.2023`, after `.par2`/`.volNN+MM` suffixes have been stripped
/// by the caller.
#[must_use]
pub fn title_case_words(base: &str) -> String {
    base.split('.')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Strips `.par2` and a trailing `.volNN+MM` marker from a PAR2 filename,
/// leaving the base release name.
#[must_use]
pub fn par2_base_name(par2_filename: &str) -> String {
    let without_par2 = regex!(r"\.par2$"i).replace(par2_filename, "");
    regex!(r"\.vol\d+\+\d+$"i).replace(&without_par2, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_strips_abc_xyz_prefix_and_brackets() {
        let cleaned = cleanup_name_pattern("abc.xyz.Movie.Title.2023.[Group].mkv");
        assert_eq!(cleaned, "Movie.Title.2023.mkv");
    }

    #[test]
    fn cleanup_collapses_dot_runs() {
        let cleaned = cleanup_name_pattern("Movie...Title....mkv");
        assert_eq!(cleaned, "Movie.Title.mkv");
    }

    #[test]
    fn falls_back_to_meaningful_parts_when_too_short() {
        let cleaned = cleanup_name_pattern("..");
        // Re-extraction of ".." yields nothing meaningful; result is empty.
        assert_eq!(cleaned, "");
    }

    #[test]
    fn par2_base_name_strips_volume_suffix() {
        assert_eq!(par2_base_name("Movie.Title.2023.vol00+01.par2"), "Movie.Title.2023");
    }

    #[test]
    fn title_case_words_capitalizes_each_dot_segment() {
        assert_eq!(title_case_words("movie.title.2023"), "Movie.Title.2023");
    }

    #[test]
    fn yenc_name_rejected_when_obfuscated() {
        assert_eq!(yenc_name_if_usable("manifest.mkv", Some("a1b2c3d4e5f6789012345678901234ab")), None);
    }

    #[test]
    fn yenc_name_accepted_when_clean_and_different() {
        assert_eq!(
            yenc_name_if_usable("a1b2c3d4e5f6789012345678901234ab.mkv", Some("Movie.Title.2023.mkv")),
            Some("Movie.Title.2023.mkv".to_owned())
        );
    }
}
