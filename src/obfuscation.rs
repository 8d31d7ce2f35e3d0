//! The filename-obfuscation heuristic shared by the Manifest Parser (to
//! decide whether a declared name needs recovery) and the Deobfuscator (to
//! decide whether a recovered name is good enough to stop at).

use lazy_regex::regex;

/// Returns `true` if `basename` (extension already stripped) looks like an
/// obfuscated, machine-generated filename rather than a human-chosen one.
///
/// An empty basename is always obfuscated. The "obfuscated" predicates are
/// checked first and short-circuit; then the "not obfuscated" predicates are
/// checked; anything matching neither defaults to obfuscated.
#[must_use]
pub fn is_obfuscated(basename: &str) -> bool {
    if basename.is_empty() {
        return true;
    }

    if looks_obfuscated(basename) {
        return true;
    }

    !looks_not_obfuscated(basename)
}

fn looks_obfuscated(basename: &str) -> bool {
    if regex!(r"^[a-f0-9]{32}$").is_match(basename) {
        return true;
    }
    if regex!(r"^[a-f0-9.]{40,}$").is_match(basename) {
        return true;
    }
    if has_long_lowercase_hex_run(basename, 30) && count_bracketed_words(basename) >= 2 {
        return true;
    }
    if basename.starts_with("abc.xyz") {
        return true;
    }
    false
}

fn looks_not_obfuscated(basename: &str) -> bool {
    let upper = count_ascii_uppercase(basename);
    let lower = count_ascii_lowercase(basename);
    let digits = count_ascii_digit(basename);
    let separators = count_separators(basename);
    let letters = upper + lower;

    if upper >= 2 && lower >= 2 && separators >= 1 {
        return true;
    }
    if separators >= 3 {
        return true;
    }
    if letters >= 4 && digits >= 4 && separators >= 1 {
        return true;
    }
    if starts_with_uppercase_letter(basename)
        && lower > 2
        && upper > 0
        && (upper as f64 / lower as f64) < 0.25
    {
        return true;
    }
    false
}

fn starts_with_uppercase_letter(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn count_ascii_uppercase(s: &str) -> usize {
    s.chars().filter(char::is_ascii_uppercase).count()
}

fn count_ascii_lowercase(s: &str) -> usize {
    s.chars().filter(char::is_ascii_lowercase).count()
}

fn count_ascii_digit(s: &str) -> usize {
    s.chars().filter(char::is_ascii_digit).count()
}

fn count_separators(s: &str) -> usize {
    s.chars().filter(|&c| c == ' ' || c == '.' || c == '_').count()
}

fn count_bracketed_words(s: &str) -> usize {
    regex!(r"\[[A-Za-z0-9]+\]").find_iter(s).count()
}

fn has_long_lowercase_hex_run(s: &str, min_len: usize) -> bool {
    let mut run = 0usize;
    for c in s.chars() {
        if c.is_ascii_digit() || ('a'..='f').contains(&c) {
            run += 1;
            if run >= min_len {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}
