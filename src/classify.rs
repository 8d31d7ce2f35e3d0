//! Filename-pattern classifiers used by the Manifest Parser to filter PAR2
//! files out of the "work" set and to recognize RAR/7z volumes.

use lazy_regex::regex;

#[must_use]
pub fn is_par2(name: &str) -> bool {
    regex!(r"(\.par2|\.p\d+|\.vol\d+\+\d+\.par2)$"i).is_match(name)
}

#[must_use]
pub fn is_rar_volume(name: &str) -> bool {
    regex!(r"(\.r(ar|\d+)|\.part\d+\.rar)$"i).is_match(name)
}

#[must_use]
pub fn is_7z_volume(name: &str) -> bool {
    regex!(r"(\.7z|\.7z\.\d+)$"i).is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("release.par2", true)]
    #[case("release.vol00+01.par2", true)]
    #[case("release.p01", true)]
    #[case("release.mkv", false)]
    fn par2_pattern(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_par2(name), expected);
    }

    #[rstest]
    #[case("release.rar", true)]
    #[case("release.r00", true)]
    #[case("release.part03.rar", true)]
    #[case("release.mkv", false)]
    fn rar_pattern(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_rar_volume(name), expected);
    }

    #[rstest]
    #[case("release.7z", true)]
    #[case("release.7z.001", true)]
    #[case("release.zip", false)]
    fn sevenzip_pattern(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_7z_volume(name), expected);
    }
}
