use lazy_regex::regex;

/// Extract the complete name of the file with it's extension from the subject.
/// May return `None` if it fails to extract the name.
pub(crate) fn extract_filename_from_subject(subject: &str) -> Option<&str> {
    // The order of regular expressions is deliberate; patterns are arranged
    // from most specific to most general to avoid broader patterns incorrectly matching.

    // Case 1: Filename is in quotes.
    // We use a more relaxed version of what SABnzbd does:
    // https://github.com/sabnzbd/sabnzbd/blob/02b4a116dd4b46b2d2f33f7bbf249f2294458f2e/sabnzbd/nzbstuff.py#L104-L106
    if let Some(captured) = regex!(r#""(.*)""#).captures(subject) {
        let trimmed = captured.get(1).map(|m| m.as_str().trim());
        if let Some(s) = trimmed
            && !s.is_empty()
        {
            return Some(s);
        }
    }

    // Case 2: Subject follows a specific pattern.
    // https://regex101.com/r/B03qZs/2
    // [011/116] - [AC-FFF] Highschool DxD BorN - 02 [BD][1080p-Hi10p] FLAC][Dual-Audio][442E5446].mkv yEnc (1/2401) 1720916370
    if let Some(captured) =
        regex!(r"^(?:\[|\()(?:\d+/\d+)(?:\]|\))\s-\s(.*)\syEnc\s(?:\[|\()(?:\d+/\d+)(?:\]|\))\s\d+").captures(subject)
    {
        let trimmed = captured.get(1).map(|m| m.as_str().trim());
        if let Some(s) = trimmed
            && !s.is_empty()
        {
            return Some(s);
        }
    }

    // Case 3: Something that might look like a filename.
    // https://github.com/sabnzbd/sabnzbd/blob/02b4a116dd4b46b2d2f33f7bbf249f2294458f2e/sabnzbd/nzbstuff.py#L104-L106
    if let Some(captured) =
        regex!(r"\b([\w\-+()' .,]+(?:\[[\w\-/+()' .,]*][\w\-+()' .,]*)*\.[A-Za-z0-9]{2,4})\b").captures(subject)
    {
        let trimmed = captured.get(1).map(|m| m.as_str().trim());
        if let Some(s) = trimmed
            && !s.is_empty()
        {
            return Some(s);
        }
    }

    None
}

/// Splits a filename into a stem and an extension based on a specific pattern.
/// `Path.extension()` has too many false positives, so we use a custom regex.
///
/// Returns a tuple containing the `(stem, Option<extension>)`.
/// If no valid extension is found, the extension is `None`.
pub(crate) fn split_filename_at_extension(filename: &str) -> (&str, Option<&str>) {
    let re = regex!(r"(\.[a-z]\w{2,5})$"i);

    if let Some(found) = re.find(filename) {
        // +1 to skip the dot in the extension to match the behavior of `Path::extension()`,
        // which does not include the dot in the returned extension.
        let start = found.start();
        let extension = &filename[start + 1..];
        let stem = &filename[..start];
        (stem, Some(extension))
    } else {
        (filename, None)
    }
}

/// Returns a normalized subject string with "[1/10]" → "[01/10]" style zero-padding.
/// If no match is found, returns the original string unchanged.
pub(crate) fn sort_key_from_subject(subject: &str) -> String {
    let pattern = regex!(r"^\[(\d+)\/(\d+)\]");
    if let Some((_, [current, total])) = pattern.captures(subject).map(|caps| caps.extract::<2>()) {
        let width = total.len();
        let current = format!("{current:0>width$}");
        pattern.replace(subject, format!("[{current}/{total}]")).to_string()
    } else {
        subject.to_string()
    }
}
