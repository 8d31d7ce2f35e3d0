/// Removes the leading XML declaration and/or DOCTYPE from the input.
///
/// This is intended for use with `roxmltree`, which does not support XML
/// declarations or DOCTYPEs, and strips those constructs from the beginning
/// of the document while leaving the rest unchanged.
fn strip_headers(xml: &str) -> &str {
    let mut s = xml.trim();

    // Strip XML declaration: <?xml ... ?>
    if s.len() >= 5
        && s[..5].eq_ignore_ascii_case("<?xml")
        && let Some(end) = s.find("?>")
    {
        s = s[end + 2..].trim_start();
    }

    // Strip DOCTYPE: <!DOCTYPE ... >
    if s.len() >= 9
        && s[..9].eq_ignore_ascii_case("<!DOCTYPE")
        && let Some(end) = s.find('>')
    {
        s = s[end + 1..].trim_start();
    }

    s
}

/// Thin wrapper around `roxmltree::Document::parse` that strips unsupported
/// XML declarations and DOCTYPEs before parsing.
pub(crate) fn parse_document(xml: &str) -> Result<roxmltree::Document<'_>, roxmltree::Error> {
    let stripped = strip_headers(xml);
    roxmltree::Document::parse(stripped)
}
