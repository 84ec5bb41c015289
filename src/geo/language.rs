use crate::models::LanguageFields;

const MAX_LANGUAGE_LEN: usize = 7;
const MAX_FAMILY_LEN: usize = 4;

/// Browser language from an `Accept-Language` header.
///
/// Takes the first listed language regardless of its quality value, which is
/// the browser's primary preference. `*` and empty headers yield `None`.
pub fn parse_accept_language(header: &str) -> Option<LanguageFields> {
    let tag = header
        .split(',')
        .map(|entry| entry.split(';').next().unwrap_or("").trim())
        .find(|tag| !tag.is_empty())?;

    if tag == "*" {
        return None;
    }

    let family = tag.split(['-', '_']).next().unwrap_or(tag);
    if family.is_empty() || !family.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    Some(LanguageFields {
        family: truncate(&family.to_ascii_lowercase(), MAX_FAMILY_LEN),
        language: truncate(tag, MAX_LANGUAGE_LEN),
    })
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_language_wins() {
        let parsed = parse_accept_language("en-US,en;q=0.9,nl;q=0.8").unwrap();
        assert_eq!(parsed.language, "en-US");
        assert_eq!(parsed.family, "en");
    }

    #[test]
    fn test_family_is_lowercased() {
        let parsed = parse_accept_language("DE").unwrap();
        assert_eq!(parsed.language, "DE");
        assert_eq!(parsed.family, "de");
    }

    #[test]
    fn test_long_tags_are_truncated() {
        let parsed = parse_accept_language("zh-Hant-TW;q=1").unwrap();
        assert_eq!(parsed.language, "zh-Hant");
        assert_eq!(parsed.family, "zh");
    }

    #[test]
    fn test_wildcard_and_empty() {
        assert_eq!(parse_accept_language("*"), None);
        assert_eq!(parse_accept_language(""), None);
        assert_eq!(parse_accept_language(" , "), None);
    }
}
