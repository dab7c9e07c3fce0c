//! Text normalization applied before segmentation.
//!
//! Each pass is independently toggleable; all default to enabled. Hand-rolled
//! char-by-char scanning rather than a regex crate, matching the manual
//! parsing style used elsewhere for wire formats (`daemon/protocol.rs`,
//! `sonos/gena_parser.rs`).

/// Which preprocessing passes `preprocess` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessConfig {
    pub normalize_whitespace: bool,
    pub expand_abbreviations: bool,
    pub space_numbers_and_units: bool,
    pub scrub_urls_and_emails: bool,
    pub dedupe_punctuation: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            normalize_whitespace: true,
            expand_abbreviations: true,
            space_numbers_and_units: true,
            scrub_urls_and_emails: true,
            dedupe_punctuation: true,
        }
    }
}

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("Mr.", "Mister"),
    ("Mrs.", "Missus"),
    ("Ms.", "Miss"),
    ("Dr.", "Doctor"),
    ("Prof.", "Professor"),
    ("vs.", "versus"),
    ("etc.", "et cetera"),
    ("e.g.", "for example"),
    ("i.e.", "that is"),
    ("approx.", "approximately"),
];

/// Normalizes `text` for synthesis per `config`. Paragraph boundaries
/// (`\n\n`) are preserved so downstream segmentation still sees them.
pub fn preprocess(text: &str, config: &PreprocessConfig) -> String {
    let mut out = text.to_string();

    if config.scrub_urls_and_emails {
        out = scrub_urls_and_emails(&out);
    }
    if config.expand_abbreviations {
        out = expand_abbreviations(&out);
    }
    if config.space_numbers_and_units {
        out = space_numbers_and_units(&out);
    }
    if config.dedupe_punctuation {
        out = dedupe_punctuation(&out);
    }
    if config.normalize_whitespace {
        out = normalize_whitespace(&out);
    }

    out
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' && chars.peek() == Some(&'\n') {
            out.push('\n');
            out.push('\n');
            while chars.peek() == Some(&'\n') {
                chars.next();
            }
            continue;
        }
        if c.is_whitespace() && c != '\n' {
            out.push(' ');
            while matches!(chars.peek(), Some(c) if c.is_whitespace() && *c != '\n') {
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out.trim().to_string()
}

fn expand_abbreviations(text: &str) -> String {
    let mut out = text.to_string();
    for (abbrev, expansion) in ABBREVIATIONS {
        out = replace_whole_token(&out, abbrev, expansion);
    }
    out
}

/// Replaces `needle` with `replacement` only where it is not itself part of
/// a longer token (so `"Mrs."` is not corrupted by a `"Mr."` rule that is a
/// prefix of it).
fn replace_whole_token(text: &str, needle: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let needle_bytes = needle.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let matches_here = bytes[i..].starts_with(needle_bytes);
        let prev_is_word = i > 0 && (bytes[i - 1] as char).is_alphanumeric();
        let after = i + needle_bytes.len();
        let next_is_word = bytes
            .get(after)
            .map(|b| (*b as char).is_alphanumeric())
            .unwrap_or(false);
        if matches_here && !prev_is_word && !next_is_word {
            out.push_str(replacement);
            i = after;
        } else {
            // push one char (not necessarily one byte)
            let ch = text[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}

fn space_numbers_and_units(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        if c.is_ascii_digit() {
            if let Some(&next) = chars.get(i + 1) {
                if next.is_alphabetic() {
                    out.push(' ');
                }
            }
        }
    }
    out
}

fn scrub_urls_and_emails(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_inclusive(char::is_whitespace) {
        let trimmed = word.trim_end();
        let trailing = &word[trimmed.len()..];
        if is_url(trimmed) {
            out.push_str("link");
            out.push_str(trailing);
        } else if is_email(trimmed) {
            out.push_str("email address");
            out.push_str(trailing);
        } else {
            out.push_str(word);
        }
    }
    out
}

fn is_url(token: &str) -> bool {
    token.starts_with("http://") || token.starts_with("https://") || token.starts_with("www.")
}

fn is_email(token: &str) -> bool {
    match token.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn dedupe_punctuation(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if matches!(c, '!' | '?') {
            // "?!?!" and "!!!" both collapse to their first mark.
            let mut run = 1;
            while matches!(chars.get(i + run), Some('!') | Some('?')) {
                run += 1;
            }
            out.push(c);
            i += run;
            continue;
        }
        if matches!(c, ',' | ';' | ':') {
            let mut run = 1;
            while chars.get(i + run) == Some(&c) {
                run += 1;
            }
            out.push(c);
            i += run;
            continue;
        }
        if c == '.' {
            let mut run = 1;
            while chars.get(i + run) == Some(&'.') {
                run += 1;
            }
            if run >= 3 {
                out.push_str("...");
            } else {
                out.push('.');
            }
            i += run;
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_runs_of_internal_whitespace() {
        let out = preprocess("hello   there\tfriend", &PreprocessConfig::default());
        assert_eq!(out, "hello there friend");
    }

    #[test]
    fn preserves_paragraph_breaks() {
        let out = preprocess("first\n\nsecond", &PreprocessConfig::default());
        assert_eq!(out, "first\n\nsecond");
    }

    #[test]
    fn expands_known_abbreviations_without_corrupting_longer_ones() {
        let out = preprocess("Mr. Smith met Mrs. Jones", &PreprocessConfig::default());
        assert_eq!(out, "Mister Smith met Missus Jones");
    }

    #[test]
    fn spaces_a_number_directly_touching_a_unit() {
        let out = preprocess("it weighs 10kg today", &PreprocessConfig::default());
        assert_eq!(out, "it weighs 10 kg today");
    }

    #[test]
    fn scrubs_urls_and_emails() {
        let out = preprocess("visit https://example.com or mail a@b.com", &PreprocessConfig::default());
        assert_eq!(out, "visit link or mail email address");
    }

    #[test]
    fn dedupes_repeated_punctuation_but_keeps_ellipsis() {
        let out = preprocess("really?!?! wait... okay!!!", &PreprocessConfig::default());
        assert_eq!(out, "really? wait... okay!");
    }

    #[test]
    fn each_pass_can_be_disabled_independently() {
        let config = PreprocessConfig {
            expand_abbreviations: false,
            ..PreprocessConfig::default()
        };
        let out = preprocess("Mr. Smith", &config);
        assert_eq!(out, "Mr. Smith");
    }
}
