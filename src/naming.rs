//! Tar- and filesystem-safe names for thread directories and `.eml` entries.
//!
//! Every length here is measured in bytes, because tar header name fields are
//! byte-sized. Truncation never splits a UTF-8 character.

use crate::model::address::EmailAddress;

/// Longest thread directory name, leaving one byte of the 100-byte USTAR
/// name field for the trailing `/`.
pub const MAX_THREAD_DIR_LEN: usize = 99;

/// Longest `.eml` file name, extension included.
pub const MAX_MESSAGE_FILE_NAME_LEN: usize = 100;

/// Extension appended to every archived message.
pub const MESSAGE_EXTENSION: &str = ".eml";

const MAX_UID_SEGMENT_LEN: usize = 40;
const MAX_DATE_SEGMENT_LEN: usize = 32;
const MAX_SENDER_SEGMENT_LEN: usize = 30;

const THREAD_FALLBACK: &str = "thread";
const UID_FALLBACK: &str = "uid";
const DATE_FALLBACK: &str = "date";

/// Characters rejected by at least one supported filesystem or by tar readers.
const INVALID_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Build the directory name for a thread: `{thread_id}_{subject}`.
///
/// A missing or blank subject becomes `thread`.
pub fn build_thread_directory_name(thread_id: u64, subject: Option<&str>) -> String {
    compose_directory_name(&thread_id.to_string(), subject, MAX_THREAD_DIR_LEN)
}

fn compose_directory_name(id: &str, subject: Option<&str>, budget: usize) -> String {
    // Room for at least the delimiter and one subject byte.
    if id.len() + 1 >= budget {
        return truncate_bytes(id, budget).to_string();
    }

    let remaining = budget - id.len() - 1;
    let subject = sanitize_segment(subject.unwrap_or_default(), remaining, THREAD_FALLBACK);
    format!("{id}_{subject}")
}

/// Build the file name for one message:
/// `{uid}_{date}[_{sender}][_{subject}].eml`.
///
/// `uid` and `date_segment` always appear (with fallbacks); the sender's short
/// name and then the subject are appended only while the length budget allows.
pub fn build_message_file_name(
    unique_id: &str,
    subject: Option<&str>,
    date_segment: &str,
    from: Option<&str>,
) -> String {
    let budget = MAX_MESSAGE_FILE_NAME_LEN - MESSAGE_EXTENSION.len();

    let uid = sanitize_segment(unique_id, MAX_UID_SEGMENT_LEN, UID_FALLBACK);
    let date = sanitize_segment(date_segment, MAX_DATE_SEGMENT_LEN, DATE_FALLBACK);
    let mut name = format!("{uid}_{date}");

    let sender = from.map(sender_display_name);
    let optional = [
        (sender.as_deref(), MAX_SENDER_SEGMENT_LEN),
        (subject, usize::MAX),
    ];

    for (value, cap) in optional {
        let Some(value) = value else { continue };
        // Delimiter plus at least one byte of content.
        if name.len() + 2 > budget {
            break;
        }
        let room = (budget - name.len() - 1).min(cap);
        if let Some(segment) = sanitize_optional(value, room) {
            name.push('_');
            name.push_str(&segment);
        }
    }

    name.push_str(MESSAGE_EXTENSION);
    name
}

/// Short sender name from a `"Display Name <addr>"` or bare-address string.
///
/// Prefers the display name, then the local part before `@`, then the raw text.
pub fn sender_display_name(from: &str) -> String {
    EmailAddress::parse(from).short_name().to_string()
}

/// Sanitize arbitrary text into a single path segment of at most `max_len`
/// bytes, substituting `fallback` when nothing usable remains.
pub fn sanitize_segment(input: &str, max_len: usize, fallback: &str) -> String {
    match sanitize_optional(input, max_len) {
        Some(segment) => segment,
        None => truncate_bytes(fallback, max_len).to_string(),
    }
}

/// Like [`sanitize_segment`] but returns `None` instead of a fallback.
fn sanitize_optional(input: &str, max_len: usize) -> Option<String> {
    let replaced: String = input
        .chars()
        .map(|c| if is_invalid_char(c) { '_' } else { c })
        .collect();

    let mut collapsed = replaced;
    while collapsed.contains("..") {
        collapsed = collapsed.replace("..", "_");
    }

    let trimmed = trim_segment(&collapsed);
    let truncated = trim_segment(truncate_bytes(trimmed, max_len));
    (!truncated.is_empty()).then(|| truncated.to_string())
}

fn is_invalid_char(c: char) -> bool {
    c.is_control() || INVALID_CHARS.contains(&c)
}

fn trim_segment(s: &str) -> &str {
    s.trim_matches(|c: char| c == '.' || c == '_' || c.is_whitespace())
}

/// Longest prefix of `s` that fits in `max_len` bytes on a char boundary.
fn truncate_bytes(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const FORBIDDEN: &[&str] = &["/", "\\", ":", "*", "?", "\"", "<", ">", "|", ".."];

    fn assert_safe(name: &str) {
        for bad in FORBIDDEN {
            assert!(!name.contains(bad), "{name:?} contains {bad:?}");
        }
        assert!(!name.chars().any(char::is_control), "{name:?} has control chars");
    }

    #[test]
    fn test_thread_directory_invoice_scenario() {
        let name = build_thread_directory_name(123456789, Some("Invoice: Q3/2024? Draft"));
        assert!(name.starts_with("123456789_"));
        assert!(name.len() <= 100);
        assert_safe(&name);
        assert_eq!(name, "123456789_Invoice_ Q3_2024_ Draft");
    }

    #[test]
    fn test_thread_directory_fallback_subject() {
        assert_eq!(build_thread_directory_name(42, None), "42_thread");
        assert_eq!(build_thread_directory_name(42, Some("   ")), "42_thread");
        assert_eq!(build_thread_directory_name(42, Some("..._")), "42_thread");
    }

    #[test]
    fn test_thread_directory_long_subject_truncated() {
        let subject = "x".repeat(500);
        let name = build_thread_directory_name(u64::MAX, Some(&subject));
        assert_eq!(name.len(), MAX_THREAD_DIR_LEN);
        assert!(name.starts_with(&format!("{}_", u64::MAX)));
    }

    #[test]
    fn test_directory_id_exceeding_budget_drops_subject() {
        let name = compose_directory_name("1234567890", Some("subject"), 8);
        assert_eq!(name, "12345678");
        let name = compose_directory_name("1234567", Some("subject"), 8);
        assert_eq!(name, "1234567");
    }

    #[test]
    fn test_message_file_name_unique_scenario() {
        let name = build_message_file_name(
            "unique:../id",
            Some("Quarterly <Update>"),
            "2024-12-31_23-59-59",
            None,
        );
        assert!(name.ends_with(".eml"));
        assert!(name.len() <= 120);
        assert!(!name.contains(".."));
        assert_safe(name.trim_end_matches(MESSAGE_EXTENSION));
        assert_eq!(name, "unique___id_2024-12-31_23-59-59_Quarterly _Update.eml");
    }

    #[test]
    fn test_message_file_name_with_sender() {
        let name = build_message_file_name(
            "77",
            Some("Lunch"),
            "2024-01-02_03-04-05",
            Some("\"Ana Pérez\" <ana@example.com>"),
        );
        assert_eq!(name, "77_2024-01-02_03-04-05_Ana Pérez_Lunch.eml");

        let name = build_message_file_name("77", None, "d", Some("<ops@example.com>"));
        assert_eq!(name, "77_d_ops.eml");
    }

    #[test]
    fn test_message_file_name_fallbacks() {
        let name = build_message_file_name("", None, "   ", None);
        assert_eq!(name, "uid_date.eml");
        let name = build_message_file_name("../..", Some(""), "", Some(""));
        assert_eq!(name, "uid_date.eml");
    }

    #[test]
    fn test_message_file_name_budget_never_exceeded() {
        let long = "ü".repeat(200);
        let name = build_message_file_name(&long, Some(&long), &long, Some(&long));
        assert!(name.len() <= MAX_MESSAGE_FILE_NAME_LEN, "{} bytes", name.len());
        assert!(name.ends_with(".eml"));
        assert!(!name.trim_end_matches(".eml").ends_with('_'));
    }

    #[test]
    fn test_sanitize_segment_rules() {
        assert_eq!(sanitize_segment("a/b\\c:d*e", 20, "x"), "a_b_c_d_e");
        assert_eq!(sanitize_segment("tab\there", 20, "x"), "tab_here");
        assert_eq!(sanitize_segment("a....b", 20, "x"), "a__b");
        assert_eq!(sanitize_segment(" ._name_. ", 20, "x"), "name");
        assert_eq!(sanitize_segment("", 20, "fallback"), "fallback");
        assert_eq!(sanitize_segment("abcdef", 3, "x"), "abc");
        assert_eq!(sanitize_segment("ab.cdef", 3, "x"), "ab");
    }

    #[test]
    fn test_truncate_bytes_respects_char_boundary() {
        assert_eq!(truncate_bytes("héllo", 2), "h");
        assert_eq!(truncate_bytes("héllo", 3), "hé");
    }

    #[test]
    fn test_hostile_inputs_are_safe() {
        let hostile = "..\\..//etc/passwd\u{0}\u{7}:*?\"<>|..";
        let dir = build_thread_directory_name(1, Some(hostile));
        assert_safe(&dir);
        let file = build_message_file_name(hostile, Some(hostile), hostile, Some(hostile));
        assert_safe(file.trim_end_matches(MESSAGE_EXTENSION));
    }

    /// Text mixing arbitrary Unicode with path separators, reserved
    /// characters, control characters and dot runs.
    fn hostile_text() -> impl Strategy<Value = String> {
        let fragment = prop_oneof![
            any::<char>().prop_map(String::from),
            prop::sample::select(vec![
                "/", "\\", ":", "*", "?", "\"", "<", ">", "|", "..", "...", "._", " ", "\u{0}",
                "\n", "\u{7f}", "\u{85}", "é", "📷",
            ])
            .prop_map(str::to_string),
        ];
        prop::collection::vec(fragment, 0..80).prop_map(|parts| parts.concat())
    }

    fn assert_well_formed_file_name(name: &str) {
        assert!(name.len() <= MAX_MESSAGE_FILE_NAME_LEN, "{} bytes", name.len());
        let stem = name
            .strip_suffix(MESSAGE_EXTENSION)
            .unwrap_or_else(|| panic!("{name:?} lacks {MESSAGE_EXTENSION}"));
        assert!(!stem.is_empty());
        assert!(!stem.ends_with('_'), "{name:?} ends with '_'");
        assert_safe(stem);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 2048,
            ..ProptestConfig::default()
        })]

        #[test]
        fn thread_directory_name_is_always_safe(
            thread_id in any::<u64>(),
            subject in prop::option::of(hostile_text()),
        ) {
            let name = build_thread_directory_name(thread_id, subject.as_deref());
            prop_assert!(name.len() <= MAX_THREAD_DIR_LEN, "{} bytes", name.len());
            let prefix = format!("{thread_id}_");
            prop_assert!(name.starts_with(&prefix), "{:?}", name);
            prop_assert!(name.len() > prefix.len());
            prop_assert!(!name.ends_with('_'));
            assert_safe(&name);
        }

        #[test]
        fn message_file_name_is_always_safe(
            unique_id in hostile_text(),
            subject in prop::option::of(hostile_text()),
            date in hostile_text(),
            from in prop::option::of(hostile_text()),
        ) {
            let name = build_message_file_name(
                &unique_id,
                subject.as_deref(),
                &date,
                from.as_deref(),
            );
            assert_well_formed_file_name(&name);
        }

        #[test]
        fn entry_path_fits_ustar_split(
            thread_id in any::<u64>(),
            subject in hostile_text(),
            unique_id in hostile_text(),
        ) {
            let dir = build_thread_directory_name(thread_id, Some(&subject));
            let file = build_message_file_name(&unique_id, Some(&subject), "2024-01-01_00-00-00", None);
            // USTAR: prefix <= 155 bytes, name <= 100 bytes.
            prop_assert!(dir.len() <= 155);
            prop_assert!(file.len() <= 100);
        }
    }
}
