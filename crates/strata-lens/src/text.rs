//! Embedding text synthesized for each entity tier.

use strata_core::MemberKind;

/// Member names listed in a file's embedding text.
pub const FILE_TEXT_MEMBERS: usize = 3;

/// Text embedded for a file: `"File <name>"`, plus `" containing a, b"` naming
/// at most [`FILE_TEXT_MEMBERS`] members when any are known.
///
/// # Examples
///
/// ```
/// use strata_lens::text::file_text;
///
/// assert_eq!(file_text("user.py", &[]), "File user.py");
/// assert_eq!(file_text("user.py", &["User", "Role"]), "File user.py containing User, Role");
/// ```
pub fn file_text(file_name: &str, member_names: &[&str]) -> String {
    if member_names.is_empty() {
        return format!("File {file_name}");
    }
    let listed = &member_names[..member_names.len().min(FILE_TEXT_MEMBERS)];
    format!("File {file_name} containing {}", listed.join(", "))
}

/// Text embedded for a member: `"<name> <kind> - <first sentence>"`.
///
/// # Examples
///
/// ```
/// use strata_core::MemberKind;
/// use strata_lens::text::member_text;
///
/// assert_eq!(
///     member_text("Foo", MemberKind::Class, "Handles users. Also roles."),
///     "Foo class - Handles users."
/// );
/// assert_eq!(member_text("Foo", MemberKind::Enum, "  "), "Foo enum");
/// ```
pub fn member_text(name: &str, kind: MemberKind, summary: &str) -> String {
    with_summary(format!("{name} {kind}"), summary)
}

/// Text embedded for a method: `"<name> method in <parent> - <first sentence>"`.
///
/// # Examples
///
/// ```
/// use strata_lens::text::method_text;
///
/// assert_eq!(
///     method_text("Bar", "Foo", "Validates email format."),
///     "Bar method in Foo - Validates email format."
/// );
/// ```
pub fn method_text(name: &str, parent: &str, summary: &str) -> String {
    with_summary(format!("{name} method in {parent}"), summary)
}

/// Text up to and including the first `". "`, `"? "` or `"! "`, checked in
/// that order; otherwise the whole trimmed text.
pub fn first_sentence(summary: &str) -> &str {
    let text = summary.trim();
    [". ", "? ", "! "]
        .iter()
        .find_map(|delim| text.find(delim))
        .map_or(text, |pos| &text[..=pos])
}

fn with_summary(head: String, summary: &str) -> String {
    let sentence = first_sentence(summary);
    if sentence.is_empty() {
        head
    } else {
        format!("{head} - {sentence}")
    }
}
