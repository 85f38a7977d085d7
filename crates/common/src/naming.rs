// Local names for transient documents and fieldname scrubbing.
//
// Local names: `new-<doctype slug>-<random suffix>`.

use uuid::Uuid;

const LOCAL_NAME_PREFIX: &str = "new-";
const RANDOM_SUFFIX_LEN: usize = 10;

/// Convert free text into a URL-safe slug.
///
/// - Lowercases all characters
/// - Replaces non-ASCII-alphanumeric characters with hyphens
/// - Collapses consecutive hyphens
/// - Strips leading and trailing hyphens
pub fn slugify(text: &str) -> String {
    let raw: String = text
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect();

    raw.split('-').filter(|part| !part.is_empty()).collect::<Vec<_>>().join("-")
}

/// Fieldname form of a label or doctype: lowercase, spaces and hyphens to `_`.
pub fn scrub(text: &str) -> String {
    text.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Synthesize a registry name for a transient document of `doctype`.
pub fn new_local_name(doctype: &str) -> String {
    let slug = slugify(doctype);
    let suffix = random_suffix(RANDOM_SUFFIX_LEN);
    if slug.is_empty() {
        format!("{LOCAL_NAME_PREFIX}{suffix}")
    } else {
        format!("{LOCAL_NAME_PREFIX}{slug}-{suffix}")
    }
}

/// Whether `name` has the shape produced by [`new_local_name`].
pub fn is_local_name(name: &str) -> bool {
    name.starts_with(LOCAL_NAME_PREFIX)
}

fn random_suffix(len: usize) -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(len);
    hex
}
