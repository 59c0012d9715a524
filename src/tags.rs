//! Classification of OSM tag keys prior to persistence.
//!
//! Only the default-language name variant is worth keeping: tags such as
//! `name:fr` or `name:de` are dropped before they reach the store, while the
//! bare `name` key and every non-name key pass through untouched.

/// Tag keys that count as a usable name during referential cleanup.
pub const NAME_KEYS: [&str; 2] = ["name", "name:en"];

const NAME_PREFIX: &str = "name:";
const DEFAULT_LANGUAGE_KEY: &str = "name:en";

/// Returns true when `key` is a language-qualified name variant other than
/// the default language.
///
/// Keys shorter than the `name:` prefix never match, so arbitrary short keys
/// are safe to pass in.
///
/// # Examples
/// ```
/// use gazetteer_data::tags::is_foreign_language_variant;
///
/// assert!(is_foreign_language_variant("name:fr"));
/// assert!(!is_foreign_language_variant("name:en"));
/// assert!(!is_foreign_language_variant("name"));
/// assert!(!is_foreign_language_variant("highway"));
/// ```
#[must_use]
pub fn is_foreign_language_variant(key: &str) -> bool {
    key.starts_with(NAME_PREFIX) && key != DEFAULT_LANGUAGE_KEY
}
