//! Identifier codec for content items.
//!
//! An item id is the concatenation `{location}/{key}`. The location may be
//! absent (global content), producing an id with an empty prefix, and may
//! itself contain `/` (nested view paths), so parsing splits on the *last*
//! separator and assigns as much of the id as possible to the location.

use super::error::DomainError;

/// Maximum length accepted for an id, key, or location.
pub const MAX_IDENT_LEN: usize = 200;

/// Derive the id for a `(location, key)` pair.
pub fn make_id(location: Option<&str>, key: &str) -> String {
    format!("{}/{}", location.unwrap_or(""), key)
}

/// Split an id back into its `(location, key)` pair.
///
/// The inverse of [`make_id`]: greedy on the location side, so
/// `"a/b/c"` parses to `(Some("a/b"), "c")`. An empty location segment
/// parses to `None`.
pub fn parse_id(id: &str) -> Result<(Option<String>, String), DomainError> {
    validate_id(id)?;

    let (location, key) = id.rsplit_once('/').ok_or_else(|| {
        DomainError::validation("id", "must contain a `/` separating location from key")
    })?;

    validate_key(key)?;

    let location = if location.is_empty() {
        None
    } else {
        validate_location(location)?;
        Some(location.to_string())
    };

    Ok((location, key.to_string()))
}

/// Validate an id: non-empty, at most [`MAX_IDENT_LEN`] characters, and free
/// of `~` and `` ` `` characters.
pub fn validate_id(id: &str) -> Result<(), DomainError> {
    validate_segment("id", id, false)
}

/// Validate a key: the id rules plus a ban on `/` and `\`, which are
/// reserved for the id separator and escaping.
pub fn validate_key(key: &str) -> Result<(), DomainError> {
    validate_segment("key", key, true)
}

/// Validate a present location. Locations may contain `/` (nested paths);
/// absence is expressed with `None` at the call site and is not validated
/// here.
pub fn validate_location(location: &str) -> Result<(), DomainError> {
    validate_segment("location", location, false)
}

fn validate_segment(
    field: &'static str,
    value: &str,
    forbid_separators: bool,
) -> Result<(), DomainError> {
    if value.is_empty() {
        return Err(DomainError::validation(field, "cannot be empty"));
    }
    if value.chars().count() > MAX_IDENT_LEN {
        return Err(DomainError::validation(
            field,
            format!("must be at most {MAX_IDENT_LEN} characters long"),
        ));
    }
    for forbidden in ['~', '`'] {
        if value.contains(forbidden) {
            return Err(DomainError::validation(
                field,
                format!("cannot contain a `{forbidden}` character"),
            ));
        }
    }
    if forbid_separators {
        for forbidden in ['/', '\\'] {
            if value.contains(forbidden) {
                return Err(DomainError::validation(
                    field,
                    format!("cannot contain a `{forbidden}` character"),
                ));
            }
        }
    }
    Ok(())
}
