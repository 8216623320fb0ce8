use serde::{Deserialize, Serialize};

use super::ident;

/// One editable text snippet, addressed by `(location, key)`.
///
/// The id is never stored; it is re-derived from the address on demand and
/// omitted from every serialized payload so it can never diverge from the
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    /// The page or view the item belongs to. `None` marks global content
    /// not bound to any specific location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub key: String,
    /// The current, possibly user-edited, text.
    pub content: String,
    /// The default text supplied by the call site. Equality with `content`
    /// means the item has not been edited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
}

impl ContentItem {
    /// A fresh, unedited item whose content equals its default.
    pub fn new(location: Option<&str>, key: &str, content: &str) -> Self {
        Self {
            location: location.map(str::to_string),
            key: key.to_string(),
            content: content.to_string(),
            original_content: Some(content.to_string()),
        }
    }

    pub fn id(&self) -> String {
        ident::make_id(self.location.as_deref(), &self.key)
    }

    /// Whether the content has diverged from the call site's default.
    pub fn is_edited(&self) -> bool {
        match &self.original_content {
            Some(original) => *original != self.content,
            None => false,
        }
    }
}
