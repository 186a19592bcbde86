//! Document model shared by the sync engine and the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Who can read a document besides its owner and collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }

    /// Parse from string name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Visibility::Private),
            "public" => Some(Visibility::Public),
            _ => None,
        }
    }
}

/// One node in a document's content tree.
///
/// The sync engine never interprets nodes; it only compares and serializes
/// them. The editing surface owns the actual schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    /// Node type tag, e.g. "paragraph" or "heading".
    pub kind: String,
    /// Inline text carried by leaf nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Arbitrary node attributes.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attrs: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ContentNode>,
}

impl ContentNode {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn text(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Opaque document payload: a tree of typed nodes rooted at a "doc" node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocContent {
    pub root: ContentNode,
}

impl DocContent {
    /// An empty document body.
    pub fn empty() -> Self {
        Self {
            root: ContentNode::new("doc"),
        }
    }

    /// A document body holding a single paragraph of plain text.
    pub fn paragraph(text: impl Into<String>) -> Self {
        let mut root = ContentNode::new("doc");
        root.children.push(ContentNode::text("paragraph", text));
        Self { root }
    }
}

impl Default for DocContent {
    fn default() -> Self {
        Self::empty()
    }
}

/// A document as persisted by the store.
///
/// `updated_at` is monotonically non-decreasing and is the sole arbiter for
/// conflict comparison; it only moves through `DocumentStore::save`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub content: DocContent,
    pub owner_id: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_display_parse_roundtrip() {
        let id = DocumentId::new();
        let parsed: DocumentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_document_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<DocumentId>().is_err());
    }

    #[test]
    fn test_visibility_parse() {
        assert_eq!(Visibility::parse("private"), Some(Visibility::Private));
        assert_eq!(Visibility::parse("public"), Some(Visibility::Public));
        assert_eq!(Visibility::parse("PUBLIC"), None);
        assert_eq!(Visibility::parse(""), None);
    }

    #[test]
    fn test_content_equality_is_structural() {
        let a = DocContent::paragraph("hello");
        let b = DocContent::paragraph("hello");
        let c = DocContent::paragraph("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_content_serde_roundtrip() {
        let content = DocContent::paragraph("hello");
        let json = serde_json::to_string(&content).unwrap();
        let back: DocContent = serde_json::from_str(&json).unwrap();
        assert_eq!(content, back);
    }

    #[test]
    fn test_empty_content_serializes_compactly() {
        let json = serde_json::to_value(DocContent::empty()).unwrap();
        // No empty attrs/children noise in the wire form.
        assert_eq!(json, serde_json::json!({"kind": "doc"}));
    }
}
