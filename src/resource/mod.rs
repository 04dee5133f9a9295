//! Resource identity shared by the lock manager, task records and metadata.
//!
//! Every platform object is addressed by a resource-type keyword plus an id.
//! The canonical global key is `"<keyword>::<id>"`; lock files and metadata
//! documents are named after it.

mod status;

pub use status::{MemoryStatusSink, ResourceStatus, StatusChange, StatusSink};

use crate::error::{EngineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Separator between keyword and id in a resource key.
pub const KEY_SEPARATOR: &str = "::";

static KEYWORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("Invalid keyword regex"));

static OBJECT_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+$").expect("Invalid object id regex"));

/// Anything that can be locked or tagged as a platform object.
pub trait Keyable {
    /// Resource-type keyword (e.g. `server`, `clouduser`).
    fn keyword(&self) -> &str;

    /// Object id within its resource type.
    fn object_id(&self) -> &str;

    /// Canonical global key, `keyword::id`.
    fn resource_key(&self) -> String {
        format!("{}{}{}", self.keyword(), KEY_SEPARATOR, self.object_id())
    }
}

/// Reference to the object a task acts upon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub keyword: String,
    pub id: String,
}

impl ResourceRef {
    /// Create a resource reference without validation.
    pub fn new(keyword: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            id: id.into(),
        }
    }

    /// Validate keyword and id.
    ///
    /// Keywords are lowercase identifiers; ids are non-empty and contain no
    /// whitespace.
    pub fn validate(&self) -> Result<()> {
        Self::validate_keyword(&self.keyword)?;
        if !OBJECT_ID_REGEX.is_match(&self.id) {
            return Err(EngineError::ValidationError(format!(
                "invalid resource id '{}' for '{}': must be non-empty without whitespace",
                self.id, self.keyword
            )));
        }
        Ok(())
    }

    /// Validate a bare resource-type keyword.
    pub fn validate_keyword(keyword: &str) -> Result<()> {
        if !KEYWORD_REGEX.is_match(keyword) {
            return Err(EngineError::ValidationError(format!(
                "invalid resource keyword '{}': must match [a-z][a-z0-9_-]*",
                keyword
            )));
        }
        Ok(())
    }

    /// Parse a canonical `keyword::id` key.
    pub fn parse_key(key: &str) -> Result<Self> {
        let (keyword, id) = key.split_once(KEY_SEPARATOR).ok_or_else(|| {
            EngineError::ValidationError(format!(
                "invalid resource key '{}': expected keyword::id",
                key
            ))
        })?;
        let parsed = Self::new(keyword, id);
        parsed.validate()?;
        Ok(parsed)
    }
}

impl Keyable for ResourceRef {
    fn keyword(&self) -> &str {
        &self.keyword
    }

    fn object_id(&self) -> &str {
        &self.id
    }
}

impl<T: Keyable + ?Sized> Keyable for &T {
    fn keyword(&self) -> &str {
        (**self).keyword()
    }

    fn object_id(&self) -> &str {
        (**self).object_id()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.keyword, KEY_SEPARATOR, self.id)
    }
}

impl FromStr for ResourceRef {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_key(s)
    }
}

/// Encode a resource key into a single safe file name component.
///
/// ASCII alphanumerics, `-` and `_` pass through (and `.` when not leading);
/// every other byte becomes `%XX`. The result never contains a path
/// separator and never starts with a dot.
pub fn encode_key_for_path(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, b) in key.bytes().enumerate() {
        let keep = b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || (b == b'.' && i > 0);
        if keep {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Inverse of [`encode_key_for_path`]. Returns `None` for malformed input.
pub fn decode_key_from_path(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
