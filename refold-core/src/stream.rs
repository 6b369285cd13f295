//! Stream naming.
//!
//! A stream is addressed by a `(category, id)` pair rendered as
//! `"{category}-{id}"` on the wire. The category must not contain the `-`
//! separator; the id may (the wire form splits on the first `-` only).

use std::fmt;

use thiserror::Error;

/// Error raised when constructing or parsing a [`StreamName`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamNameError {
    #[error("stream category must not be empty")]
    EmptyCategory,
    #[error("stream id must not be empty")]
    EmptyId,
    #[error("stream category `{0}` must not contain `-`")]
    SeparatorInCategory(String),
    #[error("stream name `{0}` is missing the `-` separator")]
    MissingSeparator(String),
}

/// Validated stream name.
///
/// Stored pre-rendered so the wire form can be borrowed without allocation
/// on every store call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamName {
    rendered: String,
    category_len: usize,
}

impl StreamName {
    /// Build a stream name from its category and id components.
    ///
    /// # Errors
    ///
    /// Returns a [`StreamNameError`] if either component is empty or the
    /// category contains the `-` separator.
    pub fn new(
        category: impl AsRef<str>,
        id: impl AsRef<str>,
    ) -> Result<Self, StreamNameError> {
        let category = category.as_ref();
        let id = id.as_ref();
        if category.is_empty() {
            return Err(StreamNameError::EmptyCategory);
        }
        if id.is_empty() {
            return Err(StreamNameError::EmptyId);
        }
        if category.contains('-') {
            return Err(StreamNameError::SeparatorInCategory(category.to_owned()));
        }
        Ok(Self {
            rendered: format!("{category}-{id}"),
            category_len: category.len(),
        })
    }

    /// Parse a wire-form stream name, splitting on the first `-`.
    ///
    /// # Errors
    ///
    /// Returns a [`StreamNameError`] if the separator is missing or either
    /// component is empty.
    pub fn parse(raw: impl Into<String>) -> Result<Self, StreamNameError> {
        let rendered: String = raw.into();
        let Some(category_len) = rendered.find('-') else {
            return Err(StreamNameError::MissingSeparator(rendered));
        };
        if category_len == 0 {
            return Err(StreamNameError::EmptyCategory);
        }
        if category_len + 1 == rendered.len() {
            return Err(StreamNameError::EmptyId);
        }
        Ok(Self {
            rendered,
            category_len,
        })
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.rendered[..self.category_len]
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.rendered[self.category_len + 1..]
    }

    /// The rendered `"{category}-{id}"` wire form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}
