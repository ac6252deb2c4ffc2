// src/pipeline/parser.rs
//! Lenient parser for the `**Key** value **Key** value` post micro-format.
//!
//! Absence of a key is normal: callers decide what a missing `Link` or `Title`
//! means. Nothing here fails.

use std::collections::BTreeMap;

pub const DELIMITER: &str = "**";
/// Key whose value is split on whitespace into an ordered URL list.
pub const IMAGES_KEY: &str = "IMAGES";
/// Older spelling of the gallery key, stored as a single space-separated string.
pub const IMAGES_KEY_LEGACY: &str = "Images";

pub const TITLE: &str = "Title";
pub const AUTHOR: &str = "Author";
pub const LINK: &str = "Link";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::List(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(v: Vec<&str>) -> Self {
        FieldValue::List(v.into_iter().map(str::to_string).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPost {
    fields: BTreeMap<String, FieldValue>,
}

impl ParsedPost {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.text(TITLE)
    }

    pub fn author(&self) -> Option<&str> {
        self.text(AUTHOR)
    }

    pub fn link(&self) -> Option<&str> {
        self.text(LINK)
    }

    pub fn is_gallery(&self) -> bool {
        self.contains_key(IMAGES_KEY) || self.contains_key(IMAGES_KEY_LEGACY)
    }

    /// Ordered gallery URLs, from either spelling of the images key.
    pub fn images(&self) -> Option<Vec<String>> {
        let value = self
            .get(IMAGES_KEY)
            .or_else(|| self.get(IMAGES_KEY_LEGACY))?;
        Some(match value {
            FieldValue::List(urls) => urls.clone(),
            FieldValue::Text(s) => s.split_whitespace().map(str::to_string).collect(),
        })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for ParsedPost {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut post = ParsedPost::default();
        for (k, v) in iter {
            post.insert(k, v);
        }
        post
    }
}

/// Split on `**`, trim, skip empty segments, then pair segments up as key/value.
/// A trailing key without a value is dropped. Repeated keys keep the last value.
pub fn parse(raw: &str) -> ParsedPost {
    let mut post = ParsedPost::default();
    let mut pending: Option<&str> = None;

    for part in raw.split(DELIMITER).map(str::trim).filter(|p| !p.is_empty()) {
        match pending.take() {
            None => pending = Some(part),
            Some(key) if key == IMAGES_KEY => {
                let urls = part.split_whitespace().map(str::to_string).collect();
                post.fields.insert(key.to_string(), FieldValue::List(urls));
            }
            Some(key) => {
                post.fields
                    .insert(key.to_string(), FieldValue::Text(part.to_string()));
            }
        }
    }

    post
}
