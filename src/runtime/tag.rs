//! Tags: metadata attached to a specific sample position in a stream

use std::fmt;

use super::errors::ValueError;
use super::value::{PropertyMap, Value, write_map};

/// Metadata attached to the sample at `index`
///
/// The index is relative to the start of the chunk the tag travels with.
/// Buffers rebase it as the chunk is split or consumed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tag {
    pub index: i64,
    pub map: PropertyMap,
}

impl Tag {
    pub fn new(index: i64, map: PropertyMap) -> Self {
        Self { index, map }
    }

    /// Get a value by key, failing if the key is absent
    pub fn get(&self, key: &str) -> Result<&Value, ValueError> {
        self.map
            .get(key)
            .ok_or_else(|| ValueError::KeyNotFound(key.to_string()))
    }

    /// Get a value by key, or `None` if absent
    pub fn try_get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn insert_or_assign(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.map.insert(key.into(), value.into());
    }

    /// Return the same tag moved by `offset` samples
    pub fn shifted(&self, offset: i64) -> Tag {
        Tag {
            index: self.index + offset,
            map: self.map.clone(),
        }
    }

    /// Encode as `{index: i64, map: {...}}`
    pub fn to_value(&self) -> Value {
        Value::Map(crate::property_map! {
            "index" => self.index,
            "map" => self.map.clone(),
        })
    }

    /// Decode from the representation produced by [`Tag::to_value`]
    pub fn from_value(value: &Value) -> Result<Tag, ValueError> {
        let fields = value.as_map()?;
        let index = super::value::property::<i64>(fields, "index")?;
        let map = super::value::property::<PropertyMap>(fields, "map")?;
        Ok(Tag { index, map })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Tag[{}] ", self.index)?;
        write_map(f, &self.map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property_map;

    #[test]
    fn test_get_and_try_get() {
        let mut tag = Tag::new(3, property_map! { "burst_start" => true });
        assert_eq!(tag.get("burst_start"), Ok(&Value::Bool(true)));
        assert_eq!(
            tag.get("missing"),
            Err(ValueError::KeyNotFound("missing".to_string()))
        );
        assert_eq!(tag.try_get("missing"), None);

        tag.insert_or_assign("burst_start", false);
        assert_eq!(tag.try_get("burst_start"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_value_encoding() {
        let tag = Tag::new(7, property_map! { "len" => 100u64 });
        let decoded = Tag::from_value(&tag.to_value()).unwrap();
        assert_eq!(decoded, tag);

        assert!(Tag::from_value(&Value::from(1i64)).is_err());
    }

    #[test]
    fn test_display() {
        let tag = Tag::new(2, property_map! { "a" => 1i32 });
        assert_eq!(tag.to_string(), "Tag[2] {a: 1}");
    }
}
