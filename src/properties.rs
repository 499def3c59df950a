//! Provider extension data.
//!
//! Values are restricted to a closed set of serializable kinds so that provider-specific
//! settings stay inspectable without dynamic typing.

// std
use std::collections::BTreeMap;
// crates.io
use serde::{Deserialize, Deserializer, Serialize};

/// Serializable value stored in provider settings and property bags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
	/// Explicit absence of a value.
	Null,
	/// Boolean flag.
	Bool(bool),
	/// Signed integer.
	Integer(i64),
	/// Floating point number.
	Float(f64),
	/// UTF-8 string.
	String(String),
	/// Ordered list of values.
	List(Vec<PropertyValue>),
	/// Nested map keyed by string.
	Map(BTreeMap<String, PropertyValue>),
}
impl PropertyValue {
	/// String content, if this is a string.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			PropertyValue::String(value) => Some(value),
			_ => None,
		}
	}

	/// Boolean content, if this is a boolean.
	pub fn as_bool(&self) -> Option<bool> {
		match self {
			PropertyValue::Bool(value) => Some(*value),
			_ => None,
		}
	}

	/// Integer content, if this is an integer.
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			PropertyValue::Integer(value) => Some(*value),
			_ => None,
		}
	}

	/// Look up a member of a map value.
	pub fn get(&self, key: &str) -> Option<&PropertyValue> {
		match self {
			PropertyValue::Map(map) => map.get(key),
			_ => None,
		}
	}
}
impl From<&str> for PropertyValue {
	fn from(value: &str) -> Self {
		PropertyValue::String(value.to_owned())
	}
}
impl From<String> for PropertyValue {
	fn from(value: String) -> Self {
		PropertyValue::String(value)
	}
}
impl From<bool> for PropertyValue {
	fn from(value: bool) -> Self {
		PropertyValue::Bool(value)
	}
}
impl From<i64> for PropertyValue {
	fn from(value: i64) -> Self {
		PropertyValue::Integer(value)
	}
}

/// Map with case-insensitive string keys.
///
/// Keys are folded to lowercase on insertion and lookup.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PropertyBag {
	entries: BTreeMap<String, PropertyValue>,
}
impl PropertyBag {
	/// Create an empty bag.
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a value, returning the previous value stored under the same folded key.
	pub fn insert(
		&mut self,
		key: impl AsRef<str>,
		value: impl Into<PropertyValue>,
	) -> Option<PropertyValue> {
		self.entries.insert(fold(key.as_ref()), value.into())
	}

	/// Look up a value by key, ignoring case.
	pub fn get(&self, key: &str) -> Option<&PropertyValue> {
		self.entries.get(&fold(key))
	}

	/// Remove a value by key, ignoring case.
	pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
		self.entries.remove(&fold(key))
	}

	/// Whether the bag contains a key, ignoring case.
	pub fn contains_key(&self, key: &str) -> bool {
		self.entries.contains_key(&fold(key))
	}

	/// Iterate over folded keys and values.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
		self.entries.iter().map(|(key, value)| (key.as_str(), value))
	}

	/// Number of stored entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the bag is empty.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
impl<'de> Deserialize<'de> for PropertyBag {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = BTreeMap::<String, PropertyValue>::deserialize(deserializer)?;

		Ok(raw.into_iter().fold(PropertyBag::new(), |mut bag, (key, value)| {
			bag.insert(key, value);

			bag
		}))
	}
}

fn fold(key: &str) -> String {
	key.to_lowercase()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_ignore_case() {
		let mut bag = PropertyBag::new();

		assert!(bag.insert("TenantHint", "contoso").is_none());
		assert_eq!(bag.get("tenanthint").and_then(PropertyValue::as_str), Some("contoso"));
		assert_eq!(
			bag.insert("TENANTHINT", "fabrikam").and_then(|v| v.as_str().map(str::to_owned)),
			Some("contoso".into())
		);
		assert_eq!(bag.len(), 1);
		assert!(bag.remove("tenantHint").is_some());
		assert!(bag.is_empty());
	}

	#[test]
	fn deserializes_closed_value_kinds() {
		let bag: PropertyBag = serde_json::from_value(serde_json::json!({
			"Prompt": "consent",
			"MaxAge": 300,
			"Ratio": 0.5,
			"Pkce": true,
			"Tags": ["a", "b"],
			"Nested": { "realm": "primary" },
			"Unset": null
		}))
		.expect("bag");

		assert_eq!(bag.get("prompt").and_then(PropertyValue::as_str), Some("consent"));
		assert_eq!(bag.get("maxage").and_then(PropertyValue::as_i64), Some(300));
		assert_eq!(bag.get("ratio"), Some(&PropertyValue::Float(0.5)));
		assert_eq!(bag.get("PKCE").and_then(PropertyValue::as_bool), Some(true));
		assert!(matches!(bag.get("tags"), Some(PropertyValue::List(items)) if items.len() == 2));
		assert_eq!(
			bag.get("nested").and_then(|v| v.get("realm")).and_then(PropertyValue::as_str),
			Some("primary")
		);
		assert_eq!(bag.get("unset"), Some(&PropertyValue::Null));
	}
}
