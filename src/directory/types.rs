use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::cache::EntityId;

/// A restaurant listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
  pub id: EntityId,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub neighborhood: String,
  #[serde(default)]
  pub cuisine_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub photograph: Option<String>,
  /// The API stores this as either a bool or the strings "true"/"false"
  #[serde(default, deserialize_with = "deserialize_flag")]
  pub is_favorite: bool,
  /// Fields the worker does not interpret (address, latlng, operating_hours, ...)
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A review of a restaurant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
  pub id: EntityId,
  pub restaurant_id: EntityId,
  #[serde(default)]
  pub name: String,
  /// Number from the API, sometimes a string when posted from a form
  #[serde(default)]
  pub rating: Value,
  #[serde(default)]
  pub comments: String,
  #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<Value>,
  #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<Value>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Fields a review edit may overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewEdit {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rating: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub comments: Option<String>,
  #[serde(
    rename = "updatedAt",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub updated_at: Option<Value>,
}

impl ReviewEdit {
  /// Overwrite the edited fields on a stored review record.
  pub fn apply_to(&self, record: &mut Map<String, Value>) {
    if let Some(name) = &self.name {
      record.insert("name".into(), Value::from(name.as_str()));
    }
    if let Some(rating) = &self.rating {
      record.insert("rating".into(), rating.clone());
    }
    if let Some(comments) = &self.comments {
      record.insert("comments".into(), Value::from(comments.as_str()));
    }
    if let Some(updated_at) = &self.updated_at {
      record.insert("updatedAt".into(), updated_at.clone());
    }
  }
}

/// Parse a flag that may arrive as a bool or as "true"/"false".
pub fn parse_flag(value: &str) -> Option<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "true" | "1" => Some(true),
    "false" | "0" => Some(false),
    _ => None,
  }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Bool(b) => Ok(b),
    Value::String(s) => Ok(parse_flag(&s).unwrap_or(false)),
    Value::Null => Ok(false),
    other => Err(serde::de::Error::custom(format!(
      "expected a boolean flag, got {}",
      other
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_restaurant_accepts_string_favorite() {
    let r: Restaurant = serde_json::from_value(json!({
      "id": 3,
      "name": "Kang Ho Dong Baekjeong",
      "neighborhood": "Manhattan",
      "cuisine_type": "Asian",
      "is_favorite": "true",
      "latlng": {"lat": 40.74, "lng": -73.98}
    }))
    .unwrap();

    assert!(r.is_favorite);
    assert!(r.extra.contains_key("latlng"));
  }

  #[test]
  fn test_restaurant_missing_favorite_defaults_false() {
    let r: Restaurant = serde_json::from_value(json!({"id": 1})).unwrap();
    assert!(!r.is_favorite);
  }

  #[test]
  fn test_review_round_trips_timestamps() {
    let raw = json!({
      "id": 1,
      "restaurant_id": 7,
      "name": "A",
      "rating": 5,
      "comments": "x",
      "createdAt": 1504095567183i64,
      "updatedAt": 1504095567183i64
    });
    let review: Review = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(review.restaurant_id, EntityId::Int(7));
    assert_eq!(serde_json::to_value(&review).unwrap(), raw);
  }

  #[test]
  fn test_review_edit_only_touches_edited_fields() {
    let mut record = json!({"id": 1, "name": "A", "rating": 5, "comments": "x"})
      .as_object()
      .cloned()
      .unwrap();
    let edit = ReviewEdit {
      comments: Some("changed".into()),
      ..Default::default()
    };
    edit.apply_to(&mut record);

    assert_eq!(record["comments"], "changed");
    assert_eq!(record["name"], "A");
    assert_eq!(record["rating"], 5);
  }

  #[test]
  fn test_parse_flag() {
    assert_eq!(parse_flag("true"), Some(true));
    assert_eq!(parse_flag("FALSE"), Some(false));
    assert_eq!(parse_flag("maybe"), None);
  }
}
