//! Typed message content.
//!
//! On the wire a message carries a `type` tag (`text`, `image`, `location`)
//! and an optional `metadata` object whose shape depends on the tag. Here the
//! two are folded into one enum that can only be built through validation,
//! so nothing downstream has to inspect raw metadata again.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text,
    Image { url: String },
    Location { lat: f64, lng: f64 },
}

impl MessageContent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image { .. } => "image",
            Self::Location { .. } => "location",
        }
    }

    /// Validate a raw `type` tag and its metadata.
    ///
    /// A missing tag means `text`. Text messages ignore any metadata.
    /// Image metadata needs a non-empty `imageUrl` (or `url`) string.
    /// Location metadata is accepted as a GeoJSON point
    /// (`{"location": {"type": "Point", "coordinates": [lng, lat]}}`), a bare
    /// `{"coordinates": [lng, lat]}` pair, or `{"latitude", "longitude"}`.
    pub fn from_parts(kind: Option<&str>, metadata: Option<&Value>) -> Result<Self, ValidationError> {
        match kind.unwrap_or("text") {
            "text" => Ok(Self::Text),
            "image" => parse_image(metadata),
            "location" => parse_location(metadata),
            other => Err(ValidationError::UnknownMessageType(other.to_string())),
        }
    }

    /// Metadata object as it appears on the wire, `None` for text.
    pub fn metadata(&self) -> Option<Value> {
        match self {
            Self::Text => None,
            Self::Image { url } => Some(json!({ "imageUrl": url })),
            Self::Location { lat, lng } => Some(json!({
                "location": { "type": "Point", "coordinates": [lng, lat] }
            })),
        }
    }
}

fn parse_image(metadata: Option<&Value>) -> Result<MessageContent, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidMetadata {
        kind: "image",
        reason: reason.to_string(),
    };

    let metadata = metadata.ok_or_else(|| invalid("metadata is required"))?;
    let url = metadata
        .get("imageUrl")
        .or_else(|| metadata.get("url"))
        .ok_or_else(|| invalid("imageUrl is required"))?
        .as_str()
        .ok_or_else(|| invalid("imageUrl must be a string"))?
        .trim();

    if url.is_empty() {
        return Err(invalid("imageUrl must not be empty"));
    }

    Ok(MessageContent::Image {
        url: url.to_string(),
    })
}

fn parse_location(metadata: Option<&Value>) -> Result<MessageContent, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidMetadata {
        kind: "location",
        reason: reason.to_string(),
    };

    let metadata = metadata.ok_or_else(|| invalid("metadata is required"))?;

    let (lng, lat) = if let Some(point) = metadata.get("location") {
        if let Some(ty) = point.get("type") {
            if ty.as_str() != Some("Point") {
                return Err(invalid("location.type must be \"Point\""));
            }
        }
        coordinate_pair(point.get("coordinates")).ok_or_else(|| invalid("expected 2 numeric coordinates"))?
    } else if metadata.get("coordinates").is_some() {
        coordinate_pair(metadata.get("coordinates")).ok_or_else(|| invalid("expected 2 numeric coordinates"))?
    } else {
        let lat = metadata.get("latitude").and_then(Value::as_f64);
        let lng = metadata.get("longitude").and_then(Value::as_f64);
        match (lng, lat) {
            (Some(lng), Some(lat)) => (lng, lat),
            _ => return Err(invalid("coordinates are required")),
        }
    };

    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(invalid("latitude out of range"));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(invalid("longitude out of range"));
    }

    Ok(MessageContent::Location { lat, lng })
}

/// `[lng, lat]`, exactly two numbers.
fn coordinate_pair(value: Option<&Value>) -> Option<(f64, f64)> {
    match value?.as_array()?.as_slice() {
        [lng, lat] => Some((lng.as_f64()?, lat.as_f64()?)),
        _ => None,
    }
}

impl Serialize for MessageContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let metadata = self.metadata();
        let mut map = serializer.serialize_map(Some(if metadata.is_some() { 2 } else { 1 }))?;
        map.serialize_entry("type", self.kind())?;
        if let Some(metadata) = metadata {
            map.serialize_entry("metadata", &metadata)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MessageContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "type")]
            kind: Option<String>,
            metadata: Option<Value>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Self::from_parts(raw.kind.as_deref(), raw.metadata.as_ref()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_without_metadata() {
        assert_eq!(MessageContent::from_parts(Some("text"), None).unwrap(), MessageContent::Text);
        assert_eq!(MessageContent::from_parts(None, None).unwrap(), MessageContent::Text);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = MessageContent::from_parts(Some("video"), None).unwrap_err();
        assert_eq!(err, ValidationError::UnknownMessageType("video".into()));
    }

    #[test]
    fn test_image_requires_url_string() {
        assert!(MessageContent::from_parts(Some("image"), None).is_err());
        assert!(MessageContent::from_parts(Some("image"), Some(&json!({ "imageUrl": 42 }))).is_err());
        assert!(MessageContent::from_parts(Some("image"), Some(&json!({ "imageUrl": "  " }))).is_err());

        let content =
            MessageContent::from_parts(Some("image"), Some(&json!({ "imageUrl": "/uploads/a.png" }))).unwrap();
        assert_eq!(
            content,
            MessageContent::Image {
                url: "/uploads/a.png".into()
            }
        );
    }

    #[test]
    fn test_location_geojson_point() {
        let meta = json!({ "location": { "type": "Point", "coordinates": [106.8, -6.2] } });
        let content = MessageContent::from_parts(Some("location"), Some(&meta)).unwrap();
        assert_eq!(content, MessageContent::Location { lat: -6.2, lng: 106.8 });
    }

    #[test]
    fn test_location_latitude_longitude() {
        let meta = json!({ "latitude": 48.85, "longitude": 2.35, "address": "Paris" });
        let content = MessageContent::from_parts(Some("location"), Some(&meta)).unwrap();
        assert_eq!(content, MessageContent::Location { lat: 48.85, lng: 2.35 });
    }

    #[test]
    fn test_location_needs_exactly_two_coordinates() {
        for meta in [
            json!({ "coordinates": [1.0] }),
            json!({ "coordinates": [1.0, 2.0, 3.0] }),
            json!({ "coordinates": ["a", "b"] }),
            json!({ "location": { "type": "Polygon", "coordinates": [1.0, 2.0] } }),
            json!({}),
        ] {
            assert!(
                MessageContent::from_parts(Some("location"), Some(&meta)).is_err(),
                "accepted {meta}"
            );
        }
        assert!(MessageContent::from_parts(Some("location"), None).is_err());
    }

    #[test]
    fn test_location_out_of_range() {
        let meta = json!({ "coordinates": [10.0, 95.0] });
        assert!(MessageContent::from_parts(Some("location"), Some(&meta)).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(MessageContent::Location { lat: 1.5, lng: 2.5 }).unwrap();
        assert_eq!(value["type"], "location");
        assert_eq!(value["metadata"]["location"]["coordinates"], json!([2.5, 1.5]));

        let value = serde_json::to_value(MessageContent::Text).unwrap();
        assert_eq!(value, json!({ "type": "text" }));

        let parsed: MessageContent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, MessageContent::Text);
    }
}
