use serde::{Deserialize, Serialize};

use crate::errors::JobmonError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    #[serde(rename = "type")]
    pub tag_type: String,
    pub name: String,
}

/// A tag as named by API clients: type and name, no id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagRequest {
    #[serde(rename = "type")]
    pub tag_type: String,
    pub name: String,
}

impl TagRequest {
    pub fn new(tag_type: &str, name: &str) -> Self {
        Self {
            tag_type: tag_type.to_string(),
            name: name.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), JobmonError> {
        if self.tag_type.trim().is_empty() || self.name.trim().is_empty() {
            return Err(JobmonError::Validation(
                "tag type and name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_serializes_type_field() {
        let tag = Tag {
            id: 1,
            tag_type: "Debug".to_string(),
            name: "Testjob".to_string(),
        };
        let json = serde_json::to_value(&tag).unwrap();
        assert_eq!(json["type"], "Debug");
        assert_eq!(json["name"], "Testjob");
    }

    #[test]
    fn test_tag_request_validation() {
        assert!(TagRequest::new("Debug", "Testjob").validate().is_ok());
        assert!(TagRequest::new("", "Testjob").validate().is_err());
        assert!(TagRequest::new("Debug", "  ").validate().is_err());
    }

    #[test]
    fn test_tag_request_rejects_id() {
        let result =
            serde_json::from_str::<TagRequest>(r#"{"id": 3, "type": "Debug", "name": "x"}"#);
        assert!(result.is_err());
    }
}
