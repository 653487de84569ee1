use serde::{Deserialize, Serialize};

/// Registry-assigned model identifier. Never chosen by a caller, never reused.
pub type ModelId = i32;

/// One column of a model's interface,
/// e.g. `{"name": "age", "type": "numerical", "encoder": "dense"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelFeature {
    pub name: String,
    #[serde(rename = "type")]
    pub feature_type: String,
    #[serde(default)]
    pub encoder: String,
}

/// Ordered input/output feature lists. Sent to workers as the `io_params` part.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IoSchema {
    #[serde(default)]
    pub input_features: Vec<ModelFeature>,
    #[serde(default)]
    pub output_features: Vec<ModelFeature>,
}

impl IoSchema {
    pub fn is_empty(&self) -> bool {
        self.input_features.is_empty() && self.output_features.is_empty()
    }
}

/// Model identity as held by the registry.
///
/// Serialized as-is into the `metadata` part of a load request, so the field
/// names here are part of the worker protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelRecord {
    pub id: ModelId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub io_params: IoSchema,
}

impl ModelRecord {
    /// Explicit encoders for the two JSON side-channels of a dispatch.
    pub fn metadata_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn io_params_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.io_params)
    }
}

/// Body of the completion callback a worker posts to `/finished`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyDone {
    pub id: ModelId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_uses_worker_field_names() {
        let record = ModelRecord {
            id: 7,
            name: "titanic".to_string(),
            description: "survival".to_string(),
            io_params: IoSchema {
                input_features: vec![ModelFeature {
                    name: "age".to_string(),
                    feature_type: "numerical".to_string(),
                    encoder: String::new(),
                }],
                output_features: vec![ModelFeature {
                    name: "survived".to_string(),
                    feature_type: "binary".to_string(),
                    encoder: String::new(),
                }],
            },
        };

        let v: serde_json::Value =
            serde_json::from_slice(&record.metadata_json().unwrap()).unwrap();
        assert_eq!(v["id"], 7);
        assert_eq!(v["description"], "survival");
        assert_eq!(v["io_params"]["input_features"][0]["type"], "numerical");
        assert_eq!(v["io_params"]["output_features"][0]["name"], "survived");
    }

    #[test]
    fn test_schema_keys_default_to_empty() {
        let schema: IoSchema = serde_json::from_str(r#"{"input_features": []}"#).unwrap();
        assert!(schema.is_empty());

        let feature: ModelFeature =
            serde_json::from_str(r#"{"name": "text", "type": "text"}"#).unwrap();
        assert_eq!(feature.encoder, "");
    }
}
