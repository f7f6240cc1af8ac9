use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recognized text fragment. Position and confidence are kept when the
/// engine sends them but nothing here depends on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, rename = "box", skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionResult {
    Regions(Vec<Region>),
    /// Engine output that is not a region list, kept verbatim.
    Opaque(Value),
}

impl RecognitionResult {
    pub fn from_value(value: Value) -> Self {
        if value.is_array() {
            if let Ok(regions) = serde_json::from_value::<Vec<Region>>(value.clone()) {
                return RecognitionResult::Regions(regions);
            }
        }
        RecognitionResult::Opaque(value)
    }

    /// Region texts joined by newlines in document order, or the serialized payload.
    pub fn into_text(self) -> String {
        match self {
            RecognitionResult::Regions(regions) => regions
                .into_iter()
                .map(|region| region.text)
                .collect::<Vec<_>>()
                .join("\n"),
            RecognitionResult::Opaque(value) => value.to_string(),
        }
    }
}
