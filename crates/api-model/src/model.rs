use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A declarative (host, path, method) -> cases binding.
///
/// The JSON form follows the protobuf JSON mapping of the management API
/// (camelCase fields, externally tagged oneofs), which is also the format
/// rules are persisted in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MockApi {
    pub unique_key: String,
    pub host: String,
    pub path: String,
    pub method: String,
    pub cases: Vec<Case>,
}

impl MockApi {
    /// Router-facing validity: identity and path are required, everything
    /// else is a wildcard when empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.unique_key.is_empty() {
            return Err(ValidationError::MissingUniqueKey);
        }
        if self.path.is_empty() {
            return Err(ValidationError::MissingPath);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ValidationError {
    #[error("unique key is required")]
    MissingUniqueKey,
    #[error("path is required")]
    MissingPath,
}

/// A `(condition, response)` pair tried in declaration order. A missing
/// condition matches unconditionally.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Case {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSpec>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    Simple(SimpleCondition),
    Script(ScriptCondition),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimpleCondition {
    pub use_or_among_items: bool,
    pub items: Vec<ConditionItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConditionItem {
    pub operand_x: String,
    pub operator: String,
    pub operand_y: String,
    pub opposite: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptCondition {
    pub lang: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseSpec {
    Simple(SimpleResponse),
    Script(ScriptResponse),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimpleResponse {
    pub code: u32,
    pub header: HashMap<String, String>,
    pub trailer: HashMap<String, String>,
    /// Body template; `{{ expr }}` placeholders go through variable
    /// substitution at render time.
    pub body: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptResponse {
    pub lang: String,
    pub content: String,
    #[serde(with = "proto_duration", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Protobuf-JSON duration strings: `"1s"`, `"0.5s"`, `"1.500s"`.
pub mod proto_duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                let secs = duration.as_secs_f64();
                if duration.subsec_nanos() == 0 {
                    serializer.serialize_str(&format!("{}s", duration.as_secs()))
                } else {
                    serializer.serialize_str(&format!("{secs}s"))
                }
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        match text {
            None => Ok(None),
            Some(text) => {
                let trimmed = text
                    .strip_suffix('s')
                    .ok_or_else(|| de::Error::custom(format!("invalid duration: {text}")))?;
                let secs: f64 = trimmed
                    .parse()
                    .map_err(|_| de::Error::custom(format!("invalid duration: {text}")))?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(de::Error::custom(format!("invalid duration: {text}")));
                }
                Ok(Some(Duration::from_secs_f64(secs)))
            }
        }
    }
}
