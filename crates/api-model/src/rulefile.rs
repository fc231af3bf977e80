use serde::Deserialize;
use thiserror::Error;

use crate::model::MockApi;

#[derive(Debug, Error)]
pub enum RuleFileError {
    #[error("failed to parse rule document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to decode rule document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parses a multi-document YAML rule file (`---` separators); each document
/// is one MockAPI. YAML is translated to JSON first so the documents share
/// the persisted protobuf JSON schema.
pub fn parse_documents(input: &str) -> Result<Vec<MockApi>, RuleFileError> {
    let mut rules = Vec::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let json = serde_json::to_value(&value)?;
        rules.push(serde_json::from_value(json)?);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
uniqueKey: greet
path: /greet
method: GET
cases:
  - response:
      simple:
        code: 200
        body: hi
---
uniqueKey: farewell
path: /farewell
cases:
  - condition:
      simple:
        items:
          - operandX: $request.header.uid
            operator: ">="
            operandY: "5"
    response:
      simple:
        code: 200
        body: bye
"#;

    #[test]
    fn parses_every_document() {
        let rules = parse_documents(RULES).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].unique_key, "greet");
        assert_eq!(rules[1].unique_key, "farewell");
        assert_eq!(rules[1].cases.len(), 1);
        assert!(rules[1].cases[0].condition.is_some());
    }

    #[test]
    fn empty_documents_are_skipped() {
        let rules = parse_documents("---\n---\nuniqueKey: a\npath: /a\n").unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn malformed_documents_error() {
        assert!(parse_documents("uniqueKey: [unclosed").is_err());
    }
}
