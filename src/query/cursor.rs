//! Opaque pagination tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use relq_core::{RelqError, Result, Value};
use serde::{Deserialize, Serialize};

/// Position after the last row of a page: the ordering column, the value it
/// had on that row and when the token was issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    column: String,
    value: serde_json::Value,
    #[serde(rename = "ts")]
    issued_at: i64,
}

impl Cursor {
    pub fn new(column: impl Into<String>, value: &Value) -> Self {
        Self {
            column: column.into(),
            value: value.to_json(),
            issued_at: Utc::now().timestamp(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> Value {
        Value::from_json(self.value.clone())
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.issued_at, 0)
    }

    /// URL-safe token text.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| RelqError::Cursor(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| RelqError::Cursor(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| RelqError::Cursor(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_carry_column_and_value() {
        let token = Cursor::new("users.id", &Value::Integer(42)).encode().unwrap();
        assert!(!token.contains('='));
        let cursor = Cursor::decode(&token).unwrap();
        assert_eq!(cursor.column(), "users.id");
        assert_eq!(cursor.value(), Value::Integer(42));
        assert!(cursor.issued_at().is_some());
    }

    #[test]
    fn text_values_survive() {
        let token = Cursor::new("name", &"O'Brien".into()).encode().unwrap();
        assert_eq!(Cursor::decode(&token).unwrap().value(), Value::from("O'Brien"));
    }

    #[test]
    fn garbage_is_a_cursor_error() {
        assert!(matches!(Cursor::decode("%%%"), Err(RelqError::Cursor(_))));
        let not_json = URL_SAFE_NO_PAD.encode(b"[1, 2]");
        assert!(matches!(Cursor::decode(&not_json), Err(RelqError::Cursor(_))));
    }
}
