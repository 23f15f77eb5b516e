//! Pure mappings from each upstream schema to the canonical stored record.
//!
//! Normalizers never touch the network or the store, and the same raw value
//! always produces the same card.
pub mod magic;
pub mod pokemon;
pub mod yugioh;

use serde::Deserialize;
use serde_json::Value;

use crate::error::NormalizationError;
use crate::model::{CanonicalCard, Game};

/// Signature shared by the per-game normalizers.
pub type Normalizer = fn(&Value) -> Result<CanonicalCard, NormalizationError>;

pub fn normalizer_for(game: Game) -> Normalizer {
    match game {
        Game::Magic => magic::normalize,
        Game::Pokemon => pokemon::normalize,
        Game::Yugioh => yugioh::normalize,
    }
}

pub fn normalize(game: Game, raw: &Value) -> Result<CanonicalCard, NormalizationError> {
    normalizer_for(game)(raw)
}

/// Decode a raw record into its upstream shape without cloning the input.
pub(crate) fn decode<'a, T: Deserialize<'a>>(raw: &'a Value) -> Result<T, NormalizationError> {
    if !raw.is_object() {
        return Err(NormalizationError::NotAnObject);
    }
    T::deserialize(raw).map_err(|e| NormalizationError::Malformed(e.to_string()))
}

/// Treat blank strings the same as absent ones.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

pub(crate) fn required_text(
    value: Option<String>,
    field: &'static str,
) -> Result<String, NormalizationError> {
    non_empty(value).ok_or(NormalizationError::MissingField(field))
}

/// First candidate that is present at all. An empty string still counts;
/// only a missing or null field falls through to the next one.
pub(crate) fn first_present<I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    candidates.into_iter().flatten().next()
}

/// JavaScript-style truthiness: null, false, 0, NaN and "" are false.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Best-effort label for logging a record that may fail to normalize.
pub fn describe_raw(raw: &Value) -> String {
    let id = raw.get("id").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    let name = raw.get("name").and_then(Value::as_str);
    match (id, name) {
        (Some(id), Some(name)) => format!("{id} ({name})"),
        (Some(id), None) => id,
        (None, Some(name)) => name.to_string(),
        (None, None) => "<unidentified record>".to_string(),
    }
}
