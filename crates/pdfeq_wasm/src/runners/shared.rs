//! Conversions shared by the experiment runners.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

/// Deserialises `value`, falling back to the defaults when it is absent.
pub(crate) fn config_or_default<T>(value: JsValue, what: &str) -> Result<T, JsValue>
where
    T: DeserializeOwned + Default,
{
    if value.is_undefined() || value.is_null() {
        return Ok(T::default());
    }
    from_value(value).map_err(|e| JsValue::from_str(&format!("Invalid {}: {}", what, e)))
}

pub(crate) fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

pub(crate) fn js_error(context: &str, err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{}: {:#}", context, err))
}

pub(crate) fn not_initialized() -> JsValue {
    JsValue::from_str("Runner not initialized")
}
