//! JSON to JavaScript value conversion.
//!
//! Globals are injected by building native engine values from
//! `serde_json::Value`, so payload text never passes through the script
//! parser.
//!
//! | JSON Type | JavaScript Type |
//! |-----------|-----------------|
//! | null | null |
//! | boolean | Boolean |
//! | number | Number (integral values that fit in i32 stay integral) |
//! | string | String |
//! | array | Array |
//! | object | Object |

use boa_engine::{
    js_string,
    object::{builtins::JsArray, JsObject},
    value::JsValue,
    Context,
};
use serde_json::Value as JsonValue;

use crate::runtime::engine::ScriptError;

/// Converts a JSON value into a Boa value owned by `ctx`.
///
/// # Errors
///
/// Fails if a number has no `f64` representation or a property cannot be
/// defined on the created object.
pub fn json_to_js_value(json: &JsonValue, ctx: &mut Context) -> Result<JsValue, ScriptError> {
    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                return Ok(JsValue::new(i));
            }
            n.as_f64()
                .map(JsValue::new)
                .ok_or_else(|| ScriptError::new(format!("number {} is out of range", n)))
        }
        JsonValue::String(s) => Ok(JsValue::new(js_string!(s.as_str()))),
        JsonValue::Array(items) => {
            let array = JsArray::new(ctx);
            for (i, item) in items.iter().enumerate() {
                let value = json_to_js_value(item, ctx)?;
                array.push(value, ctx).map_err(|e| {
                    ScriptError::new(format!("failed to push array element {}: {}", i, e))
                })?;
            }
            Ok(array.into())
        }
        JsonValue::Object(map) => {
            let object = JsObject::with_object_proto(ctx.intrinsics());
            for (key, item) in map {
                let value = json_to_js_value(item, ctx)?;
                object
                    .create_data_property_or_throw(js_string!(key.as_str()), value, ctx)
                    .map_err(|e| {
                        ScriptError::new(format!("failed to set property '{}': {}", key, e))
                    })?;
            }
            Ok(object.into())
        }
    }
}
