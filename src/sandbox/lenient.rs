//! Lenient conversion of script return values into JSON.
//!
//! Plain values convert directly. Foreign objects go through a chain of
//! fallbacks, each of which may pick one of the plain-value views the runtime
//! attached to the object; the first match wins. A foreign object no fallback
//! recognises makes the whole conversion fail.

use serde_json::{Map, Number, Value};

use crate::error::{Result, SandboxError};
use crate::runtime::{ForeignObject, ScriptValue};

/// Picks the plain-value view to use for a foreign object.
pub type Fallback = fn(&ForeignObject) -> Option<&ScriptValue>;

/// numpy arrays and matrices become nested lists.
pub fn numpy_array(object: &ForeignObject) -> Option<&ScriptValue> {
    match (object.module.as_str(), object.type_name.as_str()) {
        ("numpy", "ndarray" | "matrix") => object.view("tolist"),
        _ => None,
    }
}

/// Other numpy values are scalars.
pub fn numpy_scalar(object: &ForeignObject) -> Option<&ScriptValue> {
    if object.module == "numpy" {
        object.view("item")
    } else {
        None
    }
}

/// Proxies of host-runtime objects unwrap to their plain value.
pub fn ffi_proxy(object: &ForeignObject) -> Option<&ScriptValue> {
    if object.module == "pyodide.ffi" {
        object.view("to_py")
    } else {
        None
    }
}

#[derive(Clone)]
pub struct LenientSerializer {
    fallbacks: Vec<Fallback>,
}

impl Default for LenientSerializer {
    fn default() -> Self {
        Self {
            fallbacks: vec![numpy_array as Fallback, numpy_scalar, ffi_proxy],
        }
    }
}

impl std::fmt::Debug for LenientSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LenientSerializer")
            .field("fallbacks", &self.fallbacks.len())
            .finish()
    }
}

impl LenientSerializer {
    /// A serializer with no fallbacks at all.
    pub fn strict() -> Self {
        Self {
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallbacks.push(fallback);
        self
    }

    pub fn to_value(&self, value: &ScriptValue) -> Result<Value> {
        Ok(match value {
            ScriptValue::None => Value::Null,
            ScriptValue::Bool(b) => Value::Bool(*b),
            ScriptValue::Int(i) => Value::from(*i),
            ScriptValue::BigInt(text) => big_int(text)?,
            ScriptValue::Float(f) => Value::from(*f),
            ScriptValue::Str(s) => Value::String(s.clone()),
            ScriptValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.to_value(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            ScriptValue::Map(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, item) in entries {
                    map.insert(key.clone(), self.to_value(item)?);
                }
                Value::Object(map)
            }
            ScriptValue::Foreign(object) => {
                let view = self
                    .fallbacks
                    .iter()
                    .find_map(|fallback| fallback(object))
                    .ok_or_else(|| {
                        SandboxError::Serialization(format!(
                            "`{}` is not JSON serializable",
                            object.repr
                        ))
                    })?;
                self.to_value(view)?
            }
        })
    }
}

fn big_int(text: &str) -> Result<Value> {
    if let Ok(n) = text.parse::<u64>() {
        return Ok(Value::Number(n.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| SandboxError::Serialization(format!("`{}` is not a valid integer", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ndarray() -> ForeignObject {
        ForeignObject::new("numpy", "ndarray", "array([[1, 2], [3, 4]])").with_view(
            "tolist",
            ScriptValue::List(vec![
                ScriptValue::List(vec![1.into(), 2.into()]),
                ScriptValue::List(vec![3.into(), 4.into()]),
            ]),
        )
    }

    #[test]
    fn test_plain_values() {
        let value = ScriptValue::Map(vec![
            ("name".to_string(), "ada".into()),
            ("ratio".to_string(), ScriptValue::Float(0.5)),
            ("tags".to_string(), ScriptValue::List(vec![ScriptValue::None])),
            ("ok".to_string(), ScriptValue::Bool(true)),
        ]);

        let out = LenientSerializer::default().to_value(&value).unwrap();
        assert_eq!(
            out,
            json!({"name": "ada", "ratio": 0.5, "tags": [null], "ok": true})
        );
    }

    #[test]
    fn test_numpy_array_becomes_nested_list() {
        let value = ScriptValue::Foreign(ndarray());
        let out = LenientSerializer::default().to_value(&value).unwrap();
        assert_eq!(out, json!([[1, 2], [3, 4]]));
    }

    #[test]
    fn test_numpy_scalar_and_proxy() {
        let serializer = LenientSerializer::default();
        let scalar = ForeignObject::new("numpy", "int64", "np.int64(7)").with_view("item", 7.into());
        let proxy = ForeignObject::new("pyodide.ffi", "JsProxy", "[object Object]")
            .with_view("to_py", ScriptValue::Map(vec![("a".to_string(), 1.into())]));

        assert_eq!(
            serializer.to_value(&ScriptValue::Foreign(scalar)).unwrap(),
            json!(7)
        );
        assert_eq!(
            serializer.to_value(&ScriptValue::Foreign(proxy)).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_unknown_foreign_value_fails_whole_conversion() {
        let value = ScriptValue::List(vec![
            1.into(),
            ScriptValue::Foreign(ForeignObject::new(
                "socket",
                "socket",
                "<socket.socket fd=3>",
            )),
        ]);

        let err = LenientSerializer::default().to_value(&value).unwrap_err();
        assert!(matches!(err, SandboxError::Serialization(_)));
        assert!(err.to_string().contains("`<socket.socket fd=3>` is not JSON serializable"));
    }

    #[test]
    fn test_strict_serializer_and_custom_fallback() {
        let value = ScriptValue::Foreign(ndarray());
        assert!(LenientSerializer::strict().to_value(&value).is_err());

        fn any_tolist(object: &ForeignObject) -> Option<&ScriptValue> {
            object.view("tolist")
        }
        let serializer = LenientSerializer::strict().with_fallback(any_tolist);
        assert_eq!(serializer.to_value(&value).unwrap(), json!([[1, 2], [3, 4]]));
    }

    #[test]
    fn test_big_ints() {
        let serializer = LenientSerializer::default();
        assert_eq!(
            serializer
                .to_value(&ScriptValue::BigInt("18446744073709551615".to_string()))
                .unwrap(),
            json!(18446744073709551615u64)
        );
        assert!(serializer
            .to_value(&ScriptValue::BigInt("-99999999999999999999".to_string()))
            .unwrap()
            .is_f64());
    }
}
