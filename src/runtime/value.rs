use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A script return value as reported by the runtime.
///
/// Values the runtime can represent natively arrive as plain variants;
/// anything else arrives as a [`ForeignObject`] and is resolved by the
/// lenient serializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ScriptValue {
    None,
    Bool(bool),
    Int(i64),
    /// Integer outside the 64-bit range, as decimal text
    BigInt(String),
    Float(f64),
    Str(String),
    List(Vec<ScriptValue>),
    /// String-keyed mapping in insertion order
    Map(Vec<(String, ScriptValue)>),
    Foreign(ForeignObject),
}

/// A value of a type the runtime could not encode by normal means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignObject {
    /// Module the value's type is defined in
    pub module: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub repr: String,
    /// Plain-value conversions the object offered, keyed by method name
    #[serde(default)]
    pub views: BTreeMap<String, ScriptValue>,
}

impl ForeignObject {
    pub fn new(module: &str, type_name: &str, repr: &str) -> Self {
        Self {
            module: module.to_string(),
            type_name: type_name.to_string(),
            repr: repr.to_string(),
            views: BTreeMap::new(),
        }
    }

    pub fn with_view(mut self, name: &str, value: ScriptValue) -> Self {
        self.views.insert(name.to_string(), value);
        self
    }

    pub fn view(&self, name: &str) -> Option<&ScriptValue> {
        self.views.get(name)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}
