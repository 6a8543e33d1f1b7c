mod protocol;
mod python;
mod traits;
mod value;

#[cfg(test)]
pub(crate) mod fake;

pub use python::PythonRuntime;
pub use traits::{
    Attempt, EntryKind, Frame, LoadRequest, LoadedUnit, RuntimeInfo, ScriptFailure,
    ScriptRuntime,
};
pub use value::{ForeignObject, ScriptValue};
