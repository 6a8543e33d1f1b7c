mod capture;
mod engine;
mod lenient;
mod request;
mod result;
mod traceback;
mod workspace;

pub use capture::{
    Channel, OutputEvent, OutputSink, OutputSinks, StreamBuilder, StreamCapture, DEFAULT_WINDOW,
};
pub use engine::Engine;
pub use lenient::{ffi_proxy, numpy_array, numpy_scalar, Fallback, LenientSerializer};
pub use request::{validate_file_name, RunRequest, ScriptFile};
pub use result::{ReportOutcome, RunMode, RunOutcome, RunReport, RunResult, StreamChunk};
pub use traceback::{
    is_loader_call_site, is_runtime_internal, is_synthetic_source, FrameFilter, FramePredicate,
};
pub use workspace::Workspace;
