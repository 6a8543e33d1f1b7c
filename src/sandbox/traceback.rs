//! Formatting of script failures.
//!
//! A failure is formatted as its remaining stack frames followed by the
//! exception summary. Frames matching any predicate of the [`FrameFilter`]
//! are dropped so the report reads as if the user's file had been run on
//! its own.

use std::fmt::Write;

use crate::runtime::{Frame, ScriptFailure};

/// Decides whether a frame (with its position in the stack) is dropped.
pub type FramePredicate = fn(usize, &Frame) -> bool;

#[derive(Clone)]
pub struct FrameFilter {
    predicates: Vec<FramePredicate>,
}

impl std::fmt::Debug for FrameFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameFilter")
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl Default for FrameFilter {
    fn default() -> Self {
        Self {
            predicates: vec![
                is_loader_call_site as FramePredicate,
                is_runtime_internal,
                is_synthetic_source,
            ],
        }
    }
}

/// The outermost frame is always the call site that started the script.
pub fn is_loader_call_site(index: usize, _frame: &Frame) -> bool {
    index == 0
}

pub fn is_runtime_internal(_index: usize, frame: &Frame) -> bool {
    frame.internal
}

pub fn is_synthetic_source(_index: usize, frame: &Frame) -> bool {
    frame.is_synthetic()
}

impl FrameFilter {
    pub fn new(predicates: Vec<FramePredicate>) -> Self {
        Self { predicates }
    }

    pub fn with_predicate(mut self, predicate: FramePredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn keeps(&self, index: usize, frame: &Frame) -> bool {
        !self.predicates.iter().any(|drop| drop(index, frame))
    }

    pub fn apply<'a>(&self, frames: &'a [Frame]) -> Vec<&'a Frame> {
        frames
            .iter()
            .enumerate()
            .filter(|(index, frame)| self.keeps(*index, frame))
            .map(|(_, frame)| frame)
            .collect()
    }

    /// Render a failure for the script author.
    ///
    /// Syntax failures never executed anything, so only the summary is shown.
    pub fn format(&self, failure: &ScriptFailure) -> String {
        let mut out = String::new();
        if !failure.syntax {
            for frame in self.apply(&failure.frames) {
                format_frame(&mut out, frame);
            }
        }
        out.push_str(&failure.summary);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

fn format_frame(out: &mut String, frame: &Frame) {
    let _ = writeln!(
        out,
        "  File \"{}\", line {}, in {}",
        frame.filename, frame.lineno, frame.name
    );
    if let Some(line) = frame.line.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        let _ = writeln!(out, "    {}", line);
    }
}
