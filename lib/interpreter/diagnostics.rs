//! Fault reports, for faults the interpreter survives.

use log::error;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Write};

use crate::Error;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FaultKind {
    /// Executing an instruction failed, and the run was aborted.
    Execution,
    /// A control transfer ended a path with values left on the operand stack.
    StackCorruption,
}

/// Everything known about a fault at the time it happened.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FaultReport {
    pub kind: FaultKind,
    /// Source text of the analyzed unit.
    pub anchor_text: String,
    /// Index of the failing instruction, when known.
    pub index: Option<usize>,
    /// Listing of the flow graph, with the failing instruction marked.
    pub flow_graph: String,
    /// Description of the failing memory state, when known.
    pub state: Option<String>,
    pub message: String,
}

/// Receives fault reports.
pub trait DiagnosticSink {
    fn report(&self, report: &FaultReport);
}

/// The default sink, which logs every report as json.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, report: &FaultReport) {
        match serde_json::to_string(report) {
            Ok(json) => error!("{:?} fault: {}", report.kind, json),
            Err(_) => error!("{:?}", report),
        }
    }
}

/// Describe `value` without panicking on a failing `Display` implementation.
pub(crate) fn describe<T: Display + ?Sized>(value: &T) -> String {
    let mut description = String::new();
    if write!(description, "{}", value).is_err() {
        description.push_str("<failed to describe>");
    }
    description
}

/// Annotate `source` with the instruction and the state it failed at.
/// Cancellation, and errors already annotated, are returned unchanged.
pub(crate) fn instruction_fault<T: Display + ?Sized>(index: usize, state: &T, source: Error) -> Error {
    match source {
        Error::Cancelled | Error::InstructionFault { .. } => source,
        source => Error::InstructionFault {
            index,
            state: describe(state),
            source: Box::new(source),
        },
    }
}
