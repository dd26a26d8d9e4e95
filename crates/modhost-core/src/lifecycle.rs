//! Panic-isolated calls into module code.
//!
//! Every lifecycle method runs inside `catch_unwind`; a failure or panic is
//! turned into a [`HostError::LifecycleFailed`] carrying the module id and
//! stage, so one misbehaving module never aborts a batch operation.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use modhost_sdk::ModuleResult;

use crate::error::{HostError, Result};

/// The module entry point being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCall {
    Instantiate,
    Initialize,
    Activate,
    Deactivate,
    View,
    Dispose,
}

impl LifecycleCall {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleCall::Instantiate => "instantiate",
            LifecycleCall::Initialize => "initialize",
            LifecycleCall::Activate => "activate",
            LifecycleCall::Deactivate => "deactivate",
            LifecycleCall::View => "view",
            LifecycleCall::Dispose => "dispose",
        }
    }
}

impl fmt::Display for LifecycleCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a fallible module call, converting errors and panics.
pub fn call<T>(id: &str, stage: LifecycleCall, f: impl FnOnce() -> ModuleResult<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(HostError::LifecycleFailed {
            id: id.to_string(),
            stage: stage.as_str(),
            reason: e.to_string(),
        }),
        Err(payload) => Err(HostError::LifecycleFailed {
            id: id.to_string(),
            stage: stage.as_str(),
            reason: format!("panicked: {}", panic_message(&*payload)),
        }),
    }
}

/// Run an infallible module call, converting panics.
pub fn call_infallible<T>(id: &str, stage: LifecycleCall, f: impl FnOnce() -> T) -> Result<T> {
    call(id, stage, || Ok(f()))
}
