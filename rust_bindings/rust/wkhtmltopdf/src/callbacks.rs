//! Callback slots and the `extern "C"` trampolines handed to the engine.
//!
//! The engine only tells a trampoline which converter fired (its native
//! address). Each trampoline decodes the payload and redispatches through the
//! [registry](crate::registry) to the closures stored on that [`Converter`].

use crate::converter::Converter;
use crate::registry;
use std::any::Any;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Native callback carrying an integer (progress percentage).
pub type IntCallback = unsafe extern "C" fn(converter: *mut c_void, value: c_int);

/// Native callback carrying a NUL-terminated message.
pub type StrCallback = unsafe extern "C" fn(converter: *mut c_void, text: *const c_char);

/// Native callback without payload.
pub type VoidCallback = unsafe extern "C" fn(converter: *mut c_void);

/// The four function pointers installed on every native converter.
#[derive(Clone, Copy, Debug)]
pub struct Trampolines {
    pub progress_changed: IntCallback,
    pub error: StrCallback,
    pub warning: StrCallback,
    pub phase_changed: VoidCallback,
}

pub(crate) const TRAMPOLINES: Trampolines = Trampolines {
    progress_changed: progress_changed_trampoline,
    error: error_trampoline,
    warning: warning_trampoline,
    phase_changed: phase_changed_trampoline,
};

/// A decoded engine event on its way to a converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    ProgressChanged(i32),
    Error(String),
    Warning(String),
    PhaseChanged,
}

pub(crate) type ProgressFn = Box<dyn FnMut(&Converter, i32) + Send>;
pub(crate) type MessageFn = Box<dyn FnMut(&Converter, &str) + Send>;
pub(crate) type PhaseFn = Box<dyn FnMut(&Converter) + Send>;

/// User closures of one converter. Empty slots swallow their events.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub progress_changed: Option<ProgressFn>,
    pub error: Option<MessageFn>,
    pub warning: Option<MessageFn>,
    pub phase_changed: Option<PhaseFn>,
}

impl Callbacks {
    pub(crate) fn invoke(&mut self, converter: &Converter, event: &Event) {
        match event {
            Event::ProgressChanged(value) => {
                if let Some(callback) = self.progress_changed.as_mut() {
                    callback(converter, *value);
                }
            }
            Event::Error(message) => {
                if let Some(callback) = self.error.as_mut() {
                    callback(converter, message);
                }
            }
            Event::Warning(message) => {
                if let Some(callback) = self.warning.as_mut() {
                    callback(converter, message);
                }
            }
            Event::PhaseChanged => {
                if let Some(callback) = self.phase_changed.as_mut() {
                    callback(converter);
                }
            }
        }
    }
}

/// Copy an engine-owned C string, replacing invalid UTF-8. Null yields "".
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn decode_text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

pub(crate) unsafe extern "C" fn progress_changed_trampoline(converter: *mut c_void, value: c_int) {
    guarded("progress_changed", || {
        registry::dispatch(converter as usize, Event::ProgressChanged(value))
    });
}

pub(crate) unsafe extern "C" fn error_trampoline(converter: *mut c_void, text: *const c_char) {
    let message = decode_text(text);
    guarded("error", || registry::dispatch(converter as usize, Event::Error(message)));
}

pub(crate) unsafe extern "C" fn warning_trampoline(converter: *mut c_void, text: *const c_char) {
    let message = decode_text(text);
    guarded("warning", || registry::dispatch(converter as usize, Event::Warning(message)));
}

pub(crate) unsafe extern "C" fn phase_changed_trampoline(converter: *mut c_void) {
    guarded("phase_changed", || registry::dispatch(converter as usize, Event::PhaseChanged));
}

// Unwinding into native frames is undefined, so panics stop here.
fn guarded(callback: &'static str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(
            callback,
            panic = %panic_message(payload.as_ref()),
            "Callback panicked, event discarded"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
