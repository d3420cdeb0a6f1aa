//! The engine seam: everything the converter needs from the native library.
//!
//! [`NativeEngine`] forwards to libwkhtmltox (feature `native`).
//! [`ScriptedEngine`] runs in-process and replays a fixed script of
//! callback events, which lets hosts exercise the whole binding without the
//! native library installed.

#[cfg(feature = "native")]
pub mod native;
pub mod scripted;

#[cfg(feature = "native")]
pub use native::NativeEngine;
pub use scripted::{ScriptedEngine, ScriptedEvent};

use crate::callbacks::Trampolines;
use crate::error::{PdfError, Result};
use crate::handle::RawHandle;
use std::ffi::{c_char, CStr};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Operations of an HTML to PDF engine, mirroring the wkhtmltopdf C API.
///
/// # Safety
///
/// Implementors promise that:
///
/// - handles returned by the `create_*` methods stay valid until they are
///   destroyed, or until they are consumed by `create_converter` /
///   `add_object`, after which the converter owns and frees them;
/// - the pointer returned by [`output`](Engine::output) is readable for the
///   returned length until the converter is destroyed;
/// - pointers returned by [`phase_description`](Engine::phase_description)
///   and [`progress_string`](Engine::progress_string) are NUL-terminated and
///   valid until the next call on the same converter;
/// - installed trampolines are only invoked from inside
///   [`convert`](Engine::convert), on the calling thread, with the converter
///   handle as their first argument.
///
/// Callers of the `unsafe fn` methods must pass handles produced by this
/// engine that have not been destroyed or consumed.
pub unsafe trait Engine: Send + Sync + 'static {
    /// Short name used in logs and health output.
    fn name(&self) -> &str;

    fn version(&self) -> String;

    /// Whether the engine was built against the patched Qt.
    fn extended_qt(&self) -> bool;

    /// The only thread allowed to drive this engine, if it has one.
    fn owner_thread(&self) -> Option<ThreadId> {
        None
    }

    fn create_global_settings(&self) -> Option<RawHandle>;

    unsafe fn destroy_global_settings(&self, settings: RawHandle);

    /// Returns `false` if the engine rejected the pair.
    unsafe fn set_global_setting(&self, settings: RawHandle, name: &CStr, value: &CStr) -> bool;

    /// Copies the value into `buf` like `strncpy`: NUL-padded when it fits,
    /// truncated without a terminator when it does not. Returns `false` if
    /// the setting is unknown.
    unsafe fn get_global_setting(&self, settings: RawHandle, name: &CStr, buf: &mut [u8]) -> bool;

    fn create_object_settings(&self) -> Option<RawHandle>;

    unsafe fn destroy_object_settings(&self, settings: RawHandle);

    unsafe fn set_object_setting(&self, settings: RawHandle, name: &CStr, value: &CStr) -> bool;

    unsafe fn get_object_setting(&self, settings: RawHandle, name: &CStr, buf: &mut [u8]) -> bool;

    /// Takes ownership of `global`.
    unsafe fn create_converter(&self, global: RawHandle) -> Option<RawHandle>;

    /// Frees the converter together with every settings handle it owns.
    unsafe fn destroy_converter(&self, converter: RawHandle);

    unsafe fn install_callbacks(&self, converter: RawHandle, trampolines: &Trampolines);

    /// Takes ownership of `settings`. `data` is inline markup, if any.
    unsafe fn add_object(&self, converter: RawHandle, settings: RawHandle, data: Option<&CStr>);

    /// Runs the conversion. 0 means success.
    unsafe fn convert(&self, converter: RawHandle) -> i32;

    /// Pointer and byte length of the produced document.
    unsafe fn output(&self, converter: RawHandle) -> (*const u8, usize);

    unsafe fn http_error_code(&self, converter: RawHandle) -> i32;

    unsafe fn current_phase(&self, converter: RawHandle) -> i32;

    unsafe fn phase_count(&self, converter: RawHandle) -> i32;

    unsafe fn phase_description(&self, converter: RawHandle, phase: i32) -> *const c_char;

    unsafe fn progress_string(&self, converter: RawHandle) -> *const c_char;
}

/// Identity comparison for engines shared behind `Arc<dyn Engine>`.
pub(crate) fn same_engine(a: &Arc<dyn Engine>, b: &Arc<dyn Engine>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Fails with [`PdfError::WrongThread`] off the engine's owner thread.
pub(crate) fn ensure_owner_thread(engine: &dyn Engine) -> Result<()> {
    match engine.owner_thread() {
        Some(owner) if owner != thread::current().id() => Err(PdfError::WrongThread),
        _ => Ok(()),
    }
}
