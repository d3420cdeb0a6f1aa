//! libwkhtmltox-backed engine

use super::Engine;
use crate::callbacks::Trampolines;
use crate::error::{PdfError, Result};
use crate::ffi;
use crate::handle::RawHandle;
use std::ffi::{c_char, c_int, c_uchar, c_void, CStr};
use std::mem;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{info, warn};

// wkhtmltopdf_init may only run once per process
static ENGINE: Mutex<Option<Arc<NativeEngine>>> = Mutex::new(None);

/// Engine backed by the linked libwkhtmltox.
///
/// The library is not thread safe: every call, conversions included, has to
/// happen on the thread that called [`NativeEngine::init`]. Calls from any
/// other thread fail with [`PdfError::WrongThread`].
pub struct NativeEngine {
    use_graphics: bool,
    thread: ThreadId,
}

impl NativeEngine {
    /// Initialize libwkhtmltox, or return the engine initialized earlier.
    pub fn init(use_graphics: bool) -> Result<Arc<NativeEngine>> {
        let mut slot = ENGINE.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(engine) = slot.as_ref() {
            if engine.use_graphics != use_graphics {
                warn!(
                    requested = use_graphics,
                    active = engine.use_graphics,
                    "wkhtmltopdf already initialized with a different graphics mode"
                );
            }
            if engine.thread != thread::current().id() {
                warn!("wkhtmltopdf was initialized on another thread; calls from this one will fail");
            }
            return Ok(Arc::clone(engine));
        }

        let result = unsafe { ffi::wkhtmltopdf_init(c_int::from(use_graphics)) };
        if result != 1 {
            return Err(PdfError::Init(format!(
                "wkhtmltopdf_init returned {result}"
            )));
        }

        let engine = Arc::new(NativeEngine {
            use_graphics,
            thread: thread::current().id(),
        });
        info!(
            version = %engine.version(),
            extended_qt = engine.extended_qt(),
            use_graphics,
            "Initialized libwkhtmltox"
        );
        *slot = Some(Arc::clone(&engine));
        Ok(engine)
    }
}

fn global_ptr(handle: RawHandle) -> *mut ffi::wkhtmltopdf_global_settings {
    handle.as_ptr().cast()
}

fn object_ptr(handle: RawHandle) -> *mut ffi::wkhtmltopdf_object_settings {
    handle.as_ptr().cast()
}

fn converter_ptr(handle: RawHandle) -> *mut ffi::wkhtmltopdf_converter {
    handle.as_ptr().cast()
}

fn buf_len(buf: &[u8]) -> c_int {
    c_int::try_from(buf.len()).unwrap_or(c_int::MAX)
}

unsafe impl Engine for NativeEngine {
    fn name(&self) -> &str {
        "libwkhtmltox"
    }

    fn version(&self) -> String {
        let version = unsafe { ffi::wkhtmltopdf_version() };
        if version.is_null() {
            return "unknown".to_string();
        }
        unsafe { CStr::from_ptr(version) }
            .to_str()
            .unwrap_or("unknown")
            .to_string()
    }

    fn extended_qt(&self) -> bool {
        unsafe { ffi::wkhtmltopdf_extended_qt() != 0 }
    }

    fn owner_thread(&self) -> Option<ThreadId> {
        Some(self.thread)
    }

    fn create_global_settings(&self) -> Option<RawHandle> {
        RawHandle::new(unsafe { ffi::wkhtmltopdf_create_global_settings() })
    }

    unsafe fn destroy_global_settings(&self, settings: RawHandle) {
        ffi::wkhtmltopdf_destroy_global_settings(global_ptr(settings));
    }

    unsafe fn set_global_setting(&self, settings: RawHandle, name: &CStr, value: &CStr) -> bool {
        ffi::wkhtmltopdf_set_global_setting(global_ptr(settings), name.as_ptr(), value.as_ptr()) == 1
    }

    unsafe fn get_global_setting(&self, settings: RawHandle, name: &CStr, buf: &mut [u8]) -> bool {
        ffi::wkhtmltopdf_get_global_setting(
            global_ptr(settings),
            name.as_ptr(),
            buf.as_mut_ptr().cast::<c_char>(),
            buf_len(buf),
        ) == 1
    }

    fn create_object_settings(&self) -> Option<RawHandle> {
        RawHandle::new(unsafe { ffi::wkhtmltopdf_create_object_settings() })
    }

    unsafe fn destroy_object_settings(&self, settings: RawHandle) {
        ffi::wkhtmltopdf_destroy_object_settings(object_ptr(settings));
    }

    unsafe fn set_object_setting(&self, settings: RawHandle, name: &CStr, value: &CStr) -> bool {
        ffi::wkhtmltopdf_set_object_setting(object_ptr(settings), name.as_ptr(), value.as_ptr()) == 1
    }

    unsafe fn get_object_setting(&self, settings: RawHandle, name: &CStr, buf: &mut [u8]) -> bool {
        ffi::wkhtmltopdf_get_object_setting(
            object_ptr(settings),
            name.as_ptr(),
            buf.as_mut_ptr().cast::<c_char>(),
            buf_len(buf),
        ) == 1
    }

    unsafe fn create_converter(&self, global: RawHandle) -> Option<RawHandle> {
        RawHandle::new(ffi::wkhtmltopdf_create_converter(global_ptr(global)))
    }

    unsafe fn destroy_converter(&self, converter: RawHandle) {
        ffi::wkhtmltopdf_destroy_converter(converter_ptr(converter));
    }

    unsafe fn install_callbacks(&self, converter: RawHandle, trampolines: &Trampolines) {
        // The library types the first argument as its converter struct; the
        // trampolines take it as an untyped pointer, which has the same ABI.
        let progress = mem::transmute::<
            unsafe extern "C" fn(*mut c_void, c_int),
            unsafe extern "C" fn(*mut ffi::wkhtmltopdf_converter, c_int),
        >(trampolines.progress_changed);
        let error = mem::transmute::<
            unsafe extern "C" fn(*mut c_void, *const c_char),
            unsafe extern "C" fn(*mut ffi::wkhtmltopdf_converter, *const c_char),
        >(trampolines.error);
        let warning = mem::transmute::<
            unsafe extern "C" fn(*mut c_void, *const c_char),
            unsafe extern "C" fn(*mut ffi::wkhtmltopdf_converter, *const c_char),
        >(trampolines.warning);
        let phase_changed = mem::transmute::<
            unsafe extern "C" fn(*mut c_void),
            unsafe extern "C" fn(*mut ffi::wkhtmltopdf_converter),
        >(trampolines.phase_changed);

        let c = converter_ptr(converter);
        ffi::wkhtmltopdf_set_progress_changed_callback(c, Some(progress));
        ffi::wkhtmltopdf_set_error_callback(c, Some(error));
        ffi::wkhtmltopdf_set_warning_callback(c, Some(warning));
        ffi::wkhtmltopdf_set_phase_changed_callback(c, Some(phase_changed));
    }

    unsafe fn add_object(&self, converter: RawHandle, settings: RawHandle, data: Option<&CStr>) {
        ffi::wkhtmltopdf_add_object(
            converter_ptr(converter),
            object_ptr(settings),
            data.map_or(ptr::null(), CStr::as_ptr),
        );
    }

    unsafe fn convert(&self, converter: RawHandle) -> i32 {
        // The library returns 1 on success and 0 on failure
        if ffi::wkhtmltopdf_convert(converter_ptr(converter)) != 0 {
            0
        } else {
            1
        }
    }

    unsafe fn output(&self, converter: RawHandle) -> (*const u8, usize) {
        let mut data: *const c_uchar = ptr::null();
        let len = ffi::wkhtmltopdf_get_output(converter_ptr(converter), &mut data);
        (data, usize::try_from(len).unwrap_or(0))
    }

    unsafe fn http_error_code(&self, converter: RawHandle) -> i32 {
        ffi::wkhtmltopdf_http_error_code(converter_ptr(converter))
    }

    unsafe fn current_phase(&self, converter: RawHandle) -> i32 {
        ffi::wkhtmltopdf_current_phase(converter_ptr(converter))
    }

    unsafe fn phase_count(&self, converter: RawHandle) -> i32 {
        ffi::wkhtmltopdf_phase_count(converter_ptr(converter))
    }

    unsafe fn phase_description(&self, converter: RawHandle, phase: i32) -> *const c_char {
        ffi::wkhtmltopdf_phase_description(converter_ptr(converter), phase)
    }

    unsafe fn progress_string(&self, converter: RawHandle) -> *const c_char {
        ffi::wkhtmltopdf_progress_string(converter_ptr(converter))
    }
}
