use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

/// Opaque address of a native engine object (settings or converter).
///
/// A `RawHandle` is only an address. It never dereferences itself and the
/// engine that produced it is the only thing allowed to interpret it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(NonNull<c_void>);

// Safety: the handle is an inert address; all access goes through an Engine
// that is Send + Sync and documents its own threading rules.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    /// Wrap a pointer returned by the engine, `None` if it is null.
    pub fn new<T>(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr.cast::<c_void>()).map(RawHandle)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Address used as the callback registry key.
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:#x})", self.addr())
    }
}
