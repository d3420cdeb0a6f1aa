//! Process-wide map from native converter address to its [`Converter`].
//!
//! An entry exists only while [`Converter::convert`] is on the stack: the
//! [`Registration`] guard it holds removes the entry on every exit path,
//! unwinding included.

use crate::callbacks::Event;
use crate::converter::Converter;
use crate::handle::RawHandle;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use tracing::trace;

struct Target(NonNull<Converter>);

// Safety: a Target is only dereferenced by dispatch, which runs on the thread
// that registered it while that thread is blocked inside Converter::convert.
unsafe impl Send for Target {}

static REGISTRY: LazyLock<Mutex<HashMap<usize, Target>>> = LazyLock::new(Default::default);

fn lock() -> MutexGuard<'static, HashMap<usize, Target>> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a converter registered for as long as it lives.
pub(crate) struct Registration<'a> {
    addr: usize,
    _converter: PhantomData<&'a Converter>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        unregister(self.addr);
    }
}

/// Map `handle` to `converter`, replacing any previous entry for the address.
pub(crate) fn register<'a>(handle: RawHandle, converter: &'a Converter) -> Registration<'a> {
    let addr = handle.addr();
    lock().insert(addr, Target(NonNull::from(converter)));
    trace!(handle = ?handle, "Registered converter");
    Registration {
        addr,
        _converter: PhantomData,
    }
}

pub(crate) fn unregister(addr: usize) {
    lock().remove(&addr);
    trace!(handle = format_args!("{addr:#x}"), "Unregistered converter");
}

/// Deliver `event` to the converter registered under `addr`, if any.
pub(crate) fn dispatch(addr: usize, event: Event) {
    // The lock is released before user code runs so callbacks may start
    // conversions of their own.
    let target = lock().get(&addr).map(|target| target.0);

    match target {
        // Safety: the entry is removed before the borrow held by the
        // Registration ends, so the converter is still alive here.
        Some(converter) => unsafe { converter.as_ref() }.deliver(event),
        None => trace!(
            handle = format_args!("{addr:#x}"),
            ?event,
            "No converter registered, event dropped"
        ),
    }
}

#[cfg(test)]
pub(crate) fn is_registered(addr: usize) -> bool {
    lock().contains_key(&addr)
}

/// Number of converters currently inside `convert()` across the process.
pub fn active_registrations() -> usize {
    lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::progress_changed_trampoline;
    use crate::engine::ScriptedEngine;
    use crate::Wkhtmltopdf;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_progress_dispatch_only_while_registered() {
        let pdf = Wkhtmltopdf::with_engine(ScriptedEngine::new());
        let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        converter.on_progress_changed(move |_, value| sink.lock().unwrap().push(value));

        let handle = converter.raw_handle().unwrap();
        let registration = register(handle, &converter);
        assert!(is_registered(handle.addr()));
        unsafe { progress_changed_trampoline(handle.as_ptr(), 42) };
        drop(registration);

        assert!(!is_registered(handle.addr()));
        unsafe { progress_changed_trampoline(handle.as_ptr(), 42) };

        assert_eq!(*seen.lock().unwrap(), vec![42]);
    }

    #[test]
    fn test_register_overwrites_existing_entry() {
        let pdf = Wkhtmltopdf::with_engine(ScriptedEngine::new());
        let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        converter.on_phase_changed(move |_| *sink.lock().unwrap() += 1);

        let handle = converter.raw_handle().unwrap();
        let first = register(handle, &converter);
        let second = register(handle, &converter);
        dispatch(handle.addr(), Event::PhaseChanged);
        drop(second);
        assert!(!is_registered(handle.addr()));
        drop(first);

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_unregister_unknown_address_is_noop() {
        unregister(0xdead_0000);
        assert!(!is_registered(0xdead_0000));
    }
}
