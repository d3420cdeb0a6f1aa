use crate::callbacks::{decode_text, Callbacks, Event, TRAMPOLINES};
use crate::engine::{ensure_owner_thread, same_engine, Engine};
use crate::error::{PdfError, Result};
use crate::handle::RawHandle;
use crate::registry;
use crate::settings::{GlobalSettings, ObjectSettings};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::Arc;
use std::{fs, slice};
use tracing::{debug, warn};

/// Lifecycle of a [`Converter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConverterState {
    Created,
    /// At least one object attached
    Configured,
    /// Inside `convert()`; only observable from callbacks
    Converting,
    Succeeded,
    Failed,
    Destroyed,
}

/// Conversion phase as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub index: i32,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Warning,
    Error,
}

/// A warning or error message emitted by the engine during `convert()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

/// One native converter plus the closures that observe it.
///
/// A converter is single-use: attach objects, call [`convert`](Self::convert)
/// once, then read [`output`](Self::output). The native handle is released by
/// [`destroy`](Self::destroy) or on drop.
///
/// Callbacks run synchronously on the thread that called `convert()` and
/// receive the converter itself, so they can query the phase, the progress
/// string or the HTTP status while the conversion is running.
pub struct Converter {
    engine: Arc<dyn Engine>,
    handle: Option<RawHandle>,
    state: Cell<ConverterState>,
    objects: usize,
    callbacks: RefCell<Callbacks>,
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl Converter {
    pub(crate) fn new(global: GlobalSettings) -> Result<Self> {
        let engine = Arc::clone(global.engine());
        ensure_owner_thread(engine.as_ref())?;
        let settings = global.into_raw();

        let Some(handle) = (unsafe { engine.create_converter(settings) }) else {
            // The engine did not take ownership
            unsafe { engine.destroy_global_settings(settings) };
            return Err(PdfError::NullHandle("converter"));
        };
        unsafe { engine.install_callbacks(handle, &TRAMPOLINES) };
        debug!(?handle, engine = engine.name(), "Created converter");

        Ok(Converter {
            engine,
            handle: Some(handle),
            state: Cell::new(ConverterState::Created),
            objects: 0,
            callbacks: RefCell::new(Callbacks::default()),
            diagnostics: RefCell::new(Vec::new()),
        })
    }

    /// Called with the overall progress percentage.
    pub fn on_progress_changed<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(&Converter, i32) + Send + 'static,
    {
        self.callbacks.get_mut().progress_changed = Some(Box::new(callback));
        self
    }

    /// Called for every error the engine reports. Several errors may precede
    /// a failed conversion.
    pub fn on_error<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(&Converter, &str) + Send + 'static,
    {
        self.callbacks.get_mut().error = Some(Box::new(callback));
        self
    }

    pub fn on_warning<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(&Converter, &str) + Send + 'static,
    {
        self.callbacks.get_mut().warning = Some(Box::new(callback));
        self
    }

    /// Called when the engine enters a new phase; use
    /// [`current_phase`](Self::current_phase) to see which one.
    pub fn on_phase_changed<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(&Converter) + Send + 'static,
    {
        self.callbacks.get_mut().phase_changed = Some(Box::new(callback));
        self
    }

    /// Attach an object whose source (`page`) is set in its settings.
    pub fn attach(&mut self, settings: ObjectSettings) -> Result<()> {
        self.add_object(settings, None)
    }

    /// Attach an object rendered from `markup` instead of a URL or file.
    pub fn attach_inline(&mut self, settings: ObjectSettings, markup: &str) -> Result<()> {
        let data = CString::new(markup)?;
        self.add_object(settings, Some(&data))
    }

    fn add_object(&mut self, settings: ObjectSettings, data: Option<&CStr>) -> Result<()> {
        let handle = self.live_handle()?;
        if self.is_completed() {
            return Err(PdfError::AlreadyConverted);
        }
        if !same_engine(&self.engine, settings.engine()) {
            return Err(PdfError::EngineMismatch);
        }

        let object = settings.into_raw();
        unsafe { self.engine.add_object(handle, object, data) };
        self.objects += 1;
        self.state.set(ConverterState::Configured);
        debug!(
            ?handle,
            index = self.objects - 1,
            inline_bytes = data.map(|d| d.to_bytes().len()),
            "Attached object"
        );
        Ok(())
    }

    /// Run the conversion, blocking until the engine is done.
    ///
    /// Registered callbacks fire on this thread while the call is in
    /// progress. A converter converts at most once; a second call returns
    /// [`PdfError::AlreadyConverted`].
    pub fn convert(&mut self) -> Result<()> {
        let handle = self.live_handle()?;
        if self.is_completed() {
            return Err(PdfError::AlreadyConverted);
        }
        self.diagnostics.get_mut().clear();

        // Callbacks reach this converter through a shared reference only.
        let this: &Converter = self;
        this.state.set(ConverterState::Converting);
        debug!(?handle, objects = this.objects, "Starting conversion");

        let status = {
            let _registration = registry::register(handle, this);
            unsafe { this.engine.convert(handle) }
        };

        if status == 0 {
            this.state.set(ConverterState::Succeeded);
            debug!(?handle, "Conversion finished");
            return Ok(());
        }

        this.state.set(ConverterState::Failed);
        let http_error_code = unsafe { this.engine.http_error_code(handle) };
        let errors: Vec<String> = this
            .diagnostics
            .borrow()
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .map(|d| d.message.clone())
            .collect();
        debug!(?handle, status, http_error_code, errors = errors.len(), "Conversion failed");
        Err(PdfError::from_status(status, http_error_code, errors))
    }

    /// Copy the produced document out of the engine.
    ///
    /// Only valid after a successful [`convert`](Self::convert). The output
    /// is binary PDF data and is copied by length, embedded NULs included.
    pub fn output(&self) -> Result<Vec<u8>> {
        let handle = self.live_handle()?;
        if self.state.get() != ConverterState::Succeeded {
            return Err(PdfError::OutputNotAvailable);
        }

        let (ptr, len) = unsafe { self.engine.output(handle) };
        let bytes = unsafe { copy_output(ptr, len) }?;
        debug!(?handle, bytes = bytes.len(), "Copied conversion output");
        Ok(bytes)
    }

    /// Write the output to `path`, returning the number of bytes written.
    pub fn save(&self, path: &Path) -> Result<u64> {
        let bytes = self.output()?;
        fs::write(path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    /// HTTP status of the last failed fetch, 0 if none.
    pub fn http_error_code(&self) -> Result<i32> {
        let handle = self.live_handle()?;
        Ok(unsafe { self.engine.http_error_code(handle) })
    }

    pub fn current_phase(&self) -> Result<Phase> {
        let handle = self.live_handle()?;
        let index = unsafe { self.engine.current_phase(handle) };
        let description = unsafe { decode_text(self.engine.phase_description(handle, index)) };
        Ok(Phase { index, description })
    }

    pub fn phase_count(&self) -> Result<i32> {
        let handle = self.live_handle()?;
        Ok(unsafe { self.engine.phase_count(handle) })
    }

    /// Human readable progress of the current phase, e.g. "Page 1 of 3".
    pub fn progress_string(&self) -> Result<String> {
        let handle = self.live_handle()?;
        Ok(unsafe { decode_text(self.engine.progress_string(handle)) })
    }

    /// Errors and warnings received during the last `convert()`.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    pub fn state(&self) -> ConverterState {
        self.state.get()
    }

    /// Number of attached objects.
    pub fn object_count(&self) -> usize {
        self.objects
    }

    /// Release the native converter and every settings handle it owns.
    ///
    /// Every later call, including a second `destroy()`, returns
    /// [`PdfError::UseAfterDestroy`].
    pub fn destroy(&mut self) -> Result<()> {
        self.live_handle()?;
        let handle = self.handle.take().ok_or(PdfError::UseAfterDestroy)?;
        debug!(?handle, state = ?self.state.get(), "Destroying converter");
        unsafe { self.engine.destroy_converter(handle) };
        self.state.set(ConverterState::Destroyed);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn raw_handle(&self) -> Result<RawHandle> {
        self.live_handle()
    }

    fn live_handle(&self) -> Result<RawHandle> {
        let handle = self.handle.ok_or(PdfError::UseAfterDestroy)?;
        ensure_owner_thread(self.engine.as_ref())?;
        Ok(handle)
    }

    fn is_completed(&self) -> bool {
        matches!(
            self.state.get(),
            ConverterState::Succeeded | ConverterState::Failed
        )
    }

    /// Record and forward one event from the registry.
    pub(crate) fn deliver(&self, event: Event) {
        match &event {
            Event::Error(message) => self.record(DiagnosticLevel::Error, message),
            Event::Warning(message) => self.record(DiagnosticLevel::Warning, message),
            _ => {}
        }

        // A callback that makes the engine fire again lands here while the
        // slots are borrowed; that nested event is recorded but not forwarded.
        match self.callbacks.try_borrow_mut() {
            Ok(mut callbacks) => callbacks.invoke(self, &event),
            Err(_) => tracing::trace!(?event, "Callback re-entered, event not forwarded"),
        }
    }

    fn record(&self, level: DiagnosticLevel, message: &str) {
        self.diagnostics.borrow_mut().push(Diagnostic {
            level,
            message: message.to_string(),
        });
    }
}

impl Drop for Converter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if ensure_owner_thread(self.engine.as_ref()).is_err() {
                warn!(?handle, "Converter dropped off the engine thread, leaking handle");
                return;
            }
            debug!(?handle, "Dropping converter");
            unsafe { self.engine.destroy_converter(handle) };
        }
    }
}

/// Copy exactly `len` bytes starting at `ptr`.
///
/// # Safety
///
/// `ptr` must be null or readable for `len` bytes.
pub(crate) unsafe fn copy_output(ptr: *const u8, len: usize) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if ptr.is_null() {
        return Err(PdfError::OutputNotAvailable);
    }
    Ok(slice::from_raw_parts(ptr, len).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ScriptedEngine, ScriptedEvent};
    use crate::Wkhtmltopdf;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn converter_with(engine: ScriptedEngine) -> (Wkhtmltopdf, Converter) {
        let pdf = Wkhtmltopdf::with_engine(engine);
        let converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
        (pdf, converter)
    }

    #[test]
    fn test_converter_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Converter>();
    }

    #[test]
    fn test_output_before_convert_is_not_available() {
        let (_pdf, converter) = converter_with(ScriptedEngine::new());
        assert!(matches!(converter.output(), Err(PdfError::OutputNotAvailable)));
    }

    #[test]
    fn test_output_keeps_embedded_nul_bytes() {
        let bytes = vec![0x25, 0x50, 0x44, 0x46, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05];
        let (pdf, mut converter) = converter_with(ScriptedEngine::new().with_output(bytes.clone()));
        converter
            .attach_inline(pdf.object_settings().unwrap(), "<p>x</p>")
            .unwrap();
        converter.convert().unwrap();

        let output = converter.output().unwrap();
        assert_eq!(output.len(), 10);
        assert_eq!(output, bytes);
    }

    #[test]
    fn test_state_machine_is_single_use() {
        let (pdf, mut converter) = converter_with(ScriptedEngine::new());
        assert_eq!(converter.state(), ConverterState::Created);

        converter
            .attach_inline(pdf.object_settings().unwrap(), "<p>one</p>")
            .unwrap();
        assert_eq!(converter.state(), ConverterState::Configured);
        assert_eq!(converter.object_count(), 1);

        converter.convert().unwrap();
        assert_eq!(converter.state(), ConverterState::Succeeded);

        assert!(matches!(converter.convert(), Err(PdfError::AlreadyConverted)));
        let late = pdf.object_settings().unwrap();
        assert!(matches!(
            converter.attach(late),
            Err(PdfError::AlreadyConverted)
        ));
    }

    #[test]
    fn test_use_after_destroy_is_rejected() {
        let (pdf, mut converter) = converter_with(ScriptedEngine::new());
        converter.destroy().unwrap();

        assert_eq!(converter.state(), ConverterState::Destroyed);
        assert!(matches!(converter.convert(), Err(PdfError::UseAfterDestroy)));
        assert!(matches!(converter.output(), Err(PdfError::UseAfterDestroy)));
        assert!(matches!(converter.http_error_code(), Err(PdfError::UseAfterDestroy)));
        assert!(matches!(converter.current_phase(), Err(PdfError::UseAfterDestroy)));
        assert!(matches!(
            converter.attach(pdf.object_settings().unwrap()),
            Err(PdfError::UseAfterDestroy)
        ));
        assert!(matches!(converter.destroy(), Err(PdfError::UseAfterDestroy)));
    }

    #[test]
    fn test_drop_releases_converted_handles() {
        let engine = Arc::new(ScriptedEngine::new());
        let pdf = Wkhtmltopdf::from_shared(engine.clone());
        {
            let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
            converter
                .attach_inline(pdf.object_settings().unwrap(), "<p>one</p>")
                .unwrap();
            converter
                .attach_inline(pdf.object_settings().unwrap(), "<p>two</p>")
                .unwrap();
            converter.convert().unwrap();
            assert_eq!(engine.live_handles(), 4);
        }
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn test_pinned_engine_rejects_other_threads() {
        let engine = Arc::new(ScriptedEngine::new().pinned_to_current_thread());
        let pdf = Wkhtmltopdf::from_shared(engine.clone());
        let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
        converter
            .attach_inline(pdf.object_settings().unwrap(), "<p>x</p>")
            .unwrap();

        let (mut converter, convert, output, destroy) = std::thread::spawn(move || {
            let convert = converter.convert();
            let output = converter.output();
            let destroy = converter.destroy();
            (converter, convert, output, destroy)
        })
        .join()
        .unwrap();

        assert!(matches!(convert, Err(PdfError::WrongThread)));
        assert!(matches!(output, Err(PdfError::WrongThread)));
        assert!(matches!(destroy, Err(PdfError::WrongThread)));

        // Back on the owner thread nothing was consumed
        assert_eq!(converter.state(), ConverterState::Configured);
        converter.convert().unwrap();
        assert!(converter.output().unwrap().starts_with(b"%PDF"));
        drop(converter);
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn test_failed_conversion_carries_status_and_errors() {
        let engine = ScriptedEngine::new().failing_with(1).with_script(vec![
            ScriptedEvent::Phase(0),
            ScriptedEvent::HttpErrorCode(404),
            ScriptedEvent::Error("Failed loading page http://example.invalid".to_string()),
            ScriptedEvent::Warning("Retrying".to_string()),
        ]);
        let (pdf, mut converter) = converter_with(engine);
        let mut page = pdf.object_settings().unwrap();
        page.set("page", "http://example.invalid").unwrap();
        converter.attach(page).unwrap();

        match converter.convert() {
            Err(PdfError::ConversionFailed {
                status,
                http_error_code,
                errors,
            }) => {
                assert_eq!(status, 1);
                assert_eq!(http_error_code, 404);
                assert_eq!(errors, vec!["Failed loading page http://example.invalid"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert_eq!(converter.state(), ConverterState::Failed);
        assert_eq!(converter.http_error_code().unwrap(), 404);
        assert_eq!(converter.diagnostics().len(), 2);
        assert!(matches!(converter.output(), Err(PdfError::OutputNotAvailable)));
    }

    #[test]
    fn test_callbacks_observe_phase_and_state() {
        let (pdf, mut converter) = converter_with(ScriptedEngine::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let phases = Arc::clone(&seen);
        converter.on_phase_changed(move |conv| {
            let phase = conv.current_phase().unwrap();
            phases.lock().unwrap().push((phase.description, conv.state()));
        });
        converter
            .attach_inline(pdf.object_settings().unwrap(), "<p>hi</p>")
            .unwrap();
        converter.convert().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0].0, "Loading pages");
        assert_eq!(seen[5].0, "Done");
        assert!(seen.iter().all(|(_, state)| *state == ConverterState::Converting));
        assert_eq!(converter.phase_count().unwrap(), 6);
    }

    #[test]
    fn test_progress_callback_sees_every_step() {
        let (pdf, mut converter) = converter_with(ScriptedEngine::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        converter.on_progress_changed(move |_, value| sink.lock().unwrap().push(value));

        converter
            .attach_inline(pdf.object_settings().unwrap(), "<p>a</p>")
            .unwrap();
        converter
            .attach_inline(pdf.object_settings().unwrap(), "<p>b</p>")
            .unwrap();
        converter.convert().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![50, 100, 100]);
        assert!(!registry::is_registered(converter.raw_handle().unwrap().addr()));
    }

    #[test]
    fn test_inline_markup_with_nul_is_rejected() {
        let (pdf, mut converter) = converter_with(ScriptedEngine::new());
        let result = converter.attach_inline(pdf.object_settings().unwrap(), "a\0b");
        assert!(matches!(result, Err(PdfError::InvalidString(_))));
        assert_eq!(converter.object_count(), 0);
    }

    #[test]
    fn test_objects_from_other_engine_are_rejected() {
        let (_pdf, mut converter) = converter_with(ScriptedEngine::new());
        let other = Wkhtmltopdf::with_engine(ScriptedEngine::new());
        let result = converter.attach(other.object_settings().unwrap());
        assert!(matches!(result, Err(PdfError::EngineMismatch)));
    }

    #[test]
    fn test_save_writes_output() {
        let (pdf, mut converter) = converter_with(ScriptedEngine::new());
        converter
            .attach_inline(pdf.object_settings().unwrap(), "<p>saved</p>")
            .unwrap();
        converter.convert().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        let written = converter.save(&path).unwrap();

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(written, on_disk.len() as u64);
        assert!(on_disk.starts_with(b"%PDF"));
    }

    #[test]
    fn test_copy_output_null_pointer() {
        assert!(unsafe { copy_output(std::ptr::null(), 0) }.unwrap().is_empty());
        assert!(matches!(
            unsafe { copy_output(std::ptr::null(), 4) },
            Err(PdfError::OutputNotAvailable)
        ));
    }

    proptest! {
        #[test]
        fn prop_copy_output_is_byte_exact(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let copied = unsafe { copy_output(bytes.as_ptr(), bytes.len()) }.unwrap();
            prop_assert_eq!(copied, bytes);
        }
    }
}
