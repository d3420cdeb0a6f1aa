//! In-process engine that replays a script instead of rendering.
//!
//! Settings are kept in memory, `convert` walks a list of [`ScriptedEvent`]s
//! through the installed trampolines exactly like libwkhtmltox would, and the
//! output is a minimal valid PDF with one empty page per attached object.

use super::Engine;
use crate::callbacks::Trampolines;
use crate::handle::RawHandle;
use std::collections::{BTreeMap, HashSet};
use std::ffi::{c_char, CStr, CString};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

const PHASES: [&str; 6] = [
    "Loading pages",
    "Counting pages",
    "Resolving links",
    "Loading headers and footers",
    "Printing pages",
    "Done",
];

/// One step of a scripted conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedEvent {
    /// Enter phase `n` and fire the phase-changed callback
    Phase(i32),
    /// Fire the progress callback with a percentage
    Progress(i32),
    Warning(String),
    Error(String),
    /// Record an HTTP status without firing a callback
    HttpErrorCode(i32),
}

type Values = BTreeMap<String, String>;

struct ScriptedObject {
    settings: Values,
    data: Option<Vec<u8>>,
}

struct ConverterData {
    global: Values,
    objects: Vec<ScriptedObject>,
    trampolines: Option<Trampolines>,
    phase: i32,
    progress: i32,
    http_error_code: i32,
    progress_text: CString,
    output: Vec<u8>,
}

struct ScriptedConverter {
    data: Mutex<ConverterData>,
}

impl ScriptedConverter {
    fn lock(&self) -> MutexGuard<'_, ConverterData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Engine double that needs no native library.
///
/// ```
/// use wkhtmltopdf::{ScriptedEngine, Wkhtmltopdf};
///
/// let pdf = Wkhtmltopdf::with_engine(ScriptedEngine::new());
/// let bytes = pdf.html_to_pdf("<html><body>hi</body></html>").unwrap();
/// assert!(bytes.starts_with(b"%PDF"));
/// ```
pub struct ScriptedEngine {
    phase_names: Vec<CString>,
    script: Option<Vec<ScriptedEvent>>,
    output: Option<Vec<u8>>,
    fail_status: Option<i32>,
    rejected_keys: HashSet<String>,
    owner: Option<ThreadId>,
    live: AtomicUsize,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    /// Engine that succeeds, reporting every phase and per-object progress.
    pub fn new() -> Self {
        ScriptedEngine {
            phase_names: PHASES
                .iter()
                .filter_map(|name| CString::new(*name).ok())
                .collect(),
            script: None,
            output: None,
            fail_status: None,
            rejected_keys: HashSet::new(),
            owner: None,
            live: AtomicUsize::new(0),
        }
    }

    /// Replace the default events with `script`.
    pub fn with_script(mut self, script: Vec<ScriptedEvent>) -> Self {
        self.script = Some(script);
        self
    }

    /// Produce `output` instead of the generated PDF.
    pub fn with_output(mut self, output: Vec<u8>) -> Self {
        self.output = Some(output);
        self
    }

    /// Make every conversion return `status` after the script ran.
    pub fn failing_with(mut self, status: i32) -> Self {
        self.fail_status = Some(status);
        self
    }

    /// Reject `key` in both global and object settings.
    pub fn rejecting_key(mut self, key: &str) -> Self {
        self.rejected_keys.insert(key.to_string());
        self
    }

    /// Refuse calls from any thread but the current one, like libwkhtmltox.
    pub fn pinned_to_current_thread(mut self) -> Self {
        self.owner = Some(thread::current().id());
        self
    }

    /// Settings and converter handles not yet freed.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn allocate<T>(&self, value: T) -> Option<RawHandle> {
        self.live.fetch_add(1, Ordering::SeqCst);
        RawHandle::new(Box::into_raw(Box::new(value)))
    }

    fn release(&self, count: usize) {
        self.live.fetch_sub(count, Ordering::SeqCst);
    }

    fn default_script(objects: usize) -> Vec<ScriptedEvent> {
        let mut script = vec![ScriptedEvent::Phase(0)];
        for loaded in 1..=objects {
            script.push(ScriptedEvent::Progress((loaded * 100 / objects) as i32));
        }
        script.extend((1..5).map(ScriptedEvent::Phase));
        script.push(ScriptedEvent::Progress(100));
        script.push(ScriptedEvent::Phase(5));
        script
    }

    unsafe fn settings<'a>(handle: RawHandle) -> &'a Mutex<Values> {
        &*handle.as_ptr().cast::<Mutex<Values>>()
    }

    unsafe fn converter<'a>(handle: RawHandle) -> &'a ScriptedConverter {
        &*handle.as_ptr().cast::<ScriptedConverter>()
    }

    unsafe fn take_settings(handle: RawHandle) -> Values {
        let settings = Box::from_raw(handle.as_ptr().cast::<Mutex<Values>>());
        settings.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    unsafe fn set(&self, settings: RawHandle, name: &CStr, value: &CStr) -> bool {
        let name = name.to_string_lossy().into_owned();
        if self.rejected_keys.contains(&name) {
            return false;
        }
        Self::settings(settings)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value.to_string_lossy().into_owned());
        true
    }

    unsafe fn get(&self, settings: RawHandle, name: &CStr, buf: &mut [u8]) -> bool {
        let values = Self::settings(settings)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(value) = values.get(name.to_string_lossy().as_ref()) else {
            return false;
        };
        // strncpy: long values are cut without a terminator
        let bytes = value.as_bytes();
        let copied = bytes.len().min(buf.len());
        buf[..copied].copy_from_slice(&bytes[..copied]);
        buf[copied..].fill(0);
        true
    }
}

// Comment lines must stay on one line.
fn comment_safe(text: &str) -> String {
    text.chars().map(|c| if c.is_control() { ' ' } else { c }).collect()
}

/// Minimal PDF 1.4 document with one empty A4 page per object.
fn synthetic_pdf(global: &Values, objects: &[ScriptedObject]) -> Vec<u8> {
    let pages = objects.len();
    let mut pdf = Vec::new();
    // Binary marker line, as real producers emit
    pdf.extend_from_slice(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n");
    if let Some(title) = global.get("documentTitle") {
        pdf.extend_from_slice(format!("% title: {}\n", comment_safe(title)).as_bytes());
    }
    for (i, object) in objects.iter().enumerate() {
        let source = match (&object.data, object.settings.get("page")) {
            (Some(data), _) => format!("inline, {} bytes", data.len()),
            (None, Some(page)) => comment_safe(page),
            (None, None) => "empty".to_string(),
        };
        pdf.extend_from_slice(format!("% page {}: {source}\n", i + 1).as_bytes());
    }

    let kids = (0..pages)
        .map(|i| format!("{} 0 R", i + 3))
        .collect::<Vec<_>>()
        .join(" ");
    let mut bodies = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!("<< /Type /Pages /Kids [{kids}] /Count {pages} >>"),
    ];
    bodies.extend(
        (0..pages).map(|_| "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] >>".to_string()),
    );

    let mut offsets = Vec::with_capacity(bodies.len());
    for (i, body) in bodies.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }

    let xref = pdf.len();
    let mut tail = format!("xref\n0 {}\n0000000000 65535 f \n", bodies.len() + 1);
    for offset in offsets {
        tail.push_str(&format!("{offset:010} 00000 n \n"));
    }
    tail.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
        bodies.len() + 1
    ));
    pdf.extend_from_slice(tail.as_bytes());
    pdf
}

unsafe impl Engine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn version(&self) -> String {
        "0.12.6 (scripted)".to_string()
    }

    fn extended_qt(&self) -> bool {
        false
    }

    fn owner_thread(&self) -> Option<ThreadId> {
        self.owner
    }

    fn create_global_settings(&self) -> Option<RawHandle> {
        self.allocate(Mutex::new(Values::new()))
    }

    unsafe fn destroy_global_settings(&self, settings: RawHandle) {
        drop(Self::take_settings(settings));
        self.release(1);
    }

    unsafe fn set_global_setting(&self, settings: RawHandle, name: &CStr, value: &CStr) -> bool {
        self.set(settings, name, value)
    }

    unsafe fn get_global_setting(&self, settings: RawHandle, name: &CStr, buf: &mut [u8]) -> bool {
        self.get(settings, name, buf)
    }

    fn create_object_settings(&self) -> Option<RawHandle> {
        self.allocate(Mutex::new(Values::new()))
    }

    unsafe fn destroy_object_settings(&self, settings: RawHandle) {
        drop(Self::take_settings(settings));
        self.release(1);
    }

    unsafe fn set_object_setting(&self, settings: RawHandle, name: &CStr, value: &CStr) -> bool {
        self.set(settings, name, value)
    }

    unsafe fn get_object_setting(&self, settings: RawHandle, name: &CStr, buf: &mut [u8]) -> bool {
        self.get(settings, name, buf)
    }

    unsafe fn create_converter(&self, global: RawHandle) -> Option<RawHandle> {
        let global = Self::take_settings(global);
        self.allocate(ScriptedConverter {
            data: Mutex::new(ConverterData {
                global,
                objects: Vec::new(),
                trampolines: None,
                phase: 0,
                progress: 0,
                http_error_code: 0,
                progress_text: CString::default(),
                output: Vec::new(),
            }),
        })
    }

    unsafe fn destroy_converter(&self, converter: RawHandle) {
        let converter = Box::from_raw(converter.as_ptr().cast::<ScriptedConverter>());
        let objects = converter.lock().objects.len();
        drop(converter);
        // The converter owned its global settings and every attached object
        self.release(2 + objects);
    }

    unsafe fn install_callbacks(&self, converter: RawHandle, trampolines: &Trampolines) {
        Self::converter(converter).lock().trampolines = Some(*trampolines);
    }

    unsafe fn add_object(&self, converter: RawHandle, settings: RawHandle, data: Option<&CStr>) {
        let settings = Self::take_settings(settings);
        Self::converter(converter).lock().objects.push(ScriptedObject {
            settings,
            data: data.map(|d| d.to_bytes().to_vec()),
        });
    }

    unsafe fn convert(&self, converter: RawHandle) -> i32 {
        let scripted = Self::converter(converter);
        let (script, trampolines) = {
            let data = scripted.lock();
            let script = self
                .script
                .clone()
                .unwrap_or_else(|| Self::default_script(data.objects.len()));
            (script, data.trampolines)
        };

        // The lock is never held across a trampoline: callbacks query the
        // converter through this engine.
        for event in script {
            match event {
                ScriptedEvent::Phase(phase) => {
                    scripted.lock().phase = phase;
                    if let Some(t) = trampolines {
                        (t.phase_changed)(converter.as_ptr());
                    }
                }
                ScriptedEvent::Progress(progress) => {
                    scripted.lock().progress = progress;
                    if let Some(t) = trampolines {
                        (t.progress_changed)(converter.as_ptr(), progress);
                    }
                }
                ScriptedEvent::Warning(message) => {
                    let text = CString::new(message.replace('\0', " ")).unwrap_or_default();
                    if let Some(t) = trampolines {
                        (t.warning)(converter.as_ptr(), text.as_ptr());
                    }
                }
                ScriptedEvent::Error(message) => {
                    let text = CString::new(message.replace('\0', " ")).unwrap_or_default();
                    if let Some(t) = trampolines {
                        (t.error)(converter.as_ptr(), text.as_ptr());
                    }
                }
                ScriptedEvent::HttpErrorCode(code) => {
                    scripted.lock().http_error_code = code;
                }
            }
        }

        if let Some(status) = self.fail_status {
            return status;
        }

        let mut data = scripted.lock();
        let output = match &self.output {
            Some(output) => output.clone(),
            None => synthetic_pdf(&data.global, &data.objects),
        };
        data.output = output;
        0
    }

    unsafe fn output(&self, converter: RawHandle) -> (*const u8, usize) {
        let data = Self::converter(converter).lock();
        (data.output.as_ptr(), data.output.len())
    }

    unsafe fn http_error_code(&self, converter: RawHandle) -> i32 {
        Self::converter(converter).lock().http_error_code
    }

    unsafe fn current_phase(&self, converter: RawHandle) -> i32 {
        Self::converter(converter).lock().phase
    }

    unsafe fn phase_count(&self, _converter: RawHandle) -> i32 {
        self.phase_names.len() as i32
    }

    unsafe fn phase_description(&self, _converter: RawHandle, phase: i32) -> *const c_char {
        usize::try_from(phase)
            .ok()
            .and_then(|i| self.phase_names.get(i))
            .map_or(std::ptr::null(), |name| name.as_ptr())
    }

    unsafe fn progress_string(&self, converter: RawHandle) -> *const c_char {
        let mut data = Self::converter(converter).lock();
        let pages = data.objects.len();
        let text = if pages == 0 {
            format!("{}%", data.progress)
        } else {
            format!("{}% of {} page(s)", data.progress, pages)
        };
        data.progress_text = CString::new(text).unwrap_or_default();
        data.progress_text.as_ptr()
    }
}
