//! End-to-end tests against the linked libwkhtmltox.
//!
//! The library must be driven from the thread that initialized it, so every
//! conversion runs inside a single test.

#![cfg(feature = "native")]

use std::sync::{Arc, Mutex};
use wkhtmltopdf::{active_registrations, ConverterState, PdfError, Wkhtmltopdf};

#[test]
fn test_native_engine_end_to_end() {
    let pdf = Wkhtmltopdf::init(false).expect("wkhtmltopdf_init failed");
    assert!(pdf.version().starts_with("0.12"));

    // Settings read back through the engine
    let mut global = pdf.global_settings().unwrap();
    global.set("documentTitle", "hi").unwrap();
    assert_eq!(global.get("documentTitle").unwrap().as_deref(), Some("hi"));
    assert!(matches!(
        global.set("definitely.not.a.setting", "1"),
        Err(PdfError::Settings { .. })
    ));

    let mut converter = pdf.converter(global).unwrap();
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    converter.on_progress_changed(move |_, value| sink.lock().unwrap().push(value));
    assert!(matches!(converter.output(), Err(PdfError::OutputNotAvailable)));

    converter
        .attach_inline(pdf.object_settings().unwrap(), "<html><body>hi</body></html>")
        .unwrap();
    converter.convert().unwrap();

    let bytes = converter.output().unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(converter.state(), ConverterState::Succeeded);
    assert!(!progress.lock().unwrap().is_empty());
    assert_eq!(active_registrations(), 0);
    converter.destroy().unwrap();

    // A second converter after the first one is gone
    let bytes = pdf.html_to_pdf("<html><body>again</body></html>").unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(active_registrations(), 0);

    // Other threads are refused before reaching Qt
    let other = pdf.clone();
    let refused = std::thread::spawn(move || other.global_settings().err())
        .join()
        .unwrap();
    assert!(matches!(refused, Some(PdfError::WrongThread)));

    let dir = tempfile::tempdir().unwrap();
    let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
    converter
        .attach_inline(pdf.object_settings().unwrap(), "<h1>saved</h1>")
        .unwrap();
    converter.convert().unwrap();
    let written = converter.save(&dir.path().join("saved.pdf")).unwrap();
    assert!(written > 0);
}
