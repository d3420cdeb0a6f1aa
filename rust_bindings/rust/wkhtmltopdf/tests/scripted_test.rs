use std::sync::{Arc, Mutex};
use wkhtmltopdf::{
    ConverterState, DiagnosticLevel, PdfError, ScriptedEngine, ScriptedEvent, Wkhtmltopdf,
};

#[test]
fn test_inline_html_converts_to_pdf() {
    let pdf = Wkhtmltopdf::with_engine(ScriptedEngine::new());

    let mut global = pdf.global_settings().unwrap();
    global.set("documentTitle", "hi").unwrap();
    let mut converter = pdf.converter(global).unwrap();
    converter
        .attach_inline(pdf.object_settings().unwrap(), "<html><body>hi</body></html>")
        .unwrap();

    converter.convert().unwrap();
    let bytes = converter.output().unwrap();

    assert!(!bytes.is_empty());
    assert!(bytes.starts_with(b"%PDF"));
    converter.destroy().unwrap();
}

#[test]
fn test_table_of_contents_and_pages_keep_order() {
    let pdf = Wkhtmltopdf::with_engine(ScriptedEngine::new());
    let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();

    let mut toc = pdf.object_settings().unwrap();
    toc.set("isTableOfContent", "true").unwrap();
    converter.attach_inline(toc, "<h1>Contents</h1>").unwrap();
    for page in ["intro.html", "body.html"] {
        let mut settings = pdf.object_settings().unwrap();
        settings.set("page", page).unwrap();
        converter.attach(settings).unwrap();
    }
    converter.convert().unwrap();

    let text = String::from_utf8_lossy(&converter.output().unwrap()).into_owned();
    let first = text.find("% page 1: inline").unwrap();
    let second = text.find("% page 2: intro.html").unwrap();
    let third = text.find("% page 3: body.html").unwrap();
    assert!(first < second && second < third);
    assert!(text.contains("/Count 3"));
}

#[test]
fn test_callbacks_receive_events_in_engine_order() {
    let engine = ScriptedEngine::new().with_script(vec![
        ScriptedEvent::Phase(0),
        ScriptedEvent::Progress(10),
        ScriptedEvent::Warning("Blocked access to file".to_string()),
        ScriptedEvent::Progress(60),
        ScriptedEvent::Phase(4),
        ScriptedEvent::Progress(100),
        ScriptedEvent::Phase(5),
    ]);
    let pdf = Wkhtmltopdf::with_engine(engine);
    let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let progress = Arc::clone(&log);
    converter.on_progress_changed(move |_, value| progress.lock().unwrap().push(format!("progress {value}")));
    let warnings = Arc::clone(&log);
    converter.on_warning(move |_, message| warnings.lock().unwrap().push(format!("warning {message}")));
    let phases = Arc::clone(&log);
    converter.on_phase_changed(move |conv| {
        let phase = conv.current_phase().unwrap();
        phases.lock().unwrap().push(format!("phase {}", phase.description));
    });

    converter
        .attach_inline(pdf.object_settings().unwrap(), "<p>x</p>")
        .unwrap();
    converter.convert().unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "phase Loading pages",
            "progress 10",
            "warning Blocked access to file",
            "progress 60",
            "phase Printing pages",
            "progress 100",
            "phase Done",
        ]
    );

    let diagnostics = converter.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].level, DiagnosticLevel::Warning);
}

#[test]
fn test_failed_conversion_reports_http_status() {
    let engine = ScriptedEngine::new().failing_with(1).with_script(vec![
        ScriptedEvent::Phase(0),
        ScriptedEvent::HttpErrorCode(500),
        ScriptedEvent::Error("Failed loading page".to_string()),
        ScriptedEvent::Error("Exit with code 1 due to network error".to_string()),
    ]);
    let pdf = Wkhtmltopdf::with_engine(engine);
    let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
    let mut page = pdf.object_settings().unwrap();
    page.set("page", "http://localhost:1/missing").unwrap();
    converter.attach(page).unwrap();

    let err = converter.convert().unwrap_err();
    assert!(matches!(
        err,
        PdfError::ConversionFailed { status: 1, http_error_code: 500, ref errors } if errors.len() == 2
    ));
    assert_eq!(converter.state(), ConverterState::Failed);
    assert!(matches!(converter.output(), Err(PdfError::OutputNotAvailable)));
}

// An engine without an owner thread may be driven from any single thread.
#[test]
fn test_unpinned_engine_converts_on_another_thread() {
    let pdf = Wkhtmltopdf::with_engine(ScriptedEngine::new());
    let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
    converter
        .attach_inline(pdf.object_settings().unwrap(), "<p>threaded</p>")
        .unwrap();

    let bytes = std::thread::spawn(move || {
        converter.convert().unwrap();
        converter.output().unwrap()
    })
    .join()
    .unwrap();

    assert!(bytes.starts_with(b"%PDF"));
}

#[test]
fn test_pinned_engine_only_converts_on_its_thread() {
    let pdf = Wkhtmltopdf::with_engine(ScriptedEngine::new().pinned_to_current_thread());
    let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
    converter
        .attach_inline(pdf.object_settings().unwrap(), "<p>pinned</p>")
        .unwrap();

    let (mut converter, result) = std::thread::spawn(move || {
        let result = converter.convert();
        (converter, result)
    })
    .join()
    .unwrap();
    assert!(matches!(result, Err(PdfError::WrongThread)));

    converter.convert().unwrap();
    assert!(converter.output().unwrap().starts_with(b"%PDF"));
}

#[test]
fn test_progress_string_and_phase_count() {
    let pdf = Wkhtmltopdf::with_engine(ScriptedEngine::new());
    let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
    converter
        .attach_inline(pdf.object_settings().unwrap(), "<p>x</p>")
        .unwrap();
    converter.convert().unwrap();

    assert_eq!(converter.phase_count().unwrap(), 6);
    assert_eq!(converter.current_phase().unwrap().index, 5);
    assert_eq!(converter.progress_string().unwrap(), "100% of 1 page(s)");
    assert_eq!(converter.http_error_code().unwrap(), 0);
}
