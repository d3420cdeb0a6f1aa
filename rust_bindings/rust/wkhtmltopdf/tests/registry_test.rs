//! Runs as its own test binary so no other test touches the global registry.

use std::sync::{Arc, Mutex};
use wkhtmltopdf::{active_registrations, ScriptedEngine, Wkhtmltopdf};

#[test]
fn test_sequential_conversions_leave_registry_empty() {
    let engine = Arc::new(ScriptedEngine::new());
    let pdf = Wkhtmltopdf::from_shared(engine.clone());
    let observed = Arc::new(Mutex::new(Vec::new()));

    for html in ["<p>first</p>", "<p>second</p>"] {
        let mut converter = pdf.converter(pdf.global_settings().unwrap()).unwrap();
        let sink = Arc::clone(&observed);
        converter.on_phase_changed(move |_| sink.lock().unwrap().push(active_registrations()));
        converter
            .attach_inline(pdf.object_settings().unwrap(), html)
            .unwrap();

        converter.convert().unwrap();
        assert_eq!(active_registrations(), 0);
        converter.destroy().unwrap();
    }

    assert_eq!(active_registrations(), 0);
    assert_eq!(engine.live_handles(), 0);
    // Exactly one converter was registered while each one ran
    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 12);
    assert!(observed.iter().all(|&count| count == 1));
}
