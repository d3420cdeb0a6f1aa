//! wkhtmltopdf - Rust FFI bindings for the wkhtmltopdf HTML to PDF engine
//!
//! This crate drives libwkhtmltox from Rust: it manages the native settings
//! and converter handles, routes the engine's progress, error, warning and
//! phase callbacks back into Rust closures, and copies the produced PDF out
//! of the engine without treating it as text.
//!
//! # Features
//!
//! - `native`: link against libwkhtmltox (headers located through
//!   `WKHTMLTOX_DIR`, default `/usr/local`). Without it only the
//!   [`ScriptedEngine`] is available.
//!
//! # Examples
//!
//! ## Simple API
//!
//! ```no_run
//! # #[cfg(feature = "native")]
//! # fn main() -> wkhtmltopdf::Result<()> {
//! use wkhtmltopdf::Wkhtmltopdf;
//!
//! let pdf = Wkhtmltopdf::init(false)?;
//! let bytes = pdf.html_to_pdf("<html><body>hi</body></html>")?;
//! std::fs::write("hi.pdf", bytes)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```
//!
//! ## Builder API
//!
//! ```
//! use wkhtmltopdf::{ScriptedEngine, Wkhtmltopdf};
//!
//! let pdf = Wkhtmltopdf::with_engine(ScriptedEngine::new());
//!
//! let mut global = pdf.global_settings()?;
//! global.set("documentTitle", "Report")?;
//!
//! let mut converter = pdf.converter(global)?;
//! converter.on_progress_changed(|_, percent| println!("{percent}%"));
//! converter.on_warning(|_, message| eprintln!("warning: {message}"));
//!
//! let mut cover = pdf.object_settings()?;
//! cover.set("web.defaultEncoding", "utf-8")?;
//! converter.attach_inline(cover, "<h1>Report</h1>")?;
//!
//! converter.convert()?;
//! let bytes = converter.output()?;
//! assert!(bytes.starts_with(b"%PDF"));
//! # Ok::<(), wkhtmltopdf::PdfError>(())
//! ```

mod callbacks;
mod converter;
pub mod engine;
mod error;
#[cfg(feature = "native")]
mod ffi;
mod handle;
mod registry;
mod settings;

pub use callbacks::{IntCallback, StrCallback, Trampolines, VoidCallback};
pub use converter::{Converter, ConverterState, Diagnostic, DiagnosticLevel, Phase};
#[cfg(feature = "native")]
pub use engine::NativeEngine;
pub use engine::{Engine, ScriptedEngine, ScriptedEvent};
pub use error::{PdfError, Result};
pub use handle::RawHandle;
pub use registry::active_registrations;
pub use settings::{GlobalSettings, ObjectSettings};

use std::sync::Arc;
use tracing::debug;

/// Handle to an initialized engine; the factory for settings and converters.
///
/// Cloning is cheap and every clone drives the same engine.
///
/// libwkhtmltox is single-threaded. With the native engine, settings and
/// converters may be created, converted, read and destroyed only on the
/// thread that called [`init`](Self::init); anywhere else these calls return
/// [`PdfError::WrongThread`]. Values dropped on another thread leak their
/// native handle instead of freeing it there. Hosts that serve requests from
/// many threads should hand every job to one dedicated thread.
#[derive(Clone)]
pub struct Wkhtmltopdf {
    engine: Arc<dyn Engine>,
}

impl Wkhtmltopdf {
    /// Initialize libwkhtmltox for this process.
    ///
    /// The first call runs `wkhtmltopdf_init` and binds the engine to the
    /// calling thread; later calls return the same engine.
    #[cfg(feature = "native")]
    pub fn init(use_graphics: bool) -> Result<Self> {
        Ok(Wkhtmltopdf {
            engine: NativeEngine::init(use_graphics)?,
        })
    }

    /// Drive `engine` instead of libwkhtmltox
    pub fn with_engine<E: Engine>(engine: E) -> Self {
        Wkhtmltopdf {
            engine: Arc::new(engine),
        }
    }

    /// Drive an engine that is shared with other owners
    pub fn from_shared(engine: Arc<dyn Engine>) -> Self {
        Wkhtmltopdf { engine }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Get the engine version
    pub fn version(&self) -> String {
        self.engine.version()
    }

    pub fn extended_qt(&self) -> bool {
        self.engine.extended_qt()
    }

    /// Fresh global settings with library defaults
    pub fn global_settings(&self) -> Result<GlobalSettings> {
        GlobalSettings::new(Arc::clone(&self.engine))
    }

    /// Fresh object settings with library defaults
    pub fn object_settings(&self) -> Result<ObjectSettings> {
        ObjectSettings::new(Arc::clone(&self.engine))
    }

    /// Create a converter that takes ownership of `global`
    pub fn converter(&self, global: GlobalSettings) -> Result<Converter> {
        if !engine::same_engine(&self.engine, global.engine()) {
            return Err(PdfError::EngineMismatch);
        }
        Converter::new(global)
    }

    /// Convert one HTML document with default settings.
    pub fn html_to_pdf(&self, html: &str) -> Result<Vec<u8>> {
        let mut converter = self.converter(self.global_settings()?)?;
        converter.attach_inline(self.object_settings()?, html)?;
        converter.convert()?;
        let bytes = converter.output()?;
        debug!(bytes = bytes.len(), "Converted HTML document");
        converter.destroy()?;
        Ok(bytes)
    }
}
