//! Global and per-object settings containers
//!
//! Both are opaque native handles configured with string key/value pairs.
//! Keys are passed through unchanged; the engine decides what is valid.

use crate::engine::{ensure_owner_thread, Engine};
use crate::error::{PdfError, Result};
use crate::handle::RawHandle;
use std::collections::BTreeMap;
use std::ffi::CString;
use std::sync::Arc;
use tracing::{debug, warn};

// Read-back buffer size; values that fill it without a NUL are rejected.
const READBACK_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy)]
enum Kind {
    Global,
    Object,
}

impl Kind {
    fn label(self) -> &'static str {
        match self {
            Kind::Global => "global settings",
            Kind::Object => "object settings",
        }
    }
}

/// Shared handle logic. Destroys the native handle on drop unless a
/// converter took ownership of it through [`into_raw`](Self::into_raw).
struct RawSettings {
    engine: Arc<dyn Engine>,
    handle: RawHandle,
    kind: Kind,
    consumed: bool,
}

impl RawSettings {
    fn create(engine: Arc<dyn Engine>, kind: Kind) -> Result<Self> {
        ensure_owner_thread(engine.as_ref())?;
        let handle = match kind {
            Kind::Global => engine.create_global_settings(),
            Kind::Object => engine.create_object_settings(),
        }
        .ok_or(PdfError::NullHandle(kind.label()))?;
        debug!(?handle, kind = kind.label(), "Created settings");

        Ok(RawSettings {
            engine,
            handle,
            kind,
            consumed: false,
        })
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        ensure_owner_thread(self.engine.as_ref())?;
        let c_key = CString::new(key)?;
        let c_value = CString::new(value)?;

        let accepted = unsafe {
            match self.kind {
                Kind::Global => self.engine.set_global_setting(self.handle, &c_key, &c_value),
                Kind::Object => self.engine.set_object_setting(self.handle, &c_key, &c_value),
            }
        };

        if !accepted {
            return Err(PdfError::Settings {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        ensure_owner_thread(self.engine.as_ref())?;
        let c_key = CString::new(key)?;
        let mut buf = vec![0u8; READBACK_CAPACITY];

        let found = unsafe {
            match self.kind {
                Kind::Global => self.engine.get_global_setting(self.handle, &c_key, &mut buf),
                Kind::Object => self.engine.get_object_setting(self.handle, &c_key, &mut buf),
            }
        };
        if !found {
            return Ok(None);
        }

        // The engine truncates without a terminator when the value is too long
        let Some(end) = buf.iter().position(|&b| b == 0) else {
            return Err(PdfError::ValueTooLong {
                key: key.to_string(),
                capacity: READBACK_CAPACITY,
            });
        };
        Ok(Some(String::from_utf8_lossy(&buf[..end]).into_owned()))
    }

    fn apply<I, K, V>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in pairs {
            self.set(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    fn apply_json(&mut self, json: &str) -> Result<()> {
        let pairs: BTreeMap<String, String> = serde_json::from_str(json)?;
        self.apply(pairs)
    }

    fn into_raw(mut self) -> RawHandle {
        self.consumed = true;
        self.handle
    }
}

impl Drop for RawSettings {
    fn drop(&mut self) {
        if self.consumed {
            return;
        }
        if ensure_owner_thread(self.engine.as_ref()).is_err() {
            warn!(
                handle = ?self.handle,
                kind = self.kind.label(),
                "Settings dropped off the engine thread, leaking handle"
            );
            return;
        }
        debug!(handle = ?self.handle, kind = self.kind.label(), "Destroying unused settings");
        unsafe {
            match self.kind {
                Kind::Global => self.engine.destroy_global_settings(self.handle),
                Kind::Object => self.engine.destroy_object_settings(self.handle),
            }
        }
    }
}

/// Document-wide settings (`out`, `documentTitle`, `size.paperSize`, ...).
///
/// Consumed by [`Wkhtmltopdf::converter`](crate::Wkhtmltopdf::converter);
/// the native converter owns and frees the handle from then on.
pub struct GlobalSettings {
    raw: RawSettings,
}

impl GlobalSettings {
    pub(crate) fn new(engine: Arc<dyn Engine>) -> Result<Self> {
        Ok(GlobalSettings {
            raw: RawSettings::create(engine, Kind::Global)?,
        })
    }

    /// Set a single setting
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.raw.set(key, value)
    }

    /// Read a setting back from the engine
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.raw.get(key)
    }

    /// Set every pair in order, stopping at the first rejection
    pub fn apply<I, K, V>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.raw.apply(pairs)
    }

    /// Set every pair of a JSON object of strings
    pub fn apply_json(&mut self, json: &str) -> Result<()> {
        self.raw.apply_json(json)
    }

    pub(crate) fn engine(&self) -> &Arc<dyn Engine> {
        &self.raw.engine
    }

    pub(crate) fn into_raw(self) -> RawHandle {
        self.raw.into_raw()
    }
}

/// Settings of one content object (`page`, `web.defaultEncoding`, ...).
///
/// Consumed by [`Converter::attach`](crate::Converter::attach) or
/// [`Converter::attach_inline`](crate::Converter::attach_inline).
pub struct ObjectSettings {
    raw: RawSettings,
}

impl ObjectSettings {
    pub(crate) fn new(engine: Arc<dyn Engine>) -> Result<Self> {
        Ok(ObjectSettings {
            raw: RawSettings::create(engine, Kind::Object)?,
        })
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.raw.set(key, value)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.raw.get(key)
    }

    pub fn apply<I, K, V>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.raw.apply(pairs)
    }

    pub fn apply_json(&mut self, json: &str) -> Result<()> {
        self.raw.apply_json(json)
    }

    pub(crate) fn engine(&self) -> &Arc<dyn Engine> {
        &self.raw.engine
    }

    pub(crate) fn into_raw(self) -> RawHandle {
        self.raw.into_raw()
    }
}
