//! Dedicated conversion thread
//!
//! libwkhtmltox must be driven from the thread that initialized it, so the
//! engine is created on one OS thread and every job is sent there.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wkhtmltopdf::{Diagnostic, PdfError, Wkhtmltopdf};

/// One object of a job: inline HTML, or a source given by the `page` setting
#[derive(Debug, Clone, Default)]
pub struct JobObject {
    pub settings: BTreeMap<String, String>,
    pub html: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: Uuid,
    pub global: BTreeMap<String, String>,
    pub objects: Vec<JobObject>,
}

#[derive(Debug)]
pub struct JobOutcome {
    pub pdf: Vec<u8>,
    pub http_error_code: i32,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error("Conversion queue is full")]
    Busy,

    #[error("Conversion worker is not running")]
    Unavailable,
}

/// Engine details reported by the worker once it is up
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
    pub extended_qt: bool,
}

pub(crate) struct Envelope {
    job: ConversionJob,
    reply: oneshot::Sender<Result<JobOutcome, PdfError>>,
}

/// Cloneable sender side of the worker queue
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Envelope>,
}

impl WorkerHandle {
    /// Queue `job` and wait for its result. Fails fast when the queue is full.
    pub async fn submit(&self, job: ConversionJob) -> Result<JobOutcome, JobError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(Envelope { job, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => JobError::Busy,
                mpsc::error::TrySendError::Closed(_) => JobError::Unavailable,
            })?;

        rx.await
            .map_err(|_| JobError::Unavailable)?
            .map_err(JobError::from)
    }
}

#[cfg(test)]
impl WorkerHandle {
    /// A handle whose queue is already full of jobs that never run.
    pub(crate) fn stalled(queue_depth: usize) -> (WorkerHandle, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        for _ in 0..queue_depth {
            let (reply, _) = oneshot::channel();
            let job = ConversionJob {
                id: Uuid::nil(),
                global: BTreeMap::new(),
                objects: Vec::new(),
            };
            let _ = tx.try_send(Envelope { job, reply });
        }
        (WorkerHandle { tx }, rx)
    }
}

/// Start the worker thread; `open` creates the engine on that thread.
pub async fn spawn<F>(queue_depth: usize, open: F) -> Result<(WorkerHandle, EngineInfo), JobError>
where
    F: FnOnce() -> wkhtmltopdf::Result<Wkhtmltopdf> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Envelope>(queue_depth);
    let (ready_tx, ready_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("pdf-worker".to_string())
        .spawn(move || {
            let pdf = match open() {
                Ok(pdf) => pdf,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(EngineInfo {
                name: pdf.engine_name().to_string(),
                version: pdf.version(),
                extended_qt: pdf.extended_qt(),
            }));

            while let Some(Envelope { job, reply }) = rx.blocking_recv() {
                let id = job.id;
                let result = run_job(&pdf, job);
                if let Err(e) = &result {
                    warn!(%id, "Conversion job failed: {}", e);
                }
                if reply.send(result).is_err() {
                    debug!(%id, "Requester went away before the job finished");
                }
            }
            info!("Conversion worker stopped");
        })
        .map_err(|e| {
            error!("Failed to start conversion worker: {}", e);
            JobError::Unavailable
        })?;

    let info = ready_rx.await.map_err(|_| JobError::Unavailable)??;
    Ok((WorkerHandle { tx }, info))
}

fn run_job(pdf: &Wkhtmltopdf, job: ConversionJob) -> Result<JobOutcome, PdfError> {
    let id = job.id;
    info!(%id, objects = job.objects.len(), "Starting conversion job");

    let mut global = pdf.global_settings()?;
    global.apply(&job.global)?;

    let mut converter = pdf.converter(global)?;
    converter
        .on_progress_changed(move |_, percent| debug!(%id, percent, "Conversion progress"))
        .on_phase_changed(move |conv| {
            if let Ok(phase) = conv.current_phase() {
                debug!(%id, phase = phase.index, "{}", phase.description);
            }
        })
        .on_warning(move |_, message| warn!(%id, "Engine warning: {}", message))
        .on_error(move |_, message| warn!(%id, "Engine error: {}", message));

    for object in job.objects {
        let mut settings = pdf.object_settings()?;
        settings.apply(&object.settings)?;
        match object.html {
            Some(html) => converter.attach_inline(settings, &html)?,
            None => converter.attach(settings)?,
        }
    }

    converter.convert()?;
    let outcome = JobOutcome {
        pdf: converter.output()?,
        http_error_code: converter.http_error_code()?,
        diagnostics: converter.diagnostics(),
    };
    info!(%id, bytes = outcome.pdf.len(), "Conversion job finished");
    Ok(outcome)
}
