use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{Config, constants};
use crate::error::{BotError, PersistenceError};
use crate::lock::RunLock;
use crate::pipeline::{Pipeline, PipelineSettings, RunReport};
use crate::publisher::{Publisher, TwitterPublisher};
use crate::renderer::ConfessionRenderer;
use crate::source::FacebookSource;
use crate::state::StateStore;

/// Run the pipeline once and acknowledge.
///
/// The reply is the same whether the run published, stopped, aborted or was
/// skipped; the outcome only goes to the log.
pub fn run_update(config: &Config) -> String {
    match try_update(config) {
        Ok(report) => info!("Run finished: {:?}", report.outcome),
        Err(e) => error!("ERROR: Run could not start: {}", e),
    }
    constants::UPDATE_ACK.to_string()
}

/// Build the real collaborators from `config` and run them under the lock.
pub fn try_update(config: &Config) -> Result<RunReport, BotError> {
    run_locked(&config.lock_path(), || {
        let publisher = config
            .credentials
            .as_ref()
            .map(|credentials| TwitterPublisher::new(credentials, config.http_timeout))
            .transpose()?;

        if let (Some(publisher), Some(operator)) = (&publisher, &config.operator_id) {
            if let Err(e) = remind_if_due(publisher, &config.expiry_path(), operator, Utc::now()) {
                warn!("Credential expiry reminder failed: {}", e);
            }
        }

        let source = FacebookSource::new(config.http_timeout)?;
        let renderer = ConfessionRenderer::load(
            &config.template_file,
            &config.font_file,
            &config.fallback_font_files,
        )?;
        let mut store = StateStore::load(config.state_path())?;

        let settings = PipelineSettings {
            page_name: config.page_name.clone(),
            page_depth: config.page_depth,
            publish_delay: config.publish_delay,
        };
        let mut pipeline = Pipeline::new(
            &source,
            &renderer,
            publisher.as_ref().map(|p| p as &dyn Publisher),
            settings,
        );
        Ok(pipeline.run(&mut store))
    })
}

/// Call `run` while holding the run lock at `lock_path`.
///
/// If another run holds the lock, `run` is not called and the report says
/// `Skipped`.
pub fn run_locked<F>(lock_path: &Path, run: F) -> Result<RunReport, BotError>
where
    F: FnOnce() -> Result<RunReport, BotError>,
{
    let Some(lock) = RunLock::try_acquire(lock_path)? else {
        warn!("Another run is in progress, skipping this trigger");
        return Ok(RunReport::skipped());
    };

    let result = run();
    drop(lock);
    result
}

/// Accumulated log text formatted for a web page.
pub fn read_logs(log_path: &Path) -> Result<String, PersistenceError> {
    let raw = match fs::read_to_string(log_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(PersistenceError::ReadFailed {
                path: log_path.display().to_string(),
                reason: e.to_string(),
            });
        }
    };

    let html = raw
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\n', "<br>");
    Ok(format!(
        "<span style=\"font-family: Monaco\">{}</span>",
        html
    ))
}

#[derive(Debug, Serialize, Deserialize)]
struct ExpiryFile {
    #[serde(rename = "lastExpiryUTC")]
    last_expiry_utc: i64,
}

/// Send the operator a credential reminder if the interval has elapsed.
///
/// The first call only starts the clock. Returns whether a message was sent.
pub fn remind_if_due(
    publisher: &dyn Publisher,
    expiry_path: &Path,
    recipient: &str,
    now: DateTime<Utc>,
) -> Result<bool, BotError> {
    let Some(last) = read_expiry(expiry_path)? else {
        info!("Starting credential expiry clock at {}", now.to_rfc3339());
        write_expiry(expiry_path, now)?;
        return Ok(false);
    };

    if now.signed_duration_since(last) < Duration::days(constants::EXPIRY_REMINDER_DAYS) {
        return Ok(false);
    }

    let message = format!(
        "Reminder: the bot's API credentials were last renewed on {}. \
         They may expire soon, please check them.",
        last.format("%Y-%m-%d")
    );
    publisher.notify_operator(&message, recipient)?;
    write_expiry(expiry_path, now)?;
    info!("Sent credential expiry reminder to {}", recipient);
    Ok(true)
}

fn read_expiry(path: &Path) -> Result<Option<DateTime<Utc>>, PersistenceError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(PersistenceError::ReadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    };

    let corrupt = |reason: String| PersistenceError::Corrupt {
        path: path.display().to_string(),
        reason,
    };
    let file: ExpiryFile = serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))?;
    DateTime::from_timestamp(file.last_expiry_utc, 0)
        .map(Some)
        .ok_or_else(|| corrupt(format!("timestamp {} out of range", file.last_expiry_utc)))
}

fn write_expiry(path: &Path, at: DateTime<Utc>) -> Result<(), PersistenceError> {
    let write_failed = |reason: String| PersistenceError::WriteFailed {
        path: path.display().to_string(),
        reason,
    };
    let body = serde_json::to_string(&ExpiryFile {
        last_expiry_utc: at.timestamp(),
    })
    .map_err(|e| write_failed(e.to_string()))?;
    fs::write(path, body).map_err(|e| write_failed(e.to_string()))
}
