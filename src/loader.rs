//! Asynchronous sample loading for hosts that run a tokio runtime.
//!
//! Bytes come from disk or over HTTP; decoding runs on the blocking pool so
//! a large file never stalls the runtime. The result feeds
//! [`SynthController::finish_sample_load`], which retries any note-ons that
//! were deferred while the load was pending.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::decode::{DefaultDecoder, SampleDecoder};
use crate::dsp::sampler::SampleBuffer;
use crate::error::{EngineError, LoadError};
use crate::realtime::SynthController;

/// Where a sample's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSource {
    File(PathBuf),
    Url(String),
}

impl SampleSource {
    fn describe(&self) -> String {
        match self {
            SampleSource::File(path) => path.display().to_string(),
            SampleSource::Url(url) => url.clone(),
        }
    }
}

/// Read the raw bytes of `source`.
pub async fn fetch_bytes(source: &SampleSource) -> Result<Vec<u8>, LoadError> {
    match source {
        SampleSource::File(path) => tokio::fs::read(path).await.map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
        SampleSource::Url(url) => {
            let network = |e: reqwest::Error| LoadError::Network {
                url: url.clone(),
                reason: e.to_string(),
            };
            let response = reqwest::get(url.as_str())
                .await
                .and_then(|r| r.error_for_status())
                .map_err(network)?;
            let bytes = response.bytes().await.map_err(network)?;
            Ok(bytes.to_vec())
        }
    }
}

/// Fetch and decode `source` with the default decoder.
pub async fn load_sample(source: &SampleSource) -> Result<SampleBuffer, LoadError> {
    load_sample_with(source, Arc::new(DefaultDecoder)).await
}

pub async fn load_sample_with(
    source: &SampleSource,
    decoder: Arc<dyn SampleDecoder>,
) -> Result<SampleBuffer, LoadError> {
    let bytes = fetch_bytes(source).await?;
    debug!(source = %source.describe(), bytes = bytes.len(), "sample fetched");

    let audio = tokio::task::spawn_blocking(move || decoder.decode(&bytes))
        .await
        .map_err(|e| LoadError::Decode {
            reason: format!("decode task failed: {e}"),
        })??;
    Ok(SampleBuffer::from(audio))
}

/// Mark `key` as loading, load it, and hand the outcome to the engine.
///
/// A failed load is delivered too: the instrument stays selectable but
/// silent. The returned error only reports queue trouble.
pub async fn load_into(
    controller: &mut SynthController,
    key: &str,
    source: &SampleSource,
) -> Result<(), EngineError> {
    controller.begin_sample_load(key)?;
    let result = load_sample(source).await;
    if let Err(e) = &result {
        warn!(sample = key, source = %source.describe(), error = %e, "sample load failed");
    }
    controller.finish_sample_load(key, result)
}
