//! Segment Validator: structural integrity, size reconciliation, and
//! sample-based reachability checking for a synthesized virtual file.

use std::collections::HashSet;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::timeout;

use crate::errors::ImportError;
use crate::model::{Encryption, SegmentSequence, sequence_byte_count};
use crate::provider::{ArticleStreamProvider, ProviderError, StatResult};

const STAT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SAMPLE_CAP: usize = 10;

/// Tunables that change how aggressively reachability is sampled.
#[derive(Clone, Copy, Debug)]
pub struct ValidationConfig {
    /// If set, sample `ceil(n * p / 100)` segments instead of the default cap.
    pub sample_percentage: Option<u8>,
    /// Bound on concurrent `stat` calls.
    pub max_connections: usize,
    /// Skip the reachability pass entirely; structural/size checks still run.
    pub skip_health_check: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            sample_percentage: None,
            max_connections: 8,
            skip_health_check: false,
        }
    }
}

/// Runs the structural, size, and (unless overridden) reachability checks
/// for a single synthesized file.
pub async fn validate<P: ArticleStreamProvider>(
    provider: &P,
    expected_logical_size: u64,
    encryption: Encryption,
    segments: &SegmentSequence,
    config: &ValidationConfig,
) -> Result<(), ImportError> {
    check_structural(segments)?;
    check_size(expected_logical_size, encryption, segments)?;

    if config.skip_health_check {
        return Ok(());
    }

    check_reachability(provider, segments, config).await
}

fn check_structural(segments: &SegmentSequence) -> Result<(), ImportError> {
    for segment in segments {
        if !segment.is_structurally_valid() {
            return Err(ImportError::InvalidSegment {
                reason: format!("segment for message id '{}' has invalid offsets/size", segment.message_id),
            });
        }
    }
    Ok(())
}

fn check_size(expected_logical_size: u64, encryption: Encryption, segments: &SegmentSequence) -> Result<(), ImportError> {
    let expected = match encryption {
        Encryption::None => expected_logical_size,
        Encryption::Rclone => crate::encryption::encrypted_size(expected_logical_size),
    };
    let found = sequence_byte_count(segments);
    if found != expected {
        return Err(ImportError::SizeMismatch { expected, found });
    }
    Ok(())
}

fn sample_indices(n: usize, config: &ValidationConfig) -> Vec<usize> {
    let sample_size = match config.sample_percentage {
        Some(p) => {
            let p = u64::from(p.clamp(1, 100));
            ((n as u64 * p).div_ceil(100)) as usize
        }
        None => n.min(DEFAULT_SAMPLE_CAP),
    }
    .min(n);

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rand::rng());
    indices.truncate(sample_size);
    indices
}

async fn check_reachability<P: ArticleStreamProvider>(
    provider: &P,
    segments: &SegmentSequence,
    config: &ValidationConfig,
) -> Result<(), ImportError> {
    let n = segments.len();
    if n == 0 {
        return Ok(());
    }

    let sampled = sample_indices(n, config);
    let mut seen = HashSet::new();
    let mut first_error: Option<ImportError> = None;

    for chunk in sampled.chunks(config.max_connections.max(1)) {
        let futures = chunk.iter().filter(|i| seen.insert(**i)).map(|&i| {
            let segment = &segments[i];
            async move {
                match timeout(STAT_TIMEOUT, provider.stat(&segment.message_id, &[])).await {
                    Ok(Ok(StatResult::Ok)) => Ok(()),
                    Ok(Ok(StatResult::NotFound)) => Err(ImportError::ArticleNotFoundInProviders {
                        message_id: segment.message_id.to_string(),
                    }),
                    Ok(Err(ProviderError::NotFound)) => Err(ImportError::ArticleNotFoundInProviders {
                        message_id: segment.message_id.to_string(),
                    }),
                    Ok(Err(ProviderError::Transient(msg))) => Err(ImportError::TransientPool(msg)),
                    Err(_) => Err(ImportError::TransientPool("stat timed out".into())),
                }
            }
        });

        let results = futures::future::join_all(futures).await;
        for result in results {
            if let Err(e) = result {
                let retryable_wins = first_error.as_ref().is_none_or(ImportError::is_retryable);
                if first_error.is_none() || (!e.is_retryable() && retryable_wins) {
                    first_error = Some(e);
                }
            }
        }

        if first_error.as_ref().is_some_and(|e| !e.is_retryable()) {
            break;
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
