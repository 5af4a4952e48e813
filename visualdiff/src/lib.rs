//! Pure byte/perceptual comparison of two screenshot buffers (spec §4.2).
//!
//! No I/O: every function here takes byte slices and returns numbers, so the
//! whole module is trivially unit-testable and, per spec §8 R2, symmetric on
//! trivially-equal inputs.

use opta_browser_protocol::RegressionSignal;
use opta_browser_protocol::VisualDiffStatus;
use opta_browser_protocol::Severity;

const SIGNATURE_BUCKETS: usize = 64;
const MEDIUM_RATIO_THRESHOLD: f64 = 0.02;
const HIGH_RATIO_THRESHOLD: f64 = 0.15;
const INVESTIGATE_SCORE_THRESHOLD: f64 = 0.35;
const REGRESSION_SCORE_THRESHOLD: f64 = 0.70;

/// The full result of comparing two screenshots (spec §3:
/// `VisualDiffResultEntry`'s pure-computation fields).
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub status: VisualDiffStatus,
    pub changed_byte_ratio: Option<f64>,
    pub perceptual_diff_score: Option<f64>,
    pub severity: Severity,
    pub regression_score: f64,
    pub regression_signal: RegressionSignal,
}

/// `changedByteRatio` from spec §4.2.
pub fn changed_byte_ratio(a: &[u8], b: &[u8]) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 0.0;
    }
    let len_delta = a.len().abs_diff(b.len());
    let overlap = a.len().min(b.len());
    let differing = a[..overlap]
        .iter()
        .zip(&b[..overlap])
        .filter(|(x, y)| x != y)
        .count();
    (len_delta + differing) as f64 / max_len as f64
}

/// Splits `bytes` into `buckets` equal-count groups and returns each
/// bucket's mean byte value normalized to `[0, 1]` (spec §4.2).
pub fn signature(bytes: &[u8], buckets: usize) -> Vec<f64> {
    if bytes.is_empty() || buckets == 0 {
        return vec![0.0; buckets];
    }
    let len = bytes.len();
    let base = len / buckets;
    let remainder = len % buckets;
    let mut out = Vec::with_capacity(buckets);
    let mut offset = 0usize;
    for i in 0..buckets {
        let size = base + usize::from(i < remainder);
        if size == 0 {
            out.push(0.0);
            continue;
        }
        let chunk = &bytes[offset..offset + size];
        let mean = chunk.iter().map(|&b| b as f64).sum::<f64>() / chunk.len() as f64;
        out.push(mean / 255.0);
        offset += size;
    }
    out
}

/// `perceptualDiffScore` from spec §4.2.
pub fn perceptual_diff_score(a: &[u8], b: &[u8]) -> f64 {
    let sig_a = signature(a, SIGNATURE_BUCKETS);
    let sig_b = signature(b, SIGNATURE_BUCKETS);
    let signature_delta = sig_a
        .iter()
        .zip(sig_b.iter())
        .map(|(x, y)| (x - y).abs())
        .sum::<f64>()
        / SIGNATURE_BUCKETS as f64;

    let max_len = a.len().max(b.len());
    let length_penalty = if max_len == 0 {
        0.0
    } else {
        a.len().abs_diff(b.len()) as f64 / max_len as f64
    };

    (0.8 * signature_delta + 0.2 * length_penalty).clamp(0.0, 1.0)
}

/// `severity(status, ratio)` from spec §4.2.
pub fn severity(status: VisualDiffStatus, ratio: Option<f64>) -> Severity {
    match status {
        VisualDiffStatus::Missing => Severity::High,
        VisualDiffStatus::Unchanged => Severity::Low,
        _ => match ratio {
            Some(r) if r >= HIGH_RATIO_THRESHOLD => Severity::High,
            Some(r) if r >= MEDIUM_RATIO_THRESHOLD => Severity::Medium,
            _ => Severity::Medium,
        },
    }
}

fn severity_floor(sev: Severity) -> f64 {
    match sev {
        Severity::High => 0.75,
        Severity::Medium => 0.40,
        Severity::Low => 0.15,
    }
}

/// `regressionScore(status, severity, ratio?, perceptual?)` from spec §4.2.
pub fn regression_score(
    status: VisualDiffStatus,
    severity: Severity,
    ratio: Option<f64>,
    perceptual: Option<f64>,
) -> f64 {
    match status {
        VisualDiffStatus::Missing => 1.0,
        VisualDiffStatus::Unchanged => 0.0,
        _ => {
            let r = ratio.unwrap_or_else(|| perceptual.unwrap_or(0.5));
            let p = perceptual.unwrap_or_else(|| ratio.unwrap_or(0.5));
            let blend = 0.45 * r + 0.55 * p;
            severity_floor(severity).max(blend)
        }
    }
}

/// `regressionSignal(score)` from spec §4.2.
pub fn regression_signal(score: f64) -> RegressionSignal {
    if score >= REGRESSION_SCORE_THRESHOLD {
        RegressionSignal::Regression
    } else if score >= INVESTIGATE_SCORE_THRESHOLD {
        RegressionSignal::Investigate
    } else {
        RegressionSignal::None
    }
}

/// `Assess(from?, to?)` from spec §4.2.
pub fn assess(from: Option<&[u8]>, to: Option<&[u8]>) -> Assessment {
    let status = match (from, to) {
        (None, _) | (_, None) => VisualDiffStatus::Missing,
        (Some(a), Some(b)) if a.len() == b.len() && a == b => VisualDiffStatus::Unchanged,
        _ => VisualDiffStatus::Changed,
    };

    let (ratio, perceptual) = match (status, from, to) {
        (VisualDiffStatus::Changed, Some(a), Some(b)) => {
            (Some(changed_byte_ratio(a, b)), Some(perceptual_diff_score(a, b)))
        }
        _ => (None, None),
    };

    let sev = severity(status, ratio);
    let score = regression_score(status, sev, ratio, perceptual);
    let signal = regression_signal(score);

    Assessment {
        status,
        changed_byte_ratio: ratio,
        perceptual_diff_score: perceptual,
        severity: sev,
        regression_score: score,
        regression_signal: signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assess_identical_buffers_is_unchanged() {
        let buf = vec![7u8; 256];
        let result = assess(Some(&buf), Some(&buf));
        assert_eq!(result.status, VisualDiffStatus::Unchanged);
        assert_eq!(result.changed_byte_ratio, None);
        assert_eq!(result.severity, Severity::Low);
        assert_eq!(result.regression_signal, RegressionSignal::None);
        assert_eq!(result.regression_score, 0.0);
    }

    #[test]
    fn assess_missing_side_is_missing() {
        let buf = vec![1u8; 8];
        let result = assess(None, Some(&buf));
        assert_eq!(result.status, VisualDiffStatus::Missing);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.regression_score, 1.0);
        assert_eq!(result.regression_signal, RegressionSignal::Regression);
    }

    #[test]
    fn assess_fully_different_buffers_is_high_severity_regression() {
        let a = vec![0x00u8; 1000];
        let b = vec![0xFFu8; 1000];
        let result = assess(Some(&a), Some(&b));
        assert_eq!(result.changed_byte_ratio, Some(1.0));
        assert_eq!(result.severity, Severity::High);
        assert!(result.regression_score >= 0.75);
        assert_eq!(result.regression_signal, RegressionSignal::Regression);
    }

    #[test]
    fn changed_byte_ratio_accounts_for_length_delta() {
        let a = vec![1u8; 10];
        let b = vec![1u8; 12];
        // overlap all equal, length delta = 2, max_len = 12
        assert!((changed_byte_ratio(&a, &b) - (2.0 / 12.0)).abs() < 1e-9);
    }

    #[test]
    fn signature_splits_into_requested_bucket_count() {
        let bytes: Vec<u8> = (0..=255).collect();
        let sig = signature(&bytes, 64);
        assert_eq!(sig.len(), 64);
        assert!(sig.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn regression_signal_thresholds() {
        assert_eq!(regression_signal(0.1), RegressionSignal::None);
        assert_eq!(regression_signal(0.35), RegressionSignal::Investigate);
        assert_eq!(regression_signal(0.70), RegressionSignal::Regression);
    }
}
