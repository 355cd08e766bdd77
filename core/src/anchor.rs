//! Anchor capture
//!
//! Saving the current location as the navigation target is the one place where precision matters more
//! than latency: every later distance and arrival decision is relative to the anchor. Instead of taking a
//! single fix, the capture collects a short burst of raw fixes and combines them.
//!
//! # Sampling protocol
//! A [CaptureWindow] is opened when the user asks to save the location. Raw fixes (not the EMA-smoothed
//! samples, whose errors are correlated) are collected after the same structural, accuracy, and staleness
//! gating the location filter applies. The window:
//!
//! - always samples for the base period (3 s);
//! - closes at the end of the base period if at least 7 samples have arrived;
//! - otherwise stays open until the 7th sample arrives or the extension (2 s more) runs out.
//!
//! # Estimation
//! With at least 7 samples, the anchor is the inverse-variance weighted mean of the positions, with weights
//! $w_i = 1 / \sigma_i^2$ taken from the reported accuracies, and the anchor accuracy is
//!
//! $$
//! \sigma = \sqrt{ \frac{1}{\sum_i w_i} }
//! $$
//!
//! which for $n$ equally accurate samples reduces to $\sigma / \sqrt{n}$. With fewer samples the weighting
//! is not trusted and the single most precise sample is used as-is. With none, the capture fails.
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::PathfinderConfig;
use crate::error::NavError;
use crate::location::passes_quality_gates;
use crate::{Anchor, GeoPoint, RawFix};

/// Outcome of polling a [CaptureWindow].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Still collecting; nothing changes before `next_deadline_ms` unless a fix arrives.
    Pending { next_deadline_ms: i64 },
    /// Ready to be finished into an anchor (or a failure).
    Complete,
}

/// Time-boxed collection of raw fixes for one anchor capture.
#[derive(Clone, Debug)]
pub struct CaptureWindow {
    config: PathfinderConfig,
    opened_at_ms: i64,
    base_deadline_ms: i64,
    hard_deadline_ms: i64,
    samples: Vec<RawFix>,
}

impl CaptureWindow {
    pub fn open(config: &PathfinderConfig, now_ms: i64) -> Self {
        CaptureWindow {
            config: config.clone(),
            opened_at_ms: now_ms,
            base_deadline_ms: now_ms + config.anchor_sample_ms,
            hard_deadline_ms: now_ms + config.anchor_sample_ms + config.anchor_extension_ms,
            samples: Vec::with_capacity(config.anchor_min_samples * 2),
        }
    }
    /// Offer a raw fix; returns true if it was kept.
    pub fn offer(&mut self, fix: &RawFix, now_ms: i64) -> bool {
        if !passes_quality_gates(fix, &self.config, now_ms) {
            return false;
        }
        self.samples.push(*fix);
        debug!(
            "Anchor sample {} ({:.1} m) at +{} ms",
            self.samples.len(),
            fix.accuracy_m,
            now_ms - self.opened_at_ms
        );
        true
    }
    pub fn poll(&self, now_ms: i64) -> CaptureStatus {
        if now_ms >= self.hard_deadline_ms {
            CaptureStatus::Complete
        } else if now_ms >= self.base_deadline_ms {
            if self.samples.len() >= self.config.anchor_min_samples {
                CaptureStatus::Complete
            } else {
                CaptureStatus::Pending {
                    next_deadline_ms: self.hard_deadline_ms,
                }
            }
        } else {
            CaptureStatus::Pending {
                next_deadline_ms: self.base_deadline_ms,
            }
        }
    }
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
    pub fn opened_at_ms(&self) -> i64 {
        self.opened_at_ms
    }
    /// Close the window and compute the anchor from what was collected.
    pub fn finish(self, now_ms: i64) -> Result<Anchor, NavError> {
        estimate(&self.samples, self.config.anchor_min_samples, now_ms)
    }
}

/// Combine a burst of raw fixes into an anchor.
///
/// # Parameters
/// - `samples` - Gated raw fixes
/// - `min_samples` - Number of samples required for the inverse-variance estimate
/// - `captured_at_ms` - Timestamp recorded on the anchor
///
/// # Returns
/// The anchor, or [NavError::NoSamples] if `samples` is empty.
///
/// # Example
/// ```rust
/// use pathfinder::{GeoPoint, RawFix};
/// use pathfinder::anchor::estimate;
/// let fixes = vec![RawFix::new(GeoPoint::new(10.0, 10.0), 10.0, 0.0, 0); 7];
/// let anchor = estimate(&fixes, 7, 0).unwrap();
/// assert!((anchor.accuracy_m - 10.0 / 7.0_f32.sqrt()).abs() < 1e-5);
/// ```
pub fn estimate(
    samples: &[RawFix],
    min_samples: usize,
    captured_at_ms: i64,
) -> Result<Anchor, NavError> {
    if samples.is_empty() {
        return Err(NavError::NoSamples);
    }
    if samples.len() >= min_samples {
        let mut sum_weights = 0.0_f64;
        let mut sum_lat = 0.0_f64;
        let mut sum_lon = 0.0_f64;
        for fix in samples {
            let sigma = fix.accuracy_m as f64;
            let weight = 1.0 / (sigma * sigma);
            sum_weights += weight;
            sum_lat += weight * fix.point.latitude;
            sum_lon += weight * fix.point.longitude;
        }
        Ok(Anchor {
            point: GeoPoint::new(sum_lat / sum_weights, sum_lon / sum_weights),
            accuracy_m: (1.0 / sum_weights).sqrt() as f32,
            captured_at_ms,
            sample_count: samples.len(),
        })
    } else {
        let best = samples
            .iter()
            .min_by(|a, b| a.accuracy_m.total_cmp(&b.accuracy_m))
            .ok_or(NavError::NoSamples)?;
        Ok(Anchor {
            point: best.point,
            accuracy_m: best.accuracy_m,
            captured_at_ms,
            sample_count: samples.len(),
        })
    }
}

/// Runs the anchor capture protocol against a fix stream.
#[derive(Clone, Debug, Default)]
pub struct AnchorEstimator {
    config: PathfinderConfig,
}

impl AnchorEstimator {
    pub fn new(config: PathfinderConfig) -> Self {
        AnchorEstimator { config }
    }
    pub fn open_window(&self, now_ms: i64) -> CaptureWindow {
        CaptureWindow::open(&self.config, now_ms)
    }
    pub fn estimate(&self, samples: &[RawFix], captured_at_ms: i64) -> Result<Anchor, NavError> {
        estimate(samples, self.config.anchor_min_samples, captured_at_ms)
    }
    /// Collect fixes from `fixes` until the capture window closes and estimate the anchor.
    ///
    /// Waiting is done on tokio timers; dropping the returned future abandons the capture. A closed
    /// stream ends the collection early with whatever was gathered.
    pub async fn capture(
        &self,
        fixes: &mut mpsc::Receiver<RawFix>,
        clock: &dyn Clock,
    ) -> Result<Anchor, NavError> {
        let started = Instant::now();
        let start_ms = clock.now_ms();
        let now_ms = || start_ms + started.elapsed().as_millis() as i64;
        let mut window = self.open_window(start_ms);
        loop {
            let next_deadline_ms = match window.poll(now_ms()) {
                CaptureStatus::Complete => break,
                CaptureStatus::Pending { next_deadline_ms } => next_deadline_ms,
            };
            let deadline = started + Duration::from_millis((next_deadline_ms - start_ms).max(0) as u64);
            match tokio::time::timeout_at(deadline, fixes.recv()).await {
                Ok(Some(fix)) => {
                    window.offer(&fix, now_ms());
                }
                Ok(None) => {
                    debug!("Fix stream closed during anchor capture");
                    break;
                }
                Err(_) => {}
            }
        }
        let count = window.sample_count();
        let result = window.finish(now_ms());
        match &result {
            Ok(anchor) => info!("Captured {} from {} samples", anchor, count),
            Err(e) => info!("Anchor capture failed: {}", e),
        }
        result
    }
}
