//! Session inputs and replay event streams
//!
//! Everything that can change the navigation state arrives as an [Event]: sensor readings from the two
//! producers (location fixes and compass azimuths) and the user actions (permission outcome, location
//! switch, save, reset). The live [crate::session::NavigationSession] receives events over its input
//! queue; offline, a recorded sensor log is turned into a time-ordered [EventStream] and replayed through
//! the same processing core.
//!
//! ## Fix outages
//! Recorded logs are usually clean. A [FixScheduler] thins the fix stream while building the replay, which
//! exercises warm-up, staleness, and capture extension the way a poor sky view would:
//!
//! - `PassThrough` delivers every fix.
//! - `FixedInterval` delivers at most one fix per interval.
//! - `DutyCycle` alternates ON and OFF windows; fixes in OFF windows are dropped.
//!
//! Azimuth readings are never thinned; the compass keeps running when GNSS does not.
use serde::{Deserialize, Serialize};

use crate::RawFix;
use crate::sim::SensorRecord;

/// A single input to the navigation session.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Raw position fix from the location provider.
    Fix(RawFix),
    /// Raw device azimuth in degrees from magnetic north.
    Azimuth { azimuth_deg: f32, timestamp_ms: i64 },
    /// Outcome of a location permission request.
    Permission { granted: bool },
    /// The device location switch was turned on or off.
    ProviderEnabled { enabled: bool },
    /// The user asked to save the current location as the anchor.
    RequestCapture,
    /// The user asked to discard the anchor.
    Reset,
}

/// An [Event] at a point in time (milliseconds since the Unix epoch).
#[derive(Clone, Debug, PartialEq)]
pub struct TimedEvent {
    pub at_ms: i64,
    pub event: Event,
}

/// Time-ordered events for an offline replay.
#[derive(Clone, Debug, Default)]
pub struct EventStream {
    pub start_ms: i64,
    pub events: Vec<TimedEvent>,
}

/// Decides which recorded fixes reach the engine during a replay.
///
/// ```
/// use pathfinder::messages::FixScheduler;
///
/// let every_fix = FixScheduler::PassThrough;
/// // one fix every 5 s
/// let sparse = FixScheduler::FixedInterval { interval_ms: 5_000, phase_ms: 0 };
/// // 10 s of fixes, then 20 s without
/// let outages = FixScheduler::DutyCycle { on_ms: 10_000, off_ms: 20_000, start_phase_ms: 0 };
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixScheduler {
    #[default]
    PassThrough,
    FixedInterval {
        /// Minimum spacing between delivered fixes (ms)
        interval_ms: i64,
        /// Offset before the first delivered fix (ms)
        phase_ms: i64,
    },
    DutyCycle {
        /// Length of each window with fixes (ms)
        on_ms: i64,
        /// Length of each window without fixes (ms)
        off_ms: i64,
        /// Offset before the first ON window (ms)
        start_phase_ms: i64,
    },
}

impl FixScheduler {
    /// Whether a fix recorded `elapsed_ms` after the start of the log is delivered.
    pub fn delivers(&self, elapsed_ms: i64) -> bool {
        match *self {
            FixScheduler::PassThrough => true,
            // FixedInterval is stateful and handled while building the stream
            FixScheduler::FixedInterval { phase_ms, .. } => elapsed_ms >= phase_ms,
            FixScheduler::DutyCycle {
                on_ms,
                off_ms,
                start_phase_ms,
            } => {
                if elapsed_ms < start_phase_ms {
                    return false;
                }
                let period = on_ms + off_ms;
                if period <= 0 {
                    return true;
                }
                (elapsed_ms - start_phase_ms) % period < on_ms
            }
        }
    }
}

/// How a recorded log is turned into session inputs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayPlan {
    pub scheduler: FixScheduler,
    /// When to press "save location", relative to the first record (ms)
    pub capture_after_ms: Option<i64>,
    /// When to press "reset", relative to the first record (ms)
    pub reset_after_ms: Option<i64>,
}

/// Build the replay event stream for a recorded sensor log.
///
/// Permission is granted at the first record. Each record yields an azimuth event (if the record has an
/// azimuth) and a fix event (if it has a complete fix and the scheduler delivers it). Control events are
/// ordered before sensor events with the same timestamp.
pub fn build_event_stream(records: &[SensorRecord], plan: &ReplayPlan) -> EventStream {
    let Some(first) = records.first() else {
        return EventStream::default();
    };
    let start_ms = first.time.timestamp_millis();
    let mut events = Vec::with_capacity(records.len() * 2 + 3);
    events.push(TimedEvent {
        at_ms: start_ms,
        event: Event::Permission { granted: true },
    });
    if let Some(offset) = plan.capture_after_ms {
        events.push(TimedEvent {
            at_ms: start_ms + offset,
            event: Event::RequestCapture,
        });
    }
    if let Some(offset) = plan.reset_after_ms {
        events.push(TimedEvent {
            at_ms: start_ms + offset,
            event: Event::Reset,
        });
    }

    let mut next_emit_ms = match plan.scheduler {
        FixScheduler::FixedInterval { phase_ms, .. } => phase_ms,
        _ => 0,
    };
    for record in records {
        let at_ms = record.time.timestamp_millis();
        if let Some(azimuth_deg) = record.azimuth {
            events.push(TimedEvent {
                at_ms,
                event: Event::Azimuth {
                    azimuth_deg,
                    timestamp_ms: at_ms,
                },
            });
        }
        let Some(fix) = record.fix() else {
            continue;
        };
        let elapsed_ms = at_ms - start_ms;
        let deliver = match plan.scheduler {
            FixScheduler::FixedInterval { interval_ms, .. } => {
                if elapsed_ms >= next_emit_ms {
                    next_emit_ms = elapsed_ms + interval_ms.max(0);
                    true
                } else {
                    false
                }
            }
            ref other => other.delivers(elapsed_ms),
        };
        if deliver {
            events.push(TimedEvent {
                at_ms,
                event: Event::Fix(fix),
            });
        }
    }
    // stable: controls pushed first stay ahead of sensor events at the same instant
    events.sort_by_key(|e| e.at_ms);
    EventStream { start_ms, events }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn create_test_records(count: i64) -> Vec<SensorRecord> {
        (0..count)
            .map(|i| SensorRecord {
                time: t(i),
                latitude: Some(39.95),
                longitude: Some(-75.16),
                horizontal_accuracy: Some(5.0),
                speed: Some(0.0),
                bearing: None,
                bearing_accuracy: None,
                azimuth: Some(90.0),
            })
            .collect()
    }

    fn fix_count(stream: &EventStream) -> usize {
        stream
            .events
            .iter()
            .filter(|e| matches!(e.event, Event::Fix(_)))
            .count()
    }

    #[test]
    fn empty_log_gives_empty_stream() {
        let stream = build_event_stream(&[], &ReplayPlan::default());
        assert!(stream.events.is_empty());
    }

    #[test]
    fn passthrough_keeps_every_fix() {
        let records = create_test_records(10);
        let stream = build_event_stream(&records, &ReplayPlan::default());
        assert_eq!(fix_count(&stream), 10);
        assert_eq!(stream.events.len(), 21);
        assert_eq!(stream.events[0].event, Event::Permission { granted: true });
        assert_eq!(stream.start_ms, t(0).timestamp_millis());
    }

    #[test]
    fn fixed_interval_thins_fixes() {
        let records = create_test_records(10);
        let plan = ReplayPlan {
            scheduler: FixScheduler::FixedInterval {
                interval_ms: 3_000,
                phase_ms: 0,
            },
            ..Default::default()
        };
        let stream = build_event_stream(&records, &plan);
        // t = 0, 3, 6, 9
        assert_eq!(fix_count(&stream), 4);
    }

    #[test]
    fn duty_cycle_drops_off_windows() {
        let sched = FixScheduler::DutyCycle {
            on_ms: 2_000,
            off_ms: 3_000,
            start_phase_ms: 0,
        };
        assert!(sched.delivers(0));
        assert!(sched.delivers(1_999));
        assert!(!sched.delivers(2_000));
        assert!(!sched.delivers(4_999));
        assert!(sched.delivers(5_000));
        let records = create_test_records(10);
        let plan = ReplayPlan {
            scheduler: sched,
            ..Default::default()
        };
        // t = 0, 1, 5, 6
        assert_eq!(fix_count(&build_event_stream(&records, &plan)), 4);
    }

    #[test]
    fn controls_are_ordered_by_time() {
        let records = create_test_records(10);
        let plan = ReplayPlan {
            capture_after_ms: Some(4_000),
            reset_after_ms: Some(8_000),
            ..Default::default()
        };
        let stream = build_event_stream(&records, &plan);
        let capture = stream
            .events
            .iter()
            .position(|e| e.event == Event::RequestCapture)
            .unwrap();
        assert_eq!(stream.events[capture].at_ms, t(4).timestamp_millis());
        // ahead of the sensor events recorded at the same instant
        assert!(matches!(stream.events[capture + 1].event, Event::Azimuth { .. }));
        assert_eq!(stream.events[capture + 1].at_ms, t(4).timestamp_millis());
        assert!(stream.events.windows(2).all(|w| w[0].at_ms <= w[1].at_ms));
        assert!(stream.events.iter().any(|e| e.event == Event::Reset));
    }

    #[test]
    fn incomplete_records_yield_no_fix() {
        let mut records = create_test_records(3);
        records[1].latitude = None;
        records[2].horizontal_accuracy = None;
        let stream = build_event_stream(&records, &ReplayPlan::default());
        assert_eq!(fix_count(&stream), 1);
    }

    #[test]
    fn plan_deserializes_from_json() {
        let json = r#"{"scheduler":{"kind":"fixed_interval","interval_ms":2000,"phase_ms":500},"capture_after_ms":5000}"#;
        let plan: ReplayPlan = serde_json::from_str(json).unwrap();
        assert_eq!(
            plan.scheduler,
            FixScheduler::FixedInterval {
                interval_ms: 2000,
                phase_ms: 500
            }
        );
        assert_eq!(plan.capture_after_ms, Some(5000));
        assert_eq!(plan.reset_after_ms, None);
    }
}
