//! Reduces closed sample buffers into durable per-window readings.

pub mod buffer;
pub mod flusher;

use power_client::domain::MinuteReading;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use crate::household::PowerSample;

pub use buffer::{ClosedBuffer, HeldValue, PushOutcome, SampleBuffer};
pub use flusher::{FlushReport, Flusher, RetryPolicy};

/// What to persist for a window in which a household produced no samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyWindowPolicy {
    /// Write nothing for the window.
    Skip,
    /// Write a reading at the value the household held through the window.
    #[default]
    CarryForward,
}

/// Start of the window containing `ts`, aligned to the Unix epoch.
pub fn align_down(ts: OffsetDateTime, window: Duration) -> OffsetDateTime {
    let step = window.whole_seconds().max(1);
    let secs = ts.unix_timestamp();
    OffsetDateTime::from_unix_timestamp(secs - secs.rem_euclid(step)).unwrap_or(ts)
}

/// Turn one closed buffer into readings, oldest window first.
///
/// Samples left over from earlier windows that were never closed (a missed
/// flush) get their own readings; the window being closed is filled per `policy` when it saw no
/// samples.
pub fn reduce(closed: &ClosedBuffer, window: Duration, policy: EmptyWindowPolicy) -> Vec<MinuteReading> {
    let samples = &closed.samples;
    let mut readings = Vec::new();
    let mut carry = closed.carry_in;
    let mut idx = 0;

    while idx < samples.len() {
        let start = align_down(samples[idx].timestamp, window);
        let group_len = samples[idx..]
            .iter()
            .take_while(|s| align_down(s.timestamp, window) == start)
            .count();
        let group = &samples[idx..idx + group_len];

        let (start, end) = if start >= closed.window_start {
            (closed.window_start.max(start), closed.window_end)
        } else {
            (start, (start + window).min(closed.window_end))
        };

        readings.push(reduce_window(&closed.household_id, start, end, carry, group));
        carry = group.last().map(HeldValue::from);
        idx += group_len;
    }

    let current_covered = readings
        .last()
        .is_some_and(|r| r.window_start >= closed.window_start);

    if !current_covered && policy == EmptyWindowPolicy::CarryForward {
        if let Some(held) = carry {
            readings.push(reading(
                &closed.household_id,
                closed.window_start,
                closed.window_end,
                held.total_kw,
                held.voltage,
            ));
        }
    }

    readings
}

/// Time-weighted average over `[start, end)`. Each value holds until the next
/// sample; `carry` holds from `start` until the first sample.
fn reduce_window(
    household_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
    carry: Option<HeldValue>,
    samples: &[PowerSample],
) -> MinuteReading {
    let mut cursor = start;
    let mut held = carry;
    let mut kw_seconds = 0.0;
    let mut volt_seconds = 0.0;
    let mut covered = 0.0;

    let mut accumulate = |held: Option<HeldValue>, from: OffsetDateTime, to: OffsetDateTime| {
        if let Some(h) = held {
            let dt = (to - from).as_seconds_f64().max(0.0);
            kw_seconds += h.total_kw * dt;
            volt_seconds += h.voltage * dt;
            covered += dt;
        }
    };

    for s in samples {
        let t = s.timestamp.clamp(start, end);
        accumulate(held, cursor, t);
        cursor = t;
        held = Some(HeldValue::from(s));
    }
    accumulate(held, cursor, end);

    let (avg_kw, voltage) = if covered > 0.0 {
        (kw_seconds / covered, volt_seconds / covered)
    } else {
        held.map(|h| (h.total_kw, h.voltage)).unwrap_or((0.0, 0.0))
    };

    reading(household_id, start, end, avg_kw, voltage)
}

fn reading(
    household_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
    avg_kw: f64,
    voltage: f64,
) -> MinuteReading {
    let hours = (end - start).as_seconds_f64() / 3600.0;
    MinuteReading {
        household_id: household_id.to_string(),
        window_start: start,
        avg_kw,
        energy_kwh: avg_kw * hours,
        voltage,
    }
}
