use time::{Duration, OffsetDateTime};

use crate::household::PowerSample;

/// The merged total and voltage a household held from some instant onward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeldValue {
    pub total_kw: f64,
    pub voltage: f64,
}

impl From<&PowerSample> for HeldValue {
    fn from(s: &PowerSample) -> Self {
        Self {
            total_kw: s.total_kw,
            voltage: s.voltage,
        }
    }
}

/// Samples swapped out of a household's buffer when a window closes.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedBuffer {
    pub household_id: String,
    pub window_start: OffsetDateTime,
    pub window_end: OffsetDateTime,
    /// Value in force before the first sample, i.e. the last sample of the
    /// previous window.
    pub carry_in: Option<HeldValue>,
    /// Samples with `timestamp < window_end`, oldest first.
    pub samples: Vec<PowerSample>,
}

/// What happened to a pushed sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Older samples discarded by the age cap.
    pub dropped: usize,
    /// The sample was stamped inside an already closed window and was moved
    /// to the start of the open one.
    pub late: bool,
}

/// Open, append-only sample buffer of one household.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    household_id: String,
    samples: Vec<PowerSample>,
    carry_in: Option<HeldValue>,
    max_age: Duration,
    /// End of the latest window handed out by `close`. Readings up to here
    /// are final.
    closed_through: Option<OffsetDateTime>,
}

impl SampleBuffer {
    pub fn new(household_id: &str, max_age: Duration) -> Self {
        Self {
            household_id: household_id.to_string(),
            samples: Vec::new(),
            carry_in: None,
            max_age,
            closed_through: None,
        }
    }

    /// Append a sample, discarding samples older than `max_age` relative to it.
    ///
    /// A sample stamped before the last closed boundary takes effect at that
    /// boundary, so a window that was already reduced is never reopened.
    pub fn push(&mut self, mut sample: PowerSample) -> PushOutcome {
        let mut outcome = PushOutcome::default();
        if let Some(boundary) = self.closed_through {
            if sample.timestamp < boundary {
                sample.timestamp = boundary;
                outcome.late = true;
            }
        }

        let cutoff = sample.timestamp - self.max_age;
        self.samples.push(sample);

        if !self.samples.iter().any(|s| s.timestamp < cutoff) {
            return outcome;
        }

        let (stale, fresh): (Vec<_>, Vec<_>) = std::mem::take(&mut self.samples)
            .into_iter()
            .partition(|s| s.timestamp < cutoff);
        if let Some(last) = stale.iter().max_by_key(|s| s.timestamp) {
            self.carry_in = Some(HeldValue::from(last));
        }
        self.samples = fresh;
        outcome.dropped = stale.len();
        outcome
    }

    /// Swap out every sample before `window_end`. Later samples stay in the
    /// buffer for the next window.
    pub fn close(&mut self, window_start: OffsetDateTime, window_end: OffsetDateTime) -> ClosedBuffer {
        let (mut closed, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.samples)
            .into_iter()
            .partition(|s| s.timestamp < window_end);
        self.samples = open;
        closed.sort_by_key(|s| s.timestamp);
        self.closed_through = Some(self.closed_through.map_or(window_end, |t| t.max(window_end)));

        let carry_in = self.carry_in;
        if let Some(last) = closed.last() {
            self.carry_in = Some(HeldValue::from(last));
        }

        ClosedBuffer {
            household_id: self.household_id.clone(),
            window_start,
            window_end,
            carry_in,
            samples: closed,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
