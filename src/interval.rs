/*!
Half-open `[start, end)` time interval sets, quantized to a fixed grain in
milliseconds. An [IntervalSet] is kept sorted, non-overlapping and
non-adjacent at all times so that `union`/`subtract`/`missing` stay linear
in the (small) number of spans it holds.
*/

use serde::{Deserialize, Serialize};

/// A single half-open millisecond range `[start, end)`.
pub type Interval = (i64, i64);

/// Round `start` down and `end` up to the nearest multiple of `grain_ms`.
///
/// Interval boundaries that arrive mis-aligned (e.g. a restatement window
/// that doesn't land on a cron step) are widened outward rather than
/// rejected, per the grain-alignment rule.
pub fn align(start: i64, end: i64, grain_ms: i64) -> Interval {
    debug_assert!(grain_ms > 0);
    let aligned_start = (start.div_euclid(grain_ms)) * grain_ms;
    let aligned_end = if end % grain_ms == 0 {
        end
    } else {
        (end.div_euclid(grain_ms) + 1) * grain_ms
    };
    (aligned_start, aligned_end)
}

/// A sorted, non-overlapping, non-adjacent set of half-open intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSet(Vec<Interval>);

impl IntervalSet {
    /// An empty set.
    pub fn new() -> Self {
        IntervalSet(Vec::new())
    }

    /// Build a set directly from already-normalized spans (test/deserialization helper).
    pub fn from_spans(spans: Vec<Interval>) -> Self {
        let mut set = IntervalSet::new();
        for (s, e) in spans {
            set.add(s, e);
        }
        set
    }

    /// The spans making up this set, in ascending order.
    pub fn spans(&self) -> &[Interval] {
        &self.0
    }

    /// Whether the set covers no time at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge `[s, e)` into the set, coalescing with any overlapping or
    /// adjacent span.
    pub fn add(&mut self, s: i64, e: i64) {
        if s >= e {
            return;
        }
        let mut merged_start = s;
        let mut merged_end = e;
        let mut out = Vec::with_capacity(self.0.len() + 1);
        for &(os, oe) in &self.0 {
            if oe < merged_start || os > merged_end {
                out.push((os, oe));
            } else {
                merged_start = merged_start.min(os);
                merged_end = merged_end.max(oe);
            }
        }
        out.push((merged_start, merged_end));
        out.sort_unstable();
        self.0 = out;
    }

    /// Punch a hole of `[s, e)` out of the set, splitting any span that spans it.
    pub fn remove(&mut self, s: i64, e: i64) {
        if s >= e {
            return;
        }
        let mut out = Vec::with_capacity(self.0.len() + 1);
        for &(os, oe) in &self.0 {
            if oe <= s || os >= e {
                out.push((os, oe));
                continue;
            }
            if os < s {
                out.push((os, s));
            }
            if oe > e {
                out.push((e, oe));
            }
        }
        self.0 = out;
    }

    /// Whether `[s, e)` is fully covered by the set.
    pub fn covers(&self, s: i64, e: i64) -> bool {
        self.missing(s, e, e.saturating_sub(s).max(1)).is_empty()
    }

    /// Enumerate the grain-aligned sub-ranges of `[lo, hi)` not covered by the
    /// set, one entry per grain step.
    ///
    /// `lo`/`hi` are first aligned outward to `grain_ms`, matching the
    /// storage-time alignment rule, then walked against the covered spans.
    pub fn missing(&self, lo: i64, hi: i64, grain_ms: i64) -> Vec<Interval> {
        if lo >= hi || grain_ms <= 0 {
            return Vec::new();
        }
        let (lo, hi) = align(lo, hi, grain_ms);
        let mut missing = Vec::new();
        let mut cursor = lo;
        for &(os, oe) in &self.0 {
            if oe <= cursor {
                continue;
            }
            if os >= hi {
                break;
            }
            let gap_end = os.min(hi);
            if gap_end > cursor {
                push_grain_steps(&mut missing, cursor, gap_end, grain_ms);
            }
            cursor = cursor.max(oe);
            if cursor >= hi {
                break;
            }
        }
        if cursor < hi {
            push_grain_steps(&mut missing, cursor, hi, grain_ms);
        }
        missing
    }
}

/// Split `[start, end)` into consecutive `grain_ms`-wide steps and append
/// each to `out`. The final step is truncated rather than overhanging `end`.
fn push_grain_steps(out: &mut Vec<Interval>, start: i64, end: i64, grain_ms: i64) {
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + grain_ms).min(end);
        out.push((cursor, next));
        cursor = next;
    }
}
