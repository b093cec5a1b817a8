//! Digit-wise trigger threshold search.
//!
//! The search locates the level at which the device under test first fires an
//! oscilloscope trigger, refining one decade ("digit") at a time instead of
//! stepping the whole span at full resolution. All levels are [`Ticks`]
//! (100 nV), so no rounding error accumulates across thousands of steps.
//!
//! For every surviving digit, coarsest first:
//! 1. compute a start point (window midpoint for the first digit, otherwise
//!    the previous trigger point backed off by the previous digit);
//! 2. drive the device to its resting state; a trigger at rest aborts the tab;
//! 3. apply the start point and step by the digit toward the direction limit
//!    until a trigger fires or the limit is reached. If the first digit's
//!    midpoint already triggers, that digit is rescanned from the window origin.
//!
//! [`SearchState`] holds the loop state and the pure step rules; [`run_search`]
//! drives a [`TriggerProbe`] with them.

use crate::cancel::CancelToken;
use crate::error::{Fault, FaultResult};
use crate::settings::{Slope, SourceRange};
use crate::units::Ticks;
use async_trait::async_trait;
use tracing::{debug, info};

/// Role label used in search faults.
pub const SEARCH_ROLE: &str = "TRIGGER";

/// Candidate step sizes, coarsest first.
pub const DIGITS: [Ticks; 9] = [
    Ticks::VOLT_10,
    Ticks::VOLT_1,
    Ticks::MILLIVOLT_100,
    Ticks::MILLIVOLT_10,
    Ticks::MILLIVOLT_1,
    Ticks::MICROVOLT_100,
    Ticks::MICROVOLT_10,
    Ticks::MICROVOLT_1,
    Ticks::NANOVOLT_100,
];

/// Decades an auto-ranging source may pick.
const AUTO_RANGES: [Ticks; 5] = [
    Ticks::MILLIVOLT_10,
    Ticks::MILLIVOLT_100,
    Ticks::VOLT_1,
    Ticks::VOLT_10,
    Ticks(1_000_000_000),
];

/// Smallest useful digit for a source range.
///
/// Pulse-generator mode never resolves below 1 µV.
pub fn min_digit(range: Ticks, pulse_mode: bool) -> Ticks {
    let floor = if range > Ticks::VOLT_1 {
        Ticks::MICROVOLT_100
    } else if range > Ticks::MILLIVOLT_100 {
        Ticks::MICROVOLT_10
    } else if range > Ticks::MILLIVOLT_10 {
        Ticks::MICROVOLT_1
    } else {
        Ticks::NANOVOLT_100
    };
    if pulse_mode {
        floor.max(Ticks::MICROVOLT_1)
    } else {
        floor
    }
}

/// Full-scale value of the range, picking a decade for `AUTO`.
pub fn effective_range(range: SourceRange, min: Ticks, max: Ticks) -> Ticks {
    match range {
        SourceRange::Fixed(volts) => Ticks::from_volts(volts.abs()),
        SourceRange::Auto => {
            let needed = min.0.abs().max(max.0.abs());
            AUTO_RANGES
                .iter()
                .copied()
                .find(|r| r.0 >= needed)
                .unwrap_or(AUTO_RANGES[AUTO_RANGES.len() - 1])
        }
    }
}

/// Digits that are ≤ range, ≤ span and ≥ `floor`, in descending order.
pub fn digit_plan(range: Ticks, span: Ticks, floor: Ticks) -> Vec<Ticks> {
    DIGITS
        .iter()
        .copied()
        .filter(|d| *d <= range && *d <= span && *d >= floor)
        .collect()
}

/// Where a digit's scan begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPoint {
    /// Scan from this level.
    At(Ticks),
    /// No room left between the start and the direction limit.
    NoRoom,
}

/// Loop state of one search pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    /// Direction of the pass.
    pub direction: Slope,
    /// Lower edge of the search window.
    pub lo: Ticks,
    /// Upper edge of the search window.
    pub hi: Ticks,
    /// Source range; start points are clipped to ±range.
    pub range: Ticks,
    /// Last trigger point, once a digit has succeeded.
    pub base: Option<Ticks>,
    /// Step size of the last digit that produced `base`.
    pub previous_step: Option<Ticks>,
    /// Level most recently applied.
    pub current: Ticks,
}

impl SearchState {
    /// State for a pass over `lo..=hi` with no trigger yet.
    pub fn new(direction: Slope, lo: Ticks, hi: Ticks, range: Ticks) -> Self {
        Self {
            direction,
            lo,
            hi,
            range,
            base: None,
            previous_step: None,
            current: lo,
        }
    }

    fn sign(&self) -> i64 {
        match self.direction {
            Slope::Rise => 1,
            Slope::Fall => -1,
        }
    }

    /// The window edge the scan moves toward.
    pub fn limit(&self) -> Ticks {
        match self.direction {
            Slope::Rise => self.hi,
            Slope::Fall => self.lo,
        }
    }

    /// Start point for `digit`. `guard` multiplies the back-off for sub-µV
    /// digits.
    pub fn start_for(&self, digit: Ticks, guard: i64) -> StartPoint {
        let raw = match (self.base, self.previous_step) {
            (Some(base), Some(previous)) => {
                let multiplier = if digit < Ticks::MICROVOLT_1 { guard } else { 1 };
                Ticks(base.0 - self.sign() * previous.0 * multiplier)
            }
            _ => Ticks(self.lo.0 + (self.hi.0 - self.lo.0) / 2),
        };

        let clipped = Ticks(raw.0.clamp(-self.range.0, self.range.0).clamp(self.lo.0, self.hi.0));
        let has_room = match self.direction {
            Slope::Rise => clipped < self.hi,
            Slope::Fall => clipped > self.lo,
        };
        if has_room {
            StartPoint::At(clipped)
        } else {
            StartPoint::NoRoom
        }
    }

    /// The window edge the scan moves away from.
    pub fn origin(&self) -> Ticks {
        match self.direction {
            Slope::Rise => self.lo,
            Slope::Fall => self.hi,
        }
    }

    /// Next level after `value`. The last step is shortened to land on the
    /// direction limit; `None` once the limit has been applied.
    pub fn next(&self, value: Ticks, digit: Ticks) -> Option<Ticks> {
        let limit = self.limit();
        if value == limit {
            return None;
        }
        let next = Ticks(value.0 + self.sign() * digit.0);
        Some(match self.direction {
            Slope::Rise => next.min(limit),
            Slope::Fall => next.max(limit),
        })
    }

    /// Remember a trigger found with step `digit`.
    pub fn record_trigger(&mut self, value: Ticks, digit: Ticks) {
        self.base = Some(value);
        self.previous_step = Some(digit);
    }
}

/// Everything a search pass needs, already reduced to ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    /// Direction of the pass.
    pub direction: Slope,
    /// Step sizes, coarsest first.
    pub digits: Vec<Ticks>,
    /// Lower edge of the search window.
    pub lo: Ticks,
    /// Upper edge of the search window.
    pub hi: Ticks,
    /// Range bounding start points.
    pub range: Ticks,
    /// Resting level applied before every digit.
    pub initial: Ticks,
    /// Back-off multiplier for sub-µV digits.
    pub guard: i64,
}

impl SearchPlan {
    /// Build the plan for one direction.
    ///
    /// `pulse_initial` is the resting level magnitude used in pulse-generator
    /// mode. Fails with a message when the window is empty or no digit
    /// survives filtering.
    pub fn new(
        range: SourceRange,
        min: f64,
        max: f64,
        direction: Slope,
        pulse_mode: bool,
        pulse_initial: f64,
        guard: i64,
    ) -> Result<Self, String> {
        let (min, max) = (Ticks::from_volts(min), Ticks::from_volts(max));
        let range = effective_range(range, min, max);
        let lo = min.max(Ticks(-range.0));
        let hi = max.min(range);
        if lo >= hi {
            return Err(format!(
                "search window [{}, {}] is empty within range ±{}",
                min, max, range
            ));
        }

        let span = Ticks((max.0 - min.0).abs());
        let floor = min_digit(range, pulse_mode);
        let digits = digit_plan(range, span, floor);
        if digits.is_empty() {
            return Err(format!(
                "no search digit fits range {} and span {} (minimum digit {})",
                range, span, floor
            ));
        }

        let initial = if pulse_mode {
            let rest = Ticks::from_volts(pulse_initial.abs());
            match direction {
                Slope::Rise => Ticks(-rest.0),
                Slope::Fall => rest,
            }
        } else {
            match direction {
                Slope::Rise => lo,
                Slope::Fall => hi,
            }
        };

        Ok(Self {
            direction,
            digits,
            lo,
            hi,
            range,
            initial,
            guard: guard.max(1),
        })
    }
}

/// Hardware side of the search.
#[async_trait]
pub trait TriggerProbe: Send {
    /// Drive the device to its resting state at `initial` (detect/release
    /// sequence included) and report whether a trigger fired at rest.
    async fn rest(&mut self, initial: f64) -> FaultResult<bool>;

    /// Apply `value`, wait the per-step time and report whether a trigger
    /// fired since the previous call.
    async fn step_to(&mut self, value: f64) -> FaultResult<bool>;
}

/// Result of one search pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    /// Trigger level, present only when the finest searched digit fired.
    pub trigger: Option<Ticks>,
    /// Messages for the result table (skipped digits, missing triggers).
    pub notes: Vec<String>,
}

fn init_error(message: String) -> Fault {
    Fault::warning(SEARCH_ROLE, "search init", message)
}

/// Run one search pass.
///
/// A trigger at the resting state is an initialisation error and aborts the
/// pass with a warning. Cancellation is checked before every step.
pub async fn run_search<P: TriggerProbe + ?Sized>(
    plan: &SearchPlan,
    probe: &mut P,
    cancel: &CancelToken,
) -> FaultResult<SearchReport> {
    let mut state = SearchState::new(plan.direction, plan.lo, plan.hi, plan.range);
    let mut notes = Vec::new();
    // the reported level must come from the finest digit that was searched
    let mut last_digit_fired = false;

    for &digit in &plan.digits {
        cancel.check()?;
        let start = match state.start_for(digit, plan.guard) {
            StartPoint::At(start) => start,
            StartPoint::NoRoom => {
                notes.push(format!("digit {}: no room toward limit {}, skipped", digit, state.limit()));
                continue;
            }
        };
        debug!(digit = %digit, start = %start, "search digit");

        if probe.rest(plan.initial.as_volts()).await? {
            return Err(init_error(format!(
                "triggered at resting level {}",
                plan.initial
            )));
        }
        cancel.check()?;
        let mut start = start;
        state.current = start;
        if probe.step_to(start.as_volts()).await? {
            // The midpoint of the first digit may already lie past the
            // threshold; rescan that digit from the window origin.
            let origin = state.origin();
            if state.base.is_some() || start == origin {
                return Err(init_error(format!(
                    "triggered at start level {} of digit {}",
                    start, digit
                )));
            }
            debug!(start = %start, origin = %origin, "midpoint already triggered");
            if probe.rest(plan.initial.as_volts()).await? {
                return Err(init_error(format!(
                    "triggered at resting level {}",
                    plan.initial
                )));
            }
            cancel.check()?;
            start = origin;
            state.current = start;
            if probe.step_to(start.as_volts()).await? {
                return Err(init_error(format!(
                    "triggered at window origin {}",
                    start
                )));
            }
        }

        let mut found = None;
        while let Some(next) = state.next(state.current, digit) {
            cancel.check()?;
            state.current = next;
            if probe.step_to(next.as_volts()).await? {
                found = Some(next);
                break;
            }
        }

        match found {
            Some(value) => {
                debug!(digit = %digit, value = %value, "trigger found");
                state.record_trigger(value, digit);
                last_digit_fired = true;
            }
            None if state.base.is_none() => {
                notes.push(format!(
                    "no trigger between {} and {} at digit {}",
                    start,
                    state.limit(),
                    digit
                ));
                return Ok(SearchReport {
                    trigger: None,
                    notes,
                });
            }
            None => {
                notes.push(format!("no trigger at digit {}", digit));
                last_digit_fired = false;
            }
        }
    }

    if !last_digit_fired {
        if let Some(base) = state.base {
            notes.push(format!("last trigger level {} at a coarser digit", base));
        }
        return Ok(SearchReport {
            trigger: None,
            notes,
        });
    }
    if let Some(value) = state.base {
        info!(direction = ?plan.direction, value = %value, "trigger level");
    }
    Ok(SearchReport {
        trigger: state.base,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Comparator that fires once the level reaches `threshold`.
    struct Comparator {
        threshold: Ticks,
        falling: bool,
        steps: usize,
    }

    #[async_trait]
    impl TriggerProbe for Comparator {
        async fn rest(&mut self, initial: f64) -> FaultResult<bool> {
            self.step_to(initial).await
        }

        async fn step_to(&mut self, value: f64) -> FaultResult<bool> {
            self.steps += 1;
            let level = Ticks::from_volts(value);
            Ok(if self.falling {
                level <= self.threshold
            } else {
                level >= self.threshold
            })
        }
    }

    #[test]
    fn test_digit_plan_descending_and_bounded() {
        let range = Ticks::MILLIVOLT_100;
        let plan = digit_plan(range, Ticks::VOLT_1, min_digit(range, false));
        assert_eq!(plan.first(), Some(&Ticks::MILLIVOLT_100));
        assert_eq!(plan.last(), Some(&Ticks::MICROVOLT_1));
        assert!(plan.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_pulse_mode_floor() {
        assert_eq!(min_digit(Ticks::MILLIVOLT_10, false), Ticks::NANOVOLT_100);
        assert_eq!(min_digit(Ticks::MILLIVOLT_10, true), Ticks::MICROVOLT_1);
        assert_eq!(min_digit(Ticks::VOLT_10, true), Ticks::MICROVOLT_100);
    }

    #[test]
    fn test_auto_range_picks_covering_decade() {
        let r = effective_range(SourceRange::Auto, Ticks::from_volts(-0.05), Ticks::from_volts(0.2));
        assert_eq!(r, Ticks::VOLT_1);
    }

    #[test]
    fn test_start_points() {
        let mut state = SearchState::new(Slope::Rise, Ticks(0), Ticks::VOLT_1, Ticks::VOLT_1);
        assert_eq!(
            state.start_for(Ticks::MILLIVOLT_100, 3),
            StartPoint::At(Ticks(5_000_000))
        );

        state.record_trigger(Ticks(5_300_000), Ticks::MILLIVOLT_100);
        assert_eq!(
            state.start_for(Ticks::MILLIVOLT_10, 3),
            StartPoint::At(Ticks(4_300_000))
        );

        state.record_trigger(Ticks(12), Ticks::MICROVOLT_1);
        assert_eq!(
            state.start_for(Ticks::NANOVOLT_100, 3),
            StartPoint::At(Ticks(0))
        );

        state.record_trigger(Ticks::VOLT_1, Ticks::MILLIVOLT_1);
        let mut falling = state.clone();
        falling.direction = Slope::Fall;
        falling.record_trigger(Ticks(0), Ticks::MILLIVOLT_1);
        assert_eq!(falling.start_for(Ticks::MICROVOLT_100, 1), StartPoint::At(Ticks(10_000)));
        falling.lo = Ticks(10_000);
        assert_eq!(falling.start_for(Ticks::MICROVOLT_100, 1), StartPoint::NoRoom);
    }

    #[test]
    fn test_next_lands_on_limit() {
        let state = SearchState::new(Slope::Rise, Ticks(0), Ticks(20), Ticks::VOLT_1);
        assert_eq!(state.next(Ticks(10), Ticks(10)), Some(Ticks(20)));
        assert_eq!(state.next(Ticks(15), Ticks(10)), Some(Ticks(20)));
        assert_eq!(state.next(Ticks(20), Ticks(10)), None);
    }

    #[test]
    fn test_plan_rejects_empty_window() {
        let err = SearchPlan::new(SourceRange::Fixed(1.0), 2.0, 3.0, Slope::Rise, false, 0.002, 3)
            .unwrap_err();
        assert!(err.contains("empty"));
    }

    #[tokio::test]
    async fn test_rise_search_converges() {
        let plan =
            SearchPlan::new(SourceRange::Fixed(0.1), 0.0, 0.1, Slope::Rise, false, 0.002, 3).unwrap();
        let mut probe = Comparator {
            threshold: Ticks::from_volts(0.0123456),
            falling: false,
            steps: 0,
        };
        let report = run_search(&plan, &mut probe, &CancelToken::new()).await.unwrap();
        // finest digit for a 100 mV range is 1 µV
        assert_eq!(report.trigger, Some(Ticks::from_volts(0.012346)));
        assert!(report.notes.is_empty());
        assert!(probe.steps < 200);
    }

    #[tokio::test]
    async fn test_fall_search_converges() {
        let plan =
            SearchPlan::new(SourceRange::Fixed(2.0), 0.0, 2.0, Slope::Fall, false, 0.002, 3).unwrap();
        let mut probe = Comparator {
            threshold: Ticks::from_volts(0.75),
            falling: true,
            steps: 0,
        };
        let report = run_search(&plan, &mut probe, &CancelToken::new()).await.unwrap();
        assert_eq!(report.trigger, Some(Ticks::from_volts(0.75)));
    }

    #[tokio::test]
    async fn test_triggered_at_rest_is_init_error() {
        let plan =
            SearchPlan::new(SourceRange::Fixed(1.0), 0.0, 1.0, Slope::Rise, false, 0.002, 3).unwrap();
        let mut probe = Comparator {
            threshold: Ticks(-1),
            falling: false,
            steps: 0,
        };
        let err = run_search(&plan, &mut probe, &CancelToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("resting level"));
    }

    #[tokio::test]
    async fn test_no_trigger_on_first_digit() {
        let plan =
            SearchPlan::new(SourceRange::Fixed(1.0), 0.0, 1.0, Slope::Rise, false, 0.002, 3).unwrap();
        let mut probe = Comparator {
            threshold: Ticks::from_volts(5.0),
            falling: false,
            steps: 0,
        };
        let report = run_search(&plan, &mut probe, &CancelToken::new()).await.unwrap();
        assert_eq!(report.trigger, None);
        assert_eq!(report.notes.len(), 1);
    }

    /// Comparator whose trigger output dies after a fixed number of hits.
    struct Fading {
        inner: Comparator,
        hits_left: usize,
    }

    #[async_trait]
    impl TriggerProbe for Fading {
        async fn rest(&mut self, initial: f64) -> FaultResult<bool> {
            self.step_to(initial).await
        }

        async fn step_to(&mut self, value: f64) -> FaultResult<bool> {
            let fired = self.inner.step_to(value).await? && self.hits_left > 0;
            if fired {
                self.hits_left -= 1;
            }
            Ok(fired)
        }
    }

    #[tokio::test]
    async fn test_silent_finest_digit_reports_no_trigger() {
        let plan =
            SearchPlan::new(SourceRange::Fixed(2.0), 0.0, 2.0, Slope::Rise, false, 0.002, 3).unwrap();
        assert!(plan.digits.len() > 4);
        let mut comparator = Fading {
            inner: Comparator {
                threshold: Ticks::from_volts(1.23456),
                falling: false,
                steps: 0,
            },
            hits_left: 4,
        };
        let report = run_search(&plan, &mut comparator, &CancelToken::new()).await.unwrap();
        assert_eq!(report.trigger, None);
        assert!(report.notes.iter().any(|n| n.starts_with("no trigger at digit")));
        assert!(report
            .notes
            .last()
            .is_some_and(|n| n.starts_with("last trigger level")));
    }

    #[tokio::test]
    async fn test_cancel_stops_search() {
        let plan =
            SearchPlan::new(SourceRange::Fixed(1.0), 0.0, 1.0, Slope::Rise, false, 0.002, 3).unwrap();
        let mut probe = Comparator {
            threshold: Ticks::from_volts(0.5),
            falling: false,
            steps: 0,
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(
            run_search(&plan, &mut probe, &cancel).await,
            Err(Fault::Cancelled)
        );
        assert_eq!(probe.steps, 0);
    }
}
