//! Per-pin level filters.
//!
//! A filter sits between the raw sample and the edge diff. It decides, for
//! each sample, which level the pin is shown at; alerts, notifications,
//! watchdogs and edge waiters only ever see the shown level. Filtered
//! changes are reported at the tick of the sample that confirms them.

use dmagpio_common::consts::{MAX_FILTER_ACTIVE_MICROS, MAX_FILTER_STEADY_MICROS};
use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::tick::{tick_add, tick_diff, tick_reached};

/// Filter installed on one pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PinFilter {
    /// A new level must hold for `steady` µs before it is shown.
    Glitch {
        steady: u32,
        /// Tick at which the raw level first differed from the shown one.
        pending_since: Option<u32>,
    },
    /// Changes are hidden until the pin has been quiet for `steady` µs,
    /// then shown for `active` µs, then hidden again.
    Noise {
        steady: u32,
        active: u32,
        last_raw: Option<bool>,
        phase: NoisePhase,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NoisePhase {
    /// Waiting for a quiet period; the first sample starts it.
    Settling { since: Option<u32> },
    /// Passing changes through until `until`.
    Active { until: u32 },
}

impl PinFilter {
    /// Glitch filter, or `None` for `steady == 0`.
    ///
    /// # Errors
    /// `BadFilter` for `steady` above 300 ms.
    pub(crate) fn glitch(steady: u32) -> GpioResult<Option<Self>> {
        if steady > MAX_FILTER_STEADY_MICROS {
            return Err(GpioError::BadFilter(steady));
        }
        Ok((steady != 0).then_some(Self::Glitch {
            steady,
            pending_since: None,
        }))
    }

    /// Noise filter, or `None` for `steady == 0`.
    ///
    /// # Errors
    /// `BadFilter` for `steady` above 300 ms or `active` above 1 s.
    pub(crate) fn noise(steady: u32, active: u32) -> GpioResult<Option<Self>> {
        if steady > MAX_FILTER_STEADY_MICROS {
            return Err(GpioError::BadFilter(steady));
        }
        if active > MAX_FILTER_ACTIVE_MICROS {
            return Err(GpioError::BadFilter(active));
        }
        Ok((steady != 0).then_some(Self::Noise {
            steady,
            active,
            last_raw: None,
            phase: NoisePhase::Settling { since: None },
        }))
    }

    /// Level to show for a sample at `tick` whose raw level is `raw`, given
    /// that `shown` is the level currently reported.
    pub(crate) fn apply(&mut self, raw: bool, shown: bool, tick: u32) -> bool {
        match self {
            Self::Glitch {
                steady,
                pending_since,
            } => {
                if raw == shown {
                    *pending_since = None;
                    return shown;
                }
                let since = *pending_since.get_or_insert(tick);
                if tick_diff(tick, since) >= *steady {
                    *pending_since = None;
                    raw
                } else {
                    shown
                }
            }
            Self::Noise {
                steady,
                active,
                last_raw,
                phase,
            } => {
                let moved = last_raw.replace(raw).is_some_and(|prev| prev != raw);
                match *phase {
                    NoisePhase::Active { until } => {
                        if tick_reached(tick, until) {
                            *phase = NoisePhase::Settling { since: Some(tick) };
                            shown
                        } else {
                            raw
                        }
                    }
                    NoisePhase::Settling { since } => {
                        let since = match since {
                            Some(since) if !moved => since,
                            _ => tick,
                        };
                        if tick_diff(tick, since) >= *steady {
                            *phase = NoisePhase::Active {
                                until: tick_add(tick, *active),
                            };
                            raw
                        } else {
                            *phase = NoisePhase::Settling { since: Some(since) };
                            shown
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: &mut PinFilter, samples: &[(u32, bool)]) -> Vec<bool> {
        let mut shown = false;
        samples
            .iter()
            .map(|&(tick, raw)| {
                shown = filter.apply(raw, shown, tick);
                shown
            })
            .collect()
    }

    #[test]
    fn zero_steady_removes_filter() {
        assert_eq!(PinFilter::glitch(0), Ok(None));
        assert_eq!(PinFilter::noise(0, 100), Ok(None));
    }

    #[test]
    fn bounds_are_checked() {
        assert_eq!(PinFilter::glitch(300_001), Err(GpioError::BadFilter(300_001)));
        assert_eq!(
            PinFilter::noise(10, 1_000_001),
            Err(GpioError::BadFilter(1_000_001))
        );
        assert!(PinFilter::glitch(300_000).unwrap().is_some());
    }

    #[test]
    fn glitch_hides_short_pulses() {
        let mut f = PinFilter::glitch(100).unwrap().unwrap();
        let shown = run(
            &mut f,
            &[(0, false), (10, true), (50, false), (60, true), (150, true), (160, true)],
        );
        // the pulse at 10 lasts 40 µs; the level set at 60 is confirmed at 160
        assert_eq!(shown, vec![false, false, false, false, false, true]);
    }

    #[test]
    fn glitch_confirms_at_exact_steady() {
        let mut f = PinFilter::glitch(100).unwrap().unwrap();
        assert_eq!(run(&mut f, &[(0, true), (100, true)]), vec![false, true]);
    }

    #[test]
    fn noise_passes_changes_only_while_active() {
        let mut f = PinFilter::noise(100, 50).unwrap().unwrap();
        let shown = run(
            &mut f,
            &[
                (0, false),
                (20, true),   // quiet period restarts
                (60, false),  // and again
                (160, false), // quiet for 100: active until 210
                (170, true),  // shown
                (200, false), // shown
                (210, true),  // active expired: hidden, settling restarts
                (300, true),  // quiet for 90 only
                (310, true),  // quiet for 100: shown
            ],
        );
        assert_eq!(
            shown,
            vec![false, false, false, false, true, false, false, false, true]
        );
    }
}
