//! Draw-gesture interpretation.
//!
//! A [`GestureMachine`] classifies the stream of drawn regions a consumer
//! receives. Single-region consumers emit every region immediately;
//! origin/destination consumers pair consecutive regions, origin first.
//!
//! Regions that arrive while the consumer is busy with a fetch are ignored,
//! so at most one gesture-triggered fetch is outstanding per consumer.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::query::OriginDestination;
use crate::{BoundingRegion, Result};

/// How a consumer interprets drawn regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureMode {
    SingleRegion,
    OriginDestination,
}

/// Current position in the gesture sequence.
///
/// A completed pair is handed out by [`GestureMachine::on_region`] and the
/// machine resets in the same call, so the pair-complete condition is only
/// ever visible as [`GestureOutcome::PairCompleted`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureState {
    AwaitingRegion,
    AwaitingOrigin,
    AwaitingDestination { origin: BoundingRegion },
}

/// Per-consumer record of the gesture in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GestureSession {
    pub origin: Option<BoundingRegion>,
    pub destination: Option<BoundingRegion>,
}

impl GestureSession {
    pub fn reset(&mut self) {
        self.origin = None;
        self.destination = None;
    }

    pub fn is_empty(&self) -> bool {
        self.origin.is_none() && self.destination.is_none()
    }
}

/// Result of feeding one drawn region into the machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureOutcome {
    /// Dropped because a fetch is in flight.
    Ignored,
    /// Stored as the origin of a new pair. `replaced_pair` is set when this
    /// region starts over after a previously emitted pair.
    OriginStored { replaced_pair: bool },
    /// Second region of a pair; the pair is ready to query.
    PairCompleted(OriginDestination),
    /// Single-region mode: the region is ready to query.
    Region(BoundingRegion),
}

/// State machine interpreting drawn regions for one consumer.
#[derive(Debug, Clone)]
pub struct GestureMachine {
    mode: GestureMode,
    state: GestureState,
    session: GestureSession,
}

impl GestureMachine {
    pub fn new(mode: GestureMode) -> Self {
        Self {
            mode,
            state: Self::initial_state(mode),
            session: GestureSession::default(),
        }
    }

    fn initial_state(mode: GestureMode) -> GestureState {
        match mode {
            GestureMode::SingleRegion => GestureState::AwaitingRegion,
            GestureMode::OriginDestination => GestureState::AwaitingOrigin,
        }
    }

    pub fn mode(&self) -> GestureMode {
        self.mode
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn session(&self) -> &GestureSession {
        &self.session
    }

    /// Back to the initial state with an empty session (consumer mount).
    pub fn reset(&mut self) {
        self.state = Self::initial_state(self.mode);
        self.session.reset();
    }

    /// Feed one drawn region.
    ///
    /// Malformed regions are rejected without touching the state.
    pub fn on_region(
        &mut self,
        region: BoundingRegion,
        fetch_in_flight: bool,
    ) -> Result<GestureOutcome> {
        region.validate()?;

        if fetch_in_flight {
            debug!("[Gesture] Ignoring region {} while fetching", region);
            return Ok(GestureOutcome::Ignored);
        }

        let outcome = match self.state {
            GestureState::AwaitingRegion => {
                // Consumed immediately; nothing stays pending
                self.session.reset();
                GestureOutcome::Region(region)
            }
            GestureState::AwaitingOrigin => {
                let replaced_pair = self.session.destination.is_some();
                self.session.origin = Some(region);
                self.session.destination = None;
                self.state = GestureState::AwaitingDestination { origin: region };
                GestureOutcome::OriginStored { replaced_pair }
            }
            GestureState::AwaitingDestination { origin } => {
                self.session.destination = Some(region);
                self.state = GestureState::AwaitingOrigin;
                GestureOutcome::PairCompleted(OriginDestination {
                    origin,
                    destination: region,
                })
            }
        };

        debug!("[Gesture] {:?} -> {:?}", outcome, self.state);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AnalyticsError;

    fn region(offset: f64) -> BoundingRegion {
        BoundingRegion::new(offset, offset + 1.0, offset, offset + 1.0)
    }

    #[test]
    fn test_single_region_emits_immediately() {
        let mut machine = GestureMachine::new(GestureMode::SingleRegion);
        assert_eq!(machine.state(), GestureState::AwaitingRegion);

        let outcome = machine.on_region(region(0.0), false).unwrap();
        assert_eq!(outcome, GestureOutcome::Region(region(0.0)));
        assert_eq!(machine.state(), GestureState::AwaitingRegion);
        assert!(machine.session().is_empty());
    }

    #[test]
    fn test_pair_in_draw_order() {
        let mut machine = GestureMachine::new(GestureMode::OriginDestination);
        let a = region(0.0);
        let b = region(5.0);

        assert_eq!(
            machine.on_region(a, false).unwrap(),
            GestureOutcome::OriginStored {
                replaced_pair: false
            }
        );
        assert_eq!(
            machine.state(),
            GestureState::AwaitingDestination { origin: a }
        );

        match machine.on_region(b, false).unwrap() {
            GestureOutcome::PairCompleted(pair) => {
                assert_eq!(pair.origin, a);
                assert_eq!(pair.destination, b);
            }
            other => panic!("expected pair, got {:?}", other),
        }
        assert_eq!(machine.state(), GestureState::AwaitingOrigin);
        assert_eq!(machine.session().destination, Some(b));
    }

    #[test]
    fn test_third_region_ignored_while_fetching() {
        let mut machine = GestureMachine::new(GestureMode::OriginDestination);
        machine.on_region(region(0.0), false).unwrap();
        let mut pairs = 0;
        if let GestureOutcome::PairCompleted(_) = machine.on_region(region(2.0), false).unwrap() {
            pairs += 1;
        }

        // The pair's fetch has not resolved yet
        let outcome = machine.on_region(region(4.0), true).unwrap();
        assert_eq!(outcome, GestureOutcome::Ignored);
        assert_eq!(pairs, 1);
        assert_eq!(machine.state(), GestureState::AwaitingOrigin);
    }

    #[test]
    fn test_third_region_starts_new_pair_after_reset() {
        let mut machine = GestureMachine::new(GestureMode::OriginDestination);
        machine.on_region(region(0.0), false).unwrap();
        machine.on_region(region(2.0), false).unwrap();

        let outcome = machine.on_region(region(4.0), false).unwrap();
        assert_eq!(
            outcome,
            GestureOutcome::OriginStored {
                replaced_pair: true
            }
        );
        assert_eq!(machine.session().origin, Some(region(4.0)));
        assert_eq!(machine.session().destination, None);
    }

    #[test]
    fn test_pending_origin_is_not_replaced() {
        let mut machine = GestureMachine::new(GestureMode::OriginDestination);
        machine.on_region(region(0.0), false).unwrap();

        // The second region always completes the pair
        let outcome = machine.on_region(region(0.0), false).unwrap();
        assert!(matches!(outcome, GestureOutcome::PairCompleted(_)));
    }

    #[test]
    fn test_invalid_region_leaves_state() {
        let mut machine = GestureMachine::new(GestureMode::OriginDestination);
        machine.on_region(region(0.0), false).unwrap();

        let bad = BoundingRegion::new(3.0, 1.0, 0.0, 1.0);
        assert!(matches!(
            machine.on_region(bad, false),
            Err(AnalyticsError::InvalidRegion { .. })
        ));
        assert_eq!(
            machine.state(),
            GestureState::AwaitingDestination { origin: region(0.0) }
        );

        machine.reset();
        assert_eq!(machine.state(), GestureState::AwaitingOrigin);
        assert!(machine.session().is_empty());
    }
}
