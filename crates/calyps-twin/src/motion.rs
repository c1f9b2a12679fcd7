//! Motion inference.
//!
//! The box reports positions but never says when a shutter starts or stops
//! moving, so the direction is inferred from where the shutter was heading,
//! where it is now and where it is heading next.

use std::time::Duration;

use calyps_types::{Level, MotionState};

/// How long a shutter is assumed to keep moving without further news.
pub const MOTION_REVERT_DELAY: Duration = Duration::from_secs(11);

/// Outcome of [`infer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub state: MotionState,
    /// New target for the twin; set whenever the shutter is found stopped.
    pub corrected_target: Option<Level>,
}

/// Infer the motion state from `(previous target, observed actual, next target)`.
///
/// A shutter is stopped when the target does not change, or when it has hit
/// the end stop it was travelling towards.  A stopped shutter's target
/// becomes wherever it actually is, which also covers moves started by a
/// third-party remote.
///
/// ```
/// use calyps_twin::infer;
/// use calyps_types::{Level, MotionState};
///
/// let l = |v| Level::new(v).unwrap();
/// assert_eq!(infer(l(30), l(30), l(80)).state, MotionState::Increasing);
/// assert_eq!(infer(l(30), l(100), l(80)).state, MotionState::Stopped);
/// ```
pub fn infer(previous: Level, actual: Level, next: Level) -> Verdict {
    let increasing = previous < next;
    let stopped = previous == next
        || (increasing && actual.is_max())
        || (!increasing && actual.is_min());

    if stopped {
        Verdict {
            state: MotionState::Stopped,
            corrected_target: Some(actual),
        }
    } else {
        Verdict {
            state: if increasing {
                MotionState::Increasing
            } else {
                MotionState::Decreasing
            },
            corrected_target: None,
        }
    }
}
