//! Strategy lifecycle state machine (spec.md 4.9):
//! `draft -> review -> approved -> active -> deprecated`, with retract back
//! to `draft` from any reviewer state and unconditional promotion to
//! `deprecated` from anything but `draft`.

use crate::error::EngineError;
use crate::strategy::LifecycleState;

/// Checks whether `from -> to` is a legal transition in isolation (ignoring
/// the extra preconditions — rule count, compile cleanliness, simulation
/// errors, reviewer fields — that the repository layer checks before
/// calling this). Returns the reason a transition is illegal so the caller
/// can build a `lifecycleViolation`.
pub fn check_transition(from: LifecycleState, to: LifecycleState) -> Result<(), EngineError> {
    use LifecycleState::*;

    let allowed = match (from, to) {
        (Draft, Review) => true,
        (Review, Approved) => true,
        (Approved, Active) => true,
        (Review, Draft) | (Approved, Draft) => true, // retract
        (_, Deprecated) if from != Draft => true,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(EngineError::LifecycleViolation {
            from: state_name(from).to_string(),
            to: state_name(to).to_string(),
            reason: format!("no edge {} -> {} in the lifecycle graph", state_name(from), state_name(to)),
        })
    }
}

fn state_name(s: LifecycleState) -> &'static str {
    match s {
        LifecycleState::Draft => "draft",
        LifecycleState::Review => "review",
        LifecycleState::Approved => "approved",
        LifecycleState::Active => "active",
        LifecycleState::Deprecated => "deprecated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn draft_to_review_allowed() {
        assert!(check_transition(Draft, Review).is_ok());
    }

    #[test]
    fn draft_cannot_deprecate_directly() {
        assert!(check_transition(Draft, Deprecated).is_err());
    }

    #[test]
    fn approved_can_retract_to_draft() {
        assert!(check_transition(Approved, Draft).is_ok());
    }

    #[test]
    fn active_cannot_skip_back_to_review() {
        assert!(check_transition(Active, Review).is_err());
    }

    #[test]
    fn active_can_deprecate() {
        assert!(check_transition(Active, Deprecated).is_ok());
    }
}
