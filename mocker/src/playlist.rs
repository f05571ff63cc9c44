//! Ordered scripted outcomes of one mock.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::MockError;
use crate::identity::TargetId;

/// Type-erased scripted response. Always holds a `dispatch::Response<T>` for the
/// mock's target type.
pub(crate) type ErasedResponse = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Budget {
    Exactly(usize),
    Any,
}

pub(crate) struct Outcome {
    response: Option<ErasedResponse>,
    budget: Budget,
    consumed: usize,
}

impl Outcome {
    fn new(budget: Budget) -> Self {
        Self {
            response: None,
            budget,
            consumed: 0,
        }
    }

    fn is_spent(&self) -> bool {
        match self.budget {
            Budget::Exactly(limit) => self.consumed >= limit,
            Budget::Any => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlaylistError {
    NoOutcome,
    AnyTimesConflict,
    Exhausted,
    MissingResponse(usize),
    UnderCalled {
        index: usize,
        expected: usize,
        consumed: usize,
    },
}

impl PlaylistError {
    pub(crate) fn for_target(self, target: &TargetId) -> MockError {
        let target = target.to_string();
        match self {
            PlaylistError::NoOutcome => MockError::NoOutcome(target),
            PlaylistError::AnyTimesConflict => MockError::AnyTimesConflict(target),
            PlaylistError::Exhausted => MockError::UnexpectedCall(target),
            PlaylistError::MissingResponse(index) => MockError::MissingResponse { target, index },
            PlaylistError::UnderCalled {
                index,
                expected,
                consumed,
            } => MockError::UnderCalled {
                target,
                index,
                expected,
                consumed,
            },
        }
    }
}

/// FIFO of outcomes. The head is consumed until its budget is spent, then dropped
/// in favour of the next one. The last outcome is never dropped so that a call
/// past the end of the script is reported against it.
#[derive(Default)]
pub(crate) struct Playlist {
    outcomes: VecDeque<Outcome>,
    // Outcomes already dropped; keeps reported indexes stable.
    dropped: usize,
}

impl Playlist {
    /// Append an outcome that must be consumed exactly `limit` times.
    pub(crate) fn push_times(&mut self, limit: usize) -> Result<(), PlaylistError> {
        if self.outcomes.iter().any(|o| o.budget == Budget::Any) {
            return Err(PlaylistError::AnyTimesConflict);
        }
        self.outcomes.push_back(Outcome::new(Budget::Exactly(limit)));
        Ok(())
    }

    /// Start the playlist with a single outcome that repeats forever.
    pub(crate) fn push_any(&mut self) -> Result<(), PlaylistError> {
        if !self.outcomes.is_empty() || self.dropped > 0 {
            return Err(PlaylistError::AnyTimesConflict);
        }
        self.outcomes.push_back(Outcome::new(Budget::Any));
        Ok(())
    }

    /// Attach `response` to the most recently added outcome.
    pub(crate) fn set_response(&mut self, response: ErasedResponse) -> Result<(), PlaylistError> {
        let last = self.outcomes.back_mut().ok_or(PlaylistError::NoOutcome)?;
        last.response = Some(response);
        Ok(())
    }

    /// Consume one call and return the response it should produce.
    pub(crate) fn advance(&mut self) -> Result<ErasedResponse, PlaylistError> {
        // Zero-budget outcomes are spent before they are ever reached.
        while self.outcomes.len() > 1 && self.outcomes[0].is_spent() {
            self.drop_head();
        }

        let index = self.dropped;
        let head = self.outcomes.front_mut().ok_or(PlaylistError::Exhausted)?;
        if head.is_spent() {
            return Err(PlaylistError::Exhausted);
        }
        if let Budget::Exactly(_) = head.budget {
            head.consumed += 1;
        }

        let response = head
            .response
            .clone()
            .ok_or(PlaylistError::MissingResponse(index))?;

        if head.is_spent() && self.outcomes.len() > 1 {
            self.drop_head();
        }
        Ok(response)
    }

    /// Check that every finite outcome was consumed exactly to its limit.
    pub(crate) fn verify(&self) -> Result<(), PlaylistError> {
        for (i, outcome) in self.outcomes.iter().enumerate() {
            if let Budget::Exactly(limit) = outcome.budget {
                if outcome.consumed != limit {
                    return Err(PlaylistError::UnderCalled {
                        index: self.dropped + i,
                        expected: limit,
                        consumed: outcome.consumed,
                    });
                }
            }
        }
        Ok(())
    }

    fn drop_head(&mut self) {
        self.outcomes.pop_front();
        self.dropped += 1;
    }
}
