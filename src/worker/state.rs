use crate::pipeline::TranslationPipeline;
use std::fmt;
use std::sync::Arc;

/// Which backend configuration a load targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Primary backend, used for every fresh load
    Primary,
    /// Fallback backend, used once after an eligible failure
    Fallback,
}

/// Coarse lifecycle phase, for logging and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No model handle
    Unloaded,
    /// Instantiation in flight
    Loading,
    /// Model handle available
    Ready,
}

/// Model handle lifecycle: `Unloaded → Loading → Ready`
#[derive(Default)]
pub enum ModelState {
    /// No model handle
    #[default]
    Unloaded,
    /// Instantiation in flight
    Loading {
        /// Backend being loaded
        attempt: Attempt,
    },
    /// Model handle available
    Ready {
        /// The instantiated pipeline
        pipeline: Arc<dyn TranslationPipeline>,
        /// Backend it was loaded on
        attempt: Attempt,
    },
}

impl fmt::Debug for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => f.write_str("Unloaded"),
            Self::Loading { attempt } => f.debug_struct("Loading").field("attempt", attempt).finish(),
            Self::Ready { attempt, .. } => f
                .debug_struct("Ready")
                .field("attempt", attempt)
                .finish_non_exhaustive(),
        }
    }
}

impl ModelState {
    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Unloaded => Phase::Unloaded,
            Self::Loading { .. } => Phase::Loading,
            Self::Ready { .. } => Phase::Ready,
        }
    }

    /// `Unloaded → Loading`. Returns false (and changes nothing) from any other phase.
    pub fn begin_load(&mut self, attempt: Attempt) -> bool {
        if !matches!(self, Self::Unloaded) {
            return false;
        }
        tracing::debug!(?attempt, "model state: Unloaded → Loading");
        *self = Self::Loading { attempt };
        true
    }

    /// `Loading → Ready`. Returns the attempt that finished, or `None` if no load was in flight.
    pub fn finish_load(&mut self, pipeline: Arc<dyn TranslationPipeline>) -> Option<Attempt> {
        let Self::Loading { attempt } = *self else {
            return None;
        };
        tracing::debug!(?attempt, "model state: Loading → Ready");
        *self = Self::Ready { pipeline, attempt };
        Some(attempt)
    }

    /// `Loading → Unloaded`. Returns the attempt that failed, or `None` if no load was in flight.
    pub fn fail_load(&mut self) -> Option<Attempt> {
        let Self::Loading { attempt } = *self else {
            return None;
        };
        tracing::debug!(?attempt, "model state: Loading → Unloaded");
        *self = Self::Unloaded;
        Some(attempt)
    }

    /// Drop the model handle, whatever the phase
    pub fn reset(&mut self) {
        if !matches!(self, Self::Unloaded) {
            tracing::debug!(from = ?self.phase(), "model state: reset to Unloaded");
        }
        *self = Self::Unloaded;
    }

    /// The ready pipeline and the backend it runs on
    #[must_use]
    pub fn pipeline(&self) -> Option<(Arc<dyn TranslationPipeline>, Attempt)> {
        match self {
            Self::Ready { pipeline, attempt } => Some((Arc::clone(pipeline), *attempt)),
            _ => None,
        }
    }
}
