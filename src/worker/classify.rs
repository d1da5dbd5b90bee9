use crate::pipeline::PipelineError;

/// How a failed translation should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Backend aborted or is unavailable; another backend may succeed
    TransientBackendFailure,
    /// Backend refused access; another backend may succeed
    AuthFailure,
    /// Anything else; surfaced as-is
    Other,
}

impl FailureKind {
    /// Whether a retry on the fallback backend is worth attempting
    #[must_use]
    pub const fn is_fallback_eligible(self) -> bool {
        matches!(self, Self::TransientBackendFailure | Self::AuthFailure)
    }
}

/// Maps runtime failures onto [`FailureKind`]
///
/// Runtimes do not expose stable error kinds, so implementations usually
/// inspect message text. Swap the classifier when the runtime changes.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorClassifier: Send + Sync {
    /// Classify one failure
    fn classify(&self, error: &PipelineError) -> FailureKind;
}

/// Classifies by case-insensitive substring match against known failure signatures
#[derive(Debug, Clone)]
pub struct SignatureClassifier {
    transient: Vec<String>,
    auth: Vec<String>,
}

impl Default for SignatureClassifier {
    fn default() -> Self {
        Self::new(
            &["aborted", "webgpu", "gpu", "no available backend"],
            &["unauthorized", "forbidden", "401"],
        )
    }
}

impl SignatureClassifier {
    /// Classifier with custom signature lists
    #[must_use]
    pub fn new(transient: &[&str], auth: &[&str]) -> Self {
        let lower = |list: &[&str]| list.iter().map(|s| s.to_lowercase()).collect();
        Self {
            transient: lower(transient),
            auth: lower(auth),
        }
    }
}

impl ErrorClassifier for SignatureClassifier {
    fn classify(&self, error: &PipelineError) -> FailureKind {
        let Some(message) = error.message() else {
            // A failure without a message is what a crashed backend looks like
            return FailureKind::TransientBackendFailure;
        };
        let message = message.to_lowercase();

        if self.auth.iter().any(|sig| message.contains(sig.as_str())) {
            FailureKind::AuthFailure
        } else if self.transient.iter().any(|sig| message.contains(sig.as_str())) {
            FailureKind::TransientBackendFailure
        } else {
            FailureKind::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(msg: &str) -> FailureKind {
        SignatureClassifier::default().classify(&PipelineError::Message(msg.to_owned()))
    }

    #[test]
    fn test_gpu_failures_are_transient() {
        assert_eq!(
            classify("WebGPU is not supported by this browser"),
            FailureKind::TransientBackendFailure
        );
        assert_eq!(
            classify("GPU device was lost"),
            FailureKind::TransientBackendFailure
        );
        assert_eq!(classify("Aborted()"), FailureKind::TransientBackendFailure);
        assert_eq!(
            classify("no available backend found. ERR: [webgpu] ..."),
            FailureKind::TransientBackendFailure
        );
    }

    #[test]
    fn test_auth_failures() {
        assert_eq!(
            classify("Unauthorized access to https://huggingface.co/x"),
            FailureKind::AuthFailure
        );
        assert_eq!(classify("HTTP 401"), FailureKind::AuthFailure);
    }

    #[test]
    fn test_other_failures_not_eligible() {
        let kind = classify("Out of memory");
        assert_eq!(kind, FailureKind::Other);
        assert!(!kind.is_fallback_eligible());
    }

    #[test]
    fn test_opaque_failure_is_transient() {
        let kind = SignatureClassifier::default().classify(&PipelineError::Opaque);
        assert_eq!(kind, FailureKind::TransientBackendFailure);
        assert!(kind.is_fallback_eligible());
    }

    #[test]
    fn test_custom_signatures() {
        let classifier = SignatureClassifier::new(&["Device Lost"], &[]);
        let kind = classifier.classify(&PipelineError::Message("device lost".to_owned()));
        assert_eq!(kind, FailureKind::TransientBackendFailure);

        let kind = classifier.classify(&PipelineError::Message("WebGPU".to_owned()));
        assert_eq!(kind, FailureKind::Other);
    }
}
