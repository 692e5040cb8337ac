use deckwright_core::GenerationError;

/// Decides whether a failed section may be retried by the caller.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, error: &GenerationError) -> bool;
}

/// Trusts the error's own variant.
#[derive(Clone, Copy, Debug, Default)]
pub struct TypedClassifier;

impl RetryClassifier for TypedClassifier {
    fn is_retryable(&self, error: &GenerationError) -> bool {
        error.is_retryable()
    }
}

impl<F> RetryClassifier for F
where
    F: Fn(&GenerationError) -> bool + Send + Sync,
{
    fn is_retryable(&self, error: &GenerationError) -> bool {
        self(error)
    }
}
