use crate::chain::PolicyChain;
use crate::common::PipelineError;

/// One step of an [`HttpPipeline`](crate::pipeline::HttpPipeline).
///
/// `process` must end in exactly one of:
/// - [`PolicyChain::advance`] (or one of its variants) to pass the request on,
/// - [`PolicyChain::completed`] / [`PolicyChain::completed_error`] to answer
///   it here.
///
/// It may do so later from another thread, as long as it holds on to the
/// chain. Returning `Err` (or panicking) bypasses the chain: the run ends with
/// [`PipelineError::Escaped`], so recoverable failures belong in
/// `completed_error` instead.
///
/// Closures taking a [`PolicyChain`] are policies too:
///
/// ```no_run
/// use azcore::PipelineError;
/// use azcore::chain::PolicyChain;
///
/// let tag = |chain: PolicyChain| -> Result<(), PipelineError> {
///     let request = chain.request().clone().with_header("x-ms-tag", "mobile");
///     chain.advance(request)
/// };
/// # let _ = tag;
/// ```
pub trait Policy: Send + Sync + 'static {
    fn process(&self, chain: PolicyChain) -> Result<(), PipelineError>;

    /// Name used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> Policy for F
where
    F: Fn(PolicyChain) -> Result<(), PipelineError> + Send + Sync + 'static,
{
    fn process(&self, chain: PolicyChain) -> Result<(), PipelineError> {
        self(chain)
    }
}
