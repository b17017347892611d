#[cfg(test)]
use mockall::automock;

/// Optional health-signal collaborator of the executor.
///
/// Consulted when a storage call fails with a resource-exhaustion error: the executor asks it
/// to free what it can before the single retry.
#[cfg_attr(test, automock)]
pub trait ResourceMonitor: Send + Sync + 'static {
    /// Release caches, buffers or handles held by this process
    fn release_resources(&self);

    /// Whether the process is currently short on memory or handles
    fn under_pressure(&self) -> bool {
        false
    }
}
