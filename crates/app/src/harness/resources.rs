use std::fmt;

use tracing::{debug, warn};

use super::LifecycleError;

/// Deferred release action registered while a scenario acquires something.
pub type CleanupAction = Box<dyn FnOnce() -> Result<(), LifecycleError> + Send>;

/// LIFO stack of cleanup actions owned by one scenario.
///
/// `close` runs every action even when some fail, then reports all failures together.
#[derive(Default)]
pub struct ScenarioResources {
    actions: Vec<(String, CleanupAction)>,
}

impl ScenarioResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Result<(), LifecycleError> + Send + 'static,
    {
        let label = label.into();
        debug!(%label, depth = self.actions.len() + 1, "registered scenario cleanup");
        self.actions.push((label, Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn close(&mut self) -> Result<(), LifecycleError> {
        let mut failures = Vec::new();
        while let Some((label, action)) = self.actions.pop() {
            debug!(%label, "running scenario cleanup");
            if let Err(err) = action() {
                warn!(%label, error = %err, "scenario cleanup failed; continuing");
                failures.push(err);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::CleanupFailed { failures })
        }
    }
}

impl fmt::Debug for ScenarioResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioResources")
            .field(
                "actions",
                &self.actions.iter().map(|(label, _)| label).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Drop for ScenarioResources {
    fn drop(&mut self) {
        if self.actions.is_empty() {
            return;
        }
        warn!(
            pending = self.actions.len(),
            "scenario resources dropped without close(); cleaning up"
        );
        if let Err(err) = self.close() {
            warn!(error = %err, "cleanup on drop failed");
        }
    }
}
