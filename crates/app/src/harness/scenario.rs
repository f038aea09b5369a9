use std::fs;

use anyhow::Result;
use camino::Utf8PathBuf;
use tracing::{info, warn};

use super::{
    LifecycleController, LifecycleError, ScenarioResources, now_millis, sanitize, write_text,
};

const DEFAULT_TAIL_LINES: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Passed,
    Failed,
    Skipped,
}

/// When and how much backend log to dump after a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPolicy {
    pub dump_logs: bool,
    pub dump_errors: bool,
    pub tail: u32,
    pub logs_dir: Option<Utf8PathBuf>,
}

impl LogPolicy {
    /// A non-zero `tail_logs` implies dumping on errors; zero falls back to the default tail.
    pub fn new(
        dump_logs: bool,
        dump_errors: bool,
        tail_logs: u32,
        logs_dir: Option<Utf8PathBuf>,
    ) -> Self {
        let (dump_errors, tail) = if tail_logs == 0 {
            (dump_errors, DEFAULT_TAIL_LINES)
        } else {
            (true, tail_logs)
        };
        Self {
            dump_logs,
            dump_errors,
            tail,
            logs_dir,
        }
    }

    pub fn should_dump(&self, outcome: ScenarioOutcome) -> bool {
        self.dump_logs || (self.dump_errors && outcome == ScenarioOutcome::Failed)
    }
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self::new(false, false, 0, None)
    }
}

/// Per-scenario state handed out by [`ScenarioHooks::before_scenario`].
#[derive(Debug)]
pub struct ScenarioScope {
    name: String,
    resources: ScenarioResources,
}

impl ScenarioScope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&mut self) -> &mut ScenarioResources {
        &mut self.resources
    }
}

/// Sequencing around scenarios: fresh resources before, log dump and cleanup after,
/// teardown once all scenarios are done.
pub struct ScenarioHooks<C> {
    controller: C,
    policy: LogPolicy,
}

impl<C: LifecycleController> ScenarioHooks<C> {
    pub fn new(controller: C, policy: LogPolicy) -> Self {
        Self { controller, policy }
    }

    pub fn controller(&mut self) -> &mut C {
        &mut self.controller
    }

    pub fn policy(&self) -> &LogPolicy {
        &self.policy
    }

    pub fn before_scenario(&self, name: &str) -> ScenarioScope {
        info!(scenario = name, "starting scenario");
        ScenarioScope {
            name: name.to_string(),
            resources: ScenarioResources::new(),
        }
    }

    /// Dump logs when the policy asks for it, then release scenario resources regardless.
    ///
    /// Cleanup may destroy container logs, so the dump happens first. A failed dump is reported
    /// after cleanup has still run.
    pub fn after_scenario(
        &mut self,
        mut scope: ScenarioScope,
        outcome: ScenarioOutcome,
    ) -> Result<(), LifecycleError> {
        info!(scenario = %scope.name, ?outcome, "finishing scenario");
        let dumped = if self.policy.should_dump(outcome) {
            self.dump(&scope.name)
        } else {
            Ok(())
        };
        let closed = scope.resources.close();
        match (dumped, closed) {
            (Err(dump_err), Err(cleanup_err)) => {
                warn!(scenario = %scope.name, error = %cleanup_err, "scenario cleanup failed");
                Err(dump_err)
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Run `body` between the before/after hooks. A body error wins over hook errors.
    pub fn run_scenario<T, F>(&mut self, name: &str, body: F) -> Result<T>
    where
        F: FnOnce(&mut C, &mut ScenarioResources) -> Result<T>,
    {
        let mut scope = self.before_scenario(name);
        let result = body(&mut self.controller, scope.resources());
        let outcome = if result.is_ok() {
            ScenarioOutcome::Passed
        } else {
            ScenarioOutcome::Failed
        };
        let hooks = self.after_scenario(scope, outcome);
        match (result, hooks) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(hook_err)) => {
                warn!(scenario = name, error = %hook_err, "after-scenario hook failed");
                Err(err)
            }
        }
    }

    /// Final teardown after every scenario has run.
    pub fn after_all(&mut self) -> Result<(), LifecycleError> {
        self.controller
            .teardown()
            .map_err(LifecycleError::into_teardown_failure)
    }

    fn dump(&self, scenario: &str) -> Result<(), LifecycleError> {
        let logs = self
            .controller
            .dump_logs(Some(self.policy.tail))
            .map_err(LifecycleError::into_log_dump_failure)?;
        match &self.policy.logs_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|source| LifecycleError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let path = dir.join(format!("{}.log", sanitize(scenario)));
                let header = format!("# scenario {scenario} dumped at {}\n", now_millis());
                write_text(&path, header + &logs)?;
                info!(scenario, path = %path, "backend logs written");
            }
            None => print!("{logs}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_forces_dump_on_errors() {
        let policy = LogPolicy::new(false, false, 20, None);
        assert!(policy.dump_errors);
        assert_eq!(policy.tail, 20);
        assert!(policy.should_dump(ScenarioOutcome::Failed));
        assert!(!policy.should_dump(ScenarioOutcome::Passed));
    }

    #[test]
    fn zero_tail_uses_default_lines() {
        let policy = LogPolicy::new(false, false, 0, None);
        assert_eq!(policy.tail, DEFAULT_TAIL_LINES);
        assert!(!policy.should_dump(ScenarioOutcome::Failed));
    }

    #[test]
    fn dump_logs_covers_every_outcome() {
        let policy = LogPolicy::new(true, false, 0, None);
        assert!(policy.should_dump(ScenarioOutcome::Passed));
        assert!(policy.should_dump(ScenarioOutcome::Skipped));
    }
}
