use std::{fmt, sync::Arc, time::Duration};

use tracing::{debug, info};

use super::{
    Backend, CleanupAction, CommandLine, CommandRunner, ComposeBackend, HttpHealthCheck,
    LifecycleError, PodStatusCheck, ReadinessCheck, ReadinessProber, ScenarioResources,
    pods::PodList,
};
use crate::settings::HarnessConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Down,
    Starting,
    Up,
    TearingDown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Down => "down",
            LifecycleState::Starting => "starting",
            LifecycleState::Up => "up",
            LifecycleState::TearingDown => "tearing-down",
        };
        f.write_str(label)
    }
}

/// Bring-up, readiness, teardown and restart of the system under test.
pub trait LifecycleController {
    fn state(&self) -> LifecycleState;

    /// Issue the backend's bring-up command. Safe when the system is partially up.
    fn start(&mut self) -> Result<(), LifecycleError>;

    /// Stop and remove everything the backend started. Safe when already down.
    fn teardown(&mut self) -> Result<(), LifecycleError>;

    /// Block until the system reports ready or `deadline` passes.
    fn wait(&mut self, deadline: Duration) -> Result<Duration, LifecycleError>;

    fn restart(&mut self, deadline: Duration) -> Result<(), LifecycleError> {
        info!(deadline_secs = deadline.as_secs(), "restarting system");
        self.teardown().map_err(LifecycleError::into_restart_failure)?;
        self.start().map_err(LifecycleError::into_restart_failure)?;
        self.wait(deadline).map_err(LifecycleError::into_restart_failure)?;
        Ok(())
    }

    /// Start a detached one-off run of `service` and register its kill + remove on `resources`.
    fn run_auxiliary_service(
        &mut self,
        service: &str,
        command: &[String],
        resources: &mut ScenarioResources,
    ) -> Result<String, LifecycleError>;

    /// Bring up an extra compose stack for the rest of the scenario.
    fn attach_stack(
        &mut self,
        stack: &AuxiliaryStack,
        resources: &mut ScenarioResources,
    ) -> Result<(), LifecycleError>;

    /// Aggregated backend logs, the last `tail` lines per service or full history.
    fn dump_logs(&self, tail: Option<u32>) -> Result<String, LifecycleError>;
}

/// Extra services added mid-scenario from a compose file next to the primary one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryStack {
    pub name: String,
    pub compose_suffix: String,
    pub services: Vec<String>,
    pub health_url: Option<String>,
    pub deadline: Duration,
}

impl AuxiliaryStack {
    /// Local search cluster plus the indexer that feeds it.
    pub fn search_indexer() -> Self {
        Self {
            name: "search-indexer".into(),
            compose_suffix: ".es_indexer.yml".into(),
            services: vec!["elasticsearch".into(), "es_indexer".into()],
            health_url: Some("http://localhost:9200/".into()),
            deadline: Duration::from_secs(60),
        }
    }
}

/// [`LifecycleController`] over a compose stack or a cluster manifest.
pub struct Environment {
    backend: Backend,
    runner: Arc<dyn CommandRunner>,
    prober: ReadinessProber,
    api_url: String,
    docker: String,
    sudo_volume_reset: bool,
    state: LifecycleState,
}

impl Environment {
    pub fn new(config: &HarnessConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            backend: config.backend.clone(),
            runner,
            prober: config.prober,
            api_url: config.api_url.clone(),
            docker: config.tools.docker.clone(),
            sudo_volume_reset: config.sudo_volume_reset,
            state: LifecycleState::Down,
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// A single readiness observation, without waiting.
    pub fn is_running(&self) -> Result<bool, LifecycleError> {
        self.readiness_check().poll()
    }

    /// Equivalent of `docker exec <container> sh -c <command>`.
    pub fn exec_in_container(
        &self,
        container: &str,
        command: &str,
    ) -> Result<String, LifecycleError> {
        let cmd = CommandLine::new(&self.docker).args(["exec", container, "sh", "-c", command]);
        let output = self.runner.run(&cmd)?;
        Ok(output.stdout)
    }

    fn readiness_check(&self) -> Box<dyn ReadinessCheck> {
        match &self.backend {
            Backend::Compose(_) => Box::new(HttpHealthCheck::for_api(&self.api_url)),
            Backend::Cluster(cluster) => Box::new(PodStatusCheck::new(
                self.runner.clone(),
                cluster.get_pods(),
            )),
        }
    }

    fn unsupported(&self, operation: &'static str) -> LifecycleError {
        LifecycleError::Unsupported {
            operation,
            backend: self.backend.kind(),
        }
    }
}

impl LifecycleController for Environment {
    fn state(&self) -> LifecycleState {
        self.state
    }

    fn start(&mut self) -> Result<(), LifecycleError> {
        let cmd = match &self.backend {
            Backend::Compose(compose) => compose.command(["up", "--no-build", "-d"]),
            Backend::Cluster(cluster) => cluster.create(),
        };
        info!(backend = self.backend.kind(), from = %self.state, "starting system");
        self.state = LifecycleState::Starting;
        if let Err(err) = self.runner.run(&cmd) {
            self.state = LifecycleState::Down;
            return Err(err);
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), LifecycleError> {
        info!(backend = self.backend.kind(), from = %self.state, "tearing down system");
        self.state = LifecycleState::TearingDown;
        let runner = &self.runner;
        match &mut self.backend {
            Backend::Compose(compose) => {
                let commands = [compose.command(["kill"]), compose.command(["rm", "-fv"])];
                compose.reset();
                for cmd in &commands {
                    runner.run(cmd)?;
                }
            }
            Backend::Cluster(cluster) => {
                // Volumes must be read from the pod specs before the pods are deleted.
                let listing = cluster.get_pods();
                let output = runner.run(&listing)?;
                let volumes = PodList::parse(&output.stdout)
                    .map_err(|source| LifecycleError::PodStatus {
                        command: listing.to_string(),
                        source,
                    })?
                    .host_volume_paths();
                runner.run(&cluster.delete())?;
                for volume in &volumes {
                    debug!(%volume, "resetting host volume");
                    let sudo = self.sudo_volume_reset;
                    runner.run(&host_command(sudo, "rm", &["-rf", volume.as_str()]))?;
                    runner.run(&host_command(sudo, "mkdir", &["-p", volume.as_str()]))?;
                }
            }
        }
        self.state = LifecycleState::Down;
        Ok(())
    }

    fn wait(&mut self, deadline: Duration) -> Result<Duration, LifecycleError> {
        let check = self.readiness_check();
        info!(
            probe = %check.describe(),
            deadline_secs = deadline.as_secs(),
            "waiting for system"
        );
        let elapsed = self.prober.wait_until_ready(deadline, check.as_ref())?;
        self.state = LifecycleState::Up;
        Ok(elapsed)
    }

    fn run_auxiliary_service(
        &mut self,
        service: &str,
        command: &[String],
        resources: &mut ScenarioResources,
    ) -> Result<String, LifecycleError> {
        let Backend::Compose(compose) = &self.backend else {
            return Err(self.unsupported("run_auxiliary_service"));
        };
        let cmd = compose
            .command(["run", "--rm", "-d", service])
            .args(command.iter().cloned());
        let output = self.runner.run(&cmd)?;
        let container = output.stdout.trim().to_string();
        resources.push(
            format!("auxiliary service {service}"),
            compose_cleanup(self.runner.clone(), compose, &[service.to_string()]),
        );
        info!(%service, %container, "auxiliary service running");
        Ok(container)
    }

    fn attach_stack(
        &mut self,
        stack: &AuxiliaryStack,
        resources: &mut ScenarioResources,
    ) -> Result<(), LifecycleError> {
        let backend = self.backend.kind();
        let Backend::Compose(compose) = &mut self.backend else {
            return Err(LifecycleError::Unsupported {
                operation: "attach_stack",
                backend,
            });
        };
        let file = compose.sibling_file(&stack.compose_suffix);
        compose.attach(file);
        let up = compose.command(["up", "--no-build", "-d"]);
        resources.push(
            format!("auxiliary stack {}", stack.name),
            compose_cleanup(self.runner.clone(), compose, &stack.services),
        );
        info!(stack = %stack.name, services = ?stack.services, "attaching auxiliary stack");
        self.runner.run(&up)?;

        if let Some(url) = &stack.health_url {
            let prober = ReadinessProber::new(self.prober.tick(), Duration::ZERO);
            prober.wait_until_ready(stack.deadline, &HttpHealthCheck::new(url.clone()))?;
        }
        Ok(())
    }

    fn dump_logs(&self, tail: Option<u32>) -> Result<String, LifecycleError> {
        let Backend::Compose(compose) = &self.backend else {
            debug!("log dump is not available for the cluster backend");
            return Ok(String::new());
        };
        let mut cmd = compose.command(["logs"]);
        if let Some(lines) = tail {
            cmd = cmd.arg(format!("--tail={lines}"));
        }
        Ok(self.runner.run(&cmd)?.combined())
    }
}

fn host_command(sudo: bool, program: &str, args: &[&str]) -> CommandLine {
    let cmd = if sudo {
        CommandLine::new("sudo").arg(program)
    } else {
        CommandLine::new(program)
    };
    cmd.args(args.iter().copied())
}

fn compose_cleanup(
    runner: Arc<dyn CommandRunner>,
    compose: &ComposeBackend,
    services: &[String],
) -> CleanupAction {
    let commands = [
        compose.command(["kill"]).args(services.iter().cloned()),
        compose.command(["rm", "-fv"]).args(services.iter().cloned()),
    ];
    Box::new(move || {
        for cmd in &commands {
            runner.run(cmd)?;
        }
        Ok(())
    })
}
