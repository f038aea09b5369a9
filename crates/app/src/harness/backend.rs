use camino::{Utf8Path, Utf8PathBuf};

use super::{CommandLine, LifecycleError};

/// Program names used to talk to each backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
    pub compose: Vec<String>,
    pub kubectl: String,
    pub docker: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            compose: vec!["docker-compose".into()],
            kubectl: "kubectl".into(),
            docker: "docker".into(),
        }
    }
}

/// The deployment mechanism driving the system under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Compose(ComposeBackend),
    Cluster(ClusterBackend),
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Compose(_) => "compose",
            Backend::Cluster(_) => "cluster",
        }
    }
}

/// Local multi-container stack described by one or more compose files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeBackend {
    program: Vec<String>,
    primary: Utf8PathBuf,
    files: Vec<Utf8PathBuf>,
    project: Option<String>,
}

impl ComposeBackend {
    pub fn new(program: Vec<String>, primary: Utf8PathBuf, project: Option<String>) -> Self {
        Self {
            program,
            files: vec![primary.clone()],
            primary,
            project,
        }
    }

    pub fn files(&self) -> &[Utf8PathBuf] {
        &self.files
    }

    pub fn primary(&self) -> &Utf8Path {
        &self.primary
    }

    /// Compose file that sits next to the primary one, e.g. `docker-compose.es_indexer.yml`.
    pub fn sibling_file(&self, suffix: &str) -> Utf8PathBuf {
        let stem = self.primary.file_stem().unwrap_or("docker-compose");
        self.primary.with_file_name(format!("{stem}{suffix}"))
    }

    pub fn attach(&mut self, file: Utf8PathBuf) {
        if !self.files.contains(&file) {
            self.files.push(file);
        }
    }

    /// Drop every auxiliary file, keeping only the primary one.
    pub fn reset(&mut self) {
        self.files.truncate(1);
    }

    /// Build `<compose> -f <file>... <args...>` for the current file list.
    pub fn command<I, S>(&self, args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (program, prefix) = match self.program.split_first() {
            Some((program, prefix)) => (program.as_str(), prefix),
            None => ("docker-compose", &[][..]),
        };
        let mut cmd = CommandLine::new(program).args(prefix.iter().cloned());
        for file in &self.files {
            cmd = cmd.arg("-f").arg(file.as_str());
        }
        cmd = cmd.args(args);
        if let Some(project) = &self.project {
            cmd = cmd.env("COMPOSE_PROJECT_NAME", project.as_str());
        }
        cmd
    }
}

/// External cluster driven through a manifest path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterBackend {
    program: String,
    manifest: Utf8PathBuf,
}

impl ClusterBackend {
    pub fn new(program: String, manifest: Utf8PathBuf) -> Self {
        Self { program, manifest }
    }

    pub fn manifest(&self) -> &Utf8Path {
        &self.manifest
    }

    pub fn create(&self) -> CommandLine {
        CommandLine::new(&self.program).args(["create", "-f", self.manifest.as_str()])
    }

    pub fn delete(&self) -> CommandLine {
        CommandLine::new(&self.program).args([
            "delete",
            "--ignore-not-found",
            "-f",
            self.manifest.as_str(),
        ])
    }

    pub fn get_pods(&self) -> CommandLine {
        CommandLine::new(&self.program).args(["get", "pods", "-o", "json"])
    }
}

/// Choose the backend for this run. A cluster manifest, when given, always wins.
pub fn select_backend(
    cluster_manifest: Option<&Utf8Path>,
    compose_file: Option<&Utf8Path>,
    compose_project: Option<String>,
    tools: &Tools,
) -> Result<Backend, LifecycleError> {
    if let Some(manifest) = cluster_manifest {
        if manifest.as_str().trim().is_empty() {
            return Err(LifecycleError::Configuration(
                "kubernetes_dir is set but empty".into(),
            ));
        }
        return Ok(Backend::Cluster(ClusterBackend::new(
            tools.kubectl.clone(),
            manifest.to_path_buf(),
        )));
    }

    match compose_file {
        Some(file) if !file.as_str().trim().is_empty() => {
            if tools.compose.is_empty() {
                return Err(LifecycleError::Configuration(
                    "compose_program must name at least one word".into(),
                ));
            }
            Ok(Backend::Compose(ComposeBackend::new(
                tools.compose.clone(),
                file.to_path_buf(),
                compose_project,
            )))
        }
        _ => Err(LifecycleError::Configuration(
            "neither a cluster manifest nor a compose file is configured".into(),
        )),
    }
}
