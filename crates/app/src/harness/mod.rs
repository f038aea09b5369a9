use std::{
    fs,
    time::{SystemTime, UNIX_EPOCH},
};

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;

pub mod backend;
pub use backend::{Backend, ClusterBackend, ComposeBackend, Tools, select_backend};
pub mod command;
pub use command::{
    CommandLine, CommandOutput, CommandRunner, ProcessRunner, Reply, ScriptedRunner,
    tool_available,
};
pub mod error;
pub use error::LifecycleError;
pub mod lifecycle;
pub use lifecycle::{AuxiliaryStack, Environment, LifecycleController, LifecycleState};
pub mod pods;
pub mod probe;
pub use probe::{HttpHealthCheck, PodStatusCheck, ReadinessCheck, ReadinessProber};
pub mod resources;
pub use resources::{CleanupAction, ScenarioResources};
pub mod scenario;
pub use scenario::{LogPolicy, ScenarioHooks, ScenarioOutcome, ScenarioScope};

/// Repository root: two levels above this crate's manifest.
pub fn workspace_root() -> &'static Utf8Path {
    static ROOT: Lazy<Utf8PathBuf> = Lazy::new(|| {
        let manifest_dir = Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        manifest_dir
            .parent()
            .and_then(|p| p.parent())
            .map(Utf8PathBuf::from)
            .unwrap_or(manifest_dir)
    });
    ROOT.as_path()
}

/// Make a scenario name safe to use as a file name.
pub fn sanitize(input: &str) -> String {
    let mut out = String::new();
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

fn write_text(path: &Utf8Path, contents: impl AsRef<[u8]>) -> Result<(), LifecycleError> {
    fs::write(path, contents).map_err(|source| LifecycleError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize("Scenario: pom with deps/1"), "Scenario__pom_with_deps_1");
        assert_eq!(sanitize("__x__"), "x");
    }
}
