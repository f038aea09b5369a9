use std::{fs, sync::Arc};

use analytics_integration::harness::{
    Environment, LifecycleController, LifecycleError, LogPolicy, Reply, ScenarioHooks,
    ScenarioOutcome, ScriptedRunner,
};
use analytics_integration::settings::HarnessSettings;
use anyhow::anyhow;
use camino::Utf8PathBuf;

fn hooks(policy: LogPolicy) -> anyhow::Result<(ScenarioHooks<Environment>, Arc<ScriptedRunner>)> {
    let settings = HarnessSettings {
        compose_file: Utf8PathBuf::from("/repo/docker-compose.yml"),
        ..HarnessSettings::default()
    };
    let config = settings.resolve()?;
    let runner = Arc::new(ScriptedRunner::new());
    let env = Environment::new(&config, runner.clone());
    Ok((ScenarioHooks::new(env, policy), runner))
}

fn position(rendered: &[String], needle: &str) -> usize {
    rendered
        .iter()
        .position(|line| line.contains(needle))
        .unwrap_or_else(|| panic!("{needle} was never run: {rendered:?}"))
}

#[test]
fn failed_scenario_dumps_tail_before_cleanup() -> anyhow::Result<()> {
    let logs = tempfile::tempdir()?;
    let logs_dir = Utf8PathBuf::from_path_buf(logs.path().to_path_buf())
        .map_err(|path| anyhow!("non utf-8 temp dir {}", path.display()))?;
    let policy = LogPolicy::new(false, false, 20, Some(logs_dir.clone()));
    let (mut hooks, runner) = hooks(policy)?;
    runner.reply(" logs", Reply::Output("coreapi-server | boom\n".into()));

    let result: anyhow::Result<()> =
        hooks.run_scenario("Scenario: component analysis", |env, resources| {
            env.run_auxiliary_service("worker-api", &[], resources)?;
            Err(anyhow!("analysis never finished"))
        });

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "analysis never finished");

    let rendered = runner.rendered();
    assert!(position(&rendered, "logs --tail=20") < position(&rendered, "kill worker-api"));
    assert_eq!(runner.count_matching("rm -fv worker-api"), 1);

    let dumped = fs::read_to_string(logs_dir.join("Scenario__component_analysis.log"))?;
    assert!(dumped.starts_with("# scenario Scenario: component analysis dumped at "));
    assert!(dumped.ends_with("coreapi-server | boom\n"));
    Ok(())
}

#[test]
fn passing_scenario_only_cleans_up() -> anyhow::Result<()> {
    let (mut hooks, runner) = hooks(LogPolicy::new(false, true, 0, None))?;

    let value = hooks.run_scenario("happy path", |env, resources| {
        env.run_auxiliary_service("worker-api", &[], resources)?;
        Ok(42)
    })?;

    assert_eq!(value, 42);
    assert_eq!(runner.count_matching(" logs"), 0);
    assert_eq!(runner.count_matching("kill worker-api"), 1);
    Ok(())
}

#[test]
fn dump_logs_policy_dumps_after_every_scenario() -> anyhow::Result<()> {
    let (mut hooks, runner) = hooks(LogPolicy::new(true, false, 0, None))?;

    let scope = hooks.before_scenario("skipped one");
    hooks.after_scenario(scope, ScenarioOutcome::Skipped)?;

    assert_eq!(
        runner.rendered(),
        vec!["docker-compose -f /repo/docker-compose.yml logs --tail=50"]
    );
    Ok(())
}

#[test]
fn cleanup_runs_even_when_log_dump_fails() -> anyhow::Result<()> {
    let (mut hooks, runner) = hooks(LogPolicy::new(false, true, 0, None))?;
    runner.reply(
        "logs --tail",
        Reply::Exit {
            code: 1,
            output: "daemon gone".into(),
        },
    );
    let mut scope = hooks.before_scenario("dump fails");
    hooks
        .controller()
        .run_auxiliary_service("worker-api", &[], scope.resources())?;

    let err = hooks
        .after_scenario(scope, ScenarioOutcome::Failed)
        .unwrap_err();

    match err {
        LifecycleError::LogDumpFailed { command, output } => {
            assert!(command.ends_with("logs --tail=50"));
            assert_eq!(output, "daemon gone");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(runner.count_matching("kill worker-api"), 1);
    assert_eq!(runner.count_matching("rm -fv worker-api"), 1);
    Ok(())
}

#[test]
fn cleanup_failures_surface_after_scenario() -> anyhow::Result<()> {
    let (mut hooks, runner) = hooks(LogPolicy::default())?;
    runner.reply(
        "kill worker-api",
        Reply::Exit {
            code: 1,
            output: "no such container".into(),
        },
    );
    let mut scope = hooks.before_scenario("cleanup fails");
    hooks
        .controller()
        .run_auxiliary_service("worker-api", &[], scope.resources())?;
    hooks
        .controller()
        .run_auxiliary_service("worker-api", &[], scope.resources())?;

    let err = hooks
        .after_scenario(scope, ScenarioOutcome::Passed)
        .unwrap_err();

    match err {
        LifecycleError::CleanupFailed { failures } => assert_eq!(failures.len(), 2),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(runner.count_matching("kill worker-api"), 2);
    Ok(())
}

#[test]
fn after_all_reports_teardown_failure() -> anyhow::Result<()> {
    let (mut hooks, runner) = hooks(LogPolicy::default())?;
    runner.reply(
        "rm -fv",
        Reply::Exit {
            code: 2,
            output: "volume in use".into(),
        },
    );

    let err = hooks.after_all().unwrap_err();

    match err {
        LifecycleError::TeardownFailed { command, output } => {
            assert_eq!(command, "docker-compose -f /repo/docker-compose.yml rm -fv");
            assert_eq!(output, "volume in use");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(hooks.controller().state().to_string(), "tearing-down");
    Ok(())
}
