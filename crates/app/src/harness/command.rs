use std::{collections::VecDeque, fmt, process::Command};

use parking_lot::Mutex;
use tracing::debug;

use super::LifecycleError;

/// An external command: program, argument vector and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// All of stdout, then all of stderr.
    ///
    /// The streams are captured separately, so lines are grouped per stream rather than in the
    /// order the process wrote them.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        text.push_str(&self.stderr);
        text
    }
}

/// Single primitive through which every orchestration action is executed.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &CommandLine) -> Result<CommandOutput, LifecycleError>;
}

/// Runs commands as child processes, blocking until they exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &CommandLine) -> Result<CommandOutput, LifecycleError> {
        debug!(command = %command, "running external command");
        let output = Command::new(command.program())
            .args(command.get_args())
            .envs(command.get_envs().iter().map(|(k, v)| (k, v)))
            .output()
            .map_err(|source| LifecycleError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let captured = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if output.status.success() {
            return Ok(captured);
        }

        debug!(
            command = %command,
            code = ?output.status.code(),
            "external command exited unsuccessfully"
        );
        Err(LifecycleError::CommandFailed {
            command: command.to_string(),
            exit_code: output.status.code(),
            output: captured.combined(),
        })
    }
}

/// Quick check to see if an orchestration binary resolves on `PATH`.
pub fn tool_available(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Scripted reply for [`ScriptedRunner`].
#[derive(Debug, Clone)]
pub enum Reply {
    Output(String),
    Exit { code: i32, output: String },
}

#[derive(Debug)]
struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
}

/// Records every command and answers from scripted replies instead of spawning processes.
///
/// Replies are matched by substring against the rendered command line. Queued replies for the
/// same needle are consumed in order; the last one sticks. Unmatched commands succeed with
/// empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    history: Mutex<Vec<CommandLine>>,
    rules: Mutex<Vec<Rule>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, needle: &str, reply: Reply) {
        let mut rules = self.rules.lock();
        if let Some(rule) = rules.iter_mut().find(|rule| rule.needle == needle) {
            rule.replies.push_back(reply);
            return;
        }
        rules.push(Rule {
            needle: needle.to_string(),
            replies: VecDeque::from([reply]),
        });
    }

    pub fn history(&self) -> Vec<CommandLine> {
        self.history.lock().clone()
    }

    /// Rendered command lines, in execution order.
    pub fn rendered(&self) -> Vec<String> {
        self.history.lock().iter().map(ToString::to_string).collect()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.rendered()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    fn next_reply(&self, rendered: &str) -> Option<Reply> {
        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .find(|rule| rendered.contains(rule.needle.as_str()))?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &CommandLine) -> Result<CommandOutput, LifecycleError> {
        self.history.lock().push(command.clone());
        let rendered = command.to_string();
        match self.next_reply(&rendered) {
            None => Ok(CommandOutput::default()),
            Some(Reply::Output(stdout)) => Ok(CommandOutput::from_stdout(stdout)),
            Some(Reply::Exit { code: 0, output }) => Ok(CommandOutput::from_stdout(output)),
            Some(Reply::Exit { code, output }) => Err(LifecycleError::CommandFailed {
                command: rendered,
                exit_code: Some(code),
                output,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_program_and_args() {
        let cmd = CommandLine::new("docker-compose")
            .args(["-f", "docker-compose.yml"])
            .arg("up")
            .env("COMPOSE_PROJECT_NAME", "it");
        assert_eq!(cmd.to_string(), "docker-compose -f docker-compose.yml up");
        assert_eq!(cmd.get_envs().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_captures_output_and_exit_code() {
        let ok = ProcessRunner
            .run(&CommandLine::new("sh").args(["-c", "echo out; echo err >&2"]))
            .unwrap();
        assert_eq!(ok.stdout, "out\n");
        assert_eq!(ok.combined(), "out\nerr\n");

        let err = ProcessRunner
            .run(&CommandLine::new("sh").args(["-c", "echo boom; exit 3"]))
            .unwrap_err();
        match err {
            LifecycleError::CommandFailed {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(output, "boom\n");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn failure_output_groups_stdout_before_stderr() {
        let err = ProcessRunner
            .run(&CommandLine::new("sh").args(["-c", "echo first >&2; echo second; exit 1"]))
            .unwrap_err();
        match err {
            LifecycleError::CommandFailed { output, .. } => assert_eq!(output, "second\nfirst\n"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn process_runner_reports_missing_binary() {
        let err = ProcessRunner
            .run(&CommandLine::new("definitely-not-a-real-binary-4242"))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Spawn { .. }));
    }

    #[test]
    fn scripted_runner_consumes_queue_then_sticks() {
        let runner = ScriptedRunner::new();
        runner.reply("get pods", Reply::Output("first".into()));
        runner.reply("get pods", Reply::Output("second".into()));
        let cmd = CommandLine::new("kubectl").args(["get", "pods"]);
        assert_eq!(runner.run(&cmd).unwrap().stdout, "first");
        assert_eq!(runner.run(&cmd).unwrap().stdout, "second");
        assert_eq!(runner.run(&cmd).unwrap().stdout, "second");
        assert_eq!(runner.count_matching("get pods"), 3);
    }

    #[test]
    fn scripted_runner_maps_non_zero_exit() {
        let runner = ScriptedRunner::new();
        runner.reply(
            "up",
            Reply::Exit {
                code: 1,
                output: "pull access denied".into(),
            },
        );
        let err = runner.run(&CommandLine::new("docker-compose").arg("up"));
        assert!(matches!(
            err,
            Err(LifecycleError::CommandFailed {
                exit_code: Some(1),
                ..
            })
        ));
    }
}
