//! Centralized Docker CLI client.
//!
//! All Docker CLI interactions go through `DockerClient`, which provides
//! consistent timeout handling, error mapping to [`DockerError`], and a single
//! point where `Command::new("docker")` is constructed.
//!
//! Configuration for a compose project is handed to the child process through
//! `Command::envs`. The tool's own environment is never modified.

use super::DockerError;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Default deadline for short inspection commands.
const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Compose label carrying the project name on every container it creates.
const PROJECT_LABEL: &str = "com.docker.compose.project";

/// One container row from `docker ps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRow {
    pub project: String,
    pub state: String,
    pub ports: String,
}

/// Centralized client for Docker CLI operations.
///
/// `timeout` bounds long-running verbs (`up`, `down`, `pull`); inspection
/// verbs use a fixed short deadline.
#[derive(Debug, Clone)]
pub struct DockerClient {
    timeout: Duration,
}

impl DockerClient {
    pub fn new(timeout: Duration) -> Self {
        DockerClient { timeout }
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    async fn run_with(
        &self,
        args: &[&str],
        envs: &BTreeMap<String, String>,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<Output, DockerError> {
        let cmd_str = format!("docker {}", args.join(" "));

        let mut command = tokio::process::Command::new("docker");
        command
            .args(args)
            .envs(envs)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let work = async {
            let mut child = command.spawn()?;
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input.as_bytes()).await?;
                // Dropping the pipe closes stdin so the child sees EOF
                drop(pipe);
            }
            Ok::<_, std::io::Error>(child.wait_with_output().await?)
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DockerError::exec_failed(cmd_str, e)),
            Err(_) => Err(DockerError::timeout(cmd_str, timeout)),
        }
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        self.run_with(args, &BTreeMap::new(), None, timeout).await
    }

    /// Run a docker command, returning Output only if exit 0.
    async fn run_success(
        &self,
        args: &[&str],
        envs: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Output, DockerError> {
        let output = self.run_with(args, envs, None, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let cmd_str = format!("docker {}", args.join(" "));
            Err(DockerError::failed(cmd_str, &output))
        }
    }

    fn lines(output: &Output) -> Vec<String> {
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    // ========================================================================
    // Compose projects
    // ========================================================================

    /// `docker compose up -d`. Compose recreates containers whose image or
    /// configuration changed and leaves the rest untouched.
    pub async fn compose_up(
        &self,
        project: &str,
        compose_file: &Path,
        envs: &BTreeMap<String, String>,
    ) -> Result<(), DockerError> {
        let file = compose_file.to_string_lossy().into_owned();
        self.run_success(
            &["compose", "-p", project, "-f", file.as_str(), "up", "-d"],
            envs,
            self.timeout,
        )
        .await
        .map(|_| ())
    }

    /// `docker compose down`, optionally removing named volumes.
    ///
    /// Works from the project name alone, so no compose file or variables are
    /// needed to tear a project down.
    pub async fn compose_down(&self, project: &str, remove_volumes: bool) -> Result<(), DockerError> {
        let mut args = vec!["compose", "-p", project, "down", "--remove-orphans"];
        if remove_volumes {
            args.push("-v");
        }
        self.run_success(&args, &BTreeMap::new(), self.timeout)
            .await
            .map(|_| ())
    }

    /// Pull newer images for the given services of a project.
    pub async fn compose_pull(
        &self,
        project: &str,
        compose_file: &Path,
        services: &[String],
        envs: &BTreeMap<String, String>,
    ) -> Result<(), DockerError> {
        let file = compose_file.to_string_lossy().into_owned();
        let mut args = vec!["compose", "-p", project, "-f", file.as_str(), "pull"];
        args.extend(services.iter().map(String::as_str));
        self.run_success(&args, envs, self.timeout).await.map(|_| ())
    }

    /// Container id backing a compose service, if one exists.
    pub async fn compose_container_id(
        &self,
        project: &str,
        service: &str,
    ) -> Result<Option<String>, DockerError> {
        let project_filter = format!("label={}={}", PROJECT_LABEL, project);
        let service_filter = format!("label=com.docker.compose.service={}", service);
        let output = self
            .run_success(
                &[
                    "ps",
                    "-a",
                    "--filter",
                    &project_filter,
                    "--filter",
                    &service_filter,
                    "--format",
                    "{{.ID}}",
                ],
                &BTreeMap::new(),
                INSPECT_TIMEOUT,
            )
            .await?;
        Ok(Self::lines(&output).into_iter().next())
    }

    /// Fetch the last `tail` lines of a compose service's logs.
    pub async fn compose_logs(
        &self,
        project: &str,
        service: &str,
        tail: usize,
    ) -> Result<String, DockerError> {
        let tail_str = tail.to_string();
        let output = self
            .run(
                &["compose", "-p", project, "logs", "--no-color", "--tail", &tail_str, service],
                INSPECT_TIMEOUT,
            )
            .await?;
        // compose writes container output to stdout and its own notices to stderr
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Health status reported by a container's HEALTHCHECK.
    ///
    /// Returns `None` when the container has no health state yet (or none at all).
    pub async fn health_status(&self, container: &str) -> Result<Option<String>, DockerError> {
        let output = self
            .run_success(
                &[
                    "inspect",
                    "-f",
                    "{{if .State.Health}}{{.State.Health.Status}}{{end}}",
                    container,
                ],
                &BTreeMap::new(),
                INSPECT_TIMEOUT,
            )
            .await?;
        let status = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if status.is_empty() { None } else { Some(status) })
    }

    /// List compose-managed containers whose project name starts with `prefix`.
    pub async fn ps_projects(&self, prefix: &str) -> Result<Vec<ContainerRow>, DockerError> {
        let format = format!(
            "{{{{.Label \"{}\"}}}}\t{{{{.State}}}}\t{{{{.Ports}}}}",
            PROJECT_LABEL
        );
        let output = self
            .run_success(
                &["ps", "-a", "--filter", &format!("label={}", PROJECT_LABEL), "--format", &format],
                &BTreeMap::new(),
                INSPECT_TIMEOUT,
            )
            .await?;
        Ok(parse_ps_rows(&String::from_utf8_lossy(&output.stdout), prefix))
    }

    // ========================================================================
    // Exec
    // ========================================================================

    /// Run a command inside a container, feeding `input` on stdin.
    ///
    /// `envs` are set on the docker client process; pass their names with
    /// `-e NAME` in `cmd` to forward them without putting values on a command line.
    pub async fn exec_stdin(
        &self,
        container: &str,
        exec_flags: &[&str],
        cmd: &[&str],
        envs: &BTreeMap<String, String>,
        input: &str,
    ) -> Result<Output, DockerError> {
        let mut args = vec!["exec", "-i"];
        args.extend_from_slice(exec_flags);
        args.push(container);
        args.extend_from_slice(cmd);
        self.run_with(&args, envs, Some(input), self.timeout).await
    }

    // ========================================================================
    // Volume management
    // ========================================================================

    /// Names of volumes starting with `prefix`.
    pub async fn volume_ls(&self, prefix: &str) -> Result<Vec<String>, DockerError> {
        let filter = format!("name={}", prefix);
        let output = self
            .run_success(
                &["volume", "ls", "--filter", &filter, "--format", "{{.Name}}"],
                &BTreeMap::new(),
                INSPECT_TIMEOUT,
            )
            .await?;
        // The name filter matches substrings; keep only true prefixes
        Ok(Self::lines(&output)
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    /// Remove a volume. Returns `Ok(())` if the volume doesn't exist.
    pub async fn volume_rm(&self, volume: &str) -> Result<(), DockerError> {
        let output = self.run(&["volume", "rm", volume], INSPECT_TIMEOUT).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no such volume") || stderr.contains("No such volume") {
            return Ok(());
        }
        Err(DockerError::failed(format!("docker volume rm {}", volume), &output))
    }
}

/// Parse `project\tstate\tports` rows, keeping projects that start with `prefix`.
fn parse_ps_rows(stdout: &str, prefix: &str) -> Vec<ContainerRow> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let project = parts.next()?.trim();
            let state = parts.next()?.trim();
            let ports = parts.next().unwrap_or("").trim();
            if project.is_empty() || !project.starts_with(prefix) {
                return None;
            }
            Some(ContainerRow {
                project: project.to_string(),
                state: state.to_string(),
                ports: ports.to_string(),
            })
        })
        .collect()
}
