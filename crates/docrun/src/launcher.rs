//! Example server lifecycle: port allocation, spawn, readiness, teardown.
//!
//! Each runnable example gets its own server process. The process is started
//! from the configured command template, polled until it accepts TCP
//! connections, and stopped with SIGTERM (falling back to a kill) once its
//! directives have run. Children are spawned kill-on-drop, so an error
//! between launch and shutdown never leaves a server behind.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{DocrunError, DocrunResult};
use crate::types::ExampleFile;

/// Lines of server output kept for startup error messages.
const TAIL_LINES: usize = 20;

/// How long a failed start waits for the server's pipes to close.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Ports handed out from the top of a range down. A port is never handed out twice.
#[derive(Debug, Clone)]
pub struct PortPool {
    start: u16,
    end: u16,
    next: Option<u16>,
}

impl PortPool {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            next: (start <= end).then_some(end),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.port_start, config.port_end)
    }

    pub fn take(&mut self) -> Option<u16> {
        let port = self.next?;
        self.next = (port > self.start).then(|| port - 1);
        Some(port)
    }

    /// Take the next port nothing is listening on.
    pub fn take_free(&mut self, host: &str) -> DocrunResult<u16> {
        while let Some(port) = self.take() {
            if port_is_free(host, port) {
                return Ok(port);
            }
            debug!(port, "port in use, skipping");
        }
        Err(DocrunError::PortsExhausted {
            start: self.start,
            end: self.end,
        })
    }

    pub fn remaining(&self) -> usize {
        self.next.map_or(0, |next| usize::from(next - self.start) + 1)
    }
}

fn port_is_free(host: &str, port: u16) -> bool {
    std::net::TcpListener::bind((host, port)).is_ok()
}

/// Values substituted into the server command template.
#[derive(Debug, Clone)]
pub struct CommandVars<'a> {
    pub module: &'a str,
    pub app: &'a str,
    pub file: &'a Path,
    pub host: &'a str,
    pub port: u16,
}

/// Substitute placeholders and split into program and arguments.
pub fn render_command(
    template: &[String],
    vars: &CommandVars<'_>,
) -> DocrunResult<(String, Vec<String>)> {
    let port = vars.port.to_string();
    let file = vars.file.display().to_string();
    let rendered: Vec<String> = template
        .iter()
        .map(|part| {
            part.replace("{module}", vars.module)
                .replace("{app}", vars.app)
                .replace("{file}", &file)
                .replace("{host}", vars.host)
                .replace("{port}", &port)
        })
        .collect();

    let (program, args) = rendered
        .split_first()
        .ok_or_else(|| DocrunError::config("server.command must name a program"))?;
    Ok((program.clone(), args.to_vec()))
}

/// Bounded buffer of the most recent server output lines.
#[derive(Debug, Clone, Default)]
struct OutputTail(Arc<Mutex<VecDeque<String>>>);

impl OutputTail {
    fn push(&self, line: String) {
        if let Ok(mut buf) = self.0.lock() {
            if buf.len() == TAIL_LINES {
                buf.pop_front();
            }
            buf.push_back(line);
        }
    }

    fn joined(&self) -> String {
        self.0
            .lock()
            .map(|buf| buf.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

/// Forward a child pipe into debug logs until it closes.
fn drain<R>(reader: R, stream: &'static str, port: u16, tail: OutputTail) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "docrun::server", port, stream, "{line}");
            tail.push(line);
        }
    })
}

/// A started example server.
#[derive(Debug)]
pub struct RunningServer {
    child: Child,
    host: String,
    port: u16,
    file: PathBuf,
    tail: OutputTail,
    drains: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl RunningServer {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Poll until the server accepts connections, exits, or time runs out.
    async fn wait_ready(&mut self, timeout: Duration, interval: Duration) -> Result<(), String> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    return Err(format!("server exited with {status} before accepting connections"))
                }
                Ok(None) => {}
                Err(e) => return Err(format!("cannot poll server process: {e}")),
            }

            if TcpStream::connect((self.host.as_str(), self.port)).await.is_ok() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(format!(
                    "server not accepting connections on port {} after {:?}",
                    self.port, timeout
                ));
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Let the drain tasks read whatever is left in the closed pipes.
    async fn settle_output(&mut self) {
        for handle in std::mem::take(&mut self.drains) {
            if tokio::time::timeout(DRAIN_GRACE, handle).await.is_err() {
                debug!(port = self.port, "server output still open, tail may be partial");
            }
        }
    }

    fn failure_reason(&self, reason: String) -> String {
        let tail = self.tail.joined();
        if tail.is_empty() {
            reason
        } else {
            format!("{reason}\nlast server output:\n{tail}")
        }
    }

    /// Stop the server: SIGTERM, wait for the grace period, then kill.
    pub async fn shutdown(mut self) -> DocrunResult<()> {
        self.stop().await
    }

    async fn stop(&mut self) -> DocrunResult<()> {
        if let Some(status) = self.child.try_wait()? {
            debug!(port = self.port, %status, "server already exited");
            return Ok(());
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                terminate(pid).await;
            }
        }

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(port = self.port, file = %self.file.display(), %status, "server stopped");
            }
            Err(_) => {
                warn!(
                    port = self.port,
                    file = %self.file.display(),
                    "server ignored SIGTERM for {:?}, killing",
                    self.grace
                );
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

/// Send SIGTERM to a process.
#[cfg(unix)]
async fn terminate(pid: u32) {
    match Command::new("kill").arg(pid.to_string()).output().await {
        Ok(output) if output.status.success() => {}
        Ok(output) => debug!(
            pid,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "kill reported failure (process may have already exited)"
        ),
        Err(e) => debug!(pid, "failed to run kill: {e}"),
    }
}

/// Start the server for `example` on a port from `pool`.
///
/// A server that exits early or never accepts connections is stopped and
/// retried on the next free port, up to `startup_attempts` times. A command
/// that cannot be spawned at all fails immediately.
pub async fn launch(
    example: &ExampleFile,
    config: &ServerConfig,
    pool: &mut PortPool,
) -> DocrunResult<RunningServer> {
    let app = example.require_app()?;
    let mut last_reason = String::from("no attempt made");

    for attempt in 1..=config.startup_attempts {
        let port = pool.take_free(&config.host)?;
        let vars = CommandVars {
            module: &example.module,
            app: &app.name,
            file: &example.path,
            host: &config.host,
            port,
        };
        let (program, args) = render_command(&config.command, &vars)?;

        info!(
            file = %example.relative.display(),
            port,
            attempt,
            "starting example server"
        );
        debug!(program = %program, ?args, "server command");

        let mut command = Command::new(&program);
        command
            .args(&args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| DocrunError::StartupFailed {
            file: example.path.clone(),
            attempts: attempt,
            reason: format!("cannot spawn {program}: {e}"),
        })?;

        let tail = OutputTail::default();
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(drain(stdout, "stdout", port, tail.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(drain(stderr, "stderr", port, tail.clone()));
        }

        let mut server = RunningServer {
            child,
            host: config.host.clone(),
            port,
            file: example.path.clone(),
            tail,
            drains,
            grace: config.shutdown_grace(),
        };

        match server
            .wait_ready(config.startup_timeout(), config.poll_interval())
            .await
        {
            Ok(()) => {
                info!(file = %example.relative.display(), port, "example server ready");
                return Ok(server);
            }
            Err(reason) => {
                warn!(port, attempt, "example server failed to start: {reason}");
                if let Err(e) = server.stop().await {
                    warn!(port, "failed to stop example server: {e}");
                }
                server.settle_output().await;
                last_reason = server.failure_reason(reason);
            }
        }
    }

    Err(DocrunError::StartupFailed {
        file: example.path.clone(),
        attempts: config.startup_attempts,
        reason: last_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppObject;

    #[test]
    fn test_pool_hands_out_top_down_once() {
        let mut pool = PortPool::new(9000, 9002);
        assert_eq!(pool.remaining(), 3);
        assert_eq!(pool.take(), Some(9002));
        assert_eq!(pool.take(), Some(9001));
        assert_eq!(pool.take(), Some(9000));
        assert_eq!(pool.take(), None);
        assert_eq!(pool.remaining(), 0);
    }

    #[test]
    fn test_empty_pool() {
        let mut pool = PortPool::new(10, 9);
        assert_eq!(pool.take(), None);
        assert!(matches!(
            pool.take_free("127.0.0.1"),
            Err(DocrunError::PortsExhausted { start: 10, end: 9 })
        ));
    }

    #[test]
    fn test_take_free_skips_bound_port() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy = listener.local_addr().unwrap().port();
        let mut pool = PortPool::new(busy, busy);
        assert!(pool.take_free("127.0.0.1").is_err());
    }

    #[test]
    fn test_render_command_substitutes_all_placeholders() {
        let template: Vec<String> = [
            "uvicorn",
            "{module}:{app}",
            "--host",
            "{host}",
            "--port",
            "{port}",
            "--file={file}",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let vars = CommandVars {
            module: "docs.examples.hello",
            app: "app",
            file: Path::new("docs/examples/hello.py"),
            host: "127.0.0.1",
            port: 9998,
        };
        let (program, args) = render_command(&template, &vars).unwrap();
        assert_eq!(program, "uvicorn");
        assert_eq!(
            args,
            vec![
                "docs.examples.hello:app",
                "--host",
                "127.0.0.1",
                "--port",
                "9998",
                "--file=docs/examples/hello.py",
            ]
        );
    }

    #[test]
    fn test_output_tail_is_bounded() {
        let tail = OutputTail::default();
        for i in 0..(TAIL_LINES + 5) {
            tail.push(format!("line {i}"));
        }
        let joined = tail.joined();
        assert_eq!(joined.lines().count(), TAIL_LINES);
        assert!(joined.starts_with("line 5"));
    }

    fn example() -> ExampleFile {
        ExampleFile {
            path: PathBuf::from("hello.py"),
            relative: PathBuf::from("hello.py"),
            module: "hello".to_string(),
            app: Some(AppObject {
                name: "app".to_string(),
                line: 1,
            }),
            directives: vec![],
            cleaned: String::new(),
            language: "python".to_string(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_exiting_early_is_retried_then_fails() {
        let config = ServerConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo booting {port} >&2; exit 3".to_string(),
            ],
            startup_attempts: 2,
            poll_interval_ms: 10,
            startup_timeout_ms: 5_000,
            ..ServerConfig::default()
        };
        let mut pool = PortPool::new(19_000, 19_999);
        let err = launch(&example(), &config, &mut pool).await.unwrap_err();
        match err {
            DocrunError::StartupFailed { attempts, reason, .. } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("exited"));
                assert!(reason.contains("booting"), "stderr missing from {reason:?}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(pool.remaining() <= 998);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_startup_failure_always_carries_stderr() {
        let config = ServerConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo crashed-on-import >&2; exit 1".to_string(),
            ],
            startup_attempts: 1,
            poll_interval_ms: 1,
            ..ServerConfig::default()
        };
        for _ in 0..20 {
            let mut pool = PortPool::new(19_000, 19_999);
            match launch(&example(), &config, &mut pool).await.unwrap_err() {
                DocrunError::StartupFailed { reason, .. } => {
                    assert!(reason.contains("crashed-on-import"), "got {reason:?}")
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_kills_server_ignoring_sigterm() {
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let server = RunningServer {
            child,
            host: "127.0.0.1".to_string(),
            port: 0,
            file: PathBuf::from("stubborn.py"),
            tail: OutputTail::default(),
            drains: Vec::new(),
            grace: Duration::from_millis(300),
        };
        let started = std::time::Instant::now();
        server.shutdown().await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(300), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(10));
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .unwrap();
        assert!(!alive.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_of_cooperative_server_is_prompt() {
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let server = RunningServer {
            child,
            host: "127.0.0.1".to_string(),
            port: 0,
            file: PathBuf::from("polite.py"),
            tail: OutputTail::default(),
            drains: Vec::new(),
            grace: Duration::from_secs(20),
        };
        let started = std::time::Instant::now();
        server.shutdown().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program_fails_immediately() {
        let config = ServerConfig {
            command: vec!["docrun-test-no-such-program".to_string()],
            ..ServerConfig::default()
        };
        let mut pool = PortPool::new(19_000, 19_999);
        let err = launch(&example(), &config, &mut pool).await.unwrap_err();
        match err {
            DocrunError::StartupFailed { attempts, reason, .. } => {
                assert_eq!(attempts, 1);
                assert!(reason.contains("docrun-test-no-such-program"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_launch_requires_app() {
        let mut no_app = example();
        no_app.app = None;
        let mut pool = PortPool::new(19_000, 19_999);
        let err = launch(&no_app, &ServerConfig::default(), &mut pool)
            .await
            .unwrap_err();
        assert!(matches!(err, DocrunError::NoApplication(_)));
        assert_eq!(pool.remaining(), 1000);
    }
}
