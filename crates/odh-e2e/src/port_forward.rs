//! `kubectl port-forward` to in-cluster services that have no route, or
//! whose route sits behind an auth proxy the test wants to bypass (a model
//! registry's plain REST port, a predictor in RawDeployment mode).
//!
//! The OS picks the local port (`:remote` syntax); it is read back from
//! kubectl's "Forwarding from" line.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use odh_common::Error;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, trace};

/// How long kubectl gets to report the forwarded port
const PORT_REPORT_TIMEOUT: Duration = Duration::from_secs(10);

static FORWARDING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Forwarding from (?:\[[0-9a-fA-F:]*\]|[0-9.]+|localhost):(\d+) ->")
        .expect("forwarding pattern compiles")
});

fn port_forward_error(msg: impl Into<String>) -> Error {
    Error::internal_with_context("port_forward", msg)
}

/// A running `kubectl port-forward`; the process is killed on drop
#[derive(Debug)]
pub struct PortForward {
    child: Child,
    local_port: u16,
    target: String,
}

impl PortForward {
    /// Forward an OS-assigned local port to `remote_port` of `target`
    /// (e.g. `svc/my-registry`) in `namespace`.
    ///
    /// Without a kubeconfig, kubectl uses its own default resolution.
    pub async fn start(
        kubeconfig: Option<&str>,
        namespace: &str,
        target: &str,
        remote_port: u16,
    ) -> Result<Self, Error> {
        let mut cmd = Command::new("kubectl");
        if let Some(path) = kubeconfig {
            cmd.arg("--kubeconfig").arg(path);
        }
        cmd.arg("port-forward")
            .arg(target)
            .arg(format!(":{remote_port}"))
            .arg("--namespace")
            .arg(namespace)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| port_forward_error(format!("cannot run kubectl: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| port_forward_error("kubectl stdout is not piped"))?;
        let mut lines = BufReader::new(stdout).lines();

        // Dropping `child` on any early return kills kubectl
        let local_port = tokio::time::timeout(PORT_REPORT_TIMEOUT, first_forwarded_port(&mut lines))
            .await
            .map_err(|_| {
                port_forward_error(format!(
                    "kubectl reported no local port for {namespace}/{target} within {PORT_REPORT_TIMEOUT:?}"
                ))
            })??;

        // kubectl logs every connection; keep its stdout pipe from filling up
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(%line, "kubectl port-forward");
            }
        });

        info!(target, namespace, local_port, remote_port, "port-forward started");
        Ok(Self {
            child,
            local_port,
            target: target.to_string(),
        })
    }

    /// Local port
    pub fn port(&self) -> u16 {
        self.local_port
    }

    /// `http://127.0.0.1:<port>`
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.local_port)
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        debug!(target = %self.target, port = self.local_port, "stopping port-forward");
        let _ = self.child.start_kill();
    }
}

async fn first_forwarded_port(lines: &mut Lines<BufReader<ChildStdout>>) -> Result<u16, Error> {
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| port_forward_error(format!("reading kubectl output: {e}")))?
    {
        if line.contains("Forwarding from") {
            return parse_forwarded_port(&line);
        }
        trace!(%line, "waiting for forwarded port");
    }
    Err(port_forward_error("kubectl exited before forwarding a port"))
}

/// Local port from `Forwarding from 127.0.0.1:54321 -> 8080` (or `[::1]:54321`)
pub fn parse_forwarded_port(line: &str) -> Result<u16, Error> {
    let digits = FORWARDING_LINE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| port_forward_error(format!("unexpected kubectl output: {line}")))?;
    digits
        .as_str()
        .parse()
        .map_err(|e| port_forward_error(format!("invalid port {}: {e}", digits.as_str())))
}
