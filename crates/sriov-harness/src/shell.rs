//! Command execution inside workload pods
//!
//! Scenarios verify VF attachment from inside the pod: the interface must
//! exist, be up and carry the expected MAC.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use sriov_common::{Error, Result, StoreErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Default limit for one exec round trip
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs a command in a pod and returns its stdout
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadShell: Send + Sync {
    /// Run `command` in the pod's default container
    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<String>;
}

/// [`WorkloadShell`] over the pod exec websocket
pub struct KubeShell {
    client: Client,
    timeout: Duration,
}

impl KubeShell {
    /// Shell with the default exec timeout
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    /// Override the exec timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, namespace: &str, pod: &str, command: &[String]) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default().stdin(false).stdout(true).stderr(true);
        let mut attached = pods.exec(pod, command.iter().cloned(), &params).await?;
        let session = format!("exec in {namespace}/{pod}");

        // stdout and stderr drain concurrently
        let (out, err) = (attached.stdout(), attached.stderr());
        let (stdout, stderr) = tokio::join!(drain(out), drain(err));
        let stdout = stdout.map_err(|e| stream_error(&session, "stdout", e))?;
        // stderr is diagnostic only
        let stderr = stderr.unwrap_or_default();

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| Error::store(StoreErrorKind::Transient, &session, e.to_string()))?;

        if let Some(status) = status.filter(|s| s.status.as_deref() == Some("Failure")) {
            return Err(Error::internal_with_context(
                "exec",
                format!(
                    "`{}` in {namespace}/{pod} failed: {} {}",
                    command.join(" "),
                    status.message.unwrap_or_default(),
                    stderr.trim()
                ),
            ));
        }
        Ok(stdout)
    }
}

async fn drain(reader: Option<impl AsyncRead + Unpin>) -> std::io::Result<String> {
    let mut out = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut out).await?;
    }
    Ok(out)
}

fn stream_error(session: &str, stream: &str, e: std::io::Error) -> Error {
    Error::store(
        StoreErrorKind::Transient,
        session,
        format!("reading {stream}: {e}"),
    )
}

#[async_trait]
impl WorkloadShell for KubeShell {
    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<String> {
        debug!(namespace, pod, command = %command.join(" "), "Exec");
        tokio::time::timeout(self.timeout, self.run(namespace, pod, command))
            .await
            .map_err(|_| Error::deadline(format!("exec in {namespace}/{pod}"), self.timeout))?
    }
}

fn ip_link_show(interface: &str) -> Vec<String> {
    ["ip", "link", "show", interface]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// The pod's `interface` exists and is administratively and operationally up
///
/// Transient exec failures and per-exec timeouts read as "not yet" so a
/// poll built on this keeps going.
pub async fn interface_ready(
    shell: &dyn WorkloadShell,
    namespace: &str,
    pod: &str,
    interface: &str,
) -> Result<bool> {
    let output = match shell.exec(namespace, pod, &ip_link_show(interface)).await {
        Ok(output) => output,
        Err(e) if e.is_transient() || e.is_deadline() => {
            debug!(namespace, pod, error = %e, "Exec hiccup, will retry");
            return Ok(false);
        }
        Err(e) => return Err(e),
    };
    let Some(header) = output.lines().next() else {
        return Ok(false);
    };
    let flags_up = header
        .split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .is_some_and(|(flags, _)| flags.split(',').any(|f| f == "UP"));
    Ok(flags_up && !header.contains("state DOWN"))
}

/// MAC address of the pod's `interface`, if it reports one
pub async fn interface_mac(
    shell: &dyn WorkloadShell,
    namespace: &str,
    pod: &str,
    interface: &str,
) -> Result<Option<String>> {
    let output = shell.exec(namespace, pod, &ip_link_show(interface)).await?;
    Ok(output
        .split_whitespace()
        .skip_while(|token| *token != "link/ether")
        .nth(1)
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::{eq, function};

    const UP: &str = "3: net1: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc mq state UP mode DEFAULT group default qlen 1000\n    link/ether 20:04:0f:f1:88:01 brd ff:ff:ff:ff:ff:ff\n";
    const DOWN: &str = "3: net1: <BROADCAST,MULTICAST> mtu 1500 qdisc mq state DOWN mode DEFAULT group default qlen 1000\n    link/ether 20:04:0f:f1:88:02 brd ff:ff:ff:ff:ff:ff\n";

    fn shell_returning(output: &'static str) -> MockWorkloadShell {
        let mut shell = MockWorkloadShell::new();
        shell
            .expect_exec()
            .with(
                eq("e2e-a"),
                eq("client"),
                function(|c: &[String]| c == ip_link_show("net1").as_slice()),
            )
            .returning(move |_, _, _| Ok(output.to_string()));
        shell
    }

    #[tokio::test]
    async fn story_up_interface_is_ready() {
        let shell = shell_returning(UP);
        assert!(interface_ready(&shell, "e2e-a", "client", "net1").await.unwrap());
        assert_eq!(
            interface_mac(&shell, "e2e-a", "client", "net1").await.unwrap().as_deref(),
            Some("20:04:0f:f1:88:01")
        );
    }

    #[tokio::test]
    async fn test_down_or_missing_interface_is_not_ready() {
        assert!(!interface_ready(&shell_returning(DOWN), "e2e-a", "client", "net1")
            .await
            .unwrap());
        assert!(!interface_ready(&shell_returning(""), "e2e-a", "client", "net1")
            .await
            .unwrap());
        assert_eq!(
            interface_mac(&shell_returning(""), "e2e-a", "client", "net1")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_exec_errors_propagate() {
        let mut shell = MockWorkloadShell::new();
        shell
            .expect_exec()
            .returning(|_, pod, _| Err(Error::internal_with_context("exec", format!("{pod} gone"))));
        let err = interface_ready(&shell, "e2e-a", "client", "net1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("client gone"));
    }

    #[tokio::test]
    async fn test_transient_exec_failure_reads_as_not_ready() {
        let mut shell = MockWorkloadShell::new();
        let mut call = 0;
        shell.expect_exec().times(3).returning(move |ns, pod, _| {
            call += 1;
            match call {
                1 => Err(Error::store(
                    StoreErrorKind::Transient,
                    format!("exec in {ns}/{pod}"),
                    "websocket closed",
                )),
                2 => Err(Error::deadline("exec in e2e-a/client", DEFAULT_EXEC_TIMEOUT)),
                _ => Ok(UP.to_string()),
            }
        });

        for _ in 0..2 {
            assert!(!interface_ready(&shell, "e2e-a", "client", "net1").await.unwrap());
        }
        assert!(interface_ready(&shell, "e2e-a", "client", "net1").await.unwrap());
    }

    #[tokio::test]
    async fn test_drain_reads_both_streams_and_tolerates_missing_ones() {
        let out = b"link up\n".as_slice();
        let err = b"warning\n".as_slice();
        let (out, err) = tokio::join!(drain(Some(out)), drain(Some(err)));
        assert_eq!(out.unwrap(), "link up\n");
        assert_eq!(err.unwrap(), "warning\n");
        assert_eq!(drain(None::<&[u8]>).await.unwrap(), "");
    }
}
