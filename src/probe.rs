//! Single-shot latency probes.
//!
//! A probe measures one round trip against one node and nothing else: no
//! retries, no pacing, no history. How often a node gets probed is decided
//! by the selection engine, which invokes a probe at most once per round
//! per unknown node.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::registry::RegistryNode;

/// Why a probe produced no usable latency. Every variant ends with the
/// node on the blacklist; none of them aborts a selection round.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("address {0:?} is not host:port")]
    BadAddress(String),

    #[error("echo to {host} failed: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("unparseable ping statistics")]
    ParseFailure,

    #[error("rtt {rtt:?} exceeds ceiling {ceiling:?}")]
    OverCeiling { rtt: Duration, ceiling: Duration },
}

/// One latency measurement against one node.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, node: &RegistryNode) -> Result<Duration, ProbeError>;
}

/// Probes with the platform's echo mechanism.
///
/// In privileged mode the measurement is an ICMP echo issued through the
/// system `ping` binary against the node's host (port stripped). In
/// unprivileged mode it times a TCP connect to the full address instead,
/// which needs no raw-socket rights and exercises the same path an RPC
/// dispatch would take.
#[derive(Debug, Clone)]
pub struct EchoProber {
    privileged: bool,
}

impl EchoProber {
    pub fn new(privileged: bool) -> Self {
        EchoProber { privileged }
    }

    async fn icmp_echo(&self, host: &str) -> Result<Duration, ProbeError> {
        let output = Command::new("ping")
            .arg("-c")
            .arg("1")
            .arg(host)
            .output()
            .await
            .map_err(|err| ProbeError::Unreachable {
                host: host.to_string(),
                reason: err.to_string(),
            })?;

        if !output.status.success() {
            return Err(ProbeError::Unreachable {
                host: host.to_string(),
                reason: format!("ping exited with {}", output.status),
            });
        }

        parse_ping_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn connect_echo(&self, address: &str) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        match TcpStream::connect(address).await {
            Ok(stream) => {
                drop(stream);
                Ok(started.elapsed())
            }
            Err(err) => Err(ProbeError::Unreachable {
                host: address.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Prober for EchoProber {
    async fn probe(&self, node: &RegistryNode) -> Result<Duration, ProbeError> {
        let host = split_host(&node.address)?;
        if self.privileged {
            self.icmp_echo(host).await
        } else {
            self.connect_echo(&node.address).await
        }
    }
}

/// Splits `host:port` and keeps the host, with IPv6 brackets stripped.
/// An address that does not split is a permanent failure for the node.
fn split_host(address: &str) -> Result<&str, ProbeError> {
    let bad = || ProbeError::BadAddress(address.to_string());

    let (host, port) = address.rsplit_once(':').ok_or_else(bad)?;
    if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return Err(bad());
    }
    Ok(host.trim_start_matches('[').trim_end_matches(']'))
}

static STATS_LINE: Lazy<Regex> = Lazy::new(|| {
    // mac:     round-trip min/avg/max/stddev = 0.036/0.036/0.036/0.000 ms
    // linux:   rtt min/avg/max/mdev = 0.033/0.033/0.033/0.000 ms
    // busybox: round-trip min/avg/max = 0.040/0.040/0.040 ms
    Regex::new(r"min/avg/max(?:/\w+)?\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)(?:/[0-9.]+)?\s*(\w+)")
        .expect("statistics pattern compiles")
});

/// Extracts the average round trip from a `ping` statistics line. The unit
/// suffix is honored; anything that does not match is a `ParseFailure`.
pub fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    let caps = STATS_LINE.captures(output).ok_or(ProbeError::ParseFailure)?;
    let avg: f64 = caps[2].parse().map_err(|_| ProbeError::ParseFailure)?;
    let micros = match &caps[4] {
        "ms" => avg * 1_000.0,
        "s" => avg * 1_000_000.0,
        _ => return Err(ProbeError::ParseFailure),
    };
    Ok(Duration::from_micros(micros.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_OUTPUT: &str = "PING 127.0.0.1 (127.0.0.1): 56 data bytes\n\
64 bytes from 127.0.0.1: icmp_seq=0 ttl=64 time=0.036 ms\n\n\
--- 127.0.0.1 ping statistics ---\n\
1 packets transmitted, 1 packets received, 0.0% packet loss\n\
round-trip min/avg/max/stddev = 0.036/0.036/0.036/0.000 ms";

    const LINUX_OUTPUT: &str = "PING 127.0.0.1 (127.0.0.1) 56(84) bytes of data.\n\
64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=0.033 ms\n\n\
--- 127.0.0.1 ping statistics ---\n\
1 packets transmitted, 1 received, 0% packet loss, time 0ms\n\
rtt min/avg/max/mdev = 0.033/0.033/0.033/0.000 ms";

    const BUSYBOX_OUTPUT: &str = "PING 127.0.0.1 (127.0.0.1): 56 data bytes\n\
64 bytes from 127.0.0.1: seq=0 ttl=64 time=0.040 ms\n\n\
--- 127.0.0.1 ping statistics ---\n\
1 packets transmitted, 1 packets received, 0% packet loss\n\
round-trip min/avg/max = 0.040/0.040/0.040 ms";

    #[test]
    fn parses_the_three_platform_formats() {
        assert_eq!(
            parse_ping_output(MAC_OUTPUT).unwrap(),
            Duration::from_micros(36)
        );
        assert_eq!(
            parse_ping_output(LINUX_OUTPUT).unwrap(),
            Duration::from_micros(33)
        );
        assert_eq!(
            parse_ping_output(BUSYBOX_OUTPUT).unwrap(),
            Duration::from_micros(40)
        );
    }

    #[test]
    fn honors_second_units() {
        let out = "round-trip min/avg/max = 1.2/1.5/1.9 s";
        assert_eq!(
            parse_ping_output(out).unwrap(),
            Duration::from_micros(1_500_000)
        );
    }

    #[test]
    fn malformed_output_is_a_parse_failure() {
        for garbage in [
            "",
            "no statistics here",
            "min/avg/max = ms",
            "round-trip min/avg/max = 0.040 furlongs",
        ] {
            assert!(matches!(
                parse_ping_output(garbage),
                Err(ProbeError::ParseFailure)
            ));
        }
    }

    #[test]
    fn split_host_accepts_hostnames_and_bracketed_ipv6() {
        assert_eq!(split_host("example.com:8080").unwrap(), "example.com");
        assert_eq!(split_host("10.0.0.1:80").unwrap(), "10.0.0.1");
        assert_eq!(split_host("[::1]:8080").unwrap(), "::1");
    }

    #[test]
    fn split_host_rejects_malformed_addresses() {
        for addr in ["example.com", ":8080", "host:", "host:eighty", "::1"] {
            assert!(matches!(split_host(addr), Err(ProbeError::BadAddress(_))));
        }
    }

    #[tokio::test]
    async fn connect_probe_measures_a_listening_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let prober = EchoProber::new(false);
        let node = RegistryNode::new("n1", addr.to_string());
        let rtt = prober.probe(&node).await.expect("probe succeeds");
        assert!(rtt < Duration::from_secs(1));

        accept.await.unwrap();
    }

    #[tokio::test]
    async fn connect_probe_reports_refused_connections() {
        let prober = EchoProber::new(false);
        // bind-then-drop to get a port with no listener
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let node = RegistryNode::new("n1", addr.to_string());
        assert!(matches!(
            prober.probe(&node).await,
            Err(ProbeError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn bad_address_fails_before_any_transport() {
        let prober = EchoProber::new(true);
        let node = RegistryNode::new("n1", "not-an-address");
        assert!(matches!(
            prober.probe(&node).await,
            Err(ProbeError::BadAddress(_))
        ));
    }
}
