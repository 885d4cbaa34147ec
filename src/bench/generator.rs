//! Command lines for the iperf-style traffic generator.

use std::net::Ipv4Addr;
use std::time::Duration;

use super::types::Transport;

/// Round a duration up to whole seconds, at least one
pub fn whole_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

/// `iperf -s [-u]`
pub fn server_argv(generator: &str, transport: Transport) -> Vec<String> {
    let mut argv = vec![generator.to_string(), "-s".to_string()];
    if transport == Transport::Datagram {
        argv.push("-u".to_string());
    }
    argv
}

/// `iperf -c <ip> -t <secs> [-u] [-b <rate>]`
pub fn client_argv(
    generator: &str,
    server: Ipv4Addr,
    duration: Duration,
    transport: Transport,
    udp_bandwidth: Option<&str>,
) -> Vec<String> {
    let mut argv = vec![
        generator.to_string(),
        "-c".to_string(),
        server.to_string(),
        "-t".to_string(),
        whole_seconds(duration).to_string(),
    ];
    if transport == Transport::Datagram {
        argv.push("-u".to_string());
        if let Some(rate) = udp_bandwidth {
            argv.push("-b".to_string());
            argv.push(rate.to_string());
        }
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_seconds() {
        assert_eq!(whole_seconds(Duration::from_secs(30)), 30);
        assert_eq!(whole_seconds(Duration::from_millis(2500)), 3);
        assert_eq!(whole_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn test_server_argv() {
        assert_eq!(server_argv("iperf", Transport::Stream), vec!["iperf", "-s"]);
        assert_eq!(server_argv("iperf", Transport::Datagram), vec!["iperf", "-s", "-u"]);
    }

    #[test]
    fn test_client_argv() {
        let ip = Ipv4Addr::new(10, 0, 0, 4);
        assert_eq!(
            client_argv("iperf", ip, Duration::from_secs(30), Transport::Stream, Some("100M")),
            vec!["iperf", "-c", "10.0.0.4", "-t", "30"]
        );
        assert_eq!(
            client_argv("iperf", ip, Duration::from_secs(30), Transport::Datagram, Some("100M")),
            vec!["iperf", "-c", "10.0.0.4", "-t", "30", "-u", "-b", "100M"]
        );
    }
}
