//! Terminal rendering of helper state.
//!
//! Turns [`Status`], [`Stats`] and [`IpInfo`] into aligned, human-readable
//! blocks for the `status`, `stats` and `ip-info` commands. Credentials never
//! reach this module.

use std::fmt::Write as _;

use crate::constants::MSG_NO_DATA;
use crate::state::{IpInfo, Stats, Status};

// ── Public entry points ─────────────────────────────────────────────────────

/// Renders a status snapshot.
pub fn format_status(status: &Status) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  State:          {}", status.kind());

    if let Some(addr) = status.server_addr() {
        let _ = writeln!(out, "  Server:         {addr}");
    }
    if let Some(vip) = status.assigned_vip() {
        let _ = writeln!(out, "  Assigned VIP:   {vip}");
    }
    if let Some(server) = status.server() {
        let _ = writeln!(out, "  Server VIP:     {}", or_placeholder(&server.server_vip));
        let _ = writeln!(out, "  Helper:         v{}", or_placeholder(&server.helper_version));
        let _ = writeln!(out, "  Server build:   v{}", or_placeholder(&server.server_version));
    }
    if let Some(message) = status.error_message() {
        let _ = writeln!(out, "  Error:          {message}");
    }
    out
}

/// Renders traffic counters.
pub fn format_stats(stats: &Stats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  Sent:           {}", format_bytes(stats.bytes_sent));
    let _ = writeln!(out, "  Received:       {}", format_bytes(stats.bytes_recv));
    let _ = writeln!(out, "  Uptime:         {}", format_duration(stats.uptime_seconds));
    out
}

/// Renders a geolocation result.
pub fn format_ip_info(info: &IpInfo) -> String {
    if info.is_empty() {
        return format!("  No geolocation data ({MSG_NO_DATA})\n");
    }
    let mut out = String::new();
    let _ = writeln!(out, "  IP:             {}", or_placeholder(&info.query));
    let _ = writeln!(
        out,
        "  Location:       {}",
        info.location().as_deref().unwrap_or(MSG_NO_DATA)
    );
    let _ = writeln!(out, "  ISP:            {}", or_placeholder(&info.isp));
    out
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn or_placeholder(value: &str) -> &str {
    if value.is_empty() {
        MSG_NO_DATA
    } else {
        value
    }
}

/// Formats a byte count with binary units.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Formats seconds as `HH:MM:SS`, with a day prefix past 24h.
pub fn format_duration(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ServerIdentity;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(3_725), "01:02:05");
        assert_eq!(format_duration(90_061), "1d 01:01:01");
    }

    #[test]
    fn test_connected_status_lists_identity() {
        let status = Status::Connected {
            assigned_vip: "10.0.0.42".into(),
            server: ServerIdentity {
                server_vip: "10.0.0.1".into(),
                server_addr: "vpn.example:443".into(),
                helper_version: "1.2.0".into(),
                server_version: String::new(),
            },
        };
        let text = format_status(&status);
        assert!(text.contains("connected"));
        assert!(text.contains("10.0.0.42"));
        assert!(text.contains("vpn.example:443"));
        assert!(text.contains("v---"));
    }

    #[test]
    fn test_error_status_shows_message() {
        let text = format_status(&Status::Error {
            message: "handshake timed out".into(),
        });
        assert!(text.contains("error"));
        assert!(text.contains("handshake timed out"));
        assert!(!text.contains("Assigned VIP"));
    }

    #[test]
    fn test_empty_ip_info() {
        assert!(format_ip_info(&IpInfo::default()).contains("No geolocation data"));
    }
}
