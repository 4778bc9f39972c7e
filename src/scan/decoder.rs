//! Stateless classification of single lines of masscan list output.

use std::net::IpAddr;

/// Classification of one raw line of scanner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// One open port on one address.
    Discovery(Discovery),
    /// The scanner reported an operational failure rather than a result.
    Diagnostic(Diagnostic),
    /// Banners, comments, blank lines; discarded without comment.
    Noise,
}

/// Fields extracted from a discovery record:
/// `open <proto> <port> <address> <timestamp>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub port: u16,
    pub address: IpAddr,
    pub timestamp: Timestamp,
}

/// The trailing timestamp field of a discovery record.
///
/// masscan periodically writes a `rate:` status line to the same stream
/// without first terminating the discovery line, which makes the timestamp
/// token come out as something like `17000rate:`. In that case only the
/// numeric prefix is recoverable here; the remaining digits arrive on a
/// later line and the stream layer stitches them back together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timestamp {
    Whole(i64),
    Truncated(String),
}

/// A `FAIL:` line. Permission denial is kept distinct because it is fatal
/// and actionable (rerun with privileges), unlike the generic case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    PermissionDenied,
    Generic(String),
}

/// The rate-annotation marker masscan embeds in status output.
pub const RATE_MARKER: &str = "rate";

/// Classifies a single raw line of scanner output.
///
/// Unparseable discovery fields demote the line to [`Line::Noise`] rather
/// than erroring; masscan's output format is not stable enough to be strict
/// about.
///
/// ```
/// use llamascan::scan::decoder::{classify, Line, Timestamp};
///
/// let Line::Discovery(d) = classify(b"open tcp 11434 203.0.113.7 1700000000") else {
///     panic!("expected a discovery record");
/// };
/// assert_eq!(d.port, 11434);
/// assert_eq!(d.timestamp, Timestamp::Whole(1_700_000_000));
/// ```
#[must_use]
pub fn classify(raw: &[u8]) -> Line {
    let text = String::from_utf8_lossy(raw);

    if text.contains("FAIL: permission denied") {
        return Line::Diagnostic(Diagnostic::PermissionDenied);
    }

    if let Some((_, reason)) = text.split_once("FAIL:") {
        return Line::Diagnostic(Diagnostic::Generic(reason.trim().to_owned()));
    }

    let trimmed = text.trim();
    if !trimmed.starts_with("open") {
        return Line::Noise;
    }

    // A rate annotation glued onto the line adds trailing tokens, so only
    // the five positional fields are read and anything after is ignored.
    let mut fields = trimmed.split_whitespace().skip(2);
    let (Some(port), Some(address), Some(timestamp)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Line::Noise;
    };

    let Ok(port) = port.parse::<u16>() else {
        return Line::Noise;
    };
    let Ok(address) = address.parse::<IpAddr>() else {
        return Line::Noise;
    };

    let timestamp = match timestamp.parse::<i64>() {
        Ok(whole) => Timestamp::Whole(whole),
        // The rate annotation ran into the timestamp; keep whatever digits
        // landed before it and let the stream layer resynchronize.
        Err(_) => {
            let prefix = timestamp.split(RATE_MARKER).next().unwrap_or_default();
            Timestamp::Truncated(prefix.to_owned())
        }
    };

    Line::Discovery(Discovery {
        port,
        address,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use parameterized::parameterized;

    use super::{classify, Diagnostic, Line, Timestamp};

    #[test]
    fn well_formed_discovery_line() {
        let line = classify(b"open tcp 11434 203.0.113.7 1700000000");

        let Line::Discovery(d) = line else {
            panic!("expected discovery, got {line:?}");
        };
        assert_eq!(d.port, 11434);
        assert_eq!(d.address, "203.0.113.7".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(d.timestamp, Timestamp::Whole(1_700_000_000));
    }

    #[test]
    fn discovery_line_with_leading_whitespace() {
        let line = classify(b"  open tcp 22 10.0.0.1 1650000000");
        assert!(matches!(line, Line::Discovery(_)));
    }

    #[test]
    fn ipv6_discovery_line() {
        let Line::Discovery(d) = classify(b"open tcp 11434 2001:db8::7 1700000000") else {
            panic!("expected discovery");
        };
        assert!(d.address.is_ipv6());
    }

    #[test]
    fn truncated_timestamp_keeps_numeric_prefix() {
        // A rate annotation ran straight into the timestamp field without a
        // line terminator in between.
        let raw: &[u8] = b"open tcp 11434 203.0.113.7 17000rate:  9.99-kpps, 0.07% done";
        let Line::Discovery(d) = classify(raw) else {
            panic!("expected discovery");
        };
        assert_eq!(d.timestamp, Timestamp::Truncated("17000".to_owned()));
    }

    #[test]
    fn permission_denied_beats_generic() {
        // Both substrings are present; the distinguished sub-case must win.
        let line = classify(b"FAIL: permission denied (are you root?)");
        assert_eq!(line, Line::Diagnostic(Diagnostic::PermissionDenied));
    }

    #[test]
    fn generic_diagnostic_carries_reason() {
        let line = classify(b"FAIL: could not determine default interface");
        assert_eq!(
            line,
            Line::Diagnostic(Diagnostic::Generic(
                "could not determine default interface".to_owned()
            ))
        );
    }

    #[parameterized(raw = {
        b"#masscan" as &[u8],
        b"" as &[u8],
        b"rate:  0.00-kpps, 0.00% done" as &[u8],
        b"open tcp notaport 203.0.113.7 1700000000" as &[u8],
        b"open tcp 11434 not-an-address 1700000000" as &[u8],
        b"open tcp 11434" as &[u8],
    })]
    fn unusable_lines_are_noise(raw: &[u8]) {
        assert_eq!(classify(raw), Line::Noise);
    }
}
