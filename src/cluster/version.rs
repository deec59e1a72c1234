use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v(\d+)(?:(alpha|beta)(\d+))?$").expect("invalid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Channel {
    Alpha,
    Beta,
    Stable,
}

/// A CRD version name. `Ord` is priority order: the greatest value is the
/// version a client should prefer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiVersion {
    Conformant {
        major: u64,
        channel: Channel,
        minor: u64,
        raw: String,
    },
    NonConformant(String),
}

impl ApiVersion {
    pub fn parse(version: &str) -> Self {
        let Some(captures) = VERSION_PATTERN.captures(version) else {
            return Self::NonConformant(version.to_string());
        };

        let number = |i: usize| captures.get(i).and_then(|m| m.as_str().parse::<u64>().ok());

        let (Some(major), minor) = (number(1), number(3)) else {
            return Self::NonConformant(version.to_string());
        };

        let channel = match captures.get(2).map(|m| m.as_str()) {
            Some("alpha") => Channel::Alpha,
            Some("beta") => Channel::Beta,
            _ => Channel::Stable,
        };

        Self::Conformant {
            major,
            channel,
            minor: minor.unwrap_or_default(),
            raw: version.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Conformant { raw, .. } => raw,
            Self::NonConformant(raw) => raw,
        }
    }
}

impl Ord for ApiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                Self::Conformant {
                    major: a_major,
                    channel: a_channel,
                    minor: a_minor,
                    raw: a_raw,
                },
                Self::Conformant {
                    major: b_major,
                    channel: b_channel,
                    minor: b_minor,
                    raw: b_raw,
                },
            ) => a_channel
                .cmp(b_channel)
                .then(a_major.cmp(b_major))
                .then(a_minor.cmp(b_minor))
                .then_with(|| b_raw.cmp(a_raw)),
            (Self::Conformant { .. }, Self::NonConformant(_)) => Ordering::Greater,
            (Self::NonConformant(_), Self::Conformant { .. }) => Ordering::Less,
            // lexically smaller wins so the pick does not depend on input order
            (Self::NonConformant(a), Self::NonConformant(b)) => b.cmp(a),
        }
    }
}

impl PartialOrd for ApiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Highest priority version of `versions`, `None` when empty.
pub fn default_crd_version<S: AsRef<str>>(versions: &[S]) -> Option<String> {
    versions
        .iter()
        .map(|v| ApiVersion::parse(v.as_ref()))
        .max()
        .map(|v| v.as_str().to_string())
}
