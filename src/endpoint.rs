use std::fmt;

/// A network address expressed as host and port.
///
/// Rendered as `host:port`; IPv6 literals are bracketed so the rendering
/// can be handed straight to a dial or bind call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_host_colon_port() {
        assert_eq!(Endpoint::new("localhost", 8080).to_string(), "localhost:8080");
        assert_eq!(Endpoint::new("10.0.0.5", 80).to_string(), "10.0.0.5:80");
    }

    #[test]
    fn brackets_ipv6_literals() {
        assert_eq!(Endpoint::new("::1", 22).to_string(), "[::1]:22");
        assert_eq!(Endpoint::new("[::1]", 22).to_string(), "[::1]:22");
    }

    #[test]
    fn equality_is_by_value() {
        assert_eq!(Endpoint::new("a", 1), Endpoint::new(String::from("a"), 1));
        assert_ne!(Endpoint::new("a", 1), Endpoint::new("a", 2));
    }

    #[test]
    fn construction_does_not_validate() {
        let e = Endpoint::new("", 0);
        assert_eq!(e.host(), "");
        assert_eq!(e.port(), 0);
        assert_eq!(e.to_string(), ":0");
    }
}
