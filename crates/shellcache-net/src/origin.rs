//! Origin model and same-origin checks.
//!
//! Only tuple origins can ever match. Opaque origins never compare equal,
//! not even with themselves, so anything that cannot be classified stays
//! out of the cache.

use url::Url;

/// A web origin (scheme + host + port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A tuple origin (scheme, host, port).
    Tuple {
        scheme: String,
        host: String,
        port: Option<u16>,
    },
    /// An opaque origin (unique, cannot match anything).
    Opaque(String),
}

impl Origin {
    /// Create an origin from a URL.
    pub fn from_url(url: &Url) -> Self {
        // data: and file: URLs have opaque origins
        if url.scheme() == "data" || url.scheme() == "file" || url.scheme() == "javascript" {
            return Origin::Opaque(url.to_string());
        }

        // blob: URLs inherit origin from their creator
        if url.scheme() == "blob" {
            if let Ok(inner_url) = Url::parse(url.path()) {
                return Origin::from_url(&inner_url);
            }
            return Origin::Opaque(url.to_string());
        }

        match url.host_str() {
            Some(host) => Origin::Tuple {
                scheme: url.scheme().to_string(),
                host: host.to_ascii_lowercase(),
                port: url.port_or_known_default(),
            },
            None => Origin::Opaque(url.to_string()),
        }
    }

    /// Parse an origin from a URL string such as `https://arabsad.com`.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Url::parse(input).map(|url| Self::from_url(&url))
    }

    /// Check if two origins are the same.
    pub fn same_origin(&self, other: &Origin) -> bool {
        match (self, other) {
            (
                Origin::Tuple { scheme: s1, host: h1, port: p1 },
                Origin::Tuple { scheme: s2, host: h2, port: p2 },
            ) => s1 == s2 && h1.eq_ignore_ascii_case(h2) && p1 == p2,
            _ => false,
        }
    }

    /// Check whether a URL belongs to this origin.
    pub fn contains(&self, url: &Url) -> bool {
        self.same_origin(&Origin::from_url(url))
    }

    /// Check if this is an opaque origin.
    pub fn is_opaque(&self) -> bool {
        matches!(self, Origin::Opaque(_))
    }

    /// Serialize to string (for the Origin header and logs).
    pub fn serialize(&self) -> String {
        match self {
            Origin::Tuple { scheme, host, port } => {
                let default_port = match scheme.as_str() {
                    "http" | "ws" => Some(80),
                    "https" | "wss" => Some(443),
                    _ => None,
                };

                match port {
                    Some(p) if *port != default_port => format!("{}://{}:{}", scheme, host, p),
                    _ => format!("{}://{}", scheme, host),
                }
            }
            Origin::Opaque(_) => "null".to_string(),
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_origin_ignores_path_and_default_port() {
        let a = Origin::parse("https://arabsad.com/services-page.html").unwrap();
        let b = Origin::parse("https://ArabSad.com:443/").unwrap();
        assert!(a.same_origin(&b));
    }

    #[test]
    fn test_different_scheme_or_port_is_cross_origin() {
        let site = Origin::parse("https://arabsad.com").unwrap();
        assert!(!site.same_origin(&Origin::parse("http://arabsad.com").unwrap()));
        assert!(!site.same_origin(&Origin::parse("https://arabsad.com:8443").unwrap()));
        assert!(!site.same_origin(&Origin::parse("https://cdn.arabsad.com").unwrap()));
    }

    #[test]
    fn test_opaque_never_matches() {
        let data = Origin::parse("data:text/plain,hi").unwrap();
        assert!(data.is_opaque());
        assert!(!data.same_origin(&data.clone()));
    }

    #[test]
    fn test_serialize() {
        assert_eq!(
            Origin::parse("https://arabsad.com/x").unwrap().serialize(),
            "https://arabsad.com"
        );
        assert_eq!(
            Origin::parse("http://127.0.0.1:8080/").unwrap().serialize(),
            "http://127.0.0.1:8080"
        );
    }
}
