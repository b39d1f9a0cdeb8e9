use crate::{errors::ImageError, image::ImageName};
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    cmp::{Ord, Ordering, PartialOrd},
    fmt,
    hash::{Hash, Hasher},
    ops::Range,
    str::FromStr,
};

/// Name of one registry root that images can be promoted into or out of
///
/// This is a domain name with an optional port, optionally followed by a
/// repository path prefix, such as `gcr.io/prod-artifacts` or
/// `localhost:5000`. Two registry roots on the same host but with different
/// prefixes are distinct registries as far as promotion is concerned; an
/// image lives at `prefix/image` on the underlying server.
///
/// Typically the protocol is https, but we include the same heuristic Docker
/// uses to improve the ergonomics of development setups: if the host has no
/// dots in it, the protocol switches to unencrypted http.
#[derive(Clone)]
pub struct RegistryName {
    serialized: String,
    host_pos: Range<usize>,
    prefix_pos: Option<Range<usize>>,
    port: Option<u16>,
    is_https: bool,
}

impl RegistryName {
    /// Returns a reference to the existing string representation of a
    /// [RegistryName]
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as a [RegistryName]
    ///
    /// ```
    /// # use stevedore::RegistryName;
    /// let registry = RegistryName::parse("gcr.io/prod-artifacts").unwrap();
    /// assert_eq!(registry.host_str(), "gcr.io");
    /// assert_eq!(registry.prefix_str(), Some("prod-artifacts"))
    /// ```
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(&format!("^{}$", RegistryName::regex_str())).unwrap();
        }
        match RE.captures(s) {
            None => Err(ImageError::InvalidReferenceFormat(s.to_owned())),
            Some(captures) => {
                let host = captures.name("reg_h").unwrap();
                Ok(RegistryName {
                    serialized: s.to_owned(),
                    host_pos: host.range(),
                    is_https: host.as_str().contains('.'),
                    port: captures.name("reg_p").map(|m| m.as_str().parse().unwrap()),
                    prefix_pos: captures.name("reg_x").map(|m| m.range()),
                })
            }
        }
    }

    /// Returns a reference to the host portion of the string, without the
    /// port or path prefix
    pub fn host_str(&self) -> &str {
        &self.serialized[self.host_pos.clone()]
    }

    /// Returns the port, if present
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns a reference to the optional repository path prefix
    pub fn prefix_str(&self) -> Option<&str> {
        self.prefix_pos
            .as_ref()
            .map(|pos| &self.serialized[pos.clone()])
    }

    /// Are we using https to connect to this registry?
    pub fn is_https(&self) -> bool {
        self.is_https
    }

    /// The protocol to use, either "http" or "https"
    pub fn protocol_str(&self) -> &str {
        if self.is_https() {
            "https"
        } else {
            "http"
        }
    }

    /// Base URL for the registry API, protocol and authority only
    pub fn api_base(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.protocol_str(), self.host_str(), port),
            None => format!("{}://{}", self.protocol_str(), self.host_str()),
        }
    }

    /// Repository path on the underlying server for one of our images
    pub fn repository_path(&self, image: &ImageName) -> String {
        match self.prefix_str() {
            Some(prefix) => format!("{}/{}", prefix, image),
            None => image.to_string(),
        }
    }

    /// Interpret a server-side repository path as an image under this
    /// registry root
    ///
    /// Returns None when the path falls outside this registry's prefix, or
    /// when the remainder is not a well-formed image name.
    pub fn relative_image(&self, repository_path: &str) -> Option<ImageName> {
        let remainder = match self.prefix_str() {
            None => repository_path,
            Some(prefix) => repository_path
                .strip_prefix(prefix)?
                .strip_prefix('/')?,
        };
        ImageName::parse(remainder).ok()
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<reg>", // main registry match group
            /*  */ "(?P<reg_h>", // registry host match group
            /* -- */ "(?:", // first domain component
            /* -- -- */ "[a-zA-Z0-9]|",
            /* -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
            /* -- */ ")",
            /* -- */ "(?:", // optional additional domain components
            /* -- -- */ "\\.",
            /* -- -- */ "(?:",
            /* -- -- -- */ "[a-zA-Z0-9]|",
            /* -- -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
            /* -- -- */ ")",
            /* -- */ ")*",
            /*  */ ")", // end registry host match group
            /*  */ "(?:", // optional port number
            /* -- */ "[:]",
            /* -- */ "(?P<reg_p>", // registry port group
            /* -- -- */ "[0-9]+",
            /* -- */ ")",
            /*  */ ")?",
            /*  */ "(?:", // optional repository path prefix
            /* -- */ "/",
            /* -- */ "(?P<reg_x>", // registry prefix group
            /* -- -- */ "[a-z0-9]+",
            /* -- -- */ "(?:",
            /* -- -- -- */ "(?:[._]|__|[-]*)", // allowed separators
            /* -- -- -- */ "[a-z0-9]+",
            /* -- -- */ ")*",
            /* -- -- */ "(?:", // additional prefix components
            /* -- -- -- */ "/",
            /* -- -- -- */ "[a-z0-9]+",
            /* -- -- -- */ "(?:",
            /* -- -- -- -- */ "(?:[._]|__|[-]*)",
            /* -- -- -- -- */ "[a-z0-9]+",
            /* -- -- -- */ ")*",
            /* -- -- */ ")*",
            /* -- */ ")",
            /*  */ ")?",
            ")",
        )
    }
}

impl Eq for RegistryName {}

impl PartialEq for RegistryName {
    fn eq(&self, other: &Self) -> bool {
        self.serialized.eq(&other.serialized)
    }
}

impl FromStr for RegistryName {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RegistryName::parse(s)
    }
}

impl fmt::Display for RegistryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for RegistryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Hash for RegistryName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl Ord for RegistryName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl PartialOrd for RegistryName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for RegistryName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RegistryName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RegistryName::parse(&s).map_err(de::Error::custom)
    }
}
