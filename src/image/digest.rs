use crate::errors::ImageError;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::{
    cmp::{Ord, Ordering, PartialOrd},
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

/// A digest securely identifies the specific contents of an image
///
/// Digests include the hash algorithm, which is `sha256` for every digest we
/// create ourselves, followed by a colon and at least 32 lowercase hex
/// digits. An image carrying a digest is immutable; tags are the only
/// mutable bindings in a registry.
#[derive(Clone)]
pub struct ContentDigest {
    serialized: String,
    hex_at: usize,
}

impl ContentDigest {
    /// Returns a reference to the existing string representation of a
    /// [ContentDigest]
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as a [ContentDigest]
    ///
    /// ```
    /// # use stevedore::ContentDigest;
    /// let digest = ContentDigest::parse("sha256:00112233445566778899aabbccddeeff").unwrap();
    /// assert_eq!(digest.algorithm_str(), "sha256");
    /// assert_eq!(digest.hex_str(), "00112233445566778899aabbccddeeff")
    /// ```
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(&format!("^{}$", ContentDigest::regex_str())).unwrap();
        }
        match RE.captures(s) {
            None => Err(ImageError::InvalidReferenceFormat(s.to_owned())),
            Some(captures) => Ok(ContentDigest {
                serialized: s.to_owned(),
                hex_at: captures.name("dig_hex").unwrap().start(),
            }),
        }
    }

    /// Create a new ContentDigest describing a block of content
    ///
    /// This hashes the content with the `sha256` algorithm.
    ///
    /// ```
    /// # use stevedore::ContentDigest;
    /// let digest = ContentDigest::from_content(b"cat");
    /// assert_eq!(digest.as_str(), "sha256:77af778b51abd4a3c51c5ddd97204a9c3ae614ebccb75a606c3b6865aed6744e");
    /// ```
    pub fn from_content(content: &[u8]) -> Self {
        ContentDigest::parse(&format!("sha256:{:x}", Sha256::digest(content))).unwrap()
    }

    /// Return a reference to the algorithm portion of this digest
    pub fn algorithm_str(&self) -> &str {
        &self.serialized[..self.hex_at - 1]
    }

    /// Return a reference to the hexadecimal portion of this digest
    ///
    /// This is guaranteed to be a string of at least 32 lowercase hex digits.
    pub fn hex_str(&self) -> &str {
        &self.serialized[self.hex_at..]
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<dig>", // digest group
            /*  */ "(?P<dig_alg>", // digest algorithm group
            /* -- */ "[a-z0-9]+",
            /* -- */ "(?:",
            /* -- -- */ "[+._-]", // separators allowed between algorithm components
            /* -- -- */ "[a-z0-9]+",
            /* -- */ ")*",
            /*  */ ")", // end digest algorithm group
            /*  */ "[:]", // main separator
            /*  */ "(?P<dig_hex>", // digest hex group
            /* -- */ "[a-f0-9]{32,}",
            /*  */ ")",
            ")",
        )
    }
}

impl Eq for ContentDigest {}

impl PartialEq for ContentDigest {
    fn eq(&self, other: &Self) -> bool {
        self.serialized.eq(&other.serialized)
    }
}

impl FromStr for ContentDigest {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentDigest::parse(s)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Hash for ContentDigest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl Ord for ContentDigest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl PartialOrd for ContentDigest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentDigest::parse(&s).map_err(de::Error::custom)
    }
}
