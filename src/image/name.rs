use crate::errors::ImageError;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    cmp::{Ord, Ordering, PartialOrd},
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

/// Name of an image within a registry
///
/// Image names are path-like groupings of lowercase alphanumeric segments
/// separated by slashes. Each segment may also contain internal separator
/// characters: single periods, single underscores, double underscores, or
/// any number of dashes. The same image name addresses related content in
/// every registry a manifest mentions; the promoter never renames images
/// while copying them.
#[derive(Clone)]
pub struct ImageName {
    serialized: String,
}

/// Iterator over the slash-separated components of an ImageName
pub struct ImageNameIter<'a> {
    remaining: Option<&'a str>,
}

impl<'a> Iterator for ImageNameIter<'a> {
    type Item = &'a str;
    fn next(&mut self) -> Option<Self::Item> {
        self.remaining.map(|remaining| {
            let mut parts = remaining.splitn(2, '/');
            let first = parts.next().unwrap();
            let second = parts.next();
            self.remaining = second;
            first
        })
    }
}

impl ImageName {
    /// Returns a reference to the existing string representation of an
    /// [ImageName]
    ///
    /// Always consists of at least one path segment, separated by slashes.
    /// Characters are limited to lowercase alphanumeric, single internal
    /// forward slashes, and dots, dashes, or underscores which do not begin
    /// a path segment.
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as an [ImageName]
    ///
    /// ```
    /// # use stevedore::ImageName;
    /// let name = ImageName::parse("some/image").unwrap();
    /// let parts: Vec<&str> = name.iter().collect();
    /// assert_eq!(parts, vec!["some", "image"])
    /// ```
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", ImageName::regex_str())).unwrap();
        }
        match RE.is_match(s) {
            false => Err(ImageError::InvalidReferenceFormat(s.to_owned())),
            true => Ok(ImageName {
                serialized: s.to_owned(),
            }),
        }
    }

    /// Produce an iterator over the slash-separated parts of an image name
    pub fn iter(&self) -> ImageNameIter {
        ImageNameIter {
            remaining: Some(&self.serialized),
        }
    }

    /// Join this name to another with a slash, forming a new image name
    pub fn join(&self, other: &Self) -> Self {
        ImageName {
            serialized: format!("{}/{}", self.serialized, other.serialized),
        }
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<img>", // image name match group
            /*  */ "(?:", // first path segment
            /* -- */ "[a-z0-9]+",
            /* -- */ "(?:",
            /* -- -- */ "(?:[._]|__|[-]*)", // allowed separators
            /* -- -- */ "[a-z0-9]+",
            /* -- */ ")*",
            /*  */ ")",
            /*  */ "(?:", // optional additional path segments
            /* -- */ "/",
            /* -- */ "[a-z0-9]+",
            /* -- */ "(?:",
            /* -- -- */ "(?:[._]|__|[-]*)",
            /* -- -- */ "[a-z0-9]+",
            /* -- */ ")*",
            /*  */ ")*",
            ")",
        )
    }
}

impl Eq for ImageName {}

impl PartialEq for ImageName {
    fn eq(&self, other: &Self) -> bool {
        self.serialized.eq(&other.serialized)
    }
}

impl FromStr for ImageName {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageName::parse(s)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Hash for ImageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl Ord for ImageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl PartialOrd for ImageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for ImageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ImageName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ImageName::parse(&s).map_err(de::Error::custom)
    }
}
