use std::fmt;

/// The location of an object on S3
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct S3Location {
    /// The bucket name
    bucket: String,

    /// The key
    key: String,
}

impl S3Location {
    /// Construct a new `S3Location` for the given bucket & key
    pub(crate) fn new<B: Into<String>, K: Into<String>>(bucket: B, key: K) -> S3Location {
        S3Location {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Returns the bucket name
    pub(crate) fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Returns the key
    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Returns the final `/`-separated component of the key
    pub(crate) fn basename(&self) -> &str {
        match self.key.rsplit_once('/') {
            Some((_, name)) => name,
            None => &self.key,
        }
    }
}

impl fmt::Display for S3Location {
    /// Format an `S3Location` as an S3 URL
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
