use std::fmt;

use crate::errors::RepackerError;

/// Supported object-store schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Gs,
    File,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Gs => write!(f, "gs"),
            Scheme::File => write!(f, "file"),
        }
    }
}

/// A parsed URL to an object in GCS or on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePath {
    pub scheme: Scheme,
    /// GCS bucket (or URL host). Empty for file:///absolute/path URLs.
    bucket: String,
    /// Object name without a leading slash.
    object: String,
}

impl StorePath {
    /// Parse a gs:// or file:// URL of any object type.
    pub fn parse(url: &str) -> Result<StorePath, RepackerError> {
        let (scheme, rest) = if let Some(rest) = url.strip_prefix("gs://") {
            (Scheme::Gs, rest)
        } else if let Some(rest) = url.strip_prefix("file://") {
            (Scheme::File, rest)
        } else {
            let scheme = url.split("://").next().unwrap_or(url);
            return Err(RepackerError::UnsupportedScheme(scheme.to_string()));
        };

        let (bucket, object) = match rest.strip_prefix('/') {
            // file:///absolute/path has no host component.
            Some(object) => (String::new(), object.to_string()),
            None => match rest.split_once('/') {
                Some((bucket, object)) => (bucket.to_string(), object.to_string()),
                None => (rest.to_string(), String::new()),
            },
        };
        Ok(StorePath {
            scheme,
            bucket,
            object,
        })
    }

    /// Parse a gs:// or file:// URL of a .tgz archive.
    pub fn parse_archive(url: &str) -> Result<StorePath, RepackerError> {
        let p = StorePath::parse(url)?;
        if !url.ends_with(".tgz") {
            return Err(RepackerError::UnsupportedExtension(url.to_string()));
        }
        Ok(p)
    }

    /// A new StorePath with an alternate bucket and the same object name.
    pub fn dup(&self, bucket: &str) -> StorePath {
        StorePath {
            scheme: self.scheme,
            bucket: bucket.to_string(),
            object: self.object.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The object name, without a leading slash.
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Replace the object name, e.g. after a datatype rewrite.
    pub fn set_object(&mut self, object: String) {
        self.object = object.trim_start_matches('/').to_string();
    }

    /// A filesystem path for file:// URLs: bucket and object joined.
    pub fn filename(&self) -> String {
        if self.bucket.is_empty() {
            format!("/{}", self.object)
        } else {
            format!("{}/{}", self.bucket, self.object)
        }
    }

    /// Extend the object name with a sub-path.
    pub fn child(&self, sub: &str) -> StorePath {
        let mut p = self.clone();
        if p.object.is_empty() {
            p.object = sub.trim_matches('/').to_string();
        } else {
            p.object = format!("{}/{}", p.object.trim_end_matches('/'), sub.trim_matches('/'));
        }
        p
    }

    /// Final path component of the object name.
    pub fn base_name(&self) -> &str {
        self.object.rsplit('/').next().unwrap_or(&self.object)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.object)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_archive_gs() {
        let p = StorePath::parse_archive("gs://b/x/y.tgz").unwrap();
        assert_eq!(p.scheme, Scheme::Gs);
        assert_eq!(p.bucket(), "b");
        assert_eq!(p.object(), "x/y.tgz");
    }

    #[test]
    fn test_parse_archive_rejects_scheme_and_extension() {
        assert!(matches!(
            StorePath::parse_archive("http://x"),
            Err(RepackerError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            StorePath::parse_archive("gs://b/x.txt"),
            Err(RepackerError::UnsupportedExtension(_))
        ));
    }

    #[test]
    fn test_to_string_round_trips() {
        for url in [
            "gs://b/x/y.tgz",
            "gs://bucket/ndt/annotation/2023/03/01/file.tgz",
            "file:///tmp/archive.tgz",
        ] {
            let p = StorePath::parse(url).unwrap();
            assert_eq!(p.to_string(), url);
        }
    }

    #[test]
    fn test_dup_swaps_bucket_only() {
        let p = StorePath::parse("gs://b/x/y.tgz").unwrap();
        let d = p.dup("other");
        assert_eq!(d.bucket(), "other");
        assert_eq!(d.object(), p.object());
        assert_eq!(d.to_string(), "gs://other/x/y.tgz");
    }

    #[test]
    fn test_file_url_filename() {
        let p = StorePath::parse("file:///tmp/data/archive.tgz").unwrap();
        assert_eq!(p.bucket(), "");
        assert_eq!(p.object(), "tmp/data/archive.tgz");
        assert_eq!(p.filename(), "/tmp/data/archive.tgz");
    }

    #[test]
    fn test_child_and_base_name() {
        let p = StorePath::parse("gs://b/RouteViewIPv4").unwrap();
        let c = p.child("2023/02");
        assert_eq!(c.object(), "RouteViewIPv4/2023/02");
        let f = c.child("routeviews-rv2-20230205-2200.pfx2as.gz");
        assert_eq!(f.base_name(), "routeviews-rv2-20230205-2200.pfx2as.gz");
    }
}
