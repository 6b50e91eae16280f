use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

/// Archive-relative location of a record's bytes: `<first two chars>/<identity>`.
pub fn content_path(identity: &str) -> PathBuf {
    let bucket = identity.get(..2).unwrap_or(identity);
    Path::new(bucket).join(identity)
}

/// Identity the device assigns to a file: hex SHA-1 of `"<rawDomain>-<relativePath>"`.
pub fn file_identity(raw_domain: &str, relative_path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(raw_domain.as_bytes());
    hasher.update(b"-");
    hasher.update(relative_path.as_bytes());
    hex::encode(hasher.finalize())
}

/// Maps identities to content files under an archive root. Pure path
/// computation; whether the file exists is the caller's concern.
#[derive(Clone, Debug)]
pub struct ContentResolver {
    root: PathBuf,
}

impl ContentResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, identity: &str) -> PathBuf {
        self.root.join(content_path(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "3d0d7e5fb2ce288813306e4d4636395e047a3d28";

    #[test]
    fn two_level_layout() {
        assert_eq!(content_path("abcdef1234"), PathBuf::from("ab/abcdef1234"));
        let r = ContentResolver::new("/backup");
        assert_eq!(r.resolve(ID), PathBuf::from("/backup/3d").join(ID));
    }

    #[test]
    fn deterministic_and_ends_with_identity() {
        let r = ContentResolver::new("root");
        let a = r.resolve(ID);
        let b = r.resolve(ID);
        assert_eq!(a, b);
        assert_eq!(a.file_name().and_then(|s| s.to_str()), Some(ID));
    }

    #[test]
    fn identity_is_sha1_of_domain_and_path() {
        assert_eq!(
            file_identity("HomeDomain", "Library/Preferences/com.apple.springboard.plist"),
            "662bc19b13aecef58a7e855d0316e4cf61e2642b"
        );
        assert_eq!(
            file_identity("CameraRollDomain", "Media/DCIM/100APPLE/IMG_0001.JPG"),
            "343e26971dfe9c395c425c0ccf799df63ae6261e"
        );
    }

    #[test]
    fn short_identity_does_not_panic() {
        assert_eq!(content_path("a"), PathBuf::from("a/a"));
    }
}
