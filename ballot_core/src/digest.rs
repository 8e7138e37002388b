use std::hash::{DefaultHasher, Hash, Hasher};

pub type DigestOutput = u64;

/// A value that can be condensed into a digest, such that two values with
/// different contents are very likely to have different digests.
pub trait Digestible {
    fn digest(&self) -> DigestOutput;
}

impl<T: Hash> Digestible for [T] {
    fn digest(&self) -> DigestOutput {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digest_tracks_contents_and_order() {
        let a = ["x", "y"];
        let b = ["x", "y"];
        let c = ["y", "x"];
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_ne!(a[..1].digest(), a.digest());
    }
}
