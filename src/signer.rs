//! Strong-name signing.
//!
//! The signature itself is produced outside this crate. The writer reserves
//! [`StrongNameSigner::signature_size`] bytes in `.text`, hashes the finished image with
//! [`strong_name_digest`] and places whatever the signer returns in the reservation.
//! The hash skips the optional header checksum, the certificate directory entry and the
//! reservation itself, since those are filled in after signing.

use std::ops::Range;

use sha1::{Digest, Sha1};

use crate::Result;

/// Produces a strong-name signature from an image digest.
pub trait StrongNameSigner {
    /// Exact length of the signatures this signer produces
    fn signature_size(&self) -> u32;

    /// Sign the SHA-1 `digest` of the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Signing`] if no signature can be produced.
    fn sign(&self, digest: &[u8; 20]) -> Result<Vec<u8>>;
}

/// SHA-1 of `image` with every range in `excluded` left out.
///
/// Ranges may be given in any order and are clamped to the image.
#[must_use]
pub fn strong_name_digest(image: &[u8], excluded: &[Range<usize>]) -> [u8; 20] {
    let mut ranges: Vec<Range<usize>> = excluded
        .iter()
        .map(|range| range.start.min(image.len())..range.end.min(image.len()))
        .filter(|range| !range.is_empty())
        .collect();
    ranges.sort_by_key(|range| range.start);

    let mut hasher = Sha1::new();
    let mut position = 0;
    for range in ranges {
        if range.start > position {
            hasher.update(&image[position..range.start]);
        }
        position = position.max(range.end);
    }
    hasher.update(&image[position..]);
    hasher.finalize().into()
}
