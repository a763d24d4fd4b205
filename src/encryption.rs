// SPDX-License-Identifier: PMPL-1.0-or-later
//
// telespool - Pluggable encryption-at-rest capability
//
// The writer encrypts each block's payload before framing and the
// reader decrypts each payload after decoding, so encryption is applied
// at block granularity and partial decoding of a file stays possible.
// When no provider is configured the payload passes through unchanged.

use crate::error::SpoolResult;

/// Transforms plaintext payload bytes to/from ciphertext at the block
/// boundary.
///
/// Injected into the writer and reader as `Option<Arc<dyn Encryption>>`;
/// `None` means identity (no encryption at rest). Implementations must
/// be safe to share across threads.
pub trait Encryption: Send + Sync {
    /// Encrypt a single block payload.
    fn encrypt(&self, data: &[u8]) -> SpoolResult<Vec<u8>>;

    /// Decrypt a single block payload.
    ///
    /// A failure here is isolated to the one block by the reader; it
    /// never fails the containing batch.
    fn decrypt(&self, data: &[u8]) -> SpoolResult<Vec<u8>>;
}


#[cfg(test)]
mod tests {
    use super::testing::XorEncryption;
    use super::*;

    #[test]
    fn test_xor_roundtrip() {
        let provider = XorEncryption { key: 0x5A };
        let ciphertext = provider.encrypt(b"foo").unwrap();
        assert_ne!(ciphertext, b"foo");
        assert_eq!(provider.decrypt(&ciphertext).unwrap(), b"foo");
    }
}
