use openssl::symm::{Cipher, Crypter, Mode};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// First 16 bytes of `sha256(object_name)`, the per-object IV.
///
/// Grounded on `main.go`'s `aesStream(ivSeed string)`.
pub fn iv_for_object(object_name: &str) -> [u8; 16] {
  let digest = Sha256::digest(object_name.as_bytes());
  let mut iv = [0u8; 16];
  iv.copy_from_slice(&digest[..16]);
  iv
}

/// AES-128-CTR keystream for one object, seeded by its name. `Config.key`
/// is 32 raw bytes (see spec §3/§6); AES-128 takes the first 16.
///
/// CTR mode makes encryption and decryption the same transform (XOR with
/// the keystream), so one `Cipher` type serves both directions —
/// `openssl::symm::Crypter` in encrypt mode produces identical output to
/// decrypt mode for CTR.
pub struct ObjectCipher {
  crypter: Crypter,
}

impl ObjectCipher {
  pub fn new(key: &[u8; 32], object_name: &str) -> Result<Self> {
    let iv = iv_for_object(object_name);
    let crypter = Crypter::new(Cipher::aes_128_ctr(), Mode::Encrypt, &key[..16], Some(&iv))?;
    Ok(Self { crypter })
  }

  /// Transforms `input` in place through the keystream (XOR), appending
  /// output to `out`. `input` and `out` may differ in length by up to one
  /// cipher block; callers should size `out` generously and truncate.
  pub fn apply(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let mut buf = vec![0u8; input.len() + Cipher::aes_128_ctr().block_size()];
    let n = self.crypter.update(input, &mut buf)?;
    buf.truncate(n);
    out.extend_from_slice(&buf);
    Ok(())
  }

  pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
    let mut buf = vec![0u8; Cipher::aes_128_ctr().block_size()];
    let n = self.crypter.finalize(&mut buf)?;
    buf.truncate(n);
    out.extend_from_slice(&buf);
    Ok(())
  }

  /// One-shot transform of a whole buffer. `decrypt(name, encrypt(name,
  /// b)) == b`, and the transform is deterministic in `(key, name)`.
  pub fn transform(key: &[u8; 32], object_name: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut cipher = Self::new(key, object_name)?;
    let mut out = Vec::with_capacity(data.len());
    cipher.apply(data, &mut out)?;
    cipher.finish(&mut out)?;
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrip_is_identity() {
    let key = [3u8; 32];
    let plaintext = b"the quick brown fox jumps over the lazy dog";
    let ciphertext = ObjectCipher::transform(&key, "0000000000000007.1.wal", plaintext).unwrap();
    assert_ne!(ciphertext, plaintext);
    let decrypted = ObjectCipher::transform(&key, "0000000000000007.1.wal", &ciphertext).unwrap();
    assert_eq!(decrypted, plaintext);
  }

  #[test]
  fn transform_is_deterministic() {
    let key = [3u8; 32];
    let a = ObjectCipher::transform(&key, "x.base", b"hello").unwrap();
    let b = ObjectCipher::transform(&key, "x.base", b"hello").unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn different_object_names_produce_different_keystreams() {
    let key = [3u8; 32];
    let a = ObjectCipher::transform(&key, "a.base", b"hello").unwrap();
    let b = ObjectCipher::transform(&key, "b.base", b"hello").unwrap();
    assert_ne!(a, b);
  }
}
