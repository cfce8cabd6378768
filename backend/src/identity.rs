use openssl::{
  asn1::Asn1Time,
  bn::{BigNum, BigNumContext},
  ec::{EcGroup, EcKey, EcPoint},
  hash::MessageDigest,
  nid::Nid,
  pkey::{PKey, Private},
  x509::{X509NameBuilder, X509},
};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// `sha256(secret_key) || be64(system_id)`, the deterministic entropy
/// source for the client's P-256 identity. Grounded on `backend.go`'s
/// `material` construction ("to be sure we don't leak our key through NSA
/// A.2.1").
pub fn derive_material(secret_key: &[u8; 32], system_id: u64) -> [u8; 40] {
  let mut material = [0u8; 40];
  let digest = Sha256::digest(secret_key);
  material[..32].copy_from_slice(&digest);
  material[32..].copy_from_slice(&system_id.to_be_bytes());
  material
}

/// Deterministically derives a P-256 keypair and a self-signed certificate
/// from `material`, the way `ecdsa.GenerateKey(curve, deterministic
/// io.Reader)` does in the original agent. OpenSSL has no "keygen from
/// seed" entry point, so the private scalar is `material mod order`
/// instead — see the derivation note in DESIGN.md.
pub fn derive_identity(material: &[u8; 40]) -> Result<(PKey<Private>, X509)> {
  let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
  let mut ctx = BigNumContext::new()?;

  let mut order = BigNum::new()?;
  group.order(&mut order, &mut ctx)?;

  let raw = BigNum::from_slice(material)?;
  let mut scalar = BigNum::new()?;
  scalar.nnmod(&raw, &order, &mut ctx)?;

  let mut point = EcPoint::new(&group)?;
  point.mul_generator(&group, &scalar, &ctx)?;

  let ec_key = EcKey::from_private_components(&group, &scalar, &point)?;
  ec_key.check_key()?;
  let pkey = PKey::from_ec_key(ec_key)?;

  let mut name_builder = X509NameBuilder::new()?;
  name_builder.append_entry_by_text("O", "pgbackup.com")?;
  let name = name_builder.build();

  let mut builder = X509::builder()?;
  builder.set_version(2)?;
  builder.set_serial_number(&BigNum::from_u32(1)?.to_asn1_integer()?)?;
  builder.set_subject_name(&name)?;
  builder.set_issuer_name(&name)?;
  builder.set_pubkey(&pkey)?;
  builder.set_not_before(&Asn1Time::days_from_now(0)?)?;
  builder.set_not_after(&Asn1Time::days_from_now(3650)?)?;
  builder.sign(&pkey, MessageDigest::sha256())?;
  let cert = builder.build();

  Ok((pkey, cert))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identity_is_deterministic_for_same_inputs() {
    let key = [7u8; 32];
    let material_a = derive_material(&key, 42);
    let material_b = derive_material(&key, 42);
    assert_eq!(material_a, material_b);

    let (pkey_a, _) = derive_identity(&material_a).unwrap();
    let (pkey_b, _) = derive_identity(&material_b).unwrap();
    assert_eq!(pkey_a.public_key_to_der().unwrap(), pkey_b.public_key_to_der().unwrap());
  }

  #[test]
  fn identity_differs_across_system_ids() {
    let key = [7u8; 32];
    let (pkey_a, _) = derive_identity(&derive_material(&key, 1)).unwrap();
    let (pkey_b, _) = derive_identity(&derive_material(&key, 2)).unwrap();
    assert_ne!(pkey_a.public_key_to_der().unwrap(), pkey_b.public_key_to_der().unwrap());
  }
}
