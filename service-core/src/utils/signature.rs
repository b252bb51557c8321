use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` keyed with `secret`.
pub fn sign_hex(secret: &str, payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex HMAC-SHA256 signature using constant-time comparison.
///
/// The digest is always recomputed from `payload`; nothing is cached.
pub fn verify_hex(secret: &str, payload: &[u8], signature: &str) -> Result<bool, anyhow::Error> {
    let expected = sign_hex(secret, payload)?;

    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.trim().as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_generation_and_verification() {
        let secret = "whsec_test";
        let body = br#"{"event":"subscription.charged"}"#;

        let signature = sign_hex(secret, body).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_hex(secret, body, &signature).unwrap());
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2.
        let signature = sign_hex("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_invalid_signature() {
        let secret = "whsec_test";
        let body = b"order_1|pay_1";

        let signature = sign_hex(secret, body).unwrap();
        let flipped = format!("{}{}", if signature.starts_with('a') { 'b' } else { 'a' }, &signature[1..]);

        assert!(!verify_hex(secret, body, &flipped).unwrap());
        assert!(!verify_hex(secret, body, "").unwrap());
        assert!(!verify_hex(secret, body, &signature[..32]).unwrap());
    }

    #[test]
    fn test_tampered_body() {
        let secret = "whsec_test";
        let body = br#"{"paid_count":1}"#;
        let tampered = br#"{"paid_count":9}"#;

        let signature = sign_hex(secret, body).unwrap();
        assert!(!verify_hex(secret, tampered, &signature).unwrap());

        let resigned = sign_hex(secret, tampered).unwrap();
        assert!(verify_hex(secret, tampered, &resigned).unwrap());
    }
}
