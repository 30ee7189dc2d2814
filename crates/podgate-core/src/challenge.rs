use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use crate::error::{GatewayError, GatewayResult};
use crate::keystore::SharedKey;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

const AUTH_FAILED: &str = "authentication failed";

#[derive(Debug, Clone)]
pub struct ChallengeVerifier {
    key: SharedKey,
}

impl ChallengeVerifier {
    pub fn new(key: SharedKey) -> Self {
        Self { key }
    }

    pub fn recover_token(&self, iv: Option<&str>, auth: Option<&str>) -> GatewayResult<Vec<u8>> {
        let (Some(iv), Some(auth)) = (iv, auth) else {
            return Err(GatewayError::auth(AUTH_FAILED));
        };
        let iv = B64
            .decode(iv.trim())
            .map_err(|_| GatewayError::auth(AUTH_FAILED))?;
        let ciphertext = B64
            .decode(auth.trim())
            .map_err(|_| GatewayError::auth(AUTH_FAILED))?;
        decrypt_challenge(self.key.as_bytes(), &iv, &ciphertext)
    }
}

pub fn decrypt_challenge(
    key: impl AsRef<[u8]>,
    iv: impl AsRef<[u8]>,
    ciphertext: &[u8],
) -> GatewayResult<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(GatewayError::auth(AUTH_FAILED));
    }
    let cipher = Aes256CbcDec::new_from_slices(key.as_ref(), iv.as_ref())
        .map_err(|_| GatewayError::auth(AUTH_FAILED))?;
    let mut plaintext = vec![0; ciphertext.len()];
    cipher
        .decrypt_padded_b2b_mut::<NoPadding>(ciphertext, &mut plaintext)
        .map_err(|_| GatewayError::auth(AUTH_FAILED))?;
    Ok(plaintext)
}

pub fn encrypt_challenge(
    key: impl AsRef<[u8]>,
    iv: impl AsRef<[u8]>,
    token: &[u8],
) -> GatewayResult<Vec<u8>> {
    if token.is_empty() || token.len() % BLOCK_LEN != 0 {
        return Err(GatewayError::validation(
            "challenge plaintext must be a whole number of blocks",
        ));
    }
    let cipher = Aes256CbcEnc::new_from_slices(key.as_ref(), iv.as_ref())
        .map_err(|err| GatewayError::validation(err.to_string()))?;
    let mut ciphertext = vec![0; token.len()];
    cipher
        .encrypt_padded_b2b_mut::<NoPadding>(token, &mut ciphertext)
        .map_err(|_| GatewayError::validation("challenge encryption failed"))?;
    Ok(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const KEY: [u8; 32] = hex!("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4");
    const IV: [u8; 16] = hex!("000102030405060708090a0b0c0d0e0f");

    fn verifier() -> ChallengeVerifier {
        ChallengeVerifier::new(SharedKey::from_bytes(KEY))
    }

    #[test]
    fn matches_reference_vector() {
        // NIST SP 800-38A F.2.5, first block.
        let plaintext = hex!("6bc1bee22e409f96e93d7e117393172a");
        let ciphertext = hex!("f58c4c04d6e5f1ba779eabfb5f7bfbd6");
        assert_eq!(encrypt_challenge(KEY, IV, &plaintext).unwrap(), ciphertext);
        assert_eq!(decrypt_challenge(KEY, IV, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn recovers_token_from_base64_challenge() {
        let token = [9u8; 16];
        let ciphertext = encrypt_challenge(KEY, IV, &token).unwrap();
        let recovered = verifier()
            .recover_token(Some(&B64.encode(IV)), Some(&B64.encode(&ciphertext)))
            .unwrap();
        assert_eq!(recovered, token);
    }

    #[test]
    fn is_deterministic() {
        let ciphertext = encrypt_challenge(KEY, IV, &[3u8; 16]).unwrap();
        let iv = B64.encode(IV);
        let auth = B64.encode(&ciphertext);
        let first = verifier().recover_token(Some(&iv), Some(&auth)).unwrap();
        let second = verifier().recover_token(Some(&iv), Some(&auth)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn flipped_bit_changes_candidate() {
        let token = [5u8; 16];
        let mut ciphertext = encrypt_challenge(KEY, IV, &token).unwrap();
        ciphertext[0] ^= 0x01;
        let candidate = decrypt_challenge(KEY, IV, &ciphertext).unwrap();
        assert_ne!(candidate, token);
    }

    #[test]
    fn missing_parameters_fail_auth() {
        let v = verifier();
        assert!(matches!(v.recover_token(None, Some("AAAA")), Err(GatewayError::Auth(_))));
        assert!(matches!(v.recover_token(Some("AAAA"), None), Err(GatewayError::Auth(_))));
    }

    #[test]
    fn malformed_input_fails_auth() {
        let v = verifier();
        let iv = B64.encode(IV);
        assert!(matches!(
            v.recover_token(Some("not base64!"), Some(&B64.encode([0u8; 16]))),
            Err(GatewayError::Auth(_))
        ));
        assert!(matches!(
            v.recover_token(Some(&iv), Some(&B64.encode([0u8; 15]))),
            Err(GatewayError::Auth(_))
        ));
        assert!(matches!(
            v.recover_token(Some(&B64.encode([0u8; 8])), Some(&B64.encode([0u8; 16]))),
            Err(GatewayError::Auth(_))
        ));
        assert!(matches!(v.recover_token(Some(&iv), Some("")), Err(GatewayError::Auth(_))));
    }
}
