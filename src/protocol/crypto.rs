use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};

use crate::core::{DeviceToken, Error, Result};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES key/iv pair derived from a device token
///
/// Derived once per session and cached; only regenerated if the token
/// itself changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    key: [u8; 16],
    iv: [u8; 16],
}

impl SessionKeys {
    /// Derives the session keys: `key = MD5(token)`, `iv = MD5(key ++ token)`
    pub fn derive(token: &DeviceToken) -> Self {
        let key: [u8; 16] = Md5::digest(token.as_bytes()).into();
        let mut hasher = Md5::new();
        hasher.update(key);
        hasher.update(token.as_bytes());
        let iv: [u8; 16] = hasher.finalize().into();
        SessionKeys { key, iv }
    }

    /// Encrypts a payload with AES-128-CBC and PKCS7 padding
    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plain)
    }

    /// Decrypts an AES-128-CBC ciphertext, stripping PKCS7 padding
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::crypto("ciphertext padding invalid"))
    }
}

/// Computes the frame checksum: `MD5(header ++ token ++ ciphertext)`
pub fn checksum(header: &[u8; 16], token: &DeviceToken, ciphertext: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(header);
    hasher.update(token.as_bytes());
    hasher.update(ciphertext);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_token() -> DeviceToken {
        DeviceToken::from_hex("00112233445566778899aabbccddeeff").unwrap()
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let token = test_token();
        let keys1 = SessionKeys::derive(&token);
        let keys2 = SessionKeys::derive(&token);
        assert_eq!(keys1, keys2);
    }

    #[test]
    fn test_key_derivation_depends_on_token() {
        let keys1 = SessionKeys::derive(&test_token());
        let keys2 = SessionKeys::derive(&DeviceToken([0x42; 16]));
        assert_ne!(keys1, keys2);
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let keys = SessionKeys::derive(&test_token());
        let plain = br#"{"id":1,"method":"get_prop","params":["power"]}"#;

        let ciphertext = keys.encrypt(plain);
        assert_ne!(&ciphertext[..], &plain[..]);
        assert_eq!(ciphertext.len() % 16, 0);

        let decrypted = keys.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn test_decrypt_rejects_partial_block() {
        let keys = SessionKeys::derive(&test_token());
        assert!(keys.decrypt(&[0u8; 15]).is_err());
    }

    #[test]
    fn test_checksum_covers_all_inputs() {
        let token = test_token();
        let header = [0x21u8; 16];
        let body = [1u8, 2, 3, 4];

        let base = checksum(&header, &token, &body);
        assert_ne!(base, checksum(&[0x22; 16], &token, &body));
        assert_ne!(base, checksum(&header, &DeviceToken([9; 16]), &body));
        assert_ne!(base, checksum(&header, &token, &[1, 2, 3, 5]));
    }
}
