//! Challenge-response login.
//!
//! The server generates an RSA keypair per process, hands the public key to
//! connecting clients as a login challenge, and decrypts the password they
//! send back. Passwords never travel in the clear: clients hash them with a
//! fixed salt and encrypt the digest with OAEP before it leaves the machine.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha512};

/// Challenge property carrying the base64 DER public key.
pub const RSA_PUBLIC_KEY: &str = "RSA_PUBLIC_KEY";
/// Response property carrying the base64 OAEP ciphertext.
pub const RSA_PASSWORD: &str = "RSAPWD";
/// Response property marking a login without a password.
pub const ANONYMOUS_LOGIN: &str = "ANONYMOUS_LOGIN";

/// Salt prepended to the password before hashing.
const PASSWORD_SALT: &str = "TripleA";

/// Default key size. OAEP with SHA-512 needs at least 3072 bits to fit the
/// 128-character hex digest.
const DEFAULT_KEY_BITS: usize = 4096;

pub struct RsaLogin {
    private_key: RsaPrivateKey,
    public_key_b64: String,
}

impl RsaLogin {
    pub fn new() -> Result<Self, String> {
        Self::with_key_bits(DEFAULT_KEY_BITS)
    }

    /// Key size override, for callers that can accept a weaker key in
    /// exchange for faster generation.
    pub fn with_key_bits(bits: usize) -> Result<Self, String> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| format!("RSA key generation failed: {}", e))?;
        let public_key_b64 = RsaPublicKey::from(&private_key)
            .to_public_key_der()
            .map_err(|e| format!("public key encoding failed: {}", e))?
            .as_bytes()
            .to_vec();
        Ok(RsaLogin {
            private_key,
            public_key_b64: BASE64.encode(public_key_b64),
        })
    }

    /// Challenge properties to merge into the login challenge sent to a
    /// client.
    pub fn new_challenge(&self) -> HashMap<String, String> {
        let mut challenge = HashMap::new();
        challenge.insert(RSA_PUBLIC_KEY.to_string(), self.public_key_b64.clone());
        challenge
    }

    /// Whether a login response carries an RSA-encrypted password.
    pub fn can_process_response(response: &HashMap<String, String>) -> bool {
        response.contains_key(RSA_PASSWORD)
    }

    /// Whether a login response asks for an anonymous session.
    pub fn is_anonymous(response: &HashMap<String, String>) -> bool {
        response.contains_key(ANONYMOUS_LOGIN)
    }

    /// Response properties for a passwordless login.
    pub fn anonymous_response() -> HashMap<String, String> {
        let mut response = HashMap::new();
        response.insert(ANONYMOUS_LOGIN.to_string(), "true".to_string());
        response
    }

    /// Decrypts the password from a login response and hands it to `action`.
    /// The plaintext digest lives only for the duration of the call.
    pub fn decrypt_password_for_action<T, F>(
        &self,
        response: &HashMap<String, String>,
        action: F,
    ) -> Result<T, String>
    where
        F: FnOnce(&str) -> T,
    {
        let ciphertext_b64 = response
            .get(RSA_PASSWORD)
            .ok_or("login response has no encrypted password")?;
        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| format!("encrypted password is not valid base64: {}", e))?;
        let plaintext = self
            .private_key
            .decrypt(Oaep::new::<Sha512>(), &ciphertext)
            .map_err(|e| format!("password decryption failed: {}", e))?;
        let password = String::from_utf8(plaintext)
            .map_err(|_| "decrypted password is not valid UTF-8".to_string())?;
        Ok(action(&password))
    }

    /// The canonical stored form of a password.
    pub fn hash_password_with_salt(password: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(PASSWORD_SALT.as_bytes());
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Client side: hashes a password and encrypts the digest under the
    /// server's challenge key. Returns base64 ciphertext for the response
    /// properties.
    pub fn encrypt_password(server_public_key_b64: &str, password: &str) -> Result<String, String> {
        let der = BASE64
            .decode(server_public_key_b64)
            .map_err(|e| format!("challenge key is not valid base64: {}", e))?;
        let public_key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| format!("challenge key is not a valid public key: {}", e))?;

        let digest = Self::hash_password_with_salt(password);
        let mut rng = rand::thread_rng();
        let ciphertext = public_key
            .encrypt(&mut rng, Oaep::new::<Sha512>(), digest.as_bytes())
            .map_err(|e| format!("password encryption failed: {}", e))?;
        Ok(BASE64.encode(ciphertext))
    }
}
