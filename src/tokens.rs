use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;

/// Generate a serial: 32 random bytes, URL-safe base64 (43 characters).
///
/// Identifies one persistent-login lineage; generated once per device.
pub fn generate_serial() -> String {
    random_secret()
}

/// Generate a one-time token: 32 random bytes, URL-safe base64.
pub fn generate_token() -> String {
    random_secret()
}

fn random_secret() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    URL_SAFE_NO_PAD.encode(bytes)
}
