//! Session tokens for the cookie auth gate.

/// Cookie that carries the session token.
pub const AUTH_COOKIE: &str = "homed-auth-token";

/// Mint a session token (hex-encoded, 32 bytes = 64 hex chars).
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
