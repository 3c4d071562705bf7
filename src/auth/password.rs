use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::error;

lazy_static! {
    // Verified against when an account has no stored digest, so that login
    // pays for one argon2 verification on every path.
    static ref DUMMY_HASH: String =
        hash_password("userhub-dummy-credential").expect("argon2 dummy digest");
}

/// Hash a plaintext credential with a fresh salt. The salt is embedded in the
/// PHC output string, so verification needs nothing beyond the digest.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Verification failure is a normal outcome, not an error: mismatch,
/// malformed digest and empty input all come back false.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    if plain.is_empty() || hash.is_empty() {
        return false;
    }
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Burn one verification against the dummy digest when there is no real one
/// to check, keeping unknown-account logins on the same timing profile.
pub fn verify_dummy(plain: &str) {
    let _ = verify_password(plain, &DUMMY_HASH);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(verify_password(password, &hash));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let password = "correct-horse-battery-staple";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn verify_is_false_on_malformed_hash() {
        assert!(!verify_password("anything", "not-a-valid-hash"));
    }

    #[test]
    fn verify_is_false_on_empty_input() {
        let hash = hash_password("something").expect("hashing should succeed");
        assert!(!verify_password("", &hash));
        assert!(!verify_password("something", ""));
    }

    #[test]
    fn hash_is_salted_per_call() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn dummy_verify_does_not_panic() {
        verify_dummy("whatever");
        verify_dummy("");
    }
}
