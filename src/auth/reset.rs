use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

const RAW_TOKEN_LEN: usize = 32;
pub const RESET_TOKEN_TTL: Duration = Duration::minutes(10);

/// One-time reset secret. The raw value goes to the user (by email); only
/// its digest is ever persisted.
pub struct ResetToken {
    pub raw: String,
    pub digest: Vec<u8>,
    pub expires_at: OffsetDateTime,
}

pub fn generate_reset_token() -> ResetToken {
    let raw: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RAW_TOKEN_LEN)
        .map(char::from)
        .collect();
    ResetToken {
        digest: hash_reset_token(&raw),
        expires_at: OffsetDateTime::now_utc() + RESET_TOKEN_TTL,
        raw,
    }
}

/// Digest of a presented token, for lookup against the stored value.
pub fn hash_reset_token(raw: &str) -> Vec<u8> {
    Sha256::digest(raw.as_bytes()).to_vec()
}

/// A presented secret redeems the stored state only while both reset
/// columns are populated, the digest matches and the expiry is in the
/// future. Consumption clears the columns, so a second redemption of the
/// same secret fails here.
pub fn token_redeemable(
    stored_digest: Option<&[u8]>,
    expires_at: Option<OffsetDateTime>,
    presented: &str,
    now: OffsetDateTime,
) -> bool {
    match (stored_digest, expires_at) {
        (Some(digest), Some(expires)) => {
            digest == hash_reset_token(presented).as_slice() && expires > now
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_token_is_never_the_stored_value() {
        let token = generate_reset_token();
        assert_eq!(token.raw.len(), RAW_TOKEN_LEN);
        assert_ne!(token.raw.as_bytes().to_vec(), token.digest);
    }

    #[test]
    fn digest_is_deterministic_and_matches_generated() {
        let token = generate_reset_token();
        assert_eq!(hash_reset_token(&token.raw), token.digest);
        assert_eq!(hash_reset_token("abc"), hash_reset_token("abc"));
        assert_ne!(hash_reset_token("abc"), hash_reset_token("abd"));
    }

    #[test]
    fn expiry_is_ten_minutes_out() {
        let token = generate_reset_token();
        let delta = token.expires_at - OffsetDateTime::now_utc();
        assert!(delta <= Duration::minutes(10));
        assert!(delta > Duration::minutes(9));
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate_reset_token();
        let b = generate_reset_token();
        assert_ne!(a.raw, b.raw);
    }

    #[test]
    fn fresh_token_is_redeemable() {
        let token = generate_reset_token();
        let now = OffsetDateTime::now_utc();
        assert!(token_redeemable(
            Some(token.digest.as_slice()),
            Some(token.expires_at),
            &token.raw,
            now,
        ));
    }

    #[test]
    fn consumed_token_is_not_redeemable_again() {
        let token = generate_reset_token();
        let now = OffsetDateTime::now_utc();
        // Consumption nulls both columns.
        assert!(!token_redeemable(None, None, &token.raw, now));
        assert!(!token_redeemable(None, Some(token.expires_at), &token.raw, now));
        assert!(!token_redeemable(Some(token.digest.as_slice()), None, &token.raw, now));
    }

    #[test]
    fn expired_token_is_not_redeemable() {
        let token = generate_reset_token();
        let later = token.expires_at + Duration::seconds(1);
        assert!(!token_redeemable(
            Some(token.digest.as_slice()),
            Some(token.expires_at),
            &token.raw,
            later,
        ));
    }

    #[test]
    fn wrong_secret_is_not_redeemable() {
        let token = generate_reset_token();
        let now = OffsetDateTime::now_utc();
        assert!(!token_redeemable(
            Some(token.digest.as_slice()),
            Some(token.expires_at),
            "not-the-secret",
            now,
        ));
    }
}
