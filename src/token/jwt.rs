use super::jwks::{decode_private_key, Jwks};
use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

pub const ALG_RS256: &str = "RS256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

impl TokenHeader {
    fn rs256(kid: impl Into<String>) -> Self {
        Self {
            alg: ALG_RS256.to_string(),
            typ: "JWT".to_string(),
            kid: kid.into(),
        }
    }
}

/// Identity claims carried by a session bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("failed to parse RSA key")]
    KeyParse,
    #[error("rsa error")]
    Rsa(#[from] rsa::errors::Error),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Split a compact JWS into its three segments.
fn split_token(token: &str) -> Result<(&str, &str, &str), Error> {
    let mut parts = token.split('.');
    let header = parts.next().ok_or(Error::TokenFormat)?;
    let claims = parts.next().ok_or(Error::TokenFormat)?;
    let signature = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() || header.is_empty() || claims.is_empty() {
        return Err(Error::TokenFormat);
    }
    Ok((header, claims, signature))
}

/// Create an RS256 signed session token.
///
/// Used by development issuers and test harnesses; production tokens come
/// from the identity provider.
///
/// # Errors
///
/// Returns an error if the private key cannot be parsed or the header/claims
/// cannot be encoded.
pub fn sign_rs256(
    private_key_pem_or_der: &[u8],
    kid: impl Into<String>,
    claims: &Claims,
) -> Result<String, Error> {
    let header = TokenHeader::rs256(kid);
    let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(claims)?);

    let private_key = decode_private_key(private_key_pem_or_der)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an RS256 session token and return its claims.
///
/// The signature is checked before any claim, so a tampered token is reported
/// as [`Error::InvalidSignature`] even when it is also past its expiry.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the algorithm is not RS256 or the `kid` is not in `jwks`,
/// - the signature does not match,
/// - `iss`/`aud` differ from the expected values,
/// - `exp` is at or before `now_unix_seconds` ([`Error::Expired`]).
pub fn verify_rs256(
    token: &str,
    jwks: &Jwks,
    expected_issuer: &str,
    expected_audience: &str,
    now_unix_seconds: i64,
) -> Result<Claims, Error> {
    let (header_b64, claims_b64, sig_b64) = split_token(token)?;

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != ALG_RS256 {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let jwk = jwks
        .find_by_kid(&header.kid)
        .ok_or_else(|| Error::UnknownKid(header.kid.clone()))?;

    let verifying_key = VerifyingKey::<Sha256>::new(jwk.to_rsa_public_key()?);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: Claims = b64d_json(claims_b64)?;
    if claims.iss != expected_issuer {
        return Err(Error::InvalidIssuer);
    }
    if claims.aud != expected_audience {
        return Err(Error::InvalidAudience);
    }
    if claims.exp <= now_unix_seconds {
        return Err(Error::Expired);
    }

    Ok(claims)
}

/// Decode claims without verifying the signature.
///
/// Only for client-side display of who is signed in; never use the result to
/// make an authorization decision.
///
/// # Errors
///
/// Returns an error if the token is malformed.
pub fn peek_claims(token: &str) -> Result<Claims, Error> {
    let (_, claims_b64, _) = split_token(token)?;
    b64d_json(claims_b64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY_PEM: &str = include_str!("testdata/rsa_private.pem");
    const OTHER_KEY_PEM: &str = include_str!("testdata/rsa_other.pem");
    const ISSUER: &str = "https://id.aliro.test";
    const AUDIENCE: &str = "aliro";
    const NOW: i64 = 1_700_000_000;

    fn claims() -> Claims {
        Claims {
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            sub: "user-1".to_string(),
            exp: NOW + 300,
            iat: NOW,
            email: Some("ada@example.com".to_string()),
            name: None,
        }
    }

    #[test]
    fn sign_and_verify() -> Result<(), Error> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_KEY_PEM.as_bytes(), "k1")?;
        let token = sign_rs256(TEST_KEY_PEM.as_bytes(), "k1", &claims())?;

        let verified = verify_rs256(&token, &jwks, ISSUER, AUDIENCE, NOW)?;
        assert_eq!(verified, claims());
        Ok(())
    }

    #[test]
    fn rejects_expired_wrong_aud_and_wrong_iss() -> Result<(), Error> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_KEY_PEM.as_bytes(), "k")?;
        let token = sign_rs256(TEST_KEY_PEM.as_bytes(), "k", &claims())?;

        let result = verify_rs256(&token, &jwks, ISSUER, "other", NOW);
        assert!(matches!(result, Err(Error::InvalidAudience)));

        let result = verify_rs256(&token, &jwks, "https://evil.test", AUDIENCE, NOW);
        assert!(matches!(result, Err(Error::InvalidIssuer)));

        // exp is exclusive
        let result = verify_rs256(&token, &jwks, ISSUER, AUDIENCE, NOW + 300);
        assert!(matches!(result, Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn signature_from_another_key_is_rejected() -> Result<(), Error> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_KEY_PEM.as_bytes(), "k1")?;
        let forged = sign_rs256(OTHER_KEY_PEM.as_bytes(), "k1", &claims())?;

        let result = verify_rs256(&forged, &jwks, ISSUER, AUDIENCE, NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));

        // An expired forgery is still a forgery.
        let result = verify_rs256(&forged, &jwks, ISSUER, AUDIENCE, NOW + 9999);
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn unknown_kid_and_garbage() -> Result<(), Error> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_KEY_PEM.as_bytes(), "k1")?;
        let token = sign_rs256(TEST_KEY_PEM.as_bytes(), "k2", &claims())?;

        let result = verify_rs256(&token, &jwks, ISSUER, AUDIENCE, NOW);
        assert!(matches!(result, Err(Error::UnknownKid(kid)) if kid == "k2"));

        assert!(matches!(
            verify_rs256("not-a-token", &jwks, ISSUER, AUDIENCE, NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            verify_rs256("a.b.c.d", &jwks, ISSUER, AUDIENCE, NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            verify_rs256("!!.??.~~", &jwks, ISSUER, AUDIENCE, NOW),
            Err(Error::Base64)
        ));
        Ok(())
    }

    #[test]
    fn rejects_other_algorithms() -> Result<(), Error> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_KEY_PEM.as_bytes(), "k1")?;
        let header = b64e_json(&serde_json::json!({"alg": "none", "typ": "JWT", "kid": "k1"}))?;
        let body = b64e_json(&claims())?;
        let token = format!("{header}.{body}.");

        let result = verify_rs256(&token, &jwks, ISSUER, AUDIENCE, NOW);
        assert!(matches!(result, Err(Error::UnsupportedAlg(alg)) if alg == "none"));
        Ok(())
    }

    #[test]
    fn peek_reads_claims_without_keys() -> Result<(), Error> {
        let token = sign_rs256(OTHER_KEY_PEM.as_bytes(), "whatever", &claims())?;
        let peeked = peek_claims(&token)?;
        assert_eq!(peeked.sub, "user-1");
        assert!(peek_claims("only.two").is_err());
        Ok(())
    }
}
