//! Access token claims and OAuth redirect parsing.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use shared::{AuthSession, User};
use url::Url;
use uuid::Uuid;

use crate::error::{RemoteError, RemoteResult};

/// Claims the auth service puts in its access tokens
#[derive(Debug, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}

/// Read the claims without verifying the signature.
///
/// The token came straight from the auth service; the backend verifies it on
/// every request, the client only needs the identity and expiry.
pub fn decode_claims(access_token: &str) -> RemoteResult<AccessClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data =
        jsonwebtoken::decode::<AccessClaims>(access_token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// Tokens carried in the fragment of an OAuth redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<i64>,
}

impl RedirectTokens {
    /// Parse `…/projects#access_token=…&refresh_token=…&expires_in=3600`
    pub fn from_redirect_url(redirect_url: &str) -> RemoteResult<Self> {
        let url = Url::parse(redirect_url)?;

        // The auth service reports failures in the fragment as well
        let fragment = url.fragment().unwrap_or_default();
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(fragment.as_bytes())
            .into_owned()
            .collect();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        if let Some(description) = get("error_description").or_else(|| get("error")) {
            return Err(RemoteError::Api {
                status: 400,
                message: description,
            });
        }

        let access_token = get("access_token")
            .ok_or_else(|| RemoteError::InvalidRedirect("missing access_token".to_string()))?;
        let refresh_token = get("refresh_token")
            .ok_or_else(|| RemoteError::InvalidRedirect("missing refresh_token".to_string()))?;
        let expires_in = get("expires_in").and_then(|v| v.parse().ok());

        Ok(Self {
            access_token,
            refresh_token,
            expires_in,
        })
    }

    /// Build a session, taking identity and expiry from the access token
    pub fn into_session(self, now: DateTime<Utc>) -> RemoteResult<AuthSession> {
        let claims = decode_claims(&self.access_token)?;
        let expires_at = match self.expires_in {
            Some(secs) => Duration::try_seconds(secs)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or_else(|| RemoteError::InvalidRedirect("expires_in out of range".to_string()))?,
            None => Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .ok_or_else(|| RemoteError::InvalidRedirect("invalid exp claim".to_string()))?,
        };

        Ok(AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: User {
                id: claims.sub,
                email: claims.email,
            },
        })
    }
}

#[cfg(test)]
pub(crate) fn test_access_token(user_id: Uuid, email: &str, exp: i64) -> String {
    use jsonwebtoken::{EncodingKey, Header};

    let claims = serde_json::json!({
        "sub": user_id,
        "email": email,
        "exp": exp,
        "role": "authenticated",
    });
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret"))
        .unwrap()
}
