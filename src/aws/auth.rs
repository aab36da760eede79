//! AWS Authentication
//!
//! Static credentials come from the shared credentials file (one profile per
//! configured account) or from the standard environment variables. Requests
//! are signed with Signature Version 4.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Access key pair, optionally with a session token
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: session_token.map(|s| s.to_string()),
        }
    }

    /// Credentials for a named profile, or the ambient ones when no profile
    /// is given (environment first, then the `AWS_PROFILE` or `default`
    /// profile of the credentials file)
    pub fn resolve(profile: Option<&str>) -> Result<Self> {
        if let Some(profile) = profile {
            return Self::from_profile(profile);
        }

        if let Some(creds) = Self::from_env() {
            tracing::debug!("Using credentials from environment");
            return Ok(creds);
        }

        let profile = std::env::var("AWS_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_profile(&profile)
    }

    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
    pub fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok().filter(|s| !s.is_empty())?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .ok()
            .filter(|s| !s.is_empty())?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok().filter(|s| !s.is_empty());

        Some(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }

    /// Read one profile from the shared credentials file
    pub fn from_profile(profile: &str) -> Result<Self> {
        if !validate_profile_name(profile) {
            anyhow::bail!("Invalid profile name '{}'", profile);
        }

        let path = credentials_file_path().context("Cannot locate the AWS credentials file")?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credentials file {:?}", path))?;

        parse_profile(&content, profile)
            .with_context(|| format!("Profile '{}' not found or incomplete in {:?}", profile, path))
    }
}

/// Location of the shared credentials file
pub fn credentials_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }

    dirs::home_dir().map(|p| p.join(".aws").join("credentials"))
}

/// Profile names are limited to letters, digits, `-`, `_`, `.` and `@`
fn validate_profile_name(profile: &str) -> bool {
    !profile.is_empty()
        && profile.len() <= 128
        && profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.@".contains(c))
}

/// Pull one profile's keys out of INI-formatted credentials
pub fn parse_profile(content: &str, profile: &str) -> Option<Credentials> {
    let mut in_section = false;
    let mut access_key_id = None;
    let mut secret_access_key = None;
    let mut session_token = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim();
            let name = name.strip_prefix("profile ").unwrap_or(name).trim();
            in_section = name == profile;
            continue;
        }

        if !in_section {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().to_string();
            match key.trim() {
                "aws_access_key_id" => access_key_id = Some(value),
                "aws_secret_access_key" => secret_access_key = Some(value),
                "aws_session_token" => session_token = Some(value),
                _ => {},
            }
        }
    }

    Some(Credentials {
        access_key_id: access_key_id?,
        secret_access_key: secret_access_key?,
        session_token,
    })
}

/// The parts of a request that go into its signature
#[derive(Debug, Clone)]
pub struct SigningInput<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Already canonical: sorted and percent-encoded
    pub query: &'a str,
    /// Every header to sign, `host` and `x-amz-date` included
    pub headers: &'a [(String, String)],
    pub payload: &'a [u8],
}

/// Where and when a signature applies
#[derive(Debug, Clone, Copy)]
pub struct SigningScope<'a> {
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

impl SigningScope<'_> {
    pub fn amz_date(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn date_stamp(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    fn credential_scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.date_stamp(),
            self.region,
            self.service
        )
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex SHA-256 of a request body, as sent in `x-amz-content-sha256`
pub fn payload_hash(payload: &[u8]) -> String {
    sha256_hex(payload)
}

/// Percent-encode everything but unreserved characters (and `/` unless
/// `encode_slash`)
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            },
            b'/' if !encode_slash => out.push('/'),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

/// Sorted, encoded query string; usable both on the wire and for signing
pub fn canonical_query(pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the per-day signing key
pub fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn sorted_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    let mut sorted: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    sorted.sort();
    sorted
}

fn canonical_request(input: &SigningInput<'_>, headers: &[(String, String)]) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method,
        input.path,
        input.query,
        canonical_headers,
        signed_headers,
        sha256_hex(input.payload)
    )
}

/// Compute the `Authorization` header value for a request
pub fn authorization(
    input: &SigningInput<'_>,
    credentials: &Credentials,
    scope: &SigningScope<'_>,
) -> String {
    let headers = sorted_headers(input.headers);
    let canonical = canonical_request(input, &headers);
    tracing::trace!("canonical request:\n{}", canonical);

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        scope.amz_date(),
        scope.credential_scope(),
        sha256_hex(canonical.as_bytes())
    );

    let key = signing_key(
        &credentials.secret_access_key,
        &scope.date_stamp(),
        scope.region,
        scope.service,
    );
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        credentials.access_key_id,
        scope.credential_scope(),
        signed_headers,
        signature
    )
}
