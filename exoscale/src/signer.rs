//! `EXO2-HMAC-SHA256` request signatures.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const AUTH_SCHEME: &str = "EXO2-HMAC-SHA256";

/// Builds the `Authorization` header value for one request.
///
/// The signed message is the method and path, the body, the query
/// parameter values, an empty signed-headers line and the expiry as a Unix
/// timestamp, separated by newlines.
pub fn authorization(
    api_key: &str,
    api_secret: &str,
    method: &str,
    path: &str,
    body: &str,
    expires: i64,
) -> Result<String, String> {
    let message = format!("{method} {path}\n{body}\n\n\n{expires}");

    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .map_err(|err| format!("invalid API secret: {err}"))?;
    mac.update(message.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "{AUTH_SCHEME} credential={api_key},expires={expires},signature={signature}"
    ))
}
