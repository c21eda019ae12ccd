//! Subscription verification handshake.
//!
//! Before delivering events the platform sends
//! `GET ?hub.mode=subscribe&hub.verify_token=<token>&hub.challenge=<value>`
//! and expects the challenge echoed back verbatim.

use url::form_urlencoded;

/// Mode value the platform sends when subscribing.
pub const SUBSCRIBE_MODE: &str = "subscribe";

/// Query parameters of a verification request.
///
/// Every field is optional; a missing field simply fails verification.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyParams {
    pub mode: Option<String>,
    pub verify_token: Option<String>,
    pub challenge: Option<String>,
}

impl VerifyParams {
    /// Parse the raw query string.
    ///
    /// Parsing never fails: malformed pairs decode lossily and unknown keys
    /// are ignored. When a key repeats, the first value wins.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = VerifyParams::default();
        let Some(query) = query else {
            return params;
        };

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "hub.mode" => &mut params.mode,
                "hub.verify_token" => &mut params.verify_token,
                "hub.challenge" => &mut params.challenge,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }

        params
    }
}

/// Check a handshake against the configured token.
///
/// Returns the challenge to echo when `mode` is `subscribe` and the token
/// matches exactly, `None` otherwise. A missing challenge echoes as empty.
pub fn verify_subscription<'a>(expected_token: &str, params: &'a VerifyParams) -> Option<&'a str> {
    let mode_ok = params.mode.as_deref() == Some(SUBSCRIBE_MODE);
    let token_ok = params.verify_token.as_deref() == Some(expected_token);

    if mode_ok && token_ok {
        Some(params.challenge.as_deref().unwrap_or(""))
    } else {
        None
    }
}
