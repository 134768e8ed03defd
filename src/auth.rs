// 🔐 Telegram init-data verification for the web surface
//
// The mini-app sends `k=v&k=v&...&hash=<hex>`. The check string is every pair
// except `hash`, sorted by key and joined with '\n'; it is signed with
// HMAC-SHA256 under the key SHA-256(bot_token).

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// The `user` object embedded in verified init data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl TelegramUser {
    /// Name shown on listings: @username if set, otherwise first name
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) if !username.is_empty() => format!("@{}", username),
            _ => self.first_name.clone(),
        }
    }
}

/// Verify signed init data and return the user it vouches for
///
/// Returns `None` for malformed input, a missing or wrong hash, or a missing
/// `user` field.
pub fn verify_init_data(init_data: &str, bot_token: &str) -> Option<TelegramUser> {
    let mut fields = parse_pairs(init_data)?;
    let received = fields.remove("hash")?;
    let received = hex::decode(received).ok()?;

    let mut mac = HmacSha256::new_from_slice(&secret_key(bot_token)).ok()?;
    mac.update(check_string(&fields).as_bytes());
    if mac.verify_slice(&received).is_err() {
        debug!("init data signature mismatch");
        return None;
    }

    let user = fields.get("user")?;
    serde_json::from_str(user).ok()
}

/// Hex signature for a set of fields (the server side of `verify_init_data`)
pub fn sign_fields(fields: &BTreeMap<String, String>, bot_token: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(&secret_key(bot_token)) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(check_string(fields).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn secret_key(bot_token: &str) -> Vec<u8> {
    Sha256::digest(bot_token.as_bytes()).to_vec()
}

fn check_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split `k=v&k=v`, percent-decoding values; any pair without '=' rejects the whole string
fn parse_pairs(init_data: &str) -> Option<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for item in init_data.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = item.split_once('=')?;
        let value = urlencoding::decode(value).ok()?.into_owned();
        fields.insert(key.to_string(), value);
    }
    Some(fields)
}
