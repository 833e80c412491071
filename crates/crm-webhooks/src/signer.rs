//! Payload canonicalization and HMAC-SHA256 signing.
//!
//! The signature covers the canonical form of the envelope: compact JSON
//! with object keys sorted at every depth. The exact canonical bytes are
//! also what goes on the wire, so a receiver can verify over the raw body.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the `X-Webhook-Signature` header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Serializes `value` as compact JSON with lexicographically sorted keys.
///
/// Independent of the map implementation backing `serde_json::Value`, so
/// insertion order never leaks into the output.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(&Value::String(key.clone()), out);
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut String) {
    // Scalars (strings with escaping, numbers, bools, null) use serde_json's
    // compact formatter, which cannot fail for these variants.
    out.push_str(&value.to_string());
}

/// HMAC-SHA256 over `body`, formatted as `sha256=<hex>`.
#[must_use]
pub fn sign_bytes(secret: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Signs the canonical form of `payload`.
///
/// Logically equal payloads produce byte-identical signatures regardless of
/// key insertion order.
#[must_use]
pub fn sign(secret: &str, payload: &Value) -> String {
    sign_bytes(secret, canonical_json(payload).as_bytes())
}

/// Receiver-side check of a `X-Webhook-Signature` header against a raw body.
///
/// Comparison is constant-time.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let expected = sign_bytes(secret, body);
    expected.as_bytes().ct_eq(header_value.as_bytes()).into()
}
