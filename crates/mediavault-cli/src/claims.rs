// Playback claim parsing for the --claim flag
//
// Turns key=value pairs into the claims object sent with a playback token
// request. Dotted keys build nested objects and scalar values keep their JSON
// type: `geo.allow=US` -> { "geo": { "allow": "US" } }, `max_res=1080` -> 1080.

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

/// Claims the server sets itself and refuses from callers.
const RESERVED_CLAIMS: &[&str] = &["sub", "aud", "exp", "kid", "viewer"];

/// Parses `key=value` arguments into a claims object.
///
/// # Arguments
/// * `args` - Strings of the form "key=value"; keys may use dot notation
///
/// # Returns
/// * `Ok(Map)` - The merged claims
/// * `Err` - If an argument is malformed, reserved, or conflicts with another
pub fn parse_claims(args: &[String]) -> Result<Map<String, Value>> {
    let mut root = Map::new();

    for arg in args {
        let (key, value) = split_claim(arg)?;
        let top = key.split('.').next().unwrap_or(key);
        if RESERVED_CLAIMS.contains(&top) {
            return Err(anyhow!("Claim '{}' is set by the server and cannot be overridden", top));
        }
        insert_nested(&mut root, key, scalar(value))?;
    }

    Ok(root)
}

fn split_claim(arg: &str) -> Result<(&str, &str)> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid claim '{}'. Expected 'key=value'", arg))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("Empty key in claim: '{}'", arg));
    }
    Ok((key, value.trim()))
}

/// Numbers and booleans keep their type; everything else is a string.
fn scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn insert_nested(root: &mut Map<String, Value>, key: &str, value: Value) -> Result<()> {
    let mut segments = key.split('.').peekable();
    let mut current = root;

    while let Some(segment) = segments.next() {
        if segment.is_empty() {
            return Err(anyhow!("Invalid claim key '{}': empty segment", key));
        }

        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return Ok(());
        }

        let nested = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match nested {
            Value::Object(map) => map,
            _ => {
                return Err(anyhow!(
                    "Cannot nest under '{}' in '{}': already a scalar claim",
                    segment,
                    key
                ))
            }
        };
    }

    Ok(())
}
