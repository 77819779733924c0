//! Content hashing of schemas.
//!
//! The hash identifies a schema's structure, not its spelling: object keys
//! are emitted in sorted order and tables and indexes are sorted by name.
//! Column order stays significant because it is visible in the database.

use serde_json::Value;
use strata_core::Schema;

use crate::error::Result;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Computes the content hash of a schema as 16 lowercase hex digits.
pub fn schema_hash(schema: &Schema) -> Result<String> {
    let mut sorted = schema.clone();
    sorted.tables.sort_by(|a, b| a.name.cmp(&b.name));
    for table in &mut sorted.tables {
        table.indexes.sort_by(|a, b| a.name.cmp(&b.name));
    }

    let value = serde_json::to_value(&sorted)?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical)?;

    Ok(format!("{:016x}", fnv1a_64(canonical.as_bytes())))
}

/// 64-bit FNV-1a.
#[must_use]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Serializes JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
    Ok(())
}
