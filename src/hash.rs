//! Content-addressed cache keys.
//!
//! Keys are 128-bit FNV-1a hashes over a canonicalized, deterministically
//! ordered textual serialization of the logical inputs that produce a
//! cached value (shader source, layout shape, pipeline shape). `spec.md`
//! leaves the exact width open ("32-bit (or wider)"); we take the wider
//! option since collisions would silently alias unrelated pipelines.
use core::fmt;

/// A 128-bit content hash identifying a cache entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(u128);

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

const FNV_OFFSET: u128 = 0x6c62272e07bb014262b821756295c58d;
const FNV_PRIME: u128 = 0x0000000001000000000000000000013b;

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hash = FNV_OFFSET;
        for &byte in bytes {
            hash ^= u128::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        ContentHash(hash)
    }

    pub fn of_str(s: &str) -> Self {
        Self::of_bytes(s.as_bytes())
    }
}

/// A minimal canonical key builder.
///
/// Keys are built from a fixed, sorted set of named fields so that two
/// builders given the same logical content always produce the same byte
/// stream, regardless of call-site field order. This stands in for a
/// `serde_json`-style canonical serializer without pulling in a JSON
/// dependency the teacher never carries: the inputs here are small closed
/// sets of enums, integers and strings, not arbitrary user data.
#[derive(Default)]
pub struct KeyBuilder {
    fields: Vec<(&'static str, String)>,
}

impl KeyBuilder {
    pub fn new() -> Self {
        KeyBuilder::default()
    }

    pub fn field(mut self, name: &'static str, value: impl fmt::Display) -> Self {
        self.fields.push((name, value.to_string()));
        self
    }

    pub fn field_list(mut self, name: &'static str, values: impl IntoIterator<Item = String>) -> Self {
        let joined = values.into_iter().collect::<Vec<_>>().join(",");
        self.fields.push((name, format!("[{joined}]")));
        self
    }

    pub fn finish(mut self) -> ContentHash {
        self.fields.sort_by(|a, b| a.0.cmp(b.0));
        let mut buf = String::new();
        for (name, value) in &self.fields {
            buf.push_str(name);
            buf.push('=');
            buf.push_str(value);
            buf.push(';');
        }
        ContentHash::of_str(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_fields_different_order_hash_equal() {
        let a = KeyBuilder::new().field("a", 1).field("b", "x").finish();
        let b = KeyBuilder::new().field("b", "x").field("a", 1).finish();
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_hashes_differ() {
        let a = KeyBuilder::new().field("a", 1).finish();
        let b = KeyBuilder::new().field("a", 2).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn of_str_is_deterministic() {
        assert_eq!(ContentHash::of_str("shader-source"), ContentHash::of_str("shader-source"));
    }
}
