use crate::program::{ProgramDescription, SpecConstant};
use std::fmt::{Display, Formatter, Write};

/// Byte identity of a program together with its specialization constants.
///
/// Layout: the program id (u64 LE), then for every constant its id (u32 LE), a one byte type tag
/// and the 4 value bytes (LE). [`CacheKey::EMPTY`] means "do not cache".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    pub const EMPTY: CacheKey = CacheKey(Vec::new());

    pub fn new(program_id: u64, constants: &[SpecConstant]) -> Self {
        let mut bytes = Vec::with_capacity(8 + constants.len() * 9);
        bytes.extend_from_slice(&program_id.to_le_bytes());

        for constant in constants {
            bytes.extend_from_slice(&constant.id.to_le_bytes());
            bytes.push(constant.value.tag());
            bytes.extend_from_slice(&constant.value.to_le_bytes());
        }

        Self(bytes)
    }

    /// Programs without an identity and legacy attribute-bound programs get the empty key.
    pub fn for_description(desc: &ProgramDescription) -> Self {
        match desc.cache_id {
            Some(id) if desc.attributes.is_empty() => Self::new(id, &desc.constants),
            _ => Self::EMPTY,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(self.0.len() * 2);
        for byte in &self.0 {
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("<uncached>")
        } else {
            f.write_str(&self.to_hex())
        }
    }
}
