/// A hashed channel or constant name.
///
/// Programs never carry strings for their channels and constants, only the CRC-32 of the name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, derive_more::From, derive_more::Display)]
#[display("{_0:#010x}")]
pub struct Name(pub u32);

impl Name {
    pub fn new(name: &str) -> Self {
        Self(crc32fast::hash(name.as_bytes()))
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Name;

    #[test]
    fn test_same_string_same_hash() {
        assert_eq!(Name::new("life"), Name::from("life"));
        assert_ne!(Name::new("life"), Name::new("size"));
    }
}
