//! Codec registry: a lookup from [`CodecTag`] to the codecs that are
//! actually usable. Unavailable codecs are simply absent, so a lookup for
//! one returns `None` rather than a sentinel "unavailable" value.

use std::collections::HashMap;

use rdp_core::CodecTag;

use super::codec::{Codec, GzipCodec, Lz4Codec, NoneCodec, SnappyCodec, ZstdCodec};

pub struct CodecRegistry {
    codecs: HashMap<CodecTag, Box<dyn Codec>>,
}

impl CodecRegistry {
    /// Build a registry containing every codec this build supports, minus
    /// any that report themselves unavailable.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
        };
        registry.register(NoneCodec);
        registry.register(GzipCodec);
        registry.register(SnappyCodec);
        registry.register(Lz4Codec);
        registry.register(ZstdCodec);
        registry
    }

    fn register(&mut self, codec: impl Codec + 'static) {
        if codec.is_available() {
            self.codecs.insert(codec.tag(), Box::new(codec));
        }
    }

    pub fn get(&self, tag: CodecTag) -> Option<&dyn Codec> {
        self.codecs.get(&tag).map(|c| c.as_ref())
    }

    pub fn is_available(&self, tag: CodecTag) -> bool {
        self.codecs.contains_key(&tag)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_every_codec() {
        let registry = CodecRegistry::with_defaults();
        for tag in [
            CodecTag::None,
            CodecTag::Gzip,
            CodecTag::Snappy,
            CodecTag::Lz4,
            CodecTag::Zstd,
        ] {
            assert!(registry.is_available(tag), "{tag:?} should be available");
            assert!(registry.get(tag).is_some());
        }
    }
}
