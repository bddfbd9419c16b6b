//! A single hash over the settings that produce a target (its command line,
//! dependency file, and so on) is recorded when the target is built and
//! compared on later runs to detect changed settings.

use std::hash::Hasher;

const UNIT_SEPARATOR: u8 = 0x1F;

/// Accumulates the settings of one target into a hash.
#[derive(Default)]
pub struct TerseHash(std::collections::hash_map::DefaultHasher);

impl TerseHash {
    pub fn write_string(&mut self, string: &str) {
        std::hash::Hash::hash(string, &mut self.0);
        self.0.write_u8(UNIT_SEPARATOR);
    }

    pub fn finish(&self) -> u64 {
        match self.0.finish() {
            // Zero is the hash of a target nobody has declared settings for.
            0 => 1,
            h => h,
        }
    }
}

/// Hash a sequence of settings strings.
pub fn hash_settings<'a>(parts: impl IntoIterator<Item = &'a str>) -> u64 {
    let mut h = TerseHash::default();
    for part in parts {
        h.write_string(part);
    }
    h.finish()
}
