//! Constant tables that identify standard primitives even when the code around them is custom.

use jsreveal_core::CryptoType;
use once_cell::sync::Lazy;

/// Shortest literal array compared against the tables. Shorter runs of constants match by
/// coincidence too often.
pub const MIN_TABLE_MATCH: usize = 8;

pub const AES_SBOX: [u32; 256] = [
    0x63, 0x7c, 0x77, 0x7b, 0xf2, 0x6b, 0x6f, 0xc5, 0x30, 0x01, 0x67, 0x2b, 0xfe, 0xd7, 0xab, 0x76,
    0xca, 0x82, 0xc9, 0x7d, 0xfa, 0x59, 0x47, 0xf0, 0xad, 0xd4, 0xa2, 0xaf, 0x9c, 0xa4, 0x72, 0xc0,
    0xb7, 0xfd, 0x93, 0x26, 0x36, 0x3f, 0xf7, 0xcc, 0x34, 0xa5, 0xe5, 0xf1, 0x71, 0xd8, 0x31, 0x15,
    0x04, 0xc7, 0x23, 0xc3, 0x18, 0x96, 0x05, 0x9a, 0x07, 0x12, 0x80, 0xe2, 0xeb, 0x27, 0xb2, 0x75,
    0x09, 0x83, 0x2c, 0x1a, 0x1b, 0x6e, 0x5a, 0xa0, 0x52, 0x3b, 0xd6, 0xb3, 0x29, 0xe3, 0x2f, 0x84,
    0x53, 0xd1, 0x00, 0xed, 0x20, 0xfc, 0xb1, 0x5b, 0x6a, 0xcb, 0xbe, 0x39, 0x4a, 0x4c, 0x58, 0xcf,
    0xd0, 0xef, 0xaa, 0xfb, 0x43, 0x4d, 0x33, 0x85, 0x45, 0xf9, 0x02, 0x7f, 0x50, 0x3c, 0x9f, 0xa8,
    0x51, 0xa3, 0x40, 0x8f, 0x92, 0x9d, 0x38, 0xf5, 0xbc, 0xb6, 0xda, 0x21, 0x10, 0xff, 0xf3, 0xd2,
    0xcd, 0x0c, 0x13, 0xec, 0x5f, 0x97, 0x44, 0x17, 0xc4, 0xa7, 0x7e, 0x3d, 0x64, 0x5d, 0x19, 0x73,
    0x60, 0x81, 0x4f, 0xdc, 0x22, 0x2a, 0x90, 0x88, 0x46, 0xee, 0xb8, 0x14, 0xde, 0x5e, 0x0b, 0xdb,
    0xe0, 0x32, 0x3a, 0x0a, 0x49, 0x06, 0x24, 0x5c, 0xc2, 0xd3, 0xac, 0x62, 0x91, 0x95, 0xe4, 0x79,
    0xe7, 0xc8, 0x37, 0x6d, 0x8d, 0xd5, 0x4e, 0xa9, 0x6c, 0x56, 0xf4, 0xea, 0x65, 0x7a, 0xae, 0x08,
    0xba, 0x78, 0x25, 0x2e, 0x1c, 0xa6, 0xb4, 0xc6, 0xe8, 0xdd, 0x74, 0x1f, 0x4b, 0xbd, 0x8b, 0x8a,
    0x70, 0x3e, 0xb5, 0x66, 0x48, 0x03, 0xf6, 0x0e, 0x61, 0x35, 0x57, 0xb9, 0x86, 0xc1, 0x1d, 0x9e,
    0xe1, 0xf8, 0x98, 0x11, 0x69, 0xd9, 0x8e, 0x94, 0x9b, 0x1e, 0x87, 0xe9, 0xce, 0x55, 0x28, 0xdf,
    0x8c, 0xa1, 0x89, 0x0d, 0xbf, 0xe6, 0x42, 0x68, 0x41, 0x99, 0x2d, 0x0f, 0xb0, 0x54, 0xbb, 0x16,
];

/// The inverse S-box is the permutation inverse of [`AES_SBOX`].
static AES_INV_SBOX: Lazy<Vec<u32>> = Lazy::new(|| {
    let mut inverse = vec![0u32; 256];
    for (i, value) in AES_SBOX.iter().enumerate() {
        inverse[*value as usize] = i as u32;
    }
    inverse
});

pub const SHA256_K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2,
];

pub const SHA256_INIT: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// MD5 per-round additive constants, `floor(|sin(i + 1)| * 2^32)`.
pub const MD5_T: [u32; 16] = [
    0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee, 0xf57c0faf, 0x4787c62a, 0xa8304613, 0xfd469501,
    0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be, 0x6b901122, 0xfd987193, 0xa679438e, 0x49b40821,
];

/// Blowfish P-array, the leading hex digits of pi.
pub const BLOWFISH_P: [u32; 18] = [
    0x243f6a88, 0x85a308d3, 0x13198a2e, 0x03707344, 0xa4093822, 0x299f31d0, 0x082efa98, 0xec4e6c89,
    0x452821e6, 0x38d01377, 0xbe5466cf, 0x34e90c6c, 0xc0ac29b7, 0xc97c50dd, 0x3f84d5b5, 0xb5470917,
    0x9216d5d9, 0x8979fb1b,
];

#[derive(Debug, Clone, Copy)]
pub struct KnownTable {
    pub name: &'static str,
    pub algorithm: &'static str,
    pub kind: CryptoType,
    values: &'static [u32],
}

impl KnownTable {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// A literal array matches when it reproduces the table from its first entry on, for at
    /// least [`MIN_TABLE_MATCH`] entries.
    pub fn matches(&self, values: &[u32]) -> bool {
        values.len() >= MIN_TABLE_MATCH.min(self.values.len())
            && values.len() <= self.values.len()
            && self.values.starts_with(values)
    }
}

static TABLES: Lazy<Vec<KnownTable>> = Lazy::new(|| {
    vec![
        KnownTable {
            name: "AES S-box",
            algorithm: "AES",
            kind: CryptoType::Symmetric,
            values: &AES_SBOX,
        },
        KnownTable {
            name: "AES inverse S-box",
            algorithm: "AES",
            kind: CryptoType::Symmetric,
            values: AES_INV_SBOX.as_slice(),
        },
        KnownTable {
            name: "SHA-256 round constants",
            algorithm: "SHA-256",
            kind: CryptoType::Hash,
            values: &SHA256_K,
        },
        KnownTable {
            name: "SHA-256 initial hash",
            algorithm: "SHA-256",
            kind: CryptoType::Hash,
            values: &SHA256_INIT,
        },
        KnownTable {
            name: "MD5 round constants",
            algorithm: "MD5",
            kind: CryptoType::Hash,
            values: &MD5_T,
        },
        KnownTable {
            name: "Blowfish P-array",
            algorithm: "Blowfish",
            kind: CryptoType::Symmetric,
            values: &BLOWFISH_P,
        },
    ]
});

pub fn known_tables() -> &'static [KnownTable] {
    TABLES.as_slice()
}

/// First table that `values` reproduces.
pub fn match_table(values: &[u32]) -> Option<&'static KnownTable> {
    known_tables().iter().find(|t| t.matches(values))
}

/// Single magic numbers that give away an implementation on their own. The initial chaining
/// values MD5 and SHA-1 share are left out.
pub fn signature_constant(value: u32) -> Option<(&'static str, CryptoType)> {
    match value {
        0xd76aa478 | 0xe8c7b756 | 0x242070db => Some(("MD5", CryptoType::Hash)),
        0xc3d2e1f0 | 0x5a827999 | 0x6ed9eba1 | 0x8f1bbcdc | 0xca62c1d6 => {
            Some(("SHA-1", CryptoType::Hash))
        }
        0x6a09e667 | 0xbb67ae85 | 0x428a2f98 => Some(("SHA-256", CryptoType::Hash)),
        0x9e3779b9 => Some(("TEA", CryptoType::Symmetric)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_sbox_inverts() {
        for i in 0..256usize {
            assert_eq!(AES_INV_SBOX[AES_SBOX[i] as usize], i as u32);
        }
    }

    #[test]
    fn test_full_sbox_matches() {
        let table = match_table(&AES_SBOX).unwrap();
        assert_eq!(table.name, "AES S-box");
        assert_eq!(table.len(), 256);
    }

    #[test]
    fn test_prefix_matches_but_short_runs_do_not() {
        assert_eq!(match_table(&SHA256_K[..16]).map(|t| t.name), Some("SHA-256 round constants"));
        assert!(match_table(&AES_SBOX[..4]).is_none());
        assert!(match_table(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).is_none());
    }

    #[test]
    fn test_out_of_order_does_not_match() {
        let mut shuffled = AES_SBOX;
        shuffled.swap(0, 1);
        assert!(match_table(&shuffled).is_none());
    }

    #[test]
    fn test_signature_constants() {
        assert_eq!(signature_constant(0xd76aa478).map(|s| s.0), Some("MD5"));
        assert_eq!(signature_constant(0x6a09e667).map(|s| s.0), Some("SHA-256"));
        assert_eq!(signature_constant(42), None);
    }
}
