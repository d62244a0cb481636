//! Bob Jenkins' `lookup3` `hashlittle2`, used to hash file names.
//!
//! Not intended for cryptographic purposes.

fn rot(x: u32, k: u32) -> u32 {
    x.rotate_left(k)
}

fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= rot(*c, 4);
    *c = c.wrapping_add(*b);

    *b = b.wrapping_sub(*a);
    *b ^= rot(*a, 6);
    *a = a.wrapping_add(*c);

    *c = c.wrapping_sub(*b);
    *c ^= rot(*b, 8);
    *b = b.wrapping_add(*a);

    *a = a.wrapping_sub(*c);
    *a ^= rot(*c, 16);
    *c = c.wrapping_add(*b);

    *b = b.wrapping_sub(*a);
    *b ^= rot(*a, 19);
    *a = a.wrapping_add(*c);

    *c = c.wrapping_sub(*b);
    *c ^= rot(*b, 4);
    *b = b.wrapping_add(*a);
}

fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(rot(*b, 14));
    *a ^= *c;
    *a = a.wrapping_sub(rot(*c, 11));
    *b ^= *a;
    *b = b.wrapping_sub(rot(*a, 25));
    *c ^= *b;
    *c = c.wrapping_sub(rot(*b, 16));
    *a ^= *c;
    *a = a.wrapping_sub(rot(*c, 4));
    *b ^= *a;
    *b = b.wrapping_sub(rot(*a, 14));
    *c ^= *b;
    *c = c.wrapping_sub(rot(*b, 24));
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Returns the two 32-bit lookup3 hash values `(pc, pb)` of `key`.
pub fn hashlittle2(key: &[u8], mut pc: u32, mut pb: u32) -> (u32, u32) {
    let mut a = 0xdead_beef_u32
        .wrapping_add(key.len() as u32)
        .wrapping_add(pc);
    let mut b = a;
    let mut c = a.wrapping_add(pb);

    if key.is_empty() {
        return (c, b);
    }

    let mut k = key;
    while k.len() > 12 {
        a = a.wrapping_add(le_u32(&k[0..4]));
        b = b.wrapping_add(le_u32(&k[4..8]));
        c = c.wrapping_add(le_u32(&k[8..12]));
        mix(&mut a, &mut b, &mut c);
        k = &k[12..];
    }

    // The tail is zero padded, which matches the fall-through reads of lookup3.c
    let mut tail = [0u8; 12];
    tail[..k.len()].copy_from_slice(k);
    a = a.wrapping_add(le_u32(&tail[0..4]));
    if k.len() > 4 {
        b = b.wrapping_add(le_u32(&tail[4..8]));
    }
    if k.len() > 8 {
        c = c.wrapping_add(le_u32(&tail[8..12]));
    }
    final_mix(&mut a, &mut b, &mut c);

    pc = c;
    pb = b;
    (pc, pb)
}

/// Hashes a file path the way CASC root and install manifests expect.
///
/// The path is upper-cased and `/` is replaced with `\` before hashing.
pub fn hash_path(path: &str) -> u64 {
    let normalised = path.to_ascii_uppercase().replace('/', "\\");
    let (pc, pb) = hashlittle2(normalised.as_bytes(), 0, 0);
    (u64::from(pc) << 32) | u64::from(pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference values from lookup3.c's driver5().
    #[test]
    fn lookup3_reference_vectors() {
        assert_eq!(hashlittle2(b"", 0, 0), (0xdeadbeef, 0xdeadbeef));
        assert_eq!(hashlittle2(b"", 0, 0xdeadbeef), (0xbd5b7dde, 0xdeadbeef));
        assert_eq!(hashlittle2(b"", 0xdeadbeef, 0xdeadbeef), (0x9c093ccd, 0xbd5b7dde));
        assert_eq!(
            hashlittle2(b"Four score and seven years ago", 0, 0),
            (0x17770551, 0xce7226e6)
        );
        assert_eq!(
            hashlittle2(b"Four score and seven years ago", 0, 1),
            (0xe3607cae, 0xbd371de4)
        );
        assert_eq!(
            hashlittle2(b"Four score and seven years ago", 1, 0),
            (0xcd628161, 0x6cbea4b3)
        );
    }

    #[test]
    fn path_hash_ignores_case_and_separator() {
        assert_eq!(
            hash_path("interface/icons/inv_misc_questionmark.blp"),
            hash_path("INTERFACE\\ICONS\\INV_MISC_QUESTIONMARK.BLP")
        );
        assert_ne!(hash_path("a.txt"), hash_path("b.txt"));
    }
}
