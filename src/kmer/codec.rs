//! 2-bit DNA codes and the byte-level encoding table.
//!
//! Codes are `A=0, C=1, G=2, T=3`. Every other input byte (including
//! lowercase and IUPAC ambiguity codes) maps to code 2, matching the
//! established on-disk packing of the edge and packed-read files. A
//! non-ACGT base therefore never produces a k-mer that differs from one
//! containing `G` at that position; see DESIGN.md for the rationale.

/// 256-entry lookup table from input byte to 2-bit code.
pub static DNA_CODE: [u8; 256] = {
    let mut t = [2u8; 256];
    t[b'A' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'T' as usize] = 3;
    t
};

/// Complement of a 2-bit code (`A<->T`, `C<->G`).
#[inline]
pub fn complement(code: u8) -> u8 {
    3 - code
}

/// Encode a byte sequence into 2-bit codes.
#[inline]
pub fn encode_into(seq: &[u8], out: &mut Vec<u8>) {
    out.extend(seq.iter().map(|&b| DNA_CODE[b as usize]));
}

/// ASCII base for a 2-bit code. Useful for diagnostics and tests.
#[inline]
pub fn decode(code: u8) -> u8 {
    const BASES: [u8; 4] = *b"ACGT";
    BASES[(code & 3) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acgt_codes() {
        assert_eq!(DNA_CODE[b'A' as usize], 0);
        assert_eq!(DNA_CODE[b'C' as usize], 1);
        assert_eq!(DNA_CODE[b'G' as usize], 2);
        assert_eq!(DNA_CODE[b'T' as usize], 3);
    }

    #[test]
    fn test_unknown_bytes_map_to_two() {
        for b in [b'N', b'a', b'c', b'g', b't', b'X', 0u8, 255u8] {
            assert_eq!(DNA_CODE[b as usize], 2);
        }
    }

    #[test]
    fn test_complement() {
        assert_eq!(complement(0), 3);
        assert_eq!(complement(1), 2);
        assert_eq!(complement(2), 1);
        assert_eq!(complement(3), 0);
    }

    #[test]
    fn test_encode_decode() {
        let mut codes = Vec::new();
        encode_into(b"ACGT", &mut codes);
        assert_eq!(codes, vec![0, 1, 2, 3]);
        let back: Vec<u8> = codes.iter().map(|&c| decode(c)).collect();
        assert_eq!(back, b"ACGT");
    }
}
