//! The optional header checksum.

/// Compute the PE checksum of `image`.
///
/// The image is summed as little-endian 16-bit words with the carry folded back into
/// the low 16 bits; the 4-byte checksum field at `checksum_offset` is skipped and a
/// trailing odd byte counts as a word. The file length is added at the end.
#[must_use]
pub fn pe_checksum(image: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u64 = 0;
    let skip = checksum_offset..checksum_offset + 4;

    let mut offset = 0;
    while offset < image.len() {
        if skip.contains(&offset) {
            offset += 2;
            continue;
        }

        let word = match image.get(offset + 1) {
            Some(high) => u16::from_le_bytes([image[offset], *high]),
            None => u16::from(image[offset]),
        };
        sum += u64::from(word);
        sum = (sum & 0xFFFF) + (sum >> 16);
        offset += 2;
    }

    sum = (sum & 0xFFFF) + (sum >> 16);
    sum += image.len() as u64;
    #[allow(clippy::cast_possible_truncation)]
    let checksum = sum as u32;
    checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_and_length() {
        // 0x0201 + 0x0403 + 6
        assert_eq!(pe_checksum(&[1, 2, 3, 4, 0xAA, 0xBB, 0xCC, 0xDD, 0, 0], 4), 0x0604 + 10);
        assert_eq!(pe_checksum(&[1, 2, 3], 100), 0x0201 + 3 + 3);
    }

    #[test]
    fn carry_folds() {
        let image = [0xFF, 0xFF, 0x02, 0x00];
        // 0xFFFF + 0x0002 = 0x10001 -> 0x0002, plus length
        assert_eq!(pe_checksum(&image, 100), 0x0002 + 4);
    }

    #[test]
    fn checksum_field_is_ignored() {
        let mut image = vec![0x11u8; 64];
        let before = pe_checksum(&image, 8);
        image[8..12].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(pe_checksum(&image, 8), before);
    }
}
