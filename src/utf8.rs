//! Permissive UTF-8 decoding for firmware version strings.
//!
//! Devices pad or truncate the version payload, so this never fails: leading
//! bytes outside the 1/2/3-byte patterns are skipped, and continuation bytes
//! past the end of input read as zero.

pub fn decode_permissive(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as u32;
        i += 1;

        let code_point = match c >> 4 {
            // 0xxxxxxx
            0..=7 => c,
            // 110xxxxx 10xxxxxx
            12 | 13 => {
                let c2 = continuation(bytes, &mut i);
                ((c & 0x1F) << 6) | c2
            }
            // 1110xxxx 10xxxxxx 10xxxxxx
            14 => {
                let c2 = continuation(bytes, &mut i);
                let c3 = continuation(bytes, &mut i);
                ((c & 0x0F) << 12) | (c2 << 6) | c3
            }
            _ => continue,
        };

        if let Some(ch) = char::from_u32(code_point) {
            out.push(ch);
        }
    }

    out
}

fn continuation(bytes: &[u8], i: &mut usize) -> u32 {
    let b = bytes.get(*i).copied().unwrap_or(0);
    *i += 1;
    (b & 0x3F) as u32
}
