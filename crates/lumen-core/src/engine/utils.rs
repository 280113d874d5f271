/// Decode as much of `bytes` as is final into `out` and return how many bytes were used.
/// Invalid sequences become U+FFFD; a truncated code point at the end is left unread.
pub(super) fn decode_utf8_into(bytes: &[u8], out: &mut String) -> usize {
    let mut used = 0usize;
    while used < bytes.len() {
        match std::str::from_utf8(&bytes[used..]) {
            Ok(s) => {
                out.push_str(s);
                return bytes.len();
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if let Ok(s) = std::str::from_utf8(&bytes[used..used + valid]) {
                    out.push_str(s);
                }
                used += valid;
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        used += bad;
                    }
                    None => break,
                }
            }
        }
    }
    used
}

/// Earliest stop-string hit in `buf` as `(byte_index, stop_len)`.
/// Ties on position go to the longer stop string.
pub(super) fn first_stop_hit(buf: &str, stops: &[String]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for s in stops.iter().filter(|s| !s.is_empty()) {
        if let Some(i) = buf.find(s.as_str()) {
            let len = s.len();
            best = Some(match best {
                None => (i, len),
                Some((cur_i, cur_len)) if i < cur_i || (i == cur_i && len > cur_len) => (i, len),
                Some(prev) => prev,
            });
        }
    }
    best
}

/// Largest char boundary `<= idx` in `s`.
pub(super) fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
