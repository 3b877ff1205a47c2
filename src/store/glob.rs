//! Redis-style glob matching for KEYS
//!
//! Supports `*`, `?`, `[abc]`, `[a-z]`, `[^abc]` and `\x` to match `x`
//! literally.

pub fn glob_match(pattern: &str, key: &str) -> bool {
    match_from(pattern.as_bytes(), key.as_bytes(), 0, 0)
}

fn match_from(pattern: &[u8], key: &[u8], mut p_idx: usize, mut k_idx: usize) -> bool {
    while p_idx < pattern.len() {
        match pattern[p_idx] {
            b'*' => {
                // Collapse runs of '*'
                while p_idx < pattern.len() && pattern[p_idx] == b'*' {
                    p_idx += 1;
                }
                if p_idx == pattern.len() {
                    return true;
                }
                return (k_idx..=key.len()).any(|i| match_from(pattern, key, p_idx, i));
            }
            b'?' => {
                if k_idx >= key.len() {
                    return false;
                }
                p_idx += 1;
                k_idx += 1;
            }
            b'[' => {
                if k_idx >= key.len() {
                    return false;
                }
                match match_class(pattern, p_idx + 1, key[k_idx]) {
                    Some((true, next)) => {
                        p_idx = next;
                        k_idx += 1;
                    }
                    Some((false, _)) => return false,
                    // Unterminated class: treat '[' literally
                    None => {
                        if key[k_idx] != b'[' {
                            return false;
                        }
                        p_idx += 1;
                        k_idx += 1;
                    }
                }
            }
            b'\\' if p_idx + 1 < pattern.len() => {
                if k_idx >= key.len() || key[k_idx] != pattern[p_idx + 1] {
                    return false;
                }
                p_idx += 2;
                k_idx += 1;
            }
            literal => {
                if k_idx >= key.len() || key[k_idx] != literal {
                    return false;
                }
                p_idx += 1;
                k_idx += 1;
            }
        }
    }
    k_idx == key.len()
}

/// Match `c` against the class starting after '['. Returns whether it
/// matched and the pattern index after the closing ']'.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        let mut lo = pattern[i];
        if lo == b'\\' && i + 1 < pattern.len() {
            i += 1;
            lo = pattern[i];
        }
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let hi = pattern[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if (lo..=hi).contains(&c) {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }

    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
