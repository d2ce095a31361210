//! Shell-style glob matching used by channel pattern subscriptions.
//!
//! Supported syntax: `*` (any run, including empty), `?` (one byte),
//! `[abc]`, `[a-z]`, `[^...]` classes and `\x` escapes. Matching works on
//! bytes, so multi-byte characters are compared byte by byte.

/// Case-sensitive match of `string` against `pattern`.
pub fn pattern_match(string: &str, pattern: &str) -> bool {
    match_bytes(string.as_bytes(), pattern.as_bytes(), false)
}

pub fn match_bytes(mut string: &[u8], mut pattern: &[u8], nocase: bool) -> bool {
    let eq = |a: u8, b: u8| {
        if nocase {
            a.eq_ignore_ascii_case(&b)
        } else {
            a == b
        }
    };

    while let Some(&p) = pattern.first() {
        match p {
            b'*' => {
                while pattern.len() > 1 && pattern[1] == b'*' {
                    pattern = &pattern[1..];
                }
                if pattern.len() == 1 {
                    return true;
                }
                loop {
                    if match_bytes(string, &pattern[1..], nocase) {
                        return true;
                    }
                    if string.is_empty() {
                        return false;
                    }
                    string = &string[1..];
                }
            }
            b'?' => {
                if string.is_empty() {
                    return false;
                }
                string = &string[1..];
                pattern = &pattern[1..];
            }
            b'[' => {
                let Some(&c) = string.first() else {
                    return false;
                };
                pattern = &pattern[1..];
                let negate = pattern.first() == Some(&b'^');
                if negate {
                    pattern = &pattern[1..];
                }

                let mut matched = false;
                loop {
                    match pattern {
                        [] | [b']', ..] => break,
                        [b'\\', escaped, rest @ ..] => {
                            matched |= eq(*escaped, c);
                            pattern = rest;
                        }
                        [start, b'-', end, rest @ ..] if *end != b']' => {
                            let (mut lo, mut hi) = (*start, *end);
                            if lo > hi {
                                std::mem::swap(&mut lo, &mut hi);
                            }
                            let (lo, hi, c) = if nocase {
                                (
                                    lo.to_ascii_lowercase(),
                                    hi.to_ascii_lowercase(),
                                    c.to_ascii_lowercase(),
                                )
                            } else {
                                (lo, hi, c)
                            };
                            matched |= c >= lo && c <= hi;
                            pattern = rest;
                        }
                        [literal, rest @ ..] => {
                            matched |= eq(*literal, c);
                            pattern = rest;
                        }
                    }
                }

                // unterminated class: treat the rest of the pattern as consumed
                pattern = pattern.get(1..).unwrap_or(&[]);
                if matched == negate {
                    return false;
                }
                string = &string[1..];
            }
            _ => {
                let (literal, rest) = if p == b'\\' && pattern.len() > 1 {
                    (pattern[1], &pattern[2..])
                } else {
                    (p, &pattern[1..])
                };
                match string.first() {
                    Some(&c) if eq(literal, c) => {
                        string = &string[1..];
                        pattern = rest;
                    }
                    _ => return false,
                }
            }
        }

        if string.is_empty() {
            while pattern.first() == Some(&b'*') {
                pattern = &pattern[1..];
            }
            break;
        }
    }

    pattern.is_empty() && string.is_empty()
}
