//! Protocol 0 text payloads: decimal numbers, quoted byte strings and
//! raw-unicode-escape strings.

fn ascii(line: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(line)
        .map(str::trim)
        .map_err(|_| "numeric literal is not ASCII".to_string())
}

pub(crate) fn parse_i64(line: &[u8]) -> Result<i64, String> {
    let text = ascii(line)?;
    text.parse::<i64>()
        .map_err(|_| format!("integer literal {text:?} is invalid or out of range"))
}

/// `LONG` literals may carry a trailing `L`.
pub(crate) fn parse_long(line: &[u8]) -> Result<i64, String> {
    let text = ascii(line)?;
    let digits = text.strip_suffix('L').unwrap_or(text);
    digits
        .parse::<i64>()
        .map_err(|_| format!("long literal {text:?} is invalid or out of range"))
}

pub(crate) fn parse_f64(line: &[u8]) -> Result<f64, String> {
    let text = ascii(line)?;
    text.parse::<f64>()
        .map_err(|_| format!("float literal {text:?} is invalid"))
}

/// Decode a quoted, backslash-escaped byte string (`'abc\n'`).
pub(crate) fn parse_quoted_bytes(line: &[u8]) -> Result<Vec<u8>, String> {
    let inner = match line {
        [q, inner @ .., last] if (*q == b'\'' || *q == b'"') && q == last => inner,
        _ => return Err("string literal is not quoted".to_string()),
    };

    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        let byte = inner[i];
        i += 1;
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        let Some(&escape) = inner.get(i) else {
            return Err("string literal ends with a backslash".to_string());
        };
        i += 1;
        match escape {
            b'\n' => {}
            b'\\' => out.push(b'\\'),
            b'\'' => out.push(b'\''),
            b'"' => out.push(b'"'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'x' => {
                let hex = inner
                    .get(i..i + 2)
                    .ok_or_else(|| "truncated \\x escape".to_string())?;
                out.push(hex_value(hex).ok_or_else(|| "invalid \\x escape".to_string())? as u8);
                i += 2;
            }
            b'0'..=b'7' => {
                let mut value = u32::from(escape - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match inner.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xff) as u8);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Decode `raw-unicode-escape`: bytes are Latin-1 code points except for
/// `\uXXXX` and `\UXXXXXXXX` escapes.
pub(crate) fn parse_raw_unicode_escape(line: &[u8]) -> Result<String, String> {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let byte = line[i];
        let width = match (byte, line.get(i + 1)) {
            (b'\\', Some(b'u')) => 4,
            (b'\\', Some(b'U')) => 8,
            _ => {
                out.push(char::from(byte));
                i += 1;
                continue;
            }
        };
        let start = i + 2;
        let hex = line
            .get(start..start + width)
            .ok_or_else(|| "truncated unicode escape".to_string())?;
        let code = hex_value(hex).ok_or_else(|| "invalid unicode escape".to_string())?;
        let ch = char::from_u32(code)
            .ok_or_else(|| format!("unicode escape U+{code:X} is not a scalar value"))?;
        out.push(ch);
        i = start + width;
    }
    Ok(out)
}

fn hex_value(digits: &[u8]) -> Option<u32> {
    digits.iter().try_fold(0_u32, |acc, &d| {
        let nibble = char::from(d).to_digit(16)?;
        acc.checked_mul(16)?.checked_add(nibble)
    })
}
