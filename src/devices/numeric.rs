//! Extraction of decimal numbers from instrument replies.
//!
//! The load separates values with commas on some firmware revisions and with
//! spaces on others, so replies are scanned for numbers rather than split.
//! Accepted grammar, leftmost match first:
//!
//! ```text
//! number   := sign? mantissa exponent?
//! sign     := '+' | '-'
//! mantissa := digit* '.' digit+ | digit+ '.'?
//! exponent := ('E' | 'e') sign? digit+
//! ```

/// Returns every number found in `text`, in order of appearance.
pub fn scan_numbers(text: &str) -> Vec<f64> {
    let bytes = text.as_bytes();
    let mut values = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        match match_number(bytes, pos) {
            Some(end) => {
                // the matched span is pure ASCII so slicing is on char boundaries
                if let Ok(value) = text[pos..end].parse::<f64>() {
                    values.push(value);
                }
                pos = end;
            }
            None => pos += 1,
        }
    }

    values
}

fn count_digits(bytes: &[u8], from: usize) -> usize {
    bytes[from..].iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Tries to match a number starting exactly at `start`, returning its end.
fn match_number(bytes: &[u8], start: usize) -> Option<usize> {
    let mut pos = start;
    if matches!(bytes.get(pos), Some(b'+') | Some(b'-')) {
        pos += 1;
    }

    let whole = count_digits(bytes, pos);
    pos += whole;

    if bytes.get(pos) == Some(&b'.') {
        let fraction = count_digits(bytes, pos + 1);
        if fraction > 0 || whole > 0 {
            pos += 1 + fraction;
        } else {
            return None;
        }
    } else if whole == 0 {
        return None;
    }

    Some(match_exponent(bytes, pos).unwrap_or(pos))
}

fn match_exponent(bytes: &[u8], start: usize) -> Option<usize> {
    let mut pos = start;
    if !matches!(bytes.get(pos), Some(b'e') | Some(b'E')) {
        return None;
    }
    pos += 1;
    if matches!(bytes.get(pos), Some(b'+') | Some(b'-')) {
        pos += 1;
    }
    match count_digits(bytes, pos) {
        0 => None,
        digits => Some(pos + digits),
    }
}
