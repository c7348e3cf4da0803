//! Incremental `$NAME$` placeholder substitution.
//!
//! A template is a raw byte span containing `$NAME$` markers. The total
//! output length is computable in one up-front pass, before any byte is
//! emitted; filling then happens incrementally into caller-supplied buffers,
//! resuming across calls via a persistent signed offset between the raw
//! cursor and the output cursor.
//!
//! Placeholder policy: a recognized name is replaced by its table value; an
//! unrecognized name renders as the bare name with the two delimiter bytes
//! dropped. This is the one policy whose sizing and filling agree by
//! construction. An opening delimiter with no closing delimiter is not a
//! placeholder and stays literal raw bytes.

use std::collections::HashMap;
use std::sync::Arc;

/// The placeholder delimiter.
pub const TEMPLATE_CHAR: u8 = b'$';

/// Result of one fill call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Bytes written into the buffer.
    Filled(usize),
    /// Nothing was written because the next replacement does not fit into
    /// the buffer; call again with the same position and more space.
    TryAgain,
}

/// Compute the exact total output length for a template.
///
/// `raw_length + sum(replacement_length - placeholder_markup_length)` over
/// every recognized placeholder; unrecognized placeholders lose their two
/// delimiter bytes.
pub fn content_length(raw: &[u8], replacements: &HashMap<String, String>) -> usize {
    let mut diff: i64 = 0;
    let mut idx = 0;
    while let Some(start) = find_delim(raw, idx) {
        let Some(end) = find_delim(raw, start + 1) else {
            break;
        };
        match lookup(replacements, &raw[start + 1..end]) {
            Some(value) => diff += value.len() as i64 - (end - start + 1) as i64,
            None => diff -= 2,
        }
        idx = end + 1;
    }
    (raw.len() as i64 + diff) as usize
}

fn find_delim(raw: &[u8], from: usize) -> Option<usize> {
    raw.get(from..)?
        .iter()
        .position(|&b| b == TEMPLATE_CHAR)
        .map(|off| from + off)
}

fn lookup<'a>(replacements: &'a HashMap<String, String>, name: &[u8]) -> Option<&'a str> {
    std::str::from_utf8(name)
        .ok()
        .and_then(|name| replacements.get(name))
        .map(String::as_str)
}

/// Incremental template filler.
///
/// One instance serves one response; the offset it keeps between the raw
/// cursor and the output cursor is meaningless across responses.
pub struct TemplateFiller {
    raw: Arc<[u8]>,
    replacements: HashMap<String, String>,
    /// Drift between raw-source position and already-emitted-output position.
    offset: i64,
}

impl TemplateFiller {
    /// Create a filler over a raw span with resolved replacement values.
    pub fn new(raw: Arc<[u8]>, replacements: HashMap<String, String>) -> Self {
        Self {
            raw,
            replacements,
            offset: 0,
        }
    }

    /// The exact number of bytes this filler will emit in total.
    pub fn content_length(&self) -> usize {
        content_length(&self.raw, &self.replacements)
    }

    /// Fill `buf` with the next segment of output.
    ///
    /// `index` is the number of bytes already produced by earlier calls. A
    /// replacement value is never written partially: if the next one does not
    /// fit into the rest of `buf`, the call stops before it, returning the
    /// bytes already written, or [`Fill::TryAgain`] if there are none. Once
    /// the raw span is exhausted the rest of the buffer is zero-filled, so
    /// every completed call reports the full buffer length; the consumer
    /// stops at the declared content length.
    pub fn fill(&mut self, buf: &mut [u8], index: usize) -> Fill {
        let raw = &self.raw;
        let max_len = buf.len();
        let mut cursor = (index as i64 + self.offset) as usize;
        let mut written = 0;

        let mut next = find_delim(raw, cursor);
        // Fast path: no placeholder within reach of this buffer.
        if next.map_or(true, |pos| pos - cursor > max_len) {
            let rest = raw.get(cursor..).unwrap_or(&[]);
            return Fill::Filled(copy_and_pad(buf, 0, rest));
        }

        while let Some(start) = next {
            if start - cursor + written >= max_len {
                break;
            }
            buf[written..written + (start - cursor)].copy_from_slice(&raw[cursor..start]);
            written += start - cursor;
            cursor = start;

            let Some(end) = find_delim(raw, start + 1) else {
                // Unterminated placeholder: keep the rest literal.
                break;
            };
            let replacement = lookup(&self.replacements, &raw[start + 1..end])
                // Unknown name: drop the delimiters, keep the name.
                .unwrap_or_else(|| {
                    std::str::from_utf8(&raw[start + 1..end]).unwrap_or("")
                });
            if replacement.len() > max_len - written {
                return if written > 0 {
                    Fill::Filled(written)
                } else {
                    Fill::TryAgain
                };
            }

            buf[written..written + replacement.len()].copy_from_slice(replacement.as_bytes());
            written += replacement.len();
            self.offset += (end - start + 1) as i64 - replacement.len() as i64;
            cursor = end + 1;
            next = find_delim(raw, cursor);
        }

        let rest = raw.get(cursor..).unwrap_or(&[]);
        Fill::Filled(copy_and_pad(buf, written, rest))
    }
}

/// Copy as much of `rest` as fits behind `written`, zero-fill the remainder,
/// and return the full buffer length.
fn copy_and_pad(buf: &mut [u8], written: usize, rest: &[u8]) -> usize {
    let space = buf.len() - written;
    if rest.len() < space {
        buf[written..written + rest.len()].copy_from_slice(rest);
        buf[written + rest.len()..].fill(0);
    } else {
        buf[written..].copy_from_slice(&rest[..space]);
    }
    buf.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Drive a filler to completion with a given buffer size, honoring the
    /// declared content length like the network layer does.
    fn render(raw: &[u8], replacements: HashMap<String, String>, chunk_size: usize) -> Vec<u8> {
        let total = content_length(raw, &replacements);
        let mut filler = TemplateFiller::new(raw.to_vec().into(), replacements);
        let mut out = Vec::new();
        let mut chunk_size = chunk_size;
        while out.len() < total {
            let want = chunk_size.min(total - out.len());
            let mut buf = vec![0u8; want];
            match filler.fill(&mut buf, out.len()) {
                Fill::Filled(n) => out.extend_from_slice(&buf[..n]),
                Fill::TryAgain => chunk_size *= 2,
            }
        }
        out.truncate(total);
        out
    }

    #[test]
    fn test_content_length_law() {
        let raw = b"<p>Temperature: $TEMP$, Humidity: $HUMID$</p>";
        let replacements = table(&[("TEMP", "21.50"), ("HUMID", "Unknown")]);
        let expected = raw.len() - "$TEMP$".len() - "$HUMID$".len() + "21.50".len() + "Unknown".len();
        assert_eq!(content_length(raw, &replacements), expected);
    }

    #[test]
    fn test_fill_matches_content_length_for_any_chunk_size() {
        let raw = b"Temp: $TEMP$ Humid: $HUMID$ Time: $TIME$ tail";
        let replacements = table(&[("TEMP", "21.50"), ("HUMID", "48.25"), ("TIME", "00:00:01.000")]);
        let expected = b"Temp: 21.50 Humid: 48.25 Time: 00:00:01.000 tail".to_vec();
        assert_eq!(content_length(raw, &replacements), expected.len());

        for chunk_size in [1, 7, 16, expected.len(), 1024] {
            assert_eq!(render(raw, replacements.clone(), chunk_size), expected);
        }
    }

    #[test]
    fn test_unmatched_placeholder_renders_bare_name() {
        let raw = b"a $NOPE$ b";
        let replacements = table(&[]);
        assert_eq!(content_length(raw, &replacements), raw.len() - 2);
        assert_eq!(render(raw, replacements, 64), b"a NOPE b");
    }

    #[test]
    fn test_unterminated_placeholder_stays_literal() {
        let raw = b"cost: 5$ total";
        let replacements = table(&[("TEMP", "1")]);
        assert_eq!(content_length(raw, &replacements), raw.len());
        assert_eq!(render(raw, replacements, 4), b"cost: 5$ total");
    }

    #[test]
    fn test_adjacent_placeholders() {
        let raw = b"$A$$B$";
        let replacements = table(&[("A", "one"), ("B", "two")]);
        assert_eq!(render(raw, replacements, 3), b"onetwo");
    }

    #[test]
    fn test_replacement_is_never_split() {
        let raw = b"x$LONG$y";
        let replacements = table(&[("LONG", "0123456789")]);
        let mut filler = TemplateFiller::new(raw.to_vec().into(), replacements.clone());

        // "x" fits, the replacement does not; the call stops after "x".
        let mut buf = [0u8; 4];
        assert_eq!(filler.fill(&mut buf, 0), Fill::Filled(1));
        assert_eq!(&buf[..1], b"x");

        // Still nothing but the replacement pending and still no space.
        let mut buf = [0u8; 4];
        assert_eq!(filler.fill(&mut buf, 1), Fill::TryAgain);

        // With enough space the replacement and the tail come out whole.
        let mut buf = [0u8; 16];
        assert_eq!(filler.fill(&mut buf, 1), Fill::Filled(16));
        assert_eq!(&buf[..11], b"0123456789y");
    }

    #[test]
    fn test_exhausted_raw_zero_fills() {
        let raw = b"ab";
        let replacements = table(&[]);
        let mut filler = TemplateFiller::new(raw.to_vec().into(), replacements);
        let mut buf = [0xffu8; 6];
        assert_eq!(filler.fill(&mut buf, 0), Fill::Filled(6));
        assert_eq!(&buf, b"ab\0\0\0\0");
    }

    #[test]
    fn test_spec_index_page_example() {
        let raw = b"$TEMP$ / $HUMID$";
        let replacements = table(&[("TEMP", "21.50"), ("HUMID", "Unknown")]);
        // raw - len($TEMP$) - len($HUMID$) + len("21.50") + len("Unknown")
        let expected_len = raw.len() - 6 - 7 + 5 + 7;
        assert_eq!(content_length(raw, &replacements), expected_len);
        assert_eq!(render(raw, replacements, 5), b"21.50 / Unknown");
    }
}
