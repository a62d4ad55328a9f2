//! Content-type inference from the first bytes of a body.
//!
//! A signature table in the spirit of the WHATWG MIME sniffing standard:
//! HTML tag prefixes, a handful of magic numbers, then a text-or-binary
//! fallback. Only the first [`SNIFF_LEN`] bytes are looked at.

const SNIFF_LEN: usize = 512;

const TEXT_UTF8: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

enum Sig {
    /// `<TAG` (case-insensitive, after leading whitespace), then a space or `>`.
    Html(&'static [u8]),
    /// `data & mask == pattern` over the first `pattern.len()` bytes.
    Masked {
        mask: &'static [u8],
        pattern: &'static [u8],
        skip_ws: bool,
        ct: &'static str,
    },
    Exact(&'static [u8], &'static str),
    Mp4,
    Text,
}

static SIGNATURES: &[Sig] = &[
    Sig::Html(b"<!DOCTYPE HTML"),
    Sig::Html(b"<HTML"),
    Sig::Html(b"<HEAD"),
    Sig::Html(b"<SCRIPT"),
    Sig::Html(b"<IFRAME"),
    Sig::Html(b"<H1"),
    Sig::Html(b"<DIV"),
    Sig::Html(b"<FONT"),
    Sig::Html(b"<TABLE"),
    Sig::Html(b"<A"),
    Sig::Html(b"<STYLE"),
    Sig::Html(b"<TITLE"),
    Sig::Html(b"<B"),
    Sig::Html(b"<BODY"),
    Sig::Html(b"<BR"),
    Sig::Html(b"<P"),
    Sig::Html(b"<!--"),
    Sig::Masked {
        mask: b"\xFF\xFF\xFF\xFF\xFF",
        pattern: b"<?xml",
        skip_ws: true,
        ct: "text/xml; charset=utf-8",
    },
    Sig::Exact(b"%PDF-", "application/pdf"),
    Sig::Exact(b"%!PS-Adobe-", "application/postscript"),
    // UTF BOMs
    Sig::Masked { mask: b"\xFF\xFF\x00\x00", pattern: b"\xFE\xFF\x00\x00", skip_ws: false, ct: "text/plain; charset=utf-16be" },
    Sig::Masked { mask: b"\xFF\xFF\x00\x00", pattern: b"\xFF\xFE\x00\x00", skip_ws: false, ct: "text/plain; charset=utf-16le" },
    Sig::Masked { mask: b"\xFF\xFF\xFF\x00", pattern: b"\xEF\xBB\xBF\x00", skip_ws: false, ct: TEXT_UTF8 },
    // images
    Sig::Exact(b"\x00\x00\x01\x00", "image/x-icon"),
    Sig::Exact(b"\x00\x00\x02\x00", "image/x-icon"),
    Sig::Exact(b"BM", "image/bmp"),
    Sig::Exact(b"GIF87a", "image/gif"),
    Sig::Exact(b"GIF89a", "image/gif"),
    Sig::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00WEBPVP",
        skip_ws: false,
        ct: "image/webp",
    },
    Sig::Exact(b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    Sig::Exact(b"\xFF\xD8\xFF", "image/jpeg"),
    // audio / video
    Sig::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00WAVE",
        skip_ws: false,
        ct: "audio/wave",
    },
    Sig::Exact(b"ID3", "audio/mpeg"),
    Sig::Exact(b"OggS\x00", "application/ogg"),
    Sig::Mp4,
    // archives / binaries
    Sig::Exact(b"\x1F\x8B\x08", "application/x-gzip"),
    Sig::Exact(b"PK\x03\x04", "application/zip"),
    Sig::Exact(b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    Sig::Exact(b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    Sig::Exact(b"\x00\x61\x73\x6D", "application/wasm"),
    Sig::Text,
];

/// Infers a `Content-Type` value from `data`. Always returns something;
/// `application/octet-stream` when nothing more specific fits.
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];
    let first_non_ws = data.iter().position(|&b| !is_ws(b)).unwrap_or(data.len());

    SIGNATURES
        .iter()
        .find_map(|sig| sig.matches(data, first_non_ws))
        .unwrap_or(OCTET_STREAM)
}

impl Sig {
    fn matches(&self, data: &[u8], first_non_ws: usize) -> Option<&'static str> {
        match *self {
            Sig::Html(tag) => {
                let data = &data[first_non_ws..];
                if data.len() < tag.len() + 1 {
                    return None;
                }
                let head_matches = tag.iter().zip(data).all(|(&t, &d)| {
                    // tag bytes are upper-case; fold the data byte to compare
                    if t.is_ascii_uppercase() { d & 0xDF == t } else { d == t }
                });
                let terminated = matches!(data[tag.len()], b' ' | b'>');
                (head_matches && terminated).then_some("text/html; charset=utf-8")
            }
            Sig::Masked { mask, pattern, skip_ws, ct } => {
                let data = if skip_ws { &data[first_non_ws..] } else { data };
                if data.len() < pattern.len() {
                    return None;
                }
                let hit = pattern
                    .iter()
                    .zip(mask)
                    .zip(data)
                    .all(|((&p, &m), &d)| d & m == p);
                hit.then_some(ct)
            }
            Sig::Exact(sig, ct) => data.starts_with(sig).then_some(ct),
            Sig::Mp4 => is_mp4(data).then_some("video/mp4"),
            Sig::Text => {
                let binary = data[first_non_ws..].iter().any(|&b| is_binary(b));
                (!binary).then_some(TEXT_UTF8)
            }
        }
    }
}

fn is_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if box_size % 4 != 0 || data.len() < box_size || box_size < 12 {
        return false;
    }
    if &data[4..8] != b"ftyp" {
        return false;
    }
    // major brand at 8..12, minor version at 12..16, then compatible brands
    (8..box_size)
        .step_by(4)
        .filter(|&st| st != 12)
        .any(|st| data.get(st..st + 3) == Some(b"mp4"))
}

fn is_ws(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_is_detected_case_insensitively_after_whitespace() {
        assert_eq!(detect_content_type(b"\n  <!doctype html><html>"), "text/html; charset=utf-8");
        assert_eq!(detect_content_type(b"<p>hello</p>"), "text/html; charset=utf-8");
        assert_eq!(detect_content_type(b"<!-- note -->"), "text/html; charset=utf-8");
    }

    #[test]
    fn tag_prefix_needs_a_terminator() {
        // `<pre>` is not `<p` followed by space or `>`
        assert_eq!(detect_content_type(b"<pre>x</pre>"), TEXT_UTF8);
    }

    #[test]
    fn magic_numbers() {
        assert_eq!(detect_content_type(b"%PDF-1.7 ..."), "application/pdf");
        assert_eq!(detect_content_type(b"\x89PNG\x0D\x0A\x1A\x0A\x00\x00"), "image/png");
        assert_eq!(detect_content_type(b"GIF89a\x01\x00"), "image/gif");
        assert_eq!(detect_content_type(b"PK\x03\x04rest"), "application/zip");
        assert_eq!(detect_content_type(b"  <?xml version=\"1.0\"?>"), "text/xml; charset=utf-8");
        assert_eq!(detect_content_type(b"\xEF\xBB\xBFtitle,author"), TEXT_UTF8);
    }

    #[test]
    fn mp4_ftyp_box() {
        let mut data = vec![0, 0, 0, 0x18];
        data.extend_from_slice(b"ftypisom\x00\x00\x02\x00isommp41");
        assert_eq!(detect_content_type(&data), "video/mp4");
    }

    #[test]
    fn text_and_binary_fallbacks() {
        assert_eq!(detect_content_type(b""), TEXT_UTF8);
        assert_eq!(detect_content_type(b"title,author\nDune,Herbert\n"), TEXT_UTF8);
        assert_eq!(detect_content_type(b"{\"id\":1}"), TEXT_UTF8);
        assert_eq!(detect_content_type(b"\x01\x02\x03binary"), OCTET_STREAM);
    }

    #[test]
    fn only_the_prefix_is_inspected() {
        let mut data = vec![b'a'; SNIFF_LEN];
        data.push(0x00);
        assert_eq!(detect_content_type(&data), TEXT_UTF8);
    }
}
