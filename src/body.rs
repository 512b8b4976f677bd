//! Body codec: best-effort decompression of captured bodies (spec §4.1).
//!
//! Decompression is only ever applied to the copy we store for inspection —
//! the bytes forwarded on the wire are never touched. Any failure or
//! unsupported encoding returns the input unchanged rather than erroring,
//! since a corrupt or unrecognized `Content-Encoding` must never break
//! capture.

use std::io::Read;

/// Decompress `body` according to the first comma-separated token of
/// `content_encoding`. Unknown encodings, empty bodies, and decode errors all
/// fall back to returning a copy of `body` unchanged.
pub fn decompress(body: &[u8], content_encoding: &str) -> Vec<u8> {
    if body.is_empty() {
        return Vec::new();
    }
    let token = content_encoding
        .split(',')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match token.as_str() {
        "gzip" => decompress_gzip(body).unwrap_or_else(|| body.to_vec()),
        "deflate" => decompress_deflate(body).unwrap_or_else(|| body.to_vec()),
        "br" => decompress_brotli(body).unwrap_or_else(|| body.to_vec()),
        _ => body.to_vec(),
    }
}

fn decompress_gzip(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(body)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}

fn decompress_deflate(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::DeflateDecoder::new(body)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}

fn decompress_brotli(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    brotli::Decompressor::new(body, 4096)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_body_returns_empty() {
        assert_eq!(decompress(b"", "gzip"), Vec::<u8>::new());
    }

    #[test]
    fn identity_and_missing_pass_through() {
        assert_eq!(decompress(b"hello", ""), b"hello");
        assert_eq!(decompress(b"hello", "identity"), b"hello");
    }

    #[test]
    fn unknown_encoding_passes_through() {
        assert_eq!(decompress(b"hello", "zstd"), b"hello");
    }

    #[test]
    fn gzip_round_trips() {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(br#"{"ok":true}"#).unwrap();
        let compressed = enc.finish().unwrap();
        assert_eq!(decompress(&compressed, "gzip"), br#"{"ok":true}"#);
    }

    #[test]
    fn deflate_round_trips() {
        let mut enc =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"deflate me").unwrap();
        let compressed = enc.finish().unwrap();
        assert_eq!(decompress(&compressed, "deflate"), b"deflate me");
    }

    #[test]
    fn brotli_round_trips() {
        let mut compressed = Vec::new();
        {
            let mut writer =
                brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
            writer.write_all(b"brotli payload").unwrap();
        }
        assert_eq!(decompress(&compressed, "br"), b"brotli payload");
    }

    #[test]
    fn corrupt_gzip_falls_back_to_raw_bytes() {
        let garbage = b"not actually gzip";
        assert_eq!(decompress(garbage, "gzip"), garbage);
    }

    #[test]
    fn content_encoding_picks_first_token() {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"multi").unwrap();
        let compressed = enc.finish().unwrap();
        assert_eq!(decompress(&compressed, "gzip, br"), b"multi");
    }
}
