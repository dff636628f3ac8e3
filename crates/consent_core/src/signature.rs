use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const DEFAULT_MAX_SIGNATURE_BYTES: usize = 512 * 1024;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    /// Guesses the format of a stored blob from its path extension.
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            Self::Jpeg
        } else {
            Self::Png
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    fn magic(self) -> &'static [u8] {
        match self {
            Self::Png => PNG_MAGIC,
            Self::Jpeg => JPEG_MAGIC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureImage {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

/// Decodes a `data:<mime>;base64,<payload>` signature captured by the form's
/// drawing canvas.
pub fn decode_signature(data_url: &str, max_bytes: usize) -> Result<SignatureImage, String> {
    let trimmed = data_url.trim();
    let Some(rest) = trimmed.strip_prefix("data:") else {
        return Err("signature must be a data URL".to_string());
    };
    let Some((header, payload)) = rest.split_once(',') else {
        return Err("signature data URL is missing its payload".to_string());
    };
    let Some(mime) = header.strip_suffix(";base64") else {
        return Err("signature data URL must be base64 encoded".to_string());
    };
    let Some(format) = ImageFormat::from_mime(mime) else {
        return Err(format!(
            "signature type '{mime}' is not supported (expected image/png or image/jpeg)"
        ));
    };

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err("signature image is empty".to_string());
    }
    // Reject oversized payloads before allocating the decoded buffer.
    if compact.len() / 4 * 3 > max_bytes + 2 {
        return Err(format!("signature image exceeds {max_bytes} bytes"));
    }

    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|error| format!("signature is not valid base64: {error}"))?;
    if bytes.is_empty() {
        return Err("signature image is empty".to_string());
    }
    if bytes.len() > max_bytes {
        return Err(format!("signature image exceeds {max_bytes} bytes"));
    }
    if !bytes.starts_with(format.magic()) {
        return Err(format!(
            "signature content does not match declared type {}",
            format.mime()
        ));
    }

    Ok(SignatureImage { format, bytes })
}

pub fn encode_data_url(format: ImageFormat, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", format.mime(), STANDARD.encode(bytes))
}

#[cfg(test)]
pub(crate) fn test_png_data_url() -> String {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(b"\0\0\0\rIHDR-signature-strokes");
    encode_data_url(ImageFormat::Png, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_png_data_url() {
        let image = decode_signature(&test_png_data_url(), DEFAULT_MAX_SIGNATURE_BYTES)
            .expect("signature should decode");
        assert_eq!(image.format, ImageFormat::Png);
        assert!(image.bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn accepts_jpg_alias_and_embedded_line_breaks() {
        let url = encode_data_url(ImageFormat::Jpeg, &[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4]);
        let (head, payload) = url.split_once(',').expect("data url should have payload");
        let wrapped = format!(
            "{},{}\n{}",
            head.replace("image/jpeg", "image/jpg"),
            &payload[..4],
            &payload[4..]
        );

        let image = decode_signature(&wrapped, 64).expect("signature should decode");
        assert_eq!(image.format, ImageFormat::Jpeg);
        assert_eq!(image.bytes.len(), 8);
    }

    #[test]
    fn rejects_unsupported_mime() {
        let error = decode_signature("data:image/gif;base64,R0lGODlh", 1024)
            .expect_err("gif should be rejected");
        assert!(error.contains("image/gif"));
    }

    #[test]
    fn rejects_non_data_url() {
        let error = decode_signature("https://example.com/sig.png", 1024)
            .expect_err("plain url should be rejected");
        assert_eq!(error, "signature must be a data URL");
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.resize(4096, 7);
        let error = decode_signature(&encode_data_url(ImageFormat::Png, &bytes), 1024)
            .expect_err("oversized signature should be rejected");
        assert_eq!(error, "signature image exceeds 1024 bytes");
    }

    fn png_of_len(len: usize) -> String {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.resize(len, 7);
        encode_data_url(ImageFormat::Png, &bytes)
    }

    #[test]
    fn accepts_payload_of_exactly_max_bytes() {
        let image = decode_signature(&png_of_len(1024), 1024).expect("limit is inclusive");
        assert_eq!(image.bytes.len(), 1024);
    }

    #[test]
    fn rejects_payload_one_byte_over_max_after_decoding() {
        // 1025 bytes encode to the same base64 length as 1024, so only the
        // decoded length can reject it.
        let url = png_of_len(1025);
        assert_eq!(
            url.split_once(',').map(|(_, payload)| payload.len()),
            png_of_len(1024).split_once(',').map(|(_, payload)| payload.len())
        );
        let error = decode_signature(&url, 1024).expect_err("one byte over should be rejected");
        assert_eq!(error, "signature image exceeds 1024 bytes");
    }

    #[test]
    fn rejects_content_that_does_not_match_declared_type() {
        let url = encode_data_url(ImageFormat::Png, b"not really a png");
        let error = decode_signature(&url, 1024).expect_err("mismatch should be rejected");
        assert!(error.contains("does not match declared type image/png"));
    }

    #[test]
    fn rejects_invalid_base64() {
        let error = decode_signature("data:image/png;base64,***", 1024)
            .expect_err("invalid base64 should be rejected");
        assert!(error.starts_with("signature is not valid base64"));
    }

    #[test]
    fn guesses_format_from_path() {
        assert_eq!(ImageFormat::from_path("a/b/sig.JPG"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_path("jane_1700000000000.png"), ImageFormat::Png);
    }
}
