//! Image attachments for vision-capable requests.

use base64::Engine;

use shared::chat_api::{ContentPart, ImageUrl};
use shared::error::AssistError;

/// Supported image extensions and their MIME types.
const FORMATS: &[(&str, &str)] = &[
    (".png", "image/png"),
    (".jpeg", "image/jpeg"),
    (".jpg", "image/jpeg"),
    (".webp", "image/webp"),
    (".gif", "image/gif"),
];

fn mime_for(file: &str) -> Option<&'static str> {
    let lower = file.to_lowercase();
    FORMATS
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(_, mime)| *mime)
}

pub fn is_supported_attachment(file: &str) -> bool {
    mime_for(file).is_some()
}

/// Resolve one attachment to the URL form the provider accepts: remote URLs
/// pass through unchanged, local files become base64 data URIs.
pub fn image_url(file: &str) -> Result<String, AssistError> {
    if file.starts_with("http") {
        return Ok(file.to_string());
    }
    // Clipboard snapshots arrive as file:// URLs with escaped spaces.
    let cleaned = file.replace("file://", "").replace("%20", " ");
    // Extension-less clipboard images are PNGs in practice.
    let mime = mime_for(&cleaned).unwrap_or("image/png");
    let bytes = std::fs::read(&cleaned)
        .map_err(|_| AssistError::context(format!("attachment {}", cleaned)))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", mime, encoded))
}

/// Question text plus image parts, in the provider's content-part shape.
pub fn build_user_parts(
    question: &str,
    files: &[String],
) -> Result<Vec<ContentPart>, AssistError> {
    let mut parts = vec![ContentPart::Text {
        text: question.to_string(),
    }];
    for file in files {
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image_url(file)?,
            },
        });
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_remote_url_passes_through() {
        let url = "https://example.com/photo.jpg";
        assert_eq!(image_url(url).unwrap(), url);
    }

    #[test]
    fn test_local_file_becomes_data_uri() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"not really a png").unwrap();
        let uri = image_url(file.path().to_str().unwrap()).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_missing_file_is_context_error() {
        let err = image_url("/no/such/image.png").unwrap_err();
        assert!(matches!(err, AssistError::ContextUnavailable { .. }));
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_attachment("shot.PNG"));
        assert!(is_supported_attachment("pic.jpeg"));
        assert!(!is_supported_attachment("doc.pdf"));
    }

    #[test]
    fn test_user_parts_order() {
        let parts = build_user_parts("what is this", &["https://x.test/a.gif".into()]).unwrap();
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], ContentPart::Text { text } if text == "what is this"));
        assert!(matches!(&parts[1], ContentPart::ImageUrl { .. }));
    }
}
