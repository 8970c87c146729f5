use super::config;
use super::content::{GeminiClient, GeminiError, InlinePayload};

/// Inline image returned by the image model, plus the commentary text the
/// model emitted alongside it (often empty).
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub payload: InlinePayload,
    pub commentary: String,
}

impl GeneratedImage {
    /// Data URL form, usable directly by the UI or a downstream provider.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.payload.mime_type, self.payload.data
        )
    }
}

impl GeminiClient {
    /// Render an ad image from a prompt, optionally conditioned on a source
    /// product shot. Returns the first inline image part of the reply.
    pub async fn generate_image(
        &self,
        prompt: &str,
        source: Option<&InlinePayload>,
    ) -> Result<GeneratedImage, GeminiError> {
        let response = self
            .generate(config::IMAGE_MODEL.as_str(), prompt, source, true)
            .await?;
        let payload = response
            .inline_image()
            .ok_or_else(|| GeminiError::InvalidResponse("no inline image part".into()))?;
        Ok(GeneratedImage {
            payload,
            commentary: response.text(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_embeds_mime_and_payload() {
        let image = GeneratedImage {
            payload: InlinePayload {
                mime_type: "image/png".to_string(),
                data: "QUJD".to_string(),
            },
            commentary: String::new(),
        };
        assert_eq!(image.to_data_url(), "data:image/png;base64,QUJD");
    }
}
