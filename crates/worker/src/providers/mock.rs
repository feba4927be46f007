//! Provider that renders a solid-colour PNG locally.
//!
//! Lets the whole queue run end to end without a GPU backend. The colour
//! is derived from the prompt, so different prompts give visibly
//! different images.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use mayagen_core::provider::{GenerationProvider, ProviderError, RenderRequest};

pub struct MockProvider {
    delay: Duration,
}

impl MockProvider {
    /// `delay` simulates render time before the image is produced.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, ProviderError> {
        let width = dimension(request.width)?;
        let height = dimension(request.height)?;
        let colour = prompt_colour(&request.prompt);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        tokio::task::spawn_blocking(move || encode_png(width, height, colour))
            .await
            .map_err(|e| ProviderError::Rejected(format!("Render task failed: {e}")))?
    }
}

fn dimension(value: i32) -> Result<u32, ProviderError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ProviderError::Rejected(format!("Invalid image dimension {value}")))
}

/// FNV-1a over the prompt bytes, folded into an RGB triple.
fn prompt_colour(prompt: &str) -> Rgb<u8> {
    let hash = prompt.bytes().fold(0x811c_9dc5_u32, |acc, b| {
        (acc ^ u32::from(b)).wrapping_mul(0x0100_0193)
    });
    let [r, g, b, _] = hash.to_le_bytes();
    Rgb([r, g, b])
}

fn encode_png(width: u32, height: u32, colour: Rgb<u8>) -> Result<Vec<u8>, ProviderError> {
    let image = RgbImage::from_pixel(width, height, colour);
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| ProviderError::Rejected(format!("PNG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}
