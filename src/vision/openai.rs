//! OpenAI-compatible chat-completions client for vision prompts.

use std::time::Duration;

use base64::Engine as _;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::{Vision, VisionError};
use crate::images;

const OCR_MAX_DIMENSION: u32 = 360;
const DESCRIBE_MAX_DIMENSION: u32 = 512;
const JPEG_QUALITY: u8 = 85;

const OCR_MAX_TOKENS: u32 = 300;
const DESCRIBE_MAX_TOKENS: u32 = 150;

/// Reply the model gives for images without text.
const NO_TEXT: &str = "NO_TEXT";

const OCR_PROMPT: &str = "Read any text written or printed in this image, in any orientation. \
Reply with that text only, exactly as written, keeping line breaks. \
If the image holds a drawing or object next to text, ignore the text and reply with the plain common name of the object. \
If there is neither text nor a drawing, reply NO_TEXT. \
No punctuation, no commentary.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiVision {
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OpenAiVision {
    pub fn new(api_key: String, base_url: String, model: String, timeout_secs: u64) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, prompt: String, jpeg: &[u8], max_tokens: u32) -> ChatRequest<'_> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);

        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/jpeg;base64,{encoded}"),
                        },
                    },
                ],
            }],
            max_tokens,
        }
    }

    /// Send a single-image prompt and return the trimmed reply.
    fn complete(
        &self,
        prompt: String,
        image: &DynamicImage,
        max_dimension: u32,
        max_tokens: u32,
    ) -> Result<String, VisionError> {
        let jpeg = images::thumbnail_jpeg(image, max_dimension, JPEG_QUALITY)
            .map_err(|e| VisionError::Image(e.to_string()))?;
        let request = self.build_request(prompt, &jpeg, max_tokens);

        // Blocking client: created per call, always from a blocking context.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;

        let response = client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json()?;
        reply_text(parsed)
    }
}

fn reply_text(response: ChatResponse) -> Result<String, VisionError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .ok_or(VisionError::EmptyResponse)
}

/// Map the model's OCR reply to extracted text.
fn ocr_text(reply: &str) -> String {
    let reply = reply.trim();
    if reply.eq_ignore_ascii_case(NO_TEXT) {
        String::new()
    } else {
        reply.to_string()
    }
}

fn describe_prompt(category: &str) -> String {
    format!(
        "Describe this {category} in 2-3 sentences for an online store listing. \
Cover its design, style and most notable features."
    )
}

impl Vision for OpenAiVision {
    fn is_enabled(&self) -> bool {
        true
    }

    fn extract_text(&self, image: &DynamicImage) -> Result<String, VisionError> {
        let reply = self.complete(OCR_PROMPT.to_string(), image, OCR_MAX_DIMENSION, OCR_MAX_TOKENS)?;
        let text = ocr_text(&reply);

        if text.is_empty() {
            log::debug!("no text found in image");
        } else {
            log::info!("extracted text from image: {text:?}");
        }
        Ok(text)
    }

    fn describe(&self, image: &DynamicImage, category: &str) -> Result<String, VisionError> {
        self.complete(
            describe_prompt(category),
            image,
            DESCRIBE_MAX_DIMENSION,
            DESCRIBE_MAX_TOKENS,
        )
    }
}
