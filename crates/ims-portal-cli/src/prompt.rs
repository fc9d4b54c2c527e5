//! Terminal CAPTCHA entry.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use ims_portal::{CaptchaChallenge, CaptchaSolver, PortalError, PortalResult};

/// Asks the operator to read the CAPTCHA image and type its text.
///
/// The portal pairs each image with the session that requested the login
/// page, so the URL alone is no use to a browser. The image bytes fetched by
/// the login flow are written to a file in the temp directory and that path
/// is printed to stderr. Blank lines re-prompt; Ctrl-C or Ctrl-D cancels the
/// login.
#[derive(Debug, Clone)]
pub struct PromptSolver {
    prompt: String,
}

impl Default for PromptSolver {
    fn default() -> Self {
        Self {
            prompt: "captcha> ".to_string(),
        }
    }
}

impl PromptSolver {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl CaptchaSolver for PromptSolver {
    fn solve(&self, challenge: &CaptchaChallenge) -> PortalResult<String> {
        if challenge.image.is_empty() {
            eprintln!("CAPTCHA image was empty: {}", challenge.image_url);
        } else {
            let path = std::env::temp_dir().join(format!(
                "ims-captcha-{}.{}",
                challenge.token,
                image_extension(&challenge.image)
            ));
            std::fs::write(&path, &challenge.image).map_err(|e| {
                PortalError::Captcha(format!("failed to write {}: {e}", path.display()))
            })?;
            eprintln!("CAPTCHA image saved to {}", path.display());
        }

        let mut editor = DefaultEditor::new().map_err(|e| PortalError::Captcha(e.to_string()))?;
        loop {
            match editor.readline(&self.prompt) {
                Ok(line) => {
                    let answer = line.trim();
                    if answer.is_empty() {
                        continue;
                    }
                    return Ok(answer.to_string());
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    return Err(PortalError::Captcha("CAPTCHA entry cancelled".to_string()));
                }
                Err(e) => return Err(PortalError::Captcha(e.to_string())),
            }
        }
    }
}

/// File extension from the image's magic bytes.
fn image_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "png"
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        "jpg"
    } else if bytes.starts_with(b"GIF8") {
        "gif"
    } else {
        "img"
    }
}
