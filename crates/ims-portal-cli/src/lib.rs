//! Support code for the `ims` command-line client: the interactive CAPTCHA
//! prompt and plain-text rendering of portal records.

pub mod prompt;
pub mod render;
