use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("Terminal error: {0}")]
    Terminal(#[from] std::io::Error),
    #[error("Failed to write preview: {0}")]
    Preview(#[from] image::ImageError),
}

/// Keys the loops react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Quit,
    ToggleLowLight,
    Capture,
}

impl Key {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'q' => Some(Key::Quit),
            'l' => Some(Key::ToggleLowLight),
            's' => Some(Key::Capture),
            _ => None,
        }
    }
}

/// Where rendered frames go and where key presses come from
pub trait Display {
    fn show(&mut self, frame: &RgbImage) -> Result<(), DisplayError>;

    /// Non-blocking; `None` when no key is pending
    fn poll_key(&mut self) -> Result<Option<Key>, DisplayError>;

    /// Hand the terminal back for an interactive prompt
    fn suspend(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }
}
