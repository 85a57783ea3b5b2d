//! Terminal front end: raw-mode key input, an optional preview image file,
//! and line prompts for enrollment.

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use image::RgbImage;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vina_core::display::{Display, DisplayError, Key};
use vina_core::enroll::Operator;

/// Display that reads single key presses from the terminal and, when
/// configured, keeps the latest rendered frame in an image file.
///
/// Raw mode is restored on drop, so every exit path leaves a usable shell.
pub struct TerminalDisplay {
    raw: bool,
    preview_path: Option<PathBuf>,
    frames: u64,
}

impl TerminalDisplay {
    pub fn new(preview_path: Option<PathBuf>) -> io::Result<Self> {
        if let Some(path) = &preview_path {
            log::info!("Writing preview frames to {}", path.display());
        }
        let mut display = Self {
            raw: false,
            preview_path,
            frames: 0,
        };
        display.enter_raw()?;
        Ok(display)
    }

    fn enter_raw(&mut self) -> io::Result<()> {
        if !self.raw {
            enable_raw_mode()?;
            self.raw = true;
        }
        Ok(())
    }

    fn leave_raw(&mut self) -> io::Result<()> {
        if self.raw {
            disable_raw_mode()?;
            self.raw = false;
        }
        Ok(())
    }

    fn write_preview(&self, frame: &RgbImage) -> Result<(), DisplayError> {
        let Some(path) = &self.preview_path else {
            return Ok(());
        };

        // Write beside the target and rename so viewers never see half a file
        let tmp = preview_tmp_path(path);
        frame.save(&tmp)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Temp file beside `path` with the same extension, so the encoder matches the
/// target format. Paths without an extension get JPEG.
fn preview_tmp_path(path: &Path) -> PathBuf {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("jpg");
    path.with_extension(format!("tmp.{}", extension))
}

impl Display for TerminalDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<(), DisplayError> {
        self.frames += 1;
        log::trace!("Frame {} ({}x{})", self.frames, frame.width(), frame.height());
        self.write_preview(frame)
    }

    fn poll_key(&mut self) -> Result<Option<Key>, DisplayError> {
        while event::poll(Duration::ZERO)? {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                // Raw mode swallows SIGINT
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(Some(Key::Quit));
                }
                KeyCode::Esc => return Ok(Some(Key::Quit)),
                KeyCode::Char(c) => {
                    if let Some(key) = Key::from_char(c) {
                        return Ok(Some(key));
                    }
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn suspend(&mut self) -> Result<(), DisplayError> {
        self.leave_raw()?;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DisplayError> {
        self.enter_raw()?;
        Ok(())
    }
}

impl Drop for TerminalDisplay {
    fn drop(&mut self) {
        if self.raw {
            let _ = disable_raw_mode();
        }
    }
}

/// Line-based prompts on stdin/stdout
pub struct StdinOperator;

impl StdinOperator {
    fn prompt(&self, message: &str) -> Option<String> {
        print!("{}", message);
        let _ = io::stdout().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(e) => {
                log::warn!("Failed to read input: {}", e);
                None
            }
        }
    }
}

impl Operator for StdinOperator {
    fn ask_name(&mut self) -> Option<String> {
        self.prompt("Enter name (or 'cancel'): ")
    }

    fn confirm_overwrite(&mut self, name: &str) -> bool {
        self.prompt(&format!("'{}' is already enrolled. Overwrite? [y/N]: ", name))
            .is_some_and(|answer| answer.trim().eq_ignore_ascii_case("y"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_tmp_path_keeps_extension() {
        assert_eq!(
            preview_tmp_path(Path::new("/tmp/vina/preview.png")),
            PathBuf::from("/tmp/vina/preview.tmp.png")
        );
        assert_eq!(
            preview_tmp_path(Path::new("preview.jpeg")),
            PathBuf::from("preview.tmp.jpeg")
        );
        assert_eq!(preview_tmp_path(Path::new("preview")), PathBuf::from("preview.tmp.jpg"));
    }

    #[test]
    fn test_preview_is_written_in_target_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let display = TerminalDisplay {
            raw: false,
            preview_path: Some(path.clone()),
            frames: 0,
        };

        display.write_preview(&RgbImage::new(8, 6)).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Png);
        assert!(!dir.path().join("preview.tmp.png").exists());
    }
}
