use crate::config::CameraConfig;
use image::{ImageBuffer, RgbImage};
use std::fs;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture as V4lCapture;
use v4l::{Device, FourCC};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to open camera device: {0}")]
    DeviceOpen(String),
    #[error("Negotiated resolution {width}x{height} is below the {min_width}x{min_height} minimum")]
    ResolutionTooLow {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
    #[error("Failed to capture frame: {0}")]
    Capture(String),
    #[error("Frame conversion failed: {0}")]
    Conversion(String),
    #[error("Camera has been released")]
    Released,
    #[error("V4L2 error: {0}")]
    V4L(#[from] std::io::Error),
}

/// A source of RGB frames
pub trait FrameSource {
    /// Read the next frame. Errors are per-read; the caller decides on retries.
    fn read(&mut self) -> Result<RgbImage, CaptureError>;

    /// Stop streaming and give the device back. Further reads fail.
    fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        (**self).read()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Read a frame, sleeping `delay` after each failed read. Gives up with the
/// last error once `max_failures` consecutive reads have failed.
pub fn read_with_retry<S: FrameSource + ?Sized>(
    source: &mut S,
    max_failures: u32,
    delay: Duration,
) -> Result<RgbImage, CaptureError> {
    let mut failures = 0;
    loop {
        match source.read() {
            Ok(frame) => return Ok(frame),
            Err(e) => {
                failures += 1;
                if failures >= max_failures {
                    log::error!("Camera read failed {} times in a row, giving up: {}", failures, e);
                    return Err(e);
                }
                log::warn!("Frame read failed ({}/{}): {}", failures, max_failures, e);
                thread::sleep(delay);
            }
        }
    }
}

/// V4L2 webcam with a persistent mmap stream
pub struct Camera {
    // Declared before `device` so the stream is dropped first
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
    device_path: String,
    width: u32,
    height: u32,
    format: FourCC,
}

impl Camera {
    /// Open the camera from configuration. Requested size and fps are hints;
    /// the negotiated values are logged and must meet the configured floor.
    pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
        let device_path = &config.device;

        let device = Self::open_device(device_path)?;

        // Get current format
        let fmt = device
            .format()
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to get format: {}", e)))?;

        // Try to set desired resolution
        let mut format = fmt.clone();
        format.width = config.width;
        format.height = config.height;

        // Prefer MJPEG if available, fallback to YUYV
        let preferred_formats = [FourCC::new(b"MJPG"), FourCC::new(b"YUYV")];
        for &fourcc in &preferred_formats {
            format.fourcc = fourcc;
            match device.set_format(&format) {
                Ok(actual) if actual.fourcc == fourcc => break,
                Ok(actual) => log::debug!("Driver substituted {} for {}", actual.fourcc, fourcc),
                Err(e) => log::debug!("Format {} rejected: {}", fourcc, e),
            }
        }

        match device.set_params(&Parameters::with_fps(config.fps)) {
            Ok(params) => {
                let interval = params.interval;
                if interval.numerator > 0 {
                    log::info!(
                        "Camera frame rate: {:.1} fps (requested {})",
                        interval.denominator as f32 / interval.numerator as f32,
                        config.fps
                    );
                }
            }
            Err(e) => log::warn!("Could not set frame rate to {} fps: {}", config.fps, e),
        }

        // Get the actual format that was set
        let actual_format = device
            .format()
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to verify format: {}", e)))?;

        log::info!(
            "Camera initialized: {} {}x{} {} (requested {}x{})",
            device_path,
            actual_format.width,
            actual_format.height,
            actual_format.fourcc,
            config.width,
            config.height
        );

        if actual_format.width < config.min_width || actual_format.height < config.min_height {
            return Err(CaptureError::ResolutionTooLow {
                width: actual_format.width,
                height: actual_format.height,
                min_width: config.min_width,
                min_height: config.min_height,
            });
        }

        let fourcc = actual_format.fourcc;
        if !matches!(fourcc.str(), Ok("MJPG") | Ok("YUYV")) {
            return Err(CaptureError::DeviceOpen(format!(
                "Unsupported pixel format: {}",
                fourcc
            )));
        }

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, 4)
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to create stream: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            device: Some(device),
            device_path: device_path.clone(),
            width: actual_format.width,
            height: actual_format.height,
            format: fourcc,
        })
    }

    fn open_device(device_path: &str) -> Result<Device, CaptureError> {
        // Accept both "/dev/videoN" and a bare index
        let result = match device_path.parse::<usize>() {
            Ok(index) => Device::new(index),
            Err(_) => Device::with_path(device_path),
        };
        result.map_err(|e| CaptureError::DeviceOpen(format!("{}: {}", device_path, e)))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decode MJPEG frame to RGB
    fn decode_mjpeg(data: &[u8]) -> Result<RgbImage, CaptureError> {
        let img = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .map_err(|e| CaptureError::Conversion(format!("MJPEG decode failed: {}", e)))?;

        Ok(img.to_rgb8())
    }

    /// Enumerate available camera devices
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let mut devices = Vec::new();

        for entry in fs::read_dir("/dev")
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to read /dev: {}", e)))?
        {
            let path = entry?.path();
            let is_video = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("video"));
            if is_video {
                if let Some(path_str) = path.to_str() {
                    devices.push(path_str.to_string());
                }
            }
        }

        devices.sort();
        Ok(devices)
    }
}

impl FrameSource for Camera {
    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::Released)?;

        let (buf, _meta) = stream
            .next()
            .map_err(|e| CaptureError::Capture(format!("Failed to dequeue buffer: {}", e)))?;

        match self.format.str() {
            Ok("MJPG") => Self::decode_mjpeg(buf),
            Ok("YUYV") => decode_yuyv(buf, self.width, self.height),
            _ => Err(CaptureError::Conversion(format!(
                "Unsupported pixel format: {}",
                self.format
            ))),
        }
    }

    fn release(&mut self) {
        if self.device.is_some() {
            log::info!("Releasing camera {}", self.device_path);
        }
        self.stream = None;
        self.device = None;
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decode YUYV frame to RGB
fn decode_yuyv(data: &[u8], width: u32, height: u32) -> Result<RgbImage, CaptureError> {
    let (width, height) = (width as usize, height as usize);

    if data.len() < width * height * 2 {
        return Err(CaptureError::Conversion(format!(
            "YUYV buffer too small: {} bytes for {}x{}",
            data.len(),
            width,
            height
        )));
    }

    let mut rgb_data = vec![0u8; width * height * 3];

    // YUYV format: Y0 U Y1 V (2 pixels in 4 bytes)
    for y in 0..height {
        for x in 0..(width / 2) {
            let yuyv_offset = (y * width * 2) + (x * 4);
            let rgb_offset = (y * width * 3) + (x * 2 * 3);

            let u = data[yuyv_offset + 1] as i32 - 128;
            let v = data[yuyv_offset + 3] as i32 - 128;

            for (i, luma) in [data[yuyv_offset], data[yuyv_offset + 2]].into_iter().enumerate() {
                let luma = luma as i32;
                let out = rgb_offset + i * 3;
                rgb_data[out] = (luma + ((1436 * v) >> 10)).clamp(0, 255) as u8;
                rgb_data[out + 1] = (luma - ((354 * u + 732 * v) >> 10)).clamp(0, 255) as u8;
                rgb_data[out + 2] = (luma + ((1814 * u) >> 10)).clamp(0, 255) as u8;
            }
        }
    }

    ImageBuffer::from_raw(width as u32, height as u32, rgb_data)
        .ok_or_else(|| CaptureError::Conversion("Failed to create RGB image".to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_yuyv_gray() {
        // Y=128, U=V=128 is mid gray
        let data = vec![128u8; 4 * 2 * 2];
        let rgb = decode_yuyv(&data, 4, 2).unwrap();
        assert_eq!(rgb.dimensions(), (4, 2));
        assert!(rgb.pixels().all(|p| p.0 == [128, 128, 128]));
    }

    #[test]
    fn test_decode_yuyv_short_buffer() {
        let result = decode_yuyv(&[0u8; 10], 4, 2);
        assert!(matches!(result, Err(CaptureError::Conversion(_))));
    }

    #[test]
    fn test_read_with_retry_recovers() {
        let mut source = testing::ScriptedSource::new(vec![
            Err("glitch".to_string()),
            Err("glitch".to_string()),
            Ok(RgbImage::new(4, 4)),
        ]);
        let frame = read_with_retry(&mut source, 5, Duration::ZERO).unwrap();
        assert_eq!(frame.dimensions(), (4, 4));
        assert_eq!(source.read_calls, 3);
    }

    #[test]
    fn test_read_with_retry_gives_up() {
        let mut source = testing::ScriptedSource::new(vec![]);
        let result = read_with_retry(&mut source, 5, Duration::ZERO);
        assert!(matches!(result, Err(CaptureError::Capture(_))));
        assert_eq!(source.read_calls, 5);
    }

    #[test]
    fn test_list_devices() {
        // Any answer is fine; this only exercises the /dev scan
        if let Ok(devices) = Camera::list_devices() {
            assert!(devices.iter().all(|d| d.starts_with("/dev/video")));
        }
    }

    #[test]
    #[ignore] // Requires actual camera hardware
    fn test_camera_capture() {
        let config = CameraConfig {
            width: 640,
            height: 480,
            ..CameraConfig::default()
        };

        let mut camera = Camera::open(&config).expect("Failed to open camera");
        let frame = camera.read().expect("Failed to capture frame");
        assert_eq!(frame.dimensions(), camera.dimensions());

        camera.release();
        assert!(matches!(camera.read(), Err(CaptureError::Released)));
    }
}
