//! Live recognition loop: read, detect, zoom, greet.

use crate::analyze::Detector;
use crate::capture::{read_with_retry, FrameSource};
use crate::config::Config;
use crate::detect::BoundingBox;
use crate::display::{Display, Key};
use crate::imaging;
use crate::recognize::{recognize, RecognitionResult};
use crate::session::{Session, ZoomTick};
use crate::speech::Speaker;
use crate::store::EnrolledFace;
use crate::Error;
use image::RgbImage;
use std::borrow::Cow;
use std::time::Instant;

/// Everything the recognition loop needs between frames
pub struct Greeter<D, S> {
    config: Config,
    detector: D,
    faces: Vec<EnrolledFace>,
    session: Session,
    speaker: S,
    low_light: bool,
}

impl<D: Detector, S: Speaker> Greeter<D, S> {
    pub fn new(config: Config, detector: D, faces: Vec<EnrolledFace>, speaker: S) -> Self {
        let session = Session::new(&config.session);
        let low_light = config.session.low_light;
        Self {
            config,
            detector,
            faces,
            session,
            speaker,
            low_light,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn low_light(&self) -> bool {
        self.low_light
    }

    pub fn toggle_low_light(&mut self) {
        self.low_light = !self.low_light;
        log::info!("Low light mode: {}", if self.low_light { "ON" } else { "OFF" });
    }

    /// Apply a key press; returns false when the loop should stop
    pub fn handle_key(&mut self, key: Key) -> bool {
        match key {
            Key::Quit => false,
            Key::ToggleLowLight => {
                self.toggle_low_light();
                true
            }
            Key::Capture => true,
        }
    }

    /// Process one frame at `now` and return the frame to display
    pub fn step(&mut self, frame: &RgbImage, now: Instant) -> RgbImage {
        match self.session.tick(now) {
            ZoomTick::Zooming(bbox) => {
                if let Some(zoomed) = self.zoom(frame, &bbox) {
                    return zoomed;
                }
            }
            ZoomTick::Ended { greet: Some(name) } => {
                log::info!("Greeting {}", name);
                self.speaker.speak(&self.config.session.greeting_for(&name));
            }
            ZoomTick::Ended { greet: None } | ZoomTick::Idle => {}
        }

        if self.session.detection_due(now) {
            self.session.mark_detection(now);

            let result = self.detect(frame);
            if let Some(bbox) = self.session.on_recognition(&result, now) {
                log::info!(
                    "Zooming on {}{}",
                    result.name().unwrap_or("Unknown"),
                    if self.session.pending_greet().is_some() { "" } else { " (no greeting)" }
                );
                if let Some(zoomed) = self.zoom(frame, &bbox) {
                    return zoomed;
                }
            }
        }

        frame.clone()
    }

    fn detect(&mut self, frame: &RgbImage) -> RecognitionResult {
        let detection_frame = if self.low_light {
            Cow::Owned(imaging::enhance_contrast(
                frame,
                self.config.session.enhance_alpha,
                self.config.session.enhance_beta,
            ))
        } else {
            Cow::Borrowed(frame)
        };

        recognize(
            &mut self.detector,
            &detection_frame,
            &self.faces,
            self.config.matching.threshold,
        )
        .unwrap_or_else(|e| {
            log::warn!("Detection failed: {}", e);
            RecognitionResult::NoFace
        })
    }

    /// Zoomed crop of the unenhanced frame; a box that yields no crop ends
    /// the zoom without a greeting
    fn zoom(&mut self, frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
        let zoomed = imaging::zoom_region(frame, bbox, self.config.session.zoom_padding);
        if zoomed.is_none() {
            log::warn!("Could not crop face region {:?}, leaving zoom", bbox);
            self.session.abort_zoom();
        }
        zoomed
    }

    /// Run until the quit key or until the camera gives up
    pub fn run<F, W>(&mut self, source: &mut F, display: &mut W) -> Result<(), Error>
    where
        F: FrameSource + ?Sized,
        W: Display + ?Sized,
    {
        log::info!(
            "Recognition started with {} known faces (q: quit, l: toggle low light)",
            self.faces.len()
        );

        loop {
            let frame = read_with_retry(
                source,
                self.config.camera.max_read_failures,
                self.config.camera.retry_delay(),
            )?;

            let rendered = self.step(&frame, Instant::now());
            display.show(&rendered)?;

            if let Some(key) = display.poll_key()? {
                if !self.handle_key(key) {
                    log::info!("Quit requested");
                    return Ok(());
                }
            }
        }
    }
}
