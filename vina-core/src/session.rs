//! Zoom/greet session state machine.
//!
//! The session never looks at a clock itself; every transition takes `now`
//! from the caller so the loop and the tests drive time explicitly.

use crate::config::SessionConfig;
use crate::detect::BoundingBox;
use crate::recognize::RecognitionResult;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    /// Scanning for faces
    Idle,
    /// Presenting a zoomed crop of `bbox` until `until`; scanning is suspended
    ZoomActive { until: Instant, bbox: BoundingBox },
}

/// Result of advancing the zoom timer
#[derive(Debug, Clone, PartialEq)]
pub enum ZoomTick {
    Idle,
    Zooming(BoundingBox),
    /// The zoom just ended; `greet` is the person to greet, if any
    Ended { greet: Option<String> },
}

pub struct Session {
    zoom_duration: Duration,
    greeting_cooldown: Duration,
    detection_interval: Duration,
    phase: Phase,
    pending_greet: Option<String>,
    last_detection: Option<Instant>,
    last_greeted: HashMap<String, Instant>,
}

impl Session {
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_timing(
            config.zoom_duration(),
            config.greeting_cooldown(),
            config.detection_interval(),
        )
    }

    pub fn with_timing(
        zoom_duration: Duration,
        greeting_cooldown: Duration,
        detection_interval: Duration,
    ) -> Self {
        Self {
            zoom_duration,
            greeting_cooldown,
            detection_interval,
            phase: Phase::Idle,
            pending_greet: None,
            last_detection: None,
            last_greeted: HashMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_zooming(&self) -> bool {
        matches!(self.phase, Phase::ZoomActive { .. })
    }

    pub fn pending_greet(&self) -> Option<&str> {
        self.pending_greet.as_deref()
    }

    pub fn last_greeted(&self, name: &str) -> Option<Instant> {
        self.last_greeted.get(name).copied()
    }

    /// Advance the zoom timer. When the zoom has run its course the session
    /// returns to idle and hands back the pending greet target, stamping its
    /// greet time.
    pub fn tick(&mut self, now: Instant) -> ZoomTick {
        match self.phase {
            Phase::Idle => ZoomTick::Idle,
            Phase::ZoomActive { until, bbox } if now < until => ZoomTick::Zooming(bbox),
            Phase::ZoomActive { .. } => {
                self.phase = Phase::Idle;
                let greet = self.pending_greet.take();
                if let Some(name) = &greet {
                    self.last_greeted.insert(name.clone(), now);
                }
                log::debug!("Zoom ended, greeting {:?}", greet);
                ZoomTick::Ended { greet }
            }
        }
    }

    /// Leave the zoom immediately without greeting
    pub fn abort_zoom(&mut self) {
        if self.is_zooming() {
            log::debug!("Zoom aborted");
        }
        self.phase = Phase::Idle;
        self.pending_greet = None;
    }

    /// True when idle and the detection interval has passed since the last pass
    pub fn detection_due(&self, now: Instant) -> bool {
        if self.is_zooming() {
            return false;
        }
        match self.last_detection {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.detection_interval,
        }
    }

    pub fn mark_detection(&mut self, now: Instant) {
        self.last_detection = Some(now);
    }

    /// Whether `name` may be greeted again at `now`
    pub fn greeting_allowed(&self, name: &str, now: Instant) -> bool {
        match self.last_greeted.get(name) {
            None => true,
            Some(&last) => now.saturating_duration_since(last) > self.greeting_cooldown,
        }
    }

    /// Apply a recognition result. Any result carrying a box starts a zoom; a
    /// recognized name outside its cooldown becomes the pending greet target.
    /// Returns the box to zoom on.
    pub fn on_recognition(&mut self, result: &RecognitionResult, now: Instant) -> Option<BoundingBox> {
        let bbox = result.bbox()?;

        self.phase = Phase::ZoomActive {
            until: now + self.zoom_duration,
            bbox,
        };
        self.pending_greet = match result.name() {
            Some(name) if self.greeting_allowed(name, now) => Some(name.to_string()),
            Some(name) => {
                log::debug!("'{}' is still in greeting cooldown", name);
                None
            }
            None => None,
        };

        Some(bbox)
    }
}
