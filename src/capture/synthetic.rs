//! Test-pattern camera
//!
//! Produces BGRA frames with a vertical bar that moves one step per frame,
//! paced to the configured frame rate.

use super::traits::{CameraInfo, CaptureError, FrameSource, Resolution};
use crate::frame::CapturedFrame;
use std::time::{Duration, Instant};

const BYTES_PER_PIXEL: usize = 4;
const BAR_WIDTH: u32 = 8;

pub struct TestPatternSource {
    info: CameraInfo,
    interval: Duration,
    next_due: Option<Instant>,
    frames_produced: u64,

    /// Stop after this many frames
    limit: Option<u64>,
}

impl TestPatternSource {
    pub fn new(name: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        let name = name.into();
        Self {
            info: CameraInfo {
                id: format!("test-pattern:{name}"),
                name,
                resolution: Resolution { width, height },
                fps,
                pixel_format: "bgra".to_string(),
            },
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            next_due: None,
            frames_produced: 0,
            limit: None,
        }
    }

    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    fn render(&self) -> Vec<u8> {
        let Resolution { width, height } = self.info.resolution;
        let mut data = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        if width == 0 {
            return data;
        }

        let bar_start = (self.frames_produced * BAR_WIDTH as u64 % width as u64) as u32;
        for row in data.chunks_exact_mut(width as usize * BYTES_PER_PIXEL) {
            for x in bar_start..(bar_start + BAR_WIDTH).min(width) {
                let px = x as usize * BYTES_PER_PIXEL;
                row[px..px + BYTES_PER_PIXEL].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        data
    }
}

impl FrameSource for TestPatternSource {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        if self.limit.is_some_and(|limit| self.frames_produced >= limit) {
            return Ok(None);
        }

        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // do not try to catch up after a stall
        self.next_due = Some(due.max(now) + self.interval);

        let frame = CapturedFrame::now(self.render());
        self.frames_produced += 1;
        Ok(Some(frame))
    }
}
