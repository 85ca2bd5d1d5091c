//! Camera backend: raw grayscale frames streamed from an ffmpeg child process
//!
//! - `-f rawvideo -pix_fmt gray` so every frame is exactly width*height bytes
//! - the child is killed when the camera is dropped, on every exit path

use super::{CameraProvider, DeviceError, Frame, FrameSource};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};

/// ffmpeg input settings
#[derive(Debug, Clone)]
pub struct FfmpegCameraConfig {
    /// Device path or stream URL (e.g. /dev/video0, rtsp://...)
    pub input: String,
    /// ffmpeg input format (`v4l2`, `avfoundation`, ...); `None` lets ffmpeg probe
    pub format: Option<String>,
    /// Output frame width
    pub width: u32,
    /// Output frame height
    pub height: u32,
}

impl Default for FfmpegCameraConfig {
    fn default() -> Self {
        Self {
            input: "/dev/video0".to_string(),
            format: Some("v4l2".to_string()),
            width: 640,
            height: 480,
        }
    }
}

impl FfmpegCameraConfig {
    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-loglevel".into(), "error".into()];
        if let Some(format) = &self.format {
            args.push("-f".into());
            args.push(format.clone());
        }
        args.extend([
            "-i".into(),
            self.input.clone(),
            "-an".into(),
            "-vf".into(),
            format!("scale={}:{}", self.width, self.height),
            "-pix_fmt".into(),
            "gray".into(),
            "-f".into(),
            "rawvideo".into(),
            "-".into(),
        ]);
        args
    }
}

/// Opens `FfmpegCamera`s from a fixed configuration
#[derive(Debug, Clone)]
pub struct FfmpegCameraProvider {
    config: FfmpegCameraConfig,
}

impl FfmpegCameraProvider {
    pub fn new(config: FfmpegCameraConfig) -> Self {
        Self { config }
    }
}

impl CameraProvider for FfmpegCameraProvider {
    fn open(&self) -> Result<Box<dyn FrameSource>, DeviceError> {
        Ok(Box::new(FfmpegCamera::open(&self.config)?))
    }
}

/// Live camera; holds the ffmpeg child for as long as it exists
pub struct FfmpegCamera {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    input: String,
}

impl FfmpegCamera {
    pub fn open(config: &FfmpegCameraConfig) -> Result<Self, DeviceError> {
        if config.width == 0 || config.height == 0 {
            return Err(DeviceError::Open(format!(
                "invalid frame size {}x{}",
                config.width, config.height
            )));
        }

        let mut child = Command::new("ffmpeg")
            .args(config.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DeviceError::Open(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DeviceError::Open("ffmpeg stdout not captured".to_string()));
            }
        };

        tracing::info!(
            input = %config.input,
            width = config.width,
            height = config.height,
            pid = child.id(),
            "Camera opened"
        );

        Ok(Self {
            child,
            stdout,
            width: config.width,
            height: config.height,
            input: config.input.clone(),
        })
    }
}

impl FrameSource for FfmpegCamera {
    fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        let mut buf = vec![0u8; self.width as usize * self.height as usize];
        self.stdout
            .read_exact(&mut buf)
            .map_err(|e| DeviceError::Read(format!("{}: {}", self.input, e)))?;

        Frame::from_raw(self.width, self.height, buf)
            .ok_or_else(|| DeviceError::Read("frame size mismatch".to_string()))
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        tracing::info!(input = %self.input, "Camera released");
    }
}
