//! Real capture device backed by `nokhwa`.
//!
//! `nokhwa` camera handles are not `Send` on every platform, so the handle
//! lives on a dedicated device thread. `read` sends a request and waits for
//! the frame the device thread grabbed in response, which keeps at most one
//! frame in flight.

use super::{CaptureConfig, Frame, FrameSource, SourceError};
use crossbeam::channel::{bounded, Receiver, Sender};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use std::thread::JoinHandle;

struct DeviceThread {
    requests: Sender<()>,
    frames: Receiver<Result<Frame, SourceError>>,
    handle: JoinHandle<()>,
}

/// Frame source reading from a local camera.
#[derive(Default)]
pub struct NokhwaSource {
    device: Option<DeviceThread>,
}

impl NokhwaSource {
    pub fn new() -> Self {
        Self::default()
    }
}

fn open_camera(config: &CaptureConfig) -> Result<Camera, SourceError> {
    let format = CameraFormat::new(
        Resolution::new(config.width, config.height),
        FrameFormat::MJPEG,
        30,
    );
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

    let mut camera = Camera::new(CameraIndex::Index(config.device_id), requested)
        .map_err(|e| SourceError::DeviceNotFound(e.to_string()))?;
    camera
        .open_stream()
        .map_err(|e| SourceError::OpenFailed(e.to_string()))?;
    Ok(camera)
}

fn device_loop(
    mut camera: Camera,
    requests: Receiver<()>,
    frames: Sender<Result<Frame, SourceError>>,
) {
    let mut sequence = 0u64;
    while requests.recv().is_ok() {
        let result = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>())
            .map_err(|e| SourceError::ReadFailed(e.to_string()))
            .map(|image| {
                sequence += 1;
                let (width, height) = image.dimensions();
                Frame::rgb(image.into_raw(), width, height, sequence)
            });

        if frames.send(result).is_err() {
            break;
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!(error = %e, "Failed to stop camera stream");
    }
}

impl FrameSource for NokhwaSource {
    fn open(&mut self, config: &CaptureConfig) -> Result<(), SourceError> {
        config
            .validate()
            .map_err(|e| SourceError::ConfigFailed(e.to_string()))?;
        self.release();

        let (ready_tx, ready_rx) = bounded::<Result<(), SourceError>>(1);
        let (request_tx, request_rx) = bounded::<()>(1);
        let (frame_tx, frame_rx) = bounded(config.buffer_depth as usize);
        let device_config = config.clone();

        let handle = std::thread::Builder::new()
            .name("capture-device".into())
            .spawn(move || match open_camera(&device_config) {
                Ok(camera) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        device_loop(camera, request_rx, frame_tx);
                    }
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| SourceError::OpenFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(SourceError::OpenFailed("device thread exited".into()));
            }
        }

        tracing::info!(
            device = config.device_id,
            width = config.width,
            height = config.height,
            "Camera opened"
        );
        self.device = Some(DeviceThread {
            requests: request_tx,
            frames: frame_rx,
            handle,
        });
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        let device = self.device.as_ref().ok_or(SourceError::NotOpen)?;
        device
            .requests
            .send(())
            .map_err(|_| SourceError::ReadFailed("device thread exited".into()))?;
        device
            .frames
            .recv()
            .map_err(|_| SourceError::ReadFailed("device thread exited".into()))?
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn release(&mut self) {
        if let Some(device) = self.device.take() {
            drop(device.requests);
            drop(device.frames);
            if device.handle.join().is_err() {
                tracing::error!("Camera device thread panicked");
            }
            tracing::info!("Camera released");
        }
    }
}

impl Drop for NokhwaSource {
    fn drop(&mut self) {
        self.release();
    }
}
