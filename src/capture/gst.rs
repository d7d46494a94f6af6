//! GStreamer capture and encode backend (Linux, `camera` feature).

use super::{CaptureBackend, FrameSource, SegmentWriter, WriterFactory};
use crate::config::CameraId;
use crate::error::{PaxcountError, Result};
use crate::frame::Frame;
use async_trait::async_trait;
use chrono::Utc;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::{AppSink, AppSrc};
use std::path::Path;
use tracing::{debug, info, warn};

/// How long a frame read waits before treating the source as stalled.
const PULL_TIMEOUT_SECONDS: u64 = 5;

fn init_gstreamer() -> Result<()> {
    gstreamer::init()
        .map_err(|e| PaxcountError::system(format!("Failed to initialize GStreamer: {}", e)))
}

/// Capture backend opening one v4l2 MJPEG pipeline per camera.
pub struct GstCaptureBackend {
    resolution: (u32, u32),
    fps: u32,
}

impl GstCaptureBackend {
    pub fn new(resolution: (u32, u32), fps: u32) -> Result<Self> {
        init_gstreamer()?;
        Ok(Self { resolution, fps })
    }

    fn pipeline_string(&self, device_index: u32) -> String {
        let (width, height) = self.resolution;
        format!(
            "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=4 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=10 drop=false",
            device_index, width, height, self.fps
        )
    }
}

#[async_trait]
impl CaptureBackend for GstCaptureBackend {
    async fn open_source(&self, camera_id: &CameraId) -> Result<Box<dyn FrameSource>> {
        let device_index = match camera_id {
            CameraId::Index(index) => *index,
            CameraId::Name(name) => {
                // Symbolic ids like `cam_2` map to device index 1 the way the
                // calibration tool numbers cameras.
                name.rsplit('_')
                    .next()
                    .and_then(|s| s.parse::<u32>().ok())
                    .map(|n| n.saturating_sub(1))
                    .ok_or_else(|| {
                        PaxcountError::camera(camera_id, "cannot derive device index from id")
                    })?
            }
        };

        let desc = self.pipeline_string(device_index);
        info!("Opening camera {} with pipeline: {}", camera_id, desc);

        let pipeline = gstreamer::parse::launch(&desc)
            .map_err(|e| PaxcountError::camera(camera_id, format!("pipeline create: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| PaxcountError::camera(camera_id, "failed to downcast to Pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| PaxcountError::camera(camera_id, "appsink not found in pipeline"))?
            .downcast::<AppSink>()
            .map_err(|_| PaxcountError::camera(camera_id, "sink element is not an appsink"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| PaxcountError::camera(camera_id, format!("start capture: {}", e)))?;

        Ok(Box::new(GstFrameSource {
            camera_id: camera_id.clone(),
            pipeline,
            appsink,
            sequence: 0,
        }))
    }
}

/// One running v4l2 capture pipeline.
pub struct GstFrameSource {
    camera_id: CameraId,
    pipeline: Pipeline,
    appsink: AppSink,
    sequence: u64,
}

#[async_trait]
impl FrameSource for GstFrameSource {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        let appsink = self.appsink.clone();
        let sample = tokio::task::spawn_blocking(move || {
            appsink.try_pull_sample(gstreamer::ClockTime::from_seconds(PULL_TIMEOUT_SECONDS))
        })
        .await
        .map_err(|e| PaxcountError::camera(&self.camera_id, format!("pull task: {}", e)))?;

        let sample = match sample {
            Some(sample) => sample,
            None => {
                if self.appsink.is_eos() {
                    debug!("Camera {} reached end of stream", self.camera_id);
                } else {
                    warn!("Camera {} stopped yielding frames", self.camera_id);
                }
                return Ok(None);
            }
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| PaxcountError::camera(&self.camera_id, "sample without buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|_| PaxcountError::camera(&self.camera_id, "buffer not readable"))?;

        let (width, height) = sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .map(|s| {
                (
                    s.get::<i32>("width").unwrap_or(0) as u32,
                    s.get::<i32>("height").unwrap_or(0) as u32,
                )
            })
            .unwrap_or((0, 0));

        let frame = Frame::new(
            self.camera_id.clone(),
            self.sequence,
            Utc::now(),
            width,
            height,
            map.as_slice().to_vec(),
        );
        self.sequence += 1;
        Ok(Some(frame))
    }

    async fn release(&mut self) -> Result<()> {
        debug!("Releasing capture handle for camera {}", self.camera_id);
        self.pipeline
            .set_state(gstreamer::State::Null)
            .map_err(|e| PaxcountError::camera(&self.camera_id, format!("release: {}", e)))?;
        Ok(())
    }
}

/// Writer factory producing mp4 segment writers that scale frames to the
/// configured size.
pub struct GstWriterFactory;

impl GstWriterFactory {
    pub fn new() -> Result<Self> {
        init_gstreamer()?;
        Ok(Self)
    }
}

#[async_trait]
impl WriterFactory for GstWriterFactory {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    async fn open_writer(
        &self,
        path: &Path,
        fps: f64,
        frame_size: (u32, u32),
    ) -> Result<Box<dyn SegmentWriter>> {
        let (width, height) = frame_size;
        let fps = fps.round().max(1.0) as u32;
        let desc = format!(
            "appsrc name=src format=time is-live=false do-timestamp=true \
             caps=image/jpeg,framerate={fps}/1 ! \
             jpegparse ! jpegdec ! videoconvert ! videoscale ! \
             video/x-raw,format=I420,width={width},height={height} ! \
             x264enc speed-preset=fast key-int-max={fps} ! \
             h264parse config-interval=1 ! \
             mp4mux faststart=true ! \
             filesink location={}",
            path.to_string_lossy()
        );
        debug!("Opening segment writer pipeline: {}", desc);

        let pipeline = gstreamer::parse::launch(&desc)
            .map_err(|e| PaxcountError::system(format!("writer pipeline create: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| PaxcountError::system("failed to downcast writer pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| PaxcountError::system("appsrc not found in writer pipeline"))?
            .downcast::<AppSrc>()
            .map_err(|_| PaxcountError::system("src element is not an appsrc"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| PaxcountError::system(format!("start writer: {}", e)))?;

        Ok(Box::new(GstSegmentWriter { pipeline, appsrc }))
    }
}

/// One open mp4 segment.
pub struct GstSegmentWriter {
    pipeline: Pipeline,
    appsrc: AppSrc,
}

#[async_trait]
impl SegmentWriter for GstSegmentWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let buffer = gstreamer::Buffer::from_mut_slice(frame.data.as_ref().clone());
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| PaxcountError::system(format!("push frame: {}", e)))?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| PaxcountError::system(format!("end of stream: {}", e)))?;

        // Wait for the muxer to flush before tearing the pipeline down.
        if let Some(bus) = self.pipeline.bus() {
            let pipeline = self.pipeline.clone();
            tokio::task::spawn_blocking(move || {
                use gstreamer::MessageView;
                for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(10)) {
                    match msg.view() {
                        MessageView::Eos(..) => break,
                        MessageView::Error(err) => {
                            warn!("Writer pipeline error during finalize: {}", err.error());
                            break;
                        }
                        _ => {}
                    }
                }
                let _ = pipeline.set_state(gstreamer::State::Null);
            })
            .await
            .map_err(|e| PaxcountError::system(format!("finalize task: {}", e)))?;
        } else {
            self.pipeline
                .set_state(gstreamer::State::Null)
                .map_err(|e| PaxcountError::system(format!("stop writer: {}", e)))?;
        }
        Ok(())
    }
}
