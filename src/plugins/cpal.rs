//! cpal PCM: real playback and capture through the host audio API
//!
//! The cpal stream lives on a dedicated thread (cpal streams are not
//! `Send`); samples cross between that thread and the PCM through a
//! lock-free `ArrayQueue`. Only interleaved `FLOAT_LE` is offered, which
//! is what cpal hands out natively on every host.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam::channel::{bounded, Receiver};
use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::PcmDefinition;
use crate::error::{Error, Result};
use crate::pcm::area::{areas_copy, Areas, AreasMut};
use crate::pcm::format::Format;
use crate::pcm::mode::OpenMode;
use crate::pcm::params::{Access, HwParams, Interval, Mask, ParamKind};
use crate::pcm::{Pcm, PcmSetup, Stream, TstampType};
use crate::plugins::leaf::{LeafBackend, LeafPcm};

/// An audio device as reported by the host
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// List all devices of the default host
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices: Vec<DeviceInfo> = Vec::new();
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            devices.push(DeviceInfo {
                is_default: default_output.as_deref() == Some(name.as_str()),
                name,
                is_input: false,
                is_output: true,
            });
        }
    }
    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let is_default = default_input.as_deref() == Some(name.as_str());
            match devices.iter_mut().find(|d| d.name == name) {
                Some(existing) => {
                    existing.is_input = true;
                    existing.is_default |= is_default;
                }
                None => devices.push(DeviceInfo {
                    name,
                    is_input: true,
                    is_output: false,
                    is_default,
                }),
            }
        }
    }
    devices
}

fn find_device(name: Option<&str>, stream: Stream) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let found = match (name, stream) {
        (None, Stream::Playback) => host.default_output_device(),
        (None, Stream::Capture) => host.default_input_device(),
        (Some(name), Stream::Playback) => host
            .output_devices()
            .ok()
            .and_then(|mut devices| devices.find(|d| d.name().ok().as_deref() == Some(name))),
        (Some(name), Stream::Capture) => host
            .input_devices()
            .ok()
            .and_then(|mut devices| devices.find(|d| d.name().ok().as_deref() == Some(name))),
    };
    found.ok_or_else(|| Error::Backend(format!("no {} device {}", stream, name.unwrap_or("default"))))
}

pub struct CpalBackend {
    device: Option<String>,
    stream: Stream,
    config: Option<StreamConfig>,
    ring: Arc<ArrayQueue<f32>>,
    running: Arc<AtomicBool>,
    xruns: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
    errors: Option<Receiver<String>>,
}

impl CpalBackend {
    pub fn new(device: Option<String>, stream: Stream) -> Self {
        Self {
            device,
            stream,
            config: None,
            ring: Arc::new(ArrayQueue::new(1)),
            running: Arc::new(AtomicBool::new(false)),
            xruns: Arc::new(AtomicUsize::new(0)),
            thread: None,
            errors: None,
        }
    }

    /// Underruns (playback) or overruns (capture) seen by the stream thread
    pub fn xruns(&self) -> usize {
        self.xruns.load(Ordering::Relaxed)
    }

    fn check_errors(&self) -> Result<()> {
        match self.errors.as_ref().and_then(|rx| rx.try_recv().ok()) {
            Some(err) => Err(Error::Backend(err)),
            None => Ok(()),
        }
    }
}

impl LeafBackend for CpalBackend {
    fn type_name(&self) -> &'static str {
        "cpal"
    }

    fn restrict(&self, caps: &mut HwParams) -> Result<()> {
        caps.refine_mask(ParamKind::Format, &Mask::formats(&[Format::FloatLe]))?;
        let access = [Access::MmapInterleaved as u32, Access::RwInterleaved as u32];
        caps.refine_mask(ParamKind::Access, &Mask::from_bits(&access))?;
        caps.refine_interval(ParamKind::Channels, &Interval::new(1, 32))?;
        caps.refine_interval(ParamKind::Rate, &Interval::new(8000, 192_000))?;
        Ok(())
    }

    fn configure(&mut self, setup: &PcmSetup) -> Result<()> {
        self.stop();
        self.config = Some(StreamConfig {
            channels: setup.channels as u16,
            sample_rate: cpal::SampleRate(setup.rate),
            buffer_size: cpal::BufferSize::Fixed(setup.period_size),
        });
        self.ring = Arc::new(ArrayQueue::new(setup.buffer_size as usize * setup.channels as usize));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let config = self
            .config
            .clone()
            .ok_or_else(|| Error::BadState("cpal device is not configured".into()))?;
        let device = find_device(self.device.as_deref(), self.stream)?;
        let (error_tx, error_rx) = bounded::<String>(16);
        self.errors = Some(error_rx);

        let running = self.running.clone();
        let ring = self.ring.clone();
        let xruns = self.xruns.clone();
        let stream = self.stream;
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("pcm-{}", stream).to_lowercase())
            .spawn(move || {
                let on_error = move |err: cpal::StreamError| {
                    let _ = error_tx.try_send(err.to_string());
                };
                let built = match stream {
                    Stream::Playback => {
                        let ring = ring.clone();
                        device.build_output_stream(
                            &config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                let mut short = false;
                                for sample in data.iter_mut() {
                                    *sample = ring.pop().unwrap_or_else(|| {
                                        short = true;
                                        0.0
                                    });
                                }
                                if short {
                                    xruns.fetch_add(1, Ordering::Relaxed);
                                }
                            },
                            on_error,
                            None,
                        )
                    }
                    Stream::Capture => {
                        let ring = ring.clone();
                        device.build_input_stream(
                            &config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                if data.iter().any(|s| ring.push(*s).is_err()) {
                                    xruns.fetch_add(1, Ordering::Relaxed);
                                }
                            },
                            on_error,
                            None,
                        )
                    }
                };

                match built {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start stream: {}", e);
                            return;
                        }
                        while running.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build stream: {}", e);
                    }
                }
            })
            .map_err(|e| Error::Backend(e.to_string()))?;

        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        while self.ring.pop().is_some() {}
    }

    fn release(&mut self) {
        self.config = None;
        self.errors = None;
    }

    fn consume(
        &mut self,
        setup: &PcmSetup,
        areas: &Areas<'_>,
        offset: usize,
        frames: usize,
    ) -> Result<usize> {
        self.check_errors()?;
        let channels = setup.channels as usize;
        let space = (self.ring.capacity() - self.ring.len()) / channels;
        let frames = frames.min(space);
        if frames == 0 {
            return Ok(0);
        }

        let mut chunk = vec![0u8; frames * setup.frame_bytes()];
        {
            let mut dst = AreasMut::interleaved(&mut chunk, channels, setup.format);
            areas_copy(&mut dst, 0, areas, offset, channels, frames, setup.format);
        }
        for bytes in chunk.chunks_exact(4) {
            let sample = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            // Space was reserved above and only this thread pushes
            let _ = self.ring.push(sample);
        }
        Ok(frames)
    }

    fn produce(
        &mut self,
        setup: &PcmSetup,
        areas: &mut AreasMut<'_>,
        offset: usize,
        frames: usize,
    ) -> Result<usize> {
        self.check_errors()?;
        let channels = setup.channels as usize;
        let frames = frames.min(self.ring.len() / channels);
        if frames == 0 {
            return Ok(0);
        }

        let mut chunk = Vec::with_capacity(frames * setup.frame_bytes());
        for _ in 0..frames * channels {
            let sample = self.ring.pop().unwrap_or(0.0);
            chunk.extend_from_slice(&sample.to_le_bytes());
        }
        let src = Areas::interleaved(&chunk, channels, setup.format);
        areas_copy(areas, offset, &src, 0, channels, frames, setup.format);
        Ok(frames)
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<bool> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let deadline = (timeout_ms >= 0)
            .then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));
        loop {
            self.check_errors()?;
            let ready = match self.stream {
                Stream::Playback => !self.ring.is_full(),
                Stream::Capture => !self.ring.is_empty(),
            };
            if ready {
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn describe(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "  device       : {}", self.device.as_deref().unwrap_or("default"))?;
        writeln!(out, "  xruns        : {}", self.xruns())
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open a cpal PCM on `device`, or the host default
pub fn open(name: &str, stream: Stream, mode: OpenMode, device: Option<String>) -> Result<Pcm> {
    LeafPcm::open(
        name,
        stream,
        mode,
        CpalBackend::new(device, stream),
        TstampType::Monotonic,
    )
}

/// Open from a `type = "cpal"` definition with an optional `device` name
pub fn open_definition(def: &PcmDefinition<'_>, stream: Stream, mode: OpenMode) -> Result<Pcm> {
    def.check_fields(&["device"])?;
    let device = def.get_str("device")?.map(str::to_string);
    open(def.name, stream, mode, device)
}
