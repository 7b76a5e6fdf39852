use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use assess_core::model::{Block, BlockId, Recording, RecordingError};

use crate::error::{CaptureError, ModuleError, ValidationError};

//
// ─── AUDIO CLIP ────────────────────────────────────────────────────────────────
//

/// Raw captured audio before WAV finalization. Mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Duration derived from the sample count, the only trusted source.
    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Encodes a clip as 16-bit PCM WAV bytes.
///
/// # Errors
///
/// Returns `CaptureError::Encode` if the WAV writer fails.
pub fn encode_wav(clip: &AudioClip) -> Result<Vec<u8>, CaptureError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
        for &sample in &clip.samples {
            let scaled = (sample * f32::from(i16::MAX))
                .clamp(f32::from(i16::MIN), f32::from(i16::MAX));
            writer
                .write_sample(scaled as i16)
                .map_err(|e| CaptureError::Encode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

//
// ─── CAPTURE DEVICE ────────────────────────────────────────────────────────────
//

/// Microphone capability, injected so headless and permission-denied
/// environments are represented by ordinary implementations instead of
/// runtime probing.
#[async_trait]
pub trait AudioCaptureDevice: Send {
    /// Acquire the microphone and begin buffering audio.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::Unavailable` or
    /// `CaptureError::PermissionDenied` when the capability cannot be
    /// acquired, and `CaptureError::AlreadyRecording` if capture is already
    /// running.
    async fn begin(&mut self) -> Result<(), CaptureError>;

    /// Stop buffering and return the captured clip.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::NotRecording` if no capture is running.
    async fn finish(&mut self) -> Result<AudioClip, CaptureError>;
}

/// Device for environments with no microphone at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableCaptureDevice;

#[async_trait]
impl AudioCaptureDevice for UnavailableCaptureDevice {
    async fn begin(&mut self) -> Result<(), CaptureError> {
        Err(CaptureError::Unavailable)
    }

    async fn finish(&mut self) -> Result<AudioClip, CaptureError> {
        Err(CaptureError::NotRecording)
    }
}

/// Device for environments where the candidate refused microphone access.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeniedCaptureDevice;

#[async_trait]
impl AudioCaptureDevice for DeniedCaptureDevice {
    async fn begin(&mut self) -> Result<(), CaptureError> {
        Err(CaptureError::PermissionDenied("access refused".into()))
    }

    async fn finish(&mut self) -> Result<AudioClip, CaptureError> {
        Err(CaptureError::NotRecording)
    }
}

//
// ─── CPAL DEVICE ───────────────────────────────────────────────────────────────
//

/// Default-input microphone capture backed by cpal.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// for the lifetime of one capture; the device communicates with it over
/// std channels.
#[derive(Default)]
pub struct CpalCaptureDevice {
    worker: Option<CaptureWorker>,
}

struct CaptureWorker {
    stop_tx: std::sync::mpsc::Sender<()>,
    result_rx: std::sync::mpsc::Receiver<AudioClip>,
}

impl CpalCaptureDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioCaptureDevice for CpalCaptureDevice {
    async fn begin(&mut self) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let (result_tx, result_rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || capture_thread(&ready_tx, &stop_rx, &result_tx));

        // recv on a std channel must not block the runtime
        tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|_| CaptureError::Unavailable)?
            .map_err(|_| CaptureError::Unavailable)??;

        self.worker = Some(CaptureWorker { stop_tx, result_rx });
        Ok(())
    }

    async fn finish(&mut self) -> Result<AudioClip, CaptureError> {
        let worker = self.worker.take().ok_or(CaptureError::NotRecording)?;
        let _ = worker.stop_tx.send(());

        tokio::task::spawn_blocking(move || worker.result_rx.recv())
            .await
            .map_err(|_| CaptureError::Unavailable)?
            .map_err(|_| CaptureError::Unavailable)
    }
}

fn capture_thread(
    ready_tx: &std::sync::mpsc::Sender<Result<(), CaptureError>>,
    stop_rx: &std::sync::mpsc::Receiver<()>,
    result_tx: &std::sync::mpsc::Sender<AudioClip>,
) {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(CaptureError::Unavailable));
        return;
    };

    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::PermissionDenied(e.to_string())));
            return;
        }
    };
    if supported.sample_format() != cpal::SampleFormat::F32 {
        let _ = ready_tx.send(Err(CaptureError::Unavailable));
        return;
    }

    let sample_rate = supported.sample_rate().0;
    let channels = usize::from(supported.channels()).max(1);
    let config = supported.config();

    let samples = Arc::new(Mutex::new(Vec::<f32>::new()));
    let sink = Arc::clone(&samples);
    let stream = match device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if let Ok(mut buffer) = sink.lock() {
                // keep the first channel only
                buffer.extend(data.iter().step_by(channels));
            }
        },
        move |err| tracing::warn!(error = %err, "input stream error"),
        None,
    ) {
        Ok(stream) => stream,
        Err(cpal::BuildStreamError::DeviceNotAvailable) => {
            let _ = ready_tx.send(Err(CaptureError::Unavailable));
            return;
        }
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::PermissionDenied(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::PermissionDenied(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // buffer until the owner finalizes (or drops) the capture
    let _ = stop_rx.recv();
    drop(stream);

    let captured = samples.lock().map(|buffer| buffer.clone()).unwrap_or_default();
    let _ = result_tx.send(AudioClip {
        samples: captured,
        sample_rate,
    });
}

//
// ─── RECORDING CAPTURE ─────────────────────────────────────────────────────────
//

/// Per-module recording state for Speaking.
///
/// Finalized clips shorter than the minimum are rejected without being
/// stored; an accepted clip overwrites any prior attempt for its block.
pub struct RecordingCapture {
    device: Box<dyn AudioCaptureDevice>,
    recordings: BTreeMap<BlockId, Recording>,
    active_block: Option<BlockId>,
}

impl RecordingCapture {
    #[must_use]
    pub fn new(device: Box<dyn AudioCaptureDevice>) -> Self {
        Self {
            device,
            recordings: BTreeMap::new(),
            active_block: None,
        }
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.active_block.is_some()
    }

    #[must_use]
    pub fn recording(&self, block: BlockId) -> Option<&Recording> {
        self.recordings.get(&block)
    }

    #[must_use]
    pub fn recorded_count(&self) -> usize {
        self.recordings.len()
    }

    /// Recordings in block-id order, for payload assembly.
    #[must_use]
    pub fn recordings(&self) -> Vec<Recording> {
        self.recordings.values().cloned().collect()
    }

    /// First block in the given sequence without a stored recording.
    #[must_use]
    pub fn first_missing(&self, blocks: &[Block]) -> Option<BlockId> {
        blocks
            .iter()
            .map(|b| b.id)
            .find(|id| !self.recordings.contains_key(id))
    }

    /// Discards every stored recording (the rerecord-all path).
    pub fn clear(&mut self) {
        self.recordings.clear();
    }

    /// Acquires the microphone and starts buffering for the given block.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::AlreadyRecording` when a capture is running,
    /// or the device's acquisition failure.
    pub async fn start_recording(&mut self, block: BlockId) -> Result<(), CaptureError> {
        if self.active_block.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }
        self.device.begin().await?;
        self.active_block = Some(block);
        Ok(())
    }

    /// Finalizes the running capture into the block's recording.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::NotRecording` without a running capture,
    /// capture/encode failures, or `ValidationError` when the clip is
    /// shorter than the minimum duration (nothing is stored in that case).
    pub async fn stop_recording(&mut self) -> Result<&Recording, ModuleError> {
        let block = self.active_block.ok_or(CaptureError::NotRecording)?;
        let clip = match self.device.finish().await {
            Ok(clip) => {
                self.active_block = None;
                clip
            }
            Err(e) => {
                self.active_block = None;
                return Err(e.into());
            }
        };

        let duration = clip.duration_seconds();
        let wav = encode_wav(&clip)?;
        let recording = Recording::new(block, wav, duration)
            .map_err(|e: RecordingError| ModuleError::Validation(ValidationError::Recording(e)))?;

        self.recordings.insert(block, recording);
        Ok(&self.recordings[&block])
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
