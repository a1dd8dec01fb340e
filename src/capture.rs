//! Capture sources: audio device handling and stream processing
//!
//! Every backend hands the peak of each delivered block to the shared
//! [`LevelAggregator`] directly from the thread the driver calls back on.
//! Nothing in the callback blocks beyond the aggregator's short lock.

use crate::aggregator::LevelAggregator;
use crate::config::CaptureSettings;
use crate::constants::audio::{BUFFER_SIZE, PIPE_BLOCK_MS};
use crate::encoding::{self, AudioBlock, SampleEncoding};
use crate::error::{AppError, AppResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::{Deserialize, Serialize};
use std::io::{IsTerminal, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Driver family used to capture audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Default host of the platform, input devices
    Default,
    /// WASAPI input devices
    Wasapi,
    /// WASAPI output devices captured through loopback
    WasapiLoopback,
    /// ASIO driver in its native format, one input channel of the frame
    Asio,
    /// Raw interleaved samples on standard input
    Pipe,
}

impl Backend {
    /// cpal host name, when the backend is not the platform default
    fn host_name(self) -> Option<&'static str> {
        match self {
            Backend::Wasapi | Backend::WasapiLoopback => Some("WASAPI"),
            Backend::Asio => Some("ASIO"),
            Backend::Default | Backend::Pipe => None,
        }
    }

    fn is_loopback(self) -> bool {
        self == Backend::WasapiLoopback
    }
}

/// A live producer of audio blocks with a start/stop lifecycle
pub trait CaptureSource {
    /// Human-readable device description
    fn name(&self) -> String;

    fn encoding(&self) -> SampleEncoding;

    /// Open the device and begin delivering peaks into `sink`.
    ///
    /// On failure nothing is delivered and the source stays stopped.
    fn start(&mut self, sink: Arc<LevelAggregator>) -> AppResult<()>;

    /// Halt delivery. Safe to call when already stopped.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Build the source for the configured backend without opening anything yet
pub fn open(settings: &CaptureSettings) -> Box<dyn CaptureSource> {
    match settings.backend {
        Backend::Pipe => Box::new(PipeCaptureSource::new(settings)),
        _ => Box::new(CpalCaptureSource::new(settings.clone())),
    }
}

/// Names of the devices a backend can capture from, in index order
pub fn list_devices(backend: Backend) -> AppResult<Vec<String>> {
    if backend == Backend::Pipe {
        return Ok(vec!["stdin".to_string()]);
    }
    let host = resolve_host(backend)?;
    let names = if backend.is_loopback() {
        host.output_devices()?.filter_map(|d| d.name().ok()).collect()
    } else {
        host.input_devices()?.filter_map(|d| d.name().ok()).collect()
    };
    Ok(names)
}

fn resolve_host(backend: Backend) -> AppResult<cpal::Host> {
    let Some(name) = backend.host_name() else {
        return Ok(cpal::default_host());
    };
    let id = cpal::available_hosts()
        .into_iter()
        .find(|id| id.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| AppError::DeviceOpen(format!("{} is not available on this system", name)))?;
    Ok(cpal::host_from_id(id)?)
}

/// Find the configured device: by name, then by index, then the host default
fn select_device(host: &cpal::Host, settings: &CaptureSettings) -> AppResult<cpal::Device> {
    let loopback = settings.backend.is_loopback();
    let devices: Vec<cpal::Device> = if loopback {
        host.output_devices()?.collect()
    } else {
        host.input_devices()?.collect()
    };

    if let Some(name) = &settings.device {
        devices
            .into_iter()
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| AppError::DeviceOpen(format!("Device '{}' not found", name)))
    } else if let Some(index) = settings.device_index {
        let count = devices.len();
        devices.into_iter().nth(index).ok_or_else(|| {
            AppError::DeviceOpen(format!("Device index {} out of range ({} devices)", index, count))
        })
    } else if loopback {
        host.default_output_device()
            .ok_or_else(|| AppError::DeviceOpen("No default output device available".to_string()))
    } else {
        host.default_input_device()
            .ok_or_else(|| AppError::DeviceOpen("No default input device available".to_string()))
    }
}

/// Check that the device advertises the exact channel count, format and rate
fn ensure_supported(
    device: &cpal::Device,
    loopback: bool,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
) -> AppResult<()> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = if loopback {
        device.supported_output_configs()?.collect()
    } else {
        device.supported_input_configs()?.collect()
    };
    let rate = config.sample_rate.0;
    let supported = ranges.iter().any(|range| {
        range.channels() == config.channels
            && range.sample_format() == format
            && range.min_sample_rate().0 <= rate
            && rate <= range.max_sample_rate().0
    });
    if supported {
        Ok(())
    } else {
        Err(AppError::DeviceOpen(format!(
            "Format unsupported: {} channels, {} Hz, {:?}. Check the sample rate and channels!",
            config.channels, rate, format
        )))
    }
}

/// Index of the measured input inside an ASIO frame of `device_channels`
fn asio_channel(offset: u16, device_channels: u16) -> AppResult<usize> {
    if offset >= device_channels {
        return Err(AppError::DeviceOpen(format!(
            "Channel offset {} is outside the {} inputs of the device",
            offset, device_channels
        )));
    }
    Ok(usize::from(offset))
}

/// Capture through a cpal host (default, WASAPI, WASAPI loopback or ASIO)
pub struct CpalCaptureSource {
    settings: CaptureSettings,
    device_name: Option<String>,
    stream: Option<cpal::Stream>,
}

impl CpalCaptureSource {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            device_name: None,
            stream: None,
        }
    }

    fn stream_config(&self) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: self.settings.channels,
            sample_rate: cpal::SampleRate(self.settings.sample_rate),
            buffer_size: BUFFER_SIZE,
        }
    }

    fn build_stream(&self, device: &cpal::Device, sink: Arc<LevelAggregator>) -> AppResult<cpal::Stream> {
        let config = self.stream_config();
        let loopback = self.settings.backend.is_loopback();
        let err_fn = |err: cpal::StreamError| tracing::error!("Audio stream error: {}", err);

        if self.settings.backend == Backend::Asio {
            // the driver dictates format and width; measure one channel of its frame
            let native = device.default_input_config()?;
            let format = native.sample_format();
            let driver_encoding = SampleEncoding::from_cpal(format).ok_or_else(|| {
                AppError::DeviceOpen(format!("ASIO sample format {:?} is not supported", format))
            })?;
            let channel = asio_channel(self.settings.channel_offset, native.channels())?;
            let config = cpal::StreamConfig {
                channels: native.channels(),
                ..config
            };
            ensure_supported(device, false, &config, format)?;

            let channels = usize::from(config.channels);
            let stream = device.build_input_stream_raw(
                &config,
                format,
                move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                    let block = AudioBlock::new(data.bytes(), driver_encoding);
                    sink.on_block(encoding::extract_channel(block, channels, channel));
                },
                err_fn,
                None,
            )?;
            return Ok(stream);
        }

        let encoding = self.settings.encoding;
        let format = encoding.cpal_format().ok_or_else(|| {
            AppError::DeviceOpen(format!(
                "{} is not available from the {:?} backend; use the pipe backend",
                encoding, self.settings.backend
            ))
        })?;
        ensure_supported(device, loopback, &config, format)?;

        let stream = device.build_input_stream_raw(
            &config,
            format,
            move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                sink.on_block(encoding::extract(AudioBlock::new(data.bytes(), encoding)));
            },
            err_fn,
            None,
        )?;
        Ok(stream)
    }
}

impl CaptureSource for CpalCaptureSource {
    fn name(&self) -> String {
        self.device_name
            .clone()
            .or_else(|| self.settings.device.clone())
            .unwrap_or_else(|| format!("{:?} default device", self.settings.backend))
    }

    fn encoding(&self) -> SampleEncoding {
        if self.settings.backend == Backend::Asio {
            SampleEncoding::Float32
        } else {
            self.settings.encoding
        }
    }

    fn start(&mut self, sink: Arc<LevelAggregator>) -> AppResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = resolve_host(self.settings.backend)?;
        let device = select_device(&host, &self.settings)?;
        let device_name = device.name()?;

        let stream = self.build_stream(&device, sink)?;
        stream.play()?;

        tracing::info!(
            device = %device_name,
            backend = ?self.settings.backend,
            sample_rate = self.settings.sample_rate,
            channels = self.settings.channels,
            encoding = %self.encoding(),
            "capture started"
        );
        self.device_name = Some(device_name);
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::warn!("{}", AppError::from(e));
            }
            drop(stream);
            tracing::info!(device = %self.name(), "capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalCaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Raw little-endian interleaved samples piped in on standard input
pub struct PipeCaptureSource {
    encoding: SampleEncoding,
    block_bytes: usize,
    running: Option<Arc<AtomicBool>>,
}

impl PipeCaptureSource {
    pub fn new(settings: &CaptureSettings) -> Self {
        let frames = (settings.sample_rate * PIPE_BLOCK_MS / 1000).max(1) as usize;
        let block_bytes = frames * usize::from(settings.channels) * settings.encoding.width();
        Self {
            encoding: settings.encoding,
            block_bytes,
            running: None,
        }
    }
}

impl CaptureSource for PipeCaptureSource {
    fn name(&self) -> String {
        "stdin".to_string()
    }

    fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    fn start(&mut self, sink: Arc<LevelAggregator>) -> AppResult<()> {
        if self.is_running() {
            return Ok(());
        }
        if std::io::stdin().is_terminal() {
            return Err(AppError::DeviceOpen(
                "Standard input is a terminal; pipe raw audio into the pipe backend".to_string(),
            ));
        }

        // each start gets its own flag so a reader stuck in read() from an
        // earlier run can never deliver into this one
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let encoding = self.encoding;
        let mut buffer = vec![0u8; self.block_bytes];

        std::thread::Builder::new()
            .name("pipe-capture".to_string())
            .spawn(move || {
                let mut stdin = std::io::stdin().lock();
                while flag.load(Ordering::Acquire) {
                    match stdin.read_exact(&mut buffer) {
                        Ok(()) => {
                            if !flag.load(Ordering::Acquire) {
                                break;
                            }
                            sink.on_block(encoding::extract(AudioBlock::new(&buffer, encoding)));
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            tracing::info!("pipe capture reached end of input");
                            break;
                        }
                        Err(e) => {
                            tracing::error!("Audio stream error: {}", e);
                            break;
                        }
                    }
                }
                flag.store(false, Ordering::Release);
            })?;

        tracing::info!(encoding = %encoding, block_bytes = self.block_bytes, "pipe capture started");
        self.running = Some(running);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.store(false, Ordering::Release);
            tracing::info!("pipe capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_blocks_hold_whole_frames() {
        let settings = CaptureSettings {
            backend: Backend::Pipe,
            sample_rate: 48_000,
            channels: 2,
            encoding: SampleEncoding::Pcm24,
            ..CaptureSettings::default()
        };
        let source = PipeCaptureSource::new(&settings);
        // 10 ms at 48 kHz, stereo, 3 bytes per sample
        assert_eq!(source.block_bytes, 480 * 2 * 3);
        assert_eq!(source.block_bytes % (2 * 3), 0);
        assert!(!source.is_running());
    }

    #[test]
    fn stopping_a_stopped_source_is_harmless() {
        let settings = CaptureSettings {
            backend: Backend::Pipe,
            ..CaptureSettings::default()
        };
        let mut source = open(&settings);
        source.stop();
        source.stop();
        assert!(!source.is_running());
        assert_eq!(source.name(), "stdin");
    }

    #[test]
    fn asio_reports_float_encoding() {
        let settings = CaptureSettings {
            backend: Backend::Asio,
            encoding: SampleEncoding::Pcm24,
            ..CaptureSettings::default()
        };
        let source = CpalCaptureSource::new(settings);
        assert_eq!(source.encoding(), SampleEncoding::Float32);
        assert!(!source.is_running());
    }

    #[test]
    fn asio_offset_is_checked_against_the_device() {
        assert_eq!(asio_channel(11, 16).unwrap(), 11);
        assert_eq!(asio_channel(0, 1).unwrap(), 0);
        let err = asio_channel(2, 2).unwrap_err();
        assert!(matches!(err, AppError::DeviceOpen(_)));
        assert!(err.to_string().contains("2 inputs"));
    }

    #[test]
    fn host_names_by_backend() {
        assert_eq!(Backend::Default.host_name(), None);
        assert_eq!(Backend::WasapiLoopback.host_name(), Some("WASAPI"));
        assert_eq!(Backend::Asio.host_name(), Some("ASIO"));
        assert!(Backend::WasapiLoopback.is_loopback());
        assert!(!Backend::Wasapi.is_loopback());
    }

    #[test]
    fn pipe_listing_needs_no_host() {
        assert_eq!(list_devices(Backend::Pipe).unwrap(), vec!["stdin".to_string()]);
    }
}
