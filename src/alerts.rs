use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Local};
use log::{error, info, warn};
use reqwest::blocking::multipart;
use serde_json::json;
#[cfg(not(feature = "audio"))]
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[cfg(feature = "audio")]
use crate::config::constants;
use crate::error::AlertError;

/// Details of one alarm trigger, handed to the notifier.
#[derive(Debug, Clone)]
pub struct AlarmEvent {
    pub motion_count: u32,
    pub timestamp: DateTime<Local>,
    /// JPEG of the annotated frame that fired the alarm.
    pub image: Option<Bytes>,
}

/// Side effects fired when the alarm triggers.
///
/// Every channel is fire-and-forget: `notify` hands the work to a background
/// thread and each failure is logged there, so an unreachable dashboard or a
/// missing audio device never stalls frame processing.
#[derive(Clone)]
pub struct AlertNotifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    dashboard_url: Option<String>,
    discord_webhook: Option<String>,
    audible: bool,
    client: reqwest::blocking::Client,
}

impl AlertNotifier {
    /// Create a notifier.
    ///
    /// # Arguments
    ///
    /// * `dashboard_url` - Endpoint called with a GET on every alarm
    /// * `discord_webhook` - Optional Discord webhook receiving the alarm frame
    /// * `audible` - Sound the local alarm tone (see [`sound_alarm`])
    pub fn new(
        dashboard_url: Option<String>,
        discord_webhook: Option<String>,
        audible: bool,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            inner: Arc::new(NotifierInner {
                dashboard_url,
                discord_webhook,
                audible,
                client,
            }),
        })
    }

    /// Fire every configured channel on a background thread.
    ///
    /// The returned handle can be ignored. Joining it waits for the attempts
    /// to finish but never reports their failures.
    pub fn notify(&self, event: AlarmEvent) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || inner.deliver(&event))
    }
}

impl NotifierInner {
    fn deliver(&self, event: &AlarmEvent) {
        if self.audible {
            if let Err(e) = sound_alarm() {
                warn!("{}", e);
            }
        }

        if let Some(url) = &self.dashboard_url {
            match self.trigger_dashboard(url) {
                Ok(()) => info!("Dashboard alert sent to {}", url),
                Err(e) => error!("Error triggering web alert: {}", e),
            }
        }

        if let Some(webhook) = &self.discord_webhook {
            match self.send_discord_alert(webhook, event) {
                Ok(()) => info!("Sent Discord alarm alert"),
                Err(e) => error!("Failed to send Discord alarm alert: {}", e),
            }
        }
    }

    fn trigger_dashboard(&self, url: &str) -> Result<(), AlertError> {
        let failed = |reason: String| AlertError::RequestFailed {
            url: url.to_string(),
            reason,
        };

        let response = self.client.get(url).send().map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    /// Send the alarm as a Discord rich embed, attaching the frame when present.
    fn send_discord_alert(&self, webhook: &str, event: &AlarmEvent) -> Result<(), AlertError> {
        let failed = |reason: String| AlertError::RequestFailed {
            url: webhook.to_string(),
            reason,
        };

        let filename = format!("alarm_{}.jpg", event.timestamp.format("%Y%m%d-%H%M%S"));
        let mut embed = json!({
            "title": "🚨 Suspicious Motion Detected",
            "description": format!(
                "**{}** motion events counted in the current window.\nCaptured at {}.",
                event.motion_count,
                event.timestamp.format("%Y-%m-%d %H:%M:%S")
            ),
            "color": 0xFF0000,
            "timestamp": event.timestamp.to_rfc3339(),
            "footer": { "text": "Proctor Guardian" }
        });

        let request = match &event.image {
            Some(image) => {
                embed["image"] = json!({ "url": format!("attachment://{}", filename) });
                let payload = json!({ "embeds": [embed] });
                let part = multipart::Part::bytes(image.to_vec())
                    .file_name(filename)
                    .mime_str("image/jpeg")
                    .map_err(|e| failed(e.to_string()))?;
                let form = multipart::Form::new()
                    .text("payload_json", payload.to_string())
                    .part("files[0]", part);
                self.client.post(webhook).multipart(form)
            }
            None => self.client.post(webhook).json(&json!({ "embeds": [embed] })),
        };

        let response = request.send().map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}

/// Sound the local alarm.
///
/// With the `audio` feature this plays a 1 kHz tone for one second on the
/// default output device and blocks until it ends. Without it the terminal
/// bell is rung instead.
///
/// # Errors
///
/// Returns [`AlertError::AudioUnavailable`] when there is no output device
/// or the tone stream cannot be started.
pub fn sound_alarm() -> Result<(), AlertError> {
    #[cfg(feature = "audio")]
    {
        play_tone(
            constants::ALERT_TONE_HZ,
            Duration::from_millis(constants::ALERT_TONE_DURATION_MS),
        )
    }
    #[cfg(not(feature = "audio"))]
    {
        ring_bell()
    }
}

#[cfg(not(feature = "audio"))]
fn ring_bell() -> Result<(), AlertError> {
    let mut stderr = std::io::stderr();
    stderr
        .write_all(b"\x07")
        .and_then(|_| stderr.flush())
        .map_err(|e| AlertError::AudioUnavailable {
            reason: e.to_string(),
        })
}

#[cfg(feature = "audio")]
fn play_tone(frequency_hz: f32, duration: Duration) -> Result<(), AlertError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let unavailable = |reason: String| AlertError::AudioUnavailable { reason };

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| unavailable("no default output device".to_string()))?;
    let supported_config = device
        .default_output_config()
        .map_err(|e| unavailable(e.to_string()))?;

    let stream = match supported_config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_tone_stream::<f32>(&device, &supported_config.into(), frequency_hz)
        }
        cpal::SampleFormat::I16 => {
            build_tone_stream::<i16>(&device, &supported_config.into(), frequency_hz)
        }
        cpal::SampleFormat::U16 => {
            build_tone_stream::<u16>(&device, &supported_config.into(), frequency_hz)
        }
        cpal::SampleFormat::I32 => {
            build_tone_stream::<i32>(&device, &supported_config.into(), frequency_hz)
        }
        fmt => return Err(unavailable(format!("unsupported sample format {:?}", fmt))),
    }
    .map_err(|e| unavailable(e.to_string()))?;

    stream.play().map_err(|e| unavailable(e.to_string()))?;
    thread::sleep(duration);
    Ok(())
}

#[cfg(feature = "audio")]
fn build_tone_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frequency_hz: f32,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    use cpal::Sample;
    use cpal::traits::DeviceTrait;

    let channels = config.channels.max(1) as usize;
    let mut tone = ToneGenerator::new(frequency_hz, config.sample_rate.0);

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                let value = T::from_sample(tone.next_sample());
                frame.iter_mut().for_each(|sample| *sample = value);
            }
        },
        |err| warn!("Alarm tone stream error: {}", err),
        None,
    )
}

/// Sine oscillator producing one sample per call.
#[cfg(feature = "audio")]
struct ToneGenerator {
    phase: f32,
    step: f32,
}

#[cfg(feature = "audio")]
impl ToneGenerator {
    const AMPLITUDE: f32 = 0.5;

    fn new(frequency_hz: f32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: frequency_hz / sample_rate.max(1) as f32,
        }
    }

    fn next_sample(&mut self) -> f32 {
        let sample = (self.phase * std::f32::consts::TAU).sin() * Self::AMPLITUDE;
        self.phase = (self.phase + self.step).fract();
        sample
    }
}
