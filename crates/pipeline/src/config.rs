//! Typed configuration (spec §6.5). The core never reads environment
//! variables or files directly; a caller builds a `Config` (optionally via
//! `Config::from_json_str`) and hands it to `Pipeline::new`.

use std::time::Duration;

use polyphony_buffer::SmartBufferConfig;
use polyphony_dispatcher::DispatcherConfig;
use polyphony_vad::VadConfig;
use serde::Deserialize;

use crate::error::PipelineError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Soft target; mapped onto `vad.target_duration` when set.
    pub buffer_duration_sec: Option<f64>,
    /// Mapped onto `vad.sentence_end_silence` when set.
    pub silence_timeout_ms: Option<u64>,
    /// Floor on `vad.min_speech_duration`.
    pub min_audio_ms: u64,
    pub context_expiration_sec: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_duration_sec: None,
            silence_timeout_ms: None,
            min_audio_ms: 300,
            context_expiration_sec: 15.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadSection {
    pub min_speech_ms: u64,
    pub max_silence_in_speech_ms: u64,
    pub sentence_end_silence_ms: u64,
    pub max_segment_duration_s: u64,
    pub target_duration_ms: u64,
    pub energy_drop_ratio: f32,
    pub min_energy_level: f32,
}

impl Default for VadSection {
    fn default() -> Self {
        let d = VadConfig::default();
        Self {
            min_speech_ms: d.min_speech_duration.as_millis() as u64,
            max_silence_in_speech_ms: d.max_silence_in_speech.as_millis() as u64,
            sentence_end_silence_ms: d.sentence_end_silence.as_millis() as u64,
            max_segment_duration_s: d.max_segment_duration.as_secs(),
            target_duration_ms: d.target_duration.as_millis() as u64,
            energy_drop_ratio: d.energy_drop_ratio,
            min_energy_level: d.min_energy_level,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub worker_count: usize,
    pub queue_size: usize,
    pub per_speaker_queue_size: usize,
    pub max_active_speakers: usize,
    pub event_buffer_size: usize,
    pub shutdown_grace_sec: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub idle_eviction_sec: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let d = DispatcherConfig::default();
        Self {
            worker_count: d.worker_count,
            queue_size: 256,
            per_speaker_queue_size: d.per_speaker_max_queue_size,
            max_active_speakers: d.max_active_speakers,
            event_buffer_size: 1000,
            shutdown_grace_sec: 5,
            max_retries: d.max_retries,
            retry_delay_ms: d.retry_delay.as_millis() as u64,
            idle_eviction_sec: d.idle_eviction.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sample_rate: u32,
    pub channels: u16,
    pub audio: AudioConfig,
    pub vad: VadSection,
    pub pipeline: PipelineSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            audio: AudioConfig::default(),
            vad: VadSection::default(),
            pipeline: PipelineSection::default(),
        }
    }
}

impl Config {
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Rejects configurations that would otherwise silently wedge the
    /// pipeline (a zero-sized channel never delivers, a zero-worker pool
    /// never drains). Called by `Pipeline::new` before anything is spawned.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.sample_rate == 0 {
            return Err(PipelineError::ConfigInvalid(
                "sample_rate must be non-zero".to_string(),
            ));
        }
        if self.channels == 0 {
            return Err(PipelineError::ConfigInvalid(
                "channels must be non-zero".to_string(),
            ));
        }
        if self.pipeline.queue_size == 0 {
            return Err(PipelineError::ConfigInvalid(
                "pipeline.queue_size must be non-zero".to_string(),
            ));
        }
        if self.pipeline.per_speaker_queue_size == 0 {
            return Err(PipelineError::ConfigInvalid(
                "pipeline.per_speaker_queue_size must be non-zero".to_string(),
            ));
        }
        if self.pipeline.max_active_speakers == 0 {
            return Err(PipelineError::ConfigInvalid(
                "pipeline.max_active_speakers must be non-zero".to_string(),
            ));
        }
        if self.pipeline.event_buffer_size == 0 {
            return Err(PipelineError::ConfigInvalid(
                "pipeline.event_buffer_size must be non-zero".to_string(),
            ));
        }
        if self.vad.target_duration_ms == 0 {
            return Err(PipelineError::ConfigInvalid(
                "vad.target_duration_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn effective_vad_config(&self) -> VadConfig {
        let min_speech_ms = self.vad.min_speech_ms.max(self.audio.min_audio_ms);
        let target_duration_ms = self
            .audio
            .buffer_duration_sec
            .map(|s| (s * 1000.0) as u64)
            .unwrap_or(self.vad.target_duration_ms);
        let sentence_end_silence_ms = self
            .audio
            .silence_timeout_ms
            .unwrap_or(self.vad.sentence_end_silence_ms);

        VadConfig {
            min_speech_duration: Duration::from_millis(min_speech_ms),
            max_silence_in_speech: Duration::from_millis(self.vad.max_silence_in_speech_ms),
            sentence_end_silence: Duration::from_millis(sentence_end_silence_ms),
            max_segment_duration: Duration::from_secs(self.vad.max_segment_duration_s),
            target_duration: Duration::from_millis(target_duration_ms),
            energy_drop_ratio: self.vad.energy_drop_ratio,
            min_energy_level: self.vad.min_energy_level,
        }
    }

    pub fn smart_buffer_config(&self) -> SmartBufferConfig {
        SmartBufferConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            context_expiration: Duration::from_secs_f64(self.audio.context_expiration_sec),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_count: self.pipeline.worker_count,
            per_speaker_max_queue_size: self.pipeline.per_speaker_queue_size,
            max_active_speakers: self.pipeline.max_active_speakers,
            idle_eviction: Duration::from_secs(self.pipeline.idle_eviction_sec),
            max_retries: self.pipeline.max_retries,
            retry_delay: Duration::from_millis(self.pipeline.retry_delay_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.pipeline.shutdown_grace_sec)
    }
}
