//! Frame ingress types (spec §3/§6.1). Produced by an external Discord
//! gateway/voice client, consumed by exactly one `SmartBuffer`.

/// A decoded frame of 16-bit little-endian PCM at 48 kHz stereo, tagged
/// with a stream id and a resolved user identity. Comfort-noise frames
/// carry an empty `payload` and `is_speech = false`.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub stream_id: u32,
    pub user_id: String,
    pub display_name: String,
    pub payload: Vec<u8>,
    pub is_speech: bool,
}

impl PcmFrame {
    pub fn speech(stream_id: u32, user_id: impl Into<String>, display_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            stream_id,
            user_id: user_id.into(),
            display_name: display_name.into(),
            payload,
            is_speech: true,
        }
    }

    pub fn comfort_noise(stream_id: u32, user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            stream_id,
            user_id: user_id.into(),
            display_name: display_name.into(),
            payload: Vec::new(),
            is_speech: false,
        }
    }
}
