//! audio - PCM capture, playback and block arithmetic
//!
//! ALSA stands in for the codec + I2S channel: a capture device opened once
//! as interleaved S16LE stereo, and a playback device fed from a raw buffer.

mod alsa_device;
pub mod pcm;
pub mod play;
mod recovery;
pub mod source;

pub use source::{AlsaSource, AudioSource, CaptureError, RawFileSource};
