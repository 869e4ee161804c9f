//! Media pipeline — stateful resampling, VAD/endpointing, sentence segmentation,
//! and the black-box collaborator traits (policy, STT, TTS, VAD).

pub mod collaborators;
pub mod resampler;
pub mod segmenter;
pub mod vad;
