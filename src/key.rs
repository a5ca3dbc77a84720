//! Content-addressed keys for pipeline artifacts.
//!
//! Every key is the SHA-256 hex digest of the canonical JSON encoding of
//! its source bundle. Source structs serialize their fields in declaration
//! order and floats round-trip bit-for-bit, so value-equal inputs always
//! produce byte-equal encodings and therefore equal keys.

use crate::error::KeyError;
use crate::query::FrameAudioQuery;
use crate::score::{EngineId, Note, Singer, StyleId, TrackId};
use crate::tempo::Tempo;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

fn content_hash<T: Serialize>(value: &T) -> Result<String, KeyError> {
    use fmt::Write;

    let encoded = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Writing to a String cannot fail.
        let _ = write!(hex, "{:02x}", byte);
    }
    Ok(hex)
}

macro_rules! key_type {
    ($(#[$doc:meta])* $name:ident from $source:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn from_source(source: &$source<'_>) -> Result<Self, KeyError> {
                Ok(Self(content_hash(source)?))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

key_type!(
    /// Identity of a phrase: leading rest, notes, start time and track.
    PhraseKey from PhraseSource
);
key_type!(
    /// Identity of a frame audio query and everything that shaped it.
    QueryKey from QuerySource
);
key_type!(
    /// Identity of a generated f0 curve.
    PitchKey from PitchSource
);
key_type!(
    /// Identity of a generated volume envelope.
    VolumeKey from VolumeSource
);
key_type!(
    /// Identity of a synthesized voice blob.
    VoiceKey from VoiceSource
);

/// Inputs that define a phrase.
#[derive(Debug, Serialize)]
pub struct PhraseSource<'a> {
    pub first_rest_duration: i64,
    pub notes: &'a [Note],
    pub start_time: f64,
    pub track_id: TrackId,
}

/// Inputs that define a query generation call.
#[derive(Debug, Serialize)]
pub struct QuerySource<'a> {
    pub engine_id: EngineId,
    pub engine_frame_rate: f64,
    pub style_id: StyleId,
    pub tpqn: i64,
    pub tempos: &'a [Tempo],
    pub first_rest_duration: i64,
    pub notes: &'a [Note],
    pub key_range_adjustment: i32,
}

/// Inputs that define a pitch generation call. Includes the
/// timing-adjusted query so timing edits invalidate the pitch.
#[derive(Debug, Serialize)]
pub struct PitchSource<'a> {
    pub engine_id: EngineId,
    pub engine_frame_rate: f64,
    pub style_id: StyleId,
    pub tpqn: i64,
    pub tempos: &'a [Tempo],
    pub first_rest_duration: i64,
    pub notes: &'a [Note],
    pub key_range_adjustment: i32,
    pub query: &'a FrameAudioQuery,
}

/// Inputs that define a volume generation call. The query carries the
/// generated pitch and the user's pitch edits; the fade parameters are
/// included because they shape the output envelope.
#[derive(Debug, Serialize)]
pub struct VolumeSource<'a> {
    pub engine_id: EngineId,
    pub engine_frame_rate: f64,
    pub style_id: StyleId,
    pub tpqn: i64,
    pub tempos: &'a [Tempo],
    pub first_rest_duration: i64,
    pub notes: &'a [Note],
    pub key_range_adjustment: i32,
    pub volume_range_adjustment: f64,
    pub fade_out_duration_seconds: f64,
    pub query: &'a FrameAudioQuery,
}

/// Inputs that define a voice synthesis call. The query carries the
/// generated pitch, the generated volume and the user's pitch edits.
#[derive(Debug, Serialize)]
pub struct VoiceSource<'a> {
    pub singer: Singer,
    pub query: &'a FrameAudioQuery,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::NoteId;

    fn notes() -> Vec<Note> {
        vec![Note {
            id: NoteId(1),
            position: 480,
            duration: 480,
            note_number: 60,
            lyric: "do".to_string(),
        }]
    }

    #[test]
    fn test_equal_sources_equal_keys() {
        let notes = notes();
        let a = PhraseKey::from_source(&PhraseSource {
            first_rest_duration: 240,
            notes: &notes,
            start_time: 0.25,
            track_id: TrackId(1),
        })
        .unwrap();
        let b = PhraseKey::from_source(&PhraseSource {
            first_rest_duration: 240,
            notes: &notes.clone(),
            start_time: 0.25,
            track_id: TrackId(1),
        })
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_any_field_changes_key() {
        let notes = notes();
        let base = PhraseSource {
            first_rest_duration: 240,
            notes: &notes,
            start_time: 0.25,
            track_id: TrackId(1),
        };
        let base_key = PhraseKey::from_source(&base).unwrap();

        let other = PhraseKey::from_source(&PhraseSource {
            track_id: TrackId(2),
            ..base
        })
        .unwrap();
        assert_ne!(base_key, other);

        let mut changed = notes.clone();
        changed[0].lyric = "re".to_string();
        let other = PhraseKey::from_source(&PhraseSource {
            first_rest_duration: 240,
            notes: &changed,
            start_time: 0.25,
            track_id: TrackId(1),
        })
        .unwrap();
        assert_ne!(base_key, other);
    }

    #[test]
    fn test_float_precision_preserved() {
        let notes = notes();
        let a = PhraseKey::from_source(&PhraseSource {
            first_rest_duration: 240,
            notes: &notes,
            start_time: 0.1 + 0.2,
            track_id: TrackId(1),
        })
        .unwrap();
        let b = PhraseKey::from_source(&PhraseSource {
            first_rest_duration: 240,
            notes: &notes,
            start_time: 0.3,
            track_id: TrackId(1),
        })
        .unwrap();
        // 0.1 + 0.2 != 0.3 in f64; the keys must see the difference.
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let notes = notes();
        let key = PhraseKey::from_source(&PhraseSource {
            first_rest_duration: 240,
            notes: &notes,
            start_time: 0.25,
            track_id: TrackId(1),
        })
        .unwrap();
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
