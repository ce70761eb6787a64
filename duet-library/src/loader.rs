//! Audio file loading and decoding

use duet_audio::{CancelToken, DecodedAudio, LoadError, TrackRecord, TrackSource};
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Extensions tried when a track carries no format hint
const FALLBACK_EXTENSIONS: [&str; 5] = ["mp3", "flac", "wav", "ogg", "aac"];

/// Audio file loader using Symphonia
///
/// Always produces interleaved stereo at the target sample rate.
#[derive(Debug, Clone)]
pub struct TrackLoader {
    target_sample_rate: u32,
}

impl Default for TrackLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackLoader {
    /// Create a new track loader with default 48kHz sample rate
    pub fn new() -> Self {
        Self::with_sample_rate(48000)
    }

    /// Create a new track loader with specific sample rate
    pub fn with_sample_rate(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Load and decode an audio file, giving up once `cancel` fires
    pub fn load(&self, path: &Path, cancel: &CancelToken) -> Result<DecodedAudio, LoadError> {
        let file = std::fs::File::open(path).map_err(|e| LoadError::Io(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create hint from file extension
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        let mut format = probed.format;

        // Find first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(LoadError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let source_sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(2).max(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::Decode(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Err(LoadError::Cancelled);
            }

            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(_) => break,
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(_) => continue,
            };

            // Convert to f32 interleaved
            let spec = *decoded.spec();
            let duration = decoded.capacity() as u64;

            let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        if samples.is_empty() {
            return Err(LoadError::Decode("no audio frames decoded".to_string()));
        }

        let stereo = to_stereo(&samples, channels);

        let samples = if source_sample_rate != self.target_sample_rate {
            self.resample(&stereo, source_sample_rate)?
        } else {
            stereo
        };

        debug!(
            path = %path.display(),
            source_rate = source_sample_rate,
            channels,
            frames = samples.len() / 2,
            "decoded track"
        );

        Ok(DecodedAudio::new(samples, self.target_sample_rate))
    }

    /// Resample interleaved stereo audio to the target sample rate
    fn resample(&self, samples: &[f32], source_rate: u32) -> Result<Vec<f32>, LoadError> {
        use rubato::{FftFixedInOut, Resampler};

        const CHANNELS: usize = 2;
        let frames = samples.len() / CHANNELS;

        let mut resampler = FftFixedInOut::<f32>::new(
            source_rate as usize,
            self.target_sample_rate as usize,
            1024,
            CHANNELS,
        )
        .map_err(|e| LoadError::Decode(e.to_string()))?;

        // Deinterleave
        let deinterleaved: Vec<Vec<f32>> = (0..CHANNELS)
            .map(|ch| (0..frames).map(|f| samples[f * CHANNELS + ch]).collect())
            .collect();

        let chunk_size = resampler.input_frames_next();
        let mut output: Vec<Vec<f32>> = vec![Vec::new(); CHANNELS];

        let mut pos = 0;
        while pos + chunk_size <= frames {
            let input_refs: Vec<&[f32]> = deinterleaved
                .iter()
                .map(|ch| &ch[pos..pos + chunk_size])
                .collect();

            let resampled = resampler
                .process(&input_refs, None)
                .map_err(|e| LoadError::Decode(e.to_string()))?;

            for (ch, data) in resampled.into_iter().enumerate() {
                output[ch].extend(data);
            }

            pos += chunk_size;
        }

        // Handle remaining samples (pad with zeros)
        if pos < frames {
            let remaining = frames - pos;
            let padded: Vec<Vec<f32>> = deinterleaved
                .iter()
                .map(|ch| {
                    let mut v = ch[pos..].to_vec();
                    v.resize(chunk_size, 0.0);
                    v
                })
                .collect();

            let input_refs: Vec<&[f32]> = padded.iter().map(|v| v.as_slice()).collect();

            if let Ok(resampled) = resampler.process(&input_refs, None) {
                // Only take the proportional amount of output
                let output_frames =
                    (remaining * self.target_sample_rate as usize) / source_rate as usize;
                for (ch, data) in resampled.into_iter().enumerate() {
                    output[ch].extend(&data[..output_frames.min(data.len())]);
                }
            }
        }

        // Reinterleave
        let [left, right] = [&output[0], &output[1]];
        Ok(left
            .iter()
            .zip(right.iter())
            .flat_map(|(l, r)| [*l, *r])
            .collect())
    }
}

/// Fold any channel layout into interleaved stereo
fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        2 => samples.to_vec(),
        1 => samples.iter().flat_map(|s| [*s, *s]).collect(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Track source reading files from a media directory
///
/// A track's `source_uri` is used directly when it is an absolute path or a
/// `file://` URI. Otherwise the file is `<media_dir>/<track id>.<ext>`, with
/// the extension taken from the `source_uri` when it has one.
#[derive(Debug, Clone)]
pub struct MediaSource {
    media_dir: PathBuf,
    loader: TrackLoader,
}

impl MediaSource {
    pub fn new(media_dir: impl Into<PathBuf>, loader: TrackLoader) -> Self {
        Self {
            media_dir: media_dir.into(),
            loader,
        }
    }

    /// Locate the audio file for a track
    pub fn resolve(&self, track: &TrackRecord) -> Result<PathBuf, LoadError> {
        let uri = track.source_uri.as_deref().unwrap_or("");

        if let Some(path) = uri.strip_prefix("file://") {
            return existing(PathBuf::from(path));
        }
        if !uri.is_empty() && Path::new(uri).is_absolute() {
            return existing(PathBuf::from(uri));
        }

        match extension_hint(uri) {
            Some(ext) => existing(self.media_dir.join(format!("{}.{}", track.id, ext))),
            None => FALLBACK_EXTENSIONS
                .iter()
                .map(|ext| self.media_dir.join(format!("{}.{}", track.id, ext)))
                .find(|path| path.is_file())
                .ok_or_else(|| LoadError::NoSource(track.id.clone())),
        }
    }
}

impl TrackSource for MediaSource {
    fn fetch(&self, track: &TrackRecord, cancel: &CancelToken) -> Result<DecodedAudio, LoadError> {
        let path = self.resolve(track)?;
        self.loader.load(&path, cancel)
    }
}

fn existing(path: PathBuf) -> Result<PathBuf, LoadError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(LoadError::NotFound(path.display().to_string()))
    }
}

/// File extension of a URI's last path segment, ignoring query and fragment
fn extension_hint(uri: &str) -> Option<String> {
    let path = uri.split(['?', '#']).next().unwrap_or("");
    let name = path.rsplit('/').next().unwrap_or("");
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
