//! Minimal RIFF/WAVE loader for the μ-law 8 kHz mono silence source.
//!
//! Only `fmt ` (requiring `wFormatTag == 7`, 1 channel, 8000 Hz, 8 bits)
//! and `data` chunks are understood; anything else in the file is skipped
//! by its declared chunk size.

use std::io::Read;
use std::path::Path;

use crate::error::{Result, RtpError};

const WAVE_FORMAT_MULAW: u16 = 7;

/// The μ-law payload bytes read out of a `data` chunk, ready to be used
/// as a wrap-around silence/keepalive source.
#[derive(Debug, Clone)]
pub struct MulawWav {
    pub samples: Vec<u8>,
}

impl MulawWav {
    /// Load and validate a μ-law mono 8 kHz 8-bit WAV file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Self::parse(&buf)
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 12 || &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
            return Err(RtpError::Wav("not a RIFF/WAVE file".into()));
        }

        let mut pos = 12usize;
        let mut format_tag = None;
        let mut channels = None;
        let mut sample_rate = None;
        let mut bits_per_sample = None;
        let mut data: Option<Vec<u8>> = None;

        while pos + 8 <= buf.len() {
            let chunk_id = &buf[pos..pos + 4];
            let chunk_size = u32::from_le_bytes(buf[pos + 4..pos + 8].try_into().unwrap()) as usize;
            let body_start = pos + 8;
            let body_end = body_start
                .checked_add(chunk_size)
                .ok_or_else(|| RtpError::Wav("chunk size overflow".into()))?;
            if body_end > buf.len() {
                return Err(RtpError::Wav("chunk runs past end of file".into()));
            }
            let body = &buf[body_start..body_end];

            match chunk_id {
                b"fmt " => {
                    if body.len() < 16 {
                        return Err(RtpError::Wav("fmt chunk too short".into()));
                    }
                    format_tag = Some(u16::from_le_bytes(body[0..2].try_into().unwrap()));
                    channels = Some(u16::from_le_bytes(body[2..4].try_into().unwrap()));
                    sample_rate = Some(u32::from_le_bytes(body[4..8].try_into().unwrap()));
                    bits_per_sample = Some(u16::from_le_bytes(body[14..16].try_into().unwrap()));
                }
                b"data" => data = Some(body.to_vec()),
                _ => {}
            }

            // Chunks are word-aligned; a chunk with an odd size has one
            // padding byte after it that is not part of chunk_size.
            pos = body_end + (chunk_size % 2);
        }

        let format_tag = format_tag.ok_or_else(|| RtpError::Wav("missing fmt chunk".into()))?;
        let channels = channels.ok_or_else(|| RtpError::Wav("missing fmt chunk".into()))?;
        let sample_rate = sample_rate.ok_or_else(|| RtpError::Wav("missing fmt chunk".into()))?;
        let bits_per_sample =
            bits_per_sample.ok_or_else(|| RtpError::Wav("missing fmt chunk".into()))?;
        let data = data.ok_or_else(|| RtpError::Wav("missing data chunk".into()))?;

        if format_tag != WAVE_FORMAT_MULAW {
            return Err(RtpError::Wav(format!(
                "unsupported wFormatTag {format_tag} (need {WAVE_FORMAT_MULAW}, μ-law)"
            )));
        }
        if channels != 1 {
            return Err(RtpError::Wav(format!("unsupported channel count {channels} (need 1)")));
        }
        if sample_rate != 8000 {
            return Err(RtpError::Wav(format!(
                "unsupported sample rate {sample_rate} Hz (need 8000)"
            )));
        }
        if bits_per_sample != 8 {
            return Err(RtpError::Wav(format!(
                "unsupported bits per sample {bits_per_sample} (need 8)"
            )));
        }

        Ok(MulawWav { samples: data })
    }

    /// Fill `out` with `out.len()` bytes starting at `offset` into the
    /// sample buffer, wrapping around to the start when exhausted.
    /// Returns the new offset.
    pub fn fill_wrapping(&self, out: &mut [u8], offset: usize) -> usize {
        if self.samples.is_empty() {
            out.fill(0xFF);
            return 0;
        }
        let len = self.samples.len();
        let mut pos = offset % len;
        for byte in out.iter_mut() {
            *byte = self.samples[pos];
            pos = (pos + 1) % len;
        }
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_wav(format_tag: u16, channels: u16, rate: u32, bits: u16, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        let fmt_chunk_len = 16u32;
        let riff_len = 4 + (8 + fmt_chunk_len) + (8 + data.len() as u32);
        buf.extend_from_slice(&riff_len.to_le_bytes());
        buf.extend_from_slice(b"WAVE");

        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&fmt_chunk_len.to_le_bytes());
        buf.extend_from_slice(&format_tag.to_le_bytes());
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&rate.to_le_bytes());
        let byte_rate = rate * channels as u32 * (bits as u32 / 8);
        buf.extend_from_slice(&byte_rate.to_le_bytes());
        let block_align = channels * (bits / 8);
        buf.extend_from_slice(&block_align.to_le_bytes());
        buf.extend_from_slice(&bits.to_le_bytes());

        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
        buf
    }

    #[test]
    fn loads_valid_mulaw_wav_and_reads_back_identical_bytes() {
        let data: Vec<u8> = (0..=255u8).collect();
        let buf = build_wav(7, 1, 8000, 8, &data);
        let wav = MulawWav::parse(&buf).unwrap();
        assert_eq!(wav.samples, data);

        let mut out = vec![0u8; data.len()];
        wav.fill_wrapping(&mut out, 0);
        assert_eq!(out, data);
    }

    #[test]
    fn rejects_wrong_format_tag() {
        let buf = build_wav(1, 1, 8000, 8, &[0u8; 4]); // PCM, not mulaw
        assert!(MulawWav::parse(&buf).is_err());
    }

    #[test]
    fn rejects_wrong_sample_rate() {
        let buf = build_wav(7, 1, 16000, 8, &[0u8; 4]);
        assert!(MulawWav::parse(&buf).is_err());
    }

    #[test]
    fn fill_wrapping_wraps_around() {
        let wav = MulawWav {
            samples: vec![1, 2, 3],
        };
        let mut out = [0u8; 7];
        let next = wav.fill_wrapping(&mut out, 1);
        assert_eq!(out, [2, 3, 1, 2, 3, 1, 2]);
        assert_eq!(next, 1);
    }
}
