//! RIFF/WAVE のヘッダ解析と標準 44 バイトヘッダの書き出し
//!
//! 合成バックエンドが返す WAV は素直とは限りません（LIST チャンク、
//! 奇数長チャンクの pad byte、WAVE_FORMAT_EXTENSIBLE、data サイズの過大申告）。
//! ここでは全サブチャンクを走査して `fmt ` と `data` を探します。
//! 書き出しは hound に任せます。

use std::io::Cursor;

pub const FORMAT_PCM: u16 = 0x0001;
pub const FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Parsed `fmt ` + `data` location of a WAVE buffer.
///
/// `format` is the effective format tag: for `WAVE_FORMAT_EXTENSIBLE` it is
/// taken from the sub-format GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub data_offset: usize,
    pub data_size: usize,
}

impl WavHeader {
    pub fn is_float(&self) -> bool {
        self.format == FORMAT_IEEE_FLOAT
    }

    pub fn is_pcm16(&self) -> bool {
        self.format == FORMAT_PCM && self.bits_per_sample == 16
    }

    /// Bytes per frame (all channels of one sample instant).
    pub fn block_align(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits_per_sample / 8)
    }

    pub fn frame_count(&self) -> usize {
        match self.block_align() {
            0 => 0,
            align => self.data_size / align,
        }
    }

    /// Duration estimate from sample count / sample rate.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }

    /// The sample payload inside `bytes` (the buffer this header came from).
    pub fn payload<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        let end = self.data_offset.saturating_add(self.data_size).min(bytes.len());
        bytes.get(self.data_offset..end).unwrap_or_default()
    }

    /// [`payload`](Self::payload) cut to whole frames. A truncated response
    /// can end mid-sample; the partial frame is dropped.
    pub fn frames<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        let payload = self.payload(bytes);
        let whole = self.frame_count() * self.block_align();
        payload.get(..whole).unwrap_or(payload)
    }
}

struct FmtChunk {
    format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

/// `None` for anything that is not RIFF/WAVE with both `fmt ` and `data`.
pub fn parse_header(bytes: &[u8]) -> Option<WavHeader> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }

    let mut fmt: Option<FmtChunk> = None;
    let mut data: Option<(usize, usize)> = None;
    let mut pos = 12;

    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = read_u32(bytes, pos + 4)? as usize;
        let body = pos + 8;

        match id {
            b"fmt " => fmt = Some(parse_fmt(bytes, body, size)?),
            b"data" => {
                // over-declared sizes are clamped to what is actually present
                let available = bytes.len() - body;
                data = Some((body, size.min(available)));
            }
            _ => {}
        }

        // chunks are word-aligned: odd sizes carry one pad byte
        pos = body.saturating_add(size).saturating_add(size & 1);
    }

    let fmt = fmt?;
    let (data_offset, data_size) = data?;
    Some(WavHeader {
        format: fmt.format,
        channels: fmt.channels,
        sample_rate: fmt.sample_rate,
        bits_per_sample: fmt.bits_per_sample,
        data_offset,
        data_size,
    })
}

fn parse_fmt(bytes: &[u8], body: usize, size: usize) -> Option<FmtChunk> {
    if size < 16 || body + 16 > bytes.len() {
        return None;
    }
    let mut format = read_u16(bytes, body)?;
    if format == FORMAT_EXTENSIBLE && size >= 40 {
        // first two bytes of the sub-format GUID hold the real tag
        format = read_u16(bytes, body + 24)?;
    }
    Some(FmtChunk {
        format,
        channels: read_u16(bytes, body + 2)?,
        sample_rate: read_u32(bytes, body + 4)?,
        bits_per_sample: read_u16(bytes, body + 14)?,
    })
}

/// Interleaved samples as a 16-bit PCM WAVE file.
pub fn write_pcm16(
    channels: u16,
    sample_rate: u32,
    samples: &[i16],
) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let b = bytes.get(at..at + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{float_wav, pcm16_wav};
    use rstest::rstest;

    #[test]
    fn parses_hound_pcm16() {
        let bytes = pcm16_wav(22_050, 1, &[0, 100, -100, 7]);
        let h = parse_header(&bytes).unwrap();

        assert_eq!(h.format, FORMAT_PCM);
        assert_eq!(h.channels, 1);
        assert_eq!(h.sample_rate, 22_050);
        assert_eq!(h.bits_per_sample, 16);
        assert_eq!(h.data_size, 8);
        assert_eq!(h.payload(&bytes).len(), 8);
        assert!(h.is_pcm16());
    }

    #[test]
    fn parses_float_format() {
        let bytes = float_wav(16_000, 2, &[0.5, -0.5]);
        let h = parse_header(&bytes).unwrap();
        assert!(h.is_float());
        assert_eq!(h.bits_per_sample, 32);
        assert_eq!(h.channels, 2);
    }

    #[rstest]
    #[case::empty(b"".to_vec())]
    #[case::short(b"RIFF".to_vec())]
    #[case::not_wave(b"RIFF\x04\x00\x00\x00AVI ".to_vec())]
    #[case::mp3(b"ID3\x03\x00\x00\x00\x00\x00\x00\x00\x00".to_vec())]
    fn rejects_non_wave(#[case] bytes: Vec<u8>) {
        assert_eq!(parse_header(&bytes), None);
    }

    fn set_declared_data_size(bytes: &mut [u8], size: u32) {
        let at = parse_header(bytes).unwrap().data_offset - 4;
        bytes[at..at + 4].copy_from_slice(&size.to_le_bytes());
    }

    #[test]
    fn requires_fmt_and_data() {
        let full = pcm16_wav(8_000, 1, &[1, 2]);
        let h = parse_header(&full).unwrap();
        // everything before the data chunk
        assert_eq!(parse_header(&full[..h.data_offset - 8]), None);
    }

    #[test]
    fn skips_odd_sized_chunk_with_pad_byte() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF\x00\x00\x00\x00WAVE");
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"abc\x00");
        let plain = pcm16_wav(8_000, 1, &[1, 2]);
        bytes.extend_from_slice(&plain[12..]);

        let h = parse_header(&bytes).unwrap();
        assert_eq!(h.sample_rate, 8_000);
        assert_eq!(h.payload(&bytes), &[1, 0, 2, 0]);
    }

    #[test]
    fn clamps_over_declared_data_size() {
        let mut bytes = pcm16_wav(8_000, 1, &[1, 2]);
        set_declared_data_size(&mut bytes, 0xFFFF_FFF0);

        let h = parse_header(&bytes).unwrap();
        assert_eq!(h.data_size, 4);
    }

    #[test]
    fn frames_drop_a_trailing_partial_frame() {
        let mut bytes = pcm16_wav(8_000, 2, &[1, 2, 3, 4]);
        set_declared_data_size(&mut bytes, 11);
        bytes.extend_from_slice(&[9, 9, 9]);

        let h = parse_header(&bytes).unwrap();
        assert_eq!(h.data_size, 11);
        assert_eq!(h.frame_count(), 2);
        assert_eq!(h.frames(&bytes), &[1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn resolves_extensible_subformat() {
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&FORMAT_EXTENSIBLE.to_le_bytes());
        fmt.extend_from_slice(&1u16.to_le_bytes());
        fmt.extend_from_slice(&24_000u32.to_le_bytes());
        fmt.extend_from_slice(&96_000u32.to_le_bytes());
        fmt.extend_from_slice(&4u16.to_le_bytes());
        fmt.extend_from_slice(&32u16.to_le_bytes());
        fmt.extend_from_slice(&22u16.to_le_bytes());
        fmt.extend_from_slice(&32u16.to_le_bytes());
        fmt.extend_from_slice(&0u32.to_le_bytes());
        fmt.extend_from_slice(&FORMAT_IEEE_FLOAT.to_le_bytes());
        fmt.extend_from_slice(&[0u8; 14]);
        assert_eq!(fmt.len(), 40);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF\x00\x00\x00\x00WAVEfmt ");
        bytes.extend_from_slice(&40u32.to_le_bytes());
        bytes.extend_from_slice(&fmt);
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&0.25f32.to_le_bytes());

        let h = parse_header(&bytes).unwrap();
        assert_eq!(h.format, FORMAT_IEEE_FLOAT);
        assert_eq!(h.sample_rate, 24_000);
    }

    #[test]
    fn writes_plain_pcm16() {
        let bytes = write_pcm16(2, 44_100, &[1, 2, 3, 4]).unwrap();

        let h = parse_header(&bytes).unwrap();
        assert!(h.is_pcm16());
        assert_eq!(h.channels, 2);
        assert_eq!(h.sample_rate, 44_100);
        assert_eq!(h.frame_count(), 2);
        assert_eq!(h.payload(&bytes), &[1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn duration_from_frames_and_rate() {
        let bytes = pcm16_wav(8_000, 2, &vec![0i16; 8_000 * 2 * 3]);
        let h = parse_header(&bytes).unwrap();
        assert_eq!(h.frame_count(), 24_000);
        assert!((h.duration_secs() - 3.0).abs() < 1e-9);
    }
}
