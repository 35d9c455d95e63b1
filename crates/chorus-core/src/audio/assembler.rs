//! AudioAssembler - chunk ごとの WAV を 1 本の PCM ストリームにまとめる
//!
//! 連結前にすべての chunk を 16bit PCM にそろえます。
//! サンプルレート・チャンネル数は先頭の有効な chunk のものを使い、
//! chunk 間の不一致は補正しません（同一の合成設定から来る前提）。

use std::io::Cursor;

use super::AudioError;
use super::wav::{self, WavHeader};

/// IEEE float (32/64-bit) → 16-bit PCM.
/// Anything else is returned unchanged.
pub fn normalize_to_pcm(bytes: &[u8]) -> Vec<u8> {
    let Some(header) = wav::parse_header(bytes).filter(WavHeader::is_float) else {
        return bytes.to_vec();
    };
    match float_to_pcm16(&header, bytes) {
        Ok(pcm) => pcm,
        Err(e) => {
            tracing::warn!(error = %e, bits = header.bits_per_sample, "Float audio left unconverted");
            bytes.to_vec()
        }
    }
}

fn float_to_pcm16(header: &WavHeader, bytes: &[u8]) -> Result<Vec<u8>, hound::Error> {
    let count = header.frame_count() * usize::from(header.channels);
    let samples: Vec<i16> = match header.bits_per_sample {
        32 => {
            let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
            reader
                .samples::<f32>()
                .take(count)
                .map(|s| s.map(|s| float_to_i16(f64::from(s))))
                .collect::<Result<_, _>>()?
        }
        // hound only reads 32-bit floats
        64 => header
            .frames(bytes)
            .chunks_exact(8)
            .filter_map(|b| b.try_into().ok())
            .map(f64::from_le_bytes)
            .map(float_to_i16)
            .collect(),
        _ => return Err(hound::Error::Unsupported),
    };
    wav::write_pcm16(header.channels, header.sample_rate, &samples)
}

fn float_to_i16(sample: f64) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Join chunk audio in input order.
///
/// Zero inputs give an empty buffer and one input gives its normalized form.
/// Otherwise buffers that are not 16-bit PCM after normalization are skipped,
/// each payload is cut to whole frames, and the output format comes from the
/// first valid buffer.
pub fn concatenate(buffers: &[Vec<u8>]) -> Result<Vec<u8>, AudioError> {
    match buffers {
        [] => return Ok(Vec::new()),
        [single] => return Ok(normalize_to_pcm(single)),
        _ => {}
    }

    let mut first: Option<WavHeader> = None;
    let mut samples: Vec<i16> = Vec::new();

    for (index, buffer) in buffers.iter().enumerate() {
        let normalized = normalize_to_pcm(buffer);
        let Some(header) = wav::parse_header(&normalized).filter(WavHeader::is_pcm16) else {
            tracing::warn!(chunk = index, bytes = buffer.len(), "Skipping unparsable audio chunk");
            continue;
        };
        if let Some(first) = &first
            && (first.sample_rate != header.sample_rate || first.channels != header.channels)
        {
            tracing::warn!(
                chunk = index,
                expected_rate = first.sample_rate,
                rate = header.sample_rate,
                expected_channels = first.channels,
                channels = header.channels,
                "Audio chunk format differs from the first chunk"
            );
        }
        first.get_or_insert(header);
        samples.extend(
            header
                .frames(&normalized)
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
    }

    let first = first.ok_or(AudioError::NoValidChunks(buffers.len()))?;
    Ok(wav::write_pcm16(first.channels, first.sample_rate, &samples)?)
}
