//! # Container Writer
//!
//! Persists accumulated PCM as a canonical 44-byte-header RIFF/WAVE file.
//!
//! ## Layout (all integers little-endian):
//! ```text
//! 0   "RIFF"  u32 riff_len = 36 + data_len  "WAVE"
//! 12  "fmt "  u32 16  u16 format=1  u16 channels  u32 sample_rate
//!             u32 byte_rate  u16 block_align  u16 bits_per_sample=16
//! 36  "data"  u32 data_len  <payload>
//! ```
//!
//! The file is written to a temp sibling and renamed over the target, so a
//! reader sees either the old file or a complete new one.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DecodeError;

pub const HEADER_LEN: usize = 44;
pub const BITS_PER_SAMPLE: u16 = 16;

const FORMAT_PCM: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

/// Fields of the canonical header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

impl ContainerHeader {
    pub fn pcm16(sample_rate: u32, channels: u16, data_len: u32) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: BITS_PER_SAMPLE,
            data_len,
        }
    }

    pub fn block_align(&self) -> u16 {
        self.channels.wrapping_mul(self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.wrapping_mul(u32::from(self.block_align()))
    }

    pub fn riff_len(&self) -> u32 {
        self.data_len.wrapping_add(36)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(b"RIFF")?;
        w.write_u32::<LittleEndian>(self.riff_len())?;
        w.write_all(b"WAVE")?;

        w.write_all(b"fmt ")?;
        w.write_u32::<LittleEndian>(FMT_CHUNK_LEN)?;
        w.write_u16::<LittleEndian>(FORMAT_PCM)?;
        w.write_u16::<LittleEndian>(self.channels)?;
        w.write_u32::<LittleEndian>(self.sample_rate)?;
        w.write_u32::<LittleEndian>(self.byte_rate())?;
        w.write_u16::<LittleEndian>(self.block_align())?;
        w.write_u16::<LittleEndian>(self.bits_per_sample)?;

        w.write_all(b"data")?;
        w.write_u32::<LittleEndian>(self.data_len)
    }

    /// Parse a canonical header. Anything else (extra chunks, non-PCM) is rejected.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        expect_tag(r, b"RIFF")?;
        let riff_len = r.read_u32::<LittleEndian>()?;
        expect_tag(r, b"WAVE")?;

        expect_tag(r, b"fmt ")?;
        if r.read_u32::<LittleEndian>()? != FMT_CHUNK_LEN {
            return Err(invalid_data("unexpected fmt chunk length"));
        }
        if r.read_u16::<LittleEndian>()? != FORMAT_PCM {
            return Err(invalid_data("not a PCM container"));
        }
        let channels = r.read_u16::<LittleEndian>()?;
        let sample_rate = r.read_u32::<LittleEndian>()?;
        let byte_rate = r.read_u32::<LittleEndian>()?;
        let block_align = r.read_u16::<LittleEndian>()?;
        let bits_per_sample = r.read_u16::<LittleEndian>()?;

        expect_tag(r, b"data")?;
        let data_len = r.read_u32::<LittleEndian>()?;

        let header = Self {
            sample_rate,
            channels,
            bits_per_sample,
            data_len,
        };
        if header.riff_len() != riff_len
            || header.byte_rate() != byte_rate
            || header.block_align() != block_align
        {
            return Err(invalid_data("inconsistent header fields"));
        }
        Ok(header)
    }
}

fn expect_tag<R: Read>(r: &mut R, tag: &[u8; 4]) -> io::Result<()> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    if &buf != tag {
        return Err(invalid_data(&format!(
            "expected '{}' tag",
            String::from_utf8_lossy(tag)
        )));
    }
    Ok(())
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Write `pcm` as a 16-bit container at `output_path`, replacing any existing file.
///
/// Returns the path written. The parent directory must already exist; on any
/// failure no file is left at `output_path` that was not there before.
pub fn write_container(
    pcm: &[u8],
    output_path: &Path,
    sample_rate: u32,
    channels: u16,
) -> Result<PathBuf, DecodeError> {
    if sample_rate == 0 {
        return Err(DecodeError::invalid("sample rate must be positive"));
    }
    if channels == 0 {
        return Err(DecodeError::invalid("channel count must be positive"));
    }
    if pcm.is_empty() {
        return Err(DecodeError::invalid("PCM payload is empty"));
    }
    let block_align = channels
        .checked_mul(BITS_PER_SAMPLE / 8)
        .filter(|align| sample_rate.checked_mul(u32::from(*align)).is_some())
        .map(usize::from)
        .ok_or_else(|| DecodeError::invalid("sample rate and channel count overflow the header"))?;
    if pcm.len() % block_align != 0 {
        return Err(DecodeError::invalid(format!(
            "PCM payload of {} bytes is not a whole number of {}-byte frames",
            pcm.len(),
            block_align
        )));
    }
    let data_len = u32::try_from(pcm.len())
        .ok()
        .filter(|len| len.checked_add(36).is_some())
        .ok_or_else(|| DecodeError::invalid("PCM payload too large for a RIFF container"))?;
    let header = ContainerHeader::pcm16(sample_rate, channels, data_len);

    let file_name = output_path
        .file_name()
        .ok_or_else(|| DecodeError::invalid("output path has no file name"))?;
    let dir = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Err(DecodeError::WriteFailure(format!(
            "directory {} does not exist",
            dir.display()
        )));
    }

    let tmp_path = dir.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4()
    ));

    let result = write_file(&tmp_path, &header, pcm).and_then(|_| fs::rename(&tmp_path, output_path));
    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp_path.display(), error = %cleanup, "Failed to remove temp container");
            }
        }
        return Err(DecodeError::WriteFailure(format!("{}: {}", output_path.display(), e)));
    }

    debug!(
        path = %output_path.display(),
        sample_rate,
        channels,
        data_len,
        "Container written"
    );
    Ok(output_path.to_path_buf())
}

fn write_file(path: &Path, header: &ContainerHeader, pcm: &[u8]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    header.write_to(&mut writer)?;
    writer.write_all(pcm)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_file_is_header_plus_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let payload = pcm(&[0, 1000, -1000, i16::MAX, i16::MIN, 7]);

        let written = write_container(&payload, &path, 16000, 1).unwrap();
        assert_eq!(written, path);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + payload.len());
        assert_eq!(&bytes[HEADER_LEN..], payload.as_slice());

        let header = ContainerHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header, ContainerHeader::pcm16(16000, 1, payload.len() as u32));
        assert_eq!(header.byte_rate(), 32000);
        assert_eq!(header.block_align(), 2);
    }

    #[test]
    fn test_readable_by_hound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let samples = [1i16, -1, 300, -300, 12345, -12345];
        write_container(&pcm(&samples), &path, 48000, 2).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 48000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration(), 3);

        let read: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>().unwrap();
        assert_eq!(read, samples);
    }

    #[test]
    fn test_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        fs::write(&path, b"stale contents that are longer than the new file will be").unwrap();

        write_container(&pcm(&[5, 6]), &path, 8000, 1).unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), HEADER_LEN + 4);
    }

    #[test]
    fn test_missing_directory_is_write_failure_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("out.wav");

        let result = write_container(&pcm(&[1]), &path, 16000, 1);
        assert!(matches!(result, Err(DecodeError::WriteFailure(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_target_is_a_directory_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("taken");
        fs::create_dir(&target).unwrap();
        // Something inside so the rename cannot replace it
        fs::write(target.join("keep"), b"x").unwrap();

        let result = write_container(&pcm(&[1, 2]), &target, 16000, 1);
        assert!(matches!(result, Err(DecodeError::WriteFailure(_))));
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_argument_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        assert!(matches!(write_container(&[], &path, 16000, 1), Err(DecodeError::InvalidArgument(_))));
        assert!(matches!(write_container(&[1, 2], &path, 0, 1), Err(DecodeError::InvalidArgument(_))));
        assert!(matches!(write_container(&[1, 2], &path, 16000, 0), Err(DecodeError::InvalidArgument(_))));
        // Three bytes is not a whole mono 16-bit frame
        assert!(matches!(write_container(&[1, 2, 3], &path, 16000, 1), Err(DecodeError::InvalidArgument(_))));
        assert!(matches!(write_container(&[1, 2], &path, 16000, 2), Err(DecodeError::InvalidArgument(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_read_from_rejects_garbage() {
        assert!(ContainerHeader::read_from(&mut Cursor::new(b"not a wav file at all, no")).is_err());
        let mut bytes = Vec::new();
        ContainerHeader::pcm16(16000, 1, 4).write_to(&mut bytes).unwrap();
        bytes[34] = 8; // bits per sample no longer agrees with block align
        assert!(ContainerHeader::read_from(&mut Cursor::new(&bytes)).is_err());
    }
}
