//! Blob reader and audio locator
//!
//! Cache blobs are opaque: an audio stream may start at offset zero, behind a
//! proprietary header, behind an ID3 tag, or inside a gzip wrapper. Ogg
//! streams are sliced from their `OggS` marker onward; an MP3 match returns
//! the blob whole, so the header check only passes blobs whose tag or frame
//! sync sits at offset zero. Fails soft: any unreadable or unrecognizable
//! blob is simply not audio.

use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes probed for a header before falling back to a full read
const HEADER_PROBE_LEN: usize = 4096;

/// Cap for the gzip fallback path; bigger blobs are never compressed audio
/// in practice and decompressing them would blow up memory
const GZIP_FALLBACK_MAX: usize = 1024 * 1024;

/// Smallest payload worth emitting
pub const MIN_PAYLOAD_LEN: usize = 10;

/// Recognized payload shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioKind {
    /// Stream starting with `OggS`
    Ogg,
    /// MP3 with a leading `ID3` tag
    Mp3Id3,
    /// Raw MP3 starting at a frame-sync pair
    Mp3FrameSync,
}

/// A contiguous audio stream isolated from a cache blob
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub kind: AudioKind,
}

impl AudioPayload {
    /// Hex MD5 of the full payload, used for within-run content dedup
    pub fn content_md5(&self) -> String {
        format!("{:x}", Md5::digest(&self.bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Check that a byte buffer starts with a recognized audio header
///
/// The writer refuses to emit anything that fails this check.
pub fn is_valid_header(bytes: &[u8]) -> bool {
    if bytes.len() < MIN_PAYLOAD_LEN {
        return false;
    }
    if bytes.starts_with(b"OggS") || bytes.starts_with(b"ID3") {
        return true;
    }
    bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0
}

/// Locate the audio stream embedded in a cache blob
///
/// Returns `None` for anything that is not recognizably audio; read errors
/// are logged at debug level and treated the same way.
pub fn locate_audio(path: &Path) -> Option<AudioPayload> {
    match try_locate(path) {
        Ok(payload) => payload.filter(|p| is_valid_header(&p.bytes)),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Blob read failed");
            None
        }
    }
}

fn try_locate(path: &Path) -> io::Result<Option<AudioPayload>> {
    let mut file = File::open(path)?;

    let mut header = vec![0u8; HEADER_PROBE_LEN];
    let read = read_up_to(&mut file, &mut header)?;
    header.truncate(read);

    // Ogg anywhere in the probe window wins outright
    if let Some(k) = find(&header, b"OggS") {
        file.seek(SeekFrom::Start(k as u64))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        return Ok(Some(AudioPayload {
            bytes,
            kind: AudioKind::Ogg,
        }));
    }

    // ID3 tag: prefer an Ogg stream hidden behind the tag. Without one the
    // whole untrimmed blob comes back as MP3; the header check then only
    // accepts it when the tag sits at offset zero.
    if let Some(j) = find(&header, b"ID3") {
        let content = read_all(&mut file)?;
        let tail = &content[j.min(content.len())..];
        if let Some(k) = find(tail, b"OggS") {
            return Ok(Some(AudioPayload {
                bytes: tail[k..].to_vec(),
                kind: AudioKind::Ogg,
            }));
        }
        return Ok(Some(AudioPayload {
            bytes: content,
            kind: AudioKind::Mp3Id3,
        }));
    }

    // Bare MP3 frame-sync pair in the probe window; same whole-blob rule
    if find_frame_sync(&header).is_some() {
        let content = read_all(&mut file)?;
        return Ok(Some(AudioPayload {
            bytes: content,
            kind: AudioKind::Mp3FrameSync,
        }));
    }

    // Full-file retry: the probe window can miss a deep Ogg header
    let content = read_all(&mut file)?;
    if let Some(k) = find(&content, b"OggS") {
        return Ok(Some(AudioPayload {
            bytes: content[k..].to_vec(),
            kind: AudioKind::Ogg,
        }));
    }

    // Last resort: small blobs may be gzip-wrapped
    if content.len() < GZIP_FALLBACK_MAX {
        if let Some(decompressed) = gunzip(&content) {
            return Ok(scan_buffer(&decompressed));
        }
    }

    Ok(None)
}

/// Header search over an in-memory buffer (the gzip fallback path)
fn scan_buffer(buf: &[u8]) -> Option<AudioPayload> {
    if let Some(k) = find(buf, b"OggS") {
        return Some(AudioPayload {
            bytes: buf[k..].to_vec(),
            kind: AudioKind::Ogg,
        });
    }
    if let Some(j) = find(buf, b"ID3") {
        let tail = &buf[j..];
        if let Some(k) = find(tail, b"OggS") {
            return Some(AudioPayload {
                bytes: tail[k..].to_vec(),
                kind: AudioKind::Ogg,
            });
        }
        return Some(AudioPayload {
            bytes: tail.to_vec(),
            kind: AudioKind::Mp3Id3,
        });
    }
    if let Some(i) = find_frame_sync(buf) {
        return Some(AudioPayload {
            bytes: buf[i..].to_vec(),
            kind: AudioKind::Mp3FrameSync,
        });
    }
    None
}

fn gunzip(content: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(content);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(_) => None,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn find_frame_sync(buf: &[u8]) -> Option<usize> {
    buf.windows(2)
        .position(|pair| pair[0] == 0xFF && pair[1] & 0xE0 == 0xE0)
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn read_all(file: &mut File) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_blob(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn ogg_behind_garbage_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut blob = vec![0xAB; 100];
        blob.extend_from_slice(b"OggS");
        blob.extend_from_slice(&vec![0x11; 1944]);
        let path = write_blob(&dir, "blob", &blob);

        let payload = locate_audio(&path).unwrap();
        assert_eq!(payload.kind, AudioKind::Ogg);
        assert_eq!(payload.bytes, &blob[100..]);
        assert_eq!(payload.len(), 1948);
    }

    #[test]
    fn ogg_embedded_behind_id3_tag_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let mut blob = Vec::new();
        blob.extend_from_slice(b"ID3\x04\x00\x00\x00\x00\x00\x00");
        blob.extend_from_slice(&vec![0x00; 500]);
        blob.extend_from_slice(b"OggS");
        blob.extend_from_slice(&vec![0x22; 1000]);
        let path = write_blob(&dir, "blob", &blob);

        let payload = locate_audio(&path).unwrap();
        assert_eq!(payload.kind, AudioKind::Ogg);
        assert_eq!(payload.len(), 1004);
        assert!(payload.bytes.starts_with(b"OggS"));
    }

    #[test]
    fn leading_id3_without_embedded_ogg_is_whole_file_mp3() {
        let dir = tempfile::tempdir().unwrap();
        let mut blob = b"ID3".to_vec();
        blob.extend_from_slice(&vec![0x03; 200]);
        let path = write_blob(&dir, "blob", &blob);

        let payload = locate_audio(&path).unwrap();
        assert_eq!(payload.kind, AudioKind::Mp3Id3);
        assert_eq!(payload.bytes, blob);
    }

    #[test]
    fn id3_behind_garbage_prefix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut blob = vec![0x01, 0x02];
        blob.extend_from_slice(b"ID3");
        blob.extend_from_slice(&vec![0x03; 200]);
        let path = write_blob(&dir, "blob", &blob);

        // The whole blob comes back untrimmed, so the leading garbage fails
        // the header check
        assert!(locate_audio(&path).is_none());
    }

    #[test]
    fn leading_frame_sync_pair_is_whole_file_mp3() {
        let dir = tempfile::tempdir().unwrap();
        let mut blob = vec![0xFF, 0xFB];
        blob.extend_from_slice(&vec![0x44; 100]);
        let path = write_blob(&dir, "blob", &blob);

        let payload = locate_audio(&path).unwrap();
        assert_eq!(payload.kind, AudioKind::Mp3FrameSync);
        assert_eq!(payload.bytes, blob);
        assert_eq!(payload.bytes[0], 0xFF);
    }

    #[test]
    fn frame_sync_behind_garbage_prefix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut blob = vec![0x00; 20];
        blob.push(0xFF);
        blob.push(0xFB);
        blob.extend_from_slice(&vec![0x44; 100]);
        let path = write_blob(&dir, "blob", &blob);

        assert!(locate_audio(&path).is_none());
    }

    #[test]
    fn gzip_wrapped_ogg_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let mut inner = vec![0x00, 0x00, 0x00];
        inner.extend_from_slice(b"OggS");
        inner.extend_from_slice(&vec![0x55; 3000]);

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&inner).unwrap();
        let compressed = encoder.finish().unwrap();
        let path = write_blob(&dir, "blob", &compressed);

        let payload = locate_audio(&path).unwrap();
        assert_eq!(payload.kind, AudioKind::Ogg);
        assert_eq!(payload.bytes, &inner[3..]);
    }

    #[test]
    fn ogg_deeper_than_probe_window_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut blob = vec![0x00; HEADER_PROBE_LEN + 100];
        blob.extend_from_slice(b"OggS");
        blob.extend_from_slice(&vec![0x66; 64]);
        let path = write_blob(&dir, "blob", &blob);

        let payload = locate_audio(&path).unwrap();
        assert_eq!(payload.kind, AudioKind::Ogg);
        assert_eq!(payload.len(), 68);
    }

    #[test]
    fn random_bytes_are_not_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blob(&dir, "blob", &[0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
        assert!(locate_audio(&path).is_none());
    }

    #[test]
    fn missing_file_is_none() {
        assert!(locate_audio(Path::new("/nonexistent/blob")).is_none());
    }

    #[test]
    fn header_check_rejects_short_and_unknown() {
        assert!(!is_valid_header(b"OggS"));
        assert!(is_valid_header(b"OggS\x00\x00\x00\x00\x00\x00"));
        assert!(is_valid_header(b"ID3\x04\x00\x00\x00\x00\x00\x00"));
        assert!(is_valid_header(&[
            0xFF, 0xE2, 0, 0, 0, 0, 0, 0, 0, 0
        ]));
        assert!(!is_valid_header(&[
            0xFF, 0x10, 0, 0, 0, 0, 0, 0, 0, 0
        ]));
        assert!(!is_valid_header(b"RIFF\x00\x00\x00\x00WAVE"));
    }

    #[test]
    fn content_md5_is_stable_hex() {
        let payload = AudioPayload {
            bytes: b"OggS_test_payload".to_vec(),
            kind: AudioKind::Ogg,
        };
        let hash = payload.content_md5();
        assert_eq!(hash.len(), 32);
        assert_eq!(hash, payload.content_md5());
    }
}
