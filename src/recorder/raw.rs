//! Tagged frame container
//!
//! A minimal length-prefixed container that keeps every frame's timecode
//! alongside its payload. Layout (little endian):
//!
//! ```text
//! header:  "TCF1" | name_len u16 | camera name
//! frame:   sequence u64 | synced u8 | hh mm ss ff sf (5 x u8) | wall_clock_ms i64 | len u32 | payload
//! ```

use super::sink::{file_stem, MediaSink, SinkError, SinkFactory};
use crate::frame::{CameraIdentity, TaggedFrame};
use crate::timecode::{FrameTimecode, Timecode};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const RAW_MAGIC: &[u8; 4] = b"TCF1";
pub const RAW_EXTENSION: &str = "tcf";

/// Opens `<camera>.tcf` sinks
#[derive(Debug, Clone, Default)]
pub struct RawSinkFactory;

impl SinkFactory for RawSinkFactory {
    fn open(&self, camera: &CameraIdentity, session_dir: &Path) -> Result<Box<dyn MediaSink>, SinkError> {
        Ok(Box::new(RawSink::create(camera, session_dir)?))
    }
}

pub struct RawSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl RawSink {
    pub fn create(camera: &CameraIdentity, session_dir: &Path) -> Result<Self, SinkError> {
        let path = session_dir.join(format!("{}.{}", file_stem(camera), RAW_EXTENSION));
        let mut writer = BufWriter::new(File::create(&path)?);

        let name = camera.as_str().as_bytes();
        let name_len = u16::try_from(name.len())
            .map_err(|_| SinkError::Encoder(format!("camera name too long: {}", name.len())))?;
        writer.write_all(RAW_MAGIC)?;
        writer.write_all(&name_len.to_le_bytes())?;
        writer.write_all(name)?;

        tracing::debug!("Opened raw sink: {:?}", path);
        Ok(Self {
            path,
            writer: Some(writer),
        })
    }
}

impl MediaSink for RawSink {
    fn write_frame(&mut self, frame: &TaggedFrame) -> Result<(), SinkError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::Encoder("sink already finalized".to_string()))?;

        let len = u32::try_from(frame.payload.len())
            .map_err(|_| SinkError::Encoder(format!("payload too large: {}", frame.payload.len())))?;
        let (synced, tc) = match frame.capture_timecode {
            FrameTimecode::Synced(tc) => (1u8, tc),
            FrameTimecode::Unsynchronized => (0u8, Timecode::ZERO),
        };

        writer.write_all(&frame.sequence.to_le_bytes())?;
        writer.write_all(&[synced, tc.hours, tc.minutes, tc.seconds, tc.frame, tc.subframe])?;
        writer.write_all(&frame.wall_clock_ms().to_le_bytes())?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&frame.payload)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<Vec<PathBuf>, SinkError> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        Ok(vec![self.path.clone()])
    }
}

/// One frame read back from a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub sequence: u64,
    pub timecode: FrameTimecode,
    pub wall_clock_ms: i64,
    pub payload: Vec<u8>,
}

/// Read a container back: camera name and all frames
pub fn read_raw_container(path: &Path) -> Result<(CameraIdentity, Vec<RawRecord>), SinkError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != RAW_MAGIC {
        return Err(SinkError::Encoder(format!("not a tagged frame container: {:?}", path)));
    }
    let mut len16 = [0u8; 2];
    reader.read_exact(&mut len16)?;
    let mut name = vec![0u8; u16::from_le_bytes(len16) as usize];
    reader.read_exact(&mut name)?;
    let camera = CameraIdentity::new(String::from_utf8_lossy(&name).into_owned());

    let mut records = Vec::new();
    loop {
        let mut seq = [0u8; 8];
        match reader.read_exact(&mut seq) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let mut tc = [0u8; 6];
        reader.read_exact(&mut tc)?;
        let mut wall = [0u8; 8];
        reader.read_exact(&mut wall)?;
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
        reader.read_exact(&mut payload)?;

        let timecode = if tc[0] == 1 {
            FrameTimecode::Synced(Timecode::new(tc[1], tc[2], tc[3], tc[4], tc[5]))
        } else {
            FrameTimecode::Unsynchronized
        };
        records.push(RawRecord {
            sequence: u64::from_le_bytes(seq),
            timecode,
            wall_clock_ms: i64::from_le_bytes(wall),
            payload,
        });
    }

    Ok((camera, records))
}
