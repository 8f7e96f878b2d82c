use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bincode::{Decode, Encode};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use eidcore::algorithm::scaler::{QuantileScaler, TrackScaler};
use eidcore::error::CoreError;

use crate::data::shard::{zstd_compress, zstd_decompress, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{DataError, DataResult};

const MAGIC: &[u8; 8] = b"EIDSCALR";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
enum ScalerBlob {
    Quantile(QuantileScaler),
    Track(TrackScaler),
}

impl ScalerBlob {
    fn kind(&self) -> &'static str {
        match self {
            ScalerBlob::Quantile(_) => "quantile",
            ScalerBlob::Track(_) => "track",
        }
    }
}

fn save_blob(path: &Path, blob: &ScalerBlob) -> DataResult<()> {
    let encoded = bincode::encode_to_vec(blob, bincode::config::standard())?;
    let compressed = zstd_compress(&encoded, DEFAULT_COMPRESSION_LEVEL).map_err(|e| DataError::io(path, e))?;

    // written next to the target and renamed, so readers never see a partial file
    let partial = path.with_extension("partial");
    let write = || -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&partial)?);
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        writer.write_all(&compressed)?;
        writer.flush()?;
        Ok(())
    };
    write().map_err(|e| DataError::io(&partial, e))?;
    std::fs::rename(&partial, path).map_err(|e| DataError::io(path, e))?;

    log::info!("{} scaler saved to {}", blob.kind(), path.display());
    Ok(())
}

fn load_blob(path: &Path) -> DataResult<ScalerBlob> {
    let file = File::open(path).map_err(|e| DataError::io(path, e))?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader
        .read_exact(&mut magic)
        .map_err(|_| DataError::corrupt(path, "file too short for a scaler header"))?;
    if &magic != MAGIC {
        return Err(DataError::corrupt(path, "not a scaler file"));
    }
    let version = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| DataError::corrupt(path, "file too short for a scaler header"))?;
    if version != FORMAT_VERSION {
        return Err(DataError::corrupt(path, format!("unsupported scaler format version {}", version)));
    }

    let mut compressed = Vec::new();
    reader.read_to_end(&mut compressed).map_err(|e| DataError::io(path, e))?;
    let encoded = zstd_decompress(&compressed).map_err(|e| DataError::corrupt(path, e.to_string()))?;
    let (blob, read) = bincode::decode_from_slice::<ScalerBlob, _>(&encoded, bincode::config::standard())?;
    if read != encoded.len() {
        return Err(DataError::corrupt(path, "trailing bytes after scaler state"));
    }
    Ok(blob)
}

pub fn save_quantile_scaler(path: &Path, scaler: &QuantileScaler) -> DataResult<()> {
    save_blob(path, &ScalerBlob::Quantile(scaler.clone()))
}

pub fn save_track_scaler(path: &Path, scaler: &TrackScaler) -> DataResult<()> {
    save_blob(path, &ScalerBlob::Track(scaler.clone()))
}

/// Load a quantile scaler; a file holding another scaler kind is a schema mismatch
pub fn load_quantile_scaler(path: &Path) -> DataResult<QuantileScaler> {
    match load_blob(path)? {
        ScalerBlob::Quantile(scaler) => Ok(scaler),
        other => Err(CoreError::SchemaMismatch(format!(
            "{} holds a {} scaler, expected a quantile scaler",
            path.display(),
            other.kind()
        ))
        .into()),
    }
}

pub fn load_track_scaler(path: &Path) -> DataResult<TrackScaler> {
    match load_blob(path)? {
        ScalerBlob::Track(scaler) => Ok(scaler),
        other => Err(CoreError::SchemaMismatch(format!(
            "{} holds a {} scaler, expected a track scaler",
            path.display(),
            other.kind()
        ))
        .into()),
    }
}
