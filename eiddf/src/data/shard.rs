use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use eidcore::data::column::{Column, ColumnData};
use eidcore::error::CoreError;
use rusqlite::{params, Connection, OpenFlags};

use crate::error::{DataError, DataResult};

pub const DEFAULT_CHUNK_ROWS: usize = 1024;
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

const SCHEMA: &str = "
CREATE TABLE columns (
    name       TEXT PRIMARY KEY,
    dtype      INTEGER NOT NULL,
    row_shape  TEXT NOT NULL,
    n_rows     INTEGER NOT NULL,
    chunk_rows INTEGER NOT NULL
);
CREATE TABLE chunks (
    name     TEXT NOT NULL,
    chunk_id INTEGER NOT NULL,
    data     BLOB NOT NULL,
    PRIMARY KEY (name, chunk_id)
);
";

/// Element type of a stored column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    I32,
    I64,
}

impl DType {
    pub fn code(&self) -> i64 {
        match self {
            DType::F32 => 0,
            DType::I32 => 1,
            DType::I64 => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<DType> {
        match code {
            0 => Some(DType::F32),
            1 => Some(DType::I32),
            2 => Some(DType::I64),
            _ => None,
        }
    }

    /// Bytes per element
    pub fn width(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::I64 => 8,
        }
    }
}

/// Metadata row of one stored column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub dtype: DType,
    pub row_shape: Vec<usize>,
    pub n_rows: usize,
    pub chunk_rows: usize,
}

impl ColumnMeta {
    pub fn stride(&self) -> usize {
        self.row_shape.iter().product()
    }
}

/// Random-access reads of named, row-aligned columns from one shard.
///
/// `ShardFile` is the only container implemented. HDF5 shards are not read;
/// they have to be converted with `ShardWriter` first, and opening one fails
/// with `DataError::Corrupt`.
pub trait ShardRead {
    fn path(&self) -> &Path;

    fn field_names(&self) -> Vec<String>;

    fn field_meta(&self, name: &str) -> Option<&ColumnMeta>;

    fn has_field(&self, name: &str) -> bool {
        self.field_meta(name).is_some()
    }

    /// Row count of a field, from metadata only
    fn field_len(&self, name: &str) -> Option<usize> {
        self.field_meta(name).map(|meta| meta.n_rows)
    }

    /// Rows `[lo, hi)` of one field
    fn read_rows(&self, name: &str, lo: usize, hi: usize) -> DataResult<Column>;
}

/// Decompresses a ZSTD compressed byte array
///
/// # Arguments
///
/// * `compressed_data` - A byte slice that holds the compressed data
///
/// # Returns
///
/// * `decompressed_data` - A vector of u8 that holds the decompressed data
///
pub fn zstd_decompress(compressed_data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(compressed_data)?;
    let mut decompressed_data = Vec::new();
    decoder.read_to_end(&mut decompressed_data)?;
    Ok(decompressed_data)
}

/// Compresses a byte array using ZSTD
///
/// # Arguments
///
/// * `decompressed_data` - A byte slice that holds the decompressed data
/// * `compression_level` - ZSTD compression level
///
/// # Returns
///
/// * `compressed_data` - A vector of u8 that holds the compressed data
///
pub fn zstd_compress(decompressed_data: &[u8], compression_level: i32) -> std::io::Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), compression_level)?;
    encoder.write_all(decompressed_data)?;
    let compressed_data = encoder.finish()?;
    Ok(compressed_data)
}

/// Fail early on files that are not SQLite shards
fn check_container(path: &Path) -> DataResult<()> {
    let mut header = [0u8; 16];
    let mut file = std::fs::File::open(path).map_err(|e| DataError::io(path, e))?;
    let n = file.read(&mut header).map_err(|e| DataError::io(path, e))?;
    let header = &header[..n];
    if header.starts_with(HDF5_MAGIC) {
        return Err(DataError::corrupt(path, "HDF5 shards are not supported, convert them with `ShardWriter`"));
    }
    if header != SQLITE_MAGIC {
        return Err(DataError::corrupt(path, "not a shard file"));
    }
    Ok(())
}

/// Read-only handle on a shard file
pub struct ShardFile {
    path: PathBuf,
    conn: Connection,
    columns: BTreeMap<String, ColumnMeta>,
}

impl ShardFile {
    /// Open a shard read-only and load its column metadata.
    pub fn open(path: impl AsRef<Path>) -> DataResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(DataError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "shard file not found"),
            ));
        }
        check_container(&path)?;

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let rows: Vec<(String, i64, String, i64, i64)> = conn
            .prepare("SELECT name, dtype, row_shape, n_rows, chunk_rows FROM columns")?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)))?
            .collect::<Result<_, _>>()?;

        let mut columns = BTreeMap::new();
        for (name, dtype, row_shape, n_rows, chunk_rows) in rows {
            let dtype = DType::from_code(dtype)
                .ok_or_else(|| DataError::corrupt(&path, format!("column `{}` has unknown dtype {}", name, dtype)))?;
            let row_shape: Vec<usize> = serde_json::from_str(&row_shape)
                .map_err(|e| DataError::corrupt(&path, format!("column `{}` has a bad row shape: {}", name, e)))?;
            if n_rows < 0 || chunk_rows <= 0 {
                return Err(DataError::corrupt(&path, format!("column `{}` has invalid row counts", name)));
            }
            columns.insert(
                name.clone(),
                ColumnMeta { name, dtype, row_shape, n_rows: n_rows as usize, chunk_rows: chunk_rows as usize },
            );
        }

        log::debug!("opened shard {} with {} columns", path.display(), columns.len());
        Ok(ShardFile { path, conn, columns })
    }

    fn decode_chunk(&self, meta: &ColumnMeta, chunk_id: usize, blob: &[u8]) -> DataResult<ColumnData> {
        let start = chunk_id * meta.chunk_rows;
        let rows = meta.chunk_rows.min(meta.n_rows - start);
        let n_values = rows * meta.stride();

        let bytes = zstd_decompress(blob).map_err(|e| DataError::io(&self.path, e))?;
        if bytes.len() != n_values * meta.dtype.width() {
            return Err(DataError::corrupt(
                &self.path,
                format!(
                    "chunk {} of `{}` holds {} bytes, expected {}",
                    chunk_id,
                    meta.name,
                    bytes.len(),
                    n_values * meta.dtype.width()
                ),
            ));
        }

        Ok(match meta.dtype {
            DType::F32 => {
                let mut values = vec![0.0f32; n_values];
                LittleEndian::read_f32_into(&bytes, &mut values);
                ColumnData::Float(values)
            }
            DType::I32 => {
                let mut values = vec![0i32; n_values];
                LittleEndian::read_i32_into(&bytes, &mut values);
                ColumnData::Int(values.into_iter().map(i64::from).collect())
            }
            DType::I64 => {
                let mut values = vec![0i64; n_values];
                LittleEndian::read_i64_into(&bytes, &mut values);
                ColumnData::Int(values)
            }
        })
    }
}

impl ShardRead for ShardFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn field_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    fn field_meta(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.get(name)
    }

    fn read_rows(&self, name: &str, lo: usize, hi: usize) -> DataResult<Column> {
        let meta = self
            .columns
            .get(name)
            .ok_or_else(|| CoreError::SchemaMismatch(format!("{} has no field `{}`", self.path.display(), name)))?;
        if lo > hi || hi > meta.n_rows {
            return Err(CoreError::Index { lo, hi, total: meta.n_rows }.into());
        }

        let stride = meta.stride();
        let mut data = match meta.dtype {
            DType::F32 => ColumnData::Float(Vec::with_capacity((hi - lo) * stride)),
            DType::I32 | DType::I64 => ColumnData::Int(Vec::with_capacity((hi - lo) * stride)),
        };
        if lo == hi {
            return Ok(Column::new(0, meta.row_shape.clone(), data)?);
        }

        let first = lo / meta.chunk_rows;
        let last = (hi - 1) / meta.chunk_rows;
        let mut statement = self
            .conn
            .prepare_cached("SELECT chunk_id, data FROM chunks WHERE name = ?1 AND chunk_id BETWEEN ?2 AND ?3 ORDER BY chunk_id")?;
        let chunks: Vec<(i64, Vec<u8>)> = statement
            .query_map(params![name, first as i64, last as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        if chunks.len() != last - first + 1 {
            return Err(DataError::corrupt(
                &self.path,
                format!("field `{}` misses chunks in [{}, {}]", name, first, last),
            ));
        }

        for (chunk_id, blob) in chunks {
            let chunk_id = chunk_id as usize;
            let start = chunk_id * meta.chunk_rows;
            let from = lo.max(start) - start;
            let to = hi.min(start + meta.chunk_rows) - start;
            match (&mut data, self.decode_chunk(meta, chunk_id, &blob)?) {
                (ColumnData::Float(out), ColumnData::Float(values)) => {
                    out.extend_from_slice(&values[from * stride..to * stride])
                }
                (ColumnData::Int(out), ColumnData::Int(values)) => out.extend_from_slice(&values[from * stride..to * stride]),
                _ => return Err(DataError::corrupt(&self.path, format!("field `{}` mixes storage types", name))),
            }
        }

        Ok(Column::new(hi - lo, meta.row_shape.clone(), data)?)
    }
}

/// Creates shard files column by column
pub struct ShardWriter {
    path: PathBuf,
    conn: Connection,
    chunk_rows: usize,
    compression_level: i32,
}

impl ShardWriter {
    /// Create a new, empty shard file; an existing file is an error.
    ///
    /// # Arguments
    ///
    /// * `path` - destination file
    /// * `chunk_rows` - rows per compressed chunk
    /// * `compression_level` - ZSTD compression level
    ///
    pub fn create(path: impl AsRef<Path>, chunk_rows: usize, compression_level: i32) -> DataResult<Self> {
        let path = path.as_ref().to_path_buf();
        if chunk_rows == 0 {
            return Err(CoreError::Configuration("shard chunks need at least one row".to_string()).into());
        }
        if path.exists() {
            return Err(DataError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "shard file already exists"),
            ));
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(ShardWriter { path, conn, chunk_rows, compression_level })
    }

    /// Store a column with the natural dtype of its data (`F32` or `I64`)
    pub fn write_column(&mut self, name: &str, column: &Column) -> DataResult<()> {
        let dtype = match column.data() {
            ColumnData::Float(_) => DType::F32,
            ColumnData::Int(_) => DType::I64,
        };
        self.write_column_as(name, column, dtype)
    }

    /// Store a column with an explicit on-disk dtype
    pub fn write_column_as(&mut self, name: &str, column: &Column, dtype: DType) -> DataResult<()> {
        let stride = column.stride();
        let chunk_len = self.chunk_rows * stride.max(1);
        let bytes = encode(column.data(), dtype)
            .ok_or_else(|| CoreError::SchemaMismatch(format!("column `{}` cannot be stored as {:?}", name, dtype)))?;

        let row_shape = serde_json::to_string(column.row_shape())?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO columns (name, dtype, row_shape, n_rows, chunk_rows) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, dtype.code(), row_shape, column.n_rows() as i64, self.chunk_rows as i64],
        )?;
        let n_chunks = column.n_rows().div_ceil(self.chunk_rows);
        for chunk_id in 0..n_chunks {
            let lo = chunk_id * self.chunk_rows * stride * dtype.width();
            let hi = (lo + chunk_len * dtype.width()).min(bytes.len());
            let blob = zstd_compress(&bytes[lo..hi], self.compression_level).map_err(|e| DataError::io(&self.path, e))?;
            tx.execute(
                "INSERT INTO chunks (name, chunk_id, data) VALUES (?1, ?2, ?3)",
                params![name, chunk_id as i64, blob],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn finish(self) -> DataResult<PathBuf> {
        self.conn.close().map_err(|(_, e)| DataError::Sqlite(e))?;
        Ok(self.path)
    }
}

fn encode(data: &ColumnData, dtype: DType) -> Option<Vec<u8>> {
    match (data, dtype) {
        (ColumnData::Float(values), DType::F32) => {
            let mut bytes = vec![0u8; values.len() * 4];
            LittleEndian::write_f32_into(values, &mut bytes);
            Some(bytes)
        }
        (ColumnData::Int(values), DType::I32) => {
            let narrowed: Vec<i32> = values.iter().map(|&v| i32::try_from(v).ok()).collect::<Option<_>>()?;
            let mut bytes = vec![0u8; narrowed.len() * 4];
            LittleEndian::write_i32_into(&narrowed, &mut bytes);
            Some(bytes)
        }
        (ColumnData::Int(values), DType::I64) => {
            let mut bytes = vec![0u8; values.len() * 8];
            LittleEndian::write_i64_into(values, &mut bytes);
            Some(bytes)
        }
        _ => None,
    }
}
