//! Native swath container format
//!
//! A `.swath` file stores one satellite pass as row blocks of column chunks.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes)                       │
//! │   magic: [u8; 4] = "SWTH"               │
//! │   version: u16                          │
//! │   rows: u32                             │
//! │   cols: u32                             │
//! │   block_count: u32                      │
//! │   variable_count: u16                   │
//! │   compression: u8                       │
//! │   reserved: [u8; 39]                    │
//! │   checksum: u32                         │
//! ├─────────────────────────────────────────┤
//! │ CHUNKS (variable)                       │
//! │   For each block:                       │
//! │     coordinate chunk                    │
//! │     one chunk per variable              │
//! │   Each chunk:                           │
//! │     chunk_size: u32                     │
//! │     data: [u8; chunk_size]              │
//! │     chunk_checksum: u32                 │
//! ├─────────────────────────────────────────┤
//! │ FOOTER                                  │
//! │   bincode(variables, block metadata)    │
//! │   footer_size: u32                      │
//! │   footer_checksum: u32                  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Reads go through a read-only memory map; only the chunks covering the
//! requested rows and variables are decompressed.

use crate::swath::compression::{decode_coords, decode_values, encode_coords, encode_values};
use crate::swath::error::{SwathError, SwathResult};
use crate::swath::{check_rows, Coordinates, RowSlab, SwathHandle, SwathShape};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// File extension of the native container
pub const SWATH_EXTENSION: &str = "swath";

/// Magic bytes for swath file identification
const SWATH_MAGIC: [u8; 4] = *b"SWTH";

/// Current format version
const SWATH_VERSION: u16 = 1;

/// Header size in bytes
const HEADER_SIZE: usize = 64;

/// Default rows per block when writing
pub const DEFAULT_BLOCK_ROWS: usize = 256;

/// Compression type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Lz4 = 1,
}

impl TryFrom<u8> for CompressionType {
    type Error = SwathError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            _ => Err(SwathError::InvalidFormat(format!(
                "Unknown compression type: {}",
                value
            ))),
        }
    }
}

/// Swath file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwathHeader {
    /// Format version
    pub version: u16,
    /// Along-track length
    pub rows: u32,
    /// Cross-track width
    pub cols: u32,
    /// Number of row blocks
    pub block_count: u32,
    /// Number of data variables
    pub variable_count: u16,
    /// Compression used for every chunk
    pub compression: CompressionType,
}

impl SwathHeader {
    /// Create a header for an empty file
    pub fn new(cols: u32, variable_count: u16, compression: CompressionType) -> Self {
        Self {
            version: SWATH_VERSION,
            rows: 0,
            cols,
            block_count: 0,
            variable_count,
            compression,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&SWATH_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.rows.to_le_bytes());
        buf[10..14].copy_from_slice(&self.cols.to_le_bytes());
        buf[14..18].copy_from_slice(&self.block_count.to_le_bytes());
        buf[18..20].copy_from_slice(&self.variable_count.to_le_bytes());
        buf[20] = self.compression as u8;
        // bytes 21-59 reserved

        let checksum = crc32fast::hash(&buf[0..60]);
        buf[60..64].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(buf: &[u8]) -> SwathResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(SwathError::InvalidFormat(format!(
                "File too short for header: {} bytes",
                buf.len()
            )));
        }

        if buf[0..4] != SWATH_MAGIC {
            return Err(SwathError::InvalidFormat(format!(
                "Invalid magic: {:?}",
                &buf[0..4]
            )));
        }

        let stored_checksum = read_u32(buf, 60);
        let computed_checksum = crc32fast::hash(&buf[0..60]);
        if stored_checksum != computed_checksum {
            return Err(SwathError::Corruption(format!(
                "Header checksum mismatch: stored={}, computed={}",
                stored_checksum, computed_checksum
            )));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > SWATH_VERSION {
            return Err(SwathError::InvalidFormat(format!(
                "Unsupported version: {}",
                version
            )));
        }

        Ok(Self {
            version,
            rows: read_u32(buf, 6),
            cols: read_u32(buf, 10),
            block_count: read_u32(buf, 14),
            variable_count: u16::from_le_bytes([buf[18], buf[19]]),
            compression: CompressionType::try_from(buf[20])?,
        })
    }
}

/// Location of one chunk inside the file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
struct ChunkLoc {
    /// Offset of the chunk's size prefix
    offset: u64,
    /// Size of the encoded data
    size: u32,
}

/// Metadata for one row block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct BlockMeta {
    row_start: u32,
    row_count: u32,
    coords: ChunkLoc,
    /// One entry per variable, in footer variable order
    values: Vec<ChunkLoc>,
}

impl BlockMeta {
    fn rows(&self) -> Range<usize> {
        self.row_start as usize..(self.row_start + self.row_count) as usize
    }

    fn overlaps(&self, rows: &Range<usize>) -> bool {
        let own = self.rows();
        own.start < rows.end && rows.start < own.end
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Footer {
    variables: Vec<String>,
    blocks: Vec<BlockMeta>,
}

/// A memory-mapped swath file opened for reading
pub struct SwathFile {
    /// File path
    pub path: PathBuf,
    /// Parsed header
    pub header: SwathHeader,
    variables: Vec<String>,
    blocks: Vec<BlockMeta>,
    map: Mmap,
}

impl SwathFile {
    /// Open an existing swath file
    pub fn open(path: impl AsRef<Path>) -> SwathResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        // SAFETY: the map is read-only and dropped with the handle; source
        // files are treated as immutable while indexed.
        let map = unsafe { Mmap::map(&file)? };

        let header = SwathHeader::from_bytes(&map)?;
        let footer = Self::read_footer(&map, &header)?;

        if footer.variables.len() != header.variable_count as usize {
            return Err(SwathError::Corruption(format!(
                "Header lists {} variables, footer lists {}",
                header.variable_count,
                footer.variables.len()
            )));
        }

        let covered: u64 = footer.blocks.iter().map(|b| b.row_count as u64).sum();
        if covered != header.rows as u64 {
            return Err(SwathError::Corruption(format!(
                "Blocks cover {} rows, header says {}",
                covered, header.rows
            )));
        }

        Ok(Self {
            path,
            header,
            variables: footer.variables,
            blocks: footer.blocks,
            map,
        })
    }

    fn read_footer(map: &[u8], header: &SwathHeader) -> SwathResult<Footer> {
        if map.len() < HEADER_SIZE + 8 {
            return Err(SwathError::InvalidFormat("Missing footer".into()));
        }

        let tail = map.len() - 8;
        let footer_size = read_u32(map, tail) as usize;
        let stored_checksum = read_u32(map, tail + 4);

        if footer_size > tail - HEADER_SIZE {
            return Err(SwathError::Corruption(format!(
                "Footer size {} exceeds file",
                footer_size
            )));
        }

        let footer_data = &map[tail - footer_size..tail];
        if crc32fast::hash(footer_data) != stored_checksum {
            return Err(SwathError::Corruption("Footer checksum mismatch".into()));
        }

        let footer: Footer = bincode::deserialize(footer_data)?;
        if footer.blocks.len() != header.block_count as usize {
            return Err(SwathError::Corruption(format!(
                "Header lists {} blocks, footer lists {}",
                header.block_count,
                footer.blocks.len()
            )));
        }

        Ok(footer)
    }

    /// Borrow and verify one chunk's encoded bytes
    fn chunk(&self, loc: ChunkLoc) -> SwathResult<&[u8]> {
        let start = loc.offset as usize;
        let data_start = start + 4;
        let data_end = data_start + loc.size as usize;

        if data_end + 4 > self.map.len() {
            return Err(SwathError::Corruption(format!(
                "Chunk at offset {} runs past end of file",
                loc.offset
            )));
        }

        let size = read_u32(&self.map, start);
        if size != loc.size {
            return Err(SwathError::Corruption(format!(
                "Chunk at offset {} has size {}, footer says {}",
                loc.offset, size, loc.size
            )));
        }

        let data = &self.map[data_start..data_end];
        let stored_checksum = read_u32(&self.map, data_end);
        if crc32fast::hash(data) != stored_checksum {
            return Err(SwathError::Corruption(format!(
                "Chunk at offset {} checksum mismatch",
                loc.offset
            )));
        }

        Ok(data)
    }

    fn variable_index(&self, name: &str) -> SwathResult<usize> {
        self.variables
            .iter()
            .position(|v| v == name)
            .ok_or_else(|| SwathError::MissingVariable(name.to_string()))
    }
}

impl SwathHandle for SwathFile {
    fn shape(&self) -> SwathShape {
        SwathShape::new(self.header.rows as usize, self.header.cols as usize)
    }

    fn variable_names(&self) -> Vec<String> {
        self.variables.clone()
    }

    fn coordinates(&mut self) -> SwathResult<Coordinates> {
        let mut coords = Coordinates::empty(self.header.cols as usize);
        for block in &self.blocks {
            let data = self.chunk(block.coords)?;
            coords.extend(decode_coords(data, self.header.compression)?);
        }
        Ok(coords)
    }

    fn read(&mut self, variables: &[String], rows: Range<usize>) -> SwathResult<RowSlab> {
        check_rows(&rows, self.header.rows as usize)?;

        let indices = variables
            .iter()
            .map(|name| self.variable_index(name))
            .collect::<SwathResult<Vec<_>>>()?;

        let cols = self.header.cols as usize;
        let mut coords = Coordinates::empty(cols);
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); variables.len()];

        for block in self.blocks.iter().filter(|b| b.overlaps(&rows)) {
            let block_rows = block.rows();
            let local = rows.start.max(block_rows.start) - block_rows.start
                ..rows.end.min(block_rows.end) - block_rows.start;

            let block_coords = decode_coords(self.chunk(block.coords)?, self.header.compression)?;
            if block_coords.rows() != block.row_count as usize {
                return Err(SwathError::Corruption(format!(
                    "Coordinate chunk holds {} rows, block says {}",
                    block_coords.rows(),
                    block.row_count
                )));
            }
            coords.extend(block_coords.slice_rows(local.clone()));

            for (out, &idx) in values.iter_mut().zip(&indices) {
                let loc = block.values.get(idx).copied().ok_or_else(|| {
                    SwathError::Corruption(format!("Block missing chunk for variable {}", idx))
                })?;
                let decoded = decode_values(self.chunk(loc)?, self.header.compression)?;
                if decoded.len() != block.row_count as usize * cols {
                    return Err(SwathError::Corruption(format!(
                        "Variable chunk holds {} samples, expected {}",
                        decoded.len(),
                        block.row_count as usize * cols
                    )));
                }
                out.extend_from_slice(&decoded[local.start * cols..local.end * cols]);
            }
        }

        Ok(RowSlab {
            row_start: rows.start,
            coords,
            variables: variables.iter().cloned().zip(values).collect(),
        })
    }
}

/// Writes a swath file block by block
pub struct SwathWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    header: SwathHeader,
    variables: Vec<String>,
    blocks: Vec<BlockMeta>,
    offset: u64,
}

impl SwathWriter {
    /// Create a new swath file with the given width and variable names
    pub fn create(
        path: impl AsRef<Path>,
        cols: usize,
        variables: &[&str],
        compression: CompressionType,
    ) -> SwathResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let header = SwathHeader::new(cols as u32, variables.len() as u16, compression);
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(&header.to_bytes())?;

        Ok(Self {
            path,
            writer,
            header,
            variables: variables.iter().map(|v| v.to_string()).collect(),
            blocks: Vec::new(),
            offset: HEADER_SIZE as u64,
        })
    }

    /// Append a block of rows: coordinates plus one array per variable
    pub fn append_block(&mut self, coords: &Coordinates, values: &[Vec<f64>]) -> SwathResult<()> {
        if coords.cols != self.header.cols as usize {
            return Err(SwathError::InvalidFormat(format!(
                "Block has {} cols, file has {}",
                coords.cols, self.header.cols
            )));
        }
        if values.len() != self.variables.len() {
            return Err(SwathError::InvalidFormat(format!(
                "Block has {} variables, file has {}",
                values.len(),
                self.variables.len()
            )));
        }
        let samples = coords.rows() * coords.cols;
        if let Some(bad) = values.iter().position(|v| v.len() != samples) {
            return Err(SwathError::InvalidFormat(format!(
                "Variable {} has {} samples, expected {}",
                self.variables[bad],
                values[bad].len(),
                samples
            )));
        }
        if coords.rows() == 0 {
            return Ok(());
        }

        let compression = self.header.compression;
        let coords_loc = self.write_chunk(&encode_coords(coords, compression)?)?;
        let mut value_locs = Vec::with_capacity(values.len());
        for v in values {
            value_locs.push(self.write_chunk(&encode_values(v, compression)?)?);
        }

        self.blocks.push(BlockMeta {
            row_start: self.header.rows,
            row_count: coords.rows() as u32,
            coords: coords_loc,
            values: value_locs,
        });
        self.header.rows += coords.rows() as u32;
        self.header.block_count = self.blocks.len() as u32;

        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> SwathResult<ChunkLoc> {
        let loc = ChunkLoc {
            offset: self.offset,
            size: data.len() as u32,
        };

        self.writer.write_all(&(data.len() as u32).to_le_bytes())?;
        self.writer.write_all(data)?;
        self.writer.write_all(&crc32fast::hash(data).to_le_bytes())?;
        self.offset += data.len() as u64 + 8;

        Ok(loc)
    }

    /// Write the footer and final header
    pub fn finish(mut self) -> SwathResult<PathBuf> {
        let footer = Footer {
            variables: std::mem::take(&mut self.variables),
            blocks: std::mem::take(&mut self.blocks),
        };
        let footer_data = bincode::serialize(&footer)?;

        self.writer.write_all(&footer_data)?;
        self.writer
            .write_all(&(footer_data.len() as u32).to_le_bytes())?;
        self.writer
            .write_all(&crc32fast::hash(&footer_data).to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&self.header.to_bytes())?;
        self.writer.flush()?;

        Ok(self.path)
    }
}

/// Write a whole swath in one call, splitting rows into blocks
pub fn write_swath(
    path: impl AsRef<Path>,
    coords: &Coordinates,
    variables: &[(&str, Vec<f64>)],
    block_rows: usize,
) -> SwathResult<PathBuf> {
    coords.validate()?;
    let names: Vec<&str> = variables.iter().map(|(n, _)| *n).collect();
    let mut writer = SwathWriter::create(path, coords.cols, &names, CompressionType::Lz4)?;

    let block_rows = block_rows.max(1);
    let cols = coords.cols;
    let mut start = 0;
    while start < coords.rows() {
        let end = (start + block_rows).min(coords.rows());
        let block_values: Vec<Vec<f64>> = variables
            .iter()
            .map(|(_, v)| v[start * cols..end * cols].to_vec())
            .collect();
        writer.append_block(&coords.slice_rows(start..end), &block_values)?;
        start = end;
    }

    writer.finish()
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
