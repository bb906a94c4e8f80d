use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use super::binary::{BinaryRead, BinaryWrite};
use crate::error::{ClutError, Result};
use crate::version::ParsedVersion;

pub const CLUT_MAGIC: u16 = 0xDF23;

/// Layout revision of the persisted format. Only the current layout is readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatVersion {
    #[default]
    Initial = 1,
}

impl TryFrom<u16> for FormatVersion {
    type Error = ClutError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(FormatVersion::Initial),
            _ => Err(ClutError::format(format!("Unsupported format version {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Zlib = 1,
    #[default]
    Brotli = 2,
}

impl TryFrom<u8> for CompressionType {
    type Error = ClutError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Zlib),
            2 => Ok(CompressionType::Brotli),
            _ => Err(ClutError::format(format!("Unsupported compression {value}"))),
        }
    }
}

impl FromStr for CompressionType {
    type Err = ClutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionType::None),
            "zlib" => Ok(CompressionType::Zlib),
            "brotli" => Ok(CompressionType::Brotli),
            _ => Err(ClutError::validation(format!("Unknown compression {s:?}"))),
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompressionType::None => "none",
            CompressionType::Zlib => "zlib",
            CompressionType::Brotli => "brotli",
        })
    }
}

/// The platform whose file naming a snapshot was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PlatformId {
    #[default]
    Win32 = 0,
    Ps3 = 1,
    Ps4 = 2,
    Ps5 = 3,
    Lys = 4,
}

impl TryFrom<u8> for PlatformId {
    type Error = ClutError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PlatformId::Win32),
            1 => Ok(PlatformId::Ps3),
            2 => Ok(PlatformId::Ps4),
            3 => Ok(PlatformId::Ps5),
            4 => Ok(PlatformId::Lys),
            _ => Err(ClutError::format(format!("Unknown platform {value}"))),
        }
    }
}

/// The uncompressed prefix of a CLUT file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClutHeader {
    pub format_version: FormatVersion,
    pub compression: CompressionType,
    pub platform: PlatformId,
    pub repository: String,
    pub version: ParsedVersion,
    pub base_patch_url: Option<String>,
    pub decompressed_size: usize,
    /// Only meaningful when `compression` is not `None`.
    pub compressed_size: usize,
}

impl ClutHeader {
    pub fn read(reader: &mut impl Read) -> Result<Self> {
        let magic = reader.read_u16_le()?;
        if magic != CLUT_MAGIC {
            return Err(ClutError::format(format!("Invalid magic {magic:04X}")));
        }

        let format_version = FormatVersion::try_from(reader.read_u16_le()?)?;
        let compression = CompressionType::try_from(reader.read_u8()?)?;
        let platform = PlatformId::try_from(reader.read_u8()?)?;

        let repository = reader.read_string()?;
        let version = reader.read_string()?.parse().map_err(|e| ClutError::format(format!("Bad header version: {e}")))?;
        let base_patch_url = Some(reader.read_string()?).filter(|s| !s.trim().is_empty());

        let decompressed_size = reader.read_count()?;
        let compressed_size = if compression == CompressionType::None {
            decompressed_size
        } else {
            reader.read_count()?
        };

        Ok(Self {
            format_version,
            compression,
            platform,
            repository,
            version,
            base_patch_url,
            decompressed_size,
            compressed_size,
        })
    }

    pub fn write(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_u16_le(CLUT_MAGIC)?;
        writer.write_u16_le(self.format_version as u16)?;
        writer.write_u8(self.compression as u8)?;
        writer.write_u8(self.platform as u8)?;
        writer.write_string(&self.repository)?;
        writer.write_string(&self.version.patch_name())?;
        writer.write_string(self.base_patch_url.as_deref().unwrap_or(""))?;
        writer.write_count(self.decompressed_size)?;
        if self.compression != CompressionType::None {
            writer.write_count(self.compressed_size)?;
        }
        Ok(())
    }

    /// Number of payload bytes following the header in the file.
    pub fn stored_size(&self) -> usize {
        match self.compression {
            CompressionType::None => self.decompressed_size,
            _ => self.compressed_size,
        }
    }
}
