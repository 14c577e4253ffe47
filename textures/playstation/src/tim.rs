use bitflags::bitflags;

use std::io;
use thiserror::Error;

use pmk_core::io_ext::{
	ByteCursor,
	Truncated
};

pub const MAGIC: u32 = 0x10;

/// Offset of the pixel block's width field, relative to the stored data offset
pub const SIZE_FIELD_OFFSET: usize = 16;

bitflags! {
	pub struct Flags: u32 {
		const BPP_8 = 1;
		const BPP_16 = 2;
		const INDEXED = 8;
	}
}

#[cfg(feature = "import")]
#[derive(Debug, Error)]
pub enum TIMImportError {
	#[error("I/O error")]
	IO {
		#[from]
		source: io::Error,
	},
	#[error("Not a PlayStation texture: {0:#x}")]
	Magic(u32),
	#[error("Unsupported TIM pixel depth, image type {0:#x}")]
	Depth(u32),
	#[error(transparent)]
	Truncated(#[from] Truncated),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PixelMode {
	Indexed4,
	Indexed8,
	Direct16,
}

impl PixelMode {
	/// Only the low two bits select the depth; 24-bit images are not handled
	pub fn from_flags(flags: Flags) -> Option<PixelMode> {
		match flags.bits() & 3 {
			0 => Some(PixelMode::Indexed4),
			1 => Some(PixelMode::Indexed8),
			2 => Some(PixelMode::Direct16),
			_ => None,
		}
	}

	pub fn bits_per_pixel(self) -> u8 {
		match self {
			PixelMode::Indexed4 => 4,
			PixelMode::Indexed8 => 8,
			PixelMode::Direct16 => 16,
		}
	}

	/// Pixels stored in each 16-bit unit of the image width field
	pub fn pixels_per_unit(self) -> usize {
		match self {
			PixelMode::Indexed4 => 4,
			PixelMode::Indexed8 => 2,
			PixelMode::Direct16 => 1,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Header {
	pub magic: u32,
	pub flags: Flags,
	pub mode: PixelMode,
	/// Length of the palette block, which is where the pixel block header starts from
	pub data_offset: u32,
	pub num_colors: u16,
	pub num_palettes: u16,
}

impl Header {
	#[cfg(feature = "import")]
	fn read(buf: &mut ByteCursor) -> Result<Header, TIMImportError> {
		let magic = buf.read_u32()?;
		if magic != MAGIC {
			return Err(TIMImportError::Magic(magic));
		}

		let raw_flags = buf.read_u32()?;
		let flags = Flags::from_bits_truncate(raw_flags);
		let mode = PixelMode::from_flags(flags).ok_or(TIMImportError::Depth(raw_flags))?;

		let data_offset = buf.read_u32()?;
		// palette position in VRAM
		buf.skip(4)?;

		Ok(Header {
			magic: magic,
			flags: flags,
			mode: mode,
			data_offset: data_offset,
			num_colors: buf.read_u16()?,
			num_palettes: buf.read_u16()?,
		})
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum ImageData {
	/// One palette index per pixel
	Indexed(Vec<u8>),
	BPP16(Vec<u16>),
}

impl ImageData {
	#[cfg(feature = "import")]
	fn read(mode: PixelMode, width: u16, height: u16, buf: &mut ByteCursor) -> Result<ImageData, Truncated> {
		let units = width as usize * height as usize;

		match mode {
			PixelMode::Indexed4 => {
				let raw = buf.take(units * 2)?;
				Ok(ImageData::Indexed(raw.iter().flat_map(|b| [b & 0x0f, b >> 4]).collect()))
			},
			PixelMode::Indexed8 => Ok(ImageData::Indexed(buf.take(units * 2)?.to_vec())),
			PixelMode::Direct16 => {
				let mut rgb = Vec::with_capacity(units);
				for _ in 0..units {
					rgb.push(buf.read_u16()?);
				}

				Ok(ImageData::BPP16(rgb))
			},
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct PSXTexture {
	pub header: Header,
	pub palettes: Vec<Vec<u16>>,
	/// Width of the pixel block in 16-bit units
	pub raw_width: u16,
	pub height: u16,
	/// Absent when the pixel block is cut short
	pub data: Option<ImageData>,
}

impl PSXTexture {
	/// Width in pixels
	pub fn width(&self) -> usize {
		self.raw_width as usize * self.header.mode.pixels_per_unit()
	}

	#[cfg(feature = "import")]
	pub fn read(buf: &mut ByteCursor) -> Result<PSXTexture, TIMImportError> {
		let header = Header::read(buf)?;

		let mut palettes = vec![];
		if header.mode != PixelMode::Direct16 {
			for _ in 0..header.num_palettes {
				let mut pal = Vec::with_capacity(header.num_colors as usize);
				for _ in 0..header.num_colors {
					pal.push(buf.read_u16()?);
				}
				palettes.push(pal);
			}
		}

		buf.seek(header.data_offset as usize + SIZE_FIELD_OFFSET)?;
		let raw_width = buf.read_u16()?;
		let height = buf.read_u16()?;

		let data = match ImageData::read(header.mode, raw_width, height, buf) {
			Ok(data) => Some(data),
			Err(e) => {
				tracing::warn!("TIM pixel data unreadable, keeping header only: {}", e);
				None
			},
		};

		Ok(PSXTexture {
			header: header,
			palettes: palettes,
			raw_width: raw_width,
			height: height,
			data: data,
		})
	}
}
