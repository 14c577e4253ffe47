use crate::scale5to8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
	pub red: f32,
	pub green: f32,
	pub blue: f32,
	pub alpha: f32,
}

impl Color {
	/// Decodes a PlayStation 15-bit color. Channels are packed red-first from the low bits.
	/// An all-zero word is the hardware's transparent color; everything else is opaque.
	pub fn from_rgba5551(color: u16) -> Color {
		Color {
			red: (scale5to8((color & 31) as u8) as f32) / 255.0,
			green: (scale5to8(((color >> 5) & 31) as u8) as f32) / 255.0,
			blue: (scale5to8(((color >> 10) & 31) as u8) as f32) / 255.0,
			alpha: if color == 0 { 0.0 } else { 1.0 },
		}
	}

	/// Opaque color from 8-bit channels
	pub fn from_rgb888(red: u8, green: u8, blue: u8) -> Color {
		Color {
			red: red as f32 / 255.0,
			green: green as f32 / 255.0,
			blue: blue as f32 / 255.0,
			alpha: 1.0,
		}
	}

	pub fn to_rgb888(&self) -> u32 {
		to_u8(self.red) << 16 | to_u8(self.green) << 8 | to_u8(self.blue)
	}

	/// Returns a textual hex representation in the form of `#rrggbb`
	pub fn hex_rgb(&self) -> String {
		format!("#{:06x}", self.to_rgb888())
	}
}

fn to_u8(channel: f32) -> u32 {
	(channel.clamp(0.0, 1.0) * 255.0).round() as u32
}

pub type Palette = Vec<Color>;

/// Decoded indexed-color image.
///
/// `width` and `height` are in pixels, already corrected for packed pixel density. An
/// empty texture (zero width or height) stands in for a missing or unreadable image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Texture {
	pub bits_per_pixel: u8,
	pub width: usize,
	pub height: usize,
	pub palettes: Vec<Palette>,
	pub indices: Vec<usize>,
}

impl Texture {
	pub fn new(bits_per_pixel: u8, width: usize, height: usize) -> Texture {
		Texture {
			bits_per_pixel: bits_per_pixel,
			width: width,
			height: height,
			palettes: vec![],
			indices: vec![],
		}
	}

	pub fn is_empty(&self) -> bool {
		self.width == 0 || self.height == 0
	}

	/// Uses the selected palette and the indices to build a pixel array
	pub fn pixels(&self, palette: usize) -> Option<Vec<Color>> {
		let pal = self.palettes.get(palette)?;
		self.indices.iter().map(|i| pal.get(*i).copied()).collect()
	}
}
