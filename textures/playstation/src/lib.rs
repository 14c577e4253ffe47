pub mod tim;

use std::{
	collections::HashMap,
	fs,
	path::{
		Path,
		PathBuf
	}
};

use pmk_core::{
	io_ext::ByteCursor,
	texture::{
		Color,
		Texture
	}
};

use tim::*;

/// File extension TIM images are stored under
pub const EXTENSION: &str = "tim";

/// Returns the path a model's texture is expected at: the model path with its extension
/// replaced by `tim`.
pub fn companion_texture_path<P: AsRef<Path>>(model: P) -> PathBuf {
	model.as_ref().with_extension(EXTENSION)
}

#[cfg(feature = "import")]
pub fn decode_texture(input: &[u8]) -> Result<Texture, TIMImportError> {
	let tex = PSXTexture::read(&mut ByteCursor::new(input))?;

	let mut texture = Texture::new(tex.header.mode.bits_per_pixel(), tex.width(), tex.height as usize);
	texture.palettes = tex.palettes.iter()
		.map(|pal| pal.iter().map(|c| Color::from_rgba5551(*c)).collect())
		.collect();

	match tex.data {
		Some(ImageData::Indexed(ref indices)) => {
			texture.indices = indices.iter().map(|i| *i as usize).collect();
		},
		Some(ImageData::BPP16(ref colors)) => {
			// Since these are direct color values, we'll have to build a palette.
			let mut palette = vec![];
			let mut seen: HashMap<u16, usize> = HashMap::new();

			for color in colors.iter() {
				let i = *seen.entry(*color).or_insert_with(|| {
					palette.push(Color::from_rgba5551(*color));
					palette.len() - 1
				});
				texture.indices.push(i);
			}

			texture.palettes = vec![palette];
		},
		None => (),
	}

	tracing::debug!("TIM {}bpp {}x{}, {} palette(s)", texture.bits_per_pixel, texture.width,
		texture.height, texture.palettes.len());

	Ok(texture)
}

/// Like [`decode_texture`], but any failure yields an empty texture. Models then decode
/// without texture coordinates.
#[cfg(feature = "import")]
pub fn decode_texture_or_empty(input: &[u8]) -> Texture {
	decode_texture(input).unwrap_or_else(|e| {
		tracing::warn!("Ignoring texture: {}", e);
		Texture::default()
	})
}

#[cfg(feature = "import")]
pub fn read_tim<P: AsRef<Path>>(filepath: P) -> Result<Texture, TIMImportError> {
	let input = fs::read(filepath)?;
	decode_texture(&input)
}
