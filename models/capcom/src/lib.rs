pub mod emd;

use std::{
	fs,
	path::Path
};

use pmk_core::{
	scene::{
		Mesh,
		Node,
		ObjRef,
		Scene
	},
	texture::Texture
};

use pmk_textures_playstation::{
	companion_texture_path,
	read_tim
};

pub use emd::{
	Capabilities,
	Revision
};

#[cfg(feature = "import")]
pub use emd::import::{
	EMDImportError,
	EmdDecoder
};

/// Decodes every submesh of an EMD file. `texture` is only consulted by revisions that
/// carry texture coordinates.
#[cfg(feature = "import")]
pub fn decode_emd(input: &[u8], revision: Revision, texture: Option<&Texture>) -> Result<Vec<Mesh>, EMDImportError> {
	let mut meshes = vec![];
	EmdDecoder::new(input, revision, texture)?.stream(&mut meshes)?;
	Ok(meshes)
}

/// Loads the TIM image stored next to a model, if there is a readable one
#[cfg(feature = "import")]
pub fn load_companion_texture(model: &Path) -> Option<Texture> {
	let path = companion_texture_path(model);

	match read_tim(&path) {
		Ok(tex) => Some(tex),
		Err(e) => {
			tracing::warn!("No texture for {} at {}: {}", model.display(), path.display(), e);
			None
		},
	}
}

/// Reads an EMD file into a scene holding one child node per submesh
#[cfg(feature = "import")]
pub fn read_emd<P: AsRef<Path>>(filepath: P, revision: Revision) -> Result<Scene, EMDImportError> {
	let path = filepath.as_ref();
	let input = fs::read(path)?;

	let texture = if revision.capabilities().texture_coords {
		load_companion_texture(path)
	} else {
		None
	};

	let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
	let mut scene = Scene::new(Node::new(ObjRef::Name(name)));
	EmdDecoder::new(&input, revision, texture.as_ref())?.stream(&mut scene)?;

	Ok(scene)
}
