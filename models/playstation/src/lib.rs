pub mod tmd;

use std::{
	fs,
	path::Path
};

use pmk_core::scene::{
	Mesh,
	Node,
	ObjRef,
	Scene
};

#[cfg(feature = "import")]
pub use tmd::{
	TMDImportError,
	TmdDecoder
};

/// File extension TMD models are stored under
pub const EXTENSION: &str = "tmd";

#[cfg(feature = "import")]
pub fn decode_tmd(input: &[u8]) -> Result<Vec<Mesh>, TMDImportError> {
	let mut meshes = vec![];
	TmdDecoder::new(input)?.stream(&mut meshes)?;
	Ok(meshes)
}

/// Reads a TMD file into a scene holding one child node per mesh
#[cfg(feature = "import")]
pub fn read_tmd<P: AsRef<Path>>(filepath: P) -> Result<Scene, TMDImportError> {
	let path = filepath.as_ref();
	let input = fs::read(path)?;

	let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
	let mut scene = Scene::new(Node::new(ObjRef::Name(name)));
	TmdDecoder::new(&input)?.stream(&mut scene)?;

	Ok(scene)
}
