use std::{
	ops::ControlFlow,
	sync::mpsc::Sender
};

use thiserror::Error;

use ultraviolet::vec::{
	Vec2,
	Vec3
};

use crate::texture::Color;

/// Node identification type
#[derive(Clone, Debug, PartialEq)]
pub enum ObjRef {
	Name(String),
	Number(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeData {
	Geometry(Mesh),
	Null,
}

/// Base type of the 3D environment
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
	pub id: ObjRef,
	pub children: Vec<Node>,
	pub data: NodeData,
}

impl Node {
	pub fn new(id: ObjRef) -> Node {
		Node {
			id: id,
			children: vec![],
			data: NodeData::Null,
		}
	}
}

/// Vertex indices of one face, in host winding order
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Polygon {
	Triangle([usize; 3]),
	Quad([usize; 4]),
}

impl Polygon {
	/// Builds a quad from indices in PlayStation strip order (v0, v1, v2, v3), returning them
	/// in host fan order (v0, v1, v3, v2).
	pub fn quad_from_strip(v: [usize; 4]) -> Polygon {
		Polygon::Quad(strip_to_fan(v))
	}

	pub fn indices(&self) -> &[usize] {
		match self {
			Polygon::Triangle(t) => t,
			Polygon::Quad(q) => q,
		}
	}

	pub fn corners(&self) -> usize {
		self.indices().len()
	}
}

/// Reorders the four corners of a PlayStation quad (v0, v1, v2, v3) into fan order
/// (v0, v1, v3, v2). Per-corner attributes must go through the same reordering.
pub fn strip_to_fan<T: Copy>(c: [T; 4]) -> [T; 4] {
	[c[0], c[1], c[3], c[2]]
}

#[derive(Clone, Debug, PartialEq)]
pub struct Face {
	pub polygon: Polygon,
	/// One color per corner, in the same order as the polygon's indices
	pub colors: Option<Vec<Color>>,
	/// One texture coordinate per corner, in the same order as the polygon's indices
	pub uvs: Option<Vec<Vec2>>,
}

impl Face {
	pub fn new(polygon: Polygon) -> Face {
		Face {
			polygon: polygon,
			colors: None,
			uvs: None,
		}
	}

	pub fn with_colors(mut self, colors: Vec<Color>) -> Face {
		self.colors = Some(colors);
		self
	}

	pub fn with_uvs(mut self, uvs: Vec<Vec2>) -> Face {
		self.uvs = Some(uvs);
		self
	}
}

/// A face refers to a vertex the mesh does not have
#[derive(Clone, Copy, Debug, Error, PartialEq)]
#[error("Face {face} references vertex {index}, mesh has {len} vertices")]
pub struct FaceIndexError {
	pub face: usize,
	pub index: usize,
	pub len: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
	pub name: String,
	pub index: usize,
	pub vertices: Vec<Vec3>,
	/// Parsed normals. Faces do not reference these.
	pub normals: Vec<Vec3>,
	pub faces: Vec<Face>,
}

impl Mesh {
	pub fn new(name: String, index: usize) -> Mesh {
		Mesh {
			name: name,
			index: index,
			..Default::default()
		}
	}

	pub fn is_empty(&self) -> bool {
		self.vertices.is_empty() && self.faces.is_empty()
	}

	/// Checks that every face index lies within the vertex list
	pub fn check_indices(&self) -> Result<(), FaceIndexError> {
		let len = self.vertices.len();

		for (i, face) in self.faces.iter().enumerate() {
			if let Some(index) = face.polygon.indices().iter().find(|v| **v >= len) {
				return Err(FaceIndexError {
					face: i,
					index: *index,
					len: len,
				});
			}
		}

		Ok(())
	}
}

/// Receiver of decoded meshes, implemented by the host.
///
/// Decoders hand over each mesh as soon as it is complete. Returning
/// [`ControlFlow::Break`] stops the decode before the next mesh is read.
pub trait MeshSink {
	fn add_mesh(&mut self, mesh: Mesh) -> ControlFlow<()>;
}

impl MeshSink for Vec<Mesh> {
	fn add_mesh(&mut self, mesh: Mesh) -> ControlFlow<()> {
		self.push(mesh);
		ControlFlow::Continue(())
	}
}

/// Forwards meshes to another thread. A hung up receiver cancels the decode.
impl MeshSink for Sender<Mesh> {
	fn add_mesh(&mut self, mesh: Mesh) -> ControlFlow<()> {
		match self.send(mesh) {
			Ok(()) => ControlFlow::Continue(()),
			Err(_) => ControlFlow::Break(()),
		}
	}
}

/// Top level of the 3D environment
#[derive(Clone, Debug)]
pub struct Scene {
	pub root: Node,
}

impl Scene {
	pub fn new(root: Node) -> Scene {
		Scene {
			root: root,
		}
	}

	/// Iterates over the meshes attached directly below the root
	pub fn meshes(&self) -> impl Iterator<Item = &Mesh> {
		self.root.children.iter().filter_map(|n| match &n.data {
			NodeData::Geometry(mesh) => Some(mesh),
			NodeData::Null => None,
		})
	}
}

/// Each mesh becomes a child node of the root, named after the mesh
impl MeshSink for Scene {
	fn add_mesh(&mut self, mesh: Mesh) -> ControlFlow<()> {
		let mut node = Node::new(ObjRef::Name(mesh.name.clone()));
		node.data = NodeData::Geometry(mesh);
		self.root.children.push(node);

		ControlFlow::Continue(())
	}
}
