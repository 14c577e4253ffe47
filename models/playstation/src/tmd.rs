use bitflags::bitflags;

use std::{
	io,
	ops::ControlFlow
};

use thiserror::Error;
use ultraviolet::vec::Vec3;

use pmk_core::{
	io_ext::{
		ByteCursor,
		Truncated
	},
	scene::{
		Face,
		FaceIndexError,
		Mesh,
		MeshSink,
		Polygon,
		strip_to_fan
	},
	texture::Color
};

pub const MAGIC: u32 = 0x41;
/// Object table offsets are relative to the end of the file header
pub const HEADER_SIZE: usize = 12;
pub const OBJECT_HEADER_SIZE: usize = 28;

pub const VERTEX_DIVISOR: f32 = 100.0;
pub const NORMAL_DIVISOR: f32 = 4096.0;

bitflags! {
	pub struct Flags: u32 {
		/// Offsets are absolute addresses
		const FIXP = 1;
	}
}

/// Primitive opcodes with a face layout this crate understands
pub mod opcode {
	pub const FLAT_TRIANGLE: u8 = 0x20;
	pub const FLAT_TRIANGLE_ALT: u8 = 0x22;
	pub const GOURAUD_TRIANGLE: u8 = 0x24;
	pub const FLAT_QUAD: u8 = 0x28;
	pub const GOURAUD_QUAD: u8 = 0x2c;
	pub const SMOOTH_TRIANGLE: u8 = 0x30;
	pub const TEXTURED_SMOOTH_TRIANGLE: u8 = 0x34;
	pub const SMOOTH_QUAD: u8 = 0x38;
}

#[cfg(feature = "import")]
#[derive(Debug, Error)]
pub enum TMDImportError {
	#[error("I/O error")]
	IO {
		#[from]
		source: io::Error,
	},
	#[error("Not a TMD model: {0:#x}")]
	Magic(u32),
	#[error("Corrupt TMD model: {0}")]
	Corrupt(#[from] Truncated),
	#[error("Corrupt TMD model: mesh {mesh}: {source}")]
	FaceIndex {
		mesh: usize,
		source: FaceIndexError,
	},
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Header {
	pub magic: u32,
	pub flags: Flags,
	pub num_objects: u32,
}

impl Header {
	#[cfg(feature = "import")]
	fn read(buf: &mut ByteCursor) -> Result<Header, TMDImportError> {
		let magic = buf.read_u32()?;
		if magic != MAGIC {
			return Err(TMDImportError::Magic(magic));
		}

		Ok(Header {
			magic: magic,
			flags: Flags::from_bits_truncate(buf.read_u32()?),
			num_objects: buf.read_u32()?,
		})
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ObjectHeader {
	pub vertex_offset: u32,
	pub vertex_count: u32,
	pub normal_offset: u32,
	pub normal_count: u32,
	pub primitive_offset: u32,
	pub primitive_count: u32,
	pub scale: i32,
}

impl ObjectHeader {
	#[cfg(feature = "import")]
	fn read(buf: &mut ByteCursor) -> Result<ObjectHeader, Truncated> {
		Ok(ObjectHeader {
			vertex_offset: buf.read_u32()?,
			vertex_count: buf.read_u32()?,
			normal_offset: buf.read_u32()?,
			normal_count: buf.read_u32()?,
			primitive_offset: buf.read_u32()?,
			primitive_count: buf.read_u32()?,
			scale: buf.read_i32()?,
		})
	}
}

/// Leading word of every primitive record
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrimitiveHeader {
	pub olen: u8,
	/// Length of the record body in 32-bit words
	pub ilen: u8,
	pub flag: u8,
	pub mode: u8,
}

impl PrimitiveHeader {
	pub fn body_len(&self) -> usize {
		self.ilen as usize * 4
	}
}

/// RGB color followed by the GPU command byte
pub type Rgbc = [u8; 4];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Primitive {
	FlatTriangle {
		color: Rgbc,
		normal: u16,
		vertices: [u16; 3],
	},
	GouraudTriangle {
		colors: [Rgbc; 3],
		normal: u16,
		vertices: [u16; 3],
	},
	FlatQuad {
		color: Rgbc,
		normal: u16,
		vertices: [u16; 4],
	},
	GouraudQuad {
		colors: [Rgbc; 4],
		normal: u16,
		vertices: [u16; 4],
	},
	SmoothTriangle {
		color: Rgbc,
		normals: [u16; 3],
		vertices: [u16; 3],
	},
	/// Texture coordinates are kept as read but never reach the mesh
	TexturedSmoothTriangle {
		uvs: [(u8, u8); 3],
		normals: [u16; 3],
		vertices: [u16; 3],
	},
	SmoothQuad {
		color: Rgbc,
		normals: [u16; 4],
		vertices: [u16; 4],
	},
}

#[cfg(feature = "import")]
fn rgbc(buf: &mut ByteCursor) -> Result<Rgbc, Truncated> {
	let mut c = [0; 4];
	c.copy_from_slice(buf.take(4)?);
	Ok(c)
}

#[cfg(feature = "import")]
fn indices<const N: usize>(buf: &mut ByteCursor) -> Result<[u16; N], Truncated> {
	let mut v = [0; N];
	for i in v.iter_mut() {
		*i = buf.read_u16()?;
	}
	Ok(v)
}

/// Interleaved (normal, vertex) pairs
#[cfg(feature = "import")]
fn index_pairs<const N: usize>(buf: &mut ByteCursor) -> Result<([u16; N], [u16; N]), Truncated> {
	let mut normals = [0; N];
	let mut vertices = [0; N];
	for i in 0..N {
		normals[i] = buf.read_u16()?;
		vertices[i] = buf.read_u16()?;
	}
	Ok((normals, vertices))
}

impl Primitive {
	/// Reads the body of a primitive record. Unknown opcodes yield `None` and consume nothing.
	#[cfg(feature = "import")]
	pub fn read(mode: u8, buf: &mut ByteCursor) -> Result<Option<Primitive>, Truncated> {
		use opcode::*;

		let prim = match mode {
			FLAT_TRIANGLE | FLAT_TRIANGLE_ALT => Primitive::FlatTriangle {
				color: rgbc(buf)?,
				normal: buf.read_u16()?,
				vertices: indices(buf)?,
			},
			GOURAUD_TRIANGLE => Primitive::GouraudTriangle {
				colors: [rgbc(buf)?, rgbc(buf)?, rgbc(buf)?],
				normal: buf.read_u16()?,
				vertices: indices(buf)?,
			},
			FLAT_QUAD => Primitive::FlatQuad {
				color: rgbc(buf)?,
				normal: buf.read_u16()?,
				vertices: indices(buf)?,
			},
			GOURAUD_QUAD => Primitive::GouraudQuad {
				colors: [rgbc(buf)?, rgbc(buf)?, rgbc(buf)?, rgbc(buf)?],
				normal: buf.read_u16()?,
				vertices: indices(buf)?,
			},
			SMOOTH_TRIANGLE => {
				let color = rgbc(buf)?;
				let (normals, vertices) = index_pairs(buf)?;
				Primitive::SmoothTriangle {
					color: color,
					normals: normals,
					vertices: vertices,
				}
			},
			TEXTURED_SMOOTH_TRIANGLE => {
				let mut uvs = [(0, 0); 3];
				for uv in uvs.iter_mut() {
					let _unused = buf.read_u16()?;
					let v = buf.read_u8()?;
					let u = buf.read_u8()?;
					*uv = (u, v);
				}

				let (normals, vertices) = index_pairs(buf)?;
				Primitive::TexturedSmoothTriangle {
					uvs: uvs,
					normals: normals,
					vertices: vertices,
				}
			},
			SMOOTH_QUAD => {
				let color = rgbc(buf)?;
				let (normals, vertices) = index_pairs(buf)?;
				Primitive::SmoothQuad {
					color: color,
					normals: normals,
					vertices: vertices,
				}
			},
			_ => return Ok(None),
		};

		Ok(Some(prim))
	}

	/// Converts to a host face; quads are reordered into fan winding along with their colors
	pub fn face(&self) -> Face {
		match *self {
			Primitive::FlatTriangle { color, vertices, .. } |
			Primitive::SmoothTriangle { color, vertices, .. } =>
				Face::new(triangle(vertices)).with_colors(vec![to_color(color); 3]),
			Primitive::GouraudTriangle { colors, vertices, .. } =>
				Face::new(triangle(vertices)).with_colors(colors.iter().map(|c| to_color(*c)).collect()),
			Primitive::FlatQuad { color, vertices, .. } |
			Primitive::SmoothQuad { color, vertices, .. } =>
				Face::new(quad(vertices)).with_colors(vec![to_color(color); 4]),
			Primitive::GouraudQuad { colors, vertices, .. } =>
				Face::new(quad(vertices)).with_colors(strip_to_fan(colors).iter().map(|c| to_color(*c)).collect()),
			Primitive::TexturedSmoothTriangle { vertices, .. } => Face::new(triangle(vertices)),
		}
	}
}

fn to_color(c: Rgbc) -> Color {
	Color::from_rgb888(c[0], c[1], c[2])
}

fn triangle(v: [u16; 3]) -> Polygon {
	Polygon::Triangle([v[0] as usize, v[1] as usize, v[2] as usize])
}

fn quad(v: [u16; 4]) -> Polygon {
	Polygon::quad_from_strip([v[0] as usize, v[1] as usize, v[2] as usize, v[3] as usize])
}

/// Decode context for one TMD file
#[cfg(feature = "import")]
pub struct TmdDecoder<'a> {
	buf: ByteCursor<'a>,
	pub header: Header,
	table_base: usize,
}

#[cfg(feature = "import")]
impl<'a> TmdDecoder<'a> {
	pub fn new(input: &'a [u8]) -> Result<TmdDecoder<'a>, TMDImportError> {
		let mut buf = ByteCursor::new(input);
		let header = Header::read(&mut buf)?;

		if header.flags.contains(Flags::FIXP) {
			tracing::warn!("TMD uses absolute offsets, reading them as relative");
		}

		let table_base = buf.tell();
		tracing::debug!("TMD: {} mesh(es)", header.num_objects);

		Ok(TmdDecoder {
			buf: buf,
			header: header,
			table_base: table_base,
		})
	}

	pub fn num_meshes(&self) -> usize {
		self.header.num_objects as usize
	}

	pub fn object_header(&mut self, mesh: usize) -> Result<ObjectHeader, Truncated> {
		self.buf.seek(self.table_base + mesh * OBJECT_HEADER_SIZE)?;
		ObjectHeader::read(&mut self.buf)
	}

	fn svec3s(&mut self, offset: u32, count: u32, divisor: f32) -> Result<Vec<Vec3>, Truncated> {
		self.buf.seek(HEADER_SIZE + offset as usize)?;

		let mut out = vec![];
		for _ in 0..count {
			out.push(self.buf.read_svec3(divisor)?);
		}

		Ok(out)
	}

	pub fn decode_mesh(&mut self, mesh: usize) -> Result<Mesh, TMDImportError> {
		let obj = self.object_header(mesh)?;
		let mut out = Mesh::new(format!("tmd_mesh{}", mesh), mesh);

		out.vertices = self.svec3s(obj.vertex_offset, obj.vertex_count, VERTEX_DIVISOR)?;
		out.normals = self.svec3s(obj.normal_offset, obj.normal_count, NORMAL_DIVISOR)?;

		self.buf.seek(HEADER_SIZE + obj.primitive_offset as usize)?;
		for _ in 0..obj.primitive_count {
			let header = PrimitiveHeader {
				olen: self.buf.read_u8()?,
				ilen: self.buf.read_u8()?,
				flag: self.buf.read_u8()?,
				mode: self.buf.read_u8()?,
			};
			let body = self.buf.tell();

			match Primitive::read(header.mode, &mut self.buf)? {
				Some(prim) => out.faces.push(prim.face()),
				None => tracing::debug!("{}: skipping primitive {:#04x} ({} bytes)", out.name, header.mode,
					header.body_len()),
			}

			// the declared length wins over what the opcode layout consumed
			self.buf.seek(body + header.body_len())?;
		}

		out.check_indices().map_err(|e| TMDImportError::FaceIndex {
			mesh: mesh,
			source: e,
		})?;

		Ok(out)
	}

	/// Decodes every mesh in order, handing each to `sink` as soon as it is complete.
	/// Returns the number of meshes handed over.
	pub fn stream<S>(&mut self, sink: &mut S) -> Result<usize, TMDImportError>
	where
		S: MeshSink + ?Sized,
	{
		for i in 0..self.num_meshes() {
			let mesh = self.decode_mesh(i)?;
			tracing::debug!("{}: {} vertices, {} faces", mesh.name, mesh.vertices.len(), mesh.faces.len());

			if let ControlFlow::Break(()) = sink.add_mesh(mesh) {
				tracing::debug!("TMD decode stopped by sink after mesh {}", i);
				return Ok(i + 1);
			}
		}

		Ok(self.num_meshes())
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	pub(crate) struct TestObject {
		pub vertices: Vec<[i16; 4]>,
		pub normals: Vec<[i16; 4]>,
		/// (opcode, body length in words, body)
		pub primitives: Vec<(u8, u8, Vec<u8>)>,
	}

	fn halves(values: &[i16]) -> Vec<u8> {
		values.iter().flat_map(|v| v.to_le_bytes()).collect()
	}

	fn indices(values: &[u16]) -> Vec<u8> {
		values.iter().flat_map(|v| v.to_le_bytes()).collect()
	}

	pub(crate) fn build_tmd(objects: &[TestObject]) -> Vec<u8> {
		let mut table = vec![];
		let mut blocks = vec![];
		// relative to the end of the file header
		let data_start = objects.len() * OBJECT_HEADER_SIZE;

		for obj in objects.iter() {
			let vertex_offset = data_start + blocks.len();
			blocks.extend(obj.vertices.iter().flat_map(|v| halves(v)));
			let normal_offset = data_start + blocks.len();
			blocks.extend(obj.normals.iter().flat_map(|v| halves(v)));
			let primitive_offset = data_start + blocks.len();
			for (mode, ilen, body) in obj.primitives.iter() {
				blocks.extend_from_slice(&[0, *ilen, 0, *mode]);
				let mut padded = body.clone();
				padded.resize(*ilen as usize * 4, 0);
				blocks.extend(padded);
			}

			for v in [vertex_offset, obj.vertices.len(), normal_offset, obj.normals.len(),
				primitive_offset, obj.primitives.len(), 0].iter()
			{
				table.extend_from_slice(&(*v as u32).to_le_bytes());
			}
		}

		let mut data = vec![];
		data.extend_from_slice(&MAGIC.to_le_bytes());
		data.extend_from_slice(&0u32.to_le_bytes());
		data.extend_from_slice(&(objects.len() as u32).to_le_bytes());
		data.extend(table);
		data.extend(blocks);
		data
	}

	fn square() -> Vec<[i16; 4]> {
		vec![[0, 0, 0, 0], [100, 0, 0, 0], [0, 100, 0, 0], [100, 100, 0, 0]]
	}

	fn single(primitives: Vec<(u8, u8, Vec<u8>)>) -> Vec<u8> {
		build_tmd(&[TestObject {
			vertices: square(),
			normals: vec![[4096, 0, -2048, 0]],
			primitives: primitives,
		}])
	}

	fn decode_one(data: &[u8]) -> Mesh {
		TmdDecoder::new(data).unwrap().decode_mesh(0).unwrap()
	}

	const RED: [u8; 4] = [255, 0, 0, 0x20];
	const GREEN: [u8; 4] = [0, 255, 0, 0];
	const BLUE: [u8; 4] = [0, 0, 255, 0];
	const WHITE: [u8; 4] = [255, 255, 255, 0];

	fn colors(face: &Face) -> Vec<u32> {
		face.colors.as_ref().unwrap().iter().map(|c| c.to_rgb888()).collect()
	}

	#[test]
	fn test_geometry() {
		let mesh = decode_one(&single(vec![]));

		assert_eq!("tmd_mesh0", mesh.name);
		assert_eq!(Vec3::new(1.0, 1.0, 0.0), mesh.vertices[3]);
		assert_eq!(vec![Vec3::new(1.0, 0.0, -0.5)], mesh.normals);
		assert!(mesh.faces.is_empty());
	}

	#[test]
	fn test_flat_triangle() {
		let body = [RED.to_vec(), indices(&[0, 2, 1, 3])].concat();
		let mesh = decode_one(&single(vec![(0x20, 3, body.clone()), (0x22, 3, body)]));

		assert_eq!(2, mesh.faces.len());
		for face in mesh.faces.iter() {
			assert_eq!(Polygon::Triangle([2, 1, 3]), face.polygon);
			assert_eq!(vec![0xff0000; 3], colors(face));
			assert_eq!(1.0, face.colors.as_ref().unwrap()[0].alpha);
		}
	}

	#[test]
	fn test_gouraud_triangle() {
		let body = [RED.to_vec(), GREEN.to_vec(), BLUE.to_vec(), indices(&[0, 0, 1, 2])].concat();
		let mesh = decode_one(&single(vec![(0x24, 5, body)]));

		assert_eq!(Polygon::Triangle([0, 1, 2]), mesh.faces[0].polygon);
		assert_eq!(vec![0xff0000, 0x00ff00, 0x0000ff], colors(&mesh.faces[0]));
	}

	#[test]
	fn test_flat_quad() {
		let body = [GREEN.to_vec(), indices(&[0, 0, 1, 2, 3])].concat();
		let mesh = decode_one(&single(vec![(0x28, 4, body)]));

		assert_eq!(Polygon::Quad([0, 1, 3, 2]), mesh.faces[0].polygon);
		assert_eq!(vec![0x00ff00; 4], colors(&mesh.faces[0]));
	}

	#[test]
	fn test_gouraud_quad() {
		let body = [RED.to_vec(), GREEN.to_vec(), BLUE.to_vec(), WHITE.to_vec(), indices(&[0, 0, 1, 2, 3])].concat();
		let mesh = decode_one(&single(vec![(0x2c, 7, body)]));

		assert_eq!(Polygon::Quad([0, 1, 3, 2]), mesh.faces[0].polygon);
		assert_eq!(vec![0xff0000, 0x00ff00, 0xffffff, 0x0000ff], colors(&mesh.faces[0]));
	}

	#[test]
	fn test_smooth_primitives() {
		let tri = [BLUE.to_vec(), indices(&[0, 3, 0, 2, 0, 1])].concat();
		let quad = [WHITE.to_vec(), indices(&[0, 3, 0, 2, 0, 1, 0, 0])].concat();
		let mesh = decode_one(&single(vec![(0x30, 4, tri), (0x38, 5, quad)]));

		assert_eq!(Polygon::Triangle([3, 2, 1]), mesh.faces[0].polygon);
		assert_eq!(vec![0x0000ff; 3], colors(&mesh.faces[0]));
		assert_eq!(Polygon::Quad([3, 2, 0, 1]), mesh.faces[1].polygon);
		assert_eq!(vec![0xffffff; 4], colors(&mesh.faces[1]));
	}

	#[test]
	fn test_textured_triangle_is_geometry_only() {
		let body = [
			vec![0, 0, 10, 20, 0, 0, 30, 40, 0, 0, 50, 60],
			indices(&[0, 0, 0, 1, 0, 2]),
		].concat();

		let mut buf = ByteCursor::new(&body);
		let prim = Primitive::read(0x34, &mut buf).unwrap().unwrap();
		match prim {
			Primitive::TexturedSmoothTriangle { uvs, .. } => assert_eq!([(20, 10), (40, 30), (60, 50)], uvs),
			other => panic!("unexpected primitive {:?}", other),
		}

		let mesh = decode_one(&single(vec![(0x34, 6, body)]));
		let face = &mesh.faces[0];
		assert_eq!(3, face.polygon.corners());
		assert_eq!(None, face.colors);
		assert_eq!(None, face.uvs);
	}

	#[test]
	fn test_unknown_opcode_skipped() {
		let tri = [RED.to_vec(), indices(&[0, 0, 1, 2])].concat();
		let mesh = decode_one(&single(vec![(0x3c, 9, vec![0xff; 36]), (0x20, 3, tri)]));

		assert_eq!(1, mesh.faces.len());
		assert_eq!(Polygon::Triangle([0, 1, 2]), mesh.faces[0].polygon);
	}

	#[test]
	fn test_declared_length_wins() {
		// first record is padded well past its fields
		let tri = [RED.to_vec(), indices(&[0, 0, 1, 2])].concat();
		let other = [GREEN.to_vec(), indices(&[0, 3, 2, 1])].concat();
		let mesh = decode_one(&single(vec![(0x20, 6, tri), (0x20, 3, other)]));

		assert_eq!(2, mesh.faces.len());
		assert_eq!(Polygon::Triangle([0, 1, 2]), mesh.faces[0].polygon);
		assert_eq!(Polygon::Triangle([3, 2, 1]), mesh.faces[1].polygon);
		assert_eq!(vec![0x00ff00; 3], colors(&mesh.faces[1]));
	}

	#[test]
	fn test_bad_signature() {
		let mut data = single(vec![]);
		data[0] = 0x40;

		assert!(matches!(TmdDecoder::new(&data), Err(TMDImportError::Magic(0x40))));
	}

	#[test]
	fn test_vertex_index_out_of_range() {
		let tri = [RED.to_vec(), indices(&[0, 0, 1, 9])].concat();
		let err = TmdDecoder::new(&single(vec![(0x20, 3, tri)])).unwrap().decode_mesh(0).unwrap_err();

		match err {
			TMDImportError::FaceIndex { mesh: 0, source } => assert_eq!(9, source.index),
			other => panic!("unexpected error {:?}", other),
		}
	}

	#[test]
	fn test_truncated_primitive_table() {
		let mut data = single(vec![(0x20, 3, [RED.to_vec(), indices(&[0, 0, 1, 2])].concat())]);
		data.truncate(data.len() - 4);

		let err = TmdDecoder::new(&data).unwrap().decode_mesh(0).unwrap_err();
		assert!(matches!(err, TMDImportError::Corrupt(_)));
	}

	#[test]
	fn test_stream_meshes() {
		let tri = [RED.to_vec(), indices(&[0, 0, 1, 2])].concat();
		let data = build_tmd(&[
			TestObject { vertices: square(), normals: vec![], primitives: vec![(0x20, 3, tri.clone())] },
			TestObject { vertices: square(), normals: vec![], primitives: vec![(0x20, 3, tri.clone()), (0x20, 3, tri)] },
		]);

		let mut meshes: Vec<Mesh> = vec![];
		assert_eq!(2, TmdDecoder::new(&data).unwrap().stream(&mut meshes).unwrap());
		assert_eq!("tmd_mesh1", meshes[1].name);
		assert_eq!(1, meshes[1].index);
		assert_eq!(2, meshes[1].faces.len());
	}
}
