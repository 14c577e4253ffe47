use std::{
	fmt::{
		Display,
		Formatter,
		self
	},
	str::FromStr
};

use ultraviolet::vec::{
	Vec2,
	Vec3
};

use pmk_core::texture::Texture;

/// Directory index of the skeleton object holding relative positions
pub const OBJ_SKELETON: usize = 2;
/// Directory index of the mesh object
pub const OBJ_MESHES: usize = 7;

pub const SKELETON_HEADER_SIZE: u16 = 8;
pub const SUBMESH_HEADER_SIZE: usize = 56;

pub const RELPOS_DIVISOR: f32 = 100.0;
/// X spacing between submeshes that have no relative position
pub const FALLBACK_SPACING: f32 = 10.0;

/// EMD format revision. Later revisions add skeleton placement and texture coordinates,
/// and switch to a finer vertex scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Revision {
	Basic,
	Skeletal,
	Textured,
}

impl Default for Revision {
	fn default() -> Self {
		Revision::Textured
	}
}

impl Revision {
	pub fn capabilities(self) -> Capabilities {
		match self {
			Revision::Basic => Capabilities {
				vertex_divisor: 256.0,
				relative_positions: false,
				texture_coords: false,
			},
			Revision::Skeletal => Capabilities {
				vertex_divisor: 100.0,
				relative_positions: true,
				texture_coords: false,
			},
			Revision::Textured => Capabilities {
				vertex_divisor: 100.0,
				relative_positions: true,
				texture_coords: true,
			},
		}
	}
}

impl Display for Revision {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Revision::Basic => "basic",
			Revision::Skeletal => "skeletal",
			Revision::Textured => "textured",
		})
	}
}

impl FromStr for Revision {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"basic" => Ok(Revision::Basic),
			"skeletal" => Ok(Revision::Skeletal),
			"textured" => Ok(Revision::Textured),
			_ => Err(format!("unknown EMD revision '{}' (basic, skeletal, textured)", s)),
		}
	}
}

/// What a revision's decoder reads
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Capabilities {
	pub vertex_divisor: f32,
	pub relative_positions: bool,
	pub texture_coords: bool,
}

/// Flat table of absolute object offsets
#[derive(Clone, Debug, PartialEq)]
pub struct Directory {
	pub offset: u32,
	pub objects: Vec<u32>,
}

impl Directory {
	pub fn object(&self, index: usize) -> Option<usize> {
		self.objects.get(index).map(|o| *o as usize)
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkeletonHeader {
	pub relpos_offset: u16,
	pub data_offset: u16,
	pub count: u16,
	pub size: u16,
}

/// One geometry group of a submesh. Offsets are relative to the submesh table.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GeometryGroup {
	pub vertex_offset: u32,
	pub vertex_count: u32,
	pub normal_offset: u32,
	pub normal_count: u32,
	pub index_offset: u32,
	pub index_count: u32,
	pub uv_offset: u32,
}

impl GeometryGroup {
	/// Whether this group's vertex block differs from `other`'s
	pub fn distinct_vertices(&self, other: &GeometryGroup) -> bool {
		self.vertex_offset != other.vertex_offset || self.vertex_count != other.vertex_count
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SubmeshHeader {
	pub triangles: GeometryGroup,
	pub quads: GeometryGroup,
}

/// Packed texture coordinates of one face
#[derive(Clone, Debug, PartialEq)]
pub struct UvRecord {
	/// Raw (u, v) per corner, in file order
	pub corners: Vec<(u8, u8)>,
	pub tpage: u16,
	pub unknown: u16,
}

impl UvRecord {
	pub fn palette(&self) -> u8 {
		(self.tpage & 0x1f) as u8
	}

	/// High order u offset selecting the texture page column
	pub fn u_offset(&self) -> u32 {
		(((self.tpage >> 5) & 0x3f) as u32) << 6
	}

	/// Normalizes against the texture's pixel size. Results are not clamped; the page
	/// offset can push u slightly past 1.
	pub fn uvs(&self, texture: &Texture) -> Vec<Vec2> {
		let offset = self.u_offset();

		self.corners.iter().map(|(u, v)| Vec2::new(
			(*u as u32 + offset) as f32 / texture.width as f32,
			*v as f32 / texture.height as f32,
		)).collect()
	}
}

#[cfg(feature = "import")]
pub mod import {
	use std::{
		io,
		ops::ControlFlow
	};

	use thiserror::Error;

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
		}
	};

	use super::*;

	#[derive(Error, Debug)]
	pub enum EMDImportError {
		#[error("I/O error")]
		IO {
			#[from]
			source: io::Error,
		},
		#[error("Corrupt EMD container: {0}")]
		Corrupt(#[from] Truncated),
		#[error("Corrupt EMD container: directory has no object {0}")]
		MissingObject(usize),
		#[error("Corrupt EMD container: submesh {submesh}: {source}")]
		FaceIndex {
			submesh: usize,
			source: FaceIndexError,
		},
	}

	fn directory(buf: &mut ByteCursor) -> Result<Directory, Truncated> {
		buf.seek(0)?;
		let offset = buf.read_u32()?;
		buf.seek(offset as usize)?;

		let mut objects = vec![];
		for _ in 0..(buf.remaining() / 4) {
			objects.push(buf.read_u32()?);
		}

		Ok(Directory {
			offset: offset,
			objects: objects,
		})
	}

	fn relative_positions(buf: &mut ByteCursor, offset: usize) -> Result<Vec<Vec3>, Truncated> {
		buf.seek(offset)?;

		let header = SkeletonHeader {
			relpos_offset: buf.read_u16()?,
			data_offset: buf.read_u16()?,
			count: buf.read_u16()?,
			size: buf.read_u16()?,
		};

		if header.data_offset <= SKELETON_HEADER_SIZE {
			return Ok(vec![]);
		}

		let mut positions = vec![];
		for _ in 0..header.count {
			let x = buf.read_i16()? as f32 / RELPOS_DIVISOR;
			let y = buf.read_i16()? as f32 / RELPOS_DIVISOR;
			let z = buf.read_i16()? as f32 / RELPOS_DIVISOR;
			positions.push(Vec3::new(x, y, z));
		}

		Ok(positions)
	}

	fn group(buf: &mut ByteCursor) -> Result<GeometryGroup, Truncated> {
		Ok(GeometryGroup {
			vertex_offset: buf.read_u32()?,
			vertex_count: buf.read_u32()?,
			normal_offset: buf.read_u32()?,
			normal_count: buf.read_u32()?,
			index_offset: buf.read_u32()?,
			index_count: buf.read_u32()?,
			uv_offset: buf.read_u32()?,
		})
	}

	fn uv_record(buf: &mut ByteCursor, corners: usize) -> Result<UvRecord, Truncated> {
		let mut record = UvRecord {
			corners: Vec::with_capacity(corners),
			tpage: 0,
			unknown: 0,
		};

		for c in 0..corners {
			let u = buf.read_u8()?;
			let v = buf.read_u8()?;
			record.corners.push((u, v));

			let field = buf.read_u16()?;
			match c {
				0 => record.tpage = field,
				1 => record.unknown = field,
				_ => (),
			}
		}

		Ok(record)
	}

	/// Reads one face's (normal, vertex) index pairs, keeping the vertex indices
	fn corners<const N: usize>(buf: &mut ByteCursor, base: usize) -> Result<[usize; N], Truncated> {
		let mut v = [0; N];
		for c in v.iter_mut() {
			let _normal = buf.read_u16()?;
			*c = base + buf.read_u16()? as usize;
		}

		Ok(v)
	}

	/// Decode context for one EMD file.
	///
	/// Construction reads the directory, the relative positions and the submesh table
	/// location; submeshes are then decoded one at a time.
	pub struct EmdDecoder<'a> {
		buf: ByteCursor<'a>,
		caps: Capabilities,
		texture: Option<&'a Texture>,
		pub directory: Directory,
		pub relative_positions: Vec<Vec3>,
		table_base: usize,
		num_submeshes: usize,
	}

	impl<'a> EmdDecoder<'a> {
		pub fn new(input: &'a [u8], revision: Revision, texture: Option<&'a Texture>)
			-> Result<EmdDecoder<'a>, EMDImportError>
		{
			let caps = revision.capabilities();
			let mut buf = ByteCursor::new(input);

			let directory = directory(&mut buf)?;

			let relpos = match directory.object(OBJ_SKELETON) {
				Some(offset) if caps.relative_positions => relative_positions(&mut buf, offset)?,
				_ => vec![],
			};

			let meshes = directory.object(OBJ_MESHES).ok_or(EMDImportError::MissingObject(OBJ_MESHES))?;
			buf.seek(meshes + 8)?;
			// stored doubled
			let num_submeshes = (buf.read_u32()? / 2) as usize;
			let table_base = buf.tell();

			let texture = match texture {
				Some(tex) if caps.texture_coords && tex.is_empty() => {
					tracing::warn!("Texture is empty, decoding without texture coordinates");
					None
				},
				Some(tex) if caps.texture_coords => Some(tex),
				_ => None,
			};

			tracing::debug!("EMD {}: directory at {:#x}, {} relative position(s), {} submesh(es)",
				revision, directory.offset, relpos.len(), num_submeshes);
			if caps.relative_positions && relpos.len() < num_submeshes {
				tracing::warn!("Only {} of {} submeshes have a relative position, lining up the rest along X",
					relpos.len(), num_submeshes);
			}

			Ok(EmdDecoder {
				buf: buf,
				caps: caps,
				texture: texture,
				directory: directory,
				relative_positions: relpos,
				table_base: table_base,
				num_submeshes: num_submeshes,
			})
		}

		pub fn num_submeshes(&self) -> usize {
			self.num_submeshes
		}

		/// Translation applied to a submesh's vertices. Submeshes past the end of the
		/// relative position table are lined up along X.
		pub fn origin(&self, submesh: usize) -> Vec3 {
			match self.relative_positions.get(submesh) {
				Some(pos) => *pos,
				None => {
					let n = submesh - self.relative_positions.len();
					Vec3::new(n as f32 * FALLBACK_SPACING, 0.0, 0.0)
				},
			}
		}

		pub fn submesh_header(&mut self, submesh: usize) -> Result<SubmeshHeader, EMDImportError> {
			self.buf.seek(self.table_base + submesh * SUBMESH_HEADER_SIZE)?;

			Ok(SubmeshHeader {
				triangles: group(&mut self.buf)?,
				quads: group(&mut self.buf)?,
			})
		}

		fn seek_rel(&mut self, offset: u32) -> Result<(), Truncated> {
			self.buf.seek(self.table_base + offset as usize)
		}

		fn vertices(&mut self, group: &GeometryGroup, origin: Vec3) -> Result<Vec<Vec3>, Truncated> {
			self.seek_rel(group.vertex_offset)?;

			let mut verts = vec![];
			for _ in 0..group.vertex_count {
				verts.push(self.buf.read_svec3(self.caps.vertex_divisor)? + origin);
			}

			Ok(verts)
		}

		/// Texture coordinates for each face of the group, if they can be resolved
		fn uvs(&mut self, group: &GeometryGroup, corners: usize) -> Result<Option<Vec<Vec<Vec2>>>, Truncated> {
			let texture = match self.texture {
				Some(tex) if group.uv_offset != 0 => tex,
				_ => return Ok(None),
			};

			self.seek_rel(group.uv_offset)?;

			let mut uvs = vec![];
			for _ in 0..group.index_count {
				uvs.push(uv_record(&mut self.buf, corners)?.uvs(texture));
			}

			Ok(Some(uvs))
		}

		pub fn decode_submesh(&mut self, submesh: usize) -> Result<Mesh, EMDImportError> {
			let header = self.submesh_header(submesh)?;
			let origin = self.origin(submesh);
			let tris = header.triangles;
			let quads = header.quads;

			let mut mesh = Mesh::new(format!("emd_mesh{}", submesh), submesh);

			if tris.index_count > 0 {
				mesh.vertices = self.vertices(&tris, origin)?;
				let uvs = self.uvs(&tris, 3)?;

				self.seek_rel(tris.index_offset)?;
				for i in 0..(tris.index_count as usize) {
					let mut face = Face::new(Polygon::Triangle(corners::<3>(&mut self.buf, 0)?));
					if let Some(ref uvs) = uvs {
						face = face.with_uvs(uvs[i].clone());
					}
					mesh.faces.push(face);
				}
			}

			if quads.index_count > 0 {
				// The triangle block is only reusable if it was actually read
				let base = if tris.index_count > 0 && !quads.distinct_vertices(&tris) {
					0
				} else {
					let base = mesh.vertices.len();
					let mut verts = self.vertices(&quads, origin)?;
					mesh.vertices.append(&mut verts);
					base
				};

				let uvs = self.uvs(&quads, 4)?;

				self.seek_rel(quads.index_offset)?;
				for i in 0..(quads.index_count as usize) {
					let mut face = Face::new(Polygon::quad_from_strip(corners::<4>(&mut self.buf, base)?));
					if let Some(ref uvs) = uvs {
						let uv = &uvs[i];
						face = face.with_uvs(strip_to_fan([uv[0], uv[1], uv[2], uv[3]]).to_vec());
					}
					mesh.faces.push(face);
				}
			}

			mesh.check_indices().map_err(|e| EMDImportError::FaceIndex {
				submesh: submesh,
				source: e,
			})?;

			Ok(mesh)
		}

		/// Decodes every submesh in order, handing each to `sink` as soon as it is complete.
		/// Returns the number of meshes handed over.
		pub fn stream<S>(&mut self, sink: &mut S) -> Result<usize, EMDImportError>
		where
			S: MeshSink + ?Sized,
		{
			for i in 0..self.num_submeshes {
				let mesh = self.decode_submesh(i)?;
				tracing::debug!("{}: {} vertices, {} faces", mesh.name, mesh.vertices.len(), mesh.faces.len());

				if let ControlFlow::Break(()) = sink.add_mesh(mesh) {
					tracing::debug!("EMD decode stopped by sink after submesh {}", i);
					return Ok(i + 1);
				}
			}

			Ok(self.num_submeshes)
		}
	}
}
