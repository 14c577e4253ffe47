use byteorder::{
	ByteOrder,
	LE
};

use thiserror::Error;
use ultraviolet::vec::Vec3;

/// A read or seek went past the end of the input buffer
#[derive(Clone, Copy, Debug, Error, PartialEq)]
#[error("Truncated input: {wanted} byte(s) at offset {offset}, buffer holds {len}")]
pub struct Truncated {
	pub offset: u64,
	pub wanted: u64,
	pub len: u64,
}

/// Seekable little endian reader over a borrowed byte buffer.
///
/// Unlike [`std::io::Cursor`], seeking past the end of the buffer is an error rather than
/// a deferred failure on the next read, so offset tables can be validated where they are
/// resolved.
#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> ByteCursor<'a> {
	pub fn new(buf: &'a [u8]) -> ByteCursor<'a> {
		ByteCursor {
			buf: buf,
			pos: 0,
		}
	}

	/// Total length of the underlying buffer
	#[inline]
	pub fn len(&self) -> usize {
		self.buf.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	/// Current absolute position
	#[inline]
	pub fn tell(&self) -> usize {
		self.pos
	}

	/// Bytes left between the cursor and the end of the buffer
	#[inline]
	pub fn remaining(&self) -> usize {
		self.buf.len() - self.pos
	}

	/// Moves to an absolute position. Seeking exactly to the end is allowed.
	pub fn seek(&mut self, offset: usize) -> Result<(), Truncated> {
		if offset > self.buf.len() {
			return Err(self.truncated(offset, 0));
		}

		self.pos = offset;
		Ok(())
	}

	/// Moves forward by `n` bytes
	pub fn skip(&mut self, n: usize) -> Result<(), Truncated> {
		self.take(n).map(|_| ())
	}

	/// Returns the next `n` bytes and advances past them
	pub fn take(&mut self, n: usize) -> Result<&'a [u8], Truncated> {
		match self.pos.checked_add(n) {
			Some(end) if end <= self.buf.len() => {
				let bytes = &self.buf[self.pos..end];
				self.pos = end;
				Ok(bytes)
			},
			_ => Err(self.truncated(self.pos, n)),
		}
	}

	#[inline]
	pub fn read_u8(&mut self) -> Result<u8, Truncated> {
		Ok(self.take(1)?[0])
	}

	#[inline]
	pub fn read_u16(&mut self) -> Result<u16, Truncated> {
		Ok(LE::read_u16(self.take(2)?))
	}

	#[inline]
	pub fn read_i16(&mut self) -> Result<i16, Truncated> {
		Ok(LE::read_i16(self.take(2)?))
	}

	#[inline]
	pub fn read_u32(&mut self) -> Result<u32, Truncated> {
		Ok(LE::read_u32(self.take(4)?))
	}

	#[inline]
	pub fn read_i32(&mut self) -> Result<i32, Truncated> {
		Ok(LE::read_i32(self.take(4)?))
	}

	/// Reads a PlayStation fixed point vector of four signed 16-bit values, keeping x, y
	/// and z divided by `divisor`. The fourth value is padding and is dropped.
	pub fn read_svec3(&mut self, divisor: f32) -> Result<Vec3, Truncated> {
		let raw = self.take(8)?;
		let mut v = [0i16; 4];
		LE::read_i16_into(raw, &mut v);

		Ok(Vec3::new(v[0] as f32 / divisor, v[1] as f32 / divisor, v[2] as f32 / divisor))
	}

	fn truncated(&self, offset: usize, wanted: usize) -> Truncated {
		Truncated {
			offset: offset as u64,
			wanted: wanted as u64,
			len: self.buf.len() as u64,
		}
	}
}

#[cfg(test)]
mod tests {
	use ultraviolet::vec::Vec3;

	use super::*;

	#[test]
	fn test_typed_reads() {
		let data = [0x01, 0x34, 0x12, 0xfe, 0xff, 0x78, 0x56, 0x34, 0x12, 0xff, 0xff, 0xff, 0xff];
		let mut cur = ByteCursor::new(&data);

		assert_eq!(1, cur.read_u8().unwrap());
		assert_eq!(0x1234, cur.read_u16().unwrap());
		assert_eq!(-2, cur.read_i16().unwrap());
		assert_eq!(0x12345678, cur.read_u32().unwrap());
		assert_eq!(-1, cur.read_i32().unwrap());
		assert_eq!(data.len(), cur.tell());
		assert_eq!(0, cur.remaining());
	}

	#[test]
	fn test_truncated_read() {
		let data = [0x01, 0x02, 0x03];
		let mut cur = ByteCursor::new(&data);
		cur.seek(2).unwrap();

		let err = cur.read_u16().unwrap_err();
		assert_eq!(Truncated { offset: 2, wanted: 2, len: 3 }, err);
		// a failed read leaves the cursor where it was
		assert_eq!(2, cur.tell());
	}

	#[test]
	fn test_seek_bounds() {
		let data = [0; 8];
		let mut cur = ByteCursor::new(&data);

		assert!(cur.seek(8).is_ok());
		assert!(cur.read_u8().is_err());
		assert!(cur.seek(9).is_err());
		assert_eq!(8, cur.tell());
	}

	#[test]
	fn test_read_svec3() {
		// 256, -512, 100, w = 7
		let data = [0x00, 0x01, 0x00, 0xfe, 0x64, 0x00, 0x07, 0x00];
		let mut cur = ByteCursor::new(&data);

		assert_eq!(Vec3::new(1.0, -2.0, 0.390625), cur.read_svec3(256.0).unwrap());
		assert_eq!(8, cur.tell());
	}
}
