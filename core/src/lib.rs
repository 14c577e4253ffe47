#[cfg(feature = "io_ext")]
pub mod io_ext;

pub mod scene;
pub mod texture;

/// Scales a 5 bit value to 8 bits by replicating the high bits into the low ones
pub const fn scale5to8(b: u8) -> u8 {
	b << 3 | b >> 2
}
