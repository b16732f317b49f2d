#[cfg(feature = "fuzz")] use arbitrary::Arbitrary;
use deku::prelude::*;
use enum_utils::FromStr;
use static_assertions::const_assert;
use texpresso::Format as DxtFormat;

use crate::TplResult;
use crate::TplError::*;
use crate::HeaderSchema;


/// Pixel encoding of a single texture entry, shared by all of its mipmap
/// levels.
///
/// The on-disk format code differs between the [standard][HeaderSchema::Standard]
/// and [Dx][HeaderSchema::Dx] header schemas; see [`TextureFormat::from_code`]
/// and [`TextureFormat::to_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromStr)]
#[cfg_attr(feature = "fuzz", derive(Arbitrary))]
#[enumeration(case_insensitive)]
pub enum TextureFormat {
	/// 4-bit intensity, replicated to R, G, B and A; 8x8 texel tiles.
	I4,

	/// 8-bit intensity, replicated to R, G, B and A; 8x4 texel tiles.
	I8,

	/// 4-bit alpha + 4-bit intensity in one byte (alpha in the high nibble);
	/// 8x4 texel tiles.
	Ia4,

	/// 8-bit alpha + 8-bit intensity in a big-endian u16 (alpha in the high
	/// byte); 4x4 texel tiles.
	Ia8,

	/// RGB 5:6:5 in a big-endian u16, always opaque; 4x4 texel tiles.
	Rgb565,

	/// Big-endian u16 with an MSB mode flag: RGB 5:5:5 opaque when set,
	/// ARGB 3:4:4:4 when clear; 4x4 texel tiles.
	Rgb5A3,

	/// Full RGBA 8:8:8:8 split into an A,R half-tile followed by a G,B
	/// half-tile; 4x4 texel tiles, 64 bytes each.
	Rgba8,

	/// Block-compressed true color: 8x8 texel tiles of four DXT1 sub-blocks
	/// with big-endian color words and reversed selector bit pairs.
	Cmpr,
}


impl TextureFormat {
	/// Bits consumed by one texel in the packed representation.
	pub const fn bits_per_pixel(self) -> usize {
		use TextureFormat::*;

		match self {
			I4 | Cmpr => 4,
			I8 | Ia4 => 8,
			Ia8 | Rgb565 | Rgb5A3 => 16,
			Rgba8 => 32,
		}
	}


	/// Tile granularity in texels, `(width, height)`.  Packed data is laid
	/// out tile by tile, row-major, and is always padded up to whole tiles.
	pub const fn tile_size(self) -> (usize, usize) {
		use TextureFormat::*;

		match self {
			I4 | Cmpr => (8, 8),
			I8 | Ia4 => (8, 4),
			Ia8 | Rgb565 | Rgb5A3 | Rgba8 => (4, 4),
		}
	}


	/// Packed byte count of one mipmap level with the given logical
	/// dimensions, tile padding included.
	pub const fn encoded_size(self, width: usize, height: usize) -> usize {
		const_assert!(std::mem::size_of::<usize>() >= 4);

		let (tile_w, tile_h) = self.tile_size();
		round_up(width, tile_w) * round_up(height, tile_h) * self.bits_per_pixel() / 8
	}


	/// Resolve an on-disk format code under the given header schema.
	/// Returns `None` for codes outside the known enumeration.
	pub fn from_code(code: u32, schema: HeaderSchema) -> Option<Self> {
		use TextureFormat::*;

		let format = match (schema, code) {
			(HeaderSchema::Standard, 0) => I4,
			(HeaderSchema::Standard, 1) => I8,
			(HeaderSchema::Standard, 2) => Ia4,
			(HeaderSchema::Standard, 3) => Ia8,
			(HeaderSchema::Standard, 4) => Rgb565,
			(HeaderSchema::Standard, 5) => Rgb5A3,
			(HeaderSchema::Standard, 6) => Rgba8,
			(HeaderSchema::Standard, 14) => Cmpr,

			(HeaderSchema::Dx, 0) => Rgba8,
			(HeaderSchema::Dx, 1) => Rgb5A3,
			(HeaderSchema::Dx, 2) => Rgb565,
			(HeaderSchema::Dx, 3) => Ia8,
			(HeaderSchema::Dx, 4) => Ia4,
			(HeaderSchema::Dx, 5) => I8,
			(HeaderSchema::Dx, 6) => I4,
			(HeaderSchema::Dx, 7) => Cmpr,

			_ => return None,
		};

		Some(format)
	}


	/// The on-disk format code of `self` under the given header schema.
	pub const fn to_code(self, schema: HeaderSchema) -> u32 {
		use TextureFormat::*;

		match (schema, self) {
			(HeaderSchema::Standard, I4) => 0,
			(HeaderSchema::Standard, I8) => 1,
			(HeaderSchema::Standard, Ia4) => 2,
			(HeaderSchema::Standard, Ia8) => 3,
			(HeaderSchema::Standard, Rgb565) => 4,
			(HeaderSchema::Standard, Rgb5A3) => 5,
			(HeaderSchema::Standard, Rgba8) => 6,
			(HeaderSchema::Standard, Cmpr) => 14,

			(HeaderSchema::Dx, Rgba8) => 0,
			(HeaderSchema::Dx, Rgb5A3) => 1,
			(HeaderSchema::Dx, Rgb565) => 2,
			(HeaderSchema::Dx, Ia8) => 3,
			(HeaderSchema::Dx, Ia4) => 4,
			(HeaderSchema::Dx, I8) => 5,
			(HeaderSchema::Dx, I4) => 6,
			(HeaderSchema::Dx, Cmpr) => 7,
		}
	}
}


pub(crate) const fn round_up(value: usize, to: usize) -> usize {
	(value + to - 1) / to * to
}


pub(crate) const fn round_down(value: usize, to: usize) -> usize {
	value / to * to
}


/// Decode one packed mipmap level into an RGBA8888 buffer of the *logical*
/// (unpadded) `width`x`height`.
///
/// # Errors
/// - [`TextureDataSizeMismatch`]: `packed` is shorter than
///   [`TextureFormat::encoded_size`] for the given dimensions.
pub fn decode(packed: &[u8], format: TextureFormat, width: usize, height: usize) -> TplResult<Vec<u8>> {
	use TextureFormat::*;

	if packed.len() < format.encoded_size(width, height) {
		return Err(TextureDataSizeMismatch(width, height, packed.len()));
	};

	let mut rgba = vec![0u8; width * height * 4];

	let mut put = |x: usize, y: usize, texel: [u8; 4]| {
		if x < width && y < height {
			rgba[(y * width + x) * 4..][..4].copy_from_slice(&texel);
		};
	};

	match format {
		I4 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			let byte = packed[i / 2];
			let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
			let v = widen(nibble, 4);
			put(x, y, [v, v, v, v]);
		}),

		I8 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			let v = packed[i];
			put(x, y, [v, v, v, v]);
		}),

		Ia4 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			let a = widen(packed[i] >> 4, 4);
			let v = widen(packed[i] & 0x0F, 4);
			put(x, y, [v, v, v, a]);
		}),

		Ia8 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			let a = packed[i * 2];
			let v = packed[i * 2 + 1];
			put(x, y, [v, v, v, a]);
		}),

		Rgb565 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			put(x, y, Rgb565Pixel::from_be_bytes(&packed[i * 2..][..2]).to_rgba8());
		}),

		Rgb5A3 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			put(x, y, Rgb5A3Pixel::from_be_bytes(&packed[i * 2..][..2]).to_rgba8());
		}),

		Rgba8 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			let base = i / 16 * 64;
			let t = i % 16;
			let a = packed[base + 2 * t];
			let r = packed[base + 2 * t + 1];
			let g = packed[base + 32 + 2 * t];
			let b = packed[base + 32 + 2 * t + 1];
			put(x, y, [r, g, b, a]);
		}),

		Cmpr => decode_cmpr(packed, width, height, &mut put),
	};

	Ok(rgba)
}


/// Encode an RGBA8888 buffer of the logical `width`x`height` into the packed
/// on-disk representation, sized to the tile-padded dimensions.  Texels in
/// the padding area encode as zero.
///
/// # Errors
/// - [`TextureDataSizeMismatch`]: `rgba.len()` is not `width * height * 4`.
pub fn encode(rgba: &[u8], format: TextureFormat, width: usize, height: usize) -> TplResult<Vec<u8>> {
	use TextureFormat::*;

	if rgba.len() != width * height * 4 {
		return Err(TextureDataSizeMismatch(width, height, rgba.len()));
	};

	let mut packed = vec![0u8; format.encoded_size(width, height)];

	let get = |x: usize, y: usize| -> [u8; 4] {
		if x < width && y < height {
			rgba[(y * width + x) * 4..][..4].try_into().unwrap()
		}
		else {
			[0, 0, 0, 0]
		}
	};

	match format {
		I4 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			let [r, g, b, _] = get(x, y);
			let nibble = narrow(intensity(r, g, b), 4);
			if i % 2 == 0 { packed[i / 2] |= nibble << 4; } else { packed[i / 2] |= nibble; };
		}),

		I8 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			let [r, g, b, _] = get(x, y);
			packed[i] = intensity(r, g, b);
		}),

		Ia4 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			let [r, g, b, a] = get(x, y);
			packed[i] = (narrow(a, 4) << 4) | narrow(intensity(r, g, b), 4);
		}),

		Ia8 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			let [r, g, b, a] = get(x, y);
			packed[i * 2] = a;
			packed[i * 2 + 1] = intensity(r, g, b);
		}),

		Rgb565 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			packed[i * 2..][..2].copy_from_slice(&Rgb565Pixel::from_rgba8(get(x, y)).to_be_bytes());
		}),

		Rgb5A3 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			packed[i * 2..][..2].copy_from_slice(&Rgb5A3Pixel::from_rgba8(get(x, y)).to_be_bytes());
		}),

		Rgba8 => walk_tiles(width, height, format.tile_size(), |i, x, y| {
			let base = i / 16 * 64;
			let t = i % 16;
			let [r, g, b, a] = get(x, y);
			packed[base + 2 * t] = a;
			packed[base + 2 * t + 1] = r;
			packed[base + 32 + 2 * t] = g;
			packed[base + 32 + 2 * t + 1] = b;
		}),

		Cmpr => encode_cmpr(&mut packed, width, height, &get),
	};

	Ok(packed)
}


/// Visit every texel position of the tile-padded area in packed stream
/// order: tiles row-major, texels row-major within each tile.  `visit`
/// receives the linear texel index into the padded stream and the texel's
/// x/y in image space (which may lie in the padding area).
fn walk_tiles(width: usize, height: usize, (tile_w, tile_h): (usize, usize), mut visit: impl FnMut(usize, usize, usize)) {
	let tiles_x = round_up(width, tile_w) / tile_w;
	let tiles_y = round_up(height, tile_h) / tile_h;
	let mut index = 0usize;

	for ty in 0..tiles_y {
		for tx in 0..tiles_x {
			for py in 0..tile_h {
				for px in 0..tile_w {
					visit(index, tx * tile_w + px, ty * tile_h + py);
					index += 1;
				};
			};
		};
	};
}


/// Quadrant origins of the four DXT1 sub-blocks within an 8x8 CMPR tile,
/// in stream order.
const CMPR_QUADRANTS: [(usize, usize); 4] = [(0, 0), (4, 0), (0, 4), (4, 4)];


fn decode_cmpr(packed: &[u8], width: usize, height: usize, put: &mut impl FnMut(usize, usize, [u8; 4])) {
	let tiles_x = round_up(width, 8) / 8;
	let tiles_y = round_up(height, 8) / 8;

	for ty in 0..tiles_y {
		for tx in 0..tiles_x {
			let tile_base = (ty * tiles_x + tx) * 32;

			for (q, (sx, sy)) in CMPR_QUADRANTS.iter().enumerate() {
				let block: [u8; 8] = packed[tile_base + q * 8..][..8].try_into().unwrap();
				let dxt1 = cmpr_block_to_dxt1(&block);

				let mut texels = [0u8; 4 * 4 * 4];
				DxtFormat::Bc1.decompress(&dxt1, 4, 4, &mut texels);

				for py in 0..4 {
					for px in 0..4 {
						let texel = texels[(py * 4 + px) * 4..][..4].try_into().unwrap();
						put(tx * 8 + sx + px, ty * 8 + sy + py, texel);
					};
				};
			};
		};
	};
}


fn encode_cmpr(packed: &mut [u8], width: usize, height: usize, get: &impl Fn(usize, usize) -> [u8; 4]) {
	let tiles_x = round_up(width, 8) / 8;
	let tiles_y = round_up(height, 8) / 8;

	for ty in 0..tiles_y {
		for tx in 0..tiles_x {
			let tile_base = (ty * tiles_x + tx) * 32;

			for (q, (sx, sy)) in CMPR_QUADRANTS.iter().enumerate() {
				let mut texels = [0u8; 4 * 4 * 4];

				for py in 0..4 {
					for px in 0..4 {
						let texel = get(tx * 8 + sx + px, ty * 8 + sy + py);
						texels[(py * 4 + px) * 4..][..4].copy_from_slice(&texel);
					};
				};

				let mut dxt1 = [0u8; 8];
				DxtFormat::Bc1.compress(&texels, 4, 4, texpresso::Params::default(), &mut dxt1);

				packed[tile_base + q * 8..][..8].copy_from_slice(&cmpr_block_to_dxt1(&dxt1));
			};
		};
	};
}


/// Convert one 8-byte block between the console CMPR layout and PC DXT1:
/// byte-swap the two color words and reverse the 2-bit selector fields of
/// each index byte.  The transform is its own inverse.
fn cmpr_block_to_dxt1(block: &[u8; 8]) -> [u8; 8] {
	[
		block[1], block[0],
		block[3], block[2],
		reverse_selector_pairs(block[4]),
		reverse_selector_pairs(block[5]),
		reverse_selector_pairs(block[6]),
		reverse_selector_pairs(block[7]),
	]
}


fn reverse_selector_pairs(byte: u8) -> u8 {
	(byte >> 6) | ((byte >> 2) & 0x0C) | ((byte << 2) & 0x30) | (byte << 6)
}


const fn uint_range(width: u8) -> u16 {
	(1u16 << width) - 1
}


/// Widen a `from_width`-bit channel value to 8 bits with symmetric rounding.
fn widen(value: u8, from_width: u8) -> u8 {
	let range = uint_range(from_width);
	((value as u16 * 0xFF + range / 2) / range) as u8
}


/// Narrow an 8-bit channel value to `into_width` bits with symmetric rounding.
fn narrow(value: u8, into_width: u8) -> u8 {
	let range = uint_range(into_width);
	((value as u16 * range + 0x7F) / 0xFF) as u8
}


fn intensity(r: u8, g: u8, b: u8) -> u8 {
	((u16::from(r) + u16::from(g) + u16::from(b) + 1) / 3) as u8
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead, DekuWrite)]
pub(crate) struct Rgb565Pixel {
	#[deku(bits = "5")]
	r: u8,
	#[deku(bits = "6")]
	g: u8,
	#[deku(bits = "5")]
	b: u8,
}


impl Rgb565Pixel {
	fn from_be_bytes(bytes: &[u8]) -> Self {
		let (_, pixel) = Self::from_bytes((bytes, 0)).unwrap();
		pixel
	}


	fn to_be_bytes(self) -> Vec<u8> {
		self.to_bytes().unwrap()
	}


	fn to_rgba8(self) -> [u8; 4] {
		[widen(self.r, 5), widen(self.g, 6), widen(self.b, 5), 0xFF]
	}


	fn from_rgba8([r, g, b, _]: [u8; 4]) -> Self {
		Self { r: narrow(r, 5), g: narrow(g, 6), b: narrow(b, 5) }
	}
}


/// The two texel modes of RGB5A3, distinguished by the most significant bit
/// of the big-endian u16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(type = "u8", bits = "1")]
pub(crate) enum Rgb5A3Pixel {
	#[deku(id = "0b1")]
	Opaque {
		#[deku(bits = "5")]
		r: u8,
		#[deku(bits = "5")]
		g: u8,
		#[deku(bits = "5")]
		b: u8,
	},

	#[deku(id = "0b0")]
	Translucent {
		#[deku(bits = "3")]
		a: u8,
		#[deku(bits = "4")]
		r: u8,
		#[deku(bits = "4")]
		g: u8,
		#[deku(bits = "4")]
		b: u8,
	},
}


impl Rgb5A3Pixel {
	/// Alpha values at or above this encode as the opaque 5:5:5 mode.
	const OPAQUE_THRESHOLD: u8 = 0xE0;


	fn from_be_bytes(bytes: &[u8]) -> Self {
		let (_, pixel) = Self::from_bytes((bytes, 0)).unwrap();
		pixel
	}


	fn to_be_bytes(self) -> Vec<u8> {
		self.to_bytes().unwrap()
	}


	fn to_rgba8(self) -> [u8; 4] {
		match self {
			Self::Opaque { r, g, b } => [widen(r, 5), widen(g, 5), widen(b, 5), 0xFF],
			Self::Translucent { a, r, g, b } => [widen(r, 4), widen(g, 4), widen(b, 4), widen(a, 3)],
		}
	}


	fn from_rgba8([r, g, b, a]: [u8; 4]) -> Self {
		if a >= Self::OPAQUE_THRESHOLD {
			Self::Opaque { r: narrow(r, 5), g: narrow(g, 5), b: narrow(b, 5) }
		}
		else {
			Self::Translucent { a: narrow(a, 3), r: narrow(r, 4), g: narrow(g, 4), b: narrow(b, 4) }
		}
	}
}


#[test]
fn encoded_size_follows_tile_padding() {
	use TextureFormat::*;

	assert_eq!(I4.encoded_size(8, 8), 32);
	assert_eq!(I4.encoded_size(5, 3), 32);
	assert_eq!(I8.encoded_size(8, 4), 32);
	assert_eq!(I8.encoded_size(1, 1), 32);
	assert_eq!(Ia8.encoded_size(4, 4), 32);
	assert_eq!(Rgb565.encoded_size(160, 112), 160 * 112 * 2);
	assert_eq!(Rgb5A3.encoded_size(6, 6), 8 * 8 * 2);
	assert_eq!(Rgba8.encoded_size(4, 4), 64);
	assert_eq!(Cmpr.encoded_size(64, 64), 64 * 64 / 2);
	assert_eq!(Cmpr.encoded_size(1, 1), 32);
}


#[test]
fn format_codes_round_trip_per_schema() {
	use TextureFormat::*;

	for schema in [HeaderSchema::Standard, HeaderSchema::Dx] {
		for format in [I4, I8, Ia4, Ia8, Rgb565, Rgb5A3, Rgba8, Cmpr] {
			assert_eq!(TextureFormat::from_code(format.to_code(schema), schema), Some(format));
		};
	};

	assert_eq!(TextureFormat::from_code(7, HeaderSchema::Standard), None);
	assert_eq!(TextureFormat::from_code(14, HeaderSchema::Dx), None);
}


#[test]
fn i8_decode_strips_tile_padding() {
	let packed = vec![0x80u8; TextureFormat::I8.encoded_size(10, 5)];
	let rgba = decode(&packed, TextureFormat::I8, 10, 5).unwrap();
	assert_eq!(rgba.len(), 10 * 5 * 4);
	assert!(rgba.iter().all(|&b| b == 0x80));
}


#[test]
fn i8_encode_decode_is_lossless_for_gray() {
	let width = 8;
	let height = 4;
	let rgba: Vec<u8> = (0..width * height)
		.flat_map(|i| { let v = (i * 8) as u8; [v, v, v, v] })
		.collect();

	let packed = encode(&rgba, TextureFormat::I8, width, height).unwrap();
	assert_eq!(packed.len(), 32);
	assert_eq!(decode(&packed, TextureFormat::I8, width, height).unwrap(), rgba);
}


#[test]
fn i4_packs_high_nibble_first() {
	let mut rgba = vec![0u8; 8 * 8 * 4];
	rgba[0..4].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);

	let packed = encode(&rgba, TextureFormat::I4, 8, 8).unwrap();
	assert_eq!(packed[0], 0xF0);
}


#[test]
fn rgb565_known_texels() {
	let red = decode(&[0xF8, 0x00].repeat(16), TextureFormat::Rgb565, 4, 4).unwrap();
	assert_eq!(&red[0..4], &[0xFF, 0x00, 0x00, 0xFF]);

	let packed = encode(&[0x00, 0xFF, 0x00, 0xFF].repeat(16), TextureFormat::Rgb565, 4, 4).unwrap();
	assert_eq!(&packed[0..2], &[0x07, 0xE0]);
}


#[test]
fn rgb5a3_mode_flag() {
	// MSB set: opaque 5:5:5 white.
	let opaque = decode(&[0xFF, 0xFF].repeat(16), TextureFormat::Rgb5A3, 4, 4).unwrap();
	assert_eq!(&opaque[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);

	// MSB clear: 3:4:4:4 with zero alpha.
	let clear = decode(&[0x0F, 0xFF].repeat(16), TextureFormat::Rgb5A3, 4, 4).unwrap();
	assert_eq!(&clear[0..4], &[0xFF, 0xFF, 0xFF, 0x00]);

	let translucent = encode(&[0xFF, 0x00, 0x00, 0x80].repeat(16), TextureFormat::Rgb5A3, 4, 4).unwrap();
	assert_eq!(translucent[0] & 0x80, 0x00);

	let solid = encode(&[0xFF, 0x00, 0x00, 0xFF].repeat(16), TextureFormat::Rgb5A3, 4, 4).unwrap();
	assert_eq!(solid[0] & 0x80, 0x80);
}


#[test]
fn rgba8_tile_split() {
	let rgba: Vec<u8> = [0x11, 0x22, 0x33, 0x44].repeat(16);
	let packed = encode(&rgba, TextureFormat::Rgba8, 4, 4).unwrap();

	assert_eq!(packed.len(), 64);
	assert_eq!(&packed[0..2], &[0x44, 0x11]);
	assert_eq!(&packed[32..34], &[0x22, 0x33]);
	assert_eq!(decode(&packed, TextureFormat::Rgba8, 4, 4).unwrap(), rgba);
}


#[test]
fn selector_pair_reversal_is_involutive() {
	assert_eq!(reverse_selector_pairs(0b11_10_01_00), 0b00_01_10_11);

	for byte in 0..=255u8 {
		assert_eq!(reverse_selector_pairs(reverse_selector_pairs(byte)), byte);
	};
}


#[test]
fn cmpr_solid_color_survives_round_trip() {
	let rgba = [0xFF, 0x00, 0x00, 0xFF].repeat(8 * 8);
	let packed = encode(&rgba, TextureFormat::Cmpr, 8, 8).unwrap();
	assert_eq!(packed.len(), 32);
	assert_eq!(decode(&packed, TextureFormat::Cmpr, 8, 8).unwrap(), rgba);
}


#[test]
fn short_input_is_rejected() {
	assert!(matches!(
		decode(&[0u8; 4], TextureFormat::Rgb565, 4, 4),
		Err(TextureDataSizeMismatch(4, 4, 4))
	));
}
