use std::io::{Read, Write};

use image::RgbaImage;

use crate::codec;
use crate::mipmap;
use crate::macros;
use crate::{GameVariant, TplResult, MipmapFilter, TextureFormat};
use crate::TplError::*;
use crate::ReadExt;


/// Extra per-texture descriptor fields carried by the
/// [Dx][crate::HeaderSchema::Dx] header schema.  Preserved verbatim for
/// round-trips; ignored by the standard schema.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DxDescriptor {
	#[allow(missing_docs)]
	pub wrap_s: u32,
	#[allow(missing_docs)]
	pub wrap_t: u32,
	#[allow(missing_docs)]
	pub min_filter: u16,
	#[allow(missing_docs)]
	pub mag_filter: u16,
	/// Trailing record bytes with no known meaning, carried through
	/// unchanged.
	pub reserved: u32,
}


/// One mipmap level: logical dimensions plus the packed on-disk bytes.
///
/// Decoding to RGBA is lazy and memoized; the packed bytes stay the source
/// of truth, so equality and round-trips ignore the decoded cache.
#[derive(Debug, Clone)]
pub struct TplLevel {
	/// Logical (unpadded) width in texels.
	pub width: u16,
	/// Logical (unpadded) height in texels.
	pub height: u16,
	raw: Vec<u8>,
	decoded: Option<RgbaImage>,
}


impl PartialEq for TplLevel {
	fn eq(&self, other: &Self) -> bool {
		self.width == other.width && self.height == other.height && self.raw == other.raw
	}
}


impl Eq for TplLevel {}


impl TplLevel {
	/// Construct a level from packed on-disk bytes.
	pub fn with_raw(width: u16, height: u16, raw: Vec<u8>) -> Self {
		Self { width, height, raw, decoded: None }
	}


	/// The packed on-disk bytes of this level.
	pub fn raw(&self) -> &[u8] {
		&self.raw
	}


	/// Decode this level to RGBA, memoizing the result.  The transition is
	/// one-way: once decoded, the image is returned without re-running the
	/// codec.
	///
	/// # Errors
	/// - [`TextureDataSizeMismatch`]: the packed bytes are shorter than the
	///   tile-padded size for this level's dimensions.
	pub fn decode(&mut self, format: TextureFormat) -> TplResult<&RgbaImage> {
		if self.decoded.is_none() {
			let rgba = codec::decode(&self.raw, format, self.width.into(), self.height.into())?;
			let image = RgbaImage::from_vec(self.width.into(), self.height.into(), rgba)
				.expect("Decoded buffer size mismatch (this is a bug)");
			self.decoded = Some(image);
		};

		Ok(self.decoded.as_ref().unwrap())
	}
}


/// Payload of a defined texture entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
	/// Resolved pixel format; `None` for a raw-format passthrough entry
	/// whose data is carried as one opaque blob.
	pub format: Option<TextureFormat>,
	/// On-disk format code, preserved verbatim for passthrough entries.
	/// Zero when `format` is resolved (the code is then derived from the
	/// target schema at save time).
	pub raw_format: u32,
	/// Level count as declared in the entry header.  Equals `levels.len()`
	/// except for passthrough entries.
	pub declared_levels: u16,
	/// Dx-schema descriptor fields.
	pub dx: DxDescriptor,
	/// Mipmap chain, largest level first.
	pub levels: Vec<TplLevel>,
}


/// One texture slot of a [container][crate::TplContainer].
///
/// The three states are structural rather than sentinel-encoded: an
/// `Undefined` slot reserves an index with no recorded format, an `Empty`
/// entry occupies a header slot with a format code but no data, and a
/// `Defined` entry owns a mipmap chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TplTexture {
	/// Placeholder slot: zero offset, dimensions, level count and format.
	Undefined,

	/// Zero-level entry preserving its raw format code verbatim.
	Empty {
		#[allow(missing_docs)]
		raw_format: u32,
	},

	/// Entry with pixel data.
	Defined(TextureData),
}


impl TplTexture {
	/// Create a zero-level placeholder preserving `raw_format` verbatim
	/// (the code is not required to map to a known [`TextureFormat`]).
	///
	/// An on-disk record with format code 0 and no data is indistinguishable
	/// from an undefined slot, so an `Empty` entry with `raw_format` 0
	/// reloads as [`Undefined`][Self::Undefined].
	pub fn define_empty(raw_format: u32) -> Self {
		Self::Empty { raw_format }
	}


	/// True for [`Defined`][Self::Defined] entries.
	pub fn is_defined(&self) -> bool {
		matches!(self, Self::Defined(_))
	}


	/// Read `level_count` sequential packed level buffers from the current
	/// stream position, sized per the tile-padded rule for each level's
	/// halved dimensions.  Data is stored undecoded; decoding happens on
	/// demand via [`TplTexture::decode_level`].
	///
	/// # Errors
	/// - [`InvalidFormat`]: `raw_format` does not resolve under the game's
	///   header schema (passthrough entries are constructed by the container
	///   through [`TplTexture::load_raw_passthrough`] instead).
	/// - [`UnexpectedEof`], [`UnexpectedIoError`]: reading a level failed.
	pub fn load_texture_data<R: Read>(
		input: &mut R,
		game: GameVariant,
		raw_format: u32,
		width: u16,
		height: u16,
		level_count: u16,
	) -> TplResult<Self> {
		let policy = game.policy();
		let format = TextureFormat::from_code(raw_format, policy.schema)
			.ok_or(InvalidFormat(raw_format))?;

		let mut levels = Vec::with_capacity(level_count.into());

		for index in 0..level_count {
			let (level_w, level_h) = mipmap::level_dimensions(width.into(), height.into(), index.into());
			let take = format.encoded_size(level_w as usize, level_h as usize);

			// The Smb1 I8 packer allocated short smallest levels, so their
			// tile-padded read may run past the end of the final texture.
			let raw = if policy.i8_size_quirk && format == TextureFormat::I8 {
				input.read_zero_padded(take)?
			}
			else {
				input.read_exact_buffered(take)?
			};

			levels.push(TplLevel::with_raw(level_w as u16, level_h as u16, raw));
		};

		macros::log!(trace, "load_texture_data: {:?} {}x{}, {} levels", format, width, height, level_count);

		let data = TextureData {
			format: Some(format),
			raw_format: 0,
			declared_levels: level_count,
			dx: DxDescriptor::default(),
			levels,
		};

		Ok(Self::Defined(data))
	}


	/// Construct a passthrough entry for a format code outside the known
	/// enumeration, carrying `byte_len` bytes as one opaque blob.  Used by
	/// the container for game variants that accept unresolved codes.
	///
	/// # Errors
	/// - [`UnexpectedEof`], [`UnexpectedIoError`]: reading the blob failed.
	pub fn load_raw_passthrough<R: Read>(
		input: &mut R,
		raw_format: u32,
		width: u16,
		height: u16,
		level_count: u16,
		byte_len: usize,
	) -> TplResult<Self> {
		let blob = input.read_exact_buffered(byte_len)?;

		let data = TextureData {
			format: None,
			raw_format,
			declared_levels: level_count,
			dx: DxDescriptor::default(),
			levels: vec![TplLevel::with_raw(width, height, blob)],
		};

		Ok(Self::Defined(data))
	}


	/// Build a defined entry by generating `level_count` mipmap levels from
	/// `image` and encoding each with the format's codec.
	///
	/// # Errors
	/// - [`TextureTooLarge`]: a dimension overflows a `u16`.
	pub fn from_image(image: &RgbaImage, format: TextureFormat, level_count: usize, filter: MipmapFilter) -> TplResult<Self> {
		let chain = mipmap::generate_chain(image, level_count, filter);
		Self::from_chain(&chain, format)
	}


	/// Build a defined entry from a level-0 image plus externally supplied
	/// lower-resolution levels (no resampling).
	///
	/// # Errors
	/// - [`MipmapCountMismatch`], [`MipmapDimensionMismatch`]: the supplied
	///   levels do not form a valid chain of `level_count` levels.
	/// - [`TextureTooLarge`]: a dimension overflows a `u16`.
	pub fn from_supplied_images(level0: RgbaImage, supplied: Vec<RgbaImage>, format: TextureFormat, level_count: usize) -> TplResult<Self> {
		let chain = mipmap::chain_with_supplied(level0, supplied, level_count)?;
		Self::from_chain(&chain, format)
	}


	fn from_chain(chain: &[RgbaImage], format: TextureFormat) -> TplResult<Self> {
		let mut levels = Vec::with_capacity(chain.len());

		for image in chain {
			let width: u16 = image.width().try_into().map_err(|_| TextureTooLarge)?;
			let height: u16 = image.height().try_into().map_err(|_| TextureTooLarge)?;
			let raw = codec::encode(image.as_raw(), format, width.into(), height.into())?;
			levels.push(TplLevel::with_raw(width, height, raw));
		};

		let declared_levels = levels.len().try_into().map_err(|_| TextureTooLarge)?;

		let data = TextureData {
			format: Some(format),
			raw_format: 0,
			declared_levels,
			dx: DxDescriptor::default(),
			levels,
		};

		Ok(Self::Defined(data))
	}


	/// Number of materialized mipmap levels (0 for placeholder slots).
	pub fn level_count(&self) -> usize {
		match self {
			Self::Defined(data) => data.levels.len(),
			_ => 0,
		}
	}


	/// Width of mipmap level `index`.
	///
	/// # Errors
	/// - [`MipmapIndexOutOfRange`]: `index` does not name a level.
	pub fn width_of_level(&self, index: usize) -> TplResult<u16> {
		self.level(index).map(|l| l.width)
	}


	/// Height of mipmap level `index`.
	///
	/// # Errors
	/// - [`MipmapIndexOutOfRange`]: `index` does not name a level.
	pub fn height_of_level(&self, index: usize) -> TplResult<u16> {
		self.level(index).map(|l| l.height)
	}


	fn level(&self, index: usize) -> TplResult<&TplLevel> {
		match self {
			Self::Defined(data) => data.levels.get(index).ok_or(MipmapIndexOutOfRange),
			_ => Err(MipmapIndexOutOfRange),
		}
	}


	/// Decode mipmap level `index` to RGBA on demand (lazy, memoized).
	///
	/// # Errors
	/// - [`MipmapIndexOutOfRange`]: `index` does not name a level.
	/// - [`UnsupportedFormat`]: the entry is a raw-format passthrough whose
	///   code has no codec.
	pub fn decode_level(&mut self, index: usize) -> TplResult<&RgbaImage> {
		match self {
			Self::Defined(data) => {
				let format = data.format.ok_or(UnsupportedFormat(data.raw_format))?;
				data.levels.get_mut(index).ok_or(MipmapIndexOutOfRange)?.decode(format)
			},

			_ => Err(MipmapIndexOutOfRange),
		}
	}


	/// Serialized byte count of this entry's data without materializing it.
	/// Placeholder slots contribute zero.
	///
	/// For [`GameVariant::Smb1`] I8 entries this reproduces the original
	/// packer's size miscalculation (see [`defective_i8_level_size`]) so
	/// that offsets match existing game assets byte for byte.
	pub fn size_of_texture_data(&self, game: GameVariant) -> usize {
		let data = match self {
			Self::Defined(data) => data,
			_ => return 0,
		};

		let format = match data.format {
			Some(format) => format,
			None => return data.levels.iter().map(|l| l.raw.len()).sum(),
		};

		let policy = game.policy();

		data.levels
			.iter()
			.map(|level| {
				if policy.i8_size_quirk && format == TextureFormat::I8 {
					defective_i8_level_size(level.width.into(), level.height.into())
				}
				else {
					format.encoded_size(level.width.into(), level.height.into())
				}
			})
			.sum()
	}


	/// Stream this entry's packed data, in level order.  Under the Smb1 I8
	/// size defect the written byte count is truncated to
	/// [`size_of_texture_data`][Self::size_of_texture_data], matching the
	/// original packer's output.
	///
	/// # Errors
	/// - [`UnexpectedIoError`]: writing failed.
	pub fn save_texture_data<W: Write>(&self, output: &mut W, game: GameVariant) -> TplResult<usize> {
		let data = match self {
			Self::Defined(data) => data,
			_ => return Ok(0),
		};

		let mut bytes: Vec<u8> = Vec::with_capacity(self.size_of_texture_data(game));

		for level in &data.levels {
			bytes.extend(&level.raw);
		};

		bytes.truncate(self.size_of_texture_data(game));
		output.write_all(&bytes)?;

		Ok(bytes.len())
	}
}


/// Byte count the original Smb1 asset packer allocated for an I8 level:
/// the height is rounded *down* to the 4-row tile height instead of up, so
/// a level shorter than one tile row is allocated nothing.  Kept bit-exact
/// for round-trip compatibility with existing assets; every other
/// format/game combination uses [`TextureFormat::encoded_size`].
pub fn defective_i8_level_size(width: usize, height: usize) -> usize {
	codec::round_up(width, 8) * codec::round_down(height, 4)
}


#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;


	#[test]
	fn empty_placeholder_preserves_raw_format_and_is_weightless() {
		let empty = TplTexture::define_empty(7);

		assert!(matches!(empty, TplTexture::Empty { raw_format: 7 }));
		assert_eq!(empty.level_count(), 0);
		assert_eq!(empty.size_of_texture_data(GameVariant::Smb2), 0);
		assert_eq!(TplTexture::Undefined.size_of_texture_data(GameVariant::Smb2), 0);
	}


	#[test]
	fn load_reads_tile_padded_level_sizes() {
		// Rgb565 16x16 with 3 levels: 512 + 128 + 32 (4x4 floor) bytes.
		let bytes = vec![0xABu8; 512 + 128 + 32];
		let mut cursor = Cursor::new(&bytes[..]);

		let texture = TplTexture::load_texture_data(&mut cursor, GameVariant::Smb2, 4, 16, 16, 3).unwrap();

		assert_eq!(texture.level_count(), 3);
		assert_eq!(texture.width_of_level(0).unwrap(), 16);
		assert_eq!(texture.width_of_level(2).unwrap(), 4);
		assert_eq!(texture.size_of_texture_data(GameVariant::Smb2), bytes.len());
		assert_eq!(cursor.position(), bytes.len() as u64);

		assert!(matches!(texture.width_of_level(3), Err(MipmapIndexOutOfRange)));
	}


	#[test]
	fn unknown_code_is_invalid_outside_passthrough() {
		let mut cursor = Cursor::new(&[][..]);
		let result = TplTexture::load_texture_data(&mut cursor, GameVariant::Smb2, 99, 8, 8, 1);
		assert!(matches!(result, Err(InvalidFormat(99))));
	}


	#[test]
	fn decode_level_is_memoized() {
		let packed = vec![0x40u8; TextureFormat::I8.encoded_size(8, 4)];
		let mut cursor = Cursor::new(&packed[..]);
		let mut texture = TplTexture::load_texture_data(&mut cursor, GameVariant::Smb2, 1, 8, 4, 1).unwrap();

		let first = texture.decode_level(0).unwrap().clone();
		let second = texture.decode_level(0).unwrap();
		assert_eq!(&first, second);
		assert_eq!(first.dimensions(), (8, 4));
		assert!(first.pixels().all(|p| p.0 == [0x40, 0x40, 0x40, 0x40]));
	}


	#[test]
	fn from_image_builds_halved_chain() {
		let image = RgbaImage::from_pixel(16, 16, image::Rgba([0x20, 0x20, 0x20, 0xFF]));
		let texture = TplTexture::from_image(&image, TextureFormat::I8, 3, MipmapFilter::Nearest).unwrap();

		assert_eq!(texture.level_count(), 3);
		assert_eq!(texture.width_of_level(1).unwrap(), 8);
		assert_eq!(texture.height_of_level(2).unwrap(), 4);
		assert_eq!(
			texture.size_of_texture_data(GameVariant::Smb2),
			256 + 64 + 32
		);
	}


	// The Smb1 I8 size defect is a known, accepted deviation inherited from
	// the original packer, not a bug to correct: the sub-tile smallest level
	// is allocated zero bytes there.
	#[test]
	fn smb1_i8_defect_shrinks_subtile_levels() {
		let image = RgbaImage::from_pixel(8, 8, image::Rgba([0x80, 0x80, 0x80, 0xFF]));
		let texture = TplTexture::from_image(&image, TextureFormat::I8, 3, MipmapFilter::Nearest).unwrap();

		// Correct sizes: 64 + 32 + 32; the 2x2 tail level collapses to 0
		// under the defective rounding.
		assert_eq!(texture.size_of_texture_data(GameVariant::Smb2), 64 + 32 + 32);
		assert_eq!(texture.size_of_texture_data(GameVariant::Smb1), 64 + 32);

		let mut smb1 = Vec::new();
		texture.save_texture_data(&mut smb1, GameVariant::Smb1).unwrap();
		assert_eq!(smb1.len(), 64 + 32);

		let mut smb2 = Vec::new();
		texture.save_texture_data(&mut smb2, GameVariant::Smb2).unwrap();
		assert_eq!(smb2.len(), 64 + 32 + 32);

		assert_eq!(defective_i8_level_size(2, 2), 0);
		assert_eq!(defective_i8_level_size(8, 4), 32);
		assert_eq!(defective_i8_level_size(8, 8), 64);
	}


	#[test]
	fn smb1_i8_reader_pads_at_eof() {
		// 8x8 with 3 levels saved under the defect is 96 bytes; the reader
		// still consumes tile-padded sizes and zero-fills past the end.
		let bytes = vec![0x11u8; 96];
		let mut cursor = Cursor::new(&bytes[..]);

		let texture = TplTexture::load_texture_data(&mut cursor, GameVariant::Smb1, 1, 8, 8, 3).unwrap();

		assert_eq!(texture.level_count(), 3);
		assert_eq!(texture.width_of_level(2).unwrap(), 2);
	}
}
