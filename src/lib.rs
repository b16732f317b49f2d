#![warn(missing_docs, unreachable_pub, clippy::all)]
#![allow(clippy::wildcard_imports, clippy::enum_glob_use)]
#![warn(clippy::missing_errors_doc, clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]


#![doc = include_str!("../README.md")]


mod macros;
mod codec;
mod texture;
mod mipmap;

pub use codec::*;
pub use texture::*;
pub use mipmap::*;


use std::io::{Read, Seek, SeekFrom, Write, Cursor};
use std::iter::Extend;

#[cfg(feature = "fuzz")] use arbitrary::Arbitrary;
use byteorder::{BigEndian, LittleEndian, ByteOrder, ReadBytesExt};
use derive_more::{Display, Error};
use enum_utils::FromStr;
use static_assertions::const_assert;
#[cfg(test)] use static_assertions::assert_impl_all;

use TplError::*;


/// [`std::result::Result`] parameterized with [`TplError`].
pub type TplResult<T> = std::result::Result<T, TplError>;


/// `gx_tpl`'s [`std::error::Error`] implementation.
#[derive(Debug, Display, Error, Clone)]
#[non_exhaustive]
pub enum TplError {
	/// A function that reads from [`std::io::Read`] encountered early EOF.
	#[display(fmt = "Unexpected end of input file")]
	UnexpectedEof,

	/// Unexpected I/O error other than early EOF.
	#[display(fmt = "Unexpected I/O error: {}", _0)]
	UnexpectedIoError(#[error(ignore)] std::io::ErrorKind),

	/// Unexpected integer conversion failure.
	#[display(fmt = "Unexpected integer conversion error: {}", _0)]
	UnexpectedTryFromIntError(std::num::TryFromIntError),

	/// The leading magic tag required by the game variant is missing.
	#[display(fmt = "Unknown container magic: {:02x?}", _0)]
	UnexpectedMagic(#[error(ignore)] [u8; 4]),

	/// An entry header's check value differs from the variant's expected
	/// value.  Members are the found and the expected value.
	#[error(ignore)]
	#[display(fmt = "Unexpected entry check value {:#06x} (expected {:#06x})", _0, _1)]
	UnexpectedCheckValue(u16, u16),

	/// An entry header mixes zero and non-zero offset/width/height/level
	/// fields.  Member is the entry index.
	#[display(fmt = "Inconsistent header field combination in entry {}", _0)]
	InconsistentEntryHeader(#[error(ignore)] usize),

	/// An encode/decode was requested for an entry carried as a verbatim
	/// blob under an unresolved format code.
	#[display(fmt = "No codec for raw format code {:#x}", _0)]
	UnsupportedFormat(#[error(ignore)] u32),

	/// A defined entry's format code does not resolve to a known codec and
	/// the game variant does not accept raw-format passthrough.
	#[display(fmt = "Unknown format code {:#x} for a defined entry", _0)]
	InvalidFormat(#[error(ignore)] u32),

	/// Input image dimensions or level count overflow a `u16`.
	#[display(fmt = "Texture dimensions or level count overflow a u16")]
	TextureTooLarge,

	/// A pixel buffer is not of the size computed from its dimensions.
	/// Members are width, height and the buffer length found.
	#[error(ignore)]
	#[display(fmt = "Texture data is not the size computed from dimensions ({}x{}, got {} bytes)", _0, _1, _2)]
	TextureDataSizeMismatch(usize, usize, usize),

	/// A mipmap accessor received an index past the last level.
	#[display(fmt = "Mipmap index out of range")]
	MipmapIndexOutOfRange,

	/// An externally supplied mipmap chain does not have the requested
	/// level count.  Members are the found and the requested count.
	#[error(ignore)]
	#[display(fmt = "Supplied mipmap chain has {} levels, expected {}", _0, _1)]
	MipmapCountMismatch(usize, usize),

	/// An externally supplied mipmap level does not have the halved
	/// dimensions its index calls for.  Member is the level index.
	#[display(fmt = "Supplied mipmap level {} has wrong dimensions", _0)]
	MipmapDimensionMismatch(#[error(ignore)] usize),

	/// Headerless recovery could not parse trailing `WxH` digits from the
	/// file name.
	#[display(fmt = "No trailing WxH dimensions in file name: {}", _0)]
	NoDimensionsInFilename(#[error(ignore)] String),

	/// Headerless recovery found a file size that is not a whole multiple
	/// of the per-texture size implied by the declared format.
	#[display(fmt = "File size {} does not divide into whole textures", _0)]
	HeaderlessSizeMismatch(#[error(ignore)] u64),

	/// A merge mapping referenced an entry index outside the source
	/// container.
	#[display(fmt = "Merge source index {} out of range", _0)]
	MergeIndexOutOfRange(#[error(ignore)] usize),

	/// A checked arithmetic operation triggered an unexpected under/overflow.
	#[display(fmt = "A checked arithmetic operation triggered an unexpected under/overflow")]
	ArithmeticOverflow,
}


impl From<std::io::Error> for TplError {
	fn from(error: std::io::Error) -> Self {
		match error.kind() {
			std::io::ErrorKind::UnexpectedEof => {
				UnexpectedEof
			},

			kind => {
				UnexpectedIoError(kind)
			},
		}
	}
}


impl From<std::num::TryFromIntError> for TplError {
	fn from(error: std::num::TryFromIntError) -> Self {
		UnexpectedTryFromIntError(error)
	}
}


/// Byte order of a game variant's integer header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TplByteOrder {
	/// Big-endian (the GameCube releases).
	Big,

	/// Little-endian (the Deluxe re-release).
	Little,
}


impl TplByteOrder {
	fn read_u16<R: Read>(self, input: &mut R) -> TplResult<u16> {
		Ok(match self {
			Self::Big => input.read_u16::<BigEndian>()?,
			Self::Little => input.read_u16::<LittleEndian>()?,
		})
	}


	fn read_u32<R: Read>(self, input: &mut R) -> TplResult<u32> {
		Ok(match self {
			Self::Big => input.read_u32::<BigEndian>()?,
			Self::Little => input.read_u32::<LittleEndian>()?,
		})
	}


	fn put_u16(self, buf: &mut Vec<u8>, value: u16) {
		match self {
			Self::Big => buf.extend_with_uint::<BigEndian, _, 2>(value),
			Self::Little => buf.extend_with_uint::<LittleEndian, _, 2>(value),
		};
	}


	fn put_u32(self, buf: &mut Vec<u8>, value: u32) {
		match self {
			Self::Big => buf.extend_with_uint::<BigEndian, _, 4>(value),
			Self::Little => buf.extend_with_uint::<LittleEndian, _, 4>(value),
		};
	}
}


/// Structural layout of the container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSchema {
	/// 16-byte entry records, no leading magic.
	Standard,

	/// 32-byte entry records with wrap/filter descriptor fields, a leading
	/// magic tag and a byte-swapped check value.
	Dx,
}


/// Everything about a game variant the load/save paths consult, resolved
/// once at the API boundary.  Parsing logic never branches on
/// [`GameVariant`] directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantPolicy {
	/// Integer byte order of all header fields.
	pub byte_order: TplByteOrder,

	/// Header record layout.
	pub schema: HeaderSchema,

	/// Expected per-entry check value.
	pub check_value: u16,

	/// Byte stride of one entry header record.
	pub header_stride: usize,

	/// Leading magic tag, if the variant carries one.
	pub magic: Option<[u8; 4]>,

	/// Whether defined entries with an unresolved format code are carried
	/// as verbatim blobs instead of failing the load.
	pub raw_format_passthrough: bool,

	/// Whether the original packer's I8 smallest-level size miscalculation
	/// applies (see [`defective_i8_level_size`]).
	pub i8_size_quirk: bool,
}


/// Target title, selecting byte order, header schema and check values via
/// [`GameVariant::policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromStr)]
#[cfg_attr(feature = "fuzz", derive(Arbitrary))]
#[enumeration(case_insensitive)]
pub enum GameVariant {
	/// Super Monkey Ball (GameCube).  Carries the inherited I8 size defect.
	Smb1,

	/// Super Monkey Ball 2 (GameCube).
	Smb2,

	/// F-Zero GX (GameCube).  Accepts raw-format passthrough entries.
	FzeroGx,

	/// Super Monkey Ball Deluxe (little-endian, Dx header schema).
	SmbDx,
}


const SMB1_POLICY: VariantPolicy = VariantPolicy {
	byte_order: TplByteOrder::Big,
	schema: HeaderSchema::Standard,
	check_value: 0x1234,
	header_stride: 16,
	magic: None,
	raw_format_passthrough: false,
	i8_size_quirk: true,
};


const SMB2_POLICY: VariantPolicy = VariantPolicy {
	byte_order: TplByteOrder::Big,
	schema: HeaderSchema::Standard,
	check_value: 0x1234,
	header_stride: 16,
	magic: None,
	raw_format_passthrough: false,
	i8_size_quirk: false,
};


const FZEROGX_POLICY: VariantPolicy = VariantPolicy {
	byte_order: TplByteOrder::Big,
	schema: HeaderSchema::Standard,
	check_value: 0x1234,
	header_stride: 16,
	magic: None,
	raw_format_passthrough: true,
	i8_size_quirk: false,
};


const SMBDX_POLICY: VariantPolicy = VariantPolicy {
	byte_order: TplByteOrder::Little,
	schema: HeaderSchema::Dx,
	check_value: 0x3412,
	header_stride: 32,
	magic: Some(*b"TPLD"),
	raw_format_passthrough: false,
	i8_size_quirk: false,
};


impl GameVariant {
	/// The immutable policy record of this variant.
	pub const fn policy(self) -> &'static VariantPolicy {
		match self {
			Self::Smb1 => &SMB1_POLICY,
			Self::Smb2 => &SMB2_POLICY,
			Self::FzeroGx => &FZEROGX_POLICY,
			Self::SmbDx => &SMBDX_POLICY,
		}
	}
}


/// Alignment boundary of the header region (and of its trailing padding).
const HEADER_ALIGN: usize = 32;


/// One on-disk entry header record, schema differences included.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
struct RawEntryHeader {
	format: u32,
	offset: u32,
	width: u16,
	height: u16,
	levels: u16,
	check: u16,
	dx: DxDescriptor,
}


impl RawEntryHeader {
	fn read_from<R: Read>(input: &mut R, policy: &VariantPolicy) -> TplResult<Self> {
		let bo = policy.byte_order;

		let format = bo.read_u32(input)?;
		let offset = bo.read_u32(input)?;
		let width = bo.read_u16(input)?;
		let height = bo.read_u16(input)?;
		let levels = bo.read_u16(input)?;
		let check = bo.read_u16(input)?;

		let dx = if matches!(policy.schema, HeaderSchema::Dx) {
			let wrap_s = bo.read_u32(input)?;
			let wrap_t = bo.read_u32(input)?;
			let min_filter = bo.read_u16(input)?;
			let mag_filter = bo.read_u16(input)?;
			let reserved = bo.read_u32(input)?;
			DxDescriptor { wrap_s, wrap_t, min_filter, mag_filter, reserved }
		}
		else {
			DxDescriptor::default()
		};

		Ok(Self { format, offset, width, height, levels, check, dx })
	}


	fn write_to(&self, buf: &mut Vec<u8>, policy: &VariantPolicy) {
		let bo = policy.byte_order;

		bo.put_u32(buf, self.format);
		bo.put_u32(buf, self.offset);
		bo.put_u16(buf, self.width);
		bo.put_u16(buf, self.height);
		bo.put_u16(buf, self.levels);
		bo.put_u16(buf, self.check);

		if matches!(policy.schema, HeaderSchema::Dx) {
			bo.put_u32(buf, self.dx.wrap_s);
			bo.put_u32(buf, self.dx.wrap_t);
			bo.put_u16(buf, self.dx.min_filter);
			bo.put_u16(buf, self.dx.mag_filter);
			bo.put_u32(buf, self.dx.reserved);
		};
	}


	fn is_placeholder(&self) -> bool {
		self.offset == 0 && self.width == 0 && self.height == 0 && self.levels == 0
	}


	fn has_zero_field(&self) -> bool {
		self.offset == 0 || self.width == 0 || self.height == 0 || self.levels == 0
	}
}


/// Transient header descriptor reconstructed for a headerless file.  Built
/// once from filename/filesize heuristics, consumed by
/// [`TplContainer::load`], never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedHeader {
	/// Recovered texture count.
	pub count: u32,

	/// Uniform texture width.
	pub width: u16,

	/// Uniform texture height.
	pub height: u16,

	/// Uniform pixel format of every texture.
	pub format: TextureFormat,

	/// Mipmap level count, always 1 for recovered files.
	pub levels: u16,
}


impl GeneratedHeader {
	/// Recover a header descriptor from a file name carrying trailing `WxH`
	/// digits (e.g. `sky_160x112.tpl`) and the total file size: the texture
	/// count is the file size divided by the single-level data size implied
	/// by the declared format.
	///
	/// # Errors
	/// - [`NoDimensionsInFilename`]: the name yields no `WxH` dimensions.
	/// - [`HeaderlessSizeMismatch`]: the size is not an exact multiple of
	///   the per-texture size.
	/// - [`UnexpectedTryFromIntError`]: the recovered count overflows a `u32`.
	pub fn from_filename_and_size(filename: &str, file_size: u64, format: TextureFormat) -> TplResult<Self> {
		let stem = std::path::Path::new(filename)
			.file_stem()
			.and_then(|s| s.to_str())
			.ok_or_else(|| NoDimensionsInFilename(filename.into()))?;

		let (width, height) = parse_trailing_dimensions(stem)
			.ok_or_else(|| NoDimensionsInFilename(filename.into()))?;

		let per_texture = u64::from(width) * u64::from(height) * format.bits_per_pixel() as u64 / 8;

		if per_texture == 0 || file_size == 0 || file_size % per_texture != 0 {
			return Err(HeaderlessSizeMismatch(file_size));
		};

		let count = (file_size / per_texture).try_into()?;

		macros::log!(debug, "Recovered headerless descriptor: {} textures, {}x{} {:?}", count, width, height, format);

		Ok(Self { count, width, height, format, levels: 1 })
	}
}


/// Parse trailing `WxH` digits from a file stem, e.g. `"sky_160x112"`.
fn parse_trailing_dimensions(stem: &str) -> Option<(u16, u16)> {
	let bytes = stem.as_bytes();

	let mut h_start = bytes.len();
	while h_start > 0 && bytes[h_start - 1].is_ascii_digit() {
		h_start -= 1;
	};

	if h_start == bytes.len() || h_start == 0 || !matches!(bytes[h_start - 1], b'x' | b'X') {
		return None;
	};

	let w_end = h_start - 1;
	let mut w_start = w_end;
	while w_start > 0 && bytes[w_start - 1].is_ascii_digit() {
		w_start -= 1;
	};

	if w_start == w_end {
		return None;
	};

	let width = stem[w_start..w_end].parse().ok()?;
	let height = stem[h_start..].parse().ok()?;

	Some((width, height))
}


/// What to do when a merge mapping targets a slot already holding a
/// defined or empty entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
	/// Replace the existing entry.
	Overwrite,

	/// Keep the existing entry.
	Skip,
}


/// An ordered collection of [texture entries][TplTexture] serialized to a
/// single TPL file.
///
/// Entry order is the on-disk texture index and is semantically meaningful:
/// sibling files (GMA model archives among them) reference textures by
/// index, so index stability is preserved across load/save, interleaved
/// [undefined][TplTexture::Undefined] slots included.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct TplContainer {
	/// Texture entries in on-disk index order.
	pub entries: Vec<TplTexture>,
}


impl TplContainer {
	/// An empty container.
	pub fn new() -> Self {
		Self::default()
	}


	/// A container owning the given entries, in index order.
	pub fn with_entries(entries: Vec<TplTexture>) -> Self {
		Self { entries }
	}


	/// Number of entry slots, undefined ones included.
	pub fn len(&self) -> usize {
		self.entries.len()
	}


	/// True if the container holds no entry slots at all.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}


	/// Append an entry at the next index.
	pub fn push(&mut self, entry: TplTexture) {
		self.entries.push(entry);
	}


	/// Place `entry` at `index`, growing the container with undefined slots
	/// as needed.
	pub fn set_entry(&mut self, index: usize, entry: TplTexture) {
		if index >= self.entries.len() {
			self.entries.resize(index + 1, TplTexture::Undefined);
		};

		self.entries[index] = entry;
	}


	/// Read a container from a stream.
	///
	/// When `generated` is supplied the file is treated as headerless: no
	/// magic, count field or entry records are consumed from the stream,
	/// and per-entry headers are synthesized from the descriptor with
	/// sequential offsets at a fixed per-texture stride.
	///
	/// # Errors
	/// - [`UnexpectedMagic`]: the variant's leading tag is missing.
	/// - [`UnexpectedCheckValue`]: an entry's check field mismatches.
	/// - [`InconsistentEntryHeader`]: an entry mixes zero and non-zero
	///   offset/width/height/level fields, or its offset points past the
	///   following entry.
	/// - [`InvalidFormat`]: a defined entry's format code has no codec and
	///   the variant rejects passthrough.
	/// - [`UnexpectedEof`], [`UnexpectedIoError`]: the stream ended or
	///   failed mid-parse.
	///
	/// # Panics
	/// Panics on a 4-byte slice failing to convert to `[u8; 4]`, which is
	/// a bug.
	pub fn load<R: Read + Seek>(input: &mut R, game: GameVariant, generated: Option<&GeneratedHeader>) -> TplResult<Self> {
		let policy = game.policy();

		let start = input.stream_position()?;
		let file_len = input.seek(SeekFrom::End(0))?;
		input.seek(SeekFrom::Start(start))?;

		let synthesized = generated.is_some();

		let headers = match generated {
			Some(descriptor) => synthesize_headers(descriptor, policy),

			None => {
				if let Some(expected) = policy.magic {
					let found: [u8; 4] = input.read_exact_buffered(4)?
						.try_into()
						.expect("Could not convert magic bytes (this is a bug)");

					if found != expected {
						return Err(UnexpectedMagic(found));
					};
				};

				let count = policy.byte_order.read_u32(input)?;
				let mut headers = Vec::with_capacity(std::cmp::min(count as usize, 4096));

				for _ in 0..count {
					let header = RawEntryHeader::read_from(input, policy)?;

					if header.check != policy.check_value {
						return Err(UnexpectedCheckValue(header.check, policy.check_value));
					};

					headers.push(header);
				};

				headers
			},
		};

		let mut entries = Vec::with_capacity(headers.len());

		for (index, header) in headers.iter().enumerate() {
			if !synthesized {
				if header.is_placeholder() {
					let entry = if header.format == 0 {
						TplTexture::Undefined
					}
					else {
						TplTexture::define_empty(header.format)
					};

					entries.push(entry);
					continue;
				};

				if header.has_zero_field() {
					return Err(InconsistentEntryHeader(index));
				};
			};

			input.seek(SeekFrom::Start(header.offset.into()))?;

			let mut entry = if TextureFormat::from_code(header.format, policy.schema).is_some() {
				TplTexture::load_texture_data(input, game, header.format, header.width, header.height, header.levels)?
			}
			else if policy.raw_format_passthrough {
				// A passthrough blob has no size of its own; it extends to
				// the next defined entry's data (or to EOF).
				let end = headers[index + 1..]
					.iter()
					.find(|next| next.offset != 0)
					.map(|next| u64::from(next.offset))
					.unwrap_or(file_len);

				let blob_len = end
					.checked_sub(header.offset.into())
					.ok_or(InconsistentEntryHeader(index))?;

				TplTexture::load_raw_passthrough(input, header.format, header.width, header.height, header.levels, blob_len.try_into()?)?
			}
			else {
				return Err(InvalidFormat(header.format));
			};

			if let TplTexture::Defined(data) = &mut entry {
				data.dx = header.dx;
			};

			entries.push(entry);
		};

		Ok(Self { entries })
	}


	/// Wrap `input` with a [`Cursor`][std::io::Cursor] and
	/// [`load`][Self::load] from it.
	///
	/// # Errors
	/// See [`TplContainer::load`].
	pub fn from_bytes(input: &[u8], game: GameVariant, generated: Option<&GeneratedHeader>) -> TplResult<Self> {
		let mut cursor = Cursor::new(input);
		Self::load(&mut cursor, game, generated)
	}


	/// Serialize the container for `game`.  With `no_header` the header
	/// region (magic, count, entry records and padding) is omitted and only
	/// the concatenated texture data is produced, so headerless-loaded
	/// containers round-trip byte-exactly.
	///
	/// # Errors
	/// - [`ArithmeticOverflow`]: the entry count or a data offset overflows
	///   its header field.
	pub fn to_bytes(&self, game: GameVariant, no_header: bool) -> TplResult<Vec<u8>> {
		let policy = game.policy();
		let mut buf: Vec<u8> = Vec::with_capacity(self.size_of(game, no_header)?);

		if !no_header {
			if let Some(magic) = policy.magic {
				buf.extend(magic);
			};

			let count: u32 = self.entries.len().try_into().map_err(|_| ArithmeticOverflow)?;
			policy.byte_order.put_u32(&mut buf, count);

			let mut offset = self.header_region_size(game);

			for entry in &self.entries {
				let header = match entry {
					TplTexture::Undefined => RawEntryHeader {
						check: policy.check_value,
						..RawEntryHeader::default()
					},

					TplTexture::Empty { raw_format } => RawEntryHeader {
						format: *raw_format,
						check: policy.check_value,
						..RawEntryHeader::default()
					},

					TplTexture::Defined(data) => {
						let format = match data.format {
							Some(format) => format.to_code(policy.schema),
							None => data.raw_format,
						};

						let header = RawEntryHeader {
							format,
							offset: offset.try_into().map_err(|_| ArithmeticOverflow)?,
							width: data.levels.first().map(|l| l.width).unwrap_or(0),
							height: data.levels.first().map(|l| l.height).unwrap_or(0),
							levels: data.declared_levels,
							check: policy.check_value,
							dx: data.dx,
						};

						offset += entry.size_of_texture_data(game);
						header
					},
				};

				header.write_to(&mut buf, policy);
			};

			// Header padding is not zero-fill: the original packers emit an
			// incrementing byte pattern, reproduced here for byte-identical
			// output.
			let padding = self.header_region_size(game) - buf.len();
			#[allow(clippy::cast_possible_truncation)]
			buf.extend((0..padding).map(|i| i as u8));
		};

		for entry in &self.entries {
			entry.save_texture_data(&mut buf, game)?;
		};

		Ok(buf)
	}


	/// Serialize the container into a stream; see
	/// [`to_bytes`][Self::to_bytes].
	///
	/// # Errors
	/// See [`TplContainer::to_bytes`]; additionally [`UnexpectedIoError`]
	/// when writing to `output` fails.
	pub fn save<W: Write>(&self, output: &mut W, game: GameVariant, no_header: bool) -> TplResult<()> {
		let bytes = self.to_bytes(game, no_header)?;
		output.write_all(&bytes)?;
		Ok(())
	}


	/// Exact byte count [`to_bytes`][Self::to_bytes] produces for the same
	/// `game`/`no_header` combination, computed without materializing the
	/// data.
	///
	/// # Errors
	/// - [`ArithmeticOverflow`]: the total overflows a `usize`.
	pub fn size_of(&self, game: GameVariant, no_header: bool) -> TplResult<usize> {
		const_assert!(std::mem::size_of::<usize>() >= 4);

		let data: usize = self.entries
			.iter()
			.map(|e| e.size_of_texture_data(game))
			.try_fold(0usize, |acc, size| acc.checked_add(size))
			.ok_or(ArithmeticOverflow)?;

		if no_header {
			Ok(data)
		}
		else {
			data.checked_add(self.header_region_size(game)).ok_or(ArithmeticOverflow)
		}
	}


	/// Size of the magic + count + entry records region, aligned up to the
	/// fixed block boundary.
	fn header_region_size(&self, game: GameVariant) -> usize {
		let policy = game.policy();
		let magic_len = policy.magic.map(|m| m.len()).unwrap_or(0);
		let raw = magic_len + 4 + self.entries.len() * policy.header_stride;
		round_up(raw, HEADER_ALIGN)
	}


	/// Union this container with `other`'s defined entries.
	///
	/// `mapping` pairs are `(source index, target index)`.  Non-defined
	/// source entries are ignored; undefined target slots are always
	/// filled; occupied target slots follow `collision`.  The container
	/// grows with undefined slots when a target index is past the end.
	///
	/// # Errors
	/// - [`MergeIndexOutOfRange`]: a source index is outside `other`.
	pub fn merge(&mut self, other: &TplContainer, mapping: &[(usize, usize)], collision: MergePolicy) -> TplResult<()> {
		for &(source, target) in mapping {
			let entry = other.entries.get(source).ok_or(MergeIndexOutOfRange(source))?;

			if !entry.is_defined() {
				continue;
			};

			if target >= self.entries.len() {
				self.entries.resize(target + 1, TplTexture::Undefined);
			};

			let replace = matches!(self.entries[target], TplTexture::Undefined)
				|| matches!(collision, MergePolicy::Overwrite);

			if replace {
				self.entries[target] = entry.clone();
			};
		};

		Ok(())
	}
}


/// Per-entry headers for a headerless file: sequential offsets at a fixed
/// stride of `width * height * bits_per_pixel / 8`, one single-level record
/// per texture, data starting at stream offset zero.
fn synthesize_headers(descriptor: &GeneratedHeader, policy: &VariantPolicy) -> Vec<RawEntryHeader> {
	let stride = descriptor.width as usize * descriptor.height as usize
		* descriptor.format.bits_per_pixel() / 8;

	(0..descriptor.count)
		.map(|index| RawEntryHeader {
			format: descriptor.format.to_code(policy.schema),
			offset: (index as usize * stride) as u32,
			width: descriptor.width,
			height: descriptor.height,
			levels: descriptor.levels,
			check: policy.check_value,
			dx: DxDescriptor::default(),
		})
		.collect()
}


pub(crate) trait ExtendExt: Extend<u8> {
	/// Convenience function which extends an [`std::iter::Extend<u8>`] with
	/// a [`byteorder::ByteOrder`]-encoded integer.
	fn extend_with_uint<B: ByteOrder, T: Into<u64>, const N: usize>(&mut self, v: T) {
		let mut buf = vec![0u8; N];
		B::write_uint(&mut buf[..], v.into(), N);
		self.extend(buf.into_iter());
	}
}


impl<T> ExtendExt for T where T: Extend<u8> {}


pub(crate) trait ReadExt: Read {
	const SINGLE_READ_SIZE: usize = 64;

	fn read_exact_buffered(&mut self, len: usize) -> TplResult<Vec<u8>> {
		let mut data: Vec<u8> = Vec::with_capacity(std::cmp::min(len, 0x10_0000));
		let mut total = 0usize;

		loop {
			if total == len {
				break;
			};

			let bufsize = std::cmp::min(Self::SINGLE_READ_SIZE, len - total);
			let mut buf = vec![0u8; bufsize];
			self.read_exact(&mut buf)?;
			data.extend(&buf[..]);
			total += bufsize;
		};

		Ok(data)
	}


	/// Read up to `len` bytes, zero-filling whatever the stream cannot
	/// provide.  Used only where the Smb1 I8 size defect makes the final
	/// texture's tile-padded read run past the end of the file.
	fn read_zero_padded(&mut self, len: usize) -> TplResult<Vec<u8>> {
		let mut data = vec![0u8; len];
		let mut filled = 0usize;

		while filled < len {
			match self.read(&mut data[filled..]) {
				Ok(0) => break,
				Ok(n) => filled += n,
				Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e.into()),
			};
		};

		Ok(data)
	}
}


impl<T> ReadExt for T where T: Read {}


#[test]
fn test_extend_with_uint() {
	// The standard and Dx check values, in their respective byte orders.
	let mut dest: Vec<u8> = vec![];

	dest.extend_with_uint::<BigEndian, _, 2>(SMB2_POLICY.check_value);
	assert_eq!(dest, vec![0x12, 0x34]);

	dest.extend_with_uint::<LittleEndian, _, 2>(SMBDX_POLICY.check_value);
	assert_eq!(dest, vec![0x12, 0x34, 0x12, 0x34]);

	dest.extend_with_uint::<LittleEndian, _, 4>(0x20u32);
	assert_eq!(dest, vec![0x12, 0x34, 0x12, 0x34, 0x20, 0x00, 0x00, 0x00]);
}


#[test]
fn test_read_exact_buffered() {
	// 200 bytes forces several chunked reads past SINGLE_READ_SIZE.
	let bytes: Vec<u8> = (0..200u8).collect();
	let mut input = Cursor::new(bytes.clone());

	assert_eq!(input.read_exact_buffered(150).unwrap(), &bytes[..150]);
	assert_eq!(input.read_exact_buffered(50).unwrap(), &bytes[150..]);
	assert!(matches!(input.read_exact_buffered(1), Err(UnexpectedEof)));
}


#[test]
fn test_read_zero_padded() {
	let mut input = Cursor::new(vec![0xAAu8, 0xBB]);
	assert_eq!(input.read_zero_padded(4).unwrap(), vec![0xAA, 0xBB, 0x00, 0x00]);
}


#[test]
fn test_parse_trailing_dimensions() {
	assert_eq!(parse_trailing_dimensions("sky_160x112"), Some((160, 112)));
	assert_eq!(parse_trailing_dimensions("64X64"), Some((64, 64)));
	assert_eq!(parse_trailing_dimensions("background"), None);
	assert_eq!(parse_trailing_dimensions("x16"), None);
	assert_eq!(parse_trailing_dimensions("16x"), None);
}


#[test]
fn assert_traits() {
	use std::fmt::{Debug, Display};
	use std::error::Error;
	use std::panic::{UnwindSafe, RefUnwindSafe};

	assert_impl_all!(TplError: Debug, Display, Error, Send, Sync, UnwindSafe, RefUnwindSafe);
	assert_impl_all!(TplContainer: Debug, Clone, Send, Sync);
}


#[cfg(test)]
mod container_tests {
	use super::*;

	use image::RgbaImage;


	fn gradient_image(width: u32, height: u32) -> RgbaImage {
		RgbaImage::from_fn(width, height, |x, y| {
			image::Rgba([(x * 4) as u8, (y * 4) as u8, 0x80, 0xFF])
		})
	}


	fn three_entry_container() -> TplContainer {
		let texture = TplTexture::from_image(&gradient_image(64, 64), TextureFormat::Cmpr, 4, MipmapFilter::Bicubic).unwrap();

		TplContainer::with_entries(vec![
			texture,
			TplTexture::define_empty(7),
			TplTexture::Undefined,
		])
	}


	#[test]
	fn three_entry_scenario_round_trips() {
		let container = three_entry_container();

		let bytes = container.to_bytes(GameVariant::Smb2, false).unwrap();
		let reloaded = TplContainer::from_bytes(&bytes, GameVariant::Smb2, None).unwrap();

		assert_eq!(reloaded.len(), 3);
		assert_eq!(reloaded.entries[0].level_count(), 4);
		assert_eq!(reloaded.entries[0].width_of_level(0).unwrap(), 64);
		assert_eq!(reloaded.entries[0].height_of_level(0).unwrap(), 64);
		assert!(matches!(reloaded.entries[1], TplTexture::Empty { raw_format: 7 }));
		assert!(matches!(reloaded.entries[2], TplTexture::Undefined));

		assert_eq!(reloaded, container);
	}


	#[test]
	fn empty_with_code_zero_reloads_as_undefined() {
		// A format-0 empty entry writes an all-zero record, which is the
		// on-disk shape of an undefined slot.
		let container = TplContainer::with_entries(vec![TplTexture::define_empty(0)]);

		let bytes = container.to_bytes(GameVariant::Smb2, false).unwrap();
		let reloaded = TplContainer::from_bytes(&bytes, GameVariant::Smb2, None).unwrap();

		assert!(matches!(reloaded.entries[0], TplTexture::Undefined));
	}


	#[test]
	fn round_trip_every_variant_and_format() {
		use TextureFormat::*;

		for game in [GameVariant::Smb1, GameVariant::Smb2, GameVariant::FzeroGx, GameVariant::SmbDx] {
			for format in [I4, I8, Ia4, Ia8, Rgb565, Rgb5A3, Rgba8, Cmpr] {
				// 16x16 with 2 levels keeps every level tile-aligned, so
				// the Smb1 I8 size quirk computes the same sizes as the
				// corrected formula and the round trip stays symmetric.
				let texture = TplTexture::from_image(&gradient_image(16, 16), format, 2, MipmapFilter::Nearest).unwrap();
				let container = TplContainer::with_entries(vec![texture, TplTexture::Undefined]);

				let bytes = container.to_bytes(game, false).unwrap();
				let reloaded = TplContainer::from_bytes(&bytes, game, None).unwrap();

				assert_eq!(reloaded, container, "round trip failed for {:?}/{:?}", game, format);
			};
		};
	}


	#[test]
	fn size_of_matches_written_length() {
		let container = three_entry_container();

		for game in [GameVariant::Smb1, GameVariant::Smb2, GameVariant::FzeroGx, GameVariant::SmbDx] {
			for no_header in [false, true] {
				let bytes = container.to_bytes(game, no_header).unwrap();
				assert_eq!(container.size_of(game, no_header).unwrap(), bytes.len());
			};
		};
	}


	#[test]
	fn header_padding_uses_incrementing_pattern() {
		let texture = TplTexture::from_image(&gradient_image(8, 8), TextureFormat::I4, 1, MipmapFilter::Nearest).unwrap();
		let container = TplContainer::with_entries(vec![texture]);

		let bytes = container.to_bytes(GameVariant::Smb2, false).unwrap();

		// 4-byte count plus one 16-byte record, padded to the 32-byte
		// boundary.
		assert_eq!(&bytes[20..32], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
	}


	#[test]
	fn dx_magic_and_descriptor_round_trip() {
		let mut texture = TplTexture::from_image(&gradient_image(8, 8), TextureFormat::Rgb565, 1, MipmapFilter::Nearest).unwrap();

		if let TplTexture::Defined(data) = &mut texture {
			data.dx = DxDescriptor { wrap_s: 1, wrap_t: 2, min_filter: 3, mag_filter: 4, reserved: 0xDEAD_BEEF };
		};

		let container = TplContainer::with_entries(vec![texture]);
		let bytes = container.to_bytes(GameVariant::SmbDx, false).unwrap();

		assert_eq!(&bytes[0..4], b"TPLD");

		// The reserved record bytes are opaque but must survive unchanged
		// (magic 4 + count 4 + record offset 28).
		assert_eq!(&bytes[36..40], &[0xEF, 0xBE, 0xAD, 0xDE]);

		let reloaded = TplContainer::from_bytes(&bytes, GameVariant::SmbDx, None).unwrap();
		assert_eq!(reloaded, container);

		let rewritten = reloaded.to_bytes(GameVariant::SmbDx, false).unwrap();
		assert_eq!(rewritten, bytes);

		// The console schemas reject the Dx layout outright.
		assert!(TplContainer::from_bytes(&bytes, GameVariant::Smb2, None).is_err());
	}


	#[test]
	fn check_value_mismatch_is_rejected() {
		let container = three_entry_container();
		let mut bytes = container.to_bytes(GameVariant::Smb2, false).unwrap();

		// Corrupt the first entry's check field (count + 14 bytes in).
		bytes[18] ^= 0xFF;

		assert!(matches!(
			TplContainer::from_bytes(&bytes, GameVariant::Smb2, None),
			Err(UnexpectedCheckValue(_, 0x1234))
		));
	}


	#[test]
	fn inconsistent_header_is_rejected() {
		let container = three_entry_container();
		let mut bytes = container.to_bytes(GameVariant::Smb2, false).unwrap();

		// Zero the first entry's level count, leaving its offset and
		// dimensions intact.
		bytes[16] = 0;
		bytes[17] = 0;

		assert!(matches!(
			TplContainer::from_bytes(&bytes, GameVariant::Smb2, None),
			Err(InconsistentEntryHeader(0))
		));
	}


	#[test]
	fn unknown_format_fails_without_passthrough() {
		let mut bytes = Vec::new();
		TplByteOrder::Big.put_u32(&mut bytes, 1);

		RawEntryHeader {
			format: 99,
			offset: 32,
			width: 8,
			height: 8,
			levels: 1,
			check: 0x1234,
			dx: DxDescriptor::default(),
		}
		.write_to(&mut bytes, GameVariant::Smb2.policy());

		let padding = 32 - bytes.len();
		bytes.extend((0..padding).map(|i| i as u8));
		bytes.extend([0xEE; 40]);

		assert!(matches!(
			TplContainer::from_bytes(&bytes, GameVariant::Smb2, None),
			Err(InvalidFormat(99))
		));

		// The same bytes load under F-Zero GX's passthrough policy and
		// serialize back unchanged.
		let container = TplContainer::from_bytes(&bytes, GameVariant::FzeroGx, None).unwrap();

		match &container.entries[0] {
			TplTexture::Defined(data) => {
				assert_eq!(data.format, None);
				assert_eq!(data.raw_format, 99);
				assert_eq!(data.levels[0].raw().len(), 40);
			},

			other => panic!("Expected a defined passthrough entry, got {:?}", other),
		};

		assert_eq!(container.size_of(GameVariant::FzeroGx, false).unwrap(), bytes.len());
		assert_eq!(container.to_bytes(GameVariant::FzeroGx, false).unwrap(), bytes);
	}


	#[test]
	fn headerless_recovery_scenario() {
		let format = TextureFormat::Rgb565;
		let file_size: usize = 160 * 112 * 2;

		let descriptor = GeneratedHeader::from_filename_and_size("sky_160x112.tpl", file_size as u64, format).unwrap();
		assert_eq!(descriptor.count, 1);
		assert_eq!((descriptor.width, descriptor.height), (160, 112));
		assert_eq!(descriptor.levels, 1);

		let bytes: Vec<u8> = (0..file_size).map(|i| (i * 7) as u8).collect();
		let container = TplContainer::from_bytes(&bytes, GameVariant::Smb2, Some(&descriptor)).unwrap();

		assert_eq!(container.len(), 1);
		assert_eq!(container.entries[0].level_count(), 1);
		assert_eq!(container.entries[0].width_of_level(0).unwrap(), 160);
		assert_eq!(container.entries[0].height_of_level(0).unwrap(), 112);

		// Saving headerless reproduces the input bytes exactly.
		assert_eq!(container.to_bytes(GameVariant::Smb2, true).unwrap(), bytes);

		// Saving with a header produces a loadable standard container with
		// the recovered count, format and dimensions.
		let with_header = container.to_bytes(GameVariant::Smb2, false).unwrap();
		let reloaded = TplContainer::from_bytes(&with_header, GameVariant::Smb2, None).unwrap();
		assert_eq!(reloaded, container);
	}


	#[test]
	fn headerless_recovery_rejects_bad_inputs() {
		assert!(matches!(
			GeneratedHeader::from_filename_and_size("background.tpl", 1024, TextureFormat::Rgb565),
			Err(NoDimensionsInFilename(_))
		));

		assert!(matches!(
			GeneratedHeader::from_filename_and_size("sky_160x112.tpl", 1000, TextureFormat::Rgb565),
			Err(HeaderlessSizeMismatch(1000))
		));
	}


	#[test]
	fn merge_fills_undefined_slots_and_honors_collision_policy() {
		let source = three_entry_container();

		let mut target = TplContainer::with_entries(vec![
			TplTexture::Undefined,
			TplTexture::define_empty(3),
		]);

		// Skip policy: the undefined slot is still filled, the empty slot
		// is kept, and the target grows for out-of-range indices.
		target.merge(&source, &[(0, 0), (0, 1), (0, 4)], MergePolicy::Skip).unwrap();

		assert_eq!(target.len(), 5);
		assert!(target.entries[0].is_defined());
		assert!(matches!(target.entries[1], TplTexture::Empty { raw_format: 3 }));
		assert!(matches!(target.entries[3], TplTexture::Undefined));
		assert!(target.entries[4].is_defined());

		// Overwrite policy replaces occupied slots.
		target.merge(&source, &[(0, 1)], MergePolicy::Overwrite).unwrap();
		assert!(target.entries[1].is_defined());

		// Non-defined source entries are ignored.
		target.merge(&source, &[(2, 0)], MergePolicy::Overwrite).unwrap();
		assert!(target.entries[0].is_defined());

		assert!(matches!(
			target.merge(&source, &[(9, 0)], MergePolicy::Overwrite),
			Err(MergeIndexOutOfRange(9))
		));
	}


	#[test]
	fn variant_names_parse() {
		assert_eq!("smb1".parse::<GameVariant>(), Ok(GameVariant::Smb1));
		assert_eq!("FZEROGX".parse::<GameVariant>(), Ok(GameVariant::FzeroGx));
		assert_eq!("cmpr".parse::<TextureFormat>(), Ok(TextureFormat::Cmpr));
		assert!("unknown".parse::<GameVariant>().is_err());
	}
}
