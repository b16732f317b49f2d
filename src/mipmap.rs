#[cfg(feature = "fuzz")] use arbitrary::Arbitrary;
use enum_utils::FromStr;
use image::RgbaImage;

use crate::macros;
use crate::TplResult;
use crate::TplError::*;


/// Resampling algorithm used when deriving a mipmap chain from a single
/// source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromStr)]
#[cfg_attr(feature = "fuzz", derive(Arbitrary))]
#[enumeration(case_insensitive)]
pub enum MipmapFilter {
	/// Direct pixel sampling, no blending.
	Nearest,

	/// Catmull-Rom bicubic resampling.
	Bicubic,
}


impl Default for MipmapFilter {
	/// Returns [`Bicubic`][MipmapFilter::Bicubic].
	fn default() -> Self {
		MipmapFilter::Bicubic
	}
}


/// Dimensions of mipmap level `index`, successively halving the level-0
/// dimensions with a floor of 1x1.
pub fn level_dimensions(width0: u32, height0: u32, index: usize) -> (u32, u32) {
	let shift = std::cmp::min(index, 31) as u32;
	let width = std::cmp::max(1, width0 >> shift);
	let height = std::cmp::max(1, height0 >> shift);
	(width, height)
}


/// Number of levels a full chain down to `min_dimension` would have.
pub fn hint_level_count((width, height): (u32, u32), min_dimension: u32) -> usize {
	let smaller = std::cmp::min(width, height) as f64;
	let hint = (smaller.log2() - (min_dimension as f64).log2()).ceil() as usize;
	std::cmp::max(hint, 1usize)
}


/// Derive a `count`-level mipmap chain from `level0`.  Every level is
/// resampled from the original level-0 image, so the output is byte-identical
/// across runs for the same source, filter and count.
pub fn generate_chain(level0: &RgbaImage, count: usize, filter: MipmapFilter) -> Vec<RgbaImage> {
	let mut chain = Vec::with_capacity(count);

	for index in 0..count {
		let (width, height) = level_dimensions(level0.width(), level0.height(), index);

		let level = if (width, height) == level0.dimensions() {
			level0.clone()
		}
		else {
			match filter {
				MipmapFilter::Nearest => resize_nearest(level0, width, height),
				MipmapFilter::Bicubic => image::imageops::resize(level0, width, height, image::imageops::FilterType::CatmullRom),
			}
		};

		chain.push(level);
	};

	macros::log!(trace, "generate_chain: {} levels from {}x{}", count, level0.width(), level0.height());

	chain
}


/// Assemble a `count`-level chain from `level0` plus externally supplied
/// lower-resolution images.  Supplied levels take precedence over generation;
/// no resampling happens here.
///
/// # Errors
/// - [`MipmapCountMismatch`]: `supplied.len() + 1` does not equal `count`.
/// - [`MipmapDimensionMismatch`]: a supplied level does not have the halved
///   dimensions its index calls for.
pub fn chain_with_supplied(level0: RgbaImage, supplied: Vec<RgbaImage>, count: usize) -> TplResult<Vec<RgbaImage>> {
	if supplied.len() + 1 != count {
		return Err(MipmapCountMismatch(supplied.len() + 1, count));
	};

	let (width0, height0) = level0.dimensions();

	for (offset, level) in supplied.iter().enumerate() {
		if level.dimensions() != level_dimensions(width0, height0, offset + 1) {
			return Err(MipmapDimensionMismatch(offset + 1));
		};
	};

	let mut chain = Vec::with_capacity(count);
	chain.push(level0);
	chain.extend(supplied);

	Ok(chain)
}


fn resize_nearest(src: &RgbaImage, width: u32, height: u32) -> RgbaImage {
	RgbaImage::from_fn(width, height, |x, y| {
		*src.get_pixel(x * src.width() / width, y * src.height() / height)
	})
}


#[test]
fn test_level_dimensions() {
	assert_eq!(level_dimensions(64, 64, 0), (64, 64));
	assert_eq!(level_dimensions(64, 64, 3), (8, 8));
	assert_eq!(level_dimensions(64, 16, 5), (2, 1));
	assert_eq!(level_dimensions(1, 1, 4), (1, 1));
}


#[test]
fn test_hint_level_count() {
	assert_eq!(hint_level_count((800, 1000), 6), 8);
	assert_eq!(hint_level_count((1080, 2160), 30), 6);
}


#[test]
fn generation_is_deterministic() {
	let level0 = RgbaImage::from_fn(16, 16, |x, y| image::Rgba([x as u8 * 16, y as u8 * 16, 0xAA, 0xFF]));

	let first = generate_chain(&level0, 4, MipmapFilter::Bicubic);
	let second = generate_chain(&level0, 4, MipmapFilter::Bicubic);

	assert_eq!(first.len(), 4);
	assert_eq!(first, second);

	for (index, level) in first.iter().enumerate() {
		assert_eq!(level.dimensions(), level_dimensions(16, 16, index));
	};
}


#[test]
fn nearest_downsample_samples_a_corner() {
	// 2x2 checkerboard down to 1x1 must surface the sampled corner pixel,
	// not a blend of the four.
	let mut checker = RgbaImage::new(2, 2);
	checker.put_pixel(0, 0, image::Rgba([0xFF, 0xFF, 0xFF, 0xFF]));
	checker.put_pixel(1, 1, image::Rgba([0xFF, 0xFF, 0xFF, 0xFF]));

	let chain = generate_chain(&checker, 2, MipmapFilter::Nearest);
	assert_eq!(chain[1].dimensions(), (1, 1));
	assert_eq!(chain[1].get_pixel(0, 0), checker.get_pixel(0, 0));
}


#[test]
fn supplied_levels_take_precedence() {
	let level0 = RgbaImage::new(8, 8);
	let level1 = RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 4]));

	let chain = chain_with_supplied(level0.clone(), vec![level1.clone()], 2).unwrap();
	assert_eq!(chain[1], level1);

	assert!(matches!(
		chain_with_supplied(level0.clone(), vec![], 2),
		Err(MipmapCountMismatch(1, 2))
	));

	let wrong = RgbaImage::new(3, 3);
	assert!(matches!(
		chain_with_supplied(level0, vec![wrong], 2),
		Err(MipmapDimensionMismatch(1))
	));
}
