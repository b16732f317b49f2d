#![no_main]
use libfuzzer_sys::fuzz_target;
use arbitrary::{
	Arbitrary,
	Unstructured,
	Result as ArbitraryResult,
};

use gx_tpl::{decode, encode, TextureFormat};


#[derive(Debug)]
struct CodecInput {
	format: TextureFormat,
	width: usize,
	height: usize,
	packed: Vec<u8>,
}

impl<'a> Arbitrary<'a> for CodecInput {
	fn arbitrary(input: &mut Unstructured) -> ArbitraryResult<Self> {
		let format = <TextureFormat as Arbitrary>::arbitrary(input)?;

		// Kept small to avoid slow-unit fuzz artifacts.
		let width: usize = input.int_in_range(1..=128)?;
		let height: usize = input.int_in_range(1..=128)?;

		let mut packed = vec![0u8; format.encoded_size(width, height)];
		input.fill_buffer(&mut packed)?;

		Ok(Self { format, width, height, packed })
	}
}


fuzz_target!(|input: CodecInput| {
	let CodecInput { format, width, height, packed } = input;

	let rgba = decode(&packed, format, width, height).unwrap();
	assert_eq!(rgba.len(), width * height * 4);

	let repacked = encode(&rgba, format, width, height).unwrap();
	assert_eq!(repacked.len(), packed.len());
});
