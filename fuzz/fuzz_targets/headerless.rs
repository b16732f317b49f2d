#![no_main]
use libfuzzer_sys::fuzz_target;

use gx_tpl::{TplContainer, GameVariant, GeneratedHeader, TextureFormat};

fuzz_target!(|input: (GameVariant, TextureFormat, &str, &[u8])| {
	let (game, format, name, data) = input;

	let descriptor = match GeneratedHeader::from_filename_and_size(name, data.len() as u64, format) {
		Ok(descriptor) => descriptor,
		Err(_) => return,
	};

	let container = match TplContainer::from_bytes(data, game, Some(&descriptor)) {
		Ok(container) => container,
		Err(_) => return,
	};

	let bytes = container.to_bytes(game, true).unwrap();

	// The Smb1 I8 size quirk reads zero-padded and saves truncated, so that
	// combination is asymmetric by design.
	if !(game == GameVariant::Smb1 && format == TextureFormat::I8) {
		assert_eq!(bytes, data);
	};
});
