#![no_main]
use libfuzzer_sys::fuzz_target;

use gx_tpl::{TplContainer, GameVariant};

fuzz_target!(|input: (GameVariant, &[u8])| {
	let (game, data) = input;
	let container = TplContainer::from_bytes(data, game, None);

	if let Ok(container) = container {
		let _ = container.to_bytes(game, false);
	};
});
