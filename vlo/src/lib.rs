pub mod archive;
pub mod clut;
pub mod error;
pub mod game;
pub mod image;
pub mod quant;
pub mod vram;

pub use archive::{
	is_valid_texture_name,
	VloArchive,
	PC_SIGNATURE,
	PSX_SIGNATURE
};
pub use clut::{
	Clut,
	ClutKey,
	ClutTable
};
pub use error::VloError;
pub use game::{
	GameProfile,
	Padding,
	PcPaddingEra,
	Platform
};
pub use image::{
	Abr,
	ArgbBitmap,
	BitDepth,
	ExportSettings,
	SurfaceInteraction,
	VloImage
};
pub use quant::{
	NullQuantizer,
	Quantizer
};

/// Decodes a VLO archive from a byte buffer.
#[cfg(feature = "import")]
pub fn read_vlo(data: &[u8], profile: GameProfile) -> Result<VloArchive, VloError> {
	VloArchive::read(data, profile)
}

/// Encodes an archive back into bytes, patching offsets in two passes.
#[cfg(feature = "export")]
pub fn write_vlo(archive: &mut VloArchive) -> Result<Vec<u8>, VloError> {
	archive.write()
}
