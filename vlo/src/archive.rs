use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use log::warn;

use std::io::{
	Cursor,
	Read,
	Seek,
	SeekFrom,
	Write
};

use vorgkit_core::io_ext::{
	ReadBinExt,
	WriteBinExt
};

use crate::clut::{
	Clut,
	ClutTable
};
use crate::error::VloError;
use crate::game::{
	GameProfile,
	Padding,
	Platform
};
use crate::image::{
	Abr,
	ArgbBitmap,
	BitDepth,
	VloImage,
	FLAG_2D_SPRITE,
	FLAG_TRANSLUCENT
};
use crate::quant::Quantizer;

pub const PC_SIGNATURE: &[u8; 4] = b"2GRP";
pub const PSX_SIGNATURE: &[u8; 4] = b"2GRV";

// Trailing block carrying human-assigned image names. Not part of the base
// format; the games never read past the clut color blob.
const NAME_BLOCK_SIGNATURE: &[u8; 4] = b"2NAM";
const NAME_BLOCK_VERSION: u8 = 0;

const ALIGNMENT: u64 = 4;

/// Checks a texture name against the character set the name block can carry.
pub fn is_valid_texture_name(name: &str) -> bool {
	!name.is_empty() && name.len() <= 64
		&& name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// The archives order images by descending VRAM footprint, apparently the
// order the original tool inserted them into VRAM with.
fn sort_key(image: &VloImage) -> u32 {
	image.unit_width() as u32 * image.padded_height() as u32
}

/// An image archive written by Vorg2: ordered images, their cluts, and an
/// optional name overlay.
///
/// Image order is index-significant and preserved across a load/save round
/// trip unless a caller explicitly reorders.
#[derive(Debug)]
pub struct VloArchive {
	platform: Platform,
	profile: GameProfile,
	images: Vec<VloImage>,
	cluts: ClutTable,
}

impl VloArchive {
	pub fn new(platform: Platform, profile: GameProfile) -> VloArchive {
		VloArchive {
			platform,
			profile,
			images: vec![],
			cluts: ClutTable::new(),
		}
	}

	pub fn platform(&self) -> Platform {
		self.platform
	}

	pub fn profile(&self) -> &GameProfile {
		&self.profile
	}

	pub fn images(&self) -> &[VloImage] {
		&self.images
	}

	pub fn image_mut(&mut self, index: usize) -> Option<&mut VloImage> {
		self.images.get_mut(index)
	}

	pub fn cluts(&self) -> &ClutTable {
		&self.cluts
	}

	pub fn cluts_mut(&mut self) -> &mut ClutTable {
		&mut self.cluts
	}

	/// Splits archive state so an image and the clut table can be worked on
	/// together (imports need both sides mutable).
	pub fn image_and_cluts_mut(&mut self, index: usize) -> Option<(&mut VloImage, &mut ClutTable, &GameProfile)> {
		let image = self.images.get_mut(index)?;
		Some((image, &mut self.cluts, &self.profile))
	}

	pub fn image_by_texture_id(&self, texture_id: u16) -> Option<&VloImage> {
		self.images.iter().find(|image| image.texture_id() == texture_id)
	}

	pub fn image_by_name(&self, name: &str) -> Option<&VloImage> {
		self.images.iter().find(|image| image.name() == Some(name))
	}

	/// Renames an image, or clears its name. Duplicate names are rejected.
	pub fn set_image_name(&mut self, index: usize, name: Option<&str>) -> Result<(), VloError> {
		if let Some(name) = name {
			if !is_valid_texture_name(name) {
				return Err(VloError::InvalidInput(format!("invalid texture name: '{}'", name)));
			}
			if self.images.iter().enumerate().any(|(i, image)| i != index && image.name() == Some(name)) {
				return Err(VloError::InvalidInput(format!("an image named '{}' already exists", name)));
			}
		}

		match self.images.get_mut(index) {
			Some(image) => {
				image.set_name(name.map(str::to_string));
				Ok(())
			}
			None => Err(VloError::InvalidInput(format!("no image at index {}", index))),
		}
	}

	/// Imports a new image into the archive, returning its index.
	///
	/// The caller supplies the texture ID (ID allocation belongs to whoever
	/// tracks the executable's texture table) and later assigns VRAM
	/// positions for the image and any freshly allocated clut.
	pub fn add_image(&mut self, name: &str, source: &ArgbBitmap, texture_id: u16, bit_depth: BitDepth,
		padding: Padding, abr: Option<Abr>, translucent: bool, quantizer: &dyn Quantizer) -> Result<usize, VloError> {
		if !is_valid_texture_name(name) {
			return Err(VloError::InvalidInput(format!("invalid texture name: '{}'", name)));
		}
		if self.image_by_name(name).is_some() {
			return Err(VloError::InvalidInput(format!("an image named '{}' already exists", name)));
		}
		if self.image_by_texture_id(texture_id).is_some() {
			return Err(VloError::InvalidInput(format!("texture ID {} is already in use", texture_id)));
		}

		let mut image = VloImage::new(self.platform);
		image.set_texture_id(texture_id);
		image.set_name(Some(name.to_string()));
		image.set_flag(FLAG_2D_SPRITE, true);
		image.set_flag(FLAG_TRANSLUCENT, translucent);
		image.replace_image(source, Some(bit_depth), padding, &mut self.cluts, quantizer, &self.profile)?;
		if let Some(abr) = abr {
			if self.platform.is_psx() {
				image.set_abr(abr)?;
			}
		}

		let index = self.insertion_index(&image);
		self.images.insert(index, image);
		Ok(index)
	}

	/// Removes an image, detaching its clut. The clut disappears with its
	/// last owner.
	pub fn remove_image(&mut self, index: usize) -> Result<VloImage, VloError> {
		if index >= self.images.len() {
			return Err(VloError::InvalidInput(format!("no image at index {}", index)));
		}

		let mut image = self.images.remove(index);
		image.detach_clut(&mut self.cluts);
		Ok(image)
	}

	// New images keep the insertion order: after every image with an equal or
	// larger VRAM footprint.
	fn insertion_index(&self, image: &VloImage) -> usize {
		if !self.profile.sorting_order_known {
			return self.images.len();
		}

		self.images.iter()
			.position(|existing| sort_key(existing) < sort_key(image))
			.unwrap_or(self.images.len())
	}

	/// Decodes an archive. Stage boundaries are cross-checked against the
	/// offsets recorded in the stream; any divergence is a hard failure,
	/// unlike the advisory per-image metadata checks.
	#[cfg(feature = "import")]
	pub fn read(data: &[u8], profile: GameProfile) -> Result<VloArchive, VloError> {
		let mut cur = Cursor::new(data);
		let mut signature = [0u8; 4];
		cur.read_exact(&mut signature)?;
		let platform = if &signature == PSX_SIGNATURE {
			Platform::Psx
		} else if &signature == PC_SIGNATURE {
			Platform::Pc
		} else {
			return Err(VloError::Signature(signature));
		};

		let image_count = cur.read_u32::<LE>()? as usize;
		let image_table_offset = cur.read_u32::<LE>()?;
		if image_count > data.len() {
			return Err(VloError::Corrupt("image count"));
		}

		let mut cluts = ClutTable::new();
		let mut clut_table_offset = 0u32;
		let mut clut_table_end = 0u64;
		let mut colors_start = None;
		let mut colors_end = 0u64;
		if platform.is_psx() {
			let clut_count = cur.read_u32::<LE>()? as usize;
			clut_table_offset = cur.read_u32::<LE>()?;
			if clut_count > data.len() {
				return Err(VloError::Corrupt("clut count"));
			}

			// The clut table sits behind the image headers and its color
			// blobs at the end of the file: read both ahead of the linear
			// pass, which then skips over them.
			let return_position = cur.position();
			cur.set_position(clut_table_offset as u64);
			let mut rects = Vec::with_capacity(clut_count);
			for _ in 0..clut_count {
				rects.push(Clut::read_rect(&mut cur)?);
			}
			clut_table_end = cur.position();

			if let Some(&(_, first_offset)) = rects.first() {
				colors_start = Some(first_offset);
				cur.set_position(first_offset as u64);
				for (clut, colors_offset) in rects.iter_mut() {
					require_index(&cur, *colors_offset, "clut color data")?;
					clut.read_colors(&mut cur, &profile)?;
				}
				colors_end = cur.position();
			}

			for (clut, _) in rects {
				cluts.register(clut)?;
			}
			cur.set_position(return_position);
		}

		require_index(&cur, image_table_offset, "image table")?;
		let mut images: Vec<VloImage> = Vec::with_capacity(image_count);
		let mut data_offsets = Vec::with_capacity(image_count);
		for _ in 0..image_count {
			let (image, data_offset) = VloImage::read_header(&mut cur, platform, &profile)?;
			if profile.sorting_order_known {
				if let Some(last) = images.last() {
					if sort_key(last) < sort_key(&image) {
						warn!("image #{} is out of the expected VRAM insertion order", images.len());
					}
				}
			}

			images.push(image);
			data_offsets.push(data_offset);
		}

		if platform.is_psx() {
			require_index(&cur, clut_table_offset, "clut table")?;
			cur.set_position(clut_table_end);
		}

		for (image, data_offset) in images.iter_mut().zip(data_offsets.iter()) {
			align_require_empty(&mut cur)?;
			require_index(&cur, *data_offset, "image pixel data")?;
			image.read_pixel_data(&mut cur, &mut cluts, &profile)?;
		}

		align_require_empty(&mut cur)?;
		if let Some(start) = colors_start {
			require_index(&cur, start, "clut color data")?;
			cur.set_position(colors_end);
		}

		let mut archive = VloArchive {
			platform,
			profile,
			images,
			cluts,
		};
		if cur.position() < data.len() as u64 {
			archive.read_name_block(&mut cur)?;
		}

		Ok(archive)
	}

	#[cfg(feature = "import")]
	fn read_name_block(&mut self, cur: &mut Cursor<&[u8]>) -> Result<(), VloError> {
		let mut signature = [0u8; 4];
		cur.read_exact(&mut signature)?;
		if &signature != NAME_BLOCK_SIGNATURE {
			return Err(VloError::Corrupt("name block signature"));
		}

		let version = cur.read_u8()?;
		if version > NAME_BLOCK_VERSION {
			warn!("unsupported name block version {} found (supported: {})", version, NAME_BLOCK_VERSION);
		}

		let count = cur.read_u16::<LE>()?;
		for _ in 0..count {
			let index = cur.read_u16::<LE>()? as usize;
			let name = cur.read_pstr()?;
			match self.images.get_mut(index) {
				Some(image) => image.set_name(Some(name)),
				None => return Err(VloError::Corrupt("name block image index")),
			}
		}

		Ok(())
	}

	/// Encodes the archive with forward-patched offsets: headers first with
	/// null pointers, then each data block patches its pointer as it lands.
	#[cfg(feature = "export")]
	pub fn write(&mut self) -> Result<Vec<u8>, VloError> {
		let mut cur = Cursor::new(Vec::new());
		cur.write_all(if self.platform.is_psx() { PSX_SIGNATURE } else { PC_SIGNATURE })?;
		cur.write_u32::<LE>(self.images.len() as u32)?;
		let image_table_patch = write_null_u32(&mut cur)?;

		let mut clut_table_patch = None;
		if self.platform.is_psx() {
			cur.write_u32::<LE>(self.cluts.len() as u32)?;
			clut_table_patch = Some(write_null_u32(&mut cur)?);
		}

		let here = cur.position() as u32;
		patch_u32(&mut cur, image_table_patch, here)?;
		let mut image_data_patches = Vec::with_capacity(self.images.len());
		let cluts = &self.cluts;
		let profile = &self.profile;
		for image in self.images.iter_mut() {
			image_data_patches.push(image.write_header(&mut cur, cluts, profile)?);
		}

		let mut clut_color_patches = Vec::with_capacity(self.cluts.len());
		if let Some(patch) = clut_table_patch {
			let here = cur.position() as u32;
			patch_u32(&mut cur, patch, here)?;
			for (_, clut) in self.cluts.iter() {
				clut_color_patches.push(clut.write_rect(&mut cur)?);
			}
		}

		for (image, patch) in self.images.iter().zip(image_data_patches) {
			align(&mut cur)?;
			let here = cur.position() as u32;
			patch_u32(&mut cur, patch, here)?;
			image.write_pixel_data(&mut cur, &self.cluts)?;
		}

		align(&mut cur)?;
		if self.platform.is_psx() {
			for ((_, clut), patch) in self.cluts.iter().zip(clut_color_patches) {
				let here = cur.position() as u32;
				patch_u32(&mut cur, patch, here)?;
				clut.write_colors(&mut cur)?;
			}
		}

		self.write_name_block(&mut cur)?;
		Ok(cur.into_inner())
	}

	#[cfg(feature = "export")]
	fn write_name_block(&self, cur: &mut Cursor<Vec<u8>>) -> Result<(), VloError> {
		let named: Vec<(usize, &str)> = self.images.iter()
			.enumerate()
			.filter_map(|(index, image)| image.name().map(|name| (index, name)))
			.collect();
		if named.is_empty() {
			return Ok(());
		}

		cur.write_all(NAME_BLOCK_SIGNATURE)?;
		cur.write_u8(NAME_BLOCK_VERSION)?;
		cur.write_u16::<LE>(named.len() as u16)?;
		for (index, name) in named {
			cur.write_u16::<LE>(index as u16)?;
			cur.write_pstr(name)?;
		}

		Ok(())
	}
}

#[cfg(feature = "import")]
fn require_index(cur: &Cursor<&[u8]>, expected: u32, what: &'static str) -> Result<(), VloError> {
	if cur.position() != expected as u64 {
		return Err(VloError::Structure {
			what,
			expected,
			found: cur.position() as u32,
		});
	}

	Ok(())
}

// Alignment gaps must be zero filled; anything else means the offsets have
// drifted from the data.
#[cfg(feature = "import")]
fn align_require_empty(cur: &mut Cursor<&[u8]>) -> Result<(), VloError> {
	while cur.position() % ALIGNMENT != 0 {
		let offset = cur.position() as u32;
		if cur.read_u8()? != 0 {
			return Err(VloError::Alignment { offset });
		}
	}

	Ok(())
}

#[cfg(feature = "export")]
fn align(cur: &mut Cursor<Vec<u8>>) -> Result<(), VloError> {
	while cur.position() % ALIGNMENT != 0 {
		cur.write_u8(0)?;
	}

	Ok(())
}

#[cfg(feature = "export")]
fn write_null_u32(cur: &mut Cursor<Vec<u8>>) -> Result<u64, VloError> {
	let at = cur.position();
	cur.write_u32::<LE>(0)?;
	Ok(at)
}

#[cfg(feature = "export")]
fn patch_u32(cur: &mut Cursor<Vec<u8>>, at: u64, value: u32) -> Result<(), VloError> {
	let end = cur.position();
	cur.seek(SeekFrom::Start(at))?;
	cur.write_u32::<LE>(value)?;
	cur.seek(SeekFrom::Start(end))?;
	Ok(())
}

#[cfg(all(test, feature = "import", feature = "export"))]
mod tests {
	use vorgkit_core::color::{
		alpha_of,
		argb,
		ALPHA_OPAQUE
	};

	use crate::image::ExportSettings;
	use crate::quant::NullQuantizer;

	use super::*;

	// Channel values which survive the 15-bit round trip exactly.
	const C0: u8 = 0x00;
	const C9: u8 = 0x4A;
	const C17: u8 = 0x8C;
	const C31: u8 = 0xFF;

	fn solid_bitmap(width: u16, height: u16, color: u32) -> ArgbBitmap {
		ArgbBitmap::new(width, height, vec![color; width as usize * height as usize]).unwrap()
	}

	fn psx_archive() -> VloArchive {
		VloArchive::new(Platform::Psx, GameProfile::frogger())
	}

	fn assert_images_equal(a: &VloArchive, b: &VloArchive) {
		assert_eq!(a.images().len(), b.images().len());
		for (x, y) in a.images().iter().zip(b.images().iter()) {
			assert_eq!(x, y);
		}

		assert_eq!(a.cluts().len(), b.cluts().len());
		for ((_, cx), (_, cy)) in a.cluts().iter().zip(b.cluts().iter()) {
			assert_eq!(cx.position(), cy.position());
			assert_eq!(cx.colors(), cy.colors());
		}
	}

	#[test]
	fn test_signature_rejected() {
		assert!(matches!(
			VloArchive::read(b"2GRX\x00\x00\x00\x00", GameProfile::frogger()),
			Err(VloError::Signature(_))));
	}

	#[test]
	fn test_clut4_solid_round_trip() {
		let mut archive = psx_archive();
		let red = argb(C31, C0, C0, ALPHA_OPAQUE);
		archive.add_image("solid_red", &solid_bitmap(16, 16, red), 7, BitDepth::Clut4,
			Padding::None, None, false, &NullQuantizer).unwrap();

		let key = archive.images()[0].clut().unwrap();
		archive.cluts_mut().assign_position(key, 320, 480).unwrap();

		// One distinct color, the rest of the clut black filled.
		let clut = archive.cluts().get(key).unwrap();
		assert_eq!(16, clut.color_count());
		assert_eq!(1, clut.colors().iter().filter(|c| !c.is_full_black()).count());

		let bytes = archive.write().unwrap();
		let mut decoded = VloArchive::read(&bytes, GameProfile::frogger()).unwrap();
		assert_images_equal(&archive, &decoded);

		// Re-encoding the unmodified archive is byte identical.
		assert_eq!(bytes, decoded.write().unwrap());
	}

	#[test]
	fn test_clut8_round_trip_with_padding() {
		let mut archive = psx_archive();
		let mut pixels = vec![];
		for y in 0..8u16 {
			for x in 0..8u16 {
				let channels = [C0, C9, C17, C31];
				pixels.push(argb(channels[(x % 4) as usize], channels[(y % 4) as usize], C9, ALPHA_OPAQUE));
			}
		}
		let bitmap = ArgbBitmap::new(8, 8, pixels).unwrap();
		archive.add_image("checker", &bitmap, 3, BitDepth::Clut8, Padding::Auto, Some(Abr::Add), false, &NullQuantizer).unwrap();

		let image = &archive.images()[0];
		assert_eq!(8 + 2, image.padded_width());
		assert_eq!(8 + 2, image.padded_height());

		let key = image.clut().unwrap();
		archive.cluts_mut().assign_position(key, 0, 481).unwrap();

		let bytes = archive.write().unwrap();
		let mut decoded = VloArchive::read(&bytes, GameProfile::frogger()).unwrap();
		assert_images_equal(&archive, &decoded);
		assert_eq!(bytes, decoded.write().unwrap());

		// Padding regenerates without a single divergent pixel.
		let (image, cluts, profile) = decoded.image_and_cluts_mut(0).unwrap();
		assert_eq!(0, image.validate_padding(cluts, profile).unwrap());
	}

	#[test]
	fn test_direct15_round_trip() {
		let mut archive = psx_archive();
		let mut pixels = vec![];
		for i in 0..64u32 {
			let channels = [C9, C17, C31];
			pixels.push(argb(channels[(i % 3) as usize], C17, channels[(i % 3) as usize], ALPHA_OPAQUE));
		}
		let bitmap = ArgbBitmap::new(8, 8, pixels).unwrap();
		archive.add_image("fireball", &bitmap, 11, BitDepth::Direct15, Padding::None, None, true, &NullQuantizer).unwrap();
		assert!(archive.images()[0].clut().is_none());

		let bytes = archive.write().unwrap();
		let mut decoded = VloArchive::read(&bytes, GameProfile::frogger()).unwrap();
		assert_images_equal(&archive, &decoded);
		assert_eq!(bytes, decoded.write().unwrap());
	}

	#[test]
	fn test_pc_round_trip() {
		let mut archive = VloArchive::new(Platform::Pc, GameProfile::frogger());
		let mut pixels = vec![];
		for i in 0..256u32 {
			pixels.push(argb((i % 13) as u8 * 19, (i % 7) as u8 * 36, (i % 5) as u8 * 50, ALPHA_OPAQUE));
		}
		let bitmap = ArgbBitmap::new(16, 16, pixels).unwrap();
		archive.add_image("hud_font", &bitmap, 2, BitDepth::Direct15, Padding::None, None, false, &NullQuantizer).unwrap();

		let bytes = archive.write().unwrap();
		let mut decoded = VloArchive::read(&bytes, GameProfile::frogger()).unwrap();
		assert_images_equal(&archive, &decoded);
		assert_eq!(bytes, decoded.write().unwrap());
	}

	#[test]
	fn test_clut_sharing_and_lifetime() {
		let mut archive = psx_archive();
		let blue = argb(C0, C0, C31, ALPHA_OPAQUE);
		archive.add_image("sky_a", &solid_bitmap(16, 16, blue), 1, BitDepth::Clut4,
			Padding::None, None, false, &NullQuantizer).unwrap();
		archive.add_image("sky_b", &solid_bitmap(32, 32, blue), 2, BitDepth::Clut4,
			Padding::None, None, false, &NullQuantizer).unwrap();

		// Identical post-quantization colors resolve to the same clut.
		assert_eq!(1, archive.cluts().len());
		let key = archive.images()[0].clut().unwrap();
		assert_eq!(Some(key), archive.images()[1].clut());
		assert_eq!(2, archive.cluts().get(key).unwrap().owners().len());

		// The clut outlives the first owner, not the last.
		let index = archive.images().iter().position(|image| image.texture_id() == 1).unwrap();
		archive.remove_image(index).unwrap();
		assert!(archive.cluts().contains(key));
		archive.remove_image(0).unwrap();
		assert!(!archive.cluts().contains(key));
	}

	#[test]
	fn test_import_opaque_clut8() {
		let mut archive = psx_archive();
		let mut pixels = vec![];
		for i in 0..(64 * 64u32) {
			let channels = [C0, C9, C17, C31];
			pixels.push(argb(channels[(i % 4) as usize], channels[(i / 64 % 4) as usize], C17, ALPHA_OPAQUE));
		}
		let bitmap = ArgbBitmap::new(64, 64, pixels).unwrap();
		archive.add_image("ground", &bitmap, 20, BitDepth::Clut8, Padding::None, None, false, &NullQuantizer).unwrap();

		let image = &archive.images()[0];
		assert!(archive.cluts().get(image.clut().unwrap()).unwrap().color_count() <= 256);
		assert!(!image.test_flag(crate::image::FLAG_BLACK_IS_TRANSPARENT));
		assert!(image.is_fully_opaque(true));
	}

	#[test]
	fn test_stp_classification_round_trip() {
		let mut archive = psx_archive();
		let green = argb(C0, C31, C0, ALPHA_OPAQUE);
		archive.add_image("glow", &solid_bitmap(16, 16, green), 4, BitDepth::Clut4,
			Padding::None, None, false, &NullQuantizer).unwrap();

		let settings = ExportSettings::TRANSPARENCY | ExportSettings::PSX_SEMI_TRANSPARENT | ExportSettings::INCLUDE_PADDING;
		let image = archive.image_mut(0).unwrap();
		assert!(!image.has_stp_overrides());
		assert!(image.is_fully_opaque(true));
		let opaque: Vec<u32> = image.decoded_pixels(settings).unwrap().to_vec();
		assert!(opaque.iter().all(|p| alpha_of(*p) == ALPHA_OPAQUE));

		// Toggling the translucent flag flips the non-black class default;
		// re-decoding must match the classification predicted by the flags.
		image.set_flag(FLAG_TRANSLUCENT, true);
		assert!(!image.is_fully_opaque(true));
		let semi: Vec<u32> = image.decoded_pixels(settings).unwrap().to_vec();
		assert!(semi.iter().all(|p| alpha_of(*p) == 0x7F));

		image.set_flag(FLAG_TRANSLUCENT, false);
		assert!(image.is_fully_opaque(true));
		assert_eq!(opaque.as_slice(), image.decoded_pixels(settings).unwrap());
	}

	#[test]
	fn test_name_overlay() {
		let mut archive = psx_archive();
		let white = argb(C31, C31, C31, ALPHA_OPAQUE);
		archive.add_image("opt_log_1", &solid_bitmap(16, 16, white), 9, BitDepth::Clut4,
			Padding::None, None, false, &NullQuantizer).unwrap();
		let key = archive.images()[0].clut().unwrap();
		archive.cluts_mut().assign_position(key, 16, 482).unwrap();

		let bytes = archive.write().unwrap();
		let decoded = VloArchive::read(&bytes, GameProfile::frogger()).unwrap();
		assert_eq!(Some("opt_log_1"), decoded.images()[0].name());

		// Without names there is no trailing block.
		let mut unnamed = VloArchive::read(&bytes, GameProfile::frogger()).unwrap();
		unnamed.set_image_name(0, None).unwrap();
		let stripped = unnamed.write().unwrap();
		assert!(stripped.len() < bytes.len());
		assert!(!stripped.windows(4).any(|window| window == NAME_BLOCK_SIGNATURE.as_slice()));
	}

	#[test]
	fn test_duplicate_name_and_id_rejected() {
		let mut archive = psx_archive();
		let gray = argb(C17, C17, C17, ALPHA_OPAQUE);
		archive.add_image("rock", &solid_bitmap(16, 16, gray), 5, BitDepth::Clut4,
			Padding::None, None, false, &NullQuantizer).unwrap();

		assert!(matches!(
			archive.add_image("rock", &solid_bitmap(16, 16, gray), 6, BitDepth::Clut4,
				Padding::None, None, false, &NullQuantizer),
			Err(VloError::InvalidInput(_))));
		assert!(matches!(
			archive.add_image("rock2", &solid_bitmap(16, 16, gray), 5, BitDepth::Clut4,
				Padding::None, None, false, &NullQuantizer),
			Err(VloError::InvalidInput(_))));
		assert!(!is_valid_texture_name("bad name!"));
	}

	#[test]
	fn test_oversized_import_rejected() {
		let mut archive = psx_archive();
		let bitmap = solid_bitmap(257, 4, 0xFF00_0000);
		assert!(matches!(
			archive.add_image("too_wide", &bitmap, 1, BitDepth::Clut8, Padding::None, None, false, &NullQuantizer),
			Err(VloError::InvalidInput(_))));
		assert!(archive.images().is_empty());
	}

	#[test]
	fn test_structure_mismatch_is_fatal() {
		let mut archive = psx_archive();
		let red = argb(C31, C0, C0, ALPHA_OPAQUE);
		archive.add_image("solid", &solid_bitmap(16, 16, red), 7, BitDepth::Clut4,
			Padding::None, None, false, &NullQuantizer).unwrap();
		let key = archive.images()[0].clut().unwrap();
		archive.cluts_mut().assign_position(key, 320, 480).unwrap();

		let mut bytes = archive.write().unwrap();
		// Nudge the image table offset off by four.
		bytes[8] += 4;
		assert!(matches!(
			VloArchive::read(&bytes, GameProfile::frogger()),
			Err(VloError::Structure { .. })));
	}

	#[test]
	fn test_alignment_gap_must_be_zero() {
		let mut archive = psx_archive();
		let teal = argb(C0, C17, C17, ALPHA_OPAQUE);
		// A 6x1 8-bit image leaves a two byte alignment gap after its pixels.
		archive.add_image("strip", &solid_bitmap(6, 1, teal), 8, BitDepth::Clut8,
			Padding::None, None, false, &NullQuantizer).unwrap();
		let key = archive.images()[0].clut().unwrap();
		archive.cluts_mut().assign_position(key, 0, 496).unwrap();

		let bytes = archive.write().unwrap();
		assert!(VloArchive::read(&bytes, GameProfile::frogger()).is_ok());

		// Header (20) + image header (24) + clut rect (12) + 6 pixel bytes.
		let gap = 20 + 24 + 12 + 6;
		let mut corrupted = bytes.clone();
		assert_eq!(0, corrupted[gap]);
		corrupted[gap] = 0xAA;
		assert!(matches!(
			VloArchive::read(&corrupted, GameProfile::frogger()),
			Err(VloError::Alignment { .. })));
	}

	#[test]
	fn test_unplaced_clut_blocks_save() {
		let mut archive = psx_archive();
		let amber = argb(C31, C17, C0, ALPHA_OPAQUE);
		archive.add_image("amber", &solid_bitmap(16, 16, amber), 12, BitDepth::Clut4,
			Padding::None, None, false, &NullQuantizer).unwrap();

		// The fresh clut is registered but waiting on the VRAM allocator.
		assert!(matches!(archive.write(), Err(VloError::Invariant(_))));

		let key = archive.images()[0].clut().unwrap();
		archive.cluts_mut().assign_position(key, 640, 490).unwrap();
		assert!(archive.write().is_ok());
	}

	#[test]
	fn test_insertion_follows_sort_order() {
		let mut archive = psx_archive();
		let a = argb(C9, C0, C0, ALPHA_OPAQUE);
		archive.add_image("small", &solid_bitmap(16, 16, a), 1, BitDepth::Clut4,
			Padding::None, None, false, &NullQuantizer).unwrap();
		archive.add_image("large", &solid_bitmap(64, 64, a), 2, BitDepth::Clut4,
			Padding::None, None, false, &NullQuantizer).unwrap();

		// The larger VRAM footprint sorts first.
		assert_eq!(2, archive.images()[0].texture_id());
		assert_eq!(1, archive.images()[1].texture_id());
	}
}
