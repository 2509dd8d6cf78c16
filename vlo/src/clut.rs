use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use log::warn;

use std::io::Cursor;

use vorgkit_core::color::ClutColor;

use crate::error::VloError;
use crate::game::GameProfile;
use crate::vram;

pub const CLUT4_COLOR_COUNT: usize = 16;
pub const CLUT8_COLOR_COUNT: usize = 256;

/// Hardware placement constraint on the clut x position, in units.
pub const X_POSITION_MODULO: u16 = 16;

/// Height marking a tonal ("fog") clut: 15 faded copies below the base row.
pub const CLUT_FOG_HEIGHT: u16 = 16;

// Clut ID format: YYYYYYYYYYXXXXXX (10 y bits, 6 x bits, x shifted right by 4).
const CLUT_SHIFT_X: u16 = 4;
const MAX_CLUT_X: u16 = 64 << CLUT_SHIFT_X;
const MAX_CLUT_Y: u16 = 1024;

// Fog rows fade linearly toward this gray; 5-bit channels, so compare in 5-bit.
const FOG_COLOR_TARGET_VALUE: u8 = 0x88;
const FOG_COLOR_TARGET_SMALL: u8 = FOG_COLOR_TARGET_VALUE >> 3;

/// Creates a 16-bit clut ID representing a clut position.
pub fn clut_id(x: u16, y: u16) -> Result<u16, VloError> {
	if x >= MAX_CLUT_X {
		return Err(VloError::InvalidInput(format!("invalid clut x coordinate: {}", x)));
	}
	if y >= MAX_CLUT_Y {
		return Err(VloError::InvalidInput(format!("invalid clut y coordinate: {}", y)));
	}
	if x % (1 << CLUT_SHIFT_X) != 0 {
		return Err(VloError::InvalidInput(format!("clut x value of {} is not divisible by {}", x, 1 << CLUT_SHIFT_X)));
	}

	Ok(y << 6 | x >> CLUT_SHIFT_X)
}

/// Clut x position encoded in a clut ID.
pub const fn clut_id_x(id: u16) -> u16 {
	(id & 0x3F) << CLUT_SHIFT_X
}

/// Clut y position encoded in a clut ID.
pub const fn clut_id_y(id: u16) -> u16 {
	id >> 6
}

/// One color lookup table: a contiguous 16 or 256 color block placed in VRAM.
///
/// Cluts are often shared across images with identical post-quantization
/// colors. A clut without a position has been deferred to an external VRAM
/// allocator and cannot be saved until one is assigned.
#[derive(Clone, Debug)]
pub struct Clut {
	position: Option<(u16, u16)>,
	width: u16,
	height: u16,
	colors: Vec<ClutColor>,
	fog_enabled: bool,
	owners: Vec<u16>,
}

impl Clut {
	pub fn new() -> Clut {
		Clut {
			position: None,
			width: 0,
			height: 0,
			colors: vec![],
			fog_enabled: false,
			owners: vec![],
		}
	}

	/// Sets up the clut color grid at the given VRAM position.
	pub fn setup(&mut self, x: u16, y: u16, width: u16, height: u16) -> Result<(), VloError> {
		if x as u32 + width as u32 > vram::PSX_MAX_X_UNITS as u32 {
			return Err(VloError::InvalidInput(format!("clut at [{}, {}] would place colors outside of VRAM", x, y)));
		}
		if x % X_POSITION_MODULO != 0 {
			return Err(VloError::InvalidInput(format!("clut x coordinate {} is not a multiple of {}", x, X_POSITION_MODULO)));
		}
		if y as u32 + height as u32 > vram::PSX_MAX_Y as u32 {
			return Err(VloError::InvalidInput(format!("clut at [{}, {}] would place colors outside of VRAM", x, y)));
		}

		self.set_dimensions(width, height)?;
		self.position = Some((x, y));
		Ok(())
	}

	fn set_dimensions(&mut self, width: u16, height: u16) -> Result<(), VloError> {
		if width as usize != CLUT4_COLOR_COUNT && width as usize != CLUT8_COLOR_COUNT {
			return Err(VloError::InvalidInput(format!("invalid clut width {}, must be {} or {}", width, CLUT4_COLOR_COUNT, CLUT8_COLOR_COUNT)));
		}

		let count = width as usize * height as usize;
		if self.colors.len() != count {
			self.colors = vec![ClutColor::default(); count];
		}
		self.width = width;
		self.height = height;
		Ok(())
	}

	/// Bulk-replaces the color grid, keeping the current position.
	pub fn load_colors(&mut self, width: u16, height: u16, colors: Vec<ClutColor>) -> Result<(), VloError> {
		if colors.len() != width as usize * height as usize {
			return Err(VloError::InvalidInput(format!("expected {} colors, got {}", width as usize * height as usize, colors.len())));
		}

		self.set_dimensions(width, height)?;
		self.colors = colors;
		self.fog_enabled = false;
		Ok(())
	}

	pub fn position(&self) -> Option<(u16, u16)> {
		self.position
	}

	pub(crate) fn set_position(&mut self, x: u16, y: u16) -> Result<(), VloError> {
		if x as u32 + self.width as u32 > vram::PSX_MAX_X_UNITS as u32
			|| y as u32 + self.height as u32 > vram::PSX_MAX_Y as u32 {
			return Err(VloError::InvalidInput(format!("clut position [{}, {}] would place colors outside of VRAM", x, y)));
		}
		if x % X_POSITION_MODULO != 0 {
			return Err(VloError::InvalidInput(format!("clut x coordinate {} is not a multiple of {}", x, X_POSITION_MODULO)));
		}

		self.position = Some((x, y));
		Ok(())
	}

	pub fn width(&self) -> u16 {
		self.width
	}

	pub fn height(&self) -> u16 {
		self.height
	}

	pub fn color_count(&self) -> usize {
		self.colors.len()
	}

	pub fn colors(&self) -> &[ClutColor] {
		&self.colors
	}

	pub fn fog_enabled(&self) -> bool {
		self.fog_enabled
	}

	/// Images currently using this clut, by texture ID.
	pub fn owners(&self) -> &[u16] {
		&self.owners
	}

	pub(crate) fn owners_mut(&mut self) -> &mut Vec<u16> {
		&mut self.owners
	}

	pub fn color(&self, index: usize) -> Result<ClutColor, VloError> {
		self.colors.get(index).copied()
			.ok_or_else(|| VloError::InvalidInput(format!("color index {} is outside of the clut ({}x{})", index, self.width, self.height)))
	}

	/// Returns the index of the given color, if present.
	/// The search is linear and order-sensitive: two entries may share RGB and
	/// differ only in the STP bit.
	pub fn color_index(&self, color: ClutColor) -> Option<usize> {
		self.colors.iter().position(|c| c.packed() == color.packed())
	}

	/// Axis-aligned rectangle intersection in VRAM unit space.
	/// Cluts without an assigned position never overlap anything.
	pub fn overlaps(&self, other: &Clut) -> bool {
		let ((x1, y1), (x2, y2)) = match (self.position, other.position) {
			(Some(a), Some(b)) => (a, b),
			_ => return false,
		};

		x2 < x1 + self.width && x2 + other.width > x1
			&& y2 < y1 + self.height && y2 + other.height > y1
	}

	/// The 16-bit clut ID images use to reference this clut's position.
	pub fn id(&self) -> Result<u16, VloError> {
		match self.position {
			Some((x, y)) => clut_id(x, y),
			None => Err(VloError::Invariant("clut has no assigned VRAM position".to_string())),
		}
	}

	/// Marks this clut as a tonal fog clut. The color grid must already hold
	/// the faded rows.
	pub fn enable_fog(&mut self, profile: &GameProfile) -> Result<(), VloError> {
		if self.height != CLUT_FOG_HEIGHT {
			return Err(VloError::InvalidInput(format!("fog requires a clut height of {}, not {}", CLUT_FOG_HEIGHT, self.height)));
		}
		if !profile.clut_fog {
			return Err(VloError::InvalidInput("this title does not support clut fog".to_string()));
		}

		self.fog_enabled = true;
		Ok(())
	}

	/// Reads the 12 byte clut placement record, returning the clut and its
	/// color data offset.
	#[cfg(feature = "import")]
	pub(crate) fn read_rect(cur: &mut Cursor<&[u8]>) -> Result<(Clut, u32), VloError> {
		let x = cur.read_i16::<LE>()?;
		let y = cur.read_i16::<LE>()?;
		let width = cur.read_i16::<LE>()?;
		let height = cur.read_i16::<LE>()?;
		let colors_offset = cur.read_u32::<LE>()?;

		if x < 0 || y < 0 || width < 0 || height < 0 {
			return Err(VloError::Corrupt("clut placement record"));
		}

		let mut clut = Clut::new();
		clut.setup(x as u16, y as u16, width as u16, height as u16)?;
		Ok((clut, colors_offset))
	}

	#[cfg(feature = "export")]
	pub(crate) fn write_rect(&self, cur: &mut Cursor<Vec<u8>>) -> Result<u64, VloError> {
		let (x, y) = self.position
			.ok_or_else(|| VloError::Invariant("cannot save a clut with no assigned VRAM position".to_string()))?;

		cur.write_u16::<LE>(x)?;
		cur.write_u16::<LE>(y)?;
		cur.write_u16::<LE>(self.width)?;
		cur.write_u16::<LE>(self.height)?;

		let patch_at = cur.position();
		cur.write_u32::<LE>(0)?;
		Ok(patch_at)
	}

	/// Reads the color block and classifies fog cluts.
	#[cfg(feature = "import")]
	pub(crate) fn read_colors(&mut self, cur: &mut Cursor<&[u8]>, profile: &GameProfile) -> Result<(), VloError> {
		for color in self.colors.iter_mut() {
			*color = ClutColor::from_packed(cur.read_u16::<LE>()?);
		}

		// A fog clut fades every column down to gray on its last row.
		let width = self.width as usize;
		let fog = self.height == CLUT_FOG_HEIGHT && (0..width).all(|x| {
			let color = self.colors[(CLUT_FOG_HEIGHT as usize - 1) * width + x];
			color.small_red() == FOG_COLOR_TARGET_SMALL
				&& color.small_green() == FOG_COLOR_TARGET_SMALL
				&& color.small_blue() == FOG_COLOR_TARGET_SMALL
		});
		self.fog_enabled = fog;

		if self.fog_enabled {
			self.validate_fog(profile);
		}
		Ok(())
	}

	#[cfg(feature = "import")]
	fn validate_fog(&self, profile: &GameProfile) {
		if !profile.clut_fog {
			warn!("{:?}: this title is not expected to support clut fog, yet fog appears to be present", self);
			return;
		}

		// The original tables were computed from colors of higher precision
		// than 15-bit storage keeps, so allow each channel a little slack.
		for y in 1..CLUT_FOG_HEIGHT as usize {
			for x in 0..self.width as usize {
				let start = self.colors[x];
				let loaded = self.colors[y * self.width as usize + x];
				let calculated = match fog_color(start, y as u16) {
					Ok(color) => color,
					Err(_) => return,
				};

				let diff_red = (loaded.small_red() as i16 - calculated.small_red() as i16).abs();
				let diff_green = (loaded.small_green() as i16 - calculated.small_green() as i16).abs();
				let diff_blue = (loaded.small_blue() as i16 - calculated.small_blue() as i16).abs();
				if diff_red > 2 || diff_green > 2 || diff_blue > 2 {
					warn!("fog color at ({}, {}) was loaded as {:04X} but calculated as {:04X}",
						x, y, loaded.packed(), calculated.packed());
				}
			}
		}
	}

	#[cfg(feature = "export")]
	pub(crate) fn write_colors(&self, cur: &mut Cursor<Vec<u8>>) -> Result<(), VloError> {
		for color in self.colors.iter() {
			cur.write_u16::<LE>(color.packed())?;
		}

		Ok(())
	}
}

impl Default for Clut {
	fn default() -> Clut {
		Clut::new()
	}
}

/// Calculates one faded fog row color: a linear shift toward gray 0x888888.
pub fn fog_color(input: ClutColor, fade_progress: u16) -> Result<ClutColor, VloError> {
	if fade_progress >= CLUT_FOG_HEIGHT {
		return Err(VloError::InvalidInput(format!("invalid fade progress {}, valid range is [0, {})", fade_progress, CLUT_FOG_HEIGHT)));
	}

	// Channels are faded at 8-bit precision from the raw shifted 5-bit values.
	let fade = |start: u8| -> u8 {
		let start = (start as i32) << 3;
		let target = FOG_COLOR_TARGET_VALUE as i32;
		let faded = if start > target {
			start - (start - target) * fade_progress as i32 / CLUT_FOG_HEIGHT as i32
		} else if start < target {
			start + (target - start) * fade_progress as i32 / CLUT_FOG_HEIGHT as i32
		} else {
			target
		};
		faded as u8
	};

	let red = fade(input.small_red());
	let green = fade(input.small_green());
	let blue = fade(input.small_blue());
	Ok(ClutColor::from_argb(vorgkit_core::color::argb(red, green, blue, 0), input.stp()))
}

/// Stable handle to a clut registered in a [`ClutTable`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ClutKey(u32);

/// The set of cluts registered for one archive.
///
/// Registered cluts may never overlap in VRAM. A clut's lifetime is driven by
/// its owner count: the first [`attach`](ClutTable::attach) brings a fresh clut
/// in, and the last [`detach`](ClutTable::detach) removes it from the table.
#[derive(Clone, Debug, Default)]
pub struct ClutTable {
	next_key: u32,
	entries: Vec<(ClutKey, Clut)>,
}

impl ClutTable {
	pub fn new() -> ClutTable {
		ClutTable {
			next_key: 0,
			entries: vec![],
		}
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn contains(&self, key: ClutKey) -> bool {
		self.entries.iter().any(|(k, _)| *k == key)
	}

	/// Registers a clut, enforcing the no-overlap invariant. The check is
	/// deferred for cluts without an assigned position and re-run by
	/// [`assign_position`](ClutTable::assign_position).
	pub fn register(&mut self, clut: Clut) -> Result<ClutKey, VloError> {
		if clut.position().is_some() {
			if let Some((_, other)) = self.entries.iter().find(|(_, other)| clut.overlaps(other)) {
				return Err(VloError::Invariant(format!(
					"clut at {:?} overlaps the registered clut at {:?}", clut.position(), other.position())));
			}
		}

		let key = ClutKey(self.next_key);
		self.next_key += 1;
		self.entries.push((key, clut));
		Ok(key)
	}

	pub fn unregister(&mut self, key: ClutKey) -> Option<Clut> {
		let index = self.entries.iter().position(|(k, _)| *k == key)?;
		Some(self.entries.remove(index).1)
	}

	pub fn get(&self, key: ClutKey) -> Option<&Clut> {
		self.entries.iter().find(|(k, _)| *k == key).map(|(_, clut)| clut)
	}

	fn get_mut(&mut self, key: ClutKey) -> Option<&mut Clut> {
		self.entries.iter_mut().find(|(k, _)| *k == key).map(|(_, clut)| clut)
	}

	/// Mutable access for in-place edits. Shared cluts must be treated as
	/// copy-on-write, so edits are refused once a second owner is attached.
	pub fn edit(&mut self, key: ClutKey) -> Result<&mut Clut, VloError> {
		let clut = self.get_mut(key)
			.ok_or_else(|| VloError::Invariant(format!("{:?} is not registered", key)))?;
		if clut.owners().len() > 1 {
			return Err(VloError::Invariant(format!("{:?} has {} owners and cannot be edited in place", key, clut.owners().len())));
		}

		Ok(clut)
	}

	/// Iterates cluts in registration order, which is also save order.
	pub fn iter(&self) -> impl Iterator<Item = (ClutKey, &Clut)> {
		self.entries.iter().map(|(key, clut)| (*key, clut))
	}

	/// Resolves a wire clut ID. ID 0 is the reserved "no clut" sentinel and
	/// resolves to `None`; any other unknown ID is an error.
	pub fn from_id(&self, id: u16) -> Result<Option<ClutKey>, VloError> {
		if id == 0 {
			return Ok(None);
		}

		let position = (clut_id_x(id), clut_id_y(id));
		self.entries.iter()
			.find(|(_, clut)| clut.position() == Some(position))
			.map(|(key, _)| Some(*key))
			.ok_or_else(|| VloError::Invariant(format!("no clut registered at [{}, {}]", position.0, position.1)))
	}

	/// Finds a clut whose full ordered color content matches, enabling sharing
	/// between images with identical post-quantization colors.
	pub fn find_by_colors(&self, width: u16, colors: &[ClutColor]) -> Option<ClutKey> {
		self.entries.iter()
			.find(|(_, clut)| clut.width() == width && clut.colors() == colors)
			.map(|(key, _)| *key)
	}

	/// Records a texture as an owner of the clut.
	pub fn attach(&mut self, key: ClutKey, texture_id: u16) -> Result<(), VloError> {
		self.get_mut(key)
			.ok_or_else(|| VloError::Invariant(format!("{:?} is not registered", key)))?
			.owners_mut()
			.push(texture_id);
		Ok(())
	}

	/// Removes a texture from the clut's owners. The clut is unregistered when
	/// its last owner detaches; returns true if that happened.
	pub fn detach(&mut self, key: ClutKey, texture_id: u16) -> bool {
		let empty = match self.get_mut(key) {
			Some(clut) => {
				if let Some(index) = clut.owners().iter().position(|id| *id == texture_id) {
					clut.owners_mut().remove(index);
				}
				clut.owners().is_empty()
			}
			None => return false,
		};

		if empty {
			self.unregister(key);
			return true;
		}

		false
	}

	/// Assigns a VRAM position to a deferred clut, re-running the overlap
	/// check that registration skipped.
	pub fn assign_position(&mut self, key: ClutKey, x: u16, y: u16) -> Result<(), VloError> {
		let index = self.entries.iter().position(|(k, _)| *k == key)
			.ok_or_else(|| VloError::Invariant(format!("{:?} is not registered", key)))?;

		let width = self.entries[index].1.width as u32;
		let height = self.entries[index].1.height as u32;
		let conflict = self.entries.iter()
			.enumerate()
			.filter(|(i, _)| *i != index)
			.find_map(|(_, (_, other))| {
				let (ox, oy) = other.position()?;
				let (ox, oy) = (ox as u32, oy as u32);
				let hit = ox < x as u32 + width && ox + other.width as u32 > x as u32
					&& oy < y as u32 + height && oy + other.height as u32 > y as u32;
				if hit { Some((ox, oy)) } else { None }
			});
		if let Some(position) = conflict {
			return Err(VloError::Invariant(format!(
				"clut position [{}, {}] overlaps the registered clut at {:?}", x, y, position)));
		}

		self.entries[index].1.set_position(x, y)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_clut(x: u16, y: u16) -> Clut {
		let mut clut = Clut::new();
		clut.setup(x, y, 16, 1).unwrap();
		clut
	}

	#[test]
	fn test_setup_validation() {
		let mut clut = Clut::new();
		assert!(clut.setup(0, 480, 16, 1).is_ok());
		assert!(clut.setup(0, 480, 17, 1).is_err());
		assert!(clut.setup(8, 480, 16, 1).is_err());
		assert!(clut.setup(1024, 480, 16, 1).is_err());
		assert!(clut.setup(0, 512, 16, 1).is_err());
		assert!(clut.setup(1008, 511, 16, 1).is_ok());
	}

	#[test]
	fn test_clut_id_round_trip() {
		let id = clut_id(320, 480).unwrap();
		assert_eq!(320, clut_id_x(id));
		assert_eq!(480, clut_id_y(id));
		assert!(clut_id(321, 480).is_err());
		assert_eq!(id, test_clut(320, 480).id().unwrap());
	}

	#[test]
	fn test_overlaps() {
		let a = test_clut(0, 480);
		let b = test_clut(16, 480);
		assert!(!a.overlaps(&b));
		assert!(!b.overlaps(&a));

		let mut c = Clut::new();
		c.setup(0, 480, 256, 1).unwrap();
		assert!(a.overlaps(&c));
		assert!(c.overlaps(&b));
		assert!(!c.overlaps(&Clut::new()));
	}

	#[test]
	fn test_register_rejects_overlap() {
		let mut table = ClutTable::new();
		table.register(test_clut(0, 480)).unwrap();
		assert!(table.register(test_clut(16, 480)).is_ok());
		assert!(table.register(test_clut(0, 480)).is_err());

		// Deferred positions skip the check until assignment.
		let deferred = table.register(Clut::new()).unwrap();
		assert!(table.assign_position(deferred, 0, 480).is_err());
	}

	#[test]
	fn test_from_id() {
		let mut table = ClutTable::new();
		let key = table.register(test_clut(320, 480)).unwrap();

		assert_eq!(None, table.from_id(0).unwrap());
		assert_eq!(Some(key), table.from_id(clut_id(320, 480).unwrap()).unwrap());
		assert!(table.from_id(clut_id(640, 480).unwrap()).is_err());
	}

	#[test]
	fn test_owner_driven_lifetime() {
		let mut table = ClutTable::new();
		let key = table.register(test_clut(0, 480)).unwrap();
		table.attach(key, 5).unwrap();
		table.attach(key, 9).unwrap();

		assert!(!table.detach(key, 5));
		assert!(table.contains(key));
		assert!(table.detach(key, 9));
		assert!(!table.contains(key));
	}

	#[test]
	fn test_edit_rejects_shared() {
		let mut table = ClutTable::new();
		let key = table.register(test_clut(0, 480)).unwrap();
		table.attach(key, 1).unwrap();
		assert!(table.edit(key).is_ok());
		table.attach(key, 2).unwrap();
		assert!(table.edit(key).is_err());
	}

	#[test]
	fn test_find_by_colors() {
		let mut colors = vec![ClutColor::default(); 16];
		colors[0] = ClutColor::from_packed(0x7FFF);

		let mut clut = test_clut(0, 480);
		clut.load_colors(16, 1, colors.clone()).unwrap();

		let mut table = ClutTable::new();
		let key = table.register(clut).unwrap();
		assert_eq!(Some(key), table.find_by_colors(16, &colors));

		colors[1] = ClutColor::from_packed(1);
		assert_eq!(None, table.find_by_colors(16, &colors));
	}

	#[cfg(all(feature = "import", feature = "export"))]
	#[test]
	fn test_fog_detection() {
		use vorgkit_core::color::argb;

		let gray = ClutColor::from_argb(argb(0x88, 0x88, 0x88, 0), false);
		let mut clut = Clut::new();
		clut.setup(0, 480, 16, CLUT_FOG_HEIGHT).unwrap();
		clut.load_colors(16, CLUT_FOG_HEIGHT, vec![gray; 16 * CLUT_FOG_HEIGHT as usize]).unwrap();

		// A uniformly gray clut is its own fog table.
		let mut cur = Cursor::new(Vec::new());
		clut.write_colors(&mut cur).unwrap();
		let bytes = cur.into_inner();

		let mut decoded = Clut::new();
		decoded.setup(0, 480, 16, CLUT_FOG_HEIGHT).unwrap();
		decoded.read_colors(&mut Cursor::new(bytes.as_slice()), &GameProfile::moonwarrior()).unwrap();
		assert!(decoded.fog_enabled());

		// Height 16 alone does not make a fog clut: the bottom row must have
		// converged to gray.
		let mut colors = vec![gray; 16 * CLUT_FOG_HEIGHT as usize];
		colors[15 * 16] = ClutColor::from_packed(0x7FFF);
		clut.load_colors(16, CLUT_FOG_HEIGHT, colors).unwrap();

		let mut cur = Cursor::new(Vec::new());
		clut.write_colors(&mut cur).unwrap();
		let bytes = cur.into_inner();
		decoded.read_colors(&mut Cursor::new(bytes.as_slice()), &GameProfile::moonwarrior()).unwrap();
		assert!(!decoded.fog_enabled());
	}

	#[test]
	fn test_enable_fog_guard() {
		let mut clut = Clut::new();
		clut.setup(0, 480, 16, CLUT_FOG_HEIGHT).unwrap();
		assert!(clut.enable_fog(&GameProfile::frogger()).is_err());
		assert!(clut.enable_fog(&GameProfile::moonwarrior()).is_ok());

		let mut flat = Clut::new();
		flat.setup(0, 496, 16, 1).unwrap();
		assert!(flat.enable_fog(&GameProfile::moonwarrior()).is_err());
	}

	#[test]
	fn test_fog_color() {
		let white = ClutColor::from_argb(0x00FF_FFFF, false);
		// Progress 0 leaves the base row untouched.
		assert_eq!(white.packed(), fog_color(white, 0).unwrap().packed());

		// The last generated row has converged to gray.
		let faded = fog_color(white, 15).unwrap();
		let expected = 0xF8 - (0xF8 - 0x88) * 15 / 16;
		assert_eq!(expected as u8 >> 3, faded.small_red());
		assert!(fog_color(white, 16).is_err());
	}
}
