//! Per-title capability records.
//!
//! The VLO2 format stayed byte-compatible from 1996 to 2001, but the authoring
//! tool which produced the archives was rewritten several times, and its
//! heuristics (padding widths, HIT flag math, STP conventions) drifted between
//! titles. Each archive is decoded against one of these records.

/// Hardware platform an archive targets, taken from the signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Platform {
	Pc,
	Psx,
}

impl Platform {
	pub const fn is_psx(self) -> bool {
		matches!(self, Platform::Psx)
	}
}

/// Which padding table the PC build of a title used when importing images.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PcPaddingEra {
	/// Pre-recode builds: 2 pixel padding.
	PreRecode,
	/// Post-recode builds: 4 pixel padding, dropping to 2 near the size cap.
	Standard,
	/// Retail Windows builds: width-threshold table, otherwise configured by
	/// hand per texture and unknowable from the archive alone.
	RetailWindows,
}

/// Import-time padding behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Padding {
	/// No padding at all (beyond bit-depth alignment).
	None,
	/// Padding widths looked up from the game profile.
	Auto,
	/// Explicit horizontal and vertical padding amounts.
	Exact(u16, u16),
}

/// Capability record for one title, selected once per archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameProfile {
	/// Later-toolkit titles (MediEvil II, C-12): individual palette entries may
	/// flip the STP bit, and the per-class STP default is decided by majority.
	pub later_tool_era: bool,
	/// Sort/friction/interaction metadata packed into flag bits 8-14.
	pub medievil_surface_flags: bool,
	/// C-12 archives never set HIT_Y.
	pub hit_y_disabled: bool,
	/// C-12 suppresses HIT_X for widths divisible by 64.
	pub hit_x_mod64_disabled: bool,
	/// MoonWarrior and later dropped the U==0xFF adjustment from the HIT_X math.
	pub hit_u_wraparound_fix: bool,
	/// Whether the archive image order follows the known VRAM-insertion order.
	pub sorting_order_known: bool,
	/// Whether height-16 tonal ("fog") palettes are supported.
	pub clut_fog: bool,
	/// MediEvil II ships images which are almost entirely padding (span 258);
	/// their padding is left untouched.
	pub oversized_padding_quirk: bool,
	/// Pre-recode PC builds numbered pages along x instead of y.
	pub pc_page_by_column: bool,
	pub pc_padding: PcPaddingEra,
}

impl GameProfile {
	pub const fn old_frogger() -> GameProfile {
		GameProfile {
			later_tool_era: false,
			medievil_surface_flags: false,
			hit_y_disabled: false,
			hit_x_mod64_disabled: false,
			hit_u_wraparound_fix: false,
			sorting_order_known: true,
			clut_fog: false,
			oversized_padding_quirk: false,
			pc_page_by_column: true,
			pc_padding: PcPaddingEra::PreRecode,
		}
	}

	pub const fn frogger() -> GameProfile {
		GameProfile {
			pc_page_by_column: false,
			pc_padding: PcPaddingEra::RetailWindows,
			..GameProfile::old_frogger()
		}
	}

	/// Frogger builds predating the retail Windows release.
	pub const fn frogger_prototype() -> GameProfile {
		GameProfile {
			pc_padding: PcPaddingEra::Standard,
			..GameProfile::frogger()
		}
	}

	pub const fn beast_wars() -> GameProfile {
		GameProfile {
			pc_padding: PcPaddingEra::Standard,
			..GameProfile::frogger()
		}
	}

	pub const fn medievil() -> GameProfile {
		GameProfile {
			medievil_surface_flags: true,
			..GameProfile::beast_wars()
		}
	}

	pub const fn moonwarrior() -> GameProfile {
		GameProfile {
			hit_u_wraparound_fix: true,
			sorting_order_known: false,
			clut_fog: true,
			..GameProfile::beast_wars()
		}
	}

	pub const fn medievil2() -> GameProfile {
		GameProfile {
			later_tool_era: true,
			oversized_padding_quirk: true,
			..GameProfile::moonwarrior()
		}
	}

	pub const fn c12() -> GameProfile {
		GameProfile {
			later_tool_era: true,
			hit_y_disabled: true,
			hit_x_mod64_disabled: true,
			clut_fog: false,
			..GameProfile::moonwarrior()
		}
	}
}
