use std::fmt::{self, Display, Formatter};
use std::slice;
use std::str::FromStr;
use std::vec;

use bitflags::bitflags;

use crate::com::{self, Dispatch};
use crate::error::{Error, Result};
use crate::variant::Variant;

/// File systems accepted by [`Volume::format`].
///
/// Parses case-insensitively; [`as_str`](Self::as_str) is the spelling the
/// storage provider expects.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileSystem {
	ExFat,
	Fat,
	Fat32,
	Ntfs,
	ReFs,
}

impl FileSystem {
	pub fn as_str(&self) -> &'static str {
		match self {
			FileSystem::ExFat => "ExFAT",
			FileSystem::Fat => "FAT",
			FileSystem::Fat32 => "FAT32",
			FileSystem::Ntfs => "NTFS",
			FileSystem::ReFs => "ReFS",
		}
	}
}

impl Display for FileSystem {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for FileSystem {
	type Err = Error;

	fn from_str(s: &str) -> Result<FileSystem> {
		const ALL: [FileSystem; 5] = [
			FileSystem::ExFat,
			FileSystem::Fat,
			FileSystem::Fat32,
			FileSystem::Ntfs,
			FileSystem::ReFs,
		];
		ALL.iter()
			.find(|fs| fs.as_str().eq_ignore_ascii_case(s))
			.copied()
			.ok_or_else(|| Error::UnknownFileSystem(s.to_owned()))
	}
}

/// Options for [`Volume::format`].
///
/// `compress` and `short_file_names` only apply to non-ReFS file systems;
/// `integrity_streams` and `large_frs` only apply to ReFS. Whichever group
/// does not apply to the chosen file system is not sent to the provider.
#[derive(Debug, Clone, Default)]
pub struct FormatOptions {
	/// Cluster size in bytes. Zero leaves the choice to the provider.
	pub allocation_unit_size: u32,

	/// Perform a full format instead of a quick one.
	pub full: bool,

	/// Format even if the volume is in use.
	pub force: bool,

	/// Enable NTFS compression.
	pub compress: bool,

	/// Enable 8.3 short file name support.
	pub short_file_names: bool,

	/// Enable ReFS integrity streams.
	pub integrity_streams: bool,

	/// Use large file record segments.
	pub large_frs: bool,

	/// Disable heat gathering on tiered volumes.
	pub disable_heat_gathering: bool,
}

bitflags! {
	/// Maintenance passes run by [`Volume::optimize`].
	pub struct OptimizeFlags : u32 {
		/// Retrim the volume.
		const RETRIM = 0b00001;

		/// Analyze only, without defragmenting.
		const ANALYZE = 0b00010;

		/// Defragment the volume.
		const DEFRAG = 0b00100;

		/// Consolidate slabs on thinly provisioned volumes.
		const SLAB_CONSOLIDATE = 0b01000;

		/// Optimize placement across storage tiers.
		const TIER_OPTIMIZE = 0b10000;
	}
}

/// Diagnostic record returned by mutating volume operations.
///
/// The native `ExtendedStatus` out-parameter is received and released, but
/// its contents are not decoded; this type exists so that signatures track
/// the native API.
#[derive(Debug, Default, Clone, Copy)]
#[non_exhaustive]
pub struct ExtendedStatus;

/// A snapshot of one `MSFT_Volume` object.
///
/// Property fields are filled by [`query`](Self::query) and reflect the state
/// of the volume at that moment; they do not track later changes. The native
/// handle is released when the volume is dropped or [`close`](Self::close)d.
///
/// Ref: <https://docs.microsoft.com/en-us/previous-versions/windows/desktop/stormgmt/msft-volume>
#[derive(Debug, Default)]
pub struct Volume {
	/// Drive letter, if one is assigned.
	pub drive_letter: Option<char>,

	/// The `\\?\Volume{..}\` path of the volume.
	pub path: String,

	pub health_status: i32,

	/// Name of the file system on the volume, e.g. `NTFS`.
	pub file_system: String,

	pub file_system_label: String,

	pub file_system_type: i32,

	/// Total size in bytes.
	pub size: u64,

	/// Unused space in bytes.
	pub size_remaining: u64,

	pub drive_type: i32,

	pub dedup_mode: i32,

	handle: Option<Dispatch>,
}

/// Destination slot in the numeric property table used by [`Volume::query`].
enum NumericField<'a> {
	I32(&'a mut i32),
	U64(&'a mut u64),
}

impl Volume {
	pub(crate) fn new(handle: Dispatch) -> Volume {
		Volume {
			handle: Some(handle),
			..Default::default()
		}
	}

	/// Reads all property fields from the native object.
	///
	/// Fails with [`Error::InvalidHandle`] if the handle has been released. A
	/// failed property fetch fails the whole query; a numeric property of an
	/// unexpected variant type is logged and leaves the field zeroed.
	pub fn query(&mut self) -> Result<()> {
		let handle = self.handle.as_ref().ok_or(Error::InvalidHandle)?;

		// DriveLetter is a Char16 in the native schema.
		self.drive_letter = com::get_property(handle, "DriveLetter")?.to_char();
		self.path = com::get_property(handle, "Path")?.to_string_lossy();
		self.file_system = com::get_property(handle, "FileSystem")?.to_string_lossy();
		self.file_system_label = com::get_property(handle, "FileSystemLabel")?.to_string_lossy();

		let numeric = [
			("HealthStatus", NumericField::I32(&mut self.health_status)),
			("FileSystemType", NumericField::I32(&mut self.file_system_type)),
			("Size", NumericField::U64(&mut self.size)),
			("SizeRemaining", NumericField::U64(&mut self.size_remaining)),
			("DriveType", NumericField::I32(&mut self.drive_type)),
			("DedupMode", NumericField::I32(&mut self.dedup_mode)),
		];
		for (name, field) in numeric {
			let value = com::get_property(handle, name)?;
			let decoded = match field {
				NumericField::I32(dst) => value.to_i32().map(|v| *dst = v),
				NumericField::U64(dst) => value.to_u64().map(|v| *dst = v),
			};
			if let Err(err) = decoded {
				log::warn!("decoding {}: {}", name, err);
			}
		}
		Ok(())
	}

	/// Releases the handle to the volume. Calling it again is a no-op.
	pub fn close(&mut self) {
		self.handle = None;
	}

	/// Flushes the cached data in the volume's file system to disk.
	///
	/// Ref: <https://docs.microsoft.com/en-us/previous-versions/windows/desktop/stormgmt/msft-volume-flush>
	pub fn flush(&self) -> Result<()> {
		let handle = self.handle.as_ref().ok_or(Error::InvalidHandle)?;
		let ret = com::call_method(handle, "Flush", &mut [])?;
		check_status("flush", &ret)
	}

	/// Formats the volume.
	///
	/// On success the handle is rebound to the freshly formatted volume
	/// object and the handle to the pre-format object is released. Property
	/// fields keep their pre-format values until the next
	/// [`query`](Self::query).
	///
	/// Ref: <https://docs.microsoft.com/en-us/previous-versions/windows/desktop/stormgmt/format-msft-volume>
	pub fn format(
		&mut self,
		fs: FileSystem,
		label: &str,
		options: &FormatOptions,
	) -> Result<ExtendedStatus> {
		let handle = self.handle.as_ref().ok_or(Error::InvalidHandle)?;
		let plan = FormatPlan::new(fs, options);

		let mut formatted = Variant::new();
		let mut extended_status = Variant::new();
		// Argument order must match the native method exactly.
		let mut args = [
			Variant::from_str(fs.as_str()),
			Variant::from_str(label),
			opt_u32(plan.allocation_unit_size),
			Variant::from_bool(options.full),
			Variant::from_bool(options.force),
			opt_bool(plan.compress),
			opt_bool(plan.short_file_names),
			opt_bool(plan.integrity_streams),
			opt_bool(plan.large_frs),
			Variant::from_bool(options.disable_heat_gathering),
			Variant::by_ref(&mut formatted),
			Variant::by_ref(&mut extended_status),
		];
		let ret = com::call_method(handle, "Format", &mut args)?;
		check_status("formatting", &ret)?;

		self.handle = formatted.into_dispatch();
		Ok(ExtendedStatus)
	}

	/// Runs the selected maintenance passes on the volume.
	///
	/// Ref: <https://docs.microsoft.com/en-us/previous-versions/windows/desktop/stormgmt/optimize-msft-volume>
	pub fn optimize(&self, flags: OptimizeFlags) -> Result<ExtendedStatus> {
		let handle = self.handle.as_ref().ok_or(Error::InvalidHandle)?;

		let mut extended_status = Variant::new();
		let mut args = [
			Variant::from_bool(flags.contains(OptimizeFlags::RETRIM)),
			Variant::from_bool(flags.contains(OptimizeFlags::ANALYZE)),
			Variant::from_bool(flags.contains(OptimizeFlags::DEFRAG)),
			Variant::from_bool(flags.contains(OptimizeFlags::SLAB_CONSOLIDATE)),
			Variant::from_bool(flags.contains(OptimizeFlags::TIER_OPTIMIZE)),
			Variant::by_ref(&mut extended_status),
		];
		let ret = com::call_method(handle, "Optimize", &mut args)?;
		check_status("optimization", &ret)?;
		Ok(ExtendedStatus)
	}

	/// Sets the file system label of the volume.
	///
	/// Ref: <https://docs.microsoft.com/en-us/previous-versions/windows/desktop/stormgmt/msft-volume-setfilesystemlabel>
	pub fn set_file_system_label(&self, label: &str) -> Result<ExtendedStatus> {
		let handle = self.handle.as_ref().ok_or(Error::InvalidHandle)?;

		let mut extended_status = Variant::new();
		let mut args = [
			Variant::from_str(label),
			Variant::by_ref(&mut extended_status),
		];
		let ret = com::call_method(handle, "SetFileSystemLabel", &mut args)?;
		check_status("setting file system label", &ret)?;
		Ok(ExtendedStatus)
	}
}

/// The Format arguments actually sent for a given file system.
///
/// ReFS takes the integrity-stream and large-FRS options; every other file
/// system takes the compression and short-filename options instead. The
/// group that does not apply is sent as null.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct FormatPlan {
	allocation_unit_size: Option<u32>,
	compress: Option<bool>,
	short_file_names: Option<bool>,
	integrity_streams: Option<bool>,
	large_frs: Option<bool>,
}

impl FormatPlan {
	fn new(fs: FileSystem, options: &FormatOptions) -> FormatPlan {
		let allocation_unit_size = match options.allocation_unit_size {
			0 => None,
			size => Some(size),
		};
		if fs == FileSystem::ReFs {
			FormatPlan {
				allocation_unit_size,
				compress: None,
				short_file_names: None,
				integrity_streams: Some(options.integrity_streams),
				large_frs: Some(options.large_frs),
			}
		} else {
			FormatPlan {
				allocation_unit_size,
				compress: Some(options.compress),
				short_file_names: Some(options.short_file_names),
				integrity_streams: None,
				large_frs: None,
			}
		}
	}
}

fn opt_bool(value: Option<bool>) -> Variant {
	match value {
		Some(value) => Variant::from_bool(value),
		None => Variant::null(),
	}
}

fn opt_u32(value: Option<u32>) -> Variant {
	match value {
		Some(value) => Variant::from_u32(value),
		None => Variant::null(),
	}
}

fn check_status(operation: &'static str, ret: &Variant) -> Result<()> {
	match ret.to_i32()? {
		0 => Ok(()),
		code => Err(Error::Status { operation, code }),
	}
}

/// The volumes returned by one [`Service::get_volumes`] call.
///
/// Every contained handle is released when the set is dropped or
/// [`close`](Self::close)d.
///
/// [`Service::get_volumes`]: crate::Service::get_volumes
#[derive(Debug, Default)]
pub struct VolumeSet {
	pub volumes: Vec<Volume>,
}

impl VolumeSet {
	/// Releases the handles of all contained volumes. Idempotent.
	pub fn close(&mut self) {
		for volume in &mut self.volumes {
			volume.close();
		}
	}

	pub fn len(&self) -> usize {
		self.volumes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.volumes.is_empty()
	}

	pub fn iter(&self) -> slice::Iter<Volume> {
		self.volumes.iter()
	}
}

impl IntoIterator for VolumeSet {
	type Item = Volume;
	type IntoIter = vec::IntoIter<Volume>;

	fn into_iter(self) -> Self::IntoIter {
		self.volumes.into_iter()
	}
}

impl<'a> IntoIterator for &'a VolumeSet {
	type Item = &'a Volume;
	type IntoIter = slice::Iter<'a, Volume>;

	fn into_iter(self) -> Self::IntoIter {
		self.volumes.iter()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn close_is_idempotent() {
		let mut volume = Volume::default();
		volume.close();
		volume.close();
	}

	#[test]
	fn operations_on_a_released_handle_fail_fast() {
		let mut volume = Volume::default();
		assert_eq!(volume.query().unwrap_err(), Error::InvalidHandle);
		assert_eq!(volume.flush().unwrap_err(), Error::InvalidHandle);
		assert_eq!(
			volume
				.format(FileSystem::Ntfs, "data", &FormatOptions::default())
				.unwrap_err(),
			Error::InvalidHandle
		);
		assert_eq!(
			volume.optimize(OptimizeFlags::DEFRAG).unwrap_err(),
			Error::InvalidHandle
		);
		assert_eq!(
			volume.set_file_system_label("data").unwrap_err(),
			Error::InvalidHandle
		);
	}

	#[test]
	fn refs_takes_the_integrity_option_group() {
		let options = FormatOptions {
			compress: true,
			short_file_names: true,
			integrity_streams: true,
			large_frs: true,
			..Default::default()
		};
		let plan = FormatPlan::new(FileSystem::ReFs, &options);
		assert_eq!(plan.compress, None);
		assert_eq!(plan.short_file_names, None);
		assert_eq!(plan.integrity_streams, Some(true));
		assert_eq!(plan.large_frs, Some(true));
	}

	#[test]
	fn other_file_systems_take_the_compression_option_group() {
		let options = FormatOptions {
			compress: true,
			integrity_streams: true,
			large_frs: true,
			..Default::default()
		};
		for fs in [
			FileSystem::ExFat,
			FileSystem::Fat,
			FileSystem::Fat32,
			FileSystem::Ntfs,
		] {
			let plan = FormatPlan::new(fs, &options);
			assert_eq!(plan.compress, Some(true));
			assert_eq!(plan.short_file_names, Some(false));
			assert_eq!(plan.integrity_streams, None);
			assert_eq!(plan.large_frs, None);
		}
	}

	#[test]
	fn zero_allocation_unit_size_is_left_to_the_provider() {
		let plan = FormatPlan::new(FileSystem::Ntfs, &FormatOptions::default());
		assert_eq!(plan.allocation_unit_size, None);

		let options = FormatOptions {
			allocation_unit_size: 4096,
			..Default::default()
		};
		let plan = FormatPlan::new(FileSystem::Ntfs, &options);
		assert_eq!(plan.allocation_unit_size, Some(4096));
	}

	#[test]
	fn file_system_names_parse_case_insensitively() {
		assert_eq!("ntfs".parse::<FileSystem>().unwrap(), FileSystem::Ntfs);
		assert_eq!("REFS".parse::<FileSystem>().unwrap(), FileSystem::ReFs);
		assert_eq!("exFAT".parse::<FileSystem>().unwrap(), FileSystem::ExFat);
		assert_eq!("fat32".parse::<FileSystem>().unwrap(), FileSystem::Fat32);
		assert!(matches!(
			"ext4".parse::<FileSystem>(),
			Err(Error::UnknownFileSystem(_))
		));
	}

	#[test]
	fn volume_set_close_is_idempotent() {
		let mut set = VolumeSet {
			volumes: vec![Volume::default(), Volume::default()],
		};
		set.close();
		set.close();
		assert_eq!(set.len(), 2);
	}
}
