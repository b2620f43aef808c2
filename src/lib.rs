#![cfg(windows)]

//! Rust-friendly wrapper for the Windows Storage Management API.
//!
//! Exposes the `MSFT_Volume` WMI class through COM automation: enumerating
//! volumes, reading property snapshots, and invoking the native `Flush`,
//! `Format`, `Optimize` and `SetFileSystemLabel` operations. Handles to the
//! native objects are scoped resources and are released when dropped.
//!
//! COM must be initialized on the calling thread first:
//!
//! ```no_run
//! use storemgmt::Service;
//!
//! fn main() -> storemgmt::Result<()> {
//!     storemgmt::init()?;
//!     let svc = Service::connect()?;
//!     for volume in &svc.get_volumes("")? {
//!         println!(
//!             "{:?} {} {} / {} bytes free",
//!             volume.drive_letter, volume.file_system, volume.size, volume.size_remaining,
//!         );
//!     }
//!     storemgmt::shutdown();
//!     Ok(())
//! }
//! ```
//!
//! Ref: <https://docs.microsoft.com/en-us/previous-versions/windows/desktop/stormgmt/msft-volume>

mod com;
mod error;
mod service;
mod variant;
mod volume;

pub use error::{Error, Result};
pub use service::Service;
pub use volume::{ExtendedStatus, FileSystem, FormatOptions, OptimizeFlags, Volume, VolumeSet};

use std::ptr;

use winapi::shared::winerror::FAILED;
use winapi::um::combaseapi::{CoInitializeEx, CoUninitialize};
use winapi::um::objbase::COINIT_MULTITHREADED;

/// Initializes COM on the current thread.
///
/// Call once per thread before [`Service::connect`]. Calling it again on an
/// already initialized thread succeeds.
pub fn init() -> Result<()> {
	// S_FALSE just means the thread was already initialized.
	let hr = unsafe { CoInitializeEx(ptr::null_mut(), COINIT_MULTITHREADED) };
	if FAILED(hr) {
		Err(Error::Com {
			call: "CoInitializeEx".to_owned(),
			hresult: hr,
			description: None,
		})
	} else {
		Ok(())
	}
}

/// Uninitializes COM on the current thread.
///
/// Must balance a successful [`init`] on the same thread, after every
/// [`Service`] and [`Volume`] obtained on it has been dropped.
pub fn shutdown() {
	unsafe { CoUninitialize() }
}
