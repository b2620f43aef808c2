use std::mem;
use std::ptr;

use widestring::U16CString;
use winapi::ctypes::c_void;
use winapi::shared::winerror::FAILED;
use winapi::shared::wtypesbase::CLSCTX_INPROC_SERVER;
use winapi::um::combaseapi::{CLSIDFromProgID, CoCreateInstance};
use winapi::um::oaidl::IDispatch;
use winapi::Interface;

use crate::com::{self, Dispatch};
use crate::error::{Error, Result};
use crate::variant::Variant;
use crate::volume::{Volume, VolumeSet};

/// ProgID of the WMI scripting locator used to reach the storage provider.
const LOCATOR_PROGID: &str = "WbemScripting.SWbemLocator";

/// Namespace hosting the Storage Management classes.
const STORAGE_NAMESPACE: &str = r"Root\Microsoft\Windows\Storage";

const VOLUME_QUERY: &str = "SELECT * FROM MSFT_Volume";

/// A connection to the Windows Storage Management provider.
///
/// Wraps an `SWbemServices` object bound to `Root\Microsoft\Windows\Storage`;
/// the underlying reference is released when the service is dropped.
/// [`init`](crate::init) must have been called on the current thread first.
#[derive(Debug)]
pub struct Service {
	svc: Dispatch,
}

impl Service {
	/// Connects to the Storage Management namespace on the local machine.
	pub fn connect() -> Result<Service> {
		let locator = create_locator()?;
		let mut args = [Variant::null(), Variant::from_str(STORAGE_NAMESPACE)];
		let services = com::call_method(&locator, "ConnectServer", &mut args)?;
		let vt = services.vt();
		let svc = services.into_dispatch().ok_or(Error::Decode { vt })?;
		Ok(Service { svc })
	}

	/// Queries for local volumes.
	///
	/// `filter` is appended verbatim to the base WQL query. Pass `""` for all
	/// volumes, or a filter clause for specific ones:
	///
	/// ```no_run
	/// # let svc = storemgmt::Service::connect().unwrap();
	/// let all = svc.get_volumes("").unwrap();
	/// let d = svc.get_volumes("WHERE DriveLetter='D'").unwrap();
	/// ```
	///
	/// Zero matches yield an empty set. If materializing any matched volume
	/// fails, the whole call fails and every handle acquired so far is
	/// released.
	pub fn get_volumes(&self, filter: &str) -> Result<VolumeSet> {
		let query = build_volume_query(filter);
		log::debug!("executing {:?}", query);

		let result = com::call_method(&self.svc, "ExecQuery", &mut [Variant::from_str(&query)])?;
		let vt = result.vt();
		let result = result.into_dispatch().ok_or(Error::Decode { vt })?;

		let count = com::get_property(&result, "Count")?.to_i32()?;
		let mut set = VolumeSet::default();
		for i in 0..count {
			let item = com::call_method(&result, "ItemIndex", &mut [Variant::from_i32(i)])?;
			let vt = item.vt();
			let handle = item.into_dispatch().ok_or(Error::Decode { vt })?;
			let mut volume = Volume::new(handle);
			volume.query()?;
			set.volumes.push(volume);
		}
		Ok(set)
	}
}

fn create_locator() -> Result<Dispatch> {
	unsafe {
		// The ProgID contains no interior NULs.
		let progid = U16CString::from_str(LOCATOR_PROGID).unwrap();
		let mut clsid = mem::zeroed();
		let hr = CLSIDFromProgID(progid.as_ptr(), &mut clsid);
		if FAILED(hr) {
			return Err(Error::Com {
				call: format!("CLSIDFromProgID({})", LOCATOR_PROGID),
				hresult: hr,
				description: None,
			});
		}

		let mut locator: *mut c_void = ptr::null_mut();
		let hr = CoCreateInstance(
			&clsid,
			ptr::null_mut(),
			CLSCTX_INPROC_SERVER,
			&IDispatch::uuidof(),
			&mut locator,
		);
		if FAILED(hr) {
			return Err(Error::Com {
				call: "CoCreateInstance(SWbemLocator)".to_owned(),
				hresult: hr,
				description: None,
			});
		}
		Ok(Dispatch::from_raw(locator as *mut IDispatch))
	}
}

fn build_volume_query(filter: &str) -> String {
	if filter.is_empty() {
		VOLUME_QUERY.to_owned()
	} else {
		format!("{} {}", VOLUME_QUERY, filter)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_filter_yields_the_base_query() {
		assert_eq!(build_volume_query(""), "SELECT * FROM MSFT_Volume");
	}

	#[test]
	fn filters_are_appended_with_a_single_space() {
		assert_eq!(
			build_volume_query("WHERE DriveLetter='D'"),
			"SELECT * FROM MSFT_Volume WHERE DriveLetter='D'"
		);
	}
}
