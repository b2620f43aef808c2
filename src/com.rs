use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::ptr;

use widestring::U16CString;
use winapi::shared::guiddef::GUID;
use winapi::shared::minwindef::{UINT, WORD};
use winapi::shared::ntdef::{HRESULT, LCID};
use winapi::shared::winerror::{DISP_E_EXCEPTION, FAILED};
use winapi::shared::wtypesbase::LPOLESTR;
use winapi::um::oaidl::{DISPID, DISPPARAMS, EXCEPINFO, IDispatch, VARIANT};
use winapi::um::oleauto::SysFreeString;

use crate::error::{Error, Result};
use crate::variant::{self, Variant};

// Invoke flags from oleauto.h; winapi does not export them.
const DISPATCH_METHOD: WORD = 0x1;
const DISPATCH_PROPERTYGET: WORD = 0x2;

// MAKELCID(LANG_USER_DEFAULT, SORT_DEFAULT); winapi does not export the LCID macros.
const LOCALE_USER_DEFAULT: LCID = 0x0400;

const IID_NULL: GUID = GUID {
	Data1: 0,
	Data2: 0,
	Data3: 0,
	Data4: [0; 8],
};

/// An owned reference to an automation object.
///
/// Holds exactly one COM reference and releases it on drop.
pub(crate) struct Dispatch {
	ptr: *mut IDispatch,
}

impl Dispatch {
	/// Takes ownership of one reference to a non-null `IDispatch`.
	pub(crate) unsafe fn from_raw(ptr: *mut IDispatch) -> Dispatch {
		Dispatch { ptr }
	}

	pub(crate) fn as_ptr(&self) -> *mut IDispatch {
		self.ptr
	}
}

impl Drop for Dispatch {
	fn drop(&mut self) {
		unsafe {
			(*self.ptr).Release();
		}
	}
}

impl Debug for Dispatch {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "IDispatch({:p})", self.ptr)
	}
}

/// Reads the named property off an automation object.
pub(crate) fn get_property(disp: &Dispatch, name: &str) -> Result<Variant> {
	invoke(disp, name, DISPATCH_PROPERTYGET, &mut []).map_err(|err| match err {
		Error::Com { hresult, description, .. } => Error::Com {
			call: format!("GetProperty({})", name),
			hresult,
			description,
		},
		other => other,
	})
}

/// Calls the named method with positional arguments and returns its result.
///
/// Output arguments are expressed as [`Variant::by_ref`] entries in `args`.
pub(crate) fn call_method(disp: &Dispatch, name: &str, args: &mut [Variant]) -> Result<Variant> {
	invoke(disp, name, DISPATCH_METHOD, args)
}

fn invoke(disp: &Dispatch, name: &str, flags: WORD, args: &mut [Variant]) -> Result<Variant> {
	let dispid = get_dispid(disp, name)?;

	// Invoke expects positional arguments in reverse order. The variants are
	// copied by value; ownership stays with `args`.
	let mut rgvarg: Vec<VARIANT> = args.iter().rev().map(|arg| unsafe { *arg.as_ptr() }).collect();
	let mut params = DISPPARAMS {
		rgvarg: rgvarg.as_mut_ptr(),
		rgdispidNamedArgs: ptr::null_mut(),
		cArgs: rgvarg.len() as UINT,
		cNamedArgs: 0,
	};

	let mut result = Variant::new();
	unsafe {
		let mut excep: EXCEPINFO = mem::zeroed();
		let hr = (*disp.as_ptr()).Invoke(
			dispid,
			&IID_NULL,
			LOCALE_USER_DEFAULT,
			flags,
			&mut params,
			result.as_mut_ptr(),
			&mut excep,
			ptr::null_mut(),
		);
		if FAILED(hr) {
			return Err(exception_error(name, hr, &excep));
		}
	}
	Ok(result)
}

fn get_dispid(disp: &Dispatch, name: &str) -> Result<DISPID> {
	// Names originate in this crate and contain no interior NULs.
	let wide = U16CString::from_str(name).unwrap();
	let mut names = [wide.as_ptr() as LPOLESTR];
	let mut dispid: DISPID = 0;
	let hr = unsafe {
		(*disp.as_ptr()).GetIDsOfNames(
			&IID_NULL,
			names.as_mut_ptr(),
			1,
			LOCALE_USER_DEFAULT,
			&mut dispid,
		)
	};
	if FAILED(hr) {
		Err(Error::Com {
			call: format!("GetIDsOfNames({})", name),
			hresult: hr,
			description: None,
		})
	} else {
		Ok(dispid)
	}
}

unsafe fn exception_error(call: &str, hresult: HRESULT, excep: &EXCEPINFO) -> Error {
	if hresult != DISP_E_EXCEPTION {
		return Error::Com {
			call: call.to_owned(),
			hresult,
			description: None,
		};
	}
	let description = match variant::bstr_to_string(excep.bstrDescription) {
		s if s.is_empty() => None,
		s => Some(s),
	};
	SysFreeString(excep.bstrSource);
	SysFreeString(excep.bstrDescription);
	SysFreeString(excep.bstrHelpFile);
	// The provider's own error code says more than DISP_E_EXCEPTION.
	let hresult = if excep.scode != 0 { excep.scode } else { hresult };
	Error::Com {
		call: call.to_owned(),
		hresult,
		description,
	}
}
