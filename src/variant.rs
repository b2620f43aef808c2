use std::fmt::{self, Debug, Formatter};
use std::mem;

use widestring::U16String;
use winapi::shared::minwindef::UINT;
use winapi::shared::winerror::SUCCEEDED;
use winapi::shared::wtypes::{
	BSTR, VARIANT_FALSE, VARIANT_TRUE, VARTYPE, VT_BOOL, VT_BSTR, VT_BYREF, VT_DISPATCH,
	VT_EMPTY, VT_I2, VT_I4, VT_I8, VT_NULL, VT_UI2, VT_UI4, VT_UI8, VT_VARIANT,
};
use winapi::um::oaidl::VARIANT;
use winapi::um::oleauto::{
	SysAllocStringLen, SysStringLen, VariantChangeType, VariantClear, VariantInit,
};

use crate::com::Dispatch;
use crate::error::Error;

/// An owned `VARIANT`, cleared on drop.
///
/// This is the unit of marshaling for every property read and method call:
/// values cross the automation boundary as variants and are coerced to the
/// field types on this side.
pub(crate) struct Variant(VARIANT);

impl Variant {
	pub(crate) fn new() -> Variant {
		unsafe {
			let mut v: VARIANT = mem::zeroed();
			VariantInit(&mut v);
			Variant(v)
		}
	}

	/// `VT_NULL`, used for native arguments that are deliberately omitted.
	pub(crate) fn null() -> Variant {
		let mut v = Variant::new();
		unsafe {
			v.0.n1.n2_mut().vt = VT_NULL as VARTYPE;
		}
		v
	}

	pub(crate) fn from_bool(value: bool) -> Variant {
		let mut v = Variant::new();
		unsafe {
			let n2 = v.0.n1.n2_mut();
			n2.vt = VT_BOOL as VARTYPE;
			*n2.n3.boolVal_mut() = if value { VARIANT_TRUE } else { VARIANT_FALSE };
		}
		v
	}

	pub(crate) fn from_i32(value: i32) -> Variant {
		let mut v = Variant::new();
		unsafe {
			let n2 = v.0.n1.n2_mut();
			n2.vt = VT_I4 as VARTYPE;
			*n2.n3.lVal_mut() = value;
		}
		v
	}

	pub(crate) fn from_u32(value: u32) -> Variant {
		let mut v = Variant::new();
		unsafe {
			let n2 = v.0.n1.n2_mut();
			n2.vt = VT_UI4 as VARTYPE;
			*n2.n3.ulVal_mut() = value;
		}
		v
	}

	pub(crate) fn from_str(value: &str) -> Variant {
		let wide = U16String::from_str(value);
		let mut v = Variant::new();
		unsafe {
			let n2 = v.0.n1.n2_mut();
			n2.vt = VT_BSTR as VARTYPE;
			*n2.n3.bstrVal_mut() = SysAllocStringLen(wide.as_ptr(), wide.len() as UINT);
		}
		v
	}

	/// A `VT_BYREF | VT_VARIANT` pointing at `target`, for native output
	/// arguments. `target` must stay alive until the call returns.
	pub(crate) fn by_ref(target: &mut Variant) -> Variant {
		let mut v = Variant::new();
		unsafe {
			let n2 = v.0.n1.n2_mut();
			n2.vt = (VT_BYREF | VT_VARIANT) as VARTYPE;
			*n2.n3.pvarVal_mut() = target.as_mut_ptr();
		}
		v
	}

	pub(crate) fn vt(&self) -> VARTYPE {
		unsafe { self.0.n1.n2().vt }
	}

	pub(crate) fn as_ptr(&self) -> *const VARIANT {
		&self.0
	}

	pub(crate) fn as_mut_ptr(&mut self) -> *mut VARIANT {
		&mut self.0
	}

	pub(crate) fn to_i32(&self) -> Result<i32, Error> {
		unsafe {
			let n2 = self.0.n1.n2();
			match n2.vt as u32 {
				VT_I4 => Ok(*n2.n3.lVal()),
				VT_I2 => Ok(*n2.n3.iVal() as i32),
				VT_UI4 => Ok(*n2.n3.ulVal() as i32),
				_ => {
					let v = self.change_type(VT_I4)?;
					Ok(*v.0.n1.n2().n3.lVal())
				}
			}
		}
	}

	pub(crate) fn to_u64(&self) -> Result<u64, Error> {
		unsafe {
			let n2 = self.0.n1.n2();
			match n2.vt as u32 {
				VT_UI8 => Ok(*n2.n3.ullVal()),
				VT_I8 => Ok(*n2.n3.llVal() as u64),
				VT_UI4 => Ok(*n2.n3.ulVal() as u64),
				VT_I4 => Ok(*n2.n3.lVal() as u64),
				// The scripting layer hands CIM uint64 properties over as strings.
				VT_BSTR => bstr_to_string(*n2.n3.bstrVal())
					.trim()
					.parse()
					.map_err(|_| Error::Decode { vt: n2.vt }),
				_ => {
					let v = self.change_type(VT_UI8)?;
					Ok(*v.0.n1.n2().n3.ullVal())
				}
			}
		}
	}

	/// Lossy string conversion; null and empty variants become `""`.
	pub(crate) fn to_string_lossy(&self) -> String {
		unsafe {
			let n2 = self.0.n1.n2();
			match n2.vt as u32 {
				VT_BSTR => bstr_to_string(*n2.n3.bstrVal()),
				VT_EMPTY | VT_NULL => String::new(),
				_ => match self.change_type(VT_BSTR) {
					Ok(v) => bstr_to_string(*v.0.n1.n2().n3.bstrVal()),
					Err(_) => String::new(),
				},
			}
		}
	}

	/// Decodes a native Char16 property such as `DriveLetter`.
	pub(crate) fn to_char(&self) -> Option<char> {
		unsafe {
			let n2 = self.0.n1.n2();
			match n2.vt as u32 {
				VT_UI2 => char::from_u32(*n2.n3.uiVal() as u32).filter(|c| *c != '\0'),
				VT_I2 => char::from_u32(*n2.n3.iVal() as u16 as u32).filter(|c| *c != '\0'),
				VT_BSTR => bstr_to_string(*n2.n3.bstrVal()).chars().next(),
				_ => None,
			}
		}
	}

	/// Extracts an owned object reference, following one level of `VT_BYREF`
	/// indirection. `None` when the variant holds no object.
	pub(crate) fn into_dispatch(self) -> Option<Dispatch> {
		unsafe { dispatch_of(&self.0) }
	}

	fn change_type(&self, vt: u32) -> Result<Variant, Error> {
		let mut dst = Variant::new();
		let hr = unsafe { VariantChangeType(dst.as_mut_ptr(), self.as_ptr() as _, 0, vt as VARTYPE) };
		if SUCCEEDED(hr) {
			Ok(dst)
		} else {
			Err(Error::Decode { vt: self.vt() })
		}
	}
}

impl Drop for Variant {
	fn drop(&mut self) {
		unsafe {
			VariantClear(self.as_mut_ptr());
		}
	}
}

impl Debug for Variant {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "Variant(vt={})", self.vt())
	}
}

unsafe fn dispatch_of(v: &VARIANT) -> Option<Dispatch> {
	let n2 = v.n1.n2();
	match n2.vt as u32 {
		VT_DISPATCH => {
			let ptr = *n2.n3.pdispVal();
			if ptr.is_null() {
				None
			} else {
				(*ptr).AddRef();
				Some(Dispatch::from_raw(ptr))
			}
		}
		vt if vt == VT_BYREF | VT_DISPATCH => {
			let ptr_ptr = *n2.n3.ppdispVal();
			if ptr_ptr.is_null() || (*ptr_ptr).is_null() {
				None
			} else {
				let ptr = *ptr_ptr;
				(*ptr).AddRef();
				Some(Dispatch::from_raw(ptr))
			}
		}
		vt if vt == VT_BYREF | VT_VARIANT => {
			let inner = *n2.n3.pvarVal();
			if inner.is_null() {
				None
			} else {
				dispatch_of(&*inner)
			}
		}
		_ => None,
	}
}

pub(crate) unsafe fn bstr_to_string(bstr: BSTR) -> String {
	if bstr.is_null() {
		return String::new();
	}
	let len = SysStringLen(bstr) as usize;
	U16String::from_ptr(bstr, len).to_string_lossy()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bool_and_i32_decode() {
		assert_eq!(Variant::from_i32(42).to_i32().unwrap(), 42);
		// VARIANT_TRUE coerces to -1.
		assert_eq!(Variant::from_bool(true).to_i32().unwrap(), -1);
		assert_eq!(Variant::from_bool(false).to_i32().unwrap(), 0);
	}

	#[test]
	fn uint64_properties_arrive_as_strings() {
		assert_eq!(Variant::from_str("1099511627776").to_u64().unwrap(), 1_099_511_627_776);
		assert!(Variant::from_str("not a number").to_u64().is_err());
	}

	#[test]
	fn null_decodes_to_defaults() {
		let v = Variant::null();
		assert!(v.to_i32().is_err());
		assert_eq!(v.to_string_lossy(), "");
		assert_eq!(v.to_char(), None);
		assert!(v.into_dispatch().is_none());
	}

	#[test]
	fn drive_letters_are_char16() {
		let mut v = Variant::new();
		unsafe {
			let n2 = v.0.n1.n2_mut();
			n2.vt = VT_UI2 as VARTYPE;
			*n2.n3.uiVal_mut() = b'C' as u16;
		}
		assert_eq!(v.to_char(), Some('C'));
	}

	#[test]
	fn strings_survive_the_bstr_round_trip() {
		assert_eq!(Variant::from_str("NTFS").to_string_lossy(), "NTFS");
		assert_eq!(Variant::from_str("").to_string_lossy(), "");
	}

	#[test]
	fn by_ref_marks_the_variant_type() {
		let mut target = Variant::new();
		let by_ref = Variant::by_ref(&mut target);
		assert_eq!(by_ref.vt(), (VT_BYREF | VT_VARIANT) as VARTYPE);
	}
}
