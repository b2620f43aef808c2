use std::error;
use std::fmt::{self, Display, Formatter};

use winapi::shared::ntdef::HRESULT;
use winapi::shared::wtypes::VARTYPE;

/// Returned by every fallible function in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for storage management operations.
///
/// Native calls fail in one of two ways: the COM call itself fails
/// ([`Com`](Error::Com)), or the call runs and the storage provider reports a
/// non-zero status code ([`Status`](Error::Status)). The remaining variants
/// cover handle and conversion problems on this side of the boundary.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Error {
	/// A COM call failed before the native operation could report a result.
	Com {
		/// The call that failed, e.g. `GetProperty(Size)`.
		call: String,
		/// The failing HRESULT. For dispatch exceptions this is the
		/// provider's own error code rather than `DISP_E_EXCEPTION`.
		hresult: HRESULT,
		/// Description supplied by the provider, if any.
		description: Option<String>,
	},

	/// The native operation ran but returned a non-zero status code.
	Status {
		operation: &'static str,
		code: i32,
	},

	/// The volume handle has been released, or was never acquired.
	InvalidHandle,

	/// A `VARIANT` held a type that cannot be converted to the expected one.
	Decode {
		vt: VARTYPE,
	},

	/// Not one of the file systems accepted by `Format`.
	UnknownFileSystem(String),
}

impl error::Error for Error {}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			Error::Com { call, hresult, description } => {
				write!(f, "{} failed with HRESULT 0x{:08X}", call, *hresult as u32)?;
				if let Some(description) = description {
					write!(f, ": {}", description)?;
				}
				Ok(())
			}
			Error::Status { operation, code } => {
				write!(f, "error code returned during {}: {}", operation, code)
			}
			Error::InvalidHandle => write!(f, "invalid handle"),
			Error::Decode { vt } => write!(f, "cannot convert variant type {}", vt),
			Error::UnknownFileSystem(name) => write!(f, "unknown file system: {}", name),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_display_contains_the_native_code() {
		let err = Error::Status { operation: "formatting", code: 87 };
		assert_eq!(err.to_string(), "error code returned during formatting: 87");
	}

	#[test]
	fn com_display_includes_the_provider_description() {
		let err = Error::Com {
			call: "ExecQuery".to_owned(),
			hresult: -2147217385,
			description: Some("Invalid query".to_owned()),
		};
		let rendered = err.to_string();
		assert!(rendered.contains("ExecQuery"));
		assert!(rendered.contains("0x80041017"));
		assert!(rendered.contains("Invalid query"));
	}
}
