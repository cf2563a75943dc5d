//! FFI types for the module discovery entry point
//!
//! A module that wants to advertise what it exports defines two C-ABI
//! functions. Both are optional; a library without them is loaded as a plain
//! native library.
//!
//! ```c
//! const VoidModuleInfo* void_module_info(void);
//! const char* void_module_export(uint32_t index);
//! ```

use std::ffi::c_char;

/// API version for compatibility checking
pub const VOID_MODULE_API_VERSION: u32 = 1;

/// Name of the info entry point
pub const MODULE_INFO_SYMBOL: &[u8] = b"void_module_info\0";

/// Name of the export enumeration entry point
pub const MODULE_EXPORT_SYMBOL: &[u8] = b"void_module_export\0";

/// Module description returned by `void_module_info`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiModuleInfo {
    /// Must equal [`VOID_MODULE_API_VERSION`]
    pub api_version: u32,
    /// Module name (null-terminated, may be null)
    pub name: *const c_char,
    /// Module version (null-terminated, may be null)
    pub version: *const c_char,
    /// Number of entries reachable through `void_module_export`
    pub export_count: u32,
}

/// `void_module_info`
pub type GetModuleInfoFn = unsafe extern "C" fn() -> *const FfiModuleInfo;

/// `void_module_export`
pub type GetModuleExportFn = unsafe extern "C" fn(index: u32) -> *const c_char;
