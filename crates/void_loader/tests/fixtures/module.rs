//! Minimal engine module compiled by the integration tests
//!
//! `--cfg next` builds the second revision, `--cfg future_api` reports an
//! unsupported API version, and `--cfg plain` leaves out discovery.

#![allow(unexpected_cfgs)]

use std::ffi::c_char;

#[repr(C)]
pub struct VoidModuleInfo {
    pub api_version: u32,
    pub name: *const c_char,
    pub version: *const c_char,
    pub export_count: u32,
}

unsafe impl Sync for VoidModuleInfo {}

#[cfg(not(future_api))]
const API_VERSION: u32 = 1;
#[cfg(future_api)]
const API_VERSION: u32 = 99;

#[cfg(not(next))]
const REVISION: u32 = 1;
#[cfg(next)]
const REVISION: u32 = 2;

#[cfg(not(next))]
const VERSION: &[u8] = b"1.0.0\0";
#[cfg(next)]
const VERSION: &[u8] = b"2.0.0\0";

const EXPORTS: [&[u8]; 2] = [b"fixture_revision\0", b"fixture_add\0"];

static INFO: VoidModuleInfo = VoidModuleInfo {
    api_version: API_VERSION,
    name: b"Fixture\0".as_ptr() as *const c_char,
    version: VERSION.as_ptr() as *const c_char,
    export_count: EXPORTS.len() as u32,
};

#[cfg(not(plain))]
#[no_mangle]
pub extern "C" fn void_module_info() -> *const VoidModuleInfo {
    &INFO
}

#[cfg(not(plain))]
#[no_mangle]
pub extern "C" fn void_module_export(index: u32) -> *const c_char {
    match EXPORTS.get(index as usize) {
        Some(name) => name.as_ptr() as *const c_char,
        None => std::ptr::null(),
    }
}

#[no_mangle]
pub extern "C" fn fixture_revision() -> u32 {
    REVISION
}

#[no_mangle]
pub extern "C" fn fixture_add(a: i32, b: i32) -> i32 {
    a + b
}
