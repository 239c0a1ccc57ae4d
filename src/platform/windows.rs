//! Live `HKEY_LOCAL_MACHINE` access for the registry strategy.
//!
//! Every query opens the key it needs and closes it again through
//! [`OwnedKey`], so no handle outlives the call that opened it.

use crate::{Error, RegistryHive, RegistryResolver, Result};
use windows::Win32::Foundation::{
    ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS, WIN32_ERROR,
};
use windows::Win32::System::Registry::{
    HKEY, HKEY_LOCAL_MACHINE, KEY_READ, RegCloseKey, RegEnumKeyExW, RegEnumValueW,
    RegOpenKeyExW, RegQueryValueExW,
};
use windows::core::{PCWSTR, PWSTR};

/// Key names are at most 255 characters, value names at most 16383.
const KEY_NAME_CHARS: usize = 256;
const VALUE_NAME_CHARS: usize = 16384;
/// Enough for a port name or a couple of GUIDs; longer values are re-read
/// once at their reported size.
const INITIAL_VALUE_CHARS: usize = 128;

/// The registry of the running system.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsHive;

struct OwnedKey(HKEY);

impl OwnedKey {
    fn open(path: &str) -> Result<Self> {
        let wide = to_wide(path);
        let mut key = HKEY::default();
        let status =
            unsafe { RegOpenKeyExW(HKEY_LOCAL_MACHINE, PCWSTR(wide.as_ptr()), 0, KEY_READ, &mut key) };
        check(status, path)?;
        Ok(Self(key))
    }
}

impl Drop for OwnedKey {
    fn drop(&mut self) {
        let _ = unsafe { RegCloseKey(self.0) };
    }
}

/// Raw value contents in UTF-16 units, plus whether the read was cut short.
struct RawValue {
    data: Vec<u16>,
    truncated: bool,
}

impl RawValue {
    fn strings(&self) -> Vec<String> {
        self.data
            .split(|&unit| unit == 0)
            .filter(|part| !part.is_empty())
            .map(String::from_utf16_lossy)
            .collect()
    }
}

fn query(key: &OwnedKey, path: &str, name: &str) -> Result<RawValue> {
    let wide = to_wide(name);
    let mut data = vec![0u16; INITIAL_VALUE_CHARS];
    for _ in 0..2 {
        let mut bytes = (data.len() * 2) as u32;
        let status = unsafe {
            RegQueryValueExW(
                key.0,
                PCWSTR(wide.as_ptr()),
                None,
                None,
                Some(data.as_mut_ptr().cast::<u8>()),
                Some(&mut bytes as *mut u32),
            )
        };
        if status == ERROR_MORE_DATA {
            data.resize((bytes as usize).div_ceil(2).max(data.len() + 1), 0);
            continue;
        }
        check(status, &format!(r"{path}\{name}"))?;
        data.truncate((bytes as usize / 2).min(data.len()));
        return Ok(RawValue {
            data,
            truncated: false,
        });
    }
    Ok(RawValue {
        data,
        truncated: true,
    })
}

impl RegistryHive for WindowsHive {
    fn subkey(&self, path: &str, index: u32) -> Result<Option<String>> {
        let key = OwnedKey::open(path)?;
        let mut name = [0u16; KEY_NAME_CHARS];
        let mut len = name.len() as u32;
        let status = unsafe {
            RegEnumKeyExW(
                key.0,
                index,
                PWSTR(name.as_mut_ptr()),
                &mut len,
                None,
                PWSTR::null(),
                None,
                None,
            )
        };
        if status == ERROR_NO_MORE_ITEMS {
            return Ok(None);
        }
        check(status, path)?;
        Ok(Some(String::from_utf16_lossy(&name[..len as usize])))
    }

    fn string(&self, path: &str, name: &str) -> Result<String> {
        let key = OwnedKey::open(path)?;
        let value = query(&key, path, name)?;
        Ok(value.strings().into_iter().next().unwrap_or_default())
    }

    fn multi_string(&self, path: &str, name: &str) -> Result<Vec<String>> {
        let key = OwnedKey::open(path)?;
        let value = query(&key, path, name)?;
        let strings = value.strings();
        if value.truncated {
            return Err(Error::MoreData {
                name: name.to_string(),
                partial: strings.into_iter().next().unwrap_or_default(),
            });
        }
        Ok(strings)
    }

    fn string_values(&self, path: &str) -> Result<Vec<String>> {
        let key = OwnedKey::open(path)?;
        let mut values = Vec::new();
        let mut name = vec![0u16; VALUE_NAME_CHARS];
        let mut data = [0u16; INITIAL_VALUE_CHARS];
        for index in 0.. {
            let mut name_len = name.len() as u32;
            let mut bytes = (data.len() * 2) as u32;
            let status = unsafe {
                RegEnumValueW(
                    key.0,
                    index,
                    PWSTR(name.as_mut_ptr()),
                    &mut name_len,
                    None,
                    None,
                    Some(data.as_mut_ptr().cast::<u8>()),
                    Some(&mut bytes as *mut u32),
                )
            };
            if status == ERROR_NO_MORE_ITEMS {
                break;
            }
            if status == ERROR_MORE_DATA {
                // Not a port name.
                continue;
            }
            check(status, path)?;
            let units = &data[..(bytes as usize / 2).min(data.len())];
            let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
            values.push(String::from_utf16_lossy(&units[..end]));
        }
        Ok(values)
    }
}

fn check(status: WIN32_ERROR, what: &str) -> Result<()> {
    if status == ERROR_SUCCESS {
        Ok(())
    } else if status == ERROR_FILE_NOT_FOUND {
        Err(Error::NotFound(what.to_string()))
    } else {
        Err(Error::Os(status.0 as i32))
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

pub fn native() -> RegistryResolver<WindowsHive> {
    RegistryResolver::new(WindowsHive)
}
