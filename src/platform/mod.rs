#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use self::linux::native;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use self::windows::{WindowsHive, native};

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "windows")))]
mod not_supported;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "windows")))]
pub use self::not_supported::native;
