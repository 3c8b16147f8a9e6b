//! Miscellaneous common structs used throughout the library.

mod closest_contacts;
mod contact;
mod id;
mod value;

pub use closest_contacts::*;
pub use contact::*;
pub use id::*;
pub use value::*;
