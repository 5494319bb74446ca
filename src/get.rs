//! The `Get<T>` trait and its implementation in this module allows providing a single generic,
//! overloaded function `get<T>()` for all supported types of the store.

use crate::codec::decode_str;
use crate::error::Error;
use crate::platform::Platform;
use crate::{ItemId, Store};
use alloc::string::String;
use alloc::vec::Vec;

pub trait Get<T> {
    fn get(&self, id: ItemId) -> Result<T, Error>;
}

impl<T, G: Get<T>> Get<T> for &G {
    fn get(&self, id: ItemId) -> Result<T, Error> {
        (*self).get(id)
    }
}

impl<T: Platform> Store<T> {
    fn get_array<const N: usize>(&self, id: ItemId) -> Result<[u8; N], Error> {
        let raw = self.get_raw(id)?;
        raw.try_into().map_err(|_| Error::LengthMismatch {
            id,
            expected: raw.len(),
            actual: N,
        })
    }
}

impl<T: Platform> Get<bool> for Store<T> {
    fn get(&self, id: ItemId) -> Result<bool, Error> {
        let [value] = self.get_array(id)?;
        Ok(value != 0)
    }
}

macro_rules! impl_get_le {
    ($($ty:ty),*) => {
        $(
            impl<T: Platform> Get<$ty> for Store<T> {
                fn get(&self, id: ItemId) -> Result<$ty, Error> {
                    Ok(<$ty>::from_le_bytes(self.get_array(id)?))
                }
            }
        )*
    };
}

impl_get_le!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl<T: Platform> Get<String> for Store<T> {
    fn get(&self, id: ItemId) -> Result<String, Error> {
        decode_str(self.get_raw(id)?)
    }
}

impl<T: Platform> Get<Vec<u8>> for Store<T> {
    fn get(&self, id: ItemId) -> Result<Vec<u8>, Error> {
        Ok(self.get_raw(id)?.to_vec())
    }
}

impl<T: Platform, const N: usize> Get<[u8; N]> for Store<T> {
    fn get(&self, id: ItemId) -> Result<[u8; N], Error> {
        self.get_array(id)
    }
}
