//! The `Set<T>` trait turns typed values into the payload of an item. Checking the payload
//! against the declared width happens when it is written, so a `u8` can't silently end up in a
//! 16-bit item.

use crate::codec::encode_str;
use crate::error::Error;
use crate::platform::Platform;
use crate::{ItemId, Store};
use alloc::vec::Vec;

pub trait Set<T> {
    fn encode_for(&self, id: ItemId, value: T) -> Result<Vec<u8>, Error>;
}

impl<T: Platform> Set<bool> for Store<T> {
    fn encode_for(&self, _id: ItemId, value: bool) -> Result<Vec<u8>, Error> {
        Ok(alloc::vec![value as u8])
    }
}

macro_rules! impl_set_le {
    ($($ty:ty),*) => {
        $(
            impl<T: Platform> Set<$ty> for Store<T> {
                fn encode_for(&self, _id: ItemId, value: $ty) -> Result<Vec<u8>, Error> {
                    Ok(value.to_le_bytes().to_vec())
                }
            }
        )*
    };
}

impl_set_le!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl<T: Platform> Set<&str> for Store<T> {
    fn encode_for(&self, id: ItemId, value: &str) -> Result<Vec<u8>, Error> {
        let capacity = self.item(id)?.width();
        let mut buf = Vec::with_capacity(capacity);
        encode_str(capacity, value.as_bytes(), &mut buf).map_err(|_| Error::LengthMismatch {
            id,
            expected: capacity,
            actual: value.len(),
        })?;
        Ok(buf)
    }
}

impl<T: Platform> Set<&[u8]> for Store<T> {
    fn encode_for(&self, _id: ItemId, value: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(value.to_vec())
    }
}

impl<T: Platform, const N: usize> Set<[u8; N]> for Store<T> {
    fn encode_for(&self, _id: ItemId, value: [u8; N]) -> Result<Vec<u8>, Error> {
        Ok(value.to_vec())
    }
}
