use std::{error::Error as StdError, str::FromStr};

use crate::common::error::{Error, Kind, Result};

/// convert a byte slice holding a decimal number to an integer
///
/// # Examples
/// ```
/// # use courier_core::common::util::*;
///
/// assert_eq!(42u64, atoi("42".as_bytes()).unwrap());
/// assert_eq!(0u32, atoi("0".as_bytes()).unwrap());
/// ```
pub fn atoi<T>(data: &[u8]) -> Result<T>
where
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
{
    let s = String::from_utf8_lossy(data);
    let rst = s
        .parse::<T>()
        .map_err(|e| Error::new(Kind::Decode, Some("atoi error".to_owned()), Some(Box::new(e))))?;

    Ok(rst)
}

/// insert an item into a sorted vec, keeping it sorted
///
/// # Examples
/// ```
/// # use courier_core::common::util::*;
///
/// let mut items = vec![1u64, 5, 9];
/// binary_insert(&mut items, 7, false);
/// binary_insert(&mut items, 5, false);
/// assert_eq!(vec![1, 5, 7, 9], items);
/// ```
pub fn binary_insert<T: Ord>(array: &mut Vec<T>, item: T, keep_duplicate: bool) {
    match array.binary_search(&item) {
        Ok(pos) => {
            if keep_duplicate {
                array.insert(pos, item);
            }
        }
        Err(pos) => array.insert(pos, item),
    }
}
