//! Little-endian read helpers for checkpoint and packed-blob readers.
//!
//! Each reader advances a `&mut &[u8]` cursor; running out of bytes is a
//! [`CodecError`], which callers treat as a corrupt block.

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unexpected end of buffer")]
pub struct CodecError;

pub fn take<'b>(read: &mut &'b [u8], len: usize) -> Result<&'b [u8], CodecError> {
    if read.len() < len {
        return Err(CodecError);
    }
    let (head, tail) = read.split_at(len);
    *read = tail;
    Ok(head)
}

macro_rules! reader {
    ($name:ident, $t:ty) => {
        pub fn $name(read: &mut &[u8]) -> Result<$t, CodecError> {
            Ok(<$t>::from_le_bytes(
                take(read, std::mem::size_of::<$t>())?
                    .try_into()
                    .expect("sized by take"),
            ))
        }
    };
}

reader!(read_u8, u8);
reader!(read_i16, i16);
reader!(read_u16, u16);
reader!(read_i32, i32);
reader!(read_u32, u32);
reader!(read_i64, i64);
reader!(read_u64, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advances() {
        let buf = [1_u8, 0, 2, 0, 0, 0, 3];
        let mut read = &buf[..];
        assert_eq!(read_u16(&mut read), Ok(1));
        assert_eq!(read_u32(&mut read), Ok(2));
        assert_eq!(read_u8(&mut read), Ok(3));
        assert_eq!(read_u8(&mut read), Err(CodecError));
    }
}
