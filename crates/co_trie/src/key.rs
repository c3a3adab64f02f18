/// A fixed-length key viewed as bytes, most-significant first.
///
/// The byte form orders unsigned keys numerically; signed keys additionally
/// need the root-level reorder done by `iter_signed`.
pub trait TrieKey: Copy {
    /// Key length in bytes. The 16-bit trie requires this to be even.
    const LEN: usize;

    /// Write the key into `out` (`Self::LEN` bytes), most-significant first.
    fn write_be(&self, out: &mut [u8]);

    /// Rebuild a key from the bytes produced by [`TrieKey::write_be`].
    fn read_be(bytes: &[u8]) -> Self;
}

macro_rules! int_key {
    ($t:ty) => {
        impl TrieKey for $t {
            const LEN: usize = std::mem::size_of::<$t>();

            #[inline]
            fn write_be(&self, out: &mut [u8]) {
                out[..Self::LEN].copy_from_slice(&self.to_be_bytes());
            }

            #[inline]
            fn read_be(bytes: &[u8]) -> Self {
                Self::from_be_bytes(bytes[..Self::LEN].try_into().expect("key length"))
            }
        }
    };
}

int_key!(u16);
int_key!(u32);
int_key!(u64);
int_key!(i16);
int_key!(i32);
int_key!(i64);

impl<A: TrieKey, B: TrieKey> TrieKey for (A, B) {
    const LEN: usize = A::LEN + B::LEN;

    #[inline]
    fn write_be(&self, out: &mut [u8]) {
        self.0.write_be(&mut out[..A::LEN]);
        self.1.write_be(&mut out[A::LEN..]);
    }

    #[inline]
    fn read_be(bytes: &[u8]) -> Self {
        (A::read_be(&bytes[..A::LEN]), B::read_be(&bytes[A::LEN..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_round_trip() {
        let mut buf = [0_u8; 8];
        0x0102_0304_0506_0708_i64.write_be(&mut buf);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(i64::read_be(&buf), 0x0102_0304_0506_0708);
    }

    #[test]
    fn pair_keys_concatenate() {
        let key = (0x1122_i16, 0x3344_5566_u32);
        let mut buf = [0_u8; 6];
        key.write_be(&mut buf);
        assert_eq!(buf, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert_eq!(<(i16, u32)>::read_be(&buf), key);
    }
}
