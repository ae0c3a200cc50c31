// MIT License
//
// Copyright (c) 2019 Lukas Lueg (lukas.lueg@gmail.com)
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! `strux` declares binary layouts once and gets both directions for free: the same
//! [`Construct`] that parses a byte slice into a [`Value`] also builds a `Value` back into
//! bytes, and, where the layout is static, reports its size without touching a stream at
//! all. It is a brainchild of [construct](https://construct.readthedocs.io/), the Python
//! library of the same shape.
//!
//! A layout is built up from small pieces — [`Construct::u32_be`], [`Construct::struct_`],
//! [`Construct::array`], [`Construct::prefixed`] — composed the way you'd describe the
//! format in prose. There is no code generation step and no intermediate schema language;
//! a `Construct` value *is* the format.
//!
//! ```
//! use strux::Construct;
//!
//! let point = Construct::struct_(vec![
//!     Construct::u16_be().named("x"),
//!     Construct::u16_be().named("y"),
//! ]);
//!
//! let parsed = point.parse(&[0x00, 0x01, 0x00, 0x02]).unwrap();
//! let container = parsed.as_container().unwrap();
//! assert_eq!(container.get("x").unwrap().as_int().unwrap(), 1);
//!
//! let bytes = point.build(&parsed).unwrap();
//! assert_eq!(bytes, vec![0x00, 0x01, 0x00, 0x02]);
//! ```
//!
//! See `strux_macros` for the `#[derive(Layout)]` sugar that builds a `Construct` from a
//! plain Rust struct definition.

mod construct;
mod context;
mod error;
mod lazy;
mod path;
mod stream;
mod value;

pub use construct::{BuildFrom, Codec, CompressionCodec, Construct, Endian, Flags, HashFn, IntWidth, PadDir, TrimDir};
pub use context::Context;
pub use error::{AdaptationError, Error, Result};
pub use lazy::{LazyContainer, LazyValue};
pub use path::Expr;
pub use stream::Stream;
pub use value::{Container, DynValue, ListContainer, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefixed_struct_round_trips() {
        let record = Construct::struct_(vec![
            Construct::u8_().named("length"),
            Construct::bytes_dyn(Expr::field("length")).named("payload"),
        ]);

        let bytes = [0x03, b'a', b'b', b'c'];
        let parsed = record.parse(&bytes).unwrap();
        let container = parsed.as_container().unwrap();
        assert_eq!(container.get("length").unwrap().as_int().unwrap(), 3);
        assert_eq!(container.get("payload").unwrap().as_bytes().unwrap(), b"abc");

        let rebuilt = record.build(&parsed).unwrap();
        assert_eq!(rebuilt, bytes);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let frame = Construct::struct_(vec![
            Construct::anchor().named("body"),
            Construct::u16_be().named("len"),
            Construct::bytes_dyn(Expr::field("len")).named("data"),
            Construct::anchor().named("body"),
            Construct::checksum("body", HashFn::crc32(), Construct::bytes(4)),
        ]);

        let mut payload = Container::new();
        payload.insert("len", Value::Int(3)).unwrap();
        payload.insert("data", Value::Bytes(vec![1, 2, 3])).unwrap();
        let good = frame.build(&Value::Container(payload)).unwrap();

        let mut tampered = good.clone();
        *tampered.last_mut().unwrap() ^= 0xFF;

        assert!(frame.parse(&good).is_ok());
        assert!(matches!(frame.parse(&tampered), Err(Error::Checksum { .. })));
    }
}
