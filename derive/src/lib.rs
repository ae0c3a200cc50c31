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

//! `#[derive(Layout)]` builds a named `strux::Construct::struct_` out of a plain Rust
//! struct definition, one field at a time, instead of hand-assembling the `Vec` yourself.
//!
//! Each field carries a `#[strux(...)]` attribute whose content is any expression that
//! evaluates to a `strux::Construct` — typically a call into the inherent builder methods.
//! The field's own type is never inspected; it exists only to give the construct a name
//! and a place in the declaration order.
//!
//! ```ignore
//! use strux::Construct;
//! use strux_macros::Layout;
//!
//! #[derive(Layout)]
//! struct FrameHeader {
//!     #[strux(Construct::u16_be())]
//!     version: (),
//!     #[strux(Construct::u32_be())]
//!     length: (),
//! }
//!
//! let parsed = FrameHeader::layout().parse(&[0, 1, 0, 0, 0, 10]).unwrap();
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Expr, Fields};

#[proc_macro_derive(Layout, attributes(strux))]
pub fn derive_layout(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => panic!("#[derive(Layout)] requires a struct with named fields"),
        },
        _ => panic!("#[derive(Layout)] only supports structs"),
    };

    let entries = fields.iter().map(|field| {
        let field_name = field
            .ident
            .as_ref()
            .expect("named field")
            .to_string();
        let attr = field
            .attrs
            .iter()
            .find(|a| a.path().is_ident("strux"))
            .unwrap_or_else(|| panic!("field `{field_name}` needs a #[strux(...)] attribute"));
        let construct_expr: Expr = attr
            .parse_args()
            .unwrap_or_else(|e| panic!("invalid #[strux(...)] attribute on `{field_name}`: {e}"));
        quote! { (#construct_expr).named(#field_name) }
    });

    let expanded = quote! {
        impl #name {
            /// The layout this type's `#[strux(...)]` attributes describe, one entry per
            /// named field in declaration order.
            pub fn layout() -> ::strux::Construct {
                ::strux::Construct::struct_(vec![
                    #(#entries),*
                ])
            }
        }
    };
    expanded.into()
}
