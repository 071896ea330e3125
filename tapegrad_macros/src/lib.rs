//! Procedural macros used by `tapegrad` to stamp out one implementation
//! per primitive element type from a single generic template.

extern crate proc_macro;
use proc_macro::TokenStream;
use proc_macro2::{Ident, Span};

use quote::quote;
use syn::visit_mut::VisitMut;
use syn::{parse_macro_input, Error, ItemImpl};

mod operation_syntax;
use operation_syntax::*;

mod search_replace;
use search_replace::*;

/// Expands a generic `impl<T> Trait for T` block once per listed operation.
///
/// ```ignore
/// #[expand_impl(sgemm<T=f32>, dgemm<T=f64>)]
/// impl<T> Numeric for T {
///     fn gemm(..) { unsafe { placeholder(..) } }
/// }
/// ```
///
/// produces `impl Numeric for f32` calling `sgemm` and `impl Numeric for f64`
/// calling `dgemm`.
#[proc_macro_attribute]
pub fn expand_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    let operation_sequence = parse_macro_input!(attr as OperationSequence);
    let item = parse_macro_input!(item as ItemImpl);

    let mut impl_blocks = Vec::new();

    for operation in operation_sequence.iter() {
        let replace = match type_ident(&operation.ty) {
            Some(ident) => ident,
            None => {
                return Error::new_spanned(&operation.ty, "expand_impl only substitutes single identifier types.")
                    .to_compile_error()
                    .into()
            }
        };

        let mut impl_block = item.clone();

        let mut generics_visitor = RemoveGenerics {
            find: operation.generic.clone(),
        };
        let mut segment_visitor = FindReplaceSegment {
            find: operation.generic.clone(),
            replace,
        };
        let mut placeholder_visitor = FindReplaceCall {
            find: Ident::new("placeholder", Span::call_site()),
            replace: operation.ident.clone(),
        };

        generics_visitor.visit_item_impl_mut(&mut impl_block);
        segment_visitor.visit_item_impl_mut(&mut impl_block);
        placeholder_visitor.visit_item_impl_mut(&mut impl_block);

        impl_blocks.push(impl_block);
    }

    let result = quote! {
        #(#impl_blocks)*
    };
    result.into()
}
