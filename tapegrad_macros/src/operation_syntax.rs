use proc_macro2::Ident;
use std::ops::Deref;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::token::{Comma, Eq, Gt, Lt};
use syn::{Result, Type};

/// One expansion target, written `ident<T=type>`.
///
/// `ident` replaces every `placeholder` call in the expanded block
/// and `T` is marginalized: the generic parameter is removed and every
/// path segment named `T` is substituted by `type`.
pub struct Operation {
    pub ident: Ident,
    pub lt_token: Lt,
    pub generic: Ident,
    pub eq_token: Eq,
    pub ty: Type,
    pub gt_token: Gt,
}

impl Parse for Operation {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(Operation {
            ident: input.parse()?,
            lt_token: input.parse()?,
            generic: input.parse()?,
            eq_token: input.parse()?,
            ty: input.parse()?,
            gt_token: input.parse()?,
        })
    }
}

pub struct OperationSequence(Punctuated<Operation, Comma>);

impl Parse for OperationSequence {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(OperationSequence(input.parse_terminated(Operation::parse)?))
    }
}

impl Deref for OperationSequence {
    type Target = Punctuated<Operation, Comma>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
