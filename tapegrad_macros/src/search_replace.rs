use proc_macro2::Ident;
use std::iter::FromIterator;
use syn::punctuated::Punctuated;
use syn::visit_mut::{self, VisitMut};
use syn::{Expr, ExprCall, ExprMethodCall, GenericParam, Generics, PathSegment, Type};

/// Renames method calls and free function calls.
pub struct FindReplaceCall {
    pub find: Ident,
    pub replace: Ident,
}

/// Substitutes a generic parameter by a concrete type.
///
/// Only single identifier types are supported since the substitution
/// happens at the path segment level, which also covers associated
/// items such as `T::MAX`.
pub struct FindReplaceSegment {
    pub find: Ident,
    pub replace: Ident,
}

pub struct RemoveGenerics {
    pub find: Ident,
}

impl VisitMut for FindReplaceCall {
    fn visit_expr_method_call_mut(&mut self, node: &mut ExprMethodCall) {
        if node.method == self.find {
            node.method = self.replace.clone();
        }
        visit_mut::visit_expr_method_call_mut(self, node);
    }

    fn visit_expr_call_mut(&mut self, node: &mut ExprCall) {
        if let Expr::Path(expr_path) = &mut *node.func {
            if expr_path.path.is_ident(&self.find) {
                if let Some(segment) = expr_path.path.segments.last_mut() {
                    segment.ident = self.replace.clone();
                }
            }
        }
        visit_mut::visit_expr_call_mut(self, node);
    }
}

impl VisitMut for FindReplaceSegment {
    fn visit_path_segment_mut(&mut self, node: &mut PathSegment) {
        if node.ident == self.find {
            node.ident = self.replace.clone();
        }
        visit_mut::visit_path_segment_mut(self, node);
    }
}

impl VisitMut for RemoveGenerics {
    fn visit_generics_mut(&mut self, node: &mut Generics) {
        node.params = Punctuated::from_iter(
            node.params
                .iter()
                .filter(|x| {
                    if let GenericParam::Type(type_param) = &x {
                        return type_param.ident != self.find;
                    }

                    true
                })
                .cloned(),
        );

        if node.params.is_empty() {
            node.lt_token = None;
            node.gt_token = None;
        }

        visit_mut::visit_generics_mut(self, node);
    }
}

/// Extracts the identifier of a single segment type such as `f32`.
pub fn type_ident(ty: &Type) -> Option<Ident> {
    if let Type::Path(type_path) = ty {
        if type_path.qself.is_none() && type_path.path.segments.len() == 1 {
            return type_path.path.segments.first().map(|segment| segment.ident.clone());
        }
    }

    None
}
