// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Model builder
//!
//! Derive macros shared by the router components.

extern crate proc_macro;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, parse_macro_input};

/// Find the field holding the entity of a struct.
///
/// A field marked `#[entity]` is used if present, otherwise the field must be
/// called `entity`.
fn entity_field(input: &DeriveInput) -> Result<Ident, syn::Error> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "entity derives are only supported on structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "entity derives need a struct with named fields",
        ));
    };

    let marked = fields
        .named
        .iter()
        .find(|f| f.attrs.iter().any(|a| a.path.is_ident("entity")));
    let by_name = fields
        .named
        .iter()
        .find(|f| f.ident.as_ref().is_some_and(|i| i == "entity"));

    marked
        .or(by_name)
        .and_then(|f| f.ident.clone())
        .ok_or_else(|| {
            syn::Error::new_spanned(
                &input.ident,
                "no `entity` field and no field marked `#[entity]`",
            )
        })
}

fn expand_entity_display(input: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let field = entity_field(input)?;
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics std::fmt::Display for #ident #ty_generics #where_clause {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.#field, f)
            }
        }
    })
}

/// Create a `std::fmt::Display` implementation for a struct with an Entity.
///
/// The struct is displayed as the full hierarchical name of its entity.
#[proc_macro_derive(EntityDisplay, attributes(entity))]
pub fn entity_display(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity_display(&input) {
        Ok(output) => output.into(),
        Err(e) => e.to_compile_error().into(),
    }
}
