//! Derive macro for the `Trace` trait.
//!
//! The generated impl forwards the probe instance's fields, in declaration
//! order, to `Trace::register_slots`. Every `Member` reached this way records
//! its own address, which is how the registry learns slot offsets.

use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Data, DeriveInput, Field, Fields,
    GenericParam, Generics, Index, Path,
};

#[proc_macro_derive(Trace, attributes(pagemark))]
pub fn derive_trace(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let mut pagemark: Path = parse_quote!(::pagemark);

    for attr in &input.attrs {
        if !attr.path().is_ident("pagemark") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                pagemark = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute"))
            }
        });

        if let Err(err) = result {
            return err.into_compile_error().into();
        }
    }

    let name = &input.ident;
    let generics = add_trait_bounds(&pagemark, input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let body = match generate_register_body(&pagemark, &input.data) {
        Ok(body) => body,
        Err(err) => return err.into_compile_error().into(),
    };

    let generated = quote! {
        unsafe impl #impl_generics #pagemark::Trace for #name #ty_generics #where_clause {
            #[inline]
            fn register_slots(&self, discovery: &mut #pagemark::Discovery) {
                #body
            }
        }
    };

    generated.into()
}

fn add_trait_bounds(pagemark: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_trace = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Trait(t) = b {
                    t.path.segments.last().is_some_and(|s| s.ident == "Trace")
                } else {
                    false
                }
            });
            let has_static = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Lifetime(l) = b {
                    l.ident == "static"
                } else {
                    false
                }
            });

            if !has_trace {
                type_param.bounds.push(parse_quote!(#pagemark::Trace));
            }
            if !has_static {
                type_param.bounds.push(parse_quote!('static));
            }
        }
    }
    generics
}

/// `#[pagemark(skip)]` on a field leaves it out of discovery. A skipped
/// `Member` is never traced, so its target may be reused while it still
/// points there.
fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("pagemark") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported field attribute"))
            }
        })?;
    }
    Ok(skip)
}

fn generate_register_body(pagemark: &Path, data: &Data) -> syn::Result<TokenStream> {
    match data {
        Data::Struct(data) => generate_struct_body(pagemark, &data.fields),
        // Offsets learned from a probe must hold for every instance, which a
        // variant-dependent layout cannot promise.
        Data::Enum(e) => Ok(quote_spanned! {
            e.enum_token.span => compile_error!("`Trace` can only be derived for structs: slot offsets of an enum depend on the active variant");
        }),
        Data::Union(u) => Ok(quote_spanned! {
            u.union_token.span => compile_error!("`Trace` can only be derived for structs");
        }),
    }
}

fn generate_struct_body(pagemark: &Path, fields: &Fields) -> syn::Result<TokenStream> {
    let mut calls = Vec::new();
    match fields {
        Fields::Named(f) => {
            for field in &f.named {
                if is_skipped(field)? {
                    continue;
                }
                let name = &field.ident;
                calls.push(quote_spanned! {field.span() =>
                    #pagemark::Trace::register_slots(&self.#name, discovery);
                });
            }
        }
        Fields::Unnamed(f) => {
            for (i, field) in f.unnamed.iter().enumerate() {
                if is_skipped(field)? {
                    continue;
                }
                let index = Index::from(i);
                calls.push(quote_spanned! {field.span() =>
                    #pagemark::Trace::register_slots(&self.#index, discovery);
                });
            }
        }
        Fields::Unit => {}
    }

    if calls.is_empty() {
        return Ok(quote! { let _ = discovery; });
    }
    Ok(quote! { #(#calls)* })
}
