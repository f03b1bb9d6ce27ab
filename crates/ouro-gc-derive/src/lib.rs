//! Derive macro for the `Managed` trait.

use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Data, DeriveInput, Field, Fields,
    GenericParam, Generics, Index, Path,
};

/// Derives `Managed` for a struct, declaring every field marked `#[gc(slot)]`
/// as a managed slot.
///
/// ```ignore
/// #[derive(Managed)]
/// struct Node {
///     value: i32,
///     #[gc(slot)]
///     next: Handle<Node>,
///     #[gc(slot)]
///     kids: [Handle<Node>; 3],
/// }
/// ```
///
/// Marked fields must be handles or arrays of handles; anything else fails to
/// compile. Enums and unions are rejected: their field offsets are not
/// expressible. Use `#[gc(crate = path)]` on the type when the crate is
/// re-exported under another name.
#[proc_macro_derive(Managed, attributes(gc))]
pub fn derive_managed(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let mut krate: Path = parse_quote!(::ouro_gc);

    for attr in &input.attrs {
        if !attr.path().is_ident("gc") {
            continue;
        }
        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                krate = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute"))
            }
        });
        if let Err(err) = result {
            return err.into_compile_error().into();
        }
    }

    let calls = match &input.data {
        Data::Struct(data) => match slot_calls(&data.fields) {
            Ok(calls) => calls,
            Err(err) => return err.into_compile_error().into(),
        },
        Data::Enum(data) => {
            return quote_spanned! {
                data.enum_token.span => compile_error!("`Managed` cannot be derived for enums: variant field offsets are not expressible");
            }
            .into()
        }
        Data::Union(data) => {
            return quote_spanned! {
                data.union_token.span => compile_error!("`Managed` cannot be derived for unions");
            }
            .into()
        }
    };

    let name = &input.ident;
    let generics = add_trait_bounds(&krate, input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let schema = if calls.is_empty() {
        quote!(_schema)
    } else {
        quote!(schema)
    };

    let generated = quote! {
        unsafe impl #impl_generics #krate::Managed for #name #ty_generics #where_clause {
            fn declare(#schema: &mut #krate::SchemaBuilder<Self>) {
                #(#calls)*
            }
        }
    };

    generated.into()
}

fn slot_calls(fields: &Fields) -> syn::Result<Vec<TokenStream>> {
    let mut calls = Vec::new();
    match fields {
        Fields::Named(fields) => {
            for field in &fields.named {
                if !is_slot(field)? {
                    continue;
                }
                let ident = field.ident.as_ref().expect("named field");
                let ty = &field.ty;
                calls.push(quote_spanned! {field.span() =>
                    schema.slot::<#ty>(::core::mem::offset_of!(Self, #ident));
                });
            }
        }
        Fields::Unnamed(fields) => {
            for (i, field) in fields.unnamed.iter().enumerate() {
                if !is_slot(field)? {
                    continue;
                }
                let index = Index::from(i);
                let ty = &field.ty;
                calls.push(quote_spanned! {field.span() =>
                    schema.slot::<#ty>(::core::mem::offset_of!(Self, #index));
                });
            }
        }
        Fields::Unit => {}
    }
    Ok(calls)
}

fn is_slot(field: &Field) -> syn::Result<bool> {
    let mut slot = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("gc") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("slot") {
                slot = true;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute, expected `slot`"))
            }
        })?;
    }
    Ok(slot)
}

fn add_trait_bounds(krate: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(type_param) = param {
            let has_managed = type_param.bounds.iter().any(|bound| {
                if let syn::TypeParamBound::Trait(t) = bound {
                    t.path.segments.last().is_some_and(|s| s.ident == "Managed")
                } else {
                    false
                }
            });
            if !has_managed {
                type_param.bounds.push(parse_quote!(#krate::Managed));
            }
        }
    }
    generics
}
