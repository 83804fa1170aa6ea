//! # Accessor Derive
//!
//! This crate provides derive macros for generating setters and getters for
//! structs.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::punctuated::Punctuated;
use syn::token::Comma;
use syn::{Data, DeriveInput, Field, Fields, LitBool, parse_macro_input, spanned::Spanned};

/// Derive to generate `.set_<field>(&mut self, value: Ty) -> &mut Self` and
/// `const .with_<field>(mut self, value: Ty) -> Self` for each **named** field.
///
/// - Skipping a field: `#[setters(skip)]`
///
/// # Example
///
/// ```
/// use utils_accessors_derive::Setters;
///
/// #[derive(Setters)]
/// struct Foo<T> where T: Default {
///     a: u32,
///     #[setters(skip)]
///     _phantom: T,
/// }
///
/// let mut f = Foo { a: 1, _phantom: u8::default() };
/// f.set_a(10).set_a(11);
/// let f2 = f.with_a(42);
/// assert_eq!(f2.a, 42);
/// ```
#[proc_macro_derive(Setters, attributes(setters))]
pub fn derive_generate_setters(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        generics,
        data,
        ..
    } = parse_macro_input!(input as DeriveInput);

    let fields = match named_fields(data, &ident, "Setters") {
        Ok(fields) => fields,
        Err(e) => return e.to_compile_error().into(),
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut methods = Vec::new();

    for field in fields {
        let Some(fname) = &field.ident else { continue };
        if has_flag(&field.attrs, "setters", "skip") {
            continue;
        }

        let ty = &field.ty;
        let set_name = format_ident!("set_{}", fname);
        let with_name = format_ident!("with_{}", fname);

        methods.push(quote! {
            #[inline]
            pub fn #set_name(&mut self, value: #ty) -> &mut Self {
                self.#fname = value;
                self
            }

            #[inline]
            #[must_use]
            pub const fn #with_name(mut self, value: #ty) -> Self {
                self.#fname = value;
                self
            }
        });
    }

    let expanded = quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            #(#methods)*
        }
    };

    TokenStream::from(expanded)
}

/// Derive to generate a read-only `const .<field>(&self)` accessor for each
/// **named** field.
///
/// - By default the accessor returns `&Ty`.
/// - `#[getters(copy)]` returns `Ty` by value instead (the type must be `Copy`).
/// - Skipping a field: `#[getters(skip)]`
///
/// # Example
///
/// ```
/// use utils_accessors_derive::Getters;
///
/// #[derive(Getters)]
/// struct Task {
///     #[getters(copy)]
///     id: u32,
///     name: [u8; 4],
///     #[getters(skip)]
///     scratch: u64,
/// }
///
/// let t = Task { id: 7, name: *b"init", scratch: 0 };
/// assert_eq!(t.id(), 7);
/// assert_eq!(t.name(), b"init");
/// # let _ = t.scratch;
/// ```
#[proc_macro_derive(Getters, attributes(getters))]
pub fn derive_generate_getters(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        generics,
        data,
        ..
    } = parse_macro_input!(input as DeriveInput);

    let fields = match named_fields(data, &ident, "Getters") {
        Ok(fields) => fields,
        Err(e) => return e.to_compile_error().into(),
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut methods = Vec::new();

    for field in fields {
        let Some(fname) = &field.ident else { continue };
        if has_flag(&field.attrs, "getters", "skip") {
            continue;
        }

        let ty = &field.ty;
        let docs = field
            .attrs
            .iter()
            .filter(|a| a.path().is_ident("doc"))
            .collect::<Vec<_>>();

        if has_flag(&field.attrs, "getters", "copy") {
            methods.push(quote! {
                #(#docs)*
                #[inline]
                #[must_use]
                pub const fn #fname(&self) -> #ty {
                    self.#fname
                }
            });
        } else {
            methods.push(quote! {
                #(#docs)*
                #[inline]
                #[must_use]
                pub const fn #fname(&self) -> &#ty {
                    &self.#fname
                }
            });
        }
    }

    let expanded = quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            #(#methods)*
        }
    };

    TokenStream::from(expanded)
}

fn named_fields(
    data: Data,
    ident: &syn::Ident,
    derive: &str,
) -> syn::Result<Punctuated<Field, Comma>> {
    match data {
        Data::Struct(s) => match s.fields {
            Fields::Named(n) => Ok(n.named),
            Fields::Unnamed(u) => Err(syn::Error::new(
                u.span(),
                format!("{derive} only supports named fields"),
            )),
            Fields::Unit => Err(syn::Error::new(
                ident.span(),
                format!("{derive} does not apply to unit structs"),
            )),
        },
        _ => Err(syn::Error::new(
            ident.span(),
            format!("{derive} can only be derived for structs"),
        )),
    }
}

/// Whether `#[<attr>(<flag>)]` or `#[<attr>(<flag> = true)]` is present.
fn has_flag(attrs: &[syn::Attribute], attr_name: &str, flag: &str) -> bool {
    let mut found = false;
    for attr in attrs {
        if !attr.path().is_ident(attr_name) {
            continue;
        }

        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident(flag) {
                if meta.input.is_empty() || meta.input.peek(syn::Token![,]) {
                    found = true;
                } else if let Ok(v) = meta.value()?.parse::<LitBool>()
                    && v.value
                {
                    found = true;
                }
            } else if !meta.input.is_empty() && !meta.input.peek(syn::Token![,]) {
                // Consume `other = value` so the remaining flags still parse.
                let _ = meta.value()?.parse::<syn::Lit>()?;
            }
            Ok(())
        });
    }
    found
}
