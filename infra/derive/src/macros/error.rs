use fxhash::FxHashSet;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Field, Fields, FieldsNamed, Ident, Type, Variant};

/// What the expansion needs to know about a single error variant.
struct ErrorVariant<'a> {
    ident: &'a Ident,
    source: Option<(&'a Ident, &'a Type)>,
    has_context: bool,
    cfgs: Vec<&'a Attribute>,
}

pub fn expand(input: &DeriveInput) -> TokenStream {
    try_expand(input).unwrap_or_else(syn::Error::into_compile_error)
}

fn try_expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(&input.ident, "bus_error can only be applied to enums"));
    };

    let variants = data.variants.iter().map(inspect_variant).collect::<syn::Result<Vec<_>>>()?;

    let name = &input.ident;
    let ext = format_ident!("{}Ext", name);
    let derives = missing_derives(input);
    let ext_trait = context_trait(name, &ext, &variants);
    let conversions = variants.iter().filter_map(|v| source_conversion(name, &ext, v));

    Ok(quote! {
        #[allow(non_shorthand_field_patterns)]
        #derives
        #input

        #ext_trait
        #(#conversions)*

        #[allow(dead_code, clippy::ref_option)]
        fn format_context(
            context: &Option<::std::borrow::Cow<'static, str>>,
        ) -> ::std::borrow::Cow<'static, str> {
            context.as_ref().map_or(::std::borrow::Cow::Borrowed(""), |c| {
                ::std::borrow::Cow::Owned(format!(" ({c})"))
            })
        }
    })
}

fn inspect_variant(variant: &Variant) -> syn::Result<ErrorVariant<'_>> {
    let Fields::Named(fields) = &variant.fields else {
        return Err(syn::Error::new_spanned(
            variant,
            "bus_error variants must use named fields (`message`, `source`, `context`)",
        ));
    };

    let has_context = context_field(fields)?.is_some();
    let source = fields
        .named
        .iter()
        .find(|field| is_source(field))
        .and_then(|field| field.ident.as_ref().map(|ident| (ident, &field.ty)));

    if source.is_some() && !has_context {
        return Err(syn::Error::new_spanned(
            &variant.ident,
            "bus_error variants with a source also need `context: Option<Cow<'static, str>>`",
        ));
    }

    Ok(ErrorVariant {
        ident: &variant.ident,
        source,
        has_context,
        cfgs: variant.attrs.iter().filter(|attr| attr.path().is_ident("cfg")).collect(),
    })
}

fn context_field(fields: &FieldsNamed) -> syn::Result<Option<&Field>> {
    let Some(field) =
        fields.named.iter().find(|field| field.ident.as_ref().is_some_and(|i| i == "context"))
    else {
        return Ok(None);
    };

    if is_optional_cow(&field.ty) {
        Ok(Some(field))
    } else {
        Err(syn::Error::new_spanned(&field.ty, "`context` must be Option<Cow<'static, str>>"))
    }
}

fn is_source(field: &Field) -> bool {
    field.ident.as_ref().is_some_and(|ident| ident == "source")
        || field.attrs.iter().any(|attr| attr.path().is_ident("source") || attr.path().is_ident("from"))
}

/// Adds `Debug` and `thiserror::Error` unless the enum already derives them.
fn missing_derives(input: &DeriveInput) -> TokenStream {
    let mut present = FxHashSet::default();
    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("derive")) {
        let _ = attr.parse_nested_meta(|meta| {
            if let Some(last) = meta.path.segments.last() {
                present.insert(last.ident.to_string());
            }
            Ok(())
        });
    }

    let mut derives = Vec::new();
    if !present.contains("Debug") {
        derives.push(quote! { Debug });
    }
    if !present.contains("Error") {
        derives.push(quote! { ::thiserror::Error });
    }

    if derives.is_empty() { quote! {} } else { quote! { #[derive(#(#derives),*)] } }
}

fn context_trait(name: &Ident, ext: &Ident, variants: &[ErrorVariant<'_>]) -> TokenStream {
    let arms = variants.iter().filter(|v| v.has_context).map(|v| {
        let ident = v.ident;
        let cfgs = &v.cfgs;
        quote! { #(#cfgs)* #name::#ident { context: slot, .. } => *slot = Some(context.into()), }
    });

    quote! {
        /// Attaches a human-readable context to an error result.
        pub trait #ext<T> {
            /// Replaces the context carried by the error, if any.
            fn context(
                self,
                context: impl Into<::std::borrow::Cow<'static, str>>,
            ) -> ::std::result::Result<T, #name>;
        }

        #[automatically_derived]
        impl<T> #ext<T> for ::std::result::Result<T, #name> {
            #[inline]
            #[allow(unreachable_patterns)]
            fn context(self, context: impl Into<::std::borrow::Cow<'static, str>>) -> Self {
                self.map_err(|mut err| {
                    match &mut err {
                        #(#arms)*
                        _ => {}
                    }
                    err
                })
            }
        }
    }
}

fn source_conversion(name: &Ident, ext: &Ident, v: &ErrorVariant<'_>) -> Option<TokenStream> {
    let (field, ty) = v.source?;
    let ident = v.ident;
    let cfgs = &v.cfgs;

    Some(quote! {
        #(#cfgs)*
        #[automatically_derived]
        impl From<#ty> for #name {
            #[inline]
            fn from(#field: #ty) -> Self {
                Self::#ident { #field, context: None }
            }
        }

        #(#cfgs)*
        #[automatically_derived]
        impl<T> #ext<T> for ::std::result::Result<T, #ty> {
            #[inline]
            fn context(
                self,
                context: impl Into<::std::borrow::Cow<'static, str>>,
            ) -> ::std::result::Result<T, #name> {
                self.map_err(|#field| #name::#ident { #field, context: Some(context.into()) })
            }
        }
    })
}

/// Matches `Option<Cow<'static, str>>`, with or without path prefixes.
fn is_optional_cow(ty: &Type) -> bool {
    let Some(inner) = single_generic(ty, "Option") else {
        return false;
    };
    let Type::Path(path) = inner else {
        return false;
    };
    let Some(cow) = path.path.segments.last().filter(|seg| seg.ident == "Cow") else {
        return false;
    };
    let syn::PathArguments::AngleBracketed(args) = &cow.arguments else {
        return false;
    };

    let mut args = args.args.iter();
    let lifetime_ok =
        matches!(args.next(), Some(syn::GenericArgument::Lifetime(lt)) if lt.ident == "static");
    let str_ok = matches!(
        args.next(),
        Some(syn::GenericArgument::Type(Type::Path(p)))
            if p.path.segments.last().is_some_and(|seg| seg.ident == "str")
    );
    lifetime_ok && str_ok
}

fn single_generic<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last().filter(|seg| seg.ident == wrapper)?;
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first() {
        Some(syn::GenericArgument::Type(inner)) => Some(inner),
        _ => None,
    }
}
