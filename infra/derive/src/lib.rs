#![allow(unreachable_pub)]

//! # Derive
//!
//! Procedural macros shared by the event bus crates.
//!
//! Currently a single attribute, [`macro@bus_error`], which turns a plain enum into the
//! workspace's standard error type.

mod macros;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Declares a domain error enum.
///
/// # Generated Items
///
/// * `#[derive(Debug, thiserror::Error)]`, unless already derived.
/// * A `<ErrorName>Ext` trait with `.context(...)` for `Result<T, ErrorName>` and, for
///   every variant holding a source, for `Result<T, SourceError>` as well.
/// * `From<SourceError>` for variants holding a `source` field (or a field marked
///   `#[source]`/`#[from]`), so `?` works on upstream errors.
/// * A module-private `format_context` helper for use inside `#[error(...)]` strings.
///
/// # Requirements
///
/// * Only enums with named-field variants are accepted.
/// * A `context` field must be typed `Option<Cow<'static, str>>`.
/// * A variant with a source must also carry a `context` field.
///
/// # Example
///
/// ```rust,ignore
/// use std::borrow::Cow;
///
/// #[tbus_derive::bus_error]
/// pub enum StoreError {
///     #[error("IO error{}: {source}", format_context(.context))]
///     Io { source: std::io::Error, context: Option<Cow<'static, str>> },
///
///     #[error("Not found{}: {message}", format_context(.context))]
///     NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
/// }
///
/// fn load() -> Result<String, StoreError> {
///     std::fs::read_to_string("state.bin").context("Loading persisted state")
/// }
/// ```
#[proc_macro_attribute]
pub fn bus_error(_args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    macros::error::expand(&input).into()
}
